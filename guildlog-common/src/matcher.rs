//! Fuzzy matching of free-text names against the catalog and directory
//!
//! Resolution walks the tiers exact → prefix → substring (→ near miss) and
//! stops at the first tier that has any candidate. Inside a tier the shortest
//! candidate wins, which prefers "Spice" over "Spice Coffee" for "spi".

use crate::models::{
    CatalogSnapshot, DirectorySnapshot, ParticipantRef, ResourceId, ResourceRef, UserId,
};
use crate::normalize::{normalize, AliasRules};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// Keys shorter than this never resolve through the near-miss tier
const NEAR_MISS_MIN_KEY_LEN: usize = 4;

/// How well a candidate name matches an input key
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum MatchScore {
    /// No relation
    None = 0,
    /// Edit distance ≤ 1 against the candidate's equal-length prefix
    NearMiss = 1,
    /// Key appears inside the candidate
    Contains = 2,
    /// Candidate starts with the key
    Prefix = 3,
}

impl MatchScore {
    pub fn value(self) -> u8 {
        self as u8
    }
}

/// Score a candidate name against an input key (both normalized first)
pub fn score_match(key: &str, candidate: &str) -> MatchScore {
    score_keys(&normalize(key), &normalize(candidate))
}

fn score_keys(key: &str, candidate: &str) -> MatchScore {
    if key.is_empty() || candidate.is_empty() {
        return MatchScore::None;
    }
    if candidate.starts_with(key) {
        return MatchScore::Prefix;
    }
    if candidate.contains(key) {
        return MatchScore::Contains;
    }
    let prefix: String = candidate.chars().take(key.chars().count()).collect();
    if strsim::levenshtein(key, &prefix) <= 1 {
        MatchScore::NearMiss
    } else {
        MatchScore::None
    }
}

/// Resolution tier; lower sorts first
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum Tier {
    Exact,
    Prefix,
    Substring,
    NearMiss,
}

fn tier_of(key: &str, candidate: &str) -> Option<Tier> {
    if key == candidate && !key.is_empty() {
        return Some(Tier::Exact);
    }
    match score_keys(key, candidate) {
        MatchScore::Prefix => Some(Tier::Prefix),
        MatchScore::Contains => Some(Tier::Substring),
        MatchScore::NearMiss if key.chars().count() >= NEAR_MISS_MIN_KEY_LEN => Some(Tier::NearMiss),
        _ => None,
    }
}

/// Candidate sort key: tier, then field rank, then name length, then input order
type Rank = (Tier, u8, usize, usize);

fn rank(key: &str, name: &str, field_rank: u8, index: usize) -> Option<Rank> {
    let candidate = normalize(name);
    tier_of(key, &candidate).map(|tier| (tier, field_rank, candidate.chars().count(), index))
}

/// Resolve a resource name using the built-in alias table
pub fn resolve_resource(raw_name: &str, catalog: &CatalogSnapshot) -> ResourceRef {
    resolve_resource_with(raw_name, catalog, &AliasRules::builtin())
}

/// Resolve a resource name against the catalog
///
/// The alias table is applied first; a `None` id means the caller must offer
/// to create the entry.
pub fn resolve_resource_with(
    raw_name: &str,
    catalog: &CatalogSnapshot,
    aliases: &AliasRules,
) -> ResourceRef {
    // A catalog name typed out in full wins over any alias rewrite
    let raw_key = normalize(raw_name);
    if let Some(entry) = catalog
        .entries
        .iter()
        .find(|entry| !raw_key.is_empty() && normalize(&entry.canonical_name) == raw_key)
    {
        debug!(input = %raw_name, matched = %entry.canonical_name, "Resolved resource by exact name");
        return ResourceRef {
            id: Some(entry.id),
            canonical_name: entry.canonical_name.clone(),
        };
    }

    let canonical = aliases.canonicalize(raw_name);
    let key = normalize(&canonical);

    let best = catalog
        .entries
        .iter()
        .enumerate()
        .filter_map(|(i, entry)| rank(&key, &entry.canonical_name, 0, i).map(|r| (r, entry)))
        .min_by_key(|(r, _)| *r);

    match best {
        Some(((tier, ..), entry)) => {
            debug!(
                input = %raw_name,
                matched = %entry.canonical_name,
                tier = ?tier,
                "Resolved resource"
            );
            ResourceRef {
                id: Some(entry.id),
                canonical_name: entry.canonical_name.clone(),
            }
        }
        None => {
            warn!("Unresolved resource '{}' - needs catalog entry", raw_name);
            ResourceRef {
                id: None,
                canonical_name: raw_name.trim().to_string(),
            }
        }
    }
}

/// Resolve a participant name against the directory
///
/// Within each tier the preferred alias is consulted before the login name.
/// Unresolved names come back as placeholders so equal splits can still
/// count them.
pub fn resolve_participant(raw_name: &str, directory: &DirectorySnapshot) -> ParticipantRef {
    let key = normalize(raw_name);

    let best = directory
        .entries
        .iter()
        .enumerate()
        .filter_map(|(i, entry)| {
            let preferred = entry
                .preferred_name
                .as_deref()
                .and_then(|name| rank(&key, name, 0, i));
            let login = rank(&key, &entry.login_name, 1, i);
            let r = match (preferred, login) {
                (Some(a), Some(b)) => a.min(b),
                (a, b) => a.or(b)?,
            };
            Some((r, entry))
        })
        .min_by_key(|(r, _)| *r);

    match best {
        Some(((tier, ..), entry)) => {
            debug!(
                input = %raw_name,
                user_id = %entry.id,
                tier = ?tier,
                "Resolved participant"
            );
            ParticipantRef {
                id: Some(entry.id),
                display_name: entry.display_name().to_string(),
            }
        }
        None => {
            warn!("Unresolved participant '{}' - kept as placeholder", raw_name);
            ParticipantRef::placeholder(raw_name.trim())
        }
    }
}

/// Resolve a list of names, dropping blanks and duplicates
///
/// Two names resolving to the same user collapse into the first one;
/// placeholders collapse when their normalized names are equal.
pub fn resolve_participants<S: AsRef<str>>(
    names: &[S],
    directory: &DirectorySnapshot,
) -> Vec<ParticipantRef> {
    let mut seen_ids: Vec<UserId> = Vec::new();
    let mut seen_placeholders: Vec<String> = Vec::new();
    let mut out = Vec::with_capacity(names.len());

    for name in names {
        let name = name.as_ref();
        let key = normalize(name);
        if key.is_empty() {
            continue;
        }
        let resolved = resolve_participant(name, directory);
        match resolved.id {
            Some(id) if seen_ids.contains(&id) => continue,
            Some(id) => seen_ids.push(id),
            None if seen_placeholders.contains(&key) => continue,
            None => seen_placeholders.push(key),
        }
        out.push(resolved);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{DirectoryEntry, ResourceCatalogEntry};
    use crate::normalize::AliasRule;

    fn catalog() -> CatalogSnapshot {
        let entry = |id, name: &str, category: &str| ResourceCatalogEntry {
            id: ResourceId(id),
            canonical_name: name.to_string(),
            category: category.to_string(),
            refined_into_id: None,
        };
        CatalogSnapshot::new(vec![
            entry(1, "Spice Coffee", "consumable"),
            entry(2, "Spice", "raw"),
            entry(3, "Melange", "refined"),
            entry(4, "Advanced Particulate Filter", "component"),
            entry(5, "Particulate Filter", "component"),
            entry(6, "Stravidium Mass", "raw"),
        ])
    }

    fn directory() -> DirectorySnapshot {
        DirectorySnapshot::new(vec![
            DirectoryEntry {
                id: UserId(10),
                preferred_name: Some("Chani".into()),
                login_name: "desertmouse".into(),
            },
            DirectoryEntry {
                id: UserId(11),
                preferred_name: None,
                login_name: "stilgar".into(),
            },
            DirectoryEntry {
                id: UserId(12),
                preferred_name: Some("Chanisa".into()),
                login_name: "chanisa_login".into(),
            },
        ])
    }

    #[test]
    fn test_score_match_values() {
        assert_eq!(score_match("spi", "Spice").value(), 3);
        assert_eq!(score_match("ice", "Spice").value(), 2);
        assert_eq!(score_match("spice", "Spyce").value(), 1);
        assert_eq!(score_match("xyz", "Spice").value(), 0);
    }

    #[test]
    fn test_score_match_empty_key() {
        assert_eq!(score_match("", "Spice"), MatchScore::None);
        assert_eq!(score_match("!!", "Spice"), MatchScore::None);
    }

    #[test]
    fn test_resolve_prefers_shortest_in_tier() {
        let r = resolve_resource("spi", &catalog());
        assert_eq!(r.id, Some(ResourceId(2)));
        assert_eq!(r.canonical_name, "Spice");
    }

    #[test]
    fn test_resolve_exact_beats_prefix() {
        let r = resolve_resource("SPICE", &catalog());
        assert_eq!(r.id, Some(ResourceId(2)));
        let r = resolve_resource("spice coffee", &catalog());
        assert_eq!(r.id, Some(ResourceId(1)));
    }

    #[test]
    fn test_resolve_through_alias() {
        let r = resolve_resource("adv filters", &catalog());
        assert_eq!(r.id, Some(ResourceId(4)));
        let r = resolve_resource("filters", &catalog());
        assert_eq!(r.id, Some(ResourceId(5)));
        let r = resolve_resource("strav", &catalog());
        assert_eq!(r.id, Some(ResourceId(6)));
    }

    #[test]
    fn test_other_filters_keep_their_own_entries() {
        let mut entries = catalog().entries;
        entries.push(ResourceCatalogEntry {
            id: ResourceId(7),
            canonical_name: "Water Filter".to_string(),
            category: "component".to_string(),
            refined_into_id: None,
        });
        entries.push(ResourceCatalogEntry {
            id: ResourceId(8),
            canonical_name: "Fuel Filter".to_string(),
            category: "component".to_string(),
            refined_into_id: None,
        });
        let catalog = CatalogSnapshot::new(entries);

        assert_eq!(resolve_resource("Water Filter", &catalog).id, Some(ResourceId(7)));
        assert_eq!(resolve_resource("fuel filter", &catalog).id, Some(ResourceId(8)));
        assert_eq!(resolve_resource("filters", &catalog).id, Some(ResourceId(5)));

        // Exact catalog names win even over a rule that would rewrite them
        let greedy = AliasRules::from_rules(vec![AliasRule::new(r"filters?$", "particulate filter").unwrap()]);
        let r = resolve_resource_with("Fuel Filter", &catalog, &greedy);
        assert_eq!(r.id, Some(ResourceId(8)));
        assert_eq!(r.canonical_name, "Fuel Filter");
    }

    #[test]
    fn test_resolve_substring_tier() {
        let r = resolve_resource("coffee", &catalog());
        assert_eq!(r.id, Some(ResourceId(1)));
    }

    #[test]
    fn test_resolve_near_miss_as_last_resort() {
        let r = resolve_resource("Melnage", &catalog());
        assert_eq!(r.id, None);
        let r = resolve_resource("melanje", &catalog());
        assert_eq!(r.id, Some(ResourceId(3)));
    }

    #[test]
    fn test_unresolved_resource_keeps_input() {
        let r = resolve_resource("  Sandworm Tooth ", &catalog());
        assert!(!r.is_resolved());
        assert_eq!(r.canonical_name, "Sandworm Tooth");
    }

    #[test]
    fn test_resolve_participant_preferred_then_login() {
        let p = resolve_participant("chani", &directory());
        assert_eq!(p.id, Some(UserId(10)));
        assert_eq!(p.display_name, "Chani");

        let p = resolve_participant("desertmouse", &directory());
        assert_eq!(p.id, Some(UserId(10)));
        assert_eq!(p.display_name, "Chani");

        let p = resolve_participant("stil", &directory());
        assert_eq!(p.id, Some(UserId(11)));
        assert_eq!(p.display_name, "stilgar");
    }

    #[test]
    fn test_resolve_participant_unresolved_placeholder() {
        let p = resolve_participant("Jessica", &directory());
        assert_eq!(p, ParticipantRef::placeholder("Jessica"));
    }

    #[test]
    fn test_resolve_participants_dedup() {
        let names = ["Chani", "desertmouse", "Jessica", "jessica!", "", "stilgar"];
        let refs = resolve_participants(&names, &directory());
        assert_eq!(refs.len(), 3);
        assert_eq!(refs[0].id, Some(UserId(10)));
        assert_eq!(refs[1], ParticipantRef::placeholder("Jessica"));
        assert_eq!(refs[2].id, Some(UserId(11)));
    }
}
