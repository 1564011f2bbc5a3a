//! Name normalization and resource alias canonicalization
//!
//! Aliases are regular expressions over the normalized key (lowercase,
//! alphanumerics only). Rules are tried strictly in order and the first match
//! wins, so a specific rule such as "advanced particulate filter" must sit
//! before the broader "particulate filter" rule that would otherwise swallow
//! its abbreviations.

use crate::{Error, Result};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

/// Built-in alias table, most specific first
const DEFAULT_ALIASES: &[(&str, &str)] = &[
    (r"^adv(anced)?(part(iculate)?)?filters?$", "advanced particulate filter"),
    (r"^(part(iculate)?)?filters?$", "particulate filter"),
    (r"^(spicemelange|melange|mel)$", "melange"),
    (r"^(rawspice|spicesand|spice)$", "spice"),
    (r"^(plast|plasta|plastanium|plastaniumingots?)$", "plastanium"),
    (r"^(strav|stravidium|stravidiummass)$", "stravidium"),
    (r"^(ti|titan|titanium|titaniumore)$", "titanium"),
    (r"^(h2o|water)$", "water"),
    (r"^(sol|solari|solaris)$", "solari"),
];

static DEFAULT_RULES: Lazy<AliasRules> = Lazy::new(|| {
    let rules = DEFAULT_ALIASES
        .iter()
        .filter_map(|(pattern, canonical)| AliasRule::new(pattern, canonical).ok())
        .collect();
    AliasRules { rules }
});

/// Canonicalize a raw string into a comparable key
///
/// Lowercases and drops every character that is not alphanumeric, so
/// "Adv. Filters" and "adv filters" both become "advfilters".
pub fn normalize(raw: &str) -> String {
    raw.chars()
        .flat_map(char::to_lowercase)
        .filter(|c| c.is_alphanumeric())
        .collect()
}

/// Resolve a resource alias using the built-in rule table
///
/// Returns the canonical name of the first matching rule, or `raw`
/// unchanged when nothing matches.
pub fn canonicalize_resource_alias(raw: &str) -> String {
    DEFAULT_RULES.canonicalize(raw)
}

/// Alias entry as written in configuration files
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AliasConfig {
    pub pattern: String,
    pub canonical: String,
}

/// One compiled alias rule
#[derive(Debug, Clone)]
pub struct AliasRule {
    pattern: Regex,
    canonical: String,
}

impl AliasRule {
    pub fn new(pattern: &str, canonical: &str) -> Result<Self> {
        let pattern = Regex::new(pattern)
            .map_err(|e| Error::Config(format!("Invalid alias pattern '{}': {}", pattern, e)))?;
        Ok(Self {
            pattern,
            canonical: canonical.to_string(),
        })
    }

    pub fn canonical(&self) -> &str {
        &self.canonical
    }

    fn matches(&self, key: &str) -> bool {
        self.pattern.is_match(key)
    }
}

/// Ordered alias rule table
#[derive(Debug, Clone, Default)]
pub struct AliasRules {
    rules: Vec<AliasRule>,
}

impl AliasRules {
    /// Built-in rule table
    pub fn builtin() -> Self {
        DEFAULT_RULES.clone()
    }

    /// Rule table from an explicit ordered list
    pub fn from_rules(rules: Vec<AliasRule>) -> Self {
        Self { rules }
    }

    /// Built-in table preceded by guild-specific rules
    ///
    /// Extra rules are checked first, in the order given, so local slang can
    /// override a built-in abbreviation.
    pub fn with_overrides(extra: &[AliasConfig]) -> Result<Self> {
        let mut rules = Vec::with_capacity(extra.len() + DEFAULT_RULES.rules.len());
        for alias in extra {
            rules.push(AliasRule::new(&alias.pattern, &alias.canonical)?);
        }
        rules.extend(DEFAULT_RULES.rules.iter().cloned());
        Ok(Self { rules })
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// First matching canonical name, else `raw` unchanged
    pub fn canonicalize(&self, raw: &str) -> String {
        self.lookup(raw)
            .map(str::to_string)
            .unwrap_or_else(|| raw.to_string())
    }

    /// First matching canonical name, if any
    pub fn lookup(&self, raw: &str) -> Option<&str> {
        let key = normalize(raw);
        if key.is_empty() {
            return None;
        }
        let hit = self.rules.iter().find(|rule| rule.matches(&key))?;
        tracing::debug!("Alias '{}' canonicalized to '{}'", raw, hit.canonical);
        Some(hit.canonical())
    }
}
