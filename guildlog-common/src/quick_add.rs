//! Quick-add: typed or pre-parsed "quantity resource: who gets what" entries
//!
//! Text grammar, one entry per line or per `;`:
//!
//! ```text
//! 1200 spice: paul 60, gurney 40
//! adv filters 3
//! 2k water: stilgar, chani
//! ```
//!
//! The quantity may lead or trail the resource words. Names after the colon
//! carry a fraction or percent weight; if none of them does, the quantity is
//! split evenly. With no names at all the submitter is credited.

use crate::allocation::allocate_raw_shares;
use crate::distribution::{DistributionLine, EngineContext, NeedsAttention};
use crate::models::{RawShareInput, ResourceRef, Share, UserId};
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// One parsed quick-add entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuickAddItem {
    pub resource: String,
    pub quantity: u64,
    #[serde(default)]
    pub shares: RawShareInput,
}

/// Resolved and split quick-add entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuickAddEntry {
    pub resource: ResourceRef,
    pub quantity: u64,
    pub lines: Vec<DistributionLine>,
    pub needs_attention: Vec<NeedsAttention>,
    pub ignored: Vec<String>,
}

/// Outcome of a quick-add submission; resolvable entries are kept even when
/// others fail
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QuickAddPlan {
    pub entries: Vec<QuickAddEntry>,
    pub unresolved_resources: Vec<String>,
}

impl QuickAddPlan {
    pub fn needs_attention(&self) -> bool {
        !self.unresolved_resources.is_empty()
            || self.entries.iter().any(|e| !e.needs_attention.is_empty())
    }
}

/// Resolve and split every item, collecting failures instead of aborting
pub fn plan_quick_add(
    items: &[QuickAddItem],
    submitter: UserId,
    ctx: &EngineContext<'_>,
) -> Result<QuickAddPlan> {
    let mut plan = QuickAddPlan::default();

    for item in items {
        let resource = ctx.resolve_resource(&item.resource);
        if !resource.is_resolved() {
            warn!("Quick-add resource '{}' not in catalog", item.resource);
            plan.unresolved_resources.push(item.resource.clone());
            continue;
        }

        let entry = if item.shares.entries.is_empty() {
            QuickAddEntry {
                resource,
                quantity: item.quantity,
                lines: vec![ctx.line_for(submitter, Share(item.quantity))],
                needs_attention: Vec::new(),
                ignored: Vec::new(),
            }
        } else {
            let split = allocate_raw_shares(item.quantity, &item.shares, ctx.directory)?;
            QuickAddEntry {
                resource,
                quantity: item.quantity,
                lines: split
                    .credited
                    .iter()
                    .map(|c| ctx.line_for(c.user_id, c.share))
                    .collect(),
                needs_attention: split
                    .needs_attention
                    .into_iter()
                    .map(|u| NeedsAttention {
                        name: u.name,
                        share: u.share.0,
                    })
                    .collect(),
                ignored: split.ignored,
            }
        };
        plan.entries.push(entry);
    }

    Ok(plan)
}

/// Parse quick-add text into items
pub fn parse_quick_add(text: &str) -> Result<Vec<QuickAddItem>> {
    text.split(['\n', ';'])
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(parse_line)
        .collect()
}

fn parse_line(line: &str) -> Result<QuickAddItem> {
    let (head, tail) = match line.split_once(':') {
        Some((h, t)) => (h.trim(), Some(t.trim())),
        None => (line.trim(), None),
    };

    let words: Vec<&str> = head.split_whitespace().collect();
    let (quantity, resource_words) = match (words.first(), words.last()) {
        (Some(first), _) if parse_quantity(first).is_some() => {
            (parse_quantity(first), &words[1..])
        }
        (_, Some(last)) if parse_quantity(last).is_some() => {
            (parse_quantity(last), &words[..words.len() - 1])
        }
        _ => (None, &words[..]),
    };
    let quantity = quantity
        .ok_or_else(|| Error::InvalidInput(format!("No quantity in '{}'", line)))?;
    if resource_words.is_empty() {
        return Err(Error::InvalidInput(format!("No resource in '{}'", line)));
    }

    let shares = match tail {
        Some(names) if !names.is_empty() => parse_shares(names, line)?,
        _ => RawShareInput::default(),
    };

    let item = QuickAddItem {
        resource: resource_words.join(" "),
        quantity,
        shares,
    };
    debug!(resource = %item.resource, quantity = item.quantity, "Parsed quick-add line");
    Ok(item)
}

fn parse_shares(names: &str, line: &str) -> Result<RawShareInput> {
    let mut parsed: Vec<(String, Option<f64>)> = Vec::new();
    for part in names.split(',').map(str::trim).filter(|p| !p.is_empty()) {
        let words: Vec<&str> = part.split_whitespace().collect();
        let weight = words.last().and_then(|w| parse_weight(w));
        let name_words = match weight {
            Some(_) if words.len() > 1 => &words[..words.len() - 1],
            Some(_) => {
                return Err(Error::InvalidInput(format!(
                    "Weight without a name in '{}'",
                    line
                )))
            }
            None => &words[..],
        };
        parsed.push((name_words.join(" "), weight));
    }

    let weighted = parsed.iter().filter(|(_, w)| w.is_some()).count();
    if weighted != 0 && weighted != parsed.len() {
        return Err(Error::InvalidInput(format!(
            "Either every name or no name needs a weight in '{}'",
            line
        )));
    }

    let mut shares = RawShareInput::default();
    for (name, weight) in parsed {
        shares.push(name, weight.unwrap_or(1.0));
    }
    Ok(shares)
}

/// "1200", "1,200", "2k", "1.5k"
fn parse_quantity(token: &str) -> Option<u64> {
    let cleaned = token.replace(',', "").to_lowercase();
    if let Some(thousands) = cleaned.strip_suffix('k') {
        let value: f64 = thousands.parse().ok()?;
        if !value.is_finite() || value < 0.0 {
            return None;
        }
        return Some((value * 1000.0).round() as u64);
    }
    cleaned.parse().ok()
}

/// "60", "60%", "0.25"
fn parse_weight(token: &str) -> Option<f64> {
    let value: f64 = token.trim_end_matches('%').parse().ok()?;
    value.is_finite().then_some(value)
}
