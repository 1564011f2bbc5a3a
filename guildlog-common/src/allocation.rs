//! Proportional allocation by the largest-remainder method
//!
//! Every split of an integer quantity in guildlog goes through [`allocate`]:
//! quick-add splits, group submissions and refinery distributions all share
//! the same rounding and tie-break rule.
//!
//! Postconditions for any request with at least one positive weight:
//! - shares sum exactly to the total
//! - each share is `floor(exact)` or `ceil(exact)` of its exact entitlement
//! - equal remainders are broken by input order, so repeated calls agree

use crate::matcher::resolve_participant;
use crate::models::{
    DirectorySnapshot, NormalizedWeight, ParticipantRef, RawShareInput, Share, UserId, Weight,
};
use crate::normalize::normalize;
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::hash::Hash;
use tracing::{debug, warn};

/// Allocation input: a total and an ordered list of weighted recipients
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AllocationRequest<K> {
    pub total_quantity: u64,
    pub recipients: Vec<(K, Weight)>,
}

impl<K: Clone + Eq + Hash> AllocationRequest<K> {
    pub fn allocate(&self) -> Result<Allocation<K>> {
        allocate(self.total_quantity, &self.recipients)
    }
}

/// Result of one allocation, in recipient input order
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Allocation<K> {
    shares: Vec<(K, Share)>,
}

impl<K: PartialEq> Allocation<K> {
    pub fn get(&self, recipient: &K) -> Option<Share> {
        self.shares
            .iter()
            .find(|(k, _)| k == recipient)
            .map(|(_, s)| *s)
    }

    pub fn iter(&self) -> impl Iterator<Item = &(K, Share)> {
        self.shares.iter()
    }

    pub fn len(&self) -> usize {
        self.shares.len()
    }

    pub fn is_empty(&self) -> bool {
        self.shares.is_empty()
    }

    /// Sum of all shares; equals the requested total
    pub fn total(&self) -> u64 {
        self.shares.iter().map(|(_, s)| s.0).sum()
    }

    pub fn into_vec(self) -> Vec<(K, Share)> {
        self.shares
    }
}

struct Slot<K> {
    key: K,
    weight: f64,
    floor: u64,
    remainder: f64,
}

/// Split `total` into whole-unit shares proportional to `weights`
///
/// Non-positive weights are skipped; repeated keys have their weights summed
/// and keep their first position. Fails with [`Error::NoRecipients`] when no
/// positive weight remains.
pub fn allocate<K: Clone + Eq + Hash>(total: u64, weights: &[(K, Weight)]) -> Result<Allocation<K>> {
    let mut slots: Vec<Slot<K>> = Vec::with_capacity(weights.len());
    let mut positions: HashMap<K, usize> = HashMap::with_capacity(weights.len());

    // Weights near f64::MAX can overflow their sum; bring them down to at most 1
    let positive = || weights.iter().map(|(_, w)| *w).filter(|w| w.is_positive()).map(|w| w.0);
    let scale = if positive().sum::<f64>().is_finite() {
        1.0
    } else {
        positive().fold(0.0, f64::max)
    };

    for (key, weight) in weights {
        if !weight.is_positive() {
            continue;
        }
        let scaled = weight.0 / scale;
        match positions.get(key) {
            Some(&i) => slots[i].weight += scaled,
            None => {
                positions.insert(key.clone(), slots.len());
                slots.push(Slot {
                    key: key.clone(),
                    weight: scaled,
                    floor: 0,
                    remainder: 0.0,
                });
            }
        }
    }

    if slots.is_empty() {
        return Err(Error::NoRecipients);
    }

    let weight_sum: f64 = slots.iter().map(|s| s.weight).sum();
    let mut provisional: u64 = 0;
    for slot in slots.iter_mut() {
        let fraction = NormalizedWeight(slot.weight / weight_sum);
        let exact = total as f64 * fraction.0;
        let floor = exact.floor();
        slot.floor = floor as u64;
        slot.remainder = exact - floor;
        provisional += slot.floor;
    }

    // Stable sort: equal remainders stay in input order
    let mut order: Vec<usize> = (0..slots.len()).collect();
    order.sort_by(|&a, &b| slots[b].remainder.total_cmp(&slots[a].remainder));

    if provisional > total {
        // Floating point pushed a floor past its entitlement; take the excess
        // back from the smallest remainders.
        let mut excess = provisional - total;
        for &i in order.iter().rev().cycle() {
            if excess == 0 {
                break;
            }
            if slots[i].floor > 0 {
                slots[i].floor -= 1;
                excess -= 1;
            }
        }
    } else {
        let mut deficit = total - provisional;
        debug!(total, deficit, recipients = slots.len(), "Distributing remainder units");
        for &i in order.iter().cycle() {
            if deficit == 0 {
                break;
            }
            slots[i].floor += 1;
            deficit -= 1;
        }
    }

    Ok(Allocation {
        shares: slots.into_iter().map(|s| (s.key, Share(s.floor))).collect(),
    })
}

/// Split `total` evenly; leftover units go to the earliest recipients
pub fn split_equally<K: Clone + Eq + Hash>(total: u64, recipients: &[K]) -> Result<Allocation<K>> {
    let weights: Vec<(K, Weight)> = recipients.iter().map(|k| (k.clone(), Weight(1.0))).collect();
    allocate(total, &weights)
}

/// Share credited to a resolved participant
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreditedShare {
    pub user_id: UserId,
    pub display_name: String,
    pub share: Share,
}

/// Share that could not be credited because its name did not resolve
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnassignedShare {
    pub name: String,
    pub share: Share,
}

/// Outcome of splitting a quantity by free-text names and raw weights
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawShareAllocation {
    pub credited: Vec<CreditedShare>,
    /// Slots whose names need an admin to add or fix a directory entry
    pub needs_attention: Vec<UnassignedShare>,
    /// Names dropped because their weight was zero, negative or not a number
    pub ignored: Vec<String>,
}

impl RawShareAllocation {
    pub fn credited_total(&self) -> u64 {
        self.credited.iter().map(|c| c.share.0).sum()
    }

    pub fn unassigned_total(&self) -> u64 {
        self.needs_attention.iter().map(|u| u.share.0).sum()
    }
}

/// Split `total` by user-typed names and fraction/percent weights
///
/// Every named slot takes part in the split, resolved or not, so an
/// unresolved name never inflates everyone else's share. Unresolved slots are
/// reported in `needs_attention` for the caller to surface.
pub fn allocate_raw_shares(
    total: u64,
    input: &RawShareInput,
    directory: &DirectorySnapshot,
) -> Result<RawShareAllocation> {
    let mut slots: Vec<(ParticipantRef, f64)> = Vec::new();
    let mut ignored = Vec::new();

    for (name, raw) in &input.entries {
        let weight = match raw.interpret() {
            Some(w) => w,
            None => {
                warn!("Ignoring '{}' with non-positive weight {}", name, raw.0);
                ignored.push(name.clone());
                continue;
            }
        };
        let participant = resolve_participant(name, directory);
        let existing = slots.iter_mut().find(|(p, _)| match (p.id, participant.id) {
            (Some(a), Some(b)) => a == b,
            (None, None) => normalize(&p.display_name) == normalize(&participant.display_name),
            _ => false,
        });
        match existing {
            Some((_, w)) => *w += weight.0,
            None => slots.push((participant, weight.0)),
        }
    }

    let weights: Vec<(usize, Weight)> = slots
        .iter()
        .enumerate()
        .map(|(i, (_, w))| (i, Weight(*w)))
        .collect();
    let allocation = allocate(total, &weights)?;

    let mut result = RawShareAllocation {
        ignored,
        ..Default::default()
    };
    for (i, share) in allocation.into_vec() {
        let participant = &slots[i].0;
        match participant.id {
            Some(user_id) => result.credited.push(CreditedShare {
                user_id,
                display_name: participant.display_name.clone(),
                share,
            }),
            None => result.needs_attention.push(UnassignedShare {
                name: participant.display_name.clone(),
                share,
            }),
        }
    }
    Ok(result)
}
