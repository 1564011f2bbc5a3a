//! Per-recipient weights aggregated across one or more sessions
//!
//! Two interchangeable strategies turn a session snapshot into raw weights
//! for the allocator. Weights are real-valued and unnormalized; the totals
//! they are later applied to stay integral.

use crate::models::{
    CatalogSnapshot, ResourceId, SessionAggregate, SessionId, SessionSnapshot, UserId, Weight,
};
use crate::normalize::normalize;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use tracing::{debug, info, warn};

/// How a session's yield is credited to its participants
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Strategy {
    /// Each session's total divided evenly among its registered members
    EqualPerSession,
    /// Each participant's individually logged quantity, summed across sessions
    WeightedAcrossSessions,
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Strategy::EqualPerSession => write!(f, "equal"),
            Strategy::WeightedAcrossSessions => write!(f, "weighted"),
        }
    }
}

impl FromStr for Strategy {
    type Err = crate::Error;

    fn from_str(s: &str) -> crate::Result<Self> {
        match s.to_lowercase().as_str() {
            "equal" | "equal_per_session" | "even" => Ok(Strategy::EqualPerSession),
            "weighted" | "weighted_across_sessions" | "contribution" => {
                Ok(Strategy::WeightedAcrossSessions)
            }
            other => Err(crate::Error::InvalidInput(format!(
                "Unknown aggregation strategy '{}'",
                other
            ))),
        }
    }
}

/// Set of catalog resources a distribution covers
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceFilter {
    ids: Vec<ResourceId>,
}

impl ResourceFilter {
    pub fn by_ids(ids: impl IntoIterator<Item = ResourceId>) -> Self {
        let mut out = Vec::new();
        for id in ids {
            if !out.contains(&id) {
                out.push(id);
            }
        }
        Self { ids: out }
    }

    /// Every catalog entry whose normalized name contains the normalized pattern
    ///
    /// A pattern matching no rows yields an empty filter, which aggregates to
    /// nothing rather than failing.
    pub fn by_name(pattern: &str, catalog: &CatalogSnapshot) -> Self {
        let key = normalize(pattern);
        if key.is_empty() {
            return Self::default();
        }
        Self::by_ids(
            catalog
                .entries
                .iter()
                .filter(|e| normalize(&e.canonical_name).contains(&key))
                .map(|e| e.id),
        )
    }

    pub fn matches(&self, id: ResourceId) -> bool {
        self.ids.contains(&id)
    }

    pub fn ids(&self) -> &[ResourceId] {
        &self.ids
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }
}

/// Aggregated input for one distribution
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AggregateResult {
    /// Everything collected for the filtered resources across the sessions
    pub total_input: u64,
    /// Recipient weights in first-seen order
    pub weights: Vec<(UserId, Weight)>,
    /// Per-session breakdown
    pub sessions: Vec<SessionAggregate>,
    /// Strategy that actually produced the weights, after any fallback
    pub strategy_used: Option<Strategy>,
}

impl AggregateResult {
    pub fn weight_of(&self, user: UserId) -> Option<Weight> {
        self.weights.iter().find(|(u, _)| *u == user).map(|(_, w)| *w)
    }

    pub fn is_empty(&self) -> bool {
        self.total_input == 0 && self.weights.is_empty()
    }
}

#[derive(Default)]
struct WeightAccumulator {
    weights: Vec<(UserId, f64)>,
}

impl WeightAccumulator {
    fn add(&mut self, user: UserId, amount: f64) {
        if amount <= 0.0 {
            return;
        }
        match self.weights.iter_mut().find(|(u, _)| *u == user) {
            Some((_, w)) => *w += amount,
            None => self.weights.push((user, amount)),
        }
    }

    fn finish(self) -> Vec<(UserId, Weight)> {
        self.weights.into_iter().map(|(u, w)| (u, Weight(w))).collect()
    }
}

fn dedup_sessions(session_ids: &[SessionId]) -> Vec<SessionId> {
    let mut out: Vec<SessionId> = Vec::with_capacity(session_ids.len());
    for id in session_ids {
        if !out.contains(id) {
            out.push(*id);
        }
    }
    out
}

/// Per-session totals and membership for the filtered resources
pub fn session_aggregates(
    snapshot: &SessionSnapshot,
    session_ids: &[SessionId],
    filter: &ResourceFilter,
) -> Vec<SessionAggregate> {
    dedup_sessions(session_ids)
        .into_iter()
        .map(|session_id| {
            let total_collected = snapshot
                .yields
                .iter()
                .filter(|y| y.session_id == session_id && filter.matches(y.resource_id))
                .map(|y| y.quantity)
                .sum();
            SessionAggregate {
                session_id,
                resource_ids: filter.ids().to_vec(),
                total_collected,
                participant_ids: snapshot.participants_of(session_id),
            }
        })
        .collect()
}

/// Compute raw per-recipient weights for a set of sessions
///
/// `WeightedAcrossSessions` with no individually attributed rows falls back
/// to `EqualPerSession`, so a distribution never ends up all zero just because
/// nobody logged their own haul.
pub fn aggregate(
    snapshot: &SessionSnapshot,
    session_ids: &[SessionId],
    filter: &ResourceFilter,
    strategy: Strategy,
) -> AggregateResult {
    if filter.is_empty() {
        debug!("Resource filter matched no catalog rows - nothing to aggregate");
        return AggregateResult::default();
    }

    let sessions = session_aggregates(snapshot, session_ids, filter);
    let total_input: u64 = sessions.iter().map(|s| s.total_collected).sum();

    let (weights, strategy_used) = match strategy {
        Strategy::EqualPerSession => (equal_per_session(&sessions), Strategy::EqualPerSession),
        Strategy::WeightedAcrossSessions => match weighted_across_sessions(snapshot, &sessions, filter) {
            Some(weights) => (weights, Strategy::WeightedAcrossSessions),
            None => {
                info!("No individually logged yields - falling back to equal split per session");
                (equal_per_session(&sessions), Strategy::EqualPerSession)
            }
        },
    };

    AggregateResult {
        total_input,
        weights,
        sessions,
        strategy_used: Some(strategy_used),
    }
}

fn equal_per_session(sessions: &[SessionAggregate]) -> Vec<(UserId, Weight)> {
    let mut acc = WeightAccumulator::default();
    for session in sessions {
        if session.participant_ids.is_empty() {
            if session.total_collected > 0 {
                warn!(
                    "Session {} collected {} but has no registered participants",
                    session.session_id, session.total_collected
                );
            }
            continue;
        }
        let each = session.total_collected as f64 / session.participant_ids.len() as f64;
        for user in &session.participant_ids {
            acc.add(*user, each);
        }
    }
    acc.finish()
}

fn weighted_across_sessions(
    snapshot: &SessionSnapshot,
    sessions: &[SessionAggregate],
    filter: &ResourceFilter,
) -> Option<Vec<(UserId, Weight)>> {
    let mut acc = WeightAccumulator::default();
    let mut attributed_rows = 0usize;
    for session in sessions {
        for row in snapshot
            .yields
            .iter()
            .filter(|y| y.session_id == session.session_id && filter.matches(y.resource_id))
        {
            if let Some(user) = row.logged_by {
                attributed_rows += 1;
                acc.add(user, row.quantity as f64);
            }
        }
    }
    let weights = acc.finish();
    if attributed_rows == 0 || weights.is_empty() {
        None
    } else {
        Some(weights)
    }
}
