//! Engine data model
//!
//! Identifiers are newtypes so a resource id can never be passed where a user
//! id is expected. Snapshot structs carry rows the caller has already fetched;
//! engine functions only ever borrow them.

use serde::{Deserialize, Serialize};
use std::fmt;

macro_rules! id_newtype {
    ($name:ident) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub i64);

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

id_newtype!(ResourceId);
id_newtype!(UserId);
id_newtype!(SessionId);

/// Resource catalog row (immutable reference data)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceCatalogEntry {
    pub id: ResourceId,
    pub canonical_name: String,
    pub category: String,
    #[serde(default)]
    pub refined_into_id: Option<ResourceId>,
}

/// Participant directory row
///
/// `preferred_name` is the guild-facing alias; `login_name` is the fallback
/// account name and is always present.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirectoryEntry {
    pub id: UserId,
    #[serde(default)]
    pub preferred_name: Option<String>,
    pub login_name: String,
}

impl DirectoryEntry {
    /// Name shown to people: preferred alias if set, else login name
    pub fn display_name(&self) -> &str {
        self.preferred_name
            .as_deref()
            .filter(|n| !n.trim().is_empty())
            .unwrap_or(&self.login_name)
    }
}

/// Outcome of resolving a free-text resource name
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceRef {
    /// `None` means no catalog entry matched; the caller must offer creation
    pub id: Option<ResourceId>,
    pub canonical_name: String,
}

impl ResourceRef {
    pub fn is_resolved(&self) -> bool {
        self.id.is_some()
    }
}

/// Outcome of resolving a free-text participant name
///
/// An unresolved participant still occupies a slot in equal splits but
/// cannot be credited with a recorded share.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ParticipantRef {
    pub id: Option<UserId>,
    pub display_name: String,
}

impl ParticipantRef {
    pub fn is_resolved(&self) -> bool {
        self.id.is_some()
    }

    pub fn placeholder(name: impl Into<String>) -> Self {
        Self {
            id: None,
            display_name: name.into(),
        }
    }
}

/// Candidate participant in a group submission
pub type ParticipantCandidate = ParticipantRef;

/// Weight exactly as typed by a user: a fraction (0, 1] or a percent (1, 100]
///
/// A value of exactly 1.0 is read as a fraction (100%). That ambiguity is
/// kept for compatibility with existing submissions.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RawWeight(pub f64);

impl RawWeight {
    /// Interpret the raw value, returning `None` for non-positive or
    /// non-finite input.
    pub fn interpret(self) -> Option<Weight> {
        let v = self.0;
        if !v.is_finite() || v <= 0.0 {
            return None;
        }
        if v <= 1.0 {
            Some(Weight(v))
        } else if v <= 100.0 {
            Some(Weight(v / 100.0))
        } else {
            // Outside both units; the allocator normalizes relative weights anyway
            Some(Weight(v))
        }
    }
}

/// Positive, not necessarily normalized weight
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Weight(pub f64);

impl Weight {
    pub fn is_positive(self) -> bool {
        self.0.is_finite() && self.0 > 0.0
    }
}

/// Fraction of a whole, all fractions of one allocation summing to 1
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NormalizedWeight(pub f64);

/// Whole units awarded to one recipient
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Share(pub u64);

/// Free-text name → weight pairs, in submission order
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawShareInput {
    pub entries: Vec<(String, RawWeight)>,
}

impl RawShareInput {
    pub fn push(&mut self, name: impl Into<String>, weight: f64) {
        self.entries.push((name.into(), RawWeight(weight)));
    }
}

/// Collected-quantity row for one session
///
/// `logged_by` is `None` for group logs that were not attributed to a
/// single participant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct YieldRow {
    pub session_id: SessionId,
    pub resource_id: ResourceId,
    #[serde(default)]
    pub logged_by: Option<UserId>,
    pub quantity: u64,
}

/// Session membership row
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionMember {
    pub session_id: SessionId,
    pub user_id: UserId,
}

/// Per-session view built from a snapshot for one resource filter
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionAggregate {
    pub session_id: SessionId,
    pub resource_ids: Vec<ResourceId>,
    pub total_collected: u64,
    pub participant_ids: Vec<UserId>,
}

/// Read-only copy of the resource catalog
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CatalogSnapshot {
    pub entries: Vec<ResourceCatalogEntry>,
}

impl CatalogSnapshot {
    pub fn new(entries: Vec<ResourceCatalogEntry>) -> Self {
        Self { entries }
    }

    pub fn get(&self, id: ResourceId) -> Option<&ResourceCatalogEntry> {
        self.entries.iter().find(|e| e.id == id)
    }

    /// Exact, case-insensitive lookup by canonical name
    pub fn by_name(&self, name: &str) -> Option<&ResourceCatalogEntry> {
        let wanted = name.trim().to_lowercase();
        self.entries
            .iter()
            .find(|e| e.canonical_name.to_lowercase() == wanted)
    }
}

/// Read-only copy of the participant directory
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DirectorySnapshot {
    pub entries: Vec<DirectoryEntry>,
}

impl DirectorySnapshot {
    pub fn new(entries: Vec<DirectoryEntry>) -> Self {
        Self { entries }
    }

    pub fn get(&self, id: UserId) -> Option<&DirectoryEntry> {
        self.entries.iter().find(|e| e.id == id)
    }
}

/// Read-only copy of session membership and yield rows
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SessionSnapshot {
    pub members: Vec<SessionMember>,
    pub yields: Vec<YieldRow>,
}

impl SessionSnapshot {
    /// Registered participants of a session, in first-seen order, deduplicated
    pub fn participants_of(&self, session_id: SessionId) -> Vec<UserId> {
        let mut ids: Vec<UserId> = Vec::new();
        for m in self.members.iter().filter(|m| m.session_id == session_id) {
            if !ids.contains(&m.user_id) {
                ids.push(m.user_id);
            }
        }
        ids
    }
}
