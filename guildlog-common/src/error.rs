//! Common error types for guildlog
//!
//! Every engine error is recoverable at the call site: an unresolved name or
//! a rejected duplicate distribution is reported back to the caller, never
//! treated as a reason to abort the surrounding request.

use thiserror::Error;

/// Common result type for guildlog operations
pub type Result<T> = std::result::Result<T, Error>;

/// Which catalog an unresolved name was looked up in
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntityKind {
    Resource,
    Participant,
}

impl std::fmt::Display for EntityKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EntityKind::Resource => write!(f, "resource"),
            EntityKind::Participant => write!(f, "participant"),
        }
    }
}

/// Common error types across guildlog crates
#[derive(Error, Debug)]
pub enum Error {
    /// Allocation requested with no positive weight
    #[error("No recipients with a positive weight")]
    NoRecipients,

    /// Name could not be matched to a catalog or directory entry
    ///
    /// Callers surface this as "needs manual creation/resolution" and may
    /// retry once an admin adds the missing entry.
    #[error("Unresolved {kind}: '{name}' needs manual resolution")]
    UnresolvedEntity { kind: EntityKind, name: String },

    /// Conversion attempted with a missing or zero ratio
    #[error("Ambiguous recipe: {0}")]
    AmbiguousRecipe(String),

    /// A distribution for the same session set and output resource exists
    #[error("Distribution already recorded for {key}")]
    DuplicateDistribution { key: String },

    /// Database operation error (wraps sqlx::Error)
    #[cfg(feature = "sqlx")]
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// I/O operation error (wraps std::io::Error)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration loading or validation error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Invalid user input or request parameter
    #[error("Invalid input: {0}")]
    InvalidInput(String),
}

impl Error {
    /// True for errors the caller should report as "needs attention"
    /// rather than as a failure.
    pub fn needs_attention(&self) -> bool {
        matches!(
            self,
            Error::UnresolvedEntity { .. } | Error::DuplicateDistribution { .. }
        )
    }
}
