//! # Guildlog Common Library
//!
//! Fair-share allocation and entity resolution for the guild logistics
//! tracker:
//! - Name normalization, alias rules and fuzzy matching
//! - Largest-remainder allocation and aggregation strategies
//! - Refinery conversion and the guild tax overlay
//! - Distribution planning and the duplicate-distribution guard
//! - Configuration loading and the SQLite persistence boundary
//!
//! Everything outside `db` is pure: callers fetch snapshots first and pass
//! them in.

pub mod aggregation;
pub mod allocation;
pub mod config;
#[cfg(feature = "sqlx")]
pub mod db;
pub mod distribution;
pub mod error;
pub mod matcher;
pub mod models;
pub mod normalize;
pub mod quick_add;
pub mod refinery;
pub mod tax;

pub use aggregation::{aggregate, AggregateResult, ResourceFilter, Strategy};
pub use allocation::{allocate, allocate_raw_shares, Allocation, RawShareAllocation};
pub use config::TallyConfig;
pub use distribution::{
    plan_distribution, plan_group_submission, DistributionKey, DistributionPlan,
    DistributionRequest, EngineContext,
};
pub use error::{EntityKind, Error, Result};
pub use matcher::{resolve_participant, resolve_participants, resolve_resource, score_match, MatchScore};
pub use normalize::{canonicalize_resource_alias, normalize, AliasRules};
pub use quick_add::{parse_quick_add, plan_quick_add};
pub use refinery::{convert, ConversionRecipe, RecipeBook};
pub use tax::{apply_tax, TaxConfig};
