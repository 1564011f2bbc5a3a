//! Database row models

use serde::{Deserialize, Serialize};

/// Stored distribution header
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DistributionRecord {
    pub guid: String,
    pub dist_key: String,
    pub output_resource_id: i64,
    pub session_ids: String,
    pub total_distributed: i64,
    pub recorded_at: String,
}

/// Result of persisting a plan
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordedDistribution {
    pub guid: String,
    pub dist_key: String,
    /// An earlier distribution with the same key was overridden
    pub replaced: bool,
    pub lines_written: usize,
}
