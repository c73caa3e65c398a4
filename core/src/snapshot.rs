//! Run snapshots: pipeline progress serialized to JSON.
//!
//! A snapshot is saved after every stage. It records which stages have
//! completed and the row count of every run-scoped table at that point.

use crate::types::RunId;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunSnapshot {
    pub run_id:           RunId,
    pub seed:             u64,
    /// Position of the last completed stage (1-based; 0 = nothing run).
    pub stage_index:      u32,
    pub completed_stages: Vec<String>,
    pub row_counts:       BTreeMap<String, usize>,
}

impl RunSnapshot {
    pub fn rows(&self, table: &str) -> usize {
        self.row_counts.get(table).copied().unwrap_or(0)
    }
}
