//! The pipeline event log.
//!
//! RULE: Stages report what they did ONLY through events and the store.
//! A stage never calls another stage's functions directly.

use crate::{calendar::CalendarMonth, types::RunId};
use serde::{Deserialize, Serialize};

/// Every event emitted during a run.
/// Variants are appended over time, never removed or reordered.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PipelineEvent {
    // ── Engine events ──────────────────────────────
    RunInitialized {
        run_id: RunId,
        seed: u64,
    },
    StageStarted {
        stage: String,
    },
    StageCompleted {
        stage: String,
    },

    // ── Source events ──────────────────────────────
    RawDataGenerated {
        users: usize,
        subscriptions: usize,
        events: usize,
        tickets: usize,
    },
    RawDataLoaded {
        source_dir: String,
        users: usize,
        subscriptions: usize,
        events: usize,
        tickets: usize,
    },

    // ── Cleaning events ────────────────────────────
    RowsRemoved {
        table: String,
        reason: String,
        count: usize,
    },
    PeriodsClosedAtChurn {
        count: usize,
    },
    DatasetCleaned {
        users: usize,
        subscriptions: usize,
        events: usize,
        tickets: usize,
    },

    // ── Derivation events ──────────────────────────
    MonthBridged {
        month: CalendarMonth,
        mrr_start: f64,
        mrr_end: f64,
        reconciliation_diff: f64,
    },
    ReconciliationAnomaly {
        month: CalendarMonth,
        reconciliation_diff: f64,
        tolerance: f64,
    },
    DerivedTablesBuilt {
        months: usize,
        bridge_lines: usize,
        cohort_rows: usize,
    },

    // ── Validation events ──────────────────────────
    ValidationCheckFailed {
        check: String,
        detail: String,
    },
    ValidationCompleted {
        checks: usize,
        failures: usize,
    },

    // ── Export events ──────────────────────────────
    TableExported {
        table: String,
        path: String,
        rows: usize,
    },
}

impl PipelineEvent {
    /// Stable name for the event_type column in event_log.
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::RunInitialized { .. }        => "run_initialized",
            Self::StageStarted { .. }          => "stage_started",
            Self::StageCompleted { .. }        => "stage_completed",
            Self::RawDataGenerated { .. }      => "raw_data_generated",
            Self::RawDataLoaded { .. }         => "raw_data_loaded",
            Self::RowsRemoved { .. }           => "rows_removed",
            Self::PeriodsClosedAtChurn { .. }  => "periods_closed_at_churn",
            Self::DatasetCleaned { .. }        => "dataset_cleaned",
            Self::MonthBridged { .. }          => "month_bridged",
            Self::ReconciliationAnomaly { .. } => "reconciliation_anomaly",
            Self::DerivedTablesBuilt { .. }    => "derived_tables_built",
            Self::ValidationCheckFailed { .. } => "validation_check_failed",
            Self::ValidationCompleted { .. }   => "validation_completed",
            Self::TableExported { .. }         => "table_exported",
        }
    }
}

/// The event log entry as persisted to SQLite.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventLogEntry {
    pub id: Option<i64>,
    pub run_id: RunId,
    /// Position of the emitting stage in execution order (0 = engine).
    pub stage_index: u32,
    pub stage: String,
    pub event_type: String,
    pub payload: String, // JSON-serialized PipelineEvent
}
