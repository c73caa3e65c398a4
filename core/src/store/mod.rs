//! SQLite persistence layer.
//!
//! RULE: Only the store talks to the database.
//! Stages call store methods and never execute SQL directly.

use crate::{
    calendar::CalendarMonth,
    error::MetricsResult,
    event::EventLogEntry,
    ledger::TransactionType,
    mrr_bridge::BridgeBucket,
    segmentation::{JourneyStage, LifecycleSegment, RevenueTier},
};
use rusqlite::{
    params,
    types::{FromSql, FromSqlError, FromSqlResult, ToSqlOutput, ValueRef},
    Connection, OptionalExtension, ToSql,
};
use std::collections::BTreeMap;

mod derived;
mod ledger;
mod raw;
mod validation;

/// Every run-scoped table, in dependency order.
const RUN_TABLES: [&str; 24] = [
    "raw_user",
    "raw_subscription",
    "raw_event",
    "raw_ticket",
    "app_user",
    "subscription",
    "product_event",
    "support_ticket",
    "cleaning_log",
    "mrr_monthly",
    "mrr_user_bridge",
    "cohort_retention",
    "funnel_monthly",
    "funnel_stage",
    "kpi_monthly",
    "user_master",
    "churn_flag",
    "user_event_summary",
    "support_summary",
    "user_segment",
    "validation_check",
    "mrr_offender",
    "event_log",
    "snapshot",
];

pub struct MetricsStore {
    conn: Connection,
}

impl MetricsStore {
    pub fn open(path: &str) -> MetricsResult<Self> {
        let conn = Connection::open_with_flags(
            path,
            rusqlite::OpenFlags::SQLITE_OPEN_READ_WRITE
                | rusqlite::OpenFlags::SQLITE_OPEN_CREATE
                | rusqlite::OpenFlags::SQLITE_OPEN_URI,
        )?;
        // WAL mode only for real files (shared-memory and :memory: ignore it).
        let _ = conn.execute_batch("PRAGMA journal_mode=WAL;");
        conn.execute_batch("PRAGMA foreign_keys=ON;")?;
        Ok(Self { conn })
    }

    /// Open an in-memory database (used in tests).
    pub fn in_memory() -> MetricsResult<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch("PRAGMA foreign_keys=ON;")?;
        Ok(Self { conn })
    }

    /// Apply all schema migrations in order.
    pub fn migrate(&self) -> MetricsResult<()> {
        self.conn
            .execute_batch(include_str!("../../../migrations/001_foundation.sql"))?;
        self.conn
            .execute_batch(include_str!("../../../migrations/002_ledger.sql"))?;
        self.conn
            .execute_batch(include_str!("../../../migrations/003_derived.sql"))?;
        self.conn
            .execute_batch(include_str!("../../../migrations/004_segments.sql"))?;
        Ok(())
    }

    // ── Run ────────────────────────────────────────────────────

    pub fn insert_run(&self, run_id: &str, seed: u64, version: &str, source: &str) -> MetricsResult<()> {
        self.conn.execute(
            "INSERT INTO run (run_id, seed, version, source, started_at) VALUES (?1, ?2, ?3, ?4, ?5)",
            params![run_id, seed as i64, version, source, 0i64],
        )?;
        Ok(())
    }

    pub fn run_exists(&self, run_id: &str) -> MetricsResult<bool> {
        let found = self
            .conn
            .query_row("SELECT 1 FROM run WHERE run_id = ?1", params![run_id], |_| Ok(()))
            .optional()?;
        Ok(found.is_some())
    }

    /// Seed recorded for `run_id`, if the run exists.
    pub fn run_seed(&self, run_id: &str) -> MetricsResult<Option<u64>> {
        let seed = self
            .conn
            .query_row("SELECT seed FROM run WHERE run_id = ?1", params![run_id], |row| {
                row.get::<_, i64>(0)
            })
            .optional()?;
        Ok(seed.map(|s| s as u64))
    }

    /// Remove every row belonging to `run_id`, including the run record.
    pub fn delete_run(&self, run_id: &str) -> MetricsResult<()> {
        let tx = self.conn.unchecked_transaction()?;
        for table in RUN_TABLES.iter().rev() {
            tx.execute(&format!("DELETE FROM {table} WHERE run_id = ?1"), params![run_id])?;
        }
        tx.execute("DELETE FROM run WHERE run_id = ?1", params![run_id])?;
        tx.commit()?;
        Ok(())
    }

    /// Row count of every run-scoped table for `run_id`.
    pub fn row_counts(&self, run_id: &str) -> MetricsResult<BTreeMap<String, usize>> {
        let mut counts = BTreeMap::new();
        for table in RUN_TABLES {
            let n: i64 = self.conn.query_row(
                &format!("SELECT COUNT(*) FROM {table} WHERE run_id = ?1"),
                params![run_id],
                |row| row.get(0),
            )?;
            counts.insert(table.to_string(), n as usize);
        }
        Ok(counts)
    }

    // ── Event log ──────────────────────────────────────────────

    pub fn append_event(&self, entry: &EventLogEntry) -> MetricsResult<()> {
        self.conn.execute(
            "INSERT INTO event_log (run_id, stage_index, stage, event_type, payload)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                entry.run_id,
                entry.stage_index,
                entry.stage,
                entry.event_type,
                entry.payload,
            ],
        )?;
        Ok(())
    }

    pub fn events_for_run(&self, run_id: &str) -> MetricsResult<Vec<EventLogEntry>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, run_id, stage_index, stage, event_type, payload
             FROM event_log WHERE run_id = ?1
             ORDER BY id ASC",
        )?;
        let entries = stmt
            .query_map(params![run_id], |row| {
                Ok(EventLogEntry {
                    id:          Some(row.get(0)?),
                    run_id:      row.get(1)?,
                    stage_index: row.get(2)?,
                    stage:       row.get(3)?,
                    event_type:  row.get(4)?,
                    payload:     row.get(5)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(entries)
    }

    pub fn events_of_type(&self, run_id: &str, event_type: &str) -> MetricsResult<Vec<EventLogEntry>> {
        Ok(self
            .events_for_run(run_id)?
            .into_iter()
            .filter(|e| e.event_type == event_type)
            .collect())
    }

    // ── Snapshot ───────────────────────────────────────────────

    pub fn save_snapshot(&self, run_id: &str, stage_index: u32, state_json: &str) -> MetricsResult<()> {
        self.conn.execute(
            "INSERT INTO snapshot (run_id, stage_index, state_json) VALUES (?1, ?2, ?3)
             ON CONFLICT(run_id, stage_index) DO UPDATE SET state_json = excluded.state_json",
            params![run_id, stage_index, state_json],
        )?;
        Ok(())
    }

    pub fn latest_snapshot(&self, run_id: &str) -> MetricsResult<Option<(u32, String)>> {
        let result = self
            .conn
            .query_row(
                "SELECT stage_index, state_json FROM snapshot
                 WHERE run_id = ?1
                 ORDER BY stage_index DESC LIMIT 1",
                params![run_id],
                |row| Ok((row.get::<_, u32>(0)?, row.get::<_, String>(1)?)),
            )
            .optional()?;
        Ok(result)
    }
}

// ── Column conversions ─────────────────────────────────────────

impl ToSql for CalendarMonth {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::from(self.to_string()))
    }
}

impl FromSql for CalendarMonth {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        value
            .as_str()?
            .parse()
            .map_err(|e| FromSqlError::Other(Box::new(e)))
    }
}

impl ToSql for TransactionType {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::from(self.as_str()))
    }
}

impl FromSql for TransactionType {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        let raw = value.as_str()?;
        TransactionType::parse(raw)
            .ok_or_else(|| FromSqlError::Other(format!("unknown transaction type '{raw}'").into()))
    }
}

impl ToSql for BridgeBucket {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::from(self.as_str()))
    }
}

impl FromSql for BridgeBucket {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        let raw = value.as_str()?;
        BridgeBucket::parse(raw)
            .ok_or_else(|| FromSqlError::Other(format!("unknown bridge bucket '{raw}'").into()))
    }
}

impl ToSql for JourneyStage {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::from(self.as_str()))
    }
}

impl FromSql for JourneyStage {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        let raw = value.as_str()?;
        JourneyStage::parse(raw)
            .ok_or_else(|| FromSqlError::Other(format!("unknown journey stage '{raw}'").into()))
    }
}

impl ToSql for LifecycleSegment {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::from(self.as_str()))
    }
}

impl FromSql for LifecycleSegment {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        let raw = value.as_str()?;
        LifecycleSegment::parse(raw)
            .ok_or_else(|| FromSqlError::Other(format!("unknown lifecycle segment '{raw}'").into()))
    }
}

impl ToSql for RevenueTier {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::from(self.as_str()))
    }
}

impl FromSql for RevenueTier {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        let raw = value.as_str()?;
        RevenueTier::parse(raw)
            .ok_or_else(|| FromSqlError::Other(format!("unknown revenue tier '{raw}'").into()))
    }
}
