use super::MetricsStore;
use crate::{
    error::MetricsResult,
    validation_stage::{MrrOffender, ValidationCheck},
};
use rusqlite::params;

impl MetricsStore {
    // ── Validation results ─────────────────────────────────────

    pub fn insert_validation_checks(&self, run_id: &str, checks: &[ValidationCheck]) -> MetricsResult<()> {
        let tx = self.conn.unchecked_transaction()?;
        {
            let mut stmt = tx.prepare_cached(
                "INSERT INTO validation_check (run_id, seq, name, passed, detail)
                 VALUES (?1,?2,?3,?4,?5)",
            )?;
            for (seq, c) in checks.iter().enumerate() {
                stmt.execute(params![run_id, seq as i64, c.name, c.passed, c.detail])?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    pub fn validation_checks(&self, run_id: &str) -> MetricsResult<Vec<ValidationCheck>> {
        let mut stmt = self.conn.prepare(
            "SELECT name, passed, detail FROM validation_check
             WHERE run_id = ?1 ORDER BY seq",
        )?;
        let rows = stmt.query_map(params![run_id], |row| {
            Ok(ValidationCheck {
                name:   row.get(0)?,
                passed: row.get(1)?,
                detail: row.get(2)?,
            })
        })?;
        rows.collect::<Result<Vec<_>, _>>().map_err(Into::into)
    }

    pub fn insert_mrr_offenders(&self, run_id: &str, offenders: &[MrrOffender]) -> MetricsResult<()> {
        let tx = self.conn.unchecked_transaction()?;
        {
            let mut stmt = tx.prepare_cached(
                "INSERT INTO mrr_offender (run_id, month, diff, reason) VALUES (?1,?2,?3,?4)",
            )?;
            for o in offenders {
                stmt.execute(params![run_id, o.month, o.diff, o.reason])?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    pub fn mrr_offenders(&self, run_id: &str) -> MetricsResult<Vec<MrrOffender>> {
        let mut stmt = self.conn.prepare(
            "SELECT month, diff, reason FROM mrr_offender
             WHERE run_id = ?1 ORDER BY month, rowid",
        )?;
        let rows = stmt.query_map(params![run_id], |row| {
            Ok(MrrOffender {
                month:  row.get(0)?,
                diff:   row.get(1)?,
                reason: row.get(2)?,
            })
        })?;
        rows.collect::<Result<Vec<_>, _>>().map_err(Into::into)
    }
}
