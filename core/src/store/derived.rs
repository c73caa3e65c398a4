use super::MetricsStore;
use crate::{
    cohort::CohortRetentionRow,
    error::MetricsResult,
    funnel::{FunnelRow, FunnelStage},
    kpi::MonthlyKpi,
    mrr_bridge::{MonthlySnapshot, UserBridgeLine},
    segmentation::UserSegmentRow,
    user_tables::{ChurnFlagRow, SupportSummaryRow, UserEventSummaryRow, UserMasterRow},
};
use rusqlite::params;

impl MetricsStore {
    // ── Revenue bridge ─────────────────────────────────────────

    pub fn insert_monthly_snapshots(&self, run_id: &str, snapshots: &[MonthlySnapshot]) -> MetricsResult<()> {
        let tx = self.conn.unchecked_transaction()?;
        {
            let mut stmt = tx.prepare_cached(
                "INSERT INTO mrr_monthly (
                    run_id, month, mrr_start, mrr_end, new_mrr, expansion_mrr,
                    contraction_mrr, churned_mrr, active_paid_users, arpu,
                    reconciliation_diff, reconciled
                ) VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10,?11,?12)",
            )?;
            for s in snapshots {
                stmt.execute(params![
                    run_id,
                    s.month,
                    s.mrr_start,
                    s.mrr_end,
                    s.new_mrr,
                    s.expansion_mrr,
                    s.contraction_mrr,
                    s.churned_mrr,
                    s.active_paid_users as i64,
                    s.arpu,
                    s.reconciliation_diff,
                    s.reconciled,
                ])?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    pub fn monthly_snapshots(&self, run_id: &str) -> MetricsResult<Vec<MonthlySnapshot>> {
        let mut stmt = self.conn.prepare(
            "SELECT month, mrr_start, mrr_end, new_mrr, expansion_mrr, contraction_mrr,
                    churned_mrr, active_paid_users, arpu, reconciliation_diff, reconciled
             FROM mrr_monthly WHERE run_id = ?1 ORDER BY month",
        )?;
        let rows = stmt.query_map(params![run_id], |row| {
            Ok(MonthlySnapshot {
                month:               row.get(0)?,
                mrr_start:           row.get(1)?,
                mrr_end:             row.get(2)?,
                new_mrr:             row.get(3)?,
                expansion_mrr:       row.get(4)?,
                contraction_mrr:     row.get(5)?,
                churned_mrr:         row.get(6)?,
                active_paid_users:   row.get::<_, i64>(7)? as usize,
                arpu:                row.get(8)?,
                reconciliation_diff: row.get(9)?,
                reconciled:          row.get(10)?,
            })
        })?;
        rows.collect::<Result<Vec<_>, _>>().map_err(Into::into)
    }

    pub fn insert_bridge_lines(&self, run_id: &str, lines: &[UserBridgeLine]) -> MetricsResult<()> {
        let tx = self.conn.unchecked_transaction()?;
        {
            let mut stmt = tx.prepare_cached(
                "INSERT INTO mrr_user_bridge (
                    run_id, month, user_id, previous_mrr, current_mrr, delta, bucket
                ) VALUES (?1,?2,?3,?4,?5,?6,?7)",
            )?;
            for l in lines {
                stmt.execute(params![
                    run_id,
                    l.month,
                    l.user_id,
                    l.previous_mrr,
                    l.current_mrr,
                    l.delta,
                    l.bucket,
                ])?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    pub fn bridge_lines(&self, run_id: &str) -> MetricsResult<Vec<UserBridgeLine>> {
        let mut stmt = self.conn.prepare(
            "SELECT month, user_id, previous_mrr, current_mrr, delta, bucket
             FROM mrr_user_bridge WHERE run_id = ?1 ORDER BY month, user_id",
        )?;
        let rows = stmt.query_map(params![run_id], |row| {
            Ok(UserBridgeLine {
                month:        row.get(0)?,
                user_id:      row.get(1)?,
                previous_mrr: row.get(2)?,
                current_mrr:  row.get(3)?,
                delta:        row.get(4)?,
                bucket:       row.get(5)?,
            })
        })?;
        rows.collect::<Result<Vec<_>, _>>().map_err(Into::into)
    }

    // ── Cohorts and funnels ────────────────────────────────────

    pub fn insert_cohort_rows(&self, run_id: &str, rows: &[CohortRetentionRow]) -> MetricsResult<()> {
        let tx = self.conn.unchecked_transaction()?;
        {
            let mut stmt = tx.prepare_cached(
                "INSERT INTO cohort_retention (
                    run_id, cohort, month, month_offset, active_users, cohort_size, retention_rate
                ) VALUES (?1,?2,?3,?4,?5,?6,?7)",
            )?;
            for r in rows {
                stmt.execute(params![
                    run_id,
                    r.cohort,
                    r.month,
                    r.month_offset,
                    r.active_users as i64,
                    r.cohort_size as i64,
                    r.retention_rate,
                ])?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    pub fn cohort_rows(&self, run_id: &str) -> MetricsResult<Vec<CohortRetentionRow>> {
        let mut stmt = self.conn.prepare(
            "SELECT cohort, month, month_offset, active_users, cohort_size, retention_rate
             FROM cohort_retention WHERE run_id = ?1 ORDER BY cohort, month",
        )?;
        let rows = stmt.query_map(params![run_id], |row| {
            Ok(CohortRetentionRow {
                cohort:         row.get(0)?,
                month:          row.get(1)?,
                month_offset:   row.get(2)?,
                active_users:   row.get::<_, i64>(3)? as usize,
                cohort_size:    row.get::<_, i64>(4)? as usize,
                retention_rate: row.get(5)?,
            })
        })?;
        rows.collect::<Result<Vec<_>, _>>().map_err(Into::into)
    }

    pub fn insert_funnel_rows(&self, run_id: &str, rows: &[FunnelRow]) -> MetricsResult<()> {
        let tx = self.conn.unchecked_transaction()?;
        {
            let mut stmt = tx.prepare_cached(
                "INSERT INTO funnel_monthly (
                    run_id, month, signups, activations, paid_conversions,
                    activation_rate, conversion_rate
                ) VALUES (?1,?2,?3,?4,?5,?6,?7)",
            )?;
            for r in rows {
                stmt.execute(params![
                    run_id,
                    r.month,
                    r.signups as i64,
                    r.activations as i64,
                    r.paid_conversions as i64,
                    r.activation_rate,
                    r.conversion_rate,
                ])?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    pub fn funnel_rows(&self, run_id: &str) -> MetricsResult<Vec<FunnelRow>> {
        let mut stmt = self.conn.prepare(
            "SELECT month, signups, activations, paid_conversions, activation_rate, conversion_rate
             FROM funnel_monthly WHERE run_id = ?1 ORDER BY month",
        )?;
        let rows = stmt.query_map(params![run_id], |row| {
            Ok(FunnelRow {
                month:            row.get(0)?,
                signups:          row.get::<_, i64>(1)? as usize,
                activations:      row.get::<_, i64>(2)? as usize,
                paid_conversions: row.get::<_, i64>(3)? as usize,
                activation_rate:  row.get(4)?,
                conversion_rate:  row.get(5)?,
            })
        })?;
        rows.collect::<Result<Vec<_>, _>>().map_err(Into::into)
    }

    pub fn insert_funnel_stages(&self, run_id: &str, stages: &[FunnelStage]) -> MetricsResult<()> {
        let tx = self.conn.unchecked_transaction()?;
        {
            let mut stmt = tx.prepare_cached(
                "INSERT INTO funnel_stage (
                    run_id, position, stage, count, conversion_rate, drop_off_rate
                ) VALUES (?1,?2,?3,?4,?5,?6)",
            )?;
            for (position, s) in stages.iter().enumerate() {
                stmt.execute(params![
                    run_id,
                    position as i64,
                    s.stage,
                    s.count as i64,
                    s.conversion_rate,
                    s.drop_off_rate,
                ])?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    pub fn funnel_stages(&self, run_id: &str) -> MetricsResult<Vec<FunnelStage>> {
        let mut stmt = self.conn.prepare(
            "SELECT stage, count, conversion_rate, drop_off_rate
             FROM funnel_stage WHERE run_id = ?1 ORDER BY position",
        )?;
        let rows = stmt.query_map(params![run_id], |row| {
            Ok(FunnelStage {
                stage:           row.get(0)?,
                count:           row.get::<_, i64>(1)? as usize,
                conversion_rate: row.get(2)?,
                drop_off_rate:   row.get(3)?,
            })
        })?;
        rows.collect::<Result<Vec<_>, _>>().map_err(Into::into)
    }

    // ── KPIs ───────────────────────────────────────────────────

    pub fn insert_kpis(&self, run_id: &str, kpis: &[MonthlyKpi]) -> MetricsResult<()> {
        let tx = self.conn.unchecked_transaction()?;
        {
            let mut stmt = tx.prepare_cached(
                "INSERT INTO kpi_monthly (
                    run_id, month, mrr, arr, arpu, active_paid_users, mrr_churn_rate,
                    net_revenue_retention, gross_revenue_retention, quick_ratio,
                    logo_churn_rate, customer_lifetime_months, ltv
                ) VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10,?11,?12,?13)",
            )?;
            for k in kpis {
                stmt.execute(params![
                    run_id,
                    k.month,
                    k.mrr,
                    k.arr,
                    k.arpu,
                    k.active_paid_users as i64,
                    k.mrr_churn_rate,
                    k.net_revenue_retention,
                    k.gross_revenue_retention,
                    k.quick_ratio,
                    k.logo_churn_rate,
                    k.customer_lifetime_months,
                    k.ltv,
                ])?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    pub fn kpis(&self, run_id: &str) -> MetricsResult<Vec<MonthlyKpi>> {
        let mut stmt = self.conn.prepare(
            "SELECT month, mrr, arr, arpu, active_paid_users, mrr_churn_rate,
                    net_revenue_retention, gross_revenue_retention, quick_ratio,
                    logo_churn_rate, customer_lifetime_months, ltv
             FROM kpi_monthly WHERE run_id = ?1 ORDER BY month",
        )?;
        let rows = stmt.query_map(params![run_id], |row| {
            Ok(MonthlyKpi {
                month:                    row.get(0)?,
                mrr:                      row.get(1)?,
                arr:                      row.get(2)?,
                arpu:                     row.get(3)?,
                active_paid_users:        row.get::<_, i64>(4)? as usize,
                mrr_churn_rate:           row.get(5)?,
                net_revenue_retention:    row.get(6)?,
                gross_revenue_retention:  row.get(7)?,
                quick_ratio:              row.get(8)?,
                logo_churn_rate:          row.get(9)?,
                customer_lifetime_months: row.get(10)?,
                ltv:                      row.get(11)?,
            })
        })?;
        rows.collect::<Result<Vec<_>, _>>().map_err(Into::into)
    }

    // ── User tables ────────────────────────────────────────────

    pub fn insert_user_master(&self, run_id: &str, rows: &[UserMasterRow]) -> MetricsResult<()> {
        let tx = self.conn.unchecked_transaction()?;
        {
            let mut stmt = tx.prepare_cached(
                "INSERT INTO user_master (
                    run_id, user_id, signup_date, cohort_month, country, acquisition_channel,
                    current_status, current_plan, first_event_at, churn_date, is_churned,
                    lifetime_days
                ) VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10,?11,?12)",
            )?;
            for r in rows {
                stmt.execute(params![
                    run_id,
                    r.user_id,
                    r.signup_date,
                    r.cohort_month,
                    r.country,
                    r.acquisition_channel,
                    r.current_status,
                    r.current_plan,
                    r.first_event_at,
                    r.churn_date,
                    r.is_churned,
                    r.lifetime_days,
                ])?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    pub fn user_master(&self, run_id: &str) -> MetricsResult<Vec<UserMasterRow>> {
        let mut stmt = self.conn.prepare(
            "SELECT user_id, signup_date, cohort_month, country, acquisition_channel,
                    current_status, current_plan, first_event_at, churn_date, is_churned,
                    lifetime_days
             FROM user_master WHERE run_id = ?1 ORDER BY user_id",
        )?;
        let rows = stmt.query_map(params![run_id], |row| {
            Ok(UserMasterRow {
                user_id:             row.get(0)?,
                signup_date:         row.get(1)?,
                cohort_month:        row.get(2)?,
                country:             row.get(3)?,
                acquisition_channel: row.get(4)?,
                current_status:      row.get(5)?,
                current_plan:        row.get(6)?,
                first_event_at:      row.get(7)?,
                churn_date:          row.get(8)?,
                is_churned:          row.get(9)?,
                lifetime_days:       row.get(10)?,
            })
        })?;
        rows.collect::<Result<Vec<_>, _>>().map_err(Into::into)
    }

    pub fn insert_churn_flags(&self, run_id: &str, rows: &[ChurnFlagRow]) -> MetricsResult<()> {
        let tx = self.conn.unchecked_transaction()?;
        {
            let mut stmt = tx.prepare_cached(
                "INSERT INTO churn_flag (run_id, user_id, churn_date, churn_flag)
                 VALUES (?1,?2,?3,?4)",
            )?;
            for r in rows {
                stmt.execute(params![run_id, r.user_id, r.churn_date, r.churn_flag])?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    pub fn churn_flags(&self, run_id: &str) -> MetricsResult<Vec<ChurnFlagRow>> {
        let mut stmt = self.conn.prepare(
            "SELECT user_id, churn_date, churn_flag
             FROM churn_flag WHERE run_id = ?1 ORDER BY user_id",
        )?;
        let rows = stmt.query_map(params![run_id], |row| {
            Ok(ChurnFlagRow {
                user_id:    row.get(0)?,
                churn_date: row.get(1)?,
                churn_flag: row.get(2)?,
            })
        })?;
        rows.collect::<Result<Vec<_>, _>>().map_err(Into::into)
    }

    pub fn insert_event_summary(&self, run_id: &str, rows: &[UserEventSummaryRow]) -> MetricsResult<()> {
        let tx = self.conn.unchecked_transaction()?;
        {
            let mut stmt = tx.prepare_cached(
                "INSERT INTO user_event_summary (
                    run_id, user_id, total_events, first_event_at, last_event_at
                ) VALUES (?1,?2,?3,?4,?5)",
            )?;
            for r in rows {
                stmt.execute(params![
                    run_id,
                    r.user_id,
                    r.total_events as i64,
                    r.first_event_at,
                    r.last_event_at,
                ])?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    pub fn event_summary(&self, run_id: &str) -> MetricsResult<Vec<UserEventSummaryRow>> {
        let mut stmt = self.conn.prepare(
            "SELECT user_id, total_events, first_event_at, last_event_at
             FROM user_event_summary WHERE run_id = ?1 ORDER BY user_id",
        )?;
        let rows = stmt.query_map(params![run_id], |row| {
            Ok(UserEventSummaryRow {
                user_id:        row.get(0)?,
                total_events:   row.get::<_, i64>(1)? as usize,
                first_event_at: row.get(2)?,
                last_event_at:  row.get(3)?,
            })
        })?;
        rows.collect::<Result<Vec<_>, _>>().map_err(Into::into)
    }

    pub fn insert_support_summary(&self, run_id: &str, rows: &[SupportSummaryRow]) -> MetricsResult<()> {
        let tx = self.conn.unchecked_transaction()?;
        {
            let mut stmt = tx.prepare_cached(
                "INSERT INTO support_summary (
                    run_id, month, tickets_opened, tickets_resolved, avg_nps
                ) VALUES (?1,?2,?3,?4,?5)",
            )?;
            for r in rows {
                stmt.execute(params![
                    run_id,
                    r.month,
                    r.tickets_opened as i64,
                    r.tickets_resolved as i64,
                    r.avg_nps,
                ])?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    pub fn support_summary(&self, run_id: &str) -> MetricsResult<Vec<SupportSummaryRow>> {
        let mut stmt = self.conn.prepare(
            "SELECT month, tickets_opened, tickets_resolved, avg_nps
             FROM support_summary WHERE run_id = ?1 ORDER BY month",
        )?;
        let rows = stmt.query_map(params![run_id], |row| {
            Ok(SupportSummaryRow {
                month:            row.get(0)?,
                tickets_opened:   row.get::<_, i64>(1)? as usize,
                tickets_resolved: row.get::<_, i64>(2)? as usize,
                avg_nps:          row.get(3)?,
            })
        })?;
        rows.collect::<Result<Vec<_>, _>>().map_err(Into::into)
    }

    // ── Segments ───────────────────────────────────────────────

    pub fn insert_user_segments(&self, run_id: &str, rows: &[UserSegmentRow]) -> MetricsResult<()> {
        let tx = self.conn.unchecked_transaction()?;
        {
            let mut stmt = tx.prepare_cached(
                "INSERT INTO user_segment (
                    run_id, user_id, journey_stage, lifecycle_segment, revenue_tier, final_bucket,
                    lifetime_revenue, is_activated, has_active_subscription, days_since_signup,
                    days_since_last_seen
                ) VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10,?11)",
            )?;
            for r in rows {
                stmt.execute(params![
                    run_id,
                    r.user_id,
                    r.journey_stage,
                    r.lifecycle_segment,
                    r.revenue_tier,
                    r.final_bucket,
                    r.lifetime_revenue,
                    r.is_activated,
                    r.has_active_subscription,
                    r.days_since_signup,
                    r.days_since_last_seen,
                ])?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    pub fn user_segments(&self, run_id: &str) -> MetricsResult<Vec<UserSegmentRow>> {
        let mut stmt = self.conn.prepare(
            "SELECT user_id, journey_stage, lifecycle_segment, revenue_tier, final_bucket,
                    lifetime_revenue, is_activated, has_active_subscription, days_since_signup,
                    days_since_last_seen
             FROM user_segment WHERE run_id = ?1 ORDER BY user_id",
        )?;
        let rows = stmt.query_map(params![run_id], |row| {
            Ok(UserSegmentRow {
                user_id:                 row.get(0)?,
                journey_stage:           row.get(1)?,
                lifecycle_segment:       row.get(2)?,
                revenue_tier:            row.get(3)?,
                final_bucket:            row.get(4)?,
                lifetime_revenue:        row.get(5)?,
                is_activated:            row.get(6)?,
                has_active_subscription: row.get(7)?,
                days_since_signup:       row.get(8)?,
                days_since_last_seen:    row.get(9)?,
            })
        })?;
        rows.collect::<Result<Vec<_>, _>>().map_err(Into::into)
    }
}
