use super::MetricsStore;
use crate::{
    cleaning_stage::CleaningLogRow,
    error::MetricsResult,
    ledger::{CleanDataset, ProductEvent, SubscriptionPeriod, SupportTicket, User},
};
use rusqlite::params;

impl MetricsStore {
    // ── Cleaned entities ───────────────────────────────────────

    /// Persist the cleaned tables. Users go first so foreign keys resolve.
    pub fn insert_clean_dataset(&self, run_id: &str, data: &CleanDataset) -> MetricsResult<()> {
        let tx = self.conn.unchecked_transaction()?;
        {
            let mut stmt = tx.prepare_cached(
                "INSERT INTO app_user (
                    run_id, user_id, company_id, signup_date, country,
                    acquisition_channel, initial_plan, job_role
                ) VALUES (?1,?2,?3,?4,?5,?6,?7,?8)",
            )?;
            for u in &data.users {
                stmt.execute(params![
                    run_id,
                    u.user_id,
                    u.company_id,
                    u.signup_date,
                    u.country,
                    u.acquisition_channel,
                    u.initial_plan,
                    u.job_role,
                ])?;
            }

            let mut stmt = tx.prepare_cached(
                "INSERT INTO subscription (
                    run_id, subscription_id, user_id, plan_id, start_date, end_date,
                    amount, status, transaction_type
                ) VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9)",
            )?;
            for s in &data.subscriptions {
                stmt.execute(params![
                    run_id,
                    s.subscription_id,
                    s.user_id,
                    s.plan_id,
                    s.start_date,
                    s.end_date,
                    s.amount,
                    s.status,
                    s.transaction_type,
                ])?;
            }

            let mut stmt = tx.prepare_cached(
                "INSERT INTO product_event (
                    run_id, event_id, user_id, event_timestamp, event_type, session_id, device
                ) VALUES (?1,?2,?3,?4,?5,?6,?7)",
            )?;
            for e in &data.events {
                stmt.execute(params![
                    run_id,
                    e.event_id,
                    e.user_id,
                    e.event_timestamp,
                    e.event_type,
                    e.session_id,
                    e.device,
                ])?;
            }

            let mut stmt = tx.prepare_cached(
                "INSERT INTO support_ticket (
                    run_id, ticket_id, user_id, created_at, resolved_at,
                    ticket_category, nps_score, nps_comment
                ) VALUES (?1,?2,?3,?4,?5,?6,?7,?8)",
            )?;
            for t in &data.tickets {
                stmt.execute(params![
                    run_id,
                    t.ticket_id,
                    t.user_id,
                    t.created_at,
                    t.resolved_at,
                    t.ticket_category,
                    t.nps_score,
                    t.nps_comment,
                ])?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    /// The ledger is loaded once, fully materialized, in a stable order.
    pub fn load_clean_dataset(&self, run_id: &str) -> MetricsResult<CleanDataset> {
        Ok(CleanDataset {
            users:         self.load_users(run_id)?,
            subscriptions: self.load_subscriptions(run_id)?,
            events:        self.load_events(run_id)?,
            tickets:       self.load_tickets(run_id)?,
        })
    }

    pub fn load_users(&self, run_id: &str) -> MetricsResult<Vec<User>> {
        let mut stmt = self.conn.prepare(
            "SELECT user_id, company_id, signup_date, country, acquisition_channel,
                    initial_plan, job_role
             FROM app_user WHERE run_id = ?1 ORDER BY user_id",
        )?;
        let rows = stmt.query_map(params![run_id], |row| {
            Ok(User {
                user_id:             row.get(0)?,
                company_id:          row.get(1)?,
                signup_date:         row.get(2)?,
                country:             row.get(3)?,
                acquisition_channel: row.get(4)?,
                initial_plan:        row.get(5)?,
                job_role:            row.get(6)?,
            })
        })?;
        rows.collect::<Result<Vec<_>, _>>().map_err(Into::into)
    }

    pub fn load_subscriptions(&self, run_id: &str) -> MetricsResult<Vec<SubscriptionPeriod>> {
        let mut stmt = self.conn.prepare(
            "SELECT subscription_id, user_id, plan_id, start_date, end_date, amount,
                    status, transaction_type
             FROM subscription WHERE run_id = ?1
             ORDER BY user_id, start_date, subscription_id",
        )?;
        let rows = stmt.query_map(params![run_id], |row| {
            Ok(SubscriptionPeriod {
                subscription_id:  row.get(0)?,
                user_id:          row.get(1)?,
                plan_id:          row.get(2)?,
                start_date:       row.get(3)?,
                end_date:         row.get(4)?,
                amount:           row.get(5)?,
                status:           row.get(6)?,
                transaction_type: row.get(7)?,
            })
        })?;
        rows.collect::<Result<Vec<_>, _>>().map_err(Into::into)
    }

    pub fn load_events(&self, run_id: &str) -> MetricsResult<Vec<ProductEvent>> {
        let mut stmt = self.conn.prepare(
            "SELECT event_id, user_id, event_timestamp, event_type, session_id, device
             FROM product_event WHERE run_id = ?1
             ORDER BY user_id, event_timestamp, event_id",
        )?;
        let rows = stmt.query_map(params![run_id], |row| {
            Ok(ProductEvent {
                event_id:        row.get(0)?,
                user_id:         row.get(1)?,
                event_timestamp: row.get(2)?,
                event_type:      row.get(3)?,
                session_id:      row.get(4)?,
                device:          row.get(5)?,
            })
        })?;
        rows.collect::<Result<Vec<_>, _>>().map_err(Into::into)
    }

    pub fn load_tickets(&self, run_id: &str) -> MetricsResult<Vec<SupportTicket>> {
        let mut stmt = self.conn.prepare(
            "SELECT ticket_id, user_id, created_at, resolved_at, ticket_category,
                    nps_score, nps_comment
             FROM support_ticket WHERE run_id = ?1
             ORDER BY created_at, ticket_id",
        )?;
        let rows = stmt.query_map(params![run_id], |row| {
            Ok(SupportTicket {
                ticket_id:       row.get(0)?,
                user_id:         row.get(1)?,
                created_at:      row.get(2)?,
                resolved_at:     row.get(3)?,
                ticket_category: row.get(4)?,
                nps_score:       row.get(5)?,
                nps_comment:     row.get(6)?,
            })
        })?;
        rows.collect::<Result<Vec<_>, _>>().map_err(Into::into)
    }

    // ── Cleaning log ───────────────────────────────────────────

    pub fn insert_cleaning_log(&self, run_id: &str, rows: &[CleaningLogRow]) -> MetricsResult<()> {
        let tx = self.conn.unchecked_transaction()?;
        {
            let mut stmt = tx.prepare_cached(
                "INSERT INTO cleaning_log (
                    run_id, seq, table_name, row_count_before, row_count_after,
                    rows_removed, reason_code
                ) VALUES (?1,?2,?3,?4,?5,?6,?7)",
            )?;
            for (seq, r) in rows.iter().enumerate() {
                stmt.execute(params![
                    run_id,
                    seq as i64,
                    r.table,
                    r.row_count_before as i64,
                    r.row_count_after as i64,
                    r.rows_removed as i64,
                    r.reason_code,
                ])?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    pub fn cleaning_log(&self, run_id: &str) -> MetricsResult<Vec<CleaningLogRow>> {
        let mut stmt = self.conn.prepare(
            "SELECT table_name, row_count_before, row_count_after, rows_removed, reason_code
             FROM cleaning_log WHERE run_id = ?1 ORDER BY seq",
        )?;
        let rows = stmt.query_map(params![run_id], |row| {
            Ok(CleaningLogRow {
                table:            row.get(0)?,
                row_count_before: row.get::<_, i64>(1)? as usize,
                row_count_after:  row.get::<_, i64>(2)? as usize,
                rows_removed:     row.get::<_, i64>(3)? as usize,
                reason_code:      row.get(4)?,
            })
        })?;
        rows.collect::<Result<Vec<_>, _>>().map_err(Into::into)
    }
}
