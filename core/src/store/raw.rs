use super::MetricsStore;
use crate::{
    error::MetricsResult,
    ledger::{RawDataset, RawEvent, RawSubscription, RawTicket, RawUser},
};
use rusqlite::params;

impl MetricsStore {
    // ── Raw ingest ─────────────────────────────────────────────

    /// Persist the raw tables exactly as ingested. Row order is preserved.
    pub fn insert_raw_dataset(&self, run_id: &str, raw: &RawDataset) -> MetricsResult<()> {
        let tx = self.conn.unchecked_transaction()?;
        {
            let mut stmt = tx.prepare_cached(
                "INSERT INTO raw_user (
                    run_id, row_no, user_id, company_id, signup_date, country,
                    acquisition_channel, initial_plan, job_role
                ) VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9)",
            )?;
            for (row_no, u) in raw.users.iter().enumerate() {
                stmt.execute(params![
                    run_id,
                    row_no as i64,
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
                "INSERT INTO raw_subscription (
                    run_id, row_no, subscription_id, user_id, plan_id, start_date,
                    end_date, amount, status, transaction_type
                ) VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10)",
            )?;
            for (row_no, s) in raw.subscriptions.iter().enumerate() {
                stmt.execute(params![
                    run_id,
                    row_no as i64,
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
                "INSERT INTO raw_event (
                    run_id, row_no, event_id, user_id, event_timestamp, event_type,
                    session_id, device
                ) VALUES (?1,?2,?3,?4,?5,?6,?7,?8)",
            )?;
            for (row_no, e) in raw.events.iter().enumerate() {
                stmt.execute(params![
                    run_id,
                    row_no as i64,
                    e.event_id,
                    e.user_id,
                    e.event_timestamp,
                    e.event_type,
                    e.session_id,
                    e.device,
                ])?;
            }

            let mut stmt = tx.prepare_cached(
                "INSERT INTO raw_ticket (
                    run_id, row_no, ticket_id, user_id, created_at, resolved_at,
                    ticket_category, nps_score, nps_comment
                ) VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9)",
            )?;
            for (row_no, t) in raw.tickets.iter().enumerate() {
                stmt.execute(params![
                    run_id,
                    row_no as i64,
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

    pub fn load_raw_dataset(&self, run_id: &str) -> MetricsResult<RawDataset> {
        let mut stmt = self.conn.prepare(
            "SELECT user_id, company_id, signup_date, country, acquisition_channel,
                    initial_plan, job_role
             FROM raw_user WHERE run_id = ?1 ORDER BY row_no",
        )?;
        let users = stmt
            .query_map(params![run_id], |row| {
                Ok(RawUser {
                    user_id:             row.get(0)?,
                    company_id:          row.get(1)?,
                    signup_date:         row.get(2)?,
                    country:             row.get(3)?,
                    acquisition_channel: row.get(4)?,
                    initial_plan:        row.get(5)?,
                    job_role:            row.get(6)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;

        let mut stmt = self.conn.prepare(
            "SELECT subscription_id, user_id, plan_id, start_date, end_date, amount,
                    status, transaction_type
             FROM raw_subscription WHERE run_id = ?1 ORDER BY row_no",
        )?;
        let subscriptions = stmt
            .query_map(params![run_id], |row| {
                Ok(RawSubscription {
                    subscription_id:  row.get(0)?,
                    user_id:          row.get(1)?,
                    plan_id:          row.get(2)?,
                    start_date:       row.get(3)?,
                    end_date:         row.get(4)?,
                    amount:           row.get(5)?,
                    status:           row.get(6)?,
                    transaction_type: row.get(7)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;

        let mut stmt = self.conn.prepare(
            "SELECT event_id, user_id, event_timestamp, event_type, session_id, device
             FROM raw_event WHERE run_id = ?1 ORDER BY row_no",
        )?;
        let events = stmt
            .query_map(params![run_id], |row| {
                Ok(RawEvent {
                    event_id:        row.get(0)?,
                    user_id:         row.get(1)?,
                    event_timestamp: row.get(2)?,
                    event_type:      row.get(3)?,
                    session_id:      row.get(4)?,
                    device:          row.get(5)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;

        let mut stmt = self.conn.prepare(
            "SELECT ticket_id, user_id, created_at, resolved_at, ticket_category,
                    nps_score, nps_comment
             FROM raw_ticket WHERE run_id = ?1 ORDER BY row_no",
        )?;
        let tickets = stmt
            .query_map(params![run_id], |row| {
                Ok(RawTicket {
                    ticket_id:       row.get(0)?,
                    user_id:         row.get(1)?,
                    created_at:      row.get(2)?,
                    resolved_at:     row.get(3)?,
                    ticket_category: row.get(4)?,
                    nps_score:       row.get(5)?,
                    nps_comment:     row.get(6)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(RawDataset {
            users,
            subscriptions,
            events,
            tickets,
        })
    }
}
