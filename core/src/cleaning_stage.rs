//! Cleaning stage: raw tables in, typed tables out.
//!
//! Every filtering step appends one `CleaningLogRow`, including steps that
//! removed nothing, so the log documents the full procedure for the run.
//! After filtering, churn markers close the periods they refer to.

use crate::{
    calendar::{parse_date, parse_timestamp},
    config::AnalysisWindow,
    error::MetricsResult,
    event::PipelineEvent,
    ledger::{
        apply_churn_markers, CleanDataset, ProductEvent, RawDataset, RawEvent, RawSubscription,
        RawTicket, RawUser, SubscriptionPeriod, SupportTicket, TransactionType, User,
    },
    rng::StageRng,
    stage::{PipelineStage, StageContext},
};
use chrono::{Days, NaiveTime};
use serde::{Deserialize, Serialize};
use std::{any::Any, collections::HashSet};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CleaningLogRow {
    pub table:            String,
    pub row_count_before: usize,
    pub row_count_after:  usize,
    pub rows_removed:     usize,
    pub reason_code:      String,
}

#[derive(Debug, Clone, Default)]
pub struct CleaningReport {
    pub dataset:        CleanDataset,
    pub log:            Vec<CleaningLogRow>,
    /// Billable periods whose end date a churn marker moved.
    pub periods_closed: usize,
}

pub struct CleaningStage;

impl CleaningStage {
    pub fn new() -> Self {
        Self
    }
}

impl Default for CleaningStage {
    fn default() -> Self {
        Self::new()
    }
}

impl PipelineStage for CleaningStage {
    fn name(&self) -> &'static str {
        "cleaning"
    }

    fn run(&mut self, ctx: &StageContext<'_>, _rng: &mut StageRng) -> MetricsResult<Vec<PipelineEvent>> {
        let raw = ctx.store.load_raw_dataset(ctx.run_id)?;
        let report = clean_dataset(&raw, &ctx.config.window);

        ctx.store.insert_clean_dataset(ctx.run_id, &report.dataset)?;
        ctx.store.insert_cleaning_log(ctx.run_id, &report.log)?;

        let mut events: Vec<PipelineEvent> = report
            .log
            .iter()
            .filter(|r| r.rows_removed > 0)
            .map(|r| PipelineEvent::RowsRemoved {
                table:  r.table.clone(),
                reason: r.reason_code.clone(),
                count:  r.rows_removed,
            })
            .collect();
        if report.periods_closed > 0 {
            events.push(PipelineEvent::PeriodsClosedAtChurn {
                count: report.periods_closed,
            });
        }

        let d = &report.dataset;
        log::info!(
            "cleaning: users={} subscriptions={} events={} tickets={} ({} periods closed at churn)",
            d.users.len(),
            d.subscriptions.len(),
            d.events.len(),
            d.tickets.len(),
            report.periods_closed,
        );
        events.push(PipelineEvent::DatasetCleaned {
            users:         d.users.len(),
            subscriptions: d.subscriptions.len(),
            events:        d.events.len(),
            tickets:       d.tickets.len(),
        });
        Ok(events)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

// ── Procedure ──────────────────────────────────────────────────

/// Records one filtering step of one table.
struct Tally<'a> {
    table: &'static str,
    log:   &'a mut Vec<CleaningLogRow>,
}

impl Tally<'_> {
    fn record(&mut self, reason: &str, before: usize, after: usize) {
        let removed = before - after;
        if removed > 0 {
            log::warn!("cleaning {}: dropped {removed} rows ({reason})", self.table);
        }
        self.log.push(CleaningLogRow {
            table:            self.table.to_string(),
            row_count_before: before,
            row_count_after:  after,
            rows_removed:     removed,
            reason_code:      reason.to_string(),
        });
    }

    fn retain<T>(&mut self, rows: &mut Vec<T>, reason: &str, keep: impl FnMut(&T) -> bool) {
        let before = rows.len();
        rows.retain(keep);
        self.record(reason, before, rows.len());
    }

    fn parse<R, T>(&mut self, rows: &[R], reason: &str, parse: impl Fn(&R) -> Option<T>) -> Vec<T> {
        let out: Vec<T> = rows.iter().filter_map(parse).collect();
        self.record(reason, rows.len(), out.len());
        out
    }
}

/// Run the full cleaning procedure over `raw`.
pub fn clean_dataset(raw: &RawDataset, window: &AnalysisWindow) -> CleaningReport {
    let mut log = Vec::new();

    let users = clean_users(&raw.users, &mut log);
    let known: HashSet<&str> = users.iter().map(|u| u.user_id.as_str()).collect();

    let mut subscriptions = clean_subscriptions(&raw.subscriptions, &known, &mut log);
    let events = clean_events(&raw.events, &known, window, &mut log);
    let tickets = clean_tickets(&raw.tickets, &known, &mut log);

    let periods_closed = apply_churn_markers(&mut subscriptions);

    CleaningReport {
        dataset: CleanDataset {
            users,
            subscriptions,
            events,
            tickets,
        },
        log,
        periods_closed,
    }
}

/// Trimmed, non-empty value.
fn present(raw: &Option<String>) -> Option<&str> {
    raw.as_deref().map(str::trim).filter(|s| !s.is_empty())
}

fn lower(raw: &Option<String>) -> String {
    present(raw).map(str::to_lowercase).unwrap_or_default()
}

/// `Ok(None)` for an empty value, `Err(())` for a value that does not parse.
fn optional<T>(raw: &Option<String>, parse: impl Fn(&str) -> Option<T>) -> Result<Option<T>, ()> {
    match present(raw) {
        None => Ok(None),
        Some(s) => parse(s).map(Some).ok_or(()),
    }
}

fn clean_users(raw: &[RawUser], log: &mut Vec<CleaningLogRow>) -> Vec<User> {
    let mut tally = Tally { table: "users", log };
    let mut users = tally.parse(raw, "missing_id_or_malformed_signup_date", |r: &RawUser| {
        Some(User {
            user_id:             present(&r.user_id)?.to_string(),
            company_id:          present(&r.company_id).map(str::to_string),
            signup_date:         parse_date(present(&r.signup_date)?)?,
            country:             lower(&r.country),
            acquisition_channel: lower(&r.acquisition_channel),
            initial_plan:        lower(&r.initial_plan),
            job_role:            lower(&r.job_role),
        })
    });
    let mut seen = HashSet::new();
    tally.retain(&mut users, "duplicate_user_id", |u| seen.insert(u.user_id.clone()));
    users
}

fn clean_subscriptions(
    raw: &[RawSubscription],
    known: &HashSet<&str>,
    log: &mut Vec<CleaningLogRow>,
) -> Vec<SubscriptionPeriod> {
    let mut tally = Tally { table: "subscriptions", log };

    let typed: Vec<RawSubscription> = tally.parse(raw, "unknown_transaction_type", |r: &RawSubscription| {
        present(&r.transaction_type)
            .and_then(TransactionType::parse)
            .map(|_| r.clone())
    });

    let mut periods = tally.parse(&typed, "missing_id_or_malformed_value", |r: &RawSubscription| {
        Some(SubscriptionPeriod {
            subscription_id:  present(&r.subscription_id)?.to_string(),
            user_id:          present(&r.user_id)?.to_string(),
            plan_id:          lower(&r.plan_id),
            start_date:       parse_date(present(&r.start_date)?)?,
            end_date:         optional(&r.end_date, parse_date).ok()?,
            amount:           present(&r.amount)?.parse::<f64>().ok().filter(|a| a.is_finite())?,
            status:           lower(&r.status),
            transaction_type: TransactionType::parse(present(&r.transaction_type)?)?,
        })
    });

    tally.retain(&mut periods, "missing_fk_user_id", |p| known.contains(p.user_id.as_str()));
    tally.retain(&mut periods, "negative_amount", |p| p.amount >= 0.0);
    tally.retain(&mut periods, "end_before_start", |p| {
        p.end_date.map_or(true, |end| end >= p.start_date)
    });
    let mut seen = HashSet::new();
    tally.retain(&mut periods, "duplicate_subscription_id", |p| {
        seen.insert(p.subscription_id.clone())
    });
    periods
}

fn clean_events(
    raw: &[RawEvent],
    known: &HashSet<&str>,
    window: &AnalysisWindow,
    log: &mut Vec<CleaningLogRow>,
) -> Vec<ProductEvent> {
    let mut tally = Tally { table: "events", log };
    let mut events = tally.parse(raw, "missing_id_or_malformed_timestamp", |r: &RawEvent| {
        Some(ProductEvent {
            event_id:        present(&r.event_id)?.to_string(),
            user_id:         present(&r.user_id)?.to_string(),
            event_timestamp: parse_timestamp(present(&r.event_timestamp)?)?,
            event_type:      lower(&r.event_type),
            session_id:      present(&r.session_id).map(str::to_string),
            device:          present(&r.device).map(str::to_lowercase),
        })
    });

    let from = window.first_day().and_time(NaiveTime::MIN);
    let until = (window.last_day() + Days::new(1)).and_time(NaiveTime::MIN);
    tally.retain(&mut events, "outside_window", |e| {
        e.event_timestamp >= from && e.event_timestamp < until
    });
    tally.retain(&mut events, "missing_fk_user_id", |e| known.contains(e.user_id.as_str()));
    let mut seen = HashSet::new();
    tally.retain(&mut events, "duplicate_event_id", |e| seen.insert(e.event_id.clone()));
    events
}

fn clean_tickets(
    raw: &[RawTicket],
    known: &HashSet<&str>,
    log: &mut Vec<CleaningLogRow>,
) -> Vec<SupportTicket> {
    let mut tally = Tally { table: "support_nps", log };
    let mut tickets = tally.parse(raw, "missing_id_or_malformed_timestamp", |r: &RawTicket| {
        Some(SupportTicket {
            ticket_id:       present(&r.ticket_id)?.to_string(),
            user_id:         present(&r.user_id)?.to_string(),
            created_at:      parse_timestamp(present(&r.created_at)?)?,
            // An unreadable resolution time is treated as unresolved.
            resolved_at:     optional(&r.resolved_at, parse_timestamp).unwrap_or(None),
            ticket_category: lower(&r.ticket_category),
            nps_score:       optional(&r.nps_score, parse_nps).unwrap_or(None),
            nps_comment:     present(&r.nps_comment).map(str::to_string),
        })
    });
    tally.retain(&mut tickets, "missing_fk_user_id", |t| known.contains(t.user_id.as_str()));
    let mut seen = HashSet::new();
    tally.retain(&mut tickets, "duplicate_ticket_id", |t| seen.insert(t.ticket_id.clone()));
    tickets
}

/// NPS is 0..=10. Exports sometimes carry it as a float (`9.0`).
fn parse_nps(raw: &str) -> Option<u8> {
    let score = raw.parse::<f64>().ok()?;
    (score.fract() == 0.0 && (0.0..=10.0).contains(&score)).then_some(score as u8)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nps_accepts_integral_floats_only() {
        assert_eq!(parse_nps("9"), Some(9));
        assert_eq!(parse_nps("9.0"), Some(9));
        assert_eq!(parse_nps("9.5"), None);
        assert_eq!(parse_nps("11"), None);
        assert_eq!(parse_nps("-1"), None);
    }

    #[test]
    fn optional_distinguishes_empty_from_malformed() {
        assert_eq!(optional(&None, parse_date), Ok(None));
        assert_eq!(optional(&Some("  ".into()), parse_date), Ok(None));
        assert!(optional(&Some("2024-02-30".into()), parse_date).is_err());
    }
}
