//! Signup-month cohort retention.
//!
//! A user is retained in a month when at least one billable, positive-amount
//! period overlaps any day of that month. Same end-date semantics as the
//! bridge: the end date is the last active day.

use crate::{
    calendar::CalendarMonth,
    ledger::{SubscriptionPeriod, User},
    types::UserId,
};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CohortRetentionRow {
    pub cohort:         CalendarMonth,
    pub month:          CalendarMonth,
    pub month_offset:   i32,
    pub active_users:   usize,
    pub cohort_size:    usize,
    pub retention_rate: f64,
}

/// Whether `period` is active on any day of `month`.
pub fn is_active_during(period: &SubscriptionPeriod, month: CalendarMonth) -> bool {
    period.is_billable()
        && period.amount > 0.0
        && period.start_date <= month.last_day()
        && period.end_date.map_or(true, |end| end >= month.first_day())
}

/// Users with at least one period active during `month`.
pub fn active_users_during(periods: &[SubscriptionPeriod], month: CalendarMonth) -> HashSet<&str> {
    periods
        .iter()
        .filter(|p| is_active_during(p, month))
        .map(|p| p.user_id.as_str())
        .collect()
}

/// One row per (cohort, month) with a non-negative offset.
///
/// Cohorts come from the users table; periods whose user is unknown are
/// ignored. Rows are ordered by cohort, then month.
pub fn cohort_retention(
    users: &[User],
    periods: &[SubscriptionPeriod],
    months: &[CalendarMonth],
) -> Vec<CohortRetentionRow> {
    let mut cohorts: BTreeMap<CalendarMonth, Vec<&UserId>> = BTreeMap::new();
    for u in users {
        cohorts.entry(CalendarMonth::of(u.signup_date)).or_default().push(&u.user_id);
    }

    let active_by_month: Vec<(CalendarMonth, HashSet<&str>)> = months
        .iter()
        .map(|m| (*m, active_users_during(periods, *m)))
        .collect();

    let mut rows = Vec::new();
    for (cohort, members) in &cohorts {
        let cohort_size = members.len();
        for (month, active) in &active_by_month {
            let month_offset = month.months_since(*cohort);
            // A negative offset means activity before signup (dirty data).
            if month_offset < 0 {
                continue;
            }
            let active_users = members.iter().filter(|id| active.contains(id.as_str())).count();
            rows.push(CohortRetentionRow {
                cohort: *cohort,
                month: *month,
                month_offset,
                active_users,
                cohort_size,
                retention_rate: active_users as f64 / cohort_size as f64,
            });
        }
    }
    rows
}

/// Mean retention per month offset across cohorts, ascending by offset.
pub fn average_retention_by_offset(rows: &[CohortRetentionRow]) -> Vec<(i32, f64)> {
    let mut acc: BTreeMap<i32, (f64, usize)> = BTreeMap::new();
    for r in rows {
        let e = acc.entry(r.month_offset).or_insert((0.0, 0));
        e.0 += r.retention_rate;
        e.1 += 1;
    }
    acc.into_iter()
        .map(|(offset, (sum, n))| (offset, sum / n as f64))
        .collect()
}
