//! Signup → activation → paid conversion funnels.

use crate::{
    calendar::CalendarMonth,
    ledger::{ProductEvent, SubscriptionPeriod, User},
};
use chrono::{NaiveDateTime, NaiveTime, TimeDelta};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunnelRow {
    pub month:            CalendarMonth,
    pub signups:          usize,
    pub activations:      usize,
    pub paid_conversions: usize,
    pub activation_rate:  f64,
    pub conversion_rate:  f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunnelStage {
    pub stage:           String,
    pub count:           usize,
    /// Share of signups reaching this stage.
    pub conversion_rate: f64,
    /// Share of the previous stage lost before this one.
    pub drop_off_rate:   f64,
}

fn ratio(num: usize, den: usize) -> f64 {
    if den == 0 { 0.0 } else { num as f64 / den as f64 }
}

/// First product event per user.
pub fn first_event_by_user(events: &[ProductEvent]) -> HashMap<&str, NaiveDateTime> {
    let mut first: HashMap<&str, NaiveDateTime> = HashMap::new();
    for e in events {
        first
            .entry(e.user_id.as_str())
            .and_modify(|t| {
                if e.event_timestamp < *t {
                    *t = e.event_timestamp;
                }
            })
            .or_insert(e.event_timestamp);
    }
    first
}

fn paying_users(periods: &[SubscriptionPeriod]) -> HashSet<&str> {
    periods
        .iter()
        .filter(|p| p.is_billable() && p.amount > 0.0)
        .map(|p| p.user_id.as_str())
        .collect()
}

/// Per signup month: how many signed up, ever produced a product event,
/// and ever held a paid period.
pub fn monthly_funnel(
    users: &[User],
    events: &[ProductEvent],
    periods: &[SubscriptionPeriod],
    months: &[CalendarMonth],
) -> Vec<FunnelRow> {
    let first_event = first_event_by_user(events);
    let paying = paying_users(periods);

    months
        .iter()
        .map(|month| {
            let cohort: Vec<&User> = users
                .iter()
                .filter(|u| month.contains(u.signup_date))
                .collect();
            let signups = cohort.len();
            let activations = cohort
                .iter()
                .filter(|u| first_event.contains_key(u.user_id.as_str()))
                .count();
            let paid_conversions = cohort
                .iter()
                .filter(|u| paying.contains(u.user_id.as_str()))
                .count();
            FunnelRow {
                month: *month,
                signups,
                activations,
                paid_conversions,
                activation_rate: ratio(activations, signups),
                conversion_rate: ratio(paid_conversions, signups),
            }
        })
        .collect()
}

/// Users whose first product event falls within `activation_window_days` of
/// signup midnight. A window too large for `TimeDelta` has no upper bound.
pub fn activated_users<'a>(
    users: &'a [User],
    events: &[ProductEvent],
    activation_window_days: i64,
) -> HashSet<&'a str> {
    let first_event = first_event_by_user(events);
    let window = TimeDelta::try_days(activation_window_days);

    users
        .iter()
        .filter(|u| {
            first_event.get(u.user_id.as_str()).is_some_and(|t| {
                let since = *t - u.signup_date.and_time(NaiveTime::MIN);
                since >= TimeDelta::zero() && window.map_or(true, |w| since <= w)
            })
        })
        .map(|u| u.user_id.as_str())
        .collect()
}

/// Strict three-stage funnel over all users.
///
/// Activated means a first event within `activation_window_days` of signup.
/// Paid counts only activated users holding a paid period.
pub fn funnel_stages(
    users: &[User],
    events: &[ProductEvent],
    periods: &[SubscriptionPeriod],
    activation_window_days: i64,
) -> Vec<FunnelStage> {
    let paying = paying_users(periods);

    let signups = users.len();
    let activated = activated_users(users, events, activation_window_days);
    let paid = activated.iter().filter(|id| paying.contains(*id)).count();

    vec![
        FunnelStage {
            stage:           "signup".into(),
            count:           signups,
            conversion_rate: ratio(signups, signups),
            drop_off_rate:   0.0,
        },
        FunnelStage {
            stage:           "activation".into(),
            count:           activated.len(),
            conversion_rate: ratio(activated.len(), signups),
            drop_off_rate:   if signups == 0 { 0.0 } else { 1.0 - ratio(activated.len(), signups) },
        },
        FunnelStage {
            stage:           "paid".into(),
            count:           paid,
            conversion_rate: ratio(paid, signups),
            drop_off_rate:   if activated.is_empty() { 0.0 } else { 1.0 - ratio(paid, activated.len()) },
        },
    ]
}
