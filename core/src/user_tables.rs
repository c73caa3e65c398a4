//! Per-user and per-month summary tables: user master, churn flags,
//! event activity and support load.

use crate::{
    calendar::CalendarMonth,
    ledger::{ProductEvent, SubscriptionPeriod, SupportTicket, User},
    types::UserId,
};
use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserMasterRow {
    pub user_id:             UserId,
    pub signup_date:         NaiveDate,
    pub cohort_month:        CalendarMonth,
    pub country:             String,
    pub acquisition_channel: String,
    pub current_status:      Option<String>,
    pub current_plan:        Option<String>,
    pub first_event_at:      Option<NaiveDateTime>,
    pub churn_date:          Option<NaiveDate>,
    pub is_churned:          bool,
    pub lifetime_days:       i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChurnFlagRow {
    pub user_id:    UserId,
    pub churn_date: NaiveDate,
    pub churn_flag: u8,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserEventSummaryRow {
    pub user_id:        UserId,
    pub total_events:   usize,
    pub first_event_at: NaiveDateTime,
    pub last_event_at:  NaiveDateTime,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SupportSummaryRow {
    pub month:            CalendarMonth,
    pub tickets_opened:   usize,
    pub tickets_resolved: usize,
    pub avg_nps:          Option<f64>,
}

/// One row per user. Lifetime runs from signup to the churn date, or to
/// `as_of` for users still active.
pub fn user_master(
    users: &[User],
    periods: &[SubscriptionPeriod],
    events: &[ProductEvent],
    as_of: NaiveDate,
) -> Vec<UserMasterRow> {
    // Latest period by start date (ledger order breaks ties).
    let mut latest: HashMap<&str, &SubscriptionPeriod> = HashMap::new();
    for p in periods {
        match latest.get(p.user_id.as_str()) {
            Some(cur) if cur.start_date > p.start_date => {}
            _ => {
                latest.insert(p.user_id.as_str(), p);
            }
        }
    }

    let mut churn_dates: HashMap<&str, NaiveDate> = HashMap::new();
    for p in periods.iter().filter(|p| !p.is_billable()) {
        churn_dates
            .entry(p.user_id.as_str())
            .and_modify(|d| *d = (*d).max(p.start_date))
            .or_insert(p.start_date);
    }

    let first_events = crate::funnel::first_event_by_user(events);

    users
        .iter()
        .map(|u| {
            let id = u.user_id.as_str();
            let current = latest.get(id);
            let churn_date = churn_dates.get(id).copied();
            let lifetime_end = churn_date.unwrap_or(as_of);
            UserMasterRow {
                user_id:             u.user_id.clone(),
                signup_date:         u.signup_date,
                cohort_month:        CalendarMonth::of(u.signup_date),
                country:             u.country.clone(),
                acquisition_channel: u.acquisition_channel.clone(),
                current_status:      current.map(|p| p.status.clone()),
                current_plan:        current.map(|p| p.plan_id.clone()),
                first_event_at:      first_events.get(id).copied(),
                churn_date,
                is_churned:          churn_date.is_some(),
                lifetime_days:       (lifetime_end - u.signup_date).num_days(),
            }
        })
        .collect()
}

pub fn churn_flags(master: &[UserMasterRow]) -> Vec<ChurnFlagRow> {
    master
        .iter()
        .filter_map(|m| {
            m.churn_date.map(|churn_date| ChurnFlagRow {
                user_id: m.user_id.clone(),
                churn_date,
                churn_flag: 1,
            })
        })
        .collect()
}

/// Event counts and first/last activity per user, ordered by user id.
pub fn user_event_summary(events: &[ProductEvent]) -> Vec<UserEventSummaryRow> {
    let mut acc: BTreeMap<&str, UserEventSummaryRow> = BTreeMap::new();
    for e in events {
        acc.entry(e.user_id.as_str())
            .and_modify(|row| {
                row.total_events += 1;
                row.first_event_at = row.first_event_at.min(e.event_timestamp);
                row.last_event_at = row.last_event_at.max(e.event_timestamp);
            })
            .or_insert_with(|| UserEventSummaryRow {
                user_id:        e.user_id.clone(),
                total_events:   1,
                first_event_at: e.event_timestamp,
                last_event_at:  e.event_timestamp,
            });
    }
    acc.into_values().collect()
}

/// Tickets opened per creation month with the mean NPS of scored tickets.
pub fn support_summary(tickets: &[SupportTicket]) -> Vec<SupportSummaryRow> {
    let mut acc: BTreeMap<CalendarMonth, (usize, usize, f64, usize)> = BTreeMap::new();
    for t in tickets {
        let e = acc
            .entry(CalendarMonth::of(t.created_at.date()))
            .or_insert((0, 0, 0.0, 0));
        e.0 += 1;
        if t.resolved_at.is_some() {
            e.1 += 1;
        }
        if let Some(score) = t.nps_score {
            e.2 += f64::from(score);
            e.3 += 1;
        }
    }
    acc.into_iter()
        .map(|(month, (opened, resolved, nps_sum, nps_n))| SupportSummaryRow {
            month,
            tickets_opened: opened,
            tickets_resolved: resolved,
            avg_nps: if nps_n > 0 { Some(nps_sum / nps_n as f64) } else { None },
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::TransactionType;

    fn date(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    fn period(id: &str, start: &str, tx: TransactionType, plan: &str) -> SubscriptionPeriod {
        SubscriptionPeriod {
            subscription_id:  id.into(),
            user_id:          "u1".into(),
            plan_id:          plan.into(),
            start_date:       date(start),
            end_date:         None,
            amount:           29.0,
            status:           "active".into(),
            transaction_type: tx,
        }
    }

    #[test]
    fn churned_user_lifetime_ends_at_churn_date() {
        let users = vec![User {
            user_id:             "u1".into(),
            company_id:          None,
            signup_date:         date("2024-01-01"),
            country:             "uk".into(),
            acquisition_channel: "email".into(),
            initial_plan:        "free".into(),
            job_role:            "viewer".into(),
        }];
        let periods = vec![
            period("s1", "2024-01-15", TransactionType::NewBusiness, "basic_monthly"),
            period("s2", "2024-03-11", TransactionType::Churn, "basic_monthly"),
        ];
        let master = user_master(&users, &periods, &[], date("2024-12-31"));

        assert_eq!(master[0].churn_date, Some(date("2024-03-11")));
        assert!(master[0].is_churned);
        assert_eq!(master[0].lifetime_days, 70);
        assert_eq!(master[0].cohort_month.to_string(), "2024-01");
        assert_eq!(master[0].first_event_at, None);

        let flags = churn_flags(&master);
        assert_eq!(flags.len(), 1);
        assert_eq!(flags[0].churn_flag, 1);
    }

    #[test]
    fn support_summary_averages_scored_tickets_only() {
        let at = |s: &str| NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S").unwrap();
        let ticket = |id: &str, created: &str, resolved: bool, nps: Option<u8>| SupportTicket {
            ticket_id:       id.into(),
            user_id:         "u1".into(),
            created_at:      at(created),
            resolved_at:     resolved.then(|| at(created)),
            ticket_category: "billing".into(),
            nps_score:       nps,
            nps_comment:     None,
        };
        let rows = support_summary(&[
            ticket("t1", "2024-02-01 10:00:00", true, Some(10)),
            ticket("t2", "2024-02-20 10:00:00", false, Some(6)),
            ticket("t3", "2024-02-21 10:00:00", true, None),
            ticket("t4", "2024-04-02 10:00:00", false, None),
        ]);
        assert_eq!(rows.len(), 2);
        assert_eq!((rows[0].tickets_opened, rows[0].tickets_resolved), (3, 2));
        assert_eq!(rows[0].avg_nps, Some(8.0));
        assert_eq!(rows[1].avg_nps, None);
    }
}
