//! The four entity tables: users, subscription periods, product events and
//! support tickets, in both raw (as ingested) and cleaned (typed) form.

use crate::types::{EntityId, UserId};
use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

// ── Transaction type ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionType {
    NewBusiness,
    Renewal,
    Expansion,
    Contraction,
    /// Cessation marker. Carries the deactivation date; never billable.
    Churn,
}

impl TransactionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NewBusiness => "new_business",
            Self::Renewal     => "renewal",
            Self::Expansion   => "expansion",
            Self::Contraction => "contraction",
            Self::Churn       => "churn",
        }
    }

    /// Accepts any casing and surrounding whitespace.
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_lowercase().as_str() {
            "new_business" => Some(Self::NewBusiness),
            "renewal"      => Some(Self::Renewal),
            "expansion"    => Some(Self::Expansion),
            "contraction"  => Some(Self::Contraction),
            "churn"        => Some(Self::Churn),
            _ => None,
        }
    }

    pub fn is_billable(&self) -> bool {
        !matches!(self, Self::Churn)
    }
}

// ── Cleaned entities ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    pub user_id:             UserId,
    pub company_id:          Option<String>,
    pub signup_date:         NaiveDate,
    pub country:             String,
    pub acquisition_channel: String,
    pub initial_plan:        String,
    pub job_role:            String,
}

/// One ledger row. `end_date` is the last active day; `None` means open-ended.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubscriptionPeriod {
    pub subscription_id:  EntityId,
    pub user_id:          UserId,
    pub plan_id:          String,
    pub start_date:       NaiveDate,
    pub end_date:         Option<NaiveDate>,
    /// Monthly recurring amount. Non-negative after cleaning.
    pub amount:           f64,
    pub status:           String,
    pub transaction_type: TransactionType,
}

impl SubscriptionPeriod {
    pub fn is_billable(&self) -> bool {
        self.transaction_type.is_billable()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProductEvent {
    pub event_id:        EntityId,
    pub user_id:         UserId,
    pub event_timestamp: NaiveDateTime,
    pub event_type:      String,
    pub session_id:      Option<String>,
    pub device:          Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SupportTicket {
    pub ticket_id:       EntityId,
    pub user_id:         UserId,
    pub created_at:      NaiveDateTime,
    pub resolved_at:     Option<NaiveDateTime>,
    pub ticket_category: String,
    pub nps_score:       Option<u8>,
    pub nps_comment:     Option<String>,
}

/// The cleaned tables, fully materialized for one run.
#[derive(Debug, Clone, Default)]
pub struct CleanDataset {
    pub users:         Vec<User>,
    pub subscriptions: Vec<SubscriptionPeriod>,
    pub events:        Vec<ProductEvent>,
    pub tickets:       Vec<SupportTicket>,
}

// ── Raw entities (string-typed, exactly as ingested) ─────────────────────────

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RawUser {
    pub user_id:             Option<String>,
    pub company_id:          Option<String>,
    pub signup_date:         Option<String>,
    pub country:             Option<String>,
    pub acquisition_channel: Option<String>,
    pub initial_plan:        Option<String>,
    pub job_role:            Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RawSubscription {
    pub subscription_id:  Option<String>,
    pub user_id:          Option<String>,
    pub plan_id:          Option<String>,
    pub start_date:       Option<String>,
    pub end_date:         Option<String>,
    pub amount:           Option<String>,
    pub status:           Option<String>,
    pub transaction_type: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RawEvent {
    pub event_id:        Option<String>,
    pub user_id:         Option<String>,
    pub event_timestamp: Option<String>,
    pub event_type:      Option<String>,
    pub session_id:      Option<String>,
    pub device:          Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RawTicket {
    pub ticket_id:       Option<String>,
    pub user_id:         Option<String>,
    pub created_at:      Option<String>,
    pub resolved_at:     Option<String>,
    pub ticket_category: Option<String>,
    pub nps_score:       Option<String>,
    pub nps_comment:     Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct RawDataset {
    pub users:         Vec<RawUser>,
    pub subscriptions: Vec<RawSubscription>,
    pub events:        Vec<RawEvent>,
    pub tickets:       Vec<RawTicket>,
}

// ── Churn markers ────────────────────────────────────────────────────────────

/// Close billable periods at their user's churn markers.
///
/// A churn row dated `d` ends every billable period of the same user that
/// started on or before `d` and is open-ended or runs past `d`; its end date
/// becomes `d`. When a user has several markers the earliest applicable one
/// wins. Returns the number of periods whose end date changed.
pub fn apply_churn_markers(periods: &mut [SubscriptionPeriod]) -> usize {
    let mut markers: HashMap<UserId, Vec<NaiveDate>> = HashMap::new();
    for p in periods.iter().filter(|p| !p.is_billable()) {
        markers.entry(p.user_id.clone()).or_default().push(p.start_date);
    }
    for dates in markers.values_mut() {
        dates.sort();
    }

    let mut closed = 0;
    for period in periods.iter_mut().filter(|p| p.is_billable()) {
        let Some(dates) = markers.get(&period.user_id) else {
            continue;
        };
        let marker = dates.iter().copied().find(|d| {
            period.start_date <= *d && period.end_date.map_or(true, |end| end > *d)
        });
        if let Some(d) = marker {
            period.end_date = Some(d);
            closed += 1;
        }
    }
    closed
}
