//! Monthly MRR bridge: the revenue-state snapshot engine.
//!
//! For every month in the analysis window:
//!   1. Snapshot active MRR per user at the month's end instant.
//!   2. Union the users of the previous and current snapshots (absent = 0.0).
//!   3. Classify each user's delta into exactly one bucket.
//!   4. Sum buckets and check the bridge identity
//!        mrr_end = mrr_start + new + expansion - contraction - churned
//!      to within the configured tolerance.
//!
//! The previous month's snapshot is the only state carried between months.
//! It is threaded through a fold, never stored globally. The first month
//! starts from the empty snapshot.
//!
//! Identity violations are reported on the snapshot and logged at warn.
//! They never abort the remaining months.

use crate::{
    calendar::CalendarMonth,
    error::MetricsResult,
    ledger::SubscriptionPeriod,
    types::{UserId, DEFAULT_RECONCILIATION_TOLERANCE},
};
use chrono::{Days, NaiveDateTime, NaiveTime};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Active MRR per user at one instant. Ordered for deterministic output.
pub type MrrMap = BTreeMap<UserId, f64>;

/// How concurrent billable periods of one user combine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverlapPolicy {
    /// Add the amounts of every active period.
    #[default]
    Sum,
    /// Keep only the latest-starting active period (ties: larger amount).
    LatestStart,
}

// ── Active MRR at an instant ─────────────────────────────────────────────────

/// Whether `period` contributes MRR at instant `at`.
///
/// Active when it has started, has not ended (the end date is the last active
/// day, so the period runs until midnight after it), is billable, and has a
/// positive amount.
pub fn is_active_at(period: &SubscriptionPeriod, at: NaiveDateTime) -> bool {
    let started = period.start_date.and_time(NaiveTime::MIN) <= at;
    let not_ended = match period.end_date {
        None => true,
        Some(end) => match end.checked_add_days(Days::new(1)) {
            Some(after_end) => after_end.and_time(NaiveTime::MIN) > at,
            None => true,
        },
    };
    started && not_ended && period.is_billable() && period.amount > 0.0
}

/// Total active MRR per user at `at`. Users with nothing active are absent.
pub fn active_mrr_at(
    periods: &[SubscriptionPeriod],
    at: NaiveDateTime,
    policy: OverlapPolicy,
) -> MrrMap {
    let mut map = MrrMap::new();
    match policy {
        OverlapPolicy::Sum => {
            for p in periods.iter().filter(|p| is_active_at(p, at)) {
                *map.entry(p.user_id.clone()).or_insert(0.0) += p.amount;
            }
        }
        OverlapPolicy::LatestStart => {
            let mut latest: BTreeMap<&str, &SubscriptionPeriod> = BTreeMap::new();
            for p in periods.iter().filter(|p| is_active_at(p, at)) {
                let replace = match latest.get(p.user_id.as_str()) {
                    None => true,
                    Some(cur) => {
                        p.start_date > cur.start_date
                            || (p.start_date == cur.start_date && p.amount > cur.amount)
                    }
                };
                if replace {
                    latest.insert(p.user_id.as_str(), p);
                }
            }
            for (user_id, p) in latest {
                map.insert(user_id.to_string(), p.amount);
            }
        }
    }
    map
}

// ── Classification ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BridgeBucket {
    New,
    Expansion,
    Contraction,
    Churned,
    /// No change (including zero on both sides).
    Static,
}

impl BridgeBucket {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::New         => "new",
            Self::Expansion   => "expansion",
            Self::Contraction => "contraction",
            Self::Churned     => "churned",
            Self::Static      => "static",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "new"         => Some(Self::New),
            "expansion"   => Some(Self::Expansion),
            "contraction" => Some(Self::Contraction),
            "churned"     => Some(Self::Churned),
            "static"      => Some(Self::Static),
            _ => None,
        }
    }

    /// Bucket for one user's month-over-month move.
    pub fn classify(previous: f64, current: f64) -> Self {
        let delta = current - previous;
        match (previous > 0.0, current > 0.0) {
            (false, true)                  => Self::New,
            (true, false)                  => Self::Churned,
            (true, true) if delta > 0.0    => Self::Expansion,
            (true, true) if delta < 0.0    => Self::Contraction,
            _                              => Self::Static,
        }
    }

    /// Non-negative magnitude this bucket adds to its bridge column.
    pub fn magnitude(&self, previous: f64, current: f64) -> f64 {
        let delta = current - previous;
        match self {
            Self::New | Self::Expansion       => delta,
            Self::Churned | Self::Contraction => -delta,
            Self::Static                      => 0.0,
        }
    }

    /// Signed effect on MRR. Equals `current - previous` for the classified bucket.
    pub fn signed_contribution(&self, previous: f64, current: f64) -> f64 {
        match self {
            Self::New | Self::Expansion       => self.magnitude(previous, current),
            Self::Churned | Self::Contraction => -self.magnitude(previous, current),
            Self::Static                      => 0.0,
        }
    }
}

// ── Output records ──────────────────────────────────────────────────────────

/// One user's classification in one month.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserBridgeLine {
    pub month:        CalendarMonth,
    pub user_id:      UserId,
    pub previous_mrr: f64,
    pub current_mrr:  f64,
    pub delta:        f64,
    pub bucket:       BridgeBucket,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MonthlySnapshot {
    pub month:               CalendarMonth,
    pub mrr_start:           f64,
    pub mrr_end:             f64,
    pub new_mrr:             f64,
    pub expansion_mrr:       f64,
    pub contraction_mrr:     f64,
    pub churned_mrr:         f64,
    pub active_paid_users:   usize,
    pub arpu:                f64,
    pub reconciliation_diff: f64,
    pub reconciled:          bool,
}

impl MonthlySnapshot {
    /// `mrr_start + new + expansion - contraction - churned`.
    pub fn bridged_end(&self) -> f64 {
        self.mrr_start + self.new_mrr + self.expansion_mrr - self.contraction_mrr - self.churned_mrr
    }

    /// Recompute the identity gap from the stored columns.
    pub fn identity_gap(&self) -> f64 {
        (self.mrr_end - self.bridged_end()).abs()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BridgeReport {
    pub snapshots: Vec<MonthlySnapshot>,
    pub detail:    Vec<UserBridgeLine>,
}

impl BridgeReport {
    /// Months whose identity gap exceeded tolerance.
    pub fn anomalies(&self) -> impl Iterator<Item = &MonthlySnapshot> {
        self.snapshots.iter().filter(|s| !s.reconciled)
    }

    pub fn final_mrr(&self) -> f64 {
        self.snapshots.last().map_or(0.0, |s| s.mrr_end)
    }
}

#[derive(Debug, Clone, Copy)]
pub struct BridgeSettings {
    pub policy:    OverlapPolicy,
    pub tolerance: f64,
}

impl Default for BridgeSettings {
    fn default() -> Self {
        Self {
            policy:    OverlapPolicy::Sum,
            tolerance: DEFAULT_RECONCILIATION_TOLERANCE,
        }
    }
}

// ── Bridge driver ───────────────────────────────────────────────────────────

/// Bridge a single month from `previous` to `current`.
pub fn bridge_month(
    month: CalendarMonth,
    previous: &MrrMap,
    current: &MrrMap,
    tolerance: f64,
) -> (MonthlySnapshot, Vec<UserBridgeLine>) {
    let users: BTreeSet<&UserId> = previous.keys().chain(current.keys()).collect();

    let mut snap = MonthlySnapshot {
        month,
        mrr_start:           0.0,
        mrr_end:             0.0,
        new_mrr:             0.0,
        expansion_mrr:       0.0,
        contraction_mrr:     0.0,
        churned_mrr:         0.0,
        active_paid_users:   0,
        arpu:                0.0,
        reconciliation_diff: 0.0,
        reconciled:          true,
    };
    let mut detail = Vec::with_capacity(users.len());

    for user_id in users {
        let prev = previous.get(user_id).copied().unwrap_or(0.0);
        let curr = current.get(user_id).copied().unwrap_or(0.0);
        let bucket = BridgeBucket::classify(prev, curr);
        let magnitude = bucket.magnitude(prev, curr);

        match bucket {
            BridgeBucket::New         => snap.new_mrr += magnitude,
            BridgeBucket::Expansion   => snap.expansion_mrr += magnitude,
            BridgeBucket::Contraction => snap.contraction_mrr += magnitude,
            BridgeBucket::Churned     => snap.churned_mrr += magnitude,
            BridgeBucket::Static      => {}
        }
        snap.mrr_start += prev;
        snap.mrr_end += curr;
        if curr > 0.0 {
            snap.active_paid_users += 1;
        }

        detail.push(UserBridgeLine {
            month,
            user_id: user_id.clone(),
            previous_mrr: prev,
            current_mrr: curr,
            delta: curr - prev,
            bucket,
        });
    }

    snap.arpu = if snap.active_paid_users > 0 {
        snap.mrr_end / snap.active_paid_users as f64
    } else {
        0.0
    };
    snap.reconciliation_diff = snap.identity_gap();
    snap.reconciled = snap.reconciliation_diff < tolerance;

    (snap, detail)
}

/// Build the bridge for `months`, which must be ascending and contiguous.
///
/// Month-end snapshots have no cross-month dependency and are computed first;
/// the sequential part is the fold that carries the previous snapshot forward.
pub fn build_bridge(
    periods: &[SubscriptionPeriod],
    months: &[CalendarMonth],
    settings: BridgeSettings,
) -> MetricsResult<BridgeReport> {
    CalendarMonth::ensure_contiguous(months)?;

    let month_ends: Vec<MrrMap> = months
        .iter()
        .map(|m| active_mrr_at(periods, m.end_instant(), settings.policy))
        .collect();

    let (_, report) = months.iter().zip(month_ends).fold(
        (MrrMap::new(), BridgeReport::default()),
        |(previous, mut report), (month, current)| {
            let (snap, detail) = bridge_month(*month, &previous, &current, settings.tolerance);
            if snap.reconciled {
                log::debug!(
                    "bridge {}: start={:.2} end={:.2} new={:.2} exp={:.2} con={:.2} churn={:.2}",
                    month, snap.mrr_start, snap.mrr_end, snap.new_mrr,
                    snap.expansion_mrr, snap.contraction_mrr, snap.churned_mrr,
                );
            } else {
                log::warn!(
                    "bridge {}: reconciliation mismatch, diff={:e} (tolerance {:e})",
                    month, snap.reconciliation_diff, settings.tolerance,
                );
            }
            report.snapshots.push(snap);
            report.detail.extend(detail);
            (current, report)
        },
    );

    Ok(report)
}
