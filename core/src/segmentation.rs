//! Journey stages and user segments.
//!
//! Every user gets one journey stage, the lifecycle segment it maps to, and a
//! revenue tier from their lifetime billed amount. "Days since" values are
//! measured back from a fixed `as_of` date (the last day of the analysis
//! window), so the table is reproducible for a given ledger.

use crate::{
    config::SegmentationConfig,
    funnel::activated_users,
    ledger::{ProductEvent, SubscriptionPeriod, User},
    mrr_bridge::{is_active_at, BridgeBucket, UserBridgeLine},
    types::UserId,
};
use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JourneyStage {
    /// Recently signed up, not yet activated.
    Acquisition,
    /// Activated and seen recently.
    Engagement,
    /// Activated but quiet for longer than the engagement window.
    Dormant,
    /// Holds an active paid subscription.
    Retained,
    /// Never activated and past the acquisition window.
    Churned,
}

impl JourneyStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Acquisition => "acquisition",
            Self::Engagement  => "engagement",
            Self::Dormant     => "dormant",
            Self::Retained    => "retained",
            Self::Churned     => "churned",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "acquisition" => Some(Self::Acquisition),
            "engagement"  => Some(Self::Engagement),
            "dormant"     => Some(Self::Dormant),
            "retained"    => Some(Self::Retained),
            "churned"     => Some(Self::Churned),
            _ => None,
        }
    }

    pub fn lifecycle(&self) -> LifecycleSegment {
        match self {
            Self::Acquisition                => LifecycleSegment::New,
            Self::Engagement | Self::Retained => LifecycleSegment::Active,
            Self::Dormant                    => LifecycleSegment::AtRisk,
            Self::Churned                    => LifecycleSegment::Churned,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleSegment {
    New,
    Active,
    AtRisk,
    Churned,
}

impl LifecycleSegment {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::New     => "new",
            Self::Active  => "active",
            Self::AtRisk  => "at_risk",
            Self::Churned => "churned",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "new"     => Some(Self::New),
            "active"  => Some(Self::Active),
            "at_risk" => Some(Self::AtRisk),
            "churned" => Some(Self::Churned),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RevenueTier {
    Free,
    LowTier,
    HighTier,
}

impl RevenueTier {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Free     => "free",
            Self::LowTier  => "low_tier",
            Self::HighTier => "high_tier",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "free"      => Some(Self::Free),
            "low_tier"  => Some(Self::LowTier),
            "high_tier" => Some(Self::HighTier),
            _ => None,
        }
    }

    pub fn for_revenue(lifetime_revenue: f64, high_tier_revenue: f64) -> Self {
        if lifetime_revenue <= 0.0 {
            Self::Free
        } else if lifetime_revenue < high_tier_revenue {
            Self::LowTier
        } else {
            Self::HighTier
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserSegmentRow {
    pub user_id:                 UserId,
    pub journey_stage:           JourneyStage,
    pub lifecycle_segment:       LifecycleSegment,
    pub revenue_tier:            RevenueTier,
    /// Bucket in the last bridged month; empty when the user had no MRR on either side.
    pub final_bucket:            Option<BridgeBucket>,
    pub lifetime_revenue:        f64,
    pub is_activated:            bool,
    pub has_active_subscription: bool,
    pub days_since_signup:       i64,
    pub days_since_last_seen:    Option<i64>,
}

/// Inputs that only feed the stage rule.
#[derive(Debug, Clone, Copy)]
struct StageSignals {
    has_active_subscription: bool,
    is_activated:            bool,
    days_since_signup:       i64,
    days_since_last_seen:    Option<i64>,
}

fn journey_stage(s: StageSignals, settings: &SegmentationConfig) -> JourneyStage {
    if s.has_active_subscription {
        JourneyStage::Retained
    } else if s.is_activated {
        match s.days_since_last_seen {
            Some(days) if days <= settings.engagement_days => JourneyStage::Engagement,
            _ => JourneyStage::Dormant,
        }
    } else if s.days_since_signup <= settings.acquisition_days {
        JourneyStage::Acquisition
    } else {
        JourneyStage::Churned
    }
}

/// One segment row per user, in input order.
pub fn segment_users(
    users: &[User],
    events: &[ProductEvent],
    periods: &[SubscriptionPeriod],
    bridge_detail: &[UserBridgeLine],
    as_of: NaiveDate,
    activation_window_days: i64,
    settings: &SegmentationConfig,
) -> Vec<UserSegmentRow> {
    let at: NaiveDateTime = as_of.and_time(NaiveTime::MIN);
    let activated = activated_users(users, events, activation_window_days);

    let active_now: HashSet<&str> = periods
        .iter()
        .filter(|p| is_active_at(p, at))
        .map(|p| p.user_id.as_str())
        .collect();

    let mut revenue: HashMap<&str, f64> = HashMap::new();
    for p in periods.iter().filter(|p| p.is_billable()) {
        *revenue.entry(p.user_id.as_str()).or_insert(0.0) += p.amount;
    }

    let mut last_seen: HashMap<&str, NaiveDateTime> = HashMap::new();
    for e in events {
        last_seen
            .entry(e.user_id.as_str())
            .and_modify(|t| *t = (*t).max(e.event_timestamp))
            .or_insert(e.event_timestamp);
    }

    let final_month = bridge_detail.iter().map(|l| l.month).max();
    let final_buckets: HashMap<&str, BridgeBucket> = bridge_detail
        .iter()
        .filter(|l| Some(l.month) == final_month)
        .map(|l| (l.user_id.as_str(), l.bucket))
        .collect();

    users
        .iter()
        .map(|u| {
            let id = u.user_id.as_str();
            let signals = StageSignals {
                has_active_subscription: active_now.contains(id),
                is_activated:            activated.contains(id),
                days_since_signup:       (as_of - u.signup_date).num_days(),
                days_since_last_seen:    last_seen.get(id).map(|t| (as_of - t.date()).num_days()),
            };
            let stage = journey_stage(signals, settings);
            let lifetime_revenue = revenue.get(id).copied().unwrap_or(0.0);
            UserSegmentRow {
                user_id:                 u.user_id.clone(),
                journey_stage:           stage,
                lifecycle_segment:       stage.lifecycle(),
                revenue_tier:            RevenueTier::for_revenue(lifetime_revenue, settings.high_tier_revenue),
                final_bucket:            final_buckets.get(id).copied(),
                lifetime_revenue,
                is_activated:            signals.is_activated,
                has_active_subscription: signals.has_active_subscription,
                days_since_signup:       signals.days_since_signup,
                days_since_last_seen:    signals.days_since_last_seen,
            }
        })
        .collect()
}

/// Users per journey stage.
pub fn stage_counts(rows: &[UserSegmentRow]) -> BTreeMap<JourneyStage, usize> {
    let mut counts = BTreeMap::new();
    for r in rows {
        *counts.entry(r.journey_stage).or_insert(0) += 1;
    }
    counts
}
