use chrono::{NaiveDate, NaiveDateTime};
use saas_metrics_core::{
    config::SegmentationConfig,
    ledger::{ProductEvent, SubscriptionPeriod, TransactionType, User},
    mrr_bridge::{BridgeBucket, UserBridgeLine},
    segmentation::{
        segment_users, stage_counts, JourneyStage, LifecycleSegment, RevenueTier, UserSegmentRow,
    },
};

// ── Helpers ──────────────────────────────────────────────────────────────────

fn date(s: &str) -> NaiveDate {
    NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
}

fn ts(s: &str) -> NaiveDateTime {
    NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S").unwrap()
}

fn user(id: &str, signup: &str) -> User {
    User {
        user_id:             id.into(),
        company_id:          None,
        signup_date:         date(signup),
        country:             "us".into(),
        acquisition_channel: "organic".into(),
        initial_plan:        "trial_basic".into(),
        job_role:            "admin".into(),
    }
}

fn event(id: &str, user: &str, at: &str) -> ProductEvent {
    ProductEvent {
        event_id:        id.into(),
        user_id:         user.into(),
        event_timestamp: ts(at),
        event_type:      "login".into(),
        session_id:      None,
        device:          None,
    }
}

fn period(id: &str, user: &str, start: &str, end: Option<&str>, amount: f64) -> SubscriptionPeriod {
    SubscriptionPeriod {
        subscription_id:  id.into(),
        user_id:          user.into(),
        plan_id:          "basic_monthly".into(),
        start_date:       date(start),
        end_date:         end.map(date),
        amount,
        status:           "active".into(),
        transaction_type: TransactionType::NewBusiness,
    }
}

const AS_OF: &str = "2024-12-31";

fn segment(users: &[User], events: &[ProductEvent], periods: &[SubscriptionPeriod]) -> Vec<UserSegmentRow> {
    segment_users(users, events, periods, &[], date(AS_OF), 14, &SegmentationConfig::default())
}

fn row<'a>(rows: &'a [UserSegmentRow], id: &str) -> &'a UserSegmentRow {
    rows.iter().find(|r| r.user_id == id).unwrap()
}

// ── Journey stages ───────────────────────────────────────────────────────────

#[test]
fn active_subscription_at_window_end_is_retained() {
    let users = vec![user("paying", "2024-01-01"), user("lapsed", "2024-01-01")];
    let periods = vec![
        period("s1", "paying", "2024-11-01", Some("2024-12-31"), 29.0),
        period("s2", "lapsed", "2024-01-01", Some("2024-12-30"), 29.0),
    ];
    let rows = segment(&users, &[], &periods);

    let paying = row(&rows, "paying");
    assert!(paying.has_active_subscription);
    assert_eq!(paying.journey_stage, JourneyStage::Retained);
    assert_eq!(paying.lifecycle_segment, LifecycleSegment::Active);

    let lapsed = row(&rows, "lapsed");
    assert!(!lapsed.has_active_subscription);
    assert_eq!(lapsed.journey_stage, JourneyStage::Churned);
}

#[test]
fn activated_users_split_on_recency() {
    let users = vec![user("recent", "2024-06-01"), user("quiet", "2024-06-01")];
    let events = vec![
        event("e1", "recent", "2024-06-02 09:00:00"),
        event("e2", "recent", "2024-12-01 09:00:00"),
        event("e3", "quiet", "2024-06-02 09:00:00"),
        event("e4", "quiet", "2024-11-30 23:00:00"),
    ];
    let rows = segment(&users, &events, &[]);

    let recent = row(&rows, "recent");
    assert!(recent.is_activated);
    assert_eq!(recent.days_since_last_seen, Some(30));
    assert_eq!(recent.journey_stage, JourneyStage::Engagement);
    assert_eq!(recent.lifecycle_segment, LifecycleSegment::Active);

    let quiet = row(&rows, "quiet");
    assert_eq!(quiet.days_since_last_seen, Some(31));
    assert_eq!(quiet.journey_stage, JourneyStage::Dormant);
    assert_eq!(quiet.lifecycle_segment, LifecycleSegment::AtRisk);
}

#[test]
fn unactivated_users_split_on_signup_age() {
    let users = vec![
        user("fresh", "2024-12-17"),
        user("old", "2024-12-16"),
        // First event falls outside the activation window, so not activated.
        user("late", "2024-09-01"),
    ];
    let events = vec![event("e1", "late", "2024-12-20 10:00:00")];
    let rows = segment(&users, &events, &[]);

    let fresh = row(&rows, "fresh");
    assert_eq!(fresh.days_since_signup, 14);
    assert_eq!(fresh.days_since_last_seen, None);
    assert_eq!(fresh.journey_stage, JourneyStage::Acquisition);
    assert_eq!(fresh.lifecycle_segment, LifecycleSegment::New);

    assert_eq!(row(&rows, "old").journey_stage, JourneyStage::Churned);

    let late = row(&rows, "late");
    assert!(!late.is_activated);
    assert_eq!(late.journey_stage, JourneyStage::Churned);
    assert_eq!(late.lifecycle_segment, LifecycleSegment::Churned);
}

#[test]
fn thresholds_come_from_settings() {
    let users = vec![user("u1", "2024-12-01")];
    let settings = SegmentationConfig {
        acquisition_days:  45,
        engagement_days:   30,
        high_tier_revenue: 500.0,
    };
    let rows = segment_users(&users, &[], &[], &[], date(AS_OF), 14, &settings);
    assert_eq!(rows[0].journey_stage, JourneyStage::Acquisition);
}

// ── Revenue tiers ────────────────────────────────────────────────────────────

#[test]
fn revenue_tier_thresholds() {
    assert_eq!(RevenueTier::for_revenue(0.0, 500.0), RevenueTier::Free);
    assert_eq!(RevenueTier::for_revenue(0.01, 500.0), RevenueTier::LowTier);
    assert_eq!(RevenueTier::for_revenue(499.99, 500.0), RevenueTier::LowTier);
    assert_eq!(RevenueTier::for_revenue(500.0, 500.0), RevenueTier::HighTier);
}

#[test]
fn lifetime_revenue_sums_billable_periods_only() {
    let users = vec![user("free", "2024-01-01"), user("low", "2024-01-01"), user("high", "2024-01-01")];
    let mut churn_row = period("c1", "low", "2024-03-01", None, 1000.0);
    churn_row.transaction_type = TransactionType::Churn;
    let periods = vec![
        period("s1", "low", "2024-01-01", Some("2024-01-31"), 29.0),
        period("s2", "low", "2024-02-01", Some("2024-02-29"), 29.0),
        churn_row,
        period("s3", "high", "2024-01-01", Some("2024-06-30"), 250.0),
        period("s4", "high", "2024-07-01", None, 250.0),
        period("s5", "free", "2024-01-01", None, 0.0),
    ];
    let rows = segment(&users, &[], &periods);

    assert_eq!(row(&rows, "free").revenue_tier, RevenueTier::Free);
    assert!(!row(&rows, "free").has_active_subscription);

    let low = row(&rows, "low");
    assert!((low.lifetime_revenue - 58.0).abs() < 1e-9);
    assert_eq!(low.revenue_tier, RevenueTier::LowTier);

    let high = row(&rows, "high");
    assert!((high.lifetime_revenue - 500.0).abs() < 1e-9);
    assert_eq!(high.revenue_tier, RevenueTier::HighTier);
    assert_eq!(high.journey_stage, JourneyStage::Retained);
}

// ── Bridge detail ────────────────────────────────────────────────────────────

#[test]
fn final_bucket_comes_from_last_bridged_month() {
    let line = |month: &str, user: &str, previous: f64, current: f64| UserBridgeLine {
        month:        month.parse().unwrap(),
        user_id:      user.into(),
        previous_mrr: previous,
        current_mrr:  current,
        delta:        current - previous,
        bucket:       BridgeBucket::classify(previous, current),
    };
    let detail = vec![
        line("2024-11", "u1", 0.0, 29.0),
        line("2024-12", "u1", 29.0, 99.0),
        line("2024-11", "u2", 0.0, 29.0),
    ];
    let users = vec![user("u1", "2024-01-01"), user("u2", "2024-01-01")];
    let rows = segment_users(&users, &[], &[], &detail, date(AS_OF), 14, &SegmentationConfig::default());

    assert_eq!(row(&rows, "u1").final_bucket, Some(BridgeBucket::Expansion));
    assert_eq!(row(&rows, "u2").final_bucket, None);
}

#[test]
fn stage_counts_cover_every_user() {
    let users = vec![user("a", "2024-12-30"), user("b", "2024-01-01"), user("c", "2024-01-01")];
    let rows = segment(&users, &[], &[]);
    let counts = stage_counts(&rows);
    assert_eq!(counts.get(&JourneyStage::Acquisition), Some(&1));
    assert_eq!(counts.get(&JourneyStage::Churned), Some(&2));
    assert_eq!(counts.values().sum::<usize>(), users.len());
}
