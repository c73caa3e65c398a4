use chrono::NaiveDate;
use saas_metrics_core::{
    calendar::CalendarMonth,
    error::MetricsError,
    ledger::{apply_churn_markers, SubscriptionPeriod, TransactionType},
    mrr_bridge::{
        active_mrr_at, bridge_month, build_bridge, is_active_at, BridgeBucket, BridgeSettings,
        MrrMap, OverlapPolicy,
    },
};

// ── Helpers ──────────────────────────────────────────────────────────────────

fn date(s: &str) -> NaiveDate {
    NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
}

fn month(s: &str) -> CalendarMonth {
    s.parse().unwrap()
}

fn period(
    id: &str,
    user: &str,
    start: &str,
    end: Option<&str>,
    amount: f64,
    tx: TransactionType,
) -> SubscriptionPeriod {
    SubscriptionPeriod {
        subscription_id:  id.into(),
        user_id:          user.into(),
        plan_id:          "pro_monthly".into(),
        start_date:       date(start),
        end_date:         end.map(date),
        amount,
        status:           "active".into(),
        transaction_type: tx,
    }
}

fn months(first: &str, last: &str) -> Vec<CalendarMonth> {
    CalendarMonth::range(month(first), month(last)).unwrap()
}

fn assert_close(actual: f64, expected: f64) {
    assert!(
        (actual - expected).abs() < 1e-9,
        "expected {expected}, got {actual}"
    );
}

// ── Inclusion boundary ───────────────────────────────────────────────────────

/// The end date is the last active day: a period ending on the last day of the
/// month is still active at that month's end instant.
#[test]
fn period_ending_on_month_end_is_active() {
    let p = period("s1", "u1", "2024-01-01", Some("2024-01-31"), 50.0, TransactionType::NewBusiness);
    assert!(is_active_at(&p, month("2024-01").end_instant()));
    assert!(!is_active_at(&p, month("2024-02").end_instant()));
}

#[test]
fn period_ending_day_before_month_start_is_inactive() {
    // Ends 2024-01-31, the day before February starts.
    let p = period("s1", "u1", "2023-11-01", Some("2024-01-31"), 50.0, TransactionType::Renewal);
    let feb = month("2024-02");
    assert!(!is_active_at(&p, feb.end_instant()));
    assert!(!is_active_at(&p, feb.start_instant()));
}

#[test]
fn period_starting_on_last_day_is_active_at_month_end() {
    let p = period("s1", "u1", "2024-03-31", None, 20.0, TransactionType::NewBusiness);
    assert!(is_active_at(&p, month("2024-03").end_instant()));
    assert!(!is_active_at(&p, month("2024-02").end_instant()));
}

#[test]
fn zero_amount_and_churn_rows_never_count() {
    let at = month("2024-01").end_instant();
    let free = period("s1", "u1", "2024-01-01", None, 0.0, TransactionType::NewBusiness);
    let marker = period("s2", "u2", "2024-01-10", None, 99.0, TransactionType::Churn);
    assert!(!is_active_at(&free, at));
    assert!(!is_active_at(&marker, at));

    let map = active_mrr_at(&[free, marker], at, OverlapPolicy::Sum);
    assert!(map.is_empty());
}

#[test]
fn zero_amount_period_contributes_to_no_bucket() {
    let periods = vec![
        period("s1", "u1", "2024-01-01", Some("2024-01-31"), 0.0, TransactionType::NewBusiness),
        period("s2", "u1", "2024-02-01", None, 0.0, TransactionType::Renewal),
    ];
    let report = build_bridge(&periods, &months("2024-01", "2024-03"), BridgeSettings::default()).unwrap();
    for s in &report.snapshots {
        assert_eq!(s.mrr_start, 0.0);
        assert_eq!(s.mrr_end, 0.0);
        assert_eq!(s.new_mrr + s.expansion_mrr + s.contraction_mrr + s.churned_mrr, 0.0);
    }
    assert!(report.detail.is_empty(), "zero-amount users never appear in the detail");
}

// ── Overlap policy ───────────────────────────────────────────────────────────

#[test]
fn overlapping_periods_are_summed_by_default() {
    let periods = vec![
        period("s1", "u1", "2024-01-01", None, 30.0, TransactionType::NewBusiness),
        period("s2", "u1", "2024-01-15", None, 20.0, TransactionType::Expansion),
    ];
    let at = month("2024-01").end_instant();
    let map = active_mrr_at(&periods, at, OverlapPolicy::Sum);
    assert_close(map["u1"], 50.0);
}

#[test]
fn latest_start_policy_keeps_the_newest_period() {
    let periods = vec![
        period("s1", "u1", "2024-01-01", None, 30.0, TransactionType::NewBusiness),
        period("s2", "u1", "2024-01-15", None, 20.0, TransactionType::Contraction),
        period("s3", "u2", "2024-01-05", None, 10.0, TransactionType::NewBusiness),
        period("s4", "u2", "2024-01-05", None, 15.0, TransactionType::Expansion),
    ];
    let at = month("2024-01").end_instant();
    let map = active_mrr_at(&periods, at, OverlapPolicy::LatestStart);
    assert_close(map["u1"], 20.0);
    // Same start date: the larger amount wins.
    assert_close(map["u2"], 15.0);
}

// ── Scenarios ────────────────────────────────────────────────────────────────

/// Open-ended new business in January, churn marker mid-February.
#[test]
fn churn_marker_closes_period_and_books_churned_mrr() {
    let mut periods = vec![
        period("s1", "A", "2024-01-01", None, 100.0, TransactionType::NewBusiness),
        period("s2", "A", "2024-02-15", None, 0.0, TransactionType::Churn),
    ];
    assert_eq!(apply_churn_markers(&mut periods), 1);
    assert_eq!(periods[0].end_date, Some(date("2024-02-15")));

    let report = build_bridge(&periods, &months("2024-01", "2024-02"), BridgeSettings::default()).unwrap();
    let jan = &report.snapshots[0];
    assert_close(jan.new_mrr, 100.0);
    assert_close(jan.mrr_end, 100.0);

    let feb = &report.snapshots[1];
    assert_close(feb.churned_mrr, 100.0);
    assert_close(feb.mrr_end, 0.0);
    assert!(feb.reconciliation_diff < 1e-4);
    assert!(feb.reconciled);
}

#[test]
fn plan_upgrade_books_expansion() {
    let periods = vec![
        period("s1", "B", "2024-01-01", Some("2024-01-31"), 50.0, TransactionType::NewBusiness),
        period("s2", "B", "2024-02-01", None, 80.0, TransactionType::Expansion),
    ];
    let report = build_bridge(&periods, &months("2024-01", "2024-02"), BridgeSettings::default()).unwrap();
    let feb = &report.snapshots[1];
    assert_close(feb.expansion_mrr, 30.0);
    assert_close(feb.new_mrr, 0.0);
    assert_close(feb.churned_mrr, 0.0);
    assert_close(feb.mrr_start, 50.0);
    assert_close(feb.mrr_end, 80.0);

    let line = report
        .detail
        .iter()
        .find(|l| l.month == month("2024-02") && l.user_id == "B")
        .unwrap();
    assert_eq!(line.bucket, BridgeBucket::Expansion);
}

#[test]
fn downgrade_books_contraction() {
    let periods = vec![
        period("s1", "C", "2024-01-01", Some("2024-01-31"), 99.0, TransactionType::NewBusiness),
        period("s2", "C", "2024-02-01", None, 29.0, TransactionType::Contraction),
    ];
    let report = build_bridge(&periods, &months("2024-01", "2024-02"), BridgeSettings::default()).unwrap();
    assert_close(report.snapshots[1].contraction_mrr, 70.0);
    assert_close(report.final_mrr(), 29.0);
}

// ── Partition and identity ───────────────────────────────────────────────────

/// Every (previous, current) pair lands in exactly one bucket whose signed
/// contribution equals the user's delta.
#[test]
fn buckets_partition_every_user_delta() {
    let values = [0.0, 10.0, 29.0, 50.0, 99.0];
    for &prev in &values {
        for &curr in &values {
            let bucket = BridgeBucket::classify(prev, curr);
            assert_close(bucket.signed_contribution(prev, curr), curr - prev);
            assert!(bucket.magnitude(prev, curr) >= 0.0);

            let expected = if prev == curr {
                BridgeBucket::Static
            } else if prev == 0.0 {
                BridgeBucket::New
            } else if curr == 0.0 {
                BridgeBucket::Churned
            } else if curr > prev {
                BridgeBucket::Expansion
            } else {
                BridgeBucket::Contraction
            };
            assert_eq!(bucket, expected, "prev={prev} curr={curr}");
        }
    }
}

#[test]
fn bridge_identity_holds_for_mixed_ledger() {
    let periods = vec![
        period("s1", "u1", "2024-01-03", Some("2024-02-02"), 29.0, TransactionType::NewBusiness),
        period("s2", "u1", "2024-02-03", Some("2024-03-03"), 99.0, TransactionType::Expansion),
        period("s3", "u1", "2024-03-04", None, 29.0, TransactionType::Contraction),
        period("s4", "u2", "2024-01-20", Some("2024-04-10"), 24.1666, TransactionType::NewBusiness),
        period("s5", "u3", "2024-02-11", None, 82.5, TransactionType::NewBusiness),
        period("s6", "u3", "2024-02-20", None, 10.0, TransactionType::Expansion),
        period("s7", "u4", "2024-03-01", Some("2024-03-31"), 29.0, TransactionType::NewBusiness),
        period("s8", "u4", "2024-04-01", None, 29.0, TransactionType::Renewal),
        period("s9", "u5", "2024-01-01", None, 0.0, TransactionType::NewBusiness),
    ];
    let report = build_bridge(&periods, &months("2024-01", "2024-06"), BridgeSettings::default()).unwrap();
    assert_eq!(report.snapshots.len(), 6);

    for s in &report.snapshots {
        let bridged = s.mrr_start + s.new_mrr + s.expansion_mrr - s.contraction_mrr - s.churned_mrr;
        assert!((s.mrr_end - bridged).abs() < 1e-4, "{}: identity broken", s.month);
        assert!(s.reconciled);
    }
    for pair in report.snapshots.windows(2) {
        assert_close(pair[1].mrr_start, pair[0].mrr_end);
    }
    for line in &report.detail {
        assert_close(line.bucket.signed_contribution(line.previous_mrr, line.current_mrr), line.delta);
    }
    // A renewal at the same price is static.
    let u4_apr = report
        .detail
        .iter()
        .find(|l| l.month == month("2024-04") && l.user_id == "u4")
        .unwrap();
    assert_eq!(u4_apr.bucket, BridgeBucket::Static);
}

#[test]
fn first_month_starts_from_zero_and_everyone_is_new() {
    let periods = vec![
        period("s1", "u1", "2023-06-01", None, 29.0, TransactionType::NewBusiness),
        period("s2", "u2", "2023-12-15", None, 99.0, TransactionType::Renewal),
    ];
    let report = build_bridge(&periods, &months("2024-01", "2024-02"), BridgeSettings::default()).unwrap();
    let first = &report.snapshots[0];
    assert_eq!(first.mrr_start, 0.0);
    assert_close(first.new_mrr, 128.0);
    assert!(report
        .detail
        .iter()
        .filter(|l| l.month == month("2024-01"))
        .all(|l| l.bucket == BridgeBucket::New));
}

// ── Edge cases ───────────────────────────────────────────────────────────────

#[test]
fn arpu_is_zero_without_paying_users() {
    let (snap, detail) = bridge_month(month("2024-01"), &MrrMap::new(), &MrrMap::new(), 1e-4);
    assert_eq!(snap.active_paid_users, 0);
    assert_eq!(snap.arpu, 0.0);
    assert!(detail.is_empty());
}

#[test]
fn arpu_divides_ending_mrr_by_paying_users() {
    let current = MrrMap::from([("u1".to_string(), 30.0), ("u2".to_string(), 90.0)]);
    let (snap, _) = bridge_month(month("2024-01"), &MrrMap::new(), &current, 1e-4);
    assert_eq!(snap.active_paid_users, 2);
    assert_close(snap.arpu, 60.0);
}

#[test]
fn non_contiguous_months_are_rejected() {
    let gap = vec![month("2024-01"), month("2024-03")];
    let err = build_bridge(&[], &gap, BridgeSettings::default()).unwrap_err();
    assert!(matches!(err, MetricsError::NonContiguousMonths { .. }));
}

/// A month over tolerance is flagged but the remaining months still compute.
#[test]
fn tolerance_breach_is_flagged_not_fatal() {
    let periods = vec![
        period("s1", "u1", "2024-01-01", None, 0.1, TransactionType::NewBusiness),
        period("s2", "u2", "2024-01-01", None, 0.2, TransactionType::NewBusiness),
        period("s3", "u3", "2024-02-01", None, 0.3, TransactionType::NewBusiness),
    ];
    let settings = BridgeSettings {
        policy:    OverlapPolicy::Sum,
        tolerance: -1.0,
    };
    let report = build_bridge(&periods, &months("2024-01", "2024-03"), settings).unwrap();
    assert_eq!(report.snapshots.len(), 3);
    assert_eq!(report.anomalies().count(), 3);
    assert_close(report.final_mrr(), 0.6);
}
