use chrono::{NaiveDate, NaiveDateTime};
use saas_metrics_core::{
    calendar::CalendarMonth,
    funnel::{funnel_stages, monthly_funnel},
    kpi::monthly_kpis,
    ledger::{ProductEvent, SubscriptionPeriod, TransactionType, User},
    mrr_bridge::{bridge_month, MrrMap},
};

// ── Helpers ──────────────────────────────────────────────────────────────────

fn date(s: &str) -> NaiveDate {
    NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
}

fn ts(s: &str) -> NaiveDateTime {
    NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S").unwrap()
}

fn month(s: &str) -> CalendarMonth {
    s.parse().unwrap()
}

fn user(id: &str, signup: &str) -> User {
    User {
        user_id:             id.into(),
        company_id:          Some("c-1".into()),
        signup_date:         date(signup),
        country:             "de".into(),
        acquisition_channel: "referral".into(),
        initial_plan:        "trial_pro".into(),
        job_role:            "member".into(),
    }
}

fn event(id: &str, user: &str, at: &str) -> ProductEvent {
    ProductEvent {
        event_id:        id.into(),
        user_id:         user.into(),
        event_timestamp: ts(at),
        event_type:      "login".into(),
        session_id:      None,
        device:          Some("desktop".into()),
    }
}

fn paid(id: &str, user: &str, start: &str, amount: f64) -> SubscriptionPeriod {
    SubscriptionPeriod {
        subscription_id:  id.into(),
        user_id:          user.into(),
        plan_id:          "pro_monthly".into(),
        start_date:       date(start),
        end_date:         None,
        amount,
        status:           "active".into(),
        transaction_type: TransactionType::NewBusiness,
    }
}

fn mrr(entries: &[(&str, f64)]) -> MrrMap {
    entries.iter().map(|(u, v)| (u.to_string(), *v)).collect()
}

// ── Funnels ──────────────────────────────────────────────────────────────────

#[test]
fn monthly_funnel_counts_by_signup_month() {
    let users = vec![
        user("u1", "2024-01-03"),
        user("u2", "2024-01-20"),
        user("u3", "2024-01-28"),
        user("u4", "2024-02-11"),
    ];
    let events = vec![
        event("e1", "u1", "2024-01-03 10:00:00"),
        event("e2", "u1", "2024-01-05 09:00:00"),
        event("e3", "u2", "2024-03-01 12:00:00"),
    ];
    let periods = vec![paid("s1", "u1", "2024-01-17", 29.0), paid("s2", "u2", "2024-02-03", 0.0)];
    let months = CalendarMonth::range(month("2024-01"), month("2024-03")).unwrap();

    let rows = monthly_funnel(&users, &events, &periods, &months);
    assert_eq!(rows.len(), 3);

    let jan = &rows[0];
    assert_eq!((jan.signups, jan.activations, jan.paid_conversions), (3, 2, 1));
    assert!((jan.activation_rate - 2.0 / 3.0).abs() < 1e-12);
    assert!((jan.conversion_rate - 1.0 / 3.0).abs() < 1e-12);

    let feb = &rows[1];
    assert_eq!((feb.signups, feb.activations, feb.paid_conversions), (1, 0, 0));

    // No signups: rates are defined as zero.
    let mar = &rows[2];
    assert_eq!(mar.signups, 0);
    assert_eq!(mar.activation_rate, 0.0);
    assert_eq!(mar.conversion_rate, 0.0);
}

#[test]
fn stage_funnel_respects_activation_window() {
    let users = vec![
        user("u1", "2024-01-01"),
        user("u2", "2024-01-01"),
        user("u3", "2024-01-01"),
        user("u4", "2024-01-01"),
    ];
    let events = vec![
        event("e1", "u1", "2024-01-02 08:00:00"),
        // 14 days after signup midnight: inside a 14-day window.
        event("e2", "u2", "2024-01-15 00:00:00"),
        // Too late to count as activation.
        event("e3", "u3", "2024-02-20 08:00:00"),
    ];
    let periods = vec![
        paid("s1", "u1", "2024-01-15", 29.0),
        paid("s3", "u3", "2024-01-15", 29.0),
    ];

    let stages = funnel_stages(&users, &events, &periods, 14);
    let names: Vec<&str> = stages.iter().map(|s| s.stage.as_str()).collect();
    assert_eq!(names, vec!["signup", "activation", "paid"]);

    assert_eq!(stages[0].count, 4);
    assert_eq!(stages[0].conversion_rate, 1.0);
    assert_eq!(stages[1].count, 2);
    assert_eq!(stages[1].drop_off_rate, 0.5);
    // u3 pays but never activated in time.
    assert_eq!(stages[2].count, 1);
    assert_eq!(stages[2].conversion_rate, 0.25);
    assert_eq!(stages[2].drop_off_rate, 0.5);
}

#[test]
fn oversized_activation_window_is_unbounded() {
    let users = vec![user("u1", "2024-01-01"), user("u2", "2024-03-01")];
    let events = vec![
        event("e1", "u1", "2024-11-30 08:00:00"),
        // Before signup never activates.
        event("e2", "u2", "2024-02-01 08:00:00"),
    ];
    let stages = funnel_stages(&users, &events, &[], i64::MAX);
    assert_eq!(stages[1].count, 1);
    assert_eq!(stages[2].count, 0);
}

#[test]
fn stage_funnel_handles_empty_population() {
    let stages = funnel_stages(&[], &[], &[], 14);
    assert!(stages.iter().all(|s| s.count == 0));
    assert!(stages.iter().all(|s| s.conversion_rate == 0.0 && s.drop_off_rate == 0.0));
}

// ── KPIs ─────────────────────────────────────────────────────────────────────

#[test]
fn kpis_follow_the_bridge_columns() {
    let previous = mrr(&[("u1", 100.0), ("u2", 50.0), ("u3", 50.0)]);
    let current = mrr(&[("u1", 120.0), ("u2", 40.0), ("u4", 30.0)]);
    let (snap, detail) = bridge_month(month("2024-02"), &previous, &current, 1e-4);

    let kpis = monthly_kpis(&[snap], &detail);
    assert_eq!(kpis.len(), 1);
    let k = &kpis[0];

    let close = |a: Option<f64>, b: f64| assert!((a.unwrap() - b).abs() < 1e-9, "{a:?} vs {b}");
    assert!((k.mrr - 190.0).abs() < 1e-9);
    assert!((k.arr - 2280.0).abs() < 1e-9);
    assert_eq!(k.active_paid_users, 3);
    close(k.mrr_churn_rate, 0.25);
    close(k.net_revenue_retention, 0.8);
    close(k.gross_revenue_retention, 0.7);
    close(k.quick_ratio, 50.0 / 60.0);
    close(k.logo_churn_rate, 1.0 / 3.0);
    close(k.customer_lifetime_months, 4.0);
    close(k.ltv, (190.0 / 3.0) / 0.25);
}

#[test]
fn ratios_are_undefined_without_starting_mrr() {
    let current = mrr(&[("u1", 29.0)]);
    let (snap, detail) = bridge_month(month("2024-01"), &MrrMap::new(), &current, 1e-4);
    let k = &monthly_kpis(&[snap], &detail)[0];

    assert_eq!(k.mrr_churn_rate, None);
    assert_eq!(k.net_revenue_retention, None);
    assert_eq!(k.gross_revenue_retention, None);
    assert_eq!(k.logo_churn_rate, None);
    assert_eq!(k.ltv, None);
    // Growth with no losses has no finite quick ratio.
    assert_eq!(k.quick_ratio, None);
    assert_eq!(k.arpu, 29.0);
}
