//! Monthly SaaS KPIs derived from the revenue bridge.
//!
//! Ratios with a denominator at or below `RATIO_EPSILON` are `None`.

use crate::{
    calendar::CalendarMonth,
    mrr_bridge::{BridgeBucket, MonthlySnapshot, UserBridgeLine},
    types::RATIO_EPSILON,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MonthlyKpi {
    pub month:                    CalendarMonth,
    pub mrr:                      f64,
    pub arr:                      f64,
    pub arpu:                     f64,
    pub active_paid_users:        usize,
    pub mrr_churn_rate:           Option<f64>,
    pub net_revenue_retention:    Option<f64>,
    pub gross_revenue_retention:  Option<f64>,
    pub quick_ratio:              Option<f64>,
    pub logo_churn_rate:          Option<f64>,
    pub customer_lifetime_months: Option<f64>,
    pub ltv:                      Option<f64>,
}

fn safe_ratio(num: f64, den: f64) -> Option<f64> {
    if den > RATIO_EPSILON { Some(num / den) } else { None }
}

pub fn kpi_for_month(snap: &MonthlySnapshot, lines: &[&UserBridgeLine]) -> MonthlyKpi {
    let start = snap.mrr_start;
    let mrr_churn_rate = safe_ratio(snap.churned_mrr, start);

    let paying_at_start = lines.iter().filter(|l| l.previous_mrr > 0.0).count();
    let churned_users = lines.iter().filter(|l| l.bucket == BridgeBucket::Churned).count();

    let (customer_lifetime_months, ltv) = match mrr_churn_rate {
        Some(rate) if rate > RATIO_EPSILON => (Some(1.0 / rate), Some(snap.arpu / rate)),
        _ => (None, None),
    };

    MonthlyKpi {
        month:                    snap.month,
        mrr:                      snap.mrr_end,
        arr:                      snap.mrr_end * 12.0,
        arpu:                     snap.arpu,
        active_paid_users:        snap.active_paid_users,
        mrr_churn_rate,
        net_revenue_retention:    safe_ratio(
            start + snap.expansion_mrr - snap.contraction_mrr - snap.churned_mrr,
            start,
        ),
        gross_revenue_retention:  safe_ratio(start - snap.contraction_mrr - snap.churned_mrr, start),
        quick_ratio:              safe_ratio(
            snap.new_mrr + snap.expansion_mrr,
            snap.contraction_mrr + snap.churned_mrr,
        ),
        logo_churn_rate:          safe_ratio(churned_users as f64, paying_at_start as f64),
        customer_lifetime_months,
        ltv,
    }
}

/// KPIs for every bridged month, in snapshot order.
pub fn monthly_kpis(snapshots: &[MonthlySnapshot], detail: &[UserBridgeLine]) -> Vec<MonthlyKpi> {
    let mut by_month: HashMap<CalendarMonth, Vec<&UserBridgeLine>> = HashMap::new();
    for line in detail {
        by_month.entry(line.month).or_default().push(line);
    }
    snapshots
        .iter()
        .map(|s| {
            let lines = by_month.get(&s.month).map(Vec::as_slice).unwrap_or(&[]);
            kpi_for_month(s, lines)
        })
        .collect()
}
