//! Validation stage: an independent checker over the cleaned and derived tables.
//!
//! Checks read only what earlier stages persisted. A failed check is recorded,
//! logged at warn and emitted as an event. It never fails the run.

use crate::{
    calendar::CalendarMonth,
    cohort::{average_retention_by_offset, CohortRetentionRow},
    config::PipelineConfig,
    error::MetricsResult,
    event::PipelineEvent,
    funnel::FunnelRow,
    ledger::{CleanDataset, SubscriptionPeriod},
    mrr_bridge::{MonthlySnapshot, OverlapPolicy},
    rng::StageRng,
    stage::{PipelineStage, StageContext},
};
use chrono::{Days, NaiveDate, NaiveTime};
use serde::{Deserialize, Serialize};
use std::{
    any::Any,
    collections::{BTreeMap, HashSet},
};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationCheck {
    pub name:   String,
    pub passed: bool,
    pub detail: String,
}

/// A month whose revenue figures failed a bridge check.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MrrOffender {
    pub month:  CalendarMonth,
    pub diff:   f64,
    pub reason: String,
}

#[derive(Debug, Clone, Default)]
pub struct ValidationReport {
    pub checks:    Vec<ValidationCheck>,
    pub offenders: Vec<MrrOffender>,
}

impl ValidationReport {
    pub fn failures(&self) -> impl Iterator<Item = &ValidationCheck> {
        self.checks.iter().filter(|c| !c.passed)
    }

    pub fn check(&self, name: &str) -> Option<&ValidationCheck> {
        self.checks.iter().find(|c| c.name == name)
    }

    fn push(&mut self, name: &str, passed: bool, detail: String) {
        self.checks.push(ValidationCheck {
            name: name.to_string(),
            passed,
            detail,
        });
    }
}

/// Persisted tables the checker reads.
pub struct ValidationInput<'a> {
    pub data:      &'a CleanDataset,
    pub snapshots: &'a [MonthlySnapshot],
    pub cohorts:   &'a [CohortRetentionRow],
    pub funnel:    &'a [FunnelRow],
}

pub fn validate(input: &ValidationInput<'_>, config: &PipelineConfig) -> ValidationReport {
    let mut report = ValidationReport::default();
    check_integrity(input.data, &mut report);
    check_uniqueness(input.data, &mut report);
    check_event_window(input.data, config, &mut report);
    check_bridge_identity(input.snapshots, config.bridge.reconciliation_tolerance, &mut report);
    check_final_mrr(input.data, input.snapshots, config, &mut report);
    check_rates_bounded(input.cohorts, input.funnel, &mut report);
    check_retention_decay(input.cohorts, config.validation.retention_noise_allowance, &mut report);
    check_signup_stability(input.funnel, config.validation.signup_jump_threshold, &mut report);
    report
}

// ── Checks ─────────────────────────────────────────────────────

fn check_integrity(data: &CleanDataset, report: &mut ValidationReport) {
    let users: HashSet<&str> = data.users.iter().map(|u| u.user_id.as_str()).collect();

    let orphan_subs = data
        .subscriptions
        .iter()
        .filter(|s| !users.contains(s.user_id.as_str()))
        .count();
    report.push("integrity_subscriptions_users", orphan_subs == 0, format!("{orphan_subs} orphans"));

    let orphan_events = data
        .events
        .iter()
        .filter(|e| !users.contains(e.user_id.as_str()))
        .count();
    report.push("integrity_events_users", orphan_events == 0, format!("{orphan_events} orphans"));

    let orphan_tickets = data
        .tickets
        .iter()
        .filter(|t| !users.contains(t.user_id.as_str()))
        .count();
    report.push("integrity_tickets_users", orphan_tickets == 0, format!("{orphan_tickets} orphans"));
}

fn duplicates<'a>(ids: impl Iterator<Item = &'a str>) -> usize {
    let mut seen = HashSet::new();
    ids.filter(|id| !seen.insert(*id)).count()
}

fn check_uniqueness(data: &CleanDataset, report: &mut ValidationReport) {
    let users = duplicates(data.users.iter().map(|u| u.user_id.as_str()));
    report.push("uniqueness_user_pk", users == 0, format!("{users} duplicates"));

    let subs = duplicates(data.subscriptions.iter().map(|s| s.subscription_id.as_str()));
    report.push("uniqueness_subscription_pk", subs == 0, format!("{subs} duplicates"));

    let events = duplicates(data.events.iter().map(|e| e.event_id.as_str()));
    report.push("uniqueness_event_pk", events == 0, format!("{events} duplicates"));
}

fn check_event_window(data: &CleanDataset, config: &PipelineConfig, report: &mut ValidationReport) {
    let from = config.window.first_day().and_time(NaiveTime::MIN);
    let until = (config.window.last_day() + Days::new(1)).and_time(NaiveTime::MIN);
    let outside = data
        .events
        .iter()
        .filter(|e| e.event_timestamp < from || e.event_timestamp >= until)
        .count();
    let first = data.events.iter().map(|e| e.event_timestamp).min();
    let last = data.events.iter().map(|e| e.event_timestamp).max();
    let detail = match (first, last) {
        (Some(a), Some(b)) => format!("range {a} to {b}, {outside} outside window"),
        _ => "no events".to_string(),
    };
    report.push("event_date_window", outside == 0, detail);
}

/// Re-check the identity from the stored columns and the stored diff itself.
fn check_bridge_identity(snapshots: &[MonthlySnapshot], tolerance: f64, report: &mut ValidationReport) {
    let before = report.offenders.len();
    for s in snapshots {
        let gap = s.identity_gap();
        if gap >= tolerance {
            report.offenders.push(MrrOffender {
                month:  s.month,
                diff:   gap,
                reason: "bridge_mismatch".into(),
            });
        }
        if s.reconciliation_diff >= tolerance || (s.reconciliation_diff - gap).abs() >= tolerance {
            report.offenders.push(MrrOffender {
                month:  s.month,
                diff:   s.reconciliation_diff,
                reason: "stored_diff_above_tolerance".into(),
            });
        }
    }
    let failed = report.offenders.len() - before;
    report.push(
        "bridge_identity",
        failed == 0,
        format!("{} months checked, {failed} offenders", snapshots.len()),
    );
}

/// Independent re-derivation of the last month's ending MRR using date
/// comparisons instead of instants.
pub fn rederive_mrr_at_month_end(
    periods: &[SubscriptionPeriod],
    month_end: NaiveDate,
    policy: OverlapPolicy,
) -> f64 {
    let mut per_user: BTreeMap<&str, Vec<&SubscriptionPeriod>> = BTreeMap::new();
    for p in periods {
        let active = p.is_billable()
            && p.amount > 0.0
            && p.start_date <= month_end
            && p.end_date.map_or(true, |end| end >= month_end);
        if active {
            per_user.entry(p.user_id.as_str()).or_default().push(p);
        }
    }
    per_user
        .values()
        .map(|ps| match policy {
            OverlapPolicy::Sum => ps.iter().map(|p| p.amount).sum::<f64>(),
            OverlapPolicy::LatestStart => ps
                .iter()
                .max_by(|a, b| {
                    a.start_date
                        .cmp(&b.start_date)
                        .then(a.amount.total_cmp(&b.amount))
                })
                .map_or(0.0, |p| p.amount),
        })
        .sum()
}

fn check_final_mrr(
    data: &CleanDataset,
    snapshots: &[MonthlySnapshot],
    config: &PipelineConfig,
    report: &mut ValidationReport,
) {
    let Some(last) = snapshots.last() else {
        report.push("final_mrr_rederivation", false, "no bridged months".into());
        return;
    };
    let recomputed = rederive_mrr_at_month_end(
        &data.subscriptions,
        last.month.last_day(),
        config.bridge.overlap_policy,
    );
    let diff = (recomputed - last.mrr_end).abs();
    let passed = diff < config.bridge.reconciliation_tolerance;
    if !passed {
        report.offenders.push(MrrOffender {
            month:  last.month,
            diff,
            reason: "final_mrr_mismatch".into(),
        });
    }
    report.push(
        "final_mrr_rederivation",
        passed,
        format!("{}: table {:.4} vs recomputed {:.4} (diff {:e})", last.month, last.mrr_end, recomputed, diff),
    );
}

fn check_rates_bounded(cohorts: &[CohortRetentionRow], funnel: &[FunnelRow], report: &mut ValidationReport) {
    let unit = 0.0..=1.0;
    let bad_cohort = cohorts.iter().filter(|c| !unit.contains(&c.retention_rate)).count();
    let bad_funnel = funnel
        .iter()
        .filter(|f| !unit.contains(&f.activation_rate) || !unit.contains(&f.conversion_rate))
        .count();
    report.push(
        "rates_bounded",
        bad_cohort == 0 && bad_funnel == 0,
        format!("{bad_cohort} retention rows and {bad_funnel} funnel rows outside [0, 1]"),
    );
}

/// Mean retention may not rise by more than `allowance` from one offset to the next.
/// Offset 0 is excluded: trials make the signup month a partial paying month.
fn check_retention_decay(cohorts: &[CohortRetentionRow], allowance: f64, report: &mut ValidationReport) {
    let curve: Vec<(i32, f64)> = average_retention_by_offset(cohorts)
        .into_iter()
        .filter(|(offset, _)| *offset >= 1)
        .collect();
    let rises: Vec<String> = curve
        .windows(2)
        .filter(|w| w[1].1 > w[0].1 + allowance)
        .map(|w| format!("{}->{}", w[0].0, w[1].0))
        .collect();
    let detail = if rises.is_empty() {
        format!("{} offsets, retention non-increasing within {allowance}", curve.len())
    } else {
        format!("rises at offsets {}", rises.join(", "))
    };
    report.push("retention_decay", rises.is_empty(), detail);
}

fn check_signup_stability(funnel: &[FunnelRow], threshold: f64, report: &mut ValidationReport) {
    let jumps = funnel
        .windows(2)
        .filter(|w| {
            let prev = w[0].signups as f64;
            let next = w[1].signups as f64;
            (next - prev).abs() / (prev + 1.0) > threshold
        })
        .count();
    report.push(
        "signup_stability",
        jumps == 0,
        format!("{jumps} months with more than {:.0}% change", threshold * 100.0),
    );
}

// ── Stage ──────────────────────────────────────────────────────

pub struct ValidationStage;

impl ValidationStage {
    pub fn new() -> Self {
        Self
    }
}

impl Default for ValidationStage {
    fn default() -> Self {
        Self::new()
    }
}

impl PipelineStage for ValidationStage {
    fn name(&self) -> &'static str {
        "validation"
    }

    fn run(&mut self, ctx: &StageContext<'_>, _rng: &mut StageRng) -> MetricsResult<Vec<PipelineEvent>> {
        let data = ctx.store.load_clean_dataset(ctx.run_id)?;
        let snapshots = ctx.store.monthly_snapshots(ctx.run_id)?;
        let cohorts = ctx.store.cohort_rows(ctx.run_id)?;
        let funnel = ctx.store.funnel_rows(ctx.run_id)?;

        let report = validate(
            &ValidationInput {
                data:      &data,
                snapshots: &snapshots,
                cohorts:   &cohorts,
                funnel:    &funnel,
            },
            ctx.config,
        );
        ctx.store.insert_validation_checks(ctx.run_id, &report.checks)?;
        ctx.store.insert_mrr_offenders(ctx.run_id, &report.offenders)?;

        let mut events = Vec::new();
        for check in report.failures() {
            log::warn!("validation {}: FAIL - {}", check.name, check.detail);
            events.push(PipelineEvent::ValidationCheckFailed {
                check:  check.name.clone(),
                detail: check.detail.clone(),
            });
        }
        let failures = events.len();
        log::info!("validation: {} checks, {failures} failures", report.checks.len());
        events.push(PipelineEvent::ValidationCompleted {
            checks: report.checks.len(),
            failures,
        });
        Ok(events)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}
