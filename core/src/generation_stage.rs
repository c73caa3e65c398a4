//! Synthetic source data.
//!
//! Produces the four raw tables for the configured window: users with a
//! seasonal signup curve, a trial → paid → renew/upgrade/churn subscription
//! ledger, product events and support tickets. Optional dirty-data injection
//! gives the cleaning stage something to catch.
//!
//! Values are written as strings in the casing a real export would use
//! (`New_Business`, `Paid_Search`), exactly like the ingest path.

use crate::{
    calendar::{format_timestamp, CalendarMonth},
    config::{GenerationConfig, PipelineConfig, PlanConfig, WeightedOption},
    error::MetricsResult,
    event::PipelineEvent,
    ledger::{RawDataset, RawEvent, RawSubscription, RawTicket, RawUser},
    rng::StageRng,
    stage::{PipelineStage, StageContext},
};
use chrono::{Days, Duration, NaiveDate, NaiveDateTime, NaiveTime};
use std::any::Any;

/// Share of users attached to an already-generated company.
const SHARED_COMPANY_RATE: f64 = 0.25;
/// Support tickets open within this many days of signup.
const TICKET_OPEN_WINDOW_DAYS: u64 = 60;
const TICKET_MAX_RESOLUTION_HOURS: i64 = 100;
const NPS_COMMENT_RATE: f64 = 0.3;
/// NPS 0..=10 weights for churned and retained users.
const NPS_WEIGHTS_CHURNED: [f64; 11] = [0.1, 0.1, 0.1, 0.1, 0.1, 0.1, 0.1, 0.1, 0.1, 0.05, 0.05];
const NPS_WEIGHTS_RETAINED: [f64; 11] = [0.01, 0.01, 0.01, 0.01, 0.01, 0.01, 0.01, 0.1, 0.2, 0.3, 0.33];

pub struct GenerationStage;

impl GenerationStage {
    pub fn new() -> Self {
        Self
    }
}

impl Default for GenerationStage {
    fn default() -> Self {
        Self::new()
    }
}

impl PipelineStage for GenerationStage {
    fn name(&self) -> &'static str {
        "generation"
    }

    fn run(&mut self, ctx: &StageContext<'_>, rng: &mut StageRng) -> MetricsResult<Vec<PipelineEvent>> {
        let raw = generate_raw_dataset(ctx.config, rng)?;
        ctx.store.insert_raw_dataset(ctx.run_id, &raw)?;

        log::info!(
            "generation: users={} subscriptions={} events={} tickets={}",
            raw.users.len(),
            raw.subscriptions.len(),
            raw.events.len(),
            raw.tickets.len(),
        );

        Ok(vec![PipelineEvent::RawDataGenerated {
            users:         raw.users.len(),
            subscriptions: raw.subscriptions.len(),
            events:        raw.events.len(),
            tickets:       raw.tickets.len(),
        }])
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

// ── Dataset generation ─────────────────────────────────────────

/// Per-user facts later generators depend on.
struct Lifecycle {
    /// Date of the churn marker, if the user churned inside the window.
    churned_on: Option<NaiveDate>,
}

/// Generate the full raw dataset. Same config and RNG state give the same rows.
pub fn generate_raw_dataset(config: &PipelineConfig, rng: &mut StageRng) -> MetricsResult<RawDataset> {
    let gen = &config.generation;
    let months = config.window.months()?;
    let window_start = config.window.first_day();
    let window_end = config.window.last_day();

    let mut raw = RawDataset::default();
    let mut companies: Vec<String> = Vec::new();

    for _ in 0..gen.user_count {
        let user_id = short_id("usr", 8, rng);
        let signup = pick_signup_date(gen, &months, rng);

        let company_id = if !companies.is_empty() && rng.chance(SHARED_COMPANY_RATE) {
            companies[rng.next_u64_below(companies.len() as u64) as usize].clone()
        } else {
            let id = short_id("cmp", 6, rng);
            companies.push(id.clone());
            id
        };

        let channel = pick(&gen.channels, rng).to_string();
        let initial_plan = pick(&gen.initial_plans, rng).to_string();

        raw.users.push(RawUser {
            user_id:             Some(user_id.clone()),
            company_id:          Some(company_id),
            signup_date:         Some(signup.to_string()),
            country:             Some(pick(&gen.countries, rng).to_string()),
            acquisition_channel: Some(channel.clone()),
            initial_plan:        Some(initial_plan.clone()),
            job_role:            Some(pick(&gen.job_roles, rng).to_string()),
        });

        let lifecycle = generate_subscriptions(
            config,
            &user_id,
            signup,
            &channel,
            &initial_plan,
            rng,
            &mut raw.subscriptions,
        );

        let active_until = match lifecycle.churned_on {
            Some(d) => d.and_time(NaiveTime::MIN),
            None => (window_end + Days::new(1)).and_time(NaiveTime::MIN),
        };
        generate_events(gen, &user_id, signup.and_time(NaiveTime::MIN), active_until, rng, &mut raw.events);
        generate_ticket(gen, &user_id, signup, window_end, lifecycle.churned_on.is_some(), rng, &mut raw.tickets);
    }

    inject_dirty_data(gen, window_start, rng, &mut raw);
    Ok(raw)
}

fn pick_signup_date(gen: &GenerationConfig, months: &[CalendarMonth], rng: &mut StageRng) -> NaiveDate {
    let weights: Vec<f64> = (0..months.len())
        .map(|i| gen.signup_month_weights.get(i).copied().unwrap_or(1.0))
        .collect();
    let month = months[rng.weighted_index(&weights)];
    let days = (month.last_day() - month.first_day()).num_days() as u64 + 1;
    month.first_day() + Days::new(rng.next_u64_below(days))
}

fn generate_subscriptions(
    config: &PipelineConfig,
    user_id: &str,
    signup: NaiveDate,
    channel: &str,
    initial_plan: &str,
    rng: &mut StageRng,
    out: &mut Vec<RawSubscription>,
) -> Lifecycle {
    let gen = &config.generation;
    let window_end = config.window.last_day();
    let mut lifecycle = Lifecycle { churned_on: None };

    // Free users never enter the ledger.
    if !initial_plan.to_lowercase().starts_with("trial") {
        return lifecycle;
    }

    let trial_end = signup + Days::new(gen.trial_days);
    out.push(raw_period(user_id, initial_plan, signup, Some(trial_end), 0.0, "Trial", "New_Business", rng));

    let adjustment = gen
        .channel_conversion_adjustments
        .get(&channel.to_lowercase())
        .copied()
        .unwrap_or(0.0);
    if !rng.chance(gen.base_conversion_rate + adjustment) {
        return lifecycle;
    }

    let mut start = trial_end + Days::new(1);
    if start > window_end || config.plans.is_empty() {
        return lifecycle;
    }
    let weights: Vec<f64> = config.plans.iter().map(|p| p.weight).collect();
    let mut plan = &config.plans[rng.weighted_index(&weights)];
    let mut transaction_type = "New_Business";

    loop {
        let end = start + Days::new(plan.term_days());
        let closed = end <= window_end;
        out.push(raw_period(
            user_id,
            &plan.plan_id,
            start,
            closed.then_some(end),
            plan.monthly_amount(),
            "Active",
            transaction_type,
            rng,
        ));
        if !closed {
            break;
        }

        let next_start = end + Days::new(1);
        if rng.chance(gen.renewal_churn_probability) {
            out.push(raw_period(
                user_id,
                &plan.plan_id,
                next_start,
                Some(next_start),
                0.0,
                "Cancelled",
                "Churn",
                rng,
            ));
            lifecycle.churned_on = Some(next_start);
            break;
        }
        if next_start > window_end {
            break;
        }

        let next_plan = if rng.chance(gen.plan_change_probability) {
            pick_other_plan(&config.plans, plan, rng)
        } else {
            plan
        };
        transaction_type = if next_plan.monthly_amount() > plan.monthly_amount() {
            "Expansion"
        } else if next_plan.monthly_amount() < plan.monthly_amount() {
            "Contraction"
        } else {
            "Renewal"
        };
        plan = next_plan;
        start = next_start;
    }
    lifecycle
}

fn pick_other_plan<'a>(plans: &'a [PlanConfig], current: &'a PlanConfig, rng: &mut StageRng) -> &'a PlanConfig {
    let weights: Vec<f64> = plans
        .iter()
        .map(|p| if p.plan_id == current.plan_id { 0.0 } else { p.weight })
        .collect();
    if weights.iter().all(|w| *w <= 0.0) {
        return current;
    }
    &plans[rng.weighted_index(&weights)]
}

#[allow(clippy::too_many_arguments)]
fn raw_period(
    user_id: &str,
    plan_id: &str,
    start: NaiveDate,
    end: Option<NaiveDate>,
    amount: f64,
    status: &str,
    transaction_type: &str,
    rng: &mut StageRng,
) -> RawSubscription {
    RawSubscription {
        subscription_id:  Some(short_id("sub", 10, rng)),
        user_id:          Some(user_id.to_string()),
        plan_id:          Some(plan_id.to_string()),
        start_date:       Some(start.to_string()),
        end_date:         end.map(|d| d.to_string()),
        amount:           Some(amount.to_string()),
        status:           Some(status.to_string()),
        transaction_type: Some(transaction_type.to_string()),
    }
}

fn generate_events(
    gen: &GenerationConfig,
    user_id: &str,
    from: NaiveDateTime,
    until: NaiveDateTime,
    rng: &mut StageRng,
    out: &mut Vec<RawEvent>,
) {
    let span = (until - from).num_seconds();
    if span <= 0 || gen.event_types.is_empty() {
        return;
    }
    let count = rng.next_i64_between(gen.events_per_user_min, gen.events_per_user_max).max(0);
    let mut offsets: Vec<u64> = (0..count).map(|_| rng.next_u64_below(span as u64)).collect();
    offsets.sort_unstable();

    for offset in offsets {
        let ts = from + Duration::seconds(offset as i64);
        out.push(RawEvent {
            event_id:        Some(short_id("evt", 12, rng)),
            user_id:         Some(user_id.to_string()),
            event_timestamp: Some(format_timestamp(ts)),
            event_type:      Some(pick(&gen.event_types, rng).to_string()),
            session_id:      Some(short_id("ses", 8, rng)),
            device:          Some(pick(&gen.devices, rng).to_string()),
        });
    }
}

fn generate_ticket(
    gen: &GenerationConfig,
    user_id: &str,
    signup: NaiveDate,
    window_end: NaiveDate,
    churned: bool,
    rng: &mut StageRng,
    out: &mut Vec<RawTicket>,
) {
    let probability = if churned {
        gen.ticket_probability_churned
    } else {
        gen.ticket_probability_retained
    };
    if !rng.chance(probability) {
        return;
    }

    let created_day = signup + Days::new(1 + rng.next_u64_below(TICKET_OPEN_WINDOW_DAYS));
    if created_day > window_end {
        return;
    }
    let created = created_day.and_time(NaiveTime::MIN)
        + Duration::seconds(rng.next_u64_below(86_400) as i64);
    let resolved = created + Duration::hours(rng.next_i64_between(1, TICKET_MAX_RESOLUTION_HOURS));
    let resolved = (resolved.date() <= window_end).then_some(resolved);

    let nps = resolved.map(|_| {
        let weights = if churned { &NPS_WEIGHTS_CHURNED } else { &NPS_WEIGHTS_RETAINED };
        rng.weighted_index(weights)
    });
    let comment = rng.chance(NPS_COMMENT_RATE).then(|| "Sample comment".to_string());

    out.push(RawTicket {
        ticket_id:       Some(short_id("tkt", 8, rng)),
        user_id:         Some(user_id.to_string()),
        created_at:      Some(format_timestamp(created)),
        resolved_at:     resolved.map(format_timestamp),
        ticket_category: Some(pick(&gen.ticket_categories, rng).to_string()),
        nps_score:       nps.map(|n| n.to_string()),
        nps_comment:     comment,
    });
}

// ── Dirty data ─────────────────────────────────────────────────

fn inject_dirty_data(gen: &GenerationConfig, window_start: NaiveDate, rng: &mut StageRng, raw: &mut RawDataset) {
    let dirty = &gen.dirty_data;

    let duplicates: Vec<RawUser> = raw
        .users
        .iter()
        .filter(|_| rng.chance(dirty.duplicate_user_rate))
        .cloned()
        .collect();
    raw.users.extend(duplicates);

    let mut orphans = Vec::new();
    for s in &raw.subscriptions {
        if rng.chance(dirty.orphan_subscription_rate) {
            orphans.push(RawSubscription {
                subscription_id: Some(short_id("sub", 10, rng)),
                user_id: Some(short_id("usr", 8, rng)),
                ..s.clone()
            });
        }
    }
    raw.subscriptions.extend(orphans);

    for s in raw.subscriptions.iter_mut() {
        let paid = s
            .amount
            .as_deref()
            .and_then(|a| a.parse::<f64>().ok())
            .is_some_and(|a| a > 0.0);
        if paid && rng.chance(dirty.negative_amount_rate) {
            s.amount = s.amount.as_ref().map(|a| format!("-{a}"));
        }
        if rng.chance(dirty.malformed_date_rate) {
            s.start_date = Some("not-a-date".into());
        }
    }

    let stale = (window_start - Days::new(400)).and_time(NaiveTime::MIN);
    for e in raw.events.iter_mut() {
        if rng.chance(dirty.malformed_date_rate) {
            e.event_timestamp = Some("2024-99-99 25:61:00".into());
        } else if rng.chance(dirty.out_of_window_event_rate) {
            e.event_timestamp = Some(format_timestamp(stale));
        }
    }
}

// ── Helpers ────────────────────────────────────────────────────

fn pick<'a>(options: &'a [WeightedOption], rng: &mut StageRng) -> &'a str {
    if options.is_empty() {
        return "";
    }
    options[rng.weighted_index(&WeightedOption::weights(options))].value.as_str()
}

/// `{prefix}_{hex}` from RNG bytes, so identifiers are reproducible per seed.
fn short_id(prefix: &str, hex_len: usize, rng: &mut StageRng) -> String {
    let id = uuid::Builder::from_random_bytes(rng.next_bytes16()).into_uuid();
    let hex = id.simple().to_string();
    format!("{prefix}_{}", &hex[..hex_len.min(hex.len())])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rng::{RngBank, StageSlot};

    #[test]
    fn identifiers_are_reproducible() {
        let mut a = RngBank::new(11).for_stage(StageSlot::Source);
        let mut b = RngBank::new(11).for_stage(StageSlot::Source);
        assert_eq!(short_id("usr", 8, &mut a), short_id("usr", 8, &mut b));
        assert_eq!(short_id("evt", 12, &mut a).len(), "evt_".len() + 12);
    }

    #[test]
    fn free_users_have_no_ledger_rows() {
        let config = PipelineConfig::default_test();
        let mut rng = RngBank::new(5).for_stage(StageSlot::Source);
        let mut out = Vec::new();
        let signup = NaiveDate::from_ymd_opt(2024, 3, 1).unwrap();
        let life = generate_subscriptions(&config, "usr_x", signup, "Organic", "Free", &mut rng, &mut out);
        assert!(out.is_empty());
        assert!(life.churned_on.is_none());
    }

    #[test]
    fn generated_ledger_is_contiguous_per_user() {
        let mut config = PipelineConfig::default_test();
        config.generation.base_conversion_rate = 1.0;
        let mut rng = RngBank::new(8).for_stage(StageSlot::Source);
        for _ in 0..50 {
            let mut out = Vec::new();
            let signup = NaiveDate::from_ymd_opt(2024, 1, 3).unwrap();
            generate_subscriptions(&config, "usr_x", signup, "Organic", "Trial_Pro", &mut rng, &mut out);
            assert!(out.len() >= 2, "converted trial must have a paid period");
            for pair in out.windows(2) {
                let prev_end: NaiveDate = pair[0].end_date.as_deref().unwrap().parse().unwrap();
                let next_start: NaiveDate = pair[1].start_date.as_deref().unwrap().parse().unwrap();
                assert_eq!(next_start, prev_end + Days::new(1));
            }
        }
    }
}
