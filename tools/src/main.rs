//! metrics-runner: headless revenue-metrics pipeline runner.
//!
//! Usage:
//!   metrics-runner --seed 12345 --users 5000 --out-dir out
//!   metrics-runner --input-dir exports/2024 --db metrics.db --out-dir out
//!   metrics-runner --first-month 2024-01 --last-month 2024-06

use anyhow::{Context, Result};
use saas_metrics_core::{
    calendar::CalendarMonth,
    config::PipelineConfig,
    engine::{DataSource, PipelineEngine},
    segmentation::stage_counts,
    snapshot::RunSnapshot,
    store::MetricsStore,
};
use std::{env, path::PathBuf};

fn main() -> Result<()> {
    env_logger::init();

    let args: Vec<String> = env::args().collect();
    let seed = parse_arg(&args, "--seed", 42u64);
    let db = flag_value(&args, "--db").unwrap_or(":memory:");
    let data_dir = flag_value(&args, "--data-dir").unwrap_or("./data");

    let mut config = match PipelineConfig::load(data_dir) {
        Ok(config) => config,
        Err(e) if flag_value(&args, "--data-dir").is_none() => {
            log::warn!("{e}; falling back to the built-in test configuration");
            PipelineConfig::default_test()
        }
        Err(e) => return Err(e),
    };
    config.generation.user_count = parse_arg(&args, "--users", config.generation.user_count);
    if let Some(raw) = flag_value(&args, "--first-month") {
        config.window.first_month = raw.parse::<CalendarMonth>().context("--first-month")?;
    }
    if let Some(raw) = flag_value(&args, "--last-month") {
        config.window.last_month = raw.parse::<CalendarMonth>().context("--last-month")?;
    }
    if let Some(dir) = flag_value(&args, "--out-dir") {
        config.export.output_dir = Some(dir.to_string());
    }
    let source = match flag_value(&args, "--input-dir") {
        Some(dir) => DataSource::CsvDir(PathBuf::from(dir)),
        None => DataSource::Synthetic,
    };

    println!("SaaS revenue metrics: metrics-runner");
    println!("  seed:      {seed}");
    println!("  source:    {}", source.label());
    println!("  window:    {} .. {}", config.window.first_month, config.window.last_month);
    println!("  db:        {db}");
    println!("  data_dir:  {data_dir}");
    if let Some(out) = &config.export.output_dir {
        println!("  out_dir:   {out}");
    }
    println!();

    let store = MetricsStore::open(db)?;
    store.migrate()?;

    let run_id = format!("run-{seed}-{}", unix_seconds());
    let mut engine = PipelineEngine::build(run_id, seed, config, store, source)?;
    let snapshot = engine.run()?;

    print_summary(&engine, &snapshot)?;
    Ok(())
}

fn print_summary(engine: &PipelineEngine, snapshot: &RunSnapshot) -> Result<()> {
    let store = engine.store();
    let run_id = &engine.run_id;

    println!("=== RUN SUMMARY ===");
    println!("  run_id:         {run_id}");
    println!("  stages:         {}", snapshot.completed_stages.join(" -> "));
    println!("  users:          {}", snapshot.rows("app_user"));
    println!("  subscriptions:  {}", snapshot.rows("subscription"));
    println!("  events:         {}", snapshot.rows("product_event"));
    println!("  tickets:        {}", snapshot.rows("support_ticket"));

    println!();
    println!("=== MRR BRIDGE ===");
    println!(
        "  {:<7} {:>12} {:>10} {:>10} {:>11} {:>10} {:>12} {:>6}",
        "month", "start", "new", "expansion", "contraction", "churned", "end", "paid"
    );
    for s in store.monthly_snapshots(run_id)? {
        let flag = if s.reconciled { "" } else { "  !" };
        println!(
            "  {:<7} {:>12.2} {:>10.2} {:>10.2} {:>11.2} {:>10.2} {:>12.2} {:>6}{flag}",
            s.month.to_string(),
            s.mrr_start,
            s.new_mrr,
            s.expansion_mrr,
            s.contraction_mrr,
            s.churned_mrr,
            s.mrr_end,
            s.active_paid_users,
        );
    }

    println!();
    println!("=== KPIs ===");
    let pct = |v: Option<f64>| v.map_or_else(|| "-".to_string(), |r| format!("{:.1}%", r * 100.0));
    for k in store.kpis(run_id)? {
        println!(
            "  {} | ARR: ${:.0} | ARPU: ${:.2} | NRR: {} | GRR: {} | logo churn: {}",
            k.month,
            k.arr,
            k.arpu,
            pct(k.net_revenue_retention),
            pct(k.gross_revenue_retention),
            pct(k.logo_churn_rate),
        );
    }

    println!();
    println!("=== JOURNEY STAGES ===");
    for (stage, count) in stage_counts(&store.user_segments(run_id)?) {
        println!("  {:<12} {count}", stage.as_str());
    }

    println!();
    println!("=== VALIDATION ===");
    let checks = store.validation_checks(run_id)?;
    let failures = checks.iter().filter(|c| !c.passed).count();
    for c in &checks {
        let status = if c.passed { "PASS" } else { "FAIL" };
        println!("  {status} {:<30} {}", c.name, c.detail);
    }
    println!("  {} checks, {failures} failures", checks.len());
    Ok(())
}

fn flag_value<'a>(args: &'a [String], flag: &str) -> Option<&'a str> {
    args.windows(2).find(|w| w[0] == flag).map(|w| w[1].as_str())
}

fn parse_arg<T: std::str::FromStr + Copy>(args: &[String], flag: &str, default: T) -> T {
    flag_value(args, flag)
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn unix_seconds() -> u64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}
