//! Export stage: CSV files for every derived table plus a Markdown
//! data-quality report and a manifest of what was written.
//!
//! Each manifest row carries the SHA-256 of the file as written, so a copy
//! of the export directory can be checked against it.

use crate::{
    cleaning_stage::CleaningLogRow,
    csv_io::{
        write_csv, write_raw_dataset, CsvTable, EVENTS_FILE, SUBSCRIPTIONS_FILE, TICKETS_FILE,
        USERS_FILE,
    },
    error::MetricsResult,
    event::PipelineEvent,
    rng::StageRng,
    stage::{PipelineStage, StageContext},
    validation_stage::{MrrOffender, ValidationCheck},
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::{
    any::Any,
    fmt::Write as _,
    fs,
    path::{Path, PathBuf},
};

pub const SCHEMA_VERSION: &str = env!("CARGO_PKG_VERSION");
pub const DQ_REPORT_FILE: &str = "dq_report.md";
pub const MANIFEST_FILE: &str = "export_manifest.csv";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ManifestRow {
    pub file_name:      String,
    pub row_count:      usize,
    pub schema_version: String,
    pub sha256:         String,
    pub created_at:     DateTime<Utc>,
}

/// Hex SHA-256 of a file's bytes.
pub fn file_sha256(path: &Path) -> MetricsResult<String> {
    let mut hasher = Sha256::new();
    hasher.update(fs::read(path)?);
    Ok(hex::encode(hasher.finalize()))
}

pub struct ExportStage {
    out_dir: PathBuf,
}

impl ExportStage {
    pub fn new(out_dir: impl Into<PathBuf>) -> Self {
        Self { out_dir: out_dir.into() }
    }
}

/// Collects written files for the manifest and the event log.
struct Exporter<'a> {
    root:       &'a Path,
    created_at: DateTime<Utc>,
    manifest:   Vec<ManifestRow>,
    events:     Vec<PipelineEvent>,
}

impl Exporter<'_> {
    fn table<T: CsvTable>(&mut self, file_name: &str, rows: &[T]) -> MetricsResult<()> {
        let path = self.root.join(file_name);
        let count = write_csv(&path, rows)?;
        self.record(file_name, &path, count)
    }

    fn record(&mut self, file_name: &str, path: &Path, rows: usize) -> MetricsResult<()> {
        let sha256 = file_sha256(path)?;
        log::debug!("export: {file_name} ({rows} rows, sha256 {sha256})");
        self.manifest.push(ManifestRow {
            file_name:      file_name.to_string(),
            row_count:      rows,
            schema_version: SCHEMA_VERSION.to_string(),
            sha256,
            created_at:     self.created_at,
        });
        self.events.push(PipelineEvent::TableExported {
            table: file_name.to_string(),
            path:  path.display().to_string(),
            rows,
        });
        Ok(())
    }
}

impl PipelineStage for ExportStage {
    fn name(&self) -> &'static str {
        "export"
    }

    fn run(&mut self, ctx: &StageContext<'_>, _rng: &mut StageRng) -> MetricsResult<Vec<PipelineEvent>> {
        let store = ctx.store;
        let run_id = ctx.run_id;
        fs::create_dir_all(&self.out_dir)?;

        let mut out = Exporter {
            root:       &self.out_dir,
            created_at: Utc::now(),
            manifest:   Vec::new(),
            events:     Vec::new(),
        };

        out.table("monthly_revenue.csv", &store.monthly_snapshots(run_id)?)?;
        out.table("mrr_user_bridge.csv", &store.bridge_lines(run_id)?)?;
        out.table("cohort_retention.csv", &store.cohort_rows(run_id)?)?;
        out.table("monthly_funnel.csv", &store.funnel_rows(run_id)?)?;
        out.table("funnel_stages.csv", &store.funnel_stages(run_id)?)?;
        out.table("kpi_monthly.csv", &store.kpis(run_id)?)?;
        out.table("user_master.csv", &store.user_master(run_id)?)?;
        out.table("churn_flags.csv", &store.churn_flags(run_id)?)?;
        out.table("user_event_summary.csv", &store.event_summary(run_id)?)?;
        out.table("support_summary.csv", &store.support_summary(run_id)?)?;
        out.table("user_segments.csv", &store.user_segments(run_id)?)?;

        let cleaning_log = store.cleaning_log(run_id)?;
        let checks = store.validation_checks(run_id)?;
        let offenders = store.mrr_offenders(run_id)?;
        out.table("cleaning_log.csv", &cleaning_log)?;
        out.table("validation_checks.csv", &checks)?;
        out.table("mrr_offenders.csv", &offenders)?;

        if ctx.config.export.include_cleaned_tables {
            let data = store.load_clean_dataset(run_id)?;
            out.table("cleaned/users.csv", &data.users)?;
            out.table("cleaned/subscriptions.csv", &data.subscriptions)?;
            out.table("cleaned/events.csv", &data.events)?;
            out.table("cleaned/support_nps.csv", &data.tickets)?;
        }
        if ctx.config.export.include_raw_tables {
            let raw = store.load_raw_dataset(run_id)?;
            let raw_dir = self.out_dir.join("raw");
            write_raw_dataset(&raw_dir, &raw)?;
            out.record("raw/users.csv", &raw_dir.join(USERS_FILE), raw.users.len())?;
            out.record("raw/subscriptions.csv", &raw_dir.join(SUBSCRIPTIONS_FILE), raw.subscriptions.len())?;
            out.record("raw/events.csv", &raw_dir.join(EVENTS_FILE), raw.events.len())?;
            out.record("raw/support_nps.csv", &raw_dir.join(TICKETS_FILE), raw.tickets.len())?;
        }

        let report_path = self.out_dir.join(DQ_REPORT_FILE);
        fs::write(&report_path, render_dq_report(run_id, &checks, &offenders, &cleaning_log))?;
        out.record(DQ_REPORT_FILE, &report_path, checks.len())?;

        let manifest_path = self.out_dir.join(MANIFEST_FILE);
        write_csv(&manifest_path, &out.manifest)?;

        log::info!(
            "export: {} files written to {}",
            out.manifest.len() + 1,
            self.out_dir.display()
        );
        Ok(out.events)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Markdown summary of validation results and cleaning removals.
pub fn render_dq_report(
    run_id: &str,
    checks: &[ValidationCheck],
    offenders: &[MrrOffender],
    cleaning_log: &[CleaningLogRow],
) -> String {
    let failures = checks.iter().filter(|c| !c.passed).count();
    let mut md = String::new();
    let _ = writeln!(md, "# Data Quality Report");
    let _ = writeln!(md);
    let _ = writeln!(md, "Run `{run_id}`: {} checks, {failures} failures.", checks.len());
    let _ = writeln!(md);
    let _ = writeln!(md, "## Checks");
    let _ = writeln!(md);
    for c in checks {
        let status = if c.passed { "PASS" } else { "FAIL" };
        let _ = writeln!(md, "- **{}**: {status} - {}", c.name, c.detail);
    }

    let _ = writeln!(md);
    let _ = writeln!(md, "## MRR offenders");
    let _ = writeln!(md);
    if offenders.is_empty() {
        let _ = writeln!(md, "None. Every month reconciles.");
    } else {
        let _ = writeln!(md, "| month | diff | reason |");
        let _ = writeln!(md, "|---|---|---|");
        for o in offenders {
            let _ = writeln!(md, "| {} | {:e} | {} |", o.month, o.diff, o.reason);
        }
    }

    let _ = writeln!(md);
    let _ = writeln!(md, "## Cleaning");
    let _ = writeln!(md);
    let _ = writeln!(md, "| table | reason | before | after | removed |");
    let _ = writeln!(md, "|---|---|---|---|---|");
    for r in cleaning_log {
        let _ = writeln!(
            md,
            "| {} | {} | {} | {} | {} |",
            r.table, r.reason_code, r.row_count_before, r.row_count_after, r.rows_removed
        );
    }
    md
}
