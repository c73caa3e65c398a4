//! CSV reading and writing for raw inputs and exported tables.

use crate::{
    cleaning_stage::CleaningLogRow,
    cohort::CohortRetentionRow,
    error::MetricsResult,
    export_stage::ManifestRow,
    funnel::{FunnelRow, FunnelStage},
    kpi::MonthlyKpi,
    ledger::{
        ProductEvent, RawDataset, RawEvent, RawSubscription, RawTicket, RawUser, SubscriptionPeriod,
        SupportTicket, User,
    },
    mrr_bridge::{MonthlySnapshot, UserBridgeLine},
    segmentation::UserSegmentRow,
    user_tables::{ChurnFlagRow, SupportSummaryRow, UserEventSummaryRow, UserMasterRow},
    validation_stage::{MrrOffender, ValidationCheck},
};
use serde::{de::DeserializeOwned, Serialize};
use std::{fs, path::Path};

pub const USERS_FILE: &str = "users.csv";
pub const SUBSCRIPTIONS_FILE: &str = "subscriptions.csv";
pub const EVENTS_FILE: &str = "events.csv";
pub const TICKETS_FILE: &str = "support_nps.csv";

/// A row type written as a headed CSV table.
///
/// `COLUMNS` must list the serialized field names in declaration order.
/// The header is emitted from it when a table has no rows.
pub trait CsvTable: Serialize {
    const COLUMNS: &'static [&'static str];
}

macro_rules! csv_table {
    ($ty:ty => [$($col:literal),+ $(,)?]) => {
        impl CsvTable for $ty {
            const COLUMNS: &'static [&'static str] = &[$($col),+];
        }
    };
}

csv_table!(RawUser => [
    "user_id", "company_id", "signup_date", "country", "acquisition_channel", "initial_plan", "job_role",
]);
csv_table!(RawSubscription => [
    "subscription_id", "user_id", "plan_id", "start_date", "end_date", "amount", "status", "transaction_type",
]);
csv_table!(RawEvent => [
    "event_id", "user_id", "event_timestamp", "event_type", "session_id", "device",
]);
csv_table!(RawTicket => [
    "ticket_id", "user_id", "created_at", "resolved_at", "ticket_category", "nps_score", "nps_comment",
]);
csv_table!(User => [
    "user_id", "company_id", "signup_date", "country", "acquisition_channel", "initial_plan", "job_role",
]);
csv_table!(SubscriptionPeriod => [
    "subscription_id", "user_id", "plan_id", "start_date", "end_date", "amount", "status", "transaction_type",
]);
csv_table!(ProductEvent => [
    "event_id", "user_id", "event_timestamp", "event_type", "session_id", "device",
]);
csv_table!(SupportTicket => [
    "ticket_id", "user_id", "created_at", "resolved_at", "ticket_category", "nps_score", "nps_comment",
]);
csv_table!(MonthlySnapshot => [
    "month", "mrr_start", "mrr_end", "new_mrr", "expansion_mrr", "contraction_mrr", "churned_mrr",
    "active_paid_users", "arpu", "reconciliation_diff", "reconciled",
]);
csv_table!(UserBridgeLine => [
    "month", "user_id", "previous_mrr", "current_mrr", "delta", "bucket",
]);
csv_table!(CohortRetentionRow => [
    "cohort", "month", "month_offset", "active_users", "cohort_size", "retention_rate",
]);
csv_table!(FunnelRow => [
    "month", "signups", "activations", "paid_conversions", "activation_rate", "conversion_rate",
]);
csv_table!(FunnelStage => ["stage", "count", "conversion_rate", "drop_off_rate"]);
csv_table!(MonthlyKpi => [
    "month", "mrr", "arr", "arpu", "active_paid_users", "mrr_churn_rate", "net_revenue_retention",
    "gross_revenue_retention", "quick_ratio", "logo_churn_rate", "customer_lifetime_months", "ltv",
]);
csv_table!(UserMasterRow => [
    "user_id", "signup_date", "cohort_month", "country", "acquisition_channel", "current_status",
    "current_plan", "first_event_at", "churn_date", "is_churned", "lifetime_days",
]);
csv_table!(ChurnFlagRow => ["user_id", "churn_date", "churn_flag"]);
csv_table!(UserEventSummaryRow => ["user_id", "total_events", "first_event_at", "last_event_at"]);
csv_table!(SupportSummaryRow => ["month", "tickets_opened", "tickets_resolved", "avg_nps"]);
csv_table!(UserSegmentRow => [
    "user_id", "journey_stage", "lifecycle_segment", "revenue_tier", "final_bucket", "lifetime_revenue",
    "is_activated", "has_active_subscription", "days_since_signup", "days_since_last_seen",
]);
csv_table!(CleaningLogRow => ["table", "row_count_before", "row_count_after", "rows_removed", "reason_code"]);
csv_table!(ValidationCheck => ["name", "passed", "detail"]);
csv_table!(MrrOffender => ["month", "diff", "reason"]);
csv_table!(ManifestRow => ["file_name", "row_count", "schema_version", "sha256", "created_at"]);

/// Deserialize every record of a headed CSV file.
pub fn read_csv<T: DeserializeOwned>(path: &Path) -> MetricsResult<Vec<T>> {
    let mut rdr = csv::Reader::from_path(path)?;
    let mut out = Vec::new();
    for rec in rdr.deserialize() {
        out.push(rec?);
    }
    Ok(out)
}

/// Write `rows` with a header row, creating parent directories. Returns the row count.
/// An empty table still gets its header line.
pub fn write_csv<T: CsvTable>(path: &Path, rows: &[T]) -> MetricsResult<usize> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let mut wtr = csv::Writer::from_path(path)?;
    if rows.is_empty() {
        wtr.write_record(T::COLUMNS)?;
    }
    for row in rows {
        wtr.serialize(row)?;
    }
    wtr.flush()?;
    Ok(rows.len())
}

/// Load the four raw input files from `dir`.
/// A missing tickets file means no support data; the other three are required.
pub fn read_raw_dataset(dir: &Path) -> MetricsResult<RawDataset> {
    let tickets_path = dir.join(TICKETS_FILE);
    let tickets = if tickets_path.exists() {
        read_csv(&tickets_path)?
    } else {
        log::warn!("{} not found, continuing without support tickets", tickets_path.display());
        Vec::new()
    };
    Ok(RawDataset {
        users:         read_csv(&dir.join(USERS_FILE))?,
        subscriptions: read_csv(&dir.join(SUBSCRIPTIONS_FILE))?,
        events:        read_csv(&dir.join(EVENTS_FILE))?,
        tickets,
    })
}

/// Write the four raw tables into `dir` under their input file names.
pub fn write_raw_dataset(dir: &Path, raw: &RawDataset) -> MetricsResult<()> {
    write_csv(&dir.join(USERS_FILE), &raw.users)?;
    write_csv(&dir.join(SUBSCRIPTIONS_FILE), &raw.subscriptions)?;
    write_csv(&dir.join(EVENTS_FILE), &raw.events)?;
    write_csv(&dir.join(TICKETS_FILE), &raw.tickets)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::calendar::CalendarMonth;

    fn first_line(path: &Path) -> String {
        fs::read_to_string(path).unwrap().lines().next().unwrap_or_default().to_string()
    }

    /// Header serde emits for one record, for comparison against `COLUMNS`.
    fn serde_header<T: CsvTable>(row: &T) -> String {
        let mut wtr = csv::Writer::from_writer(Vec::new());
        wtr.serialize(row).unwrap();
        let bytes = wtr.into_inner().map_err(|e| e.into_error()).unwrap();
        String::from_utf8(bytes).unwrap().lines().next().unwrap().to_string()
    }

    #[test]
    fn empty_table_keeps_its_header() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("mrr_offenders.csv");
        assert_eq!(write_csv(&path, &Vec::<MrrOffender>::new()).unwrap(), 0);
        assert_eq!(first_line(&path), "month,diff,reason");
        assert!(read_csv::<MrrOffender>(&path).unwrap().is_empty());
    }

    #[test]
    fn declared_columns_match_serialized_header() {
        let month: CalendarMonth = "2024-03".parse().unwrap();
        let offender = MrrOffender { month, diff: 0.5, reason: "x".into() };
        assert_eq!(serde_header(&offender), MrrOffender::COLUMNS.join(","));

        let snapshot = MonthlySnapshot {
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
        assert_eq!(serde_header(&snapshot), MonthlySnapshot::COLUMNS.join(","));

        let raw = RawSubscription::default();
        assert_eq!(serde_header(&raw), RawSubscription::COLUMNS.join(","));
    }

    #[test]
    fn empty_raw_tickets_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        write_raw_dataset(dir.path(), &RawDataset::default()).unwrap();
        assert!(first_line(&dir.path().join(TICKETS_FILE)).starts_with("ticket_id,user_id"));
        let back = read_raw_dataset(dir.path()).unwrap();
        assert!(back.tickets.is_empty() && back.users.is_empty());
    }
}
