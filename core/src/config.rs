use crate::{
    calendar::CalendarMonth,
    error::MetricsResult,
    mrr_bridge::{BridgeSettings, OverlapPolicy},
    types::DEFAULT_RECONCILIATION_TOLERANCE,
};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

// ── Analysis window ────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AnalysisWindow {
    pub first_month: CalendarMonth,
    pub last_month:  CalendarMonth,
}

impl AnalysisWindow {
    pub fn months(&self) -> MetricsResult<Vec<CalendarMonth>> {
        CalendarMonth::range(self.first_month, self.last_month)
    }

    pub fn first_day(&self) -> NaiveDate {
        self.first_month.first_day()
    }

    pub fn last_day(&self) -> NaiveDate {
        self.last_month.last_day()
    }
}

// ── Bridge ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BridgeConfig {
    #[serde(default = "default_tolerance")]
    pub reconciliation_tolerance: f64,
    #[serde(default)]
    pub overlap_policy: OverlapPolicy,
}

fn default_tolerance() -> f64 {
    DEFAULT_RECONCILIATION_TOLERANCE
}

impl BridgeConfig {
    pub fn settings(&self) -> BridgeSettings {
        BridgeSettings {
            policy:    self.overlap_policy,
            tolerance: self.reconciliation_tolerance,
        }
    }
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            reconciliation_tolerance: DEFAULT_RECONCILIATION_TOLERANCE,
            overlap_policy:           OverlapPolicy::Sum,
        }
    }
}

// ── Plan catalog ───────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BillingPeriod {
    Monthly,
    Annual,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlanConfig {
    pub plan_id:        String,
    pub label:          String,
    pub billing_period: BillingPeriod,
    pub list_price:     f64,
    /// Relative likelihood a converting trial picks this plan.
    pub weight:         f64,
}

impl PlanConfig {
    /// Ledger amounts are always monthly-normalized.
    pub fn monthly_amount(&self) -> f64 {
        match self.billing_period {
            BillingPeriod::Monthly => self.list_price,
            BillingPeriod::Annual  => self.list_price / 12.0,
        }
    }

    pub fn term_days(&self) -> u64 {
        match self.billing_period {
            BillingPeriod::Monthly => 30,
            BillingPeriod::Annual  => 365,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
struct PlanCatalogFile {
    plans: Vec<PlanConfig>,
}

// ── Synthetic generation ───────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WeightedOption {
    pub value:  String,
    pub weight: f64,
}

impl WeightedOption {
    pub fn weights(options: &[WeightedOption]) -> Vec<f64> {
        options.iter().map(|o| o.weight).collect()
    }
}

/// Rates at which the generator deliberately emits rows cleaning must catch.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DirtyDataConfig {
    pub duplicate_user_rate:       f64,
    pub orphan_subscription_rate:  f64,
    pub negative_amount_rate:      f64,
    pub malformed_date_rate:       f64,
    pub out_of_window_event_rate:  f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationConfig {
    pub user_count:                     usize,
    /// One weight per calendar month of the window, in order.
    pub signup_month_weights:           Vec<f64>,
    pub countries:                      Vec<WeightedOption>,
    pub channels:                       Vec<WeightedOption>,
    /// Plans a user signs up on (`free`, `trial_*`).
    pub initial_plans:                  Vec<WeightedOption>,
    pub job_roles:                      Vec<WeightedOption>,
    pub trial_days:                     u64,
    pub base_conversion_rate:           f64,
    #[serde(default)]
    pub channel_conversion_adjustments: HashMap<String, f64>,
    pub renewal_churn_probability:      f64,
    /// Chance a renewal moves to a different paid plan.
    pub plan_change_probability:        f64,
    pub events_per_user_min:            i64,
    pub events_per_user_max:            i64,
    pub event_types:                    Vec<WeightedOption>,
    pub devices:                        Vec<WeightedOption>,
    pub ticket_probability_churned:     f64,
    pub ticket_probability_retained:    f64,
    pub ticket_categories:              Vec<WeightedOption>,
    #[serde(default)]
    pub dirty_data:                     DirtyDataConfig,
}

// ── Segmentation ───────────────────────────────────────────────────

/// Thresholds for journey stages and revenue tiers. Day counts are measured
/// back from the last day of the analysis window.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SegmentationConfig {
    /// Unactivated users younger than this are still being acquired.
    pub acquisition_days:  i64,
    /// Activated users seen within this many days are engaged, otherwise dormant.
    pub engagement_days:   i64,
    /// Lifetime billed amount at or above which a user is high tier.
    pub high_tier_revenue: f64,
}

impl Default for SegmentationConfig {
    fn default() -> Self {
        Self {
            acquisition_days:  14,
            engagement_days:   30,
            high_tier_revenue: 500.0,
        }
    }
}

// ── Validation / export ────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationConfig {
    /// Allowed rise in mean retention between consecutive offsets.
    pub retention_noise_allowance: f64,
    /// Month-over-month signup change treated as an anomaly.
    pub signup_jump_threshold:     f64,
}

impl Default for ValidationConfig {
    fn default() -> Self {
        Self {
            retention_noise_allowance: 0.05,
            signup_jump_threshold:     0.5,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExportConfig {
    /// No export stage is registered when unset.
    pub output_dir:             Option<String>,
    #[serde(default)]
    pub include_cleaned_tables: bool,
    /// Also write the raw tables in the ingest layout under `raw/`.
    #[serde(default)]
    pub include_raw_tables:     bool,
}

// ── Top level ──────────────────────────────────────────────────────

/// Upper bound accepted for any day-count setting.
pub const MAX_WINDOW_DAYS: i64 = 3650;

#[derive(Debug, Clone, Deserialize)]
struct PipelineFile {
    window:                 AnalysisWindow,
    #[serde(default)]
    bridge:                 BridgeConfig,
    generation:             GenerationConfig,
    #[serde(default)]
    validation:             ValidationConfig,
    #[serde(default)]
    segmentation:           SegmentationConfig,
    activation_window_days: i64,
    #[serde(default)]
    export:                 ExportConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    pub window:                 AnalysisWindow,
    pub bridge:                 BridgeConfig,
    pub generation:             GenerationConfig,
    pub plans:                  Vec<PlanConfig>,
    pub validation:             ValidationConfig,
    pub segmentation:           SegmentationConfig,
    pub activation_window_days: i64,
    pub export:                 ExportConfig,
}

impl PipelineConfig {
    /// Load from the data/ directory.
    /// In tests, use PipelineConfig::default_test().
    pub fn load(data_dir: &str) -> anyhow::Result<Self> {
        let path = format!("{data_dir}/pipeline.json");
        let content = std::fs::read_to_string(&path)
            .map_err(|e| anyhow::anyhow!("Cannot read {path}: {e}"))?;
        let file: PipelineFile = serde_json::from_str(&content)
            .map_err(|e| anyhow::anyhow!("Cannot parse {path}: {e}"))?;

        let plan_path = format!("{data_dir}/plans/plan_catalog.json");
        let plan_content = std::fs::read_to_string(&plan_path)
            .map_err(|e| anyhow::anyhow!("Cannot read {plan_path}: {e}"))?;
        let plan_file: PlanCatalogFile = serde_json::from_str(&plan_content)
            .map_err(|e| anyhow::anyhow!("Cannot parse {plan_path}: {e}"))?;

        if file.window.last_month < file.window.first_month {
            anyhow::bail!(
                "window.last_month {} precedes window.first_month {}",
                file.window.last_month,
                file.window.first_month
            );
        }
        if plan_file.plans.is_empty() {
            anyhow::bail!("{plan_path} defines no plans");
        }
        if !(0..=MAX_WINDOW_DAYS).contains(&file.activation_window_days) {
            anyhow::bail!(
                "activation_window_days {} is outside 0..={MAX_WINDOW_DAYS}",
                file.activation_window_days
            );
        }
        let seg = &file.segmentation;
        if !(0..=MAX_WINDOW_DAYS).contains(&seg.acquisition_days)
            || !(0..=MAX_WINDOW_DAYS).contains(&seg.engagement_days)
        {
            anyhow::bail!("segmentation day thresholds must be within 0..={MAX_WINDOW_DAYS}");
        }

        Ok(Self {
            window:                 file.window,
            bridge:                 file.bridge,
            generation:             file.generation,
            plans:                  plan_file.plans,
            validation:             file.validation,
            segmentation:           file.segmentation,
            activation_window_days: file.activation_window_days,
            export:                 file.export,
        })
    }

    /// Small, clean, fully in-code configuration for tests.
    pub fn default_test() -> Self {
        let opt = |value: &str, weight: f64| WeightedOption { value: value.into(), weight };

        let window = AnalysisWindow {
            first_month: CalendarMonth::new(2024, 1).expect("valid month"),
            last_month:  CalendarMonth::new(2024, 12).expect("valid month"),
        };

        let plans = vec![
            PlanConfig {
                plan_id:        "basic_monthly".into(),
                label:          "Basic (monthly)".into(),
                billing_period: BillingPeriod::Monthly,
                list_price:     29.0,
                weight:         0.4,
            },
            PlanConfig {
                plan_id:        "pro_monthly".into(),
                label:          "Pro (monthly)".into(),
                billing_period: BillingPeriod::Monthly,
                list_price:     99.0,
                weight:         0.3,
            },
            PlanConfig {
                plan_id:        "basic_annual".into(),
                label:          "Basic (annual)".into(),
                billing_period: BillingPeriod::Annual,
                list_price:     290.0,
                weight:         0.2,
            },
            PlanConfig {
                plan_id:        "pro_annual".into(),
                label:          "Pro (annual)".into(),
                billing_period: BillingPeriod::Annual,
                list_price:     990.0,
                weight:         0.1,
            },
        ];

        let generation = GenerationConfig {
            user_count:           300,
            signup_month_weights: vec![1.2, 1.1, 1.1, 1.0, 0.9, 0.8, 0.8, 0.9, 1.0, 1.1, 1.2, 0.9],
            countries: vec![
                opt("US", 1.0), opt("UK", 1.0), opt("DE", 1.0),
                opt("FR", 1.0), opt("ES", 1.0), opt("IN", 1.0),
            ],
            channels: vec![
                opt("Organic", 1.0), opt("Paid_Search", 1.0), opt("Referral", 1.0),
                opt("Social", 1.0), opt("Direct", 1.0), opt("Email", 1.0),
            ],
            initial_plans: vec![opt("Free", 0.2), opt("Trial_Basic", 0.4), opt("Trial_Pro", 0.4)],
            job_roles: vec![opt("Admin", 0.2), opt("Member", 0.5), opt("Viewer", 0.3)],
            trial_days: 14,
            base_conversion_rate: 0.35,
            channel_conversion_adjustments: HashMap::from([
                ("paid_search".to_string(), 0.10),
                ("social".to_string(), -0.05),
            ]),
            renewal_churn_probability: 0.15,
            plan_change_probability:   0.20,
            events_per_user_min: 2,
            events_per_user_max: 8,
            event_types: vec![
                opt("login", 0.30), opt("dashboard_view", 0.25), opt("report_create", 0.15),
                opt("report_export", 0.10), opt("invite_user", 0.05), opt("api_call", 0.15),
            ],
            devices: vec![opt("Desktop", 0.7), opt("Mobile", 0.2), opt("Tablet", 0.1)],
            ticket_probability_churned:  0.3,
            ticket_probability_retained: 0.1,
            ticket_categories: vec![
                opt("Billing", 1.0), opt("Technical", 1.0), opt("Feature_Req", 1.0), opt("Access", 1.0),
            ],
            dirty_data: DirtyDataConfig::default(),
        };

        Self {
            window,
            bridge: BridgeConfig::default(),
            generation,
            plans,
            validation: ValidationConfig::default(),
            segmentation: SegmentationConfig::default(),
            activation_window_days: 14,
            export: ExportConfig::default(),
        }
    }
}
