//! Derivation stage: every analytics table computed from the cleaned ledger.

use crate::{
    cohort::{cohort_retention, CohortRetentionRow},
    config::PipelineConfig,
    error::MetricsResult,
    event::PipelineEvent,
    funnel::{funnel_stages, monthly_funnel, FunnelRow, FunnelStage},
    kpi::{monthly_kpis, MonthlyKpi},
    ledger::CleanDataset,
    mrr_bridge::{build_bridge, BridgeReport},
    rng::StageRng,
    segmentation::{segment_users, stage_counts, UserSegmentRow},
    stage::{PipelineStage, StageContext},
    user_tables::{
        churn_flags, support_summary, user_event_summary, user_master, ChurnFlagRow,
        SupportSummaryRow, UserEventSummaryRow, UserMasterRow,
    },
};
use std::any::Any;

/// All derived tables for one run.
#[derive(Debug, Clone, Default)]
pub struct DerivedTables {
    pub bridge:        BridgeReport,
    pub cohorts:       Vec<CohortRetentionRow>,
    pub funnel:        Vec<FunnelRow>,
    pub funnel_stages: Vec<FunnelStage>,
    pub kpis:          Vec<MonthlyKpi>,
    pub user_master:   Vec<UserMasterRow>,
    pub churn_flags:   Vec<ChurnFlagRow>,
    pub event_summary: Vec<UserEventSummaryRow>,
    pub support:       Vec<SupportSummaryRow>,
    pub segments:      Vec<UserSegmentRow>,
}

/// Compute every derived table. The ledger is fully materialized before the bridge runs.
pub fn derive_tables(data: &CleanDataset, config: &PipelineConfig) -> MetricsResult<DerivedTables> {
    let months = config.window.months()?;
    let bridge = build_bridge(&data.subscriptions, &months, config.bridge.settings())?;
    let kpis = monthly_kpis(&bridge.snapshots, &bridge.detail);
    let as_of = config.window.last_day();
    let master = user_master(&data.users, &data.subscriptions, &data.events, as_of);
    let segments = segment_users(
        &data.users,
        &data.events,
        &data.subscriptions,
        &bridge.detail,
        as_of,
        config.activation_window_days,
        &config.segmentation,
    );

    Ok(DerivedTables {
        cohorts:       cohort_retention(&data.users, &data.subscriptions, &months),
        funnel:        monthly_funnel(&data.users, &data.events, &data.subscriptions, &months),
        funnel_stages: funnel_stages(
            &data.users,
            &data.events,
            &data.subscriptions,
            config.activation_window_days,
        ),
        kpis,
        churn_flags:   churn_flags(&master),
        user_master:   master,
        event_summary: user_event_summary(&data.events),
        support:       support_summary(&data.tickets),
        segments,
        bridge,
    })
}

pub struct DerivationStage;

impl DerivationStage {
    pub fn new() -> Self {
        Self
    }
}

impl Default for DerivationStage {
    fn default() -> Self {
        Self::new()
    }
}

impl PipelineStage for DerivationStage {
    fn name(&self) -> &'static str {
        "derivation"
    }

    fn run(&mut self, ctx: &StageContext<'_>, _rng: &mut StageRng) -> MetricsResult<Vec<PipelineEvent>> {
        let data = ctx.store.load_clean_dataset(ctx.run_id)?;
        let tables = derive_tables(&data, ctx.config)?;

        let store = ctx.store;
        let run_id = ctx.run_id;
        store.insert_monthly_snapshots(run_id, &tables.bridge.snapshots)?;
        store.insert_bridge_lines(run_id, &tables.bridge.detail)?;
        store.insert_cohort_rows(run_id, &tables.cohorts)?;
        store.insert_funnel_rows(run_id, &tables.funnel)?;
        store.insert_funnel_stages(run_id, &tables.funnel_stages)?;
        store.insert_kpis(run_id, &tables.kpis)?;
        store.insert_user_master(run_id, &tables.user_master)?;
        store.insert_churn_flags(run_id, &tables.churn_flags)?;
        store.insert_event_summary(run_id, &tables.event_summary)?;
        store.insert_support_summary(run_id, &tables.support)?;
        store.insert_user_segments(run_id, &tables.segments)?;

        let tolerance = ctx.config.bridge.reconciliation_tolerance;
        let mut events = Vec::new();
        for snap in &tables.bridge.snapshots {
            events.push(PipelineEvent::MonthBridged {
                month:               snap.month,
                mrr_start:           snap.mrr_start,
                mrr_end:             snap.mrr_end,
                reconciliation_diff: snap.reconciliation_diff,
            });
            if !snap.reconciled {
                events.push(PipelineEvent::ReconciliationAnomaly {
                    month:               snap.month,
                    reconciliation_diff: snap.reconciliation_diff,
                    tolerance,
                });
            }
        }

        log::info!(
            "derivation: months={} final_mrr={:.2} anomalies={} cohort_rows={}",
            tables.bridge.snapshots.len(),
            tables.bridge.final_mrr(),
            tables.bridge.anomalies().count(),
            tables.cohorts.len(),
        );
        log::info!("derivation: journey stages {:?}", stage_counts(&tables.segments));
        events.push(PipelineEvent::DerivedTablesBuilt {
            months:       tables.bridge.snapshots.len(),
            bridge_lines: tables.bridge.detail.len(),
            cohort_rows:  tables.cohorts.len(),
        });
        Ok(events)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}
