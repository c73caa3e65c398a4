//! The pipeline engine.
//!
//! EXECUTION ORDER (fixed, documented, never reordered):
//!   1. Source      (synthetic generation OR CSV ingest)
//!   2. Cleaning
//!   3. Derivation  (bridge, cohorts, funnels, KPIs, user tables)
//!   4. Validation
//!   5. Export      (only when an output directory is configured)
//!
//! RULES:
//!   - Stages execute in registration order, exactly once per run.
//!   - Each stage reads ONLY what earlier stages persisted.
//!   - No stage calls another stage's functions directly.
//!   - All randomness flows through the RngBank.
//!   - Every emitted event is recorded in the event log.

use crate::{
    cleaning_stage::CleaningStage,
    config::PipelineConfig,
    derivation_stage::DerivationStage,
    error::{MetricsError, MetricsResult},
    event::{EventLogEntry, PipelineEvent},
    export_stage::ExportStage,
    generation_stage::GenerationStage,
    ingest_stage::IngestStage,
    rng::{RngBank, StageSlot},
    snapshot::RunSnapshot,
    stage::{PipelineStage, StageContext},
    store::MetricsStore,
    types::RunId,
    validation_stage::ValidationStage,
};
use std::path::PathBuf;

/// Where the raw tables come from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DataSource {
    Synthetic,
    CsvDir(PathBuf),
}

impl DataSource {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Synthetic => "synthetic",
            Self::CsvDir(_) => "csv",
        }
    }
}

pub struct PipelineEngine {
    pub run_id:   RunId,
    pub config:   PipelineConfig,
    pub rng_bank: RngBank,
    seed:         u64,
    stages:       Vec<(StageSlot, Box<dyn PipelineStage>)>,
    store:        MetricsStore,
    finished:     bool,
}

impl PipelineEngine {
    pub fn new(run_id: RunId, seed: u64, config: PipelineConfig, store: MetricsStore) -> Self {
        Self {
            rng_bank: RngBank::new(seed),
            seed,
            config,
            stages: Vec::new(),
            store,
            run_id,
            finished: false,
        }
    }

    /// Build a fully wired engine with every stage registered and the run recorded.
    /// The store must already be migrated.
    pub fn build(
        run_id: RunId,
        seed: u64,
        config: PipelineConfig,
        store: MetricsStore,
        source: DataSource,
    ) -> MetricsResult<Self> {
        store.insert_run(&run_id, seed, env!("CARGO_PKG_VERSION"), source.label())?;
        let export_dir = config.export.output_dir.clone();
        let mut engine = PipelineEngine::new(run_id, seed, config, store);

        // EXECUTION ORDER: fixed, never reordered.
        match source {
            DataSource::Synthetic => {
                engine.register(StageSlot::Source, Box::new(GenerationStage::new()));
            }
            DataSource::CsvDir(dir) => {
                engine.register(StageSlot::Source, Box::new(IngestStage::new(dir)));
            }
        }
        engine.register(StageSlot::Cleaning, Box::new(CleaningStage::new()));
        engine.register(StageSlot::Derivation, Box::new(DerivationStage::new()));
        engine.register(StageSlot::Validation, Box::new(ValidationStage::new()));
        if let Some(dir) = export_dir {
            engine.register(StageSlot::Export, Box::new(ExportStage::new(dir)));
        }
        Ok(engine)
    }

    /// In-memory, synthetic, `PipelineConfig::default_test()` engine.
    pub fn build_test(run_id: RunId, seed: u64) -> MetricsResult<Self> {
        Self::build_test_with(run_id, seed, PipelineConfig::default_test())
    }

    /// Like `build_test`, with a caller-adjusted configuration.
    pub fn build_test_with(run_id: RunId, seed: u64, config: PipelineConfig) -> MetricsResult<Self> {
        let store = MetricsStore::in_memory()?;
        store.migrate()?;
        Self::build(run_id, seed, config, store, DataSource::Synthetic)
    }

    /// Register a stage. Call in the documented execution order.
    pub fn register(&mut self, slot: StageSlot, stage: Box<dyn PipelineStage>) {
        self.stages.push((slot, stage));
    }

    pub fn seed(&self) -> u64 {
        self.seed
    }

    pub fn store(&self) -> &MetricsStore {
        &self.store
    }

    pub fn stage_names(&self) -> Vec<&'static str> {
        self.stages.iter().map(|(_, s)| s.name()).collect()
    }

    /// Look up a registered stage by name.
    pub fn stage(&self, name: &str) -> MetricsResult<&dyn PipelineStage> {
        self.stages
            .iter()
            .find(|(_, s)| s.name() == name)
            .map(|(_, s)| s.as_ref())
            .ok_or_else(|| MetricsError::StageNotFound { name: name.to_string() })
    }

    /// Execute every registered stage once, in order.
    pub fn run(&mut self) -> MetricsResult<RunSnapshot> {
        if !self.store.run_exists(&self.run_id)? {
            return Err(MetricsError::RunNotInitialized {
                run_id: self.run_id.clone(),
            });
        }
        if self.finished {
            return Err(anyhow::anyhow!("run '{}' has already been executed", self.run_id).into());
        }

        // Emit RunInitialized at stage index 0 so seed differences are observable.
        let init_event = PipelineEvent::RunInitialized {
            run_id: self.run_id.clone(),
            seed:   self.seed,
        };
        persist_events(&self.store, &self.run_id, 0, "engine", &[init_event])?;

        let mut snapshot = RunSnapshot {
            run_id:           self.run_id.clone(),
            seed:             self.seed,
            stage_index:      0,
            completed_stages: Vec::new(),
            row_counts:       self.store.row_counts(&self.run_id)?,
        };

        for (i, (slot, stage)) in self.stages.iter_mut().enumerate() {
            let stage_index = i as u32 + 1;
            let name = stage.name();
            let mut rng = self.rng_bank.for_stage(*slot);
            let ctx = StageContext {
                run_id: &self.run_id,
                config: &self.config,
                store:  &self.store,
            };

            log::debug!("stage {stage_index} ({name}) starting");
            let mut events = vec![PipelineEvent::StageStarted { stage: name.to_string() }];
            events.extend(stage.run(&ctx, &mut rng)?);
            events.push(PipelineEvent::StageCompleted { stage: name.to_string() });
            persist_events(&self.store, &self.run_id, stage_index, name, &events)?;

            snapshot.stage_index = stage_index;
            snapshot.completed_stages.push(name.to_string());
            snapshot.row_counts = self.store.row_counts(&self.run_id)?;
            let json = serde_json::to_string(&snapshot)?;
            self.store.save_snapshot(&self.run_id, stage_index, &json)?;
            log::debug!("Snapshot saved after stage {stage_index} ({name})");
        }

        self.finished = true;
        Ok(snapshot)
    }

    /// Every persisted event of this run, in emission order.
    pub fn event_log(&self) -> MetricsResult<Vec<EventLogEntry>> {
        self.store.events_for_run(&self.run_id)
    }

    /// Decoded events of this run, in emission order.
    pub fn events(&self) -> MetricsResult<Vec<PipelineEvent>> {
        self.event_log()?
            .iter()
            .map(|e| serde_json::from_str(&e.payload).map_err(Into::into))
            .collect()
    }
}

fn persist_events(
    store: &MetricsStore,
    run_id: &str,
    stage_index: u32,
    stage: &str,
    events: &[PipelineEvent],
) -> MetricsResult<()> {
    for event in events {
        let entry = EventLogEntry {
            id:          None,
            run_id:      run_id.to_string(),
            stage_index,
            stage:       stage.to_string(),
            event_type:  event.type_name().to_string(),
            payload:     serde_json::to_string(event)?,
        };
        store.append_event(&entry)?;
    }
    Ok(())
}
