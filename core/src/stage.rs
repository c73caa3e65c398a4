//! Stage trait.
//!
//! RULE: Every pipeline step implements PipelineStage.
//! The engine calls run() on each registered stage exactly once,
//! in registration order. Execution order is fixed and documented in engine.rs.

use crate::{
    config::PipelineConfig,
    error::MetricsResult,
    event::PipelineEvent,
    rng::StageRng,
    store::MetricsStore,
};
use std::any::Any;

/// Everything a stage may read while it runs.
pub struct StageContext<'a> {
    pub run_id: &'a str,
    pub config: &'a PipelineConfig,
    pub store:  &'a MetricsStore,
}

/// The contract every stage must fulfill.
pub trait PipelineStage: Send {
    /// Unique stable name for this stage.
    fn name(&self) -> &'static str;

    /// Called once per run by the engine.
    ///
    /// - `ctx`: run id, configuration and the store
    /// - `rng`: this stage's deterministic RNG
    ///
    /// Returns the events to append to the run's event log.
    fn run(&mut self, ctx: &StageContext<'_>, rng: &mut StageRng) -> MetricsResult<Vec<PipelineEvent>>;

    /// For downcasting in tests and tooling only.
    fn as_any(&self) -> &dyn Any;
}
