//! CSV ingest: the alternative source stage for real exports.

use crate::{
    csv_io::read_raw_dataset,
    error::MetricsResult,
    event::PipelineEvent,
    rng::StageRng,
    stage::{PipelineStage, StageContext},
};
use std::{any::Any, path::PathBuf};

pub struct IngestStage {
    input_dir: PathBuf,
}

impl IngestStage {
    pub fn new(input_dir: impl Into<PathBuf>) -> Self {
        Self {
            input_dir: input_dir.into(),
        }
    }
}

impl PipelineStage for IngestStage {
    fn name(&self) -> &'static str {
        "ingest"
    }

    fn run(&mut self, ctx: &StageContext<'_>, _rng: &mut StageRng) -> MetricsResult<Vec<PipelineEvent>> {
        let raw = read_raw_dataset(&self.input_dir)?;
        ctx.store.insert_raw_dataset(ctx.run_id, &raw)?;

        log::info!(
            "ingest: {} users, {} subscriptions, {} events, {} tickets from {}",
            raw.users.len(),
            raw.subscriptions.len(),
            raw.events.len(),
            raw.tickets.len(),
            self.input_dir.display(),
        );

        Ok(vec![PipelineEvent::RawDataLoaded {
            source_dir:    self.input_dir.display().to_string(),
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
