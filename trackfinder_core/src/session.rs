//! Per-event result registry on top of a space-point source.

use std::collections::BTreeMap;

use tracing::{info, warn};
use trackfinder_env::{EventId, SpacePointSource, Subsystem};

use crate::assembler::{AcceptedTrack, Diagnostics, PipelineResult};
use crate::error::EventError;
use crate::merger::MergeStage;
use crate::pipeline::TrackFindingPipeline;
use crate::store::SpacePointStore;

/// Pulls events from a [`SpacePointSource`], runs the pipeline and keeps the
/// outcome of every processed event for later queries.
pub struct ReconstructionSession<S: SpacePointSource> {
    source: S,
    pipeline: TrackFindingPipeline,
    /// Subsystems merged into the accepted candidates, in stage order
    merge_subsystems: Vec<Subsystem>,
    results: BTreeMap<EventId, PipelineResult>,
    failures: BTreeMap<EventId, EventError>,
}

impl<S: SpacePointSource> ReconstructionSession<S> {
    pub fn new(source: S, pipeline: TrackFindingPipeline) -> Self {
        Self {
            source,
            pipeline,
            merge_subsystems: Vec::new(),
            results: BTreeMap::new(),
            failures: BTreeMap::new(),
        }
    }

    /// Extend accepted candidates with hits of these subsystems.
    pub fn with_merge_subsystems(mut self, subsystems: &[Subsystem]) -> Self {
        self.merge_subsystems = subsystems.to_vec();
        self
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    /// Process one event, replacing any earlier outcome for it.
    pub fn process(&mut self, event: EventId) -> Result<&Diagnostics, EventError> {
        self.results.remove(&event);
        self.failures.remove(&event);
        match self.run(event) {
            Ok(result) => {
                info!(
                    "Event {}: {} tracks ({} merged)",
                    event,
                    result.tracks.len(),
                    result.diagnostics.merged_count
                );
                Ok(&self.results.entry(event).or_insert(result).diagnostics)
            }
            Err(e) => {
                warn!("Event {} failed: {}", event, e);
                self.failures.insert(event, e.clone());
                Err(e)
            }
        }
    }

    /// Process every event the source knows, in id order. Returns the number that failed.
    pub fn process_all(&mut self) -> usize {
        self.source
            .events()
            .into_iter()
            .filter(|&event| self.process(event).is_err())
            .count()
    }

    fn run(&self, event: EventId) -> Result<PipelineResult, EventError> {
        let mut primary = Vec::new();
        for &subsystem in &self.pipeline.config().subsystems {
            primary.extend(self.source.get_space_points(event, subsystem)?);
        }
        let store = SpacePointStore::new(primary);

        let stores = self
            .merge_subsystems
            .iter()
            .map(|&subsystem| Ok(SpacePointStore::new(self.source.get_space_points(event, subsystem)?)))
            .collect::<Result<Vec<_>, EventError>>()?;
        let stages: Vec<MergeStage> = stores.iter().map(MergeStage::Hits).collect();

        self.pipeline.process_event_with_merge(&store, &stages)
    }

    pub fn get_accepted_candidates(&self, event: EventId) -> Option<&[AcceptedTrack]> {
        self.results.get(&event).map(|r| r.tracks.as_slice())
    }

    pub fn get_diagnostics(&self, event: EventId) -> Option<&Diagnostics> {
        self.results.get(&event).map(|r| &r.diagnostics)
    }

    pub fn result(&self, event: EventId) -> Option<&PipelineResult> {
        self.results.get(&event)
    }

    /// Why the event failed, if it did.
    pub fn failure(&self, event: EventId) -> Option<&EventError> {
        self.failures.get(&event)
    }

    /// Forget one event.
    pub fn clear(&mut self, event: EventId) {
        self.results.remove(&event);
        self.failures.remove(&event);
    }

    pub fn processed(&self) -> impl Iterator<Item = EventId> + '_ {
        self.results.keys().copied()
    }
}
