//! One event, end to end.
//!
//! ```text
//! store ─► graph ─► automaton ─► candidates ─► quality ─► conflicts ─► selection ─► merge ─► result
//! ```
//!
//! Every intermediate lives on the stack of [`TrackFindingPipeline::process_event_with`];
//! an error or cancellation simply drops it.

use std::sync::Arc;

use tracing::debug;

use crate::assembler::{AcceptedTrack, Diagnostics, PipelineResult, ResultAssembler};
use crate::candidate::{CandidateId, TrackCandidate};
use crate::cellomat::{extract_paths, CellularAutomaton};
use crate::config::PipelineConfig;
use crate::conflict::{remove_subsets, ConflictGraph};
use crate::error::{ConfigError, EventError, PipelineError};
use crate::graph::CandidateGraph;
use crate::hopfield::{HopfieldSelector, Neuron};
use crate::interrupt::{checkpoint, Interrupt, Never};
use crate::merger::{CkfMerger, MergeStage};
use crate::quality::{QualityEstimator, QualityStrategy};
use crate::relation::{RelationFilter, RelationStrategy};
use crate::store::SpacePointStore;

/// Configured track finder. Holds no per-event state and can be shared
/// between worker threads.
#[derive(Clone)]
pub struct TrackFindingPipeline {
    config: PipelineConfig,
    relation: Arc<dyn RelationFilter>,
    quality: QualityStrategy,
}

impl std::fmt::Debug for TrackFindingPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TrackFindingPipeline")
            .field("relation", &self.relation.name())
            .field("quality", &self.quality)
            .finish_non_exhaustive()
    }
}

impl TrackFindingPipeline {
    /// Validate `config` and set up the geometric filter and circle-fit estimator.
    pub fn new(config: PipelineConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            relation: Arc::new(RelationStrategy::geometric(&config.relation)),
            quality: QualityStrategy::circle_fit(&config.quality),
            config,
        })
    }

    /// Replace the relation filter.
    pub fn with_relation_filter<F: RelationFilter + 'static>(mut self, filter: F) -> Self {
        self.relation = Arc::new(filter);
        self
    }

    /// Replace the quality strategy.
    pub fn with_quality_strategy(mut self, quality: QualityStrategy) -> Self {
        self.quality = quality;
        self
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn process_event(&self, store: &SpacePointStore) -> Result<PipelineResult, EventError> {
        self.process_event_with(store, &[], &Never)
    }

    /// Process an event and extend the accepted candidates through `stages`.
    pub fn process_event_with_merge(
        &self,
        store: &SpacePointStore,
        stages: &[MergeStage],
    ) -> Result<PipelineResult, EventError> {
        self.process_event_with(store, stages, &Never)
    }

    pub fn process_event_with(
        &self,
        store: &SpacePointStore,
        stages: &[MergeStage],
        interrupt: &dyn Interrupt,
    ) -> Result<PipelineResult, EventError> {
        let config = &self.config;
        let mut diagnostics = Diagnostics::default();

        // 1. Segment network
        let graph = CandidateGraph::build(store, self.relation.as_ref(), config, interrupt)?;
        diagnostics.graph_nodes = graph.node_count();
        diagnostics.graph_edges = graph.edge_count();

        // 2. Cellular automaton + extraction
        let ca = CellularAutomaton::new(&graph, config.max_layer_count).run(interrupt)?;
        diagnostics.ca_sweeps = ca.sweeps;
        let paths = extract_paths(&graph, &ca.state, config.min_hits_per_candidate, config.extraction);
        diagnostics.raw_count = paths.len();

        let mut candidates = Vec::with_capacity(paths.len());
        for (i, path) in paths.iter().enumerate() {
            let hits = path.iter().map(|&node| graph.point(node)).collect();
            let tc = TrackCandidate::new(CandidateId(i as u32), hits);
            tc.validate(store)?;
            candidates.push(tc);
        }

        // 3. Quality
        for tc in &mut candidates {
            let points = store.resolve(&tc.hits)?;
            tc.quality = self.quality.estimate(&points);
        }
        let (feasible, infeasible): (Vec<TrackCandidate>, Vec<TrackCandidate>) =
            candidates.into_iter().partition(|tc| tc.quality.feasible);
        diagnostics.quality_rejected = infeasible.len();
        checkpoint(interrupt, "quality")?;

        // 4. Subset cleaning
        let overlap_weighting = config.hopfield.overlap_weighting;
        let mut alive = vec![true; feasible.len()];
        let mut subsets = 0;
        if config.hopfield.prune_subsets {
            let overlaps = ConflictGraph::build(&feasible, overlap_weighting)?;
            subsets = remove_subsets(&feasible, &overlaps, &mut alive);
        }
        let survivors: Vec<TrackCandidate> = feasible
            .into_iter()
            .zip(alive)
            .filter_map(|(tc, keep)| keep.then_some(tc))
            .collect();

        // 5. Conflict resolution
        let conflicts = ConflictGraph::build(&survivors, overlap_weighting)?;
        let neurons: Vec<Neuron> = survivors
            .iter()
            .map(|tc| Neuron {
                quality: tc.quality.score,
                id: tc.id,
            })
            .collect();
        let selection = HopfieldSelector::new(&config.hopfield).select(&neurons, &conflicts, interrupt)?;
        diagnostics.hopfield_rounds = selection.rounds;
        diagnostics.hopfield_converged = selection.converged;
        diagnostics.greedy_repairs = selection.repairs;
        diagnostics.hopfield_fallbacks = selection.fallbacks;

        let total = survivors.len();
        let accepted: Vec<TrackCandidate> = survivors
            .into_iter()
            .zip(&selection.accepted)
            .filter_map(|(tc, &on)| on.then_some(tc))
            .collect();
        diagnostics.conflict_rejected = subsets + (total - accepted.len());

        // 6. Merge
        let tracks = if stages.is_empty() {
            accepted.into_iter().map(AcceptedTrack::Candidate).collect()
        } else {
            let merger = CkfMerger::new(config, self.relation.as_ref(), &self.quality);
            let outcome = merger.merge(&accepted, store, stages)?;
            diagnostics.merged_count = outcome.merged;
            diagnostics.unmerged_seeds = outcome.unmerged;
            outcome.tracks
        };

        // 7. Assemble
        let result = ResultAssembler::new(store, &config.subsystems).assemble(tracks, diagnostics)?;
        let d = &result.diagnostics;
        debug!(
            "Event done: {} nodes, {} edges, {} raw, {} quality-rejected, {} conflict-rejected, {} accepted, {} orphaned",
            d.graph_nodes,
            d.graph_edges,
            d.raw_count,
            d.quality_rejected,
            d.conflict_rejected,
            result.tracks.len(),
            d.orphaned_points
        );
        Ok(result)
    }
}

/// One-shot entry point: validate `config` and process a single event.
pub fn process_event(store: &SpacePointStore, config: &PipelineConfig) -> Result<PipelineResult, PipelineError> {
    let pipeline = TrackFindingPipeline::new(config.clone())?;
    Ok(pipeline.process_event(store)?)
}
