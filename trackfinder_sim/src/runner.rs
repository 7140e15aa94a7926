//! Scenario runner - generates events, runs the track finder, scores the result.

use rayon::prelude::*;
use serde::Serialize;
use tracing::{debug, info, warn};
use trackfinder_core::{
    AcceptedTrack, Diagnostics, EventError, ExtractionMode, MergeDirection, MergeStage, PipelineConfig,
    PipelineResult, QualityStrategy, ReconstructionSession, SpacePointStore, TrackFindingPipeline,
};
use trackfinder_env::{LayerId, Subsystem};

use crate::detector::DetectorLayout;
use crate::exporter::SimExport;
use crate::oracle::{Oracle, SimEvent};
use crate::scenarios::ScenarioId;
use crate::truth::{purity, TruthRelationFilter, TruthScorer};

/// Minimum purity for a track to count as found.
pub const MATCH_PURITY: f64 = 0.66;

/// Results from running a scenario.
#[derive(Debug, Clone, Serialize)]
pub struct ScenarioResult {
    /// Scenario that was run
    pub scenario: ScenarioId,

    /// Seed used
    pub seed: u64,

    /// Whether scenario passed all assertions
    pub passed: bool,

    /// Failure message if any
    pub failure_reason: Option<String>,

    /// Metrics collected during run
    pub metrics: ScenarioMetrics,
}

/// Truth-matching counts summed over all events of a scenario.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ScenarioMetrics {
    /// Events processed without error
    pub events: usize,

    /// Events that ended in an [`EventError`]
    pub failed_events: usize,

    /// Particles with enough hits in the participating subsystems
    pub reconstructable: usize,

    /// Reconstructable particles matched by at least one track
    pub found: usize,

    /// Accepted tracks
    pub tracks: usize,

    /// Tracks below the match purity
    pub fakes: usize,

    /// Extra tracks matched to an already matched particle
    pub clones: usize,

    /// Pipeline counters
    pub diagnostics: Diagnostics,
}

impl ScenarioMetrics {
    pub fn efficiency(&self) -> f64 {
        if self.reconstructable == 0 {
            1.0
        } else {
            self.found as f64 / self.reconstructable as f64
        }
    }

    pub fn fake_rate(&self) -> f64 {
        if self.tracks == 0 {
            0.0
        } else {
            self.fakes as f64 / self.tracks as f64
        }
    }

    pub fn clone_rate(&self) -> f64 {
        if self.tracks == 0 {
            0.0
        } else {
            self.clones as f64 / self.tracks as f64
        }
    }

    fn record(&mut self, m: &EventMatch, diagnostics: &Diagnostics) {
        self.add_diagnostics(diagnostics);
        self.events += 1;
        self.reconstructable += m.reconstructable;
        self.found += m.found;
        self.tracks += m.tracks;
        self.fakes += m.fakes;
        self.clones += m.clones;
    }

    fn add_diagnostics(&mut self, diagnostics: &Diagnostics) {
        if self.events == 0 {
            self.diagnostics = diagnostics.clone();
        } else {
            self.diagnostics.accumulate(diagnostics);
        }
    }

    /// Fold another run's metrics into these.
    pub fn merge(&mut self, other: &ScenarioMetrics) {
        if other.events > 0 {
            self.add_diagnostics(&other.diagnostics);
        }
        self.events += other.events;
        self.failed_events += other.failed_events;
        self.reconstructable += other.reconstructable;
        self.found += other.found;
        self.tracks += other.tracks;
        self.fakes += other.fakes;
        self.clones += other.clones;
    }
}

/// Truth matching of one event.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EventMatch {
    pub reconstructable: usize,
    pub found: usize,
    pub tracks: usize,
    pub fakes: usize,
    pub clones: usize,
}

/// Match accepted tracks to particles by hit purity.
pub fn match_event(event: &SimEvent, result: &PipelineResult, subsystems: &[Subsystem], min_hits: usize) -> EventMatch {
    let mut matched = vec![0usize; event.particles.len()];
    let mut m = EventMatch {
        tracks: result.tracks.len(),
        ..EventMatch::default()
    };
    for track in &result.tracks {
        match purity(&event.truth, &track.hit_ids()) {
            Some((particle, p)) if p >= MATCH_PURITY => {
                if let Some(count) = matched.get_mut(particle as usize) {
                    *count += 1;
                }
            }
            _ => m.fakes += 1,
        }
    }
    for (particle, &count) in event.particles.iter().zip(&matched) {
        let hits = event
            .hits_of(particle.id)
            .iter()
            .filter(|p| subsystems.contains(&p.subsystem))
            .count();
        if hits >= min_hits {
            m.reconstructable += 1;
            if count > 0 {
                m.found += 1;
            }
        }
        m.clones += count.saturating_sub(1);
    }
    m
}

/// How relations and candidate quality are decided.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Selection {
    /// Geometric relations, circle-fit quality
    Geometric,
    /// Geometric relations, candidates scored by truth purity
    TruthScored,
    /// Truth relations, candidates scored by length
    TruthLinked,
}

/// Per-event wiring shared by all events of one run.
#[derive(Debug, Clone)]
pub struct EventSetup {
    /// Subsystems feeding the candidate graph
    pub subsystems: Vec<Subsystem>,
    /// Subsystems merged in afterwards, in stage order
    pub stages: Vec<Subsystem>,
    pub selection: Selection,
    /// Pull the event through a [`ReconstructionSession`] instead of a direct call
    pub via_session: bool,
}

type EventCheck = fn(&SimEvent, &PipelineResult) -> Result<(), String>;

/// One batch of events with its configuration and pass criteria.
struct Plan {
    label: &'static str,
    config: PipelineConfig,
    setup: EventSetup,
    events: Vec<SimEvent>,
    check: EventCheck,
    min_efficiency: f64,
    max_fake_rate: f64,
}

/// Runs track-finding scenarios.
pub struct ScenarioRunner {
    /// Configuration seed
    seed: u64,

    /// Events per scenario
    events: usize,

    /// Base configuration; scenarios override the knobs they depend on
    config: PipelineConfig,
}

impl ScenarioRunner {
    /// Creates a new scenario runner.
    pub fn new(seed: u64) -> Self {
        Self {
            seed,
            events: 1,
            config: PipelineConfig::default(),
        }
    }

    /// Sets the number of events per scenario.
    pub fn with_events(mut self, events: usize) -> Self {
        self.events = events.max(1);
        self
    }

    /// Sets the base configuration.
    pub fn with_config(mut self, config: PipelineConfig) -> Self {
        self.config = config;
        self
    }

    /// Runs a scenario and returns the result.
    pub fn run(&self, scenario: ScenarioId) -> ScenarioResult {
        self.execute(scenario, None)
    }

    /// Runs a scenario, recording every event into `export`.
    pub fn run_with_export(&self, scenario: ScenarioId, export: &mut SimExport) -> ScenarioResult {
        let result = self.execute(scenario, Some(export));
        export.finalize(result.passed, result.metrics.clone());
        result
    }

    /// Process events data-parallel; one result per event, in input order.
    pub fn run_batch(
        &self,
        pipeline: &TrackFindingPipeline,
        events: &[SimEvent],
        setup: &EventSetup,
    ) -> Vec<Result<PipelineResult, EventError>> {
        events.par_iter().map(|ev| process_one(pipeline, ev, setup)).collect()
    }

    fn execute(&self, scenario: ScenarioId, mut export: Option<&mut SimExport>) -> ScenarioResult {
        info!("Starting scenario: {} (seed={})", scenario.name(), self.seed);

        let mut metrics = ScenarioMetrics::default();
        let mut failures: Vec<String> = Vec::new();

        for plan in self.plans(scenario) {
            let pipeline = match TrackFindingPipeline::new(plan.config.clone()) {
                Ok(p) => p,
                Err(e) => {
                    failures.push(format!("{}: {}", plan.label, e));
                    continue;
                }
            };

            let outcomes = self.run_batch(&pipeline, &plan.events, &plan.setup);
            let mut run = ScenarioMetrics::default();
            for (ev, outcome) in plan.events.iter().zip(&outcomes) {
                match outcome {
                    Ok(result) => {
                        let m = match_event(ev, result, &plan.setup.subsystems, plan.config.min_hits_per_candidate);
                        run.record(&m, &result.diagnostics);
                        if !result.is_conflict_free() {
                            failures.push(format!("{} {}: accepted tracks share hits", plan.label, ev.event));
                        }
                        if let Err(reason) = (plan.check)(ev, result) {
                            failures.push(format!("{} {}: {}", plan.label, ev.event, reason));
                        }
                    }
                    Err(e) => {
                        warn!("{} {} failed: {}", plan.label, ev.event, e);
                        run.failed_events += 1;
                        failures.push(format!("{} {}: {}", plan.label, ev.event, e));
                    }
                }
                if let Some(export) = export.as_deref_mut() {
                    export.add_event(plan.label, ev, outcome);
                }
            }

            debug!(
                "  {}: {} events | eff {:.2} | fake {:.2} | clone {:.2}",
                plan.label,
                run.events,
                run.efficiency(),
                run.fake_rate(),
                run.clone_rate()
            );
            if run.efficiency() < plan.min_efficiency {
                failures.push(format!(
                    "{}: efficiency {:.2} below {:.2}",
                    plan.label,
                    run.efficiency(),
                    plan.min_efficiency
                ));
            }
            if run.fake_rate() > plan.max_fake_rate {
                failures.push(format!(
                    "{}: fake rate {:.2} above {:.2}",
                    plan.label,
                    run.fake_rate(),
                    plan.max_fake_rate
                ));
            }
            metrics.merge(&run);
        }

        let passed = failures.is_empty();
        ScenarioResult {
            scenario,
            seed: self.seed,
            passed,
            failure_reason: (!passed).then(|| failures.join("; ")),
            metrics,
        }
    }

    /// Seed of the oracle generating event `index`.
    fn event_seed(&self, index: usize) -> u64 {
        self.seed.wrapping_add(index as u64).wrapping_mul(0x9e3779b97f4a7c15)
    }

    fn generate(&self, layout: &DetectorLayout, mut populate: impl FnMut(&mut Oracle) -> SimEvent) -> Vec<SimEvent> {
        (0..self.events)
            .map(|i| populate(&mut Oracle::new(self.event_seed(i), layout.clone())))
            .collect()
    }

    fn config_for(&self, subsystems: &[Subsystem]) -> PipelineConfig {
        PipelineConfig {
            subsystems: subsystems.to_vec(),
            ..self.config.clone()
        }
    }

    fn plans(&self, scenario: ScenarioId) -> Vec<Plan> {
        match scenario {
            ScenarioId::SingleTrack => self.plan_single_track(),
            ScenarioId::SharedHit => self.plan_shared_hit(),
            ScenarioId::CorruptHit => self.plan_corrupt_hit(),
            ScenarioId::CrossSubsystem => self.plan_cross_subsystem(),
            ScenarioId::BusyEvent => self.plan_crowded("busy", 20, 0, Selection::Geometric),
            ScenarioId::NoisyEvent => self.plan_crowded("noisy", 5, 3, Selection::TruthScored),
            ScenarioId::BackwardForward => self.plan_backward_forward(),
        }
    }

    /// TF-001: one particle through five strip layers.
    fn plan_single_track(&self) -> Vec<Plan> {
        let events = self.generate(&DetectorLayout::uniform(5), |oracle| {
            oracle.spawn_random(1);
            oracle.generate_event()
        });
        vec![Plan {
            label: "single_track",
            config: self.config_for(&[Subsystem::Svd]),
            setup: EventSetup {
                subsystems: vec![Subsystem::Svd],
                stages: Vec::new(),
                selection: Selection::Geometric,
                via_session: false,
            },
            events,
            check: |_, result| {
                let lengths: Vec<usize> = result.tracks.iter().map(AcceptedTrack::len).collect();
                if lengths != [5] {
                    return Err(format!("expected one 5-hit track, got {:?}", lengths));
                }
                if result.diagnostics.orphaned_points != 0 {
                    return Err(format!("{} orphaned points", result.diagnostics.orphaned_points));
                }
                Ok(())
            },
            min_efficiency: 1.0,
            max_fake_rate: 0.0,
        }]
    }

    /// TF-002: two particles crossing on the outermost layer, the second one
    /// missing its innermost hit. Both candidates survive the quality stage;
    /// only the longer one may be accepted.
    fn plan_shared_hit(&self) -> Vec<Plan> {
        let layout = DetectorLayout::uniform(6);
        let outer = layout.layers[5].radius;
        let events = self.generate(&layout, |oracle| {
            let (pt, tan_lambda, phi0) = (0.5, 0.2, 0.7);
            let big_r = pt / (0.003 * oracle.b_field());
            let a = oracle.spawn_particle(pt, phi0, tan_lambda, 1);
            let b = oracle.spawn_particle(pt, phi0 - 2.0 * (outer / (2.0 * big_r)).asin(), tan_lambda, -1);
            let mut ev = oracle.generate_event();
            ev.drop_hit(b, LayerId(1));
            ev.share_hit(a, b, LayerId(6));
            ev
        });
        vec![Plan {
            label: "shared_hit",
            config: self.config_for(&[Subsystem::Svd]),
            setup: EventSetup {
                subsystems: vec![Subsystem::Svd],
                stages: Vec::new(),
                selection: Selection::TruthLinked,
                via_session: false,
            },
            events,
            check: |ev, result| {
                if result.diagnostics.raw_count != 2 {
                    return Err(format!("expected 2 raw candidates, got {}", result.diagnostics.raw_count));
                }
                if result.tracks.len() != 1 || result.diagnostics.conflict_rejected != 1 {
                    return Err(format!(
                        "{} tracks accepted, {} conflict-rejected",
                        result.tracks.len(),
                        result.diagnostics.conflict_rejected
                    ));
                }
                match purity(&ev.truth, &result.tracks[0].hit_ids()) {
                    Some((0, _)) => Ok(()),
                    other => Err(format!("kept the wrong candidate ({:?})", other)),
                }
            },
            min_efficiency: 0.5,
            max_fake_rate: 0.0,
        }]
    }

    /// TF-003: two particles on five layers plus one NaN hit, read through a session.
    fn plan_corrupt_hit(&self) -> Vec<Plan> {
        let events = self.generate(&DetectorLayout::uniform(5), |oracle| {
            oracle.spawn_particle(1.0, 0.0, 0.1, 1);
            oracle.spawn_particle(0.8, 2.5, -0.2, -1);
            oracle.set_corrupt_hits(1);
            oracle.generate_event()
        });
        vec![Plan {
            label: "corrupt_hit",
            config: self.config_for(&[Subsystem::Svd]),
            setup: EventSetup {
                subsystems: vec![Subsystem::Svd],
                stages: Vec::new(),
                selection: Selection::Geometric,
                via_session: true,
            },
            events,
            check: |ev, result| {
                if result.diagnostics.data_errors != 1 {
                    return Err(format!("{} data errors", result.diagnostics.data_errors));
                }
                let used = result
                    .tracks
                    .iter()
                    .flat_map(AcceptedTrack::hit_ids)
                    .any(|id| ev.corrupt.contains(&id));
                if used {
                    return Err("corrupt hit used by a track".to_string());
                }
                if result.tracks.len() != 2 {
                    return Err(format!("expected 2 tracks, got {}", result.tracks.len()));
                }
                Ok(())
            },
            min_efficiency: 1.0,
            max_fake_rate: 0.0,
        }]
    }

    /// TF-004: SVD seed merged backward into both PXD layers.
    fn plan_cross_subsystem(&self) -> Vec<Plan> {
        let events = self.generate(&DetectorLayout::belle_like(), |oracle| {
            oracle.spawn_random(1);
            oracle.generate_event()
        });
        vec![self.merge_plan("cross_subsystem", events, Subsystem::Pxd, MergeDirection::Backward, |_, result| {
            match result.tracks.as_slice() {
                [AcceptedTrack::Merged(m)] if m.len() == 6 => Ok(()),
                other => Err(format!(
                    "expected one merged 6-hit trajectory, got lengths {:?}",
                    other.iter().map(AcceptedTrack::len).collect::<Vec<_>>()
                )),
            }
        })]
    }

    /// TF-007: the same SVD seeds merged into PXD and into CDC.
    fn plan_backward_forward(&self) -> Vec<Plan> {
        let events = self.generate(&DetectorLayout::belle_like(), |oracle| {
            oracle.spawn_random(1);
            oracle.generate_event()
        });
        let backward = self.merge_plan(
            "backward",
            events.clone(),
            Subsystem::Pxd,
            MergeDirection::Backward,
            |_, result| added_hits(result, Subsystem::Pxd, |n| n == 2),
        );
        let forward = self.merge_plan(
            "forward",
            events,
            Subsystem::Cdc,
            MergeDirection::Forward,
            |_, result| added_hits(result, Subsystem::Cdc, |n| n >= 1),
        );
        vec![backward, forward]
    }

    fn merge_plan(
        &self,
        label: &'static str,
        events: Vec<SimEvent>,
        stage: Subsystem,
        direction: MergeDirection,
        check: EventCheck,
    ) -> Plan {
        let mut config = self.config_for(&[Subsystem::Svd]);
        config.merge.merge_direction = direction;
        Plan {
            label,
            config,
            setup: EventSetup {
                subsystems: vec![Subsystem::Svd],
                stages: vec![stage],
                selection: Selection::Geometric,
                via_session: false,
            },
            events,
            check,
            min_efficiency: 1.0,
            max_fake_rate: 0.0,
        }
    }

    /// TF-005 / TF-006: many particles in PXD+SVD, optionally with noise.
    ///
    /// Relations are restricted to a narrow azimuthal window and every
    /// path is extracted so that neighbouring tracks cannot steal each
    /// other's chain.
    fn plan_crowded(&self, label: &'static str, particles: usize, noise: usize, selection: Selection) -> Vec<Plan> {
        let events = self.generate(&DetectorLayout::belle_like(), |oracle| {
            oracle.spawn_random(particles);
            oracle.set_noise(noise);
            oracle.generate_event()
        });
        let subsystems = [Subsystem::Pxd, Subsystem::Svd];
        let mut config = self.config_for(&subsystems);
        config.relation.max_delta_phi = 0.06;
        config.extraction = ExtractionMode::AllPaths { max_paths_per_seed: 16 };
        vec![Plan {
            label,
            config,
            setup: EventSetup {
                subsystems: subsystems.to_vec(),
                stages: Vec::new(),
                selection,
                via_session: false,
            },
            events,
            check: |_, _| Ok(()),
            min_efficiency: 0.75,
            max_fake_rate: 0.25,
        }]
    }
}

/// The single track must be merged and gained an acceptable number of `subsystem` hits.
fn added_hits(result: &PipelineResult, subsystem: Subsystem, accept: fn(usize) -> bool) -> Result<(), String> {
    let [AcceptedTrack::Merged(m)] = result.tracks.as_slice() else {
        return Err(format!("expected one merged trajectory, got {} tracks", result.tracks.len()));
    };
    let svd = m.hits().filter(|h| h.subsystem == Subsystem::Svd).count();
    let added = m.hits().filter(|h| h.subsystem == subsystem).count();
    if svd != 4 || !accept(added) {
        return Err(format!("{} SVD and {} {} hits", svd, added, subsystem));
    }
    Ok(())
}

fn process_one(
    pipeline: &TrackFindingPipeline,
    ev: &SimEvent,
    setup: &EventSetup,
) -> Result<PipelineResult, EventError> {
    let quality = &pipeline.config().quality;
    let pipeline = match setup.selection {
        Selection::Geometric => pipeline.clone(),
        Selection::TruthScored => pipeline
            .clone()
            .with_quality_strategy(QualityStrategy::learned(quality, std::sync::Arc::new(TruthScorer::new(ev)))),
        Selection::TruthLinked => pipeline
            .clone()
            .with_relation_filter(TruthRelationFilter::new(ev))
            .with_quality_strategy(QualityStrategy::by_length(quality)),
    };

    if setup.via_session {
        let mut subsystems = setup.subsystems.clone();
        subsystems.extend_from_slice(&setup.stages);
        let mut session =
            ReconstructionSession::new(ev.source(&subsystems), pipeline).with_merge_subsystems(&setup.stages);
        session.process(ev.event)?;
        return Ok(session.result(ev.event).cloned().unwrap_or_default());
    }

    let store = ev.store(&setup.subsystems);
    let stage_stores: Vec<SpacePointStore> = setup.stages.iter().map(|&s| ev.store(&[s])).collect();
    let stages: Vec<MergeStage> = stage_stores.iter().map(MergeStage::Hits).collect();
    pipeline.process_event_with_merge(&store, &stages)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_single_track_passes() {
        let result = ScenarioRunner::new(42).with_events(3).run(ScenarioId::SingleTrack);
        assert!(result.passed, "{:?}", result.failure_reason);
        assert_eq!(result.metrics.events, 3);
        assert_eq!(result.metrics.found, 3);
    }

    #[test]
    fn test_shared_hit_keeps_longer_candidate() {
        let result = ScenarioRunner::new(42).run(ScenarioId::SharedHit);
        assert!(result.passed, "{:?}", result.failure_reason);
        assert_eq!(result.metrics.diagnostics.conflict_rejected, 1);
    }

    #[test]
    fn test_corrupt_hit_is_counted() {
        let result = ScenarioRunner::new(7).run(ScenarioId::CorruptHit);
        assert!(result.passed, "{:?}", result.failure_reason);
        assert_eq!(result.metrics.diagnostics.data_errors, 1);
    }

    #[test]
    fn test_cross_subsystem_merge() {
        let result = ScenarioRunner::new(42).with_events(2).run(ScenarioId::CrossSubsystem);
        assert!(result.passed, "{:?}", result.failure_reason);
        assert_eq!(result.metrics.diagnostics.merged_count, 2);
    }

    #[test]
    fn test_backward_and_forward_runs() {
        let result = ScenarioRunner::new(11).run(ScenarioId::BackwardForward);
        assert!(result.passed, "{:?}", result.failure_reason);
        assert_eq!(result.metrics.events, 2);
    }

    #[test]
    fn test_busy_event_is_deterministic() {
        let runner = ScenarioRunner::new(3).with_events(2);
        let a = runner.run(ScenarioId::BusyEvent);
        let b = runner.run(ScenarioId::BusyEvent);
        assert_eq!(a.metrics, b.metrics);
        assert_eq!(a.metrics.failed_events, 0);
    }

    #[test]
    fn test_invalid_config_fails_scenario() {
        let mut config = PipelineConfig::default();
        config.hopfield.hopfield_rounds = 0;
        let result = ScenarioRunner::new(1).with_config(config).run(ScenarioId::SingleTrack);
        assert!(!result.passed);
        assert!(result.failure_reason.is_some());
    }

    #[test]
    fn test_match_event_counts_fakes_and_clones() {
        let mut oracle = Oracle::new(9, DetectorLayout::uniform(4));
        oracle.spawn_particle(1.0, 0.0, 0.0, 1);
        oracle.spawn_particle(1.0, 2.0, 0.0, 1);
        let ev = oracle.generate_event();
        let ids = |p: u32| ev.hits_of(p).iter().map(|h| h.id).collect::<Vec<_>>();
        let candidate = |hits| AcceptedTrack::Candidate(trackfinder_core::TrackCandidate::new(trackfinder_core::CandidateId(0), hits));

        let mut mixed = ids(0)[..2].to_vec();
        mixed.extend_from_slice(&ids(1)[2..]);
        let result = PipelineResult {
            tracks: vec![candidate(ids(0)), candidate(ids(0)[1..].to_vec()), candidate(mixed)],
            ..PipelineResult::default()
        };
        let m = match_event(&ev, &result, &[Subsystem::Svd], 3);
        assert_eq!(
            m,
            EventMatch {
                reconstructable: 2,
                found: 1,
                tracks: 3,
                fakes: 1,
                clones: 1,
            }
        );
    }
}
