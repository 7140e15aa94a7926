//! Final per-event output: accepted tracks, fitter seeds, diagnostics.

use std::collections::HashSet;

use nalgebra::{Matrix6, Vector3, Vector6};
use serde::Serialize;
use trackfinder_env::{SpacePointId, Subsystem};

use crate::candidate::{CandidateId, HitRef, QualityRecord, TrackCandidate};
use crate::error::EventError;
use crate::merger::MergedTrajectory;
use crate::store::SpacePointStore;

/// Position and momentum variances of the fitter seed (cm², GeV²).
const SEED_VARIANCE: [f64; 6] = [0.01, 0.01, 0.04, 0.01, 0.01, 0.04];

/// One accepted track, either as found or after merging.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AcceptedTrack {
    Candidate(TrackCandidate),
    Merged(MergedTrajectory),
}

impl AcceptedTrack {
    pub fn quality(&self) -> &QualityRecord {
        match self {
            AcceptedTrack::Candidate(tc) => &tc.quality,
            AcceptedTrack::Merged(m) => &m.quality,
        }
    }

    /// The candidate this track grew from.
    pub fn source(&self) -> CandidateId {
        match self {
            AcceptedTrack::Candidate(tc) => tc.id,
            AcceptedTrack::Merged(m) => m.seed,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            AcceptedTrack::Candidate(tc) => tc.len(),
            AcceptedTrack::Merged(m) => m.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Hit ids inner → outer.
    pub fn hit_ids(&self) -> Vec<SpacePointId> {
        match self {
            AcceptedTrack::Candidate(tc) => tc.hits.clone(),
            AcceptedTrack::Merged(m) => m.hits().map(|h| h.id).collect(),
        }
    }

    /// Hit references; unmerged candidates look their subsystem up in `store`.
    pub fn hit_refs(&self, store: &SpacePointStore) -> Result<Vec<HitRef>, EventError> {
        match self {
            AcceptedTrack::Candidate(tc) => tc.hit_refs(store),
            AcceptedTrack::Merged(m) => Ok(m.hits().collect()),
        }
    }

    pub fn as_candidate(&self) -> Option<&TrackCandidate> {
        match self {
            AcceptedTrack::Candidate(tc) => Some(tc),
            AcceptedTrack::Merged(_) => None,
        }
    }
}

/// Counters describing one event.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Diagnostics {
    /// Candidates extracted from the automaton
    pub raw_count: usize,
    /// Candidates the quality estimator marked infeasible
    pub quality_rejected: usize,
    /// Feasible candidates lost to subset cleaning or conflict resolution
    pub conflict_rejected: usize,
    /// Valid participating points used by no accepted track
    pub orphaned_points: usize,
    /// Malformed points excluded by the store
    pub data_errors: usize,
    pub graph_nodes: usize,
    pub graph_edges: usize,
    pub ca_sweeps: usize,
    pub hopfield_rounds: usize,
    pub hopfield_converged: bool,
    pub greedy_repairs: usize,
    pub hopfield_fallbacks: usize,
    pub merged_count: usize,
    pub unmerged_seeds: usize,
}

impl Diagnostics {
    /// Add another event's counters (flags are and-ed).
    pub fn accumulate(&mut self, other: &Diagnostics) {
        self.raw_count += other.raw_count;
        self.quality_rejected += other.quality_rejected;
        self.conflict_rejected += other.conflict_rejected;
        self.orphaned_points += other.orphaned_points;
        self.data_errors += other.data_errors;
        self.graph_nodes += other.graph_nodes;
        self.graph_edges += other.graph_edges;
        self.ca_sweeps += other.ca_sweeps;
        self.hopfield_rounds += other.hopfield_rounds;
        self.hopfield_converged &= other.hopfield_converged;
        self.greedy_repairs += other.greedy_repairs;
        self.hopfield_fallbacks += other.hopfield_fallbacks;
        self.merged_count += other.merged_count;
        self.unmerged_seeds += other.unmerged_seeds;
    }
}

/// Representation handed to the downstream track fit.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TrajectoryCandidate {
    pub source: CandidateId,
    /// Inner → outer
    pub hits: Vec<HitRef>,
    /// (x, y, z, px, py, pz) at the innermost hit
    pub seed_state: Vector6<f64>,
    pub seed_covariance: Matrix6<f64>,
    pub charge: i8,
    pub quality: f64,
}

impl TrajectoryCandidate {
    pub fn position(&self) -> Vector3<f64> {
        self.seed_state.fixed_rows::<3>(0).into_owned()
    }

    pub fn momentum(&self) -> Vector3<f64> {
        self.seed_state.fixed_rows::<3>(3).into_owned()
    }
}

/// Everything one event produced.
#[derive(Debug, Clone, Default, Serialize)]
pub struct PipelineResult {
    pub tracks: Vec<AcceptedTrack>,
    pub trajectories: Vec<TrajectoryCandidate>,
    pub diagnostics: Diagnostics,
}

impl PipelineResult {
    /// True when no point belongs to two accepted tracks.
    pub fn is_conflict_free(&self) -> bool {
        let mut seen = HashSet::new();
        self.tracks
            .iter()
            .flat_map(|t| t.hit_ids())
            .all(|id| seen.insert(id))
    }
}

pub struct ResultAssembler<'s> {
    store: &'s SpacePointStore,
    subsystems: &'s [Subsystem],
}

impl<'s> ResultAssembler<'s> {
    /// `store` is the primary store; orphans are counted over its points of `subsystems`.
    pub fn new(store: &'s SpacePointStore, subsystems: &'s [Subsystem]) -> Self {
        Self { store, subsystems }
    }

    pub fn assemble(
        &self,
        tracks: Vec<AcceptedTrack>,
        mut diagnostics: Diagnostics,
    ) -> Result<PipelineResult, EventError> {
        let used: HashSet<SpacePointId> = tracks.iter().flat_map(|t| t.hit_ids()).collect();
        diagnostics.orphaned_points = self
            .store
            .points_of(self.subsystems)
            .filter(|p| !used.contains(&p.id))
            .count();
        diagnostics.data_errors = self.store.data_errors();

        let mut trajectories = Vec::with_capacity(tracks.len());
        for track in &tracks {
            if let Some(seed) = &track.quality().seed {
                let mut seed_state = Vector6::zeros();
                seed_state.fixed_rows_mut::<3>(0).copy_from(&seed.position);
                seed_state.fixed_rows_mut::<3>(3).copy_from(&seed.momentum);
                trajectories.push(TrajectoryCandidate {
                    source: track.source(),
                    hits: track.hit_refs(self.store)?,
                    seed_state,
                    seed_covariance: Matrix6::from_diagonal(&Vector6::from(SEED_VARIANCE)),
                    charge: seed.charge,
                    quality: track.quality().score,
                });
            }
        }

        Ok(PipelineResult {
            tracks,
            trajectories,
            diagnostics,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::candidate::HelixSeed;
    use approx::assert_relative_eq;
    use trackfinder_env::{LayerId, SensorId, SpacePoint};

    fn store() -> SpacePointStore {
        let mut points: Vec<SpacePoint> = (1..=5)
            .map(|i| {
                SpacePoint::new(
                    SpacePointId(i),
                    Vector3::new(f64::from(i), 0.0, 0.0),
                    0.01,
                    LayerId(i as u16),
                    SensorId(0),
                    Subsystem::Svd,
                )
            })
            .collect();
        points[4].position.x = f64::NAN;
        SpacePointStore::new(points)
    }

    fn track(hits: &[u32]) -> AcceptedTrack {
        let mut tc = TrackCandidate::new(CandidateId(2), hits.iter().map(|&h| SpacePointId(h)).collect());
        tc.quality.score = 0.7;
        tc.quality.seed = Some(HelixSeed {
            position: Vector3::new(1.0, 0.0, 0.0),
            momentum: Vector3::new(0.5, 0.1, 0.2),
            charge: 1,
            radius: 100.0,
        });
        AcceptedTrack::Candidate(tc)
    }

    #[test]
    fn test_orphans_and_data_errors() {
        let store = store();
        let subsystems = [Subsystem::Svd];
        let result = ResultAssembler::new(&store, &subsystems)
            .assemble(vec![track(&[1, 2, 3])], Diagnostics::default())
            .unwrap();
        assert_eq!(result.diagnostics.orphaned_points, 1);
        assert_eq!(result.diagnostics.data_errors, 1);
        assert!(result.is_conflict_free());
    }

    #[test]
    fn test_trajectory_candidate_seed() {
        let store = store();
        let subsystems = [Subsystem::Svd];
        let result = ResultAssembler::new(&store, &subsystems)
            .assemble(vec![track(&[1, 2, 3])], Diagnostics::default())
            .unwrap();
        let tc = &result.trajectories[0];
        assert_eq!(tc.source, CandidateId(2));
        assert_eq!(tc.hits.len(), 3);
        assert_eq!(tc.hits[0].subsystem, Subsystem::Svd);
        assert_relative_eq!(tc.momentum(), Vector3::new(0.5, 0.1, 0.2));
        assert_relative_eq!(tc.position().x, 1.0);
        assert_relative_eq!(tc.seed_covariance[(2, 2)], 0.04);
        assert_eq!(tc.charge, 1);
    }

    #[test]
    fn test_shared_hit_is_a_conflict() {
        let result = PipelineResult {
            tracks: vec![track(&[1, 2, 3]), track(&[3, 4])],
            ..PipelineResult::default()
        };
        assert!(!result.is_conflict_free());
    }

    #[test]
    fn test_accumulate() {
        let mut total = Diagnostics {
            hopfield_converged: true,
            ..Diagnostics::default()
        };
        let event = Diagnostics {
            raw_count: 4,
            orphaned_points: 2,
            hopfield_converged: false,
            ..Diagnostics::default()
        };
        total.accumulate(&event);
        total.accumulate(&event);
        assert_eq!(total.raw_count, 8);
        assert_eq!(total.orphaned_points, 4);
        assert!(!total.hopfield_converged);
    }
}
