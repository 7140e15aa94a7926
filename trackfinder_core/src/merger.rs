//! Cross-subsystem merging of accepted candidates.
//!
//! Each accepted candidate seeds a bounded best-first search through the
//! layers of another subsystem, one layer at a time in the merge direction.
//! A search state either takes one hit close to the extrapolated helix or
//! skips the layer; only the best few extensions per state and the best few
//! states per layer survive. The helix is refitted after every added hit.

use std::cmp::Ordering;
use std::collections::{BTreeMap, HashSet};

use rayon::prelude::*;
use serde::Serialize;
use tracing::debug;
use trackfinder_env::{LayerId, SpacePoint, SpacePointId, Subsystem};

use crate::assembler::AcceptedTrack;
use crate::candidate::{CandidateId, HitRef, QualityRecord, TrackCandidate};
use crate::config::{MergeDirection, PipelineConfig};
use crate::error::EventError;
use crate::quality::{fit_track, QualityEstimator, TrackModel};
use crate::relation::{RelationContext, RelationFilter};
use crate::store::SpacePointStore;

/// What a seed may be extended with.
#[derive(Debug, Clone, Copy)]
pub enum MergeStage<'a> {
    /// Individual hits of another subsystem
    Hits(&'a SpacePointStore),
    /// Whole accepted candidates of another subsystem
    Candidates {
        store: &'a SpacePointStore,
        candidates: &'a [TrackCandidate],
    },
}

/// Consecutive hits of one subsystem inside a merged trajectory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TrajectorySegment {
    pub subsystem: Subsystem,
    pub hits: Vec<SpacePointId>,
}

/// A seed candidate extended into at least one other subsystem.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MergedTrajectory {
    pub seed: CandidateId,
    pub direction: MergeDirection,
    /// Inner → outer
    pub segments: Vec<TrajectorySegment>,
    /// Normalised extrapolation residual of each added hit, in the order added
    pub residuals: Vec<f64>,
    /// Re-estimated over all hits
    pub quality: QualityRecord,
}

impl MergedTrajectory {
    /// All hits inner → outer.
    pub fn hits(&self) -> impl Iterator<Item = HitRef> + '_ {
        self.segments.iter().flat_map(|s| {
            s.hits.iter().map(move |&id| HitRef {
                subsystem: s.subsystem,
                id,
            })
        })
    }

    pub fn len(&self) -> usize {
        self.segments.iter().map(|s| s.hits.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn added_hits(&self) -> usize {
        self.residuals.len()
    }
}

/// Merger output, one track per seed in seed order.
#[derive(Debug, Clone)]
pub struct MergeOutcome {
    pub tracks: Vec<AcceptedTrack>,
    pub merged: usize,
    pub unmerged: usize,
}

// ============================================================================
// SEARCH STATE
// ============================================================================

#[derive(Debug, Clone)]
struct SearchState<'a> {
    /// Inner → outer
    points: Vec<&'a SpacePoint>,
    residuals: Vec<f64>,
    added: Vec<SpacePointId>,
    score: f64,
    residual_sum: f64,
    holes: usize,
    model: TrackModel,
}

impl<'a> SearchState<'a> {
    fn end(&self, direction: MergeDirection) -> &'a SpacePoint {
        match direction {
            MergeDirection::Backward => self.points[0],
            MergeDirection::Forward => self.points[self.points.len() - 1],
        }
    }

    fn last_added(&self) -> Option<SpacePointId> {
        self.added.last().copied()
    }

    fn absorb(&mut self, new: &[&'a SpacePoint], residuals: &[f64], direction: MergeDirection, use_helix: bool) {
        match direction {
            MergeDirection::Backward => {
                let mut points = new.to_vec();
                points.extend_from_slice(&self.points);
                self.points = points;
            }
            MergeDirection::Forward => self.points.extend_from_slice(new),
        }
        self.added.extend(new.iter().map(|p| p.id));
        self.residuals.extend_from_slice(residuals);
        self.residual_sum += residuals.iter().sum::<f64>();
        self.holes = 0;
        if let Some(fit) = fit_track(&self.points, use_helix) {
            self.model = fit.model;
        }
    }
}

/// Best state first.
fn compare_states(a: &SearchState, b: &SearchState) -> Ordering {
    b.score
        .total_cmp(&a.score)
        .then(a.residual_sum.total_cmp(&b.residual_sum))
        .then(a.last_added().cmp(&b.last_added()))
        .then(a.holes.cmp(&b.holes))
}

#[derive(Debug, Clone, Copy)]
struct Extension<'a> {
    point: &'a SpacePoint,
    score: f64,
    residual: f64,
}

/// Best extension first.
fn compare_extensions(a: &Extension, b: &Extension) -> Ordering {
    b.score
        .total_cmp(&a.score)
        .then(a.residual.total_cmp(&b.residual))
        .then(a.point.id.cmp(&b.point.id))
}

// ============================================================================
// MERGER
// ============================================================================

pub struct CkfMerger<'p> {
    config: &'p PipelineConfig,
    filter: &'p dyn RelationFilter,
    estimator: &'p dyn QualityEstimator,
}

impl<'p> CkfMerger<'p> {
    pub fn new(
        config: &'p PipelineConfig,
        filter: &'p dyn RelationFilter,
        estimator: &'p dyn QualityEstimator,
    ) -> Self {
        Self {
            config,
            filter,
            estimator,
        }
    }

    fn direction(&self) -> MergeDirection {
        self.config.merge.merge_direction
    }

    fn context(&self) -> RelationContext {
        let holes = u16::try_from(self.config.merge.max_holes).unwrap_or(u16::MAX);
        RelationContext::new(self.config.relation.jump_size.saturating_add(holes))
    }

    /// Extend every seed through the stages in order.
    pub fn merge(
        &self,
        seeds: &[TrackCandidate],
        seed_store: &SpacePointStore,
        stages: &[MergeStage],
    ) -> Result<MergeOutcome, EventError> {
        let use_helix = self.config.quality.use_helix;
        let mut states: Vec<Option<SearchState>> = Vec::with_capacity(seeds.len());
        for seed in seeds {
            let points = seed_store.resolve(&seed.hits)?;
            states.push(fit_track(&points, use_helix).map(|fit| SearchState {
                points,
                residuals: Vec::new(),
                added: Vec::new(),
                score: 0.0,
                residual_sum: 0.0,
                holes: 0,
                model: fit.model,
            }));
        }

        for stage in stages {
            match *stage {
                MergeStage::Hits(store) => self.hit_stage(&mut states, store),
                MergeStage::Candidates { store, candidates } => {
                    self.candidate_stage(&mut states, store, candidates)?
                }
            }
        }

        let mut merged = 0;
        let mut tracks = Vec::with_capacity(seeds.len());
        for (seed, state) in seeds.iter().zip(states) {
            match state {
                Some(state) if !state.added.is_empty() => {
                    merged += 1;
                    tracks.push(AcceptedTrack::Merged(MergedTrajectory {
                        seed: seed.id,
                        direction: self.direction(),
                        segments: segments(&state.points),
                        quality: self.estimator.estimate(&state.points),
                        residuals: state.residuals,
                    }));
                }
                _ => tracks.push(AcceptedTrack::Candidate(seed.clone())),
            }
        }
        let unmerged = seeds.len() - merged;
        debug!("Merger ({}): {} merged, {} unmerged", self.direction(), merged, unmerged);

        Ok(MergeOutcome {
            tracks,
            merged,
            unmerged,
        })
    }

    // ------------------------------------------------------------------------
    // Hit stage
    // ------------------------------------------------------------------------

    fn hit_stage<'a>(&self, states: &mut [Option<SearchState<'a>>], store: &'a SpacePointStore) {
        let mut by_layer: BTreeMap<LayerId, Vec<&'a SpacePoint>> = BTreeMap::new();
        for p in store.points() {
            by_layer.entry(p.layer).or_default().push(p);
        }

        let finals: Vec<Vec<SearchState<'a>>> = states
            .par_iter()
            .map(|state| match state {
                Some(state) => self.search(state, &by_layer),
                None => Vec::new(),
            })
            .collect();

        // A hit goes to at most one seed: better best-final first.
        let mut order: Vec<usize> = (0..finals.len()).filter(|&i| !finals[i].is_empty()).collect();
        order.sort_by(|&a, &b| compare_states(&finals[a][0], &finals[b][0]).then(a.cmp(&b)));

        let mut claimed: HashSet<SpacePointId> = HashSet::new();
        for i in order {
            let Some(current) = states[i].as_ref() else {
                continue;
            };
            let before = current.added.len();
            let choice = finals[i]
                .iter()
                .find(|s| s.added[before..].iter().all(|id| !claimed.contains(id)));
            if let Some(choice) = choice {
                claimed.extend(choice.added[before..].iter().copied());
                states[i] = Some(choice.clone());
            }
        }
    }

    /// Best-first layer walk for one seed; final states best first.
    fn search<'a>(
        &self,
        start: &SearchState<'a>,
        by_layer: &BTreeMap<LayerId, Vec<&'a SpacePoint>>,
    ) -> Vec<SearchState<'a>> {
        let m = &self.config.merge;
        let direction = self.direction();
        let end_layer = start.end(direction).layer;
        let layers: Vec<(&LayerId, &Vec<&'a SpacePoint>)> = match direction {
            MergeDirection::Backward => by_layer.range(..end_layer).rev().collect(),
            MergeDirection::Forward => by_layer
                .range(end_layer..)
                .filter(|(l, _)| **l > end_layer)
                .collect(),
        };

        let mut fresh = start.clone();
        fresh.holes = 0;
        let mut active = vec![fresh];
        let mut finished = Vec::new();
        for (_, points) in layers {
            let mut next = Vec::new();
            for state in active {
                let mut extensions = self.extensions(&state, points);
                extensions.sort_by(compare_extensions);
                extensions.truncate(m.merge_best_n_per_seed);
                for ext in &extensions {
                    let mut extended = state.clone();
                    extended.score += ext.score;
                    extended.absorb(&[ext.point], &[ext.residual], direction, self.config.quality.use_helix);
                    next.push(extended);
                }
                if state.holes < m.max_holes {
                    let mut skipped = state;
                    skipped.holes += 1;
                    next.push(skipped);
                } else {
                    finished.push(state);
                }
            }
            next.sort_by(compare_states);
            next.truncate(m.merge_n_states);
            active = next;
            if active.is_empty() {
                break;
            }
        }

        finished.extend(active);
        finished.sort_by(compare_states);
        finished
    }

    /// Hits of one layer inside the search window that the relation filter accepts.
    fn extensions<'a>(&self, state: &SearchState<'a>, points: &[&'a SpacePoint]) -> Vec<Extension<'a>> {
        let direction = self.direction();
        let end = state.end(direction);
        let ctx = self.context();
        points
            .iter()
            .filter_map(|&p| {
                let residual = self.window_residual(&state.model, p)?;
                let (inner, outer) = match direction {
                    MergeDirection::Backward => (p, end),
                    MergeDirection::Forward => (end, p),
                };
                let rel = self.filter.compatible(inner, outer, &ctx);
                rel.accepted.then(|| Extension {
                    point: p,
                    score: rel.weight * (-0.5 * residual * residual).exp(),
                    residual,
                })
            })
            .collect()
    }

    /// Normalised residual of `p` against the model, or `None` outside the window.
    fn window_residual(&self, model: &TrackModel, p: &SpacePoint) -> Option<f64> {
        let m = &self.config.merge;
        let rxy = model.residual_xy(&p.position.xy()).abs();
        let rz = if self.config.quality.use_helix {
            model.residual_z(&p.position).abs()
        } else {
            0.0
        };
        if rxy > m.search_window_xy || rz > m.search_window_z {
            return None;
        }
        Some(((rxy / m.search_window_xy).powi(2) + (rz / m.search_window_z).powi(2)).sqrt())
    }

    // ------------------------------------------------------------------------
    // Candidate stage
    // ------------------------------------------------------------------------

    fn candidate_stage<'a>(
        &self,
        states: &mut [Option<SearchState<'a>>],
        store: &'a SpacePointStore,
        candidates: &[TrackCandidate],
    ) -> Result<(), EventError> {
        let direction = self.direction();
        let ctx = self.context();
        let resolved: Vec<Vec<&'a SpacePoint>> = candidates
            .iter()
            .map(|tc| store.resolve(&tc.hits))
            .collect::<Result<_, _>>()?;

        struct Proposal {
            state: usize,
            candidate: usize,
            score: f64,
            residual: f64,
        }

        let mut proposals = Vec::new();
        for (si, state) in states.iter().enumerate() {
            let Some(state) = state else { continue };
            let end = state.end(direction);
            let mut mine: Vec<Proposal> = Vec::new();
            for (ci, points) in resolved.iter().enumerate() {
                let (Some(&first), Some(&last)) = (points.first(), points.last()) else {
                    continue;
                };
                let (near, inner, outer) = match direction {
                    MergeDirection::Backward if last.layer < end.layer => (last, last, end),
                    MergeDirection::Forward if first.layer > end.layer => (first, end, first),
                    _ => continue,
                };
                if self.window_residual(&state.model, near).is_none() {
                    continue;
                }
                let rel = self.filter.compatible(inner, outer, &ctx);
                if !rel.accepted {
                    continue;
                }
                let residual = mean_residual(&state.model, points, self.config);
                mine.push(Proposal {
                    state: si,
                    candidate: ci,
                    score: rel.weight * (-0.5 * residual * residual).exp(),
                    residual,
                });
            }
            mine.sort_by(|a, b| {
                b.score
                    .total_cmp(&a.score)
                    .then(a.residual.total_cmp(&b.residual))
                    .then(a.candidate.cmp(&b.candidate))
            });
            mine.truncate(self.config.merge.merge_best_n_per_seed);
            proposals.extend(mine);
        }

        proposals.sort_by(|a, b| {
            b.score
                .total_cmp(&a.score)
                .then(a.residual.total_cmp(&b.residual))
                .then(a.state.cmp(&b.state))
                .then(a.candidate.cmp(&b.candidate))
        });

        let mut state_used = vec![false; states.len()];
        let mut candidate_used = vec![false; candidates.len()];
        for p in proposals {
            if state_used[p.state] || candidate_used[p.candidate] {
                continue;
            }
            state_used[p.state] = true;
            candidate_used[p.candidate] = true;
            if let Some(state) = states[p.state].as_mut() {
                let points = &resolved[p.candidate];
                let residuals: Vec<f64> = points
                    .iter()
                    .map(|q| point_residual(&state.model, q, self.config))
                    .collect();
                state.score += p.score;
                state.absorb(points, &residuals, direction, self.config.quality.use_helix);
            }
        }
        Ok(())
    }
}

fn point_residual(model: &TrackModel, p: &SpacePoint, config: &PipelineConfig) -> f64 {
    let m = &config.merge;
    let rxy = model.residual_xy(&p.position.xy()) / m.search_window_xy;
    let rz = if config.quality.use_helix {
        model.residual_z(&p.position) / m.search_window_z
    } else {
        0.0
    };
    rxy.hypot(rz)
}

fn mean_residual(model: &TrackModel, points: &[&SpacePoint], config: &PipelineConfig) -> f64 {
    if points.is_empty() {
        return 0.0;
    }
    points.iter().map(|p| point_residual(model, p, config)).sum::<f64>() / points.len() as f64
}

/// Group consecutive points of the same subsystem.
fn segments(points: &[&SpacePoint]) -> Vec<TrajectorySegment> {
    let mut segments: Vec<TrajectorySegment> = Vec::new();
    for p in points {
        match segments.last_mut() {
            Some(last) if last.subsystem == p.subsystem => last.hits.push(p.id),
            _ => segments.push(TrajectorySegment {
                subsystem: p.subsystem,
                hits: vec![p.id],
            }),
        }
    }
    segments
}
