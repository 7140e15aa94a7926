//! Truth-matching test doubles plugged into the pipeline.

use std::collections::BTreeMap;
use std::sync::Arc;

use trackfinder_core::relation::within_layer_window;
use trackfinder_core::{Relation, RelationContext, RelationFilter};
use trackfinder_env::{CandidateFeatures, CandidateScorer, SpacePoint, SpacePointId};

use crate::oracle::SimEvent;

type TruthMap = Arc<BTreeMap<SpacePointId, Vec<u32>>>;

fn share_particle(truth: &TruthMap, a: SpacePointId, b: SpacePointId) -> bool {
    match (truth.get(&a), truth.get(&b)) {
        (Some(pa), Some(pb)) => pa.iter().any(|p| pb.contains(p)),
        _ => false,
    }
}

/// Accepts a pair iff both points come from the same particle.
#[derive(Debug, Clone)]
pub struct TruthRelationFilter {
    truth: TruthMap,
}

impl TruthRelationFilter {
    pub fn new(event: &SimEvent) -> Self {
        Self {
            truth: Arc::new(event.truth.clone()),
        }
    }
}

impl RelationFilter for TruthRelationFilter {
    fn compatible(&self, inner: &SpacePoint, outer: &SpacePoint, ctx: &RelationContext) -> Relation {
        if within_layer_window(inner, outer, ctx.max_jump) && share_particle(&self.truth, inner.id, outer.id) {
            Relation::accept(1.0, outer.radius_xy() > inner.radius_xy())
        } else {
            Relation::REJECTED
        }
    }

    fn name(&self) -> &str {
        "truth"
    }
}

/// Scores a candidate by its purity: the largest fraction of its hits
/// produced by one particle.
#[derive(Debug, Clone)]
pub struct TruthScorer {
    truth: TruthMap,
}

impl TruthScorer {
    pub fn new(event: &SimEvent) -> Self {
        Self {
            truth: Arc::new(event.truth.clone()),
        }
    }
}

/// Majority particle of `hits` and its purity.
pub fn purity(truth: &BTreeMap<SpacePointId, Vec<u32>>, hits: &[SpacePointId]) -> Option<(u32, f64)> {
    let mut counts: BTreeMap<u32, usize> = BTreeMap::new();
    for id in hits {
        for &p in truth.get(id).map(Vec::as_slice).unwrap_or(&[]) {
            *counts.entry(p).or_insert(0) += 1;
        }
    }
    let (&particle, &n) = counts.iter().max_by(|a, b| a.1.cmp(b.1).then(b.0.cmp(a.0)))?;
    Some((particle, n as f64 / hits.len() as f64))
}

impl CandidateScorer for TruthScorer {
    fn score(&self, features: &CandidateFeatures) -> f64 {
        purity(&self.truth, &features.hits).map_or(0.0, |(_, p)| p)
    }

    fn name(&self) -> &str {
        "truth"
    }
}
