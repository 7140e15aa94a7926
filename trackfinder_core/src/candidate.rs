//! Track candidates and their quality records.

use std::collections::HashSet;

use nalgebra::Vector3;
use serde::Serialize;
use trackfinder_env::{SpacePointId, Subsystem};

use crate::error::EventError;
use crate::store::SpacePointStore;

/// Identifier of a candidate, increasing in creation order within one event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct CandidateId(pub u32);

impl std::fmt::Display for CandidateId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "tc{}", self.0)
    }
}

/// Hit reference as handed to downstream consumers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct HitRef {
    pub subsystem: Subsystem,
    pub id: SpacePointId,
}

/// Why the quality estimator declared a candidate infeasible.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RejectionReason {
    /// Fewer than three usable hits after outlier trimming
    TooFewHits,
    /// Transverse momentum below the floor
    LowMomentum,
    /// χ²/ndf above the ceiling
    Chi2Ceiling,
    /// Curvature sign changes along the candidate
    ZigZag,
    /// Triplet-wise pt estimates disagree
    DeltaPt,
}

/// Helix parameters at the innermost hit, used to seed the downstream fit.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HelixSeed {
    /// Innermost hit position in cm
    pub position: Vector3<f64>,
    /// Momentum estimate in GeV
    pub momentum: Vector3<f64>,
    /// -1, +1, or 0 for a straight line
    pub charge: i8,
    /// Fitted radius in cm (infinite for a straight line)
    pub radius: f64,
}

/// Output of the quality estimator for one candidate.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QualityRecord {
    pub chi2: f64,
    pub ndf: u32,
    pub feasible: bool,
    /// Quality in [0, 1]
    pub score: f64,
    /// Hits that survived outlier trimming
    pub used_hits: usize,
    pub seed: Option<HelixSeed>,
    pub rejection: Option<RejectionReason>,
}

impl QualityRecord {
    /// Placeholder of a candidate not yet estimated.
    pub fn unevaluated() -> Self {
        Self {
            chi2: 0.0,
            ndf: 0,
            feasible: false,
            score: 0.0,
            used_hits: 0,
            seed: None,
            rejection: None,
        }
    }

    pub fn reduced_chi2(&self) -> f64 {
        if self.ndf == 0 {
            0.0
        } else {
            self.chi2 / f64::from(self.ndf)
        }
    }
}

/// An ordered hit list proposed as one particle trajectory.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TrackCandidate {
    pub id: CandidateId,
    /// Inner → outer
    pub hits: Vec<SpacePointId>,
    pub quality: QualityRecord,
}

impl TrackCandidate {
    pub fn new(id: CandidateId, hits: Vec<SpacePointId>) -> Self {
        Self {
            id,
            hits,
            quality: QualityRecord::unevaluated(),
        }
    }

    pub fn len(&self) -> usize {
        self.hits.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hits.is_empty()
    }

    pub fn contains(&self, id: SpacePointId) -> bool {
        self.hits.contains(&id)
    }

    /// Check the structural invariants: every hit known to the store, no
    /// repeated hit, layers strictly monotonic.
    pub fn validate(&self, store: &SpacePointStore) -> Result<(), EventError> {
        let mut seen = HashSet::with_capacity(self.hits.len());
        for &hit in &self.hits {
            if !seen.insert(hit) {
                return Err(EventError::DuplicateHit {
                    candidate: self.id,
                    point: hit,
                });
            }
        }
        let points = store.resolve(&self.hits)?;
        let increasing = points.windows(2).all(|w| w[0].layer < w[1].layer);
        let decreasing = points.windows(2).all(|w| w[0].layer > w[1].layer);
        if increasing || decreasing {
            Ok(())
        } else {
            Err(EventError::NonMonotonicCandidate(self.id))
        }
    }

    /// Hit references with the producing subsystem looked up in `store`.
    pub fn hit_refs(&self, store: &SpacePointStore) -> Result<Vec<HitRef>, EventError> {
        Ok(store
            .resolve(&self.hits)?
            .into_iter()
            .map(|p| HitRef {
                subsystem: p.subsystem,
                id: p.id,
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use trackfinder_env::{LayerId, SensorId, SpacePoint};

    fn store() -> SpacePointStore {
        SpacePointStore::new((1..=4).map(|i| {
            SpacePoint::new(
                SpacePointId(i),
                Vector3::new(f64::from(i), 0.0, 0.0),
                0.01,
                LayerId(i as u16),
                SensorId(0),
                Subsystem::Svd,
            )
        }))
    }

    fn ids(raw: &[u32]) -> Vec<SpacePointId> {
        raw.iter().map(|&i| SpacePointId(i)).collect()
    }

    #[test]
    fn test_valid_candidate() {
        let tc = TrackCandidate::new(CandidateId(0), ids(&[1, 2, 4]));
        assert!(tc.validate(&store()).is_ok());
        let reversed = TrackCandidate::new(CandidateId(1), ids(&[4, 3, 1]));
        assert!(reversed.validate(&store()).is_ok());
    }

    #[test]
    fn test_duplicate_hit() {
        let tc = TrackCandidate::new(CandidateId(3), ids(&[1, 2, 2]));
        assert!(matches!(
            tc.validate(&store()),
            Err(EventError::DuplicateHit { candidate: CandidateId(3), point: SpacePointId(2) })
        ));
    }

    #[test]
    fn test_non_monotonic() {
        let tc = TrackCandidate::new(CandidateId(5), ids(&[1, 3, 2]));
        assert!(matches!(
            tc.validate(&store()),
            Err(EventError::NonMonotonicCandidate(CandidateId(5)))
        ));
    }

    #[test]
    fn test_hit_refs_carry_subsystem() {
        let tc = TrackCandidate::new(CandidateId(0), ids(&[1, 2]));
        let refs = tc.hit_refs(&store()).unwrap();
        assert_eq!(refs[1], HitRef { subsystem: Subsystem::Svd, id: SpacePointId(2) });
        assert_eq!(CandidateId(7).to_string(), "tc7");
    }
}
