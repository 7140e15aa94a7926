//! Learned (or otherwise opaque) candidate scoring.

use serde::{Deserialize, Serialize};

use crate::types::{LayerId, SpacePointId};

/// Summary of a track candidate (or of a hit pair) handed to a scorer.
///
/// Built by the track finder from its own fit; a scorer never sees the
/// space-point store itself.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CandidateFeatures {
    /// Hits in traversal order (inner → outer)
    pub hits: Vec<SpacePointId>,
    /// Layer of each hit
    pub layers: Vec<LayerId>,
    /// Circle/helix fit chi²
    pub chi2: f64,
    /// Degrees of freedom of the fit (0 for three hits)
    pub ndf: u32,
    /// Estimated transverse momentum in GeV/c (infinite for straight lines)
    pub pt: f64,
    /// Fitted curvature radius in cm (infinite for straight lines)
    pub radius: f64,
    /// Largest azimuthal step between consecutive hits (rad)
    pub max_delta_phi: f64,
    /// Total 3D path length through the hits (cm)
    pub path_length: f64,
}

impl CandidateFeatures {
    /// Number of hits.
    pub fn n_hits(&self) -> usize {
        self.hits.len()
    }

    /// Reduced chi², or 0 when the fit has no degrees of freedom.
    pub fn reduced_chi2(&self) -> f64 {
        if self.ndf == 0 {
            0.0
        } else {
            self.chi2 / f64::from(self.ndf)
        }
    }
}

/// An opaque candidate classifier (e.g. an exported MVA).
///
/// Contract: deterministic for identical input, returns a value in [0, 1],
/// never panics for well-formed features. Callers still clamp the output.
pub trait CandidateScorer: Send + Sync {
    /// Probability that the candidate is a real particle trajectory.
    fn score(&self, features: &CandidateFeatures) -> f64;

    /// Name used in logs.
    fn name(&self) -> &str {
        "scorer"
    }
}

/// Scorer that rewards long candidates with a good fit.
///
/// Stands in for a trained classifier when none is available.
#[derive(Debug, Clone)]
pub struct LogisticScorer {
    /// Weight on the hit count
    pub w_hits: f64,
    /// Weight on the reduced chi²
    pub w_chi2: f64,
    /// Bias term
    pub bias: f64,
}

impl Default for LogisticScorer {
    fn default() -> Self {
        Self {
            w_hits: 0.8,
            w_chi2: -0.5,
            bias: -2.0,
        }
    }
}

impl CandidateScorer for LogisticScorer {
    fn score(&self, features: &CandidateFeatures) -> f64 {
        let z = self.bias
            + self.w_hits * features.n_hits() as f64
            + self.w_chi2 * features.reduced_chi2();
        1.0 / (1.0 + (-z).exp())
    }

    fn name(&self) -> &str {
        "logistic"
    }
}
