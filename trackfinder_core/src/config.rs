//! Pipeline configuration.
//!
//! One [`PipelineConfig`] is built per run and passed by reference into every
//! component. All knobs have defaults; the defaults are tuned for the toy
//! layered-cylinder geometry of the simulation harness and are a starting
//! point, not a calibration.

use serde::{Deserialize, Serialize};
use trackfinder_env::Subsystem;

use crate::error::ConfigError;

// ============================================================================
// STRATEGY ENUMS
// ============================================================================

/// Layer iteration order of the cross-subsystem merger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MergeDirection {
    /// Decreasing layer id, toward the interaction point
    Backward,
    /// Increasing layer id, away from the interaction point
    Forward,
}

impl MergeDirection {
    pub fn name(&self) -> &'static str {
        match self {
            MergeDirection::Backward => "backward",
            MergeDirection::Forward => "forward",
        }
    }
}

impl std::fmt::Display for MergeDirection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

impl std::str::FromStr for MergeDirection {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "backward" | "inward" => Ok(MergeDirection::Backward),
            "forward" | "outward" => Ok(MergeDirection::Forward),
            _ => Err(format!("Unknown merge direction: {}", s)),
        }
    }
}

/// How the final subset of candidates is chosen.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SelectorStrategy {
    /// Hopfield relaxation followed by greedy repair
    Hopfield,
    /// Greedy by quality with conflict exclusion
    Greedy,
}

/// How candidate paths are read off the cellular-automaton state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExtractionMode {
    /// One path per local chain-length maximum, following best predecessors
    BestPath,
    /// Every maximal-length path from a local maximum, capped per seed
    AllPaths { max_paths_per_seed: usize },
}

// ============================================================================
// SECTIONS
// ============================================================================

/// Pairwise relation cuts and graph-building knobs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RelationConfig {
    /// Maximum number of layers a relation may span (default: 2, one missing layer)
    pub jump_size: u16,

    /// Maximum 3D distance between related points in cm (default: 40.0)
    pub max_distance_3d: f64,

    /// Maximum transverse distance in cm (default: 30.0)
    pub max_distance_xy: f64,

    /// Maximum |Δz| in cm (default: 30.0)
    pub max_distance_z: f64,

    /// Maximum azimuthal opening in rad (default: 0.4)
    pub max_delta_phi: f64,

    /// Reject pairs whose outer point is not further out in radius (default: true)
    pub require_outward: bool,

    /// Prune edges that take part in no accepted triplet (default: false)
    pub use_triplets: bool,

    /// Maximum 3D kink angle of a triplet in rad (default: 0.5)
    pub max_angle_3d: f64,

    /// Maximum transverse kink angle of a triplet in rad (default: 0.5)
    pub max_angle_xy: f64,

    /// Number of azimuthal buckets per layer (default: 32)
    pub sector_count: u16,

    /// Neighbouring buckets searched on each side (default: 3).
    /// Widened at build time to cover `max_delta_phi`; see [`RelationConfig::effective_sector_window`].
    pub sector_window: u16,

    /// Minimum learned-scorer output for the MVA relation strategy (default: 0.5)
    pub mva_cut: f64,
}

impl RelationConfig {
    /// Sector window actually searched: at least `sector_window`, and wide
    /// enough that `sector_window × 2π / sector_count >= max_delta_phi`.
    pub fn effective_sector_window(&self) -> u16 {
        let count = f64::from(self.sector_count.max(1));
        let needed = (self.max_delta_phi * count / (2.0 * std::f64::consts::PI)).ceil();
        if !needed.is_finite() || needed >= count {
            return self.sector_count;
        }
        self.sector_window.max(needed.max(0.0) as u16)
    }
}

impl Default for RelationConfig {
    fn default() -> Self {
        Self {
            jump_size: 2,
            max_distance_3d: 40.0,
            max_distance_xy: 30.0,
            max_distance_z: 30.0,
            max_delta_phi: 0.4,
            require_outward: true,
            use_triplets: false,
            max_angle_3d: 0.5,
            max_angle_xy: 0.5,
            sector_count: 32,
            sector_window: 3,
            mva_cut: 0.5,
        }
    }
}

/// Fit and feasibility knobs of the quality estimator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QualityConfig {
    /// Upper bound on χ²/ndf for a feasible candidate (default: 25.0)
    pub quality_chi2_ceiling: f64,

    /// Minimum transverse momentum in GeV (default: 0.05)
    pub momentum_floor: f64,

    /// Solenoid field along +z in Tesla (default: 1.5)
    pub b_field_tesla: f64,

    /// Hits with a normalised residual above this are trimmed (default: 5.0)
    pub outlier_sigma: f64,

    /// Hit count at which the length factor of the score saturates (default: 6)
    pub reference_hits: usize,

    /// Include the s–z line in χ² (default: true)
    pub use_helix: bool,

    /// Require a constant curvature sign along the candidate (default: true)
    pub zigzag_filter: bool,

    /// Require consistent triplet-wise pt estimates (default: false)
    pub delta_pt_filter: bool,

    /// Largest allowed pt jump between consecutive triplets in GeV (default: 0.5)
    pub max_delta_pt: f64,
}

impl Default for QualityConfig {
    fn default() -> Self {
        Self {
            quality_chi2_ceiling: 25.0,
            momentum_floor: 0.05,
            b_field_tesla: 1.5,
            outlier_sigma: 5.0,
            reference_hits: 6,
            use_helix: true,
            zigzag_filter: true,
            delta_pt_filter: false,
            max_delta_pt: 0.5,
        }
    }
}

/// Conflict resolution knobs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HopfieldConfig {
    pub strategy: SelectorStrategy,

    /// Upper bound on relaxation rounds (default: 20)
    pub hopfield_rounds: usize,

    /// Sigmoid gain (default: 3.1)
    pub hopfield_temperature: f64,

    /// Weight of the inhibition term (default: 1.0)
    pub hopfield_damping: f64,

    /// Stop when the largest activation change of a round drops below this (default: 1e-3)
    pub hopfield_convergence: f64,

    /// Temperature multiplier applied after each round, 1.0 = off (default: 1.0)
    pub hopfield_anneal: f64,

    /// Seed of the update-order shuffle (default: 42)
    pub hopfield_seed: u64,

    /// Weight conflicts by shared/min(len) instead of 1.0 (default: false)
    pub overlap_weighting: bool,

    /// Remove candidates whose hits are a subset of another's first (default: true)
    pub prune_subsets: bool,
}

impl Default for HopfieldConfig {
    fn default() -> Self {
        Self {
            strategy: SelectorStrategy::Hopfield,
            hopfield_rounds: 20,
            hopfield_temperature: 3.1,
            hopfield_damping: 1.0,
            hopfield_convergence: 1e-3,
            hopfield_anneal: 1.0,
            hopfield_seed: 42,
            overlap_weighting: false,
            prune_subsets: true,
        }
    }
}

/// Cross-subsystem merger knobs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MergeConfig {
    pub merge_direction: MergeDirection,

    /// Extensions expanded per search state and layer (default: 3)
    pub merge_best_n_per_seed: usize,

    /// Search states kept after each layer (default: 10)
    pub merge_n_states: usize,

    /// Transverse extrapolation window in cm (default: 0.5)
    pub search_window_xy: f64,

    /// Longitudinal extrapolation window in cm (default: 1.0)
    pub search_window_z: f64,

    /// Layers a trajectory may skip without a hit (default: 1)
    pub max_holes: usize,
}

impl Default for MergeConfig {
    fn default() -> Self {
        Self {
            merge_direction: MergeDirection::Backward,
            merge_best_n_per_seed: 3,
            merge_n_states: 10,
            search_window_xy: 0.5,
            search_window_z: 1.0,
            max_holes: 1,
        }
    }
}

// ============================================================================
// PIPELINE CONFIG
// ============================================================================

/// Complete configuration of one track-finding run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Subsystems whose points enter the candidate graph (default: PXD + SVD)
    pub subsystems: Vec<Subsystem>,

    /// Shortest accepted candidate (default: 3)
    pub min_hits_per_candidate: usize,

    /// Sweep bound of the cellular automaton (default: 64)
    pub max_layer_count: usize,

    pub extraction: ExtractionMode,
    pub relation: RelationConfig,
    pub quality: QualityConfig,
    pub hopfield: HopfieldConfig,
    pub merge: MergeConfig,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            subsystems: vec![Subsystem::Pxd, Subsystem::Svd],
            min_hits_per_candidate: 3,
            max_layer_count: 64,
            extraction: ExtractionMode::BestPath,
            relation: RelationConfig::default(),
            quality: QualityConfig::default(),
            hopfield: HopfieldConfig::default(),
            merge: MergeConfig::default(),
        }
    }
}

impl PipelineConfig {
    /// Default configuration restricted to the given subsystems.
    pub fn for_subsystems(subsystems: &[Subsystem]) -> Self {
        Self {
            subsystems: subsystems.to_vec(),
            ..Self::default()
        }
    }

    /// Parse a (possibly partial) JSON document and validate it.
    pub fn from_json(text: &str) -> Result<Self, ConfigError> {
        let config: Self =
            serde_json::from_str(text).map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Check every knob; the pipeline refuses to start on the first violation.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.subsystems.is_empty() {
            return Err(ConfigError::NoSubsystems);
        }
        if self.min_hits_per_candidate < 3 {
            return Err(ConfigError::TooFewMinHits(self.min_hits_per_candidate));
        }
        if self.max_layer_count < 2 {
            return Err(ConfigError::out_of_range(
                "max_layer_count",
                self.max_layer_count as f64,
            ));
        }
        if let ExtractionMode::AllPaths { max_paths_per_seed: 0 } = self.extraction {
            return Err(ConfigError::Zero("max_paths_per_seed".to_string()));
        }

        let r = &self.relation;
        if r.jump_size < 1 {
            return Err(ConfigError::InvalidJumpSize(r.jump_size));
        }
        if r.sector_count == 0 {
            return Err(ConfigError::Zero("sector_count".to_string()));
        }
        positive("max_distance_3d", r.max_distance_3d)?;
        positive("max_distance_xy", r.max_distance_xy)?;
        positive("max_distance_z", r.max_distance_z)?;
        positive("max_delta_phi", r.max_delta_phi)?;
        positive("max_angle_3d", r.max_angle_3d)?;
        positive("max_angle_xy", r.max_angle_xy)?;
        unit_interval("mva_cut", r.mva_cut)?;

        let q = &self.quality;
        positive("quality_chi2_ceiling", q.quality_chi2_ceiling)?;
        non_negative("momentum_floor", q.momentum_floor)?;
        positive("outlier_sigma", q.outlier_sigma)?;
        positive("max_delta_pt", q.max_delta_pt)?;
        if !q.b_field_tesla.is_finite() || q.b_field_tesla == 0.0 {
            return Err(ConfigError::out_of_range("b_field_tesla", q.b_field_tesla));
        }
        if q.reference_hits == 0 {
            return Err(ConfigError::Zero("reference_hits".to_string()));
        }

        let h = &self.hopfield;
        if h.hopfield_rounds == 0 {
            return Err(ConfigError::Zero("hopfield_rounds".to_string()));
        }
        positive("hopfield_temperature", h.hopfield_temperature)?;
        non_negative("hopfield_damping", h.hopfield_damping)?;
        positive("hopfield_convergence", h.hopfield_convergence)?;
        positive("hopfield_anneal", h.hopfield_anneal)?;

        let m = &self.merge;
        if m.merge_best_n_per_seed == 0 {
            return Err(ConfigError::Zero("merge_best_n_per_seed".to_string()));
        }
        if m.merge_n_states == 0 {
            return Err(ConfigError::Zero("merge_n_states".to_string()));
        }
        positive("search_window_xy", m.search_window_xy)?;
        positive("search_window_z", m.search_window_z)?;

        Ok(())
    }
}

fn positive(name: &str, value: f64) -> Result<(), ConfigError> {
    if value.is_finite() && value > 0.0 {
        Ok(())
    } else {
        Err(ConfigError::out_of_range(name, value))
    }
}

fn non_negative(name: &str, value: f64) -> Result<(), ConfigError> {
    if value.is_finite() && value >= 0.0 {
        Ok(())
    } else {
        Err(ConfigError::out_of_range(name, value))
    }
}

fn unit_interval(name: &str, value: f64) -> Result<(), ConfigError> {
    if (0.0..=1.0).contains(&value) {
        Ok(())
    } else {
        Err(ConfigError::out_of_range(name, value))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_valid() {
        assert!(PipelineConfig::default().validate().is_ok());
    }

    #[test]
    fn test_effective_sector_window_covers_delta_phi() {
        let mut r = RelationConfig::default();
        assert_eq!(r.effective_sector_window(), 3);

        r.max_delta_phi = 1.0;
        let w = r.effective_sector_window();
        assert_eq!(w, 6);
        assert!(f64::from(w) * 2.0 * std::f64::consts::PI / f64::from(r.sector_count) >= r.max_delta_phi);

        r.max_delta_phi = 10.0;
        assert_eq!(r.effective_sector_window(), r.sector_count);
    }

    #[test]
    fn test_zero_jump_size_rejected() {
        let mut config = PipelineConfig::default();
        config.relation.jump_size = 0;
        assert_eq!(config.validate(), Err(ConfigError::InvalidJumpSize(0)));
    }

    #[test]
    fn test_min_hits_below_three_rejected() {
        let mut config = PipelineConfig::default();
        config.min_hits_per_candidate = 2;
        assert_eq!(config.validate(), Err(ConfigError::TooFewMinHits(2)));
    }

    #[test]
    fn test_bad_floats_rejected() {
        let mut config = PipelineConfig::default();
        config.hopfield.hopfield_temperature = -1.0;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::OutOfRange { ref name, .. }) if name == "hopfield_temperature"
        ));

        let mut config = PipelineConfig::default();
        config.relation.max_delta_phi = f64::NAN;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_empty_subsystems_rejected() {
        let config = PipelineConfig::for_subsystems(&[]);
        assert_eq!(config.validate(), Err(ConfigError::NoSubsystems));
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config = PipelineConfig::from_json(
            r#"{"min_hits_per_candidate": 4, "merge": {"merge_direction": "forward"}}"#,
        )
        .unwrap();
        assert_eq!(config.min_hits_per_candidate, 4);
        assert_eq!(config.merge.merge_direction, MergeDirection::Forward);
        assert_eq!(config.relation.jump_size, 2);
    }

    #[test]
    fn test_invalid_json_values_rejected() {
        let err = PipelineConfig::from_json(r#"{"relation": {"jump_size": 0}}"#).unwrap_err();
        assert_eq!(err, ConfigError::InvalidJumpSize(0));
        assert!(matches!(
            PipelineConfig::from_json("not json"),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn test_extraction_mode_json() {
        let config =
            PipelineConfig::from_json(r#"{"extraction": {"all_paths": {"max_paths_per_seed": 4}}}"#)
                .unwrap();
        assert_eq!(
            config.extraction,
            ExtractionMode::AllPaths { max_paths_per_seed: 4 }
        );
    }

    #[test]
    fn test_merge_direction_parse() {
        assert_eq!("Backward".parse::<MergeDirection>().unwrap(), MergeDirection::Backward);
        assert!("sideways".parse::<MergeDirection>().is_err());
    }
}
