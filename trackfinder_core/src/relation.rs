//! Pairwise (and triplet) compatibility of space points.
//!
//! A relation always points from the inner point to the outer one: the layer
//! of the outer point is strictly larger. Every filter enforces the
//! `1 ..= max_jump` layer window first, which is what keeps the candidate
//! graph acyclic.

use std::f64::consts::PI;
use std::sync::Arc;

use nalgebra::Vector3;
use trackfinder_env::{CandidateFeatures, CandidateScorer, SpacePoint};

use crate::config::RelationConfig;

/// Smallest weight an accepted relation carries (0 means "no edge").
pub const MIN_WEIGHT: f64 = 1e-6;

/// Outcome of one compatibility check.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Relation {
    pub accepted: bool,
    /// Edge weight in (0, 1] when accepted, 0 otherwise
    pub weight: f64,
    /// Outer point lies further out along the flight direction
    pub direction_consistent: bool,
}

impl Relation {
    pub const REJECTED: Relation = Relation {
        accepted: false,
        weight: 0.0,
        direction_consistent: false,
    };

    pub fn accept(weight: f64, direction_consistent: bool) -> Self {
        Self {
            accepted: true,
            weight: weight.clamp(MIN_WEIGHT, 1.0),
            direction_consistent,
        }
    }
}

/// Call-site context of a compatibility check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RelationContext {
    /// Largest allowed layer difference between the two points
    pub max_jump: u16,
}

impl RelationContext {
    pub fn new(max_jump: u16) -> Self {
        Self { max_jump }
    }
}

/// Decides whether two space points can be consecutive hits of one trajectory.
///
/// Implementations are pure: same input, same answer, no shared mutable state.
pub trait RelationFilter: Send + Sync {
    /// `inner` must be the point with the smaller layer id.
    fn compatible(&self, inner: &SpacePoint, outer: &SpacePoint, ctx: &RelationContext) -> Relation;

    /// Three consecutive points, inner → outer. Default: both pairs accepted.
    fn compatible_triplet(
        &self,
        inner: &SpacePoint,
        middle: &SpacePoint,
        outer: &SpacePoint,
        ctx: &RelationContext,
    ) -> Relation {
        let a = self.compatible(inner, middle, ctx);
        let b = self.compatible(middle, outer, ctx);
        if a.accepted && b.accepted {
            Relation::accept(a.weight.min(b.weight), a.direction_consistent && b.direction_consistent)
        } else {
            Relation::REJECTED
        }
    }

    fn name(&self) -> &str {
        "relation"
    }
}

/// True when `outer` is 1 to `max_jump` layers beyond `inner`.
#[inline]
pub fn within_layer_window(inner: &SpacePoint, outer: &SpacePoint, max_jump: u16) -> bool {
    let gap = inner.layer.gap_to(outer.layer);
    gap >= 1 && gap <= i32::from(max_jump)
}

/// Wrap an angle into (-π, π].
#[inline]
pub fn wrap_angle(angle: f64) -> f64 {
    let mut a = angle % (2.0 * PI);
    if a > PI {
        a -= 2.0 * PI;
    } else if a <= -PI {
        a += 2.0 * PI;
    }
    a
}

fn angle_between(a: &Vector3<f64>, b: &Vector3<f64>) -> f64 {
    let na = a.norm();
    let nb = b.norm();
    if na == 0.0 || nb == 0.0 {
        return 0.0;
    }
    (a.dot(b) / (na * nb)).clamp(-1.0, 1.0).acos()
}

// ============================================================================
// GEOMETRIC FILTER
// ============================================================================

/// Distance, opening-angle and flight-direction cuts.
#[derive(Debug, Clone, PartialEq)]
pub struct GeometricRelationFilter {
    config: RelationConfig,
}

impl GeometricRelationFilter {
    pub fn new(config: RelationConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &RelationConfig {
        &self.config
    }
}

impl RelationFilter for GeometricRelationFilter {
    fn compatible(&self, inner: &SpacePoint, outer: &SpacePoint, ctx: &RelationContext) -> Relation {
        if !within_layer_window(inner, outer, ctx.max_jump) {
            return Relation::REJECTED;
        }
        let c = &self.config;

        let d = outer.position - inner.position;
        let distance_3d = d.norm();
        if distance_3d == 0.0 || distance_3d > c.max_distance_3d {
            return Relation::REJECTED;
        }
        if d.x.hypot(d.y) > c.max_distance_xy || d.z.abs() > c.max_distance_z {
            return Relation::REJECTED;
        }

        let delta_phi = wrap_angle(outer.phi() - inner.phi()).abs();
        if delta_phi > c.max_delta_phi {
            return Relation::REJECTED;
        }

        let outward = inner.position.x * d.x + inner.position.y * d.y >= 0.0;
        let direction_consistent = outer.radius_xy() > inner.radius_xy() && outward;
        if c.require_outward && !direction_consistent {
            return Relation::REJECTED;
        }

        let weight = (1.0 - distance_3d / c.max_distance_3d) * (1.0 - delta_phi / c.max_delta_phi);
        Relation::accept(weight, direction_consistent)
    }

    fn compatible_triplet(
        &self,
        inner: &SpacePoint,
        middle: &SpacePoint,
        outer: &SpacePoint,
        ctx: &RelationContext,
    ) -> Relation {
        let first = self.compatible(inner, middle, ctx);
        let second = self.compatible(middle, outer, ctx);
        if !first.accepted || !second.accepted {
            return Relation::REJECTED;
        }

        let a = middle.position - inner.position;
        let b = outer.position - middle.position;
        let angle_3d = angle_between(&a, &b);
        let angle_xy = angle_between(&Vector3::new(a.x, a.y, 0.0), &Vector3::new(b.x, b.y, 0.0));
        if angle_3d > self.config.max_angle_3d || angle_xy > self.config.max_angle_xy {
            return Relation::REJECTED;
        }

        Relation::accept(
            1.0 - angle_3d / self.config.max_angle_3d,
            first.direction_consistent && second.direction_consistent,
        )
    }

    fn name(&self) -> &str {
        "geometric"
    }
}

// ============================================================================
// MVA FILTER
// ============================================================================

/// Geometric pre-selection followed by a learned pair classifier.
#[derive(Clone)]
pub struct MvaRelationFilter {
    geometric: GeometricRelationFilter,
    scorer: Arc<dyn CandidateScorer>,
}

impl MvaRelationFilter {
    pub fn new(config: RelationConfig, scorer: Arc<dyn CandidateScorer>) -> Self {
        Self {
            geometric: GeometricRelationFilter::new(config),
            scorer,
        }
    }

    fn pair_features(inner: &SpacePoint, outer: &SpacePoint) -> CandidateFeatures {
        CandidateFeatures {
            hits: vec![inner.id, outer.id],
            layers: vec![inner.layer, outer.layer],
            chi2: 0.0,
            ndf: 0,
            pt: f64::INFINITY,
            radius: f64::INFINITY,
            max_delta_phi: wrap_angle(outer.phi() - inner.phi()).abs(),
            path_length: (outer.position - inner.position).norm(),
        }
    }
}

impl std::fmt::Debug for MvaRelationFilter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MvaRelationFilter")
            .field("geometric", &self.geometric)
            .field("scorer", &self.scorer.name())
            .finish()
    }
}

impl RelationFilter for MvaRelationFilter {
    fn compatible(&self, inner: &SpacePoint, outer: &SpacePoint, ctx: &RelationContext) -> Relation {
        let pre = self.geometric.compatible(inner, outer, ctx);
        if !pre.accepted {
            return pre;
        }
        let score = clamp_score(self.scorer.score(&Self::pair_features(inner, outer)));
        if score < self.geometric.config.mva_cut || score <= 0.0 {
            Relation::REJECTED
        } else {
            Relation::accept(score, pre.direction_consistent)
        }
    }

    fn compatible_triplet(
        &self,
        inner: &SpacePoint,
        middle: &SpacePoint,
        outer: &SpacePoint,
        ctx: &RelationContext,
    ) -> Relation {
        self.geometric.compatible_triplet(inner, middle, outer, ctx)
    }

    fn name(&self) -> &str {
        "mva"
    }
}

/// Scorer outputs are clamped into [0, 1]; NaN counts as 0.
pub(crate) fn clamp_score(score: f64) -> f64 {
    if score.is_nan() {
        0.0
    } else {
        score.clamp(0.0, 1.0)
    }
}

// ============================================================================
// STRATEGY
// ============================================================================

/// Closed set of built-in relation strategies.
#[derive(Debug, Clone)]
pub enum RelationStrategy {
    Geometric(GeometricRelationFilter),
    Mva(MvaRelationFilter),
    /// Every pair inside the layer window, weight 1
    All,
    /// No relations at all
    None,
}

impl RelationStrategy {
    pub fn geometric(config: &RelationConfig) -> Self {
        RelationStrategy::Geometric(GeometricRelationFilter::new(config.clone()))
    }

    pub fn mva(config: &RelationConfig, scorer: Arc<dyn CandidateScorer>) -> Self {
        RelationStrategy::Mva(MvaRelationFilter::new(config.clone(), scorer))
    }
}

impl RelationFilter for RelationStrategy {
    fn compatible(&self, inner: &SpacePoint, outer: &SpacePoint, ctx: &RelationContext) -> Relation {
        match self {
            RelationStrategy::Geometric(f) => f.compatible(inner, outer, ctx),
            RelationStrategy::Mva(f) => f.compatible(inner, outer, ctx),
            RelationStrategy::All => {
                if within_layer_window(inner, outer, ctx.max_jump) {
                    Relation::accept(1.0, outer.radius_xy() > inner.radius_xy())
                } else {
                    Relation::REJECTED
                }
            }
            RelationStrategy::None => Relation::REJECTED,
        }
    }

    fn compatible_triplet(
        &self,
        inner: &SpacePoint,
        middle: &SpacePoint,
        outer: &SpacePoint,
        ctx: &RelationContext,
    ) -> Relation {
        match self {
            RelationStrategy::Geometric(f) => f.compatible_triplet(inner, middle, outer, ctx),
            RelationStrategy::Mva(f) => f.compatible_triplet(inner, middle, outer, ctx),
            RelationStrategy::All => {
                let ok = within_layer_window(inner, middle, ctx.max_jump)
                    && within_layer_window(middle, outer, ctx.max_jump);
                if ok {
                    Relation::accept(1.0, true)
                } else {
                    Relation::REJECTED
                }
            }
            RelationStrategy::None => Relation::REJECTED,
        }
    }

    fn name(&self) -> &str {
        match self {
            RelationStrategy::Geometric(f) => f.name(),
            RelationStrategy::Mva(f) => f.name(),
            RelationStrategy::All => "all",
            RelationStrategy::None => "none",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use trackfinder_env::{LayerId, SensorId, SpacePointId, Subsystem};

    fn sp(id: u32, r: f64, phi: f64, z: f64, layer: u16) -> SpacePoint {
        SpacePoint::new(
            SpacePointId(id),
            Vector3::new(r * phi.cos(), r * phi.sin(), z),
            0.01,
            LayerId(layer),
            SensorId(0),
            Subsystem::Svd,
        )
    }

    fn ctx() -> RelationContext {
        RelationContext::new(2)
    }

    fn geometric() -> GeometricRelationFilter {
        GeometricRelationFilter::new(RelationConfig::default())
    }

    // ========================================================================
    // LAYER WINDOW
    // ========================================================================

    #[test]
    fn test_same_layer_and_inward_rejected() {
        let a = sp(1, 4.0, 0.1, 0.0, 3);
        let b = sp(2, 4.1, 0.1, 0.0, 3);
        let c = sp(3, 8.0, 0.1, 0.0, 4);
        let f = geometric();
        assert!(!f.compatible(&a, &b, &ctx()).accepted);
        assert!(!f.compatible(&c, &a, &ctx()).accepted);
        assert!(f.compatible(&a, &c, &ctx()).accepted);
    }

    #[test]
    fn test_jump_beyond_window_rejected() {
        let a = sp(1, 4.0, 0.1, 0.0, 3);
        let far = sp(2, 10.0, 0.1, 0.0, 6);
        assert!(!geometric().compatible(&a, &far, &ctx()).accepted);
        assert!(!RelationStrategy::All.compatible(&a, &far, &ctx()).accepted);
        assert!(RelationStrategy::All
            .compatible(&a, &far, &RelationContext::new(3))
            .accepted);
    }

    // ========================================================================
    // GEOMETRIC CUTS
    // ========================================================================

    #[test]
    fn test_straight_radial_pair_weight() {
        let a = sp(1, 4.0, 0.3, 1.0, 3);
        let b = sp(2, 8.0, 0.3, 2.0, 4);
        let rel = geometric().compatible(&a, &b, &ctx());
        assert!(rel.accepted);
        assert!(rel.direction_consistent);
        let expected = 1.0 - (16.0f64 + 1.0).sqrt() / 40.0;
        assert_relative_eq!(rel.weight, expected, epsilon = 1e-12);
    }

    #[test]
    fn test_large_opening_angle_rejected() {
        let a = sp(1, 4.0, 0.0, 0.0, 3);
        let b = sp(2, 8.0, 0.6, 0.0, 4);
        assert!(!geometric().compatible(&a, &b, &ctx()).accepted);
    }

    #[test]
    fn test_phi_wraparound_is_small_opening() {
        let a = sp(1, 4.0, PI - 0.05, 0.0, 3);
        let b = sp(2, 8.0, -PI + 0.05, 0.0, 4);
        assert!(geometric().compatible(&a, &b, &ctx()).accepted);
    }

    #[test]
    fn test_long_z_step_rejected() {
        let a = sp(1, 4.0, 0.0, 0.0, 3);
        let b = sp(2, 8.0, 0.0, 35.0, 4);
        assert!(!geometric().compatible(&a, &b, &ctx()).accepted);
    }

    #[test]
    fn test_inward_radius_rejected_unless_allowed() {
        let a = sp(1, 8.0, 0.0, 0.0, 3);
        let b = sp(2, 6.0, 0.0, 0.0, 4);
        assert!(!geometric().compatible(&a, &b, &ctx()).accepted);

        let config = RelationConfig {
            require_outward: false,
            ..RelationConfig::default()
        };
        let rel = GeometricRelationFilter::new(config).compatible(&a, &b, &ctx());
        assert!(rel.accepted);
        assert!(!rel.direction_consistent);
    }

    #[test]
    fn test_triplet_kink_rejected() {
        let f = geometric();
        let a = sp(1, 4.0, 0.0, 0.0, 3);
        let b = sp(2, 8.0, 0.0, 0.0, 4);
        let straight = sp(3, 12.0, 0.0, 0.0, 5);
        let kinked = Vector3::new(10.0, 4.0, 0.0);
        let kinked = SpacePoint::new(
            SpacePointId(4),
            kinked,
            0.01,
            LayerId(5),
            SensorId(0),
            Subsystem::Svd,
        );
        let rel = f.compatible_triplet(&a, &b, &straight, &ctx());
        assert!(rel.accepted);
        assert_relative_eq!(rel.weight, 1.0);
        assert!(!f.compatible_triplet(&a, &b, &kinked, &ctx()).accepted);
    }

    // ========================================================================
    // MVA / STRATEGIES
    // ========================================================================

    struct Fixed(f64);

    impl CandidateScorer for Fixed {
        fn score(&self, _: &CandidateFeatures) -> f64 {
            self.0
        }
    }

    #[test]
    fn test_mva_cut_and_weight() {
        let a = sp(1, 4.0, 0.0, 0.0, 3);
        let b = sp(2, 8.0, 0.0, 0.0, 4);
        let config = RelationConfig::default();

        let good = RelationStrategy::mva(&config, Arc::new(Fixed(0.8)));
        let rel = good.compatible(&a, &b, &ctx());
        assert!(rel.accepted);
        assert_relative_eq!(rel.weight, 0.8);

        let bad = RelationStrategy::mva(&config, Arc::new(Fixed(0.2)));
        assert!(!bad.compatible(&a, &b, &ctx()).accepted);

        let nan = RelationStrategy::mva(&config, Arc::new(Fixed(f64::NAN)));
        assert!(!nan.compatible(&a, &b, &ctx()).accepted);
    }

    #[test]
    fn test_none_rejects_everything() {
        let a = sp(1, 4.0, 0.0, 0.0, 3);
        let b = sp(2, 8.0, 0.0, 0.0, 4);
        assert_eq!(RelationStrategy::None.compatible(&a, &b, &ctx()), Relation::REJECTED);
        assert_eq!(RelationStrategy::None.name(), "none");
    }

    #[test]
    fn test_wrap_angle() {
        assert_relative_eq!(wrap_angle(3.0 * PI / 2.0), -PI / 2.0, epsilon = 1e-12);
        assert_relative_eq!(wrap_angle(-3.0 * PI / 2.0), PI / 2.0, epsilon = 1e-12);
        assert_relative_eq!(wrap_angle(0.2), 0.2);
    }
}
