//! Candidate quality estimation.
//!
//! The transverse projection is fitted with the algebraic (Kåsa) circle fit,
//! a 3×3 linear system, falling back to a straight line for collinear input.
//! The longitudinal part is a weighted line z(s) over the signed transverse
//! arc length s. The same [`TrackModel`] is what the merger extrapolates.

use std::sync::Arc;

use nalgebra::{Matrix3, Vector2, Vector3};
use trackfinder_env::{CandidateFeatures, CandidateScorer, SpacePoint};

use crate::candidate::{HelixSeed, QualityRecord, RejectionReason};
use crate::config::QualityConfig;
use crate::relation::{clamp_score, wrap_angle};

/// Radius above which a circle is treated as a straight line (cm).
pub const MAX_RADIUS: f64 = 1e6;

/// Momentum reported for straight tracks (GeV).
pub const MAX_PT: f64 = 1e3;

/// pt[GeV] = 0.3 · B[T] · r[m] = 0.003 · B[T] · r[cm]
const PT_PER_TESLA_CM: f64 = 0.003;

const MIN_VARIANCE: f64 = 1e-10;

/// Sagittas below this many σ do not count toward the zigzag check.
const ZIGZAG_SIGMA: f64 = 3.0;

// ============================================================================
// TRACK MODEL
// ============================================================================

/// Transverse trajectory shape.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum TransverseShape {
    Circle { center: Vector2<f64>, radius: f64 },
    Line { origin: Vector2<f64>, direction: Vector2<f64> },
}

/// Helix (or straight line) through a set of space points.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TrackModel {
    pub shape: TransverseShape,
    /// +1 counter-clockwise, -1 clockwise, seen from +z
    pub turn: f64,
    /// Transverse position where s = 0 (first fitted point)
    pub reference: Vector2<f64>,
    pub z0: f64,
    pub tan_lambda: f64,
}

impl TrackModel {
    pub fn radius(&self) -> f64 {
        match self.shape {
            TransverseShape::Circle { radius, .. } => radius,
            TransverseShape::Line { .. } => f64::INFINITY,
        }
    }

    /// Transverse momentum for a field of `b_field` Tesla.
    pub fn pt(&self, b_field: f64) -> f64 {
        (PT_PER_TESLA_CM * b_field.abs() * self.radius()).min(MAX_PT)
    }

    /// Signed transverse path length from the reference point to the
    /// projection of `xy`, positive along the direction of travel.
    pub fn arc_length(&self, xy: &Vector2<f64>) -> f64 {
        match self.shape {
            TransverseShape::Circle { center, radius } => {
                self.turn * signed_angle(&(self.reference - center), &(xy - center)) * radius
            }
            TransverseShape::Line { direction, .. } => (xy - self.reference).dot(&direction),
        }
    }

    /// Signed transverse distance of `xy` from the trajectory.
    pub fn residual_xy(&self, xy: &Vector2<f64>) -> f64 {
        match self.shape {
            TransverseShape::Circle { center, radius } => (xy - center).norm() - radius,
            TransverseShape::Line { origin, direction } => cross(&direction, &(xy - origin)),
        }
    }

    /// z residual of a point against the helix.
    pub fn residual_z(&self, position: &Vector3<f64>) -> f64 {
        let xy = position.xy();
        position.z - (self.z0 + self.tan_lambda * self.arc_length(&xy))
    }

    /// Unit tangent of travel at the reference point.
    pub fn direction(&self) -> Vector2<f64> {
        match self.shape {
            TransverseShape::Circle { center, .. } => {
                let r = self.reference - center;
                let t = Vector2::new(-r.y, r.x) * self.turn;
                t / t.norm().max(f64::MIN_POSITIVE)
            }
            TransverseShape::Line { direction, .. } => direction,
        }
    }
}

fn cross(a: &Vector2<f64>, b: &Vector2<f64>) -> f64 {
    a.x * b.y - a.y * b.x
}

fn signed_angle(a: &Vector2<f64>, b: &Vector2<f64>) -> f64 {
    cross(a, b).atan2(a.dot(b))
}

fn sigma2_xy(p: &SpacePoint) -> f64 {
    (0.5 * p.variance_xy()).max(MIN_VARIANCE)
}

fn sigma2_z(p: &SpacePoint) -> f64 {
    p.variance_z().max(MIN_VARIANCE)
}

// ============================================================================
// FIT
// ============================================================================

/// Result of one helix fit.
#[derive(Debug, Clone, PartialEq)]
pub struct FitResult {
    pub model: TrackModel,
    pub chi2_xy: f64,
    pub chi2_z: f64,
    /// Normalised residual of every fitted point
    pub pulls: Vec<f64>,
}

/// Fit a helix to at least three points given inner → outer.
pub fn fit_track(points: &[&SpacePoint], use_helix: bool) -> Option<FitResult> {
    if points.len() < 3 {
        return None;
    }
    let xy: Vec<Vector2<f64>> = points.iter().map(|p| p.position.xy()).collect();
    let w: Vec<f64> = points.iter().map(|p| 1.0 / sigma2_xy(p)).collect();
    let w_sum: f64 = w.iter().sum();
    let mean = xy.iter().zip(&w).map(|(p, wi)| p * *wi).sum::<Vector2<f64>>() / w_sum;

    let first = xy[0];
    let last = xy[xy.len() - 1];
    let shape = kasa_circle(&xy, &w, &mean).unwrap_or_else(|| straight_line(&xy, &w, &mean));
    let turn = match shape {
        TransverseShape::Circle { center, .. } => {
            if signed_angle(&(first - center), &(last - center)) < 0.0 {
                -1.0
            } else {
                1.0
            }
        }
        TransverseShape::Line { .. } => 1.0,
    };

    let mut model = TrackModel {
        shape,
        turn,
        reference: first,
        z0: 0.0,
        tan_lambda: 0.0,
    };
    let s: Vec<f64> = xy.iter().map(|p| model.arc_length(p)).collect();
    let (z0, tan_lambda) = line_sz(points, &s);
    model.z0 = z0;
    model.tan_lambda = tan_lambda;

    let mut chi2_xy = 0.0;
    let mut chi2_z = 0.0;
    let mut pulls = Vec::with_capacity(points.len());
    for (i, p) in points.iter().enumerate() {
        let rxy2 = model.residual_xy(&xy[i]).powi(2) * w[i];
        let rz2 = if use_helix {
            model.residual_z(&p.position).powi(2) / sigma2_z(p)
        } else {
            0.0
        };
        chi2_xy += rxy2;
        chi2_z += rz2;
        pulls.push((rxy2 + rz2).sqrt());
    }

    Some(FitResult {
        model,
        chi2_xy,
        chi2_z,
        pulls,
    })
}

/// Algebraic circle fit in coordinates centred on the weighted mean.
fn kasa_circle(xy: &[Vector2<f64>], w: &[f64], mean: &Vector2<f64>) -> Option<TransverseShape> {
    let mut m: Matrix3<f64> = Matrix3::zeros();
    let mut v: Vector3<f64> = Vector3::zeros();
    for (p, &wi) in xy.iter().zip(w) {
        let q = p - mean;
        let row = Vector3::new(q.x, q.y, 1.0);
        m += row * row.transpose() * wi;
        v -= row * (wi * q.norm_squared());
    }
    let sol = m.try_inverse()? * v;
    let center = Vector2::new(-0.5 * sol.x, -0.5 * sol.y);
    let r2 = center.norm_squared() - sol.z;
    if !r2.is_finite() || r2 <= 0.0 || r2 > MAX_RADIUS * MAX_RADIUS {
        return None;
    }
    Some(TransverseShape::Circle {
        center: center + mean,
        radius: r2.sqrt(),
    })
}

/// Principal axis through the weighted mean, oriented first → last.
fn straight_line(xy: &[Vector2<f64>], w: &[f64], mean: &Vector2<f64>) -> TransverseShape {
    let (mut sxx, mut sxy, mut syy) = (0.0, 0.0, 0.0);
    for (p, &wi) in xy.iter().zip(w) {
        let q = p - mean;
        sxx += wi * q.x * q.x;
        sxy += wi * q.x * q.y;
        syy += wi * q.y * q.y;
    }
    let theta = 0.5 * (2.0 * sxy).atan2(sxx - syy);
    let mut direction = Vector2::new(theta.cos(), theta.sin());
    if direction.dot(&(xy[xy.len() - 1] - xy[0])) < 0.0 {
        direction = -direction;
    }
    TransverseShape::Line {
        origin: *mean,
        direction,
    }
}

/// Weighted z = z0 + tanλ · s.
fn line_sz(points: &[&SpacePoint], s: &[f64]) -> (f64, f64) {
    let (mut sw, mut sws, mut swz, mut swss, mut swsz) = (0.0, 0.0, 0.0, 0.0, 0.0);
    for (p, &si) in points.iter().zip(s) {
        let wi = 1.0 / sigma2_z(p);
        let z = p.position.z;
        sw += wi;
        sws += wi * si;
        swz += wi * z;
        swss += wi * si * si;
        swsz += wi * si * z;
    }
    let det = sw * swss - sws * sws;
    if det.abs() <= f64::EPSILON * sw * swss.max(1.0) {
        return (swz / sw, 0.0);
    }
    let tan_lambda = (sw * swsz - sws * swz) / det;
    let z0 = (swz - tan_lambda * sws) / sw;
    (z0, tan_lambda)
}

// ============================================================================
// SHAPE FILTERS
// ============================================================================

/// True when resolvable curvature signs of consecutive triplets disagree.
pub fn is_zigzag(points: &[&SpacePoint]) -> bool {
    let mut positive = false;
    let mut negative = false;
    for t in points.windows(3) {
        let (a, b, c) = (t[0].position.xy(), t[1].position.xy(), t[2].position.xy());
        let turn = cross(&(b - a), &(c - b));
        let chord = (c - a).norm();
        if chord == 0.0 {
            continue;
        }
        let sagitta = turn.abs() / chord;
        if sagitta < ZIGZAG_SIGMA * sigma2_xy(t[1]).sqrt() {
            continue;
        }
        if turn > 0.0 {
            positive = true;
        } else {
            negative = true;
        }
    }
    positive && negative
}

/// pt from the circumcircle of each consecutive triplet.
pub fn triplet_pts(points: &[&SpacePoint], b_field: f64) -> Vec<f64> {
    points
        .windows(3)
        .map(|t| {
            let (a, b, c) = (t[0].position.xy(), t[1].position.xy(), t[2].position.xy());
            let area2 = cross(&(b - a), &(c - a)).abs();
            if area2 == 0.0 {
                return MAX_PT;
            }
            let radius = (b - a).norm() * (c - b).norm() * (c - a).norm() / (2.0 * area2);
            (PT_PER_TESLA_CM * b_field.abs() * radius).min(MAX_PT)
        })
        .collect()
}

// ============================================================================
// ESTIMATORS
// ============================================================================

/// Scores a candidate from its resolved points (inner → outer).
///
/// Implementations are pure: the same points always give the same record.
pub trait QualityEstimator: Send + Sync {
    fn estimate(&self, points: &[&SpacePoint]) -> QualityRecord;

    fn name(&self) -> &str {
        "quality"
    }
}

/// A fit after outlier trimming, with the indices of the points kept.
#[derive(Debug, Clone)]
pub struct TrimmedFit {
    pub fit: FitResult,
    pub used: Vec<usize>,
}

/// Circle/helix fit estimator.
#[derive(Debug, Clone, PartialEq)]
pub struct CircleFitEstimator {
    config: QualityConfig,
}

impl CircleFitEstimator {
    pub fn new(config: QualityConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &QualityConfig {
        &self.config
    }

    /// Fit, dropping the worst point while its pull exceeds `outlier_sigma`
    /// and more than three points remain.
    pub fn fit(&self, points: &[&SpacePoint]) -> Option<TrimmedFit> {
        let mut used: Vec<usize> = (0..points.len()).collect();
        loop {
            let subset: Vec<&SpacePoint> = used.iter().map(|&i| points[i]).collect();
            let fit = fit_track(&subset, self.config.use_helix)?;
            if used.len() <= 3 {
                return Some(TrimmedFit { fit, used });
            }
            let (worst, pull) = fit
                .pulls
                .iter()
                .enumerate()
                .max_by(|a, b| a.1.total_cmp(b.1))
                .map(|(i, p)| (i, *p))?;
            if pull <= self.config.outlier_sigma {
                return Some(TrimmedFit { fit, used });
            }
            used.remove(worst);
        }
    }

    fn ndf(&self, n: usize) -> u32 {
        let n = n as u32;
        if self.config.use_helix {
            (2 * n).saturating_sub(5)
        } else {
            n.saturating_sub(3)
        }
    }

    fn length_factor(&self, n: usize) -> f64 {
        (n as f64 / self.config.reference_hits as f64).min(1.0)
    }

    fn seed(&self, model: &TrackModel, innermost: &SpacePoint) -> HelixSeed {
        let pt = model.pt(self.config.b_field_tesla);
        let t = model.direction();
        let charge = match model.shape {
            TransverseShape::Line { .. } => 0,
            // counter-clockwise travel in a +z field means negative charge
            TransverseShape::Circle { .. } => {
                if model.turn * self.config.b_field_tesla > 0.0 {
                    -1
                } else {
                    1
                }
            }
        };
        HelixSeed {
            position: innermost.position,
            momentum: Vector3::new(pt * t.x, pt * t.y, pt * model.tan_lambda),
            charge,
            radius: model.radius(),
        }
    }

    fn rejected(reason: RejectionReason, used_hits: usize) -> QualityRecord {
        QualityRecord {
            rejection: Some(reason),
            used_hits,
            ..QualityRecord::unevaluated()
        }
    }

    /// Feature summary of a candidate for learned scorers.
    pub fn features(&self, points: &[&SpacePoint], record: &QualityRecord) -> CandidateFeatures {
        let (pt, radius) = match &record.seed {
            Some(seed) => (seed.momentum.xy().norm(), seed.radius),
            None => (0.0, 0.0),
        };
        let max_delta_phi = points
            .windows(2)
            .map(|w| wrap_angle(w[1].phi() - w[0].phi()).abs())
            .fold(0.0, f64::max);
        let path_length = points
            .windows(2)
            .map(|w| (w[1].position - w[0].position).norm())
            .sum();
        CandidateFeatures {
            hits: points.iter().map(|p| p.id).collect(),
            layers: points.iter().map(|p| p.layer).collect(),
            chi2: record.chi2,
            ndf: record.ndf,
            pt,
            radius,
            max_delta_phi,
            path_length,
        }
    }
}

impl QualityEstimator for CircleFitEstimator {
    fn estimate(&self, points: &[&SpacePoint]) -> QualityRecord {
        let c = &self.config;
        if points.len() < 3 {
            return Self::rejected(RejectionReason::TooFewHits, points.len());
        }
        if c.zigzag_filter && is_zigzag(points) {
            return Self::rejected(RejectionReason::ZigZag, points.len());
        }
        if c.delta_pt_filter && points.len() >= 4 {
            let pts = triplet_pts(points, c.b_field_tesla);
            if pts.windows(2).any(|w| (w[1] - w[0]).abs() > c.max_delta_pt) {
                return Self::rejected(RejectionReason::DeltaPt, points.len());
            }
        }

        let Some(TrimmedFit { fit, used }) = self.fit(points) else {
            return Self::rejected(RejectionReason::TooFewHits, points.len());
        };

        let ndf = self.ndf(used.len());
        let chi2 = fit.chi2_xy + fit.chi2_z;
        let reduced = if ndf == 0 { 0.0 } else { chi2 / f64::from(ndf) };
        let pt = fit.model.pt(c.b_field_tesla);

        let rejection = if pt < c.momentum_floor {
            Some(RejectionReason::LowMomentum)
        } else if reduced > c.quality_chi2_ceiling {
            Some(RejectionReason::Chi2Ceiling)
        } else {
            None
        };

        QualityRecord {
            chi2,
            ndf,
            feasible: rejection.is_none(),
            score: self.length_factor(used.len()) / (1.0 + reduced),
            used_hits: used.len(),
            seed: Some(self.seed(&fit.model, points[used[0]])),
            rejection,
        }
    }

    fn name(&self) -> &str {
        "circle_fit"
    }
}

/// Closed set of built-in quality strategies.
#[derive(Clone)]
pub enum QualityStrategy {
    /// Score = length factor × fit factor
    CircleFit(CircleFitEstimator),
    /// Fit for feasibility, score from a learned classifier
    Learned {
        fit: CircleFitEstimator,
        scorer: Arc<dyn CandidateScorer>,
    },
    /// Fit for feasibility, score from the hit count only
    ByLength(CircleFitEstimator),
}

impl QualityStrategy {
    pub fn circle_fit(config: &QualityConfig) -> Self {
        QualityStrategy::CircleFit(CircleFitEstimator::new(config.clone()))
    }

    pub fn learned(config: &QualityConfig, scorer: Arc<dyn CandidateScorer>) -> Self {
        QualityStrategy::Learned {
            fit: CircleFitEstimator::new(config.clone()),
            scorer,
        }
    }

    pub fn by_length(config: &QualityConfig) -> Self {
        QualityStrategy::ByLength(CircleFitEstimator::new(config.clone()))
    }

    /// The underlying fitter, also used for extrapolation.
    pub fn fitter(&self) -> &CircleFitEstimator {
        match self {
            QualityStrategy::CircleFit(f) => f,
            QualityStrategy::Learned { fit, .. } => fit,
            QualityStrategy::ByLength(f) => f,
        }
    }
}

impl std::fmt::Debug for QualityStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            QualityStrategy::CircleFit(_) => f.write_str("CircleFit"),
            QualityStrategy::Learned { scorer, .. } => write!(f, "Learned({})", scorer.name()),
            QualityStrategy::ByLength(_) => f.write_str("ByLength"),
        }
    }
}

impl QualityEstimator for QualityStrategy {
    fn estimate(&self, points: &[&SpacePoint]) -> QualityRecord {
        match self {
            QualityStrategy::CircleFit(fit) => fit.estimate(points),
            QualityStrategy::Learned { fit, scorer } => {
                let mut record = fit.estimate(points);
                record.score = clamp_score(scorer.score(&fit.features(points, &record)));
                record
            }
            QualityStrategy::ByLength(fit) => {
                let mut record = fit.estimate(points);
                record.score = fit.length_factor(points.len());
                record
            }
        }
    }

    fn name(&self) -> &str {
        match self {
            QualityStrategy::CircleFit(_) => "circle_fit",
            QualityStrategy::Learned { .. } => "learned",
            QualityStrategy::ByLength(_) => "by_length",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use std::f64::consts::FRAC_PI_2;
    use trackfinder_env::{LayerId, SensorId, SpacePointId, Subsystem};

    fn sp(i: usize, x: f64, y: f64, z: f64) -> SpacePoint {
        SpacePoint::new(
            SpacePointId(i as u32),
            Vector3::new(x, y, z),
            0.01,
            LayerId(i as u16 + 1),
            SensorId(0),
            Subsystem::Svd,
        )
    }

    /// Points on a circle through the origin, centre (0, radius), travelling
    /// counter-clockwise; z = tan_lambda · s.
    fn arc(radius: f64, step: f64, n: usize, tan_lambda: f64) -> Vec<SpacePoint> {
        (1..=n)
            .map(|k| {
                let phi = k as f64 * step;
                let theta = -FRAC_PI_2 + phi;
                sp(
                    k - 1,
                    radius * theta.cos(),
                    radius + radius * theta.sin(),
                    tan_lambda * radius * phi,
                )
            })
            .collect()
    }

    fn refs(points: &[SpacePoint]) -> Vec<&SpacePoint> {
        points.iter().collect()
    }

    fn estimator() -> CircleFitEstimator {
        CircleFitEstimator::new(QualityConfig::default())
    }

    // ========================================================================
    // FIT
    // ========================================================================

    #[test]
    fn test_exact_helix_recovered() {
        let points = arc(100.0, 0.05, 5, 0.5);
        let fit = fit_track(&refs(&points), true).unwrap();
        assert_relative_eq!(fit.model.radius(), 100.0, epsilon = 1e-6);
        assert_relative_eq!(fit.model.tan_lambda, 0.5, epsilon = 1e-6);
        assert_relative_eq!(fit.model.turn, 1.0);
        assert!(fit.chi2_xy + fit.chi2_z < 1e-6);
    }

    #[test]
    fn test_collinear_points_fit_a_line() {
        let points: Vec<SpacePoint> = (0..4).map(|i| sp(i, 2.0 + 2.0 * i as f64, 0.0, 0.0)).collect();
        let fit = fit_track(&refs(&points), true).unwrap();
        assert!(matches!(fit.model.shape, TransverseShape::Line { .. }));
        assert_relative_eq!(fit.model.direction(), Vector2::new(1.0, 0.0), epsilon = 1e-12);
        assert_relative_eq!(fit.model.pt(1.5), MAX_PT);
    }

    #[test]
    fn test_arc_length_is_signed() {
        let points = arc(50.0, 0.1, 3, 0.0);
        let fit = fit_track(&refs(&points), false).unwrap();
        let before = Vector2::new(0.0, 0.0);
        assert!(fit.model.arc_length(&before) < 0.0);
        assert!(fit.model.arc_length(&points[2].position.xy()) > 0.0);
    }

    // ========================================================================
    // ESTIMATE
    // ========================================================================

    #[test]
    fn test_clean_candidate_is_feasible() {
        let points = arc(100.0, 0.05, 5, 0.2);
        let record = estimator().estimate(&refs(&points));
        assert!(record.feasible);
        assert_eq!(record.ndf, 5);
        assert_eq!(record.used_hits, 5);
        assert_relative_eq!(record.score, 5.0 / 6.0, epsilon = 1e-6);

        let seed = record.seed.unwrap();
        assert_eq!(seed.charge, -1);
        assert_relative_eq!(seed.momentum.xy().norm(), 0.45, epsilon = 1e-6);
        assert_relative_eq!(seed.momentum.z, 0.45 * 0.2, epsilon = 1e-6);
        assert_eq!(seed.position, points[0].position);
    }

    #[test]
    fn test_three_hits_have_one_dof() {
        let points = arc(100.0, 0.05, 3, 0.0);
        let record = estimator().estimate(&refs(&points));
        assert!(record.feasible);
        assert_eq!(record.ndf, 1);
        assert_relative_eq!(record.score, 0.5, epsilon = 1e-6);
    }

    #[test]
    fn test_too_few_hits() {
        let points = arc(100.0, 0.05, 2, 0.0);
        let record = estimator().estimate(&refs(&points));
        assert!(!record.feasible);
        assert_eq!(record.rejection, Some(RejectionReason::TooFewHits));
    }

    #[test]
    fn test_low_momentum_rejected() {
        // r = 5 cm at 1.5 T is 22.5 MeV
        let points = arc(5.0, 0.3, 4, 0.0);
        let record = estimator().estimate(&refs(&points));
        assert_eq!(record.rejection, Some(RejectionReason::LowMomentum));
    }

    #[test]
    fn test_outlier_trimmed() {
        let mut points = arc(100.0, 0.05, 6, 0.0);
        points[3].position.x += 1.0;
        let record = estimator().estimate(&refs(&points));
        assert_eq!(record.used_hits, 5);
        assert!(record.feasible);
    }

    #[test]
    fn test_bad_fit_hits_chi2_ceiling() {
        let mut points = arc(100.0, 0.05, 3, 0.0);
        // z does not follow a line in s
        points[1].position.z += 1.0;
        let record = estimator().estimate(&refs(&points));
        assert_eq!(record.rejection, Some(RejectionReason::Chi2Ceiling));
        assert!(record.score < 0.01);
    }

    #[test]
    fn test_zigzag_rejected() {
        let points: Vec<SpacePoint> = (0..5)
            .map(|i| sp(i, 2.0 + 2.0 * i as f64, if i % 2 == 1 { 0.5 } else { 0.0 }, 0.0))
            .collect();
        let record = estimator().estimate(&refs(&points));
        assert_eq!(record.rejection, Some(RejectionReason::ZigZag));

        let config = QualityConfig {
            zigzag_filter: false,
            ..QualityConfig::default()
        };
        let record = CircleFitEstimator::new(config).estimate(&refs(&points));
        assert_ne!(record.rejection, Some(RejectionReason::ZigZag));
    }

    #[test]
    fn test_noise_level_wiggle_is_not_zigzag() {
        let points: Vec<SpacePoint> = (0..5)
            .map(|i| sp(i, 2.0 + 2.0 * i as f64, if i % 2 == 1 { 0.005 } else { 0.0 }, 0.0))
            .collect();
        assert!(!is_zigzag(&refs(&points)));
    }

    #[test]
    fn test_delta_pt_filter() {
        // 4.5 GeV arc continued by a 45 MeV curl
        let mut points = arc(1000.0, 0.005, 3, 0.0);
        let tight = arc(10.0, 0.3, 5, 0.0);
        let offset = points[2].position - tight[0].position;
        for (k, p) in tight.iter().skip(1).take(2).enumerate() {
            points.push(sp(3 + k, p.position.x + offset.x, p.position.y + offset.y, 0.0));
        }
        let config = QualityConfig {
            delta_pt_filter: true,
            zigzag_filter: false,
            ..QualityConfig::default()
        };
        let record = CircleFitEstimator::new(config).estimate(&refs(&points));
        assert_eq!(record.rejection, Some(RejectionReason::DeltaPt));
    }

    #[test]
    fn test_estimate_is_idempotent() {
        let mut points = arc(80.0, 0.07, 6, 0.3);
        points[2].position.y += 0.003;
        let e = estimator();
        assert_eq!(e.estimate(&refs(&points)), e.estimate(&refs(&points)));
    }

    // ========================================================================
    // STRATEGIES
    // ========================================================================

    struct Constant(f64);

    impl CandidateScorer for Constant {
        fn score(&self, _: &CandidateFeatures) -> f64 {
            self.0
        }
    }

    #[test]
    fn test_learned_score_is_clamped() {
        let points = arc(100.0, 0.05, 4, 0.0);
        let config = QualityConfig::default();
        let high = QualityStrategy::learned(&config, Arc::new(Constant(3.0)));
        assert_relative_eq!(high.estimate(&refs(&points)).score, 1.0);
        let nan = QualityStrategy::learned(&config, Arc::new(Constant(f64::NAN)));
        let record = nan.estimate(&refs(&points));
        assert_relative_eq!(record.score, 0.0);
        assert!(record.feasible);
    }

    #[test]
    fn test_by_length() {
        let points = arc(100.0, 0.05, 3, 0.0);
        let strategy = QualityStrategy::by_length(&QualityConfig::default());
        assert_relative_eq!(strategy.estimate(&refs(&points)).score, 0.5);
        assert_eq!(strategy.name(), "by_length");
    }

    #[test]
    fn test_features() {
        let points = arc(100.0, 0.05, 4, 0.0);
        let e = estimator();
        let record = e.estimate(&refs(&points));
        let features = e.features(&refs(&points), &record);
        assert_eq!(features.n_hits(), 4);
        assert_relative_eq!(features.radius, 100.0, epsilon = 1e-6);
        assert!(features.path_length > 0.0);
    }
}
