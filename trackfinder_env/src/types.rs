//! Common types shared between the track finder and its upstream producers.

use nalgebra::{Matrix3, Vector3};
use serde::{Deserialize, Serialize};

/// Identifier of one recorded (or simulated) collision event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EventId(pub u64);

impl std::fmt::Display for EventId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "evt#{}", self.0)
    }
}

/// Opaque identifier of a space point, unique within one event.
///
/// Space points are stored in a flat arena; the id is the handle every
/// graph and candidate structure keeps instead of the position data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SpacePointId(pub u32);

impl std::fmt::Display for SpacePointId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "sp{}", self.0)
    }
}

/// Detector layer number, counted outward from the interaction point.
///
/// Layer ids are global across subsystems (pixel layers first, then strips,
/// then wire superlayers), so a layer difference is meaningful across a
/// subsystem boundary. Layer 0 is reserved and never valid for a hit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct LayerId(pub u16);

impl LayerId {
    /// Signed distance from `self` to `other` in layers.
    #[inline]
    pub fn gap_to(self, other: LayerId) -> i32 {
        i32::from(other.0) - i32::from(self.0)
    }
}

/// Identifier of a single sensor (ladder/wafer or wire cell group).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SensorId(pub u32);

/// Detector subsystems that can deliver space points.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Subsystem {
    /// Pixel vertex detector
    Pxd,
    /// Silicon strip vertex detector
    Svd,
    /// Central wire drift chamber
    Cdc,
}

impl Subsystem {
    /// All subsystems, innermost first.
    pub const ALL: [Subsystem; 3] = [Subsystem::Pxd, Subsystem::Svd, Subsystem::Cdc];

    /// Short lowercase name used in logs and exports.
    pub fn name(&self) -> &'static str {
        match self {
            Subsystem::Pxd => "pxd",
            Subsystem::Svd => "svd",
            Subsystem::Cdc => "cdc",
        }
    }
}

impl std::fmt::Display for Subsystem {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

impl std::str::FromStr for Subsystem {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "pxd" | "pixel" => Ok(Subsystem::Pxd),
            "svd" | "strip" => Ok(Subsystem::Svd),
            "cdc" | "wire" => Ok(Subsystem::Cdc),
            _ => Err(format!("Unknown subsystem: {}", s)),
        }
    }
}

/// Back-reference to a raw cluster a space point was built from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ClusterRef {
    /// Index of the cluster in the producer's cluster collection
    pub index: u32,
    /// Readout side the cluster belongs to (u/v strips; 0 for pixels)
    pub side: u8,
}

/// A single 3D position measurement delivered by the clustering stage.
///
/// Immutable after creation; owned by the space-point store of its event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpacePoint {
    /// Handle of this point inside its event
    pub id: SpacePointId,

    /// Global position [x, y, z] in cm
    pub position: Vector3<f64>,

    /// 3×3 position covariance in cm²
    pub covariance: Matrix3<f64>,

    /// Global layer number
    pub layer: LayerId,

    /// Sensor the measurement was taken on
    pub sensor: SensorId,

    /// Producing subsystem
    pub subsystem: Subsystem,

    /// Originating clusters (may be empty)
    pub clusters: Vec<ClusterRef>,
}

impl SpacePoint {
    /// Create a space point with an isotropic position uncertainty `sigma`.
    pub fn new(
        id: SpacePointId,
        position: Vector3<f64>,
        sigma: f64,
        layer: LayerId,
        sensor: SensorId,
        subsystem: Subsystem,
    ) -> Self {
        Self {
            id,
            position,
            covariance: Matrix3::from_diagonal_element(sigma * sigma),
            layer,
            sensor,
            subsystem,
            clusters: Vec::new(),
        }
    }

    /// Attach cluster back-references.
    pub fn with_clusters(mut self, clusters: Vec<ClusterRef>) -> Self {
        self.clusters = clusters;
        self
    }

    /// Replace the covariance matrix.
    pub fn with_covariance(mut self, covariance: Matrix3<f64>) -> Self {
        self.covariance = covariance;
        self
    }

    /// Transverse radius sqrt(x² + y²).
    #[inline]
    pub fn radius_xy(&self) -> f64 {
        self.position.x.hypot(self.position.y)
    }

    /// Azimuthal angle in (-π, π].
    #[inline]
    pub fn phi(&self) -> f64 {
        self.position.y.atan2(self.position.x)
    }

    /// Combined transverse variance σx² + σy² (used by the circle fit).
    #[inline]
    pub fn variance_xy(&self) -> f64 {
        self.covariance[(0, 0)] + self.covariance[(1, 1)]
    }

    /// Longitudinal variance σz².
    #[inline]
    pub fn variance_z(&self) -> f64 {
        self.covariance[(2, 2)]
    }

    /// True when position and covariance are finite and the layer is valid.
    pub fn is_well_formed(&self) -> bool {
        self.layer.0 != 0
            && self.position.iter().all(|v| v.is_finite())
            && self.covariance.iter().all(|v| v.is_finite())
            && self.covariance[(0, 0)] >= 0.0
            && self.covariance[(1, 1)] >= 0.0
            && self.covariance[(2, 2)] >= 0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn point(x: f64, y: f64, z: f64) -> SpacePoint {
        SpacePoint::new(
            SpacePointId(0),
            Vector3::new(x, y, z),
            0.01,
            LayerId(1),
            SensorId(7),
            Subsystem::Svd,
        )
    }

    #[test]
    fn test_nan_position_is_malformed() {
        assert!(point(1.0, 2.0, 3.0).is_well_formed());
        assert!(!point(f64::NAN, 2.0, 3.0).is_well_formed());
        assert!(!point(1.0, f64::INFINITY, 3.0).is_well_formed());
    }

    #[test]
    fn test_layer_zero_is_malformed() {
        let mut p = point(1.0, 0.0, 0.0);
        p.layer = LayerId(0);
        assert!(!p.is_well_formed());
    }

    #[test]
    fn test_layer_gap_is_signed() {
        assert_eq!(LayerId(3).gap_to(LayerId(5)), 2);
        assert_eq!(LayerId(5).gap_to(LayerId(3)), -2);
    }

    #[test]
    fn test_subsystem_parse() {
        assert_eq!("SVD".parse::<Subsystem>().unwrap(), Subsystem::Svd);
        assert!("tof".parse::<Subsystem>().is_err());
    }

    #[test]
    fn test_radius_and_phi() {
        let p = point(0.0, 2.0, 5.0);
        approx::assert_relative_eq!(p.radius_xy(), 2.0);
        approx::assert_relative_eq!(p.phi(), std::f64::consts::FRAC_PI_2);
    }
}
