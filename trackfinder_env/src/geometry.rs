//! Geometry/alignment service abstraction.

use std::collections::HashMap;

use nalgebra::{Isometry3, Point3, Vector3};

use crate::error::EnvError;
use crate::types::SensorId;

/// Read-only lookup of sensor placements.
///
/// The track finder only ever asks for the local-to-global transform; sensor
/// pitches, materials and alignment constants stay behind this trait.
pub trait GeometryService: Send + Sync {
    /// Transforms sensor-local coordinates (u, v, w) to global (x, y, z).
    fn local_to_global(&self, sensor: SensorId, local: Vector3<f64>) -> Result<Vector3<f64>, EnvError>;
}

/// Geometry made of rigid per-sensor placements.
#[derive(Debug, Default, Clone)]
pub struct RigidGeometry {
    placements: HashMap<SensorId, Isometry3<f64>>,
}

impl RigidGeometry {
    /// Creates an empty geometry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers the placement of one sensor.
    pub fn place(&mut self, sensor: SensorId, placement: Isometry3<f64>) {
        self.placements.insert(sensor, placement);
    }

    /// Places a flat sensor tangent to a cylinder of `radius` at azimuth `phi`.
    ///
    /// Local u runs along rφ, v along z, w along the outward normal.
    pub fn place_on_cylinder(&mut self, sensor: SensorId, radius: f64, phi: f64, z_offset: f64) {
        let translation = Vector3::new(radius * phi.cos(), radius * phi.sin(), z_offset);
        let u = Vector3::new(-phi.sin(), phi.cos(), 0.0);
        let v = Vector3::z();
        let w = u.cross(&v);
        let rotation = nalgebra::Rotation3::from_basis_unchecked(&[u, v, w]);
        let placement = Isometry3::from_parts(
            nalgebra::Translation3::from(translation),
            nalgebra::UnitQuaternion::from_rotation_matrix(&rotation),
        );
        self.placements.insert(sensor, placement);
    }

    /// Number of placed sensors.
    pub fn sensor_count(&self) -> usize {
        self.placements.len()
    }
}

impl GeometryService for RigidGeometry {
    fn local_to_global(&self, sensor: SensorId, local: Vector3<f64>) -> Result<Vector3<f64>, EnvError> {
        let placement = self
            .placements
            .get(&sensor)
            .ok_or(EnvError::UnknownSensor(sensor))?;
        Ok(placement.transform_point(&Point3::from(local)).coords)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_cylinder_placement_origin_maps_to_surface() {
        let mut geometry = RigidGeometry::new();
        geometry.place_on_cylinder(SensorId(3), 4.0, std::f64::consts::FRAC_PI_2, 1.5);

        let global = geometry.local_to_global(SensorId(3), Vector3::zeros()).unwrap();
        assert_relative_eq!(global.x, 0.0, epsilon = 1e-12);
        assert_relative_eq!(global.y, 4.0, epsilon = 1e-12);
        assert_relative_eq!(global.z, 1.5, epsilon = 1e-12);
    }

    #[test]
    fn test_local_u_runs_along_phi() {
        let mut geometry = RigidGeometry::new();
        geometry.place_on_cylinder(SensorId(1), 2.0, 0.0, 0.0);

        // At phi = 0 the sensor plane is x = 2, u points to +y, v to +z.
        let global = geometry.local_to_global(SensorId(1), Vector3::new(0.5, 0.25, 0.0)).unwrap();
        assert_relative_eq!(global.x, 2.0, epsilon = 1e-12);
        assert_relative_eq!(global.y, 0.5, epsilon = 1e-12);
        assert_relative_eq!(global.z, 0.25, epsilon = 1e-12);
    }

    #[test]
    fn test_unknown_sensor() {
        let geometry = RigidGeometry::new();
        assert!(matches!(
            geometry.local_to_global(SensorId(9), Vector3::zeros()),
            Err(EnvError::UnknownSensor(SensorId(9)))
        ));
    }
}
