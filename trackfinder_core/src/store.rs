//! Per-event space-point arena.
//!
//! Every later structure (graph nodes, candidates, merged trajectories) refers
//! to points by [`SpacePointId`]; the store is the only owner of the data and
//! is read-only once built.

use std::collections::HashMap;

use nalgebra::{Matrix3, Vector3};
use tracing::warn;
use trackfinder_env::{GeometryService, LayerId, SensorId, SpacePoint, SpacePointId, Subsystem};

use crate::error::EventError;

/// A measurement in sensor-local coordinates, before alignment.
#[derive(Debug, Clone)]
pub struct LocalMeasurement {
    pub id: SpacePointId,
    pub sensor: SensorId,
    pub layer: LayerId,
    pub subsystem: Subsystem,
    /// Local position (u, v, w) in cm
    pub local: Vector3<f64>,
    /// Local covariance in cm²
    pub covariance: Matrix3<f64>,
}

/// Flat arena of the valid space points of one event.
#[derive(Debug, Clone, Default)]
pub struct SpacePointStore {
    points: Vec<SpacePoint>,
    index: HashMap<SpacePointId, usize>,
    rejected: Vec<SpacePointId>,
}

impl SpacePointStore {
    /// Build a store, excluding malformed points and duplicate ids.
    ///
    /// Excluded points are logged and counted as data errors; they never
    /// reach the graph.
    pub fn new(points: impl IntoIterator<Item = SpacePoint>) -> Self {
        let mut store = Self::default();
        for point in points {
            store.insert(point);
        }
        store
    }

    /// Build a store from sensor-local measurements, placing each one with
    /// the geometry service. A sensor the service does not know is a data
    /// error for that measurement only.
    pub fn from_local_measurements(
        geometry: &dyn GeometryService,
        measurements: impl IntoIterator<Item = LocalMeasurement>,
    ) -> Self {
        let mut store = Self::default();
        for m in measurements {
            match to_global(geometry, &m) {
                Ok((position, covariance)) => {
                    let point = SpacePoint::new(m.id, position, 0.0, m.layer, m.sensor, m.subsystem)
                        .with_covariance(covariance);
                    store.insert(point);
                }
                Err(e) => {
                    warn!("Dropping space point {}: {}", m.id, e);
                    store.rejected.push(m.id);
                }
            }
        }
        store
    }

    fn insert(&mut self, point: SpacePoint) {
        if !point.is_well_formed() {
            warn!(
                "Dropping malformed space point {} (layer {}, subsystem {})",
                point.id, point.layer.0, point.subsystem
            );
            self.rejected.push(point.id);
            return;
        }
        if self.index.contains_key(&point.id) {
            warn!("Dropping duplicate space point id {}", point.id);
            self.rejected.push(point.id);
            return;
        }
        self.index.insert(point.id, self.points.len());
        self.points.push(point);
    }

    pub fn get(&self, id: SpacePointId) -> Option<&SpacePoint> {
        self.index.get(&id).map(|&i| &self.points[i])
    }

    /// Resolve a hit list, failing on the first id not in the store.
    pub fn resolve(&self, ids: &[SpacePointId]) -> Result<Vec<&SpacePoint>, EventError> {
        ids.iter()
            .map(|&id| self.get(id).ok_or(EventError::UnknownSpacePoint(id)))
            .collect()
    }

    pub fn contains(&self, id: SpacePointId) -> bool {
        self.index.contains_key(&id)
    }

    /// Valid points in insertion order.
    pub fn points(&self) -> &[SpacePoint] {
        &self.points
    }

    /// Valid points of the given subsystems.
    pub fn points_of<'a>(
        &'a self,
        subsystems: &'a [Subsystem],
    ) -> impl Iterator<Item = &'a SpacePoint> + 'a {
        self.points
            .iter()
            .filter(move |p| subsystems.contains(&p.subsystem))
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// Number of points excluded at construction.
    pub fn data_errors(&self) -> usize {
        self.rejected.len()
    }

    /// Ids of the excluded points.
    pub fn rejected(&self) -> &[SpacePointId] {
        &self.rejected
    }

    /// Distinct layers present, ascending.
    pub fn layers(&self) -> Vec<LayerId> {
        let mut layers: Vec<LayerId> = self.points.iter().map(|p| p.layer).collect();
        layers.sort_unstable();
        layers.dedup();
        layers
    }
}

/// Local → global for position and covariance. The rotation is recovered
/// from the service by mapping the local unit vectors.
fn to_global(
    geometry: &dyn GeometryService,
    m: &LocalMeasurement,
) -> Result<(Vector3<f64>, Matrix3<f64>), trackfinder_env::EnvError> {
    let position = geometry.local_to_global(m.sensor, m.local)?;
    let origin = geometry.local_to_global(m.sensor, Vector3::zeros())?;
    let mut rotation = Matrix3::zeros();
    for axis in 0..3 {
        let column = geometry.local_to_global(m.sensor, Vector3::ith(axis, 1.0))? - origin;
        rotation.set_column(axis, &column);
    }
    let covariance = rotation * m.covariance * rotation.transpose();
    Ok((position, covariance))
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use trackfinder_env::RigidGeometry;

    fn sp(id: u32, x: f64, layer: u16) -> SpacePoint {
        SpacePoint::new(
            SpacePointId(id),
            Vector3::new(x, 0.0, 0.0),
            0.01,
            LayerId(layer),
            SensorId(0),
            Subsystem::Svd,
        )
    }

    #[test]
    fn test_malformed_points_are_counted_not_stored() {
        let store = SpacePointStore::new(vec![
            sp(1, 1.0, 1),
            sp(2, f64::NAN, 2),
            sp(3, 3.0, 0),
            sp(4, 4.0, 3),
        ]);
        assert_eq!(store.len(), 2);
        assert_eq!(store.data_errors(), 2);
        assert_eq!(store.rejected(), &[SpacePointId(2), SpacePointId(3)]);
        assert!(store.get(SpacePointId(2)).is_none());
        assert!(store.contains(SpacePointId(4)));
    }

    #[test]
    fn test_duplicate_id_is_a_data_error() {
        let store = SpacePointStore::new(vec![sp(1, 1.0, 1), sp(1, 2.0, 2)]);
        assert_eq!(store.len(), 1);
        assert_eq!(store.data_errors(), 1);
        assert_relative_eq!(store.get(SpacePointId(1)).unwrap().position.x, 1.0);
    }

    #[test]
    fn test_resolve_unknown_id() {
        let store = SpacePointStore::new(vec![sp(1, 1.0, 1)]);
        assert!(store.resolve(&[SpacePointId(1)]).is_ok());
        assert!(matches!(
            store.resolve(&[SpacePointId(1), SpacePointId(9)]),
            Err(EventError::UnknownSpacePoint(SpacePointId(9)))
        ));
    }

    #[test]
    fn test_layers_sorted_distinct() {
        let store = SpacePointStore::new(vec![sp(1, 1.0, 3), sp(2, 1.0, 1), sp(3, 1.0, 3)]);
        assert_eq!(store.layers(), vec![LayerId(1), LayerId(3)]);
    }

    #[test]
    fn test_local_measurements_are_placed_and_rotated() {
        let mut geometry = RigidGeometry::new();
        geometry.place_on_cylinder(SensorId(5), 4.0, std::f64::consts::FRAC_PI_2, 0.0);

        let measurement = LocalMeasurement {
            id: SpacePointId(1),
            sensor: SensorId(5),
            layer: LayerId(3),
            subsystem: Subsystem::Svd,
            local: Vector3::zeros(),
            covariance: Matrix3::from_diagonal(&Vector3::new(0.01, 0.04, 0.09)),
        };
        let unknown = LocalMeasurement {
            id: SpacePointId(2),
            sensor: SensorId(99),
            ..measurement.clone()
        };

        let store = SpacePointStore::from_local_measurements(&geometry, vec![measurement, unknown]);
        assert_eq!(store.len(), 1);
        assert_eq!(store.data_errors(), 1);

        let p = store.get(SpacePointId(1)).unwrap();
        assert_relative_eq!(p.radius_xy(), 4.0, epsilon = 1e-9);
        // rotation preserves the trace of the covariance
        assert_relative_eq!(p.covariance.trace(), 0.14, epsilon = 1e-12);
    }
}
