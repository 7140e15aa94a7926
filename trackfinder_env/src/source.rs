//! Space-point producer abstraction.

use std::collections::HashMap;

use crate::error::EnvError;
use crate::types::{EventId, SpacePoint, Subsystem};

/// Upstream producer of space points (clustering + space-point creation).
///
/// Implementations must hand out the same points for the same
/// `(event, subsystem)` every time they are asked; the track finder relies on
/// this for reproducible results.
pub trait SpacePointSource: Send + Sync {
    /// Returns all space points of `subsystem` recorded in `event`.
    fn get_space_points(&self, event: EventId, subsystem: Subsystem) -> Result<Vec<SpacePoint>, EnvError>;

    /// Lists the events this source can deliver, in ascending order.
    fn events(&self) -> Vec<EventId>;
}

/// In-memory source, filled by tests and by the simulation oracle.
#[derive(Debug, Default, Clone)]
pub struct InMemorySource {
    points: HashMap<(EventId, Subsystem), Vec<SpacePoint>>,
}

impl InMemorySource {
    /// Creates an empty source.
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores (replacing) the points of one event/subsystem.
    pub fn insert(&mut self, event: EventId, subsystem: Subsystem, points: Vec<SpacePoint>) {
        self.points.insert((event, subsystem), points);
    }

    /// Number of stored (event, subsystem) slots.
    pub fn len(&self) -> usize {
        self.points.len()
    }

    /// True if nothing has been stored.
    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }
}

impl SpacePointSource for InMemorySource {
    fn get_space_points(&self, event: EventId, subsystem: Subsystem) -> Result<Vec<SpacePoint>, EnvError> {
        if let Some(points) = self.points.get(&(event, subsystem)) {
            return Ok(points.clone());
        }
        if self.points.keys().any(|(e, _)| *e == event) {
            Err(EnvError::SubsystemNotAvailable { event, subsystem })
        } else {
            Err(EnvError::EventNotFound(event))
        }
    }

    fn events(&self) -> Vec<EventId> {
        let mut events: Vec<EventId> = self.points.keys().map(|(e, _)| *e).collect();
        events.sort();
        events.dedup();
        events
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{LayerId, SensorId, SpacePointId};
    use nalgebra::Vector3;

    fn sample() -> SpacePoint {
        SpacePoint::new(
            SpacePointId(0),
            Vector3::new(1.0, 0.0, 0.0),
            0.01,
            LayerId(1),
            SensorId(0),
            Subsystem::Pxd,
        )
    }

    #[test]
    fn test_missing_event_and_subsystem() {
        let mut source = InMemorySource::new();
        source.insert(EventId(1), Subsystem::Pxd, vec![sample()]);

        assert_eq!(source.get_space_points(EventId(1), Subsystem::Pxd).unwrap().len(), 1);
        assert!(matches!(
            source.get_space_points(EventId(1), Subsystem::Cdc),
            Err(EnvError::SubsystemNotAvailable { .. })
        ));
        assert!(matches!(
            source.get_space_points(EventId(2), Subsystem::Pxd),
            Err(EnvError::EventNotFound(EventId(2)))
        ));
    }

    #[test]
    fn test_events_sorted_unique() {
        let mut source = InMemorySource::new();
        source.insert(EventId(5), Subsystem::Pxd, vec![]);
        source.insert(EventId(2), Subsystem::Svd, vec![]);
        source.insert(EventId(5), Subsystem::Svd, vec![]);
        assert_eq!(source.events(), vec![EventId(2), EventId(5)]);
    }
}
