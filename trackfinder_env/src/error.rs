//! Error types for the upstream collaborator interfaces.

use thiserror::Error;

use crate::types::{EventId, SensorId, Subsystem};

/// Errors raised by space-point sources and geometry services.
#[derive(Debug, Clone, Error)]
pub enum EnvError {
    /// The producer has no data for the requested event
    #[error("Event not available: {0}")]
    EventNotFound(EventId),

    /// The requested subsystem was not read out for this event
    #[error("Subsystem {subsystem} not available for {event}")]
    SubsystemNotAvailable { event: EventId, subsystem: Subsystem },

    /// Geometry lookup for an unknown sensor
    #[error("Unknown sensor: {0:?}")]
    UnknownSensor(SensorId),

    /// Producer-side failure with a free-form message
    #[error("Source error: {0}")]
    SourceError(String),
}

impl EnvError {
    /// Creates a producer-side error.
    pub fn source(msg: impl Into<String>) -> Self {
        Self::SourceError(msg.into())
    }
}
