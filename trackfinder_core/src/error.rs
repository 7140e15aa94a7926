//! Error taxonomy of the track finder.
//!
//! - [`ConfigError`]: rejected at pipeline construction, before any event.
//! - [`EventError`]: broken invariants or cancellation; fatal for one event only.
//!
//! Malformed space points are *not* errors: the store drops them and the
//! count ends up in the event diagnostics.

use thiserror::Error;
use trackfinder_env::{EnvError, SpacePointId};

use crate::candidate::CandidateId;

/// Invalid pipeline configuration.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConfigError {
    #[error("jump_size must be at least 1 (got {0})")]
    InvalidJumpSize(u16),

    #[error("min_hits_per_candidate must be at least 3 (got {0})")]
    TooFewMinHits(usize),

    #[error("Parameter {name} out of range: {value}")]
    OutOfRange { name: String, value: f64 },

    #[error("Parameter {0} must be non-zero")]
    Zero(String),

    #[error("No subsystem enabled for track finding")]
    NoSubsystems,

    #[error("Configuration could not be parsed: {0}")]
    Parse(String),
}

impl ConfigError {
    pub(crate) fn out_of_range(name: &str, value: f64) -> Self {
        Self::OutOfRange {
            name: name.to_string(),
            value,
        }
    }
}

/// Event-level failure. Processing of the event stops; later events are unaffected.
#[derive(Debug, Clone, Error)]
pub enum EventError {
    #[error("Candidate {candidate} uses space point {point} more than once")]
    DuplicateHit {
        candidate: CandidateId,
        point: SpacePointId,
    },

    #[error("Relation {from} -> {to} does not point strictly outward (layer {from_layer} -> {to_layer})")]
    NonDagEdge {
        from: SpacePointId,
        to: SpacePointId,
        from_layer: u16,
        to_layer: u16,
    },

    #[error("Cellular automaton still changing after {sweeps} sweeps")]
    CaDidNotConverge { sweeps: usize },

    #[error("Candidate {0} is not ordered by layer")]
    NonMonotonicCandidate(CandidateId),

    #[error("Space point {0} is not in the event store")]
    UnknownSpacePoint(SpacePointId),

    #[error("Event processing cancelled during {stage}")]
    Cancelled { stage: &'static str },

    #[error("Source error: {0}")]
    Source(#[from] EnvError),
}

/// Either kind of failure, for the one-shot [`crate::process_event`] entry point.
#[derive(Debug, Clone, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Event(#[from] EventError),
}
