//! Trackfinder Environment Abstraction Layer
//!
//! The track finder consumes three collaborators it does not implement:
//!
//! - a **space-point source** (digitization + clustering + space-point creation),
//! - a **geometry service** (sensor placements, local → global transforms),
//! - an optional **candidate scorer** (a learned classifier).
//!
//! This crate holds their traits, small in-memory implementations, and the
//! leaf data types ([`SpacePoint`] and the id newtypes) shared by every crate
//! in the workspace.

mod error;
mod geometry;
mod scorer;
mod source;
mod types;

pub use error::EnvError;
pub use geometry::{GeometryService, RigidGeometry};
pub use scorer::{CandidateFeatures, CandidateScorer, LogisticScorer};
pub use source::{InMemorySource, SpacePointSource};
pub use types::{ClusterRef, EventId, LayerId, SensorId, SpacePoint, SpacePointId, Subsystem};
