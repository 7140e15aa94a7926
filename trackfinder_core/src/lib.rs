//! Trackfinder Core - track-candidate finding for layered tracking detectors
//!
//! Turns one event's space points into non-overlapping track candidates:
//! 1. **Segment network**: pairwise relations between points on nearby layers ([`graph`])
//! 2. **Cellular automaton**: longest inward-to-outward chains through the network ([`cellomat`])
//! 3. **Quality**: circle/helix fit, shape filters and a score in [0, 1] ([`quality`])
//! 4. **Conflict resolution**: Hopfield network over the overlap graph ([`hopfield`])
//! 5. **Merging**: CKF-style extension into a second subsystem ([`merger`])

pub mod assembler;
pub mod candidate;
pub mod cellomat;
pub mod config;
pub mod conflict;
pub mod error;
pub mod graph;
pub mod hopfield;
pub mod interrupt;
pub mod merger;
pub mod pipeline;
pub mod quality;
pub mod relation;
pub mod session;
pub mod store;

// Re-export key types for convenience
pub use assembler::{AcceptedTrack, Diagnostics, PipelineResult, TrajectoryCandidate};
pub use candidate::{CandidateId, HitRef, QualityRecord, TrackCandidate};
pub use config::{
    ExtractionMode, HopfieldConfig, MergeConfig, MergeDirection, PipelineConfig, QualityConfig, RelationConfig,
    SelectorStrategy,
};
pub use error::{ConfigError, EventError, PipelineError};
pub use interrupt::{Deadline, Interrupt, Never};
pub use merger::{MergeStage, MergedTrajectory};
pub use pipeline::{process_event, TrackFindingPipeline};
pub use quality::{QualityEstimator, QualityStrategy};
pub use relation::{Relation, RelationContext, RelationFilter, RelationStrategy};
pub use session::ReconstructionSession;
pub use store::SpacePointStore;
