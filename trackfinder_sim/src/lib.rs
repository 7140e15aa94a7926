//! Trackfinder deterministic simulation harness
//!
//! Generates toy events with known truth and checks the track finder
//! against them.
//!
//! - **Detector**: concentric layers grouped into PXD, SVD and CDC ([`detector`])
//! - **Oracle**: helices from a seeded RNG, smeared into space points ([`oracle`])
//! - **Truth doubles**: relation filter and scorer backed by the truth map ([`truth`])
//! - **Scenarios**: named acceptance checks with efficiency and fake-rate metrics ([`runner`])
//!
//! Every random draw derives from one 64-bit seed, so a failing scenario
//! is reproduced by re-running it with the reported seed.
//!
//! # Usage
//!
//! ```ignore
//! use trackfinder_sim::{ScenarioRunner, scenarios::ScenarioId};
//!
//! let result = ScenarioRunner::new(42).with_events(10).run(ScenarioId::BusyEvent);
//! assert!(result.passed);
//! ```

pub mod detector;
pub mod error;
pub mod exporter;
pub mod oracle;
pub mod runner;
pub mod scenarios;
pub mod truth;

pub use detector::{DetectorLayer, DetectorLayout};
pub use error::SimError;
pub use exporter::{EventExport, SimExport};
pub use oracle::{Oracle, Particle, SimEvent};
pub use runner::{match_event, EventMatch, EventSetup, ScenarioMetrics, ScenarioResult, ScenarioRunner, Selection};
pub use truth::{purity, TruthRelationFilter, TruthScorer};
