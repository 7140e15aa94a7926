//! JSON exporter for offline inspection of scenario runs.
//!
//! Each event is written with its hits, truth and the accepted tracks so
//! the event display can overlay found tracks on the generated particles.

use serde::Serialize;
use std::collections::BTreeMap;
use std::fs::File;
use std::io::Write;
use trackfinder_core::{AcceptedTrack, Diagnostics, EventError, PipelineResult};
use trackfinder_env::{EventId, SpacePoint, SpacePointId};

use crate::error::SimError;
use crate::oracle::{Particle, SimEvent};
use crate::runner::ScenarioMetrics;

/// One processed event.
#[derive(Debug, Clone, Serialize)]
pub struct EventExport {
    /// Plan the event belonged to
    pub plan: String,
    pub event: EventId,
    pub particles: Vec<Particle>,
    pub hits: Vec<SpacePoint>,
    pub truth: BTreeMap<SpacePointId, Vec<u32>>,
    pub tracks: Vec<AcceptedTrack>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub diagnostics: Option<Diagnostics>,

    /// Set when the event failed
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Complete scenario export.
#[derive(Debug, Clone, Serialize)]
pub struct SimExport {
    /// Scenario name
    pub scenario: String,

    /// Seed used
    pub seed: u64,

    /// All events, in processing order
    pub events: Vec<EventExport>,

    /// Final results
    pub passed: bool,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub metrics: Option<ScenarioMetrics>,
}

impl SimExport {
    /// Creates a new export container.
    pub fn new(scenario: &str, seed: u64) -> Self {
        Self {
            scenario: scenario.to_string(),
            seed,
            events: Vec::new(),
            passed: false,
            metrics: None,
        }
    }

    /// Adds an event and its outcome.
    pub fn add_event(&mut self, plan: &str, event: &SimEvent, outcome: &Result<PipelineResult, EventError>) {
        let (tracks, diagnostics, error) = match outcome {
            Ok(result) => (result.tracks.clone(), Some(result.diagnostics.clone()), None),
            Err(e) => (Vec::new(), None, Some(e.to_string())),
        };
        self.events.push(EventExport {
            plan: plan.to_string(),
            event: event.event,
            particles: event.particles.clone(),
            hits: event.points.clone(),
            truth: event.truth.clone(),
            tracks,
            diagnostics,
            error,
        });
    }

    /// Finalizes the export.
    pub fn finalize(&mut self, passed: bool, metrics: ScenarioMetrics) {
        self.passed = passed;
        self.metrics = Some(metrics);
    }

    /// Writes to a JSON file.
    pub fn write_to_file(&self, path: &str) -> Result<(), SimError> {
        let json = serde_json::to_string_pretty(self)?;
        let mut file = File::create(path)?;
        file.write_all(json.as_bytes())?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detector::DetectorLayout;
    use crate::oracle::Oracle;

    #[test]
    fn test_export_records_failures() {
        let mut oracle = Oracle::new(1, DetectorLayout::uniform(3));
        oracle.spawn_particle(1.0, 0.0, 0.0, 1);
        let ev = oracle.generate_event();

        let mut export = SimExport::new("single_track", 1);
        export.add_event("single_track", &ev, &Ok(PipelineResult::default()));
        export.add_event("single_track", &ev, &Err(EventError::Cancelled { stage: "graph" }));
        export.finalize(false, ScenarioMetrics::default());

        assert_eq!(export.events.len(), 2);
        assert_eq!(export.events[0].hits.len(), 3);
        assert!(export.events[0].error.is_none());
        assert!(export.events[1].error.is_some());

        let json = serde_json::to_value(&export).unwrap();
        assert_eq!(json["scenario"], "single_track");
        assert!(json["events"][1].get("diagnostics").is_none());
    }
}
