//! Scenario catalogue.

use serde::Serialize;

/// Scenario identifiers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ScenarioId {
    /// TF-001: one clean track through five layers
    SingleTrack,

    /// TF-002: two candidates sharing one space point
    SharedHit,

    /// TF-003: a NaN space point among valid ones
    CorruptHit,

    /// TF-004: strip-detector seed extended into the pixel layers
    CrossSubsystem,

    /// TF-005: many tracks in the full vertex detector
    BusyEvent,

    /// TF-006: tracks on top of uniform noise
    NoisyEvent,

    /// TF-007: merging inward and outward from the same seed
    BackwardForward,
}

impl ScenarioId {
    /// Returns a list of all scenarios.
    pub fn all() -> Vec<ScenarioId> {
        vec![
            ScenarioId::SingleTrack,
            ScenarioId::SharedHit,
            ScenarioId::CorruptHit,
            ScenarioId::CrossSubsystem,
            ScenarioId::BusyEvent,
            ScenarioId::NoisyEvent,
            ScenarioId::BackwardForward,
        ]
    }

    /// Returns the scenario name.
    pub fn name(&self) -> &'static str {
        match self {
            ScenarioId::SingleTrack => "single_track",
            ScenarioId::SharedHit => "shared_hit",
            ScenarioId::CorruptHit => "corrupt_hit",
            ScenarioId::CrossSubsystem => "cross_subsystem",
            ScenarioId::BusyEvent => "busy_event",
            ScenarioId::NoisyEvent => "noisy_event",
            ScenarioId::BackwardForward => "backward_forward",
        }
    }

    /// Returns a description of the scenario.
    pub fn description(&self) -> &'static str {
        match self {
            ScenarioId::SingleTrack => "One particle, five layers: exactly one candidate, no orphans",
            ScenarioId::SharedHit => "Two particles crossing on one hit: only the better candidate survives",
            ScenarioId::CorruptHit => "NaN hit among ten valid ones: excluded and counted as a data error",
            ScenarioId::CrossSubsystem => "SVD seed picks up both PXD hits through the merger",
            ScenarioId::BusyEvent => "20 particles in PXD+SVD: efficiency and conflict-free output",
            ScenarioId::NoisyEvent => "5 particles plus 3 noise hits per layer",
            ScenarioId::BackwardForward => "Same SVD seed merged into PXD (backward) and CDC (forward)",
        }
    }
}

impl std::fmt::Display for ScenarioId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl std::str::FromStr for ScenarioId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "single_track" | "singletrack" | "tf-001" | "a" => Ok(ScenarioId::SingleTrack),
            "shared_hit" | "sharedhit" | "tf-002" | "b" => Ok(ScenarioId::SharedHit),
            "corrupt_hit" | "corrupthit" | "tf-003" | "c" => Ok(ScenarioId::CorruptHit),
            "cross_subsystem" | "crosssubsystem" | "tf-004" | "d" => Ok(ScenarioId::CrossSubsystem),
            "busy_event" | "busyevent" | "tf-005" => Ok(ScenarioId::BusyEvent),
            "noisy_event" | "noisyevent" | "tf-006" => Ok(ScenarioId::NoisyEvent),
            "backward_forward" | "backwardforward" | "tf-007" => Ok(ScenarioId::BackwardForward),
            _ => Err(format!("Unknown scenario: {}", s)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_names_round_trip() {
        for s in ScenarioId::all() {
            assert_eq!(s.name().parse::<ScenarioId>(), Ok(s));
            assert!(!s.description().is_empty());
        }
        assert_eq!("TF-004".parse::<ScenarioId>(), Ok(ScenarioId::CrossSubsystem));
        assert!("split_brain".parse::<ScenarioId>().is_err());
    }
}
