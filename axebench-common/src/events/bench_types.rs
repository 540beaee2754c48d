//! Benchmark lifecycle type definitions
//!
//! Supporting enums for run phases, sweep modes, log levels and the closed
//! set of trial failure codes.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Lifecycle phase of a benchmark run
///
/// `IDLE → INITIALIZING → STABILIZING ⇄ RUNNING → COMPLETED`, with `PAUSED`
/// reachable from STABILIZING/RUNNING and `ERROR` reachable from any phase.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum BenchPhase {
    /// No run has started, or the session was reset
    #[default]
    Idle,
    /// Fetching device capabilities and validating the request
    Initializing,
    /// Settings applied, waiting for the device to settle
    Stabilizing,
    /// Collecting samples for a trial
    Running,
    /// Parked at a checkpoint until resume or stop
    Paused,
    /// Stop requested, unwinding
    Stopping,
    /// Run finished (normally, by stop, or by thermal-wall abort)
    Completed,
    /// Run aborted by a fatal error
    Error,
}

impl BenchPhase {
    /// Phases from which a fresh run may start
    pub fn can_start(&self) -> bool {
        matches!(self, BenchPhase::Idle | BenchPhase::Completed | BenchPhase::Error)
    }

    /// Phases in which a pause request is honored
    pub fn can_pause(&self) -> bool {
        matches!(self, BenchPhase::Running | BenchPhase::Stabilizing)
    }
}

impl std::fmt::Display for BenchPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            BenchPhase::Idle => "idle",
            BenchPhase::Initializing => "initializing",
            BenchPhase::Stabilizing => "stabilizing",
            BenchPhase::Running => "running",
            BenchPhase::Paused => "paused",
            BenchPhase::Stopping => "stopping",
            BenchPhase::Completed => "completed",
            BenchPhase::Error => "error",
        };
        write!(f, "{}", s)
    }
}

/// Sweep granularity
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum SweepMode {
    /// Fine scan using the configured increments
    #[default]
    FullSweep,
    /// Coarse scan using 4x the configured increments
    Quick,
}

impl SweepMode {
    /// Multiplier applied to the configured voltage/frequency increments
    pub fn step_multiplier(&self) -> u32 {
        match self {
            SweepMode::FullSweep => 1,
            SweepMode::Quick => 4,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            SweepMode::FullSweep => "Full",
            SweepMode::Quick => "Quick",
        }
    }
}

impl std::str::FromStr for SweepMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "full_sweep" | "full" => Ok(SweepMode::FullSweep),
            "quick" => Ok(SweepMode::Quick),
            other => Err(format!(
                "Invalid mode '{}'. Use 'full_sweep' or 'quick'",
                other
            )),
        }
    }
}

/// Severity of a run log line
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Info,
    Warning,
    Error,
}

/// Reason a trial did not produce a usable result
///
/// Every safety abort and aggregation failure maps to exactly one variant, so
/// the sweep's decision step is an exhaustive match.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Error)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TrialError {
    /// Telemetry read failed after all retries
    #[error("SYSTEM_INFO_FAILURE")]
    SystemInfoFailure,
    /// Chip temperature missing from telemetry
    #[error("TEMPERATURE_DATA_FAILURE")]
    TemperatureDataFailure,
    /// Chip temperature below 5 °C (implausible sensor reading)
    #[serde(rename = "TEMPERATURE_BELOW_5")]
    #[error("TEMPERATURE_BELOW_5")]
    TemperatureBelow5,
    /// Chip temperature at or above the ceiling
    #[error("CHIP_TEMP_EXCEEDED")]
    ChipTempExceeded,
    /// Voltage-regulator temperature at or above the ceiling
    #[error("VR_TEMP_EXCEEDED")]
    VrTempExceeded,
    /// Input voltage under the configured band
    #[error("INPUT_VOLTAGE_BELOW_MIN")]
    InputVoltageBelowMin,
    /// Input voltage over the configured band
    #[error("INPUT_VOLTAGE_ABOVE_MAX")]
    InputVoltageAboveMax,
    /// Hashrate or power missing from telemetry
    #[error("HASHRATE_POWER_DATA_FAILURE")]
    HashratePowerDataFailure,
    /// Power draw above the ceiling
    #[error("POWER_CONSUMPTION_EXCEEDED")]
    PowerConsumptionExceeded,
    /// Iteration ended without a single accepted sample
    #[error("NO_DATA_COLLECTED")]
    NoDataCollected,
    /// Trimmed average hashrate was zero
    #[error("ZERO_HASHRATE")]
    ZeroHashrate,
}

impl TrialError {
    /// Wire code, identical to the serialized form
    pub fn code(&self) -> String {
        self.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_trial_error_codes_match_serialization() {
        let all = [
            TrialError::SystemInfoFailure,
            TrialError::TemperatureDataFailure,
            TrialError::TemperatureBelow5,
            TrialError::ChipTempExceeded,
            TrialError::VrTempExceeded,
            TrialError::InputVoltageBelowMin,
            TrialError::InputVoltageAboveMax,
            TrialError::HashratePowerDataFailure,
            TrialError::PowerConsumptionExceeded,
            TrialError::NoDataCollected,
            TrialError::ZeroHashrate,
        ];

        for kind in all {
            let json = serde_json::to_string(&kind).unwrap();
            assert_eq!(json, format!("\"{}\"", kind.code()));
            let back: TrialError = serde_json::from_str(&json).unwrap();
            assert_eq!(back, kind);
        }

        assert_eq!(TrialError::TemperatureBelow5.code(), "TEMPERATURE_BELOW_5");
        assert_eq!(TrialError::ChipTempExceeded.code(), "CHIP_TEMP_EXCEEDED");
    }

    #[test]
    fn test_phase_predicates() {
        assert!(BenchPhase::Idle.can_start());
        assert!(BenchPhase::Completed.can_start());
        assert!(BenchPhase::Error.can_start());
        assert!(!BenchPhase::Running.can_start());
        assert!(!BenchPhase::Paused.can_start());

        assert!(BenchPhase::Running.can_pause());
        assert!(BenchPhase::Stabilizing.can_pause());
        assert!(!BenchPhase::Paused.can_pause());
        assert!(!BenchPhase::Initializing.can_pause());
    }

    #[test]
    fn test_sweep_mode_parsing() {
        assert_eq!("quick".parse::<SweepMode>().unwrap(), SweepMode::Quick);
        assert_eq!("full_sweep".parse::<SweepMode>().unwrap(), SweepMode::FullSweep);
        assert!("turbo".parse::<SweepMode>().is_err());

        assert_eq!(SweepMode::Quick.step_multiplier(), 4);
        assert_eq!(SweepMode::FullSweep.step_multiplier(), 1);
        assert_eq!(
            serde_json::to_string(&SweepMode::FullSweep).unwrap(),
            "\"full_sweep\""
        );
    }
}
