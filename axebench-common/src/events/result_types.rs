//! Measurement and result type definitions
//!
//! Sample readings, per-trial results and the end-of-run summary. These are
//! carried inside events, written to result files and returned over HTTP, so
//! every type here round-trips through JSON.

use super::bench_types::TrialError;
use serde::{Deserialize, Serialize};

/// One accepted telemetry reading
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SampleData {
    /// Hashrate in GH/s
    pub hashrate: f64,
    /// Chip temperature in °C
    pub temperature: f64,
    /// Voltage-regulator temperature in °C (not every board reports it)
    #[serde(default)]
    pub vr_temperature: Option<f64>,
    /// Power draw in W
    pub power: f64,
    /// Input voltage in mV
    pub input_voltage: f64,
    /// Fan speed in percent
    #[serde(default)]
    pub fan_speed: Option<f64>,
}

/// Summarized outcome of one (voltage, frequency) trial
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IterationResult {
    /// Core voltage tested (mV)
    pub core_voltage: u32,
    /// Frequency tested (MHz)
    pub frequency: u32,
    /// Trimmed mean hashrate (GH/s)
    pub average_hashrate: f64,
    /// Sample standard deviation of the trimmed hashrates
    pub hashrate_stddev: f64,
    /// Warmup-trimmed mean chip temperature (°C)
    pub average_temperature: f64,
    /// Warmup-trimmed mean VR temperature (°C)
    #[serde(default)]
    pub average_vr_temperature: Option<f64>,
    /// Mean power draw (W)
    pub average_power: f64,
    /// Mean fan speed (%)
    #[serde(default)]
    pub average_fan_speed: Option<f64>,
    /// Energy per hash in J/TH; infinite for failed trials (null on the wire)
    #[serde(with = "non_finite_as_null")]
    pub efficiency_jth: f64,
    /// Average hashrate met the expected hashrate × tolerance
    pub hashrate_within_tolerance: bool,
    /// Failure code when the trial did not complete normally
    #[serde(default)]
    pub error_reason: Option<TrialError>,
}

impl IterationResult {
    /// Neutral result for a trial that ended with `reason`
    pub fn failed(core_voltage: u32, frequency: u32, reason: TrialError) -> Self {
        Self {
            core_voltage,
            frequency,
            average_hashrate: 0.0,
            hashrate_stddev: 0.0,
            average_temperature: 0.0,
            average_vr_temperature: None,
            average_power: 0.0,
            average_fan_speed: None,
            efficiency_jth: f64::INFINITY,
            hashrate_within_tolerance: false,
            error_reason: Some(reason),
        }
    }

    pub fn is_success(&self) -> bool {
        self.error_reason.is_none()
    }
}

/// Narrowed window for a follow-up fine sweep after a quick sweep
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RefineRange {
    pub voltage_min: u32,
    pub voltage_max: u32,
    pub frequency_min: u32,
    pub frequency_max: u32,
}

/// Settings left on the device at the end of a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppliedSettings {
    pub voltage: u32,
    pub frequency: u32,
}

/// End-of-run summary
///
/// `best_hashrate` and `most_efficient` are chosen independently and may be
/// the same result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BenchmarkSummary {
    /// Every successful trial, in the order it was run
    pub all_results: Vec<IterationResult>,
    #[serde(default)]
    pub best_hashrate: Option<IterationResult>,
    #[serde(default)]
    pub most_efficient: Option<IterationResult>,
    /// Present only when the best result was applied (absent when defaults were restored)
    #[serde(default)]
    pub applied_settings: Option<AppliedSettings>,
    /// Present only after a quick sweep with at least one result
    #[serde(default)]
    pub refine_range: Option<RefineRange>,
    pub total_duration_seconds: f64,
    pub timestamp: chrono::DateTime<chrono::Utc>,
}

impl BenchmarkSummary {
    /// Summary carrying only the results gathered so far
    pub fn partial(all_results: Vec<IterationResult>, total_duration_seconds: f64) -> Self {
        Self {
            all_results,
            best_hashrate: None,
            most_efficient: None,
            applied_settings: None,
            refine_range: None,
            total_duration_seconds,
            timestamp: chrono::Utc::now(),
        }
    }
}

/// Serde adapter mapping non-finite floats to `null` and back to +infinity
mod non_finite_as_null {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &f64, serializer: S) -> Result<S::Ok, S::Error> {
        if value.is_finite() {
            serializer.serialize_f64(*value)
        } else {
            serializer.serialize_none()
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<f64, D::Error> {
        Ok(Option::<f64>::deserialize(deserializer)?.unwrap_or(f64::INFINITY))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_failed_result_is_neutral() {
        let result = IterationResult::failed(1150, 500, TrialError::NoDataCollected);

        assert!(!result.is_success());
        assert_eq!(result.average_hashrate, 0.0);
        assert_eq!(result.hashrate_stddev, 0.0);
        assert!(result.efficiency_jth.is_infinite());
        assert!(!result.hashrate_within_tolerance);
        assert_eq!(result.error_reason, Some(TrialError::NoDataCollected));
    }

    #[test]
    fn test_infinite_efficiency_serializes_as_null() {
        let result = IterationResult::failed(1150, 500, TrialError::ZeroHashrate);
        let json = serde_json::to_value(&result).unwrap();

        assert!(json["efficiency_jth"].is_null());
        assert_eq!(json["error_reason"], "ZERO_HASHRATE");

        let back: IterationResult = serde_json::from_value(json).unwrap();
        assert!(back.efficiency_jth.is_infinite());
        assert_eq!(back.error_reason, Some(TrialError::ZeroHashrate));
    }

    #[test]
    fn test_result_optional_fields_default_when_absent() {
        // Minimal document as written by older exports
        let json = serde_json::json!({
            "core_voltage": 1200,
            "frequency": 575,
            "average_hashrate": 1100.5,
            "hashrate_stddev": 12.0,
            "average_temperature": 58.2,
            "average_power": 18.4,
            "efficiency_jth": 16.72,
            "hashrate_within_tolerance": true
        });

        let result: IterationResult = serde_json::from_value(json).unwrap();
        assert!(result.is_success());
        assert_eq!(result.average_vr_temperature, None);
        assert_eq!(result.average_fan_speed, None);
        assert!((result.efficiency_jth - 16.72).abs() < 1e-9);
    }
}
