//! Sample aggregation for benchmark trials
//!
//! **Purpose:** Turn the accepted samples of one trial into an
//! [`IterationResult`]: trimmed hashrate statistics, warmup-trimmed
//! temperatures, plain power/fan means, efficiency and the tolerance verdict.
//!
//! Also provides the incremental running standard deviation shown while a
//! trial is still collecting. That value is a display signal only; the final
//! statistic is computed over the trimmed set.

use axebench_common::config::AnalysisConfig;
use axebench_common::events::{IterationResult, SampleData, TrialError};

/// Incremental hashrate statistics from two running sums (Σx, Σx²)
#[derive(Debug, Clone, Copy, Default)]
pub struct RunningStats {
    count: u32,
    sum: f64,
    sum_sq: f64,
}

impl RunningStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, value: f64) {
        self.count += 1;
        self.sum += value;
        self.sum_sq += value * value;
    }

    pub fn count(&self) -> u32 {
        self.count
    }

    /// Running sample standard deviation (0 for fewer than two values)
    pub fn stddev(&self) -> f64 {
        running_stddev(self.count, self.sum, self.sum_sq)
    }
}

/// `sqrt(max(0, (n·Σx² − (Σx)²) / (n·(n−1))))` for n > 1, else 0
///
/// The clamp absorbs negative variance from floating-point cancellation.
pub fn running_stddev(n: u32, sum: f64, sum_sq: f64) -> f64 {
    if n > 1 {
        let n = n as f64;
        let variance = (n * sum_sq - sum * sum) / (n * (n - 1.0));
        variance.max(0.0).sqrt()
    } else {
        0.0
    }
}

/// Ideal hashrate (GH/s) at `frequency` MHz: `frequency × cores / 1000`
pub fn expected_hashrate(frequency: u32, core_count_product: u32) -> f64 {
    frequency as f64 * core_count_product as f64 / 1000.0
}

/// Accepted samples of one trial, split per quantity
#[derive(Debug, Clone, Default)]
pub struct SampleBuffer {
    hashrates: Vec<f64>,
    temperatures: Vec<f64>,
    vr_temperatures: Vec<f64>,
    powers: Vec<f64>,
    fan_speeds: Vec<f64>,
}

impl SampleBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one accepted sample
    ///
    /// VR temperature is only kept when positive (boards without a VR sensor
    /// report 0).
    pub fn push(&mut self, sample: &SampleData) {
        self.hashrates.push(sample.hashrate);
        self.temperatures.push(sample.temperature);
        self.powers.push(sample.power);
        if let Some(vr) = sample.vr_temperature.filter(|v| *v > 0.0) {
            self.vr_temperatures.push(vr);
        }
        if let Some(fan) = sample.fan_speed {
            self.fan_speeds.push(fan);
        }
    }

    pub fn len(&self) -> usize {
        self.hashrates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hashrates.is_empty()
    }
}

fn mean(values: &[f64]) -> f64 {
    values.iter().sum::<f64>() / values.len() as f64
}

fn sorted(values: &[f64]) -> Vec<f64> {
    let mut out = values.to_vec();
    out.sort_by(|a, b| a.total_cmp(b));
    out
}

/// Mean and sample stddev of hashrates after dropping `trim` from each end
///
/// Trimming is skipped when it would not leave at least one value
/// (`len <= 2 × trim`).
///
/// # Arguments
/// - `values`: Non-empty hashrate readings
/// - `trim`: Readings dropped from each end of the sorted list
///
/// # Returns
/// `(mean, stddev)`; stddev is 0 when fewer than two values remain
pub fn trimmed_hashrate(values: &[f64], trim: usize) -> (f64, f64) {
    let sorted = sorted(values);
    let kept: &[f64] = if sorted.len() > trim * 2 {
        &sorted[trim..sorted.len() - trim]
    } else {
        &sorted
    };

    let avg = mean(kept);
    let stddev = if kept.len() > 1 {
        let var = kept.iter().map(|x| (x - avg) * (x - avg)).sum::<f64>() / (kept.len() - 1) as f64;
        var.sqrt()
    } else {
        0.0
    };
    (avg, stddev)
}

/// Mean after dropping the lowest `warmup` readings
///
/// Skips the drop when it would leave nothing (`len <= warmup`).
pub fn warmup_trimmed_mean(values: &[f64], warmup: usize) -> f64 {
    let sorted = sorted(values);
    if sorted.len() > warmup {
        mean(&sorted[warmup..])
    } else {
        mean(&sorted)
    }
}

/// Summarize one trial's accepted samples
///
/// # Arguments
/// - `voltage`, `frequency`: Operating point under test
/// - `samples`: Accepted samples (may be empty)
/// - `expected`: Ideal hashrate at this frequency (see [`expected_hashrate`])
/// - `analysis`: Trim counts and tolerance fraction
///
/// # Returns
/// A successful result, or a neutral failed result carrying
/// `NO_DATA_COLLECTED` / `ZERO_HASHRATE`
pub fn summarize(
    voltage: u32,
    frequency: u32,
    samples: &SampleBuffer,
    expected: f64,
    analysis: &AnalysisConfig,
) -> IterationResult {
    if samples.is_empty() {
        return IterationResult::failed(voltage, frequency, TrialError::NoDataCollected);
    }

    let (average_hashrate, hashrate_stddev) =
        trimmed_hashrate(&samples.hashrates, analysis.trim_outliers);
    let average_temperature = warmup_trimmed_mean(&samples.temperatures, analysis.warmup_samples);
    let average_vr_temperature = if samples.vr_temperatures.is_empty() {
        None
    } else {
        Some(warmup_trimmed_mean(&samples.vr_temperatures, analysis.warmup_samples))
    };
    let average_power = mean(&samples.powers);
    let average_fan_speed = if samples.fan_speeds.is_empty() {
        None
    } else {
        Some(mean(&samples.fan_speeds))
    };

    if average_hashrate == 0.0 {
        let mut result = IterationResult::failed(voltage, frequency, TrialError::ZeroHashrate);
        result.average_temperature = average_temperature;
        result.average_power = average_power;
        return result;
    }

    // W / (GH/s ÷ 1000) = J/TH
    let efficiency_jth = average_power / (average_hashrate / 1000.0);
    let hashrate_within_tolerance = average_hashrate >= expected * analysis.hashrate_tolerance;

    IterationResult {
        core_voltage: voltage,
        frequency,
        average_hashrate,
        hashrate_stddev,
        average_temperature,
        average_vr_temperature,
        average_power,
        average_fan_speed,
        efficiency_jth,
        hashrate_within_tolerance,
        error_reason: None,
    }
}
