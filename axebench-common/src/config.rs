//! Benchmark configuration: model, validation, loading and path resolution
//!
//! The configuration is a plain value bundle. A run takes a snapshot of it at
//! start, so later edits (HTTP PUT/PATCH) only affect the next run.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Environment variable naming an explicit config file
pub const CONFIG_ENV_VAR: &str = "AXEBENCH_CONFIG";

/// Timing windows (seconds)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimingConfig {
    /// Stabilization window after a restart
    pub sleep_time: u64,
    /// Length of one benchmark iteration
    pub benchmark_time: u64,
    /// Delay between samples
    pub sample_interval: u64,
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            sleep_time: 90,
            benchmark_time: 600,
            sample_interval: 15,
        }
    }
}

/// Safety ceilings and bounds
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SafetyConfig {
    /// Chip temperature ceiling (°C)
    pub max_temp: u32,
    /// Voltage-regulator temperature ceiling (°C)
    pub max_vr_temp: u32,
    /// Power ceiling (W)
    pub max_power: u32,
    pub max_allowed_voltage: u32,
    pub min_allowed_voltage: u32,
    pub max_allowed_frequency: u32,
    pub min_allowed_frequency: u32,
    /// Input supply band (mV)
    pub min_input_voltage: u32,
    pub max_input_voltage: u32,
}

impl Default for SafetyConfig {
    fn default() -> Self {
        Self {
            max_temp: 66,
            max_vr_temp: 86,
            max_power: 30,
            max_allowed_voltage: 1400,
            min_allowed_voltage: 1000,
            max_allowed_frequency: 1200,
            min_allowed_frequency: 400,
            min_input_voltage: 4800,
            max_input_voltage: 5500,
        }
    }
}

impl SafetyConfig {
    /// Check a (voltage, frequency) pair against the global bounds
    pub fn check_bounds(&self, voltage: u32, frequency: u32) -> Result<()> {
        if voltage < self.min_allowed_voltage {
            return Err(Error::InvalidInput(format!(
                "Voltage {}mV below minimum {}mV",
                voltage, self.min_allowed_voltage
            )));
        }
        if voltage > self.max_allowed_voltage {
            return Err(Error::InvalidInput(format!(
                "Voltage {}mV exceeds maximum {}mV",
                voltage, self.max_allowed_voltage
            )));
        }
        if frequency < self.min_allowed_frequency {
            return Err(Error::InvalidInput(format!(
                "Frequency {}MHz below minimum {}MHz",
                frequency, self.min_allowed_frequency
            )));
        }
        if frequency > self.max_allowed_frequency {
            return Err(Error::InvalidInput(format!(
                "Frequency {}MHz exceeds maximum {}MHz",
                frequency, self.max_allowed_frequency
            )));
        }
        Ok(())
    }
}

/// Sweep step sizes
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IncrementsConfig {
    /// mV per voltage step
    pub voltage_increment: u32,
    /// MHz per frequency step
    pub frequency_increment: u32,
}

impl Default for IncrementsConfig {
    fn default() -> Self {
        Self {
            voltage_increment: 15,
            frequency_increment: 20,
        }
    }
}

/// Statistical parameters for summarizing a trial
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalysisConfig {
    /// Minimum hashrate as a fraction of expected
    pub hashrate_tolerance: f64,
    /// Hashrate readings dropped from each end before averaging
    pub trim_outliers: usize,
    /// Lowest temperature readings dropped before averaging
    pub warmup_samples: usize,
    /// Minimum planned samples per iteration
    pub min_samples: u64,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            hashrate_tolerance: 0.94,
            trim_outliers: 3,
            warmup_samples: 6,
            min_samples: 7,
        }
    }
}

/// Complete benchmark configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BenchmarkConfig {
    pub timing: TimingConfig,
    pub safety: SafetyConfig,
    pub increments: IncrementsConfig,
    pub analysis: AnalysisConfig,
}

impl BenchmarkConfig {
    /// Planned samples per iteration (`benchmark_time / sample_interval`)
    pub fn samples_per_iteration(&self) -> u64 {
        if self.timing.sample_interval == 0 {
            return 0;
        }
        self.timing.benchmark_time / self.timing.sample_interval
    }

    /// Reject configurations no run could execute safely
    pub fn validate(&self) -> Result<()> {
        let s = &self.safety;
        if s.min_allowed_voltage > s.max_allowed_voltage {
            return Err(Error::Config(format!(
                "min_allowed_voltage {}mV exceeds max_allowed_voltage {}mV",
                s.min_allowed_voltage, s.max_allowed_voltage
            )));
        }
        if s.min_allowed_frequency > s.max_allowed_frequency {
            return Err(Error::Config(format!(
                "min_allowed_frequency {}MHz exceeds max_allowed_frequency {}MHz",
                s.min_allowed_frequency, s.max_allowed_frequency
            )));
        }
        if s.min_input_voltage > s.max_input_voltage {
            return Err(Error::Config(format!(
                "min_input_voltage {}mV exceeds max_input_voltage {}mV",
                s.min_input_voltage, s.max_input_voltage
            )));
        }

        if self.increments.voltage_increment == 0 || self.increments.frequency_increment == 0 {
            return Err(Error::Config("Increments must be positive".to_string()));
        }
        if self.timing.sample_interval == 0 {
            return Err(Error::Config("sample_interval must be positive".to_string()));
        }

        let tolerance = self.analysis.hashrate_tolerance;
        if !(tolerance > 0.0 && tolerance <= 1.0) {
            return Err(Error::Config(format!(
                "hashrate_tolerance {} must be in (0, 1]",
                tolerance
            )));
        }

        let total_samples = self.samples_per_iteration();
        if total_samples < self.analysis.min_samples {
            return Err(Error::Config(format!(
                "Benchmark time too short: {} samples < {} minimum. \
                 Increase benchmark_time or decrease sample_interval.",
                total_samples, self.analysis.min_samples
            )));
        }

        let min_required = (self.analysis.trim_outliers as u64) * 2 + 1;
        if total_samples < min_required {
            return Err(Error::Config(format!(
                "Not enough samples ({}) after trimming {} outliers from each end. Need at least {}.",
                total_samples, self.analysis.trim_outliers, min_required
            )));
        }

        Ok(())
    }

    /// Load configuration from a TOML file and validate it
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: BenchmarkConfig = toml::from_str(&content)
            .map_err(|e| Error::Config(format!("Invalid config file {}: {}", path.display(), e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Write configuration as TOML, creating parent directories
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Load from `path`, writing the defaults there first if the file is missing
    pub fn load_or_create(path: &Path) -> Result<Self> {
        if path.exists() {
            return Self::load(path);
        }

        tracing::info!("Config file not found, writing defaults to {}", path.display());
        let config = Self::default();
        config.save(path)?;
        Ok(config)
    }

    /// Apply a partial JSON update on top of this configuration
    ///
    /// Objects merge recursively; any other value replaces the current one.
    /// The merged result must deserialize and validate, otherwise `self` is
    /// left untouched and the error is returned.
    pub fn merge_patch(&self, patch: &serde_json::Value) -> Result<Self> {
        let mut current = serde_json::to_value(self)?;
        merge_json(&mut current, patch);

        let merged: BenchmarkConfig = serde_json::from_value(current)
            .map_err(|e| Error::InvalidInput(format!("Invalid configuration: {}", e)))?;
        merged.validate()?;
        Ok(merged)
    }
}

fn merge_json(base: &mut serde_json::Value, patch: &serde_json::Value) {
    match (base, patch) {
        (serde_json::Value::Object(base_map), serde_json::Value::Object(patch_map)) => {
            for (key, value) in patch_map {
                match base_map.get_mut(key) {
                    Some(existing) => merge_json(existing, value),
                    None => {
                        base_map.insert(key.clone(), value.clone());
                    }
                }
            }
        }
        (base, patch) => *base = patch.clone(),
    }
}

/// Config file resolution, in priority order:
/// 1. Command-line argument
/// 2. `AXEBENCH_CONFIG` environment variable
/// 3. Platform config directory (`<config_dir>/axebench/config.toml`)
pub fn resolve_config_path(cli_arg: Option<&Path>) -> Result<PathBuf> {
    if let Some(path) = cli_arg {
        return Ok(path.to_path_buf());
    }

    if let Ok(path) = std::env::var(CONFIG_ENV_VAR) {
        if !path.is_empty() {
            return Ok(PathBuf::from(path));
        }
    }

    dirs::config_dir()
        .map(|d| d.join("axebench").join("config.toml"))
        .ok_or_else(|| Error::Config("Could not determine config directory".to_string()))
}
