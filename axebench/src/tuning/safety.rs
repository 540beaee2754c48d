//! Safety interlocks applied to every telemetry reading
//!
//! **Purpose:** Decide whether a reading is a usable sample or a reason to
//! abort the trial. Checks run in a fixed order and the first violation wins:
//!
//! 1. Chip temperature missing / below 5 °C (implausible sensor)
//! 2. Chip temperature at or above ceiling, then VR temperature
//! 3. Input voltage outside the supply band
//! 4. Hashrate or power missing, then power above ceiling
//!
//! A lighter check ([`SafetyLimits::stabilization_violation`]) guards the
//! settle window after a restart, where hashrate is not yet meaningful.

use crate::device::Telemetry;
use axebench_common::config::SafetyConfig;
use axebench_common::events::{SampleData, TrialError};

/// Readings below this are treated as a broken sensor (°C)
const MIN_PLAUSIBLE_TEMP: f64 = 5.0;

/// Ceilings enforced during a run
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SafetyLimits {
    pub max_temp: f64,
    pub max_vr_temp: f64,
    pub max_power: f64,
    pub min_input_voltage: f64,
    pub max_input_voltage: f64,
}

/// Ceiling crossed while waiting for stabilization
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum StabilizationViolation {
    ChipTemp(f64),
    VrTemp(f64),
    Power(f64),
}

impl SafetyLimits {
    /// Limits from configuration, optionally overriding the chip ceiling
    ///
    /// # Arguments
    /// - `config`: Safety section of the run's configuration snapshot
    /// - `max_temp_override`: Per-run chip temperature ceiling (°C)
    pub fn from_config(config: &SafetyConfig, max_temp_override: Option<u32>) -> Self {
        Self {
            max_temp: max_temp_override.unwrap_or(config.max_temp) as f64,
            max_vr_temp: config.max_vr_temp as f64,
            max_power: config.max_power as f64,
            min_input_voltage: config.min_input_voltage as f64,
            max_input_voltage: config.max_input_voltage as f64,
        }
    }

    /// Validate one reading
    ///
    /// A missing input voltage is treated as 0 mV and therefore fails the
    /// lower supply bound.
    ///
    /// # Returns
    /// The accepted sample, or the first violated interlock
    pub fn check(&self, telemetry: &Telemetry) -> Result<SampleData, TrialError> {
        let temperature = telemetry
            .temperature
            .ok_or(TrialError::TemperatureDataFailure)?;
        if temperature < MIN_PLAUSIBLE_TEMP {
            return Err(TrialError::TemperatureBelow5);
        }

        if temperature >= self.max_temp {
            return Err(TrialError::ChipTempExceeded);
        }
        if let Some(vr) = telemetry.vr_temperature {
            if vr >= self.max_vr_temp {
                return Err(TrialError::VrTempExceeded);
            }
        }

        let input_voltage = telemetry.input_voltage.unwrap_or(0.0);
        if input_voltage < self.min_input_voltage {
            return Err(TrialError::InputVoltageBelowMin);
        }
        if input_voltage > self.max_input_voltage {
            return Err(TrialError::InputVoltageAboveMax);
        }

        let (hashrate, power) = match (telemetry.hashrate, telemetry.power) {
            (Some(h), Some(p)) => (h, p),
            _ => return Err(TrialError::HashratePowerDataFailure),
        };
        if power > self.max_power {
            return Err(TrialError::PowerConsumptionExceeded);
        }

        Ok(SampleData {
            hashrate,
            temperature,
            vr_temperature: telemetry.vr_temperature,
            power,
            input_voltage,
            fan_speed: telemetry.fan_speed,
        })
    }

    /// Ceiling check used while the device settles
    ///
    /// Missing or zero readings are skipped rather than failed.
    pub fn stabilization_violation(&self, telemetry: &Telemetry) -> Option<StabilizationViolation> {
        let present = |v: Option<f64>| v.filter(|x| *x != 0.0);

        if let Some(temp) = present(telemetry.temperature) {
            if temp >= self.max_temp {
                return Some(StabilizationViolation::ChipTemp(temp));
            }
        }
        if let Some(vr) = present(telemetry.vr_temperature) {
            if vr >= self.max_vr_temp {
                return Some(StabilizationViolation::VrTemp(vr));
            }
        }
        if let Some(power) = present(telemetry.power) {
            if power > self.max_power {
                return Some(StabilizationViolation::Power(power));
            }
        }
        None
    }
}
