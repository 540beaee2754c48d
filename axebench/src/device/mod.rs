//! # Device gateway
//!
//! The benchmark engine talks to hardware only through [`DeviceGateway`]:
//! read telemetry, write settings, restart, and discover capabilities.
//!
//! - [`client::BitaxeClient`]: HTTP implementation for Bitaxe firmware
//! - [`mock::ScriptedDevice`]: in-process device for tests

pub mod client;
pub mod mock;

pub use client::{BitaxeClient, HttpConnector};
pub use mock::{ScriptedConnector, ScriptedDevice};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;

/// Device communication errors
#[derive(Debug, Error)]
pub enum DeviceError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("Device returned HTTP {0}: {1}")]
    Status(u16, String),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("{0} field missing from device response")]
    MissingField(&'static str),
}

/// One telemetry reading as reported by the device
///
/// Every field is optional; the safety checks decide what a missing value
/// means.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Telemetry {
    /// Hashrate (GH/s)
    #[serde(rename = "hashRate", default)]
    pub hashrate: Option<f64>,
    /// Chip temperature (°C)
    #[serde(rename = "temp", default)]
    pub temperature: Option<f64>,
    /// Voltage-regulator temperature (°C)
    #[serde(rename = "vrTemp", default)]
    pub vr_temperature: Option<f64>,
    /// Power draw (W)
    #[serde(default)]
    pub power: Option<f64>,
    /// Input supply voltage (mV)
    #[serde(rename = "voltage", default)]
    pub input_voltage: Option<f64>,
    /// Fan speed (%)
    #[serde(rename = "fanspeed", default)]
    pub fan_speed: Option<f64>,
}

/// Static device facts, fetched once per run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceCapabilities {
    pub small_core_count: u32,
    pub asic_count: u32,
    /// Voltage the device runs at when not being tuned (mV)
    pub default_voltage: u32,
    /// Frequency the device runs at when not being tuned (MHz)
    pub default_frequency: u32,
    pub hostname: Option<String>,
    pub mac_address: Option<String>,
    pub firmware_version: Option<String>,
}

impl DeviceCapabilities {
    /// Total hashing cores (small cores × ASICs)
    pub fn core_count_product(&self) -> u32 {
        self.small_core_count * self.asic_count
    }
}

/// Operations the benchmark engine needs from a device
#[async_trait]
pub trait DeviceGateway: Send + Sync {
    /// Read one telemetry snapshot
    async fn read_telemetry(&self) -> Result<Telemetry, DeviceError>;

    /// Write core voltage (mV) and frequency (MHz)
    async fn apply_settings(&self, voltage: u32, frequency: u32) -> Result<(), DeviceError>;

    /// Restart so the written settings take effect
    async fn restart(&self) -> Result<(), DeviceError>;

    /// Discover core counts and default operating point
    async fn fetch_capabilities(&self) -> Result<DeviceCapabilities, DeviceError>;
}

/// Produces a gateway for a device address
///
/// The session layer is handed one of these so it never constructs HTTP
/// clients itself.
pub trait DeviceConnector: Send + Sync {
    fn connect(&self, address: &str) -> Result<Arc<dyn DeviceGateway>, DeviceError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_telemetry_parses_device_field_names() {
        let json = serde_json::json!({
            "hashRate": 1021.5,
            "temp": 57.25,
            "vrTemp": 61,
            "power": 15.3,
            "voltage": 5087.5,
            "fanspeed": 72,
            "hostname": "bitaxe",
            "smallCoreCount": 894
        });

        let telemetry: Telemetry = serde_json::from_value(json).unwrap();
        assert_eq!(telemetry.hashrate, Some(1021.5));
        assert_eq!(telemetry.temperature, Some(57.25));
        assert_eq!(telemetry.vr_temperature, Some(61.0));
        assert_eq!(telemetry.input_voltage, Some(5087.5));
        assert_eq!(telemetry.fan_speed, Some(72.0));
    }

    #[test]
    fn test_telemetry_missing_fields_are_none() {
        let telemetry: Telemetry = serde_json::from_value(serde_json::json!({ "temp": 50 })).unwrap();
        assert_eq!(telemetry.temperature, Some(50.0));
        assert_eq!(telemetry.hashrate, None);
        assert_eq!(telemetry.vr_temperature, None);
    }

    #[test]
    fn test_core_count_product() {
        let caps = DeviceCapabilities {
            small_core_count: 894,
            asic_count: 2,
            default_voltage: 1150,
            default_frequency: 500,
            hostname: None,
            mac_address: None,
            firmware_version: None,
        };
        assert_eq!(caps.core_count_product(), 1788);
    }
}
