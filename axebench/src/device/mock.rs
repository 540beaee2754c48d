//! Scripted in-process device for testing
//!
//! Telemetry is produced by a closure of the currently applied operating
//! point, so a test can model a thermal wall or a hashrate cliff without
//! hardware. Every command is recorded for later assertions.

use super::{DeviceCapabilities, DeviceConnector, DeviceError, DeviceGateway, Telemetry};
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::debug;

/// What the telemetry script sees on each read
#[derive(Debug, Clone, Copy)]
pub struct ReadContext {
    /// Last applied voltage (defaults until the first apply)
    pub voltage: u32,
    /// Last applied frequency
    pub frequency: u32,
    /// 0-based count of telemetry reads so far
    pub read_index: usize,
}

type TelemetryScript = Box<dyn Fn(&ReadContext) -> Option<Telemetry> + Send + Sync>;

/// Device whose telemetry follows a script
pub struct ScriptedDevice {
    capabilities: Option<DeviceCapabilities>,
    script: TelemetryScript,
    applied: Mutex<Vec<(u32, u32)>>,
    current: Mutex<(u32, u32)>,
    restarts: AtomicUsize,
    reads: AtomicUsize,
    fail_apply: AtomicBool,
    fail_restart: AtomicBool,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl ScriptedDevice {
    /// Device with the given capabilities and a telemetry script
    ///
    /// A script returning `None` simulates a failed read.
    pub fn new<F>(capabilities: DeviceCapabilities, script: F) -> Self
    where
        F: Fn(&ReadContext) -> Option<Telemetry> + Send + Sync + 'static,
    {
        let current = (capabilities.default_voltage, capabilities.default_frequency);
        Self {
            capabilities: Some(capabilities),
            script: Box::new(script),
            applied: Mutex::new(Vec::new()),
            current: Mutex::new(current),
            restarts: AtomicUsize::new(0),
            reads: AtomicUsize::new(0),
            fail_apply: AtomicBool::new(false),
            fail_restart: AtomicBool::new(false),
        }
    }

    /// Device that hashes exactly at the expected rate, cool and within power
    pub fn healthy(capabilities: DeviceCapabilities) -> Self {
        let cores = capabilities.core_count_product();
        Self::new(capabilities, move |ctx| {
            Some(nominal_telemetry(
                ctx.frequency as f64 * cores as f64 / 1000.0,
                55.0,
                15.0,
            ))
        })
    }

    /// Device whose capability discovery fails (unreachable)
    pub fn unreachable() -> Self {
        let mut device = Self::healthy(default_capabilities());
        device.capabilities = None;
        device
    }

    /// Make every settings write fail
    pub fn fail_apply(&self, fail: bool) {
        self.fail_apply.store(fail, Ordering::SeqCst);
    }

    /// Make every restart fail
    pub fn fail_restart(&self, fail: bool) {
        self.fail_restart.store(fail, Ordering::SeqCst);
    }

    /// Every (voltage, frequency) written, in order
    pub fn applied_settings(&self) -> Vec<(u32, u32)> {
        lock(&self.applied).clone()
    }

    pub fn restart_count(&self) -> usize {
        self.restarts.load(Ordering::SeqCst)
    }

    pub fn telemetry_reads(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }
}

/// Capabilities of a typical single-ASIC board (1000 cores, 1150 mV / 500 MHz)
pub fn default_capabilities() -> DeviceCapabilities {
    DeviceCapabilities {
        small_core_count: 1000,
        asic_count: 1,
        default_voltage: 1150,
        default_frequency: 500,
        hostname: Some("scripted".to_string()),
        mac_address: None,
        firmware_version: None,
    }
}

/// Fully populated telemetry with a nominal 5 V supply
pub fn nominal_telemetry(hashrate: f64, temperature: f64, power: f64) -> Telemetry {
    Telemetry {
        hashrate: Some(hashrate),
        temperature: Some(temperature),
        vr_temperature: Some(temperature + 5.0),
        power: Some(power),
        input_voltage: Some(5000.0),
        fan_speed: Some(60.0),
    }
}

#[async_trait]
impl DeviceGateway for ScriptedDevice {
    async fn read_telemetry(&self) -> Result<Telemetry, DeviceError> {
        let (voltage, frequency) = *lock(&self.current);
        let read_index = self.reads.fetch_add(1, Ordering::SeqCst);
        let ctx = ReadContext {
            voltage,
            frequency,
            read_index,
        };
        (self.script)(&ctx).ok_or_else(|| DeviceError::Network("scripted read failure".to_string()))
    }

    async fn apply_settings(&self, voltage: u32, frequency: u32) -> Result<(), DeviceError> {
        if self.fail_apply.load(Ordering::SeqCst) {
            return Err(DeviceError::Status(500, "scripted apply failure".to_string()));
        }
        debug!(voltage, frequency, "Scripted device applying settings");
        lock(&self.applied).push((voltage, frequency));
        *lock(&self.current) = (voltage, frequency);
        Ok(())
    }

    async fn restart(&self) -> Result<(), DeviceError> {
        if self.fail_restart.load(Ordering::SeqCst) {
            return Err(DeviceError::Status(500, "scripted restart failure".to_string()));
        }
        self.restarts.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn fetch_capabilities(&self) -> Result<DeviceCapabilities, DeviceError> {
        self.capabilities
            .clone()
            .ok_or_else(|| DeviceError::Network("Failed to fetch system info".to_string()))
    }
}

/// Connector that always hands out the same scripted device
#[derive(Clone)]
pub struct ScriptedConnector {
    device: Arc<ScriptedDevice>,
    addresses: Arc<Mutex<Vec<String>>>,
}

impl ScriptedConnector {
    pub fn new(device: Arc<ScriptedDevice>) -> Self {
        Self {
            device,
            addresses: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn device(&self) -> &Arc<ScriptedDevice> {
        &self.device
    }

    /// Addresses passed to `connect`, in order
    pub fn connected_addresses(&self) -> Vec<String> {
        lock(&self.addresses).clone()
    }
}

impl DeviceConnector for ScriptedConnector {
    fn connect(&self, address: &str) -> Result<Arc<dyn DeviceGateway>, DeviceError> {
        lock(&self.addresses).push(address.to_string());
        Ok(self.device.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_scripted_device_tracks_applied_point() {
        let device = ScriptedDevice::healthy(default_capabilities());

        let before = device.read_telemetry().await.unwrap();
        assert_eq!(before.hashrate, Some(500.0)); // 500 MHz × 1000 cores / 1000

        device.apply_settings(1200, 600).await.unwrap();
        device.restart().await.unwrap();
        let after = device.read_telemetry().await.unwrap();

        assert_eq!(after.hashrate, Some(600.0));
        assert_eq!(device.applied_settings(), vec![(1200, 600)]);
        assert_eq!(device.restart_count(), 1);
        assert_eq!(device.telemetry_reads(), 2);
    }

    #[tokio::test]
    async fn test_scripted_failures() {
        let device = ScriptedDevice::new(default_capabilities(), |_| None);
        assert!(device.read_telemetry().await.is_err());

        device.fail_apply(true);
        assert!(device.apply_settings(1150, 500).await.is_err());
        assert!(device.applied_settings().is_empty());

        let unreachable = ScriptedDevice::unreachable();
        assert!(unreachable.fetch_capabilities().await.is_err());
    }
}
