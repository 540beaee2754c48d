//! Apply an operating point and wait for the device to settle
//!
//! Sequence: write settings, pause 2 s, restart, then (optionally) poll
//! telemetry every 5 s until the configured stabilization window has elapsed.
//! During the window only the temperature and power ceilings are enforced;
//! hashrate is meaningless right after a restart.

use super::safety::StabilizationViolation;
use super::{cancellable_sleep, TrialContext};
use std::time::Duration;
use thiserror::Error;
use tokio::time::Instant;

/// Pause between the settings write and the restart command
pub const RESTART_DELAY: Duration = Duration::from_secs(2);

/// Telemetry poll period inside the stabilization window
pub const POLL_INTERVAL: Duration = Duration::from_secs(5);

/// Consecutive failed reads that end the stabilization window
pub const MAX_READ_FAILURES: u32 = 3;

/// Why an operating point could not be brought up
#[derive(Debug, Clone, PartialEq, Error)]
pub enum StabilizationFailure {
    #[error("Failed to apply settings: {0}")]
    ApplyFailed(String),

    #[error("Failed to restart device: {0}")]
    RestartFailed(String),

    #[error("Stop requested during stabilization")]
    Cancelled,

    #[error("Telemetry unavailable during stabilization")]
    TelemetryUnavailable,

    #[error("Chip temperature {0:.1}°C reached limit during stabilization")]
    ChipTemp(f64),

    #[error("VR temperature {0:.1}°C reached limit during stabilization")]
    VrTemp(f64),

    #[error("Power {0:.1}W exceeded limit during stabilization")]
    Power(f64),
}

impl From<StabilizationViolation> for StabilizationFailure {
    fn from(violation: StabilizationViolation) -> Self {
        match violation {
            StabilizationViolation::ChipTemp(t) => StabilizationFailure::ChipTemp(t),
            StabilizationViolation::VrTemp(t) => StabilizationFailure::VrTemp(t),
            StabilizationViolation::Power(p) => StabilizationFailure::Power(p),
        }
    }
}

/// Write (`voltage`, `frequency`), restart, and optionally wait for stability
///
/// # Arguments
/// - `ctx`: Gateway, limits, timing and stop token of the run
/// - `wait`: Poll through the stabilization window after restarting. The
///   final settings write at the end of a run skips this.
pub async fn apply_settings(
    ctx: &TrialContext<'_>,
    voltage: u32,
    frequency: u32,
    wait: bool,
) -> Result<(), StabilizationFailure> {
    ctx.reporter.info(format!(
        "Applying settings: {}mV, {}MHz",
        voltage, frequency
    ));

    ctx.gateway
        .apply_settings(voltage, frequency)
        .await
        .map_err(|e| StabilizationFailure::ApplyFailed(e.to_string()))?;

    tokio::time::sleep(RESTART_DELAY).await;

    ctx.gateway
        .restart()
        .await
        .map_err(|e| StabilizationFailure::RestartFailed(e.to_string()))?;

    if !wait {
        return Ok(());
    }

    wait_for_stability(ctx).await?;
    ctx.reporter.info("Device stabilized");
    Ok(())
}

async fn wait_for_stability(ctx: &TrialContext<'_>) -> Result<(), StabilizationFailure> {
    let window = Duration::from_secs(ctx.config.timing.sleep_time);
    ctx.reporter.info(format!(
        "Waiting {}s for the device to stabilize",
        window.as_secs()
    ));

    let deadline = Instant::now() + window;
    let mut failures = 0u32;

    while Instant::now() < deadline {
        if ctx.cancel.is_cancelled() {
            return Err(StabilizationFailure::Cancelled);
        }

        match ctx.gateway.read_telemetry().await {
            Ok(telemetry) => {
                failures = 0;
                if let Some(violation) = ctx.limits.stabilization_violation(&telemetry) {
                    let failure = StabilizationFailure::from(violation);
                    ctx.reporter.warn(failure.to_string());
                    return Err(failure);
                }
            }
            Err(e) => {
                failures += 1;
                ctx.reporter.warn(format!(
                    "Telemetry read failed during stabilization ({}/{}): {}",
                    failures, MAX_READ_FAILURES, e
                ));
                if failures >= MAX_READ_FAILURES {
                    return Err(StabilizationFailure::TelemetryUnavailable);
                }
            }
        }

        let remaining = deadline.saturating_duration_since(Instant::now());
        if !cancellable_sleep(POLL_INTERVAL.min(remaining), ctx.cancel).await {
            return Err(StabilizationFailure::Cancelled);
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::mock::{default_capabilities, nominal_telemetry};
    use crate::device::ScriptedDevice;
    use crate::tuning::testing::Fixture;

    #[tokio::test(start_paused = true)]
    async fn test_apply_without_wait_skips_polling() {
        let fixture = Fixture::new();
        let device = ScriptedDevice::healthy(default_capabilities());

        let start = Instant::now();
        apply_settings(&fixture.ctx(&device), 1200, 550, false)
            .await
            .unwrap();

        assert_eq!(device.applied_settings(), vec![(1200, 550)]);
        assert_eq!(device.restart_count(), 1);
        assert_eq!(device.telemetry_reads(), 0);
        assert_eq!(start.elapsed(), RESTART_DELAY);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stable_device_waits_full_window() {
        let fixture = Fixture::new();
        let device = ScriptedDevice::healthy(default_capabilities());

        let start = Instant::now();
        apply_settings(&fixture.ctx(&device), 1150, 500, true)
            .await
            .unwrap();

        // 90 s window polled every 5 s
        assert_eq!(device.telemetry_reads(), 18);
        assert_eq!(start.elapsed(), RESTART_DELAY + Duration::from_secs(90));
    }

    #[tokio::test(start_paused = true)]
    async fn test_overheat_during_window() {
        let fixture = Fixture::new();
        let device = ScriptedDevice::new(default_capabilities(), |ctx| {
            let temp = if ctx.read_index == 3 { 66.0 } else { 50.0 };
            Some(nominal_telemetry(500.0, temp, 15.0))
        });

        let err = apply_settings(&fixture.ctx(&device), 1150, 500, true)
            .await
            .unwrap_err();
        assert_eq!(err, StabilizationFailure::ChipTemp(66.0));
        assert_eq!(device.telemetry_reads(), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_power_ceiling_during_window() {
        let fixture = Fixture::new();
        let device = ScriptedDevice::new(default_capabilities(), |_| {
            Some(nominal_telemetry(500.0, 50.0, 31.0))
        });

        let err = apply_settings(&fixture.ctx(&device), 1150, 500, true)
            .await
            .unwrap_err();
        assert_eq!(err, StabilizationFailure::Power(31.0));
    }

    #[tokio::test(start_paused = true)]
    async fn test_three_consecutive_read_failures() {
        let fixture = Fixture::new();
        let device = ScriptedDevice::new(default_capabilities(), |ctx| {
            // One success between failures resets the counter
            if ctx.read_index == 2 {
                Some(nominal_telemetry(500.0, 50.0, 15.0))
            } else {
                None
            }
        });

        let err = apply_settings(&fixture.ctx(&device), 1150, 500, true)
            .await
            .unwrap_err();
        assert_eq!(err, StabilizationFailure::TelemetryUnavailable);
        assert_eq!(device.telemetry_reads(), 6);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_during_window() {
        let fixture = Fixture::new();
        let device = ScriptedDevice::healthy(default_capabilities());

        let cancel = fixture.cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(20)).await;
            cancel.cancel();
        });

        let err = apply_settings(&fixture.ctx(&device), 1150, 500, true)
            .await
            .unwrap_err();
        assert_eq!(err, StabilizationFailure::Cancelled);
    }

    #[tokio::test(start_paused = true)]
    async fn test_apply_failure_skips_restart() {
        let fixture = Fixture::new();
        let device = ScriptedDevice::healthy(default_capabilities());
        device.fail_apply(true);

        let err = apply_settings(&fixture.ctx(&device), 1150, 500, true)
            .await
            .unwrap_err();
        assert!(matches!(err, StabilizationFailure::ApplyFailed(_)));
        assert_eq!(device.restart_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_restart_failure() {
        let fixture = Fixture::new();
        let device = ScriptedDevice::healthy(default_capabilities());
        device.fail_restart(true);

        let err = apply_settings(&fixture.ctx(&device), 1150, 500, true)
            .await
            .unwrap_err();
        assert!(matches!(err, StabilizationFailure::RestartFailed(_)));
        assert_eq!(device.telemetry_reads(), 0);
    }
}
