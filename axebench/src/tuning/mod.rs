//! # Voltage/frequency auto-tuning
//!
//! Sweeps core voltage and frequency on a device, measuring hashrate,
//! temperatures and power at each operating point, and leaves the device at
//! the best safe setting found.
//!
//! **Purpose:** Find the highest-hashrate configuration that stays inside the
//! configured thermal and power envelope, and report the most efficient one.
//!
//! **Algorithm:** Two-level sweep:
//! - Outer: voltage ladder from the starting voltage to the run's ceiling
//! - Inner: frequency from the starting frequency upward while hashrate stays
//!   within tolerance of the ideal scaling
//!
//! Modules, leaves first:
//! - [`safety`]: per-reading interlocks
//! - [`metrics`]: sample aggregation into an iteration result
//! - [`sampler`]: one trial's sample loop
//! - [`stabilization`]: apply settings, restart, settle
//! - [`search`]: sweep geometry and next-trial decisions
//! - [`controller`]: the state machine driving all of the above
//! - [`report`]: console formatting of events and summaries

pub mod controller;
pub mod metrics;
pub mod report;
pub mod reporter;
pub mod safety;
pub mod sampler;
pub mod search;
pub mod stabilization;

pub use controller::{ControllerStatus, ResumeSnapshot, RunRequest, RunTicket, SweepController};
pub use metrics::{expected_hashrate, running_stddev, RunningStats, SampleBuffer};
pub use report::CliFormatter;
pub use reporter::Reporter;
pub use safety::SafetyLimits;
pub use search::{FinalSettings, NextStep, SweepPlan};
pub use stabilization::StabilizationFailure;

use crate::device::DeviceGateway;
use axebench_common::config::BenchmarkConfig;
use tokio_util::sync::CancellationToken;

/// Everything a single trial needs, borrowed from the running controller
pub struct TrialContext<'a> {
    pub gateway: &'a dyn DeviceGateway,
    pub config: &'a BenchmarkConfig,
    pub limits: SafetyLimits,
    /// Small cores × ASICs, for the expected hashrate
    pub core_count_product: u32,
    /// Cancelled when a stop is requested
    pub cancel: &'a CancellationToken,
    pub reporter: &'a Reporter,
}

/// Sleep for `duration`, returning early if `cancel` fires
///
/// # Returns
/// `true` if the full duration elapsed, `false` if cancelled
pub(crate) async fn cancellable_sleep(
    duration: std::time::Duration,
    cancel: &CancellationToken,
) -> bool {
    tokio::select! {
        _ = tokio::time::sleep(duration) => true,
        _ = cancel.cancelled() => false,
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use crate::device::ScriptedDevice;
    use axebench_common::events::EventBus;
    use std::sync::Arc;

    /// Owned pieces a [`TrialContext`] borrows from
    pub(crate) struct Fixture {
        pub config: BenchmarkConfig,
        pub cancel: CancellationToken,
        pub reporter: Reporter,
        pub bus: Arc<EventBus>,
    }

    impl Fixture {
        pub fn new() -> Self {
            let bus = Arc::new(EventBus::new(256));
            Self {
                config: BenchmarkConfig::default(),
                cancel: CancellationToken::new(),
                reporter: Reporter::new(bus.clone()),
                bus,
            }
        }

        pub fn ctx<'a>(&'a self, device: &'a ScriptedDevice) -> TrialContext<'a> {
            TrialContext {
                gateway: device,
                config: &self.config,
                limits: SafetyLimits::from_config(&self.config.safety, None),
                core_count_product: 1000,
                cancel: &self.cancel,
                reporter: &self.reporter,
            }
        }
    }
}
