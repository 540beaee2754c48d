//! Sample collection for a single trial
//!
//! **Purpose:** With settings already applied and stabilized, read telemetry
//! `benchmark_time / sample_interval` times, run every reading through the
//! safety interlocks and summarize the accepted samples.
//!
//! Any interlock violation ends the trial at once; the remaining planned
//! samples are skipped. A stop request ends collection early and the samples
//! gathered so far are summarized.

use super::metrics::{expected_hashrate, summarize, RunningStats, SampleBuffer};
use super::reporter::Reporter;
use super::{cancellable_sleep, TrialContext};
use crate::device::{DeviceGateway, Telemetry};
use axebench_common::events::{BenchEvent, IterationResult, TrialError};
use std::time::Duration;

/// Telemetry read attempts before giving up on a sample
pub const READ_ATTEMPTS: u32 = 3;

/// Delay between failed telemetry reads
pub const READ_BACKOFF: Duration = Duration::from_secs(5);

/// Read telemetry with bounded retry
///
/// # Returns
/// The first successful reading, or `None` after [`READ_ATTEMPTS`] failures
pub async fn read_with_retry(gateway: &dyn DeviceGateway, reporter: &Reporter) -> Option<Telemetry> {
    for attempt in 1..=READ_ATTEMPTS {
        match gateway.read_telemetry().await {
            Ok(telemetry) => return Some(telemetry),
            Err(e) => {
                reporter.warn(format!(
                    "System info fetch failed, attempt {}/{}: {}",
                    attempt, READ_ATTEMPTS, e
                ));
                if attempt < READ_ATTEMPTS {
                    tokio::time::sleep(READ_BACKOFF).await;
                }
            }
        }
    }
    None
}

/// Run one trial at (`voltage`, `frequency`)
///
/// Emits a `sample_progress` event per accepted sample.
///
/// # Arguments
/// - `ctx`: Gateway, limits, configuration and stop token of the run
/// - `voltage`, `frequency`: Operating point already applied
/// - `iteration`: 1-based iteration number, for log lines
///
/// # Returns
/// The summarized result; failures carry their [`TrialError`]
pub async fn run_iteration(
    ctx: &TrialContext<'_>,
    voltage: u32,
    frequency: u32,
    iteration: u32,
) -> IterationResult {
    let total_samples = ctx.config.samples_per_iteration() as u32;
    let interval = Duration::from_secs(ctx.config.timing.sample_interval);
    let expected = expected_hashrate(frequency, ctx.core_count_product);

    let mut buffer = SampleBuffer::new();
    let mut stats = RunningStats::new();

    ctx.reporter.info(format!(
        "Starting iteration {}: {}mV, {}MHz",
        iteration, voltage, frequency
    ));

    for index in 0..total_samples {
        if ctx.cancel.is_cancelled() {
            ctx.reporter.info("Stop requested, ending iteration early");
            break;
        }

        let Some(telemetry) = read_with_retry(ctx.gateway, ctx.reporter).await else {
            return IterationResult::failed(voltage, frequency, TrialError::SystemInfoFailure);
        };

        let sample = match ctx.limits.check(&telemetry) {
            Ok(sample) => sample,
            Err(kind) => return IterationResult::failed(voltage, frequency, kind),
        };

        buffer.push(&sample);
        stats.push(sample.hashrate);

        let sample_number = index + 1;
        ctx.reporter.emit(BenchEvent::SampleProgress {
            sample_number,
            total_samples,
            progress_percent: sample_number as f64 / total_samples as f64 * 100.0,
            core_voltage: voltage,
            frequency,
            sample,
            running_stddev: stats.stddev(),
            timestamp: chrono::Utc::now(),
        });

        if sample_number < total_samples {
            cancellable_sleep(interval, ctx.cancel).await;
        }
    }

    summarize(voltage, frequency, &buffer, expected, &ctx.config.analysis)
}
