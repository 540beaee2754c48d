//! Shared fixtures for the integration tests
//!
//! Every test runs on a paused tokio clock, so the 90 s stabilization window
//! and the 10 minute sampling window complete instantly.

#![allow(dead_code)]

use axebench::device::mock::{default_capabilities, nominal_telemetry, ReadContext};
use axebench::device::{ScriptedDevice, Telemetry};
use axebench::tuning::SweepController;
use axebench_common::events::{BenchEvent, EventBus};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::broadcast;

/// Reads taken during the default stabilization window (90 s polled every 5 s)
pub const STABILIZATION_READS: usize = 18;

/// Upper bound on any wait in virtual time
const EVENT_TIMEOUT: Duration = Duration::from_secs(24 * 3600);

pub fn bus() -> Arc<EventBus> {
    Arc::new(EventBus::new(8192))
}

pub fn controller() -> (Arc<SweepController>, broadcast::Receiver<BenchEvent>) {
    let bus = bus();
    let rx = bus.subscribe();
    (Arc::new(SweepController::new(bus)), rx)
}

pub fn healthy_device() -> Arc<ScriptedDevice> {
    Arc::new(ScriptedDevice::healthy(default_capabilities()))
}

/// Telemetry script hashing at the ideal rate, where `degraded(v, f)` points
/// only reach half of it
pub fn hashrate_cliff<F>(degraded: F) -> impl Fn(&ReadContext) -> Option<Telemetry> + Send + Sync + 'static
where
    F: Fn(u32, u32) -> bool + Send + Sync + 'static,
{
    move |ctx| {
        let ideal = ctx.frequency as f64;
        let hashrate = if degraded(ctx.voltage, ctx.frequency) {
            ideal * 0.5
        } else {
            ideal
        };
        Some(nominal_telemetry(hashrate, 55.0, 15.0))
    }
}

/// Telemetry script that stays cool through stabilization, then reports
/// 70 °C during sampling at every `hot(v, f)` point
pub fn overheat_when_sampling<F>(hot: F) -> impl Fn(&ReadContext) -> Option<Telemetry> + Send + Sync + 'static
where
    F: Fn(u32, u32) -> bool + Send + Sync + 'static,
{
    let reads_at_point = Mutex::new(((0u32, 0u32), 0usize));
    move |ctx| {
        let mut seen = reads_at_point.lock().unwrap();
        let point = (ctx.voltage, ctx.frequency);
        if seen.0 != point {
            *seen = (point, 0);
        }
        seen.1 += 1;

        let sampling = seen.1 > STABILIZATION_READS;
        let temperature = if sampling && hot(ctx.voltage, ctx.frequency) {
            70.0
        } else {
            55.0
        };
        Some(nominal_telemetry(ctx.frequency as f64, temperature, 15.0))
    }
}

/// Receive until `matches` accepts an event
pub async fn wait_for<F>(rx: &mut broadcast::Receiver<BenchEvent>, mut matches: F) -> BenchEvent
where
    F: FnMut(&BenchEvent) -> bool,
{
    tokio::time::timeout(EVENT_TIMEOUT, async {
        loop {
            match rx.recv().await {
                Ok(event) if matches(&event) => return event,
                Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => {}
                Err(broadcast::error::RecvError::Closed) => panic!("event bus closed"),
            }
        }
    })
    .await
    .expect("timed out waiting for event")
}

/// Everything still buffered on `rx`
pub fn drain(rx: &mut broadcast::Receiver<BenchEvent>) -> Vec<BenchEvent> {
    let mut events = Vec::new();
    loop {
        match rx.try_recv() {
            Ok(event) => events.push(event),
            Err(broadcast::error::TryRecvError::Lagged(_)) => continue,
            Err(_) => return events,
        }
    }
}

/// Iteration numbers announced by `IterationComplete` events
pub fn iteration_numbers(events: &[BenchEvent]) -> Vec<u32> {
    events
        .iter()
        .filter_map(|e| match e {
            BenchEvent::IterationComplete {
                iteration_number, ..
            } => Some(*iteration_number),
            _ => None,
        })
        .collect()
}

/// (voltage, frequency) of every recorded result
pub fn points(results: &[axebench_common::events::IterationResult]) -> Vec<(u32, u32)> {
    results.iter().map(|r| (r.core_voltage, r.frequency)).collect()
}
