//! Event types for the axebench event system
//!
//! Provides the benchmark event definitions and the EventBus that fans them
//! out to observers (SSE clients, the console runner, result autosave).

// Sub-modules (supporting types)
mod bench_types;
mod result_types;

pub use bench_types::{BenchPhase, LogLevel, SweepMode, TrialError};
pub use result_types::{
    AppliedSettings, BenchmarkSummary, IterationResult, RefineRange, SampleData,
};

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

/// Benchmark event types
///
/// Events are broadcast via EventBus and serialized for SSE transmission.
/// The serialized `type` tag is the snake_case message name observers
/// switch on.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum BenchEvent {
    /// Lifecycle phase changed
    ///
    /// Emitted on every phase transition and on connect (current status).
    #[serde(rename = "benchmark_status")]
    StatusChanged {
        state: BenchPhase,
        /// Voltage under test (mV), absent outside a sweep
        current_voltage: Option<u32>,
        /// Frequency under test (MHz), absent outside a sweep
        current_frequency: Option<u32>,
        iterations_completed: usize,
        /// 1-based voltage ladder position
        current_voltage_step: Option<usize>,
        total_voltage_steps: Option<usize>,
        message: Option<String>,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// One accepted sample within the running trial
    #[serde(rename = "sample_progress")]
    SampleProgress {
        /// 1-based sample index
        sample_number: u32,
        total_samples: u32,
        /// 0-100
        progress_percent: f64,
        core_voltage: u32,
        frequency: u32,
        sample: SampleData,
        /// Incremental hashrate stddev over the samples so far (display only)
        running_stddev: f64,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// A trial finished without error
    #[serde(rename = "iteration_complete")]
    IterationComplete {
        result: IterationResult,
        iteration_number: u32,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// Whole run finished
    #[serde(rename = "benchmark_complete")]
    BenchmarkComplete(BenchmarkSummary),

    /// Run-level error
    #[serde(rename = "error")]
    Error {
        error: String,
        details: Option<String>,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// Human-readable progress line
    #[serde(rename = "log")]
    Log {
        level: LogLevel,
        message: String,
        timestamp: chrono::DateTime<chrono::Utc>,
    },
}

impl BenchEvent {
    /// Wire name of the event (the serialized `type` tag)
    pub fn event_type(&self) -> &'static str {
        match self {
            BenchEvent::StatusChanged { .. } => "benchmark_status",
            BenchEvent::SampleProgress { .. } => "sample_progress",
            BenchEvent::IterationComplete { .. } => "iteration_complete",
            BenchEvent::BenchmarkComplete(_) => "benchmark_complete",
            BenchEvent::Error { .. } => "error",
            BenchEvent::Log { .. } => "log",
        }
    }

    pub fn log(level: LogLevel, message: impl Into<String>) -> Self {
        BenchEvent::Log {
            level,
            message: message.into(),
            timestamp: chrono::Utc::now(),
        }
    }

    pub fn error(error: impl Into<String>, details: Option<String>) -> Self {
        BenchEvent::Error {
            error: error.into(),
            details,
            timestamp: chrono::Utc::now(),
        }
    }
}

// ========================================
// EventBus Implementation
// ========================================

/// Central event distribution bus for benchmark events
///
/// The EventBus uses tokio::broadcast internally, providing:
/// - Non-blocking publish (slow subscribers don't block the sweep)
/// - Multiple concurrent subscribers
/// - Automatic cleanup when subscribers drop
/// - Lagged message detection for slow subscribers
///
/// # Examples
///
/// ```
/// use axebench_common::events::{BenchEvent, EventBus, LogLevel};
/// use std::sync::Arc;
///
/// let event_bus = Arc::new(EventBus::new(256));
///
/// // Subscribe to events
/// let mut rx = event_bus.subscribe();
///
/// // Emit an event
/// event_bus.emit_lossy(BenchEvent::log(LogLevel::Info, "Applying 1150mV / 500MHz"));
///
/// assert_eq!(rx.try_recv().unwrap().event_type(), "log");
/// ```
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<BenchEvent>,
    capacity: usize,
}

impl EventBus {
    /// Creates a new EventBus with specified channel capacity
    ///
    /// # Arguments
    ///
    /// * `capacity` - Number of events to buffer before a lagging subscriber
    ///   starts losing the oldest ones
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx, capacity }
    }

    /// Subscribe to all future events
    ///
    /// Events emitted before subscription are not received.
    pub fn subscribe(&self) -> broadcast::Receiver<BenchEvent> {
        self.tx.subscribe()
    }

    /// Emit an event to all subscribers
    ///
    /// Returns `Ok(subscriber_count)` if at least one subscriber exists.
    /// Returns `Err` if no subscribers are listening.
    #[allow(clippy::result_large_err)]
    pub fn emit(
        &self,
        event: BenchEvent,
    ) -> Result<usize, broadcast::error::SendError<BenchEvent>> {
        self.tx.send(event)
    }

    /// Emit an event, ignoring if no subscribers are listening
    ///
    /// The controller publishes exclusively through this method.
    pub fn emit_lossy(&self, event: BenchEvent) {
        let _ = self.tx.send(event);
    }

    /// Get the current number of active subscribers
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }

    /// Get the configured channel capacity
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
