//! Run narrative publishing
//!
//! Every log line of a run goes to both `tracing` and the event bus, so the
//! process log and every observer see the same story. Emission never blocks.

use axebench_common::events::{BenchEvent, EventBus, LogLevel};
use std::sync::Arc;

/// Thin publishing handle over the event bus
#[derive(Clone)]
pub struct Reporter {
    bus: Arc<EventBus>,
}

impl Reporter {
    pub fn new(bus: Arc<EventBus>) -> Self {
        Self { bus }
    }

    pub fn bus(&self) -> &Arc<EventBus> {
        &self.bus
    }

    /// Publish an event to whoever is listening
    pub fn emit(&self, event: BenchEvent) {
        self.bus.emit_lossy(event);
    }

    pub fn info(&self, message: impl Into<String>) {
        self.log(LogLevel::Info, message.into());
    }

    pub fn warn(&self, message: impl Into<String>) {
        self.log(LogLevel::Warning, message.into());
    }

    pub fn error(&self, message: impl Into<String>) {
        self.log(LogLevel::Error, message.into());
    }

    /// Publish a run-level error event (and log it)
    pub fn error_event(&self, error: impl Into<String>, details: Option<String>) {
        let error = error.into();
        tracing::error!(details = ?details, "{}", error);
        self.emit(BenchEvent::error(error, details));
    }

    fn log(&self, level: LogLevel, message: String) {
        match level {
            LogLevel::Info => tracing::info!("{}", message),
            LogLevel::Warning => tracing::warn!("{}", message),
            LogLevel::Error => tracing::error!("{}", message),
        }
        self.emit(BenchEvent::log(level, message));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_lines_reach_the_bus() {
        let bus = Arc::new(EventBus::new(16));
        let mut rx = bus.subscribe();
        let reporter = Reporter::new(bus);

        reporter.warn("System info fetch failed, attempt 1/3");
        reporter.error_event("Benchmark failed", None);

        match rx.try_recv().unwrap() {
            BenchEvent::Log { level, message, .. } => {
                assert_eq!(level, LogLevel::Warning);
                assert!(message.contains("attempt 1/3"));
            }
            other => panic!("unexpected event {:?}", other),
        }
        assert_eq!(rx.try_recv().unwrap().event_type(), "error");
    }

    #[test]
    fn test_emit_without_subscribers_does_not_fail() {
        let reporter = Reporter::new(Arc::new(EventBus::new(4)));
        for _ in 0..10 {
            reporter.info("nobody listening");
        }
    }
}
