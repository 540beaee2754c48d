//! Benchmark session
//!
//! **Purpose:** The single owner of everything a running service knows about
//! its device: configuration, event bus, sweep controller, the background run
//! task, the address under test, result files and the last completion summary.
//!
//! One session is created at start-up and shared with request handlers as
//! `Arc<BenchSession>`. Only the spawned run task drives the controller; the
//! other methods either read state or send pause/stop/resume requests.

use crate::device::DeviceConnector;
use crate::error::{Error, Result};
use crate::results::{ResultsDocument, ResultsStore};
use crate::tuning::{ControllerStatus, RunRequest, SweepController};
use axebench_common::config::BenchmarkConfig;
use axebench_common::events::{BenchEvent, BenchPhase, BenchmarkSummary, EventBus};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, Mutex, RwLock};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

/// Event bus capacity; a subscriber lagging further than this loses events
pub const EVENT_BUS_CAPACITY: usize = 1024;

/// How long `reset` waits for an active run to wind down
const RESET_STOP_TIMEOUT: Duration = Duration::from_secs(5);

/// Device and start time of the current (or last) run
#[derive(Debug, Clone)]
struct RunInfo {
    address: String,
    started_at: DateTime<Utc>,
}

/// Status as reported to clients
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionStatus {
    pub state: BenchPhase,
    /// A run task is active, or a run is parked in PAUSED
    pub is_running: bool,
    pub is_paused: bool,
    pub can_resume: bool,
    pub iterations_completed: usize,
    /// Event bus subscribers
    pub connections: usize,
}

/// Owned service state for one device
pub struct BenchSession {
    config: RwLock<BenchmarkConfig>,
    /// Where config changes are persisted, if anywhere
    config_path: Option<PathBuf>,
    bus: Arc<EventBus>,
    controller: Arc<SweepController>,
    connector: Arc<dyn DeviceConnector>,
    store: ResultsStore,
    task: Mutex<Option<JoinHandle<()>>>,
    current: RwLock<Option<RunInfo>>,
    last_summary: RwLock<Option<BenchmarkSummary>>,
}

impl BenchSession {
    pub fn new(
        config: BenchmarkConfig,
        config_path: Option<PathBuf>,
        store: ResultsStore,
        connector: Arc<dyn DeviceConnector>,
    ) -> Arc<Self> {
        let bus = Arc::new(EventBus::new(EVENT_BUS_CAPACITY));
        Arc::new(Self {
            config: RwLock::new(config),
            config_path,
            controller: Arc::new(SweepController::new(bus.clone())),
            bus,
            connector,
            store,
            task: Mutex::new(None),
            current: RwLock::new(None),
            last_summary: RwLock::new(None),
        })
    }

    pub fn bus(&self) -> &Arc<EventBus> {
        &self.bus
    }

    pub fn controller(&self) -> &Arc<SweepController> {
        &self.controller
    }

    pub fn store(&self) -> &ResultsStore {
        &self.store
    }

    /// Whether the background run task is still executing
    pub async fn is_active(&self) -> bool {
        self.task
            .lock()
            .await
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }

    /// Start a run in the background
    ///
    /// The run uses a snapshot of the current configuration. The device is
    /// claimed before this returns, so `stop` and `reset` reach the run at
    /// once. When it ends, the final results file is written (if any results
    /// exist) and the summary file is updated with the final state.
    ///
    /// # Errors
    /// - `AlreadyRunning` while a run task is active or set-values holds
    ///   the device
    /// - Configuration errors from validation
    pub async fn start(self: &Arc<Self>, request: RunRequest) -> Result<()> {
        let mut task = self.task.lock().await;
        if task.as_ref().is_some_and(|handle| !handle.is_finished()) {
            return Err(Error::AlreadyRunning);
        }

        if request.address.trim().is_empty() {
            return Err(Error::Config("bitaxe_ip is required".to_string()));
        }
        let config = self.config.read().await.clone();
        config.validate()?;
        let gateway = self.connector.connect(&request.address)?;
        let ticket = self.controller.prepare().await?;

        let info = RunInfo {
            address: request.address.clone(),
            started_at: Utc::now(),
        };
        *self.current.write().await = Some(info.clone());

        info!(address = %info.address, mode = %request.mode.label(), "Starting benchmark");

        let autosave = self.spawn_autosave(self.bus.subscribe());
        let session = Arc::clone(self);
        *task = Some(tokio::spawn(async move {
            let outcome = session
                .controller
                .run_prepared(ticket, gateway, config, request)
                .await;
            autosave.abort();

            match outcome {
                Ok(summary) => {
                    let failed = session.controller.phase().await == BenchPhase::Error;
                    if !summary.all_results.is_empty() {
                        let mut doc =
                            ResultsDocument::completed(&info.address, info.started_at, &summary);
                        if failed {
                            doc.state = "error".to_string();
                        }
                        if let Err(e) = session.store.save_final(&doc) {
                            warn!(error = %e, "Failed to save final results");
                        }
                    }
                    let state = if failed || summary.all_results.is_empty() {
                        "error"
                    } else {
                        "completed"
                    };
                    session.save_summary(state).await;
                    *session.last_summary.write().await = Some(summary);
                }
                Err(e) => {
                    error!(error = %e, "Benchmark run did not start");
                    session
                        .controller
                        .reporter()
                        .error_event(format!("Benchmark failed: {}", e), None);
                }
            }
        }));

        Ok(())
    }

    /// Rewrite the summary file after every completed iteration
    fn spawn_autosave(self: &Arc<Self>, mut rx: broadcast::Receiver<BenchEvent>) -> JoinHandle<()> {
        let session = Arc::clone(self);
        tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(BenchEvent::IterationComplete { .. }) => {
                        session.save_summary("running").await;
                    }
                    Ok(_) => {}
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(skipped, "Summary autosave lagged behind the event bus");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        })
    }

    /// Write the running summary file with `state`; no-op without results
    async fn save_summary(&self, state: &str) {
        let Some(info) = self.current.read().await.clone() else {
            return;
        };
        let results = self.controller.results().await;
        if results.is_empty() {
            return;
        }

        let doc = ResultsDocument::new(&info.address, info.started_at, state, &results);
        if let Err(e) = self.store.write_summary(&doc) {
            warn!(error = %e, "Failed to write benchmark summary");
        }
    }

    /// Request a cooperative stop
    ///
    /// # Errors
    /// `InvalidState` unless a run is active or paused
    pub async fn stop(&self) -> Result<()> {
        if !self.is_active().await && self.controller.phase().await != BenchPhase::Paused {
            return Err(Error::InvalidState("No benchmark running".to_string()));
        }
        self.controller.request_stop().await;
        self.save_summary("stopped").await;
        Ok(())
    }

    /// Request a pause at the next checkpoint
    pub async fn pause(&self) -> Result<()> {
        self.controller.request_pause().await?;
        self.save_summary("paused").await;
        Ok(())
    }

    pub async fn resume(&self) -> Result<()> {
        self.controller.resume().await
    }

    /// Stop any active run, then return to IDLE with no results
    pub async fn reset(&self) {
        let handle = self.task.lock().await.take();
        if let Some(handle) = handle {
            if !handle.is_finished() {
                self.controller.request_stop().await;
                if tokio::time::timeout(RESET_STOP_TIMEOUT, handle).await.is_err() {
                    warn!("Run did not stop within {:?}, resetting anyway", RESET_STOP_TIMEOUT);
                }
            }
        }

        self.controller.reset().await;
        *self.last_summary.write().await = None;
    }

    pub async fn status(&self) -> SessionStatus {
        let active = self.is_active().await;
        let ControllerStatus {
            state,
            is_paused,
            can_resume,
            iterations_completed,
            ..
        } = self.controller.status().await;

        SessionStatus {
            state,
            is_running: active || state == BenchPhase::Paused,
            is_paused,
            can_resume,
            iterations_completed,
            connections: self.bus.subscriber_count(),
        }
    }

    /// Apply a fixed operating point outside of a run
    ///
    /// # Errors
    /// - `AlreadyRunning` while a run task is active
    /// - Out-of-range values
    /// - Stabilization failure on the device
    pub async fn set_values(&self, address: &str, voltage: u32, frequency: u32) -> Result<()> {
        if self.is_active().await {
            return Err(Error::AlreadyRunning);
        }
        let config = self.config().await;
        let gateway = self.connector.connect(address)?;
        self.controller
            .set_values(gateway, &config, voltage, frequency)
            .await
    }

    pub async fn config(&self) -> BenchmarkConfig {
        self.config.read().await.clone()
    }

    /// Replace the configuration (next run onwards)
    pub async fn replace_config(&self, config: BenchmarkConfig) -> Result<BenchmarkConfig> {
        config.validate()?;
        self.persist_config(&config)?;
        *self.config.write().await = config.clone();
        Ok(config)
    }

    /// Merge a partial JSON update into the configuration
    pub async fn patch_config(&self, patch: &serde_json::Value) -> Result<BenchmarkConfig> {
        let mut current = self.config.write().await;
        let merged = current.merge_patch(patch)?;
        self.persist_config(&merged)?;
        *current = merged.clone();
        Ok(merged)
    }

    fn persist_config(&self, config: &BenchmarkConfig) -> Result<()> {
        if let Some(path) = &self.config_path {
            config.save(path)?;
            info!("Configuration saved to {}", path.display());
        }
        Ok(())
    }

    /// In-memory results of the current (or last) run as a document
    pub async fn current_document(&self) -> ResultsDocument {
        let info = self.current.read().await.clone();
        let (address, started_at) = match info {
            Some(info) => (info.address, info.started_at),
            None => ("unknown".to_string(), Utc::now()),
        };
        let state = self.controller.phase().await.to_string();
        let results = self.controller.results().await;
        ResultsDocument::new(&address, started_at, state, &results)
    }

    pub async fn last_summary(&self) -> Option<BenchmarkSummary> {
        self.last_summary.read().await.clone()
    }

    /// Wait for the background run task to finish (if any)
    pub async fn wait_for_run(&self) {
        let handle = self.task.lock().await.take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                error!(error = %e, "Benchmark task panicked");
            }
        }
    }
}
