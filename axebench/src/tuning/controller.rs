//! Sweep controller
//!
//! **Purpose:** Own the run state machine and drive the two-level
//! voltage/frequency search against one device.
//!
//! **State:** `RunState` is written only by the task executing [`SweepController::run`];
//! request methods (`request_pause`, `request_stop`, `resume`) only flip the
//! pause gate or cancel the run's token, and the run observes them at its
//! checkpoints (top of each voltage level and each frequency step, every
//! sample wait and every stabilization poll).
//!
//! **Pause gate:** A `watch` channel holding "pause requested". At a
//! checkpoint the run parks in PAUSED until the flag clears (resume) or the
//! stop token fires.
//!
//! **Claim:** [`SweepController::prepare`] takes the device lock and installs
//! the run's stop token before the run is spawned, so a stop sent right after
//! a start is never lost.
//!
//! **Exit:** Every path after capability discovery ends with a final
//! settings write: the best-by-hashrate result, or the device defaults when
//! nothing succeeded. A panic inside the sweep is caught, turns the run into
//! ERROR and still gets the final write.

use super::reporter::Reporter;
use super::safety::SafetyLimits;
use super::search::{self, FinalSettings, NextStep, SweepPlan};
use super::{sampler, stabilization, TrialContext};
use crate::device::DeviceGateway;
use crate::error::{Error, Result};
use axebench_common::config::BenchmarkConfig;
use axebench_common::events::{
    BenchEvent, BenchPhase, BenchmarkSummary, EventBus, IterationResult, SweepMode,
};
use chrono::{DateTime, Utc};
use futures::FutureExt;
use serde::{Deserialize, Serialize};
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tokio::sync::{watch, Mutex, OwnedMutexGuard, RwLock};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Parameters of one run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunRequest {
    /// Device address (IP or host name)
    #[serde(rename = "bitaxe_ip")]
    pub address: String,
    /// Starting voltage (mV); device default when absent
    #[serde(default)]
    pub initial_voltage: Option<u32>,
    /// Starting frequency (MHz); device default when absent
    #[serde(default)]
    pub initial_frequency: Option<u32>,
    #[serde(default)]
    pub mode: SweepMode,
    /// Voltage ceiling for this run, clamped to the global bound
    #[serde(default)]
    pub max_voltage: Option<u32>,
    /// Frequency ceiling for this run, clamped to the global bound
    #[serde(default)]
    pub max_frequency: Option<u32>,
    /// Chip temperature ceiling for this run only (°C)
    #[serde(default)]
    pub max_temp: Option<u32>,
}

impl RunRequest {
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            initial_voltage: None,
            initial_frequency: None,
            mode: SweepMode::FullSweep,
            max_voltage: None,
            max_frequency: None,
            max_temp: None,
        }
    }
}

/// Where a paused run will continue
///
/// Written when the run parks at a checkpoint and cleared on resume, stop or
/// reset, so its presence is exactly "can resume".
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResumeSnapshot {
    pub address: String,
    /// Next point to be applied
    pub current_voltage: u32,
    pub current_frequency: u32,
    pub initial_voltage: u32,
    pub initial_frequency: u32,
    /// Iterations started before this position
    pub iteration: u32,
    /// Overheat retries at the current point. The sweep moves to the next
    /// voltage instead of retrying, so this stays 0.
    pub overheat_retries: u32,
    pub started_at: DateTime<Utc>,
}

/// Exclusive claim on the device for one run, carrying the run's stop token
///
/// Obtained from [`SweepController::prepare`]; dropping it releases the
/// device.
pub struct RunTicket {
    _guard: OwnedMutexGuard<()>,
    cancel: CancellationToken,
}

/// Point-in-time view of the controller
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ControllerStatus {
    pub state: BenchPhase,
    pub is_paused: bool,
    pub can_resume: bool,
    pub iterations_completed: usize,
    pub current_voltage: Option<u32>,
    pub current_frequency: Option<u32>,
}

#[derive(Debug, Default)]
struct RunState {
    phase: BenchPhase,
    results: Vec<IterationResult>,
    /// Point under test (or about to be)
    current: Option<(u32, u32)>,
    snapshot: Option<ResumeSnapshot>,
}

/// Voltage-ladder position attached to status events during the sweep
#[derive(Debug, Clone, Copy)]
struct LadderPosition {
    step: usize,
    total: usize,
}

/// Runs benchmark sweeps, one at a time
pub struct SweepController {
    state: RwLock<RunState>,
    reporter: Reporter,
    /// Held for the whole of a run or a set-values operation
    run_lock: Arc<Mutex<()>>,
    /// Replaced by every `prepare`
    cancel: RwLock<CancellationToken>,
    /// `true` while a pause is requested
    pause_tx: watch::Sender<bool>,
}

impl SweepController {
    pub fn new(bus: Arc<EventBus>) -> Self {
        let (pause_tx, _) = watch::channel(false);
        Self {
            state: RwLock::new(RunState::default()),
            reporter: Reporter::new(bus),
            run_lock: Arc::new(Mutex::new(())),
            cancel: RwLock::new(CancellationToken::new()),
            pause_tx,
        }
    }

    pub fn reporter(&self) -> &Reporter {
        &self.reporter
    }

    pub async fn phase(&self) -> BenchPhase {
        self.state.read().await.phase
    }

    /// Copy of the results recorded so far in the current (or last) run
    pub async fn results(&self) -> Vec<IterationResult> {
        self.state.read().await.results.clone()
    }

    pub async fn snapshot(&self) -> Option<ResumeSnapshot> {
        self.state.read().await.snapshot.clone()
    }

    /// Resumable iff paused with a snapshot
    pub async fn can_resume(&self) -> bool {
        let state = self.state.read().await;
        state.phase == BenchPhase::Paused && state.snapshot.is_some()
    }

    pub async fn status(&self) -> ControllerStatus {
        let state = self.state.read().await;
        ControllerStatus {
            state: state.phase,
            is_paused: state.phase == BenchPhase::Paused,
            can_resume: state.phase == BenchPhase::Paused && state.snapshot.is_some(),
            iterations_completed: state.results.len(),
            current_voltage: state.current.map(|(v, _)| v),
            current_frequency: state.current.map(|(_, f)| f),
        }
    }

    /// Status event describing the current phase (sent to new observers)
    pub async fn status_event(&self) -> BenchEvent {
        let state = self.state.read().await;
        Self::status_event_for(&state, None, None)
    }

    /// Ask the run to pause at its next checkpoint
    ///
    /// # Errors
    /// `InvalidState` unless the run is STABILIZING or RUNNING
    pub async fn request_pause(&self) -> Result<()> {
        let phase = self.phase().await;
        if !phase.can_pause() {
            return Err(Error::InvalidState("Benchmark not running".to_string()));
        }
        self.pause_tx.send_replace(true);
        self.reporter
            .info("Pause requested, will pause at the next checkpoint");
        Ok(())
    }

    /// Release a paused run
    ///
    /// # Errors
    /// `InvalidState` unless the run is PAUSED
    pub async fn resume(&self) -> Result<()> {
        if self.phase().await != BenchPhase::Paused {
            return Err(Error::InvalidState("Benchmark not paused".to_string()));
        }
        self.reporter.info("Resuming benchmark");
        self.pause_tx.send_replace(false);
        Ok(())
    }

    /// Ask the run to stop; also releases a paused run
    ///
    /// Never interrupts an in-flight device command.
    pub async fn request_stop(&self) {
        // Cancel before opening the gate so a parked run sees the stop
        self.cancel.read().await.cancel();
        self.pause_tx.send_replace(false);
        self.reporter
            .info("Stop requested, will stop after current sample");

        let mut state = self.state.write().await;
        if matches!(
            state.phase,
            BenchPhase::Initializing | BenchPhase::Stabilizing | BenchPhase::Running | BenchPhase::Paused
        ) {
            state.phase = BenchPhase::Stopping;
            let event = Self::status_event_for(&state, None, Some("Stopping".to_string()));
            drop(state);
            self.reporter.emit(event);
        }
    }

    /// Back to IDLE, discarding results and any snapshot
    ///
    /// Does not stop a run; callers stop first.
    pub async fn reset(&self) {
        self.pause_tx.send_replace(false);
        {
            let mut state = self.state.write().await;
            state.results.clear();
            state.current = None;
            state.snapshot = None;
        }
        self.transition(BenchPhase::Idle, "Reset complete", None).await;
    }

    /// Claim the device for a run and install its stop token
    ///
    /// From the moment this returns, `request_stop` reaches the run even if
    /// it has not been polled yet.
    ///
    /// # Errors
    /// `AlreadyRunning` when another run or set-values holds the device
    pub async fn prepare(&self) -> Result<RunTicket> {
        let guard = self
            .run_lock
            .clone()
            .try_lock_owned()
            .map_err(|_| Error::AlreadyRunning)?;
        let cancel = CancellationToken::new();
        *self.cancel.write().await = cancel.clone();
        self.pause_tx.send_replace(false);
        Ok(RunTicket {
            _guard: guard,
            cancel,
        })
    }

    /// Claim the device and execute one complete run against `gateway`
    ///
    /// Device-unreachable and out-of-range starting values end the run in
    /// ERROR with an empty summary. A panic during the sweep ends in ERROR
    /// after the final settings write; everything else ends in COMPLETED.
    ///
    /// # Arguments
    /// - `gateway`: Connection to the device under test
    /// - `config`: Configuration snapshot for this run
    /// - `request`: Starting point, mode and per-run ceilings
    ///
    /// # Errors
    /// - `AlreadyRunning` when another run or set-values holds the device
    /// - Configuration errors, before any device interaction
    pub async fn run(
        &self,
        gateway: Arc<dyn DeviceGateway>,
        config: BenchmarkConfig,
        request: RunRequest,
    ) -> Result<BenchmarkSummary> {
        let ticket = self.prepare().await?;
        self.run_prepared(ticket, gateway, config, request).await
    }

    /// Execute one complete run on a device claimed with [`Self::prepare`]
    ///
    /// # Errors
    /// Configuration errors, before any device interaction
    pub async fn run_prepared(
        &self,
        ticket: RunTicket,
        gateway: Arc<dyn DeviceGateway>,
        config: BenchmarkConfig,
        request: RunRequest,
    ) -> Result<BenchmarkSummary> {
        config.validate()?;

        let started = Instant::now();
        let started_at = Utc::now();
        let cancel = &ticket.cancel;
        {
            let mut state = self.state.write().await;
            state.results.clear();
            state.current = None;
            state.snapshot = None;
        }

        info!(address = %request.address, mode = %request.mode.label(), "Benchmark run starting");
        self.transition(BenchPhase::Initializing, "Connecting to Bitaxe...", None)
            .await;

        let capabilities = match gateway.fetch_capabilities().await {
            Ok(caps) => caps,
            Err(e) => {
                let message = e.to_string();
                self.reporter.error_event(message.clone(), None);
                self.transition(BenchPhase::Error, message, None).await;
                return Ok(BenchmarkSummary::partial(
                    Vec::new(),
                    started.elapsed().as_secs_f64(),
                ));
            }
        };

        self.reporter.info(format!(
            "Connected to Bitaxe: {} cores, default {}mV/{}MHz",
            capabilities.core_count_product(),
            capabilities.default_voltage,
            capabilities.default_frequency
        ));

        // Zero means "not given", like an absent value
        let initial_voltage = request
            .initial_voltage
            .filter(|v| *v > 0)
            .unwrap_or(capabilities.default_voltage);
        let initial_frequency = request
            .initial_frequency
            .filter(|f| *f > 0)
            .unwrap_or(capabilities.default_frequency);

        if let Err(e) = config.safety.check_bounds(initial_voltage, initial_frequency) {
            let message = e.to_string();
            self.reporter
                .error_event(format!("Benchmark failed: {}", message), None);
            self.transition(BenchPhase::Error, message, None).await;
            return Ok(BenchmarkSummary::partial(
                Vec::new(),
                started.elapsed().as_secs_f64(),
            ));
        }

        let plan = SweepPlan::new(
            &config.safety,
            &config.increments,
            request.mode,
            initial_voltage,
            initial_frequency,
            request.max_voltage.filter(|v| *v > 0),
            request.max_frequency.filter(|f| *f > 0),
        );

        self.reporter.info(format!(
            "{} sweep: {} voltage levels ({}-{}mV, step {}mV), freq {}-{}MHz step {}MHz",
            request.mode.label(),
            plan.total_voltage_steps(),
            plan.initial_voltage,
            plan.max_voltage,
            plan.voltage_step,
            plan.initial_frequency,
            plan.max_frequency,
            plan.frequency_step
        ));

        let ctx = TrialContext {
            gateway: gateway.as_ref(),
            config: &config,
            limits: SafetyLimits::from_config(
                &config.safety,
                request.max_temp.filter(|t| *t > 0),
            ),
            core_count_product: capabilities.core_count_product(),
            cancel,
            reporter: &self.reporter,
        };

        let sweep = AssertUnwindSafe(self.sweep(&ctx, &plan, &request.address, started_at))
            .catch_unwind()
            .await;
        let failure = match sweep {
            Ok(()) => None,
            Err(payload) => {
                let message = format!("Benchmark failed: {}", panic_message(&*payload));
                self.reporter.error_event(message.clone(), Some("panic".to_string()));
                Some(message)
            }
        };

        let results = self.results().await;

        let refine_range = match request.mode {
            SweepMode::Quick => search::best_by_hashrate(&results).map(|best| {
                search::refine_range(best, plan.voltage_step, plan.frequency_step, &config.safety)
            }),
            SweepMode::FullSweep => None,
        };

        let final_settings = FinalSettings::choose(&results, &capabilities);
        let (voltage, frequency) = final_settings.point();
        match final_settings {
            FinalSettings::ApplyBest(_) => self.reporter.info(format!(
                "Applying best settings: {}mV / {}MHz",
                voltage, frequency
            )),
            FinalSettings::RestoreDefaults { .. } => {
                self.reporter.info("No results, restoring defaults")
            }
        }
        let applied_settings = match stabilization::apply_settings(&ctx, voltage, frequency, false).await
        {
            Ok(()) => final_settings.applied(),
            Err(e) => {
                self.reporter
                    .error(format!("Failed to apply final settings: {}", e));
                None
            }
        };

        self.state.write().await.snapshot = None;
        match failure {
            Some(message) => self.transition(BenchPhase::Error, message, None).await,
            None => {
                self.transition(BenchPhase::Completed, "Benchmark complete", None)
                    .await
            }
        }

        let summary = BenchmarkSummary {
            best_hashrate: search::best_by_hashrate(&results).cloned(),
            most_efficient: search::most_efficient(&results).cloned(),
            all_results: results,
            applied_settings,
            refine_range,
            total_duration_seconds: started.elapsed().as_secs_f64(),
            timestamp: Utc::now(),
        };

        info!(
            results = summary.all_results.len(),
            duration_s = summary.total_duration_seconds,
            "Benchmark run finished"
        );
        self.reporter
            .emit(BenchEvent::BenchmarkComplete(summary.clone()));

        Ok(summary)
    }

    /// Apply a fixed operating point and wait for it to stabilize
    ///
    /// # Errors
    /// - `AlreadyRunning` while a run holds the device
    /// - Out-of-range values (no device interaction)
    /// - The stabilization failure, if the point did not come up cleanly
    pub async fn set_values(
        &self,
        gateway: Arc<dyn DeviceGateway>,
        config: &BenchmarkConfig,
        voltage: u32,
        frequency: u32,
    ) -> Result<()> {
        let _guard = self.run_lock.try_lock().map_err(|_| Error::AlreadyRunning)?;
        config.safety.check_bounds(voltage, frequency)?;

        self.reporter
            .info(format!("Setting values: {}mV, {}MHz", voltage, frequency));

        let cancel = CancellationToken::new();
        let ctx = TrialContext {
            gateway: gateway.as_ref(),
            config,
            limits: SafetyLimits::from_config(&config.safety, None),
            // Not sampling
            core_count_product: 0,
            cancel: &cancel,
            reporter: &self.reporter,
        };
        stabilization::apply_settings(&ctx, voltage, frequency, true).await?;
        Ok(())
    }

    /// The two-level sweep; results accumulate in `RunState`
    async fn sweep(
        &self,
        ctx: &TrialContext<'_>,
        plan: &SweepPlan,
        address: &str,
        started_at: DateTime<Utc>,
    ) {
        let total = plan.total_voltage_steps();
        let mut iteration = 0u32;
        let mut resume_point = ResumeSnapshot {
            address: address.to_string(),
            current_voltage: plan.initial_voltage,
            current_frequency: plan.initial_frequency,
            initial_voltage: plan.initial_voltage,
            initial_frequency: plan.initial_frequency,
            iteration,
            overheat_retries: 0,
            started_at,
        };

        'ladder: for (index, &voltage) in plan.voltage_ladder.iter().enumerate() {
            resume_point.current_voltage = voltage;
            resume_point.current_frequency = plan.initial_frequency;
            resume_point.iteration = iteration;
            if !self.checkpoint(ctx.cancel, &resume_point).await {
                break;
            }

            let position = LadderPosition {
                step: index + 1,
                total,
            };
            let mut frequency = plan.initial_frequency;

            while frequency <= plan.max_frequency && !ctx.cancel.is_cancelled() {
                resume_point.current_frequency = frequency;
                resume_point.iteration = iteration;
                if !self.checkpoint(ctx.cancel, &resume_point).await {
                    break 'ladder;
                }

                self.state.write().await.current = Some((voltage, frequency));

                self.transition(
                    BenchPhase::Stabilizing,
                    format!("Applying {}mV / {}MHz", voltage, frequency),
                    Some(position),
                )
                .await;

                if let Err(failure) =
                    stabilization::apply_settings(ctx, voltage, frequency, true).await
                {
                    self.reporter.warn(format!(
                        "Stabilization failed at {}mV / {}MHz ({}), moving to next voltage",
                        voltage, frequency, failure
                    ));
                    break;
                }

                self.transition(
                    BenchPhase::Running,
                    format!("Benchmarking {}mV / {}MHz", voltage, frequency),
                    Some(position),
                )
                .await;

                iteration += 1;
                let result = sampler::run_iteration(ctx, voltage, frequency, iteration).await;
                debug!(
                    voltage,
                    frequency,
                    iteration,
                    error = ?result.error_reason,
                    "Iteration finished"
                );

                if result.is_success() {
                    self.state.write().await.results.push(result.clone());
                    self.reporter.emit(BenchEvent::IterationComplete {
                        result: result.clone(),
                        iteration_number: iteration,
                        timestamp: Utc::now(),
                    });
                }

                match search::decide(&result, plan.initial_frequency) {
                    NextStep::RaiseFrequency => {
                        frequency += plan.frequency_step;
                        self.reporter
                            .info(format!("Good hashrate, trying frequency {}MHz", frequency));
                    }
                    NextStep::NextVoltage => {
                        match result.error_reason {
                            None => self.reporter.info(format!(
                                "Hashrate out of tolerance at {}mV / {}MHz, next voltage",
                                voltage, frequency
                            )),
                            Some(reason) => self.reporter.warn(format!(
                                "Iteration failed ({}) at {}mV / {}MHz, next voltage",
                                reason, voltage, frequency
                            )),
                        }
                        break;
                    }
                    NextStep::AbortSweep => {
                        self.reporter.error(format!(
                            "Overheated at initial frequency ({}mV / {}MHz), aborting sweep",
                            voltage, frequency
                        ));
                        break 'ladder;
                    }
                }
            }
        }
    }

    /// Pause/stop checkpoint before applying `next`
    ///
    /// Parks with `next` as the resume snapshot while a pause is requested.
    ///
    /// # Returns
    /// `false` when the run must stop
    async fn checkpoint(&self, cancel: &CancellationToken, next: &ResumeSnapshot) -> bool {
        if cancel.is_cancelled() {
            return false;
        }
        if !*self.pause_tx.borrow() {
            return true;
        }

        let pause_rx = self.pause_tx.subscribe();
        {
            let mut state = self.state.write().await;
            state.current = Some((next.current_voltage, next.current_frequency));
            state.snapshot = Some(next.clone());
        }
        self.transition(BenchPhase::Paused, "Benchmark paused", None)
            .await;

        tokio::select! {
            _ = wait_for_resume(pause_rx) => {}
            _ = cancel.cancelled() => {}
        }

        let snapshot = self.state.write().await.snapshot.take();
        if cancel.is_cancelled() {
            return false;
        }

        let message = match snapshot {
            Some(s) => format!(
                "Resumed at {}mV / {}MHz",
                s.current_voltage, s.current_frequency
            ),
            None => "Resumed".to_string(),
        };
        self.transition(BenchPhase::Running, message, None).await;
        true
    }

    async fn transition(
        &self,
        phase: BenchPhase,
        message: impl Into<String>,
        position: Option<LadderPosition>,
    ) {
        let message = message.into();
        let event = {
            let mut state = self.state.write().await;
            state.phase = phase;
            Self::status_event_for(&state, position, Some(message.clone()))
        };
        info!(state = %phase, "{}", message);
        self.reporter.emit(event);
    }

    fn status_event_for(
        state: &RunState,
        position: Option<LadderPosition>,
        message: Option<String>,
    ) -> BenchEvent {
        BenchEvent::StatusChanged {
            state: state.phase,
            current_voltage: state.current.map(|(v, _)| v),
            current_frequency: state.current.map(|(_, f)| f),
            iterations_completed: state.results.len(),
            current_voltage_step: position.map(|p| p.step),
            total_voltage_steps: position.map(|p| p.total),
            message,
            timestamp: Utc::now(),
        }
    }
}

/// Text of a caught panic payload
fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unexpected panic".to_string()
    }
}

async fn wait_for_resume(mut pause_rx: watch::Receiver<bool>) {
    // The sender lives as long as the controller, so this only ends on resume
    let _ = pause_rx.wait_for(|paused| !*paused).await.is_ok();
}
