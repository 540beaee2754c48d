//! Console benchmark runner
//!
//! Runs one sweep against a device and prints progress as it goes, or applies
//! a fixed operating point with `--set-values`.
//!
//! **Usage:**
//! ```bash
//! axebench-run 192.168.1.50 [-v 1150] [-f 500] [--mode quick] [--max-temp 62]
//! axebench-run 192.168.1.50 -s -v 1200 -f 600
//! ```
//!
//! Ctrl+C stops the sweep at the next checkpoint; the best settings found so
//! far (or the device defaults) are still applied and saved.

use anyhow::{bail, Context, Result};
use axebench::device::{DeviceConnector, HttpConnector};
use axebench::results::{ResultsDocument, ResultsStore};
use axebench::tuning::{CliFormatter, RunRequest, SweepController};
use axebench_common::config::{resolve_config_path, BenchmarkConfig};
use axebench_common::events::{BenchEvent, EventBus, SweepMode};
use chrono::Utc;
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Bitaxe voltage/frequency benchmark
#[derive(Parser, Debug)]
#[command(name = "axebench-run")]
#[command(about = "Benchmark a Bitaxe across voltage and frequency settings")]
#[command(version)]
struct Args {
    /// Device IP address or host name
    bitaxe_ip: String,

    /// Starting core voltage (mV); device default if omitted
    #[arg(short = 'v', long = "voltage")]
    voltage: Option<u32>,

    /// Starting frequency (MHz); device default if omitted
    #[arg(short = 'f', long = "frequency")]
    frequency: Option<u32>,

    /// Apply voltage and frequency without benchmarking
    #[arg(short = 's', long, requires_all = ["voltage", "frequency"])]
    set_values: bool,

    /// Chip temperature ceiling for this run (°C)
    #[arg(long)]
    max_temp: Option<u32>,

    /// Sweep mode: full_sweep or quick
    #[arg(long, default_value = "full_sweep")]
    mode: SweepMode,

    /// Voltage ceiling for this run (mV)
    #[arg(long)]
    max_voltage: Option<u32>,

    /// Frequency ceiling for this run (MHz)
    #[arg(long)]
    max_frequency: Option<u32>,

    /// Directory for the results file
    #[arg(short = 'o', long, env = "AXEBENCH_RESULTS_DIR", default_value = "results")]
    output_dir: PathBuf,

    /// Configuration file; defaults are used if it does not exist
    #[arg(long)]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "axebench=warn".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();
    let config = load_config(args.config.as_deref())?;

    let bus = Arc::new(EventBus::new(1024));
    let controller = Arc::new(SweepController::new(bus.clone()));
    let gateway = HttpConnector
        .connect(&args.bitaxe_ip)
        .with_context(|| format!("Invalid device address '{}'", args.bitaxe_ip))?;

    if args.set_values {
        let (Some(voltage), Some(frequency)) = (args.voltage, args.frequency) else {
            bail!("--set-values requires both --voltage and --frequency");
        };
        controller
            .set_values(gateway, &config, voltage, frequency)
            .await
            .context("Failed to apply settings")?;
        println!(
            "Settings applied: {}mV / {}MHz. Check hashrate after the device restarts.",
            voltage, frequency
        );
        return Ok(());
    }

    println!("{}", CliFormatter::disclaimer());

    let request = RunRequest {
        address: args.bitaxe_ip.clone(),
        initial_voltage: args.voltage,
        initial_frequency: args.frequency,
        mode: args.mode,
        max_voltage: args.max_voltage,
        max_frequency: args.max_frequency,
        max_temp: args.max_temp,
    };

    // Claim the device first so an early Ctrl+C reaches this run
    let ticket = controller
        .prepare()
        .await
        .context("Device is busy")?;

    let stopper = {
        let controller = controller.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                println!("\nStopping after the current sample, then applying the best settings...");
                controller.request_stop().await;
            }
        })
    };

    let started_at = Utc::now();
    let mut rx = bus.subscribe();
    let run = controller.run_prepared(ticket, gateway, config, request);
    tokio::pin!(run);

    let outcome = loop {
        tokio::select! {
            outcome = &mut run => break outcome,
            event = rx.recv() => print_event(event),
        }
    };
    // Events emitted in the last poll of the run
    while let Ok(event) = rx.try_recv() {
        print_event(Ok(event));
    }
    stopper.abort();

    let summary = outcome.context("Benchmark failed")?;

    if !summary.all_results.is_empty() {
        let store = ResultsStore::new(&args.output_dir);
        let doc = ResultsDocument::completed(&args.bitaxe_ip, started_at, &summary);
        match store.save_final(&doc) {
            Ok(path) => println!("Results saved to {}", path.display()),
            Err(e) => warn!("Failed to save results: {}", e),
        }
    }

    println!("{}", CliFormatter::format_summary(&summary, &args.bitaxe_ip));
    info!(duration_s = summary.total_duration_seconds, "Done");
    Ok(())
}

fn print_event(event: std::result::Result<BenchEvent, broadcast::error::RecvError>) {
    match event {
        Ok(event) => {
            if let Some(text) = CliFormatter::format_event(&event) {
                println!("{}", text);
            }
        }
        Err(broadcast::error::RecvError::Lagged(skipped)) => {
            warn!(skipped, "Console output fell behind, events dropped");
        }
        Err(broadcast::error::RecvError::Closed) => {}
    }
}

fn load_config(cli_arg: Option<&std::path::Path>) -> Result<BenchmarkConfig> {
    let path = resolve_config_path(cli_arg).context("Failed to resolve config path")?;
    if !path.exists() {
        return Ok(BenchmarkConfig::default());
    }
    let config = BenchmarkConfig::load(&path)
        .with_context(|| format!("Failed to load config from {}", path.display()))?;
    info!("Configuration: {}", path.display());
    Ok(config)
}
