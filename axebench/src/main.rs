//! axebench - benchmark service entry point
//!
//! Serves the HTTP control API and SSE event stream for one benchmark
//! session at a time.

use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use axebench::api::{self, AppContext};
use axebench::device::HttpConnector;
use axebench::results::ResultsStore;
use axebench::BenchSession;
use axebench_common::config::{resolve_config_path, BenchmarkConfig};
use clap::Parser;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Command-line arguments for axebench
#[derive(Parser, Debug)]
#[command(name = "axebench")]
#[command(about = "Bitaxe voltage/frequency benchmark service")]
#[command(version)]
struct Args {
    /// Port to listen on
    #[arg(short, long, default_value = "8000", env = "AXEBENCH_PORT")]
    port: u16,

    /// Address to bind
    #[arg(long, default_value = "0.0.0.0", env = "AXEBENCH_HOST")]
    host: IpAddr,

    /// Configuration file (created with defaults if missing)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Directory for result files
    #[arg(long, env = "AXEBENCH_RESULTS_DIR")]
    results_dir: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "axebench=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();

    let config_path = resolve_config_path(args.config.as_deref())
        .context("Failed to resolve config path")?;
    if let Some(parent) = config_path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }
    let config = BenchmarkConfig::load_or_create(&config_path)
        .with_context(|| format!("Failed to load config from {}", config_path.display()))?;
    info!("Configuration: {}", config_path.display());

    let store = match args.results_dir {
        Some(dir) => ResultsStore::new(dir),
        None => ResultsStore::from_env(),
    };
    info!("Results directory: {}", store.dir().display());

    let session = BenchSession::new(
        config,
        Some(config_path),
        store,
        Arc::new(HttpConnector),
    );

    let addr = SocketAddr::new(args.host, args.port);
    api::run(addr, AppContext::new(session))
        .await
        .context("Server error")?;

    info!("Server shutdown complete");
    Ok(())
}
