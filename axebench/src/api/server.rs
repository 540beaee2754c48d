//! HTTP server setup and routing

use crate::error::{Error, Result};
use crate::session::BenchSession;
use axum::{
    routing::{get, post},
    Router,
};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::signal;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

/// Shared application context passed to all handlers
#[derive(Clone)]
pub struct AppContext {
    pub session: Arc<BenchSession>,
}

impl AppContext {
    pub fn new(session: Arc<BenchSession>) -> Self {
        Self { session }
    }
}

/// Build the router with every route attached to `ctx`
pub fn build_router(ctx: AppContext) -> Router {
    use super::handlers;

    Router::new()
        .route("/health", get(handlers::health))
        // Configuration
        .route(
            "/api/config",
            get(handlers::get_config)
                .put(handlers::put_config)
                .patch(handlers::patch_config),
        )
        // Run control
        .route("/api/benchmark/start", post(handlers::start_benchmark))
        .route("/api/benchmark/stop", post(handlers::stop_benchmark))
        .route("/api/benchmark/pause", post(handlers::pause_benchmark))
        .route("/api/benchmark/resume", post(handlers::resume_benchmark))
        .route("/api/benchmark/reset", post(handlers::reset_benchmark))
        .route("/api/benchmark/status", get(handlers::benchmark_status))
        .route("/api/set-values", post(handlers::set_values))
        // Result files
        .route("/api/results", get(handlers::list_results))
        .route("/api/results/latest", get(handlers::latest_result))
        .route("/api/results/export/summary", get(handlers::export_summary))
        .route("/api/results/export/current", get(handlers::export_current))
        .route("/api/results/import", post(handlers::import_results))
        .route("/api/results/:filename", get(handlers::get_result))
        // SSE event stream
        .route("/events", get(super::sse::event_stream))
        .with_state(ctx)
        .layer(TraceLayer::new_for_http())
        // Dashboard may be served from another origin
        .layer(CorsLayer::permissive())
}

/// Run the HTTP server until Ctrl+C or SIGTERM
///
/// An active run is asked to stop before the process exits, so the device is
/// left at its best or default settings.
pub async fn run(addr: SocketAddr, ctx: AppContext) -> Result<()> {
    let session = ctx.session.clone();
    let app = build_router(ctx);

    info!("Starting HTTP server on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|e| Error::Http(format!("Failed to bind to {}: {}", addr, e)))?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .map_err(|e| Error::Http(format!("Server error: {}", e)))?;

    if session.is_active().await {
        info!("Stopping active benchmark before exit");
        session.controller().request_stop().await;
        session.wait_for_run().await;
    }

    info!("Server shutdown complete");
    Ok(())
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                warn!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, shutting down");
        },
        _ = terminate => {
            info!("Received terminate signal, shutting down");
        },
    }
}
