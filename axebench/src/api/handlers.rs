//! HTTP request handlers

use crate::api::server::AppContext;
use crate::error::{ApiError, ApiResult};
use crate::results::{self, ResultFileInfo, ResultsDocument, SUMMARY_FILENAME};
use crate::session::SessionStatus;
use crate::tuning::RunRequest;
use axebench_common::config::BenchmarkConfig;
use axum::{
    extract::{Path, State},
    http::header,
    response::IntoResponse,
    Json,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::info;

// ============================================================================
// Request/Response Types
// ============================================================================

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    status: String,
    module: String,
    version: String,
}

#[derive(Debug, Serialize)]
pub struct StatusResponse {
    status: String,
}

impl StatusResponse {
    fn new(status: &str) -> Json<Self> {
        Json(Self {
            status: status.to_string(),
        })
    }
}

#[derive(Debug, Serialize)]
pub struct ConfigResponse {
    status: String,
    config: BenchmarkConfig,
}

#[derive(Debug, Serialize)]
pub struct StartResponse {
    status: String,
    #[serde(flatten)]
    request: RunRequest,
}

#[derive(Debug, Deserialize)]
pub struct SetValuesRequest {
    bitaxe_ip: String,
    voltage: u32,
    frequency: u32,
}

#[derive(Debug, Serialize)]
pub struct SetValuesResponse {
    status: String,
    voltage: u32,
    frequency: u32,
}

// ============================================================================
// Health
// ============================================================================

/// GET /health
pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        module: "axebench".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

// ============================================================================
// Configuration
// ============================================================================

/// GET /api/config
pub async fn get_config(State(ctx): State<AppContext>) -> Json<BenchmarkConfig> {
    Json(ctx.session.config().await)
}

/// PUT /api/config - replace the whole configuration
pub async fn put_config(
    State(ctx): State<AppContext>,
    Json(config): Json<BenchmarkConfig>,
) -> ApiResult<Json<ConfigResponse>> {
    let config = ctx.session.replace_config(config).await?;
    info!("Configuration replaced");
    Ok(Json(ConfigResponse {
        status: "ok".to_string(),
        config,
    }))
}

/// PATCH /api/config - merge a partial update
pub async fn patch_config(
    State(ctx): State<AppContext>,
    Json(patch): Json<Value>,
) -> ApiResult<Json<ConfigResponse>> {
    let config = ctx.session.patch_config(&patch).await?;
    info!("Configuration updated");
    Ok(Json(ConfigResponse {
        status: "ok".to_string(),
        config,
    }))
}

// ============================================================================
// Run control
// ============================================================================

/// POST /api/benchmark/start
pub async fn start_benchmark(
    State(ctx): State<AppContext>,
    Json(request): Json<RunRequest>,
) -> ApiResult<Json<StartResponse>> {
    ctx.session.start(request.clone()).await?;
    Ok(Json(StartResponse {
        status: "started".to_string(),
        request,
    }))
}

/// POST /api/benchmark/stop
pub async fn stop_benchmark(State(ctx): State<AppContext>) -> ApiResult<Json<StatusResponse>> {
    ctx.session.stop().await?;
    Ok(StatusResponse::new("stop_requested"))
}

/// POST /api/benchmark/pause
pub async fn pause_benchmark(State(ctx): State<AppContext>) -> ApiResult<Json<StatusResponse>> {
    ctx.session.pause().await?;
    Ok(StatusResponse::new("pause_requested"))
}

/// POST /api/benchmark/resume
pub async fn resume_benchmark(State(ctx): State<AppContext>) -> ApiResult<Json<StatusResponse>> {
    ctx.session.resume().await?;
    Ok(StatusResponse::new("resumed"))
}

/// POST /api/benchmark/reset
pub async fn reset_benchmark(State(ctx): State<AppContext>) -> Json<StatusResponse> {
    ctx.session.reset().await;
    StatusResponse::new("reset")
}

/// GET /api/benchmark/status
pub async fn benchmark_status(State(ctx): State<AppContext>) -> Json<SessionStatus> {
    Json(ctx.session.status().await)
}

/// POST /api/set-values - apply fixed values without benchmarking
pub async fn set_values(
    State(ctx): State<AppContext>,
    Json(request): Json<SetValuesRequest>,
) -> ApiResult<Json<SetValuesResponse>> {
    ctx.session
        .set_values(&request.bitaxe_ip, request.voltage, request.frequency)
        .await?;
    Ok(Json(SetValuesResponse {
        status: "ok".to_string(),
        voltage: request.voltage,
        frequency: request.frequency,
    }))
}

// ============================================================================
// Results
// ============================================================================

/// GET /api/results - result files, newest first
pub async fn list_results(State(ctx): State<AppContext>) -> ApiResult<Json<Vec<ResultFileInfo>>> {
    Ok(Json(ctx.session.store().list()?))
}

/// GET /api/results/latest
///
/// The last completion summary of this process, else the newest file.
pub async fn latest_result(State(ctx): State<AppContext>) -> ApiResult<Json<Value>> {
    if let Some(summary) = ctx.session.last_summary().await {
        let value = serde_json::to_value(summary)
            .map_err(|e| ApiError::Internal(format!("Failed to encode result: {}", e)))?;
        return Ok(Json(value));
    }

    match ctx.session.store().latest()? {
        Some(value) => Ok(Json(value)),
        None => Err(ApiError::NotFound("No results available".to_string())),
    }
}

/// GET /api/results/export/summary - download the running summary file
pub async fn export_summary(State(ctx): State<AppContext>) -> ApiResult<impl IntoResponse> {
    let path = ctx.session.store().summary_path();
    let content = match std::fs::read_to_string(&path) {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(ApiError::NotFound("No summary available".to_string()));
        }
        Err(e) => return Err(ApiError::Internal(format!("Failed to read summary: {}", e))),
    };

    Ok((
        [
            (header::CONTENT_TYPE, "application/json".to_string()),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename=\"{}\"", SUMMARY_FILENAME),
            ),
        ],
        content,
    ))
}

/// GET /api/results/export/current - in-memory results, saved or not
pub async fn export_current(State(ctx): State<AppContext>) -> Json<ResultsDocument> {
    Json(ctx.session.current_document().await)
}

/// POST /api/results/import - validate a previously exported document
pub async fn import_results(Json(doc): Json<Value>) -> ApiResult<Json<Value>> {
    let imported = results::validate_import(&doc)?;
    Ok(Json(json!({
        "status": "ok",
        "results": imported.results,
        "bitaxe_ip": imported.bitaxe_ip,
        "state": imported.state,
        "iterations_completed": imported.iterations_completed,
    })))
}

/// GET /api/results/:filename
pub async fn get_result(
    State(ctx): State<AppContext>,
    Path(filename): Path<String>,
) -> ApiResult<Json<Value>> {
    Ok(Json(ctx.session.store().read(&filename)?))
}
