//! HTTP API integration tests
//!
//! Requests go straight through the router with `oneshot`; no socket is
//! bound.

mod helpers;

use axebench::api::{build_router, AppContext};
use axebench::device::ScriptedConnector;
use axebench::results::ResultsStore;
use axebench::BenchSession;
use axebench_common::config::BenchmarkConfig;
use axum::body::Body;
use axum::http::{header, Method, Request, StatusCode};
use axum::Router;
use helpers::healthy_device;
use http_body_util::BodyExt;
use serde_json::{json, Value};
use std::sync::Arc;
use tempfile::TempDir;
use tower::ServiceExt;

struct TestApp {
    router: Router,
    session: Arc<BenchSession>,
    _dir: TempDir,
}

fn setup() -> TestApp {
    let dir = TempDir::new().unwrap();
    let session = BenchSession::new(
        BenchmarkConfig::default(),
        None,
        ResultsStore::new(dir.path()),
        Arc::new(ScriptedConnector::new(healthy_device())),
    );
    TestApp {
        router: build_router(AppContext::new(session.clone())),
        session,
        _dir: dir,
    }
}

async fn send(app: &TestApp, method: Method, path: &str, body: Option<Value>) -> (StatusCode, Value) {
    let (status, _, bytes) = send_raw(app, method, path, body).await;
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or(Value::Null)
    };
    (status, value)
}

async fn send_raw(
    app: &TestApp,
    method: Method,
    path: &str,
    body: Option<Value>,
) -> (StatusCode, header::HeaderMap, Vec<u8>) {
    let request = Request::builder().method(method).uri(path);
    let request = match body {
        Some(json) => request
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(json.to_string()))
            .unwrap(),
        None => request.body(Body::empty()).unwrap(),
    };

    let response = app.router.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let headers = response.headers().clone();
    let bytes = response.into_body().collect().await.unwrap().to_bytes().to_vec();
    (status, headers, bytes)
}

fn short_run() -> Value {
    json!({
        "bitaxe_ip": "10.0.0.2",
        "max_voltage": 1150,
        "max_frequency": 520
    })
}

#[tokio::test]
async fn test_health() {
    let app = setup();
    let (status, body) = send(&app, Method::GET, "/health", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
    assert_eq!(body["module"], "axebench");
}

#[tokio::test]
async fn test_idle_status_and_control_errors() {
    let app = setup();

    let (status, body) = send(&app, Method::GET, "/api/benchmark/status", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["state"], "idle");
    assert_eq!(body["is_running"], false);

    for path in ["/api/benchmark/stop", "/api/benchmark/pause", "/api/benchmark/resume"] {
        let (status, body) = send(&app, Method::POST, path, None).await;
        assert_eq!(status, StatusCode::BAD_REQUEST, "{}", path);
        assert_eq!(body["error"]["code"], "BAD_REQUEST");
    }

    let (status, body) = send(&app, Method::POST, "/api/benchmark/reset", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "reset");
}

#[tokio::test(start_paused = true)]
async fn test_start_conflict_and_results() {
    let app = setup();

    let (status, _) = send(&app, Method::GET, "/api/results/latest", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    let (status, _) = send(&app, Method::GET, "/api/results/export/summary", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, body) = send(&app, Method::POST, "/api/benchmark/start", Some(short_run())).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "started");
    assert_eq!(body["bitaxe_ip"], "10.0.0.2");
    assert_eq!(body["mode"], "full_sweep");

    let (status, body) = send(&app, Method::POST, "/api/benchmark/start", Some(short_run())).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"]["code"], "CONFLICT");

    let (status, _) = send(
        &app,
        Method::POST,
        "/api/set-values",
        Some(json!({ "bitaxe_ip": "10.0.0.2", "voltage": 1200, "frequency": 600 })),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);

    app.session.wait_for_run().await;

    let (status, body) = send(&app, Method::GET, "/api/results/latest", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["all_results"].as_array().unwrap().len(), 2);

    let (status, body) = send(&app, Method::GET, "/api/results", None).await;
    assert_eq!(status, StatusCode::OK);
    let files = body.as_array().unwrap();
    assert_eq!(files.len(), 2);

    let final_file = files
        .iter()
        .filter_map(|f| f["filename"].as_str())
        .find(|name| name.starts_with("bitaxe_benchmark_results_"))
        .unwrap()
        .to_string();
    let (status, body) = send(&app, Method::GET, &format!("/api/results/{}", final_file), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["state"], "completed");

    let (status, headers, _) =
        send_raw(&app, Method::GET, "/api/results/export/summary", None).await;
    assert_eq!(status, StatusCode::OK);
    assert!(headers[header::CONTENT_DISPOSITION]
        .to_str()
        .unwrap()
        .contains("benchmark_summary.json"));

    let (status, body) = send(&app, Method::GET, "/api/results/export/current", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["bitaxe_ip"], "10.0.0.2");
    assert_eq!(body["state"], "completed");
}

#[tokio::test]
async fn test_start_requires_address() {
    let app = setup();
    let (status, _) = send(
        &app,
        Method::POST,
        "/api/benchmark/start",
        Some(json!({ "bitaxe_ip": "" })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_result_file_lookup_errors() {
    let app = setup();

    let (status, _) = send(&app, Method::GET, "/api/results/missing.json", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) = send(&app, Method::GET, "/api/results/..secret.json", None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_import_validation() {
    let app = setup();

    let (status, body) = send(
        &app,
        Method::POST,
        "/api/results/import",
        Some(json!({ "results": [] })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"]["message"]
        .as_str()
        .unwrap()
        .contains("all_results"));

    let doc = json!({
        "bitaxe_ip": "10.0.0.2",
        "state": "completed",
        "all_results": [{
            "core_voltage": 1150,
            "frequency": 500,
            "average_hashrate": 500.0,
            "hashrate_stddev": 1.0,
            "average_temperature": 55.0,
            "average_power": 15.0,
            "efficiency_jth": 30.0,
            "hashrate_within_tolerance": true
        }]
    });
    let (status, body) = send(&app, Method::POST, "/api/results/import", Some(doc)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
    assert_eq!(body["iterations_completed"], 1);
    assert_eq!(body["bitaxe_ip"], "10.0.0.2");
}

#[tokio::test]
async fn test_config_get_patch_put() {
    let app = setup();

    let (status, body) = send(&app, Method::GET, "/api/config", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["safety"]["max_temp"], 66);

    let (status, body) = send(
        &app,
        Method::PATCH,
        "/api/config",
        Some(json!({ "safety": { "max_temp": 60 } })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["config"]["safety"]["max_temp"], 60);
    assert_eq!(body["config"]["safety"]["max_power"], 30);

    let mut invalid = serde_json::to_value(BenchmarkConfig::default()).unwrap();
    invalid["increments"]["voltage_increment"] = json!(0);
    let (status, _) = send(&app, Method::PUT, "/api/config", Some(invalid)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (_, body) = send(&app, Method::GET, "/api/config", None).await;
    assert_eq!(body["safety"]["max_temp"], 60);
    assert_eq!(body["increments"]["voltage_increment"], 15);
}

#[tokio::test(start_paused = true)]
async fn test_set_values_when_idle() {
    let app = setup();
    let (status, body) = send(
        &app,
        Method::POST,
        "/api/set-values",
        Some(json!({ "bitaxe_ip": "10.0.0.2", "voltage": 1200, "frequency": 600 })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["voltage"], 1200);

    let (status, _) = send(
        &app,
        Method::POST,
        "/api/set-values",
        Some(json!({ "bitaxe_ip": "10.0.0.2", "voltage": 900, "frequency": 600 })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}
