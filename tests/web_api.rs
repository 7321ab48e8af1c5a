//! Integration tests for the HTTP API

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use http_body_util::BodyExt; // for .collect().await
use serde_json::{Value, json};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tower::util::ServiceExt; // for `oneshot`

use printfleet::gateway::SimulatedGateway;
use printfleet::guard::{BedClearanceGuard, GuardError, SnapshotSource, VisionAnalyzer, VisionVerdict};
use printfleet::snapshot::SnapshotVault;
use printfleet::store::{InMemoryRecordStore, RecordStore};
use printfleet::web::auth::issue_token;
use printfleet::web::{AppStateInner, create_router};
use printfleet::Orchestrator;
use printfleet_shared::{InMemoryAuthBackend, Printer, SystemClock};

const SECRET: &[u8] = b"test-secret";

struct Camera;

#[async_trait]
impl SnapshotSource for Camera {
    async fn fetch(&self, _printer: &Printer) -> Result<Vec<u8>, GuardError> {
        Ok(vec![0xFF, 0xD8, 0xFF, 0xD9])
    }
}

struct BlockedBed;

#[async_trait]
impl VisionAnalyzer for BlockedBed {
    async fn analyze(&self, _snapshot: &[u8]) -> Result<VisionVerdict, GuardError> {
        Ok(VisionVerdict { is_clear: false, confidence: 0.8, label: Some("tool".to_string()) })
    }
}

struct TestApp {
    router: Router,
    gateway: Arc<SimulatedGateway>,
    printer: Printer,
    blind_printer: Printer,
}

async fn test_app() -> TestApp {
    let store = Arc::new(InMemoryRecordStore::new());
    let printer = Printer::new("alice", "mk4", "http://mk4.local").with_snapshot_url("http://mk4.local/cam");
    let blind_printer = Printer::new("alice", "mini", "http://mini.local");
    store.insert_printer(printer.clone()).await.unwrap();
    store.insert_printer(blind_printer.clone()).await.unwrap();

    let gateway = Arc::new(SimulatedGateway::new(Duration::from_secs(3600)));
    let guard = BedClearanceGuard::new(
        Arc::new(Camera),
        Arc::new(BlockedBed),
        SnapshotVault::new(Duration::from_secs(300), "http://fleet.local"),
        Duration::from_secs(5),
    );
    let orchestrator = Orchestrator::new(store, gateway.clone(), Arc::new(SystemClock)).with_guard(guard);

    let users = HashMap::from([
        ("alice".to_string(), "wonderland".to_string()),
        ("bob".to_string(), "builder".to_string()),
    ]);
    let state = Arc::new(AppStateInner {
        orchestrator: Arc::new(orchestrator),
        auth_backend: Box::new(InMemoryAuthBackend::new(users)),
        jwt_secret: SECRET.to_vec(),
        token_ttl_secs: 600,
    });
    TestApp { router: create_router(state), gateway, printer, blind_printer }
}

fn token(user: &str) -> String {
    issue_token(SECRET, user, 600).unwrap()
}

async fn call(app: &Router, method: &str, uri: &str, user: Option<&str>, body: Option<Value>) -> (StatusCode, Value) {
    let mut request = Request::builder().method(method).uri(uri);
    if let Some(user) = user {
        request = request.header("authorization", format!("Bearer {}", token(user)));
    }
    let request = match body {
        Some(body) => request
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => request.body(Body::empty()).unwrap(),
    };
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let json = if bytes.is_empty() { Value::Null } else { serde_json::from_slice(&bytes).unwrap_or(Value::Null) };
    (status, json)
}

async fn submit(app: &Router, user: &str, file_name: &str) -> String {
    let (status, body) = call(app, "POST", "/api/v1/jobs", Some(user), Some(json!({ "file_name": file_name }))).await;
    assert_eq!(status, StatusCode::CREATED);
    body["job"]["id"].as_str().unwrap().to_string()
}

#[tokio::test]
async fn test_login() {
    let app = test_app().await;
    let (status, body) = call(
        &app.router,
        "POST",
        "/api/v1/auth/login",
        None,
        Some(json!({ "username": "alice", "password": "wonderland" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert!(body.get("token").is_some());

    let (status, body) = call(
        &app.router,
        "POST",
        "/api/v1/auth/login",
        None,
        Some(json!({ "username": "alice", "password": "nope" })),
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"], "Invalid credentials");
}

#[tokio::test]
async fn test_requests_need_valid_token() {
    let app = test_app().await;
    let (status, _) = call(&app.router, "GET", "/api/v1/jobs", None, None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let forged = issue_token(b"someone-else", "alice", 600).unwrap();
    let request = Request::builder()
        .uri("/api/v1/jobs")
        .header("authorization", format!("Bearer {forged}"))
        .body(Body::empty())
        .unwrap();
    let response = app.router.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_queue_is_per_owner() {
    let app = test_app().await;
    let job_id = submit(&app.router, "alice", "benchy.gcode").await;

    let (status, body) = call(&app.router, "GET", "/api/v1/jobs", Some("alice"), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body.as_array().unwrap().len(), 1);
    assert_eq!(body[0]["status"], "pending");

    let (_, body) = call(&app.router, "GET", "/api/v1/jobs", Some("bob"), None).await;
    assert!(body.as_array().unwrap().is_empty());

    let uri = format!("/api/v1/jobs/{job_id}");
    let (status, _) = call(&app.router, "DELETE", &uri, Some("bob"), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    let (status, _) = call(&app.router, "DELETE", &uri, Some("alice"), None).await;
    assert_eq!(status, StatusCode::NO_CONTENT);
}

#[tokio::test]
async fn test_printers_hide_api_keys() {
    let app = test_app().await;
    let (status, body) = call(&app.router, "GET", "/api/v1/printers", Some("alice"), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body.as_array().unwrap().len(), 2);
    assert!(body[0].get("api_key").is_none());

    let (_, body) = call(&app.router, "GET", "/api/v1/printers", Some("bob"), None).await;
    assert!(body.as_array().unwrap().is_empty());
}

#[tokio::test]
async fn test_assignment_status_codes() {
    let app = test_app().await;
    let first = submit(&app.router, "alice", "a.gcode").await;
    let second = submit(&app.router, "alice", "b.gcode").await;
    let assign = json!({ "printer_id": app.printer.id });

    let (status, body) =
        call(&app.router, "POST", &format!("/api/v1/jobs/{first}/assign"), Some("alice"), Some(assign.clone())).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["job"]["status"], "assigned");

    let (status, _) =
        call(&app.router, "POST", &format!("/api/v1/jobs/{second}/assign"), Some("alice"), Some(assign.clone())).await;
    assert_eq!(status, StatusCode::CONFLICT);

    let missing = uuid::Uuid::new_v4();
    let (status, _) =
        call(&app.router, "POST", &format!("/api/v1/jobs/{missing}/assign"), Some("alice"), Some(assign)).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_bulk_assign() {
    let app = test_app().await;
    let a = submit(&app.router, "alice", "a.gcode").await;
    let b = submit(&app.router, "alice", "b.gcode").await;
    let (status, body) = call(
        &app.router,
        "POST",
        "/api/v1/jobs/bulk-assign",
        Some("alice"),
        Some(json!({ "job_ids": [a, b], "printer_id": app.printer.id })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["assigned"], 1);
}

#[tokio::test]
async fn test_blocked_bed_returns_check_and_snapshot() {
    let app = test_app().await;
    let job = submit(&app.router, "alice", "a.gcode").await;
    call(
        &app.router,
        "POST",
        &format!("/api/v1/jobs/{job}/assign"),
        Some("alice"),
        Some(json!({ "printer_id": app.printer.id })),
    )
    .await;

    let start = format!("/api/v1/jobs/{job}/start");
    let (status, body) = call(&app.router, "POST", &start, Some("alice"), Some(json!({}))).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["bed_check"]["is_clear"], false);
    let url = body["bed_check"]["snapshot_url"].as_str().unwrap();
    let path = url.strip_prefix("http://fleet.local").unwrap();

    // Snapshot links work without a token.
    let response = app
        .router
        .clone()
        .oneshot(Request::builder().uri(path).body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()["content-type"], "image/jpeg");
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    assert_eq!(bytes.to_vec(), vec![0xFFu8, 0xD8, 0xFF, 0xD9]);

    let (status, body) =
        call(&app.router, "POST", &start, Some("alice"), Some(json!({ "override_bed_check": true }))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["job"]["status"], "printing");

    let (status, body) = call(
        &app.router,
        "GET",
        &format!("/api/v1/printers/{}/status", app.printer.id),
        Some("alice"),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["is_printing"], true);
}

#[tokio::test]
async fn test_unknown_snapshot_is_not_found() {
    let app = test_app().await;
    let (status, _) = call(&app.router, "GET", "/api/v1/snapshots/deadbeef", None, None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_bed_check_without_camera_is_unprocessable() {
    let app = test_app().await;
    let uri = format!("/api/v1/printers/{}/bed-check", app.blind_printer.id);
    let (status, body) = call(&app.router, "GET", &uri, Some("alice"), None).await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert!(body["error"].as_str().unwrap().contains("snapshot"));
}

#[tokio::test]
async fn test_start_on_unreachable_printer_is_bad_gateway() {
    let app = test_app().await;
    let job = submit(&app.router, "alice", "a.gcode").await;
    call(
        &app.router,
        "POST",
        &format!("/api/v1/jobs/{job}/assign"),
        Some("alice"),
        Some(json!({ "printer_id": app.blind_printer.id })),
    )
    .await;
    app.gateway.set_reachable(app.blind_printer.id, false);

    let start = format!("/api/v1/jobs/{job}/start");
    let (status, _) =
        call(&app.router, "POST", &start, Some("alice"), Some(json!({ "override_bed_check": true }))).await;
    assert_eq!(status, StatusCode::BAD_GATEWAY);
}

#[tokio::test]
async fn test_cancel_and_history() {
    let app = test_app().await;
    let job = submit(&app.router, "alice", "a.gcode").await;
    call(
        &app.router,
        "POST",
        &format!("/api/v1/jobs/{job}/assign"),
        Some("alice"),
        Some(json!({ "printer_id": app.printer.id })),
    )
    .await;

    let cancel = format!("/api/v1/jobs/{job}/cancel");
    let (status, _) = call(&app.router, "POST", &cancel, Some("alice"), Some(json!({ "reason": "" }))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, body) =
        call(&app.router, "POST", &cancel, Some("alice"), Some(json!({ "reason": "wrong colour" }))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "cancelled");

    let (_, body) = call(&app.router, "GET", "/api/v1/history", Some("alice"), None).await;
    assert_eq!(body[0]["cancellation_reason"], "wrong colour");
    let (_, body) = call(&app.router, "GET", "/api/v1/history", Some("bob"), None).await;
    assert!(body.as_array().unwrap().is_empty());

    let (status, _) =
        call(&app.router, "POST", &format!("/api/v1/jobs/{job}/confirm-cleared"), Some("alice"), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_send_command() {
    let app = test_app().await;
    let uri = format!("/api/v1/printers/{}/command", app.printer.id);
    let (status, _) = call(&app.router, "POST", &uri, Some("alice"), Some(json!({ "script": "M117 hi" }))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(app.gateway.commands(app.printer.id), vec!["M117 hi".to_string()]);

    let (status, _) = call(&app.router, "POST", &uri, Some("bob"), Some(json!({ "script": "M112" }))).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}
