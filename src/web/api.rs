//! Defines the Axum API routes and handlers.

use crate::error::OrchestratorError;
use crate::orchestrator::Orchestrator;
use crate::web::auth::{CurrentUser, issue_token};
use crate::web::models::{
    AssignRequest, AuthRequest, AuthResponse, BedNotClearResponse, BulkAssignRequest, BulkAssignResponse,
    CancelRequest, CommandRequest, ConfirmClearedResponse, JobResponse, StartRequest, SubmitJobRequest,
};
use axum::{
    Json, Router,
    extract::{Path, State},
    http::{StatusCode, header},
    response::{IntoResponse, Response},
    routing::{delete, get, post},
};
use printfleet_shared::AuthBackend;
use std::sync::Arc;
use tracing::{error, warn};
use uuid::Uuid;

/// Helper to create a JSON error response with a message and status code
pub(crate) fn json_error(message: &str, status: StatusCode) -> Response {
    (status, Json(serde_json::json!({ "error": message }))).into_response()
}

impl IntoResponse for OrchestratorError {
    fn into_response(self) -> Response {
        let status = match &self {
            OrchestratorError::NotFound(_) => StatusCode::NOT_FOUND,
            OrchestratorError::InvalidState(_) => StatusCode::CONFLICT,
            OrchestratorError::InvalidArgument(_) => StatusCode::BAD_REQUEST,
            OrchestratorError::MisconfiguredPrinter(_) => StatusCode::UNPROCESSABLE_ENTITY,
            OrchestratorError::Gateway(_) | OrchestratorError::BedCheckUnavailable(_) => StatusCode::BAD_GATEWAY,
            OrchestratorError::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
            OrchestratorError::Store(e) => {
                error!(error = %e, "Record store failure");
                return json_error("Internal error", StatusCode::INTERNAL_SERVER_ERROR);
            }
            OrchestratorError::BedNotClear(result) => {
                let body = BedNotClearResponse { error: self.to_string(), bed_check: result.clone() };
                return (StatusCode::CONFLICT, Json(body)).into_response();
            }
        };
        json_error(&self.to_string(), status)
    }
}

pub struct AppStateInner {
    pub orchestrator: Arc<Orchestrator>,
    pub auth_backend: Box<dyn AuthBackend>,
    pub jwt_secret: Vec<u8>,
    pub token_ttl_secs: u64,
}
pub type AppState = Arc<AppStateInner>;

/// Creates the Axum router with all the API endpoints.
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/api/v1/auth/login", post(auth_login))
        .route("/api/v1/printers", get(list_printers))
        .route("/api/v1/printers/{id}/status", get(printer_status))
        .route("/api/v1/printers/{id}/command", post(send_command))
        .route("/api/v1/printers/{id}/bed-check", get(bed_check))
        .route("/api/v1/jobs", get(list_queue).post(submit_job))
        .route("/api/v1/jobs/{id}", delete(delete_job))
        .route("/api/v1/jobs/bulk-assign", post(bulk_assign))
        .route("/api/v1/jobs/{id}/assign", post(assign_job))
        .route("/api/v1/jobs/{id}/start", post(start_job))
        .route("/api/v1/jobs/{id}/cancel", post(cancel_job))
        .route("/api/v1/jobs/{id}/confirm-cleared", post(confirm_cleared))
        .route("/api/v1/history", get(list_history))
        .route("/api/v1/snapshots/{token}", get(get_snapshot))
        .with_state(state)
}

/// POST /api/v1/auth/login
async fn auth_login(State(state): State<AppState>, Json(payload): Json<AuthRequest>) -> Response {
    if !state.auth_backend.validate(&payload.username, &payload.password).await {
        warn!(username = %payload.username, "Rejected login");
        return json_error("Invalid credentials", StatusCode::UNAUTHORIZED);
    }
    match issue_token(&state.jwt_secret, &payload.username, state.token_ttl_secs) {
        Ok(token) => (StatusCode::OK, Json(AuthResponse { token })).into_response(),
        Err(e) => {
            error!(error = %e, "Could not sign token");
            json_error("Internal error", StatusCode::INTERNAL_SERVER_ERROR)
        }
    }
}

async fn list_printers(State(state): State<AppState>, CurrentUser(user): CurrentUser) -> Response {
    match state.orchestrator.list_printers(&user).await {
        Ok(printers) => Json(printers).into_response(),
        Err(e) => e.into_response(),
    }
}

async fn printer_status(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path(id): Path<Uuid>,
) -> Response {
    match state.orchestrator.printer_status(&user, id).await {
        Ok(status) => Json(status).into_response(),
        Err(e) => e.into_response(),
    }
}

async fn send_command(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path(id): Path<Uuid>,
    Json(payload): Json<CommandRequest>,
) -> Response {
    match state.orchestrator.send_command(&user, id, &payload.script).await {
        Ok(()) => (StatusCode::OK, Json(serde_json::json!({ "result": "ok" }))).into_response(),
        Err(e) => e.into_response(),
    }
}

async fn bed_check(State(state): State<AppState>, CurrentUser(user): CurrentUser, Path(id): Path<Uuid>) -> Response {
    match state.orchestrator.check_bed(&user, id).await {
        Ok(result) => Json(result).into_response(),
        Err(e) => e.into_response(),
    }
}

async fn list_queue(State(state): State<AppState>, CurrentUser(user): CurrentUser) -> Response {
    match state.orchestrator.list_queue(&user).await {
        Ok(jobs) => Json(jobs).into_response(),
        Err(e) => e.into_response(),
    }
}

async fn submit_job(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Json(payload): Json<SubmitJobRequest>,
) -> Response {
    match state.orchestrator.submit(&user, &payload.file_name, payload.priority).await {
        Ok(job) => (StatusCode::CREATED, Json(JobResponse { job })).into_response(),
        Err(e) => e.into_response(),
    }
}

async fn delete_job(State(state): State<AppState>, CurrentUser(user): CurrentUser, Path(id): Path<Uuid>) -> Response {
    match state.orchestrator.delete(&user, id).await {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(e) => e.into_response(),
    }
}

async fn assign_job(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path(id): Path<Uuid>,
    Json(payload): Json<AssignRequest>,
) -> Response {
    match state.orchestrator.assign(&user, id, payload.printer_id).await {
        Ok(job) => Json(JobResponse { job }).into_response(),
        Err(e) => e.into_response(),
    }
}

async fn bulk_assign(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Json(payload): Json<BulkAssignRequest>,
) -> Response {
    match state.orchestrator.bulk_assign(&user, &payload.job_ids, payload.printer_id).await {
        Ok(assigned) => Json(BulkAssignResponse { assigned }).into_response(),
        Err(e) => e.into_response(),
    }
}

async fn start_job(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path(id): Path<Uuid>,
    Json(payload): Json<StartRequest>,
) -> Response {
    match state.orchestrator.start(&user, id, payload.override_bed_check).await {
        Ok(job) => Json(JobResponse { job }).into_response(),
        Err(e) => e.into_response(),
    }
}

async fn cancel_job(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path(id): Path<Uuid>,
    Json(payload): Json<CancelRequest>,
) -> Response {
    match state.orchestrator.cancel(&user, id, &payload.reason).await {
        Ok(history) => Json(history).into_response(),
        Err(e) => e.into_response(),
    }
}

async fn confirm_cleared(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path(id): Path<Uuid>,
) -> Response {
    match state.orchestrator.confirm_bed_cleared(&user, id).await {
        Ok(next_job) => Json(ConfirmClearedResponse { next_job }).into_response(),
        Err(e) => e.into_response(),
    }
}

async fn list_history(State(state): State<AppState>, CurrentUser(user): CurrentUser) -> Response {
    match state.orchestrator.list_history(&user).await {
        Ok(rows) => Json(rows).into_response(),
        Err(e) => e.into_response(),
    }
}

/// GET /api/v1/snapshots/{token} -- the token itself is the credential
async fn get_snapshot(State(state): State<AppState>, Path(token): Path<String>) -> Response {
    let Some(vault) = state.orchestrator.guard().map(|guard| guard.vault()) else {
        return json_error("Snapshot not found", StatusCode::NOT_FOUND);
    };
    match vault.get(&token).await {
        Some(image) => ([(header::CONTENT_TYPE, "image/jpeg")], image).into_response(),
        None => json_error("Snapshot not found", StatusCode::NOT_FOUND),
    }
}
