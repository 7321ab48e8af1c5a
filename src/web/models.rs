//! Contains the data models for API requests and responses.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use printfleet_shared::{BedClearanceResult, QueueItem};

/// Represents a login request.
#[derive(Deserialize)]
pub struct AuthRequest {
    pub username: String,
    pub password: String,
}

/// Represents a login response with JWT token.
#[derive(Serialize)]
pub struct AuthResponse {
    pub token: String,
}

#[derive(Deserialize)]
pub struct SubmitJobRequest {
    pub file_name: String,
    #[serde(default)]
    pub priority: i32,
}

#[derive(Deserialize)]
pub struct AssignRequest {
    pub printer_id: Uuid,
}

#[derive(Deserialize)]
pub struct BulkAssignRequest {
    pub job_ids: Vec<Uuid>,
    pub printer_id: Uuid,
}

#[derive(Serialize)]
pub struct BulkAssignResponse {
    pub assigned: usize,
}

#[derive(Deserialize, Default)]
pub struct StartRequest {
    /// Start even though the last bed check failed.
    #[serde(default)]
    pub override_bed_check: bool,
}

#[derive(Deserialize)]
pub struct CancelRequest {
    pub reason: String,
}

#[derive(Serialize)]
pub struct ConfirmClearedResponse {
    /// File name of the next job already assigned to the printer.
    pub next_job: Option<String>,
}

/// Represents a request to run a G-code script.
#[derive(Deserialize)]
pub struct CommandRequest {
    pub script: String,
}

#[derive(Serialize)]
pub struct JobResponse {
    pub job: QueueItem,
}

/// Error body for a start blocked by the bed clearance check.
#[derive(Serialize)]
pub struct BedNotClearResponse {
    pub error: String,
    pub bed_check: BedClearanceResult,
}
