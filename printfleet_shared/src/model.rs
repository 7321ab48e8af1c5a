//! Fleet records shared by the orchestrator, the record store and the web layer.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use uuid::Uuid;

pub type PrinterId = Uuid;
pub type JobId = Uuid;

/// A network-attached printer and how to reach its controller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Printer {
    pub id: PrinterId,
    pub owner: String,
    pub name: String,
    /// Base URL of the controller API, e.g. `http://10.0.0.12:7125`.
    pub base_url: String,
    #[serde(default, skip_serializing)]
    pub api_key: Option<String>,
    /// Camera snapshot endpoint used by the bed clearance check.
    #[serde(default)]
    pub snapshot_url: Option<String>,
    #[serde(default)]
    pub is_online: bool,
    #[serde(default)]
    pub ai_failure_detection_enabled: bool,
}

impl Printer {
    pub fn new(owner: impl Into<String>, name: impl Into<String>, base_url: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            owner: owner.into(),
            name: name.into(),
            base_url: base_url.into(),
            api_key: None,
            snapshot_url: None,
            is_online: false,
            ai_failure_detection_enabled: false,
        }
    }

    pub fn with_snapshot_url(mut self, url: impl Into<String>) -> Self {
        self.snapshot_url = Some(url.into());
        self
    }

    pub fn with_api_key(mut self, key: impl Into<String>) -> Self {
        self.api_key = Some(key.into());
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Assigned,
    Printing,
    Completed,
    /// Set by external collaborators (e.g. failure detection); no orchestrator transition produces it.
    Failed,
}

impl JobStatus {
    /// Statuses that occupy a printer for the single-active-job rule.
    pub fn is_active(self) -> bool {
        matches!(self, JobStatus::Assigned | JobStatus::Printing)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Assigned => "assigned",
            JobStatus::Printing => "printing",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
        }
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A submitted print job waiting for, or occupying, a printer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueItem {
    pub id: JobId,
    pub owner: String,
    pub file_name: String,
    pub priority: i32,
    pub status: JobStatus,
    pub printer_id: Option<PrinterId>,
    pub created_at: DateTime<Utc>,
    /// Set on assignment, reset when the print actually starts.
    pub assigned_at: Option<DateTime<Utc>>,
}

impl QueueItem {
    pub fn new(owner: impl Into<String>, file_name: impl Into<String>, priority: i32, created_at: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            owner: owner.into(),
            file_name: file_name.into(),
            priority,
            status: JobStatus::Pending,
            printer_id: None,
            created_at,
            assigned_at: None,
        }
    }
}

/// Queue ordering: priority descending, then oldest first.
pub fn queue_order(a: &QueueItem, b: &QueueItem) -> Ordering {
    b.priority
        .cmp(&a.priority)
        .then_with(|| a.created_at.cmp(&b.created_at))
}

/// Picks the item that should be served next out of `items`.
pub fn next_in_queue<'a, I>(items: I) -> Option<&'a QueueItem>
where
    I: IntoIterator<Item = &'a QueueItem>,
{
    items.into_iter().min_by(|a, b| queue_order(a, b))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HistoryStatus {
    Success,
    /// Written by external collaborators; the orchestrator records only success and cancellation.
    Failed,
    Cancelled,
}

/// Immutable record of a terminated print.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobHistory {
    pub id: Uuid,
    pub owner: String,
    pub printer_id: PrinterId,
    pub file_name: String,
    pub duration_seconds: i64,
    pub status: HistoryStatus,
    pub cancellation_reason: Option<String>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl JobHistory {
    /// Builds the history row for `item` ending at `finished_at`.
    ///
    /// Duration is measured from `assigned_at` (the print start once the job
    /// is printing) and clamped at zero when the clocks disagree. Returns
    /// `None` if the item never reached a printer.
    pub fn for_item(
        item: &QueueItem,
        status: HistoryStatus,
        cancellation_reason: Option<String>,
        finished_at: DateTime<Utc>,
    ) -> Option<Self> {
        let printer_id = item.printer_id?;
        let started_at = item.assigned_at.unwrap_or(item.created_at);
        Some(Self {
            id: Uuid::new_v4(),
            owner: item.owner.clone(),
            printer_id,
            file_name: item.file_name.clone(),
            duration_seconds: elapsed_seconds(started_at, finished_at),
            status,
            cancellation_reason,
            started_at,
            finished_at,
        })
    }
}

/// Whole seconds between two instants, never negative.
pub fn elapsed_seconds(from: DateTime<Utc>, to: DateTime<Utc>) -> i64 {
    (to - from).num_seconds().max(0)
}

/// Snapshot of a printer controller as reported by a status query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct PrinterStatus {
    pub is_printing: bool,
    /// Percent complete, 0..=100.
    pub progress: f32,
    pub file_name: Option<String>,
    pub nozzle_temp: f32,
    pub bed_temp: f32,
}

/// Verdict of a bed clearance check. Never persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BedClearanceResult {
    pub is_clear: bool,
    pub reason: String,
    /// Short-lived review link, only present when the bed is not clear.
    pub snapshot_url: Option<String>,
}
