//! Record store contract.
//!
//! The orchestrator never mutates a job with a read-then-write pair. Every
//! transition goes through [`RecordStore::update_job`], which applies the
//! change only if the job is still in one of the expected statuses and, for
//! assignments, only if the printer has no other active job. Implementations
//! must perform that check and the write as one atomic step.

pub mod memory;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

use printfleet_shared::{
    HistoryStatus, JobHistory, JobId, JobStatus, Printer, PrinterId, QueueItem,
};

pub use memory::InMemoryRecordStore;

/// Whose records an operation may see.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scope<'a> {
    Owner(&'a str),
    /// Background work such as completion polling, which acts for every owner.
    System,
}

impl Scope<'_> {
    pub fn permits(&self, owner: &str) -> bool {
        match self {
            Scope::Owner(user) => *user == owner,
            Scope::System => true,
        }
    }
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("record store failure: {0}")]
    Backend(String),
}

pub type StoreResult<T> = Result<T, StoreError>;

/// A conditional change to one queue item.
#[derive(Debug, Clone, PartialEq)]
pub enum JobChange {
    /// Bind to a printer; refused with [`Update::PrinterBusy`] if another
    /// job on that printer is assigned or printing.
    Assign { printer_id: PrinterId, at: DateTime<Utc> },
    /// Mark printing and restart the duration clock; refused with
    /// [`Update::BedUncleared`] while another job on the printer is completed.
    Start { at: DateTime<Utc> },
    /// Append a history row for the item's current state, then either keep
    /// the item under `retain_as` or remove it.
    Finish {
        outcome: HistoryStatus,
        reason: Option<String>,
        at: DateTime<Utc>,
        retain_as: Option<JobStatus>,
    },
    Remove,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Applied {
    pub before: QueueItem,
    /// `None` when the item was removed.
    pub after: Option<QueueItem>,
    pub history: Option<JobHistory>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Update {
    Applied(Applied),
    /// No such job within the scope.
    Missing,
    /// The job exists but its status is not one of the expected ones.
    Conflict(JobStatus),
    PrinterBusy,
    /// The printer still holds a completed job whose bed was not confirmed clear.
    BedUncleared,
}

#[async_trait]
pub trait RecordStore: Send + Sync + 'static {
    async fn insert_printer(&self, printer: Printer) -> StoreResult<()>;
    async fn printer(&self, scope: Scope<'_>, id: PrinterId) -> StoreResult<Option<Printer>>;
    async fn printers(&self, scope: Scope<'_>) -> StoreResult<Vec<Printer>>;
    /// Records reachability; returns whether the flag changed.
    async fn set_printer_online(&self, id: PrinterId, online: bool) -> StoreResult<bool>;

    async fn insert_job(&self, item: QueueItem) -> StoreResult<()>;
    async fn job(&self, scope: Scope<'_>, id: JobId) -> StoreResult<Option<QueueItem>>;
    async fn jobs(&self, scope: Scope<'_>) -> StoreResult<Vec<QueueItem>>;
    async fn jobs_on_printer(&self, printer_id: PrinterId) -> StoreResult<Vec<QueueItem>>;
    async fn update_job(
        &self,
        scope: Scope<'_>,
        id: JobId,
        expected: &[JobStatus],
        change: JobChange,
    ) -> StoreResult<Update>;

    async fn history(&self, scope: Scope<'_>) -> StoreResult<Vec<JobHistory>>;
}
