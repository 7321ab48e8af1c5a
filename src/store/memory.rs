// In-process record store. All tables sit behind one async mutex, so each
// call is a transaction.

use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::Mutex;

use super::{Applied, JobChange, RecordStore, Scope, StoreError, StoreResult, Update};
use printfleet_shared::{JobHistory, JobId, JobStatus, Printer, PrinterId, QueueItem};

#[derive(Debug, Default)]
struct Tables {
    printers: HashMap<PrinterId, Printer>,
    jobs: HashMap<JobId, QueueItem>,
    history: Vec<JobHistory>,
}

impl Tables {
    fn printer_busy(&self, printer_id: PrinterId, except: JobId) -> bool {
        self.jobs.values().any(|j| {
            j.id != except && j.printer_id == Some(printer_id) && j.status.is_active()
        })
    }

    fn bed_uncleared(&self, printer_id: PrinterId, except: JobId) -> bool {
        self.jobs.values().any(|j| {
            j.id != except && j.printer_id == Some(printer_id) && j.status == JobStatus::Completed
        })
    }
}

#[derive(Debug, Default)]
pub struct InMemoryRecordStore {
    inner: Mutex<Tables>,
}

impl InMemoryRecordStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RecordStore for InMemoryRecordStore {
    async fn insert_printer(&self, printer: Printer) -> StoreResult<()> {
        let mut tables = self.inner.lock().await;
        if tables.printers.contains_key(&printer.id) {
            return Err(StoreError::Backend(format!("printer {} already exists", printer.id)));
        }
        tables.printers.insert(printer.id, printer);
        Ok(())
    }

    async fn printer(&self, scope: Scope<'_>, id: PrinterId) -> StoreResult<Option<Printer>> {
        let tables = self.inner.lock().await;
        Ok(tables.printers.get(&id).filter(|p| scope.permits(&p.owner)).cloned())
    }

    async fn printers(&self, scope: Scope<'_>) -> StoreResult<Vec<Printer>> {
        let tables = self.inner.lock().await;
        let mut printers: Vec<Printer> = tables
            .printers
            .values()
            .filter(|p| scope.permits(&p.owner))
            .cloned()
            .collect();
        printers.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(printers)
    }

    async fn set_printer_online(&self, id: PrinterId, online: bool) -> StoreResult<bool> {
        let mut tables = self.inner.lock().await;
        match tables.printers.get_mut(&id) {
            Some(printer) if printer.is_online != online => {
                printer.is_online = online;
                Ok(true)
            }
            Some(_) => Ok(false),
            None => Err(StoreError::Backend(format!("printer {id} does not exist"))),
        }
    }

    async fn insert_job(&self, item: QueueItem) -> StoreResult<()> {
        let mut tables = self.inner.lock().await;
        if tables.jobs.contains_key(&item.id) {
            return Err(StoreError::Backend(format!("job {} already exists", item.id)));
        }
        tables.jobs.insert(item.id, item);
        Ok(())
    }

    async fn job(&self, scope: Scope<'_>, id: JobId) -> StoreResult<Option<QueueItem>> {
        let tables = self.inner.lock().await;
        Ok(tables.jobs.get(&id).filter(|j| scope.permits(&j.owner)).cloned())
    }

    async fn jobs(&self, scope: Scope<'_>) -> StoreResult<Vec<QueueItem>> {
        let tables = self.inner.lock().await;
        Ok(tables
            .jobs
            .values()
            .filter(|j| scope.permits(&j.owner))
            .cloned()
            .collect())
    }

    async fn jobs_on_printer(&self, printer_id: PrinterId) -> StoreResult<Vec<QueueItem>> {
        let tables = self.inner.lock().await;
        Ok(tables
            .jobs
            .values()
            .filter(|j| j.printer_id == Some(printer_id))
            .cloned()
            .collect())
    }

    async fn update_job(
        &self,
        scope: Scope<'_>,
        id: JobId,
        expected: &[JobStatus],
        change: JobChange,
    ) -> StoreResult<Update> {
        let mut tables = self.inner.lock().await;
        let before = match tables.jobs.get(&id) {
            Some(job) if scope.permits(&job.owner) => job.clone(),
            _ => return Ok(Update::Missing),
        };
        if !expected.contains(&before.status) {
            return Ok(Update::Conflict(before.status));
        }

        let mut history = None;
        let after = match change {
            JobChange::Assign { printer_id, at } => {
                if tables.printer_busy(printer_id, id) {
                    return Ok(Update::PrinterBusy);
                }
                let mut item = before.clone();
                item.status = JobStatus::Assigned;
                item.printer_id = Some(printer_id);
                item.assigned_at = Some(at);
                Some(item)
            }
            JobChange::Start { at } => {
                if before.printer_id.is_some_and(|printer_id| tables.bed_uncleared(printer_id, id)) {
                    return Ok(Update::BedUncleared);
                }
                let mut item = before.clone();
                item.status = JobStatus::Printing;
                item.assigned_at = Some(at);
                Some(item)
            }
            JobChange::Finish { outcome, reason, at, retain_as } => {
                let row = JobHistory::for_item(&before, outcome, reason, at).ok_or_else(|| {
                    StoreError::Backend(format!("job {id} has no printer to record history against"))
                })?;
                tables.history.push(row.clone());
                history = Some(row);
                retain_as.map(|status| {
                    let mut item = before.clone();
                    item.status = status;
                    item
                })
            }
            JobChange::Remove => None,
        };

        match &after {
            Some(item) => {
                tables.jobs.insert(id, item.clone());
            }
            None => {
                tables.jobs.remove(&id);
            }
        }
        Ok(Update::Applied(Applied { before, after, history }))
    }

    async fn history(&self, scope: Scope<'_>) -> StoreResult<Vec<JobHistory>> {
        let tables = self.inner.lock().await;
        let mut rows: Vec<JobHistory> = tables
            .history
            .iter()
            .filter(|h| scope.permits(&h.owner))
            .cloned()
            .collect();
        rows.sort_by(|a, b| b.finished_at.cmp(&a.finished_at));
        Ok(rows)
    }
}
