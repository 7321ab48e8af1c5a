//! Print job lifecycle.
//!
//! ```text
//! pending --assign--> assigned --start--> printing --complete--> completed --confirm_bed_cleared--> (removed)
//! pending --delete--> (removed)
//! assigned|printing --cancel--> (removed, history: cancelled)
//! ```
//!
//! Every user-facing operation takes the caller's identity and only sees that
//! caller's printers and jobs. `complete` and `assign_next` are driven by the
//! poller and act in system scope.
//!
//! Failure policy differs per transition: `start` fails closed (a gateway
//! error leaves the job assigned), `cancel` fails open (the cancellation is
//! recorded even when the printer cannot be told to stop).

use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::error::{OrchestratorError, Result};
use crate::gateway::PrinterGateway;
use crate::guard::BedClearanceGuard;
use crate::store::{Applied, JobChange, RecordStore, Scope, Update};
use printfleet_shared::{
    next_in_queue, queue_order, BedClearanceResult, Clock, HistoryStatus, JobHistory, JobId,
    JobStatus, Printer, PrinterId, PrinterStatus, QueueItem,
};

pub struct Orchestrator {
    store: Arc<dyn RecordStore>,
    gateway: Arc<dyn PrinterGateway>,
    guard: Option<BedClearanceGuard>,
    clock: Arc<dyn Clock>,
}

impl Orchestrator {
    pub fn new(store: Arc<dyn RecordStore>, gateway: Arc<dyn PrinterGateway>, clock: Arc<dyn Clock>) -> Self {
        Self { store, gateway, guard: None, clock }
    }

    /// Enables the bed clearance check before every non-overridden start.
    pub fn with_guard(mut self, guard: BedClearanceGuard) -> Self {
        self.guard = Some(guard);
        self
    }

    pub fn store(&self) -> &Arc<dyn RecordStore> {
        &self.store
    }

    pub fn gateway(&self) -> &Arc<dyn PrinterGateway> {
        &self.gateway
    }

    pub fn guard(&self) -> Option<&BedClearanceGuard> {
        self.guard.as_ref()
    }

    async fn owned_job(&self, owner: &str, id: JobId) -> Result<QueueItem> {
        self.store
            .job(Scope::Owner(owner), id)
            .await?
            .ok_or_else(|| OrchestratorError::NotFound(format!("job {id}")))
    }

    async fn owned_printer(&self, owner: &str, id: PrinterId) -> Result<Printer> {
        self.store
            .printer(Scope::Owner(owner), id)
            .await?
            .ok_or_else(|| OrchestratorError::NotFound(format!("printer {id}")))
    }

    /// Queues a new job for `owner`.
    pub async fn submit(&self, owner: &str, file_name: &str, priority: i32) -> Result<QueueItem> {
        let file_name = file_name.trim();
        if file_name.is_empty() {
            return Err(OrchestratorError::InvalidArgument("file name must not be empty".to_string()));
        }
        let item = QueueItem::new(owner, file_name, priority, self.clock.now());
        self.store.insert_job(item.clone()).await?;
        info!(job_id = %item.id, owner, file_name, priority, "Job submitted");
        Ok(item)
    }

    /// The caller's queue, next-to-serve first.
    pub async fn list_queue(&self, owner: &str) -> Result<Vec<QueueItem>> {
        let mut jobs = self.store.jobs(Scope::Owner(owner)).await?;
        jobs.sort_by(queue_order);
        Ok(jobs)
    }

    pub async fn list_history(&self, owner: &str) -> Result<Vec<JobHistory>> {
        Ok(self.store.history(Scope::Owner(owner)).await?)
    }

    pub async fn list_printers(&self, owner: &str) -> Result<Vec<Printer>> {
        Ok(self.store.printers(Scope::Owner(owner)).await?)
    }

    pub async fn assign(&self, owner: &str, job_id: JobId, printer_id: PrinterId) -> Result<QueueItem> {
        self.owned_printer(owner, printer_id).await?;
        let change = JobChange::Assign { printer_id, at: self.clock.now() };
        let update = self
            .store
            .update_job(Scope::Owner(owner), job_id, &[JobStatus::Pending], change)
            .await?;
        let applied = expect_applied(update, job_id, "assign")?;
        info!(job_id = %job_id, printer_id = %printer_id, "Job assigned");
        applied
            .after
            .ok_or_else(|| OrchestratorError::NotFound(format!("job {job_id}")))
    }

    /// Assigns each listed job that is still pending, best candidates first.
    /// Jobs that are missing, not pending, or lose the printer to an earlier
    /// job in the batch are skipped. Returns how many were assigned.
    pub async fn bulk_assign(&self, owner: &str, job_ids: &[JobId], printer_id: PrinterId) -> Result<usize> {
        self.owned_printer(owner, printer_id).await?;
        let mut candidates: Vec<QueueItem> = self
            .store
            .jobs(Scope::Owner(owner))
            .await?
            .into_iter()
            .filter(|j| job_ids.contains(&j.id) && j.status == JobStatus::Pending)
            .collect();
        candidates.sort_by(queue_order);

        let mut assigned = 0;
        for job in candidates {
            let change = JobChange::Assign { printer_id, at: self.clock.now() };
            match self
                .store
                .update_job(Scope::Owner(owner), job.id, &[JobStatus::Pending], change)
                .await?
            {
                Update::Applied(_) => {
                    assigned += 1;
                    info!(job_id = %job.id, printer_id = %printer_id, "Job assigned (bulk)");
                }
                outcome => debug!(job_id = %job.id, ?outcome, "Skipping job in bulk assignment"),
            }
        }
        Ok(assigned)
    }

    /// Starts an assigned job on its printer.
    ///
    /// A printer whose last print has not been confirmed cleared refuses the
    /// start regardless of `override_bed_check`.
    ///
    /// Unless `override_bed_check` is set, the bed clearance check runs first
    /// and a bed that is not clear fails with `BedNotClear`. The override only
    /// applies to this call.
    pub async fn start(&self, owner: &str, job_id: JobId, override_bed_check: bool) -> Result<QueueItem> {
        let job = self.owned_job(owner, job_id).await?;
        if job.status != JobStatus::Assigned {
            return Err(invalid_state(job_id, job.status, "start"));
        }
        let printer_id = job
            .printer_id
            .ok_or_else(|| OrchestratorError::InvalidState(format!("job {job_id} has no printer")))?;
        let printer = self.owned_printer(owner, printer_id).await?;
        let uncleared = self
            .store
            .jobs_on_printer(printer_id)
            .await?
            .iter()
            .any(|j| j.id != job_id && j.status == JobStatus::Completed);
        if uncleared {
            return Err(bed_uncleared(printer_id));
        }

        match (&self.guard, override_bed_check) {
            (Some(guard), false) => {
                let result = guard.check(&printer).await?;
                if !result.is_clear {
                    return Err(OrchestratorError::BedNotClear(result));
                }
            }
            (Some(_), true) => warn!(job_id = %job_id, printer_id = %printer_id, "Bed clearance check overridden"),
            (None, _) => {}
        }

        if let Err(e) = self.gateway.start_print(&printer, &job.file_name).await {
            warn!(job_id = %job_id, printer_id = %printer_id, error = %e, "Printer refused to start; job stays assigned");
            return Err(e.into());
        }

        let change = JobChange::Start { at: self.clock.now() };
        let update = self
            .store
            .update_job(Scope::Owner(owner), job_id, &[JobStatus::Assigned], change)
            .await?;
        match expect_applied(update, job_id, "start") {
            Ok(applied) => {
                info!(job_id = %job_id, printer_id = %printer_id, file = %job.file_name, "Print started");
                applied
                    .after
                    .ok_or_else(|| OrchestratorError::NotFound(format!("job {job_id}")))
            }
            Err(e) => {
                // The job changed underneath us (typically a concurrent
                // cancel). Don't leave the printer running an orphaned print.
                warn!(job_id = %job_id, printer_id = %printer_id, error = %e, "Job changed while starting; stopping printer");
                if let Err(cancel_err) = self.gateway.cancel_print(&printer).await {
                    warn!(printer_id = %printer_id, error = %cancel_err, "Could not stop orphaned print");
                }
                Err(e)
            }
        }
    }

    /// Cancels an assigned or printing job and records it as cancelled.
    ///
    /// The record is written first; telling a printing printer to stop is best
    /// effort and its failure is only logged.
    pub async fn cancel(&self, owner: &str, job_id: JobId, reason: &str) -> Result<JobHistory> {
        let reason = reason.trim();
        if reason.is_empty() {
            return Err(OrchestratorError::InvalidArgument("a cancellation reason is required".to_string()));
        }
        let change = JobChange::Finish {
            outcome: HistoryStatus::Cancelled,
            reason: Some(reason.to_string()),
            at: self.clock.now(),
            retain_as: None,
        };
        let update = self
            .store
            .update_job(Scope::Owner(owner), job_id, &[JobStatus::Assigned, JobStatus::Printing], change)
            .await?;
        let applied = expect_applied(update, job_id, "cancel")?;
        let history = applied
            .history
            .ok_or_else(|| OrchestratorError::InvalidState(format!("job {job_id} left no history")))?;
        info!(job_id = %job_id, reason, duration_seconds = history.duration_seconds, "Job cancelled");

        if applied.before.status == JobStatus::Printing {
            self.stop_printer(history.printer_id).await;
        }
        Ok(history)
    }

    async fn stop_printer(&self, printer_id: PrinterId) {
        let printer = match self.store.printer(Scope::System, printer_id).await {
            Ok(Some(printer)) => printer,
            Ok(None) => {
                warn!(printer_id = %printer_id, "Printer vanished; cannot send cancel");
                return;
            }
            Err(e) => {
                warn!(printer_id = %printer_id, error = %e, "Printer lookup failed; cannot send cancel");
                return;
            }
        };
        if let Err(e) = self.gateway.cancel_print(&printer).await {
            warn!(printer_id = %printer_id, error = %e, "Cancel command failed; cancellation is recorded regardless");
        }
    }

    /// Marks the job printing on `printer_id` as completed.
    ///
    /// A printer with no printing job is a no-op, so repeated or late calls
    /// never produce a second history row.
    pub async fn complete(&self, printer_id: PrinterId) -> Result<Option<JobHistory>> {
        let printing = self
            .store
            .jobs_on_printer(printer_id)
            .await?
            .into_iter()
            .find(|j| j.status == JobStatus::Printing);
        let Some(job) = printing else {
            debug!(printer_id = %printer_id, "No printing job to complete");
            return Ok(None);
        };

        let change = JobChange::Finish {
            outcome: HistoryStatus::Success,
            reason: None,
            at: self.clock.now(),
            retain_as: Some(JobStatus::Completed),
        };
        match self
            .store
            .update_job(Scope::System, job.id, &[JobStatus::Printing], change)
            .await?
        {
            Update::Applied(applied) => {
                let history = applied.history;
                if let Some(row) = &history {
                    info!(
                        job_id = %job.id,
                        printer_id = %printer_id,
                        duration_seconds = row.duration_seconds,
                        "Print completed; waiting for bed clearance"
                    );
                }
                Ok(history)
            }
            outcome => {
                debug!(job_id = %job.id, ?outcome, "Job left printing before completion was recorded");
                Ok(None)
            }
        }
    }

    /// Removes a completed job once its bed has been cleared.
    ///
    /// Returns the file name of the next job already assigned to the same
    /// printer, if any. That job is not started.
    pub async fn confirm_bed_cleared(&self, owner: &str, job_id: JobId) -> Result<Option<String>> {
        let update = self
            .store
            .update_job(Scope::Owner(owner), job_id, &[JobStatus::Completed], JobChange::Remove)
            .await?;
        let applied = expect_applied(update, job_id, "confirm bed clearance for")?;
        let Some(printer_id) = applied.before.printer_id else {
            return Ok(None);
        };
        info!(job_id = %job_id, printer_id = %printer_id, "Bed cleared");

        let on_printer = self.store.jobs_on_printer(printer_id).await?;
        let next = next_in_queue(on_printer.iter().filter(|j| j.status == JobStatus::Assigned));
        Ok(next.map(|j| j.file_name.clone()))
    }

    /// Removes a job that never left the queue.
    pub async fn delete(&self, owner: &str, job_id: JobId) -> Result<()> {
        let update = self
            .store
            .update_job(Scope::Owner(owner), job_id, &[JobStatus::Pending], JobChange::Remove)
            .await?;
        expect_applied(update, job_id, "delete")?;
        info!(job_id = %job_id, "Job deleted");
        Ok(())
    }

    /// Runs the bed clearance check on demand.
    pub async fn check_bed(&self, owner: &str, printer_id: PrinterId) -> Result<BedClearanceResult> {
        let printer = self.owned_printer(owner, printer_id).await?;
        let guard = self.guard.as_ref().ok_or_else(|| {
            OrchestratorError::MisconfiguredPrinter("bed clearance checking is disabled".to_string())
        })?;
        Ok(guard.check(&printer).await?)
    }

    pub async fn printer_status(&self, owner: &str, printer_id: PrinterId) -> Result<PrinterStatus> {
        let printer = self.owned_printer(owner, printer_id).await?;
        Ok(self.gateway.query(&printer).await?)
    }

    /// Forwards a G-code script (e.g. `PAUSE`, `RESUME`) to the printer.
    pub async fn send_command(&self, owner: &str, printer_id: PrinterId, script: &str) -> Result<()> {
        if script.trim().is_empty() {
            return Err(OrchestratorError::InvalidArgument("script must not be empty".to_string()));
        }
        let printer = self.owned_printer(owner, printer_id).await?;
        self.gateway.send_command(&printer, script).await?;
        info!(printer_id = %printer_id, script, "Command sent");
        Ok(())
    }

    /// Assigns the owner's best pending job to an idle printer.
    ///
    /// Does nothing while the printer holds an active job or a completed job
    /// whose bed has not been confirmed clear.
    pub async fn assign_next(&self, printer_id: PrinterId) -> Result<Option<QueueItem>> {
        let printer = self
            .store
            .printer(Scope::System, printer_id)
            .await?
            .ok_or_else(|| OrchestratorError::NotFound(format!("printer {printer_id}")))?;
        let occupied = self
            .store
            .jobs_on_printer(printer_id)
            .await?
            .iter()
            .any(|j| j.status.is_active() || j.status == JobStatus::Completed);
        if occupied {
            return Ok(None);
        }

        let scope = Scope::Owner(&printer.owner);
        let mut pending: Vec<QueueItem> = self
            .store
            .jobs(scope)
            .await?
            .into_iter()
            .filter(|j| j.status == JobStatus::Pending)
            .collect();
        pending.sort_by(queue_order);

        for job in pending {
            let change = JobChange::Assign { printer_id, at: self.clock.now() };
            match self.store.update_job(scope, job.id, &[JobStatus::Pending], change).await? {
                Update::Applied(applied) => {
                    info!(job_id = %job.id, printer_id = %printer_id, "Job auto-assigned");
                    return Ok(applied.after);
                }
                Update::PrinterBusy | Update::BedUncleared => return Ok(None),
                // Taken or removed since we listed it; try the next one.
                Update::Missing | Update::Conflict(_) => continue,
            }
        }
        Ok(None)
    }
}

fn invalid_state(job_id: JobId, status: JobStatus, action: &str) -> OrchestratorError {
    OrchestratorError::InvalidState(format!("cannot {action} job {job_id} while it is {status}"))
}

fn bed_uncleared(printer_id: PrinterId) -> OrchestratorError {
    OrchestratorError::InvalidState(format!("bed on printer {printer_id} has not been confirmed clear"))
}

fn expect_applied(update: Update, job_id: JobId, action: &str) -> Result<Applied> {
    match update {
        Update::Applied(applied) => Ok(applied),
        Update::Missing => Err(OrchestratorError::NotFound(format!("job {job_id}"))),
        Update::Conflict(status) => Err(invalid_state(job_id, status, action)),
        Update::PrinterBusy => Err(OrchestratorError::InvalidState(
            "printer already has an assigned or printing job".to_string(),
        )),
        Update::BedUncleared => Err(OrchestratorError::InvalidState(format!(
            "cannot {action} job {job_id} before the previous print is cleared from the bed"
        ))),
    }
}
