// src/poller.rs - Completion polling loop
//
// Samples every printer once per tick and completes the printing job on the
// printing -> idle edge. The previous observation per printer lives only in
// this task.

use futures::future::join_all;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::PollerConfig;
use crate::orchestrator::Orchestrator;
use crate::store::Scope;
use printfleet_shared::{JobId, JobStatus, Printer, PrinterId};

/// What one tick did.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct TickReport {
    pub polled: usize,
    pub completed: Vec<PrinterId>,
    pub unreachable: Vec<PrinterId>,
    pub assigned: Vec<(PrinterId, JobId)>,
}

pub struct CompletionPoller {
    orchestrator: Arc<Orchestrator>,
    interval: Duration,
    auto_assign: bool,
    previous: HashMap<PrinterId, bool>,
}

impl CompletionPoller {
    pub fn new(orchestrator: Arc<Orchestrator>, config: &PollerConfig) -> Self {
        Self {
            orchestrator,
            interval: config.interval(),
            auto_assign: config.auto_assign,
            previous: HashMap::new(),
        }
    }

    /// Last observed printing flag for a printer, if it has been seen.
    pub fn last_seen_printing(&self, printer_id: PrinterId) -> Option<bool> {
        self.previous.get(&printer_id).copied()
    }

    pub fn spawn(self, shutdown: broadcast::Receiver<()>) -> JoinHandle<()> {
        tokio::spawn(self.run(shutdown))
    }

    pub async fn run(mut self, mut shutdown: broadcast::Receiver<()>) {
        info!("Completion poller running every {:?}", self.interval);
        let mut interval = tokio::time::interval(self.interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            tokio::select! {
                _ = shutdown.recv() => {
                    info!("Completion poller shutting down");
                    break;
                }
                _ = interval.tick() => {
                    let report = self.tick().await;
                    debug!(
                        polled = report.polled,
                        completed = report.completed.len(),
                        unreachable = report.unreachable.len(),
                        assigned = report.assigned.len(),
                        "Poll tick finished"
                    );
                }
            }
        }
    }

    /// Polls every printer once. Never fails: per-printer problems are logged
    /// and the printer is skipped until the next tick.
    pub async fn tick(&mut self) -> TickReport {
        let mut report = TickReport::default();
        let store = self.orchestrator.store().clone();
        let printers = match store.printers(Scope::System).await {
            Ok(printers) => printers,
            Err(e) => {
                warn!(error = %e, "Could not list printers; skipping tick");
                return report;
            }
        };
        report.polled = printers.len();

        let gateway = self.orchestrator.gateway().clone();
        let samples = join_all(printers.iter().map(|printer| {
            let gateway = gateway.clone();
            async move { gateway.query(printer).await }
        }))
        .await;

        let mut idle: Vec<&Printer> = Vec::new();
        for (printer, sample) in printers.iter().zip(samples) {
            let status = match sample {
                Ok(status) => status,
                Err(e) => {
                    if printer.is_online {
                        warn!(printer_id = %printer.id, name = %printer.name, error = %e, "Printer went offline");
                    } else {
                        debug!(printer_id = %printer.id, error = %e, "Printer still unreachable");
                    }
                    self.mark_online(printer, false).await;
                    report.unreachable.push(printer.id);
                    continue;
                }
            };
            if !printer.is_online {
                info!(printer_id = %printer.id, name = %printer.name, "Printer is online");
            }
            self.mark_online(printer, true).await;

            let was_printing = match self.previous.get(&printer.id) {
                Some(was) => *was,
                None => self.seed(printer.id).await,
            };
            let mut now_printing = status.is_printing;

            if was_printing && !status.is_printing {
                match self.orchestrator.complete(printer.id).await {
                    Ok(Some(_)) => report.completed.push(printer.id),
                    Ok(None) => {}
                    Err(e) => {
                        // Keep the edge pending so the next tick retries it.
                        warn!(printer_id = %printer.id, error = %e, "Completing job failed");
                        now_printing = true;
                    }
                }
            }
            self.previous.insert(printer.id, now_printing);

            if !status.is_printing {
                idle.push(printer);
            }
        }

        if self.auto_assign {
            for printer in idle {
                match self.orchestrator.assign_next(printer.id).await {
                    Ok(Some(job)) => report.assigned.push((printer.id, job.id)),
                    Ok(None) => {}
                    Err(e) => warn!(printer_id = %printer.id, error = %e, "Assignment scan failed"),
                }
            }
        }
        report
    }

    /// First sighting: treat a printer with a printing job on record as
    /// previously printing so a print that ended while we were down still
    /// completes once.
    async fn seed(&self, printer_id: PrinterId) -> bool {
        match self.orchestrator.store().jobs_on_printer(printer_id).await {
            Ok(jobs) => jobs.iter().any(|j| j.status == JobStatus::Printing),
            Err(e) => {
                warn!(printer_id = %printer_id, error = %e, "Could not read jobs for printer");
                false
            }
        }
    }

    async fn mark_online(&self, printer: &Printer, online: bool) {
        if printer.is_online == online {
            return;
        }
        if let Err(e) = self.orchestrator.store().set_printer_online(printer.id, online).await {
            warn!(printer_id = %printer.id, error = %e, "Could not record printer reachability");
        }
    }
}
