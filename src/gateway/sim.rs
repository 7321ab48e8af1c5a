//! In-process printer fleet used by `serve --simulate` and the test suites.
//!
//! Each simulated controller prints for a fixed duration and then goes idle.
//! Reachability and individual operations can be switched to fail so the
//! orchestrator's failure policies can be exercised without hardware.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;
use tokio::time::Instant;

use super::{GatewayError, PrinterGateway};
use printfleet_shared::{Printer, PrinterId, PrinterStatus};

#[derive(Debug)]
struct SimPrinter {
    job: Option<(String, Instant)>,
    reachable: bool,
    fail_start: bool,
    fail_cancel: bool,
    commands: Vec<String>,
    started: Vec<String>,
    cancels: usize,
}

impl Default for SimPrinter {
    fn default() -> Self {
        Self {
            job: None,
            reachable: true,
            fail_start: false,
            fail_cancel: false,
            commands: Vec::new(),
            started: Vec::new(),
            cancels: 0,
        }
    }
}

#[derive(Debug)]
pub struct SimulatedGateway {
    printers: Mutex<HashMap<PrinterId, SimPrinter>>,
    print_duration: Duration,
}

impl SimulatedGateway {
    pub fn new(print_duration: Duration) -> Self {
        tracing::info!("Simulated printer gateway with {:?} prints", print_duration);
        Self {
            printers: Mutex::new(HashMap::new()),
            print_duration,
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<PrinterId, SimPrinter>> {
        self.printers.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn with_printer<T>(&self, id: PrinterId, f: impl FnOnce(&mut SimPrinter) -> T) -> T {
        let mut printers = self.lock();
        f(printers.entry(id).or_default())
    }

    pub fn set_reachable(&self, id: PrinterId, reachable: bool) {
        self.with_printer(id, |p| p.reachable = reachable);
    }

    pub fn fail_start(&self, id: PrinterId, fail: bool) {
        self.with_printer(id, |p| p.fail_start = fail);
    }

    pub fn fail_cancel(&self, id: PrinterId, fail: bool) {
        self.with_printer(id, |p| p.fail_cancel = fail);
    }

    /// Ends the current print immediately, as if it had run to completion.
    pub fn finish_print(&self, id: PrinterId) {
        self.with_printer(id, |p| p.job = None);
    }

    /// Puts the controller into the printing state without going through
    /// `start_print`, e.g. a job started from the printer's own screen.
    pub fn begin_print(&self, id: PrinterId, file_name: &str) {
        self.with_printer(id, |p| p.job = Some((file_name.to_string(), Instant::now())));
    }

    pub fn commands(&self, id: PrinterId) -> Vec<String> {
        self.with_printer(id, |p| p.commands.clone())
    }

    pub fn started(&self, id: PrinterId) -> Vec<String> {
        self.with_printer(id, |p| p.started.clone())
    }

    pub fn cancel_count(&self, id: PrinterId) -> usize {
        self.with_printer(id, |p| p.cancels)
    }

    fn reachable(&self, printer: &Printer) -> Result<(), GatewayError> {
        if self.with_printer(printer.id, |p| p.reachable) {
            Ok(())
        } else {
            Err(GatewayError::Unreachable(format!("{} is offline", printer.base_url)))
        }
    }
}

#[async_trait]
impl PrinterGateway for SimulatedGateway {
    async fn query(&self, printer: &Printer) -> Result<PrinterStatus, GatewayError> {
        self.reachable(printer)?;
        let duration = self.print_duration;
        Ok(self.with_printer(printer.id, |p| {
            let finished = p.job.as_ref().is_some_and(|(_, started)| started.elapsed() >= duration);
            if finished {
                p.job = None;
            }
            match &p.job {
                Some((file_name, started)) => {
                    let fraction = if duration.is_zero() {
                        1.0
                    } else {
                        started.elapsed().as_secs_f32() / duration.as_secs_f32()
                    };
                    PrinterStatus {
                        is_printing: true,
                        progress: (fraction * 100.0).clamp(0.0, 100.0),
                        file_name: Some(file_name.clone()),
                        nozzle_temp: 215.0,
                        bed_temp: 60.0,
                    }
                }
                None => PrinterStatus {
                    nozzle_temp: 25.0,
                    bed_temp: 25.0,
                    ..PrinterStatus::default()
                },
            }
        }))
    }

    async fn send_command(&self, printer: &Printer, script: &str) -> Result<(), GatewayError> {
        self.reachable(printer)?;
        self.with_printer(printer.id, |p| p.commands.push(script.to_string()));
        Ok(())
    }

    async fn start_print(&self, printer: &Printer, file_name: &str) -> Result<(), GatewayError> {
        self.reachable(printer)?;
        self.with_printer(printer.id, |p| {
            if p.fail_start {
                return Err(GatewayError::Rejected {
                    status: 400,
                    body: format!("cannot start {file_name}"),
                });
            }
            if p.job.is_some() {
                return Err(GatewayError::Rejected {
                    status: 409,
                    body: "printer is busy".to_string(),
                });
            }
            p.job = Some((file_name.to_string(), Instant::now()));
            p.started.push(file_name.to_string());
            Ok(())
        })
    }

    async fn cancel_print(&self, printer: &Printer) -> Result<(), GatewayError> {
        self.reachable(printer)?;
        self.with_printer(printer.id, |p| {
            if p.fail_cancel {
                return Err(GatewayError::Rejected {
                    status: 500,
                    body: "cancel failed".to_string(),
                });
            }
            p.job = None;
            p.cancels += 1;
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn printer() -> Printer {
        Printer::new("alice", "sim", "sim://1")
    }

    #[tokio::test(start_paused = true)]
    async fn test_print_runs_for_duration() {
        let gateway = SimulatedGateway::new(Duration::from_secs(60));
        let p = printer();
        gateway.start_print(&p, "cube.gcode").await.unwrap();

        tokio::time::advance(Duration::from_secs(30)).await;
        let status = gateway.query(&p).await.unwrap();
        assert!(status.is_printing);
        assert!((status.progress - 50.0).abs() < 1.0);

        tokio::time::advance(Duration::from_secs(31)).await;
        assert!(!gateway.query(&p).await.unwrap().is_printing);
    }

    #[tokio::test]
    async fn test_unreachable_and_failures() {
        let gateway = SimulatedGateway::new(Duration::from_secs(60));
        let p = printer();
        gateway.set_reachable(p.id, false);
        assert!(matches!(gateway.query(&p).await, Err(GatewayError::Unreachable(_))));

        gateway.set_reachable(p.id, true);
        gateway.fail_start(p.id, true);
        assert!(matches!(
            gateway.start_print(&p, "cube.gcode").await,
            Err(GatewayError::Rejected { status: 400, .. })
        ));
        assert!(gateway.started(p.id).is_empty());

        gateway.fail_cancel(p.id, true);
        assert!(gateway.cancel_print(&p).await.is_err());
        assert_eq!(gateway.cancel_count(p.id), 0);
    }

    #[tokio::test]
    async fn test_busy_printer_rejects_second_start() {
        let gateway = SimulatedGateway::new(Duration::from_secs(60));
        let p = printer();
        gateway.start_print(&p, "a.gcode").await.unwrap();
        assert!(matches!(
            gateway.start_print(&p, "b.gcode").await,
            Err(GatewayError::Rejected { status: 409, .. })
        ));
        gateway.send_command(&p, "PAUSE").await.unwrap();
        assert_eq!(gateway.commands(p.id), vec!["PAUSE".to_string()]);
    }
}
