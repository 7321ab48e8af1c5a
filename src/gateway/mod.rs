//! Remote control of printer controllers.
//!
//! The gateway is the only component that talks to printers. Every call is a
//! single request with a bounded wait and no retry; callers own the retry and
//! failure policy.

pub mod http;
pub mod sim;

use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;

use printfleet_shared::{Printer, PrinterStatus};

pub use http::HttpGateway;
pub use sim::SimulatedGateway;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum GatewayError {
    #[error("printer unreachable: {0}")]
    Unreachable(String),
    #[error("printer rejected the request ({status}): {body}")]
    Rejected { status: u16, body: String },
    #[error("printer did not answer within {0:?}")]
    Timeout(Duration),
    #[error("unexpected response from printer: {0}")]
    Decode(String),
}

impl GatewayError {
    pub fn is_timeout(&self) -> bool {
        matches!(self, GatewayError::Timeout(_))
    }
}

#[async_trait]
pub trait PrinterGateway: Send + Sync + 'static {
    /// Current controller state.
    async fn query(&self, printer: &Printer) -> Result<PrinterStatus, GatewayError>;
    /// Runs a G-code script (macros such as `PAUSE` or `RESUME` included).
    async fn send_command(&self, printer: &Printer, script: &str) -> Result<(), GatewayError>;
    /// Starts printing a file already stored on the controller.
    async fn start_print(&self, printer: &Printer, file_name: &str) -> Result<(), GatewayError>;
    async fn cancel_print(&self, printer: &Printer) -> Result<(), GatewayError>;
}
