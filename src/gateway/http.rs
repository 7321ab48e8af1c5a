//! Moonraker-style HTTP controller client.

use async_trait::async_trait;
use reqwest::{Client, Method, RequestBuilder, Response};
use serde::Deserialize;
use std::time::Duration;
use tokio::time::timeout;
use tracing::debug;

use super::{GatewayError, PrinterGateway};
use crate::config::GatewayConfig;
use printfleet_shared::{Printer, PrinterStatus};

const STATUS_PATH: &str = "/printer/objects/query?print_stats&virtual_sdcard&extruder&heater_bed";

pub struct HttpGateway {
    client: Client,
    timeout: Duration,
    api_key_header: String,
}

impl HttpGateway {
    pub fn new(config: &GatewayConfig) -> Result<Self, GatewayError> {
        let client = Client::builder()
            .timeout(config.timeout())
            .build()
            .map_err(|e| GatewayError::Unreachable(e.to_string()))?;
        Ok(Self {
            client,
            timeout: config.timeout(),
            api_key_header: config.api_key_header.clone(),
        })
    }

    fn request(&self, printer: &Printer, method: Method, path: &str) -> RequestBuilder {
        let url = format!("{}{}", printer.base_url.trim_end_matches('/'), path);
        let mut request = self.client.request(method, url);
        if let Some(key) = &printer.api_key {
            request = request.header(self.api_key_header.as_str(), key);
        }
        request
    }

    async fn send(&self, request: RequestBuilder) -> Result<Response, GatewayError> {
        let response = timeout(self.timeout, request.send())
            .await
            .map_err(|_| GatewayError::Timeout(self.timeout))?
            .map_err(|e| self.transport_error(e))?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(GatewayError::Rejected { status: status.as_u16(), body });
        }
        Ok(response)
    }

    fn transport_error(&self, e: reqwest::Error) -> GatewayError {
        if e.is_timeout() {
            GatewayError::Timeout(self.timeout)
        } else {
            GatewayError::Unreachable(e.to_string())
        }
    }
}

#[derive(Debug, Deserialize)]
struct QueryEnvelope {
    result: QueryResult,
}

#[derive(Debug, Deserialize)]
struct QueryResult {
    status: ObjectStatus,
}

#[derive(Debug, Default, Deserialize)]
struct ObjectStatus {
    #[serde(default)]
    print_stats: PrintStats,
    #[serde(default)]
    virtual_sdcard: VirtualSdcard,
    #[serde(default)]
    extruder: Heater,
    #[serde(default)]
    heater_bed: Heater,
}

#[derive(Debug, Default, Deserialize)]
struct PrintStats {
    #[serde(default)]
    state: String,
    #[serde(default)]
    filename: String,
}

#[derive(Debug, Default, Deserialize)]
struct VirtualSdcard {
    /// Fraction 0..=1.
    #[serde(default)]
    progress: f32,
}

#[derive(Debug, Default, Deserialize)]
struct Heater {
    #[serde(default)]
    temperature: f32,
}

impl From<ObjectStatus> for PrinterStatus {
    fn from(status: ObjectStatus) -> Self {
        // A paused print still occupies the bed; only a finished or idle
        // controller counts as not printing.
        let is_printing = matches!(status.print_stats.state.as_str(), "printing" | "paused");
        let file_name = Some(status.print_stats.filename).filter(|f| !f.is_empty());
        PrinterStatus {
            is_printing,
            progress: (status.virtual_sdcard.progress * 100.0).clamp(0.0, 100.0),
            file_name,
            nozzle_temp: status.extruder.temperature,
            bed_temp: status.heater_bed.temperature,
        }
    }
}

#[async_trait]
impl PrinterGateway for HttpGateway {
    async fn query(&self, printer: &Printer) -> Result<PrinterStatus, GatewayError> {
        let response = self.send(self.request(printer, Method::GET, STATUS_PATH)).await?;
        let envelope: QueryEnvelope = response
            .json()
            .await
            .map_err(|e| GatewayError::Decode(e.to_string()))?;
        Ok(envelope.result.status.into())
    }

    async fn send_command(&self, printer: &Printer, script: &str) -> Result<(), GatewayError> {
        debug!(printer_id = %printer.id, script, "Sending G-code script");
        let request = self
            .request(printer, Method::POST, "/printer/gcode/script")
            .query(&[("script", script)]);
        self.send(request).await.map(|_| ())
    }

    async fn start_print(&self, printer: &Printer, file_name: &str) -> Result<(), GatewayError> {
        let request = self
            .request(printer, Method::POST, "/printer/print/start")
            .query(&[("filename", file_name)]);
        self.send(request).await.map(|_| ())
    }

    async fn cancel_print(&self, printer: &Printer) -> Result<(), GatewayError> {
        self.send(self.request(printer, Method::POST, "/printer/print/cancel"))
            .await
            .map(|_| ())
    }
}
