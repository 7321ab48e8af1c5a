//! Bed clearance check run before a print is started.
//!
//! One snapshot is taken from the printer's camera and judged by an external
//! vision service. A bed that is not clear blocks `start` until the operator
//! reviews the published snapshot and overrides the check.

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::time::timeout;

use crate::snapshot::SnapshotVault;
use printfleet_shared::{BedClearanceResult, Printer, PrinterId};

#[derive(Debug, Error)]
pub enum GuardError {
    #[error("printer {0} has no snapshot source configured")]
    MisconfiguredPrinter(PrinterId),
    #[error("snapshot fetch failed: {0}")]
    Snapshot(String),
    #[error("vision analysis failed: {0}")]
    Vision(String),
    #[error("bed check did not finish within {0:?}")]
    Timeout(Duration),
}

/// What the vision service made of a snapshot.
#[derive(Debug, Clone, PartialEq)]
pub struct VisionVerdict {
    pub is_clear: bool,
    pub confidence: f32,
    /// Detected object or failure type, if any.
    pub label: Option<String>,
}

#[async_trait]
pub trait SnapshotSource: Send + Sync + 'static {
    async fn fetch(&self, printer: &Printer) -> Result<Vec<u8>, GuardError>;
}

#[async_trait]
pub trait VisionAnalyzer: Send + Sync + 'static {
    async fn analyze(&self, snapshot: &[u8]) -> Result<VisionVerdict, GuardError>;
}

pub struct BedClearanceGuard {
    snapshots: Arc<dyn SnapshotSource>,
    vision: Arc<dyn VisionAnalyzer>,
    vault: SnapshotVault,
    timeout: Duration,
}

impl BedClearanceGuard {
    pub fn new(
        snapshots: Arc<dyn SnapshotSource>,
        vision: Arc<dyn VisionAnalyzer>,
        vault: SnapshotVault,
        timeout: Duration,
    ) -> Self {
        Self { snapshots, vision, vault, timeout }
    }

    pub fn vault(&self) -> &SnapshotVault {
        &self.vault
    }

    pub async fn check(&self, printer: &Printer) -> Result<BedClearanceResult, GuardError> {
        if printer.snapshot_url.is_none() {
            return Err(GuardError::MisconfiguredPrinter(printer.id));
        }
        let snapshot = timeout(self.timeout, self.snapshots.fetch(printer))
            .await
            .map_err(|_| GuardError::Timeout(self.timeout))??;
        let verdict = timeout(self.timeout, self.vision.analyze(&snapshot))
            .await
            .map_err(|_| GuardError::Timeout(self.timeout))??;

        let confidence = (verdict.confidence * 100.0).round();
        if verdict.is_clear {
            tracing::debug!(printer_id = %printer.id, confidence, "Bed is clear");
            return Ok(BedClearanceResult {
                is_clear: true,
                reason: format!("bed looks clear ({confidence}% confidence)"),
                snapshot_url: None,
            });
        }

        let what = verdict.label.as_deref().unwrap_or("an object");
        let snapshot_url = self.vault.publish(snapshot).await;
        tracing::warn!(printer_id = %printer.id, confidence, label = what, "Bed is not clear");
        Ok(BedClearanceResult {
            is_clear: false,
            reason: format!("detected {what} on the bed ({confidence}% confidence)"),
            snapshot_url: Some(snapshot_url),
        })
    }
}

/// Pulls a still image from the printer's `snapshot_url`.
pub struct HttpSnapshotSource {
    client: Client,
}

impl HttpSnapshotSource {
    pub fn new(timeout: Duration) -> Result<Self, GuardError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| GuardError::Snapshot(e.to_string()))?;
        Ok(Self { client })
    }
}

#[async_trait]
impl SnapshotSource for HttpSnapshotSource {
    async fn fetch(&self, printer: &Printer) -> Result<Vec<u8>, GuardError> {
        let url = printer
            .snapshot_url
            .as_deref()
            .ok_or(GuardError::MisconfiguredPrinter(printer.id))?;
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| GuardError::Snapshot(e.to_string()))?;
        if !response.status().is_success() {
            return Err(GuardError::Snapshot(format!("camera answered {}", response.status())));
        }
        let bytes = response
            .bytes()
            .await
            .map_err(|e| GuardError::Snapshot(e.to_string()))?;
        if bytes.is_empty() {
            return Err(GuardError::Snapshot("camera returned an empty image".to_string()));
        }
        Ok(bytes.to_vec())
    }
}

/// Posts the raw image to a vision endpoint.
///
/// The endpoint answers with either `is_clear` or `is_failure`, plus a
/// `confidence` in 0..=1 and an optional `type` label.
pub struct HttpVisionAnalyzer {
    client: Client,
    endpoint: String,
}

#[derive(Debug, Deserialize)]
struct VisionResponse {
    is_clear: Option<bool>,
    is_failure: Option<bool>,
    #[serde(default)]
    confidence: f32,
    #[serde(rename = "type")]
    kind: Option<String>,
}

impl TryFrom<VisionResponse> for VisionVerdict {
    type Error = GuardError;

    fn try_from(response: VisionResponse) -> Result<Self, Self::Error> {
        let is_clear = match (response.is_clear, response.is_failure) {
            (Some(clear), _) => clear,
            (None, Some(failure)) => !failure,
            (None, None) => {
                return Err(GuardError::Vision("response has neither is_clear nor is_failure".to_string()))
            }
        };
        Ok(VisionVerdict {
            is_clear,
            confidence: response.confidence.clamp(0.0, 1.0),
            label: response.kind,
        })
    }
}

impl HttpVisionAnalyzer {
    pub fn new(endpoint: impl Into<String>, timeout: Duration) -> Result<Self, GuardError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| GuardError::Vision(e.to_string()))?;
        Ok(Self { client, endpoint: endpoint.into() })
    }
}

#[async_trait]
impl VisionAnalyzer for HttpVisionAnalyzer {
    async fn analyze(&self, snapshot: &[u8]) -> Result<VisionVerdict, GuardError> {
        let response = self
            .client
            .post(&self.endpoint)
            .header(reqwest::header::CONTENT_TYPE, "image/jpeg")
            .body(snapshot.to_vec())
            .send()
            .await
            .map_err(|e| GuardError::Vision(e.to_string()))?;
        if !response.status().is_success() {
            return Err(GuardError::Vision(format!("vision service answered {}", response.status())));
        }
        let body: VisionResponse = response
            .json()
            .await
            .map_err(|e| GuardError::Vision(e.to_string()))?;
        body.try_into()
    }
}
