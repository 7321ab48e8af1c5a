//! # Fleet Configuration
//!
//! A single TOML file describes the HTTP server, token signing, controller
//! timeouts, the completion poller, the bed clearance check and the printers
//! that make up the fleet.
//!
//! ## Example: TOML Configuration
//!
//! ```toml
//! [server]
//! bind = "0.0.0.0:3000"
//! public_url = "http://fleet.local:3000"
//!
//! [[auth.users]]
//! username = "alice"
//! password = "change-me"
//!
//! [poller]
//! interval_secs = 15
//! auto_assign = true
//!
//! [bed_clearance]
//! vision_url = "http://vision.local:8000/analyze"
//!
//! [[printers]]
//! owner = "alice"
//! name = "voron-1"
//! base_url = "http://10.0.0.12:7125"
//! snapshot_url = "http://10.0.0.12/webcam/?action=snapshot"
//! ```
//!
//! Every section is optional; missing fields fall back to the defaults below.

use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;
use uuid::Uuid;

use printfleet_shared::Printer;

/// Environment variable that overrides `[auth] jwt_secret`.
pub const JWT_SECRET_ENV: &str = "PRINTFLEET_JWT_SECRET";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub auth: AuthConfig,
    #[serde(default)]
    pub gateway: GatewayConfig,
    #[serde(default)]
    pub poller: PollerConfig,
    #[serde(default)]
    pub bed_clearance: BedClearanceConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub printers: Vec<PrinterEntry>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
    /// Externally reachable base URL, used to build snapshot review links.
    #[serde(default = "default_public_url")]
    pub public_url: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            public_url: default_public_url(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AuthConfig {
    #[serde(default = "default_jwt_secret")]
    pub jwt_secret: String,
    #[serde(default = "default_token_ttl_secs")]
    pub token_ttl_secs: u64,
    #[serde(default)]
    pub users: Vec<UserEntry>,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            jwt_secret: default_jwt_secret(),
            token_ttl_secs: default_token_ttl_secs(),
            users: Vec::new(),
        }
    }
}

impl AuthConfig {
    /// The signing secret, preferring the environment over the file.
    pub fn secret(&self) -> Vec<u8> {
        std::env::var(JWT_SECRET_ENV)
            .map(|s| s.into_bytes())
            .unwrap_or_else(|_| self.jwt_secret.clone().into_bytes())
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct UserEntry {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct GatewayConfig {
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    #[serde(default = "default_api_key_header")]
    pub api_key_header: String,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            timeout_ms: default_timeout_ms(),
            api_key_header: default_api_key_header(),
        }
    }
}

impl GatewayConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PollerConfig {
    #[serde(default = "default_poll_interval_secs")]
    pub interval_secs: u64,
    /// Run the priority assignment scan after every tick.
    #[serde(default)]
    pub auto_assign: bool,
}

impl Default for PollerConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_poll_interval_secs(),
            auto_assign: false,
        }
    }
}

impl PollerConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct BedClearanceConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Endpoint of the vision service that judges snapshots.
    #[serde(default)]
    pub vision_url: Option<String>,
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    #[serde(default = "default_snapshot_ttl_secs")]
    pub snapshot_ttl_secs: u64,
}

impl Default for BedClearanceConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            vision_url: None,
            timeout_ms: default_timeout_ms(),
            snapshot_ttl_secs: default_snapshot_ttl_secs(),
        }
    }
}

impl BedClearanceConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn snapshot_ttl(&self) -> Duration {
        Duration::from_secs(self.snapshot_ttl_secs)
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self { level: default_log_level() }
    }
}

impl LoggingConfig {
    pub fn level(&self) -> Result<tracing::Level, ConfigError> {
        self.level
            .parse()
            .map_err(|_| ConfigError::Invalid(format!("unknown log level '{}'", self.level)))
    }
}

/// A printer registered through the configuration file.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PrinterEntry {
    #[serde(default)]
    pub id: Option<Uuid>,
    pub owner: String,
    pub name: String,
    pub base_url: String,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default)]
    pub snapshot_url: Option<String>,
    #[serde(default)]
    pub ai_failure_detection_enabled: bool,
}

impl PrinterEntry {
    pub fn to_printer(&self) -> Printer {
        let mut printer = Printer::new(&self.owner, &self.name, &self.base_url);
        if let Some(id) = self.id {
            printer.id = id;
        }
        printer.api_key = self.api_key.clone();
        printer.snapshot_url = self.snapshot_url.clone();
        printer.ai_failure_detection_enabled = self.ai_failure_detection_enabled;
        printer
    }
}

impl Config {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.poller.interval_secs == 0 {
            return Err(ConfigError::Invalid("poller.interval_secs must be positive".to_string()));
        }
        if self.gateway.timeout_ms == 0 || self.bed_clearance.timeout_ms == 0 || self.bed_clearance.snapshot_ttl_secs == 0 {
            return Err(ConfigError::Invalid("timeouts and snapshot_ttl_secs must be positive".to_string()));
        }
        if self.bed_clearance.enabled && self.bed_clearance.vision_url.is_none() {
            return Err(ConfigError::Invalid(
                "bed_clearance.vision_url is required while the check is enabled".to_string(),
            ));
        }
        for entry in &self.printers {
            if entry.owner.is_empty() || entry.base_url.is_empty() {
                return Err(ConfigError::Invalid(format!(
                    "printer '{}' needs an owner and a base_url",
                    entry.name
                )));
            }
        }
        self.logging.level()?;
        Ok(())
    }
}

fn default_bind() -> String { "0.0.0.0:3000".to_string() }
fn default_public_url() -> String { "http://localhost:3000".to_string() }
fn default_jwt_secret() -> String { "super_secret_key_change_me".to_string() }
fn default_token_ttl_secs() -> u64 { 3600 }
fn default_timeout_ms() -> u64 { 10_000 }
fn default_api_key_header() -> String { "X-Api-Key".to_string() }
fn default_poll_interval_secs() -> u64 { 15 }
fn default_snapshot_ttl_secs() -> u64 { 300 }
fn default_log_level() -> String { "info".to_string() }
fn default_true() -> bool { true }

/// Load configuration from a TOML file.
pub fn load_config(path: &str) -> Result<Config, ConfigError> {
    match std::fs::read_to_string(path) {
        Ok(contents) => match toml::from_str(&contents) {
            Ok(config) => Ok(config),
            Err(e) => {
                tracing::error!("Failed to parse config TOML: {}", e);
                Err(ConfigError::Toml(e))
            }
        },
        Err(e) => {
            tracing::error!("Failed to read config file '{}': {}", path, e);
            Err(ConfigError::Io(e))
        }
    }
}
