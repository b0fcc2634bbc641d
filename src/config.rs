use crate::constants::*;
use crate::error::{PortalError, Result};
use serde::Deserialize;
use std::fs;
use std::path::Path;
use std::time::Duration;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub drive: DriveConfig,
    #[serde(default)]
    pub metrics_service: MetricsServiceConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub server: ServerConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DriveConfig {
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default = "default_drive_base_url")]
    pub base_url: String,
    #[serde(default)]
    pub source_folder_id: Option<String>,
    #[serde(default = "default_timeout_secs")]
    pub request_timeout_secs: u64,
    #[serde(default = "default_page_size")]
    pub page_size: u32,
}

impl Default for DriveConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            base_url: default_drive_base_url(),
            source_folder_id: None,
            request_timeout_secs: default_timeout_secs(),
            page_size: default_page_size(),
        }
    }
}

impl DriveConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs.max(1))
    }

    /// Returns the API key or a configuration error when it is missing or blank.
    pub fn require_api_key(&self) -> Result<&str> {
        match self.api_key.as_deref().map(str::trim) {
            Some(key) if !key.is_empty() => Ok(key),
            _ => Err(PortalError::Config(format!(
                "Drive API key is not configured (set {} or drive.api_key)",
                ENV_DRIVE_API_KEY
            ))),
        }
    }

    /// Returns the folder the recipient sync reads from. There is no default.
    pub fn require_source_folder_id(&self) -> Result<&str> {
        match self.source_folder_id.as_deref().map(str::trim) {
            Some(id) if !id.is_empty() => Ok(id),
            _ => Err(PortalError::Config(format!(
                "Recipient source folder is not configured (set {} or drive.source_folder_id)",
                ENV_RECIPIENTS_FOLDER_ID
            ))),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct MetricsServiceConfig {
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default = "default_timeout_secs")]
    pub request_timeout_secs: u64,
}

impl Default for MetricsServiceConfig {
    fn default() -> Self {
        Self { base_url: None, request_timeout_secs: default_timeout_secs() }
    }
}

impl MetricsServiceConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs.max(1))
    }

    pub fn require_base_url(&self) -> Result<&str> {
        match self.base_url.as_deref().map(str::trim) {
            Some(url) if !url.is_empty() => Ok(url),
            _ => Err(PortalError::Config(format!(
                "Metrics service base URL is not configured (set {} or metrics_service.base_url)",
                ENV_METRICS_SERVICE_URL
            ))),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    #[serde(default = "default_sqlite_path")]
    pub sqlite_path: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self { sqlite_path: default_sqlite_path() }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self { port: default_port() }
    }
}

fn default_drive_base_url() -> String {
    DEFAULT_DRIVE_BASE_URL.to_string()
}

fn default_timeout_secs() -> u64 {
    30
}

fn default_page_size() -> u32 {
    1000
}

fn default_sqlite_path() -> String {
    "data/portal.db".to_string()
}

fn default_port() -> u16 {
    8080
}

impl Config {
    /// Load `portal.toml` from the working directory (if present) and apply
    /// environment overrides on top.
    pub fn load() -> Result<Self> {
        Self::load_from(Path::new("portal.toml"))
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        let mut config = if path.exists() {
            let content = fs::read_to_string(path).map_err(|e| {
                PortalError::Config(format!("Failed to read config file '{}': {}", path.display(), e))
            })?;
            toml::from_str(&content)?
        } else {
            Config::default()
        };
        config.apply_env(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    /// Overlay values from an environment lookup. Split out so tests can feed a map.
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = lookup(ENV_DRIVE_API_KEY) {
            self.drive.api_key = Some(v);
        }
        if let Some(v) = lookup(ENV_DRIVE_BASE_URL) {
            self.drive.base_url = v;
        }
        if let Some(v) = lookup(ENV_RECIPIENTS_FOLDER_ID) {
            self.drive.source_folder_id = Some(v);
        }
        if let Some(v) = lookup(ENV_DRIVE_TIMEOUT_SECS) {
            self.drive.request_timeout_secs = v.trim().parse().map_err(|_| {
                PortalError::Config(format!("{} must be a whole number of seconds, got '{}'", ENV_DRIVE_TIMEOUT_SECS, v))
            })?;
        }
        if let Some(v) = lookup(ENV_METRICS_SERVICE_URL) {
            self.metrics_service.base_url = Some(v);
        }
        if let Some(v) = lookup(ENV_SQLITE_PATH) {
            self.storage.sqlite_path = v;
        }
        if let Some(v) = lookup(ENV_SERVER_PORT) {
            self.server.port = v
                .trim()
                .parse()
                .map_err(|_| PortalError::Config(format!("{} must be a port number, got '{}'", ENV_SERVER_PORT, v)))?;
        }
        Ok(())
    }
}
