use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use session_client::ClientConfig;

use crate::error::{AppError, Result};

const APP_DIR: &str = "sesh";
const CONFIG_FILE: &str = "config.toml";
const CREDENTIALS_FILE: &str = "credentials.json";

/// Persistent CLI settings, stored as TOML.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Base URL that relative request paths are joined against.
    pub base_url: Option<String>,
    /// Token endpoint, absolute or relative to `base_url`.
    pub refresh_url: String,
    /// JSON field carrying the refresh identifier.
    pub refresh_request_field: String,
    /// Error codes (with HTTP 401) that mean "credential expired".
    pub refreshable_codes: Vec<String>,
    /// Where credentials are kept. Defaults next to the config file.
    pub credentials_file: Option<PathBuf>,
    pub timeout_secs: u64,
    /// 0 waits until the refresh settles.
    pub waiter_timeout_secs: u64,
}

impl Default for AppConfig {
    fn default() -> Self {
        let client = ClientConfig::default();
        Self {
            base_url: None,
            refresh_url: client.refresh.url,
            refresh_request_field: client.refresh.request_field,
            refreshable_codes: client.classifier.codes,
            credentials_file: None,
            timeout_secs: client.timeout.as_secs(),
            waiter_timeout_secs: client.waiter_timeout.map(|d| d.as_secs()).unwrap_or(0),
        }
    }
}

impl AppConfig {
    fn app_dir() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(APP_DIR)
    }

    pub fn default_path() -> PathBuf {
        Self::app_dir().join(CONFIG_FILE)
    }

    /// Load from `path` (or the default location). A missing file yields defaults.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let path = path.map(Path::to_path_buf).unwrap_or_else(Self::default_path);
        match std::fs::read_to_string(&path) {
            Ok(content) => Ok(toml::from_str(&content)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Self::default()),
            Err(e) => Err(e.into()),
        }
    }

    pub fn save(&self, path: Option<&Path>) -> Result<()> {
        let path = path.map(Path::to_path_buf).unwrap_or_else(Self::default_path);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&path, toml::to_string_pretty(self)?)?;
        Ok(())
    }

    pub fn reset(path: Option<&Path>) -> Result<()> {
        Self::default().save(path)
    }

    pub fn show(&self) -> Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    pub fn credentials_path(&self) -> PathBuf {
        self.credentials_file
            .clone()
            .unwrap_or_else(|| Self::app_dir().join(CREDENTIALS_FILE))
    }

    /// Translate into library settings, applying a command-line timeout override.
    pub fn client_config(&self, timeout_override: Option<u64>) -> Result<ClientConfig> {
        let mut config = match &self.base_url {
            Some(base) => ClientConfig::with_base_url(base)
                .map_err(|e| AppError::InvalidInput(e.to_string()))?,
            None => ClientConfig::default(),
        };

        let timeout = timeout_override.unwrap_or(self.timeout_secs);
        let waiter_timeout = match self.waiter_timeout_secs {
            0 => None,
            secs => Some(Duration::from_secs(secs)),
        };

        config = config
            .timeout(Duration::from_secs(timeout))
            .waiter_timeout(waiter_timeout)
            .refresh_url(self.refresh_url.clone())
            .refresh_request_field(self.refresh_request_field.clone());
        if !self.refreshable_codes.is_empty() {
            config = config.refreshable_codes(self.refreshable_codes.iter().cloned());
        }
        Ok(config)
    }
}
