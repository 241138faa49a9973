use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};

use crate::constants::*;
use crate::error::{EtlError, Result};

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct Config {
    pub api_base_url: String,
    pub db_path: PathBuf,
    pub timeout_secs: u64,
    pub user_agent: String,
    pub log_dir: PathBuf,
    /// Prometheus exporter port; metrics are not exported when unset.
    pub metrics_port: Option<u16>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            api_base_url: DEFAULT_API_BASE_URL.to_string(),
            db_path: PathBuf::from(DEFAULT_DB_PATH),
            timeout_secs: DEFAULT_TIMEOUT_SECS,
            user_agent: DEFAULT_USER_AGENT.to_string(),
            log_dir: PathBuf::from(DEFAULT_LOG_DIR),
            metrics_port: None,
        }
    }
}

impl Config {
    /// Load `.env`, then the TOML file named by `EPI_CONFIG` (if it exists), then env overrides.
    pub fn load() -> Result<Self> {
        dotenv::dotenv().ok();

        let config_path =
            std::env::var(ENV_CONFIG_FILE).unwrap_or_else(|_| DEFAULT_CONFIG_FILE.to_string());
        let mut config = if Path::new(&config_path).exists() {
            Self::from_file(&config_path)?
        } else {
            Self::default()
        };
        config.apply_env_overrides(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|e| {
            EtlError::Config(format!("Failed to read config file '{}': {}", path.display(), e))
        })?;
        Ok(toml::from_str(&content)?)
    }

    /// Applies overrides from a key lookup; `std::env::var` in production.
    pub fn apply_env_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(url) = lookup(ENV_API_URL) {
            self.api_base_url = url;
        }
        if let Some(db) = lookup(ENV_DB_PATH) {
            self.db_path = PathBuf::from(db);
        }
        if let Some(raw) = lookup(ENV_TIMEOUT_SECS) {
            self.timeout_secs = raw.trim().parse().map_err(|_| {
                EtlError::Config(format!("{ENV_TIMEOUT_SECS} must be a whole number of seconds, got '{raw}'"))
            })?;
        }
        if let Some(dir) = lookup(ENV_LOG_DIR) {
            self.log_dir = PathBuf::from(dir);
        }
        if let Some(raw) = lookup(ENV_METRICS_PORT) {
            let port = raw.trim().parse().map_err(|_| {
                EtlError::Config(format!("{ENV_METRICS_PORT} must be a port number, got '{raw}'"))
            })?;
            self.metrics_port = Some(port);
        }
        Ok(())
    }
}
