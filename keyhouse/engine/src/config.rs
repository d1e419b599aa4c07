//! Runtime configuration for the keyhouse process.

use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

use crate::store::StoreBackend;

pub const LOG_LEVELS: [&str; 4] = ["debug", "info", "warn", "error"];

#[derive(Error, Debug, PartialEq, Eq)]
pub enum ConfigError {
    #[error("invalid log level {0:?} (expected one of debug, info, warn, error)")]
    LogLevel(String),
    #[error("store connect retries must be at least 1")]
    NoRetries,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    /// Directory for the daily-rolling log file.
    pub dir: PathBuf,
    /// Write the file layer as JSON instead of logfmt.
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            dir: PathBuf::from("logs"),
            json: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub backend: StoreBackend,
    /// Startup ping attempts before giving up.
    pub connect_retries: u32,
    /// Fixed delay between startup ping attempts.
    pub connect_backoff: Duration,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: StoreBackend::default(),
            connect_retries: 5,
            connect_backoff: Duration::from_secs(2),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct KeyhouseConfig {
    pub log: LoggingConfig,
    pub store: StoreConfig,
    /// Lifecycle events kept in the in-memory audit trail.
    pub audit_capacity: usize,
}

impl Default for KeyhouseConfig {
    fn default() -> Self {
        Self {
            log: LoggingConfig::default(),
            store: StoreConfig::default(),
            audit_capacity: 500,
        }
    }
}

impl KeyhouseConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !LOG_LEVELS.contains(&self.log.level.as_str()) {
            return Err(ConfigError::LogLevel(self.log.level.clone()));
        }
        if self.store.connect_retries == 0 {
            return Err(ConfigError::NoRetries);
        }
        Ok(())
    }
}
