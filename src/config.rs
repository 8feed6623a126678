//! Environment configuration for the server and agent binaries.

use std::path::PathBuf;
use std::time::Duration;

pub const DEFAULT_ADDRESS: &str = "localhost:8080";
pub const DEFAULT_LOG_LEVEL: &str = "info";
pub const DEFAULT_STORE_INTERVAL_SECS: u64 = 300;
pub const DEFAULT_FILE_STORAGE_PATH: &str = "metrics_snapshot.json";
pub const DEFAULT_REPORT_INTERVAL_SECS: u64 = 10;
pub const DEFAULT_POLL_INTERVAL_SECS: u64 = 2;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ConfigError {
    #[error("{0} must be greater than zero")]
    ZeroInterval(&'static str),
    #[error("invalid log level: {0}")]
    InvalidLogLevel(String),
}

/// Storage backend chosen from the server configuration.
#[derive(Debug, Clone, PartialEq)]
pub enum StorageBackend {
    Relational { dsn: String },
    Snapshot { path: PathBuf },
    Volatile,
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub address: String,
    pub log_level: tracing::Level,
    /// Zero means write-through snapshots
    pub store_interval: Duration,
    /// Empty disables the snapshot backend
    pub file_storage_path: String,
    pub restore: bool,
    pub database_dsn: Option<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            address: DEFAULT_ADDRESS.to_string(),
            log_level: tracing::Level::INFO,
            store_interval: Duration::from_secs(DEFAULT_STORE_INTERVAL_SECS),
            file_storage_path: DEFAULT_FILE_STORAGE_PATH.to_string(),
            restore: true,
            database_dsn: None,
        }
    }
}

impl ServerConfig {
    /// Relational when a DSN is set, else snapshot when a path is set,
    /// else volatile.
    pub fn backend(&self) -> StorageBackend {
        if let Some(dsn) = &self.database_dsn {
            return StorageBackend::Relational { dsn: dsn.clone() };
        }
        if !self.file_storage_path.is_empty() {
            return StorageBackend::Snapshot {
                path: PathBuf::from(&self.file_storage_path),
            };
        }
        StorageBackend::Volatile
    }
}

#[derive(Debug, Clone)]
pub struct AgentConfig {
    pub address: String,
    pub log_level: tracing::Level,
    pub report_interval: Duration,
    pub poll_interval: Duration,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            address: DEFAULT_ADDRESS.to_string(),
            log_level: tracing::Level::INFO,
            report_interval: Duration::from_secs(DEFAULT_REPORT_INTERVAL_SECS),
            poll_interval: Duration::from_secs(DEFAULT_POLL_INTERVAL_SECS),
        }
    }
}

fn parse_log_level(raw: Option<String>) -> Result<tracing::Level, ConfigError> {
    let raw = raw.unwrap_or_else(|| DEFAULT_LOG_LEVEL.to_string());
    raw.parse()
        .map_err(|_| ConfigError::InvalidLogLevel(raw.clone()))
}

fn parse_secs(raw: Option<String>, default: u64) -> Duration {
    Duration::from_secs(raw.and_then(|v| v.trim().parse().ok()).unwrap_or(default))
}

fn parse_bool(raw: Option<String>, default: bool) -> bool {
    match raw.as_deref().map(|v| v.trim().to_lowercase()) {
        Some(v) if v == "1" || v == "true" => true,
        Some(v) if v == "0" || v == "false" => false,
        _ => default,
    }
}

/// Build the server configuration from a variable lookup.
pub fn server_config_from<F>(lookup: F) -> Result<ServerConfig, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let address = lookup("ADDRESS").unwrap_or_else(|| DEFAULT_ADDRESS.to_string());
    let log_level = parse_log_level(lookup("LOG_LEVEL"))?;
    let store_interval = parse_secs(lookup("STORE_INTERVAL"), DEFAULT_STORE_INTERVAL_SECS);
    let file_storage_path =
        lookup("FILE_STORAGE_PATH").unwrap_or_else(|| DEFAULT_FILE_STORAGE_PATH.to_string());
    let restore = parse_bool(lookup("RESTORE"), true);
    let database_dsn = lookup("DATABASE_DSN").filter(|dsn| !dsn.is_empty());

    Ok(ServerConfig {
        address,
        log_level,
        store_interval,
        file_storage_path,
        restore,
        database_dsn,
    })
}

/// Build the agent configuration from a variable lookup.
pub fn agent_config_from<F>(lookup: F) -> Result<AgentConfig, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let address = lookup("ADDRESS").unwrap_or_else(|| DEFAULT_ADDRESS.to_string());
    let log_level = parse_log_level(lookup("LOG_LEVEL"))?;
    let report_interval = parse_secs(lookup("REPORT_INTERVAL"), DEFAULT_REPORT_INTERVAL_SECS);
    let poll_interval = parse_secs(lookup("POLL_INTERVAL"), DEFAULT_POLL_INTERVAL_SECS);

    if report_interval.is_zero() {
        return Err(ConfigError::ZeroInterval("REPORT_INTERVAL"));
    }
    if poll_interval.is_zero() {
        return Err(ConfigError::ZeroInterval("POLL_INTERVAL"));
    }

    Ok(AgentConfig {
        address,
        log_level,
        report_interval,
        poll_interval,
    })
}

pub fn load_server_config() -> Result<ServerConfig, ConfigError> {
    server_config_from(|key| std::env::var(key).ok())
}

pub fn load_agent_config() -> Result<AgentConfig, ConfigError> {
    agent_config_from(|key| std::env::var(key).ok())
}
