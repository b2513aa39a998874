//! Driver configuration.
//!
//! Configuration is loaded in the following order (later overrides earlier):
//! 1. Default values
//! 2. YAML config file (if specified via REDPIPE_CONFIG or --config)
//! 3. Environment variables
//! 4. Command-line flags

use redpipe_client::ConnectionConfig;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Driver configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Connection settings.
    pub connection: ConnectionSection,
    /// Workload sizes.
    pub workload: WorkloadConfig,
}

impl Config {
    /// Loads configuration from file, then applies environment variable overrides.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let env_path = std::env::var("REDPIPE_CONFIG").ok().map(PathBuf::from);
        let mut config = match path.map(Path::to_path_buf).or(env_path) {
            Some(path) => Self::from_file(&path)?,
            None => Self::default(),
        };

        config.apply_env_overrides();
        Ok(config)
    }

    /// Loads configuration from a YAML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::Io(path.to_path_buf(), e))?;
        let config: Config = serde_yaml::from_str(&content)
            .map_err(|e| ConfigError::Parse(path.to_path_buf(), e.to_string()))?;
        Ok(config)
    }

    fn apply_env_overrides(&mut self) {
        self.connection.apply_env_overrides();
        self.workload.apply_env_overrides();
    }

    /// Checks values that would make a run meaningless.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.workload.batch_size == 0 {
            return Err(ConfigError::Validation(
                "workload.batch_size must be at least 1".to_string(),
            ));
        }
        if self.workload.pipelined_count == 0 {
            return Err(ConfigError::Validation(
                "workload.pipelined_count must be at least 1".to_string(),
            ));
        }
        if self.connection.max_pending == Some(0) {
            return Err(ConfigError::Validation(
                "connection.max_pending must be at least 1 when set".to_string(),
            ));
        }
        Ok(())
    }
}

/// Connection settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectionSection {
    /// Server endpoint (`host:port`).
    pub server: String,
    /// Connect and handshake timeout in milliseconds.
    pub connect_timeout_ms: u64,
    /// Reply timeout in milliseconds; unset waits forever.
    pub request_timeout_ms: Option<u64>,
    /// Socket read buffer size in bytes.
    pub read_buffer_size: usize,
    /// Maximum requests awaiting a reply; unset is unbounded.
    pub max_pending: Option<usize>,
    pub username: Option<String>,
    pub password: Option<String>,
    pub client_name: Option<String>,
    pub database: Option<u32>,
}

impl Default for ConnectionSection {
    fn default() -> Self {
        Self {
            server: "127.0.0.1:6379".to_string(),
            connect_timeout_ms: 10_000,
            request_timeout_ms: None,
            read_buffer_size: redpipe_client::connection::DEFAULT_READ_BUFFER_SIZE,
            max_pending: None,
            username: None,
            password: None,
            client_name: Some("redpipe".to_string()),
            database: None,
        }
    }
}

impl ConnectionSection {
    fn apply_env_overrides(&mut self) {
        if let Ok(server) = std::env::var("REDPIPE_SERVER") {
            self.server = server;
        }

        if let Ok(timeout) = std::env::var("REDPIPE_CONNECT_TIMEOUT_MS") {
            if let Ok(ms) = timeout.parse() {
                self.connect_timeout_ms = ms;
            }
        }

        if let Ok(timeout) = std::env::var("REDPIPE_REQUEST_TIMEOUT_MS") {
            if let Ok(ms) = timeout.parse() {
                self.request_timeout_ms = Some(ms);
            }
        }

        if let Ok(max) = std::env::var("REDPIPE_MAX_PENDING") {
            if let Ok(n) = max.parse() {
                self.max_pending = Some(n);
            }
        }

        if let Ok(user) = std::env::var("REDPIPE_USERNAME") {
            self.username = Some(user);
        }

        if let Ok(password) = std::env::var("REDPIPE_PASSWORD") {
            if !password.is_empty() {
                self.password = Some(password);
            }
        }
    }

    /// Builds the client's connection configuration.
    pub fn to_connection_config(&self) -> ConnectionConfig {
        let mut config = ConnectionConfig::new(&self.server)
            .with_connect_timeout(Duration::from_millis(self.connect_timeout_ms))
            .with_read_buffer_size(self.read_buffer_size);

        if let Some(ms) = self.request_timeout_ms {
            config = config.with_request_timeout(Duration::from_millis(ms));
        }
        if let Some(limit) = self.max_pending {
            config = config.with_max_pending(limit);
        }
        if let Some(ref user) = self.username {
            config = config.with_username(user);
        }
        if let Some(ref password) = self.password {
            config = config.with_password(password);
        }
        if let Some(ref name) = self.client_name {
            config = config.with_client_name(name);
        }
        if let Some(db) = self.database {
            config = config.with_database(db);
        }
        config
    }
}

/// Workload sizes.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkloadConfig {
    /// Requests sent by the pipelined and batched runs.
    pub pipelined_count: u64,
    /// Requests sent by the request/response run.
    pub request_response_count: u64,
    /// Requests per batch in the batched run.
    pub batch_size: u64,
}

impl Default for WorkloadConfig {
    fn default() -> Self {
        Self {
            pipelined_count: 5_000_000,
            request_response_count: 100_000,
            batch_size: 1000,
        }
    }
}

impl WorkloadConfig {
    fn apply_env_overrides(&mut self) {
        if let Ok(count) = std::env::var("REDPIPE_PIPELINED_COUNT") {
            if let Ok(n) = count.parse() {
                self.pipelined_count = n;
            }
        }

        if let Ok(count) = std::env::var("REDPIPE_REQUEST_RESPONSE_COUNT") {
            if let Ok(n) = count.parse() {
                self.request_response_count = n;
            }
        }

        if let Ok(size) = std::env::var("REDPIPE_BATCH_SIZE") {
            if let Ok(n) = size.parse() {
                self.batch_size = n;
            }
        }
    }

    /// Number of whole batches the batched run sends.
    pub fn batch_count(&self) -> u64 {
        self.pipelined_count / self.batch_size.max(1)
    }
}

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file '{}': {1}", .0.display())]
    Io(PathBuf, std::io::Error),

    #[error("failed to parse config file '{}': {1}", .0.display())]
    Parse(PathBuf, String),

    #[error("invalid configuration: {0}")]
    Validation(String),
}
