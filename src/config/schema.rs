//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the server.
//! All types derive Serde traits for deserialization from config files.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Root configuration for the HTTP server.
#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq)]
#[serde(default)]
pub struct ServerConfig {
    /// Listener configuration (bind address, connection limit).
    pub listener: ListenerConfig,

    /// Request body aggregation settings.
    pub requests: RequestsConfig,

    /// Response streaming settings.
    pub responses: ResponsesConfig,

    /// Read/write timeouts.
    pub timeouts: TimeoutConfig,

    /// Worker pool running application handlers.
    pub workers: WorkerPoolConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,

    /// Graceful shutdown settings.
    pub shutdown: ShutdownConfig,
}

impl ServerConfig {
    /// Parse a configuration from TOML text without validating it.
    pub fn from_toml_str(content: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(content)
    }
}

/// Listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct ListenerConfig {
    /// Bind address (e.g., "0.0.0.0:23023").
    pub bind_address: String,

    /// Maximum concurrent connections (backpressure).
    pub max_connections: usize,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            bind_address: "127.0.0.1:23023".to_string(),
            max_connections: 10_000,
        }
    }
}

/// Maximum request body size: a byte count or no limit at all.
///
/// Deserializes from either an integer or the string `"unlimited"`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(try_from = "RawBodySize", into = "RawBodySize")]
pub enum BodySize {
    Unlimited,
    Bytes(u64),
}

impl BodySize {
    /// The limit in bytes, `None` when unlimited.
    pub fn limit(&self) -> Option<u64> {
        match self {
            BodySize::Unlimited => None,
            BodySize::Bytes(n) => Some(*n),
        }
    }
}

#[derive(Deserialize, Serialize)]
#[serde(untagged)]
enum RawBodySize {
    Bytes(u64),
    Keyword(String),
}

impl TryFrom<RawBodySize> for BodySize {
    type Error = String;

    fn try_from(raw: RawBodySize) -> Result<Self, Self::Error> {
        match raw {
            RawBodySize::Bytes(n) => Ok(BodySize::Bytes(n)),
            RawBodySize::Keyword(s) if s.eq_ignore_ascii_case("unlimited") => Ok(BodySize::Unlimited),
            RawBodySize::Keyword(s) => Err(format!(
                "invalid body size '{}', expected a byte count or \"unlimited\"",
                s
            )),
        }
    }
}

impl From<BodySize> for RawBodySize {
    fn from(size: BodySize) -> Self {
        match size {
            BodySize::Unlimited => RawBodySize::Keyword("unlimited".to_string()),
            BodySize::Bytes(n) => RawBodySize::Bytes(n),
        }
    }
}

/// Request aggregation configuration.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct RequestsConfig {
    /// Maximum accepted request body size.
    pub max_body_size: BodySize,

    /// Body bytes kept in memory before spilling to a spool file.
    pub disk_threshold: u64,

    /// Directory holding spooled request bodies.
    /// Defaults to `werval-http` under the system temporary directory.
    pub spool_dir: Option<PathBuf>,

    /// Maximum size of the request line plus headers, in bytes.
    pub max_head_size: usize,

    /// Maximum number of request headers.
    pub max_headers: usize,
}

impl RequestsConfig {
    /// Resolve the effective spool directory.
    pub fn spool_dir(&self) -> PathBuf {
        self.spool_dir
            .clone()
            .unwrap_or_else(|| std::env::temp_dir().join("werval-http"))
    }
}

impl Default for RequestsConfig {
    fn default() -> Self {
        Self {
            max_body_size: BodySize::Unlimited,
            disk_threshold: 1024 * 1024, // 1MB
            spool_dir: None,
            max_head_size: 16 * 1024,
            max_headers: 100,
        }
    }
}

/// Response streaming configuration.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct ResponsesConfig {
    /// Largest chunk written on the wire, also the request body chunk size.
    pub chunk_size: usize,
}

impl Default for ResponsesConfig {
    fn default() -> Self {
        Self { chunk_size: 8192 }
    }
}

/// Timeout configuration.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct TimeoutConfig {
    /// Idle read timeout in seconds.
    pub read_secs: u64,

    /// Single write timeout in seconds.
    pub write_secs: u64,
}

impl TimeoutConfig {
    pub fn read(&self) -> Duration {
        Duration::from_secs(self.read_secs)
    }

    pub fn write(&self) -> Duration {
        Duration::from_secs(self.write_secs)
    }
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            read_secs: 60,
            write_secs: 30,
        }
    }
}

/// Kind of worker pool running application handlers.
#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum WorkerPoolKind {
    /// A dedicated runtime with a fixed number of worker threads.
    Fixed,
    /// The ambient work-stealing runtime.
    #[default]
    WorkStealing,
}

/// Worker pool configuration.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Default)]
#[serde(default)]
pub struct WorkerPoolConfig {
    pub kind: WorkerPoolKind,

    /// Worker thread count for `fixed` pools. Defaults to available parallelism.
    pub threads: Option<usize>,
}

/// Log output format.
#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Log output format.
    pub log_format: LogFormat,

    /// Log every byte read and written on connections.
    pub low_level_wire_logging: bool,

    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_format: LogFormat::Pretty,
            low_level_wire_logging: false,
            metrics_enabled: false,
            metrics_address: "127.0.0.1:9090".to_string(),
        }
    }
}

/// Graceful shutdown configuration.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct ShutdownConfig {
    /// How long in-flight connections may drain, in milliseconds.
    pub timeout_ms: u64,
}

impl ShutdownConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

impl Default for ShutdownConfig {
    fn default() -> Self {
        Self { timeout_ms: 5000 }
    }
}
