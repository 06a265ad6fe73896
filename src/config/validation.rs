//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate value ranges (timeouts > 0, sizes > 0, addresses parse)
//! - Check the spool directory is usable
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: ServerConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use std::net::SocketAddr;
use std::path::PathBuf;

use thiserror::Error;

use crate::config::schema::ServerConfig;

/// A single semantic configuration problem.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    /// An address field does not parse as `ip:port`.
    #[error("{field}: invalid socket address '{value}'")]
    InvalidAddress { field: &'static str, value: String },

    /// A field that must be strictly positive is zero.
    #[error("{0} must be greater than zero")]
    Zero(&'static str),

    /// The spool directory path exists but is not a directory.
    #[error("requests.spool_dir: '{0}' exists and is not a directory")]
    SpoolDirNotDirectory(PathBuf),
}

/// Validate a parsed configuration, collecting every problem found.
pub fn validate_config(config: &ServerConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.listener.bind_address.parse::<SocketAddr>().is_err() {
        errors.push(ValidationError::InvalidAddress {
            field: "listener.bind_address",
            value: config.listener.bind_address.clone(),
        });
    }
    if config.listener.max_connections == 0 {
        errors.push(ValidationError::Zero("listener.max_connections"));
    }

    if config.requests.disk_threshold == 0 {
        errors.push(ValidationError::Zero("requests.disk_threshold"));
    }
    if config.requests.max_head_size == 0 {
        errors.push(ValidationError::Zero("requests.max_head_size"));
    }
    if config.requests.max_headers == 0 {
        errors.push(ValidationError::Zero("requests.max_headers"));
    }
    let spool_dir = config.requests.spool_dir();
    if spool_dir.exists() && !spool_dir.is_dir() {
        errors.push(ValidationError::SpoolDirNotDirectory(spool_dir));
    }

    if config.responses.chunk_size == 0 {
        errors.push(ValidationError::Zero("responses.chunk_size"));
    }

    if config.timeouts.read_secs == 0 {
        errors.push(ValidationError::Zero("timeouts.read_secs"));
    }
    if config.timeouts.write_secs == 0 {
        errors.push(ValidationError::Zero("timeouts.write_secs"));
    }

    if config.workers.threads == Some(0) {
        errors.push(ValidationError::Zero("workers.threads"));
    }

    if config.observability.metrics_enabled
        && config.observability.metrics_address.parse::<SocketAddr>().is_err()
    {
        errors.push(ValidationError::InvalidAddress {
            field: "observability.metrics_address",
            value: config.observability.metrics_address.clone(),
        });
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}
