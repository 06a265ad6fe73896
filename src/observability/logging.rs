//! Structured logging.
//!
//! # Responsibilities
//! - Install the global `tracing` subscriber
//! - Pick pretty or JSON output from configuration
//! - Enable the wire target when low-level wire logging is on
//!
//! # Design Decisions
//! - `RUST_LOG` wins over the configured level when set
//! - Initialization errors are returned, never panicked on

use thiserror::Error;
use tracing_subscriber::filter::{Directive, ParseError};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::{SubscriberInitExt, TryInitError};
use tracing_subscriber::{fmt, EnvFilter, Layer};

use crate::config::{LogFormat, ObservabilityConfig};

/// Target used by [`WireLogged`](crate::net::WireLogged).
pub const WIRE_TARGET: &str = "werval_http::wire";

/// Error type for logging initialization.
#[derive(Debug, Error)]
pub enum LoggingError {
    /// A generated filter directive did not parse, usually a bad log level.
    #[error("invalid log directive '{directive}': {source}")]
    Directive { directive: String, source: ParseError },

    /// A global subscriber is already installed.
    #[error("failed to install log subscriber: {0}")]
    Init(#[from] TryInitError),
}

fn directive(text: String) -> Result<Directive, LoggingError> {
    text.parse().map_err(|source| LoggingError::Directive {
        directive: text,
        source,
    })
}

/// Build the filter for `config`.
pub fn build_filter(config: &ObservabilityConfig) -> Result<EnvFilter, LoggingError> {
    let mut filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::default()
            .add_directive(directive(format!("werval_http={}", config.log_level))?),
    };
    if config.low_level_wire_logging {
        filter = filter.add_directive(directive(format!("{}=trace", WIRE_TARGET))?);
    }
    Ok(filter)
}

/// Install the global subscriber. Fails if one is already installed.
pub fn init_logging(config: &ObservabilityConfig) -> Result<(), LoggingError> {
    let filter = build_filter(config)?;
    let layer = match config.log_format {
        LogFormat::Json => fmt::layer().json().with_target(true).boxed(),
        LogFormat::Pretty => fmt::layer().pretty().with_target(true).boxed(),
    };
    tracing_subscriber::registry()
        .with(filter)
        .with(layer)
        .try_init()?;
    Ok(())
}
