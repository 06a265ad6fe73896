//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! Connections and requests produce:
//!     → logging.rs (structured log events, optional wire trace)
//!     → metrics.rs (counters, gauges, histograms)
//!     → events.rs (HttpEvent broadcast to in-process listeners)
//!
//! Consumers:
//!     → stdout (pretty or JSON)
//!     → Metrics endpoint (Prometheus scrape)
//!     → Event subscribers (tests, embedding applications)
//! ```
//!
//! # Design Decisions
//! - Structured logging (JSON) for machine parsing
//! - Request ID and connection ID flow through every log line
//! - Metrics are cheap (atomic increments)

pub mod events;
pub mod logging;
pub mod metrics;

pub use events::{Events, HttpEvent};
pub use logging::{init_logging, LoggingError};
