//! Werval HTTP server core.
//!
//! Aggregates HTTP/1.x request bodies into memory or spool files under size
//! limits, hands complete requests to an [`Application`], and streams its
//! [`Outcome`]s back with keep-alive, timeouts and chunked backpressure.

// Core subsystems
pub mod body;
pub mod config;
pub mod http;
pub mod net;
pub mod reactive;

// Collaborators
pub mod application;

// Cross-cutting concerns
pub mod lifecycle;
pub mod observability;
pub mod resilience;
pub mod security;

/// Error type of application handlers and chunk publishers.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

pub use application::{Application, WorkerPool};
pub use config::ServerConfig;
pub use http::{HttpServer, Outcome, Request};
pub use lifecycle::Shutdown;
