//! Application collaborator contract.
//!
//! # Data Flow
//! ```text
//! Aggregated Request
//!     → workers.rs (handler future spawned on the worker pool)
//!     → Application::handle_request → Outcome
//!     → on failure or panic: Application::handle_error → Outcome
//!     → back on the connection task for writing
//! ```
//!
//! # Design Decisions
//! - Routing, controllers and sessions live behind this trait, outside the crate
//! - Handler futures are `'static` so they can move to another runtime
//! - Every hook except `handle_request` has a sensible default

pub mod workers;

use futures_util::future::{self, BoxFuture, FutureExt};
use http::Version;

use crate::http::outcome::Outcome;
use crate::http::request::{Request, RequestHeader, RequestId};
use crate::BoxError;

pub use workers::{WorkerPool, WorkerPoolError};

/// The application served by an [`HttpServer`](crate::http::HttpServer).
pub trait Application: Send + Sync + 'static {
    /// Produce the outcome for a fully aggregated request.
    fn handle_request(&self, request: Request) -> BoxFuture<'static, Result<Outcome, BoxError>>;

    /// Turn a failed or panicked handler into an outcome.
    fn handle_error(&self, header: &RequestHeader, error: &BoxError) -> Outcome {
        tracing::error!(
            request_id = %header.id,
            method = %header.method,
            uri = %header.uri,
            error = %error,
            "Request handler failed"
        );
        Outcome::internal_error(header.version)
    }

    /// Outcome for a request that completed while the server shuts down.
    fn shutting_down_outcome(
        &self,
        version: Version,
        request_id: &RequestId,
    ) -> BoxFuture<'static, Outcome> {
        tracing::debug!(request_id = %request_id, "Answering request during shutdown");
        future::ready(Outcome::service_unavailable(version)).boxed()
    }

    /// Called once the outcome for `header` has been fully written.
    fn on_request_complete(&self, _header: &RequestHeader) {}
}
