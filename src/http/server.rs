//! HTTP server.
//!
//! # Responsibilities
//! - Build the shared connection context from configuration
//! - Create the spool directory before serving
//! - Accept connections until shutdown, one task per connection
//! - Drain tracked connections within the shutdown timeout

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;

use crate::application::{Application, WorkerPool};
use crate::body::SpoolDir;
use crate::config::ServerConfig;
use crate::http::driver::{serve_connection, ConnectionContext};
use crate::http::writer::OutcomeWriter;
use crate::lifecycle::Shutdown;
use crate::net::connection::ConnectionTracker;
use crate::net::listener::{Listener, ListenerError};
use crate::net::wire_log::WireLogged;
use crate::observability::events::Events;
use crate::security::limits::{BodyLimits, HeaderLimits};

/// Back-off after a failed accept, so a persistent error does not spin.
const ACCEPT_ERROR_DELAY: Duration = Duration::from_millis(50);

/// Error type for the server as a whole.
#[derive(Debug, Error)]
pub enum ServerError {
    /// The spool directory could not be created.
    #[error("failed to prepare spool directory {path}: {source}")]
    SpoolDir {
        path: String,
        source: std::io::Error,
    },

    /// The listener stopped working.
    #[error(transparent)]
    Listener(#[from] ListenerError),
}

/// HTTP/1.x server for one [`Application`].
pub struct HttpServer {
    config: ServerConfig,
    ctx: Arc<ConnectionContext>,
    tracker: ConnectionTracker,
}

impl HttpServer {
    pub fn new(config: ServerConfig, application: Arc<dyn Application>, workers: WorkerPool) -> Self {
        let ctx = ConnectionContext {
            application,
            workers,
            writer: OutcomeWriter::new(config.timeouts.write()),
            body_limits: BodyLimits::from(&config.requests),
            header_limits: HeaderLimits::from(&config.requests),
            chunk_size: config.responses.chunk_size,
            spool: SpoolDir::new(config.requests.spool_dir()),
            events: Events::default(),
            shutdown: Shutdown::new(),
            read_timeout: config.timeouts.read(),
            write_timeout: config.timeouts.write(),
        };
        Self {
            config,
            ctx: Arc::new(ctx),
            tracker: ConnectionTracker::new(),
        }
    }

    /// Lifecycle events of every connection served.
    pub fn events(&self) -> Events {
        self.ctx.events.clone()
    }

    /// Handle that stops the server when triggered.
    pub fn shutdown_handle(&self) -> Shutdown {
        self.ctx.shutdown.clone()
    }

    pub fn active_connections(&self) -> u64 {
        self.tracker.active_count()
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Serve connections from `listener` until shutdown is triggered, then
    /// wait for open connections to finish.
    pub async fn run(self, listener: Listener) -> Result<(), ServerError> {
        let spool = &self.ctx.spool;
        spool.ensure_exists().map_err(|source| ServerError::SpoolDir {
            path: spool.path().display().to_string(),
            source,
        })?;

        tracing::info!(
            address = ?listener.local_addr().ok(),
            spool_dir = %spool.path().display(),
            max_body_size = ?self.ctx.body_limits.max_content_length,
            disk_threshold = self.ctx.body_limits.disk_threshold,
            workers = ?self.ctx.workers.kind(),
            "HTTP server starting"
        );

        let shutdown = self.ctx.shutdown.clone();
        let wire_logging = self.config.observability.low_level_wire_logging;
        loop {
            let accepted = tokio::select! {
                accepted = listener.accept() => accepted,
                _ = shutdown.wait() => break,
            };

            let (stream, remote_addr, permit) = match accepted {
                Ok(accepted) => accepted,
                Err(ListenerError::Accept(e)) => {
                    tracing::warn!(error = %e, "Accept failed");
                    tokio::time::sleep(ACCEPT_ERROR_DELAY).await;
                    continue;
                }
                Err(e) => return Err(e.into()),
            };
            if let Err(e) = stream.set_nodelay(true) {
                tracing::debug!(error = %e, "Failed to set TCP_NODELAY");
            }

            let guard = self.tracker.track();
            let ctx = Arc::clone(&self.ctx);
            tokio::spawn(async move {
                let connection_id = guard.id();
                let result = if wire_logging {
                    let stream = WireLogged::new(stream, connection_id);
                    serve_connection(stream, connection_id, Some(remote_addr), ctx).await
                } else {
                    serve_connection(stream, connection_id, Some(remote_addr), ctx).await
                };
                match result {
                    Ok(()) => {}
                    Err(e) if e.is_timeout() => {
                        tracing::trace!(%connection_id, error = %e, "Connection timed out")
                    }
                    Err(e) => tracing::debug!(%connection_id, error = %e, "Connection ended with error"),
                }
                drop(permit);
                drop(guard);
            });
        }

        let remaining = self.tracker.active_count();
        tracing::info!(remaining, "Stopped accepting, draining connections");
        let drain_timeout = self.config.shutdown.timeout();
        if tokio::time::timeout(drain_timeout, self.tracker.wait_idle())
            .await
            .is_err()
        {
            tracing::warn!(
                remaining = self.tracker.active_count(),
                timeout_ms = drain_timeout.as_millis() as u64,
                "Shutdown timeout reached, abandoning connections"
            );
        }

        tracing::info!("HTTP server stopped");
        Ok(())
    }
}
