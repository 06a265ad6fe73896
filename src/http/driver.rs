//! Per-connection event loop.
//!
//! # Data Flow
//! ```text
//! socket bytes ──read (read timeout)──▶ RequestDecoder ──events──▶ ConnectionLifecycle
//!                                                                      │
//!     ┌───────────────┬──────────────────┬──────────────────┬──────────┘
//!     ▼               ▼                  ▼                  ▼
//!  Continue        Dispatch          ShuttingDown         Reject
//!  100 Continue    worker pool       shutting_down_       400 / 413 / 500
//!                  handle_request    outcome
//!                      │                  │                  │
//!                      └──────────────────┴──────────────────┴──▶ OutcomeWriter
//! ```
//!
//! # Design Decisions
//! - One task owns the connection; handlers run on the worker pool and their
//!   outcome is written back by the owning task
//! - One request is fully answered before the next one is decoded
//! - Idle connections close as soon as shutdown starts

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use bytes::BytesMut;
use http::Method;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::application::{Application, WorkerPool};
use crate::body::SpoolDir;
use crate::http::connection::{ConnectionLifecycle, Inbound};
use crate::http::decoder::{DecodeError, RequestDecoder};
use crate::http::encoder::CONTINUE;
use crate::http::request::Request;
use crate::http::writer::{OutcomeWriter, WriteError};
use crate::lifecycle::Shutdown;
use crate::net::connection::ConnectionId;
use crate::observability::events::Events;
use crate::resilience::timeouts::{read_within, write_all_within, TimeoutError};
use crate::security::limits::{BodyLimits, HeaderLimits};
use crate::BoxError;

const READ_BUFFER_CAPACITY: usize = 8 * 1024;

/// Why a connection ended without a clean close.
#[derive(Debug, Error)]
pub enum ConnectionError {
    /// Reading from or writing to the socket failed.
    #[error("connection I/O failed: {0}")]
    Io(#[from] std::io::Error),

    /// The peer was idle too long, or a write stalled.
    #[error(transparent)]
    Timeout(#[from] TimeoutError),

    /// A response could not be written completely.
    #[error("failed to write response: {0}")]
    Write(#[from] WriteError),
}

impl ConnectionError {
    /// Whether the connection ended on a deadline rather than a failure.
    pub fn is_timeout(&self) -> bool {
        matches!(
            self,
            ConnectionError::Timeout(_) | ConnectionError::Write(WriteError::Timeout(_))
        )
    }
}

/// Everything a connection task needs, shared by all connections of a server.
#[derive(Clone)]
pub struct ConnectionContext {
    pub application: Arc<dyn Application>,
    pub workers: WorkerPool,
    pub writer: OutcomeWriter,
    pub body_limits: BodyLimits,
    pub header_limits: HeaderLimits,
    pub chunk_size: usize,
    pub spool: SpoolDir,
    pub events: Events,
    pub shutdown: Shutdown,
    pub read_timeout: Duration,
    pub write_timeout: Duration,
}

impl std::fmt::Debug for ConnectionContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionContext")
            .field("workers", &self.workers)
            .field("body_limits", &self.body_limits)
            .field("header_limits", &self.header_limits)
            .field("chunk_size", &self.chunk_size)
            .field("spool", &self.spool)
            .field("read_timeout", &self.read_timeout)
            .field("write_timeout", &self.write_timeout)
            .finish_non_exhaustive()
    }
}

enum Fill {
    Data,
    Eof,
    Shutdown,
}

struct Connection<S> {
    io: S,
    buf: BytesMut,
    decoder: RequestDecoder,
    lifecycle: ConnectionLifecycle,
    ctx: Arc<ConnectionContext>,
}

/// Serve HTTP/1.x on `io` until the peer leaves, a response closes the
/// connection, or shutdown finds it idle.
pub async fn serve_connection<S>(
    io: S,
    connection_id: ConnectionId,
    remote_addr: Option<SocketAddr>,
    ctx: Arc<ConnectionContext>,
) -> Result<(), ConnectionError>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    let mut conn = Connection {
        io,
        buf: BytesMut::with_capacity(READ_BUFFER_CAPACITY),
        decoder: RequestDecoder::new(ctx.header_limits, ctx.chunk_size),
        lifecycle: ConnectionLifecycle::new(
            connection_id,
            remote_addr,
            ctx.body_limits,
            ctx.spool.clone(),
            ctx.events.clone(),
            ctx.shutdown.clone(),
        ),
        ctx,
    };

    conn.lifecycle.on_channel_active();
    let result = conn.run().await;
    if let Err(error) = &result {
        conn.lifecycle.on_exception_caught(error);
    }
    conn.lifecycle.on_channel_inactive();

    let write_timeout = conn.ctx.write_timeout;
    let _ = tokio::time::timeout(write_timeout, conn.io.shutdown()).await;
    result
}

impl<S> Connection<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    async fn run(&mut self) -> Result<(), ConnectionError> {
        let mut eof = false;
        loop {
            let decoded = if eof {
                self.decoder.decode_eof(&mut self.buf)
            } else {
                self.decoder.decode(&mut self.buf)
            };

            let message = match decoded {
                Ok(Some(event)) => Ok(event),
                Ok(None) if eof => return Ok(()),
                Ok(None) => {
                    match self.fill().await? {
                        Fill::Data => {}
                        Fill::Eof => eof = true,
                        Fill::Shutdown => return Ok(()),
                    }
                    continue;
                }
                Err(DecodeError::UnexpectedEof) => {
                    tracing::debug!(
                        connection_id = %self.lifecycle.id(),
                        "Peer closed in the middle of a request"
                    );
                    return Ok(());
                }
                Err(error) => Err(error),
            };

            let close = match self.lifecycle.on_message(message) {
                Inbound::Pending => false,
                Inbound::Continue => {
                    write_all_within(&mut self.io, CONTINUE, self.ctx.write_timeout).await??;
                    false
                }
                Inbound::Dispatch(request) => self.respond(request, false).await?,
                Inbound::ShuttingDown(request) => self.respond(request, true).await?,
                Inbound::Reject {
                    request_id,
                    outcome,
                } => {
                    let summary = self.ctx.writer.write(&mut self.io, outcome, true).await?;
                    self.lifecycle.on_response_written(request_id, summary.status);
                    true
                }
            };
            if close {
                return Ok(());
            }
        }
    }

    /// Read more bytes. Between requests the read also ends on shutdown.
    async fn fill(&mut self) -> Result<Fill, ConnectionError> {
        let idle = self.decoder.is_idle() && self.buf.is_empty();
        if idle && self.ctx.shutdown.is_triggered() {
            return Ok(Fill::Shutdown);
        }

        let read_timeout = self.ctx.read_timeout;
        let connection_id = self.lifecycle.id();
        let read = if idle {
            let shutdown = self.ctx.shutdown.clone();
            tokio::select! {
                read = read_within(read_timeout, self.io.read_buf(&mut self.buf)) => read,
                _ = shutdown.wait() => {
                    tracing::debug!(%connection_id, "Idle connection closed for shutdown");
                    return Ok(Fill::Shutdown);
                }
            }
        } else {
            read_within(read_timeout, self.io.read_buf(&mut self.buf)).await
        };

        match read {
            Ok(Ok(0)) => Ok(Fill::Eof),
            Ok(Ok(_)) => Ok(Fill::Data),
            Ok(Err(error)) => Err(error.into()),
            Err(timeout) => {
                tracing::trace!(%connection_id, idle, "Read timed out");
                Err(timeout.into())
            }
        }
    }

    /// Answer one request. Returns whether the connection must close.
    async fn respond(&mut self, request: Request, shutting_down: bool) -> Result<bool, ConnectionError> {
        let header = request.header.clone();
        let application = Arc::clone(&self.ctx.application);

        let outcome = if shutting_down {
            application.shutting_down_outcome(header.version, &header.id).await
        } else {
            tracing::trace!(
                request_id = %header.id,
                method = %header.method,
                uri = %header.uri,
                "Dispatching request"
            );
            let handler = Arc::clone(&application);
            let handled = self
                .ctx
                .workers
                .spawn(async move { handler.handle_request(request).await })
                .await;
            match handled {
                Ok(Ok(outcome)) => outcome,
                Ok(Err(error)) => application.handle_error(&header, &error),
                Err(join_error) => {
                    let error: BoxError = Box::new(join_error);
                    application.handle_error(&header, &error)
                }
            }
        };

        let force_close = shutting_down
            || !header.is_keep_alive()
            || self.lifecycle.is_draining()
            || self.ctx.shutdown.is_triggered();
        let writer = &self.ctx.writer;
        let summary = if header.method == Method::HEAD {
            writer.write_head(&mut self.io, outcome, force_close).await?
        } else {
            writer.write(&mut self.io, outcome, force_close).await?
        };
        self.lifecycle
            .on_response_written(Some(header.id.clone()), summary.status);
        application.on_request_complete(&header);
        Ok(summary.close)
    }
}
