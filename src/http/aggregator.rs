//! Request aggregation.
//!
//! # Responsibilities
//! - Turn `Header` / `BodyChunk` / `LastBodyChunk` events into one [`Request`]
//! - Enforce the maximum body size with an immediate `413`
//! - Spill bodies past the disk threshold into a spool file
//! - Release buffers and spool files on every exit path
//!
//! # Design Decisions
//! - Both limits are checked against the prospective total
//!   (consumed + incoming) before a byte is stored
//! - A declared `Content-Length` over the maximum is rejected on the header,
//!   before the client uploads anything
//! - At most one pending request per connection; a new header resets it

use std::net::SocketAddr;
use std::sync::Arc;

use bytes::Bytes;
use http::header::{CONTENT_LENGTH, TRANSFER_ENCODING};
use http::{HeaderMap, HeaderValue};
use thiserror::Error;

use crate::body::{Body, ByteSink, IdentityGenerator, SpoolDir, UuidIdentityGenerator};
use crate::http::decoder::{declared_content_length, DecodeError, RequestEvent};
use crate::http::outcome::Outcome;
use crate::http::request::{Request, RequestHead, RequestHeader, RequestId};
use crate::observability::events::{Events, HttpEvent};
use crate::observability::metrics;
use crate::security::limits::BodyLimits;

/// Failure to store body bytes.
#[derive(Debug, Error)]
pub enum AggregateError {
    /// Creating, writing or flushing the spool file failed.
    #[error("failed to spool request body: {0}")]
    Spool(#[from] std::io::Error),
}

/// What the aggregator made of one event.
#[derive(Debug)]
pub enum Aggregated {
    /// Keep feeding events.
    Pending,
    /// Keep feeding events, after telling the client to send its body.
    Continue,
    /// The request is complete and ready for the application.
    Complete(Request),
    /// The body is over the limit; answer with this outcome and close.
    TooLarge {
        request_id: RequestId,
        outcome: Outcome,
    },
    /// Framing could not be decoded; answer `400` and close.
    Malformed {
        request_id: Option<RequestId>,
        error: DecodeError,
    },
}

#[derive(Debug)]
struct PendingRequest {
    header: RequestHeader,
    consumed: u64,
    sink: Option<ByteSink>,
}

/// Per-connection aggregation state.
#[derive(Debug)]
pub struct RequestAggregator {
    limits: BodyLimits,
    spool: SpoolDir,
    ids: Arc<dyn IdentityGenerator>,
    events: Events,
    remote_addr: Option<SocketAddr>,
    pending: Option<PendingRequest>,
}

impl RequestAggregator {
    pub fn new(
        limits: BodyLimits,
        spool: SpoolDir,
        events: Events,
        remote_addr: Option<SocketAddr>,
    ) -> Self {
        Self {
            limits,
            spool,
            ids: Arc::new(UuidIdentityGenerator::new()),
            events,
            remote_addr,
            pending: None,
        }
    }

    /// Use `ids` for request identities instead of plain UUIDs.
    pub fn with_identity_generator(mut self, ids: Arc<dyn IdentityGenerator>) -> Self {
        self.ids = ids;
        self
    }

    /// Whether a request is between its header and its last chunk.
    pub fn is_aggregating(&self) -> bool {
        self.pending.is_some()
    }

    /// Identity of the request being aggregated, if any.
    pub fn pending_request_id(&self) -> Option<&RequestId> {
        self.pending.as_ref().map(|p| &p.header.id)
    }

    /// Feed one transport event.
    pub fn on_event(&mut self, event: RequestEvent) -> Result<Aggregated, AggregateError> {
        let result = match event {
            RequestEvent::Header(head) => Ok(self.on_header(head)),
            RequestEvent::BodyChunk(data) => self.on_content(data, None),
            RequestEvent::LastBodyChunk { data, trailers } => self.on_content(data, Some(trailers)),
        };
        if result.is_err() {
            self.cleanup();
        }
        result
    }

    /// Abandon the pending request because its framing is broken.
    pub fn on_decode_failure(&mut self, error: DecodeError) -> Aggregated {
        let request_id = self.pending.as_ref().map(|p| p.header.id.clone());
        self.cleanup();
        Aggregated::Malformed { request_id, error }
    }

    /// Drop the pending request and its storage. Safe to call any number of times.
    pub fn cleanup(&mut self) {
        if let Some(mut pending) = self.pending.take() {
            if let Some(mut sink) = pending.sink.take() {
                sink.discard();
            }
            tracing::trace!(
                request_id = %pending.header.id,
                consumed = pending.consumed,
                "Pending request discarded"
            );
        }
    }

    fn on_header(&mut self, head: RequestHead) -> Aggregated {
        self.cleanup();

        let id = RequestId::from(self.ids.new_identity());
        self.events.emit(HttpEvent::RequestReceived {
            request_id: id.clone(),
            method: head.method.clone(),
            uri: head.uri.clone(),
        });
        metrics::record_request_received(&head.method);
        tracing::trace!(
            request_id = %id,
            method = %head.method,
            uri = %head.uri,
            "Request received"
        );

        let mut header = RequestHeader::new(id, head, self.remote_addr);
        let declared = declared_content_length(&header.headers).ok().flatten();
        header.headers.remove(TRANSFER_ENCODING);

        if let (Some(len), Some(max)) = (declared, self.limits.max_content_length) {
            if self.limits.exceeds_max(len) {
                return self.too_large(header.id, max);
            }
        }

        let expects_continue = header.expects_continue();
        self.pending = Some(PendingRequest {
            header,
            consumed: 0,
            sink: None,
        });
        if expects_continue {
            Aggregated::Continue
        } else {
            Aggregated::Pending
        }
    }

    fn on_content(
        &mut self,
        data: Bytes,
        trailers: Option<HeaderMap>,
    ) -> Result<Aggregated, AggregateError> {
        let Some(pending) = self.pending.as_mut() else {
            tracing::trace!(len = data.len(), "Body content without a pending request, ignored");
            return Ok(Aggregated::Pending);
        };

        let prospective = pending.consumed + data.len() as u64;
        if let Some(max) = self.limits.max_content_length {
            if prospective > max {
                let id = pending.header.id.clone();
                self.cleanup();
                return Ok(self.too_large(id, max));
            }
        }

        if !data.is_empty() {
            let sink = pending.sink.get_or_insert_with(ByteSink::new);
            if !sink.is_on_disk() && self.limits.exceeds_disk_threshold(prospective) {
                sink.promote(&self.spool)?;
                metrics::record_body_spooled();
            }
            sink.append(&data)?;
            pending.consumed = prospective;
        }

        let Some(trailers) = trailers else {
            return Ok(Aggregated::Pending);
        };
        let Some(mut pending) = self.pending.take() else {
            return Ok(Aggregated::Pending);
        };

        for (name, value) in &trailers {
            pending.header.headers.append(name.clone(), value.clone());
        }
        pending
            .header
            .headers
            .insert(CONTENT_LENGTH, HeaderValue::from(pending.consumed));

        let body = match pending.sink.take() {
            Some(mut sink) => {
                sink.finish()?;
                Body::from_sink(sink)
            }
            None => Body::empty(),
        };
        tracing::trace!(
            request_id = %pending.header.id,
            length = pending.consumed,
            on_disk = body.is_on_disk(),
            "Request aggregated"
        );
        Ok(Aggregated::Complete(Request {
            header: pending.header,
            body,
        }))
    }

    fn too_large(&self, request_id: RequestId, max: u64) -> Aggregated {
        tracing::trace!(
            request_id = %request_id,
            max_content_length = max,
            "Aggregation aborted over maximum"
        );
        Aggregated::TooLarge {
            request_id,
            outcome: Outcome::entity_too_large(max),
        }
    }
}

impl Drop for RequestAggregator {
    fn drop(&mut self) {
        self.cleanup();
    }
}
