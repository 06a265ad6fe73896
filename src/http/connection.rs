//! Per-connection lifecycle.
//!
//! # Responsibilities
//! - Own the connection's [`RequestAggregator`]
//! - Turn decode failures, oversized bodies and spool failures into
//!   synthesized responses without touching the application
//! - Route requests to the shutting-down path once shutdown starts
//! - Clean up pending state on open, on error and on close, exactly once each
//!
//! # State Machine
//! ```text
//! Active ──shutdown observed──▶ Draining
//!    │                             │
//!    └────────channel inactive─────┴──▶ Closed
//! ```

use std::net::SocketAddr;
use std::time::Instant;

use http::{StatusCode, Version};

use crate::body::SpoolDir;
use crate::http::aggregator::{Aggregated, RequestAggregator};
use crate::http::decoder::{DecodeError, RequestEvent};
use crate::http::outcome::Outcome;
use crate::http::request::{Request, RequestId};
use crate::lifecycle::Shutdown;
use crate::net::connection::{ConnectionId, ConnectionState};
use crate::observability::events::{Events, HttpEvent};
use crate::observability::metrics::{self, Rejection};
use crate::security::limits::BodyLimits;

/// What the connection task should do after an inbound message.
#[derive(Debug)]
pub enum Inbound {
    /// Read more.
    Pending,
    /// Write `100 Continue`, then read more.
    Continue,
    /// Hand the request to the application.
    Dispatch(Request),
    /// Answer with the shutting-down outcome and close.
    ShuttingDown(Request),
    /// Write `outcome` and close; the application never sees the request.
    Reject {
        request_id: Option<RequestId>,
        outcome: Outcome,
    },
}

/// Lifecycle state of one connection.
#[derive(Debug)]
pub struct ConnectionLifecycle {
    id: ConnectionId,
    remote_addr: Option<SocketAddr>,
    state: ConnectionState,
    aggregator: RequestAggregator,
    shutdown: Shutdown,
    events: Events,
    request_started: Option<Instant>,
}

impl ConnectionLifecycle {
    pub fn new(
        id: ConnectionId,
        remote_addr: Option<SocketAddr>,
        limits: BodyLimits,
        spool: SpoolDir,
        events: Events,
        shutdown: Shutdown,
    ) -> Self {
        Self {
            id,
            remote_addr,
            state: ConnectionState::Active,
            aggregator: RequestAggregator::new(limits, spool, events.clone(), remote_addr),
            shutdown,
            events,
            request_started: None,
        }
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Whether responses must close the connection.
    pub fn is_draining(&self) -> bool {
        self.state == ConnectionState::Draining || self.shutdown.is_triggered()
    }

    pub fn aggregator(&self) -> &RequestAggregator {
        &self.aggregator
    }

    pub fn on_channel_active(&mut self) {
        self.aggregator.cleanup();
        self.events.emit(HttpEvent::ConnectionOpened {
            connection_id: self.id,
            remote_addr: self.remote_addr,
        });
        tracing::debug!(
            connection_id = %self.id,
            remote_addr = ?self.remote_addr,
            "Connection active"
        );
    }

    /// Feed one decoded event, or the decoder's failure.
    pub fn on_message(&mut self, message: Result<RequestEvent, DecodeError>) -> Inbound {
        if self.state == ConnectionState::Closed {
            tracing::trace!(connection_id = %self.id, "Message after close ignored");
            return Inbound::Pending;
        }

        let event = match message {
            Ok(event) => event,
            Err(error) => return self.reject_malformed(error),
        };
        if matches!(event, RequestEvent::Header(_)) {
            self.request_started = Some(Instant::now());
        }

        let pending_id = self.aggregator.pending_request_id().cloned();
        let aggregated = match self.aggregator.on_event(event) {
            Ok(aggregated) => aggregated,
            Err(error) => {
                tracing::error!(
                    connection_id = %self.id,
                    request_id = ?pending_id.as_ref().map(RequestId::as_str),
                    error = %error,
                    "Request body could not be stored"
                );
                return Inbound::Reject {
                    request_id: pending_id,
                    outcome: Outcome::internal_error(Version::HTTP_11),
                };
            }
        };

        match aggregated {
            Aggregated::Pending => Inbound::Pending,
            Aggregated::Continue => Inbound::Continue,
            Aggregated::Complete(request) => {
                if self.shutdown.is_triggered() {
                    self.state = ConnectionState::Draining;
                    metrics::record_rejected(Rejection::ShuttingDown);
                    Inbound::ShuttingDown(request)
                } else {
                    Inbound::Dispatch(request)
                }
            }
            Aggregated::TooLarge {
                request_id,
                outcome,
            } => {
                tracing::warn!(
                    connection_id = %self.id,
                    request_id = %request_id,
                    "Request body too large, rejecting"
                );
                metrics::record_rejected(Rejection::EntityTooLarge);
                Inbound::Reject {
                    request_id: Some(request_id),
                    outcome,
                }
            }
            Aggregated::Malformed { request_id, error } => self.reject(request_id, error),
        }
    }

    fn reject_malformed(&mut self, error: DecodeError) -> Inbound {
        match self.aggregator.on_decode_failure(error) {
            Aggregated::Malformed { request_id, error } => self.reject(request_id, error),
            _ => Inbound::Reject {
                request_id: None,
                outcome: Outcome::bad_request(),
            },
        }
    }

    fn reject(&mut self, request_id: Option<RequestId>, error: DecodeError) -> Inbound {
        tracing::warn!(
            connection_id = %self.id,
            request_id = ?request_id.as_ref().map(RequestId::as_str),
            error = %error,
            "Malformed request, rejecting"
        );
        metrics::record_rejected(Rejection::BadRequest);
        Inbound::Reject {
            request_id,
            outcome: Outcome::bad_request(),
        }
    }

    /// Record a written response: the connection-complete notification.
    pub fn on_response_written(&mut self, request_id: Option<RequestId>, status: StatusCode) {
        let started = self.request_started.take().unwrap_or_else(Instant::now);
        metrics::record_response_sent(status, started);
        tracing::trace!(
            connection_id = %self.id,
            request_id = ?request_id.as_ref().map(RequestId::as_str),
            status = status.as_u16(),
            "Response written"
        );
        self.events.emit(HttpEvent::ResponseSent { request_id, status });
    }

    /// Abandon pending work after an I/O, timeout or protocol failure.
    pub fn on_exception_caught(&mut self, error: &dyn std::error::Error) {
        tracing::debug!(connection_id = %self.id, error = %error, "Connection failed");
        self.aggregator.cleanup();
    }

    /// Release everything the connection holds. Safe to call any number of times.
    pub fn on_channel_inactive(&mut self) {
        if self.state == ConnectionState::Closed {
            return;
        }
        self.state = ConnectionState::Closed;
        self.aggregator.cleanup();
        self.events.emit(HttpEvent::ConnectionClosed {
            connection_id: self.id,
        });
        tracing::debug!(connection_id = %self.id, "Connection inactive");
    }
}

impl Drop for ConnectionLifecycle {
    fn drop(&mut self) {
        self.on_channel_inactive();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::sync::Arc;

    use ::metrics::{Counter, Gauge, Histogram, Key, KeyName, Metadata, SharedString, Unit};
    use bytes::Bytes;
    use http::{HeaderMap, Method, Uri};
    use tokio::sync::broadcast::error::TryRecvError;

    use crate::http::request::RequestHead;

    struct Fixture {
        _dir: tempfile::TempDir,
        shutdown: Shutdown,
        events: Events,
        lifecycle: ConnectionLifecycle,
    }

    fn fixture(max: Option<u64>, threshold: u64) -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let shutdown = Shutdown::new();
        let events = Events::new(64);
        let lifecycle = ConnectionLifecycle::new(
            ConnectionId::new(),
            None,
            BodyLimits::new(max, threshold),
            SpoolDir::new(dir.path()),
            events.clone(),
            shutdown.clone(),
        );
        Fixture {
            _dir: dir,
            shutdown,
            events,
            lifecycle,
        }
    }

    fn header() -> RequestEvent {
        RequestEvent::Header(RequestHead {
            method: Method::POST,
            uri: Uri::from_static("/"),
            version: Version::HTTP_11,
            headers: HeaderMap::new(),
        })
    }

    fn last(data: &'static [u8]) -> RequestEvent {
        RequestEvent::LastBodyChunk {
            data: Bytes::from_static(data),
            trailers: HeaderMap::new(),
        }
    }

    #[test]
    fn complete_request_is_dispatched() {
        let mut f = fixture(None, 1024);
        f.lifecycle.on_channel_active();
        assert!(matches!(f.lifecycle.on_message(Ok(header())), Inbound::Pending));
        match f.lifecycle.on_message(Ok(last(b"hi"))) {
            Inbound::Dispatch(request) => assert_eq!(request.body.to_bytes().unwrap(), "hi"),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn decode_failure_becomes_closing_bad_request() {
        let mut f = fixture(None, 1024);
        f.lifecycle.on_message(Ok(header()));
        match f.lifecycle.on_message(Err(DecodeError::InvalidChunkSize)) {
            Inbound::Reject {
                request_id,
                outcome,
            } => {
                assert!(request_id.is_some());
                assert_eq!(outcome.status(), StatusCode::BAD_REQUEST);
                assert!(!outcome.header.is_keep_alive());
            }
            other => panic!("unexpected {:?}", other),
        }
        assert!(!f.lifecycle.aggregator().is_aggregating());
    }

    #[test]
    fn oversized_body_is_rejected_with_413() {
        let mut f = fixture(Some(1), 1024);
        f.lifecycle.on_message(Ok(header()));
        match f.lifecycle.on_message(Ok(last(b"too big"))) {
            Inbound::Reject { outcome, .. } => {
                assert_eq!(outcome.status(), StatusCode::PAYLOAD_TOO_LARGE)
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn requests_during_shutdown_take_the_shutdown_path() {
        let mut f = fixture(None, 1024);
        f.lifecycle.on_message(Ok(header()));
        f.shutdown.trigger();
        assert!(f.lifecycle.is_draining());
        assert!(matches!(
            f.lifecycle.on_message(Ok(last(b""))),
            Inbound::ShuttingDown(_)
        ));
        assert_eq!(f.lifecycle.state(), ConnectionState::Draining);
    }

    #[test]
    fn spool_failure_becomes_internal_error() {
        let dir = tempfile::tempdir().unwrap();
        let mut lifecycle = ConnectionLifecycle::new(
            ConnectionId::new(),
            None,
            BodyLimits::new(None, 1),
            SpoolDir::new(dir.path().join("missing")),
            Events::default(),
            Shutdown::new(),
        );
        lifecycle.on_message(Ok(header()));
        match lifecycle.on_message(Ok(last(b"spill"))) {
            Inbound::Reject {
                request_id,
                outcome,
            } => {
                assert!(request_id.is_some());
                assert_eq!(outcome.status(), StatusCode::INTERNAL_SERVER_ERROR);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn spooled_body_is_deleted_on_close() {
        let mut f = fixture(None, 2);
        f.lifecycle.on_message(Ok(header()));
        f.lifecycle.on_message(Ok(RequestEvent::BodyChunk(Bytes::from_static(b"abcdef"))));
        assert_eq!(std::fs::read_dir(f._dir.path()).unwrap().count(), 1);

        f.lifecycle.on_channel_inactive();
        assert_eq!(std::fs::read_dir(f._dir.path()).unwrap().count(), 0);
        assert_eq!(f.lifecycle.state(), ConnectionState::Closed);
    }

    #[test]
    fn close_is_idempotent_and_reported_once() {
        let mut f = fixture(None, 1024);
        let mut rx = f.events.subscribe();
        f.lifecycle.on_channel_active();
        f.lifecycle.on_exception_caught(&DecodeError::UnexpectedEof);
        f.lifecycle.on_channel_inactive();
        f.lifecycle.on_channel_inactive();
        drop(f.lifecycle);

        assert!(matches!(rx.try_recv(), Ok(HttpEvent::ConnectionOpened { .. })));
        assert!(matches!(rx.try_recv(), Ok(HttpEvent::ConnectionClosed { .. })));
        assert!(matches!(rx.try_recv(), Err(TryRecvError::Empty)));
    }

    #[test]
    fn response_written_emits_event() {
        let mut f = fixture(None, 1024);
        let mut rx = f.events.subscribe();
        f.lifecycle.on_response_written(None, StatusCode::BAD_REQUEST);
        assert_eq!(
            rx.try_recv().unwrap(),
            HttpEvent::ResponseSent {
                request_id: None,
                status: StatusCode::BAD_REQUEST
            }
        );
    }

    /// Counts increments of `werval_requests_rejected_total{reason="entity_too_large"}`.
    #[derive(Default)]
    struct TooLargeRecorder {
        count: Arc<AtomicU64>,
    }

    struct Tally(Arc<AtomicU64>);

    impl ::metrics::CounterFn for Tally {
        fn increment(&self, value: u64) {
            self.0.fetch_add(value, Ordering::SeqCst);
        }

        fn absolute(&self, value: u64) {
            self.0.store(value, Ordering::SeqCst);
        }
    }

    impl ::metrics::Recorder for TooLargeRecorder {
        fn describe_counter(&self, _: KeyName, _: Option<Unit>, _: SharedString) {}
        fn describe_gauge(&self, _: KeyName, _: Option<Unit>, _: SharedString) {}
        fn describe_histogram(&self, _: KeyName, _: Option<Unit>, _: SharedString) {}

        fn register_counter(&self, key: &Key, _: &Metadata<'_>) -> Counter {
            let too_large = key.name() == "werval_requests_rejected_total"
                && key.labels().any(|label| label.value() == "entity_too_large");
            if too_large {
                Counter::from_arc(Arc::new(Tally(self.count.clone())))
            } else {
                Counter::noop()
            }
        }

        fn register_gauge(&self, _: &Key, _: &Metadata<'_>) -> Gauge {
            Gauge::noop()
        }

        fn register_histogram(&self, _: &Key, _: &Metadata<'_>) -> Histogram {
            Histogram::noop()
        }
    }

    #[test]
    fn oversized_body_is_counted_once() {
        let recorder = TooLargeRecorder::default();
        let mut f = fixture(Some(1), 1024);
        ::metrics::with_local_recorder(&recorder, || {
            f.lifecycle.on_message(Ok(header()));
            f.lifecycle.on_message(Ok(last(b"abc")));
        });
        assert_eq!(recorder.count.load(Ordering::SeqCst), 1);
    }
}
