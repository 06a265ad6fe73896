//! HTTP lifecycle events.
//!
//! # Responsibilities
//! - Describe connection and request milestones as values
//! - Broadcast them to any number of in-process listeners
//!
//! # Design Decisions
//! - Emitting never blocks and never fails; without listeners events are dropped
//! - Slow listeners lag and lose events rather than slowing connections down

use std::net::SocketAddr;

use http::{Method, StatusCode, Uri};
use tokio::sync::broadcast;

use crate::http::request::RequestId;
use crate::net::connection::ConnectionId;

/// Milestone of a connection or request.
#[derive(Debug, Clone, PartialEq)]
pub enum HttpEvent {
    ConnectionOpened {
        connection_id: ConnectionId,
        remote_addr: Option<SocketAddr>,
    },
    ConnectionClosed {
        connection_id: ConnectionId,
    },
    /// A request header was decoded and given an identity.
    RequestReceived {
        request_id: RequestId,
        method: Method,
        uri: Uri,
    },
    /// A response was fully written. Responses to undecodable requests
    /// carry no request identity.
    ResponseSent {
        request_id: Option<RequestId>,
        status: StatusCode,
    },
}

/// Broadcast handle for [`HttpEvent`]s.
#[derive(Debug, Clone)]
pub struct Events {
    tx: broadcast::Sender<HttpEvent>,
}

impl Events {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn emit(&self, event: HttpEvent) {
        // No listener is a normal condition.
        let _ = self.tx.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<HttpEvent> {
        self.tx.subscribe()
    }
}

impl Default for Events {
    fn default() -> Self {
        Self::new(1024)
    }
}
