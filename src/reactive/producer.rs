//! Push-to-pull adapter for chunked response bodies.
//!
//! # Responsibilities
//! - Subscribe to a [`Publisher`] and buffer at most two chunks ahead
//! - Grant upstream credit one item at a time, only when the writer pulls
//! - Surface upstream failures to the writer
//! - Cancel the upstream subscription exactly once
//!
//! # State Machine
//! ```text
//! Subscribing ──on_subscribe──▶ Streaming ──on_complete──▶ Draining ──queue empty──▶ Completed
//!                                   │                          │
//!                                   ├──on_error / overflow──▶ Errored
//!                                   └──close (from any state)──▶ Closed
//! ```
//!
//! # Design Decisions
//! - `read_chunk` never blocks; an empty read means "not ready yet"
//! - Credit is granted only while `outstanding + queued < 2`, so a publisher
//!   that delivers synchronously inside `request` still fits the queue
//! - A chunk arriving with a full queue is a protocol violation, not dropped

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use bytes::Bytes;
use thiserror::Error;
use tokio::sync::Notify;

use crate::reactive::lock;
use crate::reactive::publisher::{Publisher, Subscriber, Subscription};
use crate::BoxError;

/// Maximum number of chunks requested or buffered ahead of the writer.
pub const CREDIT: usize = 2;

/// Lifecycle of a [`ChunkedResponseProducer`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProducerState {
    Subscribing,
    Streaming,
    Draining,
    Completed,
    Closed,
    Errored,
}

/// Failure of a chunked response source.
#[derive(Debug, Clone, Error)]
pub enum ProducerError {
    /// The publisher signalled an error.
    #[error("chunked response source failed: {0}")]
    Upstream(Arc<BoxError>),

    /// More chunks arrived than were requested.
    #[error("publisher delivered more chunks than requested")]
    Overflow,

    /// The publisher never called `on_subscribe`.
    #[error("publisher did not provide a subscription")]
    NotSubscribed,
}

struct Inner {
    state: ProducerState,
    queue: VecDeque<Bytes>,
    outstanding: usize,
    requests_issued: u64,
    high_water: usize,
    error: Option<ProducerError>,
    subscription: Option<Arc<dyn Subscription>>,
}

impl Default for Inner {
    fn default() -> Self {
        Self {
            state: ProducerState::Subscribing,
            queue: VecDeque::with_capacity(CREDIT),
            outstanding: 0,
            requests_issued: 0,
            high_water: 0,
            error: None,
            subscription: None,
        }
    }
}

impl Inner {
    fn state(&self) -> ProducerState {
        self.state
    }

    fn fail(&mut self, error: ProducerError) {
        self.state = ProducerState::Errored;
        self.error = Some(error);
        self.queue.clear();
    }

    fn end_of_input(&mut self) -> Result<bool, ProducerError> {
        match self.state() {
            ProducerState::Errored => Err(self
                .error
                .clone()
                .unwrap_or(ProducerError::NotSubscribed)),
            ProducerState::Closed | ProducerState::Completed => Ok(true),
            ProducerState::Draining if self.queue.is_empty() => {
                self.state = ProducerState::Completed;
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}

struct Shared {
    inner: Mutex<Inner>,
    ready: Notify,
}

impl Subscriber for Shared {
    fn on_subscribe(&self, subscription: Arc<dyn Subscription>) {
        let rejected = {
            let mut inner = lock(&self.inner);
            if inner.state() == ProducerState::Subscribing {
                inner.state = ProducerState::Streaming;
                inner.subscription = Some(subscription);
                None
            } else {
                Some(subscription)
            }
        };
        if let Some(subscription) = rejected {
            tracing::debug!("Second or late subscription cancelled");
            subscription.cancel();
        }
        self.ready.notify_one();
    }

    fn on_next(&self, chunk: Bytes) {
        let overflowed = {
            let mut inner = lock(&self.inner);
            if inner.state() != ProducerState::Streaming {
                tracing::trace!(state = ?inner.state(), "Chunk ignored");
                return;
            }
            inner.outstanding = inner.outstanding.saturating_sub(1);
            if inner.queue.len() >= CREDIT {
                inner.fail(ProducerError::Overflow);
                inner.subscription.take()
            } else {
                inner.queue.push_back(chunk);
                inner.high_water = inner.high_water.max(inner.queue.len());
                None
            }
        };
        if let Some(subscription) = overflowed {
            tracing::error!("Chunked publisher overflowed its credit, cancelling");
            subscription.cancel();
        }
        self.ready.notify_one();
    }

    fn on_error(&self, error: BoxError) {
        {
            let mut inner = lock(&self.inner);
            if !matches!(
                inner.state(),
                ProducerState::Subscribing | ProducerState::Streaming
            ) {
                return;
            }
            tracing::debug!(error = %error, "Chunked publisher failed");
            inner.fail(ProducerError::Upstream(Arc::new(error)));
        }
        self.ready.notify_one();
    }

    fn on_complete(&self) {
        {
            let mut inner = lock(&self.inner);
            if inner.state() != ProducerState::Streaming {
                return;
            }
            inner.state = if inner.queue.is_empty() {
                ProducerState::Completed
            } else {
                ProducerState::Draining
            };
        }
        self.ready.notify_one();
    }
}

/// Pull-side view of a chunk publisher, consumed by the response writer.
pub struct ChunkedResponseProducer {
    shared: Arc<Shared>,
}

impl ChunkedResponseProducer {
    /// Subscribe to `publisher` and start in `Subscribing`, or `Streaming`
    /// once the publisher hands over its subscription.
    pub fn subscribe(publisher: Box<dyn Publisher>) -> Self {
        let shared = Arc::new(Shared {
            inner: Mutex::new(Inner::default()),
            ready: Notify::new(),
        });
        publisher.subscribe(shared.clone());
        Self { shared }
    }

    pub fn state(&self) -> ProducerState {
        lock(&self.shared.inner).state()
    }

    /// Whether no more chunks will be returned.
    ///
    /// An upstream failure is returned as an error, every time it is asked.
    pub fn is_end_of_input(&self) -> Result<bool, ProducerError> {
        lock(&self.shared.inner).end_of_input()
    }

    /// Pull the next chunk without blocking.
    ///
    /// `Ok(None)` before end of input means nothing is ready yet; wait on
    /// [`ChunkedResponseProducer::ready`] and try again.
    pub fn read_chunk(&self) -> Result<Option<Bytes>, ProducerError> {
        let credit = {
            let mut inner = lock(&self.shared.inner);
            if inner.state() == ProducerState::Subscribing {
                inner.fail(ProducerError::NotSubscribed);
                return Err(ProducerError::NotSubscribed);
            }
            if inner.end_of_input()? {
                return Ok(None);
            }
            if inner.state() == ProducerState::Streaming
                && inner.outstanding + inner.queue.len() < CREDIT
            {
                inner.outstanding += 1;
                inner.requests_issued += 1;
                inner.subscription.clone()
            } else {
                None
            }
        };

        // The publisher may deliver synchronously from inside `request`.
        if let Some(subscription) = credit {
            subscription.request(1);
        }

        let mut inner = lock(&self.shared.inner);
        if inner.state() == ProducerState::Errored {
            inner.end_of_input()?;
        }
        let chunk = inner.queue.pop_front();
        if inner.state() == ProducerState::Draining && inner.queue.is_empty() {
            inner.state = ProducerState::Completed;
        }
        Ok(chunk)
    }

    /// Wait until the publisher signals something new.
    pub async fn ready(&self) {
        self.shared.ready.notified().await;
    }

    /// Stop streaming: drop buffered chunks and cancel the subscription if
    /// still held. Idempotent.
    pub fn close(&self) {
        let subscription = {
            let mut inner = lock(&self.shared.inner);
            if inner.state() == ProducerState::Closed {
                return;
            }
            inner.state = ProducerState::Closed;
            inner.queue.clear();
            inner.subscription.take()
        };
        if let Some(subscription) = subscription {
            subscription.cancel();
        }
        self.shared.ready.notify_one();
    }

    /// Upstream `request(1)` calls issued so far.
    pub fn requests_issued(&self) -> u64 {
        lock(&self.shared.inner).requests_issued
    }

    /// Largest number of chunks ever queued at once.
    pub fn max_queued(&self) -> usize {
        lock(&self.shared.inner).high_water
    }
}

impl Drop for ChunkedResponseProducer {
    fn drop(&mut self) {
        self.close();
    }
}

impl std::fmt::Debug for ChunkedResponseProducer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChunkedResponseProducer")
            .field("state", &self.state())
            .finish()
    }
}
