//! Reactive response body subsystem.
//!
//! # Data Flow
//! ```text
//! Application builds a chunked Outcome:
//!     → publisher.rs (IterPublisher / StreamPublisher / ReaderPublisher)
//!     → producer.rs (ChunkedResponseProducer: credit-based, queue of 2)
//!     → http::writer pulls chunks and frames them on the wire
//!     → writer closes the producer: subscription cancelled once
//! ```
//!
//! # Design Decisions
//! - Push on the publisher side, pull on the writer side
//! - Memory per streaming response is bounded by two chunks
//! - A poisoned lock is recovered; the state it guards stays consistent
//!   because no callback runs while it is held

pub mod producer;
pub mod publisher;

use std::sync::{Mutex, MutexGuard, PoisonError};

pub use producer::{ChunkedResponseProducer, ProducerError, ProducerState};
pub use publisher::{
    IterPublisher, Publisher, ReaderPublisher, StreamPublisher, Subscriber, Subscription,
};

pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
