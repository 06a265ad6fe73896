//! Reactive-streams style publisher contract and adapters.
//!
//! # Responsibilities
//! - Define the `Publisher` / `Subscriber` / `Subscription` triple
//! - Adapt iterators, async streams and async readers into publishers
//!
//! # Design Decisions
//! - `on_subscribe` runs synchronously inside `subscribe`
//! - Subscriber callbacks never run while an adapter holds its own lock,
//!   so a subscriber may call back into its subscription
//! - Nothing is emitted without demand

use std::io;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use bytes::{Bytes, BytesMut};
use futures_util::stream::{self, BoxStream, Stream, StreamExt};
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::sync::Notify;

use crate::reactive::lock;
use crate::BoxError;

/// Handle a subscriber uses to signal demand or stop the flow.
pub trait Subscription: Send + Sync {
    /// Allow `n` more items to be delivered.
    fn request(&self, n: u64);
    /// Stop delivering items and release resources.
    fn cancel(&self);
}

/// Receiver of a publisher's signals.
pub trait Subscriber: Send + Sync {
    fn on_subscribe(&self, subscription: Arc<dyn Subscription>);
    fn on_next(&self, chunk: Bytes);
    fn on_error(&self, error: BoxError);
    fn on_complete(&self);
}

/// Push-based source of byte chunks.
pub trait Publisher: Send {
    fn subscribe(self: Box<Self>, subscriber: Arc<dyn Subscriber>);
}

/// Publishes items of an iterator on the thread that requests them.
///
/// Completion is signalled together with the last item, without waiting
/// for demand beyond it.
pub struct IterPublisher<I> {
    iter: I,
}

impl<I, E> IterPublisher<I>
where
    I: Iterator<Item = Result<Bytes, E>> + Send + 'static,
    E: Into<BoxError> + Send + 'static,
{
    pub fn new(iter: impl IntoIterator<IntoIter = I>) -> Self {
        Self {
            iter: iter.into_iter(),
        }
    }
}

impl<I, E> Publisher for IterPublisher<I>
where
    I: Iterator<Item = Result<Bytes, E>> + Send + 'static,
    E: Into<BoxError> + Send + 'static,
{
    fn subscribe(self: Box<Self>, subscriber: Arc<dyn Subscriber>) {
        let mut iter = self.iter.peekable();
        let exhausted = iter.peek().is_none();
        let subscription = Arc::new(IterSubscription {
            state: Mutex::new(IterState {
                iter: Some(iter),
                subscriber: Some(Arc::clone(&subscriber)),
                demand: 0,
                emitting: false,
            }),
        });
        subscriber.on_subscribe(subscription.clone());
        if exhausted {
            if let Some(subscriber) = subscription.terminate() {
                subscriber.on_complete();
            }
        }
    }
}

struct IterState<I: Iterator> {
    iter: Option<std::iter::Peekable<I>>,
    subscriber: Option<Arc<dyn Subscriber>>,
    demand: u64,
    emitting: bool,
}

struct IterSubscription<I: Iterator> {
    state: Mutex<IterState<I>>,
}

enum Signal {
    Next(Arc<dyn Subscriber>, Bytes, bool),
    Error(Arc<dyn Subscriber>, BoxError),
    Complete(Arc<dyn Subscriber>),
}

impl<I: Iterator> IterSubscription<I> {
    fn terminate(&self) -> Option<Arc<dyn Subscriber>> {
        let mut state = lock(&self.state);
        state.iter = None;
        state.subscriber.take()
    }
}

impl<I, E> Subscription for IterSubscription<I>
where
    I: Iterator<Item = Result<Bytes, E>> + Send,
    E: Into<BoxError> + Send,
{
    fn request(&self, n: u64) {
        {
            let mut state = lock(&self.state);
            if state.subscriber.is_none() {
                return;
            }
            state.demand = state.demand.saturating_add(n);
            // A request issued from inside on_next is served by the outer loop.
            if state.emitting {
                return;
            }
            state.emitting = true;
        }

        loop {
            let signal = {
                let mut state = lock(&self.state);
                if state.demand == 0 || state.subscriber.is_none() {
                    state.emitting = false;
                    return;
                }
                let Some(iter) = state.iter.as_mut() else {
                    state.emitting = false;
                    return;
                };
                match iter.next() {
                    Some(Ok(chunk)) => {
                        let last = iter.peek().is_none();
                        state.demand -= 1;
                        let subscriber = if last {
                            state.iter = None;
                            state.subscriber.take()
                        } else {
                            state.subscriber.clone()
                        };
                        match subscriber {
                            Some(subscriber) => Signal::Next(subscriber, chunk, last),
                            None => return,
                        }
                    }
                    Some(Err(error)) => {
                        state.iter = None;
                        match state.subscriber.take() {
                            Some(subscriber) => Signal::Error(subscriber, error.into()),
                            None => return,
                        }
                    }
                    None => {
                        state.iter = None;
                        match state.subscriber.take() {
                            Some(subscriber) => Signal::Complete(subscriber),
                            None => return,
                        }
                    }
                }
            };

            match signal {
                Signal::Next(subscriber, chunk, last) => {
                    subscriber.on_next(chunk);
                    if last {
                        subscriber.on_complete();
                        return;
                    }
                }
                Signal::Error(subscriber, error) => {
                    subscriber.on_error(error);
                    return;
                }
                Signal::Complete(subscriber) => {
                    subscriber.on_complete();
                    return;
                }
            }
        }
    }

    fn cancel(&self) {
        self.terminate();
    }
}

/// Publishes the items of an async stream from a Tokio task.
///
/// Must be subscribed from within a Tokio runtime.
pub struct StreamPublisher<S> {
    stream: S,
}

impl<S, E> StreamPublisher<S>
where
    S: Stream<Item = Result<Bytes, E>> + Send + 'static,
    E: Into<BoxError> + Send + 'static,
{
    pub fn new(stream: S) -> Self {
        Self { stream }
    }
}

struct StreamSubscription {
    demand: AtomicU64,
    cancelled: AtomicBool,
    wake: Notify,
}

impl Subscription for StreamSubscription {
    fn request(&self, n: u64) {
        self.demand.fetch_add(n, Ordering::AcqRel);
        self.wake.notify_one();
    }

    fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
        self.wake.notify_one();
    }
}

impl<S, E> Publisher for StreamPublisher<S>
where
    S: Stream<Item = Result<Bytes, E>> + Send + 'static,
    E: Into<BoxError> + Send + 'static,
{
    fn subscribe(self: Box<Self>, subscriber: Arc<dyn Subscriber>) {
        let subscription = Arc::new(StreamSubscription {
            demand: AtomicU64::new(0),
            cancelled: AtomicBool::new(false),
            wake: Notify::new(),
        });
        subscriber.on_subscribe(subscription.clone());

        let stream = self.stream;
        tokio::spawn(async move {
            let mut stream = std::pin::pin!(stream);
            loop {
                while subscription.demand.load(Ordering::Acquire) == 0 {
                    if subscription.cancelled.load(Ordering::Acquire) {
                        return;
                    }
                    subscription.wake.notified().await;
                }
                if subscription.cancelled.load(Ordering::Acquire) {
                    return;
                }
                // A stalled source must not outlive a cancel.
                let next = tokio::select! {
                    next = stream.next() => next,
                    _ = subscription.wake.notified() => continue,
                };
                match next {
                    Some(Ok(chunk)) => {
                        if subscription.cancelled.load(Ordering::Acquire) {
                            return;
                        }
                        subscription.demand.fetch_sub(1, Ordering::AcqRel);
                        subscriber.on_next(chunk);
                    }
                    Some(Err(error)) => {
                        subscriber.on_error(error.into());
                        return;
                    }
                    None => {
                        subscriber.on_complete();
                        return;
                    }
                }
            }
        });
    }
}

/// Publishes the content of an async reader in pieces of `chunk_size` bytes.
pub struct ReaderPublisher {
    inner: StreamPublisher<BoxStream<'static, io::Result<Bytes>>>,
}

impl ReaderPublisher {
    pub fn new<R>(reader: R, chunk_size: usize) -> Self
    where
        R: AsyncRead + Send + Unpin + 'static,
    {
        let chunk_size = chunk_size.max(1);
        let chunks = stream::unfold(Some(reader), move |reader| async move {
            let mut reader = reader?;
            let mut buf = BytesMut::with_capacity(chunk_size);
            match (&mut reader).take(chunk_size as u64).read_buf(&mut buf).await {
                Ok(0) => None,
                Ok(_) => Some((Ok(buf.freeze()), Some(reader))),
                Err(e) => Some((Err(e), None)),
            }
        });
        Self {
            inner: StreamPublisher::new(chunks.boxed()),
        }
    }
}

impl Publisher for ReaderPublisher {
    fn subscribe(self: Box<Self>, subscriber: Arc<dyn Subscriber>) {
        Box::new(self.inner).subscribe(subscriber);
    }
}
