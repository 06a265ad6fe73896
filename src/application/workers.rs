//! Worker pool running application handlers.
//!
//! # Responsibilities
//! - Run handler futures away from connection tasks
//! - Build a dedicated fixed-size runtime, or share the ambient one
//!
//! # Design Decisions
//! - Connection tasks await the `JoinHandle`, so responses are still written
//!   by the task owning the connection
//! - An owned runtime shuts down in the background when the last clone drops

use std::future::Future;
use std::num::NonZeroUsize;
use std::sync::Arc;

use thiserror::Error;
use tokio::runtime::{Builder, Handle, Runtime, TryCurrentError};
use tokio::task::JoinHandle;

use crate::config::{WorkerPoolConfig, WorkerPoolKind};

/// Error type for worker pool construction.
#[derive(Debug, Error)]
pub enum WorkerPoolError {
    /// A shared pool was requested outside of a Tokio runtime.
    #[error("no Tokio runtime to share: {0}")]
    NoRuntime(#[from] TryCurrentError),

    /// The dedicated runtime could not be started.
    #[error("failed to build worker runtime: {0}")]
    Build(#[source] std::io::Error),
}

#[derive(Debug)]
struct OwnedRuntime(Option<Runtime>);

impl Drop for OwnedRuntime {
    fn drop(&mut self) {
        if let Some(runtime) = self.0.take() {
            runtime.shutdown_background();
        }
    }
}

/// Handle to the runtime application handlers are spawned on.
#[derive(Debug, Clone)]
pub struct WorkerPool {
    handle: Handle,
    kind: WorkerPoolKind,
    threads: Option<usize>,
    _owned: Option<Arc<OwnedRuntime>>,
}

impl WorkerPool {
    /// Build the pool described by `config`.
    pub fn from_config(config: &WorkerPoolConfig) -> Result<Self, WorkerPoolError> {
        match config.kind {
            WorkerPoolKind::WorkStealing => Self::current(),
            WorkerPoolKind::Fixed => {
                let threads = config.threads.unwrap_or_else(|| {
                    std::thread::available_parallelism()
                        .map(NonZeroUsize::get)
                        .unwrap_or(1)
                });
                Self::fixed(threads)
            }
        }
    }

    /// Share the runtime of the calling task.
    pub fn current() -> Result<Self, WorkerPoolError> {
        Ok(Self {
            handle: Handle::try_current()?,
            kind: WorkerPoolKind::WorkStealing,
            threads: None,
            _owned: None,
        })
    }

    /// Start a dedicated runtime with exactly `threads` workers.
    pub fn fixed(threads: usize) -> Result<Self, WorkerPoolError> {
        let threads = threads.max(1);
        let runtime = Builder::new_multi_thread()
            .worker_threads(threads)
            .thread_name("werval-worker")
            .enable_all()
            .build()
            .map_err(WorkerPoolError::Build)?;
        tracing::debug!(threads, "Fixed worker pool started");
        Ok(Self {
            handle: runtime.handle().clone(),
            kind: WorkerPoolKind::Fixed,
            threads: Some(threads),
            _owned: Some(Arc::new(OwnedRuntime(Some(runtime)))),
        })
    }

    pub fn kind(&self) -> WorkerPoolKind {
        self.kind
    }

    /// Worker thread count of a fixed pool.
    pub fn threads(&self) -> Option<usize> {
        self.threads
    }

    pub fn spawn<F>(&self, future: F) -> JoinHandle<F::Output>
    where
        F: Future + Send + 'static,
        F::Output: Send + 'static,
    {
        self.handle.spawn(future)
    }
}
