//! Timeout enforcement.
//!
//! # Responsibilities
//! - Bound every socket read by the idle read timeout
//! - Bound every socket write by the write timeout
//!
//! # Design Decisions
//! - Uses Tokio's timeout facilities
//! - Timeout errors are distinct from other errors
//! - A timed-out connection is closed, never answered

use std::future::Future;
use std::time::Duration;

use thiserror::Error;
use tokio::io::{AsyncWrite, AsyncWriteExt};

/// Which side of the connection ran out of time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum TimeoutError {
    #[error("read timed out after {0:?}")]
    Read(Duration),
    #[error("write timed out after {0:?}")]
    Write(Duration),
}

/// Run a read operation, failing with [`TimeoutError::Read`] once `limit` elapses.
pub async fn read_within<F, T>(limit: Duration, fut: F) -> Result<T, TimeoutError>
where
    F: Future<Output = T>,
{
    tokio::time::timeout(limit, fut)
        .await
        .map_err(|_| TimeoutError::Read(limit))
}

/// Write all of `bytes` and flush, failing with [`TimeoutError::Write`] once `limit` elapses.
pub async fn write_all_within<W>(
    io: &mut W,
    bytes: &[u8],
    limit: Duration,
) -> Result<std::io::Result<()>, TimeoutError>
where
    W: AsyncWrite + Unpin + ?Sized,
{
    tokio::time::timeout(limit, async {
        io.write_all(bytes).await?;
        io.flush().await
    })
    .await
    .map_err(|_| TimeoutError::Write(limit))
}
