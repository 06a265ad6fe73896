//! Low-level wire logging.
//!
//! Wraps a connection stream and logs every byte slice read or written at
//! `trace` level on the `werval_http::wire` target, tagged with the
//! connection id. Enabled by `observability.low_level_wire_logging`.

use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};

use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};

use crate::net::connection::ConnectionId;

/// A stream whose traffic is logged.
#[derive(Debug)]
pub struct WireLogged<S> {
    inner: S,
    connection_id: ConnectionId,
}

impl<S> WireLogged<S> {
    pub fn new(inner: S, connection_id: ConnectionId) -> Self {
        Self {
            inner,
            connection_id,
        }
    }

    pub fn into_inner(self) -> S {
        self.inner
    }
}

fn printable(bytes: &[u8]) -> String {
    bytes.escape_ascii().to_string()
}

impl<S: AsyncRead + Unpin> AsyncRead for WireLogged<S> {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let before = buf.filled().len();
        let result = Pin::new(&mut self.inner).poll_read(cx, buf);
        if let Poll::Ready(Ok(())) = &result {
            let read = &buf.filled()[before..];
            if read.is_empty() {
                tracing::trace!(target: "werval_http::wire", connection_id = %self.connection_id, "READ EOF");
            } else {
                tracing::trace!(
                    target: "werval_http::wire",
                    connection_id = %self.connection_id,
                    len = read.len(),
                    "READ {}",
                    printable(read)
                );
            }
        }
        result
    }
}

impl<S: AsyncWrite + Unpin> AsyncWrite for WireLogged<S> {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        let result = Pin::new(&mut self.inner).poll_write(cx, buf);
        if let Poll::Ready(Ok(written)) = &result {
            tracing::trace!(
                target: "werval_http::wire",
                connection_id = %self.connection_id,
                len = *written,
                "WRITE {}",
                printable(&buf[..*written])
            );
        }
        result
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.inner).poll_flush(cx)
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        tracing::trace!(target: "werval_http::wire", connection_id = %self.connection_id, "SHUTDOWN");
        Pin::new(&mut self.inner).poll_shutdown(cx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    #[tokio::test]
    async fn passes_traffic_through_unchanged() {
        let (client, server) = tokio::io::duplex(64);
        let mut logged = WireLogged::new(server, ConnectionId::new());
        let mut client = client;

        client.write_all(b"GET / HTTP/1.1\r\n").await.unwrap();
        let mut buf = [0u8; 16];
        logged.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"GET / HTTP/1.1\r\n");

        logged.write_all(b"pong").await.unwrap();
        logged.flush().await.unwrap();
        let mut reply = [0u8; 4];
        client.read_exact(&mut reply).await.unwrap();
        assert_eq!(&reply, b"pong");
    }

    #[test]
    fn control_bytes_are_escaped() {
        assert_eq!(printable(b"a\r\n"), "a\\r\\n");
    }
}
