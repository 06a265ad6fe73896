//! Outcome to wire translation.
//!
//! # Responsibilities
//! - Choose `Content-Length` or `Transfer-Encoding: chunked` per body kind
//! - Stream chunked bodies through a [`ChunkedResponseProducer`]
//! - Decide whether the connection closes after the response
//! - Bound every socket write by the write timeout
//! - Answer `HEAD` with the head alone
//!
//! # Design Decisions
//! - The two framings are mutually exclusive; application-set framing
//!   headers are dropped
//! - Sized bodies go out as one frame with their head
//! - A failing chunk source aborts the response mid-stream; the caller closes

use std::io;
use std::time::Duration;

use bytes::BytesMut;
use http::header::{CONNECTION, CONTENT_LENGTH, SET_COOKIE, TRAILER, TRANSFER_ENCODING};
use http::{HeaderMap, HeaderValue, StatusCode};
use thiserror::Error;
use tokio::io::{AsyncReadExt, AsyncWrite};

use crate::http::encoder::{encode_chunk, encode_head, encode_last_chunk};
use crate::http::outcome::{Outcome, OutcomeBody, X_WERVAL_CONTENT_LENGTH};
use crate::reactive::{ChunkedResponseProducer, ProducerError};
use crate::resilience::timeouts::{write_all_within, TimeoutError};

/// Failure while writing a response.
#[derive(Debug, Error)]
pub enum WriteError {
    /// The socket or the body reader failed.
    #[error("I/O error while writing response: {0}")]
    Io(#[from] io::Error),

    /// A single write exceeded the write timeout.
    #[error(transparent)]
    Timeout(#[from] TimeoutError),

    /// The chunked body source failed or broke its contract.
    #[error("chunked response aborted: {0}")]
    Stream(#[from] ProducerError),

    /// A sized body produced fewer bytes than declared.
    #[error("response body ended after {actual} of {expected} declared bytes")]
    ShortBody { expected: u64, actual: u64 },
}

/// What was written.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WriteSummary {
    pub status: StatusCode,
    pub body_bytes: u64,
    /// The connection must be closed now.
    pub close: bool,
}

/// Writes outcomes to a connection.
#[derive(Debug, Clone)]
pub struct OutcomeWriter {
    write_timeout: Duration,
}

impl OutcomeWriter {
    pub fn new(write_timeout: Duration) -> Self {
        Self { write_timeout }
    }

    /// Write `outcome` to `io`. `force_close` closes the connection even if
    /// the response would keep it alive.
    pub async fn write<W>(
        &self,
        io: &mut W,
        outcome: Outcome,
        force_close: bool,
    ) -> Result<WriteSummary, WriteError>
    where
        W: AsyncWrite + Unpin + ?Sized,
    {
        self.write_framed(io, outcome, force_close, false).await
    }

    /// Answer a `HEAD` request: the head `outcome` would have, no body.
    /// Stream bodies are never read and chunked publishers never subscribed.
    pub async fn write_head<W>(
        &self,
        io: &mut W,
        outcome: Outcome,
        force_close: bool,
    ) -> Result<WriteSummary, WriteError>
    where
        W: AsyncWrite + Unpin + ?Sized,
    {
        self.write_framed(io, outcome, force_close, true).await
    }

    async fn write_framed<W>(
        &self,
        io: &mut W,
        outcome: Outcome,
        force_close: bool,
        head_only: bool,
    ) -> Result<WriteSummary, WriteError>
    where
        W: AsyncWrite + Unpin + ?Sized,
    {
        let Outcome { header, body } = outcome;
        let close = force_close || !header.is_keep_alive();
        let status = header.status;

        let mut headers = header.headers;
        headers.remove(CONTENT_LENGTH);
        headers.remove(TRANSFER_ENCODING);
        for cookie in &header.cookies {
            match HeaderValue::from_str(&cookie.to_string()) {
                Ok(value) => {
                    headers.append(SET_COOKIE, value);
                }
                Err(_) => tracing::warn!(cookie = %cookie.name, "Cookie is not a valid header value, skipped"),
            }
        }
        if close && !has_close_token(&headers) {
            headers.insert(CONNECTION, HeaderValue::from_static("close"));
        }

        let mut buf = BytesMut::new();
        let body_bytes = match body {
            OutcomeBody::Empty => {
                tracing::trace!(status = %status, "Outcome without body");
                if status_allows_length(status) {
                    headers.insert(CONTENT_LENGTH, HeaderValue::from(0u64));
                }
                encode_head(header.version, status, &headers, &mut buf);
                self.send(io, &buf).await?;
                0
            }
            OutcomeBody::Simple(bytes) => {
                headers.insert(CONTENT_LENGTH, HeaderValue::from(bytes.len()));
                encode_head(header.version, status, &headers, &mut buf);
                if head_only {
                    self.send(io, &buf).await?;
                    return Ok(WriteSummary { status, body_bytes: 0, close });
                }
                buf.extend_from_slice(&bytes);
                self.send(io, &buf).await?;
                bytes.len() as u64
            }
            OutcomeBody::Stream { content_length, .. } if head_only => {
                headers.insert(CONTENT_LENGTH, HeaderValue::from(content_length));
                encode_head(header.version, status, &headers, &mut buf);
                self.send(io, &buf).await?;
                0
            }
            OutcomeBody::Stream {
                reader,
                content_length,
            } => {
                let mut content = Vec::with_capacity(content_length.min(64 * 1024) as usize);
                let actual = reader.take(content_length).read_to_end(&mut content).await? as u64;
                if actual != content_length {
                    return Err(WriteError::ShortBody {
                        expected: content_length,
                        actual,
                    });
                }
                headers.insert(CONTENT_LENGTH, HeaderValue::from(content_length));
                encode_head(header.version, status, &headers, &mut buf);
                buf.extend_from_slice(&content);
                self.send(io, &buf).await?;
                content_length
            }
            OutcomeBody::Chunked {
                publisher,
                chunk_size,
            } => {
                headers.insert(TRANSFER_ENCODING, HeaderValue::from_static("chunked"));
                headers.insert(TRAILER, HeaderValue::from_static("X-Werval-Content-Length"));
                encode_head(header.version, status, &headers, &mut buf);
                self.send(io, &buf).await?;
                if head_only {
                    drop(publisher);
                    return Ok(WriteSummary { status, body_bytes: 0, close });
                }

                let producer = ChunkedResponseProducer::subscribe(publisher);
                let streamed = self.stream_chunks(io, &producer, chunk_size.max(1)).await;
                producer.close();
                streamed?
            }
        };

        Ok(WriteSummary {
            status,
            body_bytes,
            close,
        })
    }

    async fn stream_chunks<W>(
        &self,
        io: &mut W,
        producer: &ChunkedResponseProducer,
        chunk_size: usize,
    ) -> Result<u64, WriteError>
    where
        W: AsyncWrite + Unpin + ?Sized,
    {
        let mut total = 0u64;
        let mut buf = BytesMut::new();
        loop {
            match producer.read_chunk()? {
                Some(chunk) => {
                    buf.clear();
                    for piece in chunk.chunks(chunk_size) {
                        encode_chunk(piece, &mut buf);
                    }
                    if !buf.is_empty() {
                        self.send(io, &buf).await?;
                    }
                    total += chunk.len() as u64;
                }
                None => {
                    if producer.is_end_of_input()? {
                        break;
                    }
                    producer.ready().await;
                }
            }
        }

        let mut trailers = HeaderMap::new();
        trailers.insert(X_WERVAL_CONTENT_LENGTH, HeaderValue::from(total));
        buf.clear();
        encode_last_chunk(&trailers, &mut buf);
        self.send(io, &buf).await?;
        Ok(total)
    }

    async fn send<W>(&self, io: &mut W, bytes: &[u8]) -> Result<(), WriteError>
    where
        W: AsyncWrite + Unpin + ?Sized,
    {
        write_all_within(io, bytes, self.write_timeout).await??;
        Ok(())
    }
}

fn has_close_token(headers: &HeaderMap) -> bool {
    headers.get_all(CONNECTION).iter().any(|value| {
        value
            .to_str()
            .map(|v| v.split(',').any(|t| t.trim().eq_ignore_ascii_case("close")))
            .unwrap_or(false)
    })
}

/// 1xx, 204 and 304 responses never carry a `Content-Length` of their own.
fn status_allows_length(status: StatusCode) -> bool {
    !(status.is_informational()
        || status == StatusCode::NO_CONTENT
        || status == StatusCode::NOT_MODIFIED)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::outcome::Cookie;
    use crate::reactive::IterPublisher;
    use bytes::Bytes;
    use http::header::CONTENT_TYPE;
    use http::Version;

    fn writer() -> OutcomeWriter {
        OutcomeWriter::new(Duration::from_secs(5))
    }

    async fn render(outcome: Outcome, force_close: bool) -> (String, WriteSummary) {
        let mut out = Vec::new();
        let summary = writer().write(&mut out, outcome, force_close).await.unwrap();
        (String::from_utf8(out).unwrap(), summary)
    }

    fn iter(items: &[&'static str]) -> IterPublisher<std::vec::IntoIter<Result<Bytes, io::Error>>> {
        IterPublisher::new(
            items
                .iter()
                .map(|s| Ok(Bytes::from_static(s.as_bytes())))
                .collect::<Vec<_>>(),
        )
    }

    #[tokio::test]
    async fn simple_body_has_exact_content_length() {
        let (wire, summary) = render(Outcome::simple(StatusCode::OK, "hello"), false).await;
        assert_eq!(wire, "HTTP/1.1 200 OK\r\ncontent-length: 5\r\n\r\nhello");
        assert_eq!(summary.body_bytes, 5);
        assert!(!summary.close);
    }

    #[tokio::test]
    async fn application_framing_headers_are_replaced() {
        let outcome = Outcome::simple(StatusCode::OK, "abc")
            .with_header(CONTENT_LENGTH, HeaderValue::from_static("999"))
            .with_header(TRANSFER_ENCODING, HeaderValue::from_static("chunked"));
        let (wire, _) = render(outcome, false).await;
        assert!(wire.contains("content-length: 3\r\n"));
        assert!(!wire.contains("999"));
        assert!(!wire.contains("transfer-encoding"));
    }

    #[tokio::test]
    async fn empty_body_declares_zero_length() {
        let (wire, _) = render(Outcome::new(StatusCode::ACCEPTED), false).await;
        assert_eq!(wire, "HTTP/1.1 202 Accepted\r\ncontent-length: 0\r\n\r\n");

        let (wire, _) = render(Outcome::new(StatusCode::NO_CONTENT), false).await;
        assert_eq!(wire, "HTTP/1.1 204 No Content\r\n\r\n");
    }

    #[tokio::test]
    async fn forced_close_adds_connection_header() {
        let (wire, summary) = render(Outcome::simple(StatusCode::OK, ""), true).await;
        assert!(summary.close);
        assert!(wire.contains("connection: close\r\n"));
    }

    #[tokio::test]
    async fn http10_response_closes_by_default() {
        let outcome = Outcome::simple(StatusCode::OK, "x").with_version(Version::HTTP_10);
        let (wire, summary) = render(outcome, false).await;
        assert!(summary.close);
        assert!(wire.starts_with("HTTP/1.0 200 OK\r\n"));
    }

    #[tokio::test]
    async fn cookies_become_set_cookie_headers() {
        let outcome = Outcome::simple(StatusCode::OK, "")
            .with_cookie(Cookie::new("a", "1"))
            .with_cookie(Cookie::new("b", "2").http_only());
        let (wire, _) = render(outcome, false).await;
        assert!(wire.contains("set-cookie: a=1\r\n"));
        assert!(wire.contains("set-cookie: b=2; HttpOnly\r\n"));
    }

    #[tokio::test]
    async fn stream_body_reads_declared_length() {
        let reader = std::io::Cursor::new(b"hello world".to_vec());
        let outcome = Outcome::stream(StatusCode::OK, reader, 5)
            .with_header(CONTENT_TYPE, HeaderValue::from_static("text/plain"));
        let (wire, summary) = render(outcome, false).await;
        assert!(wire.contains("content-length: 5\r\n"));
        assert!(wire.ends_with("\r\n\r\nhello"));
        assert_eq!(summary.body_bytes, 5);
    }

    #[tokio::test]
    async fn short_stream_body_is_an_error() {
        let reader = std::io::Cursor::new(b"abc".to_vec());
        let mut out = Vec::new();
        let result = writer()
            .write(&mut out, Outcome::stream(StatusCode::OK, reader, 10), false)
            .await;
        assert!(matches!(
            result,
            Err(WriteError::ShortBody {
                expected: 10,
                actual: 3
            })
        ));
        assert!(out.is_empty());
    }

    #[tokio::test]
    async fn chunked_body_ends_with_length_trailer() {
        let outcome = Outcome::chunked(StatusCode::OK, iter(&["hello ", "world"]), 1024);
        let (wire, summary) = render(outcome, false).await;
        assert!(wire.contains("transfer-encoding: chunked\r\n"));
        assert!(wire.contains("trailer: X-Werval-Content-Length\r\n"));
        assert!(!wire.contains("content-length: "));
        assert!(wire.ends_with(
            "\r\n\r\n6\r\nhello \r\n5\r\nworld\r\n0\r\nx-werval-content-length: 11\r\n\r\n"
        ));
        assert_eq!(summary.body_bytes, 11);
    }

    #[tokio::test]
    async fn large_chunks_are_split() {
        let outcome = Outcome::chunked(StatusCode::OK, iter(&["abcde"]), 2);
        let (wire, _) = render(outcome, false).await;
        assert!(wire.ends_with("2\r\nab\r\n2\r\ncd\r\n1\r\ne\r\n0\r\nx-werval-content-length: 5\r\n\r\n"));
    }

    #[tokio::test]
    async fn chunked_reader_outcome_streams_reader() {
        let reader = std::io::Cursor::new(b"0123456789".to_vec());
        let outcome = Outcome::chunked_reader(StatusCode::OK, reader, 4);
        let (wire, summary) = render(outcome, false).await;
        assert!(wire.ends_with("4\r\n0123\r\n4\r\n4567\r\n2\r\n89\r\n0\r\nx-werval-content-length: 10\r\n\r\n"));
        assert_eq!(summary.body_bytes, 10);
    }

    #[tokio::test]
    async fn failing_chunk_source_aborts() {
        let items: Vec<Result<Bytes, io::Error>> = vec![
            Ok(Bytes::from_static(b"partial")),
            Err(io::Error::new(io::ErrorKind::Other, "gone")),
        ];
        let outcome = Outcome::chunked(StatusCode::OK, IterPublisher::new(items), 1024);
        let mut out = Vec::new();
        let result = writer().write(&mut out, outcome, false).await;
        assert!(matches!(result, Err(WriteError::Stream(ProducerError::Upstream(_)))));
        let wire = String::from_utf8(out).unwrap();
        assert!(wire.ends_with("7\r\npartial\r\n"));
    }

    #[tokio::test]
    async fn head_keeps_length_and_drops_body() {
        let mut out = Vec::new();
        let summary = writer()
            .write_head(&mut out, Outcome::simple(StatusCode::OK, "hello"), false)
            .await
            .unwrap();
        assert_eq!(
            String::from_utf8(out).unwrap(),
            "HTTP/1.1 200 OK\r\ncontent-length: 5\r\n\r\n"
        );
        assert_eq!(summary.body_bytes, 0);
        assert!(!summary.close);
    }

    #[tokio::test]
    async fn head_never_reads_stream_or_chunk_sources() {
        let reader = std::io::Cursor::new(b"abc".to_vec());
        let mut out = Vec::new();
        writer()
            .write_head(&mut out, Outcome::stream(StatusCode::OK, reader, 10), false)
            .await
            .unwrap();
        let wire = String::from_utf8(out).unwrap();
        assert!(wire.ends_with("content-length: 10\r\n\r\n"));

        let items: Vec<Result<Bytes, io::Error>> =
            vec![Err(io::Error::new(io::ErrorKind::Other, "must not be pulled"))];
        let outcome = Outcome::chunked(StatusCode::OK, IterPublisher::new(items), 1024);
        let mut out = Vec::new();
        let summary = writer().write_head(&mut out, outcome, false).await.unwrap();
        let wire = String::from_utf8(out).unwrap();
        assert!(wire.contains("transfer-encoding: chunked\r\n"));
        assert!(wire.ends_with("\r\n\r\n"));
        assert!(!wire.contains("\r\n0\r\n"));
        assert_eq!(summary.body_bytes, 0);
    }
}
