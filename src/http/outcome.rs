//! Application-level response descriptors.
//!
//! # Responsibilities
//! - Model a response header (version, status, headers, cookies)
//! - Model exactly one body representation per response
//! - Build the responses the server synthesizes itself (400, 413, 500, 503)
//!
//! # Design Decisions
//! - Body kinds form a closed enum; the writer matches exhaustively
//! - Framing headers (`Content-Length`, `Transfer-Encoding`) are the writer's
//!   business, whatever the application sets

use std::fmt;

use bytes::Bytes;
use http::header::{CONNECTION, CONTENT_TYPE};
use http::{HeaderMap, HeaderName, HeaderValue, StatusCode, Version};
use tokio::io::AsyncRead;

use crate::http::request::is_keep_alive;
use crate::reactive::{Publisher, ReaderPublisher};

/// Trailer carrying the byte count of a chunked response.
pub const X_WERVAL_CONTENT_LENGTH: HeaderName = HeaderName::from_static("x-werval-content-length");

/// Response cookie, written as one `Set-Cookie` header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cookie {
    pub name: String,
    pub value: String,
    pub path: Option<String>,
    pub domain: Option<String>,
    pub max_age: Option<i64>,
    pub secure: bool,
    pub http_only: bool,
}

impl Cookie {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
            path: None,
            domain: None,
            max_age: None,
            secure: false,
            http_only: false,
        }
    }

    pub fn path(mut self, path: impl Into<String>) -> Self {
        self.path = Some(path.into());
        self
    }

    pub fn domain(mut self, domain: impl Into<String>) -> Self {
        self.domain = Some(domain.into());
        self
    }

    pub fn max_age(mut self, seconds: i64) -> Self {
        self.max_age = Some(seconds);
        self
    }

    pub fn secure(mut self) -> Self {
        self.secure = true;
        self
    }

    pub fn http_only(mut self) -> Self {
        self.http_only = true;
        self
    }
}

impl fmt::Display for Cookie {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}={}", self.name, self.value)?;
        if let Some(path) = &self.path {
            write!(f, "; Path={}", path)?;
        }
        if let Some(domain) = &self.domain {
            write!(f, "; Domain={}", domain)?;
        }
        if let Some(max_age) = self.max_age {
            write!(f, "; Max-Age={}", max_age)?;
        }
        if self.secure {
            f.write_str("; Secure")?;
        }
        if self.http_only {
            f.write_str("; HttpOnly")?;
        }
        Ok(())
    }
}

/// Status line, headers and cookies of an outcome.
#[derive(Debug, Clone)]
pub struct ResponseHeader {
    pub version: Version,
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub cookies: Vec<Cookie>,
}

impl ResponseHeader {
    pub fn new(version: Version, status: StatusCode) -> Self {
        Self {
            version,
            status,
            headers: HeaderMap::new(),
            cookies: Vec::new(),
        }
    }

    /// Whether the connection may stay open once this response is written.
    pub fn is_keep_alive(&self) -> bool {
        is_keep_alive(self.version, &self.headers)
    }
}

/// Body representation of an outcome.
pub enum OutcomeBody {
    /// No body at all.
    Empty,
    /// Bytes already in memory.
    Simple(Bytes),
    /// A reader producing exactly `content_length` bytes.
    Stream {
        reader: Box<dyn AsyncRead + Send + Unpin>,
        content_length: u64,
    },
    /// A publisher streamed with chunked transfer encoding.
    Chunked {
        publisher: Box<dyn Publisher>,
        chunk_size: usize,
    },
}

impl fmt::Debug for OutcomeBody {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OutcomeBody::Empty => f.write_str("Empty"),
            OutcomeBody::Simple(bytes) => f.debug_tuple("Simple").field(&bytes.len()).finish(),
            OutcomeBody::Stream { content_length, .. } => f
                .debug_struct("Stream")
                .field("content_length", content_length)
                .finish_non_exhaustive(),
            OutcomeBody::Chunked { chunk_size, .. } => f
                .debug_struct("Chunked")
                .field("chunk_size", chunk_size)
                .finish_non_exhaustive(),
        }
    }
}

/// Complete description of a response, frozen once handed to the writer.
#[derive(Debug)]
pub struct Outcome {
    pub header: ResponseHeader,
    pub body: OutcomeBody,
}

impl Outcome {
    /// An HTTP/1.1 outcome without a body.
    pub fn new(status: StatusCode) -> Self {
        Self {
            header: ResponseHeader::new(Version::HTTP_11, status),
            body: OutcomeBody::Empty,
        }
    }

    pub fn simple(status: StatusCode, body: impl Into<Bytes>) -> Self {
        Self {
            body: OutcomeBody::Simple(body.into()),
            ..Self::new(status)
        }
    }

    /// A `text/plain; charset=utf-8` outcome.
    pub fn text(status: StatusCode, body: impl Into<String>) -> Self {
        Self::simple(status, body.into()).with_header(
            CONTENT_TYPE,
            HeaderValue::from_static("text/plain; charset=utf-8"),
        )
    }

    /// A body read from `reader`, which must yield exactly `content_length` bytes.
    pub fn stream<R>(status: StatusCode, reader: R, content_length: u64) -> Self
    where
        R: AsyncRead + Send + Unpin + 'static,
    {
        Self {
            body: OutcomeBody::Stream {
                reader: Box::new(reader),
                content_length,
            },
            ..Self::new(status)
        }
    }

    /// A chunked body pulled from `publisher`; chunks larger than
    /// `chunk_size` are split on the wire.
    pub fn chunked<P>(status: StatusCode, publisher: P, chunk_size: usize) -> Self
    where
        P: Publisher + 'static,
    {
        Self {
            body: OutcomeBody::Chunked {
                publisher: Box::new(publisher),
                chunk_size,
            },
            ..Self::new(status)
        }
    }

    /// A chunked body read from `reader` in `chunk_size` pieces.
    pub fn chunked_reader<R>(status: StatusCode, reader: R, chunk_size: usize) -> Self
    where
        R: AsyncRead + Send + Unpin + 'static,
    {
        Self::chunked(status, ReaderPublisher::new(reader, chunk_size), chunk_size)
    }

    pub fn with_version(mut self, version: Version) -> Self {
        self.header.version = version;
        self
    }

    pub fn with_header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.header.headers.append(name, value);
        self
    }

    pub fn with_cookie(mut self, cookie: Cookie) -> Self {
        self.header.cookies.push(cookie);
        self
    }

    pub fn status(&self) -> StatusCode {
        self.header.status
    }

    /// `413` sent when a request body exceeds `max` bytes.
    pub fn entity_too_large(max: u64) -> Self {
        Self::simple(
            StatusCode::PAYLOAD_TOO_LARGE,
            format!("HTTP content length exceeded {} bytes.", max),
        )
        .with_header(CONTENT_TYPE, HeaderValue::from_static("text/plain; charset=us-ascii"))
        .closing()
    }

    /// `400` sent when request framing cannot be decoded.
    pub fn bad_request() -> Self {
        Self::new(StatusCode::BAD_REQUEST).closing()
    }

    /// `500` used when the application fails without a better answer.
    pub fn internal_error(version: Version) -> Self {
        Self::text(StatusCode::INTERNAL_SERVER_ERROR, "Internal Server Error").with_version(version)
    }

    /// `503` answered to requests that arrive while shutting down.
    pub fn service_unavailable(version: Version) -> Self {
        Self::text(StatusCode::SERVICE_UNAVAILABLE, "Service is shutting down")
            .with_version(version)
            .closing()
    }

    fn closing(self) -> Self {
        self.with_header(CONNECTION, HeaderValue::from_static("close"))
    }
}
