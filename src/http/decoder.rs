//! HTTP/1.1 request decoder.
//!
//! # Responsibilities
//! - Parse the request line and headers with `httparse`
//! - Frame the body by `Content-Length` or `Transfer-Encoding: chunked`
//! - Emit `Header`, `BodyChunk` and `LastBodyChunk` events in order
//! - Enforce head size and header count limits
//!
//! # Design Decisions
//! - Events are produced one at a time; the caller decides when to pull the next
//! - Body pieces never exceed the configured chunk size
//! - Any framing error poisons the decoder; the connection must be answered and closed

use bytes::{Buf, Bytes, BytesMut};
use http::header::{CONTENT_LENGTH, TRANSFER_ENCODING};
use http::{HeaderMap, HeaderName, HeaderValue, Method, Uri, Version};
use thiserror::Error;

use crate::http::request::RequestHead;
use crate::security::limits::HeaderLimits;

/// Longest chunk-size line accepted, extensions included.
const MAX_CHUNK_SIZE_LINE: usize = 1024;

/// One transport event of a request.
#[derive(Debug, Clone, PartialEq)]
pub enum RequestEvent {
    /// Request line and headers.
    Header(RequestHead),
    /// A piece of body content.
    BodyChunk(Bytes),
    /// Final piece of body content, with trailers for chunked bodies.
    LastBodyChunk { data: Bytes, trailers: HeaderMap },
}

/// Malformed request framing.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    /// Request line and headers exceed the configured size.
    #[error("request head exceeds {limit} bytes")]
    HeadTooLarge { limit: usize },

    /// More header fields than allowed.
    #[error("request has more than {limit} headers")]
    TooManyHeaders { limit: usize },

    /// `httparse` rejected the request head.
    #[error("malformed request head: {0}")]
    Parse(httparse::Error),

    /// Only HTTP/1.0 and HTTP/1.1 are spoken here.
    #[error("unsupported HTTP version")]
    UnsupportedVersion,

    #[error("invalid request method")]
    InvalidMethod,

    #[error("invalid request target '{0}'")]
    InvalidUri(String),

    #[error("invalid header field")]
    InvalidHeader,

    /// Unparsable or conflicting `Content-Length` values.
    #[error("invalid Content-Length")]
    InvalidContentLength,

    /// Both `Content-Length` and `Transfer-Encoding` present.
    #[error("both Content-Length and Transfer-Encoding present")]
    ConflictingFraming,

    /// A transfer coding other than a lone `chunked`.
    #[error("unsupported Transfer-Encoding '{0}'")]
    UnsupportedTransferEncoding(String),

    #[error("invalid chunk size line")]
    InvalidChunkSize,

    /// Chunk data not followed by CRLF.
    #[error("chunk data not terminated by CRLF")]
    InvalidChunkTerminator,

    /// Peer closed the connection in the middle of a request.
    #[error("connection closed before the request was complete")]
    UnexpectedEof,

    /// A previous error left the stream in an unknown position.
    #[error("decoder failed earlier on this connection")]
    Poisoned,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Head,
    Fixed { remaining: u64 },
    ChunkSize,
    ChunkData { remaining: u64 },
    ChunkDataEnd,
    Trailers,
    Failed,
}

/// Incremental request decoder for one connection.
#[derive(Debug)]
pub struct RequestDecoder {
    state: State,
    limits: HeaderLimits,
    max_chunk_size: usize,
}

impl RequestDecoder {
    pub fn new(limits: HeaderLimits, max_chunk_size: usize) -> Self {
        Self {
            state: State::Head,
            limits,
            max_chunk_size: max_chunk_size.max(1),
        }
    }

    /// Whether the decoder sits between two requests.
    pub fn is_idle(&self) -> bool {
        self.state == State::Head
    }

    /// Decode the next event from `buf`, consuming the bytes it covers.
    ///
    /// `Ok(None)` means more input is needed.
    pub fn decode(&mut self, buf: &mut BytesMut) -> Result<Option<RequestEvent>, DecodeError> {
        let result = self.decode_inner(buf);
        if result.is_err() {
            self.state = State::Failed;
        }
        result
    }

    /// Decode after the peer closed its side: leftovers are an error unless
    /// they complete the current message.
    pub fn decode_eof(&mut self, buf: &mut BytesMut) -> Result<Option<RequestEvent>, DecodeError> {
        if let Some(event) = self.decode(buf)? {
            return Ok(Some(event));
        }
        if self.is_idle() && buf.iter().all(|b| b.is_ascii_whitespace()) {
            buf.clear();
            return Ok(None);
        }
        self.state = State::Failed;
        Err(DecodeError::UnexpectedEof)
    }

    fn decode_inner(&mut self, buf: &mut BytesMut) -> Result<Option<RequestEvent>, DecodeError> {
        loop {
            match self.state {
                State::Failed => return Err(DecodeError::Poisoned),
                State::Head => {
                    if buf.is_empty() {
                        return Ok(None);
                    }
                    return self.decode_head(buf);
                }
                State::Fixed { remaining: 0 } => {
                    self.state = State::Head;
                    return Ok(Some(RequestEvent::LastBodyChunk {
                        data: Bytes::new(),
                        trailers: HeaderMap::new(),
                    }));
                }
                State::Fixed { remaining } => {
                    if buf.is_empty() {
                        return Ok(None);
                    }
                    let data = self.take_piece(buf, remaining);
                    let remaining = remaining - data.len() as u64;
                    if remaining == 0 {
                        self.state = State::Head;
                        return Ok(Some(RequestEvent::LastBodyChunk {
                            data,
                            trailers: HeaderMap::new(),
                        }));
                    }
                    self.state = State::Fixed { remaining };
                    return Ok(Some(RequestEvent::BodyChunk(data)));
                }
                State::ChunkSize => match httparse::parse_chunk_size(buf) {
                    Ok(httparse::Status::Complete((consumed, 0))) => {
                        buf.advance(consumed);
                        self.state = State::Trailers;
                    }
                    Ok(httparse::Status::Complete((consumed, size))) => {
                        buf.advance(consumed);
                        self.state = State::ChunkData { remaining: size };
                    }
                    Ok(httparse::Status::Partial) => {
                        if buf.len() > MAX_CHUNK_SIZE_LINE {
                            return Err(DecodeError::InvalidChunkSize);
                        }
                        return Ok(None);
                    }
                    Err(_) => return Err(DecodeError::InvalidChunkSize),
                },
                State::ChunkData { remaining } => {
                    if buf.is_empty() {
                        return Ok(None);
                    }
                    let data = self.take_piece(buf, remaining);
                    let remaining = remaining - data.len() as u64;
                    self.state = if remaining == 0 {
                        State::ChunkDataEnd
                    } else {
                        State::ChunkData { remaining }
                    };
                    return Ok(Some(RequestEvent::BodyChunk(data)));
                }
                State::ChunkDataEnd => {
                    if buf.len() < 2 {
                        return Ok(None);
                    }
                    if &buf[..2] != b"\r\n" {
                        return Err(DecodeError::InvalidChunkTerminator);
                    }
                    buf.advance(2);
                    self.state = State::ChunkSize;
                }
                State::Trailers => {
                    let Some(trailers) = self.decode_trailers(buf)? else {
                        return Ok(None);
                    };
                    self.state = State::Head;
                    return Ok(Some(RequestEvent::LastBodyChunk {
                        data: Bytes::new(),
                        trailers,
                    }));
                }
            }
        }
    }

    fn take_piece(&self, buf: &mut BytesMut, remaining: u64) -> Bytes {
        let len = remaining
            .min(buf.len() as u64)
            .min(self.max_chunk_size as u64) as usize;
        buf.split_to(len).freeze()
    }

    fn decode_head(&mut self, buf: &mut BytesMut) -> Result<Option<RequestEvent>, DecodeError> {
        let limit = self.limits.max_head_size;
        let mut slots = vec![httparse::EMPTY_HEADER; self.limits.max_headers];
        let mut parsed = httparse::Request::new(&mut slots);

        let consumed = match parsed.parse(buf) {
            Ok(httparse::Status::Complete(consumed)) => consumed,
            Ok(httparse::Status::Partial) => {
                if buf.len() > limit {
                    return Err(DecodeError::HeadTooLarge { limit });
                }
                return Ok(None);
            }
            Err(httparse::Error::TooManyHeaders) => {
                return Err(DecodeError::TooManyHeaders {
                    limit: self.limits.max_headers,
                })
            }
            Err(e) => return Err(DecodeError::Parse(e)),
        };
        if consumed > limit {
            return Err(DecodeError::HeadTooLarge { limit });
        }

        let method = parsed
            .method
            .and_then(|m| Method::from_bytes(m.as_bytes()).ok())
            .ok_or(DecodeError::InvalidMethod)?;
        let target = parsed.path.unwrap_or_default();
        let uri: Uri = target
            .parse()
            .map_err(|_| DecodeError::InvalidUri(target.to_string()))?;
        let version = match parsed.version {
            Some(0) => Version::HTTP_10,
            Some(1) => Version::HTTP_11,
            _ => return Err(DecodeError::UnsupportedVersion),
        };
        let headers = to_header_map(parsed.headers)?;

        self.state = body_framing(&headers)?;
        buf.advance(consumed);

        Ok(Some(RequestEvent::Header(RequestHead {
            method,
            uri,
            version,
            headers,
        })))
    }

    fn decode_trailers(&self, buf: &mut BytesMut) -> Result<Option<HeaderMap>, DecodeError> {
        let limit = self.limits.max_head_size;
        let mut slots = vec![httparse::EMPTY_HEADER; self.limits.max_headers];
        let (consumed, trailers) = match httparse::parse_headers(buf, &mut slots) {
            Ok(httparse::Status::Complete((consumed, fields))) => (consumed, to_header_map(fields)?),
            Ok(httparse::Status::Partial) => {
                if buf.len() > limit {
                    return Err(DecodeError::HeadTooLarge { limit });
                }
                return Ok(None);
            }
            Err(httparse::Error::TooManyHeaders) => {
                return Err(DecodeError::TooManyHeaders {
                    limit: self.limits.max_headers,
                })
            }
            Err(e) => return Err(DecodeError::Parse(e)),
        };
        buf.advance(consumed);
        Ok(Some(trailers))
    }
}

fn to_header_map(fields: &[httparse::Header<'_>]) -> Result<HeaderMap, DecodeError> {
    let mut headers = HeaderMap::with_capacity(fields.len());
    for field in fields {
        let name =
            HeaderName::from_bytes(field.name.as_bytes()).map_err(|_| DecodeError::InvalidHeader)?;
        let value = HeaderValue::from_bytes(field.value).map_err(|_| DecodeError::InvalidHeader)?;
        headers.append(name, value);
    }
    Ok(headers)
}

/// Pick the body framing from the request headers.
fn body_framing(headers: &HeaderMap) -> Result<State, DecodeError> {
    let has_length = headers.contains_key(CONTENT_LENGTH);

    if headers.contains_key(TRANSFER_ENCODING) {
        if has_length {
            return Err(DecodeError::ConflictingFraming);
        }
        let mut codings = Vec::new();
        for value in headers.get_all(TRANSFER_ENCODING) {
            let value = value.to_str().map_err(|_| DecodeError::InvalidHeader)?;
            codings.extend(value.split(',').map(str::trim).filter(|c| !c.is_empty()));
        }
        return match codings.as_slice() {
            [only] if only.eq_ignore_ascii_case("chunked") => Ok(State::ChunkSize),
            _ => Err(DecodeError::UnsupportedTransferEncoding(codings.join(", "))),
        };
    }

    match declared_content_length(headers)? {
        Some(len) => Ok(State::Fixed { remaining: len }),
        None => Ok(State::Fixed { remaining: 0 }),
    }
}

/// The `Content-Length` a request declares; repeated values must agree.
pub fn declared_content_length(headers: &HeaderMap) -> Result<Option<u64>, DecodeError> {
    let mut declared = None;
    for value in headers.get_all(CONTENT_LENGTH) {
        let len = value
            .to_str()
            .ok()
            .and_then(|v| v.trim().parse::<u64>().ok())
            .ok_or(DecodeError::InvalidContentLength)?;
        match declared {
            Some(previous) if previous != len => return Err(DecodeError::InvalidContentLength),
            _ => declared = Some(len),
        }
    }
    Ok(declared)
}
