//! Aggregated request model.
//!
//! # Responsibilities
//! - Identify each logical request; identities come from the aggregator's
//!   `IdentityGenerator`
//! - Carry the frozen request header and its aggregated body
//! - Answer keep-alive and `Expect: 100-continue` questions
//!
//! # Design Decisions
//! - Request ID assigned on the header event, before any body byte
//! - The header is immutable once the request is assembled

use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;

use http::header::{CONNECTION, EXPECT};
use http::{HeaderMap, Method, Uri, Version};

use crate::body::Body;

/// Globally unique identity of one logical request.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RequestId(Arc<str>);

impl RequestId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for RequestId {
    fn from(id: String) -> Self {
        Self(Arc::from(id))
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Request line and headers as decoded from the wire.
#[derive(Debug, Clone, PartialEq)]
pub struct RequestHead {
    pub method: Method,
    pub uri: Uri,
    pub version: Version,
    pub headers: HeaderMap,
}

/// Header of an aggregated request.
#[derive(Debug, Clone)]
pub struct RequestHeader {
    pub id: RequestId,
    pub method: Method,
    pub uri: Uri,
    pub version: Version,
    pub headers: HeaderMap,
    pub remote_addr: Option<SocketAddr>,
}

impl RequestHeader {
    pub fn new(id: RequestId, head: RequestHead, remote_addr: Option<SocketAddr>) -> Self {
        Self {
            id,
            method: head.method,
            uri: head.uri,
            version: head.version,
            headers: head.headers,
            remote_addr,
        }
    }

    /// Whether the client asked to keep the connection open.
    pub fn is_keep_alive(&self) -> bool {
        is_keep_alive(self.version, &self.headers)
    }

    /// Whether the client waits for `100 Continue` before sending the body.
    pub fn expects_continue(&self) -> bool {
        self.version == Version::HTTP_11
            && self
                .headers
                .get(EXPECT)
                .and_then(|v| v.to_str().ok())
                .is_some_and(|v| v.trim().eq_ignore_ascii_case("100-continue"))
    }
}

/// Keep-alive rule shared by requests and responses.
///
/// `Connection: close` always closes, HTTP/1.1 defaults to keep-alive and
/// older versions need an explicit `Connection: keep-alive`.
pub fn is_keep_alive(version: Version, headers: &HeaderMap) -> bool {
    let has_token = |token: &str| {
        headers.get_all(CONNECTION).iter().any(|value| {
            value
                .to_str()
                .map(|v| v.split(',').any(|t| t.trim().eq_ignore_ascii_case(token)))
                .unwrap_or(false)
        })
    };
    if has_token("close") {
        return false;
    }
    version == Version::HTTP_11 || has_token("keep-alive")
}

/// A fully aggregated request.
#[derive(Debug)]
pub struct Request {
    pub header: RequestHeader,
    pub body: Body,
}

impl Request {
    pub fn id(&self) -> &RequestId {
        &self.header.id
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::HeaderValue;

    fn header(version: Version, pairs: &[(&'static str, &'static str)]) -> RequestHeader {
        let mut headers = HeaderMap::new();
        for (name, value) in pairs {
            headers.append(*name, HeaderValue::from_static(value));
        }
        RequestHeader::new(
            RequestId::from("req-1".to_string()),
            RequestHead {
                method: Method::GET,
                uri: Uri::from_static("/"),
                version,
                headers,
            },
            None,
        )
    }

    #[test]
    fn request_id_displays_as_given() {
        let id = RequestId::from("body_1234".to_string());
        assert_eq!(id.to_string(), "body_1234");
        assert_eq!(id.as_str(), "body_1234");
    }

    #[test]
    fn http11_defaults_to_keep_alive() {
        assert!(header(Version::HTTP_11, &[]).is_keep_alive());
        assert!(!header(Version::HTTP_11, &[("connection", "close")]).is_keep_alive());
        assert!(!header(Version::HTTP_11, &[("connection", "Upgrade, Close")]).is_keep_alive());
    }

    #[test]
    fn http10_needs_explicit_keep_alive() {
        assert!(!header(Version::HTTP_10, &[]).is_keep_alive());
        assert!(header(Version::HTTP_10, &[("connection", "Keep-Alive")]).is_keep_alive());
    }

    #[test]
    fn expect_continue_is_case_insensitive() {
        assert!(header(Version::HTTP_11, &[("expect", "100-Continue")]).expects_continue());
        assert!(!header(Version::HTTP_10, &[("expect", "100-continue")]).expects_continue());
        assert!(!header(Version::HTTP_11, &[]).expects_continue());
    }
}
