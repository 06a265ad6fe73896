//! HTTP/1.x response encoding.
//!
//! Writes status lines, header blocks, chunk frames and trailers into a
//! `BytesMut`; the writer decides what goes on the wire and when.

use bytes::{BufMut, BytesMut};
use http::{HeaderMap, StatusCode, Version};

/// Interim response sent to clients waiting on `Expect: 100-continue`.
pub const CONTINUE: &[u8] = b"HTTP/1.1 100 Continue\r\n\r\n";

/// Encode the status line and header block, including the blank line.
pub fn encode_head(version: Version, status: StatusCode, headers: &HeaderMap, dst: &mut BytesMut) {
    let version = if version == Version::HTTP_10 {
        "HTTP/1.0"
    } else {
        "HTTP/1.1"
    };
    dst.extend_from_slice(version.as_bytes());
    dst.put_u8(b' ');
    dst.extend_from_slice(status.as_str().as_bytes());
    dst.put_u8(b' ');
    dst.extend_from_slice(status.canonical_reason().unwrap_or("Unknown").as_bytes());
    dst.extend_from_slice(b"\r\n");
    encode_fields(headers, dst);
    dst.extend_from_slice(b"\r\n");
}

/// Encode one chunk frame. Empty data encodes nothing, since a zero-size
/// chunk would end the body.
pub fn encode_chunk(data: &[u8], dst: &mut BytesMut) {
    if data.is_empty() {
        return;
    }
    dst.extend_from_slice(format!("{:X}\r\n", data.len()).as_bytes());
    dst.extend_from_slice(data);
    dst.extend_from_slice(b"\r\n");
}

/// Encode the terminating zero-size chunk followed by trailer fields.
pub fn encode_last_chunk(trailers: &HeaderMap, dst: &mut BytesMut) {
    dst.extend_from_slice(b"0\r\n");
    encode_fields(trailers, dst);
    dst.extend_from_slice(b"\r\n");
}

fn encode_fields(headers: &HeaderMap, dst: &mut BytesMut) {
    for (name, value) in headers {
        dst.extend_from_slice(name.as_str().as_bytes());
        dst.extend_from_slice(b": ");
        dst.extend_from_slice(value.as_bytes());
        dst.extend_from_slice(b"\r\n");
    }
}
