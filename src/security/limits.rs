//! Request limits.
//!
//! # Responsibilities
//! - Enforce maximum request body size
//! - Decide when an aggregated body spills to disk
//! - Enforce maximum header size and header count
//!
//! # Design Decisions
//! - Limits are checked against the prospective total (consumed + incoming)
//!   before any byte is buffered, so both checks share one base length
//! - Body size and disk threshold are independent: a body can stay in memory
//!   and still be rejected, or spill to disk and still be accepted
//! - Oversized bodies are answered with 413, oversized heads with 400

use crate::config::RequestsConfig;

/// Body size policy applied while aggregating a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BodyLimits {
    /// Maximum body size, `None` when unlimited.
    pub max_content_length: Option<u64>,
    /// In-memory budget before the body is spooled to disk.
    pub disk_threshold: u64,
}

impl BodyLimits {
    pub fn new(max_content_length: Option<u64>, disk_threshold: u64) -> Self {
        Self {
            max_content_length,
            disk_threshold,
        }
    }

    /// Whether a body of `prospective` bytes is over the maximum size.
    pub fn exceeds_max(&self, prospective: u64) -> bool {
        matches!(self.max_content_length, Some(max) if prospective > max)
    }

    /// Whether a body of `prospective` bytes no longer fits in memory.
    pub fn exceeds_disk_threshold(&self, prospective: u64) -> bool {
        prospective > self.disk_threshold
    }
}

impl From<&RequestsConfig> for BodyLimits {
    fn from(config: &RequestsConfig) -> Self {
        Self::new(config.max_body_size.limit(), config.disk_threshold)
    }
}

/// Limits on the request line and header block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeaderLimits {
    /// Maximum bytes of request line plus headers (and of a trailer block).
    pub max_head_size: usize,
    /// Maximum number of header fields.
    pub max_headers: usize,
}

impl Default for HeaderLimits {
    fn default() -> Self {
        Self {
            max_head_size: 16 * 1024,
            max_headers: 100,
        }
    }
}

impl From<&RequestsConfig> for HeaderLimits {
    fn from(config: &RequestsConfig) -> Self {
        Self {
            max_head_size: config.max_head_size,
            max_headers: config.max_headers,
        }
    }
}
