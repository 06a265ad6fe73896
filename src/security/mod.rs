//! Security subsystem.
//!
//! # Data Flow
//! ```text
//! Incoming request:
//!     → limits.rs HeaderLimits (request line + header size, header count) → 400
//!     → limits.rs BodyLimits (maximum body size) → 413
//!     → limits.rs BodyLimits (disk threshold) → spool to disk
//!     → Pass to the application
//! ```
//!
//! # Design Decisions
//! - Fail closed: a request over any limit never reaches the application
//! - No trust in client input: declared lengths are checked before reading

pub mod limits;

pub use limits::{BodyLimits, HeaderLimits};
