//! Resilience subsystem.
//!
//! # Data Flow
//! ```text
//! Socket I/O on a connection:
//!     → timeouts.rs (idle read deadline, per-write deadline)
//!     → On expiry: connection closed, spool files cleaned up
//! ```
//!
//! # Design Decisions
//! - Timeouts are non-negotiable; every socket operation has a deadline
//! - A client never sees a hung connection: it gets a response or a close

pub mod timeouts;

pub use timeouts::TimeoutError;
