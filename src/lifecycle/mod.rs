//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Signals (signals.rs):
//!     SIGTERM/SIGINT → Shutdown::trigger
//!
//! Shutdown (shutdown.rs):
//!     trigger → accept loop stops
//!             → idle connections close
//!             → busy connections answer 503 and close after their response
//!             → server waits for connections up to the shutdown timeout
//! ```
//!
//! # Design Decisions
//! - One shutdown handle, cloned into every task
//! - Shutdown has a timeout: remaining connections are abandoned after it

pub mod shutdown;
pub mod signals;

pub use shutdown::Shutdown;
pub use signals::shutdown_on_signal;
