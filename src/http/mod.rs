//! HTTP protocol handling subsystem.
//!
//! # Data Flow
//! ```text
//! TCP connection (driver.rs, one task per connection)
//!     → decoder.rs (Header / BodyChunk / LastBodyChunk events)
//!     → connection.rs (ConnectionLifecycle: state, cleanup, rejections)
//!     → aggregator.rs (RequestAggregator: limits, memory or spool file)
//!     → request.rs (Request handed to the application)
//!     → outcome.rs (Outcome returned by the application)
//!     → writer.rs (OutcomeWriter: framing, keep-alive, chunk streaming)
//!     → encoder.rs (bytes on the wire)
//! ```
//!
//! # Design Decisions
//! - HTTP/1.0 and HTTP/1.1 only, no pipelined concurrency
//! - Oversized and malformed requests are answered without the application
//! - Every response either completes or the connection is closed

pub mod aggregator;
pub mod connection;
pub mod decoder;
pub mod driver;
pub mod encoder;
pub mod outcome;
pub mod request;
pub mod server;
pub mod writer;

pub use aggregator::{AggregateError, Aggregated, RequestAggregator};
pub use connection::{ConnectionLifecycle, Inbound};
pub use decoder::{DecodeError, RequestDecoder, RequestEvent};
pub use driver::{serve_connection, ConnectionContext, ConnectionError};
pub use outcome::{Cookie, Outcome, OutcomeBody, ResponseHeader, X_WERVAL_CONTENT_LENGTH};
pub use request::{Request, RequestHead, RequestHeader, RequestId};
pub use server::{HttpServer, ServerError};
pub use writer::{OutcomeWriter, WriteError, WriteSummary};
