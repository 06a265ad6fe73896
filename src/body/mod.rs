//! Request body storage subsystem.
//!
//! # Data Flow
//! ```text
//! Body chunks from the aggregator:
//!     → sink.rs (ByteSink: in-memory buffer)
//!     → threshold crossed: spool.rs (SpoolFile in the spool directory)
//!     → Body (uniform read access for the application)
//!     → dropped or discarded: spool file deleted exactly once
//! ```
//!
//! # Design Decisions
//! - One promotion transition, memory to disk, never back
//! - Readers are oblivious to where the bytes live
//! - Ownership of the spool file follows the body; no shared handles

pub mod sink;
pub mod spool;

use std::fs::File;
use std::io::{self, BufReader, Cursor, Read};

use bytes::Bytes;

pub use sink::ByteSink;
pub use spool::{IdentityGenerator, SpoolDir, SpoolFile, UuidIdentityGenerator};

/// Aggregated request body handed to the application.
#[derive(Debug, Default)]
pub struct Body {
    sink: Option<ByteSink>,
}

impl Body {
    /// A body with no content.
    pub fn empty() -> Self {
        Self { sink: None }
    }

    pub(crate) fn from_sink(sink: ByteSink) -> Self {
        Self { sink: Some(sink) }
    }

    pub fn len(&self) -> u64 {
        self.sink.as_ref().map_or(0, ByteSink::len)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether the body was spooled to disk during aggregation.
    pub fn is_on_disk(&self) -> bool {
        self.sink.as_ref().is_some_and(ByteSink::is_on_disk)
    }

    /// Read the whole body into memory.
    pub fn to_bytes(&self) -> io::Result<Bytes> {
        match &self.sink {
            Some(sink) => sink.read_all(),
            None => Ok(Bytes::new()),
        }
    }

    /// A reader over the body from its first byte.
    pub fn reader(&self) -> io::Result<BodyReader> {
        Ok(match &self.sink {
            None => BodyReader::Empty,
            Some(ByteSink::InMemory(buf)) => {
                BodyReader::Memory(Cursor::new(Bytes::copy_from_slice(buf)))
            }
            Some(ByteSink::OnDisk(file)) => BodyReader::File(BufReader::new(file.open()?)),
        })
    }

    /// Release the body's storage now instead of on drop. Idempotent.
    pub fn discard(&mut self) {
        if let Some(mut sink) = self.sink.take() {
            sink.discard();
        }
    }
}

/// Blocking reader over a [`Body`].
#[derive(Debug)]
pub enum BodyReader {
    Empty,
    Memory(Cursor<Bytes>),
    File(BufReader<File>),
}

impl Read for BodyReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            BodyReader::Empty => Ok(0),
            BodyReader::Memory(cursor) => cursor.read(buf),
            BodyReader::File(file) => file.read(buf),
        }
    }
}
