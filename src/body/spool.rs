//! Spool directory and spool files for request bodies spilled to disk.
//!
//! # Responsibilities
//! - Name spool files with a collision-resistant identity generator
//! - Append body bytes to a spool file
//! - Delete the file exactly once, whichever path gets there first
//!
//! # Design Decisions
//! - Deletion is a check-and-set on the owned path; later calls are no-ops
//! - A file already gone counts as deleted
//! - Deletion failures are logged, never propagated
//! - File I/O is blocking and runs on the connection task. Writes are
//!   batched through a 64 KiB buffer so a body costs one syscall per buffer,
//!   and deletion completes before the response that follows it is written.
//!   Spool directories on slow or network storage stall their connections

use std::fmt;
use std::fs::{self, File, OpenOptions};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use uuid::Uuid;

/// Bytes buffered in memory before a spool write reaches the file.
const SPOOL_BUFFER_CAPACITY: usize = 64 * 1024;

/// Source of unique identities for requests and spool files.
pub trait IdentityGenerator: Send + Sync + fmt::Debug {
    fn new_identity(&self) -> String;
}

/// UUID v4 based identities, optionally prefixed (`body_<uuid>`).
#[derive(Debug, Clone, Default)]
pub struct UuidIdentityGenerator {
    prefix: Option<String>,
}

impl UuidIdentityGenerator {
    pub fn new() -> Self {
        Self { prefix: None }
    }

    pub fn with_prefix(prefix: impl Into<String>) -> Self {
        Self {
            prefix: Some(prefix.into()),
        }
    }
}

impl IdentityGenerator for UuidIdentityGenerator {
    fn new_identity(&self) -> String {
        match &self.prefix {
            Some(prefix) => format!("{}_{}", prefix, Uuid::new_v4()),
            None => Uuid::new_v4().to_string(),
        }
    }
}

/// Directory where spooled request bodies live.
#[derive(Debug, Clone)]
pub struct SpoolDir {
    path: PathBuf,
    names: Arc<dyn IdentityGenerator>,
}

impl SpoolDir {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            names: Arc::new(UuidIdentityGenerator::with_prefix("body")),
        }
    }

    /// Create the directory if it is missing.
    pub fn ensure_exists(&self) -> io::Result<()> {
        fs::create_dir_all(&self.path)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Create a fresh, empty spool file.
    pub fn create(&self) -> io::Result<SpoolFile> {
        let path = self.path.join(self.names.new_identity());
        let file = OpenOptions::new().write(true).create_new(true).open(&path)?;
        tracing::trace!(path = %path.display(), "Spool file created");
        Ok(SpoolFile {
            path: Some(path),
            writer: Some(BufWriter::with_capacity(SPOOL_BUFFER_CAPACITY, file)),
            len: 0,
        })
    }
}

/// An owned spool file, deleted on [`SpoolFile::delete`] or drop.
#[derive(Debug)]
pub struct SpoolFile {
    path: Option<PathBuf>,
    writer: Option<BufWriter<File>>,
    len: u64,
}

impl SpoolFile {
    /// Append bytes at the end of the file.
    pub fn append(&mut self, bytes: &[u8]) -> io::Result<()> {
        let writer = self.writer.as_mut().ok_or_else(|| {
            io::Error::new(io::ErrorKind::Other, "spool file is closed for writing")
        })?;
        writer.write_all(bytes)?;
        self.len += bytes.len() as u64;
        Ok(())
    }

    /// Flush buffered bytes and close the write handle.
    pub fn finish(&mut self) -> io::Result<()> {
        if let Some(mut writer) = self.writer.take() {
            writer.flush()?;
        }
        Ok(())
    }

    /// Bytes written so far.
    pub fn len(&self) -> u64 {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Location on disk, `None` once deleted.
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Open the file for reading from the start.
    pub fn open(&self) -> io::Result<File> {
        let path = self.path.as_deref().ok_or_else(|| {
            io::Error::new(io::ErrorKind::NotFound, "spool file has been deleted")
        })?;
        File::open(path)
    }

    /// Delete the file if it still exists. Returns `true` only on the call
    /// that performed the deletion.
    pub fn delete(&mut self) -> bool {
        self.writer = None;
        let Some(path) = self.path.take() else {
            return false;
        };
        match fs::remove_file(&path) {
            Ok(()) => {
                tracing::trace!(path = %path.display(), "Spool file deleted");
                true
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => true,
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "Failed to delete spool file");
                false
            }
        }
    }
}

impl Drop for SpoolFile {
    fn drop(&mut self) {
        self.delete();
    }
}
