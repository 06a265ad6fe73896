//! Destination of accumulated request body bytes.

use std::io;

use bytes::{Bytes, BytesMut};

use crate::body::spool::{SpoolDir, SpoolFile};

/// Where aggregated body bytes go: memory first, a spool file once promoted.
///
/// A sink starts [`ByteSink::InMemory`] and is promoted to
/// [`ByteSink::OnDisk`] at most once; it never reverts.
#[derive(Debug)]
pub enum ByteSink {
    InMemory(BytesMut),
    OnDisk(SpoolFile),
}

impl Default for ByteSink {
    fn default() -> Self {
        ByteSink::InMemory(BytesMut::new())
    }
}

impl ByteSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of bytes accumulated.
    pub fn len(&self) -> u64 {
        match self {
            ByteSink::InMemory(buf) => buf.len() as u64,
            ByteSink::OnDisk(file) => file.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_on_disk(&self) -> bool {
        matches!(self, ByteSink::OnDisk(_))
    }

    /// Move buffered bytes into a new spool file. No-op once on disk.
    pub fn promote(&mut self, spool: &SpoolDir) -> io::Result<()> {
        let ByteSink::InMemory(buf) = self else {
            return Ok(());
        };
        let mut file = spool.create()?;
        file.append(buf)?;
        tracing::debug!(
            buffered = buf.len(),
            path = ?file.path(),
            "Request body promoted to disk"
        );
        *self = ByteSink::OnDisk(file);
        Ok(())
    }

    pub fn append(&mut self, bytes: &[u8]) -> io::Result<()> {
        match self {
            ByteSink::InMemory(buf) => {
                buf.extend_from_slice(bytes);
                Ok(())
            }
            ByteSink::OnDisk(file) => file.append(bytes),
        }
    }

    /// Flush pending writes; the sink is read-only afterwards.
    pub fn finish(&mut self) -> io::Result<()> {
        match self {
            ByteSink::InMemory(_) => Ok(()),
            ByteSink::OnDisk(file) => file.finish(),
        }
    }

    /// Release the memory buffer or delete the spool file.
    pub fn discard(&mut self) {
        match self {
            ByteSink::InMemory(buf) => *buf = BytesMut::new(),
            ByteSink::OnDisk(file) => {
                file.delete();
            }
        }
    }

    /// The whole content, read back from disk when spooled.
    pub fn read_all(&self) -> io::Result<Bytes> {
        match self {
            ByteSink::InMemory(buf) => Ok(Bytes::copy_from_slice(buf)),
            ByteSink::OnDisk(file) => {
                let mut content = Vec::with_capacity(file.len() as usize);
                io::Read::read_to_end(&mut file.open()?, &mut content)?;
                Ok(Bytes::from(content))
            }
        }
    }
}
