//! Append write session: monotonic offsets, zero-filled gaps.

use crate::backend::client::DfsAppender;
use crate::error::{FsError, FsResult};

/// Zeros are synthesized in bounded chunks so a large forward jump never
/// allocates the whole gap at once.
const ZERO_CHUNK: u64 = 1024 * 1024;

/// Write session over one append-only store sink.
///
/// `last_offset` is the logical end of the stream and only ever grows.
/// Writes below it are rejected; writes past it are bridged with zeros.
pub struct AppendWriter {
    sink: Box<dyn DfsAppender>,
    last_offset: u64,
}

impl AppendWriter {
    /// `initial_offset` is 0 for a fresh file, or the file's length when
    /// opening in append mode.
    pub fn new(sink: Box<dyn DfsAppender>, initial_offset: u64) -> Self {
        Self {
            sink,
            last_offset: initial_offset,
        }
    }

    pub fn last_offset(&self) -> u64 {
        self.last_offset
    }

    /// Append `data` at `offset`. Returns the number of bytes from `data`
    /// written (always all of them on success).
    pub async fn write(&mut self, offset: u64, data: &[u8]) -> FsResult<usize> {
        if offset < self.last_offset {
            // the store cannot rewrite already-written regions
            return Err(FsError::InvalidArgument(format!(
                "write at {} behind append frontier {}",
                offset, self.last_offset
            )));
        }

        if offset > self.last_offset {
            let zeros = vec![0u8; ZERO_CHUNK.min(offset - self.last_offset) as usize];
            while self.last_offset < offset {
                let n = (offset - self.last_offset).min(ZERO_CHUNK) as usize;
                self.sink.append(&zeros[..n]).await?;
                self.last_offset += n as u64;
            }
        }

        self.sink.append(data).await?;
        self.last_offset += data.len() as u64;
        Ok(data.len())
    }

    /// Make appended bytes visible to readers. Soft sync: does not move
    /// `last_offset`.
    pub async fn flush(&mut self) -> FsResult<()> {
        self.sink.flush().await
    }

    pub async fn close(&mut self) -> FsResult<()> {
        self.sink.close().await
    }
}
