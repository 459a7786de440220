//! Client traits for the remote append-oriented store.
//!
//! Every operation is a single round trip with no retry at this layer: a
//! failed call surfaces immediately to the caller.

use crate::error::FsResult;
use async_trait::async_trait;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EntryKind {
    File,
    Dir,
}

/// Metadata reported by `stat`. Times are milliseconds since the epoch, the
/// granularity the store keeps.
#[derive(Clone, Debug)]
pub struct FileStatus {
    pub kind: EntryKind,
    pub len: u64,
    pub perm: u32,
    pub atime_ms: i64,
    pub mtime_ms: i64,
}

impl FileStatus {
    pub fn is_dir(&self) -> bool {
        self.kind == EntryKind::Dir
    }
}

#[derive(Clone, Debug)]
pub struct DirEntry {
    pub name: String,
    pub status: FileStatus,
}

/// Capacity/usage of the store, for statfs.
#[derive(Clone, Copy, Debug, Default)]
pub struct StorageStatus {
    pub capacity: u64,
    pub used: u64,
    pub remaining: u64,
    pub block_size: u64,
}

/// Whether setxattr must create a new attribute or replace an existing one.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum XAttrMode {
    Create,
    Replace,
}

/// Seekable input stream over one remote file. Sequential reads continue
/// from the stream's current position; `seek` repositions it. Reads may
/// return fewer bytes than the buffer holds; 0 means end of stream.
#[async_trait]
pub trait DfsReader: Send {
    async fn seek(&mut self, pos: u64) -> FsResult<()>;

    async fn read(&mut self, buf: &mut [u8]) -> FsResult<usize>;

    /// Current stream position.
    fn position(&self) -> u64;

    async fn close(&mut self) -> FsResult<()>;
}

/// Append-only output sink for one remote file. Bytes land strictly after
/// whatever was appended before; there is no way to rewrite earlier regions.
#[async_trait]
pub trait DfsAppender: Send {
    async fn append(&mut self, buf: &[u8]) -> FsResult<()>;

    /// Make appended bytes visible to readers. Soft sync: visibility, not
    /// durability.
    async fn flush(&mut self) -> FsResult<()>;

    async fn close(&mut self) -> FsResult<()>;
}

/// Path-addressed client for the remote store.
#[async_trait]
pub trait DfsBackend: Send + Sync + 'static {
    async fn stat(&self, path: &str) -> FsResult<FileStatus>;

    async fn list_dir(&self, path: &str) -> FsResult<Vec<DirEntry>>;

    async fn open_read(&self, path: &str) -> FsResult<Box<dyn DfsReader>>;

    /// Create `path` as an empty file (truncating an existing one). With
    /// `exclusive` set, an existing file is an error instead.
    async fn create(&self, path: &str, perm: u32, exclusive: bool) -> FsResult<()>;

    /// Open an append sink positioned at the file's current end.
    async fn append(&self, path: &str) -> FsResult<Box<dyn DfsAppender>>;

    async fn delete(&self, path: &str, recursive: bool) -> FsResult<()>;

    async fn rename(&self, from: &str, to: &str) -> FsResult<()>;

    /// mkdir -p semantics.
    async fn mkdir(&self, path: &str, perm: u32) -> FsResult<()>;

    async fn set_permission(&self, path: &str, perm: u32) -> FsResult<()>;

    async fn set_times(&self, path: &str, atime_ms: i64, mtime_ms: i64) -> FsResult<()>;

    /// Shrink or grow a file. Returns false when the store cannot truncate,
    /// in which case the caller decides how to surface the gap.
    async fn truncate(&self, path: &str, size: u64) -> FsResult<bool>;

    async fn get_xattr(&self, path: &str, name: &str) -> FsResult<Vec<u8>>;

    async fn set_xattr(&self, path: &str, name: &str, value: &[u8], mode: XAttrMode)
    -> FsResult<()>;

    async fn remove_xattr(&self, path: &str, name: &str) -> FsResult<()>;

    async fn list_xattr(&self, path: &str) -> FsResult<Vec<String>>;

    /// Whether this store supports extended attributes at all. Consulted once
    /// at mount time to build the capability descriptor.
    fn supports_xattr(&self) -> bool {
        true
    }

    async fn status(&self) -> FsResult<StorageStatus>;
}
