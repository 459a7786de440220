//! The path-level façade over the remote store: session lifecycle, handle
//! bookkeeping and error mapping. The FUSE adapter in `crate::fuse` is its
//! only caller.

use crate::backend::client::{DfsBackend, DirEntry, FileStatus, StorageStatus, XAttrMode};
use crate::error::{FsError, FsResult};
use crate::paged::{PageLayout, PagedReader};
use crate::session::{AppendWriter, HandleTable};
use std::collections::HashMap;
use std::sync::Mutex;

pub const ROOT_INO: u64 = 1;

/// Optional operations the mounted store actually supports, computed once at
/// construction and consulted instead of probing at call time.
#[derive(Clone, Copy, Debug)]
pub struct CapabilitySet {
    pub xattr: bool,
}

struct NodeInfo {
    path: String,
    parent: u64,
}

/// Inode/path bookkeeping for the FUSE boundary. Inodes are assigned lazily
/// as paths are discovered and stay stable for the mount's lifetime.
struct Namespace {
    nodes: HashMap<u64, NodeInfo>,
    by_path: HashMap<String, u64>,
    next_ino: u64,
}

impl Namespace {
    fn new() -> Self {
        let mut nodes = HashMap::new();
        let mut by_path = HashMap::new();
        nodes.insert(
            ROOT_INO,
            NodeInfo {
                path: "/".to_string(),
                parent: ROOT_INO,
            },
        );
        by_path.insert("/".to_string(), ROOT_INO);
        Self {
            nodes,
            by_path,
            next_ino: ROOT_INO + 1,
        }
    }

    fn intern(&mut self, path: &str, parent: u64) -> u64 {
        if let Some(&ino) = self.by_path.get(path) {
            return ino;
        }
        let ino = self.next_ino;
        self.next_ino += 1;
        self.nodes.insert(
            ino,
            NodeInfo {
                path: path.to_string(),
                parent,
            },
        );
        self.by_path.insert(path.to_string(), ino);
        ino
    }

    fn path_of(&self, ino: u64) -> Option<String> {
        self.nodes.get(&ino).map(|n| n.path.clone())
    }

    fn parent_of(&self, ino: u64) -> Option<u64> {
        self.nodes.get(&ino).map(|n| n.parent)
    }

    fn forget_subtree(&mut self, path: &str) {
        let prefix = format!("{path}/");
        let doomed: Vec<String> = self
            .by_path
            .keys()
            .filter(|p| *p == path || p.starts_with(&prefix))
            .cloned()
            .collect();
        for p in doomed {
            if let Some(ino) = self.by_path.remove(&p) {
                self.nodes.remove(&ino);
            }
        }
    }

    fn rename_subtree(&mut self, from: &str, to: &str) {
        let new_parent = parent_path(to)
            .and_then(|p| self.by_path.get(&p).copied())
            .unwrap_or(ROOT_INO);
        let prefix = format!("{from}/");
        let moved: Vec<String> = self
            .by_path
            .keys()
            .filter(|p| *p == from || p.starts_with(&prefix))
            .cloned()
            .collect();
        for old in moved {
            let new = format!("{to}{}", &old[from.len()..]);
            if let Some(ino) = self.by_path.remove(&old) {
                if let Some(node) = self.nodes.get_mut(&ino) {
                    node.path = new.clone();
                    if old == from {
                        node.parent = new_parent;
                    }
                }
                self.by_path.insert(new, ino);
            }
        }
    }
}

fn norm_path(p: &str) -> String {
    let parts: Vec<&str> = p.split('/').filter(|s| !s.is_empty()).collect();
    let mut out = String::from("/");
    out.push_str(&parts.join("/"));
    out
}

fn parent_path(path: &str) -> Option<String> {
    if path == "/" {
        return None;
    }
    match path.rfind('/') {
        Some(0) => Some("/".to_string()),
        Some(n) => Some(path[..n].to_string()),
        None => Some("/".to_string()),
    }
}

fn join_path(dir: &str, name: &str) -> String {
    if dir == "/" {
        format!("/{name}")
    } else {
        format!("{dir}/{name}")
    }
}

/// One mounted filesystem: the store client, the handle table and the inode
/// namespace, constructed at mount and dropped at unmount.
pub struct Vfs<B: DfsBackend> {
    backend: B,
    layout: PageLayout,
    handles: HandleTable,
    namespace: Mutex<Namespace>,
    caps: CapabilitySet,
}

impl<B: DfsBackend> Vfs<B> {
    pub fn new(backend: B) -> Self {
        Self::with_layout(backend, PageLayout::default())
    }

    pub fn with_layout(backend: B, layout: PageLayout) -> Self {
        let caps = CapabilitySet {
            xattr: backend.supports_xattr(),
        };
        Self {
            backend,
            layout,
            handles: HandleTable::new(),
            namespace: Mutex::new(Namespace::new()),
            caps,
        }
    }

    pub fn caps(&self) -> CapabilitySet {
        self.caps
    }

    pub fn open_handles(&self) -> usize {
        self.handles.len()
    }

    // ---- namespace helpers for the FUSE adapter ----

    pub fn path_of(&self, ino: u64) -> Option<String> {
        self.namespace.lock().unwrap().path_of(ino)
    }

    pub fn parent_of(&self, ino: u64) -> Option<u64> {
        self.namespace.lock().unwrap().parent_of(ino)
    }

    pub fn child_path(&self, parent_ino: u64, name: &str) -> FsResult<String> {
        let ns = self.namespace.lock().unwrap();
        let dir = ns
            .path_of(parent_ino)
            .ok_or_else(|| FsError::NotFound(format!("inode {parent_ino}")))?;
        Ok(join_path(&dir, name))
    }

    pub fn intern(&self, path: &str, parent_ino: u64) -> u64 {
        self.namespace.lock().unwrap().intern(path, parent_ino)
    }

    // ---- metadata operations ----

    pub async fn stat(&self, path: &str) -> FsResult<FileStatus> {
        self.backend.stat(&norm_path(path)).await
    }

    pub async fn readdir(&self, path: &str) -> FsResult<Vec<DirEntry>> {
        let path = norm_path(path);
        let status = self.backend.stat(&path).await?;
        if !status.is_dir() {
            return Err(FsError::NotDirectory(path));
        }
        self.backend.list_dir(&path).await
    }

    pub async fn mkdir(&self, path: &str, mode: u32) -> FsResult<()> {
        self.backend.mkdir(&norm_path(path), mode & 0o777).await
    }

    /// Create a file without opening a handle on it.
    pub async fn mknod(&self, path: &str, mode: u32) -> FsResult<()> {
        self.backend.create(&norm_path(path), mode & 0o777, false).await
    }

    pub async fn unlink(&self, path: &str) -> FsResult<()> {
        let path = norm_path(path);
        let status = self.backend.stat(&path).await?;
        if status.is_dir() {
            return Err(FsError::IsDirectory(path));
        }
        self.backend.delete(&path, false).await?;
        self.namespace.lock().unwrap().forget_subtree(&path);
        Ok(())
    }

    pub async fn rmdir(&self, path: &str) -> FsResult<()> {
        let path = norm_path(path);
        if path == "/" {
            return Err(FsError::InvalidArgument("cannot remove root".to_string()));
        }
        let status = self.backend.stat(&path).await?;
        if !status.is_dir() {
            return Err(FsError::NotDirectory(path));
        }
        self.backend.delete(&path, true).await?;
        self.namespace.lock().unwrap().forget_subtree(&path);
        Ok(())
    }

    pub async fn rename(&self, from: &str, to: &str) -> FsResult<()> {
        let from = norm_path(from);
        let to = norm_path(to);
        self.backend.rename(&from, &to).await?;
        self.namespace.lock().unwrap().rename_subtree(&from, &to);
        Ok(())
    }

    /// Truncation is best-effort: a store without the capability reports it,
    /// and the call still succeeds so cp/tar-style workloads keep moving.
    pub async fn truncate(&self, path: &str, size: u64) -> FsResult<()> {
        let path = norm_path(path);
        let status = self.backend.stat(&path).await?;
        if status.is_dir() {
            return Err(FsError::IsDirectory(path));
        }
        if !self.backend.truncate(&path, size).await? {
            log::warn!("store cannot truncate {path} to {size}, reporting success");
        }
        Ok(())
    }

    pub async fn chmod(&self, path: &str, mode: u32) -> FsResult<()> {
        self.backend.set_permission(&norm_path(path), mode & 0o777).await
    }

    pub async fn utimens(&self, path: &str, atime_ms: i64, mtime_ms: i64) -> FsResult<()> {
        self.backend.set_times(&norm_path(path), atime_ms, mtime_ms).await
    }

    pub async fn statfs(&self) -> FsResult<StorageStatus> {
        self.backend.status().await
    }

    pub async fn getxattr(&self, path: &str, name: &str) -> FsResult<Vec<u8>> {
        self.backend.get_xattr(&norm_path(path), name).await
    }

    pub async fn setxattr(
        &self,
        path: &str,
        name: &str,
        value: &[u8],
        mode: XAttrMode,
    ) -> FsResult<()> {
        self.backend.set_xattr(&norm_path(path), name, value, mode).await
    }

    pub async fn removexattr(&self, path: &str, name: &str) -> FsResult<()> {
        self.backend.remove_xattr(&norm_path(path), name).await
    }

    pub async fn listxattr(&self, path: &str) -> FsResult<Vec<String>> {
        self.backend.list_xattr(&norm_path(path)).await
    }

    // ---- handle lifecycle ----

    /// Open `path` per the POSIX flag matrix and register the session(s)
    /// under a fresh handle.
    pub async fn open(&self, path: &str, flags: u32) -> FsResult<u64> {
        let path = norm_path(path);
        let iflags = flags as i32;
        let accmode = iflags & libc::O_ACCMODE;

        let mut status = match self.backend.stat(&path).await {
            Ok(s) => {
                if s.is_dir() {
                    return Err(FsError::IsDirectory(path));
                }
                Some(s)
            }
            Err(FsError::NotFound(_)) => None,
            Err(e) => return Err(e),
        };

        if iflags & libc::O_CREAT != 0 {
            if status.is_none() {
                self.backend.create(&path, 0o644, false).await?;
                status = Some(self.backend.stat(&path).await?);
            } else if iflags & libc::O_EXCL != 0 {
                return Err(FsError::AlreadyExists(path));
            }
        } else if status.is_none() {
            return Err(FsError::NotFound(path));
        }

        let handle = self.handles.allocate();
        match accmode {
            libc::O_RDONLY => {
                let stream = self.backend.open_read(&path).await?;
                self.handles
                    .register(handle, Some(PagedReader::new(stream, self.layout)), None);
            }
            a if a == libc::O_WRONLY || a == libc::O_RDWR => {
                let writer = if iflags & libc::O_APPEND != 0 {
                    let len = status.as_ref().map(|s| s.len).unwrap_or(0);
                    AppendWriter::new(self.backend.append(&path).await?, len)
                } else {
                    // the store cannot rewrite in place, so a plain write
                    // open starts the file over
                    self.backend.create(&path, 0o644, false).await?;
                    AppendWriter::new(self.backend.append(&path).await?, 0)
                };
                let reader = if a == libc::O_RDWR {
                    let stream = self.backend.open_read(&path).await?;
                    Some(PagedReader::new(stream, self.layout))
                } else {
                    None
                };
                self.handles.register(handle, reader, Some(writer));
            }
            _ => return Err(FsError::PermissionDenied(path)),
        }
        log::debug!("open {path} flags {flags:#o} -> handle {handle}");
        Ok(handle)
    }

    /// Create-or-truncate `path` and open a write session at offset 0.
    pub async fn create(&self, path: &str, mode: u32) -> FsResult<u64> {
        let path = norm_path(path);
        self.backend.create(&path, mode & 0o777, false).await?;
        let sink = self.backend.append(&path).await?;
        let handle = self.handles.allocate();
        self.handles.register(handle, None, Some(AppendWriter::new(sink, 0)));
        log::debug!("create {path} mode {mode:#o} -> handle {handle}");
        Ok(handle)
    }

    pub async fn read(&self, handle: u64, offset: u64, size: usize) -> FsResult<Vec<u8>> {
        let reader = self.handles.lookup_read(handle)?;
        let mut reader = reader.lock().await;
        reader.seek(offset).await?;
        let mut buf = vec![0u8; size];
        let n = reader.read(&mut buf).await?;
        buf.truncate(n);
        Ok(buf)
    }

    pub async fn write(&self, handle: u64, offset: u64, data: &[u8]) -> FsResult<usize> {
        let writer = self.handles.lookup_write(handle)?;
        let mut writer = writer.lock().await;
        writer.write(offset, data).await
    }

    /// Flush is a success on read-only or unknown handles; only a write
    /// session has anything to push out.
    pub async fn flush(&self, handle: u64) -> FsResult<()> {
        match self.handles.lookup_write(handle) {
            Ok(writer) => writer.lock().await.flush().await,
            Err(_) => Ok(()),
        }
    }

    pub async fn release(&self, handle: u64) -> FsResult<()> {
        self.handles.release(handle).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::memfs::MemBackend;
    use crate::paged::PageLayout;

    fn small_pages() -> PageLayout {
        PageLayout {
            page_size: 8,
            capacity: 4,
        }
    }

    fn rdonly() -> u32 {
        libc::O_RDONLY as u32
    }

    fn wronly(extra: i32) -> u32 {
        (libc::O_WRONLY | extra) as u32
    }

    async fn vfs_with_file(path: &str, data: &[u8]) -> Vfs<MemBackend> {
        let be = MemBackend::new();
        be.create(path, 0o644, false).await.unwrap();
        let mut out = be.append(path).await.unwrap();
        out.append(data).await.unwrap();
        out.close().await.unwrap();
        Vfs::with_layout(be, small_pages())
    }

    #[tokio::test]
    async fn open_missing_without_create_is_not_found() {
        let vfs = Vfs::new(MemBackend::new());
        let err = vfs.open("/nope", rdonly()).await.unwrap_err();
        assert!(matches!(err, FsError::NotFound(_)));
    }

    #[tokio::test]
    async fn open_with_create_makes_the_file() {
        let vfs = Vfs::new(MemBackend::new());
        let h = vfs.open("/new", wronly(libc::O_CREAT)).await.unwrap();
        assert_eq!(vfs.stat("/new").await.unwrap().len, 0);
        vfs.release(h).await.unwrap();
    }

    #[tokio::test]
    async fn exclusive_create_on_existing_collides() {
        let vfs = vfs_with_file("/f", b"x").await;
        let err = vfs
            .open("/f", wronly(libc::O_CREAT | libc::O_EXCL))
            .await
            .unwrap_err();
        assert!(matches!(err, FsError::AlreadyExists(_)));
    }

    #[tokio::test]
    async fn opening_a_directory_is_rejected() {
        let vfs = Vfs::new(MemBackend::new());
        vfs.mkdir("/d", 0o755).await.unwrap();
        let err = vfs.open("/d", rdonly()).await.unwrap_err();
        assert!(matches!(err, FsError::IsDirectory(_)));
    }

    #[tokio::test]
    async fn write_flush_read_roundtrip() {
        let vfs = Vfs::new(MemBackend::new());
        let h = vfs.open("/f", wronly(libc::O_CREAT)).await.unwrap();
        assert_eq!(vfs.write(h, 0, b"hello world").await.unwrap(), 11);
        vfs.flush(h).await.unwrap();
        vfs.release(h).await.unwrap();

        let h = vfs.open("/f", rdonly()).await.unwrap();
        assert_eq!(vfs.read(h, 6, 5).await.unwrap(), b"world");
        assert_eq!(vfs.read(h, 0, 5).await.unwrap(), b"hello");
        // reading past the end yields nothing
        assert_eq!(vfs.read(h, 11, 4).await.unwrap().len(), 0);
        vfs.release(h).await.unwrap();
        assert_eq!(vfs.open_handles(), 0);
    }

    #[tokio::test]
    async fn gap_write_reads_back_zero_filled() {
        let vfs = Vfs::new(MemBackend::new());
        let h = vfs.open("/f", wronly(libc::O_CREAT)).await.unwrap();
        vfs.write(h, 0, &[7u8; 10]).await.unwrap();
        vfs.write(h, 15, b"ABC").await.unwrap();
        vfs.release(h).await.unwrap();

        let h = vfs.open("/f", rdonly()).await.unwrap();
        let all = vfs.read(h, 0, 32).await.unwrap();
        assert_eq!(all.len(), 18);
        assert_eq!(&all[..10], &[7u8; 10]);
        assert_eq!(&all[10..15], &[0u8; 5]);
        assert_eq!(&all[15..], b"ABC");
        vfs.release(h).await.unwrap();
    }

    #[tokio::test]
    async fn append_open_rejects_writes_behind_existing_length() {
        let vfs = vfs_with_file("/f", b"12345").await;
        let h = vfs.open("/f", wronly(libc::O_APPEND)).await.unwrap();
        let err = vfs.write(h, 3, b"x").await.unwrap_err();
        assert!(matches!(err, FsError::InvalidArgument(_)));
        assert_eq!(vfs.write(h, 5, b"67").await.unwrap(), 2);
        vfs.release(h).await.unwrap();
        assert_eq!(vfs.stat("/f").await.unwrap().len, 7);
    }

    #[tokio::test]
    async fn plain_write_open_starts_the_file_over() {
        let vfs = vfs_with_file("/f", b"old content").await;
        let h = vfs.open("/f", wronly(0)).await.unwrap();
        vfs.write(h, 0, b"new").await.unwrap();
        vfs.release(h).await.unwrap();
        assert_eq!(vfs.stat("/f").await.unwrap().len, 3);
    }

    #[tokio::test]
    async fn read_write_open_owns_both_sessions() {
        let vfs = vfs_with_file("/f", b"abcdef").await;
        let h = vfs.open("/f", (libc::O_RDWR | libc::O_APPEND) as u32).await.unwrap();
        vfs.write(h, 6, b"gh").await.unwrap();
        vfs.flush(h).await.unwrap();
        assert_eq!(vfs.read(h, 4, 4).await.unwrap(), b"efgh");
        vfs.release(h).await.unwrap();
    }

    #[tokio::test]
    async fn two_handles_on_one_path_are_isolated() {
        let vfs = vfs_with_file("/f", &(0u8..64).collect::<Vec<u8>>()).await;
        let a = vfs.open("/f", rdonly()).await.unwrap();
        let b = vfs.open("/f", rdonly()).await.unwrap();
        assert_ne!(a, b);

        assert_eq!(vfs.read(a, 0, 4).await.unwrap(), vec![0, 1, 2, 3]);
        assert_eq!(vfs.read(b, 32, 4).await.unwrap(), vec![32, 33, 34, 35]);
        // closing one leaves the other fully functional
        vfs.release(b).await.unwrap();
        assert_eq!(vfs.read(a, 4, 4).await.unwrap(), vec![4, 5, 6, 7]);
        vfs.release(a).await.unwrap();
    }

    #[tokio::test]
    async fn io_on_released_handle_is_bad_handle() {
        let vfs = vfs_with_file("/f", b"data").await;
        let h = vfs.open("/f", rdonly()).await.unwrap();
        vfs.release(h).await.unwrap();
        assert!(matches!(vfs.read(h, 0, 4).await, Err(FsError::BadHandle(_))));
        assert!(matches!(vfs.write(h, 0, b"x").await, Err(FsError::BadHandle(_))));
        assert!(matches!(vfs.release(h).await, Err(FsError::BadHandle(_))));
    }

    #[tokio::test]
    async fn readdir_of_file_is_not_a_directory() {
        let vfs = vfs_with_file("/f", b"x").await;
        assert!(matches!(
            vfs.readdir("/f").await,
            Err(FsError::NotDirectory(_))
        ));
    }

    #[tokio::test]
    async fn unlink_and_rmdir_check_entry_kind() {
        let vfs = vfs_with_file("/f", b"x").await;
        vfs.mkdir("/d", 0o755).await.unwrap();
        assert!(matches!(vfs.rmdir("/f").await, Err(FsError::NotDirectory(_))));
        assert!(matches!(vfs.unlink("/d").await, Err(FsError::IsDirectory(_))));
        vfs.unlink("/f").await.unwrap();
        vfs.rmdir("/d").await.unwrap();
        assert!(matches!(vfs.stat("/f").await, Err(FsError::NotFound(_))));
    }

    #[tokio::test]
    async fn rename_updates_namespace_paths() {
        let vfs = vfs_with_file("/d/f", b"x").await;
        let d = vfs.intern("/d", ROOT_INO);
        let f = vfs.intern("/d/f", d);
        vfs.rename("/d", "/e").await.unwrap();
        assert_eq!(vfs.path_of(f).as_deref(), Some("/e/f"));
        assert_eq!(vfs.stat("/e/f").await.unwrap().len, 1);
    }

    #[tokio::test]
    async fn truncate_rejects_directories() {
        let vfs = Vfs::new(MemBackend::new());
        vfs.mkdir("/d", 0o755).await.unwrap();
        assert!(matches!(
            vfs.truncate("/d", 0).await,
            Err(FsError::IsDirectory(_))
        ));
    }

    #[tokio::test]
    async fn namespace_interning_is_stable() {
        let vfs = vfs_with_file("/a", b"x").await;
        let i1 = vfs.intern("/a", ROOT_INO);
        let i2 = vfs.intern("/a", ROOT_INO);
        assert_eq!(i1, i2);
        assert_eq!(vfs.path_of(i1).as_deref(), Some("/a"));
        assert_eq!(vfs.parent_of(i1), Some(ROOT_INO));
        assert_eq!(vfs.child_path(ROOT_INO, "a").unwrap(), "/a");
    }
}
