//! In-memory backend for unit tests and the demo.
//!
//! Keeps the whole namespace in one locked map keyed by normalized path, the
//! way a mock store should: cheap, deterministic, and honest about the
//! append-only write contract (appends buffer locally and become visible on
//! flush).

use crate::backend::client::{
    DfsAppender, DfsBackend, DfsReader, DirEntry, EntryKind, FileStatus, StorageStatus, XAttrMode,
};
use crate::error::{FsError, FsResult};
use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};
use std::time::{SystemTime, UNIX_EPOCH};

fn now_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

pub(crate) fn norm_path(p: &str) -> String {
    let parts: Vec<&str> = p.split('/').filter(|s| !s.is_empty()).collect();
    let mut out = String::from("/");
    out.push_str(&parts.join("/"));
    out
}

fn parent_of(path: &str) -> Option<String> {
    if path == "/" {
        return None;
    }
    match path.rfind('/') {
        Some(0) => Some("/".to_string()),
        Some(n) => Some(path[..n].to_string()),
        None => Some("/".to_string()),
    }
}

struct MemNode {
    kind: EntryKind,
    data: Vec<u8>,
    perm: u32,
    atime_ms: i64,
    mtime_ms: i64,
    xattrs: BTreeMap<String, Vec<u8>>,
}

impl MemNode {
    fn dir(perm: u32) -> Self {
        let t = now_ms();
        Self {
            kind: EntryKind::Dir,
            data: Vec::new(),
            perm,
            atime_ms: t,
            mtime_ms: t,
            xattrs: BTreeMap::new(),
        }
    }

    fn file(perm: u32) -> Self {
        let t = now_ms();
        Self {
            kind: EntryKind::File,
            data: Vec::new(),
            perm,
            atime_ms: t,
            mtime_ms: t,
            xattrs: BTreeMap::new(),
        }
    }

    fn status(&self) -> FileStatus {
        FileStatus {
            kind: self.kind,
            len: self.data.len() as u64,
            perm: self.perm,
            atime_ms: self.atime_ms,
            mtime_ms: self.mtime_ms,
        }
    }
}

type Tree = Arc<Mutex<HashMap<String, MemNode>>>;

/// In-memory store. Cloning shares the underlying tree.
#[derive(Clone)]
pub struct MemBackend {
    tree: Tree,
}

impl Default for MemBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl MemBackend {
    pub fn new() -> Self {
        let mut map = HashMap::new();
        map.insert("/".to_string(), MemNode::dir(0o755));
        Self {
            tree: Arc::new(Mutex::new(map)),
        }
    }

    fn ensure_parents(map: &mut HashMap<String, MemNode>, path: &str, perm: u32) -> FsResult<()> {
        let mut missing = Vec::new();
        let mut cur = parent_of(path);
        while let Some(p) = cur {
            match map.get(&p) {
                Some(n) if n.kind == EntryKind::Dir => break,
                Some(_) => return Err(FsError::NotDirectory(p)),
                None => {
                    cur = parent_of(&p);
                    missing.push(p);
                }
            }
        }
        for p in missing.into_iter().rev() {
            map.insert(p, MemNode::dir(perm));
        }
        Ok(())
    }
}

#[async_trait]
impl DfsBackend for MemBackend {
    async fn stat(&self, path: &str) -> FsResult<FileStatus> {
        let path = norm_path(path);
        let map = self.tree.lock().unwrap();
        map.get(&path)
            .map(|n| n.status())
            .ok_or(FsError::NotFound(path))
    }

    async fn list_dir(&self, path: &str) -> FsResult<Vec<DirEntry>> {
        let path = norm_path(path);
        let map = self.tree.lock().unwrap();
        let node = map.get(&path).ok_or_else(|| FsError::NotFound(path.clone()))?;
        if node.kind != EntryKind::Dir {
            return Err(FsError::NotDirectory(path));
        }
        let prefix = if path == "/" { "/".to_string() } else { format!("{path}/") };
        let mut out = Vec::new();
        for (p, n) in map.iter() {
            if p == "/" || !p.starts_with(&prefix) {
                continue;
            }
            let rest = &p[prefix.len()..];
            if rest.is_empty() || rest.contains('/') {
                continue;
            }
            out.push(DirEntry {
                name: rest.to_string(),
                status: n.status(),
            });
        }
        out.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(out)
    }

    async fn open_read(&self, path: &str) -> FsResult<Box<dyn DfsReader>> {
        let path = norm_path(path);
        {
            let map = self.tree.lock().unwrap();
            let node = map.get(&path).ok_or_else(|| FsError::NotFound(path.clone()))?;
            if node.kind != EntryKind::File {
                return Err(FsError::IsDirectory(path.clone()));
            }
        }
        Ok(Box::new(MemReader {
            tree: self.tree.clone(),
            path,
            pos: 0,
        }))
    }

    async fn create(&self, path: &str, perm: u32, exclusive: bool) -> FsResult<()> {
        let path = norm_path(path);
        let mut map = self.tree.lock().unwrap();
        match map.get_mut(&path) {
            Some(n) if n.kind == EntryKind::Dir => Err(FsError::IsDirectory(path)),
            Some(_) if exclusive => Err(FsError::AlreadyExists(path)),
            Some(n) => {
                n.data.clear();
                n.mtime_ms = now_ms();
                Ok(())
            }
            None => {
                Self::ensure_parents(&mut map, &path, 0o755)?;
                map.insert(path, MemNode::file(perm));
                Ok(())
            }
        }
    }

    async fn append(&self, path: &str) -> FsResult<Box<dyn DfsAppender>> {
        let path = norm_path(path);
        {
            let map = self.tree.lock().unwrap();
            let node = map.get(&path).ok_or_else(|| FsError::NotFound(path.clone()))?;
            if node.kind != EntryKind::File {
                return Err(FsError::IsDirectory(path.clone()));
            }
        }
        Ok(Box::new(MemAppender {
            tree: self.tree.clone(),
            path,
            pending: Vec::new(),
        }))
    }

    async fn delete(&self, path: &str, recursive: bool) -> FsResult<()> {
        let path = norm_path(path);
        let mut map = self.tree.lock().unwrap();
        let node = map.get(&path).ok_or_else(|| FsError::NotFound(path.clone()))?;
        if node.kind == EntryKind::Dir {
            let prefix = format!("{path}/");
            let children: Vec<String> =
                map.keys().filter(|p| p.starts_with(&prefix)).cloned().collect();
            if !children.is_empty() && !recursive {
                return Err(FsError::IoFailure(format!("directory not empty: {path}")));
            }
            for c in children {
                map.remove(&c);
            }
        }
        map.remove(&path);
        Ok(())
    }

    async fn rename(&self, from: &str, to: &str) -> FsResult<()> {
        let from = norm_path(from);
        let to = norm_path(to);
        let mut map = self.tree.lock().unwrap();
        if !map.contains_key(&from) {
            return Err(FsError::NotFound(from));
        }
        if map.contains_key(&to) {
            return Err(FsError::AlreadyExists(to));
        }
        Self::ensure_parents(&mut map, &to, 0o755)?;
        let moved: Vec<(String, String)> = map
            .keys()
            .filter(|p| **p == from || p.starts_with(&format!("{from}/")))
            .map(|p| (p.clone(), format!("{to}{}", &p[from.len()..])))
            .collect();
        for (old, new) in moved {
            let node = map.remove(&old).unwrap();
            map.insert(new, node);
        }
        Ok(())
    }

    async fn mkdir(&self, path: &str, perm: u32) -> FsResult<()> {
        let path = norm_path(path);
        let mut map = self.tree.lock().unwrap();
        match map.get(&path) {
            Some(n) if n.kind == EntryKind::Dir => Ok(()),
            Some(_) => Err(FsError::NotDirectory(path)),
            None => {
                Self::ensure_parents(&mut map, &path, perm)?;
                map.insert(path, MemNode::dir(perm));
                Ok(())
            }
        }
    }

    async fn set_permission(&self, path: &str, perm: u32) -> FsResult<()> {
        let path = norm_path(path);
        let mut map = self.tree.lock().unwrap();
        let node = map.get_mut(&path).ok_or(FsError::NotFound(path.clone()))?;
        node.perm = perm & 0o777;
        Ok(())
    }

    async fn set_times(&self, path: &str, atime_ms: i64, mtime_ms: i64) -> FsResult<()> {
        let path = norm_path(path);
        let mut map = self.tree.lock().unwrap();
        let node = map.get_mut(&path).ok_or(FsError::NotFound(path.clone()))?;
        node.atime_ms = atime_ms;
        node.mtime_ms = mtime_ms;
        Ok(())
    }

    async fn truncate(&self, path: &str, size: u64) -> FsResult<bool> {
        let path = norm_path(path);
        let mut map = self.tree.lock().unwrap();
        let node = map.get_mut(&path).ok_or(FsError::NotFound(path.clone()))?;
        if node.kind != EntryKind::File {
            return Err(FsError::IsDirectory(path));
        }
        node.data.resize(size as usize, 0);
        node.mtime_ms = now_ms();
        Ok(true)
    }

    async fn get_xattr(&self, path: &str, name: &str) -> FsResult<Vec<u8>> {
        let path = norm_path(path);
        let map = self.tree.lock().unwrap();
        let node = map.get(&path).ok_or_else(|| FsError::NotFound(path.clone()))?;
        node.xattrs
            .get(name)
            .cloned()
            .ok_or_else(|| FsError::IoFailure(format!("no attribute {name} on {path}")))
    }

    async fn set_xattr(
        &self,
        path: &str,
        name: &str,
        value: &[u8],
        mode: XAttrMode,
    ) -> FsResult<()> {
        let path = norm_path(path);
        let mut map = self.tree.lock().unwrap();
        let node = map.get_mut(&path).ok_or(FsError::NotFound(path.clone()))?;
        let present = node.xattrs.contains_key(name);
        match mode {
            XAttrMode::Create if present => {
                return Err(FsError::AlreadyExists(format!("{path}#{name}")));
            }
            XAttrMode::Replace if !present => {
                return Err(FsError::IoFailure(format!("no attribute {name} on {path}")));
            }
            _ => {}
        }
        node.xattrs.insert(name.to_string(), value.to_vec());
        Ok(())
    }

    async fn remove_xattr(&self, path: &str, name: &str) -> FsResult<()> {
        let path = norm_path(path);
        let mut map = self.tree.lock().unwrap();
        let node = map.get_mut(&path).ok_or(FsError::NotFound(path.clone()))?;
        node.xattrs
            .remove(name)
            .map(|_| ())
            .ok_or_else(|| FsError::IoFailure(format!("no attribute {name} on {path}")))
    }

    async fn list_xattr(&self, path: &str) -> FsResult<Vec<String>> {
        let path = norm_path(path);
        let map = self.tree.lock().unwrap();
        let node = map.get(&path).ok_or_else(|| FsError::NotFound(path.clone()))?;
        Ok(node.xattrs.keys().cloned().collect())
    }

    async fn status(&self) -> FsResult<StorageStatus> {
        let map = self.tree.lock().unwrap();
        let used: u64 = map.values().map(|n| n.data.len() as u64).sum();
        let capacity = 1 << 34;
        Ok(StorageStatus {
            capacity,
            used,
            remaining: capacity - used.min(capacity),
            block_size: 4096,
        })
    }
}

struct MemReader {
    tree: Tree,
    path: String,
    pos: u64,
}

#[async_trait]
impl DfsReader for MemReader {
    async fn seek(&mut self, pos: u64) -> FsResult<()> {
        self.pos = pos;
        Ok(())
    }

    async fn read(&mut self, buf: &mut [u8]) -> FsResult<usize> {
        let map = self.tree.lock().unwrap();
        let node = map
            .get(&self.path)
            .ok_or_else(|| FsError::NotFound(self.path.clone()))?;
        let data = &node.data;
        let start = (self.pos as usize).min(data.len());
        let n = buf.len().min(data.len() - start);
        buf[..n].copy_from_slice(&data[start..start + n]);
        self.pos += n as u64;
        Ok(n)
    }

    fn position(&self) -> u64 {
        self.pos
    }

    async fn close(&mut self) -> FsResult<()> {
        Ok(())
    }
}

struct MemAppender {
    tree: Tree,
    path: String,
    pending: Vec<u8>,
}

#[async_trait]
impl DfsAppender for MemAppender {
    async fn append(&mut self, buf: &[u8]) -> FsResult<()> {
        self.pending.extend_from_slice(buf);
        Ok(())
    }

    async fn flush(&mut self) -> FsResult<()> {
        if self.pending.is_empty() {
            return Ok(());
        }
        let mut map = self.tree.lock().unwrap();
        let node = map
            .get_mut(&self.path)
            .ok_or_else(|| FsError::NotFound(self.path.clone()))?;
        node.data.append(&mut self.pending);
        node.mtime_ms = now_ms();
        Ok(())
    }

    async fn close(&mut self) -> FsResult<()> {
        self.flush().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn create_append_flush_read_back() {
        let be = MemBackend::new();
        be.create("/a/b/f.txt", 0o644, false).await.unwrap();
        let mut out = be.append("/a/b/f.txt").await.unwrap();
        out.append(b"hello").await.unwrap();
        // not visible before flush
        assert_eq!(be.stat("/a/b/f.txt").await.unwrap().len, 0);
        out.flush().await.unwrap();
        assert_eq!(be.stat("/a/b/f.txt").await.unwrap().len, 5);

        let mut r = be.open_read("/a/b/f.txt").await.unwrap();
        let mut buf = [0u8; 16];
        let n = r.read(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], b"hello");
    }

    #[tokio::test]
    async fn exclusive_create_collides() {
        let be = MemBackend::new();
        be.create("/f", 0o644, false).await.unwrap();
        let err = be.create("/f", 0o644, true).await.unwrap_err();
        assert!(matches!(err, FsError::AlreadyExists(_)));
    }

    #[tokio::test]
    async fn list_dir_sees_direct_children_only() {
        let be = MemBackend::new();
        be.mkdir("/d/sub", 0o755).await.unwrap();
        be.create("/d/f", 0o644, false).await.unwrap();
        be.create("/d/sub/g", 0o644, false).await.unwrap();
        let names: Vec<String> = be
            .list_dir("/d")
            .await
            .unwrap()
            .into_iter()
            .map(|e| e.name)
            .collect();
        assert_eq!(names, vec!["f".to_string(), "sub".to_string()]);
    }

    #[tokio::test]
    async fn rename_moves_subtree() {
        let be = MemBackend::new();
        be.create("/d/f", 0o644, false).await.unwrap();
        be.rename("/d", "/e").await.unwrap();
        assert!(be.stat("/d/f").await.is_err());
        assert_eq!(be.stat("/e/f").await.unwrap().kind, EntryKind::File);
    }

    #[tokio::test]
    async fn xattr_roundtrip_and_modes() {
        let be = MemBackend::new();
        be.create("/f", 0o644, false).await.unwrap();
        be.set_xattr("/f", "user.k", b"v", XAttrMode::Create).await.unwrap();
        assert!(
            be.set_xattr("/f", "user.k", b"v2", XAttrMode::Create)
                .await
                .is_err()
        );
        be.set_xattr("/f", "user.k", b"v2", XAttrMode::Replace).await.unwrap();
        assert_eq!(be.get_xattr("/f", "user.k").await.unwrap(), b"v2");
        assert_eq!(be.list_xattr("/f").await.unwrap(), vec!["user.k".to_string()]);
        be.remove_xattr("/f", "user.k").await.unwrap();
        assert!(be.get_xattr("/f", "user.k").await.is_err());
    }
}
