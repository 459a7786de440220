//! Local-directory backend: maps the store namespace onto a directory tree
//! via `tokio::fs`, keeping the append-only write discipline (files are only
//! ever opened for append).
//!
//! Development/demo backend; extended attributes and time updates are not
//! wired, which the capability descriptor reflects.

use crate::backend::client::{
    DfsAppender, DfsBackend, DfsReader, DirEntry, EntryKind, FileStatus, StorageStatus, XAttrMode,
};
use crate::backend::memfs::norm_path;
use crate::error::{FsError, FsResult};
use async_trait::async_trait;
use std::io::SeekFrom;
use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;
use tokio::fs;
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt};

pub struct LocalDirBackend {
    root: PathBuf,
}

impl LocalDirBackend {
    pub fn new<P: AsRef<Path>>(root: P) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
        }
    }

    fn resolve(&self, path: &str) -> PathBuf {
        let norm = norm_path(path);
        self.root.join(norm.trim_start_matches('/'))
    }

    fn status_of(meta: &std::fs::Metadata) -> FileStatus {
        let mtime_ms = meta
            .modified()
            .ok()
            .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
            .map(|d| d.as_millis() as i64)
            .unwrap_or(0);
        let atime_ms = meta
            .accessed()
            .ok()
            .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
            .map(|d| d.as_millis() as i64)
            .unwrap_or(mtime_ms);
        FileStatus {
            kind: if meta.is_dir() { EntryKind::Dir } else { EntryKind::File },
            len: meta.len(),
            perm: permissions_of(meta),
            atime_ms,
            mtime_ms,
        }
    }
}

#[cfg(unix)]
fn permissions_of(meta: &std::fs::Metadata) -> u32 {
    use std::os::unix::fs::PermissionsExt;
    meta.permissions().mode() & 0o777
}

#[cfg(not(unix))]
fn permissions_of(_meta: &std::fs::Metadata) -> u32 {
    0o644
}

#[async_trait]
impl DfsBackend for LocalDirBackend {
    async fn stat(&self, path: &str) -> FsResult<FileStatus> {
        let meta = fs::metadata(self.resolve(path)).await?;
        Ok(Self::status_of(&meta))
    }

    async fn list_dir(&self, path: &str) -> FsResult<Vec<DirEntry>> {
        let target = self.resolve(path);
        let meta = fs::metadata(&target).await?;
        if !meta.is_dir() {
            return Err(FsError::NotDirectory(norm_path(path)));
        }
        let mut rd = fs::read_dir(&target).await?;
        let mut out = Vec::new();
        while let Some(entry) = rd.next_entry().await? {
            let meta = entry.metadata().await?;
            out.push(DirEntry {
                name: entry.file_name().to_string_lossy().into_owned(),
                status: Self::status_of(&meta),
            });
        }
        out.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(out)
    }

    async fn open_read(&self, path: &str) -> FsResult<Box<dyn DfsReader>> {
        let target = self.resolve(path);
        let meta = fs::metadata(&target).await?;
        if meta.is_dir() {
            return Err(FsError::IsDirectory(norm_path(path)));
        }
        let file = fs::File::open(&target).await?;
        Ok(Box::new(LocalReader { file, pos: 0 }))
    }

    async fn create(&self, path: &str, perm: u32, exclusive: bool) -> FsResult<()> {
        let target = self.resolve(path);
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent).await?;
        }
        let mut opts = fs::OpenOptions::new();
        opts.write(true);
        if exclusive {
            opts.create_new(true);
        } else {
            opts.create(true).truncate(true);
        }
        let file = opts.open(&target).await?;
        drop(file);
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(&target, std::fs::Permissions::from_mode(perm & 0o777)).await?;
        }
        #[cfg(not(unix))]
        let _ = perm;
        Ok(())
    }

    async fn append(&self, path: &str) -> FsResult<Box<dyn DfsAppender>> {
        let target = self.resolve(path);
        let file = fs::OpenOptions::new().append(true).open(&target).await?;
        Ok(Box::new(LocalAppender { file }))
    }

    async fn delete(&self, path: &str, recursive: bool) -> FsResult<()> {
        let target = self.resolve(path);
        let meta = fs::metadata(&target).await?;
        if meta.is_dir() {
            if recursive {
                fs::remove_dir_all(&target).await?;
            } else {
                fs::remove_dir(&target).await?;
            }
        } else {
            fs::remove_file(&target).await?;
        }
        Ok(())
    }

    async fn rename(&self, from: &str, to: &str) -> FsResult<()> {
        let dst = self.resolve(to);
        if let Some(parent) = dst.parent() {
            fs::create_dir_all(parent).await?;
        }
        fs::rename(self.resolve(from), dst).await?;
        Ok(())
    }

    async fn mkdir(&self, path: &str, perm: u32) -> FsResult<()> {
        let target = self.resolve(path);
        fs::create_dir_all(&target).await?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(&target, std::fs::Permissions::from_mode(perm & 0o777)).await?;
        }
        #[cfg(not(unix))]
        let _ = perm;
        Ok(())
    }

    async fn set_permission(&self, path: &str, perm: u32) -> FsResult<()> {
        let target = self.resolve(path);
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(&target, std::fs::Permissions::from_mode(perm & 0o777)).await?;
        }
        #[cfg(not(unix))]
        {
            let _ = target;
            let _ = perm;
        }
        Ok(())
    }

    async fn set_times(&self, path: &str, _atime_ms: i64, _mtime_ms: i64) -> FsResult<()> {
        // No portable std way to set file times without another crate; accept
        // and ignore, the same stance the store takes for truncate.
        fs::metadata(self.resolve(path)).await?;
        Ok(())
    }

    async fn truncate(&self, path: &str, size: u64) -> FsResult<bool> {
        let target = self.resolve(path);
        let file = fs::OpenOptions::new().write(true).open(&target).await?;
        file.set_len(size).await?;
        Ok(true)
    }

    async fn get_xattr(&self, _path: &str, name: &str) -> FsResult<Vec<u8>> {
        Err(FsError::IoFailure(format!("xattr {name} unsupported")))
    }

    async fn set_xattr(
        &self,
        _path: &str,
        name: &str,
        _value: &[u8],
        _mode: XAttrMode,
    ) -> FsResult<()> {
        Err(FsError::IoFailure(format!("xattr {name} unsupported")))
    }

    async fn remove_xattr(&self, _path: &str, name: &str) -> FsResult<()> {
        Err(FsError::IoFailure(format!("xattr {name} unsupported")))
    }

    async fn list_xattr(&self, _path: &str) -> FsResult<Vec<String>> {
        Err(FsError::IoFailure("xattr unsupported".to_string()))
    }

    fn supports_xattr(&self) -> bool {
        false
    }

    async fn status(&self) -> FsResult<StorageStatus> {
        // std exposes no portable filesystem usage query; report a fixed
        // generous capacity.
        let capacity = 1u64 << 40;
        Ok(StorageStatus {
            capacity,
            used: 0,
            remaining: capacity,
            block_size: 4096,
        })
    }
}

struct LocalReader {
    file: fs::File,
    pos: u64,
}

#[async_trait]
impl DfsReader for LocalReader {
    async fn seek(&mut self, pos: u64) -> FsResult<()> {
        self.file.seek(SeekFrom::Start(pos)).await?;
        self.pos = pos;
        Ok(())
    }

    async fn read(&mut self, buf: &mut [u8]) -> FsResult<usize> {
        let n = self.file.read(buf).await?;
        self.pos += n as u64;
        Ok(n)
    }

    fn position(&self) -> u64 {
        self.pos
    }

    async fn close(&mut self) -> FsResult<()> {
        self.file.flush().await?;
        Ok(())
    }
}

struct LocalAppender {
    file: fs::File,
}

#[async_trait]
impl DfsAppender for LocalAppender {
    async fn append(&mut self, buf: &[u8]) -> FsResult<()> {
        self.file.write_all(buf).await?;
        Ok(())
    }

    async fn flush(&mut self) -> FsResult<()> {
        self.file.flush().await?;
        Ok(())
    }

    async fn close(&mut self) -> FsResult<()> {
        self.file.flush().await?;
        self.file.sync_data().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn local_backend_create_append_read() {
        let tmp = tempfile::tempdir().unwrap();
        let be = LocalDirBackend::new(tmp.path());

        be.create("/a/f.bin", 0o644, false).await.unwrap();
        let mut out = be.append("/a/f.bin").await.unwrap();
        out.append(b"0123456789").await.unwrap();
        out.close().await.unwrap();

        let st = be.stat("/a/f.bin").await.unwrap();
        assert_eq!(st.len, 10);
        assert_eq!(st.kind, EntryKind::File);

        let mut r = be.open_read("/a/f.bin").await.unwrap();
        r.seek(4).await.unwrap();
        let mut buf = [0u8; 3];
        let n = r.read(&mut buf).await.unwrap();
        assert_eq!(n, 3);
        assert_eq!(&buf, b"456");
    }

    #[tokio::test]
    async fn missing_paths_report_not_found() {
        let tmp = tempfile::tempdir().unwrap();
        let be = LocalDirBackend::new(tmp.path());
        assert!(matches!(be.stat("/nope").await, Err(FsError::NotFound(_))));
        assert!(matches!(
            be.append("/nope").await.err().unwrap(),
            FsError::NotFound(_)
        ));
    }
}
