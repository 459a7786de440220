//! FUSE adapter: binds the kernel-facing callback surface to the path-level
//! façade. Translation only — every decision about sessions, flags and
//! errors lives in `crate::vfs`.
//!
//! Submodules:
//! - `mount`: thin wrappers over rfuse3 session mounting.

pub mod mount;

use crate::backend::client::{DfsBackend, EntryKind, FileStatus, XAttrMode};
use crate::error::FsError;
use crate::vfs::fs::Vfs;
use bytes::Bytes;
use futures_util::stream::{self, Stream};
use rfuse3::raw::reply::{
    DirectoryEntry, DirectoryEntryPlus, FileAttr, ReplyAttr, ReplyCreated, ReplyData,
    ReplyDirectory, ReplyDirectoryPlus, ReplyEntry, ReplyInit, ReplyOpen, ReplyStatFs,
    ReplyWrite, ReplyXAttr,
};
use rfuse3::raw::{Filesystem, Request};
use rfuse3::{FileType as FuseFileType, Result as FuseResult, SetAttr, Timestamp};
use std::ffi::{OsStr, OsString};
use std::num::NonZeroU32;
use std::pin::Pin;
use std::time::Duration;

const TTL: Duration = Duration::from_secs(1);

fn errno(e: FsError) -> rfuse3::Errno {
    log::debug!("operation failed: {e}");
    rfuse3::Errno::from(e.errno())
}

fn kind_to_fuse(kind: EntryKind) -> FuseFileType {
    match kind {
        EntryKind::Dir => FuseFileType::Directory,
        EntryKind::File => FuseFileType::RegularFile,
    }
}

fn ts_from_ms(ms: i64) -> Timestamp {
    let ms = ms.max(0);
    Timestamp::new(ms / 1000, ((ms % 1000) * 1_000_000) as u32)
}

fn ms_from_ts(ts: Timestamp) -> i64 {
    ts.sec * 1000 + (ts.nsec / 1_000_000) as i64
}

fn status_to_attr(ino: u64, status: &FileStatus, req: &Request) -> FileAttr {
    FileAttr {
        ino,
        size: status.len,
        blocks: status.len.div_ceil(512),
        atime: ts_from_ms(status.atime_ms),
        mtime: ts_from_ms(status.mtime_ms),
        ctime: ts_from_ms(status.mtime_ms),
        #[cfg(target_os = "macos")]
        crtime: ts_from_ms(status.mtime_ms),
        kind: kind_to_fuse(status.kind),
        perm: status.perm as u16,
        nlink: 1,
        uid: req.uid,
        gid: req.gid,
        rdev: 0,
        #[cfg(target_os = "macos")]
        flags: 0,
        blksize: 4096,
    }
}

/// Size-probe protocol shared by getxattr and listxattr: size 0 asks for the
/// value's length, a too-small buffer is ERANGE, otherwise the data goes out.
fn xattr_reply(value: Vec<u8>, size: u32) -> FuseResult<ReplyXAttr> {
    if size == 0 {
        Ok(ReplyXAttr::Size(value.len() as u32))
    } else if value.len() as u32 > size {
        Err(libc::ERANGE.into())
    } else {
        Ok(ReplyXAttr::Data(Bytes::from(value)))
    }
}

impl<B> Filesystem for Vfs<B>
where
    B: DfsBackend,
{
    type DirEntryStream<'a>
        = Pin<Box<dyn Stream<Item = FuseResult<DirectoryEntry>> + Send + 'a>>
    where
        Self: 'a;

    type DirEntryPlusStream<'a>
        = Pin<Box<dyn Stream<Item = FuseResult<DirectoryEntryPlus>> + Send + 'a>>
    where
        Self: 'a;

    async fn init(&self, _req: Request) -> FuseResult<ReplyInit> {
        let max_write = NonZeroU32::new(1024 * 1024).unwrap();
        Ok(ReplyInit { max_write })
    }

    async fn destroy(&self, _req: Request) {
        let remaining = self.open_handles();
        if remaining > 0 {
            log::warn!("unmounting with {remaining} handles still open");
        }
    }

    async fn lookup(&self, req: Request, parent: u64, name: &OsStr) -> FuseResult<ReplyEntry> {
        let name = name.to_string_lossy();
        let path = self.child_path(parent, name.as_ref()).map_err(errno)?;
        let status = self.stat(&path).await.map_err(errno)?;
        let ino = self.intern(&path, parent);
        Ok(ReplyEntry {
            ttl: TTL,
            attr: status_to_attr(ino, &status, &req),
            generation: 0,
        })
    }

    async fn getattr(
        &self,
        req: Request,
        ino: u64,
        _fh: Option<u64>,
        _flags: u32,
    ) -> FuseResult<ReplyAttr> {
        let Some(path) = self.path_of(ino) else {
            return Err(libc::ENOENT.into());
        };
        let status = self.stat(&path).await.map_err(errno)?;
        Ok(ReplyAttr {
            ttl: TTL,
            attr: status_to_attr(ino, &status, &req),
        })
    }

    async fn setattr(
        &self,
        req: Request,
        ino: u64,
        _fh: Option<u64>,
        set_attr: SetAttr,
    ) -> FuseResult<ReplyAttr> {
        let Some(path) = self.path_of(ino) else {
            return Err(libc::ENOENT.into());
        };
        if let Some(size) = set_attr.size {
            self.truncate(&path, size).await.map_err(errno)?;
        }
        if let Some(mode) = set_attr.mode {
            self.chmod(&path, mode).await.map_err(errno)?;
        }
        if set_attr.atime.is_some() || set_attr.mtime.is_some() {
            let current = self.stat(&path).await.map_err(errno)?;
            let atime = set_attr.atime.map(ms_from_ts).unwrap_or(current.atime_ms);
            let mtime = set_attr.mtime.map(ms_from_ts).unwrap_or(current.mtime_ms);
            self.utimens(&path, atime, mtime).await.map_err(errno)?;
        }
        let status = self.stat(&path).await.map_err(errno)?;
        Ok(ReplyAttr {
            ttl: TTL,
            attr: status_to_attr(ino, &status, &req),
        })
    }

    async fn open(&self, _req: Request, ino: u64, flags: u32) -> FuseResult<ReplyOpen> {
        let Some(path) = self.path_of(ino) else {
            return Err(libc::ENOENT.into());
        };
        let fh = Vfs::open(self, &path, flags).await.map_err(errno)?;
        Ok(ReplyOpen { fh, flags: 0 })
    }

    async fn opendir(&self, _req: Request, ino: u64, _flags: u32) -> FuseResult<ReplyOpen> {
        let Some(path) = self.path_of(ino) else {
            return Err(libc::ENOENT.into());
        };
        let status = self.stat(&path).await.map_err(errno)?;
        if status.kind != EntryKind::Dir {
            return Err(libc::ENOTDIR.into());
        }
        Ok(ReplyOpen { fh: 0, flags: 0 })
    }

    async fn create(
        &self,
        req: Request,
        parent: u64,
        name: &OsStr,
        mode: u32,
        _flags: u32,
    ) -> FuseResult<ReplyCreated> {
        let name = name.to_string_lossy();
        let path = self.child_path(parent, name.as_ref()).map_err(errno)?;
        let fh = Vfs::create(self, &path, mode).await.map_err(errno)?;
        let status = self.stat(&path).await.map_err(errno)?;
        let ino = self.intern(&path, parent);
        Ok(ReplyCreated {
            ttl: TTL,
            attr: status_to_attr(ino, &status, &req),
            generation: 0,
            fh,
            flags: 0,
        })
    }

    async fn mknod(
        &self,
        req: Request,
        parent: u64,
        name: &OsStr,
        mode: u32,
        _rdev: u32,
    ) -> FuseResult<ReplyEntry> {
        let name = name.to_string_lossy();
        let path = self.child_path(parent, name.as_ref()).map_err(errno)?;
        self.mknod(&path, mode).await.map_err(errno)?;
        let status = self.stat(&path).await.map_err(errno)?;
        let ino = self.intern(&path, parent);
        Ok(ReplyEntry {
            ttl: TTL,
            attr: status_to_attr(ino, &status, &req),
            generation: 0,
        })
    }

    async fn read(
        &self,
        _req: Request,
        _ino: u64,
        fh: u64,
        offset: u64,
        size: u32,
    ) -> FuseResult<ReplyData> {
        let data = Vfs::read(self, fh, offset, size as usize).await.map_err(errno)?;
        Ok(ReplyData {
            data: Bytes::from(data),
        })
    }

    async fn write(
        &self,
        _req: Request,
        _ino: u64,
        fh: u64,
        offset: u64,
        data: &[u8],
        _write_flags: u32,
        _flags: u32,
    ) -> FuseResult<ReplyWrite> {
        let written = Vfs::write(self, fh, offset, data).await.map_err(errno)? as u32;
        Ok(ReplyWrite { written })
    }

    async fn flush(
        &self,
        _req: Request,
        _inode: u64,
        fh: u64,
        _lock_owner: u64,
    ) -> FuseResult<()> {
        Vfs::flush(self, fh).await.map_err(errno)
    }

    async fn fsync(&self, _req: Request, _inode: u64, fh: u64, _datasync: bool) -> FuseResult<()> {
        Vfs::flush(self, fh).await.map_err(errno)
    }

    async fn release(
        &self,
        _req: Request,
        _inode: u64,
        fh: u64,
        _flags: u32,
        _lock_owner: u64,
        _flush: bool,
    ) -> FuseResult<()> {
        Vfs::release(self, fh).await.map_err(errno)
    }

    async fn releasedir(
        &self,
        _req: Request,
        _inode: u64,
        _fh: u64,
        _flags: u32,
    ) -> FuseResult<()> {
        Ok(())
    }

    async fn fsyncdir(
        &self,
        _req: Request,
        _inode: u64,
        _fh: u64,
        _datasync: bool,
    ) -> FuseResult<()> {
        Ok(())
    }

    async fn readdir<'a>(
        &'a self,
        _req: Request,
        ino: u64,
        _fh: u64,
        offset: i64,
    ) -> FuseResult<ReplyDirectory<Self::DirEntryStream<'a>>> {
        let Some(path) = self.path_of(ino) else {
            return Err(libc::ENOENT.into());
        };
        let entries = Vfs::readdir(self, &path).await.map_err(errno)?;

        let mut all: Vec<DirectoryEntry> = Vec::with_capacity(entries.len() + 2);
        all.push(DirectoryEntry {
            inode: ino,
            kind: FuseFileType::Directory,
            name: OsString::from("."),
            offset: 1,
        });
        let parent_ino = self.parent_of(ino).unwrap_or(crate::vfs::ROOT_INO);
        all.push(DirectoryEntry {
            inode: parent_ino,
            kind: FuseFileType::Directory,
            name: OsString::from(".."),
            offset: 2,
        });
        for (i, e) in entries.iter().enumerate() {
            let child_path = if path == "/" {
                format!("/{}", e.name)
            } else {
                format!("{}/{}", path, e.name)
            };
            let child_ino = self.intern(&child_path, ino);
            all.push(DirectoryEntry {
                inode: child_ino,
                kind: kind_to_fuse(e.status.kind),
                name: OsString::from(e.name.clone()),
                offset: (i as i64) + 3,
            });
        }

        let start = if offset <= 0 { 0 } else { offset as usize };
        let slice = if start >= all.len() {
            Vec::new()
        } else {
            all[start..].to_vec()
        };
        let boxed: Self::DirEntryStream<'a> = Box::pin(stream::iter(slice.into_iter().map(Ok)));
        Ok(ReplyDirectory { entries: boxed })
    }

    async fn readdirplus<'a>(
        &'a self,
        req: Request,
        ino: u64,
        _fh: u64,
        offset: u64,
        _lock_owner: u64,
    ) -> FuseResult<ReplyDirectoryPlus<Self::DirEntryPlusStream<'a>>> {
        let Some(path) = self.path_of(ino) else {
            return Err(libc::ENOENT.into());
        };
        let self_status = self.stat(&path).await.map_err(errno)?;
        if self_status.kind != EntryKind::Dir {
            return Err(libc::ENOTDIR.into());
        }
        let entries = Vfs::readdir(self, &path).await.map_err(errno)?;

        let mut all: Vec<DirectoryEntryPlus> = Vec::with_capacity(entries.len() + 2);
        all.push(DirectoryEntryPlus {
            inode: ino,
            generation: 0,
            kind: FuseFileType::Directory,
            name: OsString::from("."),
            offset: 1,
            attr: status_to_attr(ino, &self_status, &req),
            entry_ttl: TTL,
            attr_ttl: TTL,
        });
        let parent_ino = self.parent_of(ino).unwrap_or(crate::vfs::ROOT_INO);
        if let Some(parent_path) = self.path_of(parent_ino) {
            if let Ok(parent_status) = self.stat(&parent_path).await {
                all.push(DirectoryEntryPlus {
                    inode: parent_ino,
                    generation: 0,
                    kind: FuseFileType::Directory,
                    name: OsString::from(".."),
                    offset: 2,
                    attr: status_to_attr(parent_ino, &parent_status, &req),
                    entry_ttl: TTL,
                    attr_ttl: TTL,
                });
            }
        }
        for (i, e) in entries.iter().enumerate() {
            let child_path = if path == "/" {
                format!("/{}", e.name)
            } else {
                format!("{}/{}", path, e.name)
            };
            let child_ino = self.intern(&child_path, ino);
            all.push(DirectoryEntryPlus {
                inode: child_ino,
                generation: 0,
                kind: kind_to_fuse(e.status.kind),
                name: OsString::from(e.name.clone()),
                offset: (i as i64) + 3,
                attr: status_to_attr(child_ino, &e.status, &req),
                entry_ttl: TTL,
                attr_ttl: TTL,
            });
        }

        let start = if offset == 0 { 0 } else { offset as usize };
        let slice = if start >= all.len() {
            Vec::new()
        } else {
            all[start..].to_vec()
        };
        let boxed: Self::DirEntryPlusStream<'a> =
            Box::pin(stream::iter(slice.into_iter().map(Ok)));
        Ok(ReplyDirectoryPlus { entries: boxed })
    }

    async fn mkdir(
        &self,
        req: Request,
        parent: u64,
        name: &OsStr,
        mode: u32,
        _umask: u32,
    ) -> FuseResult<ReplyEntry> {
        let name = name.to_string_lossy();
        let path = self.child_path(parent, name.as_ref()).map_err(errno)?;
        if self.stat(&path).await.is_ok() {
            return Err(libc::EEXIST.into());
        }
        Vfs::mkdir(self, &path, mode).await.map_err(errno)?;
        let status = self.stat(&path).await.map_err(errno)?;
        let ino = self.intern(&path, parent);
        Ok(ReplyEntry {
            ttl: TTL,
            attr: status_to_attr(ino, &status, &req),
            generation: 0,
        })
    }

    async fn unlink(&self, _req: Request, parent: u64, name: &OsStr) -> FuseResult<()> {
        let name = name.to_string_lossy();
        let path = self.child_path(parent, name.as_ref()).map_err(errno)?;
        Vfs::unlink(self, &path).await.map_err(errno)
    }

    async fn rmdir(&self, _req: Request, parent: u64, name: &OsStr) -> FuseResult<()> {
        let name = name.to_string_lossy();
        let path = self.child_path(parent, name.as_ref()).map_err(errno)?;
        Vfs::rmdir(self, &path).await.map_err(errno)
    }

    async fn rename(
        &self,
        _req: Request,
        parent: u64,
        name: &OsStr,
        new_parent: u64,
        new_name: &OsStr,
    ) -> FuseResult<()> {
        let name = name.to_string_lossy();
        let new_name = new_name.to_string_lossy();
        let from = self.child_path(parent, name.as_ref()).map_err(errno)?;
        let to = self.child_path(new_parent, new_name.as_ref()).map_err(errno)?;
        Vfs::rename(self, &from, &to).await.map_err(errno)
    }

    async fn statfs(&self, _req: Request, _ino: u64) -> FuseResult<ReplyStatFs> {
        let status = Vfs::statfs(self).await.map_err(errno)?;
        let bsize = status.block_size.max(1);
        Ok(ReplyStatFs {
            blocks: status.capacity / bsize,
            bfree: status.remaining / bsize,
            bavail: status.remaining / bsize,
            files: 0,
            ffree: u64::MAX,
            bsize: bsize as u32,
            namelen: 255,
            frsize: bsize as u32,
        })
    }

    async fn setxattr(
        &self,
        _req: Request,
        ino: u64,
        name: &OsStr,
        value: &[u8],
        flags: u32,
        _position: u32,
    ) -> FuseResult<()> {
        if !self.caps().xattr {
            return Err(libc::ENOSYS.into());
        }
        let Some(path) = self.path_of(ino) else {
            return Err(libc::ENOENT.into());
        };
        let mode = if flags as i32 & libc::XATTR_CREATE != 0 {
            XAttrMode::Create
        } else {
            XAttrMode::Replace
        };
        let name = name.to_string_lossy();
        Vfs::setxattr(self, &path, name.as_ref(), value, mode)
            .await
            .map_err(errno)
    }

    async fn getxattr(
        &self,
        _req: Request,
        ino: u64,
        name: &OsStr,
        size: u32,
    ) -> FuseResult<ReplyXAttr> {
        if !self.caps().xattr {
            return Err(libc::ENOSYS.into());
        }
        let Some(path) = self.path_of(ino) else {
            return Err(libc::ENOENT.into());
        };
        let name = name.to_string_lossy();
        let value = Vfs::getxattr(self, &path, name.as_ref()).await.map_err(errno)?;
        xattr_reply(value, size)
    }

    async fn listxattr(&self, _req: Request, ino: u64, size: u32) -> FuseResult<ReplyXAttr> {
        if !self.caps().xattr {
            return Err(libc::ENOSYS.into());
        }
        let Some(path) = self.path_of(ino) else {
            return Err(libc::ENOENT.into());
        };
        let names = Vfs::listxattr(self, &path).await.map_err(errno)?;
        let mut packed = Vec::new();
        for n in names {
            packed.extend_from_slice(n.as_bytes());
            packed.push(0);
        }
        xattr_reply(packed, size)
    }

    async fn removexattr(&self, _req: Request, ino: u64, name: &OsStr) -> FuseResult<()> {
        if !self.caps().xattr {
            return Err(libc::ENOSYS.into());
        }
        let Some(path) = self.path_of(ino) else {
            return Err(libc::ENOENT.into());
        };
        let name = name.to_string_lossy();
        Vfs::removexattr(self, &path, name.as_ref()).await.map_err(errno)
    }

    async fn forget(&self, _req: Request, _inode: u64, _nlookup: u64) {}

    async fn batch_forget(&self, _req: Request, _inodes: &[(u64, u64)]) {}

    async fn interrupt(&self, _req: Request, _unique: u64) -> FuseResult<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn xattr_reply_follows_size_probe_protocol() {
        match xattr_reply(vec![1, 2, 3], 0).unwrap() {
            ReplyXAttr::Size(n) => assert_eq!(n, 3),
            ReplyXAttr::Data(_) => panic!("expected size reply"),
        }
        assert!(xattr_reply(vec![1, 2, 3], 2).is_err());
        match xattr_reply(vec![1, 2, 3], 8).unwrap() {
            ReplyXAttr::Data(d) => assert_eq!(&d[..], &[1, 2, 3]),
            ReplyXAttr::Size(_) => panic!("expected data reply"),
        }
    }

    #[test]
    fn timestamps_round_to_store_granularity() {
        let ts = ts_from_ms(1_234_567);
        assert_eq!(ts.sec, 1234);
        assert_eq!(ts.nsec, 567_000_000);
        assert_eq!(ms_from_ts(ts), 1_234_567);
        // negative times clamp rather than wrap
        assert_eq!(ts_from_ms(-5).sec, 0);
    }
}
