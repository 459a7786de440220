//! Mount helpers for starting/stopping FUSE.
//!
//! Unix only; on Linux unprivileged mounts go through fusermount3. Thin
//! wrappers over rfuse3 raw Session APIs.

use std::path::Path;

use rfuse3::MountOptions;

use crate::backend::client::DfsBackend;
use crate::vfs::fs::Vfs;

fn default_mount_options() -> MountOptions {
    let mut mo = MountOptions::default();
    mo.fs_name("tidefs");
    // conservative defaults: no allow_other, mountpoint must be empty
    mo
}

/// Mount a filesystem instance onto the given empty directory, preferring
/// unprivileged mode (requires fusermount3 in PATH).
#[cfg(target_os = "linux")]
pub async fn mount_unprivileged<B>(
    fs: Vfs<B>,
    mount_point: impl AsRef<Path>,
) -> std::io::Result<rfuse3::raw::MountHandle>
where
    B: DfsBackend,
{
    let opts = default_mount_options();
    let session = rfuse3::raw::Session::new(opts);
    session.mount_with_unprivileged(fs, mount_point).await
}

/// Fallback stub for non-Linux targets.
#[cfg(not(target_os = "linux"))]
pub async fn mount_unprivileged<B>(
    _fs: Vfs<B>,
    _mount_point: impl AsRef<Path>,
) -> std::io::Result<rfuse3::raw::MountHandle>
where
    B: DfsBackend,
{
    Err(std::io::Error::new(
        std::io::ErrorKind::Unsupported,
        "FUSE mount is only supported on Linux in this build",
    ))
}
