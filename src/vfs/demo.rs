//! End-to-end exercise of the façade over a local-directory store; backs the
//! `demo` subcommand and doubles as living documentation of the call flow.

use crate::backend::localfs::LocalDirBackend;
use crate::error::FsResult;
use crate::vfs::fs::Vfs;

/// Create, write (with a gap), read back and clean up under `dir`.
pub async fn e2e_local_demo(dir: impl AsRef<std::path::Path>) -> FsResult<()> {
    let vfs = Vfs::new(LocalDirBackend::new(dir.as_ref()));

    vfs.mkdir("/demo", 0o755).await?;
    let h = vfs
        .open("/demo/greeting.txt", (libc::O_WRONLY | libc::O_CREAT) as u32)
        .await?;
    vfs.write(h, 0, b"hello, tide").await?;
    // forward jump: the bytes in between arrive as zeros
    vfs.write(h, 16, b"!").await?;
    vfs.flush(h).await?;
    vfs.release(h).await?;

    let h = vfs.open("/demo/greeting.txt", libc::O_RDONLY as u32).await?;
    let head = vfs.read(h, 0, 11).await?;
    let tail = vfs.read(h, 11, 16).await?;
    vfs.release(h).await?;

    assert_eq!(head, b"hello, tide");
    assert_eq!(tail, [0, 0, 0, 0, 0, b'!']);

    let entries = vfs.readdir("/demo").await?;
    log::info!(
        "demo dir holds {:?}",
        entries.iter().map(|e| e.name.as_str()).collect::<Vec<_>>()
    );

    vfs.unlink("/demo/greeting.txt").await?;
    vfs.rmdir("/demo").await?;
    assert_eq!(vfs.open_handles(), 0);
    Ok(())
}
