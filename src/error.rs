//! Error taxonomy shared by the backend client, the session layer and the
//! FUSE adapter, with the POSIX errno mapping surfaced to the kernel.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum FsError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("permission denied: {0}")]
    PermissionDenied(String),

    #[error("i/o failure: {0}")]
    IoFailure(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("bad handle: {0}")]
    BadHandle(u64),

    #[error("already exists: {0}")]
    AlreadyExists(String),

    #[error("is a directory: {0}")]
    IsDirectory(String),

    #[error("not a directory: {0}")]
    NotDirectory(String),

    #[error("value too large for buffer")]
    RangeError,
}

impl FsError {
    /// POSIX errno for this error, as returned through the FUSE boundary.
    pub fn errno(&self) -> libc::c_int {
        match self {
            FsError::NotFound(_) => libc::ENOENT,
            FsError::PermissionDenied(_) => libc::EACCES,
            FsError::IoFailure(_) => libc::EIO,
            FsError::InvalidArgument(_) => libc::EINVAL,
            FsError::BadHandle(_) => libc::EBADF,
            FsError::AlreadyExists(_) => libc::EEXIST,
            FsError::IsDirectory(_) => libc::EISDIR,
            FsError::NotDirectory(_) => libc::ENOTDIR,
            FsError::RangeError => libc::ERANGE,
        }
    }
}

impl From<std::io::Error> for FsError {
    fn from(e: std::io::Error) -> Self {
        match e.kind() {
            std::io::ErrorKind::NotFound => FsError::NotFound(e.to_string()),
            std::io::ErrorKind::PermissionDenied => FsError::PermissionDenied(e.to_string()),
            std::io::ErrorKind::AlreadyExists => FsError::AlreadyExists(e.to_string()),
            std::io::ErrorKind::InvalidInput => FsError::InvalidArgument(e.to_string()),
            _ => FsError::IoFailure(e.to_string()),
        }
    }
}

pub type FsResult<T> = Result<T, FsError>;
