//! Remote store client boundary.
//!
//! Submodules:
//! - `client`: traits and metadata types the rest of the crate programs
//!   against (`DfsBackend`, `DfsReader`, `DfsAppender`).
//! - `memfs`: in-memory backend for unit tests and the demo.
//! - `localfs`: local-directory backend, append-only discipline over
//!   `tokio::fs`.
//!
//! The store behind this boundary is path-addressed and sequential-biased:
//! reads are seekable streams, writes are append-only sinks, and there is no
//! arbitrary-offset overwrite.

pub mod client;
pub mod localfs;
pub mod memfs;

pub use client::{
    DfsAppender, DfsBackend, DfsReader, DirEntry, EntryKind, FileStatus, StorageStatus, XAttrMode,
};
