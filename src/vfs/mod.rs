//! Path-level filesystem façade.
//!
//! Responsibilities:
//! - Resolve paths against the store before deciding which sessions to
//!   build, honoring the open/create flag matrix.
//! - Drive the handle table and the per-handle read/write sessions; no
//!   buffering logic lives here.
//! - Map every store-reported condition onto the error taxonomy.
//! - Keep the inode/path namespace the FUSE adapter translates through.
//!
//! Submodules:
//! - `fs`: the `Vfs` façade itself.
//! - `demo`: end-to-end exercise over a local-directory store.

pub mod demo;
pub mod fs;

pub use fs::{CapabilitySet, ROOT_INO, Vfs};
