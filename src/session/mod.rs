//! Per-handle session state.
//!
//! Submodules:
//! - `append`: the monotonic, gap-filling append write session.
//! - `handles`: the concurrent table mapping opaque handles to sessions.

pub mod append;
pub mod handles;

pub use append::AppendWriter;
pub use handles::{HandleEntry, HandleTable};
