//! Paged read buffering.
//!
//! Makes the store's high-latency, sequential-biased read streams behave
//! like random-access byte sources: file bytes are cached in fixed-size
//! pages fetched lazily, sequential fetches ride the stream's current
//! position, and random fetches seek out and restore the stream exactly so
//! later sequential fetches stay correct.
//!
//! Submodules:
//! - `page`: page layout, the bounded page store and its deferred pruning.
//! - `reader`: the per-handle read session (cursor + page store + stream).

pub mod page;
pub mod reader;

pub use page::{Page, PageLayout, PageStore};
pub use reader::PagedReader;
