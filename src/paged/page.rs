//! Page layout and the bounded page store.

use lru::LruCache;
use std::num::NonZeroUsize;

pub const DEFAULT_PAGE_SIZE: u32 = 2 * 1024 * 1024;
pub const DEFAULT_CAPACITY: usize = 20;

/// Page geometry for one read session.
#[derive(Clone, Copy, Debug)]
pub struct PageLayout {
    pub page_size: u32,
    /// Maximum number of resident pages per session. Enforced by LRU
    /// eviction on top of the consumption-based pruning.
    pub capacity: usize,
}

impl Default for PageLayout {
    fn default() -> Self {
        Self {
            page_size: DEFAULT_PAGE_SIZE,
            capacity: DEFAULT_CAPACITY,
        }
    }
}

/// One fixed-size page of remote file bytes.
///
/// `valid_len < page_size` marks the stream's terminal page. A page is
/// exhausted once `consumed` reaches `valid_len`; exhausted pages are
/// released on the next fetch pass, not eagerly.
pub struct Page {
    buf: Vec<u8>,
    valid_len: u32,
    consumed: u32,
}

impl Page {
    pub fn new(buf: Vec<u8>, valid_len: u32) -> Self {
        Self {
            buf,
            valid_len,
            consumed: 0,
        }
    }

    pub fn bytes(&self) -> &[u8] {
        &self.buf[..self.valid_len as usize]
    }

    pub fn valid_len(&self) -> u32 {
        self.valid_len
    }

    pub fn is_terminal(&self, layout: PageLayout) -> bool {
        self.valid_len < layout.page_size
    }

    pub fn consume(&mut self, n: u32) {
        self.consumed = self.consumed.saturating_add(n);
    }

    pub fn exhausted(&self) -> bool {
        self.consumed >= self.valid_len
    }
}

/// Index-keyed page store with an enforced capacity.
///
/// Two release paths: pages whose bytes were fully consumed are recorded and
/// dropped on the next fetch pass (`prune`), and inserting past `capacity`
/// evicts the least recently used page.
pub struct PageStore {
    layout: PageLayout,
    pages: LruCache<u64, Page>,
    pending_prune: Vec<u64>,
}

impl PageStore {
    pub fn new(layout: PageLayout) -> Self {
        let cap = NonZeroUsize::new(layout.capacity.max(1)).unwrap();
        Self {
            layout,
            pages: LruCache::new(cap),
            pending_prune: Vec::new(),
        }
    }

    pub fn layout(&self) -> PageLayout {
        self.layout
    }

    pub fn contains(&self, index: u64) -> bool {
        self.pages.contains(&index)
    }

    pub fn get_mut(&mut self, index: u64) -> Option<&mut Page> {
        self.pages.get_mut(&index)
    }

    /// Record `index` for release on the next fetch pass.
    pub fn mark_exhausted(&mut self, index: u64) {
        if !self.pending_prune.contains(&index) {
            self.pending_prune.push(index);
        }
    }

    /// Drop every page recorded since the previous fetch.
    pub fn prune(&mut self) {
        for index in self.pending_prune.drain(..) {
            self.pages.pop(&index);
        }
    }

    pub fn insert(&mut self, index: u64, page: Page) {
        self.pages.put(index, page);
    }

    pub fn resident(&self) -> usize {
        self.pages.len()
    }
}
