//! Handle table: opaque ids to per-handle sessions, safe under concurrent
//! filesystem requests.

use crate::error::{FsError, FsResult};
use crate::paged::PagedReader;
use crate::session::append::AppendWriter;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use tokio::sync::Mutex;

/// Sessions owned by one open handle. A read-write open owns both.
pub struct HandleEntry {
    pub read: Option<Arc<Mutex<PagedReader>>>,
    pub write: Option<Arc<Mutex<AppendWriter>>>,
}

/// Process-visible table of open handles, scoped to one mounted filesystem.
///
/// Handles are strictly increasing and never reused while the table lives.
/// Each session carries its own mutex: two requests against the same handle
/// serialize, distinct handles never contend.
pub struct HandleTable {
    next: AtomicU64,
    entries: RwLock<HashMap<u64, HandleEntry>>,
}

impl Default for HandleTable {
    fn default() -> Self {
        Self::new()
    }
}

impl HandleTable {
    pub fn new() -> Self {
        Self {
            next: AtomicU64::new(0),
            entries: RwLock::new(HashMap::new()),
        }
    }

    pub fn allocate(&self) -> u64 {
        self.next.fetch_add(1, Ordering::SeqCst) + 1
    }

    pub fn register(
        &self,
        handle: u64,
        read: Option<PagedReader>,
        write: Option<AppendWriter>,
    ) {
        let entry = HandleEntry {
            read: read.map(|r| Arc::new(Mutex::new(r))),
            write: write.map(|w| Arc::new(Mutex::new(w))),
        };
        self.entries.write().unwrap().insert(handle, entry);
    }

    pub fn lookup_read(&self, handle: u64) -> FsResult<Arc<Mutex<PagedReader>>> {
        self.entries
            .read()
            .unwrap()
            .get(&handle)
            .and_then(|e| e.read.clone())
            .ok_or(FsError::BadHandle(handle))
    }

    pub fn lookup_write(&self, handle: u64) -> FsResult<Arc<Mutex<AppendWriter>>> {
        self.entries
            .read()
            .unwrap()
            .get(&handle)
            .and_then(|e| e.write.clone())
            .ok_or(FsError::BadHandle(handle))
    }

    /// Close whichever sessions the handle owns and drop the entry. Both
    /// closes are attempted even when the first fails; the first failure is
    /// the one reported.
    pub async fn release(&self, handle: u64) -> FsResult<()> {
        let entry = self
            .entries
            .write()
            .unwrap()
            .remove(&handle)
            .ok_or(FsError::BadHandle(handle))?;

        let mut first_err: Option<FsError> = None;
        if let Some(read) = entry.read {
            if let Err(e) = read.lock().await.close().await {
                log::error!("closing read session of handle {handle}: {e}");
                first_err.get_or_insert(e);
            }
        }
        if let Some(write) = entry.write {
            if let Err(e) = write.lock().await.close().await {
                log::error!("closing write session of handle {handle}: {e}");
                first_err.get_or_insert(e);
            }
        }
        match first_err {
            None => Ok(()),
            Some(e) => Err(e),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.read().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().unwrap().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::client::{DfsAppender, DfsReader};
    use crate::paged::PageLayout;
    use async_trait::async_trait;
    use std::sync::atomic::AtomicBool;

    struct NullStream;

    #[async_trait]
    impl DfsReader for NullStream {
        async fn seek(&mut self, _pos: u64) -> FsResult<()> {
            Ok(())
        }
        async fn read(&mut self, _buf: &mut [u8]) -> FsResult<usize> {
            Ok(0)
        }
        fn position(&self) -> u64 {
            0
        }
        async fn close(&mut self) -> FsResult<()> {
            Err(FsError::IoFailure("stream close failed".to_string()))
        }
    }

    struct FlakySink {
        closed: Arc<AtomicBool>,
    }

    #[async_trait]
    impl DfsAppender for FlakySink {
        async fn append(&mut self, _buf: &[u8]) -> FsResult<()> {
            Ok(())
        }
        async fn flush(&mut self) -> FsResult<()> {
            Ok(())
        }
        async fn close(&mut self) -> FsResult<()> {
            self.closed.store(true, Ordering::SeqCst);
            Ok(())
        }
    }

    #[tokio::test]
    async fn handles_are_unique_and_increasing() {
        let table = Arc::new(HandleTable::new());
        let mut tasks = Vec::new();
        for _ in 0..8 {
            let t = table.clone();
            tasks.push(tokio::spawn(async move {
                (0..100).map(|_| t.allocate()).collect::<Vec<u64>>()
            }));
        }
        let mut all = Vec::new();
        for task in tasks {
            let ids = task.await.unwrap();
            assert!(ids.windows(2).all(|w| w[0] < w[1]));
            all.extend(ids);
        }
        all.sort_unstable();
        all.dedup();
        assert_eq!(all.len(), 800);
    }

    #[tokio::test]
    async fn lookup_of_unknown_handle_is_bad_handle() {
        let table = HandleTable::new();
        assert!(matches!(table.lookup_read(42), Err(FsError::BadHandle(42))));
        assert!(matches!(table.lookup_write(42), Err(FsError::BadHandle(42))));
        assert!(matches!(
            table.release(42).await,
            Err(FsError::BadHandle(42))
        ));
    }

    #[tokio::test]
    async fn release_closes_both_sessions_even_when_one_fails() {
        let table = HandleTable::new();
        let closed = Arc::new(AtomicBool::new(false));

        let reader = PagedReader::new(Box::new(NullStream), PageLayout::default());
        let writer = AppendWriter::new(
            Box::new(FlakySink {
                closed: closed.clone(),
            }),
            0,
        );
        let h = table.allocate();
        table.register(h, Some(reader), Some(writer));

        // the read close fails, but the write sink must still be closed
        let err = table.release(h).await.unwrap_err();
        assert!(matches!(err, FsError::IoFailure(_)));
        assert!(closed.load(Ordering::SeqCst));
        assert!(table.is_empty());

        // a released handle is gone for good
        assert!(matches!(table.lookup_read(h), Err(FsError::BadHandle(_))));
    }

    #[tokio::test]
    async fn double_release_fails_with_bad_handle() {
        let table = HandleTable::new();
        let h = table.allocate();
        table.register(h, None, None);
        table.release(h).await.unwrap();
        assert!(matches!(table.release(h).await, Err(FsError::BadHandle(_))));
    }
}
