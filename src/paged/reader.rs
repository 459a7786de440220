//! Per-handle paged read session.

use super::page::{Page, PageLayout, PageStore};
use crate::backend::client::DfsReader;
use crate::error::FsResult;

/// Random-access read session over one sequential-biased store stream.
///
/// The stream's own position always sits at the sequential frontier (the
/// byte offset of the next never-fetched page); a random page load seeks
/// away and restores that position exactly before returning.
pub struct PagedReader {
    stream: Box<dyn DfsReader>,
    store: PageStore,
    position: u64,
    next_seq_index: u64,
}

impl PagedReader {
    pub fn new(stream: Box<dyn DfsReader>, layout: PageLayout) -> Self {
        Self {
            stream,
            store: PageStore::new(layout),
            position: 0,
            next_seq_index: 0,
        }
    }

    pub fn position(&self) -> u64 {
        self.position
    }

    /// Resident page count, for observing the capacity bound.
    pub fn resident_pages(&self) -> usize {
        self.store.resident()
    }

    fn page_size(&self) -> u64 {
        self.store.layout().page_size as u64
    }

    /// Read one page worth of bytes from the stream's current position.
    /// Loops over short reads until the page is full or the stream ends.
    async fn read_page_from_stream(&mut self) -> FsResult<Page> {
        let page_size = self.store.layout().page_size as usize;
        let mut buf = vec![0u8; page_size];
        let mut filled = 0usize;
        while filled < page_size {
            let n = self.stream.read(&mut buf[filled..]).await?;
            if n == 0 {
                break;
            }
            filled += n;
        }
        Ok(Page::new(buf, filled as u32))
    }

    /// Sequential fetch: the stream already sits at the frontier, no seek
    /// needed. Exhausted pages recorded since the last fetch are released
    /// first.
    async fn fetch_next(&mut self) -> FsResult<()> {
        self.store.prune();
        let page = self.read_page_from_stream().await?;
        self.store.insert(self.next_seq_index, page);
        self.next_seq_index += 1;
        Ok(())
    }

    /// Random fetch: seek out to the page's offset, read it, and restore the
    /// stream to the position it held before the detour so later sequential
    /// fetches continue from the frontier.
    async fn load_at(&mut self, index: u64) -> FsResult<()> {
        self.store.prune();
        let page_offset = index * self.page_size();
        let saved = self.stream.position();
        self.stream.seek(page_offset).await?;
        let page = self.read_page_from_stream().await?;
        self.stream.seek(saved).await?;
        self.store.insert(index, page);
        Ok(())
    }

    async fn ensure_page(&mut self, index: u64) -> FsResult<()> {
        if self.store.contains(index) {
            return Ok(());
        }
        if index == self.next_seq_index {
            self.fetch_next().await
        } else {
            self.load_at(index).await
        }
    }

    /// Copy bytes from the session cursor into `buf`. Returns the number of
    /// bytes copied; 0 means the cursor is at or past end of stream.
    pub async fn read(&mut self, buf: &mut [u8]) -> FsResult<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        let page_size = self.page_size();
        let mut copied = 0usize;
        loop {
            let index = self.position / page_size;
            self.ensure_page(index).await?;
            let layout = self.store.layout();
            let Some(page) = self.store.get_mut(index) else {
                break;
            };
            let page_off = (self.position % page_size) as usize;
            let valid = page.valid_len() as usize;
            if page_off >= valid {
                // cursor at or past the end of a terminal page
                if page.exhausted() {
                    self.store.mark_exhausted(index);
                }
                break;
            }
            let take = (valid - page_off).min(buf.len() - copied);
            buf[copied..copied + take]
                .copy_from_slice(&page.bytes()[page_off..page_off + take]);
            copied += take;
            self.position += take as u64;
            page.consume(take as u32);
            let terminal = page.is_terminal(layout);
            if page.exhausted() {
                self.store.mark_exhausted(index);
            }
            if copied == buf.len() || terminal {
                break;
            }
        }
        Ok(copied)
    }

    /// Repoint the cursor. When the target page's slot is absent or already
    /// pruned it is loaded eagerly so the following read has data ready.
    pub async fn seek(&mut self, pos: u64) -> FsResult<()> {
        if pos == self.position {
            return Ok(());
        }
        self.position = pos;
        let index = pos / self.page_size();
        if !self.store.contains(index) {
            self.ensure_page(index).await?;
        }
        Ok(())
    }

    pub async fn close(&mut self) -> FsResult<()> {
        self.stream.close().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::client::DfsReader;
    use async_trait::async_trait;
    use std::sync::{Arc, Mutex};

    #[derive(Clone, Default)]
    struct SeekLog(Arc<Mutex<Vec<u64>>>);

    impl SeekLog {
        fn all(&self) -> Vec<u64> {
            self.0.lock().unwrap().clone()
        }
    }

    /// Deterministic stand-in for a remote stream: seekable, with an
    /// optional cap on how many bytes a single read hands back.
    struct ScriptedStream {
        data: Vec<u8>,
        pos: u64,
        max_chunk: usize,
        log: SeekLog,
    }

    impl ScriptedStream {
        fn new(data: Vec<u8>, log: SeekLog) -> Self {
            Self {
                data,
                pos: 0,
                max_chunk: usize::MAX,
                log,
            }
        }

        fn with_max_chunk(mut self, max_chunk: usize) -> Self {
            self.max_chunk = max_chunk;
            self
        }
    }

    #[async_trait]
    impl DfsReader for ScriptedStream {
        async fn seek(&mut self, pos: u64) -> FsResult<()> {
            self.log.0.lock().unwrap().push(pos);
            self.pos = pos;
            Ok(())
        }

        async fn read(&mut self, buf: &mut [u8]) -> FsResult<usize> {
            let start = (self.pos as usize).min(self.data.len());
            let n = buf.len().min(self.max_chunk).min(self.data.len() - start);
            buf[..n].copy_from_slice(&self.data[start..start + n]);
            self.pos += n as u64;
            Ok(n)
        }

        fn position(&self) -> u64 {
            self.pos
        }

        async fn close(&mut self) -> FsResult<()> {
            Ok(())
        }
    }

    fn layout(page_size: u32, capacity: usize) -> PageLayout {
        PageLayout {
            page_size,
            capacity,
        }
    }

    fn reader_over(data: Vec<u8>, l: PageLayout) -> (PagedReader, SeekLog) {
        let log = SeekLog::default();
        let stream = ScriptedStream::new(data, log.clone());
        (PagedReader::new(Box::new(stream), l), log)
    }

    async fn read_n(r: &mut PagedReader, n: usize) -> Vec<u8> {
        let mut buf = vec![0u8; n];
        let got = r.read(&mut buf).await.unwrap();
        buf.truncate(got);
        buf
    }

    #[tokio::test]
    async fn seek_then_read_crosses_pages() {
        let data: Vec<u8> = (0u8..16).collect();
        let (mut r, _log) = reader_over(data, layout(4, 20));

        r.seek(6).await.unwrap();
        assert_eq!(read_n(&mut r, 5).await, vec![6, 7, 8, 9, 10]);

        r.seek(2).await.unwrap();
        assert_eq!(read_n(&mut r, 3).await, vec![2, 3, 4]);
    }

    #[tokio::test]
    async fn matches_reference_slice_for_arbitrary_positions() {
        let data: Vec<u8> = (0..1000).map(|i| (i % 251) as u8).collect();
        let (mut r, _log) = reader_over(data.clone(), layout(16, 4));

        for &(pos, len) in &[
            (0usize, 64usize),
            (999, 40),
            (500, 16),
            (17, 17),
            (16, 1),
            (15, 3),
            (1000, 8),
            (3, 997),
        ] {
            r.seek(pos as u64).await.unwrap();
            let got = read_n(&mut r, len).await;
            let want = &data[pos.min(data.len())..(pos + len).min(data.len())];
            assert_eq!(got, want, "pos={pos} len={len}");
        }
    }

    #[tokio::test]
    async fn eof_is_sticky_until_seek_back() {
        let data: Vec<u8> = (0u8..10).collect();
        let (mut r, _log) = reader_over(data.clone(), layout(4, 20));

        assert_eq!(read_n(&mut r, 8).await.len(), 8);
        // short read at the tail
        assert_eq!(read_n(&mut r, 8).await, vec![8, 9]);
        // at end: every further read yields nothing
        assert_eq!(read_n(&mut r, 8).await.len(), 0);
        assert_eq!(read_n(&mut r, 1).await.len(), 0);
        // until the cursor moves back in bounds
        r.seek(4).await.unwrap();
        assert_eq!(read_n(&mut r, 2).await, vec![4, 5]);
    }

    #[tokio::test]
    async fn random_load_restores_stream_position() {
        let data: Vec<u8> = (0u8..32).collect();
        let (mut r, log) = reader_over(data, layout(4, 20));

        // advance the sequential frontier to page 1 (stream position 4)
        assert_eq!(read_n(&mut r, 4).await, vec![0, 1, 2, 3]);

        // random access into page 3: detour must seek out and back
        r.seek(12).await.unwrap();
        assert_eq!(read_n(&mut r, 4).await, vec![12, 13, 14, 15]);
        assert_eq!(log.all(), vec![12, 4]);

        // the frontier fetch still reads the right bytes afterwards
        r.seek(4).await.unwrap();
        assert_eq!(read_n(&mut r, 4).await, vec![4, 5, 6, 7]);
        // no further seeks were needed for the sequential fetch
        assert_eq!(log.all(), vec![12, 4]);
    }

    #[tokio::test]
    async fn resident_pages_never_exceed_capacity() {
        let data: Vec<u8> = (0..64).map(|i| i as u8).collect();
        let (mut r, _log) = reader_over(data.clone(), layout(4, 2));

        let got = read_n(&mut r, 64).await;
        assert_eq!(got, data);
        assert!(r.resident_pages() <= 2);
    }

    #[tokio::test]
    async fn short_backend_reads_fill_whole_pages() {
        let data: Vec<u8> = (0u8..40).collect();
        let log = SeekLog::default();
        let stream = ScriptedStream::new(data.clone(), log.clone()).with_max_chunk(3);
        let mut r = PagedReader::new(Box::new(stream), layout(8, 20));

        assert_eq!(read_n(&mut r, 40).await, data);
    }

    #[tokio::test]
    async fn seek_past_eof_reads_nothing() {
        let data: Vec<u8> = (0u8..10).collect();
        let (mut r, _log) = reader_over(data, layout(4, 20));
        r.seek(100).await.unwrap();
        assert_eq!(read_n(&mut r, 4).await.len(), 0);
    }

    #[tokio::test]
    async fn empty_request_is_a_no_op() {
        let (mut r, _log) = reader_over(vec![1, 2, 3], layout(4, 20));
        let mut buf = [0u8; 0];
        assert_eq!(r.read(&mut buf).await.unwrap(), 0);
    }
}
