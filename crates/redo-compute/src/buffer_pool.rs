use std::collections::{HashMap, VecDeque};

use redo_common::{Lsn, Page, PageId};

/// The compute node's local cache of materialized pages, keyed by the
/// read-point LSN they were fetched at. A cached entry only ever satisfies
/// a lookup for a read point at or before the one it was cached with;
/// `ComputeEngine` invalidates an entry outright on a local write instead
/// of tracking per-version staleness here.
pub struct BufferPool {
    pages: HashMap<PageId, CachedPage>,
    recency: VecDeque<PageId>,
    capacity: usize,
}

struct CachedPage {
    page: Page,
    read_point: Lsn,
}

impl BufferPool {
    pub fn new(capacity: usize) -> Self {
        Self { pages: HashMap::new(), recency: VecDeque::new(), capacity }
    }

    /// Get a page from the buffer pool if it exists and its read_point is ≥ the requested LSN.
    pub fn get(&mut self, page_id: PageId, min_lsn: Lsn) -> Option<&Page> {
        let hit = self.pages.get(&page_id).is_some_and(|entry| entry.read_point >= min_lsn);
        if !hit {
            return None;
        }
        self.touch(page_id);
        self.pages.get(&page_id).map(|entry| &entry.page)
    }

    /// Insert or replace a page in the buffer pool, evicting the
    /// least-recently-touched entry first if this would grow past capacity.
    pub fn insert(&mut self, page_id: PageId, read_point: Lsn, page: Page) {
        if !self.pages.contains_key(&page_id) {
            while self.pages.len() >= self.capacity {
                let Some(oldest) = self.recency.pop_front() else { break };
                self.pages.remove(&oldest);
            }
        }
        self.pages.insert(page_id, CachedPage { page, read_point });
        self.touch(page_id);
    }

    /// Invalidate a page (e.g., after writing to it).
    pub fn invalidate(&mut self, page_id: PageId) {
        self.pages.remove(&page_id);
        self.recency.retain(|&id| id != page_id);
    }

    pub fn len(&self) -> usize {
        self.pages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pages.is_empty()
    }

    /// Move `page_id` to the back of the recency queue (most recently used).
    fn touch(&mut self, page_id: PageId) {
        self.recency.retain(|&id| id != page_id);
        self.recency.push_back(page_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use redo_common::empty_page;

    #[test]
    fn miss_on_empty() {
        let mut pool = BufferPool::new(10);
        assert!(pool.get(1, 1).is_none());
    }

    #[test]
    fn hit_returns_cached_page() {
        let mut pool = BufferPool::new(10);
        let mut page = empty_page();
        page[0] = 0xAB;
        pool.insert(1, 5, page);

        let result = pool.get(1, 5);
        assert!(result.is_some());
        assert_eq!(result.unwrap()[0], 0xAB);
    }

    #[test]
    fn stale_read_point_misses() {
        let mut pool = BufferPool::new(10);
        pool.insert(1, 5, empty_page());

        // Requesting a newer read_point than cached → miss
        assert!(pool.get(1, 10).is_none());
        // Requesting an older or equal read_point → hit
        assert!(pool.get(1, 3).is_some());
        assert!(pool.get(1, 5).is_some());
    }

    #[test]
    fn invalidate_removes_entry() {
        let mut pool = BufferPool::new(10);
        pool.insert(1, 5, empty_page());
        assert!(pool.get(1, 5).is_some());

        pool.invalidate(1);
        assert!(pool.get(1, 5).is_none());
    }

    #[test]
    fn eviction_prefers_least_recently_touched() {
        let mut pool = BufferPool::new(2);
        pool.insert(1, 1, empty_page());
        pool.insert(2, 1, empty_page());

        // Touch page 1 again so page 2 becomes the eviction target.
        pool.get(1, 1);

        pool.insert(3, 1, empty_page()); // should evict page 2

        assert!(pool.get(1, 1).is_some());
        assert!(pool.get(2, 1).is_none());
        assert!(pool.get(3, 1).is_some());
    }

    #[test]
    fn len_and_is_empty_track_population() {
        let mut pool = BufferPool::new(5);
        assert!(pool.is_empty());
        pool.insert(1, 1, empty_page());
        assert_eq!(pool.len(), 1);
        pool.invalidate(1);
        assert!(pool.is_empty());
    }
}
