use moka::sync::Cache;
use redo_common::{Lsn, Page, PageId};
use tracing::trace;

/// Key for the page cache: (page_id, read_point_lsn). Different read points
/// may see different versions of the same page, and a materialized page is
/// immutable once cached under a given read point.
#[derive(Clone, Copy, Debug, Hash, PartialEq, Eq)]
pub struct CacheKey {
    pub page_id: PageId,
    pub lsn: Lsn,
}

/// Memoizes `materialize_page` results so a hot page doesn't get replayed
/// from its record chain on every read. Backed by moka's LRU-with-TinyLFU
/// admission policy.
pub struct PageCache {
    cache: Cache<CacheKey, Box<Page>>,
}

impl PageCache {
    /// Create a new page cache with the given maximum number of entries.
    pub fn new(max_entries: u64) -> Self {
        Self { cache: Cache::new(max_entries) }
    }

    /// Try to get a cached page.
    pub fn get(&self, page_id: PageId, lsn: Lsn) -> Option<Page> {
        let key = CacheKey { page_id, lsn };
        let hit = self.cache.get(&key);
        trace!(page_id, lsn, hit = hit.is_some(), "page cache lookup");
        hit.map(|boxed| *boxed)
    }

    /// Insert a page into the cache.
    pub fn insert(&self, page_id: PageId, lsn: Lsn, page: Page) {
        let key = CacheKey { page_id, lsn };
        self.cache.insert(key, Box::new(page));
    }

    /// Number of entries currently in the cache.
    pub fn len(&self) -> u64 {
        self.cache.entry_count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
