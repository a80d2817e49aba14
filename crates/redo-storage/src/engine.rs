use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use redo_common::{encode_record_group, DurabilityState, Lsn, Page, PageId, RedoRecord, StorageApi, StorageError};
use redo_log::{LogConfig, LogEngine};
use redo_pagestore::materialize::materialize_page;
use redo_pagestore::page_cache::PageCache;
use redo_pagestore::DirtyPageTracker;
use tracing::{debug, info};

use crate::config::StoragePreset;

const WAIT_TIMEOUT: Duration = Duration::from_secs(30);

/// Combines the redo log engine with an in-memory replay index and page
/// cache to implement `StorageApi`. The log engine itself never parses
/// record bytes; this layer is where the record wire format and
/// page-chain replay live.
pub struct StorageEngine {
    log: Arc<LogEngine>,
    dirty_tracker: Arc<DirtyPageTracker>,
    inner: Mutex<Inner>,
}

struct Inner {
    /// Per-page history, in append order; each entry's LSN is the group's
    /// publish boundary (the LSN `append` returned for that record group).
    page_history: HashMap<PageId, Vec<(Lsn, RedoRecord)>>,
    page_cache: PageCache,
}

impl StorageEngine {
    /// Open or create a storage engine rooted at `base_dir`, starting the
    /// redo log's background threads.
    pub fn open(base_dir: &std::path::Path) -> Result<Self, StorageError> {
        Self::open_with_preset(StoragePreset::Base { base_dir: base_dir.to_path_buf() })
    }

    pub fn open_with_preset(preset: StoragePreset) -> Result<Self, StorageError> {
        let config = match preset {
            StoragePreset::Base { base_dir } => LogConfig::new(base_dir),
            StoragePreset::Custom(config) => config,
        };

        let log = LogEngine::init(config).map_err(|e| StorageError::Log(e.to_string()))?;
        log.start_background_threads();

        let dirty_tracker = Arc::new(DirtyPageTracker::new());
        log.register_consumer(dirty_tracker.clone());

        info!("storage engine opened");
        Ok(Self {
            log,
            dirty_tracker,
            inner: Mutex::new(Inner { page_history: HashMap::new(), page_cache: PageCache::new(1024) }),
        })
    }

    pub fn current_durability(&self) -> redo_log::DurabilityState {
        self.log.durability_state()
    }
}

impl Drop for StorageEngine {
    fn drop(&mut self) {
        self.log.unregister_consumer("page-cache");
        let _ = self.log.close();
    }
}

#[async_trait]
impl StorageApi for StorageEngine {
    async fn append_redo(&self, records: Vec<RedoRecord>) -> Result<Lsn, StorageError> {
        let log = self.log.clone();
        let bytes = encode_record_group(&records);
        let range = tokio::task::spawn_blocking(move || log.append(&bytes))
            .await
            .map_err(|e| StorageError::Other(e.to_string()))?
            .map_err(|e| StorageError::Log(e.to_string()))?;

        let log = self.log.clone();
        let target = range.end;
        tokio::task::spawn_blocking(move || log.wait_flushed_at_least(target, WAIT_TIMEOUT))
            .await
            .map_err(|e| StorageError::Other(e.to_string()))?;

        let mut inner = self.inner.lock().unwrap();
        self.dirty_tracker.mark_dirty(range.start);
        for record in &records {
            inner.page_history.entry(record.page_id).or_default().push((range.end, record.clone()));
        }

        debug!(lsn = range.end, records = records.len(), "appended redo record group");
        Ok(range.end)
    }

    async fn get_page(&self, page_id: PageId, read_point: Lsn) -> Result<Page, StorageError> {
        let durable = self.log.durability_state().flushed_to_disk_lsn;
        if read_point > durable {
            return Err(StorageError::LsnBeyondDurable { requested: read_point, durable });
        }

        let mut inner = self.inner.lock().unwrap();
        if let Some(page) = inner.page_cache.get(page_id, read_point) {
            return Ok(page);
        }

        let history = inner.page_history.get(&page_id).cloned().unwrap_or_default();
        if history.is_empty() {
            return Err(StorageError::PageNotFound { page_id, lsn: read_point });
        }

        let chain: Vec<RedoRecord> = history.into_iter().filter(|(lsn, _)| *lsn <= read_point).map(|(_, r)| r).collect();
        if chain.is_empty() {
            return Err(StorageError::PageNotFound { page_id, lsn: read_point });
        }

        let page = materialize_page(page_id, &chain)?;
        inner.page_cache.insert(page_id, read_point, page);
        Ok(page)
    }

    async fn get_durability_state(&self) -> Result<DurabilityState, StorageError> {
        let state = self.log.durability_state();
        Ok(DurabilityState {
            write_lsn: state.write_lsn,
            flushed_to_disk_lsn: state.flushed_to_disk_lsn,
            last_checkpoint_lsn: state.last_checkpoint_lsn,
        })
    }
}
