use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::debug;

use redo_common::{Lsn, Page, PageId, StorageApi, StorageError, PAGE_SIZE};

use crate::buffer_pool::BufferPool;
use crate::transaction::MiniTransaction;

/// The compute-side engine: turns page writes into mini-transactions,
/// hands the finished record group to `StorageApi`, and maintains a local
/// read-cache so repeated reads of the same page/read-point don't round
/// trip to storage.
pub struct ComputeEngine {
    storage: Arc<dyn StorageApi>,
    inner: Mutex<ComputeInner>,
}

struct ComputeInner {
    buffer_pool: BufferPool,
    next_mtr_id: u64,
    /// Current read point: the highest LSN this compute node has observed
    /// as durable, used as the default version for unqualified reads.
    read_point: Lsn,
}

impl ComputeEngine {
    pub fn new(storage: Arc<dyn StorageApi>, buffer_pool_capacity: usize) -> Self {
        Self {
            storage,
            inner: Mutex::new(ComputeInner { buffer_pool: BufferPool::new(buffer_pool_capacity), next_mtr_id: 1, read_point: 0 }),
        }
    }

    /// Write bytes to a page at a given offset. This is a single-record MTR.
    pub async fn put(&self, page_id: PageId, offset: u16, data: Vec<u8>) -> Result<Lsn, StorageError> {
        if offset as usize + data.len() > PAGE_SIZE {
            return Err(StorageError::PageOverflow { offset, len: data.len() });
        }

        let mtr_id = self.next_mtr_id().await;
        let mut mtr = MiniTransaction::new(mtr_id);
        mtr.write(page_id, offset, data);
        let records = mtr.finish().unwrap();

        let lsn = self.storage.append_redo(records).await?;

        let mut inner = self.inner.lock().await;
        inner.read_point = lsn;
        inner.buffer_pool.invalidate(page_id);
        debug!(page_id, lsn, "put committed, read point advanced");
        Ok(lsn)
    }

    /// Execute a multi-record mini-transaction. `writes` is a list of
    /// (page_id, offset, data) tuples applied as one atomic group.
    pub async fn put_multi(&self, writes: Vec<(PageId, u16, Vec<u8>)>) -> Result<Lsn, StorageError> {
        for &(_, offset, ref data) in &writes {
            if offset as usize + data.len() > PAGE_SIZE {
                return Err(StorageError::PageOverflow { offset, len: data.len() });
            }
        }

        let mtr_id = self.next_mtr_id().await;
        let mut mtr = MiniTransaction::new(mtr_id);
        for (page_id, offset, data) in &writes {
            mtr.write(*page_id, *offset, data.clone());
        }

        let records = match mtr.finish() {
            Some(r) => r,
            None => return Ok(self.inner.lock().await.read_point),
        };

        let lsn = self.storage.append_redo(records).await?;

        let mut inner = self.inner.lock().await;
        inner.read_point = lsn;
        for (page_id, _, _) in &writes {
            inner.buffer_pool.invalidate(*page_id);
        }
        Ok(lsn)
    }

    /// Read a page at the current read point.
    pub async fn get(&self, page_id: PageId) -> Result<Page, StorageError> {
        let read_point = self.inner.lock().await.read_point;
        self.get_at(page_id, read_point).await
    }

    /// Read a page at a specific LSN.
    pub async fn get_at(&self, page_id: PageId, lsn: Lsn) -> Result<Page, StorageError> {
        {
            let mut inner = self.inner.lock().await;
            if let Some(page) = inner.buffer_pool.get(page_id, lsn) {
                return Ok(*page);
            }
        }

        let page = self.storage.get_page(page_id, lsn).await?;

        let mut inner = self.inner.lock().await;
        inner.buffer_pool.insert(page_id, lsn, page);
        Ok(page)
    }

    pub async fn read_point(&self) -> Lsn {
        self.inner.lock().await.read_point
    }

    /// Refresh the read point from storage's durability state.
    pub async fn refresh_read_point(&self) -> Result<Lsn, StorageError> {
        let state = self.storage.get_durability_state().await?;
        let mut inner = self.inner.lock().await;
        inner.read_point = state.flushed_to_disk_lsn;
        Ok(state.flushed_to_disk_lsn)
    }

    async fn next_mtr_id(&self) -> u64 {
        let mut inner = self.inner.lock().await;
        let id = inner.next_mtr_id;
        inner.next_mtr_id += 1;
        id
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use redo_common::DurabilityState;
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::sync::Mutex as StdMutex;

    struct MockStorage {
        records: StdMutex<Vec<(Lsn, redo_common::RedoRecord)>>,
        next_lsn: AtomicU64,
        durable: AtomicU64,
    }

    impl MockStorage {
        fn new() -> Self {
            Self { records: StdMutex::new(Vec::new()), next_lsn: AtomicU64::new(1), durable: AtomicU64::new(0) }
        }
    }

    #[async_trait::async_trait]
    impl StorageApi for MockStorage {
        async fn append_redo(&self, records: Vec<redo_common::RedoRecord>) -> Result<Lsn, StorageError> {
            let mut stored = self.records.lock().unwrap();
            let mut last_lsn = 0;
            for record in records {
                let lsn = self.next_lsn.fetch_add(1, Ordering::SeqCst);
                last_lsn = lsn;
                stored.push((lsn, record));
            }
            self.durable.store(last_lsn, Ordering::SeqCst);
            Ok(last_lsn)
        }

        async fn get_page(&self, page_id: PageId, read_point: Lsn) -> Result<Page, StorageError> {
            let stored = self.records.lock().unwrap();
            let mut page = [0u8; PAGE_SIZE];
            for (lsn, record) in stored.iter() {
                if record.page_id == page_id && *lsn <= read_point {
                    let start = record.offset as usize;
                    let end = start + record.data.len();
                    page[start..end].copy_from_slice(&record.data);
                }
            }
            Ok(page)
        }

        async fn get_durability_state(&self) -> Result<DurabilityState, StorageError> {
            let durable = self.durable.load(Ordering::SeqCst);
            Ok(DurabilityState { write_lsn: durable, flushed_to_disk_lsn: durable, last_checkpoint_lsn: durable })
        }
    }

    #[tokio::test]
    async fn put_then_get_roundtrips() {
        let storage = Arc::new(MockStorage::new());
        let engine = ComputeEngine::new(storage, 100);

        engine.put(1, 0, vec![0xAA, 0xBB]).await.unwrap();
        let page = engine.get(1).await.unwrap();
        assert_eq!(&page[0..2], &[0xAA, 0xBB]);
    }

    #[tokio::test]
    async fn put_multi_applies_all_writes() {
        let storage = Arc::new(MockStorage::new());
        let engine = ComputeEngine::new(storage, 100);

        engine.put_multi(vec![(1, 0, vec![0x11]), (2, 0, vec![0x22]), (3, 0, vec![0x33])]).await.unwrap();

        assert_eq!(engine.get(1).await.unwrap()[0], 0x11);
        assert_eq!(engine.get(2).await.unwrap()[0], 0x22);
        assert_eq!(engine.get(3).await.unwrap()[0], 0x33);
    }

    #[tokio::test]
    async fn read_point_advances_with_each_write() {
        let storage = Arc::new(MockStorage::new());
        let engine = ComputeEngine::new(storage, 100);

        assert_eq!(engine.read_point().await, 0);
        engine.put(1, 0, vec![0x01]).await.unwrap();
        assert_eq!(engine.read_point().await, 1);
        engine.put(2, 0, vec![0x02]).await.unwrap();
        assert_eq!(engine.read_point().await, 2);
    }

    #[tokio::test]
    async fn overflow_rejected() {
        let storage = Arc::new(MockStorage::new());
        let engine = ComputeEngine::new(storage, 100);

        let result = engine.put(1, PAGE_SIZE as u16 - 1, vec![0; 2]).await;
        assert!(result.is_err());
    }
}
