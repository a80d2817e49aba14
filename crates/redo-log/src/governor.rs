//! The file governor (C4): a background loop that keeps a ready file ahead
//! of the writer, recycles or removes files once every consumer is past
//! them, stages spare files ahead of need, and drives resize-down to
//! completion.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::capacity::CapacityLimits;
use crate::codec::FileHeader;
use crate::config::LogConfig;
use crate::constants::{flags, BLOCK_SIZE, CURRENT_FORMAT, FILE_HDR_SIZE};
use crate::consumer::ConsumerRegistry;
use crate::error::Result;
use crate::file_dict::{FileDictionary, FileRecord};
use crate::file_handle::{FileHandle, FileHandleCache};
use crate::notifier::Notifier;
use crate::types::{FileId, Lsn};

/// A prepared-but-unlinked file: zero-filled to `size_in_bytes` with a valid
/// (but not-yet-initialized) header, staged under a `*_tmp` name so
/// `produce_next_file` can promote it in place instead of paying for a
/// fresh `create` + zero-fill on the hot path.
struct SpareFile {
    path: std::path::PathBuf,
    size_in_bytes: u64,
}

pub struct GovernorShared {
    pub files: Arc<Mutex<FileDictionary>>,
    pub handles: Arc<Mutex<FileHandleCache>>,
    pub capacity: Arc<Mutex<CapacityLimits>>,
    pub consumers: Arc<ConsumerRegistry>,
    pub notifier: Arc<Notifier>,
    pub config: LogConfig,
    pub next_file_id: Mutex<FileId>,
    /// Identifies this data directory in every file header this governor
    /// stamps, derived once from `config.base_dir` so it is stable across a
    /// reopen of the same directory.
    uuid: u32,
    spares: Mutex<VecDeque<SpareFile>>,
    next_spare_id: Mutex<u64>,
}

impl GovernorShared {
    pub fn new(
        files: Arc<Mutex<FileDictionary>>,
        handles: Arc<Mutex<FileHandleCache>>,
        capacity: Arc<Mutex<CapacityLimits>>,
        consumers: Arc<ConsumerRegistry>,
        notifier: Arc<Notifier>,
        config: LogConfig,
        next_file_id: FileId,
    ) -> Self {
        let uuid = {
            use std::collections::hash_map::DefaultHasher;
            use std::hash::{Hash, Hasher};
            let mut hasher = DefaultHasher::new();
            config.base_dir.hash(&mut hasher);
            hasher.finish() as u32
        };
        Self {
            files,
            handles,
            capacity,
            consumers,
            notifier,
            config,
            next_file_id: Mutex::new(next_file_id),
            uuid,
            spares: Mutex::new(VecDeque::new()),
            next_spare_id: Mutex::new(0),
        }
    }
}

pub struct FileGovernor {
    shared: Arc<GovernorShared>,
    stop: Arc<AtomicBool>,
}

impl FileGovernor {
    pub fn new(shared: Arc<GovernorShared>) -> Self {
        Self { shared, stop: Arc::new(AtomicBool::new(false)) }
    }

    pub fn stop_flag(&self) -> Arc<AtomicBool> {
        self.stop.clone()
    }

    fn path_for(&self, id: FileId) -> std::path::PathBuf {
        self.shared.config.base_dir.join(format!("redo.{id:08}.log"))
    }

    fn spare_path(&self, n: u64) -> std::path::PathBuf {
        self.shared.config.base_dir.join(format!("redo.spare.{n:08}.tmp"))
    }

    fn header_size(id: FileId) -> u64 {
        if id == 0 {
            FILE_HDR_SIZE
        } else {
            BLOCK_SIZE as u64
        }
    }

    /// Create file `id` on disk with `size_in_bytes`, stamp its header, and
    /// register it in the dictionary as not-yet-full.
    pub fn produce_file(&self, id: FileId, start_lsn: Lsn, size_in_bytes: u64) -> Result<()> {
        let path = self.path_for(id);
        let mut handle = FileHandle::create(id, &path, size_in_bytes)?;
        let header = FileHeader {
            format: CURRENT_FORMAT,
            uuid: self.shared.uuid,
            start_lsn,
            creator: "redo-log".to_string(),
            flags: 0,
        };
        let mut raw = [0u8; BLOCK_SIZE];
        header.encode(&mut raw);
        handle.write_block(0, &raw)?;
        handle.sync()?;
        debug!(file_id = id, start_lsn, size_in_bytes, header_size = Self::header_size(id), "produced log file");

        self.shared.files.lock().unwrap().add(FileRecord {
            id,
            start_lsn,
            size_in_bytes,
            end_lsn: None,
            full: false,
            consumed: false,
        })?;
        self.shared.handles.lock().unwrap().insert(handle)?;

        let mut capacity = self.shared.capacity.lock().unwrap();
        capacity.add_physical(size_in_bytes);
        capacity.update(self.shared.config.max_concurrent_mtrs, self.shared.config.avg_mtr_size);
        Ok(())
    }

    /// Rename a staged spare into place as file `id`, resizing and
    /// restamping its header if the target size moved since it was staged.
    fn promote_spare(&self, spare: SpareFile, id: FileId, start_lsn: Lsn, size_in_bytes: u64) -> Result<()> {
        let dest = self.path_for(id);
        std::fs::rename(&spare.path, &dest)?;
        let mut handle = FileHandle::open_existing(id, &dest)?;
        if spare.size_in_bytes != size_in_bytes {
            handle.set_len(size_in_bytes)?;
        }
        let header = FileHeader {
            format: CURRENT_FORMAT,
            uuid: self.shared.uuid,
            start_lsn,
            creator: "redo-log".to_string(),
            flags: 0,
        };
        let mut raw = [0u8; BLOCK_SIZE];
        header.encode(&mut raw);
        handle.write_block(0, &raw)?;
        handle.sync()?;
        debug!(file_id = id, start_lsn, size_in_bytes, header_size = Self::header_size(id), "promoted spare log file");

        self.shared.files.lock().unwrap().add(FileRecord {
            id,
            start_lsn,
            size_in_bytes,
            end_lsn: None,
            full: false,
            consumed: false,
        })?;
        self.shared.handles.lock().unwrap().insert(handle)?;

        let mut capacity = self.shared.capacity.lock().unwrap();
        if size_in_bytes >= spare.size_in_bytes {
            capacity.add_physical(size_in_bytes - spare.size_in_bytes);
        } else {
            capacity.remove_physical(spare.size_in_bytes - size_in_bytes);
        }
        capacity.update(self.shared.config.max_concurrent_mtrs, self.shared.config.avg_mtr_size);
        Ok(())
    }

    pub fn produce_next_file(&self, current_write_lsn: Lsn) -> Result<()> {
        let mut next_id_guard = self.shared.next_file_id.lock().unwrap();
        let id = *next_id_guard;
        let size = {
            let capacity = self.shared.capacity.lock().unwrap();
            capacity.next_file_size(self.shared.config.default_file_size())
        };
        let spare = self.shared.spares.lock().unwrap().pop_front();
        match spare {
            Some(spare) => self.promote_spare(spare, id, current_write_lsn, size)?,
            None => self.produce_file(id, current_write_lsn, size)?,
        }
        *next_id_guard += 1;
        Ok(())
    }

    /// True once a file is ready to receive bytes at or beyond `write_lsn +
    /// margin`; used by the writer to decide whether it must block.
    pub fn next_file_available(&self, write_lsn: Lsn) -> bool {
        let files = self.shared.files.lock().unwrap();
        files.back().map_or(false, |f| f.start_lsn <= write_lsn || !f.full)
    }

    pub fn wait_for_next_file_available(&self, write_lsn: Lsn, timeout: Duration) -> bool {
        let deadline = std::time::Instant::now() + timeout;
        while !self.next_file_available(write_lsn) {
            if std::time::Instant::now() >= deadline {
                return false;
            }
            std::thread::sleep(Duration::from_millis(1));
        }
        true
    }

    /// Stage one zero-filled spare file at `size_in_bytes` under a `_tmp`
    /// name, counted against physical capacity immediately even though it
    /// isn't in the dictionary yet.
    fn stage_spare(&self, size_in_bytes: u64) -> Result<()> {
        let n = {
            let mut guard = self.shared.next_spare_id.lock().unwrap();
            let n = *guard;
            *guard += 1;
            n
        };
        let path = self.spare_path(n);
        let mut handle = FileHandle::create(0, &path, size_in_bytes)?;
        let header = FileHeader {
            format: CURRENT_FORMAT,
            uuid: self.shared.uuid,
            start_lsn: 0,
            creator: "redo-log".to_string(),
            flags: flags::NOT_INITIALIZED,
        };
        let mut raw = [0u8; BLOCK_SIZE];
        header.encode(&mut raw);
        handle.write_block(0, &raw)?;
        handle.sync()?;

        let mut capacity = self.shared.capacity.lock().unwrap();
        capacity.add_physical(size_in_bytes);
        capacity.update(self.shared.config.max_concurrent_mtrs, self.shared.config.avg_mtr_size);
        drop(capacity);

        self.shared.spares.lock().unwrap().push_back(SpareFile { path, size_in_bytes });
        info!(size_in_bytes, "staged spare log file");
        Ok(())
    }

    /// Keep at most one spare file staged ahead of need, as long as
    /// physical capacity allows it.
    fn maintain_spare_pool(&self) -> Result<()> {
        if self.shared.spares.lock().unwrap().len() >= 1 {
            return Ok(());
        }
        let (size, permits) = {
            let capacity = self.shared.capacity.lock().unwrap();
            if capacity.is_resizing_down() {
                return Ok(());
            }
            let size = capacity.next_file_size(self.shared.config.default_file_size());
            let permits = capacity.current_physical_capacity + size <= self.shared.config.capacity_bytes;
            (size, permits)
        };
        if size == 0 || !permits {
            return Ok(());
        }
        self.stage_spare(size)
    }

    /// Decide whether a just-consumed file should be recycled into the
    /// spare pool (rename in place, resize, re-stamp a blank header) rather
    /// than removed outright. Recycling is skipped while a resize-down is
    /// in progress, since that path needs files actually removed to shrink
    /// physical capacity, not kept around at a new size.
    fn try_recycle(&self, record: &FileRecord) -> Result<bool> {
        let next_size = {
            let capacity = self.shared.capacity.lock().unwrap();
            if capacity.is_resizing_down() {
                return Ok(false);
            }
            capacity.next_file_size(self.shared.config.default_file_size())
        };

        let n = {
            let mut guard = self.shared.next_spare_id.lock().unwrap();
            let n = *guard;
            *guard += 1;
            n
        };
        let spare_path = self.spare_path(n);
        let old_path = self.path_for(record.id);
        std::fs::rename(&old_path, &spare_path)?;
        let mut handle = FileHandle::open_existing(record.id, &spare_path)?;
        handle.set_len(next_size)?;
        let header = FileHeader {
            format: CURRENT_FORMAT,
            uuid: self.shared.uuid,
            start_lsn: 0,
            creator: "redo-log".to_string(),
            flags: flags::NOT_INITIALIZED,
        };
        let mut raw = [0u8; BLOCK_SIZE];
        header.encode(&mut raw);
        handle.write_block(0, &raw)?;
        handle.sync()?;
        drop(handle);

        let mut capacity = self.shared.capacity.lock().unwrap();
        if next_size >= record.size_in_bytes {
            capacity.add_physical(next_size - record.size_in_bytes);
        } else {
            capacity.remove_physical(record.size_in_bytes - next_size);
        }
        capacity.update(self.shared.config.max_concurrent_mtrs, self.shared.config.avg_mtr_size);
        drop(capacity);

        self.shared.spares.lock().unwrap().push_back(SpareFile { path: spare_path, size_in_bytes: next_size });
        Ok(true)
    }

    /// Mark consumed, then recycle or physically remove, any file strictly
    /// older than the oldest LSN any registered consumer still needs.
    pub fn recycle_consumed_files(&self) -> Result<()> {
        let oldest_needed = self
            .shared
            .consumers
            .oldest_needed_lsn()
            .unwrap_or(self.shared.notifier.flushed_lsn());

        let to_remove: Vec<FileId> = {
            let files = self.shared.files.lock().unwrap();
            files
                .begin()
                .filter(|f| f.full && f.end_lsn.map_or(false, |end| end <= oldest_needed))
                .map(|f| f.id)
                .collect()
        };

        for id in to_remove {
            self.shared.files.lock().unwrap().set_consumed(id, true)?;
            if let Some(mut handle) = self.shared.handles.lock().unwrap().remove(id) {
                handle.sync()?;
            }
            let record = self.shared.files.lock().unwrap().erase(id);
            let Some(record) = record else { continue };

            if self.try_recycle(&record)? {
                info!(file_id = id, size = record.size_in_bytes, "recycled log file");
                continue;
            }

            let path = self.path_for(id);
            if let Err(e) = std::fs::remove_file(&path) {
                warn!(file_id = id, error = %e, "failed to remove consumed log file");
            } else {
                info!(file_id = id, size = record.size_in_bytes, "removed consumed log file");
            }
            let mut capacity = self.shared.capacity.lock().unwrap();
            capacity.remove_physical(record.size_in_bytes);
            capacity.update(self.shared.config.max_concurrent_mtrs, self.shared.config.avg_mtr_size);
        }
        Ok(())
    }

    /// One iteration of the governor's control loop: check whether the next
    /// file needs producing, recycle consumed files, keep a spare staged,
    /// and report whether resize-down has converged.
    pub fn tick(&self, write_lsn: Lsn) -> Result<()> {
        let margin_hit = {
            let files = self.shared.files.lock().unwrap();
            let capacity = self.shared.capacity.lock().unwrap();
            match files.back() {
                None => true,
                Some(last) => {
                    let margin = capacity.next_file_earlier_margin(last.size_in_bytes);
                    let last_end = last.end_lsn.unwrap_or(last.start_lsn + last.size_in_bytes);
                    write_lsn + margin >= last_end
                }
            }
        };
        if margin_hit {
            self.produce_next_file(write_lsn)?;
        }
        self.recycle_consumed_files()?;
        self.maintain_spare_pool()?;

        let resize_done = {
            let files = self.shared.files.lock().unwrap();
            let capacity = self.shared.capacity.lock().unwrap();
            capacity.resize_down_complete(
                files.largest_file_size().unwrap_or(0),
                files.total_physical_size(),
                files.total_logical_capacity(),
            )
        };
        if resize_done {
            let mut capacity = self.shared.capacity.lock().unwrap();
            let current_physical_capacity = capacity.current_physical_capacity;
            capacity.begin_resize(current_physical_capacity);
            info!("resize-down converged");
        }
        Ok(())
    }

    pub fn run(self: Arc<Self>, write_lsn_source: impl Fn() -> Lsn + Send + 'static, period: Duration) {
        while !self.stop.load(Ordering::Relaxed) {
            let write_lsn = write_lsn_source();
            if let Err(e) = self.tick(write_lsn) {
                warn!(error = %e, "governor tick failed");
            }
            std::thread::sleep(period);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::consumer::ConsumerRegistry;
    use crate::notifier::Notifier;
    use tempfile::tempdir;

    fn shared(dir: &std::path::Path) -> Arc<GovernorShared> {
        let config = LogConfig::new(dir).with_capacity_bytes(crate::constants::CAPACITY_MIN);
        Arc::new(GovernorShared::new(
            Arc::new(Mutex::new(FileDictionary::new())),
            Arc::new(Mutex::new(FileHandleCache::new())),
            Arc::new(Mutex::new(CapacityLimits::initialize(0, 1, 1))),
            Arc::new(ConsumerRegistry::new()),
            Arc::new(Notifier::new()),
            config,
            1,
        ))
    }

    #[test]
    fn recycled_file_is_renamed_not_deleted_and_reused_by_next_produce() {
        let dir = tempdir().unwrap();
        let shared = shared(dir.path());
        let gov = FileGovernor::new(shared.clone());

        gov.produce_file(0, crate::constants::LOG_START_LSN, 128 * 1024).unwrap();
        let size = {
            let files = shared.files.lock().unwrap();
            files.file(0).unwrap().size_in_bytes
        };
        let end_lsn = crate::constants::LOG_START_LSN + size;
        shared.files.lock().unwrap().set_full(0, end_lsn).unwrap();

        let record = shared.files.lock().unwrap().erase(0).unwrap();
        assert!(gov.try_recycle(&record).unwrap());
        assert_eq!(shared.spares.lock().unwrap().len(), 1);
        assert!(!dir.path().join("redo.00000000.log").exists());

        gov.produce_next_file(end_lsn).unwrap();
        assert_eq!(shared.spares.lock().unwrap().len(), 0);
        assert!(dir.path().join("redo.00000001.log").exists());
    }

    #[test]
    fn spare_pool_stays_at_one_once_maintained() {
        let dir = tempdir().unwrap();
        let shared = shared(dir.path());
        let gov = FileGovernor::new(shared.clone());
        gov.maintain_spare_pool().unwrap();
        gov.maintain_spare_pool().unwrap();
        assert_eq!(shared.spares.lock().unwrap().len(), 1);
    }
}
