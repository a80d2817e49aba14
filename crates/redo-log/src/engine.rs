//! The top-level facade: wires the buffer, file dictionary, governor,
//! writer, flusher and checkpointer together and exposes the operations
//! `redo-compute`/`redo-storage` actually call.

use std::sync::atomic::Ordering;
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

use tracing::{info, warn};

use crate::buffer::{LogBuffer, Reservation};
use crate::capacity::CapacityLimits;
use crate::checkpoint::Checkpointer;
use crate::completion::OpenGroupTracker;
use crate::config::LogConfig;
use crate::consumer::{Consumer, ConsumerRegistry};
use crate::constants::{BLOCK_DATA_SIZE, BLOCK_SIZE, ENCRYPTION_META_OFFSET, LOG_START_LSN};
use crate::discovery::find_files;
use crate::encryption::{EncryptionProvider, NoEncryption};
use crate::error::{LogError, Result};
use crate::file_dict::FileDictionary;
use crate::file_handle::{FileHandle, FileHandleCache};
use crate::flusher::Flusher;
use crate::governor::{FileGovernor, GovernorShared};
use crate::lsn::{lsn_to_sn, sn_to_lsn};
use crate::notifier::Notifier;
use crate::types::{FileId, FindResult, Lsn, LsnRange};
use crate::writer::Writer;

pub struct DurabilityState {
    pub write_lsn: Lsn,
    pub flushed_to_disk_lsn: Lsn,
    pub last_checkpoint_lsn: Lsn,
}

pub struct LogEngine {
    config: LogConfig,
    buffer: Arc<LogBuffer>,
    notifier: Arc<Notifier>,
    files: Arc<Mutex<FileDictionary>>,
    handles: Arc<Mutex<FileHandleCache>>,
    capacity: Arc<Mutex<CapacityLimits>>,
    consumers: Arc<ConsumerRegistry>,
    recent_closed: Arc<OpenGroupTracker>,
    encryption: Arc<dyn EncryptionProvider>,
    writer: Arc<Writer>,
    flusher: Arc<Flusher>,
    checkpointer: Arc<Checkpointer>,
    governor: Arc<FileGovernor>,
    threads: Mutex<Vec<JoinHandle<()>>>,
}

impl LogEngine {
    /// Initialize a fresh redo log in `config.base_dir`, creating file 0.
    /// Fails if any `redo.*.log` file already exists there.
    pub fn init(config: LogConfig) -> Result<Arc<Self>> {
        std::fs::create_dir_all(&config.base_dir)?;
        let existing = std::fs::read_dir(&config.base_dir)?
            .filter_map(|e| e.ok())
            .any(|e| e.file_name().to_string_lossy().starts_with("redo."));
        if existing {
            return Err(LogError::FilesInconsistent("base_dir already contains redo log files".into()));
        }

        let buffer = Arc::new(LogBuffer::new(config.buffer_bytes, 0, LOG_START_LSN));
        let notifier = Arc::new(Notifier::new());
        let files = Arc::new(Mutex::new(FileDictionary::new()));
        let handles = Arc::new(Mutex::new(FileHandleCache::new()));
        let capacity = Arc::new(Mutex::new(CapacityLimits::initialize(
            0,
            config.max_concurrent_mtrs,
            config.avg_mtr_size,
        )));
        let consumers = Arc::new(ConsumerRegistry::new());
        let encryption: Arc<dyn EncryptionProvider> = Arc::new(NoEncryption);

        let writer = Arc::new(Writer::new(
            buffer.clone(),
            files.clone(),
            handles.clone(),
            notifier.clone(),
            config.recent_written_slots,
            config.encrypt,
            encryption.clone(),
        ));
        let flusher = Arc::new(Flusher::new(handles.clone(), notifier.clone(), &config));
        let checkpointer = Arc::new(Checkpointer::new(handles.clone(), consumers.clone(), notifier.clone(), LOG_START_LSN));
        let recent_closed = Arc::new(OpenGroupTracker::new(config.recent_closed_slots, BLOCK_DATA_SIZE as u64, 0));
        consumers.register(recent_closed.clone());

        let governor_shared = Arc::new(GovernorShared::new(
            files.clone(),
            handles.clone(),
            capacity.clone(),
            consumers.clone(),
            notifier.clone(),
            config.clone(),
            1,
        ));
        let governor = Arc::new(FileGovernor::new(governor_shared));
        governor.produce_file(0, LOG_START_LSN, config.default_file_size())?;

        notifier.publish_written(LOG_START_LSN);
        notifier.publish_flushed(LOG_START_LSN);

        info!(base_dir = %config.base_dir.display(), capacity_bytes = config.capacity_bytes, "initialized redo log");

        Ok(Arc::new(Self {
            config,
            buffer,
            notifier,
            files,
            handles,
            capacity,
            consumers,
            recent_closed,
            encryption,
            writer,
            flusher,
            checkpointer,
            governor,
            threads: Mutex::new(Vec::new()),
        }))
    }

    /// Reopen an existing file set for write, resuming from the last valid
    /// checkpoint. The caller (recovery) is responsible for replaying bytes
    /// between the checkpoint LSN and the true tail of the log via
    /// [`Self::read_blocks`]; this engine never parses record bytes itself.
    pub fn open_existing_files(config: LogConfig) -> Result<Arc<Self>> {
        let files_dict = match find_files(&config.base_dir)? {
            FindResult::Found(dict) => dict,
            FindResult::NoFiles => {
                return Err(LogError::NotFound("no existing redo log files in base_dir".into()))
            }
            FindResult::Legacy(files) => {
                return Err(LogError::FormatTooOld(format!(
                    "{} legacy-format file(s) found; migrate before opening for write",
                    files.len()
                )))
            }
            FindResult::FormatTooNew => {
                return Err(LogError::FormatTooNew("redo log format newer than this build supports".into()))
            }
            FindResult::FormatTooOld => {
                return Err(LogError::FormatTooOld("redo log format older than this build supports".into()))
            }
            FindResult::Inconsistent(msg) => return Err(LogError::FilesInconsistent(msg)),
        };

        let handles = Arc::new(Mutex::new(FileHandleCache::new()));
        let mut next_id: FileId = 0;
        {
            let mut handles_guard = handles.lock().unwrap();
            for file in files_dict.begin() {
                let path = config.base_dir.join(format!("redo.{:08}.log", file.id));
                handles_guard.insert(FileHandle::open_existing(file.id, &path)?)?;
                next_id = next_id.max(file.id + 1);
            }
        }

        let notifier = Arc::new(Notifier::new());
        let consumers = Arc::new(ConsumerRegistry::new());
        let checkpointer = Arc::new(Checkpointer::new(handles.clone(), consumers.clone(), notifier.clone(), LOG_START_LSN));
        let resume_lsn = checkpointer.read_latest().map(|h| h.checkpoint_lsn).unwrap_or(LOG_START_LSN);
        checkpointer.resume_from(resume_lsn);

        notifier.publish_written(resume_lsn);
        notifier.publish_flushed(resume_lsn);

        let physical_capacity = files_dict.total_physical_size();
        let start_sn = if resume_lsn <= LOG_START_LSN { 0 } else { lsn_to_sn(resume_lsn) };
        let recent_closed = Arc::new(OpenGroupTracker::new(config.recent_closed_slots, BLOCK_DATA_SIZE as u64, start_sn));
        consumers.register(recent_closed.clone());
        let buffer = Arc::new(LogBuffer::new(config.buffer_bytes, start_sn, resume_lsn));
        let files = Arc::new(Mutex::new(files_dict));
        let capacity = Arc::new(Mutex::new(CapacityLimits::initialize(
            physical_capacity,
            config.max_concurrent_mtrs,
            config.avg_mtr_size,
        )));
        let encryption: Arc<dyn EncryptionProvider> = Arc::new(NoEncryption);

        let writer = Arc::new(Writer::new(
            buffer.clone(),
            files.clone(),
            handles.clone(),
            notifier.clone(),
            config.recent_written_slots,
            config.encrypt,
            encryption.clone(),
        ));
        let flusher = Arc::new(Flusher::new(handles.clone(), notifier.clone(), &config));

        let governor_shared = Arc::new(GovernorShared::new(
            files.clone(),
            handles.clone(),
            capacity.clone(),
            consumers.clone(),
            notifier.clone(),
            config.clone(),
            next_id,
        ));
        let governor = Arc::new(FileGovernor::new(governor_shared));

        info!(base_dir = %config.base_dir.display(), resume_lsn, "reopened existing redo log");

        Ok(Arc::new(Self {
            config,
            buffer,
            notifier,
            files,
            handles,
            capacity,
            consumers,
            recent_closed,
            encryption,
            writer,
            flusher,
            checkpointer,
            governor,
            threads: Mutex::new(Vec::new()),
        }))
    }

    /// Read the raw, decoded payload bytes covering `[start, end)`, spanning
    /// block boundaries as needed. Used by recovery to pull bytes forward
    /// from the last checkpoint; this engine does not interpret them.
    pub fn read_blocks(&self, start: Lsn, end: Lsn) -> Result<Vec<u8>> {
        use crate::constants::{BLOCK_DATA_SIZE, BLOCK_HDR_SIZE};
        use crate::lsn::{block_start, is_data_lsn};

        if end < start {
            return Err(LogError::Corrupt(format!("read_blocks: end {end} precedes start {start}")));
        }
        let mut out = Vec::with_capacity((end - start) as usize);
        let mut lsn = start;
        while lsn < end {
            if !is_data_lsn(lsn) {
                lsn = block_start(lsn) + BLOCK_HDR_SIZE as u64;
                continue;
            }
            let bs = block_start(lsn);
            let files = self.files.lock().unwrap();
            let file = files.find(bs).ok_or_else(|| LogError::NotFound(format!("no file covers lsn {lsn}")))?;
            let file_id = file.id;
            let file_start_lsn = file.start_lsn;
            drop(files);

            let header_size = if file_id == 0 { crate::constants::FILE_HDR_SIZE } else { BLOCK_SIZE as u64 };
            let offset_in_file = bs - file_start_lsn + header_size;

            let mut raw = [0u8; BLOCK_SIZE];
            let mut handles = self.handles.lock().unwrap();
            let handle = handles.get_mut(file_id).ok_or(LogError::MissingNewestFile)?;
            handle.read_block(offset_in_file, &mut raw)?;
            drop(handles);

            let (header, raw_data) = crate::codec::decode_block(&raw)?;
            let decrypted;
            let data: &[u8] = if header.encrypted {
                decrypted = self.encryption.decrypt(raw_data)?;
                &decrypted
            } else {
                raw_data
            };
            let data_offset = (lsn - (bs + BLOCK_HDR_SIZE as u64)) as usize;
            if data_offset >= data.len() {
                return Err(LogError::NotFound(format!(
                    "lsn {lsn} not yet written (block has {} of {} data bytes)",
                    data.len(),
                    BLOCK_DATA_SIZE
                )));
            }
            let take = (data.len() - data_offset).min((end - lsn) as usize);
            out.extend_from_slice(&data[data_offset..data_offset + take]);
            lsn += take as u64;
            if data_offset + take == BLOCK_DATA_SIZE {
                lsn = bs + BLOCK_SIZE as u64 + BLOCK_HDR_SIZE as u64;
            }
        }
        Ok(out)
    }

    /// Persist additional flag bits into file 0's header (e.g. marking
    /// `NO_LOGGING` during a bulk-load window).
    pub fn persist_flags(&self, flags: u32) -> Result<()> {
        let mut handles = self.handles.lock().unwrap();
        let handle = handles.get_mut(0).ok_or(LogError::MissingNewestFile)?;
        let mut raw = [0u8; BLOCK_SIZE];
        handle.read_block(0, &mut raw)?;
        let mut header = crate::codec::FileHeader::decode(&raw)?;
        header.flags |= flags;
        header.encode(&mut raw);
        handle.write_block(0, &raw)?;
        handle.sync()
    }

    /// Stamp the encryption metadata block in file 0. A no-op payload (empty
    /// slice) clears it. `redo-storage` calls this once per
    /// [`EncryptionProvider`] rotation.
    pub fn set_encryption_metadata(&self, metadata: &[u8]) -> Result<()> {
        if metadata.len() > BLOCK_SIZE {
            return Err(LogError::EncryptionUnavailable("metadata exceeds one block".into()));
        }
        let mut raw = [0u8; BLOCK_SIZE];
        raw[..metadata.len()].copy_from_slice(metadata);
        let checksum = crate::codec::block_checksum(&raw[0..BLOCK_SIZE - 4]);
        raw[BLOCK_SIZE - 4..].copy_from_slice(&checksum.to_be_bytes());

        let mut handles = self.handles.lock().unwrap();
        let handle = handles.get_mut(0).ok_or(LogError::MissingNewestFile)?;
        handle.write_block(ENCRYPTION_META_OFFSET, &raw)?;
        handle.sync()
    }

    pub fn start_background_threads(self: &Arc<Self>) {
        let writer = self.writer.clone();
        let spin = self.config.writer_spin_rounds;
        let timeout = self.config.writer_timeout;
        let writer_handle = std::thread::Builder::new()
            .name("redo-log-writer".into())
            .spawn(move || writer.run(spin, timeout))
            .expect("spawn writer thread");

        let flusher = self.flusher.clone();
        let fspin = self.config.flusher_spin_rounds;
        let ftimeout = self.config.flusher_timeout;
        let flusher_handle = std::thread::Builder::new()
            .name("redo-log-flusher".into())
            .spawn(move || flusher.run(fspin, ftimeout))
            .expect("spawn flusher thread");

        let checkpointer = self.checkpointer.clone();
        let period = self.config.checkpoint_period;
        let checkpointer_handle = std::thread::Builder::new()
            .name("redo-log-checkpointer".into())
            .spawn(move || checkpointer.run(period))
            .expect("spawn checkpointer thread");

        let governor = self.governor.clone();
        let notifier = self.notifier.clone();
        let governor_handle = std::thread::Builder::new()
            .name("redo-log-governor".into())
            .spawn(move || governor.run(move || notifier.written_lsn(), Duration::from_millis(200)))
            .expect("spawn governor thread");

        let mut threads = self.threads.lock().unwrap();
        threads.push(writer_handle);
        threads.push(flusher_handle);
        threads.push(checkpointer_handle);
        threads.push(governor_handle);
    }

    pub fn stop_background_threads(&self) {
        self.writer.stop_flag().store(true, Ordering::Relaxed);
        self.flusher.stop_flag().store(true, Ordering::Relaxed);
        self.checkpointer.stop_flag().store(true, Ordering::Relaxed);
        self.governor.stop_flag().store(true, Ordering::Relaxed);
        let mut threads = self.threads.lock().unwrap();
        for handle in threads.drain(..) {
            if let Err(e) = handle.join() {
                warn!(?e, "background thread panicked during shutdown");
            }
        }
    }

    pub fn close(self: &Arc<Self>) -> Result<()> {
        self.stop_background_threads();
        self.flusher.flush_once()?;
        self.checkpointer.write_checkpoint()?;
        self.handles.lock().unwrap().sync_all()
    }

    /// Reserve `len` bytes, blocking (bounded by `config.reserve_timeout`)
    /// while the buffer has no room ahead of the writer or logical capacity
    /// is past its soft threshold, and failing outright if hard logical
    /// capacity would still be exceeded once the wait gives up.
    pub fn reserve(&self, len: usize) -> Result<Reservation> {
        let deadline = std::time::Instant::now() + self.config.reserve_timeout;
        loop {
            let write_lsn = self.notifier.written_lsn();
            let current_lsn = sn_to_lsn(self.buffer.current_sn());
            let in_flight = current_lsn.saturating_sub(write_lsn);
            let buffer_full = in_flight + len as u64 >= self.config.buffer_bytes as u64;

            let checkpoint_lsn = self.checkpointer.last_checkpoint_lsn();
            let logical_used = current_lsn.saturating_sub(checkpoint_lsn);
            let (soft, hard) = {
                let capacity = self.capacity.lock().unwrap();
                (capacity.soft_logical_capacity, capacity.hard_logical_capacity)
            };
            let over_soft = logical_used + len as u64 > soft;

            if !buffer_full && !over_soft {
                return self.buffer.reserve(len);
            }
            if std::time::Instant::now() >= deadline {
                if logical_used + len as u64 > hard {
                    return Err(LogError::CapacityExceeded(format!(
                        "reservation of {len} bytes would exceed hard logical capacity ({logical_used} of {hard} used)"
                    )));
                }
                if buffer_full {
                    return Err(LogError::OutOfSpace(format!(
                        "reserve timed out waiting for the writer to catch up ({in_flight} bytes in flight)"
                    )));
                }
                return self.buffer.reserve(len);
            }
            std::thread::sleep(Duration::from_millis(1));
        }
    }

    pub fn write(&self, reservation: &mut Reservation, data: &[u8]) {
        reservation.as_mut_slice().copy_from_slice(data);
    }

    pub fn publish(&self, reservation: Reservation) {
        self.writer.close_group(reservation.range.start, reservation.range.end);
        self.recent_closed.mark_closed(reservation.range.start, reservation.range.end);
    }

    /// Convenience wrapper around reserve/write/publish for callers that
    /// have the whole record ready as one contiguous buffer.
    pub fn append(&self, data: &[u8]) -> Result<LsnRange> {
        let mut reservation = self.reserve(data.len())?;
        self.write(&mut reservation, data);
        let range = reservation.range;
        self.publish(reservation);
        Ok(LsnRange::new(sn_to_lsn(range.start), sn_to_lsn(range.end)))
    }

    pub fn wait_written_at_least(&self, lsn: Lsn, timeout: Duration) -> Lsn {
        self.notifier.wait_written_at_least(lsn, self.config.writer_spin_rounds, timeout)
    }

    pub fn wait_flushed_at_least(&self, lsn: Lsn, timeout: Duration) -> Lsn {
        self.notifier.wait_flushed_at_least(lsn, self.config.flusher_spin_rounds, timeout)
    }

    pub fn durability_state(&self) -> DurabilityState {
        DurabilityState {
            write_lsn: self.notifier.written_lsn(),
            flushed_to_disk_lsn: self.notifier.flushed_lsn(),
            last_checkpoint_lsn: self.checkpointer.last_checkpoint_lsn(),
        }
    }

    pub fn register_consumer(&self, consumer: Arc<dyn Consumer>) {
        self.consumers.register(consumer);
    }

    pub fn unregister_consumer(&self, name: &str) {
        self.consumers.unregister(name);
    }

    pub fn capacity_limits(&self) -> CapacityLimits {
        *self.capacity.lock().unwrap()
    }

    /// Begin shrinking the physical capacity target to `target_bytes`. The
    /// governor only finishes the resize once no existing file, the total
    /// non-spare size, and the current logical size all fit the new target;
    /// until then oversized files are drained rather than replaced.
    pub fn begin_resize_down(&self, target_bytes: u64) {
        self.capacity.lock().unwrap().begin_resize(target_bytes);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn engine(dir: &std::path::Path) -> Arc<LogEngine> {
        let config = LogConfig::new(dir).with_buffer_bytes(64 * 1024).with_skip_fsyncs(true);
        LogEngine::init(config).unwrap()
    }

    #[test]
    fn append_advances_write_and_flush_after_start() {
        let dir = tempdir().unwrap();
        let engine = engine(dir.path());
        engine.start_background_threads();

        let range = engine.append(b"hello world").unwrap();
        let written = engine.wait_written_at_least(range.end, Duration::from_secs(2));
        assert!(written >= range.end);
        let flushed = engine.wait_flushed_at_least(range.end, Duration::from_secs(2));
        assert!(flushed >= range.end);

        engine.close().unwrap();
    }

    #[test]
    fn init_refuses_to_clobber_existing_files() {
        let dir = tempdir().unwrap();
        let _first = engine(dir.path());
        let config = LogConfig::new(dir.path());
        assert!(LogEngine::init(config).is_err());
    }

    #[test]
    fn read_blocks_returns_previously_written_bytes() {
        let dir = tempdir().unwrap();
        let engine = engine(dir.path());
        engine.start_background_threads();

        let range = engine.append(b"hello world").unwrap();
        engine.wait_flushed_at_least(range.end, Duration::from_secs(2));

        let bytes = engine.read_blocks(range.start, range.end).unwrap();
        assert_eq!(bytes, b"hello world");

        engine.close().unwrap();
    }

    #[test]
    fn reopened_engine_resumes_and_can_still_read_old_bytes() {
        let dir = tempdir().unwrap();
        let range = {
            let engine = engine(dir.path());
            engine.start_background_threads();
            let range = engine.append(b"durable payload").unwrap();
            engine.wait_flushed_at_least(range.end, Duration::from_secs(2));
            engine.close().unwrap();
            range
        };

        let config = LogConfig::new(dir.path()).with_skip_fsyncs(true);
        let reopened = LogEngine::open_existing_files(config).unwrap();
        assert!(reopened.durability_state().flushed_to_disk_lsn >= range.end);

        let bytes = reopened.read_blocks(range.start, range.end).unwrap();
        assert_eq!(bytes, b"durable payload");
    }

    #[test]
    fn persist_flags_roundtrips_through_file_header() {
        let dir = tempdir().unwrap();
        let engine = engine(dir.path());
        engine.persist_flags(crate::constants::flags::NO_LOGGING).unwrap();

        let mut handles = engine.handles.lock().unwrap();
        let handle = handles.get_mut(0).unwrap();
        let mut raw = [0u8; BLOCK_SIZE];
        handle.read_block(0, &mut raw).unwrap();
        drop(handles);
        let header = crate::codec::FileHeader::decode(&raw).unwrap();
        assert_eq!(header.flags & crate::constants::flags::NO_LOGGING, crate::constants::flags::NO_LOGGING);
    }

    #[test]
    fn set_encryption_metadata_is_readable_back() {
        let dir = tempdir().unwrap();
        let engine = engine(dir.path());
        engine.set_encryption_metadata(b"key-material").unwrap();

        let mut handles = engine.handles.lock().unwrap();
        let handle = handles.get_mut(0).unwrap();
        let mut raw = [0u8; BLOCK_SIZE];
        handle.read_block(crate::constants::ENCRYPTION_META_OFFSET, &mut raw).unwrap();
        drop(handles);
        assert_eq!(&raw[..b"key-material".len()], b"key-material");
    }
}
