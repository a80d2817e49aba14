//! The writer thread (C7): copies completed mini-transaction groups out of
//! the shared buffer, stamps them into 512-byte blocks, and writes those
//! blocks to the current file — advancing `write_lsn` once bytes have
//! reached the OS (not yet durable; that's the flusher's job).

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tracing::{debug, warn};

use crate::buffer::LogBuffer;
use crate::codec::{encode_block, BlockHeader};
use crate::completion::CompletionRing;
use crate::constants::{BLOCK_DATA_SIZE, BLOCK_HDR_SIZE, BLOCK_SIZE};
use crate::encryption::EncryptionProvider;
use crate::error::Result;
use crate::file_dict::FileDictionary;
use crate::file_handle::FileHandleCache;
use crate::lsn::{block_start, epoch_no, is_data_lsn, sn_to_lsn};
use crate::notifier::Notifier;
use crate::types::Sn;
use crate::wait::WaitPoint;

pub struct Writer {
    buffer: Arc<LogBuffer>,
    recent_written: CompletionRing,
    group_closed: WaitPoint,
    files: Arc<Mutex<FileDictionary>>,
    handles: Arc<Mutex<FileHandleCache>>,
    notifier: Arc<Notifier>,
    last_written_sn: Mutex<Sn>,
    /// SNs at which a reserved group starts, so a block straddling a group
    /// boundary can stamp the real `first_rec_group` offset instead of 0.
    group_starts: Mutex<BTreeSet<Sn>>,
    encrypt: bool,
    encryption: Arc<dyn EncryptionProvider>,
    stop: AtomicBool,
}

impl Writer {
    pub fn new(
        buffer: Arc<LogBuffer>,
        files: Arc<Mutex<FileDictionary>>,
        handles: Arc<Mutex<FileHandleCache>>,
        notifier: Arc<Notifier>,
        recent_written_slots: usize,
        encrypt: bool,
        encryption: Arc<dyn EncryptionProvider>,
    ) -> Self {
        let start_sn = buffer.current_sn();
        Self {
            buffer,
            recent_written: CompletionRing::new(recent_written_slots, BLOCK_DATA_SIZE as u64),
            group_closed: WaitPoint::new(),
            files,
            handles,
            notifier,
            last_written_sn: Mutex::new(start_sn),
            group_starts: Mutex::new(BTreeSet::new()),
            encrypt,
            encryption,
            stop: AtomicBool::new(false),
        }
    }

    /// Called by a producer once it has finished copying a reserved group
    /// into the buffer; wakes the writer so it can pick the bytes up.
    pub fn close_group(&self, start: Sn, end: Sn) {
        self.recent_written.mark_done(start, end);
        self.group_starts.lock().unwrap().insert(start);
        self.group_closed.advance(end);
    }

    pub fn stop_flag(&self) -> &AtomicBool {
        &self.stop
    }

    /// Offset (from block start, `0` if none) of the first byte in this
    /// block's data region where a new reserved group begins.
    fn first_rec_group_for(&self, data_start_sn: Sn) -> u16 {
        let data_end_sn = data_start_sn + BLOCK_DATA_SIZE as Sn;
        let starts = self.group_starts.lock().unwrap();
        starts
            .range(data_start_sn..data_end_sn)
            .next()
            .map(|&s| BLOCK_HDR_SIZE as u16 + (s - data_start_sn) as u16)
            .unwrap_or(0)
    }

    fn write_block_for(&self, block_start_lsn: u64, data: &[u8], data_start_sn: Sn) -> Result<()> {
        let files = self.files.lock().unwrap();
        let file = files
            .find(block_start_lsn)
            .ok_or_else(|| crate::error::LogError::NotFound(format!("no file covers lsn {block_start_lsn}")))?;
        let file_id = file.id;
        let header_size = if file.id == 0 { crate::constants::FILE_HDR_SIZE } else { BLOCK_SIZE as u64 };
        let offset_in_file = block_start_lsn - file.start_lsn + header_size;
        drop(files);

        let stored = if self.encrypt { self.encryption.encrypt(data)? } else { data.to_vec() };
        let header = BlockHeader {
            block_no: crate::lsn::block_no(block_start_lsn),
            flush_bit: false,
            data_len: stored.len() as u16,
            encrypted: self.encrypt,
            first_rec_group: self.first_rec_group_for(data_start_sn),
            epoch_no: epoch_no(block_start_lsn),
        };
        let mut raw = [0u8; BLOCK_SIZE];
        encode_block(&header, &stored, &mut raw);

        let mut handles = self.handles.lock().unwrap();
        let handle = handles
            .get_mut(file_id)
            .ok_or_else(|| crate::error::LogError::NotFound(format!("file {file_id} not open")))?;
        handle.write_block(offset_in_file, &raw)
    }

    /// Drain whatever contiguous bytes are ready, writing full and partial
    /// blocks as needed, and publish the new `write_lsn`.
    pub fn drain_once(&self) -> Result<bool> {
        let mut last_sn = self.last_written_sn.lock().unwrap();
        let boundary = self.recent_written.advance(*last_sn);
        if boundary == *last_sn {
            return Ok(false);
        }
        let bytes = self.buffer.read_range(*last_sn, boundary);

        let mut lsn = sn_to_lsn(*last_sn);
        let mut cursor = 0usize;
        while cursor < bytes.len() {
            let bs = block_start(lsn);
            let data_offset = (lsn - bs) as usize - BLOCK_HDR_SIZE;
            let room = BLOCK_DATA_SIZE - data_offset;
            let take = room.min(bytes.len() - cursor);

            // Partial blocks (not filling the whole data region) are still
            // written eagerly so a crash loses at most one in-flight block;
            // rewrite the block's already-written prefix together with the
            // new suffix, since the codec always stamps a whole block.
            let mut full_chunk = vec![0u8; data_offset + take];
            if data_offset > 0 {
                let block_data_start_sn = crate::lsn::lsn_to_sn(bs + BLOCK_HDR_SIZE as u64);
                let prior = self.buffer.read_range(block_data_start_sn, block_data_start_sn + data_offset as u64);
                full_chunk[..data_offset].copy_from_slice(&prior);
            }
            full_chunk[data_offset..].copy_from_slice(&bytes[cursor..cursor + take]);
            let data_start_sn = crate::lsn::lsn_to_sn(bs + BLOCK_HDR_SIZE as u64);
            self.write_block_for(bs, &full_chunk, data_start_sn)?;

            cursor += take;
            lsn += take as u64;
            if take == room {
                // filled this block to the end of its data region; jump to
                // the first data byte of the next block.
                lsn = bs + BLOCK_SIZE as u64 + BLOCK_HDR_SIZE as u64;
            }
        }
        debug_assert!(bytes.is_empty() || is_data_lsn(lsn - 1));

        {
            // Keep two blocks' worth of history so a block still being
            // partially filled can always find its own group start again.
            let mut starts = self.group_starts.lock().unwrap();
            let floor = boundary.saturating_sub(2 * BLOCK_DATA_SIZE as Sn);
            *starts = starts.split_off(&floor);
        }
        *last_sn = boundary;
        let new_write_lsn = sn_to_lsn(boundary);
        self.buffer.advance_write_lsn(new_write_lsn);
        self.notifier.publish_written(new_write_lsn);
        debug!(write_lsn = new_write_lsn, bytes = bytes.len(), "writer drained group(s)");
        Ok(true)
    }

    pub fn run(self: Arc<Self>, spin_rounds: u32, timeout: Duration) {
        let mut last_seen = 0u64;
        while !self.stop.load(Ordering::Relaxed) {
            match self.drain_once() {
                Ok(true) => continue,
                Ok(false) => {
                    last_seen = self.group_closed.wait_at_least(last_seen + 1, spin_rounds, timeout);
                }
                Err(e) => {
                    warn!(error = %e, "writer drain failed");
                    std::thread::sleep(timeout);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::LOG_START_LSN;
    use crate::lsn::lsn_to_sn;

    fn writer() -> Writer {
        Writer::new(
            Arc::new(LogBuffer::new(4096, 0, LOG_START_LSN)),
            Arc::new(Mutex::new(FileDictionary::new())),
            Arc::new(Mutex::new(FileHandleCache::new())),
            Arc::new(Notifier::new()),
            16,
            false,
            Arc::new(crate::encryption::NoEncryption),
        )
    }

    #[test]
    fn first_rec_group_is_zero_when_no_group_starts_in_block() {
        let w = writer();
        let data_start = lsn_to_sn(LOG_START_LSN + BLOCK_HDR_SIZE as u64);
        assert_eq!(w.first_rec_group_for(data_start), 0);
    }

    #[test]
    fn first_rec_group_finds_the_earliest_start_in_block() {
        let w = writer();
        let data_start = lsn_to_sn(LOG_START_LSN + BLOCK_HDR_SIZE as u64);
        w.close_group(data_start + 50, data_start + 80);
        w.close_group(data_start + 10, data_start + 50);
        assert_eq!(w.first_rec_group_for(data_start), BLOCK_HDR_SIZE as u16 + 10);
    }

    #[test]
    fn first_rec_group_ignores_starts_outside_the_block() {
        let w = writer();
        let data_start = lsn_to_sn(LOG_START_LSN + BLOCK_HDR_SIZE as u64);
        w.close_group(data_start + BLOCK_DATA_SIZE as Sn + 5, data_start + BLOCK_DATA_SIZE as Sn + 20);
        assert_eq!(w.first_rec_group_for(data_start), 0);
    }
}
