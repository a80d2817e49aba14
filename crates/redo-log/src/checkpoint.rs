//! The checkpointer (C10): periodically records the oldest LSN still needed
//! by any registered consumer, alternating between the file's two
//! checkpoint header slots so a crash mid-write always leaves one valid
//! header behind.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tracing::{debug, warn};

use crate::codec::CheckpointHeader;
use crate::consumer::ConsumerRegistry;
use crate::constants::{BLOCK_SIZE, CHECKPOINT_1_OFFSET, CHECKPOINT_2_OFFSET};
use crate::error::Result;
use crate::file_handle::FileHandleCache;
use crate::lsn::block_start;
use crate::notifier::Notifier;
use crate::types::{FileId, Lsn};

const FILE_ZERO: FileId = 0;

pub struct Checkpointer {
    handles: Arc<Mutex<FileHandleCache>>,
    consumers: Arc<ConsumerRegistry>,
    notifier: Arc<Notifier>,
    checkpoint_no: AtomicU64,
    last_checkpoint_lsn: AtomicU64,
    stop: AtomicBool,
}

impl Checkpointer {
    pub fn new(
        handles: Arc<Mutex<FileHandleCache>>,
        consumers: Arc<ConsumerRegistry>,
        notifier: Arc<Notifier>,
        start_lsn: Lsn,
    ) -> Self {
        Self {
            handles,
            consumers,
            notifier,
            checkpoint_no: AtomicU64::new(0),
            last_checkpoint_lsn: AtomicU64::new(start_lsn),
            stop: AtomicBool::new(false),
        }
    }

    pub fn stop_flag(&self) -> &AtomicBool {
        &self.stop
    }

    pub fn last_checkpoint_lsn(&self) -> Lsn {
        self.last_checkpoint_lsn.load(Ordering::Acquire)
    }

    /// Move the floor forward to a recovered checkpoint LSN. Called once
    /// right after `read_latest` on reopen, so the next checkpoint this
    /// instance writes never regresses below what was already durable.
    pub fn resume_from(&self, lsn: Lsn) {
        self.last_checkpoint_lsn.store(lsn, Ordering::Release);
    }

    /// Write one checkpoint, choosing the target LSN as the oldest LSN any
    /// consumer needs (never ahead of what's flushed, and never behind the
    /// previous checkpoint).
    pub fn write_checkpoint(&self) -> Result<Lsn> {
        let flushed = self.notifier.flushed_lsn();
        let floor = self.last_checkpoint_lsn();
        if flushed < floor {
            debug!(flushed, checkpoint_lsn = floor, "nothing flushed past last checkpoint, skipping");
            return Ok(floor);
        }
        let target = self.consumers.oldest_needed_lsn().unwrap_or(flushed).clamp(floor, flushed.max(floor));
        let target = block_start(target).max(floor);

        let no = self.checkpoint_no.fetch_add(1, Ordering::AcqRel) + 1;
        let offset = if no % 2 == 1 { CHECKPOINT_1_OFFSET } else { CHECKPOINT_2_OFFSET };
        let header = CheckpointHeader { checkpoint_no: no, checkpoint_lsn: target };
        let mut raw = [0u8; BLOCK_SIZE];
        header.encode(&mut raw);

        let mut handles = self.handles.lock().unwrap();
        let handle = handles
            .get_mut(FILE_ZERO)
            .ok_or_else(|| crate::error::LogError::MissingNewestFile)?;
        handle.write_block(offset, &raw)?;
        handle.sync()?;
        drop(handles);

        self.last_checkpoint_lsn.store(target, Ordering::Release);
        debug!(checkpoint_no = no, checkpoint_lsn = target, "wrote checkpoint header");
        Ok(target)
    }

    /// Read whichever of the two checkpoint headers carries the higher
    /// `checkpoint_no`, used on recovery.
    pub fn read_latest(&self) -> Result<CheckpointHeader> {
        let mut handles = self.handles.lock().unwrap();
        let handle = handles
            .get_mut(FILE_ZERO)
            .ok_or_else(|| crate::error::LogError::MissingNewestFile)?;
        let mut raw1 = [0u8; BLOCK_SIZE];
        let mut raw2 = [0u8; BLOCK_SIZE];
        handle.read_block(CHECKPOINT_1_OFFSET, &mut raw1)?;
        handle.read_block(CHECKPOINT_2_OFFSET, &mut raw2)?;
        let h1 = CheckpointHeader::decode(&raw1);
        let h2 = CheckpointHeader::decode(&raw2);
        match (h1, h2) {
            (Ok(a), Ok(b)) => Ok(if a.checkpoint_no >= b.checkpoint_no { a } else { b }),
            (Ok(a), Err(_)) => Ok(a),
            (Err(_), Ok(b)) => Ok(b),
            (Err(e), Err(_)) => Err(e),
        }
    }

    pub fn run(self: Arc<Self>, period: Duration) {
        while !self.stop.load(Ordering::Relaxed) {
            std::thread::sleep(period);
            if self.stop.load(Ordering::Relaxed) {
                break;
            }
            if let Err(e) = self.write_checkpoint() {
                warn!(error = %e, "checkpoint write failed");
            }
        }
    }
}
