//! The flusher thread (C8): fsyncs open file handles and publishes
//! `flushed_to_disk_lsn` once the bytes the writer handed off are durable.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tracing::{debug, warn};

use crate::config::LogConfig;
use crate::error::Result;
use crate::file_handle::FileHandleCache;
use crate::notifier::Notifier;

pub struct Flusher {
    handles: Arc<Mutex<FileHandleCache>>,
    notifier: Arc<Notifier>,
    skip_fsyncs: bool,
    stop: AtomicBool,
}

impl Flusher {
    pub fn new(handles: Arc<Mutex<FileHandleCache>>, notifier: Arc<Notifier>, config: &LogConfig) -> Self {
        Self { handles, notifier, skip_fsyncs: config.skip_fsyncs, stop: AtomicBool::new(false) }
    }

    pub fn stop_flag(&self) -> &AtomicBool {
        &self.stop
    }

    /// Flush whatever has been written so far and publish the new
    /// `flushed_to_disk_lsn`. Returns the LSN just flushed up to.
    pub fn flush_once(&self) -> Result<u64> {
        let target = self.notifier.written_lsn();
        if target <= self.notifier.flushed_lsn() {
            return Ok(self.notifier.flushed_lsn());
        }
        if !self.skip_fsyncs {
            self.handles.lock().unwrap().sync_all()?;
        }
        self.notifier.publish_flushed(target);
        debug!(flushed_to_disk_lsn = target, "flusher published durability boundary");
        Ok(target)
    }

    pub fn run(self: Arc<Self>, spin_rounds: u32, timeout: Duration) {
        let mut last_target = 0u64;
        while !self.stop.load(Ordering::Relaxed) {
            match self.flush_once() {
                Ok(flushed) if flushed > last_target => {
                    last_target = flushed;
                }
                Ok(_) => {
                    let wait_for = self.notifier.written_lsn().max(last_target + 1);
                    self.notifier.wait_written_at_least(wait_for, spin_rounds, timeout);
                }
                Err(e) => {
                    warn!(error = %e, "flusher failed to sync");
                    std::thread::sleep(timeout);
                }
            }
        }
    }
}
