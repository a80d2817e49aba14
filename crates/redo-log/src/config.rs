//! Engine tunables, grounded on the `INNODB_LOG_*` defaults in
//! `log0constants.h` and expressed as a plain struct with builder-style
//! setters, the same way `StoragePreset` configures the storage layer.

use std::time::Duration;

use crate::constants::{CAPACITY_MIN, FILE_MIN_SIZE, N_FILES};

#[derive(Debug, Clone)]
pub struct LogConfig {
    pub base_dir: std::path::PathBuf,
    pub capacity_bytes: u64,
    pub buffer_bytes: usize,
    pub write_ahead_buffer_bytes: usize,
    pub recent_written_slots: usize,
    pub recent_closed_slots: usize,
    pub encrypt: bool,
    pub writer_spin_rounds: u32,
    pub writer_timeout: Duration,
    pub flusher_spin_rounds: u32,
    pub flusher_timeout: Duration,
    pub checkpoint_period: Duration,
    pub max_concurrent_mtrs: u64,
    pub avg_mtr_size: u64,
    /// How long `LogEngine::reserve` blocks waiting for the writer to catch
    /// up or for logical capacity headroom before giving up.
    pub reserve_timeout: Duration,
    /// Test-only: skip `fsync` in the flusher so tests run fast. Never used
    /// in production configs; the checkpointer still fsyncs regardless.
    pub skip_fsyncs: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            base_dir: std::path::PathBuf::from("."),
            capacity_bytes: CAPACITY_MIN.max(128 * 1024 * 1024),
            buffer_bytes: 16 * 1024 * 1024,
            write_ahead_buffer_bytes: 4096,
            recent_written_slots: 1024,
            recent_closed_slots: 1024,
            encrypt: false,
            writer_spin_rounds: 1000,
            writer_timeout: Duration::from_millis(10),
            flusher_spin_rounds: 1000,
            flusher_timeout: Duration::from_millis(10),
            checkpoint_period: Duration::from_secs(1),
            max_concurrent_mtrs: 16,
            avg_mtr_size: 512,
            reserve_timeout: Duration::from_secs(5),
            skip_fsyncs: false,
        }
    }
}

impl LogConfig {
    pub fn new(base_dir: impl Into<std::path::PathBuf>) -> Self {
        Self { base_dir: base_dir.into(), ..Default::default() }
    }

    pub fn with_capacity_bytes(mut self, bytes: u64) -> Self {
        self.capacity_bytes = bytes.max(CAPACITY_MIN);
        self
    }

    pub fn with_buffer_bytes(mut self, bytes: usize) -> Self {
        self.buffer_bytes = bytes;
        self
    }

    pub fn with_encrypt(mut self, encrypt: bool) -> Self {
        self.encrypt = encrypt;
        self
    }

    pub fn with_checkpoint_period(mut self, period: Duration) -> Self {
        self.checkpoint_period = period;
        self
    }

    pub fn with_reserve_timeout(mut self, timeout: Duration) -> Self {
        self.reserve_timeout = timeout;
        self
    }

    pub fn with_skip_fsyncs(mut self, skip: bool) -> Self {
        self.skip_fsyncs = skip;
        self
    }

    pub fn default_file_size(&self) -> u64 {
        (self.capacity_bytes / N_FILES as u64).max(FILE_MIN_SIZE)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn capacity_floor_is_enforced() {
        let cfg = LogConfig::new(".").with_capacity_bytes(1);
        assert_eq!(cfg.capacity_bytes, CAPACITY_MIN);
    }
}
