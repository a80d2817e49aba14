//! Redo log constant values, grounded on `log0constants.h`.
//!
//! This module should not be used directly outside the crate except through
//! the re-exports in `lib.rs` — keep it the single place numeric layout
//! constants are defined.

use crate::types::Lsn;

/// Current on-disk file format version this engine writes and fully reads.
pub const CURRENT_FORMAT: u32 = 3;

/// Formats at or below this are the pre-8.0.30 legacy layout (no file
/// dictionary, fixed-size `ib_logfile0..N` set); recognized read-only.
pub const LEGACY_FORMAT_MAX: u32 = 1;

/// Size of a single log block, fixed by the on-disk format.
pub const BLOCK_SIZE: usize = 512;

/// Size of a log block's header (block_no, data_len, first_rec_group, epoch_no).
pub const BLOCK_HDR_SIZE: usize = 12;

/// Size of a log block's trailer (CRC32 checksum).
pub const BLOCK_TRL_SIZE: usize = 4;

/// Size of a block's data fragment, where payload bytes actually live.
pub const BLOCK_DATA_SIZE: usize = BLOCK_SIZE - BLOCK_HDR_SIZE - BLOCK_TRL_SIZE;

const _: () = assert!(BLOCK_HDR_SIZE + BLOCK_TRL_SIZE < BLOCK_DATA_SIZE);

/// Size of a log file's header region (blocks 0..3 of the first file, or
/// just block 0 for files after the first).
pub const FILE_HDR_SIZE: u64 = 4 * BLOCK_SIZE as u64;

/// Offset of the first checkpoint header within file 0.
pub const CHECKPOINT_1_OFFSET: u64 = BLOCK_SIZE as u64;

/// Offset of the encryption metadata block within file 0.
pub const ENCRYPTION_META_OFFSET: u64 = 2 * BLOCK_SIZE as u64;

/// Offset of the second checkpoint header within file 0.
pub const CHECKPOINT_2_OFFSET: u64 = 3 * BLOCK_SIZE as u64;

/// LSN counting starts here; must be non-zero so that 0 can mean "no LSN".
pub const LOG_START_LSN: Lsn = 16 * BLOCK_SIZE as Lsn;

/// Maximum representable LSN (63 bits, leaving the top bit free on SN).
pub const LSN_MAX: Lsn = (1u64 << 63) - 1;

/// Top bit of the SN counter, set while reservation is paused (init/shutdown).
pub const SN_LOCKED_BIT: u64 = 1u64 << 63;

/// Targeted number of log files in the file set.
pub const N_FILES: u32 = 32;

/// Number of blocks per epoch; block numbers wrap at this boundary.
pub const EPOCH_BLOCKS: u64 = 1 << 30;

/// Width of the creator string field in the file header, null-padded.
pub const CREATOR_MAX_LEN: usize = 32;

/// Minimum size of a single log file.
pub const FILE_MIN_SIZE: u64 = 64 * 1024;

/// Maximum size of a single log file.
pub const FILE_MAX_SIZE: u64 = 4 * 1024 * 1024 * 1024;

/// Minimum allowed total redo capacity.
pub const CAPACITY_MIN: u64 = 8 * 1024 * 1024;

/// Maximum allowed total redo capacity.
pub const CAPACITY_MAX: u64 = N_FILES as u64 * FILE_MAX_SIZE;

/// Maximum number of open file handles allowed across the whole engine.
pub const MAX_OPEN_FILES: usize = 2;

/// Flag bits persisted in the file header.
pub mod flags {
    pub const NO_LOGGING: u32 = 1 << 0;
    pub const CRASH_UNSAFE: u32 = 1 << 1;
    pub const NOT_INITIALIZED: u32 = 1 << 2;
    pub const FILE_FULL: u32 = 1 << 3;
}

/// Margin ahead of `write_lsn` at which the governor prepares the next file,
/// expressed as a percentage of the next file's size.
pub const NEXT_FILE_EARLIER_MARGIN_PCT: u64 = 10;

/// Extra capacity reserved for the writer thread's private margin, as a
/// percentage of hard logical capacity.
pub const EXTRA_WRITER_MARGIN_PCT: u64 = 5;

/// Extra capacity reserved on top of the concurrency margin, as a percentage
/// of soft logical capacity.
pub const EXTRA_CONCURRENCY_MARGIN_PCT: u64 = 5;

/// Hard ceiling on the concurrency margin, as a percentage of soft logical capacity.
pub const CONCURRENCY_MARGIN_MAX_PCT: u64 = 50;

/// Background threads that also produce mini-transactions but aren't counted
/// in the user-thread concurrency limit.
pub const BACKGROUND_THREADS_USING_RW_MTRS: u64 = 10;

/// Per-thread margin reserved ahead of a mini-transaction, in pages.
pub const CHECKPOINT_FREE_PER_THREAD_PAGES: u64 = 4;

/// Bytes of dummy intake the governor may generate per iteration to force progress.
pub const DUMMY_INTAKE_SIZE: usize = 4 * 1024;

/// Ratio controlling where aggressive checkpointing kicks in, relative to
/// the age axis (bigger means "further out" / later).
pub const AGGRESSIVE_CHECKPOINT_RATIO: u64 = 32;

/// Ratio controlling where adaptive flushing reaches maximum aggressiveness.
pub const ADAPTIVE_FLUSH_MAX_RATIO: u64 = 16;

/// Ratio controlling where adaptive flushing starts to ramp up.
pub const ADAPTIVE_FLUSH_MIN_RATIO: u64 = 8;
