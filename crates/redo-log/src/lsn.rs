//! Bijective conversion between SN (data-byte sequence) and LSN (byte
//! sequence including block framing), and the block/epoch numbering that
//! derives from an LSN.

use crate::constants::{BLOCK_DATA_SIZE, BLOCK_HDR_SIZE, BLOCK_SIZE, BLOCK_TRL_SIZE, EPOCH_BLOCKS, LOG_START_LSN};
use crate::types::{Lsn, Sn};

/// Convert a data-byte sequence number to its logical sequence number.
///
/// `sn = 0` maps to the first data byte of the first block after
/// `LOG_START_LSN`, i.e. `LOG_START_LSN + BLOCK_HDR_SIZE`.
pub fn sn_to_lsn(sn: Sn) -> Lsn {
    let data = BLOCK_DATA_SIZE as u64;
    let block = BLOCK_SIZE as u64;
    let block_index = sn / data;
    let offset_in_data = sn % data;
    LOG_START_LSN + block_index * block + offset_in_data + BLOCK_HDR_SIZE as u64
}

/// Convert a data LSN back to its SN. Panics (in debug) if `lsn` is not a
/// valid data LSN (see [`is_data_lsn`]).
pub fn lsn_to_sn(lsn: Lsn) -> Sn {
    debug_assert!(is_data_lsn(lsn), "lsn {lsn} does not address a data byte");
    let rel = lsn - LOG_START_LSN;
    let block = BLOCK_SIZE as u64;
    let block_index = rel / block;
    let offset_in_block = rel % block;
    block_index * BLOCK_DATA_SIZE as u64 + (offset_in_block - BLOCK_HDR_SIZE as u64)
}

/// True iff `lsn` addresses a payload byte (not header/trailer framing).
pub fn is_data_lsn(lsn: Lsn) -> bool {
    let off = lsn % BLOCK_SIZE as u64;
    off >= BLOCK_HDR_SIZE as u64 && off < (BLOCK_SIZE - BLOCK_TRL_SIZE) as u64
}

/// Round `lsn` down to the start of its containing block.
pub fn block_start(lsn: Lsn) -> Lsn {
    lsn - lsn % BLOCK_SIZE as u64
}

/// Round `lsn` up to a block boundary.
pub fn align_up_to_block(lsn: Lsn) -> Lsn {
    let block = BLOCK_SIZE as u64;
    (lsn + block - 1) / block * block
}

/// `epoch_no` stored in the header of the block starting at `block_start_lsn`.
pub fn epoch_no(block_start_lsn: Lsn) -> u32 {
    let block_index = block_start_lsn / BLOCK_SIZE as u64;
    (1 + block_index / EPOCH_BLOCKS) as u32
}

/// `block_no` (within its epoch) stored in the header of the block starting
/// at `block_start_lsn`. Never has the reserved top bit set.
pub fn block_no(block_start_lsn: Lsn) -> u32 {
    let block_index = block_start_lsn / BLOCK_SIZE as u64;
    (1 + block_index % EPOCH_BLOCKS) as u32
}
