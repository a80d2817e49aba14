//! On-disk encoding for log blocks, the file header, and checkpoint headers.
//!
//! Every block, and every checkpoint header, ends in a 4-byte CRC32 computed
//! over everything that precedes it; [`block_checksum`] is shared by both.

use crate::constants::{
    BLOCK_DATA_SIZE, BLOCK_HDR_SIZE, BLOCK_SIZE, BLOCK_TRL_SIZE, CREATOR_MAX_LEN,
};
use crate::error::{LogError, Result};
use crate::types::Lsn;

/// Top bit of `block_no`: set once the block has been fsync'd.
const FLUSH_BIT_MASK: u32 = 1 << 31;
/// Top bit of `data_len`: set when the data region holds ciphertext.
const ENCRYPT_BIT_MASK: u16 = 1 << 15;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockHeader {
    pub block_no: u32,
    pub flush_bit: bool,
    pub data_len: u16,
    pub encrypted: bool,
    pub first_rec_group: u16,
    pub epoch_no: u32,
}

pub fn block_checksum(bytes: &[u8]) -> u32 {
    crc32fast::hash(bytes)
}

pub fn encode_block(header: &BlockHeader, data: &[u8], out: &mut [u8; BLOCK_SIZE]) {
    assert!(data.len() <= BLOCK_DATA_SIZE);
    let block_no_field = header.block_no | if header.flush_bit { FLUSH_BIT_MASK } else { 0 };
    let data_len_field = header.data_len | if header.encrypted { ENCRYPT_BIT_MASK } else { 0 };
    out[0..4].copy_from_slice(&block_no_field.to_be_bytes());
    out[4..6].copy_from_slice(&data_len_field.to_be_bytes());
    out[6..8].copy_from_slice(&header.first_rec_group.to_be_bytes());
    out[8..12].copy_from_slice(&header.epoch_no.to_be_bytes());
    out[BLOCK_HDR_SIZE..BLOCK_HDR_SIZE + data.len()].copy_from_slice(data);
    for b in out[BLOCK_HDR_SIZE + data.len()..BLOCK_SIZE - BLOCK_TRL_SIZE].iter_mut() {
        *b = 0;
    }
    let checksum = block_checksum(&out[0..BLOCK_SIZE - BLOCK_TRL_SIZE]);
    out[BLOCK_SIZE - BLOCK_TRL_SIZE..].copy_from_slice(&checksum.to_be_bytes());
}

pub fn decode_block(raw: &[u8; BLOCK_SIZE]) -> Result<(BlockHeader, &[u8])> {
    let block_no_field = u32::from_be_bytes(raw[0..4].try_into().unwrap());
    let data_len_field = u16::from_be_bytes(raw[4..6].try_into().unwrap());
    let header = BlockHeader {
        block_no: block_no_field & !FLUSH_BIT_MASK,
        flush_bit: block_no_field & FLUSH_BIT_MASK != 0,
        data_len: data_len_field & !ENCRYPT_BIT_MASK,
        encrypted: data_len_field & ENCRYPT_BIT_MASK != 0,
        first_rec_group: u16::from_be_bytes(raw[6..8].try_into().unwrap()),
        epoch_no: u32::from_be_bytes(raw[8..12].try_into().unwrap()),
    };
    let stored = u32::from_be_bytes(raw[BLOCK_SIZE - BLOCK_TRL_SIZE..].try_into().unwrap());
    let computed = block_checksum(&raw[0..BLOCK_SIZE - BLOCK_TRL_SIZE]);
    if stored != computed {
        return Err(LogError::Corrupt(format!(
            "block checksum mismatch: stored={stored:#x} computed={computed:#x}"
        )));
    }
    if header.data_len as usize > BLOCK_DATA_SIZE {
        return Err(LogError::Corrupt(format!(
            "block data_len {} exceeds capacity {}",
            header.data_len, BLOCK_DATA_SIZE
        )));
    }
    let data = &raw[BLOCK_HDR_SIZE..BLOCK_HDR_SIZE + header.data_len as usize];
    Ok((header, data))
}

/// Byte layout of the file header block: format(4), uuid(4), start_lsn(8),
/// creator(`CREATOR_MAX_LEN`, null-padded), flags(4), zero padding, CRC32
/// trailer.
const UUID_OFFSET: usize = 4;
const START_LSN_OFFSET: usize = 8;
const CREATOR_OFFSET: usize = 16;
const FLAGS_OFFSET: usize = CREATOR_OFFSET + CREATOR_MAX_LEN;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileHeader {
    pub format: u32,
    /// Identifies the data directory this file belongs to, so a file from a
    /// different directory can never be mistaken for one of this set's.
    pub uuid: u32,
    pub start_lsn: Lsn,
    pub creator: String,
    pub flags: u32,
}

impl FileHeader {
    pub fn encode(&self, out: &mut [u8; BLOCK_SIZE]) {
        for b in out.iter_mut() {
            *b = 0;
        }
        out[0..4].copy_from_slice(&self.format.to_be_bytes());
        out[UUID_OFFSET..UUID_OFFSET + 4].copy_from_slice(&self.uuid.to_be_bytes());
        out[START_LSN_OFFSET..START_LSN_OFFSET + 8].copy_from_slice(&self.start_lsn.to_be_bytes());
        let creator_bytes = self.creator.as_bytes();
        let len = creator_bytes.len().min(CREATOR_MAX_LEN);
        out[CREATOR_OFFSET..CREATOR_OFFSET + len].copy_from_slice(&creator_bytes[..len]);
        out[FLAGS_OFFSET..FLAGS_OFFSET + 4].copy_from_slice(&self.flags.to_be_bytes());
        let checksum = block_checksum(&out[0..BLOCK_SIZE - BLOCK_TRL_SIZE]);
        out[BLOCK_SIZE - BLOCK_TRL_SIZE..].copy_from_slice(&checksum.to_be_bytes());
    }

    pub fn decode(raw: &[u8; BLOCK_SIZE]) -> Result<Self> {
        let stored = u32::from_be_bytes(raw[BLOCK_SIZE - BLOCK_TRL_SIZE..].try_into().unwrap());
        let computed = block_checksum(&raw[0..BLOCK_SIZE - BLOCK_TRL_SIZE]);
        if stored != computed {
            return Err(LogError::Corrupt(format!(
                "file header checksum mismatch: stored={stored:#x} computed={computed:#x}"
            )));
        }
        let format = u32::from_be_bytes(raw[0..4].try_into().unwrap());
        let uuid = u32::from_be_bytes(raw[UUID_OFFSET..UUID_OFFSET + 4].try_into().unwrap());
        let start_lsn = Lsn::from_be_bytes(raw[START_LSN_OFFSET..START_LSN_OFFSET + 8].try_into().unwrap());
        let creator_raw = &raw[CREATOR_OFFSET..CREATOR_OFFSET + CREATOR_MAX_LEN];
        let nul = creator_raw.iter().position(|&b| b == 0).unwrap_or(creator_raw.len());
        let creator = String::from_utf8_lossy(&creator_raw[..nul]).into_owned();
        let flags = u32::from_be_bytes(raw[FLAGS_OFFSET..FLAGS_OFFSET + 4].try_into().unwrap());
        Ok(Self { format, uuid, start_lsn, creator, flags })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CheckpointHeader {
    pub checkpoint_no: u64,
    pub checkpoint_lsn: Lsn,
}

impl CheckpointHeader {
    pub fn encode(&self, out: &mut [u8; BLOCK_SIZE]) {
        for b in out.iter_mut() {
            *b = 0;
        }
        out[0..8].copy_from_slice(&self.checkpoint_no.to_be_bytes());
        out[8..16].copy_from_slice(&self.checkpoint_lsn.to_be_bytes());
        let checksum = block_checksum(&out[0..BLOCK_SIZE - BLOCK_TRL_SIZE]);
        out[BLOCK_SIZE - BLOCK_TRL_SIZE..].copy_from_slice(&checksum.to_be_bytes());
    }

    pub fn decode(raw: &[u8; BLOCK_SIZE]) -> Result<Self> {
        let stored = u32::from_be_bytes(raw[BLOCK_SIZE - BLOCK_TRL_SIZE..].try_into().unwrap());
        let computed = block_checksum(&raw[0..BLOCK_SIZE - BLOCK_TRL_SIZE]);
        if stored != computed {
            return Err(LogError::Corrupt(format!(
                "checkpoint header checksum mismatch: stored={stored:#x} computed={computed:#x}"
            )));
        }
        Ok(Self {
            checkpoint_no: u64::from_be_bytes(raw[0..8].try_into().unwrap()),
            checkpoint_lsn: Lsn::from_be_bytes(raw[8..16].try_into().unwrap()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn block_roundtrip() {
        let header =
            BlockHeader { block_no: 17, flush_bit: false, data_len: 10, encrypted: false, first_rec_group: 0, epoch_no: 1 };
        let data = [7u8; 10];
        let mut raw = [0u8; BLOCK_SIZE];
        encode_block(&header, &data, &mut raw);
        let (decoded, decoded_data) = decode_block(&raw).unwrap();
        assert_eq!(decoded, header);
        assert_eq!(decoded_data, &data);
    }

    #[test]
    fn block_checksum_mismatch_detected() {
        let header =
            BlockHeader { block_no: 1, flush_bit: false, data_len: 4, encrypted: false, first_rec_group: 0, epoch_no: 1 };
        let mut raw = [0u8; BLOCK_SIZE];
        encode_block(&header, &[1, 2, 3, 4], &mut raw);
        raw[20] ^= 0xff;
        assert!(decode_block(&raw).is_err());
    }

    #[test]
    fn encrypted_bit_roundtrips_through_data_len_field() {
        let header =
            BlockHeader { block_no: 1, flush_bit: false, data_len: 4, encrypted: true, first_rec_group: 0, epoch_no: 1 };
        let mut raw = [0u8; BLOCK_SIZE];
        encode_block(&header, &[9, 9, 9, 9], &mut raw);
        let (decoded, decoded_data) = decode_block(&raw).unwrap();
        assert!(decoded.encrypted);
        assert_eq!(decoded.data_len, 4);
        assert_eq!(decoded_data, &[9, 9, 9, 9]);
    }

    #[test]
    fn file_header_roundtrip() {
        let header = FileHeader { format: 3, uuid: 0xCAFEF00D, start_lsn: 8192, creator: "redo-log-0.1.0".to_string(), flags: 0 };
        let mut raw = [0u8; BLOCK_SIZE];
        header.encode(&mut raw);
        assert_eq!(FileHeader::decode(&raw).unwrap(), header);
    }

    #[test]
    fn checkpoint_header_roundtrip() {
        let header = CheckpointHeader { checkpoint_no: 5, checkpoint_lsn: 123456 };
        let mut raw = [0u8; BLOCK_SIZE];
        header.encode(&mut raw);
        assert_eq!(CheckpointHeader::decode(&raw).unwrap(), header);
    }
}
