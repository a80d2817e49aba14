use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;

// ---------------------------------------------------------------------------
// Core scalar types
// ---------------------------------------------------------------------------

/// Log sequence number: a byte offset into the logical redo stream, including
/// block framing. 0 is reserved to mean "no LSN".
pub type Lsn = u64;

/// Logical page identifier.
pub type PageId = u64;

/// 8 KiB page — matches a typical database page size.
pub const PAGE_SIZE: usize = 8192;

pub type Page = [u8; PAGE_SIZE];

/// Return a zeroed page (blank slate for materialization).
pub fn empty_page() -> Page {
    [0u8; PAGE_SIZE]
}

// ---------------------------------------------------------------------------
// Redo record — the unit of change the mini-transaction front-end produces.
//
// Parsing and replay of these belongs to the collaborators built on top of
// the log engine (`redo-compute` encodes, `redo-pagestore` decodes); the log
// engine itself only ever sees the encoded bytes of a record group.
// ---------------------------------------------------------------------------

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct RedoRecord {
    /// Which page this record modifies.
    pub page_id: PageId,
    /// Byte offset within the page where `data` should be written.
    pub offset: u16,
    /// Payload — the bytes to write at `offset`.
    pub data: Vec<u8>,
    /// Mini-transaction group identifier.
    pub mtr_id: u64,
    /// True for the last record of its group.
    pub is_group_end: bool,
}

/// Wire encoding for a record group: the bytes `redo-compute` hands to the
/// log engine's `append`, and the bytes `redo-pagestore` decodes back out
/// when replaying. JSON keeps this readable in tests and matches how the
/// teacher crate persisted its segment manifest.
pub fn encode_record_group(records: &[RedoRecord]) -> Vec<u8> {
    serde_json::to_vec(records).expect("RedoRecord is always JSON-serializable")
}

pub fn decode_record_group(bytes: &[u8]) -> Result<Vec<RedoRecord>, StorageError> {
    serde_json::from_slice(bytes).map_err(|e| StorageError::Log(format!("corrupt record group: {e}")))
}

/// Durability watermarks published by the redo log engine.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct DurabilityState {
    /// Highest LSN the writer thread has placed on disk (not necessarily fsynced).
    pub write_lsn: Lsn,
    /// Highest LSN known to be fsynced.
    pub flushed_to_disk_lsn: Lsn,
    /// Highest LSN covered by the last successful checkpoint.
    pub last_checkpoint_lsn: Lsn,
}

impl fmt::Display for DurabilityState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "DurabilityState(write={}, flushed={}, checkpoint={})",
            self.write_lsn, self.flushed_to_disk_lsn, self.last_checkpoint_lsn
        )
    }
}

// ---------------------------------------------------------------------------
// StorageApi trait — the compute <-> storage boundary
// ---------------------------------------------------------------------------

#[async_trait]
pub trait StorageApi: Send + Sync {
    /// Append a record group. Returns the LSN of its last (group-end) record once durable.
    async fn append_redo(&self, records: Vec<RedoRecord>) -> Result<Lsn, StorageError>;

    /// Read a page materialized up to the given read-point LSN.
    async fn get_page(&self, page_id: PageId, read_point: Lsn) -> Result<Page, StorageError>;

    /// Current durability state of the underlying redo log.
    async fn get_durability_state(&self) -> Result<DurabilityState, StorageError>;
}


#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("redo log error: {0}")]
    Log(String),

    #[error("page {page_id} not found at or below LSN {lsn}")]
    PageNotFound { page_id: PageId, lsn: Lsn },

    #[error("requested LSN {requested} exceeds durable LSN {durable}")]
    LsnBeyondDurable { requested: Lsn, durable: Lsn },

    #[error("redo record data overflows page: offset={offset} len={len}")]
    PageOverflow { offset: u16, len: usize },

    #[error("{0}")]
    Other(String),
}
