//! Read-only support for the pre-8.0.30 redo log layout: a single
//! `ib_logfile0..N` set with no file dictionary and a fixed file size taken
//! from the first file. Only used by recovery; the engine never writes this
//! format.

use crate::types::{FileId, Lsn};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LegacyFileInfo {
    pub id: FileId,
    pub path: std::path::PathBuf,
    pub size_in_bytes: u64,
    pub start_lsn: Lsn,
}

/// Legacy files have no per-file start/end LSN stamped in their header; the
/// caller derives `start_lsn` for file `n` as `checkpoint_lsn_of_file_0 + n *
/// (size_in_bytes - FILE_HDR_SIZE)`. This module only models the discovered
/// file set; the derivation lives in recovery (outside this crate's scope
/// for full replay, see `LogError::FormatTooOld`).
pub fn sort_by_id(mut files: Vec<LegacyFileInfo>) -> Vec<LegacyFileInfo> {
    files.sort_by_key(|f| f.id);
    files
}
