//! Recovery-time file discovery (C7): scan `base_dir` for an existing
//! `redo.*.log` file set and classify it before the engine decides whether
//! to open it for write or refuse, grounded on `log0files_finder.h`'s
//! find-or-create split.

use std::path::{Path, PathBuf};

use crate::codec::FileHeader;
use crate::constants::{BLOCK_SIZE, CURRENT_FORMAT, LEGACY_FORMAT_MAX};
use crate::error::Result;
use crate::file_dict::{FileDictionary, FileRecord};
use crate::file_handle::FileHandle;
use crate::legacy::LegacyFileInfo;
use crate::types::{FileId, FindResult};

fn list_redo_files(base_dir: &Path) -> Result<Vec<(FileId, PathBuf)>> {
    let mut out = Vec::new();
    if !base_dir.exists() {
        return Ok(out);
    }
    for entry in std::fs::read_dir(base_dir)? {
        let entry = entry?;
        let name = entry.file_name();
        let name = name.to_string_lossy();
        if let Some(id_str) = name.strip_prefix("redo.").and_then(|s| s.strip_suffix(".log")) {
            if let Ok(id) = id_str.parse::<FileId>() {
                out.push((id, entry.path()));
            }
        }
    }
    out.sort_by_key(|(id, _)| *id);
    Ok(out)
}

fn peek_format(raw: &[u8; BLOCK_SIZE]) -> u32 {
    u32::from_be_bytes(raw[0..4].try_into().unwrap())
}

/// Classify whatever is in `base_dir`: no files, a current-format set ready
/// to reopen, a legacy set, or an inconsistent/incompatible one.
pub fn find_files(base_dir: &Path) -> Result<FindResult> {
    let entries = list_redo_files(base_dir)?;
    if entries.is_empty() {
        return Ok(FindResult::NoFiles);
    }

    let mut blocks = Vec::with_capacity(entries.len());
    for (id, path) in &entries {
        let mut handle = FileHandle::open_existing(*id, path)?;
        let mut raw = [0u8; BLOCK_SIZE];
        handle.read_block(0, &mut raw)?;
        let size = handle.len()?;
        blocks.push((*id, path.clone(), raw, size));
    }

    if blocks.iter().any(|(_, _, raw, _)| peek_format(raw) > CURRENT_FORMAT) {
        return Ok(FindResult::FormatTooNew);
    }
    if blocks.iter().any(|(_, _, raw, _)| peek_format(raw) <= LEGACY_FORMAT_MAX) {
        let legacy = blocks
            .into_iter()
            .map(|(id, path, _raw, size)| LegacyFileInfo { id, path, size_in_bytes: size, start_lsn: 0 })
            .collect();
        return Ok(FindResult::Legacy(legacy));
    }
    if blocks.iter().any(|(_, _, raw, _)| peek_format(raw) < CURRENT_FORMAT) {
        return Ok(FindResult::FormatTooOld);
    }

    let mut headers = Vec::with_capacity(blocks.len());
    for (id, path, raw, size) in &blocks {
        match FileHeader::decode(raw) {
            Ok(header) => headers.push((*id, path.clone(), header, *size)),
            Err(e) => return Ok(FindResult::Inconsistent(format!("file {id}: {e}"))),
        }
    }

    let mut dict = FileDictionary::new();
    for i in 0..headers.len() {
        let (id, _, header, size) = &headers[i];
        let is_last = i + 1 == headers.len();
        let end_lsn = if is_last { None } else { Some(headers[i + 1].2.start_lsn) };
        let record = FileRecord {
            id: *id,
            start_lsn: header.start_lsn,
            size_in_bytes: *size,
            end_lsn,
            full: !is_last,
            consumed: false,
        };
        if let Err(e) = dict.add(record) {
            return Ok(FindResult::Inconsistent(e.to_string()));
        }
    }

    Ok(FindResult::Found(dict))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::FILE_HDR_SIZE;
    use tempfile::tempdir;

    fn write_file(dir: &Path, id: FileId, start_lsn: u64, format: u32) {
        let path = dir.join(format!("redo.{id:08}.log"));
        let mut handle = FileHandle::create(id, &path, FILE_HDR_SIZE + BLOCK_SIZE as u64).unwrap();
        let header = FileHeader { format, uuid: 0xCAFEF00D, start_lsn, creator: "redo-log".into(), flags: 0 };
        let mut raw = [0u8; BLOCK_SIZE];
        header.encode(&mut raw);
        handle.write_block(0, &raw).unwrap();
        handle.sync().unwrap();
    }

    #[test]
    fn empty_directory_reports_no_files() {
        let dir = tempdir().unwrap();
        assert!(matches!(find_files(dir.path()).unwrap(), FindResult::NoFiles));
    }

    #[test]
    fn single_current_format_file_is_found() {
        let dir = tempdir().unwrap();
        write_file(dir.path(), 0, 8192, CURRENT_FORMAT);
        match find_files(dir.path()).unwrap() {
            FindResult::Found(dict) => {
                assert_eq!(dict.count(), 1);
                assert_eq!(dict.front().unwrap().start_lsn, 8192);
            }
            other => panic!("expected Found, got {other:?}"),
        }
    }

    #[test]
    fn contiguous_two_file_set_chains_end_lsn_from_next_start() {
        let dir = tempdir().unwrap();
        write_file(dir.path(), 0, 8192, CURRENT_FORMAT);
        write_file(dir.path(), 1, 16384, CURRENT_FORMAT);
        match find_files(dir.path()).unwrap() {
            FindResult::Found(dict) => {
                assert_eq!(dict.file(0).unwrap().end_lsn, Some(16384));
                assert!(dict.file(0).unwrap().full);
                assert_eq!(dict.file(1).unwrap().end_lsn, None);
                assert!(!dict.file(1).unwrap().full);
            }
            other => panic!("expected Found, got {other:?}"),
        }
    }

    #[test]
    fn newer_format_is_rejected() {
        let dir = tempdir().unwrap();
        write_file(dir.path(), 0, 8192, CURRENT_FORMAT + 1);
        assert!(matches!(find_files(dir.path()).unwrap(), FindResult::FormatTooNew));
    }

    #[test]
    fn intermediate_format_is_too_old() {
        let dir = tempdir().unwrap();
        write_file(dir.path(), 0, 8192, CURRENT_FORMAT - 1);
        assert!(matches!(find_files(dir.path()).unwrap(), FindResult::FormatTooOld));
    }

    #[test]
    fn legacy_format_is_recognized() {
        let dir = tempdir().unwrap();
        write_file(dir.path(), 0, 8192, 0);
        match find_files(dir.path()).unwrap() {
            FindResult::Legacy(files) => assert_eq!(files.len(), 1),
            other => panic!("expected Legacy, got {other:?}"),
        }
    }
}
