//! The file dictionary: an ordered view of the log files making up the
//! current LSN range, grounded on the `Log_files_dict` shape described
//! alongside `log0files_capacity.h` — contiguous, non-overlapping, ordered
//! by id and by LSN simultaneously.

use std::collections::BTreeMap;

use crate::error::{LogError, Result};
use crate::types::{FileId, Lsn};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileRecord {
    pub id: FileId,
    pub start_lsn: Lsn,
    pub size_in_bytes: u64,
    /// `None` while the file is still being written to (size not yet final).
    pub end_lsn: Option<Lsn>,
    pub full: bool,
    pub consumed: bool,
}

impl FileRecord {
    pub fn contains(&self, lsn: Lsn) -> bool {
        lsn >= self.start_lsn && self.end_lsn.map_or(true, |end| lsn < end)
    }
}

/// Ordered, contiguous set of log files. Invariants (checked on mutation):
/// files are ordered by both `id` and `start_lsn`; for every pair of
/// adjacent files, the earlier one's end LSN equals the later one's start
/// LSN once the earlier is marked full.
#[derive(Debug, Default)]
pub struct FileDictionary {
    files: BTreeMap<FileId, FileRecord>,
}

impl FileDictionary {
    pub fn new() -> Self {
        Self { files: BTreeMap::new() }
    }

    pub fn add(&mut self, record: FileRecord) -> Result<()> {
        if let Some(last) = self.files.values().last() {
            if record.id <= last.id {
                return Err(LogError::FilesInconsistent(format!(
                    "file id {} is not greater than last id {}", record.id, last.id
                )));
            }
            if let Some(last_end) = last.end_lsn {
                if record.start_lsn != last_end {
                    return Err(LogError::FilesInconsistent(format!(
                        "file {} starts at {} but previous file ends at {}",
                        record.id, record.start_lsn, last_end
                    )));
                }
            }
        }
        self.files.insert(record.id, record);
        Ok(())
    }

    pub fn erase(&mut self, id: FileId) -> Option<FileRecord> {
        self.files.remove(&id)
    }

    pub fn file(&self, id: FileId) -> Option<&FileRecord> {
        self.files.get(&id)
    }

    pub fn file_mut(&mut self, id: FileId) -> Option<&mut FileRecord> {
        self.files.get_mut(&id)
    }

    /// Find the file containing `lsn`, if any.
    pub fn find(&self, lsn: Lsn) -> Option<&FileRecord> {
        self.files.values().find(|f| f.contains(lsn))
    }

    pub fn front(&self) -> Option<&FileRecord> {
        self.files.values().next()
    }

    pub fn back(&self) -> Option<&FileRecord> {
        self.files.values().last()
    }

    pub fn begin(&self) -> impl DoubleEndedIterator<Item = &FileRecord> {
        self.files.values()
    }

    pub fn end(&self) -> impl DoubleEndedIterator<Item = &FileRecord> {
        self.files.values().rev()
    }

    pub fn count(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    pub fn set_full(&mut self, id: FileId, end_lsn: Lsn) -> Result<()> {
        let record = self.files.get_mut(&id).ok_or_else(|| LogError::NotFound(format!("file {id}")))?;
        record.full = true;
        record.end_lsn = Some(end_lsn);
        Ok(())
    }

    pub fn set_incomplete(&mut self, id: FileId) -> Result<()> {
        let record = self.files.get_mut(&id).ok_or_else(|| LogError::NotFound(format!("file {id}")))?;
        record.full = false;
        record.end_lsn = None;
        Ok(())
    }

    pub fn set_consumed(&mut self, id: FileId, consumed: bool) -> Result<()> {
        let record = self.files.get_mut(&id).ok_or_else(|| LogError::NotFound(format!("file {id}")))?;
        record.consumed = consumed;
        Ok(())
    }

    pub fn set_size(&mut self, id: FileId, size_in_bytes: u64) -> Result<()> {
        let record = self.files.get_mut(&id).ok_or_else(|| LogError::NotFound(format!("file {id}")))?;
        record.size_in_bytes = size_in_bytes;
        Ok(())
    }

    pub fn total_physical_size(&self) -> u64 {
        self.files.values().map(|f| f.size_in_bytes).sum()
    }

    /// Sum of capacity contributed by files not yet consumed (i.e. still
    /// needed to recover or read from), which is what counts against logical
    /// capacity.
    pub fn total_logical_capacity(&self) -> u64 {
        self.files.values().filter(|f| !f.consumed).map(|f| f.size_in_bytes).sum()
    }

    pub fn largest_file_size(&self) -> Option<u64> {
        self.files.values().map(|f| f.size_in_bytes).max()
    }

    /// Files whose LSN range intersects `[from, to)`, in order.
    pub fn range(&self, from: Lsn, to: Lsn) -> impl Iterator<Item = &FileRecord> {
        self.files.values().filter(move |f| {
            let end = f.end_lsn.unwrap_or(Lsn::MAX);
            f.start_lsn < to && end > from
        })
    }

    pub fn oldest_unconsumed(&self) -> Option<&FileRecord> {
        self.files.values().find(|f| !f.consumed)
    }
}
