//! Thin wrapper over `std::fs::File` for positioned block I/O, plus a small
//! LRU cache enforcing the engine-wide cap on simultaneously open file
//! descriptors (`MAX_OPEN_FILES`).

use std::collections::VecDeque;
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use crate::constants::{BLOCK_SIZE, MAX_OPEN_FILES};
use crate::error::Result;
use crate::types::FileId;

pub struct FileHandle {
    pub id: FileId,
    pub path: PathBuf,
    file: File,
    modified: bool,
}

impl FileHandle {
    pub fn create(id: FileId, path: impl AsRef<Path>, size_in_bytes: u64) -> Result<Self> {
        let file = OpenOptions::new().read(true).write(true).create(true).truncate(true).open(&path)?;
        file.set_len(size_in_bytes)?;
        Ok(Self { id, path: path.as_ref().to_path_buf(), file, modified: true })
    }

    pub fn open_existing(id: FileId, path: impl AsRef<Path>) -> Result<Self> {
        let file = OpenOptions::new().read(true).write(true).open(&path)?;
        Ok(Self { id, path: path.as_ref().to_path_buf(), file, modified: false })
    }

    pub fn read_block(&mut self, offset: u64, out: &mut [u8; BLOCK_SIZE]) -> Result<()> {
        self.file.seek(SeekFrom::Start(offset))?;
        self.file.read_exact(out)?;
        Ok(())
    }

    pub fn write_block(&mut self, offset: u64, data: &[u8; BLOCK_SIZE]) -> Result<()> {
        self.file.seek(SeekFrom::Start(offset))?;
        self.file.write_all(data)?;
        self.modified = true;
        Ok(())
    }

    pub fn write_at(&mut self, offset: u64, data: &[u8]) -> Result<()> {
        self.file.seek(SeekFrom::Start(offset))?;
        self.file.write_all(data)?;
        self.modified = true;
        Ok(())
    }

    pub fn read_at(&mut self, offset: u64, buf: &mut [u8]) -> Result<()> {
        self.file.seek(SeekFrom::Start(offset))?;
        self.file.read_exact(buf)?;
        Ok(())
    }

    pub fn sync(&mut self) -> Result<()> {
        if self.modified {
            self.file.sync_all()?;
            self.modified = false;
        }
        Ok(())
    }

    pub fn set_len(&mut self, len: u64) -> Result<()> {
        self.file.set_len(len)?;
        self.modified = true;
        Ok(())
    }

    pub fn len(&self) -> Result<u64> {
        Ok(self.file.metadata()?.len())
    }
}

/// LRU cache of open [`FileHandle`]s bounded by `MAX_OPEN_FILES`. Callers
/// fetch a handle by id; if it isn't resident, the least-recently-used
/// handle is fsync'd and closed to make room.
pub struct FileHandleCache {
    capacity: usize,
    order: VecDeque<FileId>,
    handles: std::collections::HashMap<FileId, FileHandle>,
}

impl FileHandleCache {
    pub fn new() -> Self {
        Self::with_capacity(MAX_OPEN_FILES)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self { capacity, order: VecDeque::new(), handles: std::collections::HashMap::new() }
    }

    fn touch(&mut self, id: FileId) {
        self.order.retain(|&x| x != id);
        self.order.push_back(id);
    }

    pub fn insert(&mut self, handle: FileHandle) -> Result<()> {
        let id = handle.id;
        if self.handles.len() >= self.capacity && !self.handles.contains_key(&id) {
            if let Some(evict_id) = self.order.pop_front() {
                if let Some(mut evicted) = self.handles.remove(&evict_id) {
                    evicted.sync()?;
                }
            }
        }
        self.handles.insert(id, handle);
        self.touch(id);
        Ok(())
    }

    pub fn get_mut(&mut self, id: FileId) -> Option<&mut FileHandle> {
        if self.handles.contains_key(&id) {
            self.touch(id);
        }
        self.handles.get_mut(&id)
    }

    pub fn contains(&self, id: FileId) -> bool {
        self.handles.contains_key(&id)
    }

    pub fn remove(&mut self, id: FileId) -> Option<FileHandle> {
        self.order.retain(|&x| x != id);
        self.handles.remove(&id)
    }

    pub fn sync_all(&mut self) -> Result<()> {
        for handle in self.handles.values_mut() {
            handle.sync()?;
        }
        Ok(())
    }
}

impl Default for FileHandleCache {
    fn default() -> Self {
        Self::new()
    }
}
