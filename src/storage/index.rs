use serde::{Deserialize, Serialize};
use std::fs::{File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

/// Where one record of a segment starts in the segment's data file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexEntry {
    pub relative_offset: u64,
    pub position: u64,
}

// bincode's default fixed-width encoding of two u64s.
const ENTRY_SIZE: usize = 16;

/// Sidecar file with one [`IndexEntry`] per record, in offset order.
pub struct Index {
    pub(crate) file_path: PathBuf,
    file: File,
    entries: Vec<IndexEntry>,
}

pub fn index_file_name(base_offset: i64) -> String {
    format!("{:020}.index", base_offset)
}

fn invalid_data(e: bincode::Error) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, e)
}

impl Index {
    pub fn new<P: AsRef<Path>>(dir: P, segment_base_offset: i64) -> io::Result<Self> {
        let file_path = dir.as_ref().join(index_file_name(segment_base_offset));
        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .append(true)
            .open(&file_path)?;
        Ok(Index {
            file_path,
            file,
            entries: Vec::new(),
        })
    }

    /// Reads every whole entry from disk. A trailing partial entry is ignored.
    pub fn load(&mut self) -> io::Result<()> {
        self.entries.clear();
        self.file.seek(SeekFrom::Start(0))?;

        let mut raw = Vec::new();
        self.file.read_to_end(&mut raw)?;
        for chunk in raw.chunks_exact(ENTRY_SIZE) {
            self.entries.push(bincode::deserialize(chunk).map_err(invalid_data)?);
        }
        if raw.len() % ENTRY_SIZE != 0 {
            log::warn!(
                "{:?} ends with {} stray bytes; ignoring them",
                self.file_path,
                raw.len() % ENTRY_SIZE
            );
        }
        Ok(())
    }

    /// Drops every entry, on disk and in memory, so the index can be rebuilt.
    pub fn reset(&mut self) -> io::Result<()> {
        self.truncate(0)
    }

    /// Keeps only the first `len` entries.
    pub fn truncate(&mut self, len: usize) -> io::Result<()> {
        self.entries.truncate(len);
        self.file.set_len((len * ENTRY_SIZE) as u64)
    }

    pub fn add_entry(&mut self, relative_offset: u64, position: u64) -> io::Result<()> {
        let entry = IndexEntry {
            relative_offset,
            position,
        };
        let encoded = bincode::serialize(&entry).map_err(invalid_data)?;
        self.file.write_all(&encoded)?;
        self.entries.push(entry);
        Ok(())
    }

    pub fn find_position(&self, relative_offset: u64) -> Option<u64> {
        self.entries
            .binary_search_by_key(&relative_offset, |e| e.relative_offset)
            .ok()
            .map(|idx| self.entries[idx].position)
    }

    /// Position of the first record at or after `relative_offset`.
    pub fn find_position_at_or_after(&self, relative_offset: u64) -> Option<u64> {
        let idx = self
            .entries
            .partition_point(|e| e.relative_offset < relative_offset);
        self.entries.get(idx).map(|e| e.position)
    }

    pub fn last_entry(&self) -> Option<IndexEntry> {
        self.entries.last().copied()
    }

    pub fn entry_count(&self) -> usize {
        self.entries.len()
    }

    pub fn sync_all(&mut self) -> io::Result<()> {
        self.file.sync_all()
    }

    // Swaps in a handle that cannot be written, so appends fail.
    #[cfg(test)]
    pub(crate) fn make_read_only(&mut self) -> io::Result<()> {
        self.file = File::open(&self.file_path)?;
        Ok(())
    }
}
