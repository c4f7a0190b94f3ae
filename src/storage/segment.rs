use crate::record::{self, HEADER_LEN};
use crate::storage::index::{index_file_name, Index};
use crate::storage::read_full;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::time::SystemTime;

pub const SEGMENT_SUFFIX: &str = "log";

pub fn segment_file_name(base_offset: i64) -> String {
    format!("{:020}.{}", base_offset, SEGMENT_SUFFIX)
}

/// Base offsets of every segment data file in `dir`, ascending.
pub fn segment_bases<P: AsRef<Path>>(dir: P) -> io::Result<Vec<i64>> {
    let mut bases = Vec::new();
    for entry_res in fs::read_dir(dir)? {
        let entry_path = entry_res?.path();
        if entry_path.is_file() && entry_path.extension().map_or(false, |ext| ext == SEGMENT_SUFFIX) {
            if let Some(base) = entry_path
                .file_stem()
                .and_then(|name| name.to_str())
                .and_then(|name| name.parse::<i64>().ok())
            {
                bases.push(base);
            }
        }
    }
    bases.sort_unstable();
    Ok(bases)
}

// Represents a single segment file in the log.
pub struct Segment {
    pub base_offset: i64,
    next_relative_offset: u64,
    pub file_path: PathBuf,
    file: File,
    index: Index,
    max_segment_bytes: u64,
    current_data_bytes: u64,
}

impl Segment {
    // Creates a new segment or opens an existing one, with its index.
    pub fn new<P: AsRef<Path>>(dir: P, base_offset: i64, max_segment_bytes: u64) -> io::Result<Self> {
        let file_path = dir.as_ref().join(segment_file_name(base_offset));
        let data_file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .open(&file_path)?;

        let index = Index::new(dir.as_ref(), base_offset)?;

        Ok(Segment {
            base_offset,
            next_relative_offset: 0,
            file_path,
            file: data_file,
            index,
            max_segment_bytes,
            current_data_bytes: 0,
        })
    }

    // Loads the index and scans the data file to find the end of valid data.
    // A torn record at the tail is truncated; a stale index is rebuilt.
    pub fn load_or_initialize(&mut self) -> io::Result<()> {
        self.index.load()?;
        let file_len = self.file.metadata()?.len();

        let mut scan_start: u64 = 0;
        let mut next_relative_offset: u64 = 0;

        if let Some(last) = self.index.last_entry() {
            match self.record_end_at(last.position, file_len)? {
                Some(end) => {
                    scan_start = end;
                    next_relative_offset = last.relative_offset + 1;
                }
                None => {
                    log::warn!(
                        "Segment {}: {:?} points past the data in {:?}. Rebuilding index.",
                        self.base_offset,
                        self.index.file_path,
                        self.file_path
                    );
                    self.index.reset()?;
                }
            }
        }

        self.file.seek(SeekFrom::Start(scan_start))?;
        let mut position = scan_start;
        let mut header = [0u8; HEADER_LEN];
        loop {
            let n = read_full(&mut self.file, &mut header)?;
            if n == 0 {
                break;
            }
            if n < HEADER_LEN {
                log::warn!(
                    "Segment {}: partial record header at byte {}. Truncating {:?}.",
                    self.base_offset,
                    position,
                    self.file_path
                );
                self.file.set_len(position)?;
                break;
            }
            let end = position + HEADER_LEN as u64 + record::peek_size(&header) as u64;
            let expected_offset = self.base_offset + next_relative_offset as i64;
            if end > file_len || record::read_offset(&header) != expected_offset {
                log::warn!(
                    "Segment {}: torn record at byte {} (expected offset {}). Truncating {:?}.",
                    self.base_offset,
                    position,
                    expected_offset,
                    self.file_path
                );
                self.file.set_len(position)?;
                break;
            }
            if self.index.find_position(next_relative_offset) != Some(position) {
                self.index.add_entry(next_relative_offset, position)?;
            }
            self.file.seek(SeekFrom::Start(end))?;
            position = end;
            next_relative_offset += 1;
        }

        self.current_data_bytes = position;
        self.next_relative_offset = next_relative_offset;
        self.file.seek(SeekFrom::Start(self.current_data_bytes))?;
        self.index.sync_all()?;
        Ok(())
    }

    // End position of the record starting at `position`, if it lies fully within the file.
    fn record_end_at(&mut self, position: u64, file_len: u64) -> io::Result<Option<u64>> {
        self.file.seek(SeekFrom::Start(position))?;
        let mut header = [0u8; HEADER_LEN];
        if read_full(&mut self.file, &mut header)? < HEADER_LEN {
            return Ok(None);
        }
        let end = position + HEADER_LEN as u64 + record::peek_size(&header) as u64;
        Ok((end <= file_len).then_some(end))
    }

    /// Appends already-stamped records. `starts` holds each record's byte
    /// position within `message_set`. Returns the offset of the first record.
    ///
    /// On failure the data file and index are cut back to where they were,
    /// so no part of the message set stays visible.
    pub fn append(&mut self, message_set: &[u8], starts: &[usize]) -> io::Result<i64> {
        let first_offset = self.next_offset();
        let position_before_write = self.current_data_bytes;
        let entries_before = self.index.entry_count();

        if let Err(e) = self.write_message_set(message_set, starts, position_before_write) {
            self.roll_back(position_before_write, entries_before);
            return Err(e);
        }
        self.next_relative_offset += starts.len() as u64;
        self.current_data_bytes += message_set.len() as u64;

        Ok(first_offset)
    }

    fn write_message_set(&mut self, message_set: &[u8], starts: &[usize], position: u64) -> io::Result<()> {
        self.file.seek(SeekFrom::Start(position))?;
        self.file.write_all(message_set)?;
        for (i, start) in starts.iter().enumerate() {
            self.index
                .add_entry(self.next_relative_offset + i as u64, position + *start as u64)?;
        }
        Ok(())
    }

    fn roll_back(&mut self, position: u64, index_entries: usize) {
        if let Err(e) = self.file.set_len(position) {
            log::warn!(
                "Segment {}: could not cut {:?} back to {} bytes: {}",
                self.base_offset,
                self.file_path,
                position,
                e
            );
        }
        if let Err(e) = self.index.truncate(index_entries) {
            log::warn!(
                "Segment {}: could not cut {:?} back to {} entries: {}",
                self.base_offset,
                self.index.file_path,
                index_entries,
                e
            );
        }
    }

    /// Whether `len` more bytes fit. An empty segment accepts anything so
    /// oversized message sets still land somewhere.
    pub fn fits(&self, len: u64) -> bool {
        self.current_data_bytes == 0 || self.current_data_bytes + len <= self.max_segment_bytes
    }

    pub fn is_full(&self) -> bool {
        self.current_data_bytes >= self.max_segment_bytes
    }

    /// Byte position of the first record with offset >= `offset`, if this
    /// segment holds one.
    pub fn position_for(&self, offset: i64) -> Option<u64> {
        if offset <= self.base_offset {
            return (self.next_relative_offset > 0).then_some(0);
        }
        self.index
            .find_position_at_or_after((offset - self.base_offset) as u64)
    }

    // Offset the next appended record will receive.
    pub fn next_offset(&self) -> i64 {
        self.base_offset + self.next_relative_offset as i64
    }

    pub fn record_count(&self) -> u64 {
        self.next_relative_offset
    }

    pub fn size_bytes(&self) -> u64 {
        self.current_data_bytes
    }

    pub fn last_modified(&self) -> io::Result<SystemTime> {
        self.file.metadata()?.modified()
    }

    // Flushes both data file and index file to disk.
    pub fn flush_all(&mut self) -> io::Result<()> {
        self.file.flush()?;
        self.file.sync_all()?;
        self.index.sync_all()
    }

    /// Deletes the data and index files.
    pub fn remove(self) -> io::Result<()> {
        let dir = self
            .file_path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));
        let index_path = dir.join(index_file_name(self.base_offset));
        drop(self.file);
        drop(self.index);
        fs::remove_file(&self.file_path)?;
        match fs::remove_file(index_path) {
            Err(e) if e.kind() != io::ErrorKind::NotFound => Err(e),
            _ => Ok(()),
        }
    }
}

// Used by readers that stream a segment's bytes.
pub fn open_for_read<P: AsRef<Path>>(dir: P, base_offset: i64, position: u64) -> io::Result<File> {
    let mut file = File::open(dir.as_ref().join(segment_file_name(base_offset)))?;
    file.seek(SeekFrom::Start(position))?;
    Ok(file)
}
