use crate::storage::reader::LogReader;
use crate::storage::retention::{RetentionPolicy, SealedSegment};
use crate::storage::segment::{segment_bases, Segment};
use crate::storage::{stamp_offsets, AppendLog};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

const DEFAULT_MAX_SEGMENT_BYTES: u64 = 1024 * 1024 * 16; // 16MB

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogOptions {
    pub max_segment_bytes: u64,
    pub retention: RetentionPolicy,
}

impl Default for LogOptions {
    fn default() -> Self {
        LogOptions {
            max_segment_bytes: DEFAULT_MAX_SEGMENT_BYTES,
            retention: RetentionPolicy::Disabled,
        }
    }
}

/// Append-only log split into size-bounded segments on disk.
pub struct CommitLog {
    log_dir: PathBuf,
    active_segment: Segment,
    segments: BTreeMap<i64, Segment>, // Sealed segments keyed by base offset
    options: LogOptions,
}

impl CommitLog {
    pub fn open<P: AsRef<Path>>(log_dir: P, options: LogOptions) -> io::Result<Self> {
        let log_dir = log_dir.as_ref();
        fs::create_dir_all(log_dir)?;

        let mut found_segments = BTreeMap::new();
        for base_offset in segment_bases(log_dir)? {
            let mut segment = Segment::new(log_dir, base_offset, options.max_segment_bytes)?;
            segment.load_or_initialize()?;
            found_segments.insert(base_offset, segment);
        }

        let active_segment = match found_segments.pop_last() {
            Some((_, last)) if !last.is_full() => last,
            Some((last_base, last)) => {
                let next_base = last.next_offset();
                found_segments.insert(last_base, last);
                let mut fresh = Segment::new(log_dir, next_base, options.max_segment_bytes)?;
                fresh.load_or_initialize()?;
                fresh
            }
            None => {
                let mut fresh = Segment::new(log_dir, 0, options.max_segment_bytes)?;
                fresh.load_or_initialize()?;
                fresh
            }
        };

        log::info!(
            "Opened commit log at {:?}: {} segment(s), next offset {}",
            log_dir,
            found_segments.len() + 1,
            active_segment.next_offset()
        );

        Ok(CommitLog {
            log_dir: log_dir.to_path_buf(),
            active_segment,
            segments: found_segments,
            options,
        })
    }

    /// Appends one or more framed records and returns the offset assigned to
    /// the first of them.
    pub fn append(&mut self, message_set: &[u8]) -> io::Result<i64> {
        let mut buf = message_set.to_vec();
        let starts = stamp_offsets(&mut buf, self.next_offset())?;

        if !self.active_segment.fits(buf.len() as u64) {
            self.roll_segment()?;
        }
        let first_offset = self.active_segment.append(&buf, &starts)?;
        log::debug!(
            "Appended {} record(s) at offset {} to segment {}",
            starts.len(),
            first_offset,
            self.active_segment.base_offset
        );
        Ok(first_offset)
    }

    fn roll_segment(&mut self) -> io::Result<()> {
        self.active_segment.flush_all()?;

        let next_base = self.active_segment.next_offset();
        let mut new_active = Segment::new(&self.log_dir, next_base, self.options.max_segment_bytes)?;
        new_active.load_or_initialize()?;

        let old_active = std::mem::replace(&mut self.active_segment, new_active);
        log::info!(
            "Rolled segment {} ({} bytes); new active segment {}",
            old_active.base_offset,
            old_active.size_bytes(),
            next_base
        );
        self.segments.insert(old_active.base_offset, old_active);

        self.enforce_retention()
    }

    fn enforce_retention(&mut self) -> io::Result<()> {
        if self.options.retention == RetentionPolicy::Disabled {
            return Ok(());
        }
        let mut sealed = Vec::with_capacity(self.segments.len());
        for segment in self.segments.values() {
            sealed.push(SealedSegment {
                size_bytes: segment.size_bytes(),
                last_modified: segment.last_modified()?,
            });
        }
        let expired = self.options.retention.expired_count(
            &sealed,
            self.active_segment.size_bytes(),
            SystemTime::now(),
        );
        for _ in 0..expired {
            if let Some((base, segment)) = self.segments.pop_first() {
                log::warn!(
                    "Retention {:?} deleting segment {} ({} records)",
                    self.options.retention,
                    base,
                    segment.record_count()
                );
                segment.remove()?;
            }
        }
        Ok(())
    }

    /// Opens a byte stream starting at the first record with offset >= `from_offset`.
    pub fn reader(&self, from_offset: i64) -> io::Result<LogReader> {
        let start = self
            .segments
            .values()
            .chain(std::iter::once(&self.active_segment))
            .find_map(|segment| {
                segment
                    .position_for(from_offset)
                    .map(|position| (segment.base_offset, position))
            });
        let (base_offset, position) = start.unwrap_or((
            self.active_segment.base_offset,
            self.active_segment.size_bytes(),
        ));
        log::debug!(
            "Reader for offset {} starts in segment {} at byte {}",
            from_offset,
            base_offset,
            position
        );
        LogReader::open(&self.log_dir, base_offset, position)
    }

    // Returns the next offset that will be assigned to a new record.
    pub fn next_offset(&self) -> i64 {
        self.active_segment.next_offset()
    }

    /// Offset of the oldest retained record.
    pub fn oldest_offset(&self) -> i64 {
        self.segments
            .values()
            .next()
            .unwrap_or(&self.active_segment)
            .base_offset
    }

    pub fn segment_count(&self) -> usize {
        self.segments.len() + 1
    }

    // Flushes all data (active segment and sealed segments) to disk.
    pub fn flush_all_data(&mut self) -> io::Result<()> {
        self.active_segment.flush_all()?;
        for segment in self.segments.values_mut() {
            segment.flush_all()?;
        }
        Ok(())
    }
}

impl AppendLog for CommitLog {
    type Reader = LogReader;

    fn append(&mut self, message_set: &[u8]) -> io::Result<i64> {
        CommitLog::append(self, message_set)
    }

    fn open_reader(&self, from_offset: i64) -> io::Result<LogReader> {
        self.reader(from_offset)
    }

    fn close(&mut self) -> io::Result<()> {
        self.flush_all_data()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::FixedClock;
    use crate::record::{self, Record, HEADER_LEN};
    use crate::storage::read_full;
    use std::io::Read;

    fn framed(key: &str) -> Vec<u8> {
        record::encode(key.as_bytes(), b"some value", &FixedClock(1))
    }

    fn read_all(reader: &mut impl Read) -> Vec<Record> {
        let mut records = Vec::new();
        let mut header = [0u8; HEADER_LEN];
        while read_full(reader, &mut header).unwrap() == HEADER_LEN {
            let mut buf = header.to_vec();
            buf.resize(HEADER_LEN + record::peek_size(&header) as usize, 0);
            reader.read_exact(&mut buf[HEADER_LEN..]).unwrap();
            records.push(Record::decode(&buf).unwrap());
        }
        records
    }

    fn small_segments() -> LogOptions {
        LogOptions {
            max_segment_bytes: 128,
            ..LogOptions::default()
        }
    }

    #[test]
    fn assigns_consecutive_offsets() {
        let dir = tempfile::tempdir().unwrap();
        let mut log = CommitLog::open(dir.path(), LogOptions::default()).unwrap();
        assert_eq!(log.append(&framed("a")).unwrap(), 0);
        assert_eq!(log.append(&framed("b")).unwrap(), 1);

        let mut batch = framed("c");
        batch.extend(framed("d"));
        assert_eq!(log.append(&batch).unwrap(), 2);
        assert_eq!(log.next_offset(), 4);

        let records = read_all(&mut log.reader(0).unwrap());
        let offsets: Vec<i64> = records.iter().map(|r| r.offset).collect();
        assert_eq!(offsets, vec![0, 1, 2, 3]);
        assert_eq!(records[3].key, b"d");
    }

    #[test]
    fn rejects_malformed_message_set() {
        let dir = tempfile::tempdir().unwrap();
        let mut log = CommitLog::open(dir.path(), LogOptions::default()).unwrap();
        let mut buf = framed("a");
        buf.truncate(buf.len() - 1);
        assert_eq!(
            log.append(&buf).unwrap_err().kind(),
            io::ErrorKind::InvalidInput
        );
        assert_eq!(log.append(&[]).unwrap_err().kind(), io::ErrorKind::InvalidInput);
        assert_eq!(log.next_offset(), 0);
    }

    #[test]
    fn rolls_segments_with_continuous_offsets() {
        let dir = tempfile::tempdir().unwrap();
        let mut log = CommitLog::open(dir.path(), small_segments()).unwrap();
        for i in 0..10 {
            log.append(&framed(&format!("key-{}", i))).unwrap();
        }
        assert!(log.segment_count() > 1);

        let records = read_all(&mut log.reader(0).unwrap());
        assert_eq!(records.len(), 10);
        for (i, record) in records.iter().enumerate() {
            assert_eq!(record.offset, i as i64);
            assert_eq!(record.key, format!("key-{}", i).into_bytes());
        }

        let tail = read_all(&mut log.reader(7).unwrap());
        assert_eq!(tail.first().map(|r| r.offset), Some(7));
        assert_eq!(tail.len(), 3);
    }

    #[test]
    fn reopen_resumes_after_existing_records() {
        let dir = tempfile::tempdir().unwrap();
        {
            let mut log = CommitLog::open(dir.path(), small_segments()).unwrap();
            for i in 0..5 {
                log.append(&framed(&format!("k{}", i))).unwrap();
            }
            log.flush_all_data().unwrap();
        }
        let mut log = CommitLog::open(dir.path(), small_segments()).unwrap();
        assert_eq!(log.next_offset(), 5);
        assert_eq!(log.append(&framed("k5")).unwrap(), 5);
        assert_eq!(read_all(&mut log.reader(0).unwrap()).len(), 6);
    }

    #[test]
    fn reader_at_the_end_streams_later_appends() {
        let dir = tempfile::tempdir().unwrap();
        let mut log = CommitLog::open(dir.path(), small_segments()).unwrap();
        log.append(&framed("early")).unwrap();

        let mut reader = log.reader(log.next_offset()).unwrap();
        assert!(read_all(&mut reader).is_empty());

        for i in 0..4 {
            log.append(&framed(&format!("late-{}", i))).unwrap();
        }
        let records = read_all(&mut reader);
        let offsets: Vec<i64> = records.iter().map(|r| r.offset).collect();
        assert_eq!(offsets, vec![1, 2, 3, 4]);
    }

    #[test]
    fn retention_drops_oldest_segments() {
        let dir = tempfile::tempdir().unwrap();
        let options = LogOptions {
            max_segment_bytes: 128,
            retention: RetentionPolicy::RetainMinSegments(2),
        };
        let mut log = CommitLog::open(dir.path(), options).unwrap();
        for i in 0..12 {
            log.append(&framed(&format!("key-{}", i))).unwrap();
        }
        assert_eq!(log.segment_count(), 2);
        assert_eq!(segment_bases(dir.path()).unwrap().len(), 2);

        let oldest = log.oldest_offset();
        assert!(oldest > 0);
        let records = read_all(&mut log.reader(0).unwrap());
        assert_eq!(records.first().map(|r| r.offset), Some(oldest));
        assert_eq!(records.last().map(|r| r.offset), Some(11));
    }
}
