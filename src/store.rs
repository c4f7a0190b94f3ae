//! Key/value access over an [`AppendLog`].
//!
//! `write` encodes a record and appends it; a [`StoreReader`] walks the log
//! from a starting offset and decodes one record per `read`.
//!
//! The store takes no locks: `write` needs `&mut self`, so concurrent
//! writers must be serialized by the caller. Each reader owns its own
//! cursor. Readers must not be used once the store they came from is closed.

use crate::clock::{Clock, SystemClock};
use crate::record::{self, Record, HEADER_LEN};
use crate::storage::{read_full, AppendLog, CommitLog, LogOptions};
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::io::Read;
use std::path::Path;
use std::sync::Arc;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreOptions {
    /// Forwarded untouched to the commit log.
    pub log: LogOptions,
    /// Reject records whose checksum does not match on read.
    pub verify_checksums: bool,
}

pub struct Store<L: AppendLog = CommitLog> {
    log: Option<L>,
    clock: Arc<dyn Clock>,
    verify_checksums: bool,
}

impl Store<CommitLog> {
    /// Opens or creates a store backed by a commit log at `path`.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::open_with_options(path, StoreOptions::default())
    }

    pub fn open_with_options<P: AsRef<Path>>(path: P, options: StoreOptions) -> Result<Self> {
        let log = CommitLog::open(path, options.log).map_err(Error::Open)?;
        Ok(Store::with_log(log).verify_checksums(options.verify_checksums))
    }
}

impl<L: AppendLog> Store<L> {
    pub fn with_log(log: L) -> Self {
        Store {
            log: Some(log),
            clock: Arc::new(SystemClock),
            verify_checksums: false,
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn verify_checksums(mut self, verify: bool) -> Self {
        self.verify_checksums = verify;
        self
    }

    /// Appends one record and returns the offset the log gave it.
    pub fn write(&mut self, key: &[u8], value: &[u8]) -> Result<i64> {
        let log = self.log.as_mut().ok_or(Error::Closed)?;
        record::check_lengths(key.len(), value.len())?;
        let encoded = record::encode(key, value, self.clock.as_ref());
        log.append(&encoded).map_err(Error::Append)
    }

    /// Reader positioned at the first record with offset >= `start_offset`.
    pub fn reader(&self, start_offset: i64) -> Result<StoreReader<L::Reader>> {
        let log = self.log.as_ref().ok_or(Error::Closed)?;
        let stream = log.open_reader(start_offset).map_err(Error::Open)?;
        Ok(StoreReader {
            stream,
            start_offset,
            verify_checksums: self.verify_checksums,
        })
    }

    pub fn is_closed(&self) -> bool {
        self.log.is_none()
    }

    /// Flushes and releases the log. Closing twice is a no-op.
    pub fn close(&mut self) -> Result<()> {
        match self.log.take() {
            Some(mut log) => log.close().map_err(Error::Io),
            None => Ok(()),
        }
    }
}

/// Sequential cursor over the records of a log.
pub struct StoreReader<R> {
    stream: R,
    start_offset: i64,
    verify_checksums: bool,
}

impl<R: Read> StoreReader<R> {
    /// Reads the next key/value pair. `Ok(None)` means the end of the log.
    pub fn read(&mut self) -> Result<Option<(Vec<u8>, Vec<u8>)>> {
        Ok(self.read_record()?.map(Record::into_key_value))
    }

    /// Like [`read`](Self::read) but keeps the offset, timestamp and checksum.
    pub fn read_record(&mut self) -> Result<Option<Record>> {
        loop {
            let record = match self.next_record()? {
                Some(record) => record,
                None => return Ok(None),
            };
            // Logs may start a stream slightly before the requested offset.
            if record.offset < self.start_offset {
                continue;
            }
            return if self.verify_checksums {
                record.verified().map(Some)
            } else {
                Ok(Some(record))
            };
        }
    }

    fn next_record(&mut self) -> Result<Option<Record>> {
        let mut header = [0u8; HEADER_LEN];
        let n = read_full(&mut self.stream, &mut header)?;
        if n == 0 {
            return Ok(None);
        }
        if n < HEADER_LEN {
            return Err(Error::Format(format!(
                "truncated record header: {} of {} bytes",
                n, HEADER_LEN
            )));
        }

        // The size field is untrusted: grow the buffer only as bytes arrive.
        let size = record::peek_size(&header) as usize;
        let mut buf = header.to_vec();
        let body_read = (&mut self.stream).take(size as u64).read_to_end(&mut buf)?;
        if body_read < size {
            return Err(Error::Format(format!(
                "size {} did not match {} bytes read",
                size, body_read
            )));
        }
        Record::decode(&buf).map(Some)
    }
}

impl<R: Read> Iterator for StoreReader<R> {
    type Item = Result<(Vec<u8>, Vec<u8>)>;

    fn next(&mut self) -> Option<Self::Item> {
        self.read().transpose()
    }
}
