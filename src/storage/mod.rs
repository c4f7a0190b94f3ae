pub mod index;
pub mod log;
pub mod memory;
pub mod reader;
pub mod retention;
pub mod segment;

pub use self::log::{CommitLog, LogOptions};
pub use memory::MemoryLog;
pub use reader::LogReader;
pub use retention::RetentionPolicy;

use crate::record::{self, HEADER_LEN};
use std::io::{self, Read};

/// The log a [`Store`](crate::Store) writes to and reads from.
///
/// Implementations assign offsets, persist bytes and hand out sequential
/// readers. Each `append` either stores every record of the message set or
/// none of them.
pub trait AppendLog {
    type Reader: Read + Send;

    /// Stores one or more framed records, rewriting their offset fields, and
    /// returns the offset given to the first one.
    fn append(&mut self, message_set: &[u8]) -> io::Result<i64>;

    /// Byte stream starting at the first record with offset >= `from_offset`.
    /// An offset past the end yields a stream that is currently empty.
    fn open_reader(&self, from_offset: i64) -> io::Result<Self::Reader>;

    fn close(&mut self) -> io::Result<()>;
}

/// Stamps consecutive offsets starting at `first_offset` into every record
/// of `message_set` and returns each record's start position.
pub(crate) fn stamp_offsets(message_set: &mut [u8], first_offset: i64) -> io::Result<Vec<usize>> {
    if message_set.is_empty() {
        return Err(io::Error::new(io::ErrorKind::InvalidInput, "empty message set"));
    }
    let mut starts = Vec::new();
    let mut position = 0;
    while position < message_set.len() {
        let header: [u8; HEADER_LEN] = message_set
            .get(position..position + HEADER_LEN)
            .and_then(|h| h.try_into().ok())
            .ok_or_else(|| {
                io::Error::new(
                    io::ErrorKind::InvalidInput,
                    format!("truncated record header at byte {}", position),
                )
            })?;
        let end = position + HEADER_LEN + record::peek_size(&header) as usize;
        if end > message_set.len() {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("record at byte {} runs past the message set", position),
            ));
        }
        record::set_offset(&mut message_set[position..], first_offset + starts.len() as i64);
        starts.push(position);
        position = end;
    }
    Ok(starts)
}

/// Reads until `buf` is full or the stream ends; returns the bytes read.
pub(crate) fn read_full<R: Read + ?Sized>(reader: &mut R, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::FixedClock;

    #[test]
    fn stamps_each_record_of_a_batch() {
        let mut batch = record::encode(b"a", b"1", &FixedClock(0));
        let second_start = batch.len();
        batch.extend(record::encode(b"b", b"2", &FixedClock(0)));

        let starts = stamp_offsets(&mut batch, 40).unwrap();
        assert_eq!(starts, vec![0, second_start]);
        assert_eq!(record::read_offset(&batch), 40);
        assert_eq!(record::read_offset(&batch[second_start..]), 41);
    }

    #[test]
    fn read_full_reports_short_streams() {
        let mut buf = [0u8; 8];
        assert_eq!(read_full(&mut &b"abc"[..], &mut buf).unwrap(), 3);
        assert_eq!(read_full(&mut &b""[..], &mut buf).unwrap(), 0);
        assert_eq!(read_full(&mut &[7u8; 20][..], &mut buf).unwrap(), 8);
    }
}
