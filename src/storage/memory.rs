use crate::storage::{stamp_offsets, AppendLog};
use parking_lot::RwLock;
use std::io::{self, Read};
use std::sync::Arc;

#[derive(Default)]
struct Shared {
    data: Vec<u8>,
    // (offset, byte position) of every record, ascending.
    positions: Vec<(i64, usize)>,
    closed: bool,
}

/// In-memory [`AppendLog`]. Clones share the same records.
#[derive(Clone, Default)]
pub struct MemoryLog {
    shared: Arc<RwLock<Shared>>,
}

impl MemoryLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len_bytes(&self) -> usize {
        self.shared.read().data.len()
    }

    pub fn next_offset(&self) -> i64 {
        self.shared.read().positions.len() as i64
    }
}

impl AppendLog for MemoryLog {
    type Reader = MemoryReader;

    fn append(&mut self, message_set: &[u8]) -> io::Result<i64> {
        let mut shared = self.shared.write();
        if shared.closed {
            return Err(io::Error::new(io::ErrorKind::Other, "memory log is closed"));
        }
        let first_offset = shared.positions.len() as i64;
        let mut buf = message_set.to_vec();
        let starts = stamp_offsets(&mut buf, first_offset)?;

        let base = shared.data.len();
        for (i, start) in starts.iter().enumerate() {
            shared.positions.push((first_offset + i as i64, base + start));
        }
        shared.data.extend_from_slice(&buf);
        Ok(first_offset)
    }

    fn open_reader(&self, from_offset: i64) -> io::Result<MemoryReader> {
        let shared = self.shared.read();
        if shared.closed {
            return Err(io::Error::new(io::ErrorKind::Other, "memory log is closed"));
        }
        let idx = shared.positions.partition_point(|&(offset, _)| offset < from_offset);
        let position = shared
            .positions
            .get(idx)
            .map_or(shared.data.len(), |&(_, position)| position);
        Ok(MemoryReader {
            shared: Arc::clone(&self.shared),
            position,
        })
    }

    fn close(&mut self) -> io::Result<()> {
        self.shared.write().closed = true;
        Ok(())
    }
}

pub struct MemoryReader {
    shared: Arc<RwLock<Shared>>,
    position: usize,
}

impl Read for MemoryReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let shared = self.shared.read();
        let available = &shared.data[self.position.min(shared.data.len())..];
        let n = available.len().min(buf.len());
        buf[..n].copy_from_slice(&available[..n]);
        self.position += n;
        Ok(n)
    }
}
