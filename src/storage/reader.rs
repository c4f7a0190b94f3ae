use crate::storage::segment::{open_for_read, segment_bases};
use std::fs::File;
use std::io::{self, Read};
use std::path::{Path, PathBuf};

/// Sequential byte stream over a commit log's segments.
///
/// Reaching the end of a segment moves on to the next newer one. At the end
/// of the newest segment `read` returns 0; calling it again later picks up
/// anything appended in the meantime.
pub struct LogReader {
    log_dir: PathBuf,
    base_offset: i64,
    file: File,
}

impl LogReader {
    pub fn open<P: AsRef<Path>>(log_dir: P, base_offset: i64, position: u64) -> io::Result<Self> {
        let file = open_for_read(log_dir.as_ref(), base_offset, position)?;
        Ok(LogReader {
            log_dir: log_dir.as_ref().to_path_buf(),
            base_offset,
            file,
        })
    }

    // Segment that follows the current one, if it exists yet.
    fn next_segment(&self) -> io::Result<Option<i64>> {
        Ok(segment_bases(&self.log_dir)?
            .into_iter()
            .find(|&base| base > self.base_offset))
    }
}

impl Read for LogReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        loop {
            let n = self.file.read(buf)?;
            if n > 0 {
                return Ok(n);
            }
            match self.next_segment()? {
                Some(base_offset) => {
                    self.file = open_for_read(&self.log_dir, base_offset, 0)?;
                    self.base_offset = base_offset;
                }
                None => return Ok(0),
            }
        }
    }
}
