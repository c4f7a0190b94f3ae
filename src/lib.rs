//! Key/value records framed as version 1 message sets on an append-only log.
//!
//! [`record`] is the binary codec, [`store`] turns `write`/`read` calls into
//! log appends and sequential reads, and [`storage`] holds the log itself.

pub mod clock;
pub mod record;
pub mod storage;
pub mod store;

pub use clock::{Clock, FixedClock, SystemClock};
pub use record::Record;
pub use store::{Store, StoreOptions, StoreReader};

use std::io;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Malformed or truncated record bytes.
    #[error("Format error: {0}")]
    Format(String),
    /// Only raised when checksum verification is requested.
    #[error("Checksum mismatch: stored {stored:#010x}, computed {computed:#010x}")]
    Checksum { stored: u32, computed: u32 },
    #[error("Failed to open log: {0}")]
    Open(#[source] io::Error),
    #[error("Append failed: {0}")]
    Append(#[source] io::Error),
    #[error("Store is closed")]
    Closed,
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
