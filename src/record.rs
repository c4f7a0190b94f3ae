//! Message set (version 1) record codec.
//!
//! On-disk layout, all integers big-endian:
//!
//! ```text
//! offset          i64   assigned by the log, 0 when encoded
//! size            u32   length of everything below
//! crc             u32   CRC-32/IEEE of format_version .. end of value
//! format_version  u8    always 1
//! attributes      u8    bits 0-2 compression, bit 3 timestamp type, 4-7 reserved
//! timestamp       i64   unix seconds
//! key_len         u32
//! key             key_len bytes
//! value_len       u32
//! value           value_len bytes
//! ```
//!
//! Key and value are stored with their length prefixes, so a record body can
//! be split without any outside knowledge. The prefixes are part of the
//! checksummed range. Because `size` is a u32, key and value together must
//! leave the body under 4 GiB; see [`check_lengths`].
//!
//! Decoding is structural only. An unexpected format version or a flipped
//! attribute bit is carried through as-is and shows up in [`Record::verify`].

use crate::clock::Clock;
use crate::{Error, Result};
use crc32fast::Hasher;

pub const OFFSET_LEN: usize = 8;
pub const SIZE_LEN: usize = 4;
/// Offset plus size, the prefix read before every body.
pub const HEADER_LEN: usize = OFFSET_LEN + SIZE_LEN;

const CRC_LEN: usize = 4;
const VERSION_LEN: usize = 1;
const ATTRIBUTES_LEN: usize = 1;
const TIMESTAMP_LEN: usize = 8;
const LENGTH_PREFIX_LEN: usize = 4;

const CRC_START: usize = HEADER_LEN;
const VERSION_START: usize = CRC_START + CRC_LEN;
const ATTRIBUTES_START: usize = VERSION_START + VERSION_LEN;
const TIMESTAMP_START: usize = ATTRIBUTES_START + ATTRIBUTES_LEN;
/// Bytes before the key length prefix (26).
pub const FIXED_PREFIX_LEN: usize = TIMESTAMP_START + TIMESTAMP_LEN;

/// Smallest valid body: fixed fields plus two empty length-prefixed fields.
pub const MIN_BODY_LEN: usize =
    CRC_LEN + VERSION_LEN + ATTRIBUTES_LEN + TIMESTAMP_LEN + 2 * LENGTH_PREFIX_LEN;

pub const FORMAT_VERSION: u8 = 1;

/// Compression codec named by attribute bits 0-2. Only `None` is ever written.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Compression {
    None = 0,
    Gzip = 1,
    Snappy = 2,
    Lz4 = 3,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimestampType {
    CreateTime,
    LogAppendTime,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Attributes(u8);

impl Attributes {
    const COMPRESSION_MASK: u8 = 0b0000_0111;
    const TIMESTAMP_TYPE_BIT: u8 = 0b0000_1000;

    /// What the encoder writes: no compression, log-append time.
    pub const APPEND_TIME: Attributes = Attributes(Self::TIMESTAMP_TYPE_BIT);

    pub fn from_bits(bits: u8) -> Self {
        Attributes(bits)
    }

    pub fn bits(self) -> u8 {
        self.0
    }

    pub fn compression(self) -> Result<Compression> {
        match self.0 & Self::COMPRESSION_MASK {
            0 => Ok(Compression::None),
            1 => Ok(Compression::Gzip),
            2 => Ok(Compression::Snappy),
            3 => Ok(Compression::Lz4),
            other => Err(Error::Format(format!("unknown compression codec {}", other))),
        }
    }

    pub fn timestamp_type(self) -> TimestampType {
        if self.0 & Self::TIMESTAMP_TYPE_BIT != 0 {
            TimestampType::LogAppendTime
        } else {
            TimestampType::CreateTime
        }
    }
}

/// One decoded (or about to be encoded) record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    pub offset: i64,
    pub crc: u32,
    pub format_version: u8,
    pub attributes: Attributes,
    pub timestamp: i64,
    pub key: Vec<u8>,
    pub value: Vec<u8>,
}

impl Record {
    /// Builds a fresh record stamped with the clock's current time.
    ///
    /// # Panics
    ///
    /// If the body would not fit the u32 size field. Callers taking
    /// untrusted input run [`check_lengths`] first.
    pub fn new(key: &[u8], value: &[u8], clock: &dyn Clock) -> Self {
        assert!(
            check_lengths(key.len(), value.len()).is_ok(),
            "record body of {} key and {} value bytes exceeds u32::MAX",
            key.len(),
            value.len()
        );
        let mut record = Record {
            offset: 0,
            crc: 0,
            format_version: FORMAT_VERSION,
            attributes: Attributes::APPEND_TIME,
            timestamp: clock.now_unix_secs(),
            key: key.to_vec(),
            value: value.to_vec(),
        };
        record.crc = record.compute_crc();
        record
    }

    pub fn body_len(&self) -> usize {
        MIN_BODY_LEN + self.key.len() + self.value.len()
    }

    /// Serializes the record. The offset field is always written as 0; the
    /// log stamps the real one on append.
    pub fn encode(&self) -> Vec<u8> {
        let body_len = self.body_len();
        let mut buf = Vec::with_capacity(HEADER_LEN + body_len);
        buf.extend_from_slice(&0i64.to_be_bytes());
        buf.extend_from_slice(&(body_len as u32).to_be_bytes());
        buf.extend_from_slice(&self.crc.to_be_bytes());
        self.write_checksummed(&mut buf);
        buf
    }

    /// Parses exactly one record. The checksum is not checked here; see
    /// [`Record::verify`].
    pub fn decode(buf: &[u8]) -> Result<Self> {
        if buf.len() < HEADER_LEN {
            return Err(Error::Format(format!(
                "record header needs {} bytes, got {}",
                HEADER_LEN,
                buf.len()
            )));
        }
        let offset = read_i64(buf, 0);
        let size = read_u32(buf, OFFSET_LEN) as usize;
        if buf.len() != HEADER_LEN + size {
            return Err(Error::Format(format!(
                "record size field says {} body bytes, buffer holds {}",
                size,
                buf.len() - HEADER_LEN
            )));
        }
        if size < MIN_BODY_LEN {
            return Err(Error::Format(format!(
                "record body of {} bytes is shorter than the minimum {}",
                size, MIN_BODY_LEN
            )));
        }

        let crc = read_u32(buf, CRC_START);
        let format_version = buf[VERSION_START];
        let attributes = Attributes::from_bits(buf[ATTRIBUTES_START]);
        let timestamp = read_i64(buf, TIMESTAMP_START);

        let (key, rest) = split_length_prefixed(&buf[FIXED_PREFIX_LEN..], "key")?;
        let (value, rest) = split_length_prefixed(rest, "value")?;
        if !rest.is_empty() {
            return Err(Error::Format(format!(
                "{} trailing bytes after value",
                rest.len()
            )));
        }

        Ok(Record {
            offset,
            crc,
            format_version,
            attributes,
            timestamp,
            key: key.to_vec(),
            value: value.to_vec(),
        })
    }

    /// Recomputes the checksum over the recovered fields.
    pub fn verify(&self) -> bool {
        self.compute_crc() == self.crc
    }

    pub fn verified(self) -> Result<Self> {
        let computed = self.compute_crc();
        if computed != self.crc {
            return Err(Error::Checksum {
                stored: self.crc,
                computed,
            });
        }
        Ok(self)
    }

    pub fn into_key_value(self) -> (Vec<u8>, Vec<u8>) {
        (self.key, self.value)
    }

    fn compute_crc(&self) -> u32 {
        let mut data = Vec::with_capacity(self.body_len() - CRC_LEN);
        self.write_checksummed(&mut data);
        let mut hasher = Hasher::new();
        hasher.update(&data);
        hasher.finalize()
    }

    // format_version through the end of the value.
    fn write_checksummed(&self, buf: &mut Vec<u8>) {
        buf.push(self.format_version);
        buf.push(self.attributes.bits());
        buf.extend_from_slice(&self.timestamp.to_be_bytes());
        buf.extend_from_slice(&(self.key.len() as u32).to_be_bytes());
        buf.extend_from_slice(&self.key);
        buf.extend_from_slice(&(self.value.len() as u32).to_be_bytes());
        buf.extend_from_slice(&self.value);
    }
}

/// Fails when a key and value of these lengths cannot be framed, because the
/// body length would overflow the u32 size field.
pub fn check_lengths(key_len: usize, value_len: usize) -> Result<()> {
    let body_len = (MIN_BODY_LEN as u64)
        .saturating_add(key_len as u64)
        .saturating_add(value_len as u64);
    if body_len > u32::MAX as u64 {
        return Err(Error::Format(format!(
            "record body of {} bytes exceeds the {} byte limit",
            body_len,
            u32::MAX
        )));
    }
    Ok(())
}

/// Encodes a key/value pair into a complete framed record.
pub fn encode(key: &[u8], value: &[u8], clock: &dyn Clock) -> Vec<u8> {
    Record::new(key, value, clock).encode()
}

/// Decodes one framed record into its key and value.
pub fn decode(buf: &[u8]) -> Result<(Vec<u8>, Vec<u8>)> {
    Record::decode(buf).map(Record::into_key_value)
}

/// Body length announced by a record header.
pub fn peek_size(header: &[u8; HEADER_LEN]) -> u32 {
    read_u32(header, OFFSET_LEN)
}

/// Overwrites the offset field of the record starting at `buf[0]`.
pub fn set_offset(buf: &mut [u8], offset: i64) {
    buf[..OFFSET_LEN].copy_from_slice(&offset.to_be_bytes());
}

pub fn read_offset(buf: &[u8]) -> i64 {
    read_i64(buf, 0)
}

fn split_length_prefixed<'a>(buf: &'a [u8], field: &str) -> Result<(&'a [u8], &'a [u8])> {
    if buf.len() < LENGTH_PREFIX_LEN {
        return Err(Error::Format(format!("missing {} length prefix", field)));
    }
    let len = read_u32(buf, 0) as usize;
    let rest = &buf[LENGTH_PREFIX_LEN..];
    if rest.len() < len {
        return Err(Error::Format(format!(
            "{} length {} exceeds the {} bytes left in the record",
            field,
            len,
            rest.len()
        )));
    }
    Ok(rest.split_at(len))
}

fn read_u32(buf: &[u8], at: usize) -> u32 {
    let mut bytes = [0u8; 4];
    bytes.copy_from_slice(&buf[at..at + 4]);
    u32::from_be_bytes(bytes)
}

fn read_i64(buf: &[u8], at: usize) -> i64 {
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&buf[at..at + 8]);
    i64::from_be_bytes(bytes)
}
