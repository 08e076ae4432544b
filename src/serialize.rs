//! Byte-oriented, versioned save/load streams used by snapshot persistence.
//!
//! Layout: `format_version: u32 LE`, body, `crc32(format_version ++ body): u32 LE`.

use crate::hydra::version::Version;
use crc32fast::Hasher as Crc32Hasher;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use thiserror::Error;

pub const SNAPSHOT_FORMAT_VERSION: u32 = 1;

const HEADER_LEN: usize = 4;
const TRAILER_LEN: usize = 4;

pub fn unix_micros(time: SystemTime) -> u64 {
    time.duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_micros() as u64)
        .unwrap_or(0)
}

pub fn from_unix_micros(micros: u64) -> SystemTime {
    UNIX_EPOCH + Duration::from_micros(micros)
}

/// Types with a stable binary form inside snapshots.
pub trait Persistent: Sized {
    fn save(&self, context: &mut SaveContext);
    fn load(context: &mut LoadContext<'_>) -> Result<Self, SerializeError>;
}

#[derive(Debug, Clone)]
pub struct SaveContext {
    buffer: Vec<u8>,
}

impl Default for SaveContext {
    fn default() -> Self {
        Self::new()
    }
}

impl SaveContext {
    pub fn new() -> Self {
        let mut buffer = Vec::with_capacity(256);
        buffer.extend_from_slice(&SNAPSHOT_FORMAT_VERSION.to_le_bytes());
        Self { buffer }
    }

    pub fn write_u8(&mut self, value: u8) {
        self.buffer.push(value);
    }

    pub fn write_bool(&mut self, value: bool) {
        self.write_u8(value as u8);
    }

    pub fn write_u32(&mut self, value: u32) {
        self.buffer.extend_from_slice(&value.to_le_bytes());
    }

    pub fn write_i32(&mut self, value: i32) {
        self.buffer.extend_from_slice(&value.to_le_bytes());
    }

    pub fn write_u64(&mut self, value: u64) {
        self.buffer.extend_from_slice(&value.to_le_bytes());
    }

    pub fn write_i64(&mut self, value: i64) {
        self.buffer.extend_from_slice(&value.to_le_bytes());
    }

    pub fn write_f64(&mut self, value: f64) {
        self.buffer.extend_from_slice(&value.to_le_bytes());
    }

    pub fn write_size(&mut self, size: usize) {
        self.write_u32(size as u32);
    }

    pub fn write_bytes(&mut self, bytes: &[u8]) {
        self.write_size(bytes.len());
        self.buffer.extend_from_slice(bytes);
    }

    pub fn write_str(&mut self, value: &str) {
        self.write_bytes(value.as_bytes());
    }

    pub fn write_time(&mut self, time: SystemTime) {
        self.write_u64(unix_micros(time));
    }

    pub fn write<T: Persistent>(&mut self, value: &T) {
        value.save(self);
    }

    pub fn len(&self) -> usize {
        self.buffer.len() - HEADER_LEN
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Seals the stream with its checksum trailer.
    pub fn finish(mut self) -> Vec<u8> {
        let mut hasher = Crc32Hasher::new();
        hasher.update(&self.buffer);
        let crc = hasher.finalize();
        self.buffer.extend_from_slice(&crc.to_le_bytes());
        self.buffer
    }
}

#[derive(Debug)]
pub struct LoadContext<'a> {
    body: &'a [u8],
    cursor: usize,
    format_version: u32,
}

impl<'a> LoadContext<'a> {
    pub fn new(bytes: &'a [u8]) -> Result<Self, SerializeError> {
        if bytes.len() < HEADER_LEN + TRAILER_LEN {
            return Err(SerializeError::Truncated {
                needed: HEADER_LEN + TRAILER_LEN,
                remaining: bytes.len(),
            });
        }
        let (payload, trailer) = bytes.split_at(bytes.len() - TRAILER_LEN);
        let expected = u32::from_le_bytes(
            trailer
                .try_into()
                .map_err(|_| SerializeError::Corrupt("checksum trailer"))?,
        );
        let mut hasher = Crc32Hasher::new();
        hasher.update(payload);
        let actual = hasher.finalize();
        if expected != actual {
            return Err(SerializeError::ChecksumMismatch { expected, actual });
        }
        let format_version = u32::from_le_bytes(
            payload[..HEADER_LEN]
                .try_into()
                .map_err(|_| SerializeError::Corrupt("format version"))?,
        );
        if format_version == 0 || format_version > SNAPSHOT_FORMAT_VERSION {
            return Err(SerializeError::UnsupportedFormatVersion(format_version));
        }
        Ok(Self {
            body: &payload[HEADER_LEN..],
            cursor: 0,
            format_version,
        })
    }

    pub fn format_version(&self) -> u32 {
        self.format_version
    }

    pub fn remaining(&self) -> usize {
        self.body.len() - self.cursor
    }

    pub fn is_exhausted(&self) -> bool {
        self.remaining() == 0
    }

    fn take(&mut self, len: usize) -> Result<&'a [u8], SerializeError> {
        if self.remaining() < len {
            return Err(SerializeError::Truncated {
                needed: len,
                remaining: self.remaining(),
            });
        }
        let slice = &self.body[self.cursor..self.cursor + len];
        self.cursor += len;
        Ok(slice)
    }

    fn take_array<const N: usize>(&mut self) -> Result<[u8; N], SerializeError> {
        let mut array = [0u8; N];
        array.copy_from_slice(self.take(N)?);
        Ok(array)
    }

    pub fn read_u8(&mut self) -> Result<u8, SerializeError> {
        Ok(self.take(1)?[0])
    }

    pub fn read_bool(&mut self) -> Result<bool, SerializeError> {
        match self.read_u8()? {
            0 => Ok(false),
            1 => Ok(true),
            tag => Err(SerializeError::InvalidTag { what: "bool", tag }),
        }
    }

    pub fn read_u32(&mut self) -> Result<u32, SerializeError> {
        Ok(u32::from_le_bytes(self.take_array()?))
    }

    pub fn read_i32(&mut self) -> Result<i32, SerializeError> {
        Ok(i32::from_le_bytes(self.take_array()?))
    }

    pub fn read_u64(&mut self) -> Result<u64, SerializeError> {
        Ok(u64::from_le_bytes(self.take_array()?))
    }

    pub fn read_i64(&mut self) -> Result<i64, SerializeError> {
        Ok(i64::from_le_bytes(self.take_array()?))
    }

    pub fn read_f64(&mut self) -> Result<f64, SerializeError> {
        Ok(f64::from_le_bytes(self.take_array()?))
    }

    pub fn read_size(&mut self) -> Result<usize, SerializeError> {
        Ok(self.read_u32()? as usize)
    }

    pub fn read_bytes(&mut self) -> Result<&'a [u8], SerializeError> {
        let len = self.read_size()?;
        self.take(len)
    }

    pub fn read_string(&mut self) -> Result<String, SerializeError> {
        let bytes = self.read_bytes()?;
        String::from_utf8(bytes.to_vec()).map_err(|_| SerializeError::Corrupt("utf-8 string"))
    }

    pub fn read_time(&mut self) -> Result<SystemTime, SerializeError> {
        Ok(from_unix_micros(self.read_u64()?))
    }

    pub fn read<T: Persistent>(&mut self) -> Result<T, SerializeError> {
        T::load(self)
    }
}

impl Persistent for Version {
    fn save(&self, context: &mut SaveContext) {
        context.write_u64(self.to_revision());
    }

    fn load(context: &mut LoadContext<'_>) -> Result<Self, SerializeError> {
        Ok(Version::from_revision(context.read_u64()?))
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SerializeError {
    #[error("stream truncated: needed {needed} bytes, {remaining} remaining")]
    Truncated { needed: usize, remaining: usize },
    #[error("checksum mismatch: expected {expected:#010x}, computed {actual:#010x}")]
    ChecksumMismatch { expected: u32, actual: u32 },
    #[error("unsupported snapshot format version {0}")]
    UnsupportedFormatVersion(u32),
    #[error("invalid {what} tag {tag}")]
    InvalidTag { what: &'static str, tag: u8 },
    #[error("corrupt {0}")]
    Corrupt(&'static str),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn primitives_survive_a_stream() {
        let now = from_unix_micros(1_700_000_000_123_456);
        let mut save = SaveContext::new();
        save.write_u8(7);
        save.write_bool(true);
        save.write_i32(-5);
        save.write_u64(u64::MAX);
        save.write_str("partition");
        save.write_time(now);
        save.write(&Version::new(4, 2));
        let bytes = save.finish();

        let mut load = LoadContext::new(&bytes).unwrap();
        assert_eq!(load.format_version(), SNAPSHOT_FORMAT_VERSION);
        assert_eq!(load.read_u8().unwrap(), 7);
        assert!(load.read_bool().unwrap());
        assert_eq!(load.read_i32().unwrap(), -5);
        assert_eq!(load.read_u64().unwrap(), u64::MAX);
        assert_eq!(load.read_string().unwrap(), "partition");
        assert_eq!(load.read_time().unwrap(), now);
        assert_eq!(load.read::<Version>().unwrap(), Version::new(4, 2));
        assert!(load.is_exhausted());
    }

    #[test]
    fn corruption_is_detected() {
        let mut save = SaveContext::new();
        save.write_u64(42);
        let mut bytes = save.finish();
        bytes[5] ^= 0xff;
        assert!(matches!(
            LoadContext::new(&bytes),
            Err(SerializeError::ChecksumMismatch { .. })
        ));
    }

    #[test]
    fn reading_past_the_end_is_an_error() {
        let mut save = SaveContext::new();
        save.write_u8(1);
        let bytes = save.finish();
        let mut load = LoadContext::new(&bytes).unwrap();
        load.read_u8().unwrap();
        assert_eq!(
            load.read_u32(),
            Err(SerializeError::Truncated {
                needed: 4,
                remaining: 0
            })
        );
        assert!(LoadContext::new(&[1, 2]).is_err());
    }
}
