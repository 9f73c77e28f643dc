//! Fixed-offset file access used by column, index, dictionary and log files.
//!
//! Every column-like file starts with a 32-byte header:
//!
//! ```text
//! ┌──────────────────────────────────────────────┐
//! │ 0..8    append offset (i64, LE)              │
//! │ 8..16   key block offset (index files)       │
//! │ 16..24  key block size (index files)         │
//! │ 24      key block created flag               │
//! │ 25..32  reserved                             │
//! ├──────────────────────────────────────────────┤
//! │ data region, addressed by logical offset     │
//! └──────────────────────────────────────────────┘
//! ```
//!
//! The transaction log uses the raw accessors only and keeps its own layout.

pub mod mapped;

pub use mapped::{MappedFile, MappedStorageProvider};

use crate::error::{JournalError, Result};
use std::path::Path;

/// Size of the column file header.
pub const HEADER_SIZE: u64 = 32;

/// Header slot holding the durable append offset.
pub const APPEND_OFFSET_POS: u64 = 0;

/// Header slot holding the key block offset of an index file.
pub const KEY_BLOCK_OFFSET_POS: u64 = 8;

/// Header slot holding the key block size of an index file.
pub const KEY_BLOCK_SIZE_POS: u64 = 16;

/// Header slot holding the key block created flag of an index file.
pub const KEY_BLOCK_CREATED_POS: u64 = 24;

/// Translates a logical data offset into a file position.
#[inline]
pub fn data_position(offset: u64) -> u64 {
    HEADER_SIZE + offset
}

/// Random access to a growable file.
///
/// Implementations provide raw byte access; the typed helpers are built on top.
pub trait ColumnStorage: Send + Sync {
    /// Path of the backing file.
    fn path(&self) -> &Path;

    /// Current logical length in bytes.
    fn len(&self) -> u64;

    /// Returns true if the file holds no bytes.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Grows the file so that at least `len` bytes are addressable.
    fn ensure_len(&mut self, len: u64) -> Result<()>;

    /// Copies `buf.len()` bytes starting at `position` into `buf`.
    fn read_at(&self, position: u64, buf: &mut [u8]) -> Result<()>;

    /// Writes `buf` at `position`, growing the file when needed.
    fn write_at(&mut self, position: u64, buf: &[u8]) -> Result<()>;

    /// Makes previous writes durable.
    fn flush(&mut self) -> Result<()>;

    /// Picks up growth made through another handle to the same file.
    fn refresh(&mut self) -> Result<()> {
        Ok(())
    }

    /// Reads one byte.
    fn read_u8(&self, position: u64) -> Result<u8> {
        let mut buf = [0u8; 1];
        self.read_at(position, &mut buf)?;
        Ok(buf[0])
    }

    /// Reads a bool stored as one byte.
    fn read_bool(&self, position: u64) -> Result<bool> {
        Ok(self.read_u8(position)? != 0)
    }

    /// Reads a little-endian i16.
    fn read_i16(&self, position: u64) -> Result<i16> {
        let mut buf = [0u8; 2];
        self.read_at(position, &mut buf)?;
        Ok(i16::from_le_bytes(buf))
    }

    /// Reads a little-endian i32.
    fn read_i32(&self, position: u64) -> Result<i32> {
        let mut buf = [0u8; 4];
        self.read_at(position, &mut buf)?;
        Ok(i32::from_le_bytes(buf))
    }

    /// Reads a little-endian i64.
    fn read_i64(&self, position: u64) -> Result<i64> {
        let mut buf = [0u8; 8];
        self.read_at(position, &mut buf)?;
        Ok(i64::from_le_bytes(buf))
    }

    /// Reads a little-endian f64.
    fn read_f64(&self, position: u64) -> Result<f64> {
        let mut buf = [0u8; 8];
        self.read_at(position, &mut buf)?;
        Ok(f64::from_le_bytes(buf))
    }

    /// Writes one byte.
    fn write_u8(&mut self, position: u64, value: u8) -> Result<()> {
        self.write_at(position, &[value])
    }

    /// Writes a bool as one byte.
    fn write_bool(&mut self, position: u64, value: bool) -> Result<()> {
        self.write_u8(position, value as u8)
    }

    /// Writes a little-endian i16.
    fn write_i16(&mut self, position: u64, value: i16) -> Result<()> {
        self.write_at(position, &value.to_le_bytes())
    }

    /// Writes a little-endian i32.
    fn write_i32(&mut self, position: u64, value: i32) -> Result<()> {
        self.write_at(position, &value.to_le_bytes())
    }

    /// Writes a little-endian i64.
    fn write_i64(&mut self, position: u64, value: i64) -> Result<()> {
        self.write_at(position, &value.to_le_bytes())
    }

    /// Writes a little-endian f64.
    fn write_f64(&mut self, position: u64, value: f64) -> Result<()> {
        self.write_at(position, &value.to_le_bytes())
    }

    /// Returns the durable append offset stored in the header.
    ///
    /// A file shorter than the header reports offset 0.
    fn append_offset(&self) -> Result<u64> {
        if self.len() < HEADER_SIZE {
            return Ok(0);
        }
        let offset = self.read_i64(APPEND_OFFSET_POS)?;
        if offset < 0 {
            return Err(JournalError::corrupt_file(
                self.path(),
                format!("negative append offset {offset}"),
            ));
        }
        Ok(offset as u64)
    }

    /// Stores the durable append offset in the header.
    fn set_append_offset(&mut self, offset: u64) -> Result<()> {
        self.ensure_len(HEADER_SIZE)?;
        self.write_i64(APPEND_OFFSET_POS, offset as i64)
    }
}

/// Opens storage for a path.
///
/// Partition code never maps files directly, which lets callers substitute
/// their own implementation.
pub trait StorageProvider: Send + Sync {
    /// Opens (creating if needed) the file at `path`.
    fn open(&self, path: &Path) -> Result<Box<dyn ColumnStorage>>;
}
