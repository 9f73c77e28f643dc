//! Binary encoding of transaction log records.
//!
//! ```text
//! ┌────────────────────────────────────────────────┐
//! │ size: u32           total record size          │
//! │ prev_tx_address: u64                           │
//! │ command: u8                                    │
//! │ timestamp: i64      wall clock (ns)            │
//! │ journal_max_row_id: u64                        │
//! │ last_partition_timestamp: i64                  │
//! │ lag_size: i64                                  │
//! │ lag_name: u16 len + UTF-8 (≤ 64 bytes)         │
//! │ symbol_table_sizes: u16 count + i32 × n        │
//! │ symbol_table_index_pointers: u16 + i64 × n     │
//! │ index_pointers: u16 + i64 × n                  │
//! │ lag_index_pointers: u16 + i64 × n              │
//! └────────────────────────────────────────────────┘
//! ```
//!
//! All integers are little-endian.

use crate::error::{JournalError, Result};
use crate::row_id::RowId;
use crate::Timestamp;

/// Longest lag name accepted by the encoder.
pub const MAX_LAG_NAME_LEN: usize = 64;

/// Size of the fixed part of a record.
pub const FIXED_SIZE: usize = 4 + 8 + 1 + 8 + 8 + 8 + 8;

/// Kind of transaction a record describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(u8)]
pub enum TxCommand {
    /// Regular append commit.
    #[default]
    Normal = 0,
    /// Commit forced through regardless of pending lag.
    Force = 1,
}

impl TxCommand {
    /// Creates a TxCommand from its byte value.
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(Self::Normal),
            1 => Some(Self::Force),
            _ => None,
        }
    }
}

/// One durable transaction log record.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct TxRec {
    /// Address of the record this one supersedes (0 for the first record).
    pub prev_tx_address: u64,
    /// Transaction kind.
    pub command: TxCommand,
    /// Wall-clock time of the commit.
    pub timestamp: Timestamp,
    /// Row id one past the last row of the last partition.
    pub journal_max_row_id: RowId,
    /// Timestamp of the last appended row.
    pub last_partition_timestamp: Timestamp,
    /// Row count of the legacy lag buffer.
    pub lag_size: i64,
    /// Name of the legacy lag buffer, empty when absent.
    pub lag_name: String,
    /// Symbol count per dictionary column.
    pub symbol_table_sizes: Vec<i32>,
    /// Dictionary append offset per dictionary column.
    pub symbol_table_index_pointers: Vec<i64>,
    /// Index pointers of the last partition.
    pub index_pointers: Vec<i64>,
    /// Index pointers of the legacy lag buffer.
    pub lag_index_pointers: Vec<i64>,
}

impl TxRec {
    /// Returns the encoded size of the record in bytes.
    pub fn encoded_len(&self) -> usize {
        FIXED_SIZE
            + 2
            + self.lag_name.len()
            + 2
            + self.symbol_table_sizes.len() * 4
            + 2
            + self.symbol_table_index_pointers.len() * 8
            + 2
            + self.index_pointers.len() * 8
            + 2
            + self.lag_index_pointers.len() * 8
    }

    /// Serializes the record.
    ///
    /// # Errors
    ///
    /// Returns an error if the lag name or any array exceeds its size limit.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        if self.lag_name.len() > MAX_LAG_NAME_LEN {
            return Err(JournalError::CorruptTxRecord(format!(
                "lag name is {} bytes, limit is {}",
                self.lag_name.len(),
                MAX_LAG_NAME_LEN
            )));
        }
        let size = self.encoded_len();
        let mut bytes = Vec::with_capacity(size);
        bytes.extend_from_slice(&(size as u32).to_le_bytes());
        bytes.extend_from_slice(&self.prev_tx_address.to_le_bytes());
        bytes.push(self.command as u8);
        bytes.extend_from_slice(&self.timestamp.to_le_bytes());
        bytes.extend_from_slice(&self.journal_max_row_id.to_le_bytes());
        bytes.extend_from_slice(&self.last_partition_timestamp.to_le_bytes());
        bytes.extend_from_slice(&self.lag_size.to_le_bytes());

        bytes.extend_from_slice(&(self.lag_name.len() as u16).to_le_bytes());
        bytes.extend_from_slice(self.lag_name.as_bytes());

        write_count(&mut bytes, self.symbol_table_sizes.len())?;
        for size in &self.symbol_table_sizes {
            bytes.extend_from_slice(&size.to_le_bytes());
        }
        for array in [
            &self.symbol_table_index_pointers,
            &self.index_pointers,
            &self.lag_index_pointers,
        ] {
            write_count(&mut bytes, array.len())?;
            for value in array {
                bytes.extend_from_slice(&value.to_le_bytes());
            }
        }

        debug_assert_eq!(bytes.len(), size);
        Ok(bytes)
    }

    /// Deserializes a record.
    ///
    /// `bytes` must start at the record's size field; trailing bytes are ignored.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let mut cursor = Cursor::new(bytes);
        let size = cursor.u32()? as usize;
        if size < FIXED_SIZE || size > bytes.len() {
            return Err(JournalError::CorruptTxRecord(format!(
                "record size {} outside 0..{}",
                size,
                bytes.len()
            )));
        }
        let mut cursor = Cursor::new(&bytes[..size]);
        cursor.u32()?;

        let prev_tx_address = cursor.u64()?;
        let command_byte = cursor.u8()?;
        let command = TxCommand::from_u8(command_byte).ok_or_else(|| {
            JournalError::CorruptTxRecord(format!("unknown command {command_byte}"))
        })?;
        let timestamp = cursor.i64()?;
        let journal_max_row_id = cursor.u64()?;
        let last_partition_timestamp = cursor.i64()?;
        let lag_size = cursor.i64()?;

        let name_len = cursor.u16()? as usize;
        if name_len > MAX_LAG_NAME_LEN {
            return Err(JournalError::CorruptTxRecord(format!(
                "lag name length {name_len}"
            )));
        }
        let lag_name = String::from_utf8(cursor.take(name_len)?.to_vec())
            .map_err(|err| JournalError::CorruptTxRecord(err.to_string()))?;

        let count = cursor.u16()? as usize;
        let mut symbol_table_sizes = Vec::with_capacity(count);
        for _ in 0..count {
            symbol_table_sizes.push(cursor.i32()?);
        }
        let symbol_table_index_pointers = cursor.i64_array()?;
        let index_pointers = cursor.i64_array()?;
        let lag_index_pointers = cursor.i64_array()?;

        if cursor.remaining() != 0 {
            return Err(JournalError::CorruptTxRecord(format!(
                "{} trailing bytes in record",
                cursor.remaining()
            )));
        }

        Ok(Self {
            prev_tx_address,
            command,
            timestamp,
            journal_max_row_id,
            last_partition_timestamp,
            lag_size,
            lag_name,
            symbol_table_sizes,
            symbol_table_index_pointers,
            index_pointers,
            lag_index_pointers,
        })
    }
}

fn write_count(bytes: &mut Vec<u8>, count: usize) -> Result<()> {
    let count = u16::try_from(count)
        .map_err(|_| JournalError::CorruptTxRecord(format!("array of {count} elements")))?;
    bytes.extend_from_slice(&count.to_le_bytes());
    Ok(())
}

struct Cursor<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn new(bytes: &'a [u8]) -> Self {
        Self { bytes, pos: 0 }
    }

    fn remaining(&self) -> usize {
        self.bytes.len() - self.pos
    }

    fn take(&mut self, len: usize) -> Result<&'a [u8]> {
        if self.remaining() < len {
            return Err(JournalError::CorruptTxRecord(format!(
                "truncated record: need {} bytes at {}, have {}",
                len,
                self.pos,
                self.remaining()
            )));
        }
        let slice = &self.bytes[self.pos..self.pos + len];
        self.pos += len;
        Ok(slice)
    }

    fn array<const N: usize>(&mut self) -> Result<[u8; N]> {
        let mut buf = [0u8; N];
        buf.copy_from_slice(self.take(N)?);
        Ok(buf)
    }

    fn u8(&mut self) -> Result<u8> {
        Ok(self.array::<1>()?[0])
    }

    fn u16(&mut self) -> Result<u16> {
        Ok(u16::from_le_bytes(self.array()?))
    }

    fn u32(&mut self) -> Result<u32> {
        Ok(u32::from_le_bytes(self.array()?))
    }

    fn i32(&mut self) -> Result<i32> {
        Ok(i32::from_le_bytes(self.array()?))
    }

    fn u64(&mut self) -> Result<u64> {
        Ok(u64::from_le_bytes(self.array()?))
    }

    fn i64(&mut self) -> Result<i64> {
        Ok(i64::from_le_bytes(self.array()?))
    }

    fn i64_array(&mut self) -> Result<Vec<i64>> {
        let count = self.u16()? as usize;
        let mut values = Vec::with_capacity(count);
        for _ in 0..count {
            values.push(self.i64()?);
        }
        Ok(values)
    }
}
