//! Append-only transaction log with a checksum-guarded current-record pointer.
//!
//! # Layout
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │ 0..8   address of the current record (u64, LE)           │
//! │ 8      checksum: XOR of the 8 address bytes              │
//! │ 9..16  padding                                           │
//! ├──────────────────────────────────────────────────────────┤
//! │ 16..   records, 8-byte aligned, each linked to the       │
//! │        previous one through `prev_tx_address`            │
//! └──────────────────────────────────────────────────────────┘
//! ```
//!
//! # Publish protocol
//!
//! A new record is written (and flushed) past the current one before the
//! 9-byte pointer is overwritten. Rewriting the pointer is the only step that
//! changes which record is current, so a crash at any point leaves either the
//! old or the new record published.
//!
//! A reader that observes a pointer whose checksum does not match re-reads it.
//! A torn write shows up as a changing pair; seeing the same bad pair twice in
//! a row means the pointer is corrupt and reading fails with
//! [`JournalError::InvalidTxAddress`].

pub mod record;

pub use record::{TxCommand, TxRec};

use crate::error::{JournalError, Result};
use crate::storage::{ColumnStorage, StorageProvider};
use std::path::Path;
use tracing::debug;

/// Name of the transaction log file at the journal root.
pub const TX_LOG_FILE: &str = "_tx";

/// Size of the address + checksum pointer.
pub const POINTER_SIZE: usize = 9;

/// Address of the first record.
pub const FIRST_RECORD_ADDRESS: u64 = 16;

/// Computes the pointer checksum for an address.
pub fn address_checksum(address: u64) -> u8 {
    address.to_le_bytes().iter().fold(0u8, |acc, b| acc ^ b)
}

/// Handle to the `_tx` file of one journal.
pub struct TxLog {
    file: Box<dyn ColumnStorage>,
}

impl TxLog {
    /// Opens (creating if needed) the transaction log under `root`.
    pub fn open(root: &Path, provider: &dyn StorageProvider) -> Result<Self> {
        let file = provider.open(&root.join(TX_LOG_FILE))?;
        Ok(Self { file })
    }

    /// Returns the address of the current record, or `None` for an empty log.
    ///
    /// # Errors
    ///
    /// Returns [`JournalError::InvalidTxAddress`] if the pointer checksum stays
    /// inconsistent across two consecutive reads.
    pub fn current_address(&mut self) -> Result<Option<u64>> {
        let mut previous: Option<(u64, u8)> = None;
        loop {
            self.file.refresh()?;
            if self.file.len() < POINTER_SIZE as u64 {
                return Ok(None);
            }

            let mut pointer = [0u8; POINTER_SIZE];
            self.file.read_at(0, &mut pointer)?;
            let mut address_bytes = [0u8; 8];
            address_bytes.copy_from_slice(&pointer[..8]);
            let address = u64::from_le_bytes(address_bytes);
            let checksum = pointer[8];

            if checksum == address_checksum(address) {
                if address == 0 {
                    return Ok(None);
                }
                if self.in_bounds(address) {
                    return Ok(Some(address));
                }
            }

            if previous == Some((address, checksum)) {
                return Err(JournalError::InvalidTxAddress { address, checksum });
            }
            debug!(
                "Transaction pointer {:#x}/{:#04x} inconsistent, re-reading",
                address, checksum
            );
            previous = Some((address, checksum));
            std::thread::yield_now();
        }
    }

    fn in_bounds(&self, address: u64) -> bool {
        address >= FIRST_RECORD_ADDRESS
            && address
                .checked_add(record::FIXED_SIZE as u64)
                .is_some_and(|end| end <= self.file.len())
    }

    /// Reads the size field of the record at `address` and returns the
    /// address one past its last byte.
    fn record_end(&self, address: u64) -> Result<u64> {
        let size = self.file.read_i32(address)?;
        if size < record::FIXED_SIZE as i32 {
            return Err(JournalError::CorruptTxRecord(format!(
                "record at {:#x} has size {}",
                address, size
            )));
        }
        address
            .checked_add(size as u64)
            .filter(|&end| end <= self.file.len())
            .ok_or_else(|| {
                JournalError::CorruptTxRecord(format!(
                    "record at {:#x} of {} bytes runs past log of {} bytes",
                    address,
                    size,
                    self.file.len()
                ))
            })
    }

    /// Reads the record at `address`.
    pub fn read_at(&self, address: u64) -> Result<TxRec> {
        if !self.in_bounds(address) {
            return Err(JournalError::CorruptTxRecord(format!(
                "record address {:#x} outside log of {} bytes",
                address,
                self.file.len()
            )));
        }
        let end = self.record_end(address)?;
        let mut bytes = vec![0u8; (end - address) as usize];
        self.file.read_at(address, &mut bytes)?;
        TxRec::from_bytes(&bytes)
    }

    /// Reads the current record together with its address.
    pub fn read_current(&mut self) -> Result<Option<(u64, TxRec)>> {
        match self.current_address()? {
            Some(address) => Ok(Some((address, self.read_at(address)?))),
            None => Ok(None),
        }
    }

    /// Appends `rec` after the current record and publishes it.
    ///
    /// Sets `rec.prev_tx_address` to the previously current record.
    /// Returns the address of the new record.
    pub fn create(&mut self, rec: &mut TxRec) -> Result<u64> {
        let current = self.current_address()?;
        let address = match current {
            Some(current) => align8(self.record_end(current)?),
            None => FIRST_RECORD_ADDRESS,
        };
        rec.prev_tx_address = current.unwrap_or(0);

        let bytes = rec.to_bytes()?;
        self.file.write_at(address, &bytes)?;
        self.file.flush()?;

        let mut pointer = [0u8; POINTER_SIZE];
        pointer[..8].copy_from_slice(&address.to_le_bytes());
        pointer[8] = address_checksum(address);
        self.file.write_at(0, &pointer)?;
        self.file.flush()?;

        debug!(
            "Published transaction record at {:#x} (prev {:#x}, max row id {:#x})",
            address, rec.prev_tx_address, rec.journal_max_row_id
        );
        Ok(address)
    }

    /// Returns every record reachable from the current one, newest first.
    pub fn history(&mut self) -> Result<Vec<(u64, TxRec)>> {
        let mut records = Vec::new();
        let mut next = self.current_address()?;
        while let Some(address) = next {
            let rec = self.read_at(address)?;
            next = match rec.prev_tx_address {
                0 => None,
                prev if prev < address => Some(prev),
                prev => {
                    return Err(JournalError::CorruptTxRecord(format!(
                        "record at {:#x} links forward to {:#x}",
                        address, prev
                    )))
                }
            };
            records.push((address, rec));
        }
        Ok(records)
    }

    /// Returns true if no record has been published yet.
    pub fn is_empty(&mut self) -> Result<bool> {
        Ok(self.current_address()?.is_none())
    }
}

fn align8(value: u64) -> u64 {
    (value + 7) & !7
}
