//! Shared dictionary store for symbol columns.
//!
//! Every symbol column owns one `<column>.sym` file at the journal root holding
//! length-prefixed UTF-8 strings; a string's key is its position in the file.
//! The store takes partition index 0 in every transaction. Its header slots are
//! reused as follows: the append offset is the byte length of the committed
//! entries and the key block size is the number of committed entries.
//!
//! Keys are assigned in the writer's transaction state. Entries past the
//! committed count are pending and are dropped again if the transaction is
//! discarded.

use crate::commit::{FileKind, FileSet, FileTxSupport};
use crate::error::{JournalError, Result};
use crate::row_id::SYMBOL_PARTITION_INDEX;
use crate::schema::JournalMetadata;
use crate::storage::{data_position, StorageProvider};
use crate::tx::{PartitionTxData, SymbolTxData};
use crate::txlog::TxRec;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use tracing::warn;

/// Extension of dictionary files.
pub const SYMBOL_FILE_SUFFIX: &str = ".sym";

#[derive(Default)]
struct Dictionary {
    values: Vec<Arc<str>>,
    keys: HashMap<Arc<str>, i32>,
    ends: Vec<u64>,
}

impl Dictionary {
    fn len(&self) -> u64 {
        self.values.len() as u64
    }

    fn loaded_offset(&self) -> u64 {
        self.ends.last().copied().unwrap_or(0)
    }

    fn push(&mut self, value: Arc<str>, end: u64) -> i32 {
        let key = self.values.len() as i32;
        self.keys.insert(Arc::clone(&value), key);
        self.values.push(value);
        self.ends.push(end);
        key
    }

    fn truncate(&mut self, count: u64) {
        let count = count as usize;
        if self.values.len() <= count {
            return;
        }
        for value in self.values.drain(count..) {
            self.keys.remove(&value);
        }
        self.ends.truncate(count);
    }
}

/// Dictionary files of all symbol columns.
pub struct SymbolStore {
    files: FileSet,
    dictionaries: Vec<Dictionary>,
}

impl SymbolStore {
    /// Creates the store for the symbol columns of `metadata` under `root`.
    pub fn new(root: &Path, metadata: &JournalMetadata, provider: Arc<dyn StorageProvider>) -> Self {
        let names: Vec<(String, FileKind)> = metadata
            .symbol_columns()
            .iter()
            .map(|&column| {
                let name = &metadata.columns()[column].name;
                (format!("{}{}", name, SYMBOL_FILE_SUFFIX), FileKind::Index)
            })
            .collect();
        let dictionaries = names.iter().map(|_| Dictionary::default()).collect();
        Self {
            files: FileSet::new(SYMBOL_PARTITION_INDEX, root, provider, names),
            dictionaries,
        }
    }

    /// Returns the key of `value` in dictionary `ordinal`, adding it if absent.
    ///
    /// New entries are written past the committed end and only become durable
    /// when `state` is committed.
    pub fn key_for(
        &mut self,
        ordinal: usize,
        value: &str,
        state: &mut PartitionTxData,
    ) -> Result<i32> {
        let count = state.symbol_data[ordinal].key_block_size;
        self.load(ordinal, state.append_offset[ordinal], count, true)?;
        if let Some(&key) = self.dictionaries[ordinal].keys.get(value) {
            return Ok(key);
        }

        let bytes = value.as_bytes();
        let start = state.append_offset[ordinal];
        let file = self.files.file(ordinal)?;
        file.write_i32(data_position(start), bytes.len() as i32)?;
        file.write_at(data_position(start + 4), bytes)?;
        let end = start + 4 + bytes.len() as u64;

        let key = self.dictionaries[ordinal].push(Arc::from(value), end);
        state.append_offset[ordinal] = end;
        state.symbol_data[ordinal] = SymbolTxData {
            key_block_created: true,
            key_block_offset: 0,
            key_block_size: count + 1,
        };
        state.next_row_id += 1;
        state.is_partition_updated = true;
        Ok(key)
    }

    /// Returns the string for `key` as of `state`, or `None` if the key is not
    /// part of that state.
    pub fn resolve(
        &mut self,
        ordinal: usize,
        key: i32,
        state: &PartitionTxData,
    ) -> Result<Option<Arc<str>>> {
        let count = state.symbol_data[ordinal].key_block_size;
        if key < 0 || key as u64 >= count {
            return Ok(None);
        }
        self.load(ordinal, state.append_offset[ordinal], count, false)?;
        Ok(self.dictionaries[ordinal].values.get(key as usize).cloned())
    }

    /// Returns the key of `value` as of `state` without adding it.
    pub fn lookup(
        &mut self,
        ordinal: usize,
        value: &str,
        state: &PartitionTxData,
    ) -> Result<Option<i32>> {
        let count = state.symbol_data[ordinal].key_block_size;
        self.load(ordinal, state.append_offset[ordinal], count, false)?;
        Ok(self.dictionaries[ordinal]
            .keys
            .get(value)
            .copied()
            .filter(|&key| (key as u64) < count))
    }

    /// Forgets entries added after `state`.
    pub fn discard_pending(&mut self, state: &PartitionTxData) {
        for (ordinal, dictionary) in self.dictionaries.iter_mut().enumerate() {
            if let Some(symbol) = state.symbol_data.get(ordinal) {
                dictionary.truncate(symbol.key_block_size);
            }
        }
    }

    /// Brings dictionary `ordinal` to `count` entries ending at `offset`.
    ///
    /// With `exact` set, entries past `count` are dropped; otherwise a longer
    /// in-memory dictionary is kept as is.
    fn load(&mut self, ordinal: usize, offset: u64, count: u64, exact: bool) -> Result<()> {
        let dictionary = &mut self.dictionaries[ordinal];
        if dictionary.len() >= count {
            if exact {
                dictionary.truncate(count);
            }
            return Ok(());
        }

        let file = self.files.file(ordinal)?;
        if file.len() < data_position(offset) {
            file.refresh()?;
        }
        while dictionary.len() < count {
            let start = dictionary.loaded_offset();
            if start + 4 > offset {
                return Err(JournalError::corrupt_file(
                    file.path(),
                    format!("expected {} entries within {} bytes", count, offset),
                ));
            }
            let len = file.read_i32(data_position(start))?;
            let end = start + 4 + len.max(0) as u64;
            if len < 0 || end > offset {
                return Err(JournalError::corrupt_file(
                    file.path(),
                    format!("entry at {} has length {}", start, len),
                ));
            }
            let mut bytes = vec![0u8; len as usize];
            file.read_at(data_position(start + 4), &mut bytes)?;
            let value = String::from_utf8(bytes).map_err(|err| {
                JournalError::corrupt_file(file.path(), format!("entry at {}: {}", start, err))
            })?;
            dictionary.push(Arc::from(value), end);
        }
        Ok(())
    }
}

impl FileTxSupport for SymbolStore {
    fn read_tx_log(&mut self, trusted: Option<&TxRec>) -> Result<PartitionTxData> {
        let (mut append_offset, mut symbol_data) = self.files.read_headers()?;
        let count = self.dictionaries.len();

        if let Some(rec) = trusted {
            if rec.symbol_table_sizes.len() == count
                && rec.symbol_table_index_pointers.len() == count
            {
                for ordinal in 0..count {
                    let entries = rec.symbol_table_sizes[ordinal].max(0) as u64;
                    let offset = rec.symbol_table_index_pointers[ordinal].max(0) as u64;
                    if entries <= symbol_data[ordinal].key_block_size
                        && offset <= append_offset[ordinal]
                    {
                        symbol_data[ordinal].key_block_size = entries;
                        append_offset[ordinal] = offset;
                    } else {
                        warn!(
                            "Dictionary {} is behind the transaction log ({} of {} entries)",
                            ordinal, symbol_data[ordinal].key_block_size, entries
                        );
                    }
                }
            } else {
                warn!(
                    "Transaction log tracks {} dictionaries, journal has {}",
                    rec.symbol_table_sizes.len(),
                    count
                );
            }
        }

        let mut next_row_id = 0;
        for ordinal in 0..count {
            let entries = symbol_data[ordinal].key_block_size;
            symbol_data[ordinal] = SymbolTxData {
                key_block_created: entries > 0,
                key_block_offset: 0,
                key_block_size: entries,
            };
            self.load(ordinal, append_offset[ordinal], entries, true)?;
            next_row_id += entries;
        }

        Ok(PartitionTxData {
            next_row_id,
            last_timestamp: crate::Timestamp::MIN,
            append_offset,
            symbol_data,
            is_partition_updated: false,
            is_appended: false,
        })
    }

    fn commit(&mut self, new_state: &PartitionTxData, old_state: &PartitionTxData) -> Result<()> {
        self.files.commit(new_state, old_state)
    }

    fn set_tx_rec(&self, state: &PartitionTxData, rec: &mut TxRec) {
        rec.symbol_table_sizes = state
            .symbol_data
            .iter()
            .map(|symbol| symbol.key_block_size as i32)
            .collect();
        rec.symbol_table_index_pointers = state
            .append_offset
            .iter()
            .map(|&offset| offset as i64)
            .collect();
    }
}
