//! Column and index files of one partition.
//!
//! Column files hold fixed-width cells addressed by local row id. Each symbol
//! column also has a posting index: an append-only log of `(key, local row)`
//! entries whose key block size is the number of entry bytes written.

use crate::commit::{FileKind, FileSet, FileTxSupport};
use crate::error::Result;
use crate::row_id;
use crate::schema::{ColumnKind, JournalMetadata, Value};
use crate::storage::{data_position, ColumnStorage, StorageProvider};
use crate::tx::{PartitionTxData, ReadCache, SymbolTxData};
use crate::txlog::TxRec;
use crate::Timestamp;
use std::path::Path;
use std::sync::Arc;
use tracing::warn;

/// Size of one posting index entry.
pub const INDEX_ENTRY_SIZE: u64 = 16;

/// Extension of column data files.
pub const DATA_FILE_SUFFIX: &str = ".d";

/// Extension of posting index files.
pub const INDEX_FILE_SUFFIX: &str = ".k";

/// Cell as stored, before dictionary resolution.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RawCell {
    /// Timestamp column cell.
    Timestamp(Timestamp),
    /// Long column cell.
    Long(i64),
    /// Double column cell.
    Double(f64),
    /// Dictionary key of a symbol column cell.
    Symbol(i32),
}

/// Files of one data partition.
pub struct PartitionFiles {
    metadata: Arc<JournalMetadata>,
    files: FileSet,
}

impl PartitionFiles {
    /// Creates the file set for partition `partition_id` stored in `dir`.
    pub fn new(
        partition_id: u32,
        dir: &Path,
        metadata: Arc<JournalMetadata>,
        provider: Arc<dyn StorageProvider>,
    ) -> Self {
        let mut names: Vec<(String, FileKind)> = metadata
            .columns()
            .iter()
            .map(|column| (format!("{}{}", column.name, DATA_FILE_SUFFIX), FileKind::Data))
            .collect();
        for &column in metadata.symbol_columns() {
            let name = &metadata.columns()[column].name;
            names.push((format!("{}{}", name, INDEX_FILE_SUFFIX), FileKind::Index));
        }
        Self {
            files: FileSet::new(partition_id, dir, provider, names),
            metadata,
        }
    }

    /// Partition id.
    pub fn partition_id(&self) -> u32 {
        self.files.partition_id()
    }

    /// Returns true if any file is mapped.
    pub fn is_open(&self) -> bool {
        self.files.is_open()
    }

    /// Unmaps every file.
    pub fn close(&mut self) {
        self.files.close();
    }

    /// Moves to a superseding directory of the same range.
    pub fn relocate(&mut self, dir: &Path) {
        self.files.relocate(dir);
    }

    /// Writes one row past the frontier in `state` and advances it.
    ///
    /// `keys` holds the dictionary key of every symbol column in order. The
    /// state is only advanced once every cell has been written.
    pub fn append_row(
        &mut self,
        state: &mut PartitionTxData,
        values: &[Value],
        keys: &[i32],
        timestamp: Timestamp,
    ) -> Result<()> {
        let local_row = state.next_row_id;
        let metadata = Arc::clone(&self.metadata);
        let mut offsets = state.append_offset.clone();
        let mut symbol_data = state.symbol_data.clone();
        let mut next_key = keys.iter();

        for (index, (column, value)) in metadata.columns().iter().zip(values).enumerate() {
            let position = data_position(offsets[index]);
            let file = self.files.file(index)?;
            match value {
                Value::Timestamp(v) | Value::Long(v) => file.write_i64(position, *v)?,
                Value::Double(v) => file.write_f64(position, *v)?,
                Value::Symbol(_) => {
                    let key = next_key.next().copied().unwrap_or_default();
                    file.write_i32(position, key)?;

                    if let Some(index_file) = metadata.index_file(index) {
                        let entry = data_position(offsets[index_file]);
                        let file = self.files.file(index_file)?;
                        file.write_i64(entry, key as i64)?;
                        file.write_i64(entry + 8, local_row as i64)?;
                        offsets[index_file] += INDEX_ENTRY_SIZE;
                        symbol_data[index_file] = SymbolTxData {
                            key_block_created: true,
                            key_block_offset: 0,
                            key_block_size: offsets[index_file],
                        };
                    }
                }
            }
            offsets[index] += column.kind.width();
        }

        state.append_offset = offsets;
        state.symbol_data = symbol_data;
        state.next_row_id = local_row + 1;
        state.last_timestamp = timestamp;
        state.is_appended = true;
        state.is_partition_updated = true;
        Ok(())
    }

    /// Reads one stored cell.
    pub fn read_cell(&mut self, column: usize, local_row: u64) -> Result<RawCell> {
        let kind = self.metadata.columns()[column].kind;
        let position = data_position(local_row * kind.width());
        let file = self.readable(column, position + kind.width())?;
        Ok(match kind {
            ColumnKind::Timestamp => RawCell::Timestamp(file.read_i64(position)?),
            ColumnKind::Long => RawCell::Long(file.read_i64(position)?),
            ColumnKind::Double => RawCell::Double(file.read_f64(position)?),
            ColumnKind::Symbol => RawCell::Symbol(file.read_i32(position)?),
        })
    }

    /// Returns the local rows of a symbol column holding `key`, in row order.
    ///
    /// Only the first `block_size` bytes of the index and rows below `row_limit`
    /// are considered.
    pub fn rows_for_key(
        &mut self,
        column: usize,
        key: i32,
        row_limit: u64,
        block_size: u64,
        cache: &ReadCache,
    ) -> Result<Vec<u64>> {
        let Some(index_file) = self.metadata.index_file(column) else {
            return Ok(Vec::new());
        };
        if block_size == 0 {
            return Ok(Vec::new());
        }
        let start = data_position(0);
        let file = self.readable(index_file, start + block_size)?;
        cache.with_buffer(block_size as usize, |buf| -> Result<Vec<u64>> {
            file.read_at(start, buf)?;
            Ok(buf
                .chunks_exact(INDEX_ENTRY_SIZE as usize)
                .filter_map(|entry| {
                    let (entry_key, row) = decode_entry(entry);
                    (entry_key == key as i64 && row >= 0 && (row as u64) < row_limit)
                        .then_some(row as u64)
                })
                .collect())
        })
    }

    fn readable(&mut self, index: usize, end: u64) -> Result<&dyn ColumnStorage> {
        let file = self.files.file(index)?;
        if file.len() < end {
            file.refresh()?;
        }
        Ok(&*file)
    }

    fn read_timestamp(&mut self, local_row: u64) -> Result<Timestamp> {
        match self.read_cell(0, local_row)? {
            RawCell::Timestamp(ts) | RawCell::Long(ts) => Ok(ts),
            _ => Ok(Timestamp::MIN),
        }
    }

    /// Drops trailing index entries that reference rows at or past `rows`.
    fn trim_index(&mut self, index_file: usize, size: u64, rows: u64) -> Result<u64> {
        let mut size = size - size % INDEX_ENTRY_SIZE;
        let file = self.readable(index_file, data_position(size))?;
        while size > 0 {
            let row = file.read_i64(data_position(size - INDEX_ENTRY_SIZE) + 8)?;
            if row >= 0 && (row as u64) < rows {
                break;
            }
            size -= INDEX_ENTRY_SIZE;
        }
        Ok(size)
    }
}

fn decode_entry(entry: &[u8]) -> (i64, i64) {
    let mut key = [0u8; 8];
    let mut row = [0u8; 8];
    key.copy_from_slice(&entry[..8]);
    row.copy_from_slice(&entry[8..16]);
    (i64::from_le_bytes(key), i64::from_le_bytes(row))
}

impl FileTxSupport for PartitionFiles {
    fn read_tx_log(&mut self, trusted: Option<&TxRec>) -> Result<PartitionTxData> {
        let (mut append_offset, mut symbol_data) = self.files.read_headers()?;
        let metadata = Arc::clone(&self.metadata);
        let columns = metadata.columns();

        let mut rows = columns
            .iter()
            .enumerate()
            .map(|(index, column)| append_offset[index] / column.kind.width())
            .min()
            .unwrap_or(0);

        let mut trusted_timestamp = None;
        if let Some(rec) = trusted {
            let trusted_rows = row_id::to_local_row_id(rec.journal_max_row_id);
            if trusted_rows <= rows {
                rows = trusted_rows;
                trusted_timestamp = Some(rec.last_partition_timestamp);
            } else {
                warn!(
                    "Partition {} holds {} rows but transaction log claims {}; using file headers",
                    self.partition_id(),
                    rows,
                    trusted_rows
                );
            }
        }

        for (index, column) in columns.iter().enumerate() {
            append_offset[index] = rows * column.kind.width();
        }
        for &column in metadata.symbol_columns() {
            let Some(index_file) = metadata.index_file(column) else {
                continue;
            };
            let durable = symbol_data[index_file].key_block_size.min(append_offset[index_file]);
            let size = self.trim_index(index_file, durable, rows)?;
            append_offset[index_file] = size;
            symbol_data[index_file] = SymbolTxData {
                key_block_created: symbol_data[index_file].key_block_created || size > 0,
                key_block_offset: 0,
                key_block_size: size,
            };
        }

        let last_timestamp = match (rows, trusted_timestamp) {
            (0, _) => Timestamp::MIN,
            (_, Some(ts)) => ts,
            (rows, None) => self.read_timestamp(rows - 1)?,
        };

        Ok(PartitionTxData {
            next_row_id: rows,
            last_timestamp,
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
        rec.journal_max_row_id = row_id::to_row_id(self.partition_id(), state.next_row_id);
        rec.last_partition_timestamp = state.last_timestamp;
        rec.index_pointers = self
            .metadata
            .symbol_columns()
            .iter()
            .filter_map(|&column| self.metadata.index_file(column))
            .map(|index_file| state.append_offset[index_file] as i64)
            .collect();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SyncMode;
    use crate::storage::MappedStorageProvider;
    use tempfile::TempDir;

    fn metadata() -> Arc<JournalMetadata> {
        Arc::new(
            JournalMetadata::builder("ts")
                .symbol("sym")
                .double("price")
                .build()
                .unwrap(),
        )
    }

    fn partition(dir: &Path) -> PartitionFiles {
        let provider = Arc::new(MappedStorageProvider::new(4096, SyncMode::None));
        PartitionFiles::new(1, dir, metadata(), provider)
    }

    fn row(ts: i64, sym: &str, price: f64) -> Vec<Value> {
        vec![
            Value::Timestamp(ts),
            Value::Symbol(sym.to_string()),
            Value::Double(price),
        ]
    }

    #[test]
    fn test_append_and_read_back() {
        let temp_dir = TempDir::new().unwrap();
        let mut files = partition(temp_dir.path());
        let mut state = files.read_tx_log(None).unwrap();
        assert_eq!(state.next_row_id, 0);
        assert_eq!(state.append_offset.len(), 4);

        files.append_row(&mut state, &row(10, "a", 1.5), &[0], 10).unwrap();
        files.append_row(&mut state, &row(20, "b", 2.5), &[1], 20).unwrap();
        files.append_row(&mut state, &row(30, "a", 3.5), &[0], 30).unwrap();

        assert_eq!(state.next_row_id, 3);
        assert_eq!(state.last_timestamp, 30);
        assert_eq!(state.append_offset, vec![24, 12, 24, 48]);
        assert_eq!(state.symbol_data[3].key_block_size, 48);
        assert!(state.is_appended);

        assert_eq!(files.read_cell(0, 1).unwrap(), RawCell::Timestamp(20));
        assert_eq!(files.read_cell(1, 2).unwrap(), RawCell::Symbol(0));
        assert_eq!(files.read_cell(2, 0).unwrap(), RawCell::Double(1.5));

        let cache = ReadCache::default();
        assert_eq!(files.rows_for_key(1, 0, 3, 48, &cache).unwrap(), vec![0, 2]);
        assert_eq!(files.rows_for_key(1, 0, 2, 48, &cache).unwrap(), vec![0]);
        assert!(files.rows_for_key(2, 0, 3, 48, &cache).unwrap().is_empty());
    }

    #[test]
    fn test_uncommitted_rows_are_not_durable() {
        let temp_dir = TempDir::new().unwrap();
        let mut files = partition(temp_dir.path());
        let mut state = files.read_tx_log(None).unwrap();
        files.append_row(&mut state, &row(10, "a", 1.0), &[0], 10).unwrap();

        let mut reopened = partition(temp_dir.path());
        assert_eq!(reopened.read_tx_log(None).unwrap().next_row_id, 0);
    }

    #[test]
    fn test_read_tx_log_after_commit() {
        let temp_dir = TempDir::new().unwrap();
        let mut files = partition(temp_dir.path());
        let old = files.read_tx_log(None).unwrap();
        let mut state = old.clone();
        files.append_row(&mut state, &row(10, "a", 1.0), &[0], 10).unwrap();
        files.append_row(&mut state, &row(15, "b", 2.0), &[1], 15).unwrap();
        files.commit(&state, &old).unwrap();

        let mut reopened = partition(temp_dir.path());
        let durable = reopened.read_tx_log(None).unwrap();
        assert_eq!(durable.next_row_id, 2);
        assert_eq!(durable.last_timestamp, 15);
        assert_eq!(durable.append_offset, state.append_offset);
        assert_eq!(durable.symbol_data, state.symbol_data);
    }

    #[test]
    fn test_trusted_record_hides_unpublished_rows() {
        let temp_dir = TempDir::new().unwrap();
        let mut files = partition(temp_dir.path());
        let old = files.read_tx_log(None).unwrap();
        let mut state = old.clone();
        for ts in 0..4 {
            files
                .append_row(&mut state, &row(ts, "a", 0.0), &[ts as i32 % 2], ts)
                .unwrap();
        }
        files.commit(&state, &old).unwrap();

        let rec = TxRec {
            journal_max_row_id: row_id::to_row_id(1, 2),
            last_partition_timestamp: 1,
            ..TxRec::default()
        };
        let mut reopened = partition(temp_dir.path());
        let durable = reopened.read_tx_log(Some(&rec)).unwrap();
        assert_eq!(durable.next_row_id, 2);
        assert_eq!(durable.last_timestamp, 1);
        assert_eq!(durable.append_offset[0], 16);
        assert_eq!(durable.append_offset[3], 2 * INDEX_ENTRY_SIZE);
        assert_eq!(durable.symbol_data[3].key_block_size, 2 * INDEX_ENTRY_SIZE);
    }

    #[test]
    fn test_set_tx_rec() {
        let temp_dir = TempDir::new().unwrap();
        let mut files = partition(temp_dir.path());
        let mut state = files.read_tx_log(None).unwrap();
        files.append_row(&mut state, &row(42, "a", 0.0), &[0], 42).unwrap();

        let mut rec = TxRec::default();
        files.set_tx_rec(&state, &mut rec);
        assert_eq!(rec.journal_max_row_id, row_id::to_row_id(1, 1));
        assert_eq!(rec.last_partition_timestamp, 42);
        assert_eq!(rec.index_pointers, vec![16]);
    }
}
