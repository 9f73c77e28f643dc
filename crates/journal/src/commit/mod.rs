//! Durable propagation of transaction state into file headers.
//!
//! Appends only move in-memory cursors held by the transaction. A commit writes
//! every changed cursor into its file's header. Within one [`FileSet`] this is
//! all-or-nothing: if a header write fails, headers already written during the
//! same call are restored to their previous values before the error is
//! returned as [`JournalError::CommitFailed`]. Files that were never reached
//! still hold their previous value.

use crate::error::{JournalError, Result};
use crate::storage::{
    ColumnStorage, StorageProvider, KEY_BLOCK_CREATED_POS, KEY_BLOCK_OFFSET_POS,
    KEY_BLOCK_SIZE_POS,
};
use crate::tx::{PartitionTxData, SymbolTxData};
use crate::txlog::TxRec;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, error};

/// Transaction support implemented by every partition and by the dictionary store.
pub trait FileTxSupport: Send {
    /// Reconstructs the current durable state from file headers.
    ///
    /// When `trusted` is given, it is the published log record and overrides
    /// what the headers say where the two disagree.
    fn read_tx_log(&mut self, trusted: Option<&TxRec>) -> Result<PartitionTxData>;

    /// Writes every offset that differs between `new_state` and `old_state`.
    fn commit(&mut self, new_state: &PartitionTxData, old_state: &PartitionTxData) -> Result<()>;

    /// Contributes this state to a record about to be published.
    fn set_tx_rec(&self, state: &PartitionTxData, rec: &mut TxRec);
}

/// Role of a file in a [`FileSet`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileKind {
    /// Header holds an append offset only.
    Data,
    /// Header also holds key block bookkeeping.
    Index,
}

struct FileSlot {
    name: String,
    kind: FileKind,
    storage: Option<Box<dyn ColumnStorage>>,
}

/// Files of one partition (or of the dictionary store), opened lazily.
pub struct FileSet {
    partition_id: u32,
    dir: PathBuf,
    provider: Arc<dyn StorageProvider>,
    slots: Vec<FileSlot>,
}

impl FileSet {
    /// Creates a set of files named `names` inside `dir`.
    pub fn new(
        partition_id: u32,
        dir: impl AsRef<Path>,
        provider: Arc<dyn StorageProvider>,
        files: Vec<(String, FileKind)>,
    ) -> Self {
        Self {
            partition_id,
            dir: dir.as_ref().to_path_buf(),
            provider,
            slots: files
                .into_iter()
                .map(|(name, kind)| FileSlot {
                    name,
                    kind,
                    storage: None,
                })
                .collect(),
        }
    }

    /// Partition id reported in commit failures.
    pub fn partition_id(&self) -> u32 {
        self.partition_id
    }

    /// Directory holding the files.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Number of files.
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    /// Returns true if the set has no files.
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Kind of the file at `index`.
    pub fn kind(&self, index: usize) -> FileKind {
        self.slots[index].kind
    }

    /// Returns true if any file is currently mapped.
    pub fn is_open(&self) -> bool {
        self.slots.iter().any(|slot| slot.storage.is_some())
    }

    /// Unmaps every file; they are reopened on next access.
    pub fn close(&mut self) {
        for slot in &mut self.slots {
            slot.storage = None;
        }
    }

    /// Points the set at another directory, closing open files.
    pub fn relocate(&mut self, dir: impl AsRef<Path>) {
        self.close();
        self.dir = dir.as_ref().to_path_buf();
    }

    /// Returns the file at `index`, opening it if needed.
    pub fn file(&mut self, index: usize) -> Result<&mut dyn ColumnStorage> {
        let slot = &mut self.slots[index];
        let storage = match slot.storage.take() {
            Some(storage) => storage,
            None => self.provider.open(&self.dir.join(&slot.name))?,
        };
        Ok(slot.storage.insert(storage).as_mut())
    }

    /// Returns the file at `index` if it is open.
    pub fn open_file(&self, index: usize) -> Option<&dyn ColumnStorage> {
        self.slots[index].storage.as_deref()
    }

    /// Opens every file and picks up growth made by other handles.
    pub fn refresh(&mut self) -> Result<()> {
        for index in 0..self.slots.len() {
            self.file(index)?.refresh()?;
        }
        Ok(())
    }

    /// Reads the durable header of every file.
    pub fn read_headers(&mut self) -> Result<(Vec<u64>, Vec<SymbolTxData>)> {
        let mut offsets = Vec::with_capacity(self.slots.len());
        let mut symbols = Vec::with_capacity(self.slots.len());
        for index in 0..self.slots.len() {
            let kind = self.slots[index].kind;
            let file = self.file(index)?;
            file.refresh()?;
            offsets.push(file.append_offset()?);
            symbols.push(match kind {
                FileKind::Index if !file.is_empty() => read_key_block(file)?,
                _ => SymbolTxData::default(),
            });
        }
        Ok((offsets, symbols))
    }

    /// Writes changed headers, restoring written ones if any write fails.
    pub fn commit(&mut self, new_state: &PartitionTxData, old_state: &PartitionTxData) -> Result<()> {
        if new_state.append_offset.len() != self.slots.len()
            || old_state.append_offset.len() != self.slots.len()
        {
            return Err(JournalError::commit_failed(
                self.partition_id,
                JournalError::corrupt_file(
                    &self.dir,
                    format!(
                        "transaction tracks {} files, partition has {}",
                        new_state.append_offset.len(),
                        self.slots.len()
                    ),
                ),
            ));
        }

        let mut written = Vec::new();
        for index in 0..self.slots.len() {
            let offset = new_state.append_offset[index];
            let symbol = new_state.symbol_data[index];
            if offset == old_state.append_offset[index] && symbol == old_state.symbol_data[index] {
                continue;
            }
            match self.write_header(index, offset, symbol) {
                Ok(()) => written.push(index),
                Err(err) => {
                    written.push(index);
                    self.restore(&written, old_state);
                    return Err(JournalError::commit_failed(self.partition_id, err));
                }
            }
        }

        if !written.is_empty() {
            debug!(
                "Committed {} file headers in partition {}",
                written.len(),
                self.partition_id
            );
        }
        Ok(())
    }

    fn restore(&mut self, indexes: &[usize], old_state: &PartitionTxData) {
        for &index in indexes.iter().rev() {
            let offset = old_state.append_offset[index];
            let symbol = old_state.symbol_data[index];
            if let Err(err) = self.write_header(index, offset, symbol) {
                error!(
                    "Failed to roll back {} in partition {}: {:?}",
                    self.slots[index].name, self.partition_id, err
                );
            }
        }
    }

    fn write_header(&mut self, index: usize, offset: u64, symbol: SymbolTxData) -> Result<()> {
        let kind = self.slots[index].kind;
        let file = self.file(index)?;
        file.set_append_offset(offset)?;
        if kind == FileKind::Index {
            file.write_i64(KEY_BLOCK_OFFSET_POS, symbol.key_block_offset as i64)?;
            file.write_i64(KEY_BLOCK_SIZE_POS, symbol.key_block_size as i64)?;
            file.write_bool(KEY_BLOCK_CREATED_POS, symbol.key_block_created)?;
        }
        file.flush()
    }
}

fn read_key_block(file: &dyn ColumnStorage) -> Result<SymbolTxData> {
    let offset = file.read_i64(KEY_BLOCK_OFFSET_POS)?;
    let size = file.read_i64(KEY_BLOCK_SIZE_POS)?;
    if offset < 0 || size < 0 {
        return Err(JournalError::corrupt_file(
            file.path(),
            format!("key block at {offset} of size {size}"),
        ));
    }
    Ok(SymbolTxData {
        key_block_created: file.read_bool(KEY_BLOCK_CREATED_POS)?,
        key_block_offset: offset as u64,
        key_block_size: size as u64,
    })
}
