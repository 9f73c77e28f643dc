//! Writer and reader handles.
//!
//! A journal directory has at most one [`JournalWriter`] per process. Writes
//! happen inside a [`WriteTx`], which holds the writer's lock until it is
//! dropped. Readers take [`TxContext`] snapshots through a [`JournalReader`]
//! and never wait for the writer.
//!
//! # Example
//!
//! ```rust,no_run
//! use alopex_journal::{JournalConfig, JournalMetadata, JournalReader, JournalWriter, Value};
//! use alopex_journal::ReadTransactionContext;
//!
//! # fn main() -> alopex_journal::Result<()> {
//! let metadata = JournalMetadata::builder("ts").symbol("sym").double("price").build()?;
//! let writer = JournalWriter::open("/tmp/quotes", metadata.clone(), JournalConfig::default())?;
//!
//! let mut tx = writer.begin()?;
//! tx.append(&[Value::Timestamp(1), Value::Symbol("AAPL".into()), Value::Double(1.5)])?;
//! tx.commit()?;
//!
//! let reader = JournalReader::open("/tmp/quotes", metadata, JournalConfig::default())?;
//! let snapshot = reader.snapshot()?;
//! assert_eq!(snapshot.row_count(1), 1);
//! # Ok(())
//! # }
//! ```

use crate::config::JournalConfig;
use crate::error::{JournalError, Result};
use crate::partition::lock::ReadGuard;
use crate::partition::manager::{AccessMode, PartitionManager, PartitionManagerStats};
use crate::partition::naming::PartitionType;
use crate::row_id::RowId;
use crate::schema::{JournalMetadata, Value};
use crate::storage::{MappedStorageProvider, StorageProvider};
use crate::tx::TxContext;
use parking_lot::{Mutex, MutexGuard, RwLock};
use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::debug;

static OPEN_WRITERS: Mutex<BTreeSet<PathBuf>> = parking_lot::const_mutex(BTreeSet::new());

/// Claim on a journal directory, released on drop.
struct WriterRegistration {
    root: PathBuf,
}

impl WriterRegistration {
    fn claim(root: &Path) -> Result<Self> {
        let mut writers = OPEN_WRITERS.lock();
        if !writers.insert(root.to_path_buf()) {
            return Err(JournalError::WriterAlreadyOpen(root.to_path_buf()));
        }
        Ok(Self {
            root: root.to_path_buf(),
        })
    }
}

impl Drop for WriterRegistration {
    fn drop(&mut self) {
        OPEN_WRITERS.lock().remove(&self.root);
    }
}

fn default_provider(config: &JournalConfig) -> Arc<dyn StorageProvider> {
    Arc::new(MappedStorageProvider::new(config.grow_size, config.sync_mode))
}

/// The single writer of a journal.
pub struct JournalWriter {
    manager: Mutex<PartitionManager>,
    _registration: WriterRegistration,
}

impl JournalWriter {
    /// Opens (creating if needed) the journal at `root` for writing.
    ///
    /// # Errors
    ///
    /// Returns [`JournalError::WriterAlreadyOpen`] if this process already has
    /// a writer for the same directory.
    pub fn open(
        root: impl AsRef<Path>,
        metadata: JournalMetadata,
        config: JournalConfig,
    ) -> Result<Self> {
        let provider = default_provider(&config);
        Self::open_with_provider(root, metadata, config, provider)
    }

    /// Opens the journal with a caller-supplied storage provider.
    pub fn open_with_provider(
        root: impl AsRef<Path>,
        metadata: JournalMetadata,
        config: JournalConfig,
        provider: Arc<dyn StorageProvider>,
    ) -> Result<Self> {
        fs::create_dir_all(root.as_ref())?;
        let root = root.as_ref().canonicalize()?;
        let registration = WriterRegistration::claim(&root)?;
        let manager = PartitionManager::open(
            &root,
            Arc::new(metadata),
            config,
            AccessMode::ReadWrite,
            provider,
        )?;
        Ok(Self {
            manager: Mutex::new(manager),
            _registration: registration,
        })
    }

    /// Starts a write transaction, waiting for any transaction in progress.
    ///
    /// The returned transaction holds the writer's lock until it is dropped.
    pub fn begin(&self) -> Result<WriteTx<'_>> {
        let mut manager = self.manager.lock();
        let tx = manager.read_tx_log()?;
        Ok(WriteTx { manager, tx })
    }

    /// Returns a copy of the last committed transaction.
    pub fn snapshot(&self) -> Result<TxContext> {
        self.manager.lock().read_tx_log()
    }

    /// Partition type in effect, which is the one recorded on disk.
    pub fn partition_type(&self) -> PartitionType {
        self.manager.lock().partition_type()
    }

    /// Statistics about the journal's partitions.
    pub fn stats(&self) -> PartitionManagerStats {
        self.manager.lock().stats()
    }
}

/// An open write transaction.
///
/// Rows appended here are invisible to readers until [`WriteTx::commit`]
/// succeeds. Dropping the transaction discards whatever was not committed.
pub struct WriteTx<'a> {
    manager: MutexGuard<'a, PartitionManager>,
    tx: TxContext,
}

impl WriteTx<'_> {
    /// Appends one row and returns its row id.
    ///
    /// # Errors
    ///
    /// Returns [`JournalError::SchemaMismatch`] for a row that does not fit
    /// the layout and [`JournalError::OutOfOrderAppend`] for a timestamp below
    /// its partition's last timestamp. Neither changes the transaction.
    pub fn append(&mut self, values: &[Value]) -> Result<RowId> {
        self.manager.append_row(&mut self.tx, values)
    }

    /// Commits every row appended so far.
    ///
    /// On failure nothing is published and the pending rows are kept, so the
    /// commit may be retried.
    pub fn commit(&mut self) -> Result<()> {
        self.manager.commit(&self.tx)?;
        self.tx = self.manager.read_tx_log()?;
        Ok(())
    }

    /// Transaction state including uncommitted rows.
    pub fn tx(&self) -> &TxContext {
        &self.tx
    }
}

impl Drop for WriteTx<'_> {
    fn drop(&mut self) {
        if self.tx.has_updates() {
            debug!("Discarding uncommitted write transaction");
        }
        self.manager.discard_pending();
    }
}

/// A read-only handle taking snapshots of a journal.
pub struct JournalReader {
    manager: RwLock<PartitionManager>,
}

impl JournalReader {
    /// Opens the existing journal at `root` for reading.
    pub fn open(
        root: impl AsRef<Path>,
        metadata: JournalMetadata,
        config: JournalConfig,
    ) -> Result<Self> {
        let provider = default_provider(&config);
        Self::open_with_provider(root, metadata, config, provider)
    }

    /// Opens the journal with a caller-supplied storage provider.
    pub fn open_with_provider(
        root: impl AsRef<Path>,
        metadata: JournalMetadata,
        config: JournalConfig,
        provider: Arc<dyn StorageProvider>,
    ) -> Result<Self> {
        let manager = PartitionManager::open(
            root,
            Arc::new(metadata),
            config,
            AccessMode::ReadOnly,
            provider,
        )?;
        Ok(Self {
            manager: RwLock::new(manager),
        })
    }

    /// Takes a snapshot of the latest published transaction.
    ///
    /// Earlier snapshots are unaffected.
    pub fn snapshot(&self) -> Result<TxContext> {
        self.manager.write().read_tx_log()
    }

    /// Reads the value of `column` in row `row_id` as of `tx`.
    ///
    /// # Errors
    ///
    /// Returns [`JournalError::RowOutOfRange`] if the row is not visible in
    /// `tx` and [`JournalError::LockTimeout`] if its partition stays locked by
    /// eviction.
    pub fn read_value(&self, tx: &TxContext, row_id: RowId, column: &str) -> Result<Value> {
        let manager = self.manager.read();
        let column = manager.metadata().column_index(column)?;
        manager.read_value(tx, row_id, column)
    }

    /// Returns the rows of `tx` whose symbol `column` equals `value`.
    pub fn rows_for_symbol(&self, tx: &TxContext, column: &str, value: &str) -> Result<Vec<RowId>> {
        let manager = self.manager.read();
        let column = manager.metadata().column_index(column)?;
        manager.rows_for_symbol(tx, column, value)
    }

    /// Closes the least recently used partitions beyond the configured limit.
    pub fn evict_idle(&self) -> Result<usize> {
        self.manager.read().evict_idle()
    }

    /// Holds a partition open against eviction until the guard is dropped.
    pub fn read_lock(&self, partition_id: u32) -> Result<ReadGuard> {
        self.manager.read().read_lock(partition_id)
    }

    /// Ids of the partitions known to this handle.
    pub fn partition_ids(&self) -> Vec<u32> {
        self.manager
            .read()
            .partitions()
            .iter()
            .map(|partition| partition.id())
            .collect()
    }

    /// Directory currently backing a partition.
    pub fn partition_dir(&self, partition_id: u32) -> Option<PathBuf> {
        self.manager
            .read()
            .partition(partition_id)
            .map(|partition| partition.dir().to_path_buf())
    }

    /// Partition type in effect, which is the one recorded on disk.
    pub fn partition_type(&self) -> PartitionType {
        self.manager.read().partition_type()
    }

    /// Statistics about the journal's partitions.
    pub fn stats(&self) -> PartitionManagerStats {
        self.manager.read().stats()
    }
}
