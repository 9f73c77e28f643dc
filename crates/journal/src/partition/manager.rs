//! Partition manager: routing, discovery and whole-transaction commit.
//!
//! The manager owns every [`Partition`] of a journal together with the shared
//! dictionary store and the transaction log.
//!
//! # Transactions
//!
//! [`PartitionManager::read_tx_log`] produces a [`TxContext`]. A read-write
//! manager that has already committed hands out a copy of its cached state;
//! otherwise the state is reconstructed from disk: new partition directories
//! are discovered, the current log record is read and, when it describes the
//! same number of partitions, trusted for the last partition and the
//! dictionaries. Everything else comes from file headers.
//!
//! [`PartitionManager::commit`] propagates every changed partition, oldest to
//! newest, then the dictionary store, and finally publishes a new log record.
//! A failing file support rolls back its own files; the manager then restores
//! every support it already committed in the same call.

use crate::commit::FileTxSupport;
use crate::config::JournalConfig;
use crate::error::{JournalError, Result};
use crate::partition::files::RawCell;
use crate::partition::lock::{PartitionLockTable, ReadGuard};
use crate::partition::naming::{self, PartitionInterval, PartitionType};
use crate::partition::{Partition, PartitionState};
use crate::row_id::{self, RowId, MAX_PARTITION_INDEX, SYMBOL_PARTITION_INDEX};
use crate::schema::{JournalMetadata, Value};
use crate::storage::StorageProvider;
use crate::symbol::{SymbolStore, SYMBOL_FILE_SUFFIX};
use crate::tx::{PartitionTxData, ReadTransactionContext, TransactionContext, TxContext};
use crate::txlog::{TxCommand, TxLog, TxRec};
use crate::Timestamp;
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::{debug, error, warn};

/// Whether a manager may change the journal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessMode {
    /// Snapshot and read only.
    ReadOnly,
    /// Single writer.
    ReadWrite,
}

/// Statistics for the partition manager.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct PartitionManagerStats {
    /// Number of known partitions.
    pub partitions: usize,
    /// Partitions with mapped files.
    pub open_partitions: usize,
    /// Start of the oldest partition.
    pub oldest_partition_ts: Option<Timestamp>,
    /// Start of the newest partition.
    pub newest_partition_ts: Option<Timestamp>,
}

/// Owns the partitions, dictionary store and transaction log of one journal.
pub struct PartitionManager {
    root: PathBuf,
    metadata: Arc<JournalMetadata>,
    config: JournalConfig,
    mode: AccessMode,
    provider: Arc<dyn StorageProvider>,
    tx_log: TxLog,
    symbols: Mutex<SymbolStore>,
    /// Partition `id` lives at index `id - 1`.
    partitions: Vec<Partition>,
    locks: Arc<PartitionLockTable>,
    last_tx: Option<TxContext>,
    access_clock: AtomicU64,
}

impl PartitionManager {
    /// Opens the journal at `root`.
    ///
    /// A read-write manager creates the root and records the partition type on
    /// first use. If the journal already records a different partition type,
    /// the recorded one wins.
    pub fn open(
        root: impl AsRef<Path>,
        metadata: Arc<JournalMetadata>,
        mut config: JournalConfig,
        mode: AccessMode,
        provider: Arc<dyn StorageProvider>,
    ) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        if mode == AccessMode::ReadWrite {
            fs::create_dir_all(&root)?;
        }

        match naming::read_partition_type(&root)? {
            Some(on_disk) if on_disk != config.partition_type => {
                warn!(
                    "Journal {} is partitioned by {}, ignoring configured {}",
                    root.display(),
                    on_disk,
                    config.partition_type
                );
                config.partition_type = on_disk;
            }
            Some(_) => {}
            None if mode == AccessMode::ReadWrite => {
                naming::write_partition_type(&root, config.partition_type)?;
            }
            None => {}
        }

        let tx_log = TxLog::open(&root, provider.as_ref())?;
        let symbols = SymbolStore::new(&root, &metadata, Arc::clone(&provider));

        let mut manager = Self {
            root,
            metadata,
            config,
            mode,
            provider,
            tx_log,
            symbols: Mutex::new(symbols),
            partitions: Vec::new(),
            locks: PartitionLockTable::new(),
            last_tx: None,
            access_clock: AtomicU64::new(0),
        };
        manager.read_tx_log()?;
        debug!(
            "Opened journal {} ({:?}, {} partitions)",
            manager.root.display(),
            manager.mode,
            manager.partitions.len()
        );
        Ok(manager)
    }

    /// Journal root directory.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Effective configuration, including an overridden partition type.
    pub fn config(&self) -> &JournalConfig {
        &self.config
    }

    /// Effective partition type.
    pub fn partition_type(&self) -> PartitionType {
        self.config.partition_type
    }

    /// Column layout.
    pub fn metadata(&self) -> &Arc<JournalMetadata> {
        &self.metadata
    }

    /// Access mode.
    pub fn mode(&self) -> AccessMode {
        self.mode
    }

    /// Known partitions, oldest first.
    pub fn partitions(&self) -> &[Partition] {
        &self.partitions
    }

    /// Returns a partition by id.
    pub fn partition(&self, partition_id: u32) -> Option<&Partition> {
        if partition_id == SYMBOL_PARTITION_INDEX {
            return None;
        }
        self.partitions.get(partition_id as usize - 1)
    }

    /// Lock table guarding partition eviction.
    pub fn locks(&self) -> &Arc<PartitionLockTable> {
        &self.locks
    }

    /// Acquires the read lock of a partition within the configured timeout.
    pub fn read_lock(&self, partition_id: u32) -> Result<ReadGuard> {
        self.locks
            .acquire_read(partition_id, self.config.lock_timeout)
    }

    /// Returns statistics about the known partitions.
    pub fn stats(&self) -> PartitionManagerStats {
        PartitionManagerStats {
            partitions: self.partitions.len(),
            open_partitions: self
                .partitions
                .iter()
                .filter(|p| p.state() == PartitionState::Open)
                .count(),
            oldest_partition_ts: self.partitions.first().map(|p| p.interval().start),
            newest_partition_ts: self.partitions.last().map(|p| p.interval().start),
        }
    }

    /// Returns the current transaction.
    ///
    /// A read-write manager returns a copy of its last committed state without
    /// touching disk. Otherwise the state is rebuilt as described in the module
    /// documentation.
    pub fn read_tx_log(&mut self) -> Result<TxContext> {
        if self.mode == AccessMode::ReadWrite {
            if let Some(tx) = &self.last_tx {
                return Ok(tx.clone());
            }
        }

        self.discover()?;
        let current = self.tx_log.read_current()?;
        let partition_count = self.partitions.len();
        let trusted = current.as_ref().map(|(_, rec)| rec).filter(|rec| {
            row_id::to_partition_index(rec.journal_max_row_id) as usize == partition_count
        });
        if let (Some((address, rec)), None) = (&current, trusted) {
            debug!(
                "Record at {:#x} describes partition {}, journal has {}; reading file headers",
                address,
                row_id::to_partition_index(rec.journal_max_row_id),
                partition_count
            );
        }

        let symbols = self.symbols.get_mut().read_tx_log(trusted)?;
        let prev_tx_address = current.as_ref().map_or(0, |(address, _)| *address);
        let mut tx = TxContext::new(symbols, prev_tx_address);
        for (index, partition) in self.partitions.iter_mut().enumerate() {
            let last = index + 1 == partition_count;
            let state = partition
                .files_mut()
                .read_tx_log(if last { trusted } else { None })?;
            tx.add_partition(partition.id(), state);
        }

        if self.mode == AccessMode::ReadWrite {
            self.last_tx = Some(tx.clone());
        }
        Ok(tx)
    }

    /// Scans the root for partition directories.
    ///
    /// Unknown ranges newer than every known partition become new partitions,
    /// and a known range whose directory was superseded by a higher version is
    /// moved to it. Directories that do not parse are skipped.
    fn discover(&mut self) -> Result<()> {
        let partition_type = self.config.partition_type;
        let mut found: BTreeMap<Timestamp, (PartitionInterval, u32, String)> = BTreeMap::new();

        for entry in fs::read_dir(&self.root)? {
            let entry = entry?;
            if !entry.file_type()?.is_dir() {
                continue;
            }
            let name = entry.file_name().to_string_lossy().to_string();
            let Some(parsed) = naming::parse_dir_name(&name, partition_type) else {
                warn!(
                    "Skipping directory {} in journal {}: not a {} partition",
                    name,
                    self.root.display(),
                    partition_type
                );
                continue;
            };
            let newer = found
                .get(&parsed.interval.start)
                .map_or(true, |(_, version, _)| parsed.version > *version);
            if newer {
                found.insert(parsed.interval.start, (parsed.interval, parsed.version, name));
            }
        }

        for (start, (interval, version, name)) in found {
            if let Some(partition) = self
                .partitions
                .iter_mut()
                .find(|p| p.interval().start == start)
            {
                if version > partition.version() {
                    debug!(
                        "Partition {} moves to superseding directory {}",
                        partition.id(),
                        name
                    );
                    partition.relocate(version, self.root.join(&name));
                }
                continue;
            }

            let newest = self.partitions.last().map(|p| p.interval().start);
            if newest.is_some_and(|newest| start < newest) {
                warn!(
                    "Skipping partition directory {}: older than the newest known partition",
                    name
                );
                continue;
            }
            let id = self.next_partition_id()?;
            debug!("Discovered partition {} in {}", id, name);
            self.partitions.push(Partition::new(
                id,
                interval,
                version,
                self.root.join(&name),
                Arc::clone(&self.metadata),
                Arc::clone(&self.provider),
            ));
        }
        Ok(())
    }

    fn next_partition_id(&self) -> Result<u32> {
        let id = self.partitions.len() as u32 + 1;
        if id > MAX_PARTITION_INDEX {
            return Err(JournalError::CorruptFile {
                path: self.root.clone(),
                reason: format!("partition limit of {} reached", MAX_PARTITION_INDEX),
            });
        }
        Ok(id)
    }

    /// Adds state for partitions the manager knows but `tx` does not, such as
    /// a partition created by a transaction that was later discarded.
    fn track_partitions(&mut self, tx: &mut TxContext, up_to: u32) -> Result<()> {
        while (tx.partition_count() as u32) <= up_to {
            let id = tx.partition_count() as u32;
            if id == SYMBOL_PARTITION_INDEX {
                return Err(missing_state(SYMBOL_PARTITION_INDEX));
            }
            let Some(partition) = self.partitions.get_mut(id as usize - 1) else {
                break;
            };
            let state = partition.files_mut().read_tx_log(None)?;
            tx.add_partition(id, state);
        }
        Ok(())
    }

    /// Selects (or creates) the partition receiving a row stamped `timestamp`.
    ///
    /// # Errors
    ///
    /// Returns [`JournalError::OutOfOrderAppend`] if the timestamp is below the
    /// target partition's last timestamp in `tx`, or older than every known
    /// partition range it does not fall into.
    pub fn get_append_partition(&mut self, timestamp: Timestamp, tx: &mut TxContext) -> Result<u32> {
        if self.mode != AccessMode::ReadWrite {
            return Err(JournalError::NotOpenForWrite);
        }
        self.track_partitions(tx, self.partitions.len() as u32)?;

        for partition in self.partitions.iter().rev() {
            if partition.interval().contains(timestamp) {
                let last_timestamp = tx
                    .partition_tx(partition.id())
                    .map_or(Timestamp::MIN, |state| state.last_timestamp);
                if timestamp < last_timestamp {
                    return Err(JournalError::OutOfOrderAppend {
                        partition_id: partition.id(),
                        timestamp,
                        last_timestamp,
                    });
                }
                return Ok(partition.id());
            }
        }

        if let Some(newest) = self.partitions.last() {
            if timestamp < newest.interval().start {
                return Err(JournalError::OutOfOrderAppend {
                    partition_id: newest.id(),
                    timestamp,
                    last_timestamp: tx
                        .partition_tx(newest.id())
                        .map_or(newest.interval().start, |state| state.last_timestamp),
                });
            }
        }

        self.create_partition(timestamp, tx)
    }

    fn create_partition(&mut self, timestamp: Timestamp, tx: &mut TxContext) -> Result<u32> {
        let id = self.next_partition_id()?;
        let interval = PartitionInterval::for_timestamp(timestamp, self.config.partition_type);
        let dir = self.root.join(interval.dir_name());
        fs::create_dir_all(&dir)?;

        let mut partition = Partition::new(
            id,
            interval,
            0,
            dir,
            Arc::clone(&self.metadata),
            Arc::clone(&self.provider),
        );
        let state = partition.files_mut().read_tx_log(None)?;
        debug!(
            "Created partition {} at {} for timestamp {}",
            id,
            partition.dir().display(),
            timestamp
        );
        self.partitions.push(partition);
        tx.add_partition(id, state);
        Ok(id)
    }

    /// Appends one row to `tx` and returns its row id.
    ///
    /// The row is not durable, and not visible to readers, until `tx` is
    /// committed. A rejected row leaves every partition's row count unchanged.
    pub fn append_row(&mut self, tx: &mut TxContext, values: &[Value]) -> Result<RowId> {
        if self.mode != AccessMode::ReadWrite {
            return Err(JournalError::NotOpenForWrite);
        }
        let timestamp = self.metadata.validate_row(values)?;
        let partition_id = self.get_append_partition(timestamp, tx)?;

        // Keys added for a rejected row must not reach the next commit.
        let symbols_before = state_mut(tx, SYMBOL_PARTITION_INDEX)?.clone();
        match self.write_row(tx, partition_id, values, timestamp) {
            Ok(row_id) => Ok(row_id),
            Err(err) => {
                self.symbols.get_mut().discard_pending(&symbols_before);
                *state_mut(tx, SYMBOL_PARTITION_INDEX)? = symbols_before;
                Err(err)
            }
        }
    }

    fn write_row(
        &mut self,
        tx: &mut TxContext,
        partition_id: u32,
        values: &[Value],
        timestamp: Timestamp,
    ) -> Result<RowId> {
        let mut keys = Vec::with_capacity(self.metadata.symbol_columns().len());
        {
            let symbols = self.symbols.get_mut();
            let state = state_mut(tx, SYMBOL_PARTITION_INDEX)?;
            for (ordinal, &column) in self.metadata.symbol_columns().iter().enumerate() {
                if let Value::Symbol(value) = &values[column] {
                    keys.push(symbols.key_for(ordinal, value, state)?);
                }
            }
        }

        let tick = self.access_clock.fetch_add(1, Ordering::Relaxed) + 1;
        let partition = &mut self.partitions[partition_id as usize - 1];
        partition.touch(tick);
        let state = state_mut(tx, partition_id)?;
        partition
            .files_mut()
            .append_row(state, values, &keys, timestamp)?;
        Ok(row_id::to_row_id(partition_id, state.next_row_id - 1))
    }

    /// Drops dictionary entries that were never committed.
    pub fn discard_pending(&mut self) {
        if let Some(committed) = self
            .last_tx
            .as_ref()
            .and_then(|tx| tx.partition_tx(SYMBOL_PARTITION_INDEX))
        {
            self.symbols.get_mut().discard_pending(committed);
        }
    }

    /// Makes `tx` durable and publishes it.
    ///
    /// # Errors
    ///
    /// Returns [`JournalError::NotOpenForWrite`] on a read-only manager and
    /// [`JournalError::CommitFailed`] if a file support fails; in that case
    /// every support already committed is restored and `tx` may be committed
    /// again.
    pub fn commit(&mut self, tx: &TxContext) -> Result<()> {
        if self.mode != AccessMode::ReadWrite {
            return Err(JournalError::NotOpenForWrite);
        }
        let prior = match &self.last_tx {
            Some(prior) => prior.clone(),
            None => self.read_tx_log()?,
        };

        let mut pending: Vec<u32> = (1..tx.partition_count() as u32)
            .filter(|&id| tx.is_partition_updated(id, &prior))
            .collect();
        if tx.is_partition_updated(SYMBOL_PARTITION_INDEX, &prior) {
            pending.push(SYMBOL_PARTITION_INDEX);
        }
        if pending.is_empty() {
            debug!("Nothing to commit");
            return Ok(());
        }

        let mut committed = Vec::with_capacity(pending.len());
        for &id in &pending {
            let (new_state, old_state) = self.states(tx, &prior, id)?;
            match self.support(id).commit(&new_state, &old_state) {
                Ok(()) => committed.push(id),
                Err(err) => {
                    self.rollback(&committed, tx, &prior);
                    return Err(JournalError::commit_failed(id, err));
                }
            }
        }

        let mut rec = TxRec {
            command: TxCommand::Normal,
            timestamp: wall_clock_nanos(),
            ..TxRec::default()
        };
        let last_id = tx.data_partition_count();
        if let (Some(partition), Some(state)) = (self.partition(last_id), tx.partition_tx(last_id)) {
            partition.files().set_tx_rec(state, &mut rec);
        }
        if let Some(state) = tx.partition_tx(SYMBOL_PARTITION_INDEX) {
            self.symbols.get_mut().set_tx_rec(state, &mut rec);
        }

        let address = match self.tx_log.create(&mut rec) {
            Ok(address) => address,
            Err(err) => {
                self.rollback(&committed, tx, &prior);
                return Err(err);
            }
        };

        let mut published = tx.published();
        published.set_prev_tx_address(address);
        self.last_tx = Some(published);
        debug!(
            "Committed {} supports, record {:#x}, max row id {:#x}",
            committed.len(),
            address,
            rec.journal_max_row_id
        );
        Ok(())
    }

    fn states(
        &self,
        tx: &TxContext,
        prior: &TxContext,
        id: u32,
    ) -> Result<(PartitionTxData, PartitionTxData)> {
        let new_state = tx
            .partition_tx(id)
            .cloned()
            .ok_or_else(|| missing_state(id))?;
        let old_state = prior
            .partition_tx(id)
            .cloned()
            .unwrap_or_else(|| PartitionTxData::new(new_state.append_offset.len()));
        Ok((new_state, old_state))
    }

    fn support(&mut self, id: u32) -> &mut dyn FileTxSupport {
        if id == SYMBOL_PARTITION_INDEX {
            self.symbols.get_mut()
        } else {
            self.partitions[id as usize - 1].files_mut()
        }
    }

    fn rollback(&mut self, committed: &[u32], tx: &TxContext, prior: &TxContext) {
        for &id in committed.iter().rev() {
            let (new_state, old_state) = match self.states(tx, prior, id) {
                Ok(states) => states,
                Err(err) => {
                    error!("Cannot roll back partition {}: {:?}", id, err);
                    continue;
                }
            };
            match self.support(id).commit(&old_state, &new_state) {
                Ok(()) => debug!("Rolled back partition {}", id),
                Err(err) => error!("Failed to roll back partition {}: {:?}", id, err),
            }
        }
    }

    /// Reads one value of a row visible in `tx`.
    pub fn read_value(&self, tx: &TxContext, row_id: RowId, column: usize) -> Result<Value> {
        if !tx.contains_row(row_id) || column >= self.metadata.columns().len() {
            return Err(JournalError::RowOutOfRange { row_id });
        }
        let partition_id = row_id::to_partition_index(row_id);
        let partition = self
            .partition(partition_id)
            .ok_or(JournalError::RowOutOfRange { row_id })?;

        let cell = {
            let _guard = self.read_lock(partition_id)?;
            self.touch(partition);
            let mut files = partition.files();
            files.read_cell(column, row_id::to_local_row_id(row_id))?
        };

        Ok(match cell {
            RawCell::Timestamp(ts) => Value::Timestamp(ts),
            RawCell::Long(v) => Value::Long(v),
            RawCell::Double(v) => Value::Double(v),
            RawCell::Symbol(key) => Value::Symbol(self.resolve_symbol(tx, column, key)?.to_string()),
        })
    }

    fn resolve_symbol(&self, tx: &TxContext, column: usize, key: i32) -> Result<Arc<str>> {
        if let Some(value) = tx.read_cache().symbol(column, key) {
            return Ok(value);
        }
        let ordinal = self
            .metadata
            .symbol_ordinal(column)
            .ok_or_else(|| JournalError::UnknownColumn(self.metadata.columns()[column].name.clone()))?;
        let state = tx
            .partition_tx(SYMBOL_PARTITION_INDEX)
            .ok_or_else(|| missing_state(SYMBOL_PARTITION_INDEX))?;
        match self.symbols.lock().resolve(ordinal, key, state)? {
            Some(value) => {
                tx.read_cache().insert_symbol(column, key, Arc::clone(&value));
                Ok(value)
            }
            None => Err(JournalError::corrupt_file(
                self.symbol_file(column),
                format!(
                    "key {} not in dictionary of {} entries",
                    key, state.symbol_data[ordinal].key_block_size
                ),
            )),
        }
    }

    fn symbol_file(&self, column: usize) -> PathBuf {
        let name = &self.metadata.columns()[column].name;
        self.root.join(format!("{}{}", name, SYMBOL_FILE_SUFFIX))
    }

    /// Returns every row of `tx` whose symbol `column` equals `value`, in row id order.
    pub fn rows_for_symbol(&self, tx: &TxContext, column: usize, value: &str) -> Result<Vec<RowId>> {
        let Some(ordinal) = self.metadata.symbol_ordinal(column) else {
            return Err(JournalError::UnknownColumn(
                self.metadata
                    .columns()
                    .get(column)
                    .map_or_else(|| column.to_string(), |c| c.name.clone()),
            ));
        };
        let Some(index_file) = self.metadata.index_file(column) else {
            return Ok(Vec::new());
        };
        let symbols_state = tx
            .partition_tx(SYMBOL_PARTITION_INDEX)
            .ok_or_else(|| missing_state(SYMBOL_PARTITION_INDEX))?;
        let Some(key) = self.symbols.lock().lookup(ordinal, value, symbols_state)? else {
            return Ok(Vec::new());
        };

        let mut rows = Vec::new();
        for partition_id in 1..=tx.data_partition_count() {
            let (Some(partition), Some(state)) =
                (self.partition(partition_id), tx.partition_tx(partition_id))
            else {
                continue;
            };
            if state.next_row_id == 0 {
                continue;
            }
            let _guard = self.read_lock(partition_id)?;
            self.touch(partition);
            let local_rows = partition.files().rows_for_key(
                column,
                key,
                state.next_row_id,
                state.symbol_data[index_file].key_block_size,
                tx.read_cache(),
            )?;
            rows.extend(
                local_rows
                    .into_iter()
                    .map(|local| row_id::to_row_id(partition_id, local)),
            );
        }
        Ok(rows)
    }

    /// Unmaps the least recently used partitions beyond `max_open_partitions`.
    ///
    /// Each partition is closed under its write lock, so a partition in use by
    /// a reader delays eviction up to the lock timeout.
    ///
    /// Returns the number of partitions closed.
    pub fn evict_idle(&self) -> Result<usize> {
        let mut open: Vec<&Partition> = self
            .partitions
            .iter()
            .filter(|p| p.state() == PartitionState::Open)
            .collect();
        if open.len() <= self.config.max_open_partitions {
            return Ok(0);
        }
        open.sort_by_key(|p| p.last_access());
        let excess = open.len() - self.config.max_open_partitions;

        let mut closed = 0;
        for partition in open.into_iter().take(excess) {
            let _guard = self
                .locks
                .acquire_write(partition.id(), self.config.lock_timeout)?;
            partition.close();
            closed += 1;
        }
        debug!("Evicted {} idle partitions", closed);
        Ok(closed)
    }

    fn touch(&self, partition: &Partition) {
        partition.touch(self.access_clock.fetch_add(1, Ordering::Relaxed) + 1);
    }
}

fn state_mut(tx: &mut TxContext, id: u32) -> Result<&mut PartitionTxData> {
    tx.partition_tx_mut(id).ok_or_else(|| missing_state(id))
}

fn missing_state(id: u32) -> JournalError {
    JournalError::CorruptTxRecord(format!("transaction has no state for partition {}", id))
}

fn wall_clock_nanos() -> Timestamp {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_nanos() as Timestamp)
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SyncMode;
    use crate::storage::MappedStorageProvider;
    use tempfile::TempDir;

    const DAY: i64 = naming::NANOS_PER_DAY;

    fn metadata() -> Arc<JournalMetadata> {
        Arc::new(
            JournalMetadata::builder("ts")
                .symbol("sym")
                .long("qty")
                .build()
                .unwrap(),
        )
    }

    fn open(root: &Path, mode: AccessMode) -> PartitionManager {
        let config = JournalConfig::default()
            .with_partition_type(PartitionType::Day)
            .with_sync_mode(SyncMode::None);
        let provider = Arc::new(MappedStorageProvider::new(4096, SyncMode::None));
        PartitionManager::open(root, metadata(), config, mode, provider).unwrap()
    }

    fn row(ts: i64, sym: &str, qty: i64) -> Vec<Value> {
        vec![
            Value::Timestamp(ts),
            Value::Symbol(sym.to_string()),
            Value::Long(qty),
        ]
    }

    #[test]
    fn test_partition_routing() {
        let temp_dir = TempDir::new().unwrap();
        let mut manager = open(temp_dir.path(), AccessMode::ReadWrite);
        let mut tx = manager.read_tx_log().unwrap();

        assert_eq!(manager.get_append_partition(10, &mut tx).unwrap(), 1);
        assert_eq!(manager.get_append_partition(DAY - 1, &mut tx).unwrap(), 1);
        assert_eq!(manager.get_append_partition(DAY, &mut tx).unwrap(), 2);
        assert_eq!(manager.get_append_partition(5 * DAY, &mut tx).unwrap(), 3);
        assert_eq!(tx.partition_count(), 4);

        let dirs: Vec<_> = manager
            .partitions()
            .iter()
            .map(|p| p.dir().file_name().unwrap().to_string_lossy().to_string())
            .collect();
        assert_eq!(dirs, vec!["1970-01-01", "1970-01-02", "1970-01-06"]);

        // A gap between known partitions cannot receive rows.
        assert!(matches!(
            manager.get_append_partition(3 * DAY, &mut tx),
            Err(JournalError::OutOfOrderAppend { partition_id: 3, .. })
        ));
    }

    #[test]
    fn test_out_of_order_append_keeps_row_count() {
        let temp_dir = TempDir::new().unwrap();
        let mut manager = open(temp_dir.path(), AccessMode::ReadWrite);
        let mut tx = manager.read_tx_log().unwrap();

        manager.append_row(&mut tx, &row(200, "a", 1)).unwrap();
        let err = manager.append_row(&mut tx, &row(100, "b", 2)).unwrap_err();
        match err {
            JournalError::OutOfOrderAppend {
                timestamp,
                last_timestamp,
                ..
            } => {
                assert_eq!(timestamp, 100);
                assert_eq!(last_timestamp, 200);
            }
            other => panic!("expected OutOfOrderAppend, got {:?}", other),
        }
        assert_eq!(tx.row_count(1), 1);
        manager.append_row(&mut tx, &row(200, "b", 3)).unwrap();
        assert_eq!(tx.row_count(1), 2);
    }

    #[test]
    fn test_commit_publishes_record() {
        let temp_dir = TempDir::new().unwrap();
        let mut manager = open(temp_dir.path(), AccessMode::ReadWrite);
        let mut tx = manager.read_tx_log().unwrap();
        for i in 0..5 {
            manager.append_row(&mut tx, &row(i, "a", i)).unwrap();
        }
        manager.append_row(&mut tx, &row(DAY + 1, "b", 9)).unwrap();
        manager.commit(&tx).unwrap();

        let (_, rec) = manager.tx_log.read_current().unwrap().unwrap();
        assert_eq!(rec.journal_max_row_id, row_id::to_row_id(2, 1));
        assert_eq!(rec.last_partition_timestamp, DAY + 1);
        assert_eq!(rec.symbol_table_sizes, vec![2]);
        assert_eq!(rec.index_pointers, vec![16]);

        let mut reader = open(temp_dir.path(), AccessMode::ReadOnly);
        let snapshot = reader.read_tx_log().unwrap();
        assert_eq!(snapshot.row_count(1), 5);
        assert_eq!(snapshot.row_count(2), 1);
        assert_eq!(
            reader.read_value(&snapshot, row_id::to_row_id(2, 0), 1).unwrap(),
            Value::Symbol("b".to_string())
        );
    }

    #[test]
    fn test_empty_commit_does_no_io() {
        let temp_dir = TempDir::new().unwrap();
        let mut manager = open(temp_dir.path(), AccessMode::ReadWrite);
        let tx = manager.read_tx_log().unwrap();
        manager.commit(&tx).unwrap();
        assert!(manager.tx_log.is_empty().unwrap());
    }

    #[test]
    fn test_read_only_manager_refuses_writes() {
        let temp_dir = TempDir::new().unwrap();
        drop(open(temp_dir.path(), AccessMode::ReadWrite));
        let mut reader = open(temp_dir.path(), AccessMode::ReadOnly);
        let mut tx = reader.read_tx_log().unwrap();
        assert!(matches!(
            reader.append_row(&mut tx, &row(1, "a", 1)),
            Err(JournalError::NotOpenForWrite)
        ));
        assert!(matches!(reader.commit(&tx), Err(JournalError::NotOpenForWrite)));
    }

    #[test]
    fn test_writer_fast_path_shares_state() {
        let temp_dir = TempDir::new().unwrap();
        let mut manager = open(temp_dir.path(), AccessMode::ReadWrite);
        let mut tx = manager.read_tx_log().unwrap();
        manager.append_row(&mut tx, &row(1, "a", 1)).unwrap();
        manager.commit(&tx).unwrap();

        let first = manager.read_tx_log().unwrap();
        let second = manager.read_tx_log().unwrap();
        assert!(first.shares_partition(1, &second));
        assert!(!first.has_updates());
        assert_ne!(first.prev_tx_address(), 0);
    }

    #[test]
    fn test_discarded_partition_is_tracked_again() {
        let temp_dir = TempDir::new().unwrap();
        let mut manager = open(temp_dir.path(), AccessMode::ReadWrite);

        let mut dropped = manager.read_tx_log().unwrap();
        manager.append_row(&mut dropped, &row(1, "a", 1)).unwrap();
        drop(dropped);
        manager.discard_pending();

        let mut tx = manager.read_tx_log().unwrap();
        assert_eq!(tx.partition_count(), 1);
        let row = manager.append_row(&mut tx, &row(2, "b", 2)).unwrap();
        assert_eq!(row, row_id::to_row_id(1, 0));
        manager.commit(&tx).unwrap();

        let mut reader = open(temp_dir.path(), AccessMode::ReadOnly);
        let snapshot = reader.read_tx_log().unwrap();
        assert_eq!(
            reader.read_value(&snapshot, row, 1).unwrap(),
            Value::Symbol("b".to_string())
        );
        assert!(reader.rows_for_symbol(&snapshot, 1, "a").unwrap().is_empty());
    }

    #[test]
    fn test_skips_unparseable_directories() {
        let temp_dir = TempDir::new().unwrap();
        fs::create_dir_all(temp_dir.path().join("2024-13-01")).unwrap();
        fs::create_dir_all(temp_dir.path().join("scratch")).unwrap();
        fs::create_dir_all(temp_dir.path().join("2024-01-02.x")).unwrap();
        fs::create_dir_all(temp_dir.path().join("2024-01-02")).unwrap();

        let manager = open(temp_dir.path(), AccessMode::ReadWrite);
        assert_eq!(manager.partitions().len(), 1);
        assert_eq!(manager.partitions()[0].interval().dir_name(), "2024-01-02");
    }

    #[test]
    fn test_stats() {
        let temp_dir = TempDir::new().unwrap();
        let mut manager = open(temp_dir.path(), AccessMode::ReadWrite);
        assert_eq!(manager.stats(), PartitionManagerStats::default());

        let mut tx = manager.read_tx_log().unwrap();
        manager.append_row(&mut tx, &row(1, "a", 1)).unwrap();
        manager.append_row(&mut tx, &row(2 * DAY, "a", 1)).unwrap();
        let stats = manager.stats();
        assert_eq!(stats.partitions, 2);
        assert_eq!(stats.open_partitions, 2);
        assert_eq!(stats.oldest_partition_ts, Some(0));
        assert_eq!(stats.newest_partition_ts, Some(2 * DAY));
    }
}
