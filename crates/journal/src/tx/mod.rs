//! Transaction snapshots.
//!
//! A [`TxContext`] is the transaction: one [`PartitionTxData`] per known
//! partition describing the row count and durable file offsets at the moment the
//! snapshot was taken. Index 0 holds the dictionary store, data partitions
//! follow at their partition id.
//!
//! Entries are shared behind `Arc`s. Cloning a context is cheap, and mutating a
//! partition through [`TransactionContext::partition_tx_mut`] copies only that
//! entry, so a context handed to a reader never changes underneath it.

mod cache;

pub use cache::ReadCache;

use crate::row_id::{self, RowId};
use crate::Timestamp;
use std::sync::Arc;

/// Dictionary posting-list bookkeeping of one index file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SymbolTxData {
    /// True once the key block has been written.
    pub key_block_created: bool,
    /// Logical offset of the key block.
    pub key_block_offset: u64,
    /// Size of the key block in bytes.
    pub key_block_size: u64,
}

/// Write frontier of one partition.
#[derive(Debug, Clone, PartialEq)]
pub struct PartitionTxData {
    /// Number of rows (one past the last local row id).
    pub next_row_id: u64,
    /// Timestamp of the last row, `Timestamp::MIN` when empty.
    pub last_timestamp: Timestamp,
    /// Durable write cursor per file.
    pub append_offset: Vec<u64>,
    /// Key block state per file; default for files without one.
    pub symbol_data: Vec<SymbolTxData>,
    /// Set when the transaction changed this partition.
    pub is_partition_updated: bool,
    /// Set when rows were appended in this transaction.
    pub is_appended: bool,
}

impl PartitionTxData {
    /// Creates an empty frontier for `file_count` files.
    pub fn new(file_count: usize) -> Self {
        Self {
            next_row_id: 0,
            last_timestamp: Timestamp::MIN,
            append_offset: vec![0; file_count],
            symbol_data: vec![SymbolTxData::default(); file_count],
            is_partition_updated: false,
            is_appended: false,
        }
    }

    /// Returns true if any durable offset differs from `other`.
    pub fn offsets_differ(&self, other: &PartitionTxData) -> bool {
        self.append_offset != other.append_offset || self.symbol_data != other.symbol_data
    }

    fn clear_flags(&mut self) {
        self.is_partition_updated = false;
        self.is_appended = false;
    }
}

/// Read-only view of a transaction, as consumed by query code.
pub trait ReadTransactionContext {
    /// Returns the row count of a partition, 0 for unknown partitions.
    fn row_count(&self, partition_id: u32) -> u64;

    /// Returns the state of a partition (0 is the dictionary store).
    fn partition_tx(&self, partition_id: u32) -> Option<&PartitionTxData>;

    /// Returns the number of entries, including the dictionary store.
    fn partition_count(&self) -> usize;

    /// Returns the scratch cache used by value reads.
    fn read_cache(&self) -> &ReadCache;
}

/// Write-side view of a transaction.
pub trait TransactionContext: ReadTransactionContext {
    /// Adds the state of a newly created or discovered partition.
    ///
    /// Partition ids are sequential; `partition_id` must equal the current count.
    fn add_partition(&mut self, partition_id: u32, state: PartitionTxData);

    /// Returns a mutable reference to a partition's state, copying it first if
    /// it is shared with another context.
    fn partition_tx_mut(&mut self, partition_id: u32) -> Option<&mut PartitionTxData>;

    /// Returns the address of the log record this transaction builds on.
    fn prev_tx_address(&self) -> u64;

    /// Returns true if `partition_id` differs from the same partition in `prior`.
    fn is_partition_updated(&self, partition_id: u32, prior: &dyn ReadTransactionContext)
        -> bool;
}

/// A transaction snapshot.
#[derive(Debug, Default)]
pub struct TxContext {
    partitions: Vec<Arc<PartitionTxData>>,
    prev_tx_address: u64,
    read_cache: ReadCache,
}

impl Clone for TxContext {
    fn clone(&self) -> Self {
        Self {
            partitions: self.partitions.clone(),
            prev_tx_address: self.prev_tx_address,
            read_cache: ReadCache::default(),
        }
    }
}

impl TxContext {
    /// Creates a context holding only the dictionary store state.
    pub fn new(symbols: PartitionTxData, prev_tx_address: u64) -> Self {
        Self {
            partitions: vec![Arc::new(symbols)],
            prev_tx_address,
            read_cache: ReadCache::default(),
        }
    }

    /// Returns the number of data partitions.
    pub fn data_partition_count(&self) -> u32 {
        self.partitions.len().saturating_sub(1) as u32
    }

    /// Returns the row count summed over all data partitions.
    pub fn total_rows(&self) -> u64 {
        self.partitions
            .iter()
            .skip(1)
            .map(|partition| partition.next_row_id)
            .sum()
    }

    /// Returns the row id one past the last row of the newest partition.
    pub fn max_row_id(&self) -> RowId {
        let last = self.data_partition_count();
        if last == 0 {
            return 0;
        }
        row_id::to_row_id(last, self.row_count(last))
    }

    /// Returns true if `row_id` is visible in this transaction.
    pub fn contains_row(&self, row_id: RowId) -> bool {
        let partition_id = row_id::to_partition_index(row_id);
        partition_id > row_id::SYMBOL_PARTITION_INDEX
            && row_id::to_local_row_id(row_id) < self.row_count(partition_id)
    }

    /// Returns true if any partition has pending changes.
    pub fn has_updates(&self) -> bool {
        self.partitions.iter().any(|p| p.is_partition_updated)
    }

    pub(crate) fn set_prev_tx_address(&mut self, address: u64) {
        self.prev_tx_address = address;
    }

    /// Returns a copy with every dirty flag cleared, sharing unchanged entries.
    pub(crate) fn published(&self) -> TxContext {
        let mut published = self.clone();
        for entry in &mut published.partitions {
            if entry.is_partition_updated || entry.is_appended {
                Arc::make_mut(entry).clear_flags();
            }
        }
        published
    }

    pub(crate) fn shares_partition(&self, partition_id: u32, other: &TxContext) -> bool {
        match (
            self.partitions.get(partition_id as usize),
            other.partitions.get(partition_id as usize),
        ) {
            (Some(a), Some(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }
}

impl ReadTransactionContext for TxContext {
    fn row_count(&self, partition_id: u32) -> u64 {
        self.partitions
            .get(partition_id as usize)
            .map_or(0, |partition| partition.next_row_id)
    }

    fn partition_tx(&self, partition_id: u32) -> Option<&PartitionTxData> {
        self.partitions.get(partition_id as usize).map(Arc::as_ref)
    }

    fn partition_count(&self) -> usize {
        self.partitions.len()
    }

    fn read_cache(&self) -> &ReadCache {
        &self.read_cache
    }
}

impl TransactionContext for TxContext {
    fn add_partition(&mut self, partition_id: u32, state: PartitionTxData) {
        debug_assert_eq!(partition_id as usize, self.partitions.len());
        self.partitions.push(Arc::new(state));
    }

    fn partition_tx_mut(&mut self, partition_id: u32) -> Option<&mut PartitionTxData> {
        self.partitions
            .get_mut(partition_id as usize)
            .map(Arc::make_mut)
    }

    fn prev_tx_address(&self) -> u64 {
        self.prev_tx_address
    }

    fn is_partition_updated(
        &self,
        partition_id: u32,
        prior: &dyn ReadTransactionContext,
    ) -> bool {
        match (self.partition_tx(partition_id), prior.partition_tx(partition_id)) {
            (Some(current), Some(previous)) => current.offsets_differ(previous),
            (Some(_), None) => true,
            _ => false,
        }
    }
}
