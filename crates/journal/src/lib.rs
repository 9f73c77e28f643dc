//! Alopex Journal - append-only columnar time series storage
//!
//! This crate provides a single-writer, multi-reader journal stored as
//! memory-mapped column files in date-named partition directories.
//!
//! # Components
//!
//! - [`TxLog`]: the `_tx` log with its checksum-guarded current-record pointer
//! - [`FileTxSupport`]: all-or-nothing propagation of append offsets into file headers
//! - [`PartitionManager`]: partition routing, discovery and whole-transaction commit
//! - [`TxContext`]: immutable per-partition snapshot consumed by readers
//! - [`JournalWriter`] / [`JournalReader`]: the handles applications use
//!
//! # Example
//!
//! ```rust,ignore
//! use alopex_journal::{JournalConfig, JournalMetadata, JournalWriter, PartitionType, Value};
//!
//! let metadata = JournalMetadata::builder("ts").symbol("sym").double("bid").build()?;
//! let config = JournalConfig::default().with_partition_type(PartitionType::Day);
//! let writer = JournalWriter::open(path, metadata, config)?;
//!
//! let mut tx = writer.begin()?;
//! tx.append(&[Value::Timestamp(now_ns), Value::Symbol("AAPL".into()), Value::Double(187.3)])?;
//! tx.commit()?;
//! ```

#![deny(missing_docs)]

pub mod commit;
pub mod config;
pub mod error;
pub mod journal;
pub mod partition;
pub mod row_id;
pub mod schema;
pub mod storage;
pub mod symbol;
pub mod tx;
pub mod txlog;

/// Timestamp in nanoseconds since the Unix epoch.
pub type Timestamp = i64;

pub use commit::{FileKind, FileSet, FileTxSupport};
pub use config::{JournalConfig, SyncMode};
pub use error::{JournalError, Result};
pub use journal::{JournalReader, JournalWriter, WriteTx};
pub use partition::{
    AccessMode, Partition, PartitionInterval, PartitionLockTable, PartitionManager,
    PartitionState, PartitionType, ReadGuard, WriteGuard,
};
pub use row_id::RowId;
pub use schema::{ColumnKind, ColumnMeta, JournalMetadata, Value};
pub use storage::{ColumnStorage, MappedFile, MappedStorageProvider, StorageProvider};
pub use symbol::SymbolStore;
pub use tx::{
    PartitionTxData, ReadCache, ReadTransactionContext, SymbolTxData, TransactionContext,
    TxContext,
};
pub use txlog::{TxCommand, TxLog, TxRec};
