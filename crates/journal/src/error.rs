//! Error and Result types for journal operations.

use crate::Timestamp;
use std::io;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// A convenience `Result` type for journal operations.
pub type Result<T> = std::result::Result<T, JournalError>;

/// The error type for journal operations.
#[derive(Debug, Error)]
pub enum JournalError {
    /// Appended timestamp is below the partition's high-water mark.
    #[error(
        "Out of order append into partition {partition_id}: timestamp {timestamp} is before last timestamp {last_timestamp}"
    )]
    OutOfOrderAppend {
        /// Partition the row was routed to.
        partition_id: u32,
        /// Timestamp of the rejected row.
        timestamp: Timestamp,
        /// Last timestamp appended to the partition in the current transaction.
        last_timestamp: Timestamp,
    },

    /// Durable propagation of append offsets failed; the attempt was rolled back.
    #[error("Commit failed for partition {partition_id}: {source}")]
    CommitFailed {
        /// Partition whose file support failed (0 is the dictionary store).
        partition_id: u32,
        /// Underlying cause.
        #[source]
        source: Box<JournalError>,
    },

    /// The transaction log pointer checksum could not be reconciled.
    #[error("Invalid transaction address {address:#x} (checksum {checksum:#04x})")]
    InvalidTxAddress {
        /// Address read from the pointer.
        address: u64,
        /// Checksum byte read from the pointer.
        checksum: u8,
    },

    /// A partition lock could not be acquired in time.
    #[error("Timed out after {timeout:?} waiting for lock on partition {partition_id}")]
    LockTimeout {
        /// Partition whose lock was requested.
        partition_id: u32,
        /// Configured wait bound.
        timeout: Duration,
    },

    /// A write operation was attempted on a read-only handle.
    #[error("Journal is not open for writing")]
    NotOpenForWrite,

    /// Another writer handle already owns the journal directory.
    #[error("Journal already has an open writer: {0}")]
    WriterAlreadyOpen(PathBuf),

    /// A transaction record could not be decoded or encoded.
    #[error("Corrupt transaction record: {0}")]
    CorruptTxRecord(String),

    /// A column, index or dictionary file is inconsistent.
    #[error("Corrupt file {path}: {reason}")]
    CorruptFile {
        /// Offending file.
        path: PathBuf,
        /// What was wrong with it.
        reason: String,
    },

    /// Row values do not match the journal schema.
    #[error("Schema mismatch: {0}")]
    SchemaMismatch(String),

    /// A row id does not exist in the given transaction.
    #[error("Row {row_id:#x} is not visible in this transaction")]
    RowOutOfRange {
        /// The requested row id.
        row_id: u64,
    },

    /// Requested column is not part of the schema.
    #[error("Unknown column: {0}")]
    UnknownColumn(String),

    /// Underlying I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl JournalError {
    /// Wraps an error raised while committing the given partition.
    pub(crate) fn commit_failed(partition_id: u32, source: JournalError) -> Self {
        match source {
            already @ JournalError::CommitFailed { .. } => already,
            other => JournalError::CommitFailed {
                partition_id,
                source: Box::new(other),
            },
        }
    }

    pub(crate) fn corrupt_file(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        JournalError::CorruptFile {
            path: path.into(),
            reason: reason.into(),
        }
    }
}
