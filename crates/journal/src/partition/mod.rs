//! Date-ranged partitions and their lifecycle.
//!
//! A partition owns one directory under the journal root named after its time
//! range (see [`naming`]). Its identity, the 1-based id and the range, is fixed
//! once created. Files are mapped lazily and may be unmapped again by eviction,
//! which callers never observe except through lock waits.

pub mod files;
pub mod lock;
pub mod manager;
pub mod naming;

pub use files::{PartitionFiles, RawCell};
pub use lock::{PartitionLockTable, ReadGuard, WriteGuard};
pub use manager::{AccessMode, PartitionManager};
pub use naming::{PartitionInterval, PartitionType};

use crate::schema::JournalMetadata;
use crate::storage::StorageProvider;
use parking_lot::{Mutex, MutexGuard};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Whether a partition's files are currently mapped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PartitionState {
    /// At least one file is mapped.
    Open,
    /// Every file is unmapped; the next access reopens them.
    Closed,
}

/// One partition of a journal.
pub struct Partition {
    id: u32,
    interval: PartitionInterval,
    version: u32,
    dir: PathBuf,
    files: Mutex<PartitionFiles>,
    last_access: AtomicU64,
}

impl Partition {
    pub(crate) fn new(
        id: u32,
        interval: PartitionInterval,
        version: u32,
        dir: PathBuf,
        metadata: Arc<JournalMetadata>,
        provider: Arc<dyn StorageProvider>,
    ) -> Self {
        let files = PartitionFiles::new(id, &dir, metadata, provider);
        Self {
            id,
            interval,
            version,
            dir,
            files: Mutex::new(files),
            last_access: AtomicU64::new(0),
        }
    }

    /// Partition id (1-based).
    pub fn id(&self) -> u32 {
        self.id
    }

    /// Time range covered by the partition.
    pub fn interval(&self) -> &PartitionInterval {
        &self.interval
    }

    /// Directory version in use (0 for the unsuffixed directory).
    pub fn version(&self) -> u32 {
        self.version
    }

    /// Directory holding the partition's files.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Returns whether files are mapped.
    pub fn state(&self) -> PartitionState {
        if self.files.lock().is_open() {
            PartitionState::Open
        } else {
            PartitionState::Closed
        }
    }

    /// Locks the partition's files.
    ///
    /// Readers must hold a [`ReadGuard`] for this partition while using them.
    pub fn files(&self) -> MutexGuard<'_, PartitionFiles> {
        self.files.lock()
    }

    pub(crate) fn files_mut(&mut self) -> &mut PartitionFiles {
        self.files.get_mut()
    }

    pub(crate) fn close(&self) {
        self.files.lock().close();
    }

    pub(crate) fn relocate(&mut self, version: u32, dir: PathBuf) {
        self.files.get_mut().relocate(&dir);
        self.version = version;
        self.dir = dir;
    }

    pub(crate) fn touch(&self, tick: u64) {
        self.last_access.store(tick, Ordering::Relaxed);
    }

    pub(crate) fn last_access(&self) -> u64 {
        self.last_access.load(Ordering::Relaxed)
    }
}

impl std::fmt::Debug for Partition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Partition")
            .field("id", &self.id)
            .field("interval", &self.interval)
            .field("version", &self.version)
            .field("dir", &self.dir)
            .finish()
    }
}
