//! Journal configuration.

use crate::partition::naming::PartitionType;
use crate::storage::mapped::DEFAULT_GROW_SIZE;
use std::time::Duration;

/// Default bound on partition lock acquisition.
pub const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_secs(5);

/// Default number of partitions kept mapped by a reader.
pub const DEFAULT_MAX_OPEN_PARTITIONS: usize = 8;

/// Durability of writes to memory-mapped files.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SyncMode {
    /// Synchronously flush dirty pages at every commit (default).
    #[default]
    Flush,
    /// Schedule the flush without waiting for it.
    Async,
    /// Leave it to the OS (fastest, for testing only).
    None,
}

/// Configuration shared by writer and reader handles.
#[derive(Debug, Clone)]
pub struct JournalConfig {
    /// Partitioning granularity used when the journal is first created.
    ///
    /// An existing journal keeps the granularity recorded on disk.
    pub partition_type: PartitionType,

    /// Flush behaviour for column files and the transaction log.
    pub sync_mode: SyncMode,

    /// How long a partition lock request may wait before failing.
    pub lock_timeout: Duration,

    /// Partitions a reader keeps mapped before [`crate::JournalReader::evict_idle`]
    /// starts closing the least recently used ones.
    pub max_open_partitions: usize,

    /// Granularity by which mapped files grow.
    pub grow_size: u64,
}

impl Default for JournalConfig {
    fn default() -> Self {
        Self {
            partition_type: PartitionType::default(),
            sync_mode: SyncMode::default(),
            lock_timeout: DEFAULT_LOCK_TIMEOUT,
            max_open_partitions: DEFAULT_MAX_OPEN_PARTITIONS,
            grow_size: DEFAULT_GROW_SIZE,
        }
    }
}

impl JournalConfig {
    /// Sets the partitioning granularity.
    pub fn with_partition_type(mut self, partition_type: PartitionType) -> Self {
        self.partition_type = partition_type;
        self
    }

    /// Sets the sync mode.
    pub fn with_sync_mode(mut self, sync_mode: SyncMode) -> Self {
        self.sync_mode = sync_mode;
        self
    }

    /// Sets the partition lock timeout.
    pub fn with_lock_timeout(mut self, timeout: Duration) -> Self {
        self.lock_timeout = timeout;
        self
    }

    /// Sets the number of partitions kept mapped by readers.
    pub fn with_max_open_partitions(mut self, max: usize) -> Self {
        self.max_open_partitions = max;
        self
    }

    /// Sets the growth granularity of mapped files.
    pub fn with_grow_size(mut self, grow_size: u64) -> Self {
        self.grow_size = grow_size;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_journal_config_default() {
        let config = JournalConfig::default();
        assert_eq!(config.partition_type, PartitionType::None);
        assert_eq!(config.sync_mode, SyncMode::Flush);
        assert_eq!(config.lock_timeout, Duration::from_secs(5));
        assert_eq!(config.max_open_partitions, 8);
        assert_eq!(config.grow_size, 1024 * 1024);
    }

    #[test]
    fn test_journal_config_builder() {
        let config = JournalConfig::default()
            .with_partition_type(PartitionType::Day)
            .with_sync_mode(SyncMode::None)
            .with_lock_timeout(Duration::from_millis(50))
            .with_max_open_partitions(2)
            .with_grow_size(4096);

        assert_eq!(config.partition_type, PartitionType::Day);
        assert_eq!(config.sync_mode, SyncMode::None);
        assert_eq!(config.lock_timeout, Duration::from_millis(50));
        assert_eq!(config.max_open_partitions, 2);
        assert_eq!(config.grow_size, 4096);
    }
}
