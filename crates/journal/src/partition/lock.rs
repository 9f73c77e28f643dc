//! Per-partition read/write locks guarding eviction.
//!
//! Readers hold a read lock while they dereference a partition's files. The
//! eviction pass takes the write lock before unmapping a partition. A read
//! request only waits while that same partition is being evicted; a write
//! request marks the partition as evicting, which holds off new readers, and
//! then waits for existing readers to drain. Both waits are bounded.

use crate::error::{JournalError, Result};
use parking_lot::{Condvar, Mutex};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::debug;

#[derive(Debug, Default)]
struct LockState {
    readers: usize,
    evicting: bool,
}

impl LockState {
    fn is_idle(&self) -> bool {
        self.readers == 0 && !self.evicting
    }
}

/// Lock table keyed by partition id.
#[derive(Debug, Default)]
pub struct PartitionLockTable {
    state: Mutex<HashMap<u32, LockState>>,
    released: Condvar,
}

impl PartitionLockTable {
    /// Creates an empty lock table.
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Acquires a read lock, waiting at most `timeout` for an eviction to end.
    ///
    /// # Errors
    ///
    /// Returns [`JournalError::LockTimeout`] if the partition is still being
    /// evicted when the timeout expires.
    pub fn acquire_read(self: &Arc<Self>, partition_id: u32, timeout: Duration) -> Result<ReadGuard> {
        let deadline = Instant::now() + timeout;
        let mut state = self.state.lock();
        loop {
            let entry = state.entry(partition_id).or_default();
            if !entry.evicting {
                entry.readers += 1;
                return Ok(ReadGuard {
                    table: Arc::clone(self),
                    partition_id,
                });
            }
            if Instant::now() >= deadline {
                return Err(JournalError::LockTimeout {
                    partition_id,
                    timeout,
                });
            }
            self.released.wait_until(&mut state, deadline);
        }
    }

    /// Acquires the write lock, waiting at most `timeout` for readers to drain.
    ///
    /// # Errors
    ///
    /// Returns [`JournalError::LockTimeout`] if readers remain (or another
    /// eviction holds the lock) when the timeout expires.
    pub fn acquire_write(
        self: &Arc<Self>,
        partition_id: u32,
        timeout: Duration,
    ) -> Result<WriteGuard> {
        let deadline = Instant::now() + timeout;
        let mut state = self.state.lock();

        loop {
            let entry = state.entry(partition_id).or_default();
            if !entry.evicting {
                entry.evicting = true;
                break;
            }
            if Instant::now() >= deadline {
                return Err(JournalError::LockTimeout {
                    partition_id,
                    timeout,
                });
            }
            self.released.wait_until(&mut state, deadline);
        }

        loop {
            let entry = state.entry(partition_id).or_default();
            if entry.readers == 0 {
                return Ok(WriteGuard {
                    table: Arc::clone(self),
                    partition_id,
                });
            }
            if Instant::now() >= deadline {
                entry.evicting = false;
                debug!(
                    "Giving up write lock on partition {} with {} readers",
                    partition_id, entry.readers
                );
                drop(state);
                self.released.notify_all();
                return Err(JournalError::LockTimeout {
                    partition_id,
                    timeout,
                });
            }
            self.released.wait_until(&mut state, deadline);
        }
    }

    /// Returns the number of read locks currently held on a partition.
    pub fn readers(&self, partition_id: u32) -> usize {
        self.state
            .lock()
            .get(&partition_id)
            .map_or(0, |entry| entry.readers)
    }

    fn release(&self, partition_id: u32, update: impl FnOnce(&mut LockState)) {
        let mut state = self.state.lock();
        if let Some(entry) = state.get_mut(&partition_id) {
            update(entry);
            if entry.is_idle() {
                state.remove(&partition_id);
            }
        }
        drop(state);
        self.released.notify_all();
    }
}

/// Read lock on one partition, released on drop.
#[derive(Debug)]
pub struct ReadGuard {
    table: Arc<PartitionLockTable>,
    partition_id: u32,
}

impl ReadGuard {
    /// Partition this guard protects.
    pub fn partition_id(&self) -> u32 {
        self.partition_id
    }

    /// Releases the read lock, then requests the write lock.
    pub fn upgrade(self, timeout: Duration) -> Result<WriteGuard> {
        let table = Arc::clone(&self.table);
        let partition_id = self.partition_id;
        drop(self);
        table.acquire_write(partition_id, timeout)
    }
}

impl Drop for ReadGuard {
    fn drop(&mut self) {
        self.table.release(self.partition_id, |entry| {
            entry.readers = entry.readers.saturating_sub(1);
        });
    }
}

/// Write lock on one partition, released on drop.
#[derive(Debug)]
pub struct WriteGuard {
    table: Arc<PartitionLockTable>,
    partition_id: u32,
}

impl WriteGuard {
    /// Partition this guard protects.
    pub fn partition_id(&self) -> u32 {
        self.partition_id
    }

    /// Releases the write lock, then requests a read lock.
    pub fn downgrade(self, timeout: Duration) -> Result<ReadGuard> {
        let table = Arc::clone(&self.table);
        let partition_id = self.partition_id;
        drop(self);
        table.acquire_read(partition_id, timeout)
    }
}

impl Drop for WriteGuard {
    fn drop(&mut self) {
        self.table.release(self.partition_id, |entry| entry.evicting = false);
    }
}
