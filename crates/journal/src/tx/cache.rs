//! Per-snapshot scratch state for value reads.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;

/// Scratch buffer and resolved-symbol cache owned by one snapshot.
///
/// Dictionary entries are append-only, so a key resolved once stays valid for
/// the lifetime of the snapshot.
#[derive(Debug, Default)]
pub struct ReadCache {
    buffer: Mutex<Vec<u8>>,
    symbols: Mutex<HashMap<(usize, i32), Arc<str>>>,
}

impl ReadCache {
    /// Runs `f` over a zeroed scratch buffer of `len` bytes.
    pub fn with_buffer<R>(&self, len: usize, f: impl FnOnce(&mut [u8]) -> R) -> R {
        let mut buffer = self.buffer.lock();
        buffer.clear();
        buffer.resize(len, 0);
        f(&mut buffer[..])
    }

    /// Returns a previously resolved symbol.
    pub fn symbol(&self, column: usize, key: i32) -> Option<Arc<str>> {
        self.symbols.lock().get(&(column, key)).cloned()
    }

    /// Remembers a resolved symbol.
    pub fn insert_symbol(&self, column: usize, key: i32, value: Arc<str>) {
        self.symbols.lock().insert((column, key), value);
    }

    /// Returns the number of cached symbols.
    pub fn cached_symbols(&self) -> usize {
        self.symbols.lock().len()
    }
}
