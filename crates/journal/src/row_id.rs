//! Packing of partition index and local row offset into one 64-bit row id.
//!
//! ```text
//! 63            44 43                                   0
//! ┌───────────────┬──────────────────────────────────────┐
//! │ partition (20)│          local row offset (44)       │
//! └───────────────┴──────────────────────────────────────┘
//! ```
//!
//! Partition index 0 is the shared dictionary store; data partitions start at 1.
//! The `external` variants shift the partition component down by one so that
//! callers see data partitions numbered from 0.

/// Packed row identifier.
pub type RowId = u64;

/// Number of bits reserved for the local row offset.
pub const LOCAL_BITS: u32 = 44;

/// Mask selecting the local row offset.
pub const LOCAL_MASK: u64 = (1 << LOCAL_BITS) - 1;

/// Largest representable partition index.
pub const MAX_PARTITION_INDEX: u32 = (1 << (64 - LOCAL_BITS)) - 1;

/// Partition index of the shared dictionary store.
pub const SYMBOL_PARTITION_INDEX: u32 = 0;

/// Packs a partition index and local row offset.
#[inline]
pub fn to_row_id(partition_index: u32, local_row_id: u64) -> RowId {
    debug_assert!(local_row_id <= LOCAL_MASK);
    ((partition_index as u64) << LOCAL_BITS) + local_row_id
}

/// Extracts the partition index.
#[inline]
pub fn to_partition_index(row_id: RowId) -> u32 {
    (row_id >> LOCAL_BITS) as u32
}

/// Extracts the local row offset.
#[inline]
pub fn to_local_row_id(row_id: RowId) -> u64 {
    row_id & LOCAL_MASK
}

/// Packs a row id as seen by clients, hiding the dictionary partition.
#[inline]
pub fn to_external_row_id(partition_index: u32, local_row_id: u64) -> RowId {
    debug_assert!(partition_index > SYMBOL_PARTITION_INDEX);
    to_row_id(partition_index - 1, local_row_id)
}

/// Recovers the internal partition index from a client row id.
#[inline]
pub fn to_partition_index_from_external(row_id: RowId) -> u32 {
    to_partition_index(row_id) + 1
}

/// Converts a client row id to the internal representation.
#[inline]
pub fn from_external_row_id(row_id: RowId) -> RowId {
    to_row_id(
        to_partition_index_from_external(row_id),
        to_local_row_id(row_id),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_row_id_packing() {
        let row_id = to_row_id(3, 123_456);
        assert_eq!(row_id, (3u64 << 44) + 123_456);
        assert_eq!(to_partition_index(row_id), 3);
        assert_eq!(to_local_row_id(row_id), 123_456);
    }

    #[test]
    fn test_row_id_limits() {
        let row_id = to_row_id(MAX_PARTITION_INDEX, LOCAL_MASK);
        assert_eq!(row_id, u64::MAX);
        assert_eq!(to_partition_index(row_id), MAX_PARTITION_INDEX);
        assert_eq!(to_local_row_id(row_id), LOCAL_MASK);
    }

    #[test]
    fn test_external_row_id_hides_symbol_partition() {
        let external = to_external_row_id(1, 7);
        assert_eq!(to_partition_index(external), 0);
        assert_eq!(to_partition_index_from_external(external), 1);
        assert_eq!(from_external_row_id(external), to_row_id(1, 7));
    }
}
