//! Debug assertion macros for buffer pool invariants.
//!
//! These macros provide runtime checks for the structural invariants of the
//! packed ring indices and the storage hand-off protocol. They are only active
//! in debug builds (`#[cfg(debug_assertions)]`), so there is zero overhead in
//! release builds.
//!
//! Used by `PoolSlice` and the `PooledBuf` dispose machinery.

// =============================================================================
// Packed index range
// =============================================================================

/// Assert that the virtual index of a packed counter stays inside the slot
/// table.
///
/// **Invariant**: `unmask(i) < capacity` for every value a counter ever holds.
macro_rules! debug_assert_index_in_range {
    ($virtual_idx:expr, $capacity:expr) => {
        debug_assert!(
            $virtual_idx < $capacity,
            "packed index {} escaped the slot table (capacity {})",
            $virtual_idx,
            $capacity
        )
    };
}

/// Assert that a packed counter never sets its reserved high bit.
///
/// **Invariant**: bit 31 is unused; only the wrap bit (bit 30) and the
/// 30-bit virtual index are ever populated.
macro_rules! debug_assert_packed_bits {
    ($idx:expr) => {
        debug_assert!(
            $idx & (1u32 << 31) == 0,
            "packed index {:#x} set the reserved high bit",
            $idx
        )
    };
}

// =============================================================================
// Bounded count
// =============================================================================

/// Assert that an element count snapshot never exceeds the slot capacity.
///
/// **Invariant**: `0 ≤ count ≤ capacity` for a consistent index snapshot.
macro_rules! debug_assert_bounded_count {
    ($count:expr, $capacity:expr) => {
        debug_assert!(
            $count <= $capacity,
            "element count {} exceeds slice capacity {}",
            $count,
            $capacity
        )
    };
}

// =============================================================================
// Storage hand-off
// =============================================================================

/// Assert that storage returned to a slice matches its fixed buffer size.
///
/// **Invariant**: every slot of a slice holds a region of exactly
/// `buffer_size` bytes; the share-count protocol never shrinks it.
macro_rules! debug_assert_storage_len {
    ($len:expr, $expected:expr) => {
        debug_assert!(
            $len == $expected,
            "storage of {} bytes returned to a slice of {}-byte buffers",
            $len,
            $expected
        )
    };
}

// =============================================================================
// Re-exports for crate-internal use
// =============================================================================

pub(crate) use debug_assert_bounded_count;
pub(crate) use debug_assert_index_in_range;
pub(crate) use debug_assert_packed_bits;
pub(crate) use debug_assert_storage_len;
