use crossbeam_utils::CachePadded;
use std::sync::atomic::{AtomicPtr, AtomicU32, Ordering};

/// Cache-line-padded 32-bit atomic counter.
///
/// The poll and offer counters of a slice are the two hottest words in the
/// whole pool; padding keeps each on its own cache line so a producer bouncing
/// `offer_idx` does not invalidate the consumers' line holding `poll_idx`.
pub(crate) struct PaddedCounter {
    value: CachePadded<AtomicU32>,
}

impl PaddedCounter {
    pub(crate) fn new(initial: u32) -> Self {
        Self {
            value: CachePadded::new(AtomicU32::new(initial)),
        }
    }

    #[inline]
    pub(crate) fn load(&self) -> u32 {
        self.value.load(Ordering::Acquire)
    }

    /// Single-step CAS advance. Returns true if this thread won the step.
    #[inline]
    pub(crate) fn advance(&self, current: u32, next: u32) -> bool {
        self.value
            .compare_exchange(current, next, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }
}

impl std::fmt::Debug for PaddedCounter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "PaddedCounter({:#x})", self.load())
    }
}

/// Fixed-length array of atomic buffer slots, padded at the edges.
///
/// A slot holds either null (empty) or a pointer to a leaked storage region
/// owned by the ring. Hand-off is swap-based: consumers take with
/// [`swap_out`](Self::swap_out), producers publish with
/// [`try_put`](Self::try_put). Slot-to-slot false sharing is handled by the
/// striding walk of the packed indices, not by per-slot padding.
pub(crate) struct SlotArray {
    slots: CachePadded<Box<[AtomicPtr<u8>]>>,
}

impl SlotArray {
    pub(crate) fn new(len: usize) -> Self {
        let mut slots = Vec::with_capacity(len);
        slots.resize_with(len, || AtomicPtr::new(std::ptr::null_mut()));
        Self {
            slots: CachePadded::new(slots.into_boxed_slice()),
        }
    }

    #[inline]
    pub(crate) fn len(&self) -> usize {
        self.slots.len()
    }

    /// Takes the slot content, leaving it empty. Null means the slot was
    /// already empty.
    #[inline]
    pub(crate) fn swap_out(&self, idx: usize) -> *mut u8 {
        self.slots[idx].swap(std::ptr::null_mut(), Ordering::AcqRel)
    }

    /// Publishes `ptr` into an empty slot. Returns false if the slot is still
    /// occupied by a previous lap.
    #[inline]
    pub(crate) fn try_put(&self, idx: usize, ptr: *mut u8) -> bool {
        self.slots[idx]
            .compare_exchange(
                std::ptr::null_mut(),
                ptr,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok()
    }

    /// Non-destructive occupancy probe, for at-rest verification in tests.
    #[cfg(test)]
    pub(crate) fn is_occupied(&self, idx: usize) -> bool {
        !self.slots[idx].load(Ordering::Acquire).is_null()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counter_advance_is_single_winner() {
        let c = PaddedCounter::new(7);
        assert!(c.advance(7, 23));
        assert!(!c.advance(7, 99));
        assert_eq!(c.load(), 23);
    }

    #[test]
    fn slot_array_swap_and_put() {
        let arr = SlotArray::new(4);
        let p = Box::into_raw(vec![0u8; 8].into_boxed_slice()).cast::<u8>();

        assert!(!arr.is_occupied(2));
        assert!(arr.try_put(2, p));
        assert!(arr.is_occupied(2));
        // Occupied slot refuses a second put.
        assert!(!arr.try_put(2, p));

        let taken = arr.swap_out(2);
        assert_eq!(taken, p);
        assert!(arr.swap_out(2).is_null());

        drop(unsafe { Box::from_raw(std::ptr::slice_from_raw_parts_mut(taken, 8)) });
    }
}
