use crate::buffer::PooledBuf;
use crate::invariants::{
    debug_assert_bounded_count, debug_assert_index_in_range, debug_assert_packed_bits,
    debug_assert_storage_len,
};
use crate::pad::{PaddedCounter, SlotArray};
use crate::probe::Probes;
use crate::Backoff;
use std::sync::{Arc, Weak};

// =============================================================================
// PACKED INDICES & SYNCHRONIZATION STRATEGY
// =============================================================================
//
// Each slice is a bounded MPMC ring over two parallel slot arrays. The two
// 32-bit counters pack everything a CAS needs to advance the ring in one step:
//
//   bits 0..=29  virtual index — the slot touched next, already permuted by
//                the striding walk (see `next`)
//   bit  30      wrap bit — flipped once per lap, and doubling as the selector
//                for which of the two arrays is current
//   bit  31      unused
//
// Putting the wrap bit in the same word as the index is what lets a single
// compare-and-swap advance the position *and* the wrap state together, and is
// also what distinguishes the two look-alike counter states:
//
//   poll == offer              -> empty
//   poll XOR offer == WRAP_BIT -> full (same position, opposite arrays)
//
// A classical single-array ring would need a separate full flag or a
// sacrificial slot for that distinction.
//
// ## Slot hand-off protocol
//
// Winning the index CAS only *claims* a slot; the buffer moves through the
// slot itself:
//
// **Poll (consume path):**
// 1. Snapshot both counters (Acquire); equal means empty.
// 2. CAS `poll_idx` forward (AcqRel). Losing the race restarts the snapshot.
// 3. Swap the claimed slot with null (AcqRel). The swap is the consume edge:
//    whatever non-null pointer comes out is exclusively ours.
// 4. A null result means the matching offer won its index CAS but has not
//    published yet — snooze and re-swap (or give up on the fail-fast path).
//
// **Offer (publish path):**
// 1. Snapshot both counters; XOR equal to the wrap bit means full.
// 2. CAS `offer_idx` forward.
// 3. CAS the claimed slot null -> buffer (AcqRel). The Release half is the
//    publish edge a later poll's swap synchronizes with. An occupied slot
//    means the previous lap's poll is still mid-swap — snooze and retry.
//
// FIFO is NOT guaranteed: an offer can win its index CAS before a second
// offer yet publish after it. Consumers tolerate that via step 4.
//
// ## Striding
//
// The virtual index does not walk slots 0, 1, 2, ... — consecutive claims land
// STRIDE slots apart, so back-to-back producers and consumers touch distant
// cache lines instead of neighbouring words. One lap still visits every slot
// exactly once before the wrap bit flips (see `walk_visits_every_slot_once`).
//
// =============================================================================

/// Step between logically adjacent slots; spreads contention across lines.
pub(crate) const STRIDE: u32 = 16;

/// Bit 30; toggled per lap and selects the current backing array.
pub(crate) const WRAP_BIT: u32 = 1 << 30;

/// Low 30 bits of a packed counter: the virtual index.
pub(crate) const INDEX_MASK: u32 = WRAP_BIT - 1;

/// Slot counts must stay addressable by the 30-bit virtual index.
pub(crate) const MAX_SLICE_CAPACITY: usize = 1 << 30;

#[inline]
pub(crate) fn unmask(idx: u32) -> u32 {
    idx & INDEX_MASK
}

/// Rounds a slot count up to the walk granularity.
pub(crate) fn round_up_to_stride(count: usize) -> usize {
    count.div_ceil(STRIDE as usize) * STRIDE as usize
}

/// Leaks a zeroed storage region for one pooled buffer.
pub(crate) fn alloc_storage(size: usize) -> *mut u8 {
    Box::into_raw(vec![0u8; size].into_boxed_slice()).cast::<u8>()
}

/// Reassembles a region previously leaked by [`alloc_storage`].
///
/// # Safety
///
/// `ptr` must have come from [`alloc_storage`] (directly or via
/// `Box::into_raw`) with exactly `len` bytes, and ownership must not be held
/// anywhere else.
pub(crate) unsafe fn reclaim_storage(ptr: *mut u8, len: usize) -> Box<[u8]> {
    unsafe { Box::from_raw(std::ptr::slice_from_raw_parts_mut(ptr, len)) }
}

/// One lock-free bounded ring of fixed-size buffers.
///
/// A slice owns `capacity` slots spread over two arrays and starts full:
/// array A is pre-populated with freshly allocated regions, array B is empty,
/// and the offer counter begins on B. Buffers leave through [`poll`] and come
/// back through [`offer`]; when the ring refuses a return the region simply
/// drops back to the allocator, so the slice's heap footprint stays bounded
/// without ever blocking.
///
/// [`poll`]: Self::poll
/// [`offer`]: Self::offer
pub struct PoolSlice {
    buffer_size: usize,
    /// Slot count; a multiple of STRIDE, below 2^30.
    capacity: u32,
    /// `capacity / STRIDE`, cached for the walk-position math in `count`.
    lanes: u32,
    poll_idx: PaddedCounter,
    offer_idx: PaddedCounter,
    array_a: SlotArray,
    array_b: SlotArray,
    fail_fast_poll: bool,
    probes: Probes,
    /// Handle to the owning `Arc`, so handed-out buffers can point back at
    /// their slice.
    myself: Weak<PoolSlice>,
}

impl PoolSlice {
    pub(crate) fn new(
        buffer_size: usize,
        capacity: usize,
        fail_fast_poll: bool,
        probes: Probes,
    ) -> Arc<Self> {
        assert!(capacity > 0, "slice capacity must be positive");
        assert!(
            capacity % STRIDE as usize == 0,
            "slice capacity must be a multiple of {STRIDE}"
        );
        assert!(
            capacity < MAX_SLICE_CAPACITY,
            "slice capacity {capacity} exceeds 2^30"
        );

        let array_a = SlotArray::new(capacity);
        let array_b = SlotArray::new(capacity);
        for slot in 0..capacity {
            let published = array_a.try_put(slot, alloc_storage(buffer_size));
            debug_assert!(published);
        }

        Arc::new_cyclic(|myself| Self {
            buffer_size,
            capacity: capacity as u32,
            lanes: capacity as u32 / STRIDE,
            // Poll starts on array A at position 0; offer starts on array B at
            // the same position. Same position, opposite arrays: full.
            poll_idx: PaddedCounter::new(0),
            offer_idx: PaddedCounter::new(WRAP_BIT),
            array_a,
            array_b,
            fail_fast_poll,
            probes,
            myself: myself.clone(),
        })
    }

    // ---------------------------------------------------------------------
    // ACCESSORS
    // ---------------------------------------------------------------------

    /// Bytes per buffer held by this slice.
    #[inline]
    pub fn buffer_size(&self) -> usize {
        self.buffer_size
    }

    /// Slot count of the ring.
    #[inline]
    pub fn capacity(&self) -> usize {
        self.capacity as usize
    }

    /// Approximate number of buffers currently in the ring.
    ///
    /// Consistent for a consistent snapshot of both counters; not linearized
    /// with concurrent polls and offers. Exact when the slice is at rest.
    pub fn elements_count(&self) -> usize {
        let r = self.poll_idx.load();
        let w = self.offer_idx.load();
        let mut d = i64::from(self.walk_pos(w)) - i64::from(self.walk_pos(r));
        if (r ^ w) & WRAP_BIT != 0 {
            d += i64::from(self.capacity);
        }
        let count = d.clamp(0, i64::from(self.capacity)) as usize;
        debug_assert_bounded_count!(count, self.capacity());
        count
    }

    /// Bytes currently cached by the ring.
    pub fn size(&self) -> usize {
        self.elements_count() * self.buffer_size
    }

    pub(crate) fn probes(&self) -> &Probes {
        &self.probes
    }

    // ---------------------------------------------------------------------
    // RING OPERATIONS
    // ---------------------------------------------------------------------

    /// Removes and returns one buffer, or `None` if the ring was observed
    /// empty.
    pub fn poll(&self) -> Option<PooledBuf> {
        let storage = self.take_storage()?;
        self.probes.buffer_allocated_from_pool(self.buffer_size);
        Some(PooledBuf::origin(storage, self.self_arc()))
    }

    /// Returns a buffer to this slice.
    ///
    /// The buffer is consumed either way. Returns `true` only if its storage
    /// entered the ring now; `false` when the buffer belongs to another slice
    /// (its storage is dropped, not rerouted), when sibling views still hold
    /// the storage, or when the ring was observed full.
    pub fn offer(&self, buf: PooledBuf) -> bool {
        if !buf.owned_by(self) {
            buf.discard();
            return false;
        }
        buf.dispose_into_ring()
    }

    /// Drains the ring, dropping every cached buffer.
    pub fn clear(&self) {
        while let Some(storage) = self.take_storage() {
            // SAFETY: `take_storage` yields exclusively owned regions of
            // exactly `buffer_size` bytes.
            drop(unsafe { reclaim_storage(storage, self.buffer_size) });
            self.probes.buffer_released(self.buffer_size);
        }
    }

    /// Core consume path: claim a slot via the poll counter, then take its
    /// pointer.
    pub(crate) fn take_storage(&self) -> Option<*mut u8> {
        let claimed = loop {
            let r = self.poll_idx.load();
            let w = self.offer_idx.load();
            if r == w {
                return None;
            }
            if self.poll_idx.advance(r, self.next(r)) {
                break r;
            }
        };

        let arr = self.array(claimed);
        let slot = unmask(claimed) as usize;
        let ptr = arr.swap_out(slot);
        if !ptr.is_null() {
            return Some(ptr);
        }

        // The offer that feeds this slot won its index CAS but has not
        // published yet.
        if self.fail_fast_poll {
            // The in-flight buffer stays for a later lap to collect.
            return None;
        }
        let mut backoff = Backoff::new();
        loop {
            backoff.snooze();
            let ptr = arr.swap_out(slot);
            if !ptr.is_null() {
                return Some(ptr);
            }
        }
    }

    /// Core publish path: claim a slot via the offer counter, then install
    /// the storage. Hands the storage back on refusal so the caller decides
    /// its fate.
    pub(crate) fn restore(&self, storage: Box<[u8]>) -> Result<(), Box<[u8]>> {
        debug_assert_storage_len!(storage.len(), self.buffer_size);

        let claimed = loop {
            let w = self.offer_idx.load();
            let r = self.poll_idx.load();
            if (r ^ w) == WRAP_BIT {
                return Err(storage);
            }
            if self.offer_idx.advance(w, self.next(w)) {
                break w;
            }
        };

        let arr = self.array(claimed);
        let slot = unmask(claimed) as usize;
        let ptr = Box::into_raw(storage).cast::<u8>();
        if !arr.try_put(slot, ptr) {
            // The previous lap's poll claimed this slot and is still mid-swap.
            let mut backoff = Backoff::new();
            while !arr.try_put(slot, ptr) {
                backoff.snooze();
            }
        }
        self.probes.buffer_released_to_pool(self.buffer_size);
        Ok(())
    }

    /// Fresh region owned by this slice, bypassing the ring. The pool falls
    /// back to this when a poll comes up empty, so exhaustion degrades to
    /// plain allocation instead of blocking.
    pub(crate) fn allocate_fresh(&self) -> PooledBuf {
        self.probes.buffer_allocated(self.buffer_size);
        PooledBuf::origin(alloc_storage(self.buffer_size), self.self_arc())
    }

    fn self_arc(&self) -> Arc<PoolSlice> {
        self.myself.upgrade().expect("slice is always behind an Arc")
    }

    // ---------------------------------------------------------------------
    // INDEX WALK
    // ---------------------------------------------------------------------

    /// Array selected by a packed index: A while the wrap bit is clear, B
    /// while it is set.
    #[inline]
    fn array(&self, idx: u32) -> &SlotArray {
        if idx & WRAP_BIT == 0 {
            &self.array_a
        } else {
            &self.array_b
        }
    }

    /// Successor of a packed index.
    ///
    /// The virtual index hops by STRIDE until the tail of the table, then
    /// restarts one slot further in; after STRIDE such passes every slot has
    /// been visited once and the wrap bit flips, moving the walk to the other
    /// array at position 0.
    fn next(&self, idx: u32) -> u32 {
        debug_assert_packed_bits!(idx);
        let k = unmask(idx);
        debug_assert_index_in_range!(k, self.capacity);

        if k + STRIDE < self.capacity {
            return idx + STRIDE;
        }
        let offset = k + STRIDE + 1 - self.capacity;
        if offset == STRIDE {
            WRAP_BIT ^ (idx & WRAP_BIT)
        } else {
            offset | (idx & WRAP_BIT)
        }
    }

    /// Position of a packed index within its lap, in walk order.
    ///
    /// The walk permutes slots, so raw index differences are meaningless;
    /// this maps a virtual index back to its step number.
    #[inline]
    fn walk_pos(&self, idx: u32) -> u32 {
        let k = unmask(idx);
        k / STRIDE + (k % STRIDE) * self.lanes
    }

    #[cfg(test)]
    fn occupied_slots(&self) -> usize {
        (0..self.capacity())
            .filter(|&slot| self.array_a.is_occupied(slot) || self.array_b.is_occupied(slot))
            .count()
    }
}

impl Drop for PoolSlice {
    fn drop(&mut self) {
        for arr in [&self.array_a, &self.array_b] {
            for slot in 0..arr.len() {
                let ptr = arr.swap_out(slot);
                if !ptr.is_null() {
                    // SAFETY: slot pointers are regions leaked by
                    // `alloc_storage(buffer_size)`; the swap just took the
                    // only reference.
                    drop(unsafe { reclaim_storage(ptr, self.buffer_size) });
                }
            }
        }
    }
}

impl std::fmt::Debug for PoolSlice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PoolSlice")
            .field("buffer_size", &self.buffer_size)
            .field("capacity", &self.capacity)
            .field("elements", &self.elements_count())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn slice(buffer_size: usize, capacity: usize) -> Arc<PoolSlice> {
        PoolSlice::new(buffer_size, capacity, false, Probes::new(None))
    }

    #[test]
    fn new_slice_starts_full() {
        let s = slice(64, 32);
        assert_eq!(s.elements_count(), 32);
        assert_eq!(s.occupied_slots(), 32);
        assert_eq!(s.size(), 32 * 64);
    }

    #[test]
    fn walk_visits_every_slot_once() {
        for capacity in [16u32, 32, 48, 160] {
            let s = slice(8, capacity as usize);
            let mut seen = vec![false; capacity as usize];
            let mut idx = 0u32;
            for _ in 0..capacity {
                let k = unmask(idx) as usize;
                assert!(!seen[k], "slot {k} visited twice (capacity {capacity})");
                seen[k] = true;
                idx = s.next(idx);
            }
            assert!(seen.iter().all(|&v| v), "walk skipped a slot");
            // A full lap lands on the other array at position 0.
            assert_eq!(idx, WRAP_BIT);
            // And a second lap comes back.
            for _ in 0..capacity {
                idx = s.next(idx);
            }
            assert_eq!(idx, 0);
        }
    }

    #[test]
    fn walk_spreads_consecutive_claims() {
        let s = slice(8, 160);
        let a = unmask(0);
        let b = unmask(s.next(0));
        assert!((i64::from(a) - i64::from(b)).unsigned_abs() >= u64::from(STRIDE));
    }

    #[test]
    fn drains_exactly_capacity_then_empty() {
        let s = slice(16, 48);
        let mut taken = Vec::new();
        while let Some(ptr) = s.take_storage() {
            taken.push(ptr);
        }
        assert_eq!(taken.len(), 48);
        assert_eq!(s.elements_count(), 0);
        assert_eq!(s.occupied_slots(), 0);

        for ptr in taken {
            let storage = unsafe { reclaim_storage(ptr, 16) };
            assert!(s.restore(storage).is_ok());
        }
        assert_eq!(s.elements_count(), 48);
        assert_eq!(s.occupied_slots(), 48);
    }

    #[test]
    fn full_ring_refuses_extra_storage() {
        let s = slice(16, 16);
        let extra = unsafe { reclaim_storage(alloc_storage(16), 16) };
        let refused = s.restore(extra);
        assert!(refused.is_err());
        assert_eq!(s.elements_count(), 16);
    }

    #[test]
    fn count_tracks_take_and_restore() {
        let s = slice(8, 32);
        let a = s.take_storage().unwrap();
        let b = s.take_storage().unwrap();
        assert_eq!(s.elements_count(), 30);

        s.restore(unsafe { reclaim_storage(a, 8) }).unwrap();
        assert_eq!(s.elements_count(), 31);
        s.restore(unsafe { reclaim_storage(b, 8) }).unwrap();
        assert_eq!(s.elements_count(), 32);
    }

    #[test]
    fn count_stays_exact_across_wrap() {
        let s = slice(8, 16);
        // Cycle more storage through the ring than its capacity so both
        // counters cross between arrays.
        for _ in 0..40 {
            let ptr = s.take_storage().unwrap();
            s.restore(unsafe { reclaim_storage(ptr, 8) }).unwrap();
            assert_eq!(s.elements_count(), 16);
        }
    }

    #[test]
    fn clear_empties_the_ring() {
        let s = slice(32, 48);
        s.clear();
        assert_eq!(s.elements_count(), 0);
        assert_eq!(s.occupied_slots(), 0);
        assert_eq!(s.size(), 0);
    }

    #[test]
    fn poll_hands_out_distinct_buffers() {
        let s = slice(64, 32);
        let a = s.poll().unwrap();
        let b = s.poll().unwrap();
        assert_eq!(a.capacity(), 64);
        assert_eq!(b.capacity(), 64);
        assert_eq!(s.elements_count(), 30);
        drop(a);
        drop(b);
        assert_eq!(s.elements_count(), 32);
    }
}
