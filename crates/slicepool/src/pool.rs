use crate::buffer::PooledBuf;
use crate::probe::Probes;
use crate::ring::PoolSlice;
use rand::Rng;
use std::sync::Arc;

/// One size class: a set of independent slices all caching buffers of the
/// same fixed size.
///
/// Allocation picks a slice uniformly at random, so load spreads without any
/// inter-slice coordination and without per-thread affinity — a buffer
/// produced on one thread and released on another never skews a class towards
/// either thread. When the picked slice is empty the pool falls back to a
/// fresh heap allocation, so the rings act purely as a cache and allocation
/// never blocks.
#[derive(Clone)]
pub struct Pool {
    buffer_size: usize,
    slices: Box<[Arc<PoolSlice>]>,
}

impl Pool {
    pub(crate) fn new(
        buffer_size: usize,
        slices_per_pool: usize,
        slice_capacity: usize,
        fail_fast_poll: bool,
        probes: Probes,
    ) -> Self {
        let slices = (0..slices_per_pool)
            .map(|_| PoolSlice::new(buffer_size, slice_capacity, fail_fast_poll, probes.clone()))
            .collect();
        Self {
            buffer_size,
            slices,
        }
    }

    /// Fixed buffer size of this class.
    #[inline]
    pub fn buffer_size(&self) -> usize {
        self.buffer_size
    }

    /// Takes a buffer from a randomly chosen slice, or allocates a fresh one
    /// if that slice is empty.
    pub fn allocate(&self) -> PooledBuf {
        let slice = if self.slices.len() == 1 {
            &self.slices[0]
        } else {
            &self.slices[rand::thread_rng().gen_range(0..self.slices.len())]
        };
        slice.poll().unwrap_or_else(|| slice.allocate_fresh())
    }

    /// Snapshot of the slices; callers must not rely on it staying current.
    pub fn slices(&self) -> Vec<Arc<PoolSlice>> {
        self.slices.to_vec()
    }

    /// Total buffers currently cached across all slices.
    pub fn elements_count(&self) -> usize {
        self.slices.iter().map(|s| s.elements_count()).sum()
    }

    /// Total bytes currently cached across all slices.
    pub fn size(&self) -> usize {
        self.elements_count() * self.buffer_size
    }
}

impl std::fmt::Debug for Pool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pool")
            .field("buffer_size", &self.buffer_size)
            .field("slices", &self.slices.len())
            .field("elements", &self.elements_count())
            .finish()
    }
}
