use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Monitoring callbacks invoked on allocation and release events.
///
/// All methods have empty default bodies so implementors only override the
/// events they care about. The pool machinery reports four events:
///
/// - [`buffer_allocated`](Self::buffer_allocated): a fresh region was taken
///   from the heap because the rings had nothing to hand out.
/// - [`buffer_allocated_from_pool`](Self::buffer_allocated_from_pool): a
///   pooled region was served from a slice ring.
/// - [`buffer_released_to_pool`](Self::buffer_released_to_pool): a region
///   went back into its slice ring.
/// - [`buffer_released`](Self::buffer_released): a region left the pooled
///   system for good (ring refusal, foreign offer, or an explicit clear).
pub trait MemoryProbe: Send + Sync {
    fn buffer_allocated(&self, size: usize) {
        let _ = size;
    }

    fn buffer_released(&self, size: usize) {
        let _ = size;
    }

    fn buffer_allocated_from_pool(&self, size: usize) {
        let _ = size;
    }

    fn buffer_released_to_pool(&self, size: usize) {
        let _ = size;
    }
}

/// Built-in probe implementation backed by relaxed atomic counters.
#[derive(Debug, Default)]
pub struct Metrics {
    fresh_allocations: AtomicU64,
    pool_allocations: AtomicU64,
    pool_returns: AtomicU64,
    dropped_buffers: AtomicU64,
    bytes_allocated: AtomicU64,
    bytes_returned: AtomicU64,
}

impl Metrics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Get a consistent-enough snapshot for reporting.
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            fresh_allocations: self.fresh_allocations.load(Ordering::Relaxed),
            pool_allocations: self.pool_allocations.load(Ordering::Relaxed),
            pool_returns: self.pool_returns.load(Ordering::Relaxed),
            dropped_buffers: self.dropped_buffers.load(Ordering::Relaxed),
            bytes_allocated: self.bytes_allocated.load(Ordering::Relaxed),
            bytes_returned: self.bytes_returned.load(Ordering::Relaxed),
        }
    }
}

impl MemoryProbe for Metrics {
    fn buffer_allocated(&self, size: usize) {
        self.fresh_allocations.fetch_add(1, Ordering::Relaxed);
        self.bytes_allocated.fetch_add(size as u64, Ordering::Relaxed);
    }

    fn buffer_released(&self, size: usize) {
        self.dropped_buffers.fetch_add(1, Ordering::Relaxed);
        let _ = size;
    }

    fn buffer_allocated_from_pool(&self, size: usize) {
        self.pool_allocations.fetch_add(1, Ordering::Relaxed);
        let _ = size;
    }

    fn buffer_released_to_pool(&self, size: usize) {
        self.pool_returns.fetch_add(1, Ordering::Relaxed);
        self.bytes_returned.fetch_add(size as u64, Ordering::Relaxed);
    }
}

/// Point-in-time view of the built-in counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub fresh_allocations: u64,
    pub pool_allocations: u64,
    pub pool_returns: u64,
    pub dropped_buffers: u64,
    pub bytes_allocated: u64,
    pub bytes_returned: u64,
}

/// Probe fan-out shared by the manager, its pools and their slices.
///
/// The built-in metrics always record; a user probe, when installed, sees the
/// same event stream.
#[derive(Clone)]
pub(crate) struct Probes {
    metrics: Arc<Metrics>,
    user: Option<Arc<dyn MemoryProbe>>,
}

impl Probes {
    pub(crate) fn new(user: Option<Arc<dyn MemoryProbe>>) -> Self {
        Self {
            metrics: Arc::new(Metrics::new()),
            user,
        }
    }

    pub(crate) fn metrics(&self) -> &Metrics {
        &self.metrics
    }

    #[inline]
    pub(crate) fn buffer_allocated(&self, size: usize) {
        self.metrics.buffer_allocated(size);
        if let Some(p) = &self.user {
            p.buffer_allocated(size);
        }
    }

    #[inline]
    pub(crate) fn buffer_released(&self, size: usize) {
        self.metrics.buffer_released(size);
        if let Some(p) = &self.user {
            p.buffer_released(size);
        }
    }

    #[inline]
    pub(crate) fn buffer_allocated_from_pool(&self, size: usize) {
        self.metrics.buffer_allocated_from_pool(size);
        if let Some(p) = &self.user {
            p.buffer_allocated_from_pool(size);
        }
    }

    #[inline]
    pub(crate) fn buffer_released_to_pool(&self, size: usize) {
        self.metrics.buffer_released_to_pool(size);
        if let Some(p) = &self.user {
            p.buffer_released_to_pool(size);
        }
    }
}
