use crate::buffer::{Buffer, HeapBuf, PooledBuf};
use crate::composite::{CompositeAssembler, CompositeBuf};
use crate::config::{ConfigError, HostEnv, PoolConfig, SystemEnv};
use crate::pool::Pool;
use crate::probe::{MemoryProbe, MetricsSnapshot, Probes};
use crate::ring::{round_up_to_stride, MAX_SLICE_CAPACITY};
use std::sync::Arc;

/// Entry point of the buffer pool: validates configuration, owns the pool
/// table, and dispatches allocate/reallocate/release.
///
/// Requests up to the largest class size are served by the smallest class
/// that fits, with the limit set to the requested size and the full class
/// capacity retained. Larger requests are assembled into composites of pooled
/// segments. Releasing hands storage back towards the slice rings; a ring
/// under pressure simply lets the region drop, so the heap footprint stays
/// within the configured budget.
pub struct PoolManager {
    pools: Box<[Pool]>,
    max_pooled_size: usize,
    probes: Probes,
    config: PoolConfig,
}

impl PoolManager {
    /// Builds a manager from `config`, sized against the real host.
    pub fn new(config: PoolConfig) -> Result<Self, ConfigError> {
        Self::build(config, &SystemEnv, None)
    }

    /// Builds a manager sized against an explicit host environment.
    pub fn with_env(config: PoolConfig, env: &dyn HostEnv) -> Result<Self, ConfigError> {
        Self::build(config, env, None)
    }

    /// Builds a manager that mirrors every probe event to `probe`.
    pub fn with_probe(
        config: PoolConfig,
        probe: Arc<dyn MemoryProbe>,
    ) -> Result<Self, ConfigError> {
        Self::build(config, &SystemEnv, Some(probe))
    }

    fn build(
        config: PoolConfig,
        env: &dyn HostEnv,
        user_probe: Option<Arc<dyn MemoryProbe>>,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        let probes = Probes::new(user_probe);

        let total_budget = (env.max_heap_bytes() as f64 * config.heap_fraction) as usize;
        let per_pool = total_budget / config.number_of_pools;
        let per_slice = per_pool / config.slices_per_pool;

        let mut pools = Vec::with_capacity(config.number_of_pools);
        for class in 0..config.number_of_pools {
            let buffer_size = config.buffer_size_of(class)?;
            let buffers_per_slice = per_slice / buffer_size;
            if buffers_per_slice == 0 {
                return Err(ConfigError::SliceBudgetTooSmall {
                    budget: per_slice,
                    buffer_size,
                });
            }
            let capacity = round_up_to_stride(buffers_per_slice);
            if capacity >= MAX_SLICE_CAPACITY {
                return Err(ConfigError::SliceCapacityOverflow { capacity });
            }
            pools.push(Pool::new(
                buffer_size,
                config.slices_per_pool,
                capacity,
                config.fail_fast_poll,
                probes.clone(),
            ));
        }

        let max_pooled_size = pools[pools.len() - 1].buffer_size();
        log::debug!(
            "buffer pool ready: {} classes from {} to {} bytes, {} slice(s) per class, {} bytes budgeted",
            pools.len(),
            pools[0].buffer_size(),
            max_pooled_size,
            config.slices_per_pool,
            total_budget,
        );

        Ok(Self {
            pools: pools.into_boxed_slice(),
            max_pooled_size,
            probes,
            config,
        })
    }

    // ---------------------------------------------------------------------
    // ALLOCATION
    // ---------------------------------------------------------------------

    /// Allocates a buffer with `limit == size` and `capacity >= size`.
    pub fn allocate(&self, size: usize) -> Buffer {
        if size == 0 {
            return Buffer::empty();
        }
        if size <= self.max_pooled_size {
            let mut buf = self.pool_for(size).allocate();
            buf.set_limit(size);
            return Buffer::Pooled(buf);
        }
        let mut composite = self.assembler().build(size);
        composite.set_appendable(false);
        Buffer::Composite(composite)
    }

    /// Like [`allocate`](Self::allocate), but the limit covers the whole
    /// capacity the chosen class (or assembly) provides.
    pub fn allocate_at_least(&self, size: usize) -> Buffer {
        if size == 0 {
            return Buffer::empty();
        }
        if size <= self.max_pooled_size {
            return Buffer::Pooled(self.pool_for(size).allocate());
        }
        let mut composite = self.assembler().build(size);
        let capacity = composite.capacity();
        composite.set_limit(capacity);
        composite.set_appendable(false);
        Buffer::Composite(composite)
    }

    /// Resizes `old` to `new_size`, preserving the first
    /// `min(old capacity, new_size)` bytes of content and clamping the
    /// position. `old` is consumed; whenever a fresh buffer replaces it, the
    /// old one is disposed.
    pub fn reallocate(&self, old: Buffer, new_size: usize) -> Buffer {
        if new_size == 0 {
            old.dispose();
            return Buffer::empty();
        }
        match old {
            Buffer::Pooled(b) => self.reallocate_pooled(b, new_size),
            Buffer::Composite(c) => self.reallocate_composite(c, new_size),
            Buffer::Heap(h) => self.reallocate_heap(h, new_size),
        }
    }

    fn reallocate_pooled(&self, mut old: PooledBuf, new_size: usize) -> Buffer {
        let capacity = old.capacity();

        if capacity >= new_size {
            if self.pool_for(new_size).buffer_size() == capacity {
                // Same class: adjust the limit in place.
                old.set_limit(new_size);
                return Buffer::Pooled(old);
            }
            // A smaller class fits: move the prefix over.
            let mut fresh = self.pool_for(new_size).allocate();
            fresh.write_at(0, &old.window_bytes()[..new_size]);
            fresh.set_limit(new_size);
            fresh.set_position(old.position().min(new_size));
            old.dispose();
            return Buffer::Pooled(fresh);
        }

        if new_size <= self.max_pooled_size {
            // Larger class: move everything over.
            let mut fresh = self.pool_for(new_size).allocate();
            fresh.write_at(0, old.window_bytes());
            fresh.set_limit(new_size);
            fresh.set_position(old.position());
            old.dispose();
            return Buffer::Pooled(fresh);
        }

        // Past the pooled range: the old buffer becomes the first segment of
        // a composite, extended by the missing bytes.
        let position = old.position();
        let mut composite = CompositeBuf::from_initial(old);
        self.assembler().extend(&mut composite, new_size - capacity);
        composite.set_limit(new_size);
        composite.set_position(position);
        composite.set_appendable(false);
        Buffer::Composite(composite)
    }

    fn reallocate_composite(&self, mut old: CompositeBuf, new_size: usize) -> Buffer {
        if new_size <= old.capacity() {
            old.set_limit(new_size);
            old.trim();
        } else {
            let extra = new_size - old.capacity();
            self.assembler().extend(&mut old, extra);
            old.set_limit(new_size);
        }
        Buffer::Composite(old)
    }

    fn reallocate_heap(&self, old: HeapBuf, new_size: usize) -> Buffer {
        let keep = old.capacity().min(new_size);
        let mut fresh = self.allocate(new_size);
        fresh.write_at(0, &old.window_bytes()[..keep]);
        fresh.set_position(old.position().min(new_size));
        fresh
    }

    /// Releases a buffer; equivalent to dropping it.
    pub fn release(&self, buffer: Buffer) {
        buffer.dispose();
    }

    /// This manager never allocates outside the process heap.
    pub fn will_allocate_direct(&self, _size: usize) -> bool {
        false
    }

    // ---------------------------------------------------------------------
    // WRAPPING
    // ---------------------------------------------------------------------

    /// Wraps a copy of `bytes` in an unpooled buffer.
    pub fn wrap(&self, bytes: &[u8]) -> Buffer {
        Buffer::Heap(HeapBuf::from_slice(bytes))
    }

    /// Wraps the UTF-8 bytes of `text` in an unpooled buffer.
    pub fn wrap_str(&self, text: &str) -> Buffer {
        self.wrap(text.as_bytes())
    }

    /// Wraps `bytes` without copying.
    pub fn wrap_vec(&self, bytes: Vec<u8>) -> Buffer {
        Buffer::Heap(HeapBuf::from_vec(bytes))
    }

    // ---------------------------------------------------------------------
    // INTROSPECTION
    // ---------------------------------------------------------------------

    /// Snapshot of the pool table; callers must not rely on it staying
    /// current.
    pub fn pools(&self) -> Vec<Pool> {
        self.pools.to_vec()
    }

    /// Largest request the pools serve without assembling a composite.
    pub fn max_pooled_size(&self) -> usize {
        self.max_pooled_size
    }

    /// The configuration this manager was built from.
    pub fn config(&self) -> &PoolConfig {
        &self.config
    }

    /// Counters accumulated by the built-in probe.
    pub fn metrics(&self) -> MetricsSnapshot {
        self.probes.metrics().snapshot()
    }

    fn pool_for(&self, size: usize) -> &Pool {
        match self.pools.iter().find(|p| p.buffer_size() >= size) {
            Some(pool) => pool,
            None => panic!("no size class can satisfy a direct lookup of {size} bytes"),
        }
    }

    fn assembler(&self) -> CompositeAssembler<'_> {
        CompositeAssembler::new(&self.pools)
    }
}

impl std::fmt::Debug for PoolManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PoolManager")
            .field("pools", &self.pools)
            .field("max_pooled_size", &self.max_pooled_size)
            .finish_non_exhaustive()
    }
}
