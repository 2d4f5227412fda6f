//! SlicePool - Tiered, Sliced, Lock-Free Buffer Pool
//!
//! A buffer pool allocator for high-throughput network I/O: byte buffers come
//! from a table of size classes, each class striped over independent
//! lock-free rings ("slices") so very frequent allocate/release traffic never
//! funnels through one hot spot.
//!
//! # Key Features
//!
//! - Bounded MPMC rings advanced by a single CAS over bit-packed indices
//!   (30-bit virtual index + wrap bit selecting one of two backing arrays)
//! - Strided slot walk and cache-padded counters to keep hot state off
//!   shared cache lines
//! - Share-counted views (slice/duplicate/read-only/split) that defer the
//!   return to the pool until the last holder lets go
//! - Composite assembly for requests beyond the largest size class
//! - No per-thread caches: buffers cross threads freely without leaking a
//!   size class to any one thread
//!
//! Exhaustion never blocks: an empty ring falls back to plain allocation, and
//! a full ring lets returned regions drop, keeping the footprint bounded.
//!
//! # Example
//!
//! ```
//! use slicepool_rs::{PoolConfig, PoolManager};
//!
//! let manager = PoolManager::new(PoolConfig::default()).unwrap();
//!
//! // Served from the smallest class that fits: 4 KiB capacity, limit 1000.
//! let mut buf = manager.allocate(1000);
//! assert_eq!(buf.limit(), 1000);
//! assert!(buf.capacity() >= 1000);
//!
//! buf.put_slice(b"payload");
//! manager.release(buf);
//! ```

mod backoff;
mod buffer;
mod composite;
mod config;
mod invariants;
mod manager;
mod pad;
mod pool;
mod probe;
mod ring;

pub use backoff::Backoff;
pub use buffer::{Buffer, HeapBuf, PooledBuf};
pub use composite::CompositeBuf;
pub use config::{ConfigError, HostEnv, PoolConfig, SystemEnv, DEFAULT_HEAP_BUDGET};
pub use manager::PoolManager;
pub use pool::Pool;
pub use probe::{MemoryProbe, Metrics, MetricsSnapshot};
pub use ring::PoolSlice;
