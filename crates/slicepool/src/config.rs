use thiserror::Error;

/// Default heap budget assumed when the host gives no better figure: 1 GiB.
///
/// Unlike a JVM there is no queryable "max heap" in a Rust process, so the
/// budget the pools carve their [`heap_fraction`](PoolConfig::heap_fraction)
/// out of comes from the [`HostEnv`] and defaults to this constant.
pub const DEFAULT_HEAP_BUDGET: usize = 1 << 30;

/// Host facts the pool table is sized from.
///
/// Production code uses [`SystemEnv`]; tests inject fixed values so slice
/// capacities do not depend on the machine running them.
pub trait HostEnv {
    /// Number of processors available to this process.
    fn available_processors(&self) -> usize;

    /// Upper bound on heap the process is expected to use.
    fn max_heap_bytes(&self) -> usize;
}

/// [`HostEnv`] backed by the operating system.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemEnv;

impl HostEnv for SystemEnv {
    fn available_processors(&self) -> usize {
        std::thread::available_parallelism().map_or(1, std::num::NonZeroUsize::get)
    }

    fn max_heap_bytes(&self) -> usize {
        DEFAULT_HEAP_BUDGET
    }
}

/// Errors raised while validating a [`PoolConfig`] or sizing the pool table.
#[derive(Debug, Clone, Copy, PartialEq, Error)]
pub enum ConfigError {
    /// Base buffer size must be a nonzero power of two.
    #[error("base buffer size must be a nonzero power of two (got {size})")]
    BaseBufferSize {
        /// The rejected size.
        size: usize,
    },

    /// At least one pool is required.
    #[error("number of pools must be at least 1")]
    NumberOfPools,

    /// With more than one pool the growth factor must be a nonzero power of
    /// two so every class size stays a power of two.
    #[error("growth factor must be a nonzero power of two when more than one pool is configured (got {factor})")]
    GrowthFactor {
        /// The rejected factor.
        factor: u32,
    },

    /// At least one slice per pool is required.
    #[error("slices per pool must be at least 1")]
    SlicesPerPool,

    /// The heap fraction must lie strictly between 0 and 1.
    #[error("heap fraction must lie in (0, 1) (got {fraction})")]
    HeapFraction {
        /// The rejected fraction.
        fraction: f64,
    },

    /// The largest class size overflows the address space.
    #[error("pool table overflows usize: {base} << {shift}")]
    PoolTableOverflow {
        /// Base buffer size.
        base: usize,
        /// Total shift applied for the last class.
        shift: u32,
    },

    /// A slice would get a budget too small to hold even one buffer.
    #[error("per-slice budget of {budget} bytes cannot hold a single {buffer_size}-byte buffer")]
    SliceBudgetTooSmall {
        /// Bytes budgeted for one slice.
        budget: usize,
        /// Buffer size of the affected class.
        buffer_size: usize,
    },

    /// A slice would need more slots than the packed 30-bit index can address.
    #[error("slice capacity {capacity} exceeds the maximum of 2^30 slots")]
    SliceCapacityOverflow {
        /// The computed slot count.
        capacity: usize,
    },
}

/// Configuration for a [`PoolManager`](crate::PoolManager).
///
/// Defaults give three size classes of 4 KiB, 16 KiB and 64 KiB, one slice
/// per available processor, and a tenth of the host heap budget spread evenly
/// across the classes.
#[derive(Debug, Clone, Copy)]
pub struct PoolConfig {
    /// Buffer size of class 0 in bytes; must be a power of two.
    pub base_buffer_size: usize,
    /// Number of size classes.
    pub number_of_pools: usize,
    /// Each class size is the previous times `2^growth_factor`.
    pub growth_factor: u32,
    /// Independent rings per class; the contention control knob.
    pub slices_per_pool: usize,
    /// Share of the host heap budgeted for all pools combined.
    pub heap_fraction: f64,
    /// When set, a poll that catches a slot mid-publication returns none
    /// instead of spinning for the in-flight offer.
    pub fail_fast_poll: bool,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            base_buffer_size: 4096,
            number_of_pools: 3,
            growth_factor: 2,
            slices_per_pool: SystemEnv.available_processors(),
            heap_fraction: 0.10,
            fail_fast_poll: false,
        }
    }
}

impl PoolConfig {
    /// Sets the base buffer size.
    pub fn with_base_buffer_size(mut self, size: usize) -> Self {
        self.base_buffer_size = size;
        self
    }

    /// Sets the number of size classes.
    pub fn with_number_of_pools(mut self, pools: usize) -> Self {
        self.number_of_pools = pools;
        self
    }

    /// Sets the growth factor between consecutive classes.
    pub fn with_growth_factor(mut self, factor: u32) -> Self {
        self.growth_factor = factor;
        self
    }

    /// Sets the number of slices per class.
    pub fn with_slices_per_pool(mut self, slices: usize) -> Self {
        self.slices_per_pool = slices;
        self
    }

    /// Sets the heap fraction budgeted for the pools.
    pub fn with_heap_fraction(mut self, fraction: f64) -> Self {
        self.heap_fraction = fraction;
        self
    }

    /// Enables or disables the fail-fast poll path.
    pub fn with_fail_fast_poll(mut self, enabled: bool) -> Self {
        self.fail_fast_poll = enabled;
        self
    }

    /// Checks the scalar rules that do not depend on the host environment.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.base_buffer_size == 0 || !self.base_buffer_size.is_power_of_two() {
            return Err(ConfigError::BaseBufferSize {
                size: self.base_buffer_size,
            });
        }
        if self.number_of_pools == 0 {
            return Err(ConfigError::NumberOfPools);
        }
        if self.number_of_pools > 1
            && (self.growth_factor == 0 || !self.growth_factor.is_power_of_two())
        {
            return Err(ConfigError::GrowthFactor {
                factor: self.growth_factor,
            });
        }
        if self.slices_per_pool == 0 {
            return Err(ConfigError::SlicesPerPool);
        }
        if !(self.heap_fraction > 0.0 && self.heap_fraction < 1.0) {
            return Err(ConfigError::HeapFraction {
                fraction: self.heap_fraction,
            });
        }
        Ok(())
    }

    /// Buffer size of class `index`.
    pub fn buffer_size_of(&self, index: usize) -> Result<usize, ConfigError> {
        let shift = self.growth_factor.saturating_mul(index as u32);
        let overflow = ConfigError::PoolTableOverflow {
            base: self.base_buffer_size,
            shift,
        };
        if shift >= usize::BITS {
            return Err(overflow);
        }
        // Widen before shifting; checked_shl only guards the shift amount,
        // not the value.
        let size = (self.base_buffer_size as u128) << shift;
        if size > isize::MAX as u128 {
            return Err(overflow);
        }
        Ok(size as usize)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        assert_eq!(PoolConfig::default().validate(), Ok(()));
    }

    #[test]
    fn default_pool_table_is_4k_16k_64k() {
        let config = PoolConfig::default();
        assert_eq!(config.buffer_size_of(0), Ok(4096));
        assert_eq!(config.buffer_size_of(1), Ok(16384));
        assert_eq!(config.buffer_size_of(2), Ok(65536));
    }

    #[test]
    fn rejects_non_power_of_two_base() {
        let config = PoolConfig::default().with_base_buffer_size(1000);
        assert_eq!(
            config.validate(),
            Err(ConfigError::BaseBufferSize { size: 1000 })
        );
    }

    #[test]
    fn rejects_zero_pools_and_zero_slices() {
        assert_eq!(
            PoolConfig::default().with_number_of_pools(0).validate(),
            Err(ConfigError::NumberOfPools)
        );
        assert_eq!(
            PoolConfig::default().with_slices_per_pool(0).validate(),
            Err(ConfigError::SlicesPerPool)
        );
    }

    #[test]
    fn rejects_bad_growth_factor_with_multiple_pools() {
        let config = PoolConfig::default().with_growth_factor(3);
        assert_eq!(
            config.validate(),
            Err(ConfigError::GrowthFactor { factor: 3 })
        );

        // A single pool never multiplies, so any factor is acceptable.
        let single = PoolConfig::default()
            .with_number_of_pools(1)
            .with_growth_factor(0);
        assert_eq!(single.validate(), Ok(()));
    }

    #[test]
    fn rejects_heap_fraction_outside_open_interval() {
        for fraction in [0.0, 1.0, -0.5, 1.5] {
            let config = PoolConfig::default().with_heap_fraction(fraction);
            assert_eq!(
                config.validate(),
                Err(ConfigError::HeapFraction { fraction })
            );
        }
    }

    #[test]
    fn pool_table_overflow_is_reported() {
        let config = PoolConfig::default()
            .with_base_buffer_size(1 << 40)
            .with_number_of_pools(4)
            .with_growth_factor(16);
        assert!(matches!(
            config.buffer_size_of(3),
            Err(ConfigError::PoolTableOverflow { .. })
        ));
    }
}
