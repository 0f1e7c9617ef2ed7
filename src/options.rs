//! Construction options (§6), validated at construction time (§7: configuration
//! errors are raised here and are non-recoverable).

use crate::error::ConfigError;

/// Construction options for `KeyedLockMap`/`KeyedLocker`.
#[derive(Debug, Clone, Copy)]
pub struct KeyedLockOptions {
    /// Maximum concurrent admissions per key. Must be `>= 1`.
    pub max_count: usize,
    /// Maximum number of idle releasers retained for reuse. `0` disables pooling.
    pub pool_size: usize,
    /// How many releasers to pre-allocate into the pool at construction. `-1`
    /// means "fill completely" (`= pool_size`).
    pub pool_initial_fill: isize,
    /// Hint for the number of concurrent map shards.
    pub concurrency_level: usize,
    /// Hint for the initial per-shard capacity.
    pub initial_capacity: usize,
}

impl Default for KeyedLockOptions {
    fn default() -> Self {
        Self {
            max_count: 1,
            pool_size: 20,
            pool_initial_fill: 1,
            concurrency_level: default_concurrency_level(),
            initial_capacity: 32,
        }
    }
}

impl KeyedLockOptions {
    pub(crate) fn validate(&self) -> Result<(), ConfigError> {
        if self.max_count < 1 {
            return Err(ConfigError::InvalidMaxCount(self.max_count));
        }
        if self.pool_initial_fill < -1
            || (self.pool_initial_fill >= 0 && self.pool_initial_fill as usize > self.pool_size)
        {
            return Err(ConfigError::InvalidPoolInitialFill {
                initial_fill: self.pool_initial_fill,
                pool_size: self.pool_size,
            });
        }
        Ok(())
    }
}

/// Construction options for `StripedLocker`.
#[derive(Debug, Clone, Copy)]
pub struct StripedLockOptions {
    /// Requested stripe count; the actual count used is the next prime `>=` this.
    pub number_of_stripes: usize,
    /// Maximum concurrent admissions per stripe. Must be `>= 1`.
    pub max_count: usize,
}

impl Default for StripedLockOptions {
    fn default() -> Self {
        Self {
            number_of_stripes: 31,
            max_count: 1,
        }
    }
}

impl StripedLockOptions {
    pub(crate) fn validate(&self) -> Result<(), ConfigError> {
        if self.number_of_stripes < 1 {
            return Err(ConfigError::InvalidNumberOfStripes(self.number_of_stripes));
        }
        if self.max_count < 1 {
            return Err(ConfigError::InvalidMaxCount(self.max_count));
        }
        Ok(())
    }
}

/// Construction options for `AtomicLockMap`/`AtomicLocker`.
///
/// No pool settings here: unlike `KeyedLockMap`, `AtomicLockMap` has no
/// recyclable per-record state to pool — an entry is just an `Arc<CountedSemaphore>`
/// that lives exactly as long as its owner holds it (§3, §4.5).
#[derive(Debug, Clone, Copy)]
pub struct AtomicLockOptions {
    /// Maximum concurrent admissions per key. Must be `>= 1`. Defaults to `1`,
    /// matching the spec's description of the atomic variant as the `MaxCount == 1`
    /// simplification of the keyed variant.
    pub max_count: usize,
    /// Hint for the number of concurrent map shards.
    pub concurrency_level: usize,
}

impl Default for AtomicLockOptions {
    fn default() -> Self {
        Self {
            max_count: 1,
            concurrency_level: default_concurrency_level(),
        }
    }
}

impl AtomicLockOptions {
    pub(crate) fn validate(&self) -> Result<(), ConfigError> {
        if self.max_count < 1 {
            return Err(ConfigError::InvalidMaxCount(self.max_count));
        }
        Ok(())
    }
}

fn default_concurrency_level() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get() * 4)
        .unwrap_or(16)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_keyed_defaults_match_spec() {
        let opts = KeyedLockOptions::default();
        assert_eq!(opts.max_count, 1);
        assert_eq!(opts.pool_size, 20);
        assert_eq!(opts.pool_initial_fill, 1);
        opts.validate().unwrap();
    }

    #[test]
    fn test_keyed_rejects_zero_max_count() {
        let opts = KeyedLockOptions {
            max_count: 0,
            ..Default::default()
        };
        assert_eq!(opts.validate(), Err(ConfigError::InvalidMaxCount(0)));
    }

    #[test]
    fn test_keyed_rejects_fill_above_pool_size() {
        let opts = KeyedLockOptions {
            pool_size: 2,
            pool_initial_fill: 3,
            ..Default::default()
        };
        assert!(opts.validate().is_err());
    }

    #[test]
    fn test_keyed_allows_negative_one_fill() {
        let opts = KeyedLockOptions {
            pool_size: 2,
            pool_initial_fill: -1,
            ..Default::default()
        };
        opts.validate().unwrap();
    }

    #[test]
    fn test_striped_defaults_valid() {
        StripedLockOptions::default().validate().unwrap();
    }

    #[test]
    fn test_striped_rejects_zero_stripes() {
        let opts = StripedLockOptions {
            number_of_stripes: 0,
            ..Default::default()
        };
        assert!(opts.validate().is_err());
    }

    #[test]
    fn test_atomic_defaults_valid() {
        AtomicLockOptions::default().validate().unwrap();
    }
}
