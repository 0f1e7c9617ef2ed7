//! Error and cancellation types
//!
//! Per the error-handling design: configuration errors are raised at construction
//! and are non-recoverable; cancellation is not an error in the `std::error::Error`
//! sense but a distinct outcome threaded through `Result`; timeouts are not errors
//! at all (see the `Option`-returning methods on `KeyedLocker`/`StripedLocker`).

use thiserror::Error;

/// Raised by the fallible constructors of `KeyedLockMap`, `KeyedLocker`, `StripedLocker`,
/// and `AtomicLockMap` when given out-of-range configuration.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum ConfigError {
    /// `max_count` must be at least 1.
    #[error("max_count must be >= 1, got {0}")]
    InvalidMaxCount(usize),

    /// `pool_initial_fill` must be `-1` (fill completely) or in `0..=pool_size`.
    #[error("pool_initial_fill must be -1 or in 0..={pool_size}, got {initial_fill}")]
    InvalidPoolInitialFill {
        initial_fill: isize,
        pool_size: usize,
    },

    /// `number_of_stripes` must be at least 1.
    #[error("number_of_stripes must be >= 1, got {0}")]
    InvalidNumberOfStripes(usize),
}

/// Returned when a wait was abandoned because its `CancellationToken` fired before a
/// permit was admitted. Carries no data: the reference count has already been unwound
/// by the time the caller observes this.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Cancelled;

impl std::fmt::Display for Cancelled {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "wait was cancelled before a permit was admitted")
    }
}

impl std::error::Error for Cancelled {}
