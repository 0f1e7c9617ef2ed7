//! `StripedLocker`: a fixed-size array of `CountedSemaphore`s indexed by
//! `hash(key) mod stripe_count`, trading perfect per-key isolation for zero
//! allocation per lock and no map bookkeeping at all (§4.2).
//!
//! Distinct keys that happen to hash to the same stripe contend with each
//! other — that's the documented cost of this variant, not a bug.

use crate::error::ConfigError;
use crate::options::StripedLockOptions;
use crate::semaphore::CountedSemaphore;
use std::collections::hash_map::RandomState;
use std::hash::{BuildHasher, Hash};
use std::time::Duration;

/// Smallest prime `>= n`. The stripe count is rounded up to a prime so that
/// `hash mod stripe_count` spreads keys evenly even when hashes share small
/// common factors.
fn next_prime(n: usize) -> usize {
    fn is_prime(n: usize) -> bool {
        if n < 2 {
            return false;
        }
        if n % 2 == 0 {
            return n == 2;
        }
        let mut d = 3;
        while d * d <= n {
            if n % d == 0 {
                return false;
            }
            d += 2;
        }
        true
    }

    let mut candidate = n.max(2);
    while !is_prime(candidate) {
        candidate += 1;
    }
    candidate
}

/// Fixed-size striped lock: `hash(key) mod stripe_count` picks one of a
/// pre-allocated array of semaphores. No per-key state is ever created or
/// torn down.
pub struct StripedLocker<S = RandomState> {
    stripes: Vec<CountedSemaphore>,
    hasher: S,
}

impl StripedLocker<RandomState> {
    /// Construct with the default hasher.
    pub fn new(options: StripedLockOptions) -> Result<Self, ConfigError> {
        Self::with_hasher(options, RandomState::default())
    }
}

impl<S: BuildHasher> StripedLocker<S> {
    /// Construct with a custom hasher.
    pub fn with_hasher(options: StripedLockOptions, hasher: S) -> Result<Self, ConfigError> {
        options.validate()?;
        let stripe_count = next_prime(options.number_of_stripes);
        let stripes = (0..stripe_count)
            .map(|_| CountedSemaphore::new(options.max_count))
            .collect();
        Ok(Self { stripes, hasher })
    }

    /// Actual number of stripes in use (the next prime `>=` the requested count).
    pub fn stripe_count(&self) -> usize {
        self.stripes.len()
    }

    fn stripe_for<K: Hash>(&self, key: &K) -> &CountedSemaphore {
        let hash = self.hasher.hash_one(key);
        &self.stripes[(hash as usize) % self.stripes.len()]
    }

    /// Block the calling thread until `key`'s stripe is acquired.
    pub fn lock<K: Hash>(&self, key: &K) -> StripedLockGuard<'_> {
        let sem = self.stripe_for(key);
        sem.wait_blocking();
        StripedLockGuard { semaphore: sem }
    }

    /// Suspend the current task until `key`'s stripe is acquired.
    pub async fn lock_async<K: Hash>(&self, key: &K) -> StripedLockGuard<'_> {
        let sem = self.stripe_for(key);
        sem.wait().await;
        StripedLockGuard { semaphore: sem }
    }

    /// Block until `key`'s stripe is acquired or `timeout` elapses.
    pub fn lock_or_null<K: Hash>(&self, key: &K, timeout: Duration) -> Option<StripedLockGuard<'_>> {
        let sem = self.stripe_for(key);
        sem.wait_blocking_timeout(timeout)
            .then_some(StripedLockGuard { semaphore: sem })
    }

    /// Suspend until `key`'s stripe is acquired or `timeout` elapses.
    pub async fn lock_or_null_async<K: Hash>(
        &self,
        key: &K,
        timeout: Duration,
    ) -> Option<StripedLockGuard<'_>> {
        let sem = self.stripe_for(key);
        sem.wait_timeout(timeout)
            .await
            .then_some(StripedLockGuard { semaphore: sem })
    }

    /// Approximate "in use" check: true if `key`'s stripe has any outstanding
    /// admission, which may belong to an entirely different key that happens to
    /// share the stripe. Prefer `KeyedLocker::is_in_use` when precision matters.
    pub fn is_in_use<K: Hash>(&self, key: &K) -> bool {
        self.stripe_for(key).in_use() > 0
    }

    /// Approximate remaining-admissions count for `key`'s stripe; see
    /// `is_in_use`'s caveat about stripe sharing.
    pub fn current_count<K: Hash>(&self, key: &K) -> usize {
        self.stripe_for(key).available_permits()
    }

    /// Approximate in-use count for `key`'s stripe (`max_count - current_count`);
    /// see `is_in_use`'s caveat about stripe sharing.
    pub fn remaining_count<K: Hash>(&self, key: &K) -> usize {
        self.stripe_for(key).in_use()
    }
}

/// RAII guard returned by `StripedLocker`'s acquire methods. Releases its
/// stripe's permit directly on drop — there is no map entry to route through.
pub struct StripedLockGuard<'a> {
    semaphore: &'a CountedSemaphore,
}

impl<'a> Drop for StripedLockGuard<'a> {
    fn drop(&mut self) {
        self.semaphore.signal();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_next_prime_rounds_up() {
        assert_eq!(next_prime(1), 2);
        assert_eq!(next_prime(2), 2);
        assert_eq!(next_prime(4), 5);
        assert_eq!(next_prime(31), 31);
        assert_eq!(next_prime(32), 37);
    }

    #[test]
    fn test_stripe_count_is_prime_and_at_least_requested() {
        let locker = StripedLocker::new(StripedLockOptions {
            number_of_stripes: 32,
            max_count: 1,
        })
        .unwrap();
        assert_eq!(locker.stripe_count(), 37);
    }

    #[test]
    fn test_lock_then_drop_releases_stripe() {
        let locker = StripedLocker::new(StripedLockOptions::default()).unwrap();
        {
            let _g = locker.lock(&"a");
            assert!(locker.is_in_use(&"a"));
        }
        assert!(!locker.is_in_use(&"a"));
    }

    #[test]
    fn test_remaining_count_tracks_in_use_admissions() {
        let locker = StripedLocker::new(StripedLockOptions {
            number_of_stripes: 1,
            max_count: 3,
        })
        .unwrap();
        assert_eq!(locker.remaining_count(&"a"), 0);
        let g1 = locker.lock(&"a");
        assert_eq!(locker.remaining_count(&"a"), 1);
        let g2 = locker.lock(&"b");
        assert_eq!(locker.remaining_count(&"a"), 2);
        drop(g1);
        drop(g2);
        assert_eq!(locker.remaining_count(&"a"), 0);
    }

    #[test]
    fn test_lock_or_null_times_out_when_stripe_exhausted() {
        let locker = StripedLocker::new(StripedLockOptions {
            number_of_stripes: 1,
            max_count: 1,
        })
        .unwrap();
        let _held = locker.lock(&"a");
        let second = locker.lock_or_null(&"b", Duration::from_millis(0));
        assert!(second.is_none());
    }

    #[test]
    fn test_rejects_zero_stripes() {
        let result = StripedLocker::new(StripedLockOptions {
            number_of_stripes: 0,
            max_count: 1,
        });
        assert!(result.is_err());
    }

    #[compio::test]
    async fn test_lock_async_round_trip() {
        let locker = StripedLocker::new(StripedLockOptions::default()).unwrap();
        let g = locker.lock_async(&"k").await;
        assert!(locker.is_in_use(&"k"));
        drop(g);
        assert!(!locker.is_in_use(&"k"));
    }
}
