//! `AtomicLocker`: the facade over `AtomicLockMap`, mirroring `KeyedLocker`'s
//! acquire-operation family but additionally reporting whether the caller
//! owns (created) the entry it just acquired (§4.4).

use crate::atomic_map::AtomicLockMap;
use crate::cancellation::CancellationToken;
use crate::error::{Cancelled, ConfigError};
use crate::options::AtomicLockOptions;
use crate::semaphore::CountedSemaphore;
use std::collections::hash_map::RandomState;
use std::hash::{BuildHasher, Hash};
use std::sync::Arc;
use std::time::Duration;

/// Facade over `AtomicLockMap` exposing the acquire-operation family plus
/// ownership reporting.
pub struct AtomicLocker<K, S = RandomState>
where
    K: Eq + Hash + Clone,
    S: BuildHasher + Clone,
{
    map: AtomicLockMap<K, S>,
}

impl<K> AtomicLocker<K, RandomState>
where
    K: Eq + Hash + Clone,
{
    /// Construct with the default hasher.
    pub fn new(options: AtomicLockOptions) -> Result<Self, ConfigError> {
        Ok(Self {
            map: AtomicLockMap::new(options)?,
        })
    }
}

impl<K, S> AtomicLocker<K, S>
where
    K: Eq + Hash + Clone,
    S: BuildHasher + Clone,
{
    /// Construct with a custom hasher.
    pub fn with_hasher(options: AtomicLockOptions, hasher: S) -> Result<Self, ConfigError> {
        Ok(Self {
            map: AtomicLockMap::with_hasher(options, hasher)?,
        })
    }

    /// Block the calling thread until `key` is acquired.
    pub fn lock(&self, key: K) -> AtomicLockGuard<'_, K, S> {
        let (key, semaphore, owner) = self.map.get_or_add(key);
        let pending = PendingRelease::new(&self.map, key, semaphore, owner);
        pending.semaphore().wait_blocking();
        let (key, semaphore, owner) = pending.admitted();
        AtomicLockGuard::holding(&self.map, key, semaphore, owner)
    }

    /// Suspend the current task until `key` is acquired. If dropped before it
    /// resolves, the reservation is unwound rather than leaked (see
    /// `PendingRelease`).
    pub async fn lock_async(&self, key: K) -> AtomicLockGuard<'_, K, S> {
        let (key, semaphore, owner) = self.map.get_or_add(key);
        let pending = PendingRelease::new(&self.map, key, semaphore, owner);
        pending.semaphore().wait().await;
        let (key, semaphore, owner) = pending.admitted();
        AtomicLockGuard::holding(&self.map, key, semaphore, owner)
    }

    /// Block until `key` is acquired or `timeout` elapses.
    pub fn lock_or_null(&self, key: K, timeout: Duration) -> AtomicLockGuard<'_, K, S> {
        let (key, semaphore, owner) = self.map.get_or_add(key);
        let pending = PendingRelease::new(&self.map, key, semaphore, owner);
        if pending.semaphore().wait_blocking_timeout(timeout) {
            let (key, semaphore, owner) = pending.admitted();
            AtomicLockGuard::holding(&self.map, key, semaphore, owner)
        } else {
            AtomicLockGuard::not_entered()
        }
    }

    /// Suspend until `key` is acquired or `timeout` elapses.
    pub async fn lock_or_null_async(&self, key: K, timeout: Duration) -> AtomicLockGuard<'_, K, S> {
        let (key, semaphore, owner) = self.map.get_or_add(key);
        let pending = PendingRelease::new(&self.map, key, semaphore, owner);
        if pending.semaphore().wait_timeout(timeout).await {
            let (key, semaphore, owner) = pending.admitted();
            AtomicLockGuard::holding(&self.map, key, semaphore, owner)
        } else {
            AtomicLockGuard::not_entered()
        }
    }

    /// Suspend until `key` is acquired or `token` is cancelled.
    pub async fn lock_cancellable_async(
        &self,
        key: K,
        token: &CancellationToken,
    ) -> Result<AtomicLockGuard<'_, K, S>, Cancelled> {
        let (key, semaphore, owner) = self.map.get_or_add(key);
        let pending = PendingRelease::new(&self.map, key, semaphore, owner);
        match pending.semaphore().wait_cancellable(token).await {
            Ok(()) => {
                let (key, semaphore, owner) = pending.admitted();
                Ok(AtomicLockGuard::holding(&self.map, key, semaphore, owner))
            }
            Err(Cancelled) => Err(Cancelled),
        }
    }

    /// Whether a live record is present for `key`.
    pub fn is_in_use(&self, key: &K) -> bool {
        self.map.is_in_use(key)
    }

    /// Number of current holders + waiters for `key`.
    pub fn remaining_count(&self, key: &K) -> usize {
        self.map.remaining_count(key)
    }

    /// Available admissions for `key`: `max_count - remaining_count(key)`.
    pub fn current_count(&self, key: &K) -> usize {
        self.map.current_count(key)
    }
}

/// Holds a reservation taken by `get_or_add` until `admitted()` is called;
/// unwinds it (without returning a permit) if dropped first. See
/// `keyed_locker::PendingRelease`, which this mirrors.
struct PendingRelease<'a, K, S>
where
    K: Eq + Hash + Clone,
    S: BuildHasher + Clone,
{
    map: &'a AtomicLockMap<K, S>,
    reservation: Option<(K, Arc<CountedSemaphore>, bool)>,
}

impl<'a, K, S> PendingRelease<'a, K, S>
where
    K: Eq + Hash + Clone,
    S: BuildHasher + Clone,
{
    fn new(map: &'a AtomicLockMap<K, S>, key: K, semaphore: Arc<CountedSemaphore>, owner: bool) -> Self {
        Self {
            map,
            reservation: Some((key, semaphore, owner)),
        }
    }

    fn semaphore(&self) -> &Arc<CountedSemaphore> {
        &self
            .reservation
            .as_ref()
            .expect("reservation taken before admitted()")
            .1
    }

    fn admitted(mut self) -> (K, Arc<CountedSemaphore>, bool) {
        self.reservation.take().expect("reservation taken before admitted()")
    }
}

impl<'a, K, S> Drop for PendingRelease<'a, K, S>
where
    K: Eq + Hash + Clone,
    S: BuildHasher + Clone,
{
    fn drop(&mut self) {
        if let Some((key, semaphore, owner)) = self.reservation.take() {
            self.map.release_without_semaphore_release(&key, &semaphore, owner);
        }
    }
}

/// RAII guard returned by `AtomicLocker`'s acquire methods. `is_owner()`
/// reports whether this particular acquire created the entry (first caller
/// for this key since it was last fully drained) or joined an existing one.
pub struct AtomicLockGuard<'a, K, S>
where
    K: Eq + Hash + Clone,
    S: BuildHasher + Clone,
{
    held: Option<(&'a AtomicLockMap<K, S>, K, Arc<CountedSemaphore>, bool)>,
}

impl<'a, K, S> AtomicLockGuard<'a, K, S>
where
    K: Eq + Hash + Clone,
    S: BuildHasher + Clone,
{
    fn holding(map: &'a AtomicLockMap<K, S>, key: K, semaphore: Arc<CountedSemaphore>, owner: bool) -> Self {
        Self {
            held: Some((map, key, semaphore, owner)),
        }
    }

    fn not_entered() -> Self {
        Self { held: None }
    }

    /// Whether this guard actually holds a lock.
    pub fn is_entered(&self) -> bool {
        self.held.is_some()
    }

    /// Whether this acquire created the entry rather than joining an existing
    /// one. Meaningless (`false`) when `is_entered()` is `false`.
    pub fn is_owner(&self) -> bool {
        self.held.as_ref().is_some_and(|(_, _, _, owner)| *owner)
    }
}

impl<'a, K, S> Drop for AtomicLockGuard<'a, K, S>
where
    K: Eq + Hash + Clone,
    S: BuildHasher + Clone,
{
    fn drop(&mut self) {
        if let Some((map, key, semaphore, owner)) = self.held.take() {
            map.release(&key, &semaphore, owner);
        }
    }
}
