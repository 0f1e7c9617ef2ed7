//! Concurrent map from key to `Releaser`, implementing `get_or_add`/`release`/
//! `release_without_semaphore_release` and enforcing the reference-counting
//! invariants (§4.1 — "the heart of the core").

use crate::error::ConfigError;
use crate::options::KeyedLockOptions;
use crate::pool::Pool;
use crate::releaser::Releaser;
use parking_lot::Mutex;
use std::collections::hash_map::RandomState;
use std::collections::HashMap;
use std::hash::{BuildHasher, Hash};
use std::sync::Arc;
use tracing::trace;

/// A concurrent map from `key` to `Releaser<K>`, internally striped across shards
/// the way the construction options' `concurrency_level` hint requests.
///
/// No shard ever holds its lock while acquiring a `Releaser`'s own monitor lock —
/// that ordering discipline (shard lock, read/clone, drop shard lock, *then*
/// touch the releaser's monitor) is what keeps `get_or_add` and `release` from
/// deadlocking against each other.
pub struct KeyedLockMap<K, S = RandomState> {
    shards: Vec<Mutex<HashMap<K, Arc<Releaser<K>>, S>>>,
    pool: Option<Pool<K>>,
    max_count: usize,
    hasher: S,
}

impl<K> KeyedLockMap<K, RandomState>
where
    K: Eq + Hash + Clone,
{
    /// Construct with the default hasher and the given options.
    pub fn new(options: KeyedLockOptions) -> Result<Self, ConfigError> {
        Self::with_hasher(options, RandomState::default())
    }
}

impl<K, S> KeyedLockMap<K, S>
where
    K: Eq + Hash + Clone,
    S: BuildHasher + Clone,
{
    /// Construct with a custom hasher (the Rust analogue of a pluggable equality
    /// comparer, §6's `equalityComparer`).
    pub fn with_hasher(options: KeyedLockOptions, hasher: S) -> Result<Self, ConfigError> {
        options.validate()?;
        let shard_count = options.concurrency_level.max(1);
        let per_shard_capacity = (options.initial_capacity / shard_count).max(1);
        let shards = (0..shard_count)
            .map(|_| {
                Mutex::new(HashMap::with_capacity_and_hasher(
                    per_shard_capacity,
                    hasher.clone(),
                ))
            })
            .collect();
        let pool = if options.pool_size > 0 {
            Some(Pool::new(options.pool_size, options.pool_initial_fill, options.max_count))
        } else {
            None
        };
        Ok(Self {
            shards,
            pool,
            max_count: options.max_count,
            hasher,
        })
    }

    fn shard_index(&self, key: &K) -> usize {
        let hash = self.hasher.hash_one(key);
        (hash as usize) % self.shards.len()
    }

    fn new_releaser(&self) -> Arc<Releaser<K>> {
        match &self.pool {
            Some(pool) => pool.get(),
            None => Arc::new(Releaser::new_pooled(self.max_count)),
        }
    }

    fn recycle(&self, releaser: Arc<Releaser<K>>) {
        if let Some(pool) = &self.pool {
            pool.put(releaser);
        }
    }

    /// Return an activated releaser for `key`, with its reference count already
    /// incremented to account for the caller's upcoming wait. See the module docs
    /// for the lock-ordering discipline this relies on.
    pub fn get_or_add(&self, key: K) -> Arc<Releaser<K>> {
        let idx = self.shard_index(&key);

        // Step 1: optimistic lookup. Clone the Arc and drop the shard lock before
        // touching the releaser's own monitor (try_increment) — never nest shard
        // lock inside monitor lock or vice versa.
        let existing = {
            let shard = self.shards[idx].lock();
            shard.get(&key).cloned()
        };
        if let Some(existing) = existing {
            if existing.try_increment() {
                return existing;
            }
            // Draining: can't be joined. Fall through to the allocate-and-retry loop.
        }

        // Step 2+3+4: allocate a candidate once and retry the insert/collide dance
        // until either we win the insert or we join a (non-draining) existing
        // record. This double-check loop is load-bearing: collapsing it to a
        // single get-or-insert call would let a joiner race a teardown in progress
        // and either lose an increment or join a dead record.
        let candidate = self.new_releaser();
        candidate.activate(key.clone());

        loop {
            let mut shard = self.shards[idx].lock();
            match shard.get(&key).cloned() {
                None => {
                    shard.insert(key, Arc::clone(&candidate));
                    return candidate;
                }
                Some(existing) => {
                    drop(shard);
                    if existing.try_increment() {
                        // We lost the race to insert. The candidate was already
                        // activated for this key; deactivate it back to pooled
                        // state before recycling so a future `activate()` on it
                        // doesn't trip the not-already-live debug assertion.
                        candidate.decrement();
                        self.recycle(candidate);
                        return existing;
                    }
                    // The record we observed is draining: loop and look again.
                }
            }
        }
    }

    /// Release one reference, returning the permit to the semaphore. If this was
    /// the last reference, the entry is removed from the map and the releaser is
    /// pooled before the permit is returned.
    pub fn release(&self, releaser: &Arc<Releaser<K>>) {
        self.release_inner(releaser, true);
    }

    /// Release one reference *without* returning a permit to the semaphore. Used
    /// when the caller never actually admitted (timed out or was cancelled before
    /// admission) — the reference count still must be unwound, but there is no
    /// permit to give back.
    pub fn release_without_semaphore_release(&self, releaser: &Arc<Releaser<K>>) {
        self.release_inner(releaser, false);
    }

    fn release_inner(&self, releaser: &Arc<Releaser<K>>, release_semaphore: bool) {
        if let Some(key) = releaser.decrement() {
            // We were the last reference: remove the map entry for `key`. Another
            // `get_or_add` racing us will either have already cloned the Arc before
            // our `decrement()` above flipped `in_use` to false (in which case its
            // `try_increment` fails and it retries with a fresh candidate), or it
            // will look the key up fresh here and find nothing (and insert its own
            // candidate). Either way there is no window where a joiner can observe
            // `in_use == true` for an entry we are about to remove.
            let idx = self.shard_index(&key);
            let mut shard = self.shards[idx].lock();
            shard.remove(&key);
            drop(shard);
            trace!("keyed lock entry drained, returning releaser to pool");
            self.recycle(Arc::clone(releaser));
        }
        if release_semaphore {
            releaser.semaphore.signal();
        }
    }

    /// Whether a live (non-draining) record is present for `key`.
    pub fn is_in_use(&self, key: &K) -> bool {
        let idx = self.shard_index(key);
        let shard = self.shards[idx].lock();
        shard.get(key).map_or(false, |r| r.is_in_use())
    }

    /// Number of current holders + waiters for `key` (`0` if not live).
    pub fn remaining_count(&self, key: &K) -> usize {
        let idx = self.shard_index(key);
        let shard = self.shards[idx].lock();
        shard.get(key).map_or(0, |r| r.ref_count())
    }

    /// Available admissions for `key`: `max_count - remaining_count(key)`.
    pub fn current_count(&self, key: &K) -> usize {
        self.max_count.saturating_sub(self.remaining_count(key))
    }

    /// Configured admission ceiling shared by every key.
    pub fn max_count(&self) -> usize {
        self.max_count
    }

    /// Total number of live entries across every shard (for tests/diagnostics).
    pub fn len(&self) -> usize {
        self.shards.iter().map(|s| s.lock().len()).sum()
    }

    /// Whether the map currently holds no live entries.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Best-effort teardown: drops every contained entry and clears the pool.
    /// Matches the source's policy of silently discarding teardown errors —
    /// semaphores here have nothing fallible to dispose of, so this simply frees
    /// state. Behavior of operations called after `dispose()` is unspecified.
    pub fn dispose(&self) {
        for shard in &self.shards {
            shard.lock().clear();
        }
        trace!("keyed lock map disposed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn map(max_count: usize) -> KeyedLockMap<&'static str> {
        KeyedLockMap::new(KeyedLockOptions {
            max_count,
            ..Default::default()
        })
        .unwrap()
    }

    #[test]
    fn test_get_or_add_then_release_empties_map() {
        let m = map(1);
        let r = m.get_or_add("a");
        assert_eq!(m.len(), 1);
        m.release(&r);
        assert_eq!(m.len(), 0);
        assert_eq!(r.semaphore.available_permits(), 1);
    }

    #[test]
    fn test_distinct_keys_get_distinct_entries() {
        let m = map(1);
        let a = m.get_or_add("a");
        let b = m.get_or_add("b");
        assert_eq!(m.len(), 2);
        assert!(!Arc::ptr_eq(&a, &b));
        m.release(&a);
        m.release(&b);
        assert!(m.is_empty());
    }

    #[test]
    fn test_joining_same_key_increments_refcount() {
        let m = map(1);
        let a1 = m.get_or_add("a");
        let a2 = m.get_or_add("a");
        assert!(Arc::ptr_eq(&a1, &a2));
        assert_eq!(m.remaining_count(&"a"), 2);
        m.release(&a1);
        assert_eq!(m.remaining_count(&"a"), 1);
        assert!(m.is_in_use(&"a"));
        m.release(&a2);
        assert_eq!(m.remaining_count(&"a"), 0);
        assert!(!m.is_in_use(&"a"));
    }

    #[test]
    fn test_release_without_semaphore_release_does_not_return_permit() {
        let m = map(1);
        let r = m.get_or_add("a");
        assert_eq!(r.semaphore.available_permits(), 1);
        let _ = r.semaphore.try_wait(); // simulate the permit already being held
        m.release_without_semaphore_release(&r);
        assert!(m.is_empty());
        assert_eq!(r.semaphore.available_permits(), 0);
    }

    #[test]
    fn test_pool_reuse_after_drain() {
        let m = KeyedLockMap::new(KeyedLockOptions {
            max_count: 1,
            pool_size: 2,
            pool_initial_fill: 2,
            ..Default::default()
        })
        .unwrap();
        assert_eq!(m.pool.as_ref().unwrap().len(), 2);

        let r1 = m.get_or_add("a");
        assert_eq!(m.pool.as_ref().unwrap().len(), 1);
        m.release(&r1);
        assert_eq!(m.pool.as_ref().unwrap().len(), 2);

        let r2 = m.get_or_add("b");
        m.release(&r2);
        assert!(m.pool.as_ref().unwrap().len() <= 2);
    }

    #[test]
    fn test_current_count_reflects_outstanding_references() {
        let m = map(3);
        let r = m.get_or_add("a");
        assert_eq!(m.current_count(&"a"), 2);
        m.get_or_add("a");
        assert_eq!(m.current_count(&"a"), 1);
        m.release(&r);
        assert_eq!(m.current_count(&"a"), 2);
    }

    #[test]
    fn test_rejects_invalid_options() {
        let result = KeyedLockMap::<&str>::new(KeyedLockOptions {
            max_count: 0,
            ..Default::default()
        });
        assert!(result.is_err());
    }
}
