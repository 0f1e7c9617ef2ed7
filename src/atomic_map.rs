//! `AtomicLockMap`: the ownership-tracking, reference-count-free simplification
//! of `KeyedLockMap` (§4.4). An entry lives exactly from the winning insert to
//! that same caller's release — there is no refcount and no per-record
//! monitor; membership in the map *is* the only state. `get_or_add` reports
//! whether the caller is the one who just won the insert (`true`, the
//! "owner") or found an entry already there (`false`, a "joiner"), which
//! `AtomicLocker` uses to offer "run this exactly once across all callers for
//! this key" semantics in addition to ordinary admission control.

use crate::error::ConfigError;
use crate::options::AtomicLockOptions;
use crate::semaphore::CountedSemaphore;
use parking_lot::Mutex;
use std::collections::hash_map::RandomState;
use std::collections::HashMap;
use std::hash::{BuildHasher, Hash};
use std::sync::Arc;
use tracing::trace;

/// Sharded map from `key` to a bare `CountedSemaphore` — no refcount, no
/// pooling, no per-record monitor. An entry is present for exactly as long as
/// its owner holds it; joiners only ever read the map, they never extend an
/// entry's lifetime or shorten it.
pub struct AtomicLockMap<K, S = RandomState> {
    shards: Vec<Mutex<HashMap<K, Arc<CountedSemaphore>, S>>>,
    max_count: usize,
    hasher: S,
}

impl<K> AtomicLockMap<K, RandomState>
where
    K: Eq + Hash + Clone,
{
    /// Construct with the default hasher.
    pub fn new(options: AtomicLockOptions) -> Result<Self, ConfigError> {
        Self::with_hasher(options, RandomState::default())
    }
}

impl<K, S> AtomicLockMap<K, S>
where
    K: Eq + Hash + Clone,
    S: BuildHasher + Clone,
{
    /// Construct with a custom hasher.
    pub fn with_hasher(options: AtomicLockOptions, hasher: S) -> Result<Self, ConfigError> {
        options.validate()?;
        let shard_count = options.concurrency_level.max(1);
        let shards = (0..shard_count)
            .map(|_| Mutex::new(HashMap::with_hasher(hasher.clone())))
            .collect();
        Ok(Self {
            shards,
            max_count: options.max_count,
            hasher,
        })
    }

    fn shard_index(&self, key: &K) -> usize {
        let hash = self.hasher.hash_one(key);
        (hash as usize) % self.shards.len()
    }

    /// Return `key`'s semaphore plus whether this call is the one that
    /// created it (`true`, owner) or found an existing live entry (`false`,
    /// joiner). Unlike `KeyedLockMap::get_or_add` there is no draining state
    /// to retry against: an entry is either present (stable until its owner
    /// releases it) or absent, so a single check-then-insert under the shard
    /// lock is sufficient.
    pub fn get_or_add(&self, key: K) -> (K, Arc<CountedSemaphore>, bool) {
        let idx = self.shard_index(&key);

        // Optimistic lookup: avoids allocating a semaphore on the common
        // join path.
        {
            let shard = self.shards[idx].lock();
            if let Some(existing) = shard.get(&key) {
                return (key, Arc::clone(existing), false);
            }
        }

        let candidate = Arc::new(CountedSemaphore::new(self.max_count));
        let mut shard = self.shards[idx].lock();
        match shard.get(&key) {
            Some(existing) => (key, Arc::clone(existing), false),
            None => {
                shard.insert(key.clone(), Arc::clone(&candidate));
                (key, candidate, true)
            }
        }
    }

    /// Release one admission. If `owner`, the map entry for `key` is removed
    /// first (§4.5: "if isOwner, remove the map entry; then release one
    /// permit") — a joiner's release never touches the map.
    pub fn release(&self, key: &K, semaphore: &Arc<CountedSemaphore>, owner: bool) {
        self.release_inner(key, semaphore, owner, true);
    }

    /// Release without returning a permit (timeout/cancellation before
    /// admission). An owner that never got admitted still removes its entry;
    /// a joiner that never got admitted does nothing.
    pub fn release_without_semaphore_release(&self, key: &K, semaphore: &Arc<CountedSemaphore>, owner: bool) {
        self.release_inner(key, semaphore, owner, false);
    }

    fn release_inner(&self, key: &K, semaphore: &Arc<CountedSemaphore>, owner: bool, release_semaphore: bool) {
        if owner {
            let idx = self.shard_index(key);
            let mut shard = self.shards[idx].lock();
            shard.remove(key);
            drop(shard);
            trace!("atomic lock entry owner released, entry removed");
        }
        if release_semaphore {
            semaphore.signal();
        }
    }

    /// Whether a live entry is present for `key`.
    pub fn is_in_use(&self, key: &K) -> bool {
        let idx = self.shard_index(key);
        self.shards[idx].lock().contains_key(key)
    }

    /// Number of current holders + waiters for `key` (`0` if not live).
    pub fn remaining_count(&self, key: &K) -> usize {
        let idx = self.shard_index(key);
        let shard = self.shards[idx].lock();
        shard.get(key).map_or(0, |s| s.in_use())
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

    /// Best-effort teardown: drops every contained entry. Behavior of
    /// operations called after `dispose()` is unspecified.
    pub fn dispose(&self) {
        for shard in &self.shards {
            shard.lock().clear();
        }
        trace!("atomic lock map disposed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn map(max_count: usize) -> AtomicLockMap<&'static str> {
        AtomicLockMap::new(AtomicLockOptions {
            max_count,
            ..Default::default()
        })
        .unwrap()
    }

    #[test]
    fn test_first_caller_owns_entry() {
        let m = map(1);
        let (key, sem, owner) = m.get_or_add("a");
        assert!(owner);
        m.release(&key, &sem, owner);
    }

    #[test]
    fn test_second_caller_joins_without_owning() {
        let m = map(1);
        let (k1, s1, owner1) = m.get_or_add("a");
        let (k2, s2, owner2) = m.get_or_add("a");
        assert!(owner1);
        assert!(!owner2);
        assert!(Arc::ptr_eq(&s1, &s2));
        m.release(&k1, &s1, owner1);
        m.release(&k2, &s2, owner2);
    }

    #[test]
    fn test_after_drain_next_caller_owns_again() {
        let m = map(1);
        let (k1, s1, owner1) = m.get_or_add("a");
        assert!(owner1);
        m.release(&k1, &s1, owner1);
        assert!(m.is_empty());
        let (k2, s2, owner2) = m.get_or_add("a");
        assert!(owner2);
        m.release(&k2, &s2, owner2);
    }

    #[test]
    fn test_distinct_keys_each_get_owner() {
        let m = map(1);
        let (ka, sa, a_owner) = m.get_or_add("a");
        let (kb, sb, b_owner) = m.get_or_add("b");
        assert!(a_owner);
        assert!(b_owner);
        m.release(&ka, &sa, a_owner);
        m.release(&kb, &sb, b_owner);
    }

    /// The core no-refcount invariant (§3, §4.5): a non-owner's release must
    /// never remove the entry, and the owner's release removes it regardless
    /// of how many joiners came and went in the meantime.
    #[test]
    fn test_only_owner_release_removes_entry() {
        let m = map(2);
        let (k1, s1, owner1) = m.get_or_add("a");
        let (k2, s2, owner2) = m.get_or_add("a");
        assert!(owner1 && !owner2);

        m.release(&k2, &s2, owner2);
        assert!(m.is_in_use(&"a"));

        m.release(&k1, &s1, owner1);
        assert!(!m.is_in_use(&"a"));
    }

    #[test]
    fn test_owner_timing_out_before_admission_still_removes_entry() {
        let m = map(1);
        let (key, sem, owner) = m.get_or_add("a");
        assert!(owner);
        // Reserve the only permit to simulate the owner never getting admitted.
        let _ = sem.try_wait();
        m.release_without_semaphore_release(&key, &sem, owner);
        assert!(m.is_empty());
    }
}
