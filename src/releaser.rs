//! Per-key record: key, semaphore, reference count, in-use flag, per-record monitor.
//!
//! See the state machine in the design notes: `Pooled -> Live -> Pooled`, with a
//! transient `Draining` state that exists only while `KeyedLockMap::release` holds
//! the monitor and is about to remove the map entry.

use crate::semaphore::CountedSemaphore;
use parking_lot::Mutex;

/// Mutable part of a `Releaser`, guarded by a single short-held lock. Reads/writes
/// of `key`, `ref_count`, and `in_use` are always consistent with one another.
struct ReleaserState<K> {
    key: Option<K>,
    ref_count: usize,
    in_use: bool,
}

/// A keyed lock slot: one semaphore, reference-counted across every acquirer
/// currently holding or waiting on this key.
///
/// Invariant: while `in_use` is true, `key` is `Some` and the record is present
/// in its `KeyedLockMap` shard under that key; `ref_count > 0` iff `in_use`.
pub struct Releaser<K> {
    pub(crate) semaphore: CountedSemaphore,
    state: Mutex<ReleaserState<K>>,
}

impl<K: Clone> Releaser<K> {
    /// Allocate a fresh, pooled (not-yet-activated) releaser.
    pub(crate) fn new_pooled(max_count: usize) -> Self {
        Self {
            semaphore: CountedSemaphore::new(max_count),
            state: Mutex::new(ReleaserState {
                key: None,
                ref_count: 0,
                in_use: false,
            }),
        }
    }

    /// Activate a pooled/fresh releaser for `key` with `ref_count = 1`. Only called
    /// on the candidate that is about to be inserted into the map — never on a
    /// releaser another thread might already be observing.
    pub(crate) fn activate(&self, key: K) {
        let mut state = self.state.lock();
        debug_assert!(!state.in_use, "activating a releaser that is already live");
        state.key = Some(key);
        state.ref_count = 1;
        state.in_use = true;
    }

    /// Attempt to join this releaser as an additional waiter/holder. Fails (returns
    /// `false`) if the releaser is mid-teardown (`in_use == false`) — the caller
    /// must retry `KeyedLockMap::get_or_add` with a fresh candidate in that case.
    pub(crate) fn try_increment(&self) -> bool {
        let mut state = self.state.lock();
        if !state.in_use {
            return false;
        }
        state.ref_count += 1;
        true
    }

    /// Decrement the reference count. Returns `Some(key)` if this was the last
    /// reference (the releaser is now draining and must be removed from the map by
    /// the caller), `None` otherwise. On the `Some` path this also resets the
    /// releaser to its pooled state (`in_use = false`, `key = None`) so it is ready
    /// to be recycled — but the caller is responsible for actually removing the map
    /// entry, which must happen while still holding the state most callers will
    /// have already captured via the returned key.
    pub(crate) fn decrement(&self) -> Option<K> {
        let mut state = self.state.lock();
        debug_assert!(state.ref_count > 0, "decrementing a releaser with no references");
        if state.ref_count == 1 {
            state.ref_count = 0;
            state.in_use = false;
            state.key.take()
        } else {
            state.ref_count -= 1;
            None
        }
    }

    /// Current reference count (holders + waiters). `0` if pooled.
    pub(crate) fn ref_count(&self) -> usize {
        self.state.lock().ref_count
    }

    /// Whether this releaser is currently live (present in the map under some key).
    pub(crate) fn is_in_use(&self) -> bool {
        self.state.lock().in_use
    }
}
