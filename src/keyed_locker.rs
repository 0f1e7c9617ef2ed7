//! `KeyedLocker`: the facade exposing the acquire-operation family (§6) on top of
//! `KeyedLockMap`.
//!
//! Every variant follows the same four-step contract described in §4.3:
//! 1. `r <- map.get_or_add(key)` reserves the caller's slot.
//! 2. Wait on `r`'s semaphore in the chosen mode.
//! 3. On admission, return a guard whose drop calls `map.release(r)`.
//! 4. On timeout/cancellation without admission, call
//!    `map.release_without_semaphore_release(r)` and report "not entered".

use crate::cancellation::CancellationToken;
use crate::error::{Cancelled, ConfigError};
use crate::keyed_map::KeyedLockMap;
use crate::options::KeyedLockOptions;
use crate::releaser::Releaser;
use std::collections::hash_map::RandomState;
use std::hash::{BuildHasher, Hash};
use std::sync::Arc;
use std::time::Duration;

/// Facade over `KeyedLockMap` exposing the full acquire-operation family.
pub struct KeyedLocker<K, S = RandomState>
where
    K: Eq + Hash + Clone,
    S: BuildHasher + Clone,
{
    map: KeyedLockMap<K, S>,
}

impl<K> KeyedLocker<K, RandomState>
where
    K: Eq + Hash + Clone,
{
    /// Construct with the default hasher.
    pub fn new(options: KeyedLockOptions) -> Result<Self, ConfigError> {
        Ok(Self {
            map: KeyedLockMap::new(options)?,
        })
    }
}

impl<K, S> KeyedLocker<K, S>
where
    K: Eq + Hash + Clone,
    S: BuildHasher + Clone,
{
    /// Construct with a custom hasher.
    pub fn with_hasher(options: KeyedLockOptions, hasher: S) -> Result<Self, ConfigError> {
        Ok(Self {
            map: KeyedLockMap::with_hasher(options, hasher)?,
        })
    }

    /// Block the calling thread until `key` is acquired.
    pub fn lock(&self, key: K) -> KeyedLockGuard<'_, K, S> {
        let pending = PendingRelease::new(&self.map, self.map.get_or_add(key));
        pending.releaser().semaphore.wait_blocking();
        KeyedLockGuard::holding(&self.map, pending.admitted())
    }

    /// Suspend the current task until `key` is acquired.
    ///
    /// If the returned future is dropped before it resolves (the caller's task
    /// is cancelled while waiting), the reservation taken by `get_or_add` is
    /// unwound instead of leaking: see `PendingRelease`.
    pub async fn lock_async(&self, key: K) -> KeyedLockGuard<'_, K, S> {
        let pending = PendingRelease::new(&self.map, self.map.get_or_add(key));
        pending.releaser().semaphore.wait().await;
        KeyedLockGuard::holding(&self.map, pending.admitted())
    }

    /// Block the calling thread until `key` is acquired or `timeout` elapses.
    /// Returns the empty guard ("not entered") on timeout.
    pub fn lock_or_null(&self, key: K, timeout: Duration) -> KeyedLockGuard<'_, K, S> {
        let pending = PendingRelease::new(&self.map, self.map.get_or_add(key));
        if pending.releaser().semaphore.wait_blocking_timeout(timeout) {
            KeyedLockGuard::holding(&self.map, pending.admitted())
        } else {
            KeyedLockGuard::not_entered()
        }
    }

    /// Suspend until `key` is acquired or `timeout` elapses. Returns the empty
    /// guard on timeout.
    pub async fn lock_or_null_async(&self, key: K, timeout: Duration) -> KeyedLockGuard<'_, K, S> {
        let pending = PendingRelease::new(&self.map, self.map.get_or_add(key));
        if pending.releaser().semaphore.wait_timeout(timeout).await {
            KeyedLockGuard::holding(&self.map, pending.admitted())
        } else {
            KeyedLockGuard::not_entered()
        }
    }

    /// Suspend until `key` is acquired or `token` is cancelled. On cancellation,
    /// the reference is unwound and `Err(Cancelled)` is returned.
    pub async fn lock_cancellable_async(
        &self,
        key: K,
        token: &CancellationToken,
    ) -> Result<KeyedLockGuard<'_, K, S>, Cancelled> {
        let pending = PendingRelease::new(&self.map, self.map.get_or_add(key));
        match pending.releaser().semaphore.wait_cancellable(token).await {
            Ok(()) => Ok(KeyedLockGuard::holding(&self.map, pending.admitted())),
            Err(Cancelled) => Err(Cancelled),
        }
    }

    /// Run `f` under `key`'s lock if acquired within `timeout`, blocking the
    /// calling thread. Returns whether `f` ran.
    pub fn try_lock<F: FnOnce()>(&self, key: K, timeout: Duration, f: F) -> bool {
        match self.lock_or_null(key, timeout) {
            guard if guard.is_entered() => {
                f();
                true
            }
            _ => false,
        }
    }

    /// Async counterpart to `try_lock`: runs `fut` under `key`'s lock if acquired
    /// within `timeout`. Returns whether `fut` ran.
    pub async fn try_lock_async<Fut: std::future::Future<Output = ()>>(
        &self,
        key: K,
        timeout: Duration,
        fut: Fut,
    ) -> bool {
        let guard = self.lock_or_null_async(key, timeout).await;
        if guard.is_entered() {
            fut.await;
            true
        } else {
            false
        }
    }

    /// When `should_lock` is true, delegate to `lock`; otherwise return the
    /// no-op handle without touching the map or semaphore at all.
    pub fn conditional_lock(&self, key: K, should_lock: bool) -> KeyedLockGuard<'_, K, S> {
        if should_lock {
            self.lock(key)
        } else {
            KeyedLockGuard::not_entered()
        }
    }

    /// Async counterpart to `conditional_lock`.
    pub async fn conditional_lock_async(&self, key: K, should_lock: bool) -> KeyedLockGuard<'_, K, S> {
        if should_lock {
            self.lock_async(key).await
        } else {
            KeyedLockGuard::not_entered()
        }
    }

    /// Whether a live (non-draining) record is present for `key`.
    pub fn is_in_use(&self, key: &K) -> bool {
        self.map.is_in_use(key)
    }

    /// Number of current holders + waiters for `key`.
    pub fn remaining_count(&self, key: &K) -> usize {
        self.map.remaining_count(key)
    }

    /// Available admissions for `key`.
    pub fn current_count(&self, key: &K) -> usize {
        self.map.current_count(key)
    }

    /// Best-effort teardown; behavior after calling this is unspecified.
    pub fn dispose(&self) {
        self.map.dispose();
    }
}

/// Holds a reservation taken by `get_or_add` while its caller waits on the
/// semaphore, and unwinds that reservation (without returning a permit, since
/// none was ever admitted) if dropped before `admitted()` is called. This is
/// what keeps a cancelled/dropped `lock_async` future from permanently wedging
/// its key's reference count.
struct PendingRelease<'a, K, S>
where
    K: Eq + Hash + Clone,
    S: BuildHasher + Clone,
{
    map: &'a KeyedLockMap<K, S>,
    releaser: Option<Arc<Releaser<K>>>,
}

impl<'a, K, S> PendingRelease<'a, K, S>
where
    K: Eq + Hash + Clone,
    S: BuildHasher + Clone,
{
    fn new(map: &'a KeyedLockMap<K, S>, releaser: Arc<Releaser<K>>) -> Self {
        Self {
            map,
            releaser: Some(releaser),
        }
    }

    fn releaser(&self) -> &Arc<Releaser<K>> {
        self.releaser.as_ref().expect("releaser taken before admitted()")
    }

    /// Admission succeeded: disarm the unwind and hand back the releaser.
    fn admitted(mut self) -> Arc<Releaser<K>> {
        self.releaser.take().expect("releaser taken before admitted()")
    }
}

impl<'a, K, S> Drop for PendingRelease<'a, K, S>
where
    K: Eq + Hash + Clone,
    S: BuildHasher + Clone,
{
    fn drop(&mut self) {
        if let Some(releaser) = self.releaser.take() {
            self.map.release_without_semaphore_release(&releaser);
        }
    }
}

/// RAII guard returned by every `KeyedLocker` acquire method. Dropping a guard
/// that actually holds a lock releases it; the "not entered" variant (timeout,
/// pre-cancellation, or `conditional_lock(_, false)`) is a pure no-op to drop.
pub struct KeyedLockGuard<'a, K, S>
where
    K: Eq + Hash + Clone,
    S: BuildHasher + Clone,
{
    held: Option<(&'a KeyedLockMap<K, S>, Arc<Releaser<K>>)>,
}

impl<'a, K, S> KeyedLockGuard<'a, K, S>
where
    K: Eq + Hash + Clone,
    S: BuildHasher + Clone,
{
    fn holding(map: &'a KeyedLockMap<K, S>, releaser: Arc<Releaser<K>>) -> Self {
        Self {
            held: Some((map, releaser)),
        }
    }

    fn not_entered() -> Self {
        Self { held: None }
    }

    /// Whether this guard actually holds a lock (`false` for timeouts and
    /// `conditional_lock(_, false)`).
    pub fn is_entered(&self) -> bool {
        self.held.is_some()
    }
}

impl<'a, K, S> Drop for KeyedLockGuard<'a, K, S>
where
    K: Eq + Hash + Clone,
    S: BuildHasher + Clone,
{
    fn drop(&mut self) {
        if let Some((map, releaser)) = self.held.take() {
            map.release(&releaser);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc as StdArc;

    fn locker(max_count: usize) -> KeyedLocker<&'static str> {
        KeyedLocker::new(KeyedLockOptions {
            max_count,
            ..Default::default()
        })
        .unwrap()
    }

    #[test]
    fn test_lock_then_drop_releases() {
        let l = locker(1);
        {
            let _g = l.lock("a");
            assert_eq!(l.remaining_count(&"a"), 1);
        }
        assert_eq!(l.remaining_count(&"a"), 0);
        assert!(!l.is_in_use(&"a"));
    }

    #[test]
    fn test_timeout_zero_does_not_leak_refcount() {
        let l = locker(1);
        let _held = l.lock("x");
        let second = l.lock_or_null("x", Duration::from_millis(0));
        assert!(!second.is_entered());
        assert_eq!(l.remaining_count(&"x"), 1);
    }

    #[test]
    fn test_timeout_then_release_then_retry_succeeds() {
        let l = locker(1);
        let held = l.lock("x");
        assert!(!l.lock_or_null("x", Duration::from_millis(0)).is_entered());
        drop(held);
        assert!(l.lock_or_null("x", Duration::from_millis(0)).is_entered());
    }

    #[compio::test]
    async fn test_dropping_pending_wait_unwinds_refcount() {
        let l = StdArc::new(locker(1));
        let held = l.lock_async("x").await;
        assert_eq!(l.remaining_count(&"x"), 1);

        let l2 = l.clone();
        let result = compio::time::timeout(Duration::from_millis(0), async move {
            l2.lock_async("x").await
        })
        .await;
        assert!(result.is_err(), "zero-length timeout should fire before admission");
        assert_eq!(l.remaining_count(&"x"), 1, "dropped waiter must not leak a reference");

        drop(held);
        assert!(l.lock_or_null("x", Duration::from_millis(50)).is_entered());
    }

    #[test]
    fn test_conditional_lock_false_is_pure_noop() {
        let l = locker(1);
        let guard = l.conditional_lock("a", false);
        assert!(!guard.is_entered());
        assert!(!l.is_in_use(&"a"));
        assert_eq!(l.remaining_count(&"a"), 0);
    }

    #[test]
    fn test_recursive_conditional_lock_factorial() {
        fn factorial(l: &KeyedLocker<&'static str>, depth: u64) -> u64 {
            let _guard = l.conditional_lock("fact", depth == 0);
            if depth == 0 {
                1
            } else {
                depth * factorial(l, depth - 1)
            }
        }

        let l = locker(1);
        assert_eq!(factorial(&l, 5), 120);
    }

    #[test]
    fn test_try_lock_runs_action_and_releases() {
        let l = locker(1);
        let ran = StdArc::new(AtomicUsize::new(0));
        let ran2 = ran.clone();
        let ok = l.try_lock("x", Duration::from_millis(50), move || {
            ran2.fetch_add(1, Ordering::SeqCst);
        });
        assert!(ok);
        assert_eq!(ran.load(Ordering::SeqCst), 1);
        assert!(!l.is_in_use(&"x"));
    }

    #[test]
    fn test_try_lock_reports_false_on_timeout() {
        let l = locker(1);
        let _held = l.lock("x");
        let ok = l.try_lock("x", Duration::from_millis(0), || panic!("must not run"));
        assert!(!ok);
    }

    #[compio::test]
    async fn test_two_keys_proceed_independently() {
        let l = StdArc::new(locker(1));
        let ga = l.lock_async("a").await;
        let gb = l.lock_async("b").await;
        assert_eq!(l.remaining_count(&"a"), 1);
        assert_eq!(l.remaining_count(&"b"), 1);
        drop(ga);
        drop(gb);
        assert!(l.is_in_use(&"a") == false && l.is_in_use(&"b") == false);
    }

    #[compio::test]
    async fn test_cancellation_unwinds_refcount_without_removing_holder() {
        let l = StdArc::new(locker(1));
        let held = l.lock_async("x").await;
        let token = CancellationToken::new();

        let l2 = l.clone();
        let token2 = token.clone();
        let handle = compio::runtime::spawn(async move { l2.lock_cancellable_async("x", &token2).await });

        compio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(l.remaining_count(&"x"), 2);
        token.cancel();

        let result = compio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("completes after cancel")
            .unwrap();
        assert!(result.is_err());
        assert_eq!(l.remaining_count(&"x"), 1);
        assert!(l.is_in_use(&"x"));
        drop(held);
        assert!(!l.is_in_use(&"x"));
    }
}
