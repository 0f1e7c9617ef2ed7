//! Bounded counted semaphore with blocking, cooperative-suspend, timed, and
//! cancellable waits.
//!
//! This is the "supplied by the runtime" primitive of the spec's component table —
//! nothing in the retrieval pack ships one, so it is built the same way
//! `compio-sync::Semaphore` builds its own binary semaphore: an atomic permit
//! counter for the lock-free fast path, plus a waiter queue for the slow path.
//! `CountedSemaphore` generalizes that to `max_count > 1` and adds the blocking,
//! timed, and cancellable forms that `KeyedLocker`/`StripedLocker`/`AtomicLocker`
//! need (§5: "parallel threads AND single-threaded cooperative tasks coexist").
//!
//! Unlike `compio_sync::Semaphore`, acquiring here does not hand back an
//! auto-releasing guard: `KeyedLockMap::release` is the one place a permit gets
//! returned, so the raw `wait_*`/`try_wait`/`signal` operations are used directly
//! by the map and by `StripedLocker`. `CountedPermit`, the RAII wrapper, is kept
//! for standalone use of the semaphore (e.g. in tests and in `StripedLocker`,
//! which has no map to route the release through).

use crate::cancellation::CancellationToken;
use crate::error::Cancelled;
use crate::waiter_queue::{WaiterQueue, WaiterQueueTrait};
use parking_lot::{Condvar, Mutex};
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::task::{Context, Poll};
use std::time::{Duration, Instant};

/// A bounded counted semaphore: up to `max_count` admissions outstanding at once.
pub struct CountedSemaphore {
    /// Available admissions, in `[0, max_count]`.
    permits: AtomicUsize,
    max_count: usize,
    /// Cooperative-suspend waiters.
    async_waiters: WaiterQueue,
    /// Thread-blocking waiters.
    blocking_lock: Mutex<()>,
    blocking_cv: Condvar,
}

impl CountedSemaphore {
    /// Create a semaphore with `max_count` admissions available up front.
    ///
    /// # Panics
    /// Panics if `max_count` is 0; use `KeyedLockOptions`/etc. for a fallible
    /// constructor that surfaces `ConfigError::InvalidMaxCount` instead.
    #[must_use]
    pub fn new(max_count: usize) -> Self {
        assert!(max_count > 0, "CountedSemaphore must have at least one permit");
        Self {
            permits: AtomicUsize::new(max_count),
            max_count,
            async_waiters: WaiterQueue::new(),
            blocking_lock: Mutex::new(()),
            blocking_cv: Condvar::new(),
        }
    }

    /// Configured admission ceiling.
    #[must_use]
    pub fn max_count(&self) -> usize {
        self.max_count
    }

    /// Admissions currently available.
    #[must_use]
    pub fn available_permits(&self) -> usize {
        self.permits.load(Ordering::Acquire)
    }

    /// Admissions currently outstanding (`max_count - available_permits`).
    #[must_use]
    pub fn in_use(&self) -> usize {
        self.max_count - self.available_permits()
    }

    /// Lock-free attempt to take one permit. Returns `true` on success.
    fn try_take(&self) -> bool {
        let mut current = self.permits.load(Ordering::Acquire);
        loop {
            if current == 0 {
                return false;
            }
            match self.permits.compare_exchange_weak(
                current,
                current - 1,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return true,
                Err(actual) => current = actual,
            }
        }
    }

    /// Try to take a permit without waiting.
    #[must_use]
    pub fn try_wait(&self) -> bool {
        self.try_take()
    }

    /// Release one permit and wake one waiter of each kind (at most one total ends
    /// up admitted by this call; both kinds are woken because either might be the
    /// one actually waiting).
    pub fn signal(&self) {
        self.permits.fetch_add(1, Ordering::Release);
        self.async_waiters.wake_one();
        // Scope the lock so we never hold it while calling notify.
        {
            let _guard = self.blocking_lock.lock();
        }
        self.blocking_cv.notify_one();
    }

    // ---- blocking family ----

    /// Block the calling thread until a permit is available.
    pub fn wait_blocking(&self) {
        if self.try_take() {
            return;
        }
        let mut guard = self.blocking_lock.lock();
        loop {
            if self.try_take() {
                return;
            }
            self.blocking_cv.wait(&mut guard);
        }
    }

    /// Block the calling thread until a permit is available or `timeout` elapses.
    /// Returns `true` iff a permit was taken.
    #[must_use]
    pub fn wait_blocking_timeout(&self, timeout: Duration) -> bool {
        if self.try_take() {
            return true;
        }
        if timeout.is_zero() {
            return false;
        }
        let deadline = Instant::now() + timeout;
        let mut guard = self.blocking_lock.lock();
        loop {
            if self.try_take() {
                return true;
            }
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            let timed_out = self.blocking_cv.wait_for(&mut guard, deadline - now).timed_out();
            if timed_out && !self.try_take() {
                return false;
            } else if timed_out {
                return true;
            }
        }
    }

    // ---- cooperative-suspend family ----

    /// Suspend the current task until a permit is available.
    pub fn wait(&self) -> WaitFuture<'_> {
        WaitFuture { semaphore: self }
    }

    /// Suspend until a permit is available or `timeout` elapses. Returns `true` iff
    /// a permit was taken.
    pub async fn wait_timeout(&self, timeout: Duration) -> bool {
        if self.try_take() {
            return true;
        }
        if timeout.is_zero() {
            return false;
        }
        compio::time::timeout(timeout, self.wait()).await.is_ok()
    }

    /// Suspend until a permit is available or `token` is cancelled, whichever comes
    /// first. The reference-count unwinding for the losing case is the caller's
    /// (`KeyedLockMap`'s) responsibility, not this method's — this only reports
    /// which of the two outcomes happened.
    pub fn wait_cancellable<'a>(&'a self, token: &'a CancellationToken) -> WaitCancellableFuture<'a> {
        WaitCancellableFuture {
            semaphore: self,
            token,
        }
    }
}

/// Future returned by `CountedSemaphore::wait()`.
pub struct WaitFuture<'a> {
    semaphore: &'a CountedSemaphore,
}

impl<'a> Future for WaitFuture<'a> {
    type Output = ();

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<()> {
        // Fast path.
        if self.semaphore.try_take() {
            return Poll::Ready(());
        }

        // Register unconditionally, then retry: catches a signal() that raced with
        // registration.
        self.semaphore.async_waiters.add_waiter(cx.waker().clone());

        if self.semaphore.try_take() {
            return Poll::Ready(());
        }

        Poll::Pending
    }
}

/// Future returned by `CountedSemaphore::wait_cancellable()`.
pub struct WaitCancellableFuture<'a> {
    semaphore: &'a CountedSemaphore,
    token: &'a CancellationToken,
}

impl<'a> Future for WaitCancellableFuture<'a> {
    type Output = Result<(), Cancelled>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Result<(), Cancelled>> {
        // Cancellation is observed only during the wait, never after admission: once
        // we return Ready(Ok(())) below, the caller owns the permit regardless of
        // subsequent cancellation.
        if self.token.is_cancelled() {
            return Poll::Ready(Err(Cancelled));
        }
        if self.semaphore.try_take() {
            return Poll::Ready(Ok(()));
        }

        self.semaphore.async_waiters.add_waiter(cx.waker().clone());
        self.token.register_waker(cx.waker().clone());

        if self.token.is_cancelled() {
            return Poll::Ready(Err(Cancelled));
        }
        if self.semaphore.try_take() {
            return Poll::Ready(Ok(()));
        }

        Poll::Pending
    }
}

/// RAII guard for standalone use of `CountedSemaphore` (no owning `KeyedLockMap`
/// entry to route the release through). Releases its permit via `signal()` on drop.
pub struct CountedPermit<'a> {
    semaphore: &'a CountedSemaphore,
}

impl<'a> Drop for CountedPermit<'a> {
    fn drop(&mut self) {
        self.semaphore.signal();
    }
}

impl CountedSemaphore {
    /// Acquire a permit, blocking the calling thread, returning a guard that
    /// releases it on drop.
    pub fn acquire_blocking(&self) -> CountedPermit<'_> {
        self.wait_blocking();
        CountedPermit { semaphore: self }
    }

    /// Acquire a permit without blocking, returning a guard on success.
    #[must_use]
    pub fn try_acquire(&self) -> Option<CountedPermit<'_>> {
        self.try_wait().then_some(CountedPermit { semaphore: self })
    }

    /// Acquire a permit, suspending the current task, returning a guard that
    /// releases it on drop.
    pub async fn acquire(&self) -> CountedPermit<'_> {
        self.wait().await;
        CountedPermit { semaphore: self }
    }
}
