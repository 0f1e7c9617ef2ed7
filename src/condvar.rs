//! Asynchronous condition variable for task notification
//!
//! Unlike `std::sync::Condvar`, this implementation is standalone (no external mutex
//! to pair it with) and uses interior mutability. It backs `CancellationToken` — a
//! cancellation token is, structurally, a condition variable that can only ever be
//! notified once and never cleared.
//!
//! # Memory Safety
//!
//! The `notified` flag is checked INSIDE the waiter queue's critical section to
//! prevent a lost wakeup:
//!
//! ```text
//! WITHOUT atomic check-and-add:
//! 1. Waiter: check notified -> false (no lock)
//! 2. Notifier: set notified -> true
//! 3. Notifier: drain waiters
//! 4. Waiter: add to waiters -> LOST WAKEUP
//!
//! WITH check-register-recheck:
//! 1. Waiter: check notified -> false, register, check again -> still false, pend
//! 2. Notifier: set notified -> true, drain waiters
//! ```

use crate::waiter_queue::{WaiterQueue, WaiterQueueTrait};
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::task::{Context, Poll, Waker};

/// A compio-compatible async condition variable for task notification.
pub struct Condvar {
    notified: AtomicBool,
    waiters: WaiterQueue,
}

impl Condvar {
    /// Create a new condition variable in the "not notified" state.
    #[must_use]
    pub fn new() -> Self {
        Self {
            notified: AtomicBool::new(false),
            waiters: WaiterQueue::new(),
        }
    }

    /// Wait for notification. Returns immediately if already notified.
    pub fn wait(&self) -> WaitFuture<'_> {
        WaitFuture { condvar: self }
    }

    /// Wake one waiting task. If no tasks are waiting, the notification is sticky:
    /// the next call to `wait()` returns immediately.
    pub fn notify_one(&self) {
        self.notified.store(true, Ordering::Release);
        self.waiters.wake_one();
    }

    /// Wake every waiting task and stick the notification for future waiters.
    pub fn notify_all(&self) {
        self.notified.store(true, Ordering::Release);
        self.waiters.wake_all();
    }

    /// Whether the condition variable is currently in the notified state.
    #[must_use]
    pub fn is_notified(&self) -> bool {
        self.notified.load(Ordering::Acquire)
    }

    /// Reset to the "not notified" state; future `wait()` calls will block again.
    pub fn clear(&self) {
        self.notified.store(false, Ordering::Relaxed);
    }

    /// Register a waker without consulting or changing `notified`. Used by
    /// `CountedSemaphore::wait_cancellable` to listen on both a semaphore and a
    /// cancellation token with a single poll loop.
    pub(crate) fn register_waker(&self, waker: Waker) {
        self.waiters.add_waiter(waker);
    }
}

impl Default for Condvar {
    fn default() -> Self {
        Self::new()
    }
}

/// Future returned by `Condvar::wait()`.
pub struct WaitFuture<'a> {
    condvar: &'a Condvar,
}

impl<'a> Future for WaitFuture<'a> {
    type Output = ();

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<()> {
        if self.condvar.is_notified() {
            return Poll::Ready(());
        }

        self.condvar.waiters.add_waiter(cx.waker().clone());

        // Re-check after registering: catches a notify that raced with registration.
        if self.condvar.is_notified() {
            return Poll::Ready(());
        }

        Poll::Pending
    }
}
