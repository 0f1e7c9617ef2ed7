//! Cooperative cancellation tokens
//!
//! The distilled spec treats cancellation tokens as an externally supplied
//! collaborator. Nothing in the retrieval pack provides one, so this crate builds
//! its own the same way it builds everything else here: a condition variable
//! (`Condvar`) that can only ever transition from "not cancelled" to "cancelled",
//! never back. Cloning a token shares the same underlying flag — cancel any clone
//! and every clone (and everyone awaiting `cancelled()`) observes it.
//!
//! This is a single flat token: no child-token trees, no automatic propagation to
//! derived tokens. That mirrors the core's needs (§6's acquire-operation family
//! takes one token per call) without reproducing a full cancellation framework.

use crate::condvar::Condvar;
use std::sync::Arc;
use std::task::Waker;

/// A cooperative cancellation signal, cheap to clone and share across tasks.
#[derive(Clone)]
pub struct CancellationToken {
    inner: Arc<Condvar>,
}

impl CancellationToken {
    /// Create a new, not-yet-cancelled token.
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Condvar::new()),
        }
    }

    /// Create an already-cancelled token.
    #[must_use]
    pub fn cancelled_token() -> Self {
        let token = Self::new();
        token.cancel();
        token
    }

    /// Signal cancellation. Idempotent; wakes every current and future waiter.
    pub fn cancel(&self) {
        self.inner.notify_all();
    }

    /// Whether `cancel()` has been called.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.inner.is_notified()
    }

    /// Wait until the token is cancelled. Returns immediately if already cancelled.
    pub async fn cancelled(&self) {
        self.inner.wait().await;
    }

    /// Register a waker to be woken on cancellation, without checking or changing
    /// state. Used by `CountedSemaphore::wait_cancellable` to drive a single poll
    /// loop over both the semaphore's waiter queue and this token's.
    pub(crate) fn register_waker(&self, waker: Waker) {
        self.inner.register_waker(waker);
    }
}

impl Default for CancellationToken {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_token_not_cancelled() {
        let token = CancellationToken::new();
        assert!(!token.is_cancelled());
    }

    #[test]
    fn test_cancelled_token_constructor() {
        let token = CancellationToken::cancelled_token();
        assert!(token.is_cancelled());
    }

    #[test]
    fn test_cancel_is_idempotent() {
        let token = CancellationToken::new();
        token.cancel();
        token.cancel();
        assert!(token.is_cancelled());
    }

    #[test]
    fn test_clone_shares_state() {
        let token = CancellationToken::new();
        let clone = token.clone();
        clone.cancel();
        assert!(token.is_cancelled());
    }

    #[compio::test]
    async fn test_cancelled_future_resolves_immediately_if_precancelled() {
        let token = CancellationToken::cancelled_token();
        token.cancelled().await;
    }

    #[compio::test]
    async fn test_cancelled_future_resolves_after_cancel() {
        let token = CancellationToken::new();
        let token2 = token.clone();
        let handle = compio::runtime::spawn(async move {
            token2.cancelled().await;
        });

        compio::time::sleep(std::time::Duration::from_millis(10)).await;
        token.cancel();

        compio::time::timeout(std::time::Duration::from_secs(1), handle)
            .await
            .expect("should complete after cancel")
            .unwrap();
    }
}
