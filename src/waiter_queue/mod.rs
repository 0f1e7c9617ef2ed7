//! Platform-specific waiter queue implementations
//!
//! This module provides different implementations of waiter queues based on the
//! target platform to achieve optimal performance:
//!
//! - **Linux**: (Phase 2) Will use io_uring futex operations for unified event loop
//! - **Windows**: (Phase 3) Will use IOCP for unified event loop
//! - **Generic**: (Phase 1 - Current) Uses parking_lot mutex with hybrid single/multi mode
//!
//! **Current Status**: All platforms use the generic implementation (Phase 1).
//! Platform-specific optimizations will be added in Phase 2 (Linux) and Phase 3 (Windows).
//!
//! Every `CountedSemaphore`, `Condvar`, and `CancellationToken` in this crate owns one
//! of these queues. The queue itself does not bake in a "condition": callers check their
//! own atomic state before registering a waker and again after, so the queue only has to
//! do one thing well — hold wakers and wake them back up. This keeps the race-free
//! check-register-recheck pattern in the primitive that actually owns the state, instead
//! of threading a generic closure through the queue.

// Generic implementation - always compiled (used as baseline and fallback)
mod generic;

// Platform-specific modules
// Phase 1: These re-export generic implementation
// Phase 2+: Will have platform-specific optimizations
#[cfg(target_os = "linux")]
mod linux;

#[cfg(windows)]
mod windows;

// Re-export the appropriate implementation
#[cfg(target_os = "linux")]
pub use linux::WaiterQueue;

#[cfg(windows)]
pub use windows::WaiterQueue;

#[cfg(not(any(target_os = "linux", windows)))]
pub use generic::WaiterQueue;

/// Interface that every platform-specific waiter queue implementation satisfies.
///
/// All operations are wait-free or held for a handful of memory operations only —
/// never across a suspension point or user code (see `generic::WaiterQueue`).
pub trait WaiterQueueTrait {
    /// Create a new empty waiter queue.
    fn new() -> Self;

    /// Register a waker. The caller must check whatever condition it is waiting on
    /// both before and after calling this, to avoid a lost wakeup.
    fn add_waiter(&self, waker: std::task::Waker);

    /// Wake one waiting task. Returns `true` if a waiter was actually woken.
    ///
    /// **Ordering**: wake order is implementation-dependent and not guaranteed to be
    /// FIFO in general (a future io_uring/IOCP backend may reorder).
    fn wake_one(&self) -> bool;

    /// Wake every waiting task.
    fn wake_all(&self);

    /// Number of currently registered waiters (best-effort, for diagnostics/tests).
    fn waiter_count(&self) -> usize;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_waiter_queue_creation() {
        let queue = WaiterQueue::new();
        assert_eq!(queue.waiter_count(), 0);
    }

    #[test]
    fn test_wake_one_no_waiters() {
        let queue = WaiterQueue::new();
        assert!(!queue.wake_one());
    }

    #[test]
    fn test_wake_all_no_waiters() {
        let queue = WaiterQueue::new();
        queue.wake_all();
        assert_eq!(queue.waiter_count(), 0);
    }
}
