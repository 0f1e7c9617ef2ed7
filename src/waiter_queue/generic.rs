//! Generic cross-platform waiter queue implementation
//!
//! **Phase 1 implementation**: lock-free single-waiter optimization + parking_lot for
//! multi-waiter:
//! - Single-waiter fast path: `AtomicWaker` (lock-free atomic operations)
//! - Multi-waiter slow path: `parking_lot::Mutex` + `VecDeque` (2-5x faster than `std::Mutex`)
//! - Mode state machine: `Empty` → `Single` → `Multi`
//!
//! **Future phases** will add platform-specific optimizations:
//! - Linux: io_uring futex operations
//! - Windows: IOCP integration
//!
//! Performance characteristics:
//! - Single waiter (common case): lock-free atomic operations, zero mutex overhead
//! - Multiple waiters: fast parking_lot mutex
//! - No kernel involvement except `waker.wake()`, which goes to the runtime

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU8, Ordering};
use std::task::Waker;

use atomic_waker::AtomicWaker;
use num_enum::{IntoPrimitive, TryFromPrimitive};
use parking_lot::Mutex;

use super::WaiterQueueTrait;

/// Modes for the waiter queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, IntoPrimitive, TryFromPrimitive)]
#[repr(u8)]
enum Mode {
    /// No waiters in the queue.
    Empty = 0,
    /// Exactly one waiter (uses `AtomicWaker`, lock-free).
    Single = 1,
    /// Multiple waiters (uses `Mutex<VecDeque>`).
    Multi = 2,
}

/// Generic waiter queue implementation (Phase 1).
///
/// Uses a hybrid approach:
/// - Single waiter fast path: `AtomicWaker` (lock-free)
/// - Multiple waiters slow path: `parking_lot::Mutex` + `VecDeque`
pub struct WaiterQueue {
    /// Current mode (empty, single, or multi).
    mode: AtomicU8,
    /// Fast path: single waiter storage (lock-free).
    single: AtomicWaker,
    /// Slow path: multiple waiters.
    multi: Mutex<VecDeque<Waker>>,
}

impl WaiterQueue {
    /// Create a new waiter queue.
    pub fn new() -> Self {
        Self {
            mode: AtomicU8::new(Mode::Empty.into()),
            single: AtomicWaker::new(),
            multi: Mutex::new(VecDeque::new()),
        }
    }

    #[inline]
    fn load_mode(&self, ordering: Ordering) -> Mode {
        // SAFETY: mode is repr(u8) with values 0,1,2 only; the atomic only ever
        // stores values produced by `Mode::into`.
        Mode::try_from(self.mode.load(ordering)).expect("invalid mode value in atomic")
    }

    #[inline]
    fn store_mode(&self, mode: Mode, ordering: Ordering) {
        self.mode.store(mode.into(), ordering);
    }

    #[inline]
    fn compare_exchange_mode(
        &self,
        current: Mode,
        new: Mode,
        success: Ordering,
        failure: Ordering,
    ) -> Result<Mode, Mode> {
        self.mode
            .compare_exchange(current.into(), new.into(), success, failure)
            .map(|v| Mode::try_from(v).expect("invalid mode value in atomic"))
            .map_err(|v| Mode::try_from(v).expect("invalid mode value in atomic"))
    }

    /// Register a waker, promoting `Empty -> Single -> Multi` as contention grows.
    pub fn add_waiter(&self, waker: Waker) {
        let mode = self.load_mode(Ordering::Acquire);

        if mode == Mode::Empty
            && self
                .compare_exchange_mode(Mode::Empty, Mode::Single, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
        {
            self.single.register(&waker);
            return;
        }

        let mut waiters = self.multi.lock();
        if let Some(prev) = self.single.take() {
            waiters.push_back(prev);
        }
        waiters.push_back(waker);
        self.store_mode(Mode::Multi, Ordering::Release);
    }

    /// Wake one waiting task. Returns `true` if a waiter was actually woken.
    pub fn wake_one(&self) -> bool {
        let mode = self.load_mode(Ordering::Acquire);

        match mode {
            Mode::Empty => false,
            Mode::Single => {
                if let Some(w) = self.single.take() {
                    let has_multi = !self.multi.lock().is_empty();
                    self.store_mode(
                        if has_multi { Mode::Multi } else { Mode::Empty },
                        Ordering::Release,
                    );
                    w.wake();
                    true
                } else {
                    self.wake_one_from_multi_and_settle()
                }
            }
            Mode::Multi => {
                if self.wake_one_from_multi_and_settle() {
                    true
                } else if let Some(w) = self.single.take() {
                    let has_multi = !self.multi.lock().is_empty();
                    self.store_mode(
                        if has_multi { Mode::Multi } else { Mode::Empty },
                        Ordering::Release,
                    );
                    w.wake();
                    true
                } else {
                    self.store_mode(Mode::Empty, Ordering::Release);
                    false
                }
            }
        }
    }

    /// Pop and wake one waiter from the multi queue, settling the mode if it goes empty.
    fn wake_one_from_multi_and_settle(&self) -> bool {
        let waker = {
            let mut waiters = self.multi.lock();
            let waker = waiters.pop_front();
            if waker.is_some() && waiters.is_empty() && self.single.take().is_none() {
                self.store_mode(Mode::Empty, Ordering::Release);
            }
            waker
        };
        match waker {
            Some(waker) => {
                waker.wake();
                true
            }
            None => false,
        }
    }

    /// Wake every waiting task.
    pub fn wake_all(&self) {
        let single_waker = self.single.take();
        let multi_wakers = {
            let mut waiters = self.multi.lock();
            std::mem::take(&mut *waiters)
        };
        self.store_mode(Mode::Empty, Ordering::Release);

        if let Some(waker) = single_waker {
            waker.wake();
        }
        for waker in multi_wakers {
            waker.wake();
        }
    }

    /// Best-effort count of currently registered waiters.
    pub fn waiter_count(&self) -> usize {
        let mode = self.load_mode(Ordering::Acquire);
        let multi_count = self.multi.lock().len();
        match mode {
            Mode::Empty => multi_count,
            Mode::Single | Mode::Multi => multi_count.saturating_add(1),
        }
    }
}

impl Default for WaiterQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl WaiterQueueTrait for WaiterQueue {
    fn new() -> Self {
        WaiterQueue::new()
    }

    fn add_waiter(&self, waker: Waker) {
        WaiterQueue::add_waiter(self, waker)
    }

    fn wake_one(&self) -> bool {
        WaiterQueue::wake_one(self)
    }

    fn wake_all(&self) {
        WaiterQueue::wake_all(self)
    }

    fn waiter_count(&self) -> usize {
        WaiterQueue::waiter_count(self)
    }
}
