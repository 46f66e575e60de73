//! Cooperative shutdown primitives for background work and in-flight drains.
//!
//! `ShutdownSignal` replaces bare sleeps in worker loops with condvar-based
//! waits that wake within milliseconds of a stop request. `CloseBarrier` is
//! the two-phase latch used by the document store: an atomic "closing" flag
//! plus an in-flight operation count that `close()` waits to drain.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Condvar, Mutex};

/// A cooperative shutdown signal. Cloning shares the underlying state.
#[derive(Clone, Default)]
pub struct ShutdownSignal {
    inner: Arc<SignalInner>,
}

#[derive(Default)]
struct SignalInner {
    flag: AtomicBool,
    lock: Mutex<()>,
    cv: Condvar,
}

impl ShutdownSignal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request shutdown. Wakes all waiters immediately.
    pub fn shutdown(&self) {
        self.inner.flag.store(true, Ordering::SeqCst);
        self.inner.cv.notify_all();
    }

    pub fn is_shutdown(&self) -> bool {
        self.inner.flag.load(Ordering::SeqCst)
    }

    /// Sleep for at most `duration`, waking early on `shutdown()`.
    /// Returns `true` if shutdown was requested.
    pub fn wait_timeout(&self, duration: Duration) -> bool {
        if self.is_shutdown() {
            return true;
        }
        let mut guard = self.inner.lock.lock();
        let _ = self.inner.cv.wait_for(&mut guard, duration);
        self.is_shutdown()
    }
}

/// Two-phase close latch: no new entrants once closing, and `close()` blocks
/// until every outstanding entrant has dropped its guard.
#[derive(Clone, Default)]
pub struct CloseBarrier {
    inner: Arc<BarrierInner>,
}

#[derive(Default)]
struct BarrierInner {
    closing: AtomicBool,
    inflight: Mutex<usize>,
    cv: Condvar,
}

/// Guard for one in-flight operation. Dropping it releases the slot.
pub struct CloseGuard<'a> {
    barrier: &'a CloseBarrier,
}

impl CloseBarrier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_closing(&self) -> bool {
        self.inner.closing.load(Ordering::SeqCst)
    }

    /// Register one in-flight operation. Returns `None` once closing has
    /// started.
    pub fn enter(&self) -> Option<CloseGuard<'_>> {
        let mut count = self.inner.inflight.lock();
        if self.is_closing() {
            return None;
        }
        *count += 1;
        Some(CloseGuard { barrier: self })
    }

    /// Begin closing and wait for all in-flight operations to finish.
    pub fn close(&self) {
        self.inner.closing.store(true, Ordering::SeqCst);
        let mut count = self.inner.inflight.lock();
        while *count > 0 {
            self.inner.cv.wait(&mut count);
        }
    }
}

impl Drop for CloseGuard<'_> {
    fn drop(&mut self) {
        let mut count = self.barrier.inner.inflight.lock();
        *count -= 1;
        if *count == 0 {
            self.barrier.inner.cv.notify_all();
        }
    }
}
