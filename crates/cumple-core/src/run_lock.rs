use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Process-wide single-flight flag for runs and session warm-ups.
///
/// Check and set are one compare-and-swap, so two triggers racing for an idle
/// lock cannot both win. Contenders are rejected, never queued.
#[derive(Debug, Default)]
pub struct RunLock {
    running: AtomicBool,
}

impl RunLock {
    pub fn new() -> Self {
        Self::default()
    }

    /// `true` if the lock was idle and is now held by the caller.
    pub fn try_acquire(&self) -> bool {
        self.running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    pub fn release(&self) {
        self.running.store(false, Ordering::Release);
    }

    pub fn is_held(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Acquire and hand back a guard that releases on drop, on every exit
    /// path including unwinding.
    pub fn try_guard(self: &Arc<Self>) -> Option<RunGuard> {
        self.try_acquire().then(|| RunGuard {
            lock: Arc::clone(self),
        })
    }
}

/// Holds a [`RunLock`] until dropped.
#[derive(Debug)]
pub struct RunGuard {
    lock: Arc<RunLock>,
}

impl Drop for RunGuard {
    fn drop(&mut self) {
        self.lock.release();
    }
}
