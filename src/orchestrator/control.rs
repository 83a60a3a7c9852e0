//! Cooperative control primitives shared between orchestrator and workers
//!
//! Pause is a latch workers wait on between items (never mid-item), so
//! in-flight I/O and external processes are left alone. Cancellation is
//! single-shot and wakes paused workers so they can observe it.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Condvar, Mutex};

struct ControlShared {
    paused: Mutex<bool>,
    unpaused: Condvar,
    cancelled: AtomicBool,
}

/// Cloneable handle carrying the pause latch and cancellation signal.
#[derive(Clone)]
pub struct ScanControls {
    shared: Arc<ControlShared>,
}

impl ScanControls {
    pub fn new() -> Self {
        Self {
            shared: Arc::new(ControlShared {
                paused: Mutex::new(false),
                unpaused: Condvar::new(),
                cancelled: AtomicBool::new(false),
            }),
        }
    }

    /// Close the latch; workers block before their next item.
    pub fn pause(&self) {
        *self.shared.paused.lock() = true;
    }

    /// Re-open the latch and wake every blocked worker.
    pub fn resume(&self) {
        *self.shared.paused.lock() = false;
        self.shared.unpaused.notify_all();
    }

    /// Signal cancellation. Also wakes paused workers so they can exit.
    pub fn cancel(&self) {
        self.shared.cancelled.store(true, Ordering::SeqCst);
        self.shared.unpaused.notify_all();
    }

    pub fn is_paused(&self) -> bool {
        *self.shared.paused.lock()
    }

    pub fn is_cancelled(&self) -> bool {
        self.shared.cancelled.load(Ordering::SeqCst)
    }

    /// Per-item check-in: blocks while paused, then reports whether the
    /// worker may continue. Returns false once cancellation was signalled.
    ///
    /// The fast path (not paused, not cancelled) is a single atomic load
    /// plus an uncontended lock.
    pub fn checkpoint(&self) -> bool {
        if self.is_cancelled() {
            return false;
        }

        let mut paused = self.shared.paused.lock();
        while *paused {
            if self.is_cancelled() {
                return false;
            }
            // Bounded wait so a cancel that raced the notify is still seen.
            self.shared
                .unpaused
                .wait_for(&mut paused, Duration::from_millis(250));
        }

        !self.is_cancelled()
    }
}

impl Default for ScanControls {
    fn default() -> Self {
        Self::new()
    }
}
