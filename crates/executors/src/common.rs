//! Shared constants and the interruption-cancellation state machine used by
//! both provider variants (§4.3, §5).

use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::time::{Duration, Instant};

/// §5 "Interruption debounce is 100 ms across both executor variants."
pub const INTERRUPTION_DEBOUNCE_MS: u64 = 100;

/// §5 "Provider connection establishment has a 10 s timeout."
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// §4.3 "clears `isCancelling` 1 s later. Errors received during this window
/// are suppressed."
pub const CANCEL_SUPPRESSION_WINDOW: Duration = Duration::from_secs(1);

/// Tracks the post-`cancelResponse()` suppression window (§4.3, §7 kind 5
/// "provider-cancellation-race"). `cancelling` flips true immediately and
/// false again once the 1 s window has elapsed; `error` checks consult
/// `is_suppressing` rather than only `cancelling` so an error arriving in
/// the tail of the window is still swallowed.
pub struct CancelGuard {
    cancelling: AtomicBool,
    /// Millis since `UNIX_EPOCH` truncated to i64; 0 means "never cancelled".
    cancelled_at_millis: AtomicI64,
    epoch: Instant,
}

impl CancelGuard {
    pub fn new() -> Self {
        Self {
            cancelling: AtomicBool::new(false),
            cancelled_at_millis: AtomicI64::new(0),
            epoch: Instant::now(),
        }
    }

    pub fn begin(&self) {
        self.cancelling.store(true, Ordering::SeqCst);
        let millis = self.epoch.elapsed().as_millis() as i64;
        self.cancelled_at_millis.store(millis, Ordering::SeqCst);
    }

    pub fn clear(&self) {
        self.cancelling.store(false, Ordering::SeqCst);
    }

    pub fn is_cancelling(&self) -> bool {
        self.cancelling.load(Ordering::SeqCst)
    }

    /// True while cancelling, or within `CANCEL_SUPPRESSION_WINDOW` after.
    pub fn is_suppressing(&self) -> bool {
        if self.is_cancelling() {
            return true;
        }
        let marked = self.cancelled_at_millis.load(Ordering::SeqCst);
        if marked == 0 {
            return false;
        }
        let now = self.epoch.elapsed().as_millis() as i64;
        (now - marked) < CANCEL_SUPPRESSION_WINDOW.as_millis() as i64
    }
}

impl Default for CancelGuard {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn suppresses_immediately_after_begin() {
        let guard = CancelGuard::new();
        assert!(!guard.is_suppressing());
        guard.begin();
        assert!(guard.is_suppressing());
        guard.clear();
        // still within the 1s window even after isCancelling clears
        assert!(guard.is_suppressing());
    }
}
