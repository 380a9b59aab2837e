//! Cooperative stop request.

use super::loom_compat::{AtomicBool, Ordering};

/// A one-way flag asking a worker to stop at its next check.
///
/// The controlling side only ever sets it; the worker only ever reads it.
/// There is no way to clear a request.
#[derive(Debug)]
pub struct StopFlag {
    requested: AtomicBool,
}

impl Default for StopFlag {
    fn default() -> Self {
        Self::new()
    }
}

impl StopFlag {
    /// Creates a flag with no stop requested.
    pub fn new() -> Self {
        Self {
            requested: AtomicBool::new(false),
        }
    }

    /// Requests a stop. Idempotent.
    pub fn request(&self) {
        self.requested.store(true, Ordering::Release);
    }

    /// Returns `true` once a stop has been requested (`kthread_should_stop`).
    pub fn should_stop(&self) -> bool {
        self.requested.load(Ordering::Acquire)
    }
}
