//! Disposal flag shared between the scheduler and its owner

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Cancels a scheduler from outside, even while one of its loads is pending
///
/// Once set the flag never clears. The scheduler notices it at its next
/// entry point or as soon as a pending load resolves, and tears down.
#[derive(Clone, Debug, Default)]
pub struct DisposalHandle {
    flag: Arc<AtomicBool>,
}

impl DisposalHandle {
    /// Create an unset handle
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Request disposal
    pub fn dispose(&self) {
        self.flag.store(true, Ordering::Release);
    }

    /// Whether disposal was requested
    #[must_use]
    pub fn is_disposed(&self) -> bool {
        self.flag.load(Ordering::Acquire)
    }
}
