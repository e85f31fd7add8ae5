//! One-shot interrupt signal for cleanup actions.
//!
//! Each cleanup action receives a fresh [`Interrupt`]. Raising it asks the
//! drain not to start any of the actions still queued behind the current one;
//! it never affects the action that raised it.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// A one-shot stop signal scoped to a single cleanup action.
///
/// Clones share the same flag, so an async cleanup can move a clone into its
/// future and raise it after a suspension point.
#[derive(Debug, Clone, Default)]
pub struct Interrupt {
    raised: Arc<AtomicBool>,
}

impl Interrupt {
    /// Creates a signal that has not been raised.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Raises the signal. Raising more than once has no further effect.
    pub fn interrupt(&self) {
        self.raised.store(true, Ordering::Release);
    }

    /// Returns `true` once the signal has been raised.
    #[must_use]
    pub fn is_raised(&self) -> bool {
        self.raised.load(Ordering::Acquire)
    }
}
