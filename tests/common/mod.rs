//! Shared helpers for the deferral integration tests.

#![allow(dead_code, unused_macros)]

use parking_lot::Mutex;
use std::sync::Arc;

macro_rules! test_phase {
    ($name:expr) => {
        tracing::info!(phase = %$name, "test phase started");
    };
}

macro_rules! test_complete {
    ($name:expr) => {
        tracing::info!(test = %$name, "test complete");
    };
}

pub fn init_test_logging() {
    deferral::test_utils::init_test_logging();
}

/// Ordered record of side effects shared between a main function and its cleanups.
#[derive(Debug, Clone, Default)]
pub struct Tracks(Arc<Mutex<Vec<u32>>>);

impl Tracks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, n: u32) {
        self.0.lock().push(n);
    }

    pub fn snapshot(&self) -> Vec<u32> {
        self.0.lock().clone()
    }
}

/// Write-once slot for values observed inside cleanups.
#[derive(Debug)]
pub struct Slot<T>(Arc<Mutex<Option<T>>>);

impl<T> Clone for Slot<T> {
    fn clone(&self) -> Self {
        Self(Arc::clone(&self.0))
    }
}

impl<T> Default for Slot<T> {
    fn default() -> Self {
        Self(Arc::new(Mutex::new(None)))
    }
}

impl<T: Clone> Slot<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, value: T) {
        *self.0.lock() = Some(value);
    }

    pub fn get(&self) -> Option<T> {
        self.0.lock().clone()
    }
}

pub use deferral::test_utils::yield_once;
