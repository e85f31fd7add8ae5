//! Test helpers: logging setup, phase markers, and small async utilities.
//!
//! Available in unit tests and, with the `test-internals` feature, to
//! integration tests.

use std::future::Future;
use std::pin::Pin;
use std::sync::Once;
use std::task::{Context, Poll};

#[doc(hidden)]
pub use tracing as __tracing;

static INIT: Once = Once::new();

/// Installs a test-friendly `tracing` subscriber once per process.
///
/// The filter defaults to `trace` and can be overridden with `RUST_LOG`.
pub fn init_test_logging() {
    INIT.call_once(|| {
        let filter = tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("trace"));
        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_test_writer()
            .try_init();
    });
}

/// Marks the start of a named test phase in the log.
#[macro_export]
macro_rules! test_phase {
    ($name:expr) => {
        $crate::test_utils::__tracing::info!(phase = %$name, "test phase started");
    };
}

/// Marks the successful end of a named test.
#[macro_export]
macro_rules! test_complete {
    ($name:expr) => {
        $crate::test_utils::__tracing::info!(test = %$name, "test complete");
    };
}

/// Asserts `cond`, logging the expected and actual values first.
#[macro_export]
macro_rules! assert_with_log {
    ($cond:expr, $what:expr, $expected:expr, $actual:expr) => {{
        let ok: bool = $cond;
        $crate::test_utils::__tracing::debug!(
            check = %$what,
            expected = ?$expected,
            actual = ?$actual,
            ok,
            "assertion"
        );
        assert!(ok, "{}: expected {:?}, got {:?}", $what, $expected, $actual);
    }};
}

/// Future that is pending on its first poll and ready on the second.
#[derive(Debug, Default)]
pub struct YieldOnce {
    yielded: bool,
}

impl Future for YieldOnce {
    type Output = ();

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        if self.yielded {
            Poll::Ready(())
        } else {
            self.yielded = true;
            cx.waker().wake_by_ref();
            Poll::Pending
        }
    }
}

/// Suspends once, forcing a real suspension point in async test code.
#[must_use]
pub fn yield_once() -> YieldOnce {
    YieldOnce::default()
}
