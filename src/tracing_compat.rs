//! Optional tracing integration.
//!
//! With the `tracing-integration` feature the macros below are the real
//! `tracing` macros. Without it they expand to nothing, so log statements
//! cost nothing and the `tracing` crate is not linked.
//!
//! ```ignore
//! use crate::tracing_compat::debug;
//!
//! debug!(pending = 3, "drain started");
//! ```

#[cfg(feature = "tracing-integration")]
pub use tracing::{debug, error, info, trace, warn};

#[cfg(not(feature = "tracing-integration"))]
mod noop {
    // Suffixed names: a local `warn` macro would clash with the built-in
    // `#[warn]` attribute on import.
    macro_rules! trace_noop {
        ($($arg:tt)*) => {};
    }
    macro_rules! debug_noop {
        ($($arg:tt)*) => {};
    }
    macro_rules! info_noop {
        ($($arg:tt)*) => {};
    }
    macro_rules! warn_noop {
        ($($arg:tt)*) => {};
    }
    macro_rules! error_noop {
        ($($arg:tt)*) => {};
    }

    pub(crate) use {
        debug_noop as debug, error_noop as error, info_noop as info, trace_noop as trace,
        warn_noop as warn,
    };
}

#[cfg(not(feature = "tracing-integration"))]
#[allow(unused_imports)]
pub(crate) use noop::{debug, error, info, trace, warn};
