//! Deferral: defer/recover cleanup queues for synchronous and asynchronous functions.
//!
//! # Overview
//!
//! [`deferred`] wraps a function. Each call hands the function a [`Scope`]
//! through which it registers cleanup actions. Once the function settles, the
//! cleanups run newest-first, one at a time, and the call resolves with
//! exactly the function's own outcome.
//!
//! # Core Guarantees
//!
//! - **LIFO**: cleanups run in reverse registration order, never overlapping
//! - **Outcome passthrough**: the caller sees the main function's value or its
//!   original error; cleanup failures never replace it
//! - **Recover**: the most recent failure (main or cleanup) is readable from
//!   later cleanups through `recover()`
//! - **Interrupt**: a cleanup can stop every cleanup still queued behind it
//! - **Isolation**: each call owns its queue and error cell
//!
//! # Synchronous path and async cleanups
//!
//! When the main function finishes synchronously the drain never suspends.
//! An async cleanup registered on that path is, by default, polled once and
//! then **not awaited** ([`SyncCleanupPolicy::Detach`]). Use
//! [`SyncCleanupPolicy::Block`] to wait for each one instead, or give the
//! wrapper a spawner with [`Deferred::with_spawner`].
//!
//! # Module Structure
//!
//! - [`combinator`]: The deferred wrapper and the drain scheduler
//! - [`cx`]: Per-invocation scope and cleanup parameters
//! - [`types`]: Settle, interrupt and panic payload types
//! - [`config`]: Wrapper configuration
//! - [`error`](mod@error): Error types
//! - [`tracing_compat`]: Optional tracing integration (requires `tracing-integration` feature)

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::doc_markdown)]

pub mod combinator;
pub mod config;
pub mod cx;
pub mod error;
pub mod tracing_compat;
pub mod types;

// ── Test-only modules ───────────────────────────────────────────────────
#[cfg(any(test, feature = "test-internals"))]
pub mod test_utils;

pub use combinator::{
    Deferred, DrainReport, ReportHandle, Spawner, deferred, deferred_async, deferred_sync,
};
pub use config::{ConfigError, DeferConfig, SyncCleanupPolicy};
pub use cx::{DrainParams, Phase, Scope};
pub use error::{Error, ErrorKind, Result};
pub use types::{BoxFuture, Cleanup, Interrupt, PanicPayload, Settle};
