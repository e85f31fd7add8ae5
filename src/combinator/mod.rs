//! Deferred-execution combinator.
//!
//! This module provides:
//!
//! - [`defer`](mod@defer): The [`Deferred`] wrapper and its constructors
//!   ([`deferred`], [`deferred_sync`], [`deferred_async`])
//! - [`drain`]: The drain scheduler that runs cleanup queues newest-first,
//!   plus the [`DrainReport`] it produces

pub mod defer;
pub mod drain;

pub use defer::{Deferred, deferred, deferred_async, deferred_sync};
pub use drain::{DrainReport, ReportHandle, Spawner};
