//! The deferred wrapper.
//!
//! [`deferred`] wraps a main function. Every call of the wrapper creates a
//! fresh [`Scope`], runs the main function with it, drains the cleanups that
//! were registered, and then settles with exactly what the main function
//! produced:
//!
//! ```text
//! call(args)
//!   │
//!   ├─ main(scope, args) ── Immediate(result) ──► drain_sync  ──► result
//!   │                    └─ Pending(future)  ──► await ──► drain_async ──► result
//!   └─ main panics ─────────────────────────────► drain ──► resume panic
//! ```
//!
//! A failing main function has its error captured before the drain starts,
//! so cleanups can inspect it with `recover()`. Cleanup failures only ever
//! update the captured error; the caller still receives the original error.
//!
//! # Example
//!
//! ```
//! use deferral::{Error, Scope, deferred_sync};
//! use std::sync::{Arc, Mutex};
//!
//! let log = Arc::new(Mutex::new(Vec::new()));
//! let sink = Arc::clone(&log);
//! let job = deferred_sync(move |scope: &Scope<u32, Error>, ()| {
//!     let first = Arc::clone(&sink);
//!     scope.defer_fn(move |_| {
//!         first.lock().unwrap().push("close connection");
//!         Ok(())
//!     });
//!     let second = Arc::clone(&sink);
//!     scope.defer_fn(move |params| {
//!         assert_eq!(params.return_value, Some(42));
//!         second.lock().unwrap().push("remove test data");
//!         Ok(())
//!     });
//!     Ok(42)
//! });
//!
//! assert_eq!(job.call(()).wait(), Ok(42));
//! assert_eq!(*log.lock().unwrap(), ["remove test data", "close connection"]);
//! ```

use super::drain::{DrainContext, ReportHandle, Spawner, drain_async, drain_sync};
use crate::config::DeferConfig;
use crate::cx::Scope;
use crate::tracing_compat::debug;
use crate::types::{BoxFuture, Settle};
use futures_lite::FutureExt as _;
use std::fmt;
use std::future::Future;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

/// A main function wrapped with a per-call cleanup queue.
///
/// Created by [`deferred`], [`deferred_sync`] or [`deferred_async`].
#[derive(Clone)]
pub struct Deferred<F> {
    main: F,
    config: Arc<DeferConfig>,
    spawner: Option<Spawner>,
}

/// Wraps a main function that reports its result as a [`Settle`].
///
/// This is the general form: the function decides per call whether it
/// finishes synchronously (`Settle::Immediate`) or asynchronously
/// (`Settle::Pending`), and the wrapper picks the matching drain.
pub fn deferred<F>(main: F) -> Deferred<F> {
    Deferred::new(main)
}

/// Wraps a synchronous main function.
///
/// Calls of the returned wrapper always produce `Settle::Immediate`.
pub fn deferred_sync<A, T, E, F>(main: F) -> Deferred<impl Fn(Scope<T, E>, A) -> Settle<T, E>>
where
    F: Fn(&Scope<T, E>, A) -> Result<T, E>,
{
    Deferred::new(move |scope: Scope<T, E>, args: A| Settle::Immediate(main(&scope, args)))
}

/// Wraps an asynchronous main function.
///
/// Calls of the returned wrapper always produce `Settle::Pending`; await it
/// (or call [`Settle::wait`]) to drive the main function and the drain.
pub fn deferred_async<A, T, E, F, Fut>(
    main: F,
) -> Deferred<impl Fn(Scope<T, E>, A) -> Settle<T, E>>
where
    F: Fn(Scope<T, E>, A) -> Fut,
    Fut: Future<Output = Result<T, E>> + Send + 'static,
{
    Deferred::new(move |scope: Scope<T, E>, args: A| Settle::pending(main(scope, args)))
}

impl<F> Deferred<F> {
    /// Wraps `main` with the default configuration.
    pub fn new(main: F) -> Self {
        Self {
            main,
            config: Arc::new(DeferConfig::default()),
            spawner: None,
        }
    }

    /// Replaces the configuration after validating it.
    pub fn with_config(mut self, config: DeferConfig) -> crate::Result<Self> {
        config.validate()?;
        self.config = Arc::new(config);
        Ok(self)
    }

    /// Sets the hook that receives async cleanups detached by the
    /// synchronous drain.
    #[must_use]
    pub fn with_spawner<S>(mut self, spawner: S) -> Self
    where
        S: Fn(BoxFuture<'static, ()>) + Send + Sync + 'static,
    {
        self.spawner = Some(Arc::new(spawner));
        self
    }

    /// Returns the active configuration.
    #[must_use]
    pub fn config(&self) -> &DeferConfig {
        &self.config
    }

    /// Calls the wrapped function.
    ///
    /// The result is `Immediate` when the main function finished
    /// synchronously, `Pending` when it returned a future. Either way it is
    /// exactly the main function's outcome.
    ///
    /// # Panics
    ///
    /// If the main function panics, the queue is drained and the panic is
    /// resumed.
    pub fn call<A, T, E>(&self, args: A) -> Settle<T, E>
    where
        F: Fn(Scope<T, E>, A) -> Settle<T, E>,
        T: Clone + Send + 'static,
        E: Clone + Send + 'static,
    {
        self.invoke(args, None)
    }

    /// Calls the wrapped function and also returns a handle that yields the
    /// [`DrainReport`](super::DrainReport) once the invocation settled.
    pub fn call_with_report<A, T, E>(&self, args: A) -> (Settle<T, E>, ReportHandle)
    where
        F: Fn(Scope<T, E>, A) -> Settle<T, E>,
        T: Clone + Send + 'static,
        E: Clone + Send + 'static,
    {
        let handle = ReportHandle::new();
        let settle = self.invoke(args, Some(handle.clone()));
        (settle, handle)
    }

    fn invoke<A, T, E>(&self, args: A, report: Option<ReportHandle>) -> Settle<T, E>
    where
        F: Fn(Scope<T, E>, A) -> Settle<T, E>,
        T: Clone + Send + 'static,
        E: Clone + Send + 'static,
    {
        let ctx = DrainContext {
            config: Arc::clone(&self.config),
            spawner: self.spawner.clone(),
            report,
        };
        let scope = Scope::new();
        debug!(label = ?self.config.label, "invocation started");

        let entered = panic::catch_unwind(AssertUnwindSafe(|| (self.main)(scope.clone(), args)));
        match entered {
            Ok(Settle::Immediate(result)) => {
                let return_value = capture(&scope, &result);
                drain_sync(&ctx, &scope, return_value, false);
                debug!(label = ?self.config.label, ok = result.is_ok(), "invocation settled");
                Settle::Immediate(result)
            }
            Ok(Settle::Pending(main)) => {
                // The settle may be dropped before its first poll.
                let guard = DiscardOnDrop { scope };
                Settle::Pending(Box::pin(settle_async(ctx, guard, main)))
            }
            Err(payload) => {
                debug!(label = ?self.config.label, "main function panicked; draining");
                drain_sync(&ctx, &scope, None, true);
                panic::resume_unwind(payload)
            }
        }
    }
}

impl<F> fmt::Debug for Deferred<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Deferred")
            .field("config", &self.config)
            .field("spawner", &self.spawner.is_some())
            .finish_non_exhaustive()
    }
}

/// Records the main outcome in the frame and returns the value for the drain.
fn capture<T: Clone, E: Clone>(scope: &Scope<T, E>, result: &Result<T, E>) -> Option<T> {
    match result {
        Ok(value) => Some(value.clone()),
        Err(error) => {
            scope.frame().capture(error.clone());
            None
        }
    }
}

/// Settles the frame if the pending invocation is dropped before finishing.
struct DiscardOnDrop<T, E> {
    scope: Scope<T, E>,
}

impl<T, E> Drop for DiscardOnDrop<T, E> {
    fn drop(&mut self) {
        let dropped = self.scope.frame().discard();
        if dropped > 0 {
            debug!(dropped, "pending invocation dropped; cleanups discarded");
        }
    }
}

async fn settle_async<T, E>(
    ctx: DrainContext,
    guard: DiscardOnDrop<T, E>,
    main: BoxFuture<'static, Result<T, E>>,
) -> Result<T, E>
where
    T: Clone + Send + 'static,
    E: Clone + Send + 'static,
{
    let scope = &guard.scope;
    match AssertUnwindSafe(main).catch_unwind().await {
        Ok(result) => {
            let return_value = capture(scope, &result);
            drain_async(&ctx, scope, return_value, false).await;
            debug!(label = ?ctx.config.label, ok = result.is_ok(), "invocation settled");
            result
        }
        Err(payload) => {
            debug!(label = ?ctx.config.label, "main future panicked; draining");
            drain_async(&ctx, scope, None, true).await;
            panic::resume_unwind(payload)
        }
    }
}
