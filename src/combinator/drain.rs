//! Drain scheduler: runs a frame's cleanup queue after the main function settles.
//!
//! Both procedures pop actions newest-first and run exactly one at a time.
//! Each action sees the invocation's current captured error. A failing
//! action overwrites the captured error and the drain carries on; an action
//! that raises its interrupt ends the drain and everything still queued is
//! dropped un-run. Neither procedure can fail.
//!
//! - [`drain_sync`] never suspends. Pending cleanups are handled according to
//!   [`SyncCleanupPolicy`]; under the default `Detach` policy they are **not
//!   awaited**, so their side effects may land after the wrapper returned.
//! - [`drain_async`] awaits every cleanup before starting the next one.

use crate::config::{DeferConfig, SyncCleanupPolicy};
use crate::cx::{Action, DrainParams, Scope};
use crate::tracing_compat::{debug, trace, warn};
use crate::types::{BoxFuture, Interrupt, PanicPayload, Settle};
use futures_lite::FutureExt as _;
use futures_lite::future;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

/// Hook that takes ownership of a detached cleanup future and runs it.
pub type Spawner = Arc<dyn Fn(BoxFuture<'static, ()>) + Send + Sync>;

/// Counters describing one drain.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DrainReport {
    /// Actions queued when the drain started.
    pub registered: usize,
    /// Actions that were started.
    pub ran: usize,
    /// Actions whose failure was captured.
    pub failed: usize,
    /// Actions that panicked and were contained.
    pub panicked: usize,
    /// Pending actions the synchronous drain did not wait for.
    pub detached: usize,
    /// Actions dropped without running because of an interrupt.
    pub skipped: usize,
    /// Whether an action raised its interrupt.
    pub interrupted: bool,
}

impl DrainReport {
    /// Returns `true` if every registered action ran to completion without
    /// failing, panicking or being detached.
    #[must_use]
    pub const fn is_clean(&self) -> bool {
        self.ran == self.registered
            && self.failed == 0
            && self.panicked == 0
            && self.detached == 0
            && !self.interrupted
    }
}

/// Shared slot receiving the report of a single invocation.
#[derive(Debug, Clone, Default)]
pub struct ReportHandle {
    slot: Arc<Mutex<Option<DrainReport>>>,
}

impl ReportHandle {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Returns the report once the invocation has drained.
    #[must_use]
    pub fn get(&self) -> Option<DrainReport> {
        *self.slot.lock()
    }

    fn publish(&self, report: DrainReport) {
        *self.slot.lock() = Some(report);
    }
}

/// Per-call settings the drain needs from its wrapper.
#[derive(Clone)]
pub(crate) struct DrainContext {
    pub(crate) config: Arc<DeferConfig>,
    pub(crate) spawner: Option<Spawner>,
    pub(crate) report: Option<ReportHandle>,
}

impl DrainContext {
    fn label(&self) -> &str {
        self.config.label.as_deref().unwrap_or("")
    }
}

/// How an action came back from its synchronous call.
enum Started<E> {
    Done(Result<(), E>),
    Pending(BoxFuture<'static, Result<(), E>>),
    Panicked(Box<dyn Any + Send>),
}

struct Drain<'a, T, E> {
    ctx: &'a DrainContext,
    scope: &'a Scope<T, E>,
    queue: Vec<Action<T, E>>,
    return_value: Option<T>,
    panicking: bool,
    report: DrainReport,
}

impl<'a, T, E> Drain<'a, T, E>
where
    T: Clone,
    E: Clone,
{
    fn begin(
        ctx: &'a DrainContext,
        scope: &'a Scope<T, E>,
        return_value: Option<T>,
        panicking: bool,
    ) -> Self {
        let queue = scope.frame().begin_drain();
        let report = DrainReport {
            registered: queue.len(),
            ..DrainReport::default()
        };
        debug!(
            label = ctx.label(),
            registered = report.registered,
            panicking,
            "drain started"
        );
        Self {
            ctx,
            scope,
            queue,
            return_value,
            panicking,
            report,
        }
    }

    /// Pops the newest action and starts it.
    fn start_next(&mut self) -> Option<(Started<E>, Interrupt)> {
        let action = self.queue.pop()?;
        let interrupt = Interrupt::new();
        let params = DrainParams::new(
            self.scope.clone(),
            self.scope.recover(),
            self.return_value.clone(),
            self.panicking,
            interrupt.clone(),
        );
        self.report.ran += 1;
        trace!(
            label = self.ctx.label(),
            index = self.queue.len(),
            "running cleanup"
        );
        let started = match panic::catch_unwind(AssertUnwindSafe(move || action(params))) {
            Ok(Settle::Immediate(result)) => Started::Done(result),
            Ok(Settle::Pending(fut)) => Started::Pending(fut),
            Err(payload) => Started::Panicked(payload),
        };
        Some((started, interrupt))
    }

    fn record(&mut self, result: Result<(), E>) {
        if let Err(error) = result {
            self.report.failed += 1;
            debug!(label = self.ctx.label(), "cleanup failed; error captured");
            self.scope.frame().capture(error);
        }
    }

    fn record_panic(&mut self, payload: Box<dyn Any + Send>) {
        if !self.ctx.config.catch_cleanup_panics {
            self.queue.clear();
            self.scope.frame().settle();
            panic::resume_unwind(payload);
        }
        self.report.panicked += 1;
        let _payload = PanicPayload::from_any(&*payload);
        warn!(
            label = self.ctx.label(),
            panic = _payload.message(),
            "cleanup panicked; continuing drain"
        );
    }

    fn record_caught(&mut self, outcome: Result<Result<(), E>, Box<dyn Any + Send>>) {
        match outcome {
            Ok(result) => self.record(result),
            Err(payload) => self.record_panic(payload),
        }
    }

    /// Returns `true` if the drain must stop after the current action.
    fn check_interrupt(&mut self, interrupt: &Interrupt) -> bool {
        if interrupt.is_raised() {
            self.report.interrupted = true;
            debug!(
                label = self.ctx.label(),
                skipped = self.queue.len(),
                "drain interrupted"
            );
            return true;
        }
        false
    }

    fn finish(mut self) -> DrainReport {
        self.report.skipped = self.queue.len();
        drop(std::mem::take(&mut self.queue));
        self.scope.frame().settle();
        debug!(
            label = self.ctx.label(),
            ran = self.report.ran,
            failed = self.report.failed,
            skipped = self.report.skipped,
            "drain finished"
        );
        if let Some(handle) = &self.ctx.report {
            handle.publish(self.report);
        }
        self.report
    }
}

impl<T, E> Drain<'_, T, E>
where
    T: Clone,
    E: Clone + Send + 'static,
{
    /// Lets a pending cleanup run without waiting for it.
    fn detach(&mut self, mut pending: BoxFuture<'static, Result<(), E>>) {
        let first_poll = panic::catch_unwind(AssertUnwindSafe(|| {
            future::block_on(future::poll_once(&mut pending))
        }));
        match first_poll {
            Ok(Some(result)) => self.record(result),
            Ok(None) => {
                self.report.detached += 1;
                let _label = self.ctx.label().to_owned();
                let detached: BoxFuture<'static, ()> = Box::pin(async move {
                    if pending.await.is_err() {
                        warn!(label = %_label, "detached cleanup failed after drain");
                    }
                });
                if let Some(spawn) = &self.ctx.spawner {
                    warn!(
                        label = self.ctx.label(),
                        "async cleanup on synchronous path detached to spawner; not awaited"
                    );
                    spawn(detached);
                } else {
                    warn!(
                        label = self.ctx.label(),
                        "async cleanup on synchronous path detached to a helper thread; not awaited"
                    );
                    run_on_thread(detached);
                }
            }
            Err(payload) => self.record_panic(payload),
        }
    }
}

/// Drives a detached cleanup to completion on its own thread.
fn run_on_thread(detached: BoxFuture<'static, ()>) {
    let spawned = std::thread::Builder::new()
        .name("deferral-detached".into())
        .spawn(move || future::block_on(detached));
    if let Err(_err) = spawned {
        warn!(error = %_err, "failed to start thread for detached cleanup; dropped");
    }
}

/// Drains `scope` without suspending.
///
/// `return_value` is the main function's value, `None` if it failed or
/// panicked. The caller captures the main error into the frame beforehand.
pub(crate) fn drain_sync<T, E>(
    ctx: &DrainContext,
    scope: &Scope<T, E>,
    return_value: Option<T>,
    panicking: bool,
) -> DrainReport
where
    T: Clone,
    E: Clone + Send + 'static,
{
    let mut drain = Drain::begin(ctx, scope, return_value, panicking);
    while let Some((started, interrupt)) = drain.start_next() {
        match started {
            Started::Done(result) => drain.record(result),
            Started::Panicked(payload) => drain.record_panic(payload),
            Started::Pending(fut) => match ctx.config.sync_cleanups {
                SyncCleanupPolicy::Block => {
                    let outcome = future::block_on(AssertUnwindSafe(fut).catch_unwind());
                    drain.record_caught(outcome);
                }
                SyncCleanupPolicy::Detach => drain.detach(fut),
            },
        }
        if drain.check_interrupt(&interrupt) {
            break;
        }
    }
    drain.finish()
}

/// Drains `scope`, awaiting every cleanup before starting the next.
pub(crate) async fn drain_async<T, E>(
    ctx: &DrainContext,
    scope: &Scope<T, E>,
    return_value: Option<T>,
    panicking: bool,
) -> DrainReport
where
    T: Clone,
    E: Clone + Send + 'static,
{
    let mut drain = Drain::begin(ctx, scope, return_value, panicking);
    while let Some((started, interrupt)) = drain.start_next() {
        match started {
            Started::Done(result) => drain.record(result),
            Started::Panicked(payload) => drain.record_panic(payload),
            Started::Pending(fut) => {
                let outcome = AssertUnwindSafe(fut).catch_unwind().await;
                drain.record_caught(outcome);
            }
        }
        if drain.check_interrupt(&interrupt) {
            break;
        }
    }
    drain.finish()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use crate::types::Cleanup;
    use std::sync::atomic::{AtomicUsize, Ordering};

    type TestScope = Scope<u32, Error>;

    fn init_test(name: &str) {
        crate::test_utils::init_test_logging();
        crate::test_phase!(name);
    }

    fn ctx(config: DeferConfig) -> DrainContext {
        DrainContext {
            config: Arc::new(config),
            spawner: None,
            report: None,
        }
    }

    fn tracker() -> Arc<Mutex<Vec<u32>>> {
        Arc::new(Mutex::new(Vec::new()))
    }

    #[test]
    fn sync_drain_runs_newest_first() {
        init_test("sync_drain_runs_newest_first");
        let scope = TestScope::new();
        let tracks = tracker();
        for n in 1..=4 {
            let tracks = Arc::clone(&tracks);
            scope.defer_fn(move |_| {
                tracks.lock().push(n);
                Ok(())
            });
        }
        let report = drain_sync(&ctx(DeferConfig::default()), &scope, Some(7), false);
        let order = tracks.lock().clone();
        crate::assert_with_log!(order == vec![4, 3, 2, 1], "order", vec![4, 3, 2, 1], order);
        assert_eq!(report.ran, 4);
        assert!(report.is_clean());
        assert_eq!(scope.phase(), crate::cx::Phase::Settled);
        crate::test_complete!("sync_drain_runs_newest_first");
    }

    #[test]
    fn failure_is_captured_and_drain_continues() {
        init_test("failure_is_captured_and_drain_continues");
        let scope = TestScope::new();
        let seen = Arc::new(Mutex::new(None));
        let slot = Arc::clone(&seen);
        scope.defer_fn(move |params| {
            *slot.lock() = params.recover();
            Ok(())
        });
        scope.defer_fn(|_| Err(Error::cleanup("defer error")));

        let report = drain_sync(&ctx(DeferConfig::default()), &scope, Some(1), false);
        assert_eq!(report.failed, 1);
        assert_eq!(report.ran, 2);
        assert_eq!(*seen.lock(), Some(Error::cleanup("defer error")));
        crate::test_complete!("failure_is_captured_and_drain_continues");
    }

    #[test]
    fn params_error_reflects_current_cell() {
        init_test("params_error_reflects_current_cell");
        let scope = TestScope::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let slot = Arc::clone(&seen);
        scope.defer_fn(move |params| {
            slot.lock().push(params.error.clone());
            Ok(())
        });
        scope.defer_fn(|_| Err(Error::cleanup("second")));
        let slot = Arc::clone(&seen);
        scope.defer_fn(move |params| {
            slot.lock().push(params.error.clone());
            Ok(())
        });
        scope.frame().capture(Error::user("main"));

        drain_sync(&ctx(DeferConfig::default()), &scope, None, false);
        let seen = seen.lock().clone();
        assert_eq!(
            seen,
            vec![Some(Error::user("main")), Some(Error::cleanup("second"))]
        );
    }

    #[test]
    fn interrupt_skips_remaining() {
        init_test("interrupt_skips_remaining");
        let scope = TestScope::new();
        let ran = Arc::new(AtomicUsize::new(0));
        for _ in 0..3 {
            let ran = Arc::clone(&ran);
            scope.defer_fn(move |_| {
                ran.fetch_add(1, Ordering::SeqCst);
                Ok(())
            });
        }
        scope.defer(|params| {
            params.interrupt();
            Cleanup::ok()
        });

        let report = drain_sync(&ctx(DeferConfig::default()), &scope, Some(0), false);
        assert_eq!(ran.load(Ordering::SeqCst), 0);
        assert!(report.interrupted);
        assert_eq!(report.skipped, 3);
        assert_eq!(report.ran, 1);
        crate::test_complete!("interrupt_skips_remaining");
    }

    #[test]
    fn contained_panic_keeps_draining() {
        init_test("contained_panic_keeps_draining");
        let scope = TestScope::new();
        let ran = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&ran);
        scope.defer_fn(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });
        scope.defer_fn(|_| panic!("cleanup blew up"));

        let report = drain_sync(&ctx(DeferConfig::default()), &scope, None, false);
        assert_eq!(report.panicked, 1);
        assert_eq!(ran.load(Ordering::SeqCst), 1);
        assert!(scope.recover().is_none());
    }

    #[test]
    fn uncaught_cleanup_panic_propagates() {
        init_test("uncaught_cleanup_panic_propagates");
        let scope = TestScope::new();
        scope.defer_fn(|_| panic!("cleanup blew up"));
        let config = DeferConfig::default().catch_cleanup_panics(false);
        let context = ctx(config);
        let result = panic::catch_unwind(AssertUnwindSafe(|| {
            drain_sync(&context, &scope, None, false)
        }));
        assert!(result.is_err());
        assert_eq!(scope.phase(), crate::cx::Phase::Settled);
    }

    #[test]
    fn detach_captures_future_ready_on_first_poll() {
        init_test("detach_captures_future_ready_on_first_poll");
        let scope = TestScope::new();
        scope.defer_async(|_| async { Err(Error::cleanup("eager")) });
        let report = drain_sync(&ctx(DeferConfig::default()), &scope, Some(1), false);
        assert_eq!(report.detached, 0);
        assert_eq!(report.failed, 1);
        assert_eq!(scope.recover(), Some(Error::cleanup("eager")));
    }

    #[test]
    fn detach_hands_pending_future_to_spawner() {
        init_test("detach_hands_pending_future_to_spawner");
        let scope = TestScope::new();
        let spawned: Arc<Mutex<Vec<BoxFuture<'static, ()>>>> = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&spawned);
        let context = DrainContext {
            config: Arc::new(DeferConfig::default()),
            spawner: Some(Arc::new(move |fut: BoxFuture<'static, ()>| sink.lock().push(fut))),
            report: None,
        };
        let done = Arc::new(AtomicUsize::new(0));
        let flag = Arc::clone(&done);
        scope.defer_async(move |_| async move {
            crate::test_utils::yield_once().await;
            flag.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });

        let report = drain_sync(&context, &scope, Some(1), false);
        assert_eq!(report.detached, 1);
        assert_eq!(done.load(Ordering::SeqCst), 0);

        let futures = std::mem::take(&mut *spawned.lock());
        assert_eq!(futures.len(), 1);
        for fut in futures {
            future::block_on(fut);
        }
        assert_eq!(done.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn detach_without_spawner_finishes_on_helper_thread() {
        init_test("detach_without_spawner_finishes_on_helper_thread");
        let scope = TestScope::new();
        let (done_tx, done_rx) = std::sync::mpsc::channel();
        let tracks = tracker();
        let seen = Arc::clone(&tracks);
        scope.defer_async(move |_| async move {
            seen.lock().push(1);
            crate::test_utils::yield_once().await;
            seen.lock().push(2);
            let _ = done_tx.send(());
            Ok(())
        });

        let report = drain_sync(&ctx(DeferConfig::default()), &scope, Some(1), false);
        assert_eq!(report.detached, 1);
        done_rx
            .recv_timeout(std::time::Duration::from_secs(5))
            .expect("detached cleanup ran to completion");
        assert_eq!(*tracks.lock(), vec![1, 2]);
    }

    #[test]
    fn block_policy_waits_for_pending_cleanup() {
        init_test("block_policy_waits_for_pending_cleanup");
        let scope = TestScope::new();
        let tracks = tracker();
        let first = Arc::clone(&tracks);
        scope.defer_fn(move |_| {
            first.lock().push(1);
            Ok(())
        });
        let second = Arc::clone(&tracks);
        scope.defer_async(move |_| async move {
            crate::test_utils::yield_once().await;
            second.lock().push(2);
            Err(Error::cleanup("late"))
        });

        let config = DeferConfig::default().sync_cleanups(SyncCleanupPolicy::Block);
        let report = drain_sync(&ctx(config), &scope, Some(1), false);
        assert_eq!(*tracks.lock(), vec![2, 1]);
        assert_eq!(report.detached, 0);
        assert_eq!(scope.recover(), Some(Error::cleanup("late")));
    }

    #[test]
    fn async_drain_awaits_each_cleanup() {
        init_test("async_drain_awaits_each_cleanup");
        let scope = TestScope::new();
        let tracks = tracker();
        for n in 1..=3 {
            let tracks = Arc::clone(&tracks);
            scope.defer_async(move |_| async move {
                crate::test_utils::yield_once().await;
                tracks.lock().push(n);
                Ok(())
            });
        }
        let report = future::block_on(drain_async(
            &ctx(DeferConfig::default()),
            &scope,
            Some(9),
            false,
        ));
        assert_eq!(*tracks.lock(), vec![3, 2, 1]);
        assert!(report.is_clean());
    }

    #[test]
    fn async_interrupt_after_suspension() {
        init_test("async_interrupt_after_suspension");
        let scope = TestScope::new();
        let ran = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&ran);
        scope.defer_fn(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });
        scope.defer_async(|params| async move {
            crate::test_utils::yield_once().await;
            params.interrupt();
            Ok(())
        });
        let report = future::block_on(drain_async(
            &ctx(DeferConfig::default()),
            &scope,
            None,
            false,
        ));
        assert_eq!(ran.load(Ordering::SeqCst), 0);
        assert_eq!(report.skipped, 1);
    }

    #[test]
    fn report_handle_receives_report() {
        init_test("report_handle_receives_report");
        let scope = TestScope::new();
        scope.defer(|_| Cleanup::ok());
        let handle = ReportHandle::new();
        let context = DrainContext {
            config: Arc::new(DeferConfig::default()),
            spawner: None,
            report: Some(handle.clone()),
        };
        assert!(handle.get().is_none());
        let report = drain_sync(&context, &scope, Some(3), false);
        assert_eq!(handle.get(), Some(report));
    }
}
