//! Per-invocation frame and the scope handle around it.
//!
//! The [`Frame`] owns the cleanup queue, the captured-error cell and the
//! lifecycle phase of one invocation:
//!
//! ```text
//! Running ──(main settles)──► Draining ──(queue empty / interrupted)──► Settled
//! ```
//!
//! Registration is only accepted while `Running`. Starting the drain moves the
//! whole queue out of the frame, so the drain is the single owner of the
//! remaining actions and cleanups that captured a `Scope` clone do not keep the
//! frame alive through the queue.

use crate::error::Error;
use crate::tracing_compat::{debug, warn};
use crate::types::{Cleanup, Interrupt, Settle};
use parking_lot::Mutex;
use std::fmt;
use std::future::Future;
use std::sync::Arc;

/// A registered cleanup action.
pub(crate) type Action<T, E> = Box<dyn FnOnce(DrainParams<T, E>) -> Cleanup<E> + Send + 'static>;

// ============================================================================
// Frame
// ============================================================================

/// Lifecycle phase of an invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Phase {
    /// The main function is executing; cleanups may be registered.
    Running,
    /// The main function settled and the queue is being drained.
    Draining,
    /// The drain finished. Terminal.
    Settled,
}

struct FrameState<T, E> {
    phase: Phase,
    queue: Vec<Action<T, E>>,
    error: Option<E>,
}

/// State of a single invocation.
pub(crate) struct Frame<T, E> {
    state: Mutex<FrameState<T, E>>,
}

impl<T, E> Frame<T, E> {
    fn new() -> Self {
        Self {
            state: Mutex::new(FrameState {
                phase: Phase::Running,
                queue: Vec::new(),
                error: None,
            }),
        }
    }

    /// Appends an action, or hands it back if the frame stopped accepting.
    fn push(&self, action: Action<T, E>) -> Result<usize, Action<T, E>> {
        let mut state = self.state.lock();
        if state.phase != Phase::Running {
            return Err(action);
        }
        state.queue.push(action);
        Ok(state.queue.len())
    }

    /// Overwrites the captured-error cell.
    pub(crate) fn capture(&self, error: E) {
        self.state.lock().error = Some(error);
    }

    /// Closes registration and moves the queue out, in registration order.
    pub(crate) fn begin_drain(&self) -> Vec<Action<T, E>> {
        let mut state = self.state.lock();
        state.phase = Phase::Draining;
        std::mem::take(&mut state.queue)
    }

    /// Marks the frame settled.
    pub(crate) fn settle(&self) {
        self.state.lock().phase = Phase::Settled;
    }

    /// Settles the frame without draining, dropping anything still queued.
    ///
    /// Returns the number of actions dropped.
    pub(crate) fn discard(&self) -> usize {
        let dropped = {
            let mut state = self.state.lock();
            if state.phase == Phase::Settled {
                return 0;
            }
            state.phase = Phase::Settled;
            std::mem::take(&mut state.queue)
        };
        // Dropped outside the lock: actions may own scope clones.
        let count = dropped.len();
        drop(dropped);
        count
    }

    pub(crate) fn phase(&self) -> Phase {
        self.state.lock().phase
    }

    fn pending(&self) -> usize {
        self.state.lock().queue.len()
    }
}

impl<T, E: Clone> Frame<T, E> {
    pub(crate) fn recover(&self) -> Option<E> {
        self.state.lock().error.clone()
    }
}

// ============================================================================
// Scope
// ============================================================================

/// Handle to the current invocation, passed to the main function.
///
/// Cloning is cheap and every clone refers to the same invocation. The scope
/// exposes registration and a read-only view of the captured error; the main
/// function cannot write the error cell directly.
pub struct Scope<T, E> {
    frame: Arc<Frame<T, E>>,
}

impl<T, E> Clone for Scope<T, E> {
    fn clone(&self) -> Self {
        Self {
            frame: Arc::clone(&self.frame),
        }
    }
}

impl<T, E> fmt::Debug for Scope<T, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Scope")
            .field("phase", &self.phase())
            .field("pending", &self.pending())
            .finish()
    }
}

impl<T, E> Scope<T, E> {
    pub(crate) fn new() -> Self {
        Self {
            frame: Arc::new(Frame::new()),
        }
    }

    pub(crate) fn frame(&self) -> &Frame<T, E> {
        &self.frame
    }

    /// Registers a cleanup action to run after the main function settles.
    ///
    /// Actions run in reverse registration order. A registration made after
    /// draining started is dropped with a warning; use [`Scope::try_defer`]
    /// to observe that case.
    pub fn defer<F>(&self, action: F)
    where
        F: FnOnce(DrainParams<T, E>) -> Cleanup<E> + Send + 'static,
    {
        if self.try_defer(action).is_err() {
            warn!(phase = ?self.phase(), "cleanup registered after drain started; dropped");
        }
    }

    /// Registers a cleanup action, failing with
    /// [`ErrorKind::ScopeClosed`](crate::ErrorKind::ScopeClosed) once the
    /// scope has started draining.
    pub fn try_defer<F>(&self, action: F) -> crate::Result<()>
    where
        F: FnOnce(DrainParams<T, E>) -> Cleanup<E> + Send + 'static,
    {
        match self.frame.push(Box::new(action)) {
            Ok(position) => {
                debug!(position, "cleanup registered");
                Ok(())
            }
            Err(_rejected) => Err(Error::scope_closed()),
        }
    }

    /// Registers a synchronous cleanup returning a plain `Result`.
    pub fn defer_fn<F>(&self, action: F)
    where
        F: FnOnce(DrainParams<T, E>) -> Result<(), E> + Send + 'static,
    {
        self.defer(move |params| Settle::Immediate(action(params)));
    }

    /// Registers an asynchronous cleanup.
    pub fn defer_async<F, Fut>(&self, action: F)
    where
        F: FnOnce(DrainParams<T, E>) -> Fut + Send + 'static,
        Fut: Future<Output = Result<(), E>> + Send + 'static,
    {
        self.defer(move |params| Settle::pending(action(params)));
    }

    /// Number of cleanup actions waiting in the queue.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.frame.pending()
    }

    /// Current lifecycle phase of the invocation.
    #[must_use]
    pub fn phase(&self) -> Phase {
        self.frame.phase()
    }
}

impl<T, E: Clone> Scope<T, E> {
    /// Returns the most recently captured error, if any.
    ///
    /// The value is a live snapshot: it reflects the main function's failure
    /// and any cleanup failure captured so far.
    #[must_use]
    pub fn recover(&self) -> Option<E> {
        self.frame.recover()
    }
}

// ============================================================================
// Drain parameters
// ============================================================================

/// What a cleanup action receives when it runs.
pub struct DrainParams<T, E> {
    /// The captured error at the moment this action started.
    pub error: Option<E>,
    /// The main function's value, if it succeeded.
    pub return_value: Option<T>,
    /// `true` when the drain runs because the main function panicked.
    pub panicking: bool,
    interrupt: Interrupt,
    scope: Scope<T, E>,
}

impl<T, E> DrainParams<T, E> {
    pub(crate) fn new(
        scope: Scope<T, E>,
        error: Option<E>,
        return_value: Option<T>,
        panicking: bool,
        interrupt: Interrupt,
    ) -> Self {
        Self {
            error,
            return_value,
            panicking,
            interrupt,
            scope,
        }
    }

    /// Stops the drain after this action: no earlier-registered action runs.
    pub fn interrupt(&self) {
        self.interrupt.interrupt();
    }

    /// Returns a clone of this action's interrupt signal, for use after a
    /// suspension point in an async cleanup.
    #[must_use]
    pub fn interrupter(&self) -> Interrupt {
        self.interrupt.clone()
    }
}

impl<T, E: Clone> DrainParams<T, E> {
    /// Returns the most recently captured error, read live.
    #[must_use]
    pub fn recover(&self) -> Option<E> {
        self.scope.recover()
    }
}

impl<T: fmt::Debug, E: fmt::Debug> fmt::Debug for DrainParams<T, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DrainParams")
            .field("error", &self.error)
            .field("return_value", &self.return_value)
            .field("panicking", &self.panicking)
            .field("interrupted", &self.interrupt.is_raised())
            .finish_non_exhaustive()
    }
}
