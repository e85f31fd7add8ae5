//! The two-variant settle type.
//!
//! A deferred main function (and every cleanup action) reports its result as
//! a [`Settle`]: either the result is already there (`Immediate`) or it is a
//! future that still has to be driven (`Pending`). The variant is inspected
//! exactly once, right after the function returns, and selects which drain
//! procedure runs.

use std::fmt;
use std::future::{Future, IntoFuture};
use std::pin::Pin;
use std::task::{Context, Poll};

/// A boxed, sendable future.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// The result of a main function or cleanup action: ready now, or pending.
#[must_use = "a pending settle does nothing unless awaited"]
pub enum Settle<T, E> {
    /// The function finished synchronously.
    Immediate(Result<T, E>),
    /// The function returned a future that resolves to the result.
    Pending(BoxFuture<'static, Result<T, E>>),
}

/// What a cleanup action returns.
pub type Cleanup<E> = Settle<(), E>;

impl<T, E> Settle<T, E> {
    /// Wraps an already available result.
    pub const fn ready(result: Result<T, E>) -> Self {
        Self::Immediate(result)
    }

    /// Wraps an already available result; same as [`Settle::ready`].
    pub const fn from_result(result: Result<T, E>) -> Self {
        Self::Immediate(result)
    }

    /// Boxes a future as a pending result.
    pub fn pending<F>(future: F) -> Self
    where
        F: Future<Output = Result<T, E>> + Send + 'static,
    {
        Self::Pending(Box::pin(future))
    }

    /// Returns `true` for the `Immediate` variant.
    #[must_use]
    pub const fn is_immediate(&self) -> bool {
        matches!(self, Self::Immediate(_))
    }

    /// Returns `true` for the `Pending` variant.
    #[must_use]
    pub const fn is_pending(&self) -> bool {
        matches!(self, Self::Pending(_))
    }

    /// Returns the result if it is immediately available, or gives `self` back.
    pub fn into_immediate(self) -> Result<Result<T, E>, Self> {
        match self {
            Self::Immediate(result) => Ok(result),
            pending @ Self::Pending(_) => Err(pending),
        }
    }

    /// Returns the result, blocking the current thread on a pending future.
    pub fn wait(self) -> Result<T, E> {
        match self {
            Self::Immediate(result) => result,
            Self::Pending(future) => futures_lite::future::block_on(future),
        }
    }
}

impl<E> Settle<(), E> {
    /// A cleanup that succeeded synchronously.
    pub const fn ok() -> Self {
        Self::Immediate(Ok(()))
    }

    /// A cleanup that failed synchronously with `error`.
    pub const fn err(error: E) -> Self {
        Self::Immediate(Err(error))
    }
}

impl<T, E> From<Result<T, E>> for Settle<T, E> {
    fn from(result: Result<T, E>) -> Self {
        Self::Immediate(result)
    }
}

impl<T, E> fmt::Debug for Settle<T, E>
where
    T: fmt::Debug,
    E: fmt::Debug,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Immediate(result) => f.debug_tuple("Immediate").field(result).finish(),
            Self::Pending(_) => f.write_str("Pending(..)"),
        }
    }
}

impl<T, E> IntoFuture for Settle<T, E> {
    type Output = Result<T, E>;
    type IntoFuture = SettleFuture<T, E>;

    fn into_future(self) -> Self::IntoFuture {
        match self {
            Self::Immediate(result) => SettleFuture::Ready(Some(result)),
            Self::Pending(future) => SettleFuture::Pending(future),
        }
    }
}

/// Future returned by awaiting a [`Settle`].
#[must_use = "futures do nothing unless polled"]
pub enum SettleFuture<T, E> {
    #[doc(hidden)]
    Ready(Option<Result<T, E>>),
    #[doc(hidden)]
    Pending(BoxFuture<'static, Result<T, E>>),
}

// The ready value is moved out by value and the pending future is already
// boxed, so nothing here relies on structural pinning.
impl<T, E> Unpin for SettleFuture<T, E> {}

impl<T, E> Future for SettleFuture<T, E> {
    type Output = Result<T, E>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match self.get_mut() {
            Self::Ready(slot) => {
                Poll::Ready(slot.take().expect("SettleFuture polled after completion"))
            }
            Self::Pending(future) => future.as_mut().poll(cx),
        }
    }
}
