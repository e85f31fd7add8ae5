//! Invocation context.
//!
//! A [`Scope`] is the handle a deferred main function receives. It registers
//! cleanup actions with [`Scope::defer`] and reads the captured error with
//! [`Scope::recover`]. Each call of a wrapper gets its own scope; nothing is
//! shared between calls.

pub mod scope;

pub use scope::{DrainParams, Phase, Scope};
pub(crate) use scope::Action;
