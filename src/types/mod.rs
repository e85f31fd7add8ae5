//! Core value types shared by the scope and the drain.
//!
//! - [`settle`]: Two-variant settle type (`Immediate` / `Pending`)
//! - [`interrupt`]: One-shot interrupt signal handed to cleanup actions
//! - [`panic`]: Panic payload captured from main functions and cleanups

pub mod interrupt;
pub mod panic;
pub mod settle;

pub use interrupt::Interrupt;
pub use panic::PanicPayload;
pub use settle::{BoxFuture, Cleanup, Settle, SettleFuture};
