//! Error types.
//!
//! [`Error`] is a cheap, cloneable error that works well as the `E` of a
//! deferred invocation: the captured-error cell hands out clones through
//! `recover()`, so the error type has to be `Clone`. It is also the error
//! type of this crate's own fallible operations.

use crate::config::ConfigError;
use core::fmt;
use std::sync::Arc;

/// The kind of error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Raised by application code (typically the main function).
    User,
    /// Raised by a cleanup action.
    Cleanup,
    /// A cleanup was registered after the scope started draining.
    ScopeClosed,
    /// Invalid configuration.
    Config,
}

impl ErrorKind {
    /// Returns a short static description of the kind.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::User => "user error",
            Self::Cleanup => "cleanup error",
            Self::ScopeClosed => "scope closed",
            Self::Config => "invalid configuration",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A cloneable error with a kind, optional context message and optional source.
///
/// Equality compares kind and context only; sources are not compared.
///
/// # Example
///
/// ```
/// use deferral::{Error, ErrorKind};
///
/// let err = Error::user("main error");
/// assert_eq!(err.kind(), ErrorKind::User);
/// assert_eq!(err.message(), Some("main error"));
/// assert_eq!(err.to_string(), "user error: main error");
/// ```
#[derive(Clone)]
pub struct Error {
    kind: ErrorKind,
    context: Option<String>,
    source: Option<Arc<dyn std::error::Error + Send + Sync + 'static>>,
}

impl Error {
    /// Creates a new error with the given kind.
    #[must_use]
    pub const fn new(kind: ErrorKind) -> Self {
        Self {
            kind,
            context: None,
            source: None,
        }
    }

    /// Creates a user error carrying `message`.
    #[must_use]
    pub fn user(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::User).with_context(message)
    }

    /// Creates a cleanup error carrying `message`.
    #[must_use]
    pub fn cleanup(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Cleanup).with_context(message)
    }

    /// Creates a scope-closed error.
    #[must_use]
    pub const fn scope_closed() -> Self {
        Self::new(ErrorKind::ScopeClosed)
    }

    /// Adds context to the error.
    #[must_use]
    pub fn with_context(mut self, ctx: impl Into<String>) -> Self {
        self.context = Some(ctx.into());
        self
    }

    /// Attaches an underlying cause.
    #[must_use]
    pub fn with_source(mut self, source: impl std::error::Error + Send + Sync + 'static) -> Self {
        self.source = Some(Arc::new(source));
        self
    }

    /// Returns the error kind.
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        self.kind
    }

    /// Returns the context message, if any.
    #[must_use]
    pub fn message(&self) -> Option<&str> {
        self.context.as_deref()
    }

    /// Returns `true` if this error was raised by a cleanup action.
    #[must_use]
    pub const fn is_cleanup(&self) -> bool {
        matches!(self.kind, ErrorKind::Cleanup)
    }
}

impl fmt::Debug for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut s = f.debug_struct("Error");
        s.field("kind", &self.kind);
        if let Some(ctx) = &self.context {
            s.field("context", ctx);
        }
        if let Some(source) = &self.source {
            s.field("source", &format_args!("{source}"));
        }
        s.finish()
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.kind)?;
        if let Some(ctx) = &self.context {
            write!(f, ": {ctx}")?;
        }
        Ok(())
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source
            .as_deref()
            .map(|e| e as &(dyn std::error::Error + 'static))
    }
}

impl PartialEq for Error {
    fn eq(&self, other: &Self) -> bool {
        self.kind == other.kind && self.context == other.context
    }
}

impl Eq for Error {}

impl From<ConfigError> for Error {
    fn from(e: ConfigError) -> Self {
        Self::new(ErrorKind::Config)
            .with_context(e.to_string())
            .with_source(e)
    }
}

/// Result type for this crate's fallible operations.
pub type Result<T, E = Error> = core::result::Result<T, E>;
