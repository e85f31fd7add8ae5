//! Configuration for deferred invocations.
//!
//! Every [`Deferred`](crate::Deferred) wrapper carries a [`DeferConfig`]. The
//! defaults match the behaviour of the plain combinator; the knobs only change
//! how the synchronous path treats asynchronous cleanups, whether cleanup
//! panics are contained, and the label attached to log events.
//!
//! With the `config-file` feature the config can be read from TOML:
//!
//! ```toml
//! label = "db-teardown"
//! sync_cleanups = "block"
//! catch_cleanup_panics = true
//! ```

use serde::{Deserialize, Serialize};

/// Maximum accepted label length in bytes.
pub const MAX_LABEL_LEN: usize = 128;

/// How the synchronous drain treats a cleanup that returns a pending future.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncCleanupPolicy {
    /// Poll the future once in place, then let it run detached.
    ///
    /// The drain moves on without waiting. A future that finishes on that
    /// first poll is treated like a synchronous cleanup. Otherwise it is
    /// handed to the wrapper's spawner, or driven to completion on a helper
    /// thread when no spawner is set. Failures after detachment are logged,
    /// never captured.
    #[default]
    Detach,
    /// Block the calling thread until the future completes, then continue.
    Block,
}

impl SyncCleanupPolicy {
    /// Returns the policy name as used in config files.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Detach => "detach",
            Self::Block => "block",
        }
    }
}

/// Errors produced while loading or validating a [`DeferConfig`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    /// The label is empty or only whitespace.
    #[error("label must not be empty")]
    EmptyLabel,
    /// The label exceeds [`MAX_LABEL_LEN`].
    #[error("label is {len} bytes, limit is {max}", max = MAX_LABEL_LEN)]
    LabelTooLong {
        /// Actual length in bytes.
        len: usize,
    },
    /// The label contains control characters.
    #[error("label contains control characters")]
    LabelControlChars,
    /// The config text could not be parsed.
    #[error("failed to parse config: {0}")]
    Parse(String),
}

/// Settings for a deferred wrapper.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DeferConfig {
    /// Label recorded on every log event of the wrapper's invocations.
    pub label: Option<String>,
    /// Treatment of pending cleanups on the synchronous path.
    pub sync_cleanups: SyncCleanupPolicy,
    /// Contain panicking cleanups instead of propagating them.
    pub catch_cleanup_panics: bool,
}

impl Default for DeferConfig {
    fn default() -> Self {
        Self {
            label: None,
            sync_cleanups: SyncCleanupPolicy::Detach,
            catch_cleanup_panics: true,
        }
    }
}

impl DeferConfig {
    /// Creates the default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the log label.
    #[must_use]
    pub fn label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    /// Sets the synchronous-path policy for pending cleanups.
    #[must_use]
    pub const fn sync_cleanups(mut self, policy: SyncCleanupPolicy) -> Self {
        self.sync_cleanups = policy;
        self
    }

    /// Sets whether cleanup panics are contained.
    #[must_use]
    pub const fn catch_cleanup_panics(mut self, catch: bool) -> Self {
        self.catch_cleanup_panics = catch;
        self
    }

    /// Checks the configuration for invalid values.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let Some(label) = &self.label else {
            return Ok(());
        };
        if label.trim().is_empty() {
            return Err(ConfigError::EmptyLabel);
        }
        if label.len() > MAX_LABEL_LEN {
            return Err(ConfigError::LabelTooLong { len: label.len() });
        }
        if label.chars().any(char::is_control) {
            return Err(ConfigError::LabelControlChars);
        }
        Ok(())
    }

    /// Parses and validates a TOML document.
    #[cfg(feature = "config-file")]
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(text).map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }
}
