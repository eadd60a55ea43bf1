//! Distinguishable failure kinds carried inside `anyhow::Error`.
//!
//! Most of the daemon propagates plain `anyhow` errors with context. The
//! variants here are the ones a caller needs to tell apart, and are
//! recovered with [`anyhow::Error::downcast_ref`].

use std::time::Duration;

use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ControlError {
    /// A configuration was rejected and never applied.
    #[error("invalid {section} config: {reason}")]
    Validation {
        section: &'static str,
        reason: String,
    },

    /// A background task did not finish within the stop deadline.
    /// The task may still be draining.
    #[error("task '{task}' did not stop within {deadline:?}")]
    Timeout { task: String, deadline: Duration },

    #[error("there's no configuration for a {width}x{height} panel")]
    UnsupportedPanel { width: u16, height: u16 },

    /// The network manager needs credentials that were not supplied.
    #[error("passwords required")]
    SecretsRequired,
}

impl ControlError {
    pub fn validation(section: &'static str, reason: impl Into<String>) -> Self {
        Self::Validation {
            section,
            reason: reason.into(),
        }
    }
}

/// Returns true when `err` is a rejected configuration.
pub fn is_validation(err: &anyhow::Error) -> bool {
    matches!(
        err.downcast_ref::<ControlError>(),
        Some(ControlError::Validation { .. })
    )
}
