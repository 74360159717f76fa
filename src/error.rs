//! Error types for the suspend/resume core.
//!
//! `SuspendError` covers everything that can go wrong while intercepting a
//! plan stream: conditions that were never implemented, notifications the
//! condition cannot interpret, failures raised by plans or by the executor,
//! and resources that expose no recognized movable.
//!
//! Errors raised by the executor travel back into plans as
//! [`Reply::Failed`](crate::plan::Reply::Failed), so a plan may either swallow
//! them (the best-effort `drop` does) or let them propagate to whoever is
//! consuming the stream.

use thiserror::Error;

/// Convenience alias for results using the suspend error type.
pub type SuspendResult<T> = std::result::Result<T, SuspendError>;

#[derive(Error, Debug)]
#[allow(missing_docs)]
pub enum SuspendError {
    #[error("Operation '{0}' is not implemented; override it in your condition")]
    Unimplemented(&'static str),

    #[error("Malformed notification from '{source_name}': {reason}")]
    MalformedNotification { source_name: String, reason: String },

    #[error("Plan error: {0}")]
    Plan(String),

    #[error("Executor rejected '{command}': {reason}")]
    Executor { command: String, reason: String },

    #[error("Resource '{0}' has no recognized movable")]
    NoMovable(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl SuspendError {
    /// Shorthand for an executor failure on `command`.
    pub fn executor(command: impl ToString, reason: impl Into<String>) -> Self {
        SuspendError::Executor {
            command: command.to_string(),
            reason: reason.into(),
        }
    }

    /// Shorthand for a value the condition could not interpret.
    pub fn malformed(source_name: impl Into<String>, reason: impl Into<String>) -> Self {
        SuspendError::MalformedNotification {
            source_name: source_name.into(),
            reason: reason.into(),
        }
    }
}
