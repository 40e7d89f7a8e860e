//! Error type shared by all subsystem contracts

use thiserror::Error;

/// Result type for subsystem operations.
pub type SubsystemResult<T> = Result<T, SubsystemError>;

/// An error reported by a subsystem during open, connect, or liveness checks.
#[derive(Debug, Clone, Error)]
#[error("{subsystem}: {message}")]
pub struct SubsystemError {
    /// The subsystem that produced the error.
    pub subsystem: &'static str,

    /// What went wrong.
    pub message: String,
}

impl SubsystemError {
    /// Create a new subsystem error.
    #[must_use]
    pub fn new(subsystem: &'static str, message: impl Into<String>) -> Self {
        Self {
            subsystem,
            message: message.into(),
        }
    }
}
