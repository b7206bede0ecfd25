//! Error types shared across the survey system.

use thiserror::Error;

/// Errors surfaced at service and repository boundaries.
#[derive(Error, Debug)]
pub enum SurveyError {
    /// Entity id does not exist
    #[error("{0} not found")]
    NotFound(String),

    /// Bad input or bad entity state
    #[error("validation failed: {0}")]
    Validation(String),

    /// Operation not allowed in the current status
    #[error("illegal state: {0}")]
    IllegalState(String),

    /// Fleet selector found no usable drone
    #[error("no drone available: {0}")]
    NoDroneAvailable(String),

    /// Retryable storage error (network, timeout)
    #[error("transient I/O error: {0}")]
    TransientIo(String),

    /// Anything else - terminates the mission loop
    #[error("internal error: {0}")]
    Internal(String),
}

impl SurveyError {
    /// Whether the operation may be retried as-is.
    pub fn is_transient(&self) -> bool {
        matches!(self, SurveyError::TransientIo(_))
    }
}

/// Result type for survey operations.
pub type Result<T> = std::result::Result<T, SurveyError>;
