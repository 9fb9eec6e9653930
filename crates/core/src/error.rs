//! Domain error model.

use thiserror::Error;

use crate::status::JobStatus;

pub type DomainResult<T> = Result<T, DomainError>;

/// Deterministic failures raised while parsing or moving domain values.
///
/// Storage and transport failures have their own error types further out.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DomainError {
    /// Malformed job input, unknown kind or unknown status name.
    #[error("validation failed: {0}")]
    Validation(String),

    #[error("invalid transition: {from} -> {to}")]
    InvalidTransition { from: JobStatus, to: JobStatus },

    #[error("invalid identifier: {0}")]
    InvalidId(String),
}

impl DomainError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn invalid_transition(from: JobStatus, to: JobStatus) -> Self {
        Self::InvalidTransition { from, to }
    }

    pub fn invalid_id(msg: impl Into<String>) -> Self {
        Self::InvalidId(msg.into())
    }
}
