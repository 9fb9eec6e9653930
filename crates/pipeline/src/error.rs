//! Stage and collaborator error taxonomy.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Coarse failure category reported by an external collaborator.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ServiceErrorKind {
    Timeout,
    RateLimited,
    Unavailable,
    NotFound,
    Rejected,
    InvalidResponse,
}

impl core::fmt::Display for ServiceErrorKind {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let s = match self {
            ServiceErrorKind::Timeout => "timeout",
            ServiceErrorKind::RateLimited => "rate limited",
            ServiceErrorKind::Unavailable => "unavailable",
            ServiceErrorKind::NotFound => "not found",
            ServiceErrorKind::Rejected => "rejected",
            ServiceErrorKind::InvalidResponse => "invalid response",
        };
        f.write_str(s)
    }
}

/// Error returned by a collaborator (web fetch, extraction, enhancement,
/// reconstruction, ...).
///
/// Collaborators only say *what* went wrong; whether that is worth retrying is
/// decided by the calling stage's [`ErrorPolicy`].
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("{kind}: {message}")]
pub struct ServiceError {
    pub kind: ServiceErrorKind,
    pub message: String,
}

impl ServiceError {
    pub fn new(kind: ServiceErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(ServiceErrorKind::Timeout, message)
    }

    pub fn rate_limited(message: impl Into<String>) -> Self {
        Self::new(ServiceErrorKind::RateLimited, message)
    }

    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::new(ServiceErrorKind::Unavailable, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(ServiceErrorKind::NotFound, message)
    }

    pub fn rejected(message: impl Into<String>) -> Self {
        Self::new(ServiceErrorKind::Rejected, message)
    }

    pub fn invalid_response(message: impl Into<String>) -> Self {
        Self::new(ServiceErrorKind::InvalidResponse, message)
    }
}

/// Outcome of a failed stage attempt.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum StageError {
    /// Raw collaborator failure; classified by the stage's [`ErrorPolicy`].
    #[error(transparent)]
    Service(#[from] ServiceError),

    /// Worth retrying regardless of policy.
    #[error("{0}")]
    Transient(String),

    /// Never worth retrying (e.g. "no menu items could be extracted").
    #[error("{0}")]
    Fatal(String),

    /// The stage cannot continue without a human decision.
    #[error("needs input: {reason}")]
    NeedsInput {
        reason: String,
        candidates: Vec<serde_json::Value>,
    },

    /// The run was canceled or superseded; observed at a checkpoint.
    #[error("canceled")]
    Canceled,
}

impl StageError {
    pub fn transient(msg: impl Into<String>) -> Self {
        Self::Transient(msg.into())
    }

    pub fn fatal(msg: impl Into<String>) -> Self {
        Self::Fatal(msg.into())
    }

    pub fn needs_input(reason: impl Into<String>, candidates: Vec<serde_json::Value>) -> Self {
        Self::NeedsInput {
            reason: reason.into(),
            candidates,
        }
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ErrorClass {
    Transient,
    Fatal,
}

/// Per-stage classification of collaborator failures.
pub trait ErrorPolicy: Send + Sync {
    fn classify(&self, err: &ServiceError) -> ErrorClass;
}

/// Timeouts, rate limits and unavailability are transient; everything else is
/// a definitive answer.
#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultErrorPolicy;

impl ErrorPolicy for DefaultErrorPolicy {
    fn classify(&self, err: &ServiceError) -> ErrorClass {
        match err.kind {
            ServiceErrorKind::Timeout
            | ServiceErrorKind::RateLimited
            | ServiceErrorKind::Unavailable => ErrorClass::Transient,
            ServiceErrorKind::NotFound
            | ServiceErrorKind::Rejected
            | ServiceErrorKind::InvalidResponse => ErrorClass::Fatal,
        }
    }
}

/// Errors raised by the pipeline layer itself (definition, input, resume state).
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PipelineError {
    #[error("invalid pipeline definition: {0}")]
    InvalidDefinition(String),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("invalid resolution: {0}")]
    InvalidResolution(String),

    #[error("corrupt resume state: {0}")]
    ResumeState(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_policy_splits_kinds() {
        let p = DefaultErrorPolicy;
        assert_eq!(p.classify(&ServiceError::timeout("t")), ErrorClass::Transient);
        assert_eq!(p.classify(&ServiceError::rate_limited("429")), ErrorClass::Transient);
        assert_eq!(p.classify(&ServiceError::unavailable("503")), ErrorClass::Transient);
        assert_eq!(p.classify(&ServiceError::not_found("404")), ErrorClass::Fatal);
        assert_eq!(p.classify(&ServiceError::rejected("400")), ErrorClass::Fatal);
        assert_eq!(
            p.classify(&ServiceError::invalid_response("garbage")),
            ErrorClass::Fatal
        );
    }

    #[test]
    fn service_error_display_includes_kind() {
        let e = StageError::from(ServiceError::unavailable("connection refused"));
        assert_eq!(e.to_string(), "unavailable: connection refused");
    }
}
