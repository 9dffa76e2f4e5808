//! Endpoint error types.

use serde::Serialize;

use relforge_release::ReleaseError;
use relforge_tasks::TaskError;

/// The main error type for endpoint handlers.
#[derive(Debug, thiserror::Error)]
pub enum BackendError {
    /// Caller mistake; the transport turns this into an error response
    /// rather than an internal failure.
    #[error("{0}")]
    Validation(String),

    #[error(transparent)]
    Task(#[from] TaskError),

    #[error(transparent)]
    Release(#[from] ReleaseError),
}

impl BackendError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    /// The error-response payload for caller mistakes, `None` for internal
    /// failures.
    pub fn to_error_response(&self) -> Option<ErrorResponse> {
        match self {
            Self::Validation(msg) => Some(ErrorResponse {
                error: msg.clone(),
            }),
            _ => None,
        }
    }
}

/// A type alias for `Result<T, BackendError>`.
pub type BackendResult<T> = Result<T, BackendError>;

/// Host-framework error payload returned for invalid requests.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}
