use serde::Serialize;
use thiserror::Error;

use sigil_core::DomainError;

/// Categorised error returned by the session API.
///
/// Serializes as `{"error": code, "message": ...}`. Messages are the human
/// readable reason of the domain error only.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Error)]
#[error("{code}: {message}")]
pub struct ApiError {
    #[serde(rename = "error")]
    pub code: &'static str,
    pub message: String,
    /// HTTP-like status for transports that want one.
    #[serde(skip)]
    pub status: u16,
}

impl ApiError {
    pub fn new(status: u16, code: &'static str, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            status,
        }
    }

    pub fn invalid_argument(message: impl Into<String>) -> Self {
        DomainError::invalid_argument(message).into()
    }

    pub fn unimplemented(message: impl Into<String>) -> Self {
        DomainError::unimplemented(message).into()
    }
}

impl From<DomainError> for ApiError {
    fn from(err: DomainError) -> Self {
        let code = err.kind();
        let status = match &err {
            DomainError::InvalidArgument(_) => 400,
            DomainError::Unauthenticated(_) => 401,
            DomainError::NotFound(_) => 404,
            DomainError::ConcurrentModification(_) => 409,
            DomainError::AggregateRemoved(_) => 412,
            DomainError::Cancelled => 499,
            DomainError::Internal => 500,
            DomainError::Unimplemented(_) => 501,
        };
        let message = match err {
            DomainError::InvalidArgument(m)
            | DomainError::NotFound(m)
            | DomainError::Unauthenticated(m)
            | DomainError::AggregateRemoved(m)
            | DomainError::ConcurrentModification(m)
            | DomainError::Unimplemented(m) => m,
            DomainError::Cancelled => "request cancelled".to_string(),
            DomainError::Internal => "internal error".to_string(),
        };
        Self::new(status, code, message)
    }
}
