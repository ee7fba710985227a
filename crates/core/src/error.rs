//! Domain error model.

use thiserror::Error;

/// Result type used across the domain and command layers.
pub type DomainResult<T> = Result<T, DomainError>;

/// Categorised failure returned to callers of the command layer.
///
/// Messages are human readable reasons only. Storage internals, raw backend
/// errors and sequence numbers never end up in here; anything of that kind is
/// logged where it happens and collapsed into [`DomainError::Internal`].
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DomainError {
    /// Malformed or ambiguous input, rejected before any event is built.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// The aggregate or a referenced external entity does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// A token or secret check failed.
    #[error("unauthenticated: {0}")]
    Unauthenticated(String),

    /// Mutation attempted on an aggregate in its terminal state.
    #[error("aggregate removed: {0}")]
    AggregateRemoved(String),

    /// The optimistic concurrency check was lost (after internal retries).
    #[error("concurrent modification: {0}")]
    ConcurrentModification(String),

    /// The requested check or query variant is not supported.
    #[error("unimplemented: {0}")]
    Unimplemented(String),

    /// The caller cancelled the invocation before it reached the store.
    #[error("cancelled")]
    Cancelled,

    /// Opaque internal fault (decoding, registry or storage inconsistency).
    #[error("internal error")]
    Internal,
}

impl DomainError {
    pub fn invalid_argument(msg: impl Into<String>) -> Self {
        Self::InvalidArgument(msg.into())
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    pub fn unauthenticated(msg: impl Into<String>) -> Self {
        Self::Unauthenticated(msg.into())
    }

    pub fn removed(msg: impl Into<String>) -> Self {
        Self::AggregateRemoved(msg.into())
    }

    pub fn conflict(msg: impl Into<String>) -> Self {
        Self::ConcurrentModification(msg.into())
    }

    pub fn unimplemented(msg: impl Into<String>) -> Self {
        Self::Unimplemented(msg.into())
    }

    /// Stable machine-readable kind, used by outer layers for categorisation.
    pub fn kind(&self) -> &'static str {
        match self {
            DomainError::InvalidArgument(_) => "invalid_argument",
            DomainError::NotFound(_) => "not_found",
            DomainError::Unauthenticated(_) => "unauthenticated",
            DomainError::AggregateRemoved(_) => "aggregate_removed",
            DomainError::ConcurrentModification(_) => "concurrent_modification",
            DomainError::Unimplemented(_) => "unimplemented",
            DomainError::Cancelled => "cancelled",
            DomainError::Internal => "internal",
        }
    }
}
