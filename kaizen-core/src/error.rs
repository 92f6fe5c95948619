//! Error types for Kaizen operations

use thiserror::Error;

/// Master error type for all Kaizen errors.
///
/// Exactly three kinds cross component boundaries: a missing namespace, a
/// namespace collision on create, and a catch-all for every other
/// recoverable store failure. Every variant carries a human-readable
/// message.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum KaizenError {
    #[error("Namespace `{0}` not found")]
    NamespaceNotFound(String),

    #[error("Namespace \"{0}\" already exists.")]
    NamespaceAlreadyExists(String),

    #[error("{0}")]
    Store(String),
}

impl KaizenError {
    /// Build a `Store` error from anything printable.
    pub fn store(message: impl Into<String>) -> Self {
        KaizenError::Store(message.into())
    }
}

/// Result type alias for Kaizen operations.
pub type KaizenResult<T> = Result<T, KaizenError>;
