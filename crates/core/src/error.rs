//! Error types for the core domain.

use thiserror::Error;

/// Core domain error type.
#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid node key: {0}")]
    InvalidKey(String),

    #[error("invalid hash: {0}")]
    InvalidHash(String),

    #[error("hash mismatch: expected {expected}, got {actual}")]
    HashMismatch { expected: String, actual: String },

    #[error("corrupt node: {0}")]
    CorruptNode(String),

    #[error("size mismatch: declared {declared}, computed {computed}")]
    SizeMismatch { declared: u64, computed: u64 },

    #[error("invalid realm: {0}")]
    InvalidRealm(String),

    #[error("invalid id: {0}")]
    InvalidId(String),

    #[error("invalid ticket: {0}")]
    InvalidTicket(String),

    #[error("invalid role: {0}")]
    InvalidRole(String),

    #[error("quota exceeded: {requested} bytes requested, limit {limit}")]
    QuotaExceeded { requested: u64, limit: u64 },

    #[error("outside ticket scope: {0}")]
    OutOfScope(String),

    #[error("content type not accepted: {0}")]
    ContentTypeRejected(String),

    #[error("lookup failed: {0}")]
    Lookup(String),

    #[error("serialization error: {0}")]
    Serialization(String),
}

impl Error {
    /// Whether this error is a node validation failure (bad bytes from the caller).
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            Self::HashMismatch { .. } | Self::CorruptNode(_) | Self::SizeMismatch { .. }
        )
    }
}

/// Result type alias for core operations.
pub type Result<T> = std::result::Result<T, Error>;
