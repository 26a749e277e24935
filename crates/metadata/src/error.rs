//! Metadata store error types.

use thiserror::Error;

/// Metadata store operation errors.
#[derive(Debug, Error)]
pub enum MetadataError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("already exists: {0}")]
    AlreadyExists(String),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("invalid cursor: {0}")]
    InvalidCursor(String),

    #[error("corrupt record: {0}")]
    CorruptRecord(String),
}

impl MetadataError {
    /// Map a unique-constraint violation to `AlreadyExists`, passing other errors through.
    pub(crate) fn on_unique(what: impl Into<String>) -> impl FnOnce(sqlx::Error) -> Self {
        let what = what.into();
        move |e| match &e {
            sqlx::Error::Database(db) if db.is_unique_violation() => Self::AlreadyExists(what),
            _ => Self::Database(e),
        }
    }
}

impl From<serde_json::Error> for MetadataError {
    fn from(e: serde_json::Error) -> Self {
        Self::CorruptRecord(e.to_string())
    }
}

impl From<cask_core::Error> for MetadataError {
    fn from(e: cask_core::Error) -> Self {
        Self::CorruptRecord(e.to_string())
    }
}

impl From<std::io::Error> for MetadataError {
    fn from(e: std::io::Error) -> Self {
        Self::Config(e.to_string())
    }
}

/// Result type for metadata operations.
pub type MetadataResult<T> = std::result::Result<T, MetadataError>;
