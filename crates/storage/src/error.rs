use thiserror::Error;

#[derive(Debug, Error)]
pub enum StorageError {
    /// No blob under this key.
    #[error("blob {0} not found")]
    NotFound(String),

    #[error("blob store I/O: {0}")]
    Io(#[from] std::io::Error),

    /// Key would escape the store root or is otherwise unusable as a path.
    #[error("unusable blob key: {0}")]
    InvalidKey(String),

    #[error("storage config: {0}")]
    Config(String),
}

pub type StorageResult<T> = std::result::Result<T, StorageError>;
