//! Errors from blob I/O.

use thiserror::Error;

/// Blob storage operation errors.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("write at offset {offset} would extend file {path} of {file_size} bytes")]
    WouldExtend {
        path: String,
        offset: u64,
        file_size: u64,
    },

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Shorthand result for blob operations.
pub type StorageResult<T> = std::result::Result<T, StorageError>;
