//! Archive validation error types.

use thiserror::Error;

/// Archive inspection errors.
#[derive(Debug, Error)]
pub enum ArchiveError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("not a valid archive: {0}")]
    Invalid(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Shorthand result for archive inspection.
pub type ArchiveResult<T> = std::result::Result<T, ArchiveError>;
