//! Domain-level errors.

use thiserror::Error;

/// Errors produced by the domain types themselves.
#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid hash: {0}")]
    InvalidHash(String),

    #[error("hash mismatch: expected {expected}, got {actual}")]
    HashMismatch { expected: String, actual: String },

    #[error("chunk size {size} outside supported range [{min}, {max}]")]
    InvalidChunkSize { size: u64, min: u64, max: u64 },

    #[error("chunk index {index} out of range (session has {total_chunks} chunks)")]
    ChunkIndexOutOfRange { index: u32, total_chunks: u32 },

    #[error("session error: {0}")]
    Session(String),

    #[error("serialization error: {0}")]
    Serialization(String),
}

/// Shorthand result for domain operations.
pub type Result<T> = std::result::Result<T, Error>;
