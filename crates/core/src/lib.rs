//! Shared domain model for the Hangar upload coordinator.
//!
//! Everything the other crates agree on lives here: session identifiers and
//! their lifecycle states, the fixed-size chunk layout arithmetic, content
//! hashes, configuration types, and the wire-level request/response types.

pub mod chunk;
pub mod config;
pub mod error;
pub mod hash;
pub mod protocol;
pub mod session;

pub use chunk::ChunkLayout;
pub use error::{Error, Result};
pub use hash::{ContentHash, ContentHasher};
pub use session::{SessionId, SessionStatus, UploadSession};

/// Chunk size used when the operator configures none: 5 MiB.
pub const DEFAULT_CHUNK_SIZE: u64 = 5 * 1024 * 1024;

/// Largest configurable chunk size: 64 MiB.
pub const MAX_CHUNK_SIZE: u64 = 64 * 1024 * 1024;

/// Smallest configurable chunk size: 64 KiB.
pub const MIN_CHUNK_SIZE: u64 = 64 * 1024;

/// File extension accepted for upload payloads.
pub const ARCHIVE_EXTENSION: &str = "zip";
