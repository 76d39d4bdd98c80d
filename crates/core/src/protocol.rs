//! Wire-level request and response types for the upload protocol.

use crate::session::{SessionStatus, UploadSession};
use serde::{Deserialize, Serialize};

/// Request to create an upload session (`POST /upload/init`).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct InitRequest {
    /// Original filename; must carry the supported archive extension.
    pub filename: String,
    /// Total blob size in bytes.
    pub total_size: u64,
    /// Number of fixed-size chunks the client will send.
    pub total_chunks: u32,
}

/// What `POST /upload/init` returns.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct InitResponse {
    /// The session ID to address chunks to.
    pub session_id: String,
    /// Chunk indices already received (for resumed sessions).
    pub uploaded_chunks: Vec<u32>,
}

/// Upload progress counters.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct Progress {
    /// Chunks marked successful so far.
    pub completed: u64,
    /// Total chunks in the session.
    pub total: u64,
}

/// Response from a chunk upload (`POST /upload/chunk`).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ChunkResponse {
    /// The chunk index this response refers to.
    pub chunk_index: u32,
    /// True when the chunk had already been received before this request.
    pub duplicate: bool,
    /// Session-wide progress after this chunk.
    pub progress: Progress,
}

/// Session snapshot returned by `GET /upload/{id}/status`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StatusResponse {
    /// The session record.
    pub session: SessionView,
    /// Chunk progress.
    pub progress: Progress,
}

/// Client-facing view of a session. Omits the server-local blob path.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SessionView {
    pub session_id: String,
    pub filename: String,
    pub total_size: u64,
    pub total_chunks: u32,
    pub status: SessionStatus,
    pub final_hash: Option<String>,
    pub created_at: String,
    pub updated_at: String,
    pub completed_at: Option<String>,
}

impl SessionView {
    /// Build the client view from a domain session.
    pub fn from_session(session: &UploadSession) -> Self {
        let rfc3339 = |t: &time::OffsetDateTime| {
            t.format(&time::format_description::well_known::Rfc3339)
                .unwrap_or_else(|_| t.to_string())
        };
        Self {
            session_id: session.id.to_string(),
            filename: session.filename.clone(),
            total_size: session.total_size,
            total_chunks: session.total_chunks,
            status: session.status,
            final_hash: session.final_hash.clone(),
            created_at: rfc3339(&session.created_at),
            updated_at: rfc3339(&session.updated_at),
            completed_at: session.completed_at.as_ref().map(rfc3339),
        }
    }
}

/// One archive entry in a `GET /upload/{id}/contents` listing.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ContentsEntry {
    /// Path of the entry within the archive.
    pub name: String,
    /// Uncompressed size in bytes.
    pub size: u64,
    /// Compressed size in bytes.
    pub compressed: u64,
    /// Whether the entry is a directory.
    pub is_directory: bool,
    /// Last-modified timestamp (RFC 3339), when the archive records one.
    pub modified: Option<String>,
}

/// Response for `GET /upload/{id}/contents`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ContentsResponse {
    /// Entries from the archive's central directory.
    pub entries: Vec<ContentsEntry>,
}
