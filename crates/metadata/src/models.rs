//! Row types for the two metadata tables.

use hangar_core::{Error as CoreError, SessionStatus, UploadSession};
use sqlx::FromRow;
use std::path::PathBuf;
use time::OffsetDateTime;
use uuid::Uuid;

/// One row of `upload_sessions`.
#[derive(Debug, Clone, FromRow)]
pub struct SessionRow {
    pub session_id: Uuid,
    pub filename: String,
    pub total_size: i64,
    pub total_chunks: i64,
    pub status: String,
    pub blob_path: String,
    pub final_hash: Option<String>,
    pub failure_reason: Option<String>,
    pub created_at: OffsetDateTime,
    pub updated_at: OffsetDateTime,
    pub completed_at: Option<OffsetDateTime>,
}

impl SessionRow {
    /// Convert into the domain session type.
    pub fn to_session(&self) -> Result<UploadSession, CoreError> {
        Ok(UploadSession {
            id: self.session_id.into(),
            filename: self.filename.clone(),
            total_size: self.total_size as u64,
            total_chunks: self.total_chunks as u32,
            status: SessionStatus::parse(&self.status)?,
            blob_path: PathBuf::from(&self.blob_path),
            final_hash: self.final_hash.clone(),
            created_at: self.created_at,
            updated_at: self.updated_at,
            completed_at: self.completed_at,
        })
    }
}

/// Chunk record. One row per (session, index), created with the session.
#[derive(Debug, Clone, FromRow)]
pub struct ChunkRow {
    pub session_id: Uuid,
    pub chunk_index: i64,
    pub status: String,
    pub received_at: Option<OffsetDateTime>,
}

impl ChunkRow {
    /// Whether the chunk has been received and committed.
    pub fn is_success(&self) -> bool {
        self.status == "success"
    }
}

/// Result of a finalize claim attempt.
#[derive(Debug, Clone)]
pub struct FinalizeClaim {
    /// The session row, post-transition when `claimed` is true.
    pub session: SessionRow,
    /// True when this call performed the uploading-to-processing transition.
    /// False when the session was not ready or another finalizer owns it.
    pub claimed: bool,
}

/// Aggregate chunk progress for a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkCounts {
    pub total: u64,
    pub successful: u64,
}

impl ChunkCounts {
    /// True when every chunk has been received.
    pub fn is_complete(&self) -> bool {
        self.total > 0 && self.successful == self.total
    }
}
