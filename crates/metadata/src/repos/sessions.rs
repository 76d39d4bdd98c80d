//! Session persistence operations.

use crate::error::MetadataResult;
use crate::models::{FinalizeClaim, SessionRow};
use async_trait::async_trait;
use time::OffsetDateTime;
use uuid::Uuid;

/// Persistence operations over session rows.
#[async_trait]
pub trait SessionRepo: Send + Sync {
    /// Create a session together with its `total_chunks` pending chunk rows
    /// in one transaction: both tables or neither.
    async fn create_session(&self, session: &SessionRow, total_chunks: u32)
    -> MetadataResult<()>;

    /// Get a session by ID.
    async fn get_session(&self, session_id: Uuid) -> MetadataResult<Option<SessionRow>>;

    /// Atomically claim a session for finalization.
    ///
    /// In one transaction: read the session; if its status is 'uploading'
    /// and every chunk is 'success', transition it to 'processing'.
    /// Returns None if the session doesn't exist; otherwise the row plus a
    /// flag telling the caller whether this call won the transition.
    async fn begin_finalize(
        &self,
        session_id: Uuid,
        updated_at: OffsetDateTime,
    ) -> MetadataResult<Option<FinalizeClaim>>;

    /// Update session status. Refuses to move a session out of a terminal
    /// state; such calls are no-ops.
    async fn update_status(
        &self,
        session_id: Uuid,
        status: &str,
        updated_at: OffsetDateTime,
    ) -> MetadataResult<()>;

    /// Transition a 'processing' session to 'completed', recording the blob
    /// hash and completion time.
    async fn complete_session(
        &self,
        session_id: Uuid,
        final_hash: &str,
        completed_at: OffsetDateTime,
    ) -> MetadataResult<()>;

    /// Transition a non-terminal session to 'failed' with a reason.
    async fn fail_session(
        &self,
        session_id: Uuid,
        reason: &str,
        failed_at: OffsetDateTime,
    ) -> MetadataResult<()>;

    /// List sessions in the given status.
    async fn list_by_status(&self, status: &str) -> MetadataResult<Vec<SessionRow>>;

    /// List sessions in the given status created before `cutoff`.
    async fn list_older_than(
        &self,
        status: &str,
        cutoff: OffsetDateTime,
    ) -> MetadataResult<Vec<SessionRow>>;

    /// Delete a session and, through cascade, its chunk rows.
    async fn delete_session(&self, session_id: Uuid) -> MetadataResult<()>;
}
