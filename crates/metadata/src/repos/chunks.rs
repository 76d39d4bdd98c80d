//! Chunk-state persistence operations.

use crate::error::MetadataResult;
use crate::models::{ChunkCounts, ChunkRow};
use async_trait::async_trait;
use time::OffsetDateTime;
use uuid::Uuid;

/// Persistence operations over chunk rows.
#[async_trait]
pub trait ChunkRepo: Send + Sync {
    /// Get one chunk row.
    async fn get_chunk(
        &self,
        session_id: Uuid,
        chunk_index: u32,
    ) -> MetadataResult<Option<ChunkRow>>;

    /// Mark a chunk successful. Idempotent: only the first call performs the
    /// pending-to-success transition and returns true; later calls return
    /// false without touching the row. Errors with NotFound if no chunk row
    /// exists for the index.
    async fn mark_chunk_success(
        &self,
        session_id: Uuid,
        chunk_index: u32,
        received_at: OffsetDateTime,
    ) -> MetadataResult<bool>;

    /// Count total and successful chunks for a session.
    async fn count_chunks(&self, session_id: Uuid) -> MetadataResult<ChunkCounts>;

    /// Indices of chunks already marked successful, in ascending order.
    async fn successful_indices(&self, session_id: Uuid) -> MetadataResult<Vec<u32>>;
}
