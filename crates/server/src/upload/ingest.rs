//! Chunk ingestion.

use crate::error::{ApiError, ApiResult};
use crate::state::AppState;
use crate::upload::finalize;
use bytes::Bytes;
use futures::{Stream, StreamExt};
use hangar_core::protocol::Progress;
use hangar_core::{ChunkLayout, ContentHash, SessionId, SessionStatus};
use hangar_metadata::{ChunkRepo, SessionRepo};
use std::path::Path;
use time::OffsetDateTime;

/// Result of one chunk ingestion.
#[derive(Clone, Copy, Debug)]
pub struct ChunkOutcome {
    /// The chunk index this outcome refers to.
    pub chunk_index: u32,
    /// True when the chunk had already been committed before this call.
    pub duplicate: bool,
    /// Session-wide progress after this call.
    pub progress: Progress,
}

/// Accept one chunk: validate it against the session, stream it to its
/// offset in the blob, and commit the success mark.
///
/// The mark is the single observable transition of ingestion. Everything
/// before it can fail or be cancelled and the chunk row stays pending; a
/// retry of the same index overwrites the same byte range, which is
/// byte-equivalent for the correct payload.
#[tracing::instrument(skip(state, payload, declared_hash), fields(session_id = %session_id, chunk_index))]
pub async fn accept_chunk<S>(
    state: &AppState,
    session_id: SessionId,
    chunk_index: u32,
    declared_hash: Option<ContentHash>,
    payload: S,
) -> ApiResult<ChunkOutcome>
where
    S: Stream<Item = ApiResult<Bytes>> + Send,
{
    let session = state
        .metadata
        .get_session(*session_id.as_uuid())
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("upload session {session_id} not found")))?;

    let status = SessionStatus::parse(&session.status)?;
    if !status.accepts_chunks() {
        return Err(ApiError::Conflict(format!(
            "upload session is {status}, not uploading"
        )));
    }

    if i64::from(chunk_index) >= session.total_chunks {
        return Err(ApiError::BadRequest(format!(
            "chunk_index {} out of range (session has {} chunks)",
            chunk_index, session.total_chunks
        )));
    }

    // Duplicate delivery short-circuits without touching the blob, so a
    // client retrying after an ambiguous response costs nothing.
    let chunk = state
        .metadata
        .get_chunk(*session_id.as_uuid(), chunk_index)
        .await?
        .ok_or_else(|| {
            ApiError::Internal(format!(
                "chunk row {chunk_index} missing for session {session_id}"
            ))
        })?;
    if chunk.is_success() {
        let counts = state.metadata.count_chunks(*session_id.as_uuid()).await?;
        return Ok(ChunkOutcome {
            chunk_index,
            duplicate: true,
            progress: Progress {
                completed: counts.successful,
                total: counts.total,
            },
        });
    }

    let layout = ChunkLayout::new(session.total_size as u64, state.config.upload.chunk_size)?;
    let offset = layout.offset(chunk_index)?;
    let expected_len = layout.len(chunk_index)?;

    // Stream the payload to its offset, hashing in flight when the client
    // declared a chunk hash. The payload is never buffered whole; an
    // oversize payload is cut off at the first frame that would cross the
    // chunk boundary.
    let mut writer = state
        .blobs
        .writer_at(Path::new(&session.blob_path), offset)
        .await?;
    let mut hasher = declared_hash.map(|_| ContentHash::hasher());
    let mut payload = std::pin::pin!(payload);
    while let Some(frame) = payload.next().await {
        let frame = frame?;
        if writer.written() + frame.len() as u64 > expected_len {
            return Err(ApiError::BadRequest(format!(
                "chunk {} payload exceeds expected length {}",
                chunk_index, expected_len
            )));
        }
        if let Some(hasher) = &mut hasher {
            hasher.update(&frame);
        }
        writer.write(&frame).await?;
    }
    let written = writer.finish().await?;

    if written != expected_len {
        return Err(ApiError::BadRequest(format!(
            "chunk {} payload is {} bytes, expected {}",
            chunk_index, written, expected_len
        )));
    }

    if let (Some(expected), Some(hasher)) = (declared_hash, hasher) {
        let actual = hasher.finalize();
        if actual != expected {
            // No mark: the row stays pending and the client re-sends.
            return Err(ApiError::IntegrityFailed {
                expected: expected.to_hex(),
                actual: actual.to_hex(),
            });
        }
    }

    // Commit point.
    let newly_marked = state
        .metadata
        .mark_chunk_success(*session_id.as_uuid(), chunk_index, OffsetDateTime::now_utc())
        .await?;

    let counts = state.metadata.count_chunks(*session_id.as_uuid()).await?;

    if counts.is_complete() {
        trigger_finalize(state, session_id);
    }

    Ok(ChunkOutcome {
        chunk_index,
        duplicate: !newly_marked,
        progress: Progress {
            completed: counts.successful,
            total: counts.total,
        },
    })
}

/// Fire the finalizer as a detached task. The trigger is advisory: the
/// recovery sweep also finalizes any fully-uploaded session, so losing this
/// task to a crash costs nothing, and the finalize claim makes duplicate
/// triggers harmless.
fn trigger_finalize(state: &AppState, session_id: SessionId) {
    let state = state.clone();
    tokio::spawn(async move {
        if let Err(e) = finalize::finalize(&state, session_id).await {
            tracing::error!(
                session_id = %session_id,
                error = %e,
                "Finalization trigger failed"
            );
        }
    });
}
