//! Session creation.

use crate::error::{ApiError, ApiResult};
use crate::state::AppState;
use hangar_core::{ChunkLayout, SessionId};
use hangar_metadata::{SessionRepo, SessionRow};
use time::OffsetDateTime;

/// Create a fresh upload session: validate the request, preallocate the
/// blob, and insert the session with its pending chunk rows in one
/// metadata transaction.
///
/// Returns the new session id and the indices already uploaded, which is
/// always empty for a fresh session: resume relies on the client retaining
/// its session id, not on a content lookup.
#[tracing::instrument(skip(state), fields(filename = %filename))]
pub async fn initialize(
    state: &AppState,
    filename: &str,
    total_size: u64,
    total_chunks: u32,
) -> ApiResult<(SessionId, Vec<u32>)> {
    if total_size == 0 {
        return Err(ApiError::BadRequest("total_size must be > 0".to_string()));
    }
    if total_chunks == 0 {
        return Err(ApiError::BadRequest("total_chunks must be > 0".to_string()));
    }
    if !has_archive_extension(filename) {
        return Err(ApiError::BadRequest(format!(
            "filename must end in .{}",
            hangar_core::ARCHIVE_EXTENSION
        )));
    }
    if total_size > i64::MAX as u64 {
        return Err(ApiError::BadRequest(format!(
            "total_size {} exceeds maximum supported size {}",
            total_size,
            i64::MAX
        )));
    }

    let layout = ChunkLayout::new(total_size, state.config.upload.chunk_size)?;
    if layout.chunk_count() != u64::from(total_chunks) {
        return Err(ApiError::BadRequest(format!(
            "total_chunks {} does not match {} chunks of {} bytes for a {}-byte upload",
            total_chunks,
            layout.chunk_count(),
            state.config.upload.chunk_size,
            total_size
        )));
    }

    let session_id = SessionId::new();
    let blob_path = state.blobs.blob_path(&session_id);

    // The blob must exist at full size before any chunk write. If anything
    // past this point fails the file stays behind; the recovery sweep reaps
    // blobs that never got a session row.
    state.blobs.preallocate(&blob_path, total_size).await?;

    let now = OffsetDateTime::now_utc();
    let row = SessionRow {
        session_id: *session_id.as_uuid(),
        filename: filename.to_string(),
        total_size: total_size as i64,
        total_chunks: i64::from(total_chunks),
        status: "uploading".to_string(),
        blob_path: blob_path.display().to_string(),
        final_hash: None,
        failure_reason: None,
        created_at: now,
        updated_at: now,
        completed_at: None,
    };

    state.metadata.create_session(&row, total_chunks).await?;

    tracing::info!(
        session_id = %session_id,
        total_size,
        total_chunks,
        "Created upload session"
    );

    Ok((session_id, Vec::new()))
}

/// Check the filename carries the supported archive extension.
fn has_archive_extension(filename: &str) -> bool {
    std::path::Path::new(filename)
        .extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case(hangar_core::ARCHIVE_EXTENSION))
}
