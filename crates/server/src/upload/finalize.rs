//! Exclusive post-assembly finalization.
//!
//! The session state machine during finalization:
//!
//! ```text
//! uploading --(claim, all chunks success)--> processing
//! processing --(size ok, hash ok, archive ok)--> completed
//! processing --(any check fails)--> failed
//! ```
//!
//! The claim is the only mutual-exclusion primitive in the system. The
//! expensive checks run outside any database transaction; `processing` is
//! the durable marker that keeps other finalizers out, and the recovery
//! sweep can always resume a session that crashed mid-check.

use crate::error::{ApiError, ApiResult};
use crate::state::AppState;
use hangar_core::{ContentHash, SessionId};
use hangar_metadata::{SessionRepo, SessionRow};
use std::path::Path;
use time::OffsetDateTime;

/// Finalize a session. Safe to call from any trigger source, any number of
/// times: callers that lose the claim observe a no-op.
#[tracing::instrument(skip(state), fields(session_id = %session_id))]
pub async fn finalize(state: &AppState, session_id: SessionId) -> ApiResult<()> {
    let claim = state
        .metadata
        .begin_finalize(*session_id.as_uuid(), OffsetDateTime::now_utc())
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("upload session {session_id} not found")))?;

    if !claim.claimed {
        tracing::debug!(
            session_id = %session_id,
            status = %claim.session.status,
            "Finalize claim not acquired; another finalizer owns the session or it is not ready"
        );
        return Ok(());
    }

    run_checks(state, &claim.session).await
}

/// Run the verification pipeline on a session already in `processing` and
/// drive it to a terminal state. Also the recovery re-entry point: every
/// check is a pure function of the blob contents, so re-running after a
/// crash reaches the same outcome.
pub async fn run_checks(state: &AppState, session: &SessionRow) -> ApiResult<()> {
    let session_id = session.session_id;
    let now = OffsetDateTime::now_utc();

    match verify_blob(state, session).await {
        Ok(final_hash) => {
            state
                .metadata
                .complete_session(session_id, &final_hash.to_hex(), now)
                .await?;
            tracing::info!(
                session_id = %session_id,
                final_hash = %final_hash,
                "Upload completed"
            );
        }
        Err(reason) => {
            // A failed session keeps no blob. Delete first; the status update
            // is the commit point, and delete is idempotent if we die between
            // the two.
            state
                .blobs
                .delete(Path::new(&session.blob_path))
                .await?;
            state.metadata.fail_session(session_id, &reason, now).await?;
            tracing::warn!(
                session_id = %session_id,
                reason = %reason,
                "Upload failed verification"
            );
        }
    }
    Ok(())
}

/// Verify the assembled blob: exact size, streaming hash, archive structure.
/// Any failure, including blob I/O, resolves the session to `failed`; the
/// returned string is the recorded failure reason.
async fn verify_blob(state: &AppState, session: &SessionRow) -> Result<ContentHash, String> {
    let path = Path::new(&session.blob_path);

    let actual_size = state
        .blobs
        .size(path)
        .await
        .map_err(|e| format!("blob unreadable: {e}"))?;
    if actual_size != session.total_size as u64 {
        return Err(format!(
            "size mismatch: expected {}, got {}",
            session.total_size, actual_size
        ));
    }

    let final_hash = hangar_archive::hash_blob(path)
        .await
        .map_err(|e| format!("hashing failed: {e}"))?;

    let valid = hangar_archive::is_valid_archive(path)
        .await
        .map_err(|e| format!("archive validation failed: {e}"))?;
    if !valid {
        return Err("archive structure invalid".to_string());
    }

    Ok(final_hash)
}
