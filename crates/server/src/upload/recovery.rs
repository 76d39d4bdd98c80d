//! Crash recovery and abandonment sweeps.
//!
//! Runs at startup and periodically thereafter. Every sweep is idempotent
//! and safe to run concurrently with live ingestion: re-running after a
//! partial sweep, or racing a chunk-completion trigger, converges on the
//! same state.

use crate::error::ApiResult;
use crate::state::AppState;
use crate::upload::finalize;
use hangar_core::SessionId;
use hangar_metadata::{ChunkRepo, SessionRepo};
use std::path::Path;
use time::OffsetDateTime;
use uuid::Uuid;

/// Counters from one recovery pass.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SweepReport {
    /// Processing sessions failed because their blob vanished.
    pub failed_missing_blob: usize,
    /// Processing sessions reset to uploading for client resume.
    pub resumed: usize,
    /// Processing sessions whose verification was re-run.
    pub refinalized: usize,
    /// Uploading sessions with all chunks present that were finalized.
    pub finalized: usize,
    /// Abandoned sessions reaped.
    pub reaped: usize,
    /// Orphaned blob files deleted.
    pub orphans_deleted: usize,
}

/// Run all sweeps once.
#[tracing::instrument(skip(state))]
pub async fn run_sweeps(state: &AppState) -> ApiResult<SweepReport> {
    let mut report = SweepReport::default();
    sweep_interrupted_finalization(state, &mut report).await?;
    sweep_completed_uploads(state, &mut report).await?;
    sweep_abandoned_sessions(state, &mut report).await?;
    sweep_orphaned_blobs(state, &mut report).await?;

    if report != SweepReport::default() {
        tracing::info!(?report, "Recovery sweep finished");
    }
    Ok(report)
}

/// Spawn the periodic sweep loop.
pub fn spawn_periodic(state: AppState) -> tokio::task::JoinHandle<()> {
    let interval = state.config.upload.cleanup_interval();
    tokio::spawn(async move {
        loop {
            tokio::time::sleep(interval).await;
            if let Err(e) = run_sweeps(&state).await {
                tracing::error!(error = %e, "Recovery sweep failed");
            }
        }
    })
}

/// Sweep A: sessions stuck in `processing` by a crash mid-finalization.
async fn sweep_interrupted_finalization(
    state: &AppState,
    report: &mut SweepReport,
) -> ApiResult<()> {
    let now = OffsetDateTime::now_utc();
    for session in state.metadata.list_by_status("processing").await? {
        let path = Path::new(&session.blob_path);

        if !state.blobs.exists(path).await? {
            state
                .metadata
                .fail_session(session.session_id, "blob missing during finalization", now)
                .await?;
            report.failed_missing_blob += 1;
            continue;
        }

        let counts = state.metadata.count_chunks(session.session_id).await?;
        if counts.successful < counts.total {
            // Should not occur: the claim checks completeness. The safe
            // recovery is the client-resumable one.
            state
                .metadata
                .update_status(session.session_id, "uploading", now)
                .await?;
            report.resumed += 1;
            continue;
        }

        // The blob is complete; rehashing and revalidating are pure
        // functions of its contents.
        finalize::run_checks(state, &session).await?;
        report.refinalized += 1;
    }
    Ok(())
}

/// Sweep A': fully-uploaded sessions whose advisory finalize trigger was
/// lost to a crash. The finalize claim adjudicates any race with a live
/// trigger.
async fn sweep_completed_uploads(state: &AppState, report: &mut SweepReport) -> ApiResult<()> {
    for session in state.metadata.list_by_status("uploading").await? {
        let counts = state.metadata.count_chunks(session.session_id).await?;
        if counts.is_complete() {
            finalize::finalize(state, session.session_id.into()).await?;
            report.finalized += 1;
        }
    }
    Ok(())
}

/// Sweep B: uploading sessions older than the abandonment timeout. The blob
/// is deleted first; the status update is the commit point. A crash between
/// the two re-heals on the next pass: the session is still uploading and
/// still old, and delete is idempotent.
async fn sweep_abandoned_sessions(state: &AppState, report: &mut SweepReport) -> ApiResult<()> {
    let now = OffsetDateTime::now_utc();
    let cutoff = now - state.config.upload.abandonment_timeout();

    for session in state.metadata.list_older_than("uploading", cutoff).await? {
        tracing::info!(
            session_id = %session.session_id,
            created_at = %session.created_at,
            "Reaping abandoned upload session"
        );
        state.blobs.delete(Path::new(&session.blob_path)).await?;
        state
            .metadata
            .fail_session(session.session_id, "abandoned", now)
            .await?;
        report.reaped += 1;
    }
    Ok(())
}

/// Sweep blobs without a session row, left behind when session creation
/// failed after preallocation. Only blobs older than the abandonment
/// timeout are touched, so an in-flight initialize can never lose its file.
async fn sweep_orphaned_blobs(state: &AppState, report: &mut SweepReport) -> ApiResult<()> {
    let grace = std::time::Duration::from_secs(state.config.upload.abandonment_timeout_secs);
    let mut entries = match tokio::fs::read_dir(state.blobs.root()).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
        Err(e) => return Err(hangar_storage::StorageError::Io(e).into()),
    };

    while let Some(entry) = entries
        .next_entry()
        .await
        .map_err(hangar_storage::StorageError::Io)?
    {
        let path = entry.path();
        let Some(session_id) = blob_session_id(&path) else {
            continue;
        };

        if state.metadata.get_session(session_id).await?.is_some() {
            continue;
        }

        let Ok(metadata) = entry.metadata().await else {
            continue;
        };
        let old_enough = metadata
            .modified()
            .ok()
            .and_then(|m| m.elapsed().ok())
            .is_some_and(|age| age > grace);
        if !old_enough {
            continue;
        }

        tracing::info!(
            session_id = %SessionId::from(session_id),
            path = %path.display(),
            "Deleting orphaned blob"
        );
        state.blobs.delete(&path).await?;
        report.orphans_deleted += 1;
    }
    Ok(())
}

/// Extract the session id from a blob filename of the form `{uuid}.zip`.
fn blob_session_id(path: &Path) -> Option<Uuid> {
    let extension = path.extension()?.to_str()?;
    if !extension.eq_ignore_ascii_case(hangar_core::ARCHIVE_EXTENSION) {
        return None;
    }
    Uuid::parse_str(path.file_stem()?.to_str()?).ok()
}
