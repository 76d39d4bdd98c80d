//! Upload protocol handlers.

use crate::error::{ApiError, ApiResult};
use crate::state::AppState;
use crate::upload::{ingest, sessions};
use axum::Json;
use axum::extract::{Multipart, Path, State};
use hangar_core::protocol::{
    ChunkResponse, ContentsEntry, ContentsResponse, InitRequest, InitResponse, Progress,
    SessionView, StatusResponse,
};
use hangar_core::{ContentHash, SessionId, SessionStatus};
use hangar_metadata::{ChunkRepo, SessionRepo};

/// POST /upload/init - create a new upload session.
#[tracing::instrument(skip(state, req), fields(filename = %req.filename))]
pub async fn init_upload(
    State(state): State<AppState>,
    Json(req): Json<InitRequest>,
) -> ApiResult<Json<InitResponse>> {
    let (session_id, uploaded_chunks) =
        sessions::initialize(&state, &req.filename, req.total_size, req.total_chunks).await?;

    Ok(Json(InitResponse {
        session_id: session_id.to_string(),
        uploaded_chunks,
    }))
}

/// POST /upload/chunk - ingest one chunk.
///
/// Multipart fields: `session_id`, `chunk_index`, optional `chunk_hash`
/// (SHA-256 hex of the chunk payload), then `chunk` (binary). The metadata
/// fields must precede `chunk` so the payload can be streamed to its offset
/// without buffering.
#[tracing::instrument(skip(state, multipart))]
pub async fn upload_chunk(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> ApiResult<Json<ChunkResponse>> {
    let mut session_id: Option<SessionId> = None;
    let mut chunk_index: Option<u32> = None;
    let mut declared_hash: Option<ContentHash> = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::BadRequest(format!("invalid multipart body: {e}")))?
    {
        match field.name() {
            Some("session_id") => {
                let text = read_text(field).await?;
                session_id = Some(SessionId::parse(&text)?);
            }
            Some("chunk_index") => {
                let text = read_text(field).await?;
                chunk_index = Some(text.parse().map_err(|e| {
                    ApiError::BadRequest(format!("invalid chunk_index {text:?}: {e}"))
                })?);
            }
            Some("chunk_hash") => {
                let text = read_text(field).await?;
                declared_hash = Some(ContentHash::from_hex(&text)?);
            }
            Some("chunk") => {
                let session_id = session_id.ok_or_else(|| {
                    ApiError::BadRequest("session_id field must precede chunk".to_string())
                })?;
                let chunk_index = chunk_index.ok_or_else(|| {
                    ApiError::BadRequest("chunk_index field must precede chunk".to_string())
                })?;

                let payload = async_stream::try_stream! {
                    let mut field = field;
                    while let Some(frame) = field.chunk().await.map_err(|e| {
                        ApiError::BadRequest(format!("failed to read chunk payload: {e}"))
                    })? {
                        yield frame;
                    }
                };

                let outcome =
                    ingest::accept_chunk(&state, session_id, chunk_index, declared_hash, payload)
                        .await?;

                return Ok(Json(ChunkResponse {
                    chunk_index: outcome.chunk_index,
                    duplicate: outcome.duplicate,
                    progress: outcome.progress,
                }));
            }
            _ => {
                // Unknown fields are ignored for forward compatibility.
            }
        }
    }

    Err(ApiError::BadRequest(
        "multipart body is missing the chunk field".to_string(),
    ))
}

async fn read_text(field: axum::extract::multipart::Field<'_>) -> ApiResult<String> {
    field
        .text()
        .await
        .map_err(|e| ApiError::BadRequest(format!("invalid multipart field: {e}")))
}

/// GET /upload/{session_id}/status - session snapshot with progress.
#[tracing::instrument(skip(state))]
pub async fn get_status(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> ApiResult<Json<StatusResponse>> {
    let session_id = SessionId::parse(&session_id)?;
    let row = state
        .metadata
        .get_session(*session_id.as_uuid())
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("upload session {session_id} not found")))?;

    let counts = state.metadata.count_chunks(*session_id.as_uuid()).await?;
    let session = row.to_session()?;

    Ok(Json(StatusResponse {
        session: SessionView::from_session(&session),
        progress: Progress {
            completed: counts.successful,
            total: counts.total,
        },
    }))
}

/// GET /upload/{session_id}/contents - list the archive's entries.
#[tracing::instrument(skip(state))]
pub async fn get_contents(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> ApiResult<Json<ContentsResponse>> {
    let session_id = SessionId::parse(&session_id)?;
    let row = state
        .metadata
        .get_session(*session_id.as_uuid())
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("upload session {session_id} not found")))?;

    let status = SessionStatus::parse(&row.status)?;
    if status != SessionStatus::Completed {
        return Err(ApiError::BadRequest(format!(
            "upload session is {status}, not completed"
        )));
    }

    let entries = hangar_archive::list_entries(std::path::Path::new(&row.blob_path)).await?;
    let entries = entries
        .into_iter()
        .map(|e| ContentsEntry {
            name: e.name,
            size: e.size,
            compressed: e.compressed,
            is_directory: e.is_directory,
            modified: e.modified.and_then(|m| {
                m.format(&time::format_description::well_known::Rfc3339).ok()
            }),
        })
        .collect();

    Ok(Json(ContentsResponse { entries }))
}
