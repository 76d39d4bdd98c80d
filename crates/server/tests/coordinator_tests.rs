// End-to-end coordinator scenarios: out-of-order assembly, resume,
// duplicate and finalize races, crash recovery, and abandonment.

use bytes::Bytes;
use hangar_core::config::{AppConfig, MetadataConfig};
use hangar_core::{ContentHash, SessionId};
use hangar_metadata::{ChunkRepo, SessionRepo, SessionRow};
use hangar_server::upload::{finalize, ingest, recovery, sessions};
use hangar_server::{ApiError, AppState, ApiResult};
use hangar_storage::BlobStore;
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use time::OffsetDateTime;
use zip::write::SimpleFileOptions;

/// The production chunk size from the protocol: 5 MiB.
const CHUNK_SIZE: u64 = 5_242_880;

async fn build_state(chunk_size: u64) -> (TempDir, AppState) {
    let temp = TempDir::new().unwrap();
    let mut config = AppConfig::default();
    config.upload.chunk_size = chunk_size;
    config.storage.upload_dir = temp.path().join("uploads");
    config.storage.temp_dir = temp.path().join("tmp");
    config.metadata = MetadataConfig::Sqlite {
        path: temp.path().join("metadata.db"),
    };

    let metadata = hangar_metadata::from_config(&config.metadata).await.unwrap();
    let blobs = Arc::new(BlobStore::new(&config.storage.upload_dir).await.unwrap());
    let state = AppState::new(config, metadata, blobs);
    (temp, state)
}

/// Build a ZIP archive with one stored (uncompressed) payload entry.
fn zip_with_payload(payload_len: usize) -> Vec<u8> {
    let mut cursor = std::io::Cursor::new(Vec::new());
    let mut writer = zip::ZipWriter::new(&mut cursor);
    let options =
        SimpleFileOptions::default().compression_method(zip::CompressionMethod::Stored);
    writer.start_file("payload.bin", options).unwrap();
    writer.write_all(&vec![0xA7u8; payload_len]).unwrap();
    writer.finish().unwrap();
    cursor.into_inner()
}

/// Build a valid ZIP archive of exactly `target` bytes. Stored compression
/// makes the container overhead constant, so sizing the payload is exact.
fn zip_of_exact_size(target: usize) -> Vec<u8> {
    let probe = zip_with_payload(1024);
    let overhead = probe.len() - 1024;
    let bytes = zip_with_payload(target - overhead);
    assert_eq!(bytes.len(), target);
    bytes
}

/// A minimal valid ZIP: the 22-byte end-of-central-directory record alone.
fn empty_zip() -> Vec<u8> {
    let mut cursor = std::io::Cursor::new(Vec::new());
    let writer = zip::ZipWriter::new(&mut cursor);
    writer.finish().unwrap();
    cursor.into_inner()
}

async fn send_chunk(
    state: &AppState,
    session_id: SessionId,
    index: u32,
    data: &[u8],
) -> ApiResult<ingest::ChunkOutcome> {
    send_chunk_with_hash(state, session_id, index, data, None).await
}

async fn send_chunk_with_hash(
    state: &AppState,
    session_id: SessionId,
    index: u32,
    data: &[u8],
    declared_hash: Option<ContentHash>,
) -> ApiResult<ingest::ChunkOutcome> {
    let frames: Vec<ApiResult<Bytes>> = data
        .chunks(64 * 1024)
        .map(|c| Ok(Bytes::copy_from_slice(c)))
        .collect();
    ingest::accept_chunk(
        state,
        session_id,
        index,
        declared_hash,
        futures::stream::iter(frames),
    )
    .await
}

async fn get_row(state: &AppState, session_id: SessionId) -> SessionRow {
    state
        .metadata
        .get_session(*session_id.as_uuid())
        .await
        .unwrap()
        .unwrap()
}

async fn wait_terminal(state: &AppState, session_id: SessionId) -> SessionRow {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
    loop {
        let row = get_row(state, session_id).await;
        if row.status == "completed" || row.status == "failed" {
            return row;
        }
        if tokio::time::Instant::now() > deadline {
            panic!("session {session_id} did not reach a terminal state");
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}

/// Write chunk bytes straight into the blob and mark them successful,
/// bypassing the ingestor and its finalize trigger. Simulates uploads whose
/// trigger was lost to a crash.
async fn plant_chunks(state: &AppState, session_id: SessionId, payload: &[u8]) {
    let row = get_row(state, session_id).await;
    let path = PathBuf::from(&row.blob_path);
    let chunk_size = state.config.upload.chunk_size as usize;

    for (index, piece) in payload.chunks(chunk_size).enumerate() {
        let stream = futures::stream::iter(vec![Ok::<_, hangar_storage::StorageError>(
            Bytes::copy_from_slice(piece),
        )]);
        state
            .blobs
            .write_at(&path, index as u64 * chunk_size as u64, stream)
            .await
            .unwrap();
        state
            .metadata
            .mark_chunk_success(*session_id.as_uuid(), index as u32, OffsetDateTime::now_utc())
            .await
            .unwrap();
    }
}

// ---------------------------------------------------------------------------
// Happy path and ordering
// ---------------------------------------------------------------------------

#[tokio::test]
async fn happy_path_two_chunks_out_of_order() {
    let (_temp, state) = build_state(CHUNK_SIZE).await;
    let payload = zip_of_exact_size(2 * CHUNK_SIZE as usize);

    let (session_id, uploaded) = sessions::initialize(&state, "bundle.zip", payload.len() as u64, 2)
        .await
        .unwrap();
    assert!(uploaded.is_empty());

    // Chunk 1 lands before chunk 0.
    let first = send_chunk(&state, session_id, 1, &payload[CHUNK_SIZE as usize..])
        .await
        .unwrap();
    assert!(!first.duplicate);
    assert_eq!(first.progress.completed, 1);

    let second = send_chunk(&state, session_id, 0, &payload[..CHUNK_SIZE as usize])
        .await
        .unwrap();
    assert_eq!(second.progress.completed, 2);

    let row = wait_terminal(&state, session_id).await;
    assert_eq!(row.status, "completed");
    assert_eq!(
        row.final_hash.as_deref(),
        Some(ContentHash::compute(&payload).to_hex().as_str())
    );
    assert!(row.completed_at.is_some());

    // Completed implies the blob matches the recorded size and hash.
    let blob = tokio::fs::read(&row.blob_path).await.unwrap();
    assert_eq!(blob.len(), payload.len());
    assert_eq!(blob, payload);
}

#[tokio::test]
async fn smallest_valid_archive_completes() {
    let (_temp, state) = build_state(CHUNK_SIZE).await;
    let payload = empty_zip();
    assert_eq!(payload.len(), 22);

    let (session_id, _) = sessions::initialize(&state, "tiny.zip", payload.len() as u64, 1)
        .await
        .unwrap();
    send_chunk(&state, session_id, 0, &payload).await.unwrap();

    let row = wait_terminal(&state, session_id).await;
    assert_eq!(row.status, "completed");
}

#[tokio::test]
async fn one_byte_upload_reaches_terminal_state() {
    let (_temp, state) = build_state(CHUNK_SIZE).await;

    let (session_id, _) = sessions::initialize(&state, "one.zip", 1, 1).await.unwrap();
    let outcome = send_chunk(&state, session_id, 0, b"x").await.unwrap();
    assert_eq!(outcome.progress.completed, 1);

    // A single byte assembles and verifies size and hash fine, but cannot
    // be a structurally valid archive.
    let row = wait_terminal(&state, session_id).await;
    assert_eq!(row.status, "failed");
    assert!(row.final_hash.is_none());
}

// ---------------------------------------------------------------------------
// Resume
// ---------------------------------------------------------------------------

#[tokio::test]
async fn resume_across_disconnect() {
    let (_temp, state) = build_state(CHUNK_SIZE).await;
    let payload = zip_of_exact_size(3 * CHUNK_SIZE as usize);

    let (session_id, _) = sessions::initialize(&state, "big.zip", payload.len() as u64, 3)
        .await
        .unwrap();

    send_chunk(&state, session_id, 0, &payload[..CHUNK_SIZE as usize])
        .await
        .unwrap();

    // The client vanishes. Its state is still resumable.
    let row = get_row(&state, session_id).await;
    assert_eq!(row.status, "uploading");
    let counts = state
        .metadata
        .count_chunks(*session_id.as_uuid())
        .await
        .unwrap();
    assert_eq!((counts.successful, counts.total), (1, 3));
    let indices = state
        .metadata
        .successful_indices(*session_id.as_uuid())
        .await
        .unwrap();
    assert_eq!(indices, vec![0]);

    // The client comes back and sends the rest.
    for index in 1..3u32 {
        let start = index as usize * CHUNK_SIZE as usize;
        send_chunk(
            &state,
            session_id,
            index,
            &payload[start..start + CHUNK_SIZE as usize],
        )
        .await
        .unwrap();
    }

    let row = wait_terminal(&state, session_id).await;
    assert_eq!(row.status, "completed");
}

// ---------------------------------------------------------------------------
// Idempotence and races
// ---------------------------------------------------------------------------

#[tokio::test]
async fn duplicate_chunk_is_reported_and_harmless() {
    let (_temp, state) = build_state(CHUNK_SIZE).await;
    let payload = zip_of_exact_size(CHUNK_SIZE as usize);

    let (session_id, _) = sessions::initialize(&state, "dup.zip", payload.len() as u64, 1)
        .await
        .unwrap();

    let first = send_chunk(&state, session_id, 0, &payload).await.unwrap();
    assert!(!first.duplicate);

    let second = send_chunk(&state, session_id, 0, &payload).await.unwrap();
    assert!(second.duplicate);
    assert_eq!(second.progress.completed, 1);

    let row = wait_terminal(&state, session_id).await;
    assert_eq!(row.status, "completed");
}

#[tokio::test]
async fn concurrent_same_chunk_single_success_row() {
    let (_temp, state) = build_state(CHUNK_SIZE).await;
    let payload = Arc::new(zip_of_exact_size(CHUNK_SIZE as usize));

    let (session_id, _) = sessions::initialize(&state, "race.zip", payload.len() as u64, 1)
        .await
        .unwrap();

    let mut handles = Vec::new();
    for _ in 0..2 {
        let state = state.clone();
        let payload = payload.clone();
        handles.push(tokio::spawn(async move {
            send_chunk(&state, session_id, 0, &payload).await.unwrap()
        }));
    }

    let mut duplicates = 0;
    for handle in handles {
        if handle.await.unwrap().duplicate {
            duplicates += 1;
        }
    }
    assert_eq!(duplicates, 1);

    let counts = state
        .metadata
        .count_chunks(*session_id.as_uuid())
        .await
        .unwrap();
    assert_eq!(counts.successful, 1);

    let row = wait_terminal(&state, session_id).await;
    assert_eq!(row.status, "completed");
}

#[tokio::test]
async fn double_finalize_yields_one_outcome() {
    let (_temp, state) = build_state(CHUNK_SIZE).await;
    let payload = zip_of_exact_size(CHUNK_SIZE as usize);

    let (session_id, _) = sessions::initialize(&state, "ff.zip", payload.len() as u64, 1)
        .await
        .unwrap();
    plant_chunks(&state, session_id, &payload).await;

    let (a, b) = tokio::join!(
        finalize::finalize(&state, session_id),
        finalize::finalize(&state, session_id)
    );
    a.unwrap();
    b.unwrap();

    let row = wait_terminal(&state, session_id).await;
    assert_eq!(row.status, "completed");
    assert!(row.final_hash.is_some());
}

// ---------------------------------------------------------------------------
// Chunk validation boundaries
// ---------------------------------------------------------------------------

#[tokio::test]
async fn chunk_length_boundaries_enforced() {
    let (_temp, state) = build_state(CHUNK_SIZE).await;
    // Two chunks; the final one is a single byte.
    let total = CHUNK_SIZE + 1;

    let (session_id, _) = sessions::initialize(&state, "bounds.zip", total, 2).await.unwrap();

    // Non-final chunk shorter than the chunk size is rejected.
    match send_chunk(&state, session_id, 0, b"short").await {
        Err(ApiError::BadRequest(_)) => {}
        other => panic!("unexpected result: {other:?}"),
    }

    // Final chunk longer than its expected length is rejected.
    match send_chunk(&state, session_id, 1, b"xx").await {
        Err(ApiError::BadRequest(_)) => {}
        other => panic!("unexpected result: {other:?}"),
    }

    // Rejected chunks leave no mark.
    let counts = state
        .metadata
        .count_chunks(*session_id.as_uuid())
        .await
        .unwrap();
    assert_eq!(counts.successful, 0);

    // The final chunk at its exact expected length is accepted.
    let outcome = send_chunk(&state, session_id, 1, b"z").await.unwrap();
    assert!(!outcome.duplicate);
}

#[tokio::test]
async fn chunk_index_and_session_gates() {
    let (_temp, state) = build_state(CHUNK_SIZE).await;
    let (session_id, _) = sessions::initialize(&state, "gates.zip", CHUNK_SIZE, 1)
        .await
        .unwrap();

    match send_chunk(&state, session_id, 5, b"x").await {
        Err(ApiError::BadRequest(_)) => {}
        other => panic!("unexpected result: {other:?}"),
    }

    match send_chunk(&state, SessionId::new(), 0, b"x").await {
        Err(ApiError::NotFound(_)) => {}
        other => panic!("unexpected result: {other:?}"),
    }
}

#[tokio::test]
async fn chunk_rejected_while_processing() {
    let (_temp, state) = build_state(CHUNK_SIZE).await;
    let payload = zip_of_exact_size(CHUNK_SIZE as usize);

    let (session_id, _) = sessions::initialize(&state, "busy.zip", payload.len() as u64, 1)
        .await
        .unwrap();
    plant_chunks(&state, session_id, &payload).await;

    // Claim the session so it sits in 'processing'.
    let claim = state
        .metadata
        .begin_finalize(*session_id.as_uuid(), OffsetDateTime::now_utc())
        .await
        .unwrap()
        .unwrap();
    assert!(claim.claimed);

    match send_chunk(&state, session_id, 0, &payload).await {
        Err(ApiError::Conflict(_)) => {}
        other => panic!("unexpected result: {other:?}"),
    }
}

#[tokio::test]
async fn declared_chunk_hash_verified_before_mark() {
    let (_temp, state) = build_state(CHUNK_SIZE).await;
    let payload = zip_of_exact_size(CHUNK_SIZE as usize);

    let (session_id, _) = sessions::initialize(&state, "sums.zip", payload.len() as u64, 1)
        .await
        .unwrap();

    let wrong = ContentHash::compute(b"not the payload");
    match send_chunk_with_hash(&state, session_id, 0, &payload, Some(wrong)).await {
        Err(ApiError::IntegrityFailed { .. }) => {}
        other => panic!("unexpected result: {other:?}"),
    }

    // The mismatch left the chunk pending; the retry with the right hash wins.
    let counts = state
        .metadata
        .count_chunks(*session_id.as_uuid())
        .await
        .unwrap();
    assert_eq!(counts.successful, 0);

    let right = ContentHash::compute(&payload);
    send_chunk_with_hash(&state, session_id, 0, &payload, Some(right))
        .await
        .unwrap();

    let row = wait_terminal(&state, session_id).await;
    assert_eq!(row.status, "completed");
}

// ---------------------------------------------------------------------------
// Session initialization
// ---------------------------------------------------------------------------

#[tokio::test]
async fn initialize_validates_inputs() {
    let (_temp, state) = build_state(CHUNK_SIZE).await;

    for (filename, total_size, total_chunks) in [
        ("bundle.zip", 0, 1),          // empty blob
        ("bundle.zip", 100, 0),        // no chunks
        ("bundle.tar.gz", 100, 1),     // wrong extension
        ("bundle.zip", CHUNK_SIZE, 2), // chunk count mismatch
    ] {
        match sessions::initialize(&state, filename, total_size, total_chunks).await {
            Err(ApiError::BadRequest(_)) => {}
            other => panic!("expected BadRequest for {filename}, got {other:?}"),
        }
    }
}

#[tokio::test]
async fn initialize_preallocates_full_size_blob() {
    let (_temp, state) = build_state(CHUNK_SIZE).await;
    let (session_id, _) = sessions::initialize(&state, "pre.zip", 3 * CHUNK_SIZE, 3)
        .await
        .unwrap();

    let row = get_row(&state, session_id).await;
    let size = tokio::fs::metadata(&row.blob_path).await.unwrap().len();
    assert_eq!(size, 3 * CHUNK_SIZE);
}

// ---------------------------------------------------------------------------
// Verification failure
// ---------------------------------------------------------------------------

#[tokio::test]
async fn invalid_archive_fails_without_hash() {
    let (_temp, state) = build_state(CHUNK_SIZE).await;
    let payload = vec![0x42u8; CHUNK_SIZE as usize];

    let (session_id, _) = sessions::initialize(&state, "junk.zip", payload.len() as u64, 1)
        .await
        .unwrap();
    send_chunk(&state, session_id, 0, &payload).await.unwrap();

    let row = wait_terminal(&state, session_id).await;
    assert_eq!(row.status, "failed");
    assert!(row.final_hash.is_none());
    assert!(
        row.failure_reason
            .as_deref()
            .is_some_and(|r| r.contains("archive"))
    );

    // A failed session keeps no blob.
    assert!(
        !state
            .blobs
            .exists(std::path::Path::new(&row.blob_path))
            .await
            .unwrap()
    );
}

// ---------------------------------------------------------------------------
// Recovery sweeps
// ---------------------------------------------------------------------------

#[tokio::test]
async fn recovery_completes_session_stuck_in_processing() {
    let (_temp, state) = build_state(CHUNK_SIZE).await;
    let payload = zip_of_exact_size(2 * CHUNK_SIZE as usize);

    let (session_id, _) = sessions::initialize(&state, "crash.zip", payload.len() as u64, 2)
        .await
        .unwrap();
    plant_chunks(&state, session_id, &payload).await;

    // Claim succeeded, then the process died before any check ran.
    let claim = state
        .metadata
        .begin_finalize(*session_id.as_uuid(), OffsetDateTime::now_utc())
        .await
        .unwrap()
        .unwrap();
    assert!(claim.claimed);

    // Restart: the sweep finds the processing session and re-runs the checks.
    let report = recovery::run_sweeps(&state).await.unwrap();
    assert_eq!(report.refinalized, 1);

    let row = get_row(&state, session_id).await;
    assert_eq!(row.status, "completed");
    assert_eq!(
        row.final_hash.as_deref(),
        Some(ContentHash::compute(&payload).to_hex().as_str())
    );
}

#[tokio::test]
async fn recovery_fails_processing_session_with_missing_blob() {
    let (_temp, state) = build_state(CHUNK_SIZE).await;

    let now = OffsetDateTime::now_utc();
    let session_id = SessionId::new();
    let row = SessionRow {
        session_id: *session_id.as_uuid(),
        filename: "gone.zip".to_string(),
        total_size: 10,
        total_chunks: 1,
        status: "processing".to_string(),
        blob_path: state
            .blobs
            .blob_path(&session_id)
            .display()
            .to_string(),
        final_hash: None,
        failure_reason: None,
        created_at: now,
        updated_at: now,
        completed_at: None,
    };
    state.metadata.create_session(&row, 1).await.unwrap();

    let report = recovery::run_sweeps(&state).await.unwrap();
    assert_eq!(report.failed_missing_blob, 1);
    assert_eq!(get_row(&state, session_id).await.status, "failed");
}

#[tokio::test]
async fn recovery_resumes_processing_session_with_pending_chunks() {
    let (_temp, state) = build_state(CHUNK_SIZE).await;

    let now = OffsetDateTime::now_utc();
    let session_id = SessionId::new();
    let blob_path = state.blobs.blob_path(&session_id);
    state.blobs.preallocate(&blob_path, 10).await.unwrap();

    let row = SessionRow {
        session_id: *session_id.as_uuid(),
        filename: "stuck.zip".to_string(),
        total_size: 10,
        total_chunks: 2,
        status: "processing".to_string(),
        blob_path: blob_path.display().to_string(),
        final_hash: None,
        failure_reason: None,
        created_at: now,
        updated_at: now,
        completed_at: None,
    };
    state.metadata.create_session(&row, 2).await.unwrap();

    let report = recovery::run_sweeps(&state).await.unwrap();
    assert_eq!(report.resumed, 1);
    assert_eq!(get_row(&state, session_id).await.status, "uploading");
}

#[tokio::test]
async fn recovery_finalizes_fully_uploaded_session() {
    let (_temp, state) = build_state(CHUNK_SIZE).await;
    let payload = zip_of_exact_size(CHUNK_SIZE as usize);

    let (session_id, _) = sessions::initialize(&state, "lost.zip", payload.len() as u64, 1)
        .await
        .unwrap();
    // All chunks landed but the advisory trigger never fired.
    plant_chunks(&state, session_id, &payload).await;

    let report = recovery::run_sweeps(&state).await.unwrap();
    assert_eq!(report.finalized, 1);
    assert_eq!(get_row(&state, session_id).await.status, "completed");
}

#[tokio::test]
async fn abandonment_sweep_reaps_stale_sessions() {
    let (_temp, state) = build_state(CHUNK_SIZE).await;

    let session_id = SessionId::new();
    let blob_path = state.blobs.blob_path(&session_id);
    state.blobs.preallocate(&blob_path, 100).await.unwrap();

    let now = OffsetDateTime::now_utc();
    let row = SessionRow {
        session_id: *session_id.as_uuid(),
        filename: "stale.zip".to_string(),
        total_size: 100,
        total_chunks: 1,
        status: "uploading".to_string(),
        blob_path: blob_path.display().to_string(),
        final_hash: None,
        failure_reason: None,
        created_at: now - time::Duration::hours(25),
        updated_at: now - time::Duration::hours(25),
        completed_at: None,
    };
    state.metadata.create_session(&row, 1).await.unwrap();

    let report = recovery::run_sweeps(&state).await.unwrap();
    assert_eq!(report.reaped, 1);

    let after = get_row(&state, session_id).await;
    assert_eq!(after.status, "failed");
    assert_eq!(after.failure_reason.as_deref(), Some("abandoned"));
    assert!(!state.blobs.exists(&blob_path).await.unwrap());
}

#[tokio::test]
async fn recovery_sweeps_are_idempotent() {
    let (_temp, state) = build_state(CHUNK_SIZE).await;

    // One abandoned session and one fully-uploaded session.
    let stale_id = SessionId::new();
    let stale_blob = state.blobs.blob_path(&stale_id);
    state.blobs.preallocate(&stale_blob, 100).await.unwrap();
    let now = OffsetDateTime::now_utc();
    let row = SessionRow {
        session_id: *stale_id.as_uuid(),
        filename: "stale.zip".to_string(),
        total_size: 100,
        total_chunks: 1,
        status: "uploading".to_string(),
        blob_path: stale_blob.display().to_string(),
        final_hash: None,
        failure_reason: None,
        created_at: now - time::Duration::hours(48),
        updated_at: now - time::Duration::hours(48),
        completed_at: None,
    };
    state.metadata.create_session(&row, 1).await.unwrap();

    let payload = zip_of_exact_size(CHUNK_SIZE as usize);
    let (done_id, _) = sessions::initialize(&state, "done.zip", payload.len() as u64, 1)
        .await
        .unwrap();
    plant_chunks(&state, done_id, &payload).await;

    let first = recovery::run_sweeps(&state).await.unwrap();
    assert_eq!(first.reaped, 1);
    assert_eq!(first.finalized, 1);

    let stale_after_first = get_row(&state, stale_id).await;
    let done_after_first = get_row(&state, done_id).await;

    // A second pass finds nothing to do and changes nothing.
    let second = recovery::run_sweeps(&state).await.unwrap();
    assert_eq!(second, recovery::SweepReport::default());
    assert_eq!(get_row(&state, stale_id).await.status, stale_after_first.status);
    assert_eq!(
        get_row(&state, done_id).await.final_hash,
        done_after_first.final_hash
    );
}

#[tokio::test]
async fn orphaned_blob_sweep_respects_grace_period() {
    let (_temp, state) = build_state(CHUNK_SIZE).await;

    // A blob with no session row, as left by a crash between preallocation
    // and the session insert.
    let orphan_id = SessionId::new();
    let orphan_path = state.blobs.blob_path(&orphan_id);
    state.blobs.preallocate(&orphan_path, 50).await.unwrap();

    // Fresh orphans are inside the grace period and must survive.
    let report = recovery::run_sweeps(&state).await.unwrap();
    assert_eq!(report.orphans_deleted, 0);
    assert!(state.blobs.exists(&orphan_path).await.unwrap());
}
