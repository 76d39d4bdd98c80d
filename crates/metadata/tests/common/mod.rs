// Shared fixtures for metadata store tests.

use hangar_metadata::{SessionRow, SqliteStore};
use tempfile::TempDir;
use time::OffsetDateTime;
use uuid::Uuid;

pub async fn store() -> (TempDir, SqliteStore) {
    let temp = TempDir::new().unwrap();
    let store = SqliteStore::new(temp.path().join("metadata.db"))
        .await
        .unwrap();
    (temp, store)
}

pub fn session_row(session_id: Uuid, total_size: i64, total_chunks: i64) -> SessionRow {
    let now = OffsetDateTime::now_utc();
    SessionRow {
        session_id,
        filename: "bundle.zip".to_string(),
        total_size,
        total_chunks,
        status: "uploading".to_string(),
        blob_path: format!("/tmp/uploads/{session_id}.zip"),
        final_hash: None,
        failure_reason: None,
        created_at: now,
        updated_at: now,
        completed_at: None,
    }
}
