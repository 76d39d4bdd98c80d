//! The store trait and its SQLite backing.

use crate::error::{MetadataError, MetadataResult};
use crate::repos::{ChunkRepo, SessionRepo};
use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Pool, Sqlite};
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

/// Everything the coordinator needs from the metadata layer: both
/// repositories plus lifecycle hooks.
#[async_trait]
pub trait MetadataStore: SessionRepo + ChunkRepo + Send + Sync {
    /// Apply the schema.
    async fn migrate(&self) -> MetadataResult<()>;

    /// Verify the database answers queries.
    async fn health_check(&self) -> MetadataResult<()>;
}

/// Metadata store backed by a single SQLite file.
pub struct SqliteStore {
    pool: Pool<Sqlite>,
}

impl SqliteStore {
    /// Create a new SQLite store, running migrations.
    pub async fn new(path: impl AsRef<Path>) -> MetadataResult<Self> {
        let path = path.as_ref();

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let opts = SqliteConnectOptions::from_str(&format!("sqlite:{}?mode=rwc", path.display()))?
            .create_if_missing(true)
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
            .synchronous(sqlx::sqlite::SqliteSynchronous::Normal)
            .foreign_keys(true)
            .busy_timeout(Duration::from_secs(5));

        // Every statement flows through one connection, so transactions queue
        // behind each other instead of fighting over SQLite's single writer.
        // The chunk-mark and finalize-claim transactions rely on that ordering.
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(opts)
            .await?;

        let store = Self { pool };
        store.migrate().await?;

        Ok(store)
    }

    /// The underlying connection pool.
    pub fn pool(&self) -> &Pool<Sqlite> {
        &self.pool
    }
}

#[async_trait]
impl MetadataStore for SqliteStore {
    async fn migrate(&self) -> MetadataResult<()> {
        sqlx::query(SCHEMA_SQL).execute(&self.pool).await?;
        Ok(())
    }

    async fn health_check(&self) -> MetadataResult<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}

mod sqlite_impl {
    use super::*;
    use crate::models::{ChunkCounts, ChunkRow, FinalizeClaim, SessionRow};
    use time::OffsetDateTime;
    use uuid::Uuid;

    #[async_trait]
    impl SessionRepo for SqliteStore {
        async fn create_session(
            &self,
            session: &SessionRow,
            total_chunks: u32,
        ) -> MetadataResult<()> {
            if total_chunks as i64 != session.total_chunks {
                return Err(MetadataError::Constraint(format!(
                    "chunk row count {} does not match session total_chunks {}",
                    total_chunks, session.total_chunks
                )));
            }

            // Session row and all chunk rows land in one transaction:
            // invariant is exactly total_chunks rows from creation to deletion.
            let mut tx = self.pool.begin().await?;

            sqlx::query(
                r#"
                INSERT INTO upload_sessions (
                    session_id, filename, total_size, total_chunks, status,
                    blob_path, final_hash, failure_reason,
                    created_at, updated_at, completed_at
                ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(session.session_id)
            .bind(&session.filename)
            .bind(session.total_size)
            .bind(session.total_chunks)
            .bind(&session.status)
            .bind(&session.blob_path)
            .bind(&session.final_hash)
            .bind(&session.failure_reason)
            .bind(session.created_at)
            .bind(session.updated_at)
            .bind(session.completed_at)
            .execute(&mut *tx)
            .await
            .map_err(|e| match &e {
                sqlx::Error::Database(db) if db.message().contains("UNIQUE constraint") => {
                    MetadataError::AlreadyExists(format!(
                        "session {} already exists",
                        session.session_id
                    ))
                }
                _ => e.into(),
            })?;

            for index in 0..total_chunks {
                sqlx::query(
                    "INSERT INTO upload_chunks (session_id, chunk_index, status, received_at)
                     VALUES (?, ?, 'pending', NULL)",
                )
                .bind(session.session_id)
                .bind(index as i64)
                .execute(&mut *tx)
                .await?;
            }

            tx.commit().await?;
            Ok(())
        }

        async fn get_session(&self, session_id: Uuid) -> MetadataResult<Option<SessionRow>> {
            let row = sqlx::query_as::<_, SessionRow>(
                "SELECT * FROM upload_sessions WHERE session_id = ?",
            )
            .bind(session_id)
            .fetch_optional(&self.pool)
            .await?;
            Ok(row)
        }

        async fn begin_finalize(
            &self,
            session_id: Uuid,
            updated_at: OffsetDateTime,
        ) -> MetadataResult<Option<FinalizeClaim>> {
            // Claimants serialize on the store's single connection, so at most
            // one of them finds the row in 'uploading' with its guard UPDATE
            // landing; everyone else reports an unclaimed session.
            let mut tx = self.pool.begin().await?;

            let mut session = sqlx::query_as::<_, SessionRow>(
                "SELECT * FROM upload_sessions WHERE session_id = ?",
            )
            .bind(session_id)
            .fetch_optional(&mut *tx)
            .await?;

            let mut claimed = false;
            if let Some(ref mut s) = session
                && s.status == "uploading"
            {
                // A session may only enter 'processing' once every chunk is
                // in 'success'; the count is read inside the same transaction.
                let unfinished: i64 = sqlx::query_scalar(
                    "SELECT COUNT(*) FROM upload_chunks
                     WHERE session_id = ? AND status != 'success'",
                )
                .bind(session_id)
                .fetch_one(&mut *tx)
                .await?;

                if unfinished == 0 {
                    let result = sqlx::query(
                        "UPDATE upload_sessions SET status = 'processing', updated_at = ?
                         WHERE session_id = ? AND status = 'uploading'",
                    )
                    .bind(updated_at)
                    .bind(session_id)
                    .execute(&mut *tx)
                    .await?;

                    if result.rows_affected() > 0 {
                        s.status = "processing".to_string();
                        s.updated_at = updated_at;
                        claimed = true;
                        tracing::debug!(
                            session_id = %session_id,
                            "Claimed session for finalization"
                        );
                    }
                }
            }

            tx.commit().await?;
            Ok(session.map(|session| FinalizeClaim { session, claimed }))
        }

        async fn update_status(
            &self,
            session_id: Uuid,
            status: &str,
            updated_at: OffsetDateTime,
        ) -> MetadataResult<()> {
            // Terminal states never transition again.
            sqlx::query(
                "UPDATE upload_sessions SET status = ?, updated_at = ?
                 WHERE session_id = ? AND status NOT IN ('completed', 'failed')",
            )
            .bind(status)
            .bind(updated_at)
            .bind(session_id)
            .execute(&self.pool)
            .await?;
            Ok(())
        }

        async fn complete_session(
            &self,
            session_id: Uuid,
            final_hash: &str,
            completed_at: OffsetDateTime,
        ) -> MetadataResult<()> {
            let result = sqlx::query(
                "UPDATE upload_sessions
                 SET status = 'completed', final_hash = ?, completed_at = ?, updated_at = ?
                 WHERE session_id = ? AND status = 'processing'",
            )
            .bind(final_hash)
            .bind(completed_at)
            .bind(completed_at)
            .bind(session_id)
            .execute(&self.pool)
            .await?;

            if result.rows_affected() == 0 {
                return Err(MetadataError::Constraint(format!(
                    "session {} is not in 'processing'",
                    session_id
                )));
            }
            Ok(())
        }

        async fn fail_session(
            &self,
            session_id: Uuid,
            reason: &str,
            failed_at: OffsetDateTime,
        ) -> MetadataResult<()> {
            sqlx::query(
                "UPDATE upload_sessions
                 SET status = 'failed', failure_reason = ?, updated_at = ?
                 WHERE session_id = ? AND status NOT IN ('completed', 'failed')",
            )
            .bind(reason)
            .bind(failed_at)
            .bind(session_id)
            .execute(&self.pool)
            .await?;
            Ok(())
        }

        async fn list_by_status(&self, status: &str) -> MetadataResult<Vec<SessionRow>> {
            let rows = sqlx::query_as::<_, SessionRow>(
                "SELECT * FROM upload_sessions WHERE status = ? ORDER BY created_at",
            )
            .bind(status)
            .fetch_all(&self.pool)
            .await?;
            Ok(rows)
        }

        async fn list_older_than(
            &self,
            status: &str,
            cutoff: OffsetDateTime,
        ) -> MetadataResult<Vec<SessionRow>> {
            let rows = sqlx::query_as::<_, SessionRow>(
                "SELECT * FROM upload_sessions
                 WHERE status = ? AND created_at < ? ORDER BY created_at",
            )
            .bind(status)
            .bind(cutoff)
            .fetch_all(&self.pool)
            .await?;
            Ok(rows)
        }

        async fn delete_session(&self, session_id: Uuid) -> MetadataResult<()> {
            // The chunk FK carries ON DELETE CASCADE; the explicit delete keeps
            // the rows gone even on databases restored without foreign_keys on.
            let mut tx = self.pool.begin().await?;

            sqlx::query("DELETE FROM upload_chunks WHERE session_id = ?")
                .bind(session_id)
                .execute(&mut *tx)
                .await?;

            sqlx::query("DELETE FROM upload_sessions WHERE session_id = ?")
                .bind(session_id)
                .execute(&mut *tx)
                .await?;

            tx.commit().await?;
            Ok(())
        }
    }

    #[async_trait]
    impl ChunkRepo for SqliteStore {
        async fn get_chunk(
            &self,
            session_id: Uuid,
            chunk_index: u32,
        ) -> MetadataResult<Option<ChunkRow>> {
            let row = sqlx::query_as::<_, ChunkRow>(
                "SELECT * FROM upload_chunks WHERE session_id = ? AND chunk_index = ?",
            )
            .bind(session_id)
            .bind(chunk_index as i64)
            .fetch_optional(&self.pool)
            .await?;
            Ok(row)
        }

        async fn mark_chunk_success(
            &self,
            session_id: Uuid,
            chunk_index: u32,
            received_at: OffsetDateTime,
        ) -> MetadataResult<bool> {
            let mut tx = self.pool.begin().await?;

            let result = sqlx::query(
                "UPDATE upload_chunks SET status = 'success', received_at = ?
                 WHERE session_id = ? AND chunk_index = ? AND status = 'pending'",
            )
            .bind(received_at)
            .bind(session_id)
            .bind(chunk_index as i64)
            .execute(&mut *tx)
            .await?;

            if result.rows_affected() > 0 {
                sqlx::query("UPDATE upload_sessions SET updated_at = ? WHERE session_id = ?")
                    .bind(received_at)
                    .bind(session_id)
                    .execute(&mut *tx)
                    .await?;
                tx.commit().await?;
                return Ok(true);
            }

            // No transition happened: either the chunk is already 'success'
            // (duplicate delivery) or the row doesn't exist at all.
            let exists: bool = sqlx::query_scalar(
                "SELECT EXISTS(SELECT 1 FROM upload_chunks WHERE session_id = ? AND chunk_index = ?)",
            )
            .bind(session_id)
            .bind(chunk_index as i64)
            .fetch_one(&mut *tx)
            .await?;
            tx.commit().await?;

            if !exists {
                return Err(MetadataError::NotFound(format!(
                    "chunk {} of session {}",
                    chunk_index, session_id
                )));
            }
            Ok(false)
        }

        async fn count_chunks(&self, session_id: Uuid) -> MetadataResult<ChunkCounts> {
            let (total, successful): (i64, i64) = sqlx::query_as(
                "SELECT COUNT(*), COALESCE(SUM(status = 'success'), 0)
                 FROM upload_chunks WHERE session_id = ?",
            )
            .bind(session_id)
            .fetch_one(&self.pool)
            .await?;

            Ok(ChunkCounts {
                total: total as u64,
                successful: successful as u64,
            })
        }

        async fn successful_indices(&self, session_id: Uuid) -> MetadataResult<Vec<u32>> {
            let rows: Vec<(i64,)> = sqlx::query_as(
                "SELECT chunk_index FROM upload_chunks
                 WHERE session_id = ? AND status = 'success' ORDER BY chunk_index",
            )
            .bind(session_id)
            .fetch_all(&self.pool)
            .await?;
            Ok(rows.into_iter().map(|(i,)| i as u32).collect())
        }
    }
}

const SCHEMA_SQL: &str = r#"
-- Upload sessions
CREATE TABLE IF NOT EXISTS upload_sessions (
    session_id BLOB PRIMARY KEY,
    filename TEXT NOT NULL,
    total_size INTEGER NOT NULL,
    total_chunks INTEGER NOT NULL,
    status TEXT NOT NULL DEFAULT 'uploading',
    blob_path TEXT NOT NULL,
    final_hash TEXT,
    failure_reason TEXT,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    completed_at TEXT
);
CREATE INDEX IF NOT EXISTS idx_upload_sessions_status ON upload_sessions(status, created_at);

-- Upload chunks, pre-materialized at session creation
CREATE TABLE IF NOT EXISTS upload_chunks (
    session_id BLOB NOT NULL,
    chunk_index INTEGER NOT NULL,
    status TEXT NOT NULL DEFAULT 'pending',
    received_at TEXT,
    PRIMARY KEY (session_id, chunk_index),
    FOREIGN KEY (session_id) REFERENCES upload_sessions(session_id) ON DELETE CASCADE
);
CREATE INDEX IF NOT EXISTS idx_upload_chunks_status ON upload_chunks(session_id, status);
"#;
