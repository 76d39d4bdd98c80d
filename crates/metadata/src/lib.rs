//! Transactional metadata store for upload sessions and their chunks.
//!
//! Two tables back the upload coordinator: one session row per upload
//! attempt, and one chunk row per (session, index) pair, pre-materialized at
//! session creation. The store provides the idempotent transitions the
//! coordinator relies on: the pending-to-success chunk mark and the
//! uploading-to-processing finalize claim.

pub mod error;
pub mod models;
pub mod repos;
pub mod store;

pub use error::{MetadataError, MetadataResult};
pub use models::{ChunkCounts, ChunkRow, FinalizeClaim, SessionRow};
pub use repos::{ChunkRepo, SessionRepo};
pub use store::{MetadataStore, SqliteStore};

use hangar_core::config::MetadataConfig;
use std::sync::Arc;

/// Open the store described by the configuration.
pub async fn from_config(config: &MetadataConfig) -> MetadataResult<Arc<dyn MetadataStore>> {
    match config {
        MetadataConfig::Sqlite { path } => {
            let store = SqliteStore::new(path).await?;
            Ok(Arc::new(store))
        }
    }
}
