//! Shared state threaded through the router.

use hangar_core::config::AppConfig;
use hangar_metadata::MetadataStore;
use hangar_storage::BlobStore;
use std::sync::Arc;

/// State handed to every handler and coordinator service.
#[derive(Clone)]
pub struct AppState {
    /// Resolved configuration.
    pub config: Arc<AppConfig>,
    /// Session and chunk records.
    pub metadata: Arc<dyn MetadataStore>,
    /// Blob files.
    pub blobs: Arc<BlobStore>,
}

impl AppState {
    /// Bundle the stores and configuration.
    pub fn new(
        config: AppConfig,
        metadata: Arc<dyn MetadataStore>,
        blobs: Arc<BlobStore>,
    ) -> Self {
        Self {
            config: Arc::new(config),
            metadata,
            blobs,
        }
    }
}
