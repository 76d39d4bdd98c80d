//! Operator-facing configuration, deserialized from file and environment.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use time::Duration;

/// HTTP listener settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Socket address to listen on.
    #[serde(default = "default_bind")]
    pub bind: String,
    /// Maximum accepted multipart body size for a chunk request, in bytes.
    /// Must leave headroom above the chunk size for multipart framing.
    #[serde(default = "default_max_chunk_body_bytes")]
    pub max_chunk_body_bytes: u64,
}

fn default_bind() -> String {
    "127.0.0.1:8080".to_string()
}

fn default_max_chunk_body_bytes() -> u64 {
    // chunk size + 1 MiB of multipart framing headroom
    crate::DEFAULT_CHUNK_SIZE + 1024 * 1024
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            max_chunk_body_bytes: default_max_chunk_body_bytes(),
        }
    }
}

/// Blob storage configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Directory holding assembled blobs, one file per session.
    #[serde(default = "default_upload_dir")]
    pub upload_dir: PathBuf,
    /// Scratch directory for transient files.
    #[serde(default = "default_temp_dir")]
    pub temp_dir: PathBuf,
}

fn default_upload_dir() -> PathBuf {
    PathBuf::from("./data/uploads")
}

fn default_temp_dir() -> PathBuf {
    PathBuf::from("./data/tmp")
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            upload_dir: default_upload_dir(),
            temp_dir: default_temp_dir(),
        }
    }
}

/// Upload protocol configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct UploadConfig {
    /// Chunk size in bytes. Fixed for the deployment: sessions created with
    /// one chunk size cannot be resumed under another.
    #[serde(default = "default_chunk_size")]
    pub chunk_size: u64,
    /// Seconds after which an uploading session with no progress is reaped.
    #[serde(default = "default_abandonment_timeout_secs")]
    pub abandonment_timeout_secs: u64,
    /// Seconds between recovery sweeps.
    #[serde(default = "default_cleanup_interval_secs")]
    pub cleanup_interval_secs: u64,
}

fn default_chunk_size() -> u64 {
    crate::DEFAULT_CHUNK_SIZE
}

fn default_abandonment_timeout_secs() -> u64 {
    86400 // one day
}

fn default_cleanup_interval_secs() -> u64 {
    3600 // hourly
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            chunk_size: default_chunk_size(),
            abandonment_timeout_secs: default_abandonment_timeout_secs(),
            cleanup_interval_secs: default_cleanup_interval_secs(),
        }
    }
}

impl UploadConfig {
    /// Get the abandonment timeout as a Duration.
    pub fn abandonment_timeout(&self) -> Duration {
        // A u64 past i64::MAX clamps rather than going negative in the cast.
        let secs = i64::try_from(self.abandonment_timeout_secs).unwrap_or(i64::MAX);
        Duration::seconds(secs)
    }

    /// Get the sweep interval as a std::time::Duration.
    pub fn cleanup_interval(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.cleanup_interval_secs)
    }

    /// Validate upload configuration invariants.
    pub fn validate(&self) -> Result<(), String> {
        if self.chunk_size < crate::MIN_CHUNK_SIZE || self.chunk_size > crate::MAX_CHUNK_SIZE {
            return Err(format!(
                "upload.chunk_size {} must be between {} and {}",
                self.chunk_size,
                crate::MIN_CHUNK_SIZE,
                crate::MAX_CHUNK_SIZE
            ));
        }
        if self.cleanup_interval_secs == 0 {
            return Err(
                "upload.cleanup_interval_secs cannot be 0. \
                 This would cause a panic when creating the sweep timer. \
                 Use a value >= 1 second."
                    .to_string(),
            );
        }
        Ok(())
    }
}

/// Where session and chunk records live.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum MetadataConfig {
    /// SQLite database.
    Sqlite {
        /// Location of the SQLite file; parent directories are created.
        path: PathBuf,
    },
}

impl Default for MetadataConfig {
    fn default() -> Self {
        Self::Sqlite {
            path: PathBuf::from("./data/metadata.db"),
        }
    }
}

/// Top-level configuration tree.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// HTTP listener settings.
    #[serde(default)]
    pub server: ServerConfig,
    /// Blob storage configuration.
    #[serde(default)]
    pub storage: StorageConfig,
    /// Upload protocol configuration.
    #[serde(default)]
    pub upload: UploadConfig,
    /// Metadata store location.
    #[serde(default)]
    pub metadata: MetadataConfig,
}

impl AppConfig {
    /// Validate the whole configuration, returning the first problem found.
    pub fn validate(&self) -> Result<(), String> {
        self.upload.validate()?;
        if self.server.max_chunk_body_bytes <= self.upload.chunk_size {
            return Err(format!(
                "server.max_chunk_body_bytes {} must exceed upload.chunk_size {} \
                 to leave room for multipart framing",
                self.server.max_chunk_body_bytes, self.upload.chunk_size
            ));
        }
        Ok(())
    }
}
