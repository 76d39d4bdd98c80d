//! Sessions: identity, lifecycle states, and the domain view.

use crate::chunk::ChunkLayout;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use time::OffsetDateTime;
use uuid::Uuid;

/// Opaque 128-bit identifier a client uses to address its upload.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionId(Uuid);

impl SessionId {
    /// Mint a fresh random id.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Parse the canonical string form.
    pub fn parse(s: &str) -> crate::Result<Self> {
        Uuid::parse_str(s)
            .map(Self)
            .map_err(|e| crate::Error::Session(format!("invalid session ID: {e}")))
    }

    /// The underlying UUID.
    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl From<Uuid> for SessionId {
    fn from(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

impl fmt::Debug for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SessionId({})", self.0)
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Lifecycle state of an upload session.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    /// Accepting chunk writes.
    Uploading,
    /// The finalization pipeline holds exclusive ownership; no new chunks.
    Processing,
    /// The blob was assembled and verified.
    Completed,
    /// Verification failed or the session was abandoned.
    Failed,
}

impl SessionStatus {
    /// Whether chunk ingestion is still allowed.
    pub fn accepts_chunks(&self) -> bool {
        matches!(self, Self::Uploading)
    }

    /// Whether the state is final: completed and failed never transition.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    /// Storage representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Uploading => "uploading",
            Self::Processing => "processing",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    /// Parse from the storage representation.
    pub fn parse(s: &str) -> crate::Result<Self> {
        match s {
            "uploading" => Ok(Self::Uploading),
            "processing" => Ok(Self::Processing),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            other => Err(crate::Error::Session(format!(
                "unknown session status: {other}"
            ))),
        }
    }
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An upload session tracking a chunked archive transfer.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct UploadSession {
    /// The client-visible id.
    pub id: SessionId,
    /// Original filename, for display only.
    pub filename: String,
    /// Expected blob size in bytes.
    pub total_size: u64,
    /// Number of fixed-size chunks.
    pub total_chunks: u32,
    /// Current lifecycle state.
    pub status: SessionStatus,
    /// Location of the reassembled blob on local storage.
    pub blob_path: PathBuf,
    /// SHA-256 of the assembled blob, set only in `Completed`.
    pub final_hash: Option<String>,
    /// Creation time.
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    /// Last mutation time.
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
    /// When the session reached `Completed`.
    #[serde(with = "time::serde::rfc3339::option")]
    pub completed_at: Option<OffsetDateTime>,
}

impl UploadSession {
    /// The chunk layout for this session, given the deployment chunk size.
    pub fn layout(&self, chunk_size: u64) -> crate::Result<ChunkLayout> {
        ChunkLayout::new(self.total_size, chunk_size)
    }
}
