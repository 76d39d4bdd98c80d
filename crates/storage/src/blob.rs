//! Sparse blob files with offset-addressed writes.

use crate::error::{StorageError, StorageResult};
use bytes::Bytes;
use futures::{Stream, StreamExt};
use hangar_core::SessionId;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use tokio::fs;
use tokio::io::{AsyncSeekExt, AsyncWriteExt};
use tracing::instrument;

/// A stream of byte frames, as produced by a request body.
pub type ByteStream = Pin<Box<dyn Stream<Item = StorageResult<Bytes>> + Send>>;

/// Local filesystem blob store. One file per upload session, pre-sized at
/// session creation so that offset writes never need to extend it.
pub struct BlobStore {
    root: PathBuf,
}

impl BlobStore {
    /// Create a new blob store rooted at `root`.
    pub async fn new(root: impl AsRef<Path>) -> StorageResult<Self> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(&root).await?;
        Ok(Self { root })
    }

    /// The storage root directory.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Canonical blob location for a session.
    pub fn blob_path(&self, session_id: &SessionId) -> PathBuf {
        self.root
            .join(format!("{session_id}.{}", hangar_core::ARCHIVE_EXTENSION))
    }

    /// Create (or truncate) a file of exactly `size` bytes. The file is
    /// sparse where the filesystem supports it; no payload bytes are written.
    #[instrument(skip(self), fields(path = %path.display()))]
    pub async fn preallocate(&self, path: &Path, size: u64) -> StorageResult<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }
        let file = fs::File::create(path).await?;
        file.set_len(size).await?;
        file.sync_all().await?;
        Ok(())
    }

    /// Open a writer positioned at `offset`. The writer refuses to extend
    /// the file past its preallocated length. Concurrent writers on disjoint
    /// offset ranges are safe; each holds its own handle.
    pub async fn writer_at(&self, path: &Path, offset: u64) -> StorageResult<BlobWriter> {
        let mut file = fs::OpenOptions::new()
            .write(true)
            .open(path)
            .await
            .map_err(|e| Self::map_not_found(e, path))?;

        let file_size = file.metadata().await?.len();
        if offset > file_size {
            return Err(StorageError::WouldExtend {
                path: path.display().to_string(),
                offset,
                file_size,
            });
        }

        file.seek(std::io::SeekFrom::Start(offset)).await?;

        Ok(BlobWriter {
            file,
            path: path.display().to_string(),
            offset,
            file_size,
            written: 0,
        })
    }

    /// Write the full payload of `stream` to `path` starting at `offset`.
    ///
    /// The file is never extended: a frame that would cross the preallocated
    /// length fails with `WouldExtend` before any of its bytes land. Returns
    /// the number of bytes written.
    #[instrument(skip(self, stream), fields(path = %path.display(), offset))]
    pub async fn write_at<S>(&self, path: &Path, offset: u64, stream: S) -> StorageResult<u64>
    where
        S: Stream<Item = StorageResult<Bytes>> + Send,
    {
        let mut writer = self.writer_at(path, offset).await?;
        let mut stream = std::pin::pin!(stream);
        while let Some(frame) = stream.next().await {
            writer.write(&frame?).await?;
        }
        writer.finish().await
    }

    /// Size of the blob in bytes.
    #[instrument(skip(self), fields(path = %path.display()))]
    pub async fn size(&self, path: &Path) -> StorageResult<u64> {
        let metadata = fs::metadata(path)
            .await
            .map_err(|e| Self::map_not_found(e, path))?;
        Ok(metadata.len())
    }

    /// Whether the blob exists.
    pub async fn exists(&self, path: &Path) -> StorageResult<bool> {
        fs::try_exists(path).await.map_err(StorageError::Io)
    }

    /// Delete the blob. Idempotent: an absent file is not an error.
    #[instrument(skip(self), fields(path = %path.display()))]
    pub async fn delete(&self, path: &Path) -> StorageResult<()> {
        match fs::remove_file(path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(StorageError::Io(e)),
        }
    }

    fn map_not_found(e: std::io::Error, path: &Path) -> StorageError {
        if e.kind() == std::io::ErrorKind::NotFound {
            StorageError::NotFound(path.display().to_string())
        } else {
            StorageError::Io(e)
        }
    }
}

/// An in-progress offset write. Obtained from [`BlobStore::writer_at`].
pub struct BlobWriter {
    file: fs::File,
    path: String,
    offset: u64,
    file_size: u64,
    written: u64,
}

impl BlobWriter {
    /// Append one frame at the current position. Fails with `WouldExtend`
    /// before writing if the frame would cross the preallocated length.
    pub async fn write(&mut self, frame: &[u8]) -> StorageResult<()> {
        let budget = self.file_size - self.offset;
        if self.written + frame.len() as u64 > budget {
            return Err(StorageError::WouldExtend {
                path: self.path.clone(),
                offset: self.offset + self.written,
                file_size: self.file_size,
            });
        }
        self.file.write_all(frame).await?;
        self.written += frame.len() as u64;
        Ok(())
    }

    /// Bytes written so far.
    pub fn written(&self) -> u64 {
        self.written
    }

    /// Flush and return the total bytes written.
    pub async fn finish(mut self) -> StorageResult<u64> {
        self.file.flush().await?;
        Ok(self.written)
    }
}
