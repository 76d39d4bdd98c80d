//! Streaming blob hashing and ZIP central-directory inspection.

use crate::error::{ArchiveError, ArchiveResult};
use hangar_core::ContentHash;
use std::path::Path;
use time::OffsetDateTime;
use tokio::io::AsyncReadExt;
use tracing::instrument;

/// Read buffer size for streaming hashes (64 KiB).
const HASH_BUF_SIZE: usize = 64 * 1024;

/// Metadata of one archive entry, read from the central directory.
#[derive(Clone, Debug)]
pub struct ArchiveEntry {
    /// Path of the entry within the archive.
    pub name: String,
    /// Uncompressed size in bytes.
    pub size: u64,
    /// Compressed size in bytes.
    pub compressed: u64,
    /// Whether the entry is a directory.
    pub is_directory: bool,
    /// Last-modified timestamp, when the archive records one.
    pub modified: Option<OffsetDateTime>,
}

/// Compute the SHA-256 digest of a file, streaming with bounded memory.
#[instrument(fields(path = %path.display()))]
pub async fn hash_blob(path: &Path) -> ArchiveResult<ContentHash> {
    let mut file = tokio::fs::File::open(path)
        .await
        .map_err(|e| map_not_found(e, path))?;

    let mut hasher = ContentHash::hasher();
    let mut buf = vec![0u8; HASH_BUF_SIZE];
    loop {
        let n = file.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hasher.finalize())
}

/// Check whether the file parses as a ZIP archive.
///
/// Opens the central directory only; no entry data is extracted. Returns
/// `Ok(false)` for structurally invalid archives and errors only for I/O
/// failures.
#[instrument(fields(path = %path.display()))]
pub async fn is_valid_archive(path: &Path) -> ArchiveResult<bool> {
    let path = path.to_path_buf();
    run_blocking(move || match open_archive(&path) {
        Ok(_) => Ok(true),
        Err(ArchiveError::Invalid(_)) => Ok(false),
        Err(e) => Err(e),
    })
    .await
}

/// List the entries recorded in the archive's central directory.
#[instrument(fields(path = %path.display()))]
pub async fn list_entries(path: &Path) -> ArchiveResult<Vec<ArchiveEntry>> {
    let path = path.to_path_buf();
    run_blocking(move || {
        let mut archive = open_archive(&path)?;
        let mut entries = Vec::with_capacity(archive.len());
        for i in 0..archive.len() {
            let file = archive
                .by_index_raw(i)
                .map_err(|e| ArchiveError::Invalid(e.to_string()))?;
            entries.push(ArchiveEntry {
                name: file.name().to_string(),
                size: file.size(),
                compressed: file.compressed_size(),
                is_directory: file.is_dir(),
                modified: file
                    .last_modified()
                    .and_then(|dt| OffsetDateTime::try_from(dt).ok()),
            });
        }
        Ok(entries)
    })
    .await
}

/// Open a ZIP archive for central-directory reads, classifying errors.
fn open_archive(path: &Path) -> ArchiveResult<zip::ZipArchive<std::fs::File>> {
    let file = std::fs::File::open(path).map_err(|e| map_not_found(e, path))?;
    zip::ZipArchive::new(file).map_err(|e| match e {
        zip::result::ZipError::Io(io) => ArchiveError::Io(io),
        other => ArchiveError::Invalid(other.to_string()),
    })
}

/// The `zip` crate does synchronous I/O; keep it off the async runtime.
async fn run_blocking<T, F>(f: F) -> ArchiveResult<T>
where
    T: Send + 'static,
    F: FnOnce() -> ArchiveResult<T> + Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| ArchiveError::Io(std::io::Error::other(format!("blocking task panicked: {e}"))))?
}

fn map_not_found(e: std::io::Error, path: &Path) -> ArchiveError {
    if e.kind() == std::io::ErrorKind::NotFound {
        ArchiveError::NotFound(path.display().to_string())
    } else {
        ArchiveError::Io(e)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use zip::write::SimpleFileOptions;

    fn sample_zip() -> Vec<u8> {
        let mut cursor = std::io::Cursor::new(Vec::new());
        let mut writer = zip::ZipWriter::new(&mut cursor);
        let options = SimpleFileOptions::default();
        writer.add_directory("docs/", options).unwrap();
        writer.start_file("docs/readme.txt", options).unwrap();
        writer.write_all(b"hello from the archive").unwrap();
        writer.finish().unwrap();
        cursor.into_inner()
    }

    async fn write_temp(contents: &[u8]) -> (tempfile::TempDir, std::path::PathBuf) {
        let temp = tempfile::tempdir().unwrap();
        let path = temp.path().join("blob.zip");
        tokio::fs::write(&path, contents).await.unwrap();
        (temp, path)
    }

    #[tokio::test]
    async fn hash_blob_matches_oneshot_digest() {
        let (_temp, path) = write_temp(b"some bytes to hash").await;
        let hash = hash_blob(&path).await.unwrap();
        assert_eq!(hash, ContentHash::compute(b"some bytes to hash"));
    }

    #[tokio::test]
    async fn hash_blob_missing_file_is_not_found() {
        let temp = tempfile::tempdir().unwrap();
        match hash_blob(&temp.path().join("missing")).await {
            Err(ArchiveError::NotFound(_)) => {}
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[tokio::test]
    async fn valid_archive_is_recognized() {
        let (_temp, path) = write_temp(&sample_zip()).await;
        assert!(is_valid_archive(&path).await.unwrap());
    }

    #[tokio::test]
    async fn garbage_bytes_are_not_an_archive() {
        let (_temp, path) = write_temp(&[0x42u8; 4096]).await;
        assert!(!is_valid_archive(&path).await.unwrap());
    }

    #[tokio::test]
    async fn empty_file_is_not_an_archive() {
        let (_temp, path) = write_temp(b"").await;
        assert!(!is_valid_archive(&path).await.unwrap());
    }

    #[tokio::test]
    async fn list_entries_reads_central_directory() {
        let (_temp, path) = write_temp(&sample_zip()).await;
        let entries = list_entries(&path).await.unwrap();
        assert_eq!(entries.len(), 2);

        let dir = entries.iter().find(|e| e.is_directory).unwrap();
        assert_eq!(dir.name, "docs/");

        let file = entries.iter().find(|e| !e.is_directory).unwrap();
        assert_eq!(file.name, "docs/readme.txt");
        assert_eq!(file.size, 22);
    }

    #[tokio::test]
    async fn list_entries_rejects_garbage() {
        let (_temp, path) = write_temp(&[0x13u8; 64]).await;
        assert!(list_entries(&path).await.is_err());
    }
}
