//! Blob storage for the Hangar upload coordinator.
//!
//! A blob is one pre-sized file per upload session. Chunk writers address
//! disjoint byte ranges of the same file, so no locking is needed on the
//! storage side; the metadata store is the coordination point.

pub mod blob;
pub mod error;

pub use blob::{BlobStore, BlobWriter, ByteStream};
pub use error::{StorageError, StorageResult};
