//! Blob hashing and archive structural validation.
//!
//! The validator answers two questions about an assembled blob: what is its
//! SHA-256 digest, and does it parse as a ZIP archive. Hashing streams the
//! file with a fixed buffer; validation reads only the central directory,
//! never extracting entry data.

pub mod error;
pub mod validate;

pub use error::{ArchiveError, ArchiveResult};
pub use validate::{ArchiveEntry, hash_blob, is_valid_archive, list_entries};
