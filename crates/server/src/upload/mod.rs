//! The upload coordinator services.
//!
//! Four cooperating services drive a session through its lifecycle:
//! [`sessions`] creates it, [`ingest`] accepts its chunks, [`finalize`]
//! verifies the assembled blob under an exclusive claim, and [`recovery`]
//! drives anything left behind by a crash to a well-defined state.

pub mod finalize;
pub mod ingest;
pub mod recovery;
pub mod sessions;
