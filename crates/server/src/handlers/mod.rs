//! HTTP handlers.

mod health;
mod uploads;

pub use health::health_check;
pub use uploads::{get_contents, get_status, init_upload, upload_chunk};
