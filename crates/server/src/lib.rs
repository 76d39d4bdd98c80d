//! Hangar server: HTTP surface and the upload coordinator services.

pub mod error;
pub mod handlers;
pub mod routes;
pub mod state;
pub mod upload;

pub use error::{ApiError, ApiResult};
pub use routes::create_router;
pub use state::AppState;
