//! HTTP route table.

use crate::handlers;
use crate::state::AppState;
use axum::Router;
use axum::extract::DefaultBodyLimit;
use axum::routing::{get, post};
use tower_http::trace::TraceLayer;

/// Assemble the HTTP router.
pub fn create_router(state: AppState) -> Router {
    // The default axum body limit is far below one chunk; raise it to the
    // configured chunk body ceiling.
    let body_limit = usize::try_from(state.config.server.max_chunk_body_bytes)
        .unwrap_or(usize::MAX);

    Router::new()
        .route("/upload/init", post(handlers::init_upload))
        .route("/upload/chunk", post(handlers::upload_chunk))
        .route("/upload/{session_id}/status", get(handlers::get_status))
        .route(
            "/upload/{session_id}/contents",
            get(handlers::get_contents),
        )
        .route("/health", get(handlers::health_check))
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
