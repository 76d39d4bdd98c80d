//! Health check handler.

use crate::error::ApiResult;
use crate::state::AppState;
use axum::Json;
use axum::extract::State;
use hangar_metadata::MetadataStore;
use serde_json::{Value, json};

/// GET /health - liveness probe. Reports healthy only when the metadata
/// store answers a query; a reachable process with a wedged database should
/// be taken out of rotation.
pub async fn health_check(State(state): State<AppState>) -> ApiResult<Json<Value>> {
    state.metadata.health_check().await?;
    Ok(Json(json!({ "status": "ok" })))
}
