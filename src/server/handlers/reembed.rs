use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::HeaderMap;
use axum::Json;
use serde_json::{json, Value};

use crate::core::errors::ApiError;
use crate::core::security::require_api_key;
use crate::scheduler::RunSummary;
use crate::state::AppState;

/// Runs one scheduler cycle on demand. A cycle already in flight is
/// reported as skipped, never queued behind.
pub async fn run(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Json<RunSummary>, ApiError> {
    require_api_key(&headers, &state.api_token)?;

    let summary = state.scheduler.run_once().await;
    Ok(Json(summary))
}

pub async fn job_status(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(name): Path<String>,
) -> Result<Json<Value>, ApiError> {
    require_api_key(&headers, &state.api_token)?;

    let status = state
        .store
        .job_status(&name)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("no job named '{}'", name)))?;

    let health = status.health();
    Ok(Json(json!({
        "status": status,
        "health": health,
    })))
}
