use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::HeaderMap;
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::core::errors::ApiError;
use crate::core::security::require_api_key;
use crate::state::AppState;
use crate::store::Alert;

#[derive(Debug, Default, Deserialize)]
pub struct AlertsQuery {
    #[serde(default)]
    pub unacknowledged: bool,
}

pub async fn list(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Query(query): Query<AlertsQuery>,
) -> Result<Json<Vec<Alert>>, ApiError> {
    require_api_key(&headers, &state.api_token)?;

    let alerts = state.store.list_alerts(query.unacknowledged).await?;
    Ok(Json(alerts))
}

pub async fn acknowledge(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    require_api_key(&headers, &state.api_token)?;

    if !state.store.acknowledge_alert(&id).await? {
        return Err(ApiError::NotFound(format!(
            "no unacknowledged alert with id '{}'",
            id
        )));
    }
    Ok(Json(json!({ "acknowledged": id })))
}
