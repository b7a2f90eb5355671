use std::sync::Arc;

use axum::extract::State;
use axum::http::HeaderMap;
use axum::Json;
use serde::Deserialize;
use serde_json::Value;

use crate::core::errors::ApiError;
use crate::core::security::require_api_key;
use crate::state::AppState;
use crate::store::{NewRecord, Record};

#[derive(Debug, Deserialize)]
pub struct CreateMessageRequest {
    pub content: String,
    pub sender: String,
    #[serde(default)]
    pub channel: Option<String>,
    #[serde(default)]
    pub metadata: Option<Value>,
}

/// Inserts a chat message into the source store. It becomes eligible for
/// embedding on the next scheduler tick.
pub async fn create(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(request): Json<CreateMessageRequest>,
) -> Result<Json<Record>, ApiError> {
    require_api_key(&headers, &state.api_token)?;

    if request.content.trim().is_empty() {
        return Err(ApiError::BadRequest("content must not be empty".to_string()));
    }
    if request.sender.trim().is_empty() {
        return Err(ApiError::BadRequest("sender must not be empty".to_string()));
    }

    let mut record = NewRecord::message(
        &request.content,
        &request.sender,
        request.channel.as_deref().unwrap_or("general"),
    );
    record.metadata = request.metadata;

    let stored = state.store.insert_record(record).await?;
    Ok(Json(stored))
}
