use std::sync::Arc;

use axum::extract::State;
use axum::http::HeaderMap;
use axum::Json;

use crate::core::errors::ApiError;
use crate::core::security::require_api_key;
use crate::importer::ImportReport;
use crate::state::AppState;

/// Runs one importer pass over the input directory.
pub async fn run(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Json<ImportReport>, ApiError> {
    require_api_key(&headers, &state.api_token)?;

    let report = state.importer.run().await?;
    Ok(Json(report))
}
