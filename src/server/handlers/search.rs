use std::sync::Arc;

use axum::extract::State;
use axum::http::HeaderMap;
use axum::Json;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::core::errors::ApiError;
use crate::core::security::require_api_key;
use crate::pipeline::prompt::{self, ContextChunk};
use crate::pipeline::search::SearchResults;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct SearchRequest {
    pub query: String,
    #[serde(default)]
    pub top_k: Option<usize>,
}

pub async fn search(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(request): Json<SearchRequest>,
) -> Result<Json<SearchResults>, ApiError> {
    require_api_key(&headers, &state.api_token)?;

    let results = state.search.search(&request.query, request.top_k).await?;
    Ok(Json(results))
}

#[derive(Debug, Serialize)]
pub struct AskResponse {
    pub prompt: String,
    pub results: SearchResults,
    /// Present only when a completion provider is configured.
    pub answer: Option<String>,
    pub usage: Option<Value>,
}

/// Retrieval plus grounded prompt construction; generates an answer when
/// a completion provider is configured, otherwise returns the prompt for
/// the caller to use.
pub async fn ask(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(request): Json<SearchRequest>,
) -> Result<Json<AskResponse>, ApiError> {
    require_api_key(&headers, &state.api_token)?;

    let results = state.search.search(&request.query, request.top_k).await?;
    let chunks: Vec<ContextChunk> = results
        .results
        .iter()
        .map(|hit| ContextChunk::from_metadata(&hit.content, &hit.metadata))
        .collect();

    let plain = prompt::build_plain(&chunks, &request.query)?;

    let (answer, usage) = match &state.completion {
        Some(client) => {
            let messages = prompt::build_chat(&chunks, &request.query)?;
            let completion = client.complete(&messages).await?;
            (
                Some(completion.text),
                Some(json!({
                    "prompt_tokens": completion.prompt_tokens,
                    "completion_tokens": completion.completion_tokens,
                })),
            )
        }
        None => (None, None),
    };

    Ok(Json(AskResponse {
        prompt: plain,
        results,
        answer,
        usage,
    }))
}
