//! REST client for a remote vector index service.
//!
//! Speaks the common managed-index surface: `/vectors/upsert`,
//! `/vectors/fetch`, `/query` and `/describe_index_stats`, authenticated
//! with an `Api-Key` header. Rate limiting and server errors are flagged
//! retryable so the caller's backoff policy can kick in.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use serde_json::{json, Value};

use super::{IndexEntry, IndexStats, QueryMatch, VectorIndex};
use crate::core::errors::PipelineError;

pub struct HttpVectorIndex {
    client: Client,
    base_url: String,
}

impl HttpVectorIndex {
    pub fn new(base_url: &str, api_key: Option<&str>) -> Result<Self, PipelineError> {
        let mut headers = reqwest::header::HeaderMap::new();
        if let Some(key) = api_key {
            let value = reqwest::header::HeaderValue::from_str(key)
                .map_err(|_| PipelineError::index("invalid vector index API key", false))?;
            headers.insert("Api-Key", value);
        }

        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .default_headers(headers)
            .build()
            .map_err(|err| PipelineError::index(err, false))?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    fn transport_error(err: reqwest::Error) -> PipelineError {
        let retryable = err.is_timeout() || err.is_connect() || err.is_request();
        PipelineError::index(err, retryable)
    }

    fn status_error(status: StatusCode, body: String) -> PipelineError {
        let retryable = status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error();
        PipelineError::index(format!("index returned {}: {}", status, body), retryable)
    }

    async fn post_json(&self, path: &str, body: Value) -> Result<Value, PipelineError> {
        let url = format!("{}{}", self.base_url, path);
        let response = self
            .client
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(Self::transport_error)?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(Self::status_error(status, text));
        }

        response
            .json()
            .await
            .map_err(|err| PipelineError::index(err, false))
    }
}

#[derive(Deserialize)]
struct FetchResponse {
    #[serde(default)]
    vectors: HashMap<String, FetchedVector>,
}

#[derive(Deserialize)]
struct FetchedVector {
    id: String,
    #[serde(default)]
    values: Vec<f32>,
    #[serde(default)]
    metadata: Value,
}

#[derive(Deserialize)]
struct QueryResponse {
    #[serde(default)]
    matches: Vec<RawMatch>,
}

#[derive(Deserialize)]
struct RawMatch {
    id: String,
    score: f32,
    #[serde(default)]
    metadata: Value,
}

#[async_trait]
impl VectorIndex for HttpVectorIndex {
    async fn upsert(&self, entries: Vec<IndexEntry>) -> Result<usize, PipelineError> {
        if entries.is_empty() {
            return Ok(0);
        }

        let body = json!({ "vectors": entries });
        let response = self.post_json("/vectors/upsert", body).await?;
        let count = response
            .get("upsertedCount")
            .and_then(|v| v.as_u64())
            .unwrap_or(0) as usize;
        Ok(count)
    }

    async fn fetch(&self, ids: &[String]) -> Result<HashMap<String, IndexEntry>, PipelineError> {
        if ids.is_empty() {
            return Ok(HashMap::new());
        }

        let url = format!("{}/vectors/fetch", self.base_url);
        let query: Vec<(&str, &str)> = ids.iter().map(|id| ("ids", id.as_str())).collect();
        let response = self
            .client
            .get(&url)
            .query(&query)
            .send()
            .await
            .map_err(Self::transport_error)?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(Self::status_error(status, text));
        }

        let parsed: FetchResponse = response
            .json()
            .await
            .map_err(|err| PipelineError::index(err, false))?;

        Ok(parsed
            .vectors
            .into_iter()
            .map(|(key, vector)| {
                (
                    key,
                    IndexEntry {
                        id: vector.id,
                        values: vector.values,
                        metadata: vector.metadata,
                    },
                )
            })
            .collect())
    }

    async fn query(&self, vector: &[f32], top_k: usize) -> Result<Vec<QueryMatch>, PipelineError> {
        let body = json!({
            "vector": vector,
            "topK": top_k,
            "includeMetadata": true,
        });
        let response = self.post_json("/query", body).await?;
        let parsed: QueryResponse = serde_json::from_value(response)
            .map_err(|err| PipelineError::index(err, false))?;

        Ok(parsed
            .matches
            .into_iter()
            .map(|m| QueryMatch {
                id: m.id,
                score: m.score,
                metadata: m.metadata,
            })
            .collect())
    }

    async fn describe_stats(&self) -> Result<IndexStats, PipelineError> {
        let response = self.post_json("/describe_index_stats", json!({})).await?;
        let vector_count = response
            .get("totalVectorCount")
            .and_then(|v| v.as_u64())
            .unwrap_or(0) as usize;
        Ok(IndexStats { vector_count })
    }
}
