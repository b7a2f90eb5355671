//! Embedding client.
//!
//! `Embedder` is the seam between the pipeline and the embedding
//! provider; `HttpEmbedder` talks to an OpenAI-compatible endpoint in
//! batches, through the shared backoff policy. Vectors are required to
//! arrive L2-normalized — an unnormalized vector is a data fault from the
//! provider, never something to quietly fix up.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};

use crate::core::config::EmbeddingConfig;
use crate::core::errors::PipelineError;
use crate::core::retry::Backoff;

/// Allowed deviation from unit magnitude.
pub const MAGNITUDE_TOLERANCE: f32 = 0.01;

#[async_trait]
pub trait Embedder: Send + Sync {
    async fn embed_batch(&self, inputs: &[String]) -> Result<Vec<Vec<f32>>, PipelineError>;

    async fn embed_one(&self, input: &str) -> Result<Vec<f32>, PipelineError> {
        let mut vectors = self.embed_batch(&[input.to_string()]).await?;
        vectors
            .pop()
            .ok_or_else(|| PipelineError::Data("provider returned no embedding".to_string()))
    }

    fn dimension(&self) -> usize;
}

/// Fails unless the vector's L2 norm is within `MAGNITUDE_TOLERANCE` of 1.
pub fn validate_magnitude(vector: &[f32]) -> Result<(), PipelineError> {
    let magnitude: f32 = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
    if (magnitude - 1.0).abs() > MAGNITUDE_TOLERANCE {
        return Err(PipelineError::Data(format!(
            "embedding magnitude {:.4} outside 1 +/- {}",
            magnitude, MAGNITUDE_TOLERANCE
        )));
    }
    Ok(())
}

/// Progress of one embedding batch job. A value owned by the run that
/// created it, reset at the start of each job — deliberately not shared
/// process state.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EmbedStatus {
    pub is_complete: bool,
    pub processed_count: usize,
    pub total_count: usize,
    pub last_error: Option<String>,
}

impl EmbedStatus {
    pub fn start(total_count: usize) -> Self {
        Self {
            is_complete: false,
            processed_count: 0,
            total_count,
            last_error: None,
        }
    }

    pub fn record_progress(&mut self, count: usize) {
        self.processed_count += count;
        if self.processed_count >= self.total_count {
            self.is_complete = true;
        }
    }

    pub fn record_error(&mut self, err: &PipelineError) {
        self.last_error = Some(err.to_string());
    }
}

pub struct HttpEmbedder {
    client: Client,
    endpoint: String,
    model: String,
    dimension: usize,
    batch_size: usize,
    backoff: Backoff,
}

impl HttpEmbedder {
    pub fn new(config: &EmbeddingConfig) -> Result<Self, PipelineError> {
        let mut headers = reqwest::header::HeaderMap::new();
        if let Some(key) = config.resolve_api_key() {
            let auth = format!("Bearer {}", key.trim());
            headers.insert(
                AUTHORIZATION,
                HeaderValue::from_str(&auth)
                    .map_err(|_| PipelineError::embedding("invalid API key", false))?,
            );
        }
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .default_headers(headers)
            .build()
            .map_err(|err| PipelineError::embedding(err, false))?;

        Ok(Self {
            client,
            endpoint: format!("{}/v1/embeddings", config.base_url.trim_end_matches('/')),
            model: config.model.clone(),
            dimension: config.dimension,
            batch_size: config.batch_size.max(1),
            backoff: Backoff::new(
                config.max_retries,
                Duration::from_millis(config.retry_base_delay_ms),
            ),
        })
    }

    fn transport_error(err: reqwest::Error) -> PipelineError {
        let retryable = err.is_timeout() || err.is_connect() || err.is_request();
        PipelineError::embedding(err, retryable)
    }

    async fn send_batch(&self, inputs: &[String]) -> Result<Vec<Vec<f32>>, PipelineError> {
        let request = EmbeddingRequest {
            model: &self.model,
            input: inputs,
        };

        let response = self
            .client
            .post(&self.endpoint)
            .json(&request)
            .send()
            .await
            .map_err(Self::transport_error)?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let retryable = status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error();
            return Err(PipelineError::embedding(
                format!("provider returned {}: {}", status, body),
                retryable,
            ));
        }

        let mut parsed: EmbeddingResponse = response
            .json()
            .await
            .map_err(|err| PipelineError::embedding(err, false))?;
        parsed.data.sort_by_key(|entry| entry.index);

        if parsed.data.len() != inputs.len() {
            return Err(PipelineError::Data(format!(
                "provider returned {} embeddings for {} inputs",
                parsed.data.len(),
                inputs.len()
            )));
        }

        let vectors: Vec<Vec<f32>> = parsed.data.into_iter().map(|entry| entry.embedding).collect();
        for vector in &vectors {
            if vector.len() != self.dimension {
                return Err(PipelineError::Data(format!(
                    "embedding dimension {} does not match configured {}",
                    vector.len(),
                    self.dimension
                )));
            }
            validate_magnitude(vector)?;
        }

        Ok(vectors)
    }
}

#[async_trait]
impl Embedder for HttpEmbedder {
    async fn embed_batch(&self, inputs: &[String]) -> Result<Vec<Vec<f32>>, PipelineError> {
        if inputs.is_empty() {
            return Ok(Vec::new());
        }

        // Newlines degrade some embedding models; flatten before sending.
        let cleaned: Vec<String> = inputs
            .iter()
            .map(|text| text.replace('\n', " "))
            .collect();

        let mut vectors = Vec::with_capacity(cleaned.len());
        for batch in cleaned.chunks(self.batch_size) {
            let batch_vectors = self
                .backoff
                .retry("embedding request", || self.send_batch(batch))
                .await?;
            vectors.extend(batch_vectors);
        }
        Ok(vectors)
    }

    fn dimension(&self) -> usize {
        self.dimension
    }
}

#[derive(Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: &'a [String],
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingRow>,
}

#[derive(Deserialize)]
struct EmbeddingRow {
    index: usize,
    embedding: Vec<f32>,
}
