//! Vector index backends.
//!
//! `VectorIndex` abstracts the external nearest-neighbor service. The
//! `http` backend speaks to a remote REST index; the `memory` backend is
//! an in-process brute-force index for local mode and tests.

mod http;
mod memory;

pub use http::HttpVectorIndex;
pub use memory::MemoryVectorIndex;

use std::collections::HashMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::core::errors::PipelineError;

/// An embedding plus content-bearing metadata, keyed by segment id.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexEntry {
    pub id: String,
    pub values: Vec<f32>,
    pub metadata: Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryMatch {
    pub id: String,
    pub score: f32,
    pub metadata: Value,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct IndexStats {
    pub vector_count: usize,
}

#[async_trait]
pub trait VectorIndex: Send + Sync {
    /// Writes entries, replacing any existing entry with the same id.
    /// Returns the number of vectors accepted by the index.
    async fn upsert(&self, entries: Vec<IndexEntry>) -> Result<usize, PipelineError>;

    /// Point lookup; absent ids are simply missing from the map.
    async fn fetch(&self, ids: &[String]) -> Result<HashMap<String, IndexEntry>, PipelineError>;

    /// Nearest-neighbor query, best matches first.
    async fn query(&self, vector: &[f32], top_k: usize) -> Result<Vec<QueryMatch>, PipelineError>;

    async fn describe_stats(&self) -> Result<IndexStats, PipelineError>;
}
