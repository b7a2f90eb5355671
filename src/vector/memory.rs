//! In-process vector index.
//!
//! Brute-force cosine scoring over a guarded map. Vectors arrive
//! L2-normalized from the embedding client, so the score is a plain dot
//! product.

use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;

use super::{IndexEntry, IndexStats, QueryMatch, VectorIndex};
use crate::core::errors::PipelineError;

#[derive(Default)]
pub struct MemoryVectorIndex {
    entries: RwLock<HashMap<String, IndexEntry>>,
}

impl MemoryVectorIndex {
    pub fn new() -> Self {
        Self::default()
    }

    fn dot(a: &[f32], b: &[f32]) -> f32 {
        if a.len() != b.len() {
            return 0.0;
        }
        a.iter().zip(b.iter()).map(|(x, y)| x * y).sum()
    }
}

#[async_trait]
impl VectorIndex for MemoryVectorIndex {
    async fn upsert(&self, new_entries: Vec<IndexEntry>) -> Result<usize, PipelineError> {
        let count = new_entries.len();
        let mut entries = self
            .entries
            .write()
            .map_err(|_| PipelineError::index("index lock poisoned", false))?;
        for entry in new_entries {
            entries.insert(entry.id.clone(), entry);
        }
        Ok(count)
    }

    async fn fetch(&self, ids: &[String]) -> Result<HashMap<String, IndexEntry>, PipelineError> {
        let entries = self
            .entries
            .read()
            .map_err(|_| PipelineError::index("index lock poisoned", false))?;
        Ok(ids
            .iter()
            .filter_map(|id| entries.get(id).map(|entry| (id.clone(), entry.clone())))
            .collect())
    }

    async fn query(&self, vector: &[f32], top_k: usize) -> Result<Vec<QueryMatch>, PipelineError> {
        let entries = self
            .entries
            .read()
            .map_err(|_| PipelineError::index("index lock poisoned", false))?;

        let mut matches: Vec<QueryMatch> = entries
            .values()
            .map(|entry| QueryMatch {
                id: entry.id.clone(),
                score: Self::dot(vector, &entry.values),
                metadata: entry.metadata.clone(),
            })
            .collect();

        matches.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        matches.truncate(top_k);
        Ok(matches)
    }

    async fn describe_stats(&self) -> Result<IndexStats, PipelineError> {
        let entries = self
            .entries
            .read()
            .map_err(|_| PipelineError::index("index lock poisoned", false))?;
        Ok(IndexStats {
            vector_count: entries.len(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn entry(id: &str, values: Vec<f32>) -> IndexEntry {
        IndexEntry {
            id: id.to_string(),
            values,
            metadata: json!({"content": id}),
        }
    }

    #[tokio::test]
    async fn upsert_fetch_and_query_roundtrip() {
        let index = MemoryVectorIndex::new();

        let count = index
            .upsert(vec![
                entry("a", vec![1.0, 0.0]),
                entry("b", vec![0.0, 1.0]),
            ])
            .await
            .unwrap();
        assert_eq!(count, 2);
        assert_eq!(index.describe_stats().await.unwrap().vector_count, 2);

        let fetched = index
            .fetch(&["a".to_string(), "missing".to_string()])
            .await
            .unwrap();
        assert!(fetched.contains_key("a"));
        assert!(!fetched.contains_key("missing"));

        let matches = index.query(&[1.0, 0.0], 5).await.unwrap();
        assert_eq!(matches[0].id, "a");
        assert!(matches[0].score > matches[1].score);
    }

    #[tokio::test]
    async fn upsert_replaces_existing_id() {
        let index = MemoryVectorIndex::new();
        index.upsert(vec![entry("a", vec![1.0, 0.0])]).await.unwrap();
        index.upsert(vec![entry("a", vec![0.0, 1.0])]).await.unwrap();

        assert_eq!(index.describe_stats().await.unwrap().vector_count, 1);
        let fetched = index.fetch(&["a".to_string()]).await.unwrap();
        assert_eq!(fetched["a"].values, vec![0.0, 1.0]);
    }
}
