//! Similarity search.
//!
//! Embeds a query and retrieves nearest neighbors from the index. Input
//! validation happens before any network call, and provider scores are
//! checked against the [0, 1] contract — a bad score is a data fault, not
//! a result.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::embedder::Embedder;
use crate::core::errors::PipelineError;
use crate::vector::VectorIndex;

/// Float-noise allowance on the score bounds check.
const SCORE_EPSILON: f32 = 1e-4;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchHit {
    pub id: String,
    pub score: f32,
    pub content: String,
    pub metadata: Value,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SearchResults {
    pub results: Vec<SearchHit>,
}

pub struct SearchEngine {
    embedder: Arc<dyn Embedder>,
    index: Arc<dyn VectorIndex>,
    default_top_k: usize,
}

impl SearchEngine {
    pub fn new(embedder: Arc<dyn Embedder>, index: Arc<dyn VectorIndex>, default_top_k: usize) -> Self {
        Self {
            embedder,
            index,
            default_top_k: default_top_k.max(1),
        }
    }

    /// Returns up to `top_k` matches ordered by descending score. An
    /// empty result set is a successful outcome, distinct from an error.
    pub async fn search(
        &self,
        query: &str,
        top_k: Option<usize>,
    ) -> Result<SearchResults, PipelineError> {
        if query.trim().is_empty() {
            return Err(PipelineError::InvalidQuery);
        }
        let top_k = top_k.unwrap_or(self.default_top_k).max(1);

        let query_vector = self.embedder.embed_one(query).await?;
        let mut matches = self.index.query(&query_vector, top_k).await?;

        matches.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        matches.truncate(top_k);

        let mut results = Vec::with_capacity(matches.len());
        for m in matches {
            if m.score < -SCORE_EPSILON || m.score > 1.0 + SCORE_EPSILON {
                return Err(PipelineError::Data(format!(
                    "similarity score {} for id {} outside [0, 1]",
                    m.score, m.id
                )));
            }
            let content = m
                .metadata
                .get("content")
                .and_then(|v| v.as_str())
                .unwrap_or_default()
                .to_string();
            results.push(SearchHit {
                id: m.id,
                score: m.score.clamp(0.0, 1.0),
                content,
                metadata: m.metadata,
            });
        }

        Ok(SearchResults { results })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vector::{IndexEntry, MemoryVectorIndex};
    use async_trait::async_trait;
    use serde_json::json;

    /// Embedder that must never be reached; proves validation short-circuits.
    struct UnreachableEmbedder;

    #[async_trait]
    impl Embedder for UnreachableEmbedder {
        async fn embed_batch(&self, _inputs: &[String]) -> Result<Vec<Vec<f32>>, PipelineError> {
            panic!("embedder must not be called for an invalid query");
        }

        fn dimension(&self) -> usize {
            2
        }
    }

    /// Always answers with the same unit vector.
    struct ConstantEmbedder(Vec<f32>);

    #[async_trait]
    impl Embedder for ConstantEmbedder {
        async fn embed_batch(&self, inputs: &[String]) -> Result<Vec<Vec<f32>>, PipelineError> {
            Ok(inputs.iter().map(|_| self.0.clone()).collect())
        }

        fn dimension(&self) -> usize {
            self.0.len()
        }
    }

    #[tokio::test]
    async fn blank_query_fails_before_any_call() {
        let engine = SearchEngine::new(
            Arc::new(UnreachableEmbedder),
            Arc::new(MemoryVectorIndex::new()),
            5,
        );

        for query in ["", "   ", "\n\t"] {
            let err = engine.search(query, None).await.unwrap_err();
            assert!(matches!(err, PipelineError::InvalidQuery));
        }
    }

    #[tokio::test]
    async fn empty_index_returns_empty_results_not_error() {
        let engine = SearchEngine::new(
            Arc::new(ConstantEmbedder(vec![1.0, 0.0])),
            Arc::new(MemoryVectorIndex::new()),
            5,
        );

        let results = engine.search("anything at all", None).await.unwrap();
        assert!(results.results.is_empty());
    }

    #[tokio::test]
    async fn results_are_ordered_and_carry_content() {
        let index = Arc::new(MemoryVectorIndex::new());
        index
            .upsert(vec![
                IndexEntry {
                    id: "close".to_string(),
                    values: vec![1.0, 0.0],
                    metadata: json!({"content": "closest text"}),
                },
                IndexEntry {
                    id: "far".to_string(),
                    values: vec![0.0, 1.0],
                    metadata: json!({"content": "distant text"}),
                },
            ])
            .await
            .unwrap();

        let engine = SearchEngine::new(Arc::new(ConstantEmbedder(vec![1.0, 0.0])), index, 5);
        let results = engine.search("find the close one", None).await.unwrap();

        assert_eq!(results.results.len(), 2);
        assert_eq!(results.results[0].id, "close");
        assert_eq!(results.results[0].content, "closest text");
        assert!(results.results[0].score >= results.results[1].score);
    }

    #[tokio::test]
    async fn out_of_range_scores_are_rejected() {
        struct BadScoreIndex;

        #[async_trait]
        impl crate::vector::VectorIndex for BadScoreIndex {
            async fn upsert(&self, _e: Vec<IndexEntry>) -> Result<usize, PipelineError> {
                Ok(0)
            }
            async fn fetch(
                &self,
                _ids: &[String],
            ) -> Result<std::collections::HashMap<String, IndexEntry>, PipelineError> {
                Ok(Default::default())
            }
            async fn query(
                &self,
                _vector: &[f32],
                _top_k: usize,
            ) -> Result<Vec<crate::vector::QueryMatch>, PipelineError> {
                Ok(vec![crate::vector::QueryMatch {
                    id: "bad".to_string(),
                    score: 1.7,
                    metadata: json!({}),
                }])
            }
            async fn describe_stats(&self) -> Result<crate::vector::IndexStats, PipelineError> {
                Ok(Default::default())
            }
        }

        let engine = SearchEngine::new(
            Arc::new(ConstantEmbedder(vec![1.0, 0.0])),
            Arc::new(BadScoreIndex),
            5,
        );

        let err = engine.search("query", None).await.unwrap_err();
        assert!(matches!(err, PipelineError::Data(_)));
    }
}
