//! Vector synchronizer.
//!
//! The remote index is eventually consistent, so a write is only trusted
//! once it can be read back. Each batch blocks until a sample id from it
//! is fetchable; a final pass re-checks one sample per batch. A record's
//! `last_embedded_at` must never advance past an unverified write — that
//! is the pipeline's core correctness property.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::json;

use super::EmbeddedSegment;
use crate::core::config::VectorConfig;
use crate::core::errors::PipelineError;
use crate::core::retry::Backoff;
use crate::vector::{IndexEntry, IndexStats, QueryMatch, VectorIndex};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpsertReport {
    pub upserted_count: usize,
    pub batches: usize,
}

pub struct VectorSynchronizer {
    index: Arc<dyn VectorIndex>,
    batch_size: usize,
    verify_backoff: Backoff,
}

impl VectorSynchronizer {
    pub fn new(index: Arc<dyn VectorIndex>, config: &VectorConfig) -> Self {
        Self {
            index,
            batch_size: config.upsert_batch_size.max(1),
            verify_backoff: Backoff {
                max_attempts: config.verify_max_attempts.max(1),
                base_delay: Duration::from_millis(config.verify_base_delay_ms),
                max_delay: Duration::from_secs(60),
                jitter: false,
            },
        }
    }

    pub fn index(&self) -> Arc<dyn VectorIndex> {
        self.index.clone()
    }

    /// Upserts all segments in batches and verifies every batch landed.
    /// Either the full set is confirmed durable and queryable, or the
    /// operation fails — partial success is never reported as success.
    pub async fn upsert_verified(
        &self,
        segments: &[EmbeddedSegment],
    ) -> Result<UpsertReport, PipelineError> {
        if segments.is_empty() {
            return Ok(UpsertReport {
                upserted_count: 0,
                batches: 0,
            });
        }

        let mut sample_ids: Vec<String> = Vec::new();
        let mut upserted = 0usize;

        for batch in segments.chunks(self.batch_size) {
            let entries: Vec<IndexEntry> = batch.iter().map(Self::to_entry).collect();
            let sample_id = entries[0].id.clone();

            upserted += self.index.upsert(entries).await?;
            self.wait_until_fetchable(&sample_id).await?;
            sample_ids.push(sample_id);
        }

        // Final pass over one sample per batch; anything missing fails
        // the whole operation and is named in the error.
        let found = self.index.fetch(&sample_ids).await?;
        let missing_ids: Vec<String> = sample_ids
            .iter()
            .filter(|id| !found.contains_key(*id))
            .cloned()
            .collect();
        if !missing_ids.is_empty() {
            return Err(PipelineError::Verification { missing_ids });
        }

        Ok(UpsertReport {
            upserted_count: upserted,
            batches: sample_ids.len(),
        })
    }

    /// Polls for one id with exponential backoff until the index serves
    /// it. Blocking here is deliberate backpressure: the pipeline must
    /// not claim success while the index is still converging.
    async fn wait_until_fetchable(&self, id: &str) -> Result<(), PipelineError> {
        let ids = vec![id.to_string()];
        for attempt in 1..=self.verify_backoff.max_attempts {
            let found = self.index.fetch(&ids).await?;
            if found.contains_key(id) {
                return Ok(());
            }
            if attempt < self.verify_backoff.max_attempts {
                tokio::time::sleep(self.verify_backoff.delay_for(attempt)).await;
            }
        }
        Err(PipelineError::Verification {
            missing_ids: vec![id.to_string()],
        })
    }

    pub async fn query(
        &self,
        vector: &[f32],
        top_k: usize,
    ) -> Result<Vec<QueryMatch>, PipelineError> {
        self.index.query(vector, top_k).await
    }

    /// Index stats, retrying while the count reads zero to tolerate
    /// warm-up lag on a freshly created index.
    pub async fn stats(&self) -> Result<IndexStats, PipelineError> {
        let mut stats = self.index.describe_stats().await?;
        let mut attempt = 1u32;
        while stats.vector_count == 0 && attempt < self.verify_backoff.max_attempts {
            tokio::time::sleep(self.verify_backoff.delay_for(attempt)).await;
            stats = self.index.describe_stats().await?;
            attempt += 1;
        }
        Ok(stats)
    }

    fn to_entry(segment: &EmbeddedSegment) -> IndexEntry {
        let mut metadata = segment.segment.metadata.clone();
        if let Some(map) = metadata.as_object_mut() {
            map.insert("content".to_string(), json!(segment.segment.content));
        }
        IndexEntry {
            id: segment.segment.id.clone(),
            values: segment.vector.clone(),
            metadata,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::Segment;
    use crate::vector::MemoryVectorIndex;
    use async_trait::async_trait;

    fn segment(id: &str) -> EmbeddedSegment {
        EmbeddedSegment {
            segment: Segment {
                id: id.to_string(),
                content: format!("content of {}", id),
                metadata: json!({"sender": "alice"}),
            },
            vector: vec![1.0, 0.0],
        }
    }

    fn fast_config() -> VectorConfig {
        VectorConfig {
            upsert_batch_size: 2,
            verify_base_delay_ms: 1,
            verify_max_attempts: 3,
            ..Default::default()
        }
    }

    /// An index that accepts writes but never serves them back.
    struct BlackHoleIndex;

    #[async_trait]
    impl VectorIndex for BlackHoleIndex {
        async fn upsert(&self, entries: Vec<IndexEntry>) -> Result<usize, PipelineError> {
            Ok(entries.len())
        }

        async fn fetch(
            &self,
            _ids: &[String],
        ) -> Result<std::collections::HashMap<String, IndexEntry>, PipelineError> {
            Ok(std::collections::HashMap::new())
        }

        async fn query(
            &self,
            _vector: &[f32],
            _top_k: usize,
        ) -> Result<Vec<QueryMatch>, PipelineError> {
            Ok(Vec::new())
        }

        async fn describe_stats(&self) -> Result<IndexStats, PipelineError> {
            Ok(IndexStats { vector_count: 0 })
        }
    }

    #[tokio::test]
    async fn upsert_verified_counts_all_segments() {
        let sync = VectorSynchronizer::new(Arc::new(MemoryVectorIndex::new()), &fast_config());
        let segments = vec![segment("a"), segment("b"), segment("c")];

        let report = sync.upsert_verified(&segments).await.unwrap();

        assert_eq!(report.upserted_count, 3);
        assert_eq!(report.batches, 2);

        // Every id is subsequently fetchable with its content metadata.
        let ids: Vec<String> = segments.iter().map(|s| s.segment.id.clone()).collect();
        let fetched = sync.index().fetch(&ids).await.unwrap();
        assert_eq!(fetched.len(), 3);
        assert_eq!(fetched["a"].metadata["content"], "content of a");
        assert_eq!(fetched["a"].metadata["sender"], "alice");
    }

    #[tokio::test]
    async fn unverifiable_write_fails_with_missing_ids() {
        let sync = VectorSynchronizer::new(Arc::new(BlackHoleIndex), &fast_config());
        let segments = vec![segment("ghost")];

        let err = sync.upsert_verified(&segments).await.unwrap_err();
        match err {
            PipelineError::Verification { missing_ids } => {
                assert_eq!(missing_ids, vec!["ghost".to_string()]);
            }
            other => panic!("expected verification error, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn empty_upsert_is_a_no_op() {
        let sync = VectorSynchronizer::new(Arc::new(MemoryVectorIndex::new()), &fast_config());
        let report = sync.upsert_verified(&[]).await.unwrap();
        assert_eq!(report.upserted_count, 0);
        assert_eq!(report.batches, 0);
    }

    #[tokio::test]
    async fn stats_returns_count_once_available() {
        let index = Arc::new(MemoryVectorIndex::new());
        let sync = VectorSynchronizer::new(index.clone(), &fast_config());

        index.upsert(vec![stats_entry()]).await.unwrap();
        let stats = sync.stats().await.unwrap();
        assert_eq!(stats.vector_count, 1);
    }

    fn stats_entry() -> IndexEntry {
        IndexEntry {
            id: "x".to_string(),
            values: vec![1.0, 0.0],
            metadata: json!({}),
        }
    }
}
