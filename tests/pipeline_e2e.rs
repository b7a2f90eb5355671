//! End-to-end pipeline coverage over the in-process vector index: store
//! a conversation, run a re-embedding cycle, search, and build a
//! grounded prompt. Uses a deterministic bag-of-words embedder so
//! similarity behaves like the real thing without any network.

use std::sync::Arc;

use async_trait::async_trait;
use tempfile::TempDir;

use recall_backend::core::config::{AppPaths, ImporterConfig, SchedulerConfig, VectorConfig};
use recall_backend::core::errors::PipelineError;
use recall_backend::importer::DocumentImporter;
use recall_backend::pipeline::chunker::ChunkerConfig;
use recall_backend::pipeline::embedder::Embedder;
use recall_backend::pipeline::prompt::{self, ContextChunk};
use recall_backend::pipeline::search::SearchEngine;
use recall_backend::pipeline::sync::VectorSynchronizer;
use recall_backend::scheduler::{ReembedScheduler, RunStatus, JOB_NAME};
use recall_backend::store::{JobHealth, NewRecord, SqliteStore};
use recall_backend::vector::MemoryVectorIndex;

const DIMENSION: usize = 256;

/// Deterministic embedder: hashes words into a fixed number of buckets
/// and L2-normalizes, so cosine similarity tracks word overlap.
struct HashEmbedder;

fn bucket(word: &str) -> usize {
    let mut hash: u64 = 0xcbf29ce484222325;
    for byte in word.bytes() {
        hash ^= byte as u64;
        hash = hash.wrapping_mul(0x100000001b3);
    }
    (hash % DIMENSION as u64) as usize
}

fn embed_text(text: &str) -> Vec<f32> {
    let mut vector = vec![0.0f32; DIMENSION];
    for word in text
        .to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
    {
        vector[bucket(word)] += 1.0;
    }
    let norm: f32 = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        for value in &mut vector {
            *value /= norm;
        }
    } else {
        vector[0] = 1.0;
    }
    vector
}

#[async_trait]
impl Embedder for HashEmbedder {
    async fn embed_batch(&self, inputs: &[String]) -> Result<Vec<Vec<f32>>, PipelineError> {
        Ok(inputs.iter().map(|text| embed_text(text)).collect())
    }

    fn dimension(&self) -> usize {
        DIMENSION
    }
}

/// Embedder that always fails; used to drive the job to critical health.
struct FailingEmbedder;

#[async_trait]
impl Embedder for FailingEmbedder {
    async fn embed_batch(&self, _inputs: &[String]) -> Result<Vec<Vec<f32>>, PipelineError> {
        Err(PipelineError::embedding("provider is down", false))
    }

    fn dimension(&self) -> usize {
        DIMENSION
    }
}

struct Harness {
    _dir: TempDir,
    store: SqliteStore,
    scheduler: ReembedScheduler,
    search: SearchEngine,
}

async fn harness(embedder: Arc<dyn Embedder>) -> Harness {
    let dir = TempDir::new().unwrap();
    let store = SqliteStore::with_path(dir.path().join("recall.db"))
        .await
        .unwrap();

    let index = Arc::new(MemoryVectorIndex::new());
    let vector_config = VectorConfig {
        verify_base_delay_ms: 1,
        ..Default::default()
    };
    let sync = Arc::new(VectorSynchronizer::new(index.clone(), &vector_config));

    let scheduler_config = SchedulerConfig {
        batch_delay_ms: 0,
        ..Default::default()
    };
    let scheduler = ReembedScheduler::new(
        store.clone(),
        embedder.clone(),
        sync,
        ChunkerConfig::default(),
        scheduler_config,
    );
    let search = SearchEngine::new(embedder, index, 5);

    Harness {
        _dir: dir,
        store,
        scheduler,
        search,
    }
}

#[tokio::test]
async fn conversation_is_embedded_searchable_and_promptable() {
    let h = harness(Arc::new(HashEmbedder)).await;

    let paris = h
        .store
        .insert_record(NewRecord::message(
            "Paris is the capital of France.",
            "alice",
            "general",
        ))
        .await
        .unwrap();
    h.store
        .insert_record(NewRecord::message(
            "I had pasta for dinner yesterday.",
            "bob",
            "general",
        ))
        .await
        .unwrap();

    let summary = h.scheduler.run_once().await;
    assert!(summary.success);
    assert_eq!(summary.status, RunStatus::Completed);
    assert_eq!(summary.messages_processed, 2);

    // Both records now carry an embedding timestamp.
    let embedded = h.store.get_record(&paris.id).await.unwrap().unwrap();
    assert!(embedded.last_embedded_at.is_some());

    let query = "What is the capital of France?";
    let results = h.search.search(query, None).await.unwrap();

    assert!(!results.results.is_empty());
    let top = &results.results[0];
    assert_eq!(top.content, "Paris is the capital of France.");
    assert!(top.score > 0.7, "expected strong match, got {}", top.score);
    assert!((0.0..=1.0).contains(&top.score));

    // The grounded prompt carries attribution and ends with the query.
    let chunks: Vec<ContextChunk> = results
        .results
        .iter()
        .map(|hit| ContextChunk::from_metadata(&hit.content, &hit.metadata))
        .collect();
    let built = prompt::build_plain(&chunks, query).unwrap();
    assert!(built.starts_with("Context from previous messages:"));
    assert!(built.contains("Paris is the capital of France."));
    assert!(built.contains("[alice at "));
    assert!(built.ends_with(query));
}

#[tokio::test]
async fn second_cycle_finds_nothing_stale() {
    let h = harness(Arc::new(HashEmbedder)).await;

    h.store
        .insert_record(NewRecord::message("only message", "alice", "general"))
        .await
        .unwrap();

    assert_eq!(h.scheduler.run_once().await.messages_processed, 1);

    let second = h.scheduler.run_once().await;
    assert!(second.success);
    assert_eq!(second.messages_processed, 0);
}

#[tokio::test]
async fn repeated_failures_turn_the_job_critical_and_raise_alerts() {
    let h = harness(Arc::new(FailingEmbedder)).await;

    h.store
        .insert_record(NewRecord::message("unembeddable", "alice", "general"))
        .await
        .unwrap();

    for _ in 0..3 {
        let summary = h.scheduler.run_once().await;
        assert!(!summary.success);
    }

    let status = h.store.job_status(JOB_NAME).await.unwrap().unwrap();
    assert_eq!(status.consecutive_failures, 3);
    assert_eq!(status.health(), JobHealth::Critical);

    let alerts = h.store.list_alerts(true).await.unwrap();
    let threshold = alerts
        .iter()
        .find(|a| a.details.get("consecutiveFailures").is_some())
        .expect("no critical-threshold alert");
    assert_eq!(threshold.kind, "error");
    assert!(threshold.details["consecutiveFailures"].as_i64().unwrap() >= 3);

    // Recovery resets the streak.
    let recovered = h
        .store
        .record_run(JOB_NAME, true, 1, 100)
        .await
        .unwrap();
    assert_eq!(recovered.health(), JobHealth::Healthy);
}

#[tokio::test]
async fn imported_documents_become_searchable_and_bad_ones_quarantine() {
    let dir = TempDir::new().unwrap();
    let paths = AppPaths::under(dir.path().to_path_buf());

    let store = SqliteStore::with_path(dir.path().join("recall.db"))
        .await
        .unwrap();

    let index = Arc::new(MemoryVectorIndex::new());
    let vector_config = VectorConfig {
        verify_base_delay_ms: 1,
        ..Default::default()
    };
    let sync = Arc::new(VectorSynchronizer::new(index.clone(), &vector_config));
    let embedder: Arc<dyn Embedder> = Arc::new(HashEmbedder);

    let importer = DocumentImporter::new(
        store.clone(),
        embedder.clone(),
        sync,
        ChunkerConfig::default(),
        ImporterConfig::default(),
        &paths,
    );

    std::fs::write(
        paths.import_dir.join("cities.txt"),
        "Lyon is famous for its cuisine. Marseille sits on the Mediterranean coast.",
    )
    .unwrap();
    std::fs::write(
        paths.import_dir.join("rivers.md"),
        "The Loire is the longest river in France.",
    )
    .unwrap();
    std::fs::write(paths.import_dir.join("garbage.pdf"), b"definitely not a pdf").unwrap();

    let report = importer.run().await.unwrap();
    assert_eq!(report.imported, 2);
    assert_eq!(report.quarantined, 1);
    assert_eq!(report.failed, 0);

    assert!(paths.quarantine_dir.join("garbage.pdf").exists());
    assert!(paths.quarantine_dir.join("garbage.pdf.error.txt").exists());

    let doc = store.get_record("doc_cities").await.unwrap().unwrap();
    assert_eq!(doc.sender, "system");
    assert!(doc.last_embedded_at.is_some());

    let search = SearchEngine::new(embedder, index, 5);
    let results = search
        .search("Which city is famous for cuisine?", None)
        .await
        .unwrap();
    assert!(!results.results.is_empty());
    assert!(results.results[0].content.contains("Lyon"));
}
