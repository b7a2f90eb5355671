//! Document importer.
//!
//! Walks the import directory, converts each supported file to text,
//! packs it into parts, and pushes every part through the same
//! store → embed → verified-upsert path that chat messages take.
//! A document that cannot be converted is quarantined with a companion
//! error file and never stops the rest of the batch.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::core::config::{AppPaths, ImporterConfig};
use crate::core::errors::PipelineError;
use crate::pipeline::chunker::{chunk_record, pack_document, ChunkerConfig, DocumentPart};
use crate::pipeline::embedder::Embedder;
use crate::pipeline::sync::VectorSynchronizer;
use crate::pipeline::EmbeddedSegment;
use crate::store::{now_rfc3339, AlertKind, NewRecord, SqliteStore};

const SERVICE: &str = "document-importer";
const SUPPORTED_EXTENSIONS: [&str; 3] = ["txt", "md", "pdf"];

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ImportReport {
    /// Parts stored and embedded.
    pub imported: usize,
    /// Files moved aside because conversion failed.
    pub quarantined: usize,
    /// Parts stored but not embedded. Their source file stays in the
    /// import directory so a later run retries them.
    pub failed: usize,
}

pub struct DocumentImporter {
    store: SqliteStore,
    embedder: Arc<dyn Embedder>,
    sync: Arc<VectorSynchronizer>,
    chunker: ChunkerConfig,
    config: ImporterConfig,
    import_dir: PathBuf,
    quarantine_dir: PathBuf,
}

impl DocumentImporter {
    pub fn new(
        store: SqliteStore,
        embedder: Arc<dyn Embedder>,
        sync: Arc<VectorSynchronizer>,
        chunker: ChunkerConfig,
        config: ImporterConfig,
        paths: &AppPaths,
    ) -> Self {
        Self {
            store,
            embedder,
            sync,
            chunker,
            config,
            import_dir: paths.import_dir.clone(),
            quarantine_dir: paths.quarantine_dir.clone(),
        }
    }

    /// Imports every supported file currently in the import directory.
    /// Returns a report; only infrastructure faults (unreadable import
    /// directory) surface as errors.
    pub async fn run(&self) -> Result<ImportReport, PipelineError> {
        let files = self.scan()?;
        let mut report = ImportReport::default();

        for path in files {
            match self.convert(&path).await {
                Ok(text) => {
                    let failed_parts = self.import_text(&path, &text, &mut report).await;
                    if failed_parts == 0 {
                        if let Err(err) = tokio::fs::remove_file(&path).await {
                            tracing::warn!("failed to remove imported file {:?}: {}", path, err);
                        }
                    } else {
                        // The source stays in place; reinserting on the
                        // next run resets the embedding markers, so
                        // re-running the import is the retry path.
                        self.alert_kept(&file_name(&path), failed_parts).await;
                    }
                }
                Err(err) => {
                    tracing::warn!("conversion failed for {:?}: {}", path, err);
                    self.quarantine(&path, &err.to_string()).await;
                    report.quarantined += 1;
                }
            }
        }

        tracing::info!(
            "import finished: imported={} quarantined={} failed={}",
            report.imported,
            report.quarantined,
            report.failed
        );
        Ok(report)
    }

    fn scan(&self) -> Result<Vec<PathBuf>, PipelineError> {
        if !self.import_dir.exists() {
            return Ok(Vec::new());
        }

        let mut files: Vec<PathBuf> = std::fs::read_dir(&self.import_dir)
            .map_err(|err| PipelineError::Import {
                document: self.import_dir.display().to_string(),
                reason: err.to_string(),
            })?
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.path())
            .filter(|path| {
                path.is_file()
                    && path
                        .extension()
                        .and_then(|ext| ext.to_str())
                        .map(|ext| SUPPORTED_EXTENSIONS.contains(&ext.to_lowercase().as_str()))
                        .unwrap_or(false)
            })
            .collect();
        files.sort();
        Ok(files)
    }

    /// Extracts plain text from one file. PDF extraction is CPU-bound
    /// and runs off the async runtime.
    async fn convert(&self, path: &Path) -> Result<String, PipelineError> {
        let name = file_name(path);
        let extension = path
            .extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| ext.to_lowercase())
            .unwrap_or_default();

        let text = match extension.as_str() {
            "txt" | "md" => {
                tokio::fs::read_to_string(path)
                    .await
                    .map_err(|err| import_error(&name, err))?
            }
            "pdf" => {
                let owned = path.to_path_buf();
                let doc = name.clone();
                tokio::task::spawn_blocking(move || {
                    pdf_extract::extract_text(&owned).map_err(|err| import_error(&doc, err))
                })
                .await
                .map_err(|err| import_error(&name, err))??
            }
            other => {
                return Err(PipelineError::Import {
                    document: name,
                    reason: format!("unsupported extension '{}'", other),
                })
            }
        };

        if text.trim().is_empty() {
            return Err(PipelineError::Import {
                document: name,
                reason: "no extractable text".to_string(),
            });
        }
        Ok(text)
    }

    /// Stores and embeds every part of one converted document, submitting
    /// parts in batches so one provider call covers several parts.
    /// Returns the number of parts that failed embedding; those stay in
    /// the store with a clear embedding marker.
    async fn import_text(&self, path: &Path, text: &str, report: &mut ImportReport) -> usize {
        let stem = file_stem(path);
        let parts = pack_document(&stem, text, self.config.max_part_chars);
        let total = parts.len();

        let named: Vec<(String, DocumentPart)> = parts
            .into_iter()
            .enumerate()
            .map(|(index, part)| {
                let record_id = if total == 1 {
                    format!("doc_{}", stem)
                } else {
                    format!("doc_{}_part_{}", stem, index + 1)
                };
                (record_id, part)
            })
            .collect();

        let mut failed = 0usize;
        for batch in named.chunks(self.config.batch_size.max(1)) {
            match self.import_batch(batch).await {
                Ok(()) => report.imported += batch.len(),
                Err(err) => {
                    tracing::warn!("embedding failed for a batch of '{}': {}", stem, err);
                    report.failed += batch.len();
                    failed += batch.len();
                }
            }
        }
        failed
    }

    /// Stores one batch of parts, embeds all their segments in a single
    /// provider call, and advances the embedding markers only after the
    /// verified upsert.
    async fn import_batch(&self, batch: &[(String, DocumentPart)]) -> Result<(), PipelineError> {
        let mut records = Vec::with_capacity(batch.len());
        for (record_id, part) in batch {
            let record = self
                .store
                .insert_record(NewRecord {
                    id: record_id.clone(),
                    content: part.content.clone(),
                    sender: "system".to_string(),
                    channel: "documents".to_string(),
                    kind: "document".to_string(),
                    metadata: Some(json!({"title": part.title})),
                })
                .await?;
            records.push(record);
        }

        let mut segments = Vec::new();
        for record in &records {
            segments.extend(chunk_record(record, &self.chunker));
        }

        let texts: Vec<String> = segments.iter().map(|s| s.content.clone()).collect();
        let vectors = self.embedder.embed_batch(&texts).await?;
        if vectors.len() != segments.len() {
            return Err(PipelineError::Data(format!(
                "{} vectors for {} segments",
                vectors.len(),
                segments.len()
            )));
        }

        let embedded: Vec<EmbeddedSegment> = segments
            .into_iter()
            .zip(vectors)
            .map(|(segment, vector)| EmbeddedSegment { segment, vector })
            .collect();
        self.sync.upsert_verified(&embedded).await?;

        let now = now_rfc3339();
        for record in &records {
            self.store.mark_embedded(&record.id, &now).await?;
        }
        Ok(())
    }

    async fn alert_kept(&self, name: &str, failed_parts: usize) {
        if let Err(err) = self
            .store
            .insert_alert(
                AlertKind::Warning,
                &format!("document '{}' stored but not embedded", name),
                json!({"failedParts": failed_parts}),
                SERVICE,
            )
            .await
        {
            tracing::error!("failed to persist import alert: {}", err);
        }
    }

    /// Moves the file into quarantine next to a `<name>.error.txt`
    /// companion describing what went wrong.
    async fn quarantine(&self, path: &Path, reason: &str) {
        if let Err(err) = tokio::fs::create_dir_all(&self.quarantine_dir).await {
            tracing::error!("cannot create quarantine dir: {}", err);
            return;
        }

        let name = file_name(path);
        let target = self.quarantine_dir.join(&name);
        if let Err(err) = tokio::fs::rename(path, &target).await {
            tracing::error!("cannot quarantine {:?}: {}", path, err);
            return;
        }

        let note = self.quarantine_dir.join(format!("{}.error.txt", name));
        let body = format!("{}\nquarantined at {}\n", reason, now_rfc3339());
        if let Err(err) = tokio::fs::write(&note, body).await {
            tracing::error!("cannot write quarantine note {:?}: {}", note, err);
        }

        if let Err(err) = self
            .store
            .insert_alert(
                AlertKind::Warning,
                &format!("document '{}' quarantined", name),
                json!({"reason": reason}),
                SERVICE,
            )
            .await
        {
            tracing::error!("failed to persist quarantine alert: {}", err);
        }
    }
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("unknown")
        .to_string()
}

fn file_stem(path: &Path) -> String {
    path.file_stem()
        .and_then(|n| n.to_str())
        .unwrap_or("unknown")
        .to_string()
}

fn import_error(document: &str, err: impl std::fmt::Display) -> PipelineError {
    PipelineError::Import {
        document: document.to_string(),
        reason: err.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use crate::core::config::VectorConfig;
    use crate::vector::MemoryVectorIndex;
    use async_trait::async_trait;
    use tempfile::TempDir;

    struct FixedEmbedder;

    #[async_trait]
    impl Embedder for FixedEmbedder {
        async fn embed_batch(&self, inputs: &[String]) -> Result<Vec<Vec<f32>>, PipelineError> {
            Ok(inputs.iter().map(|_| vec![1.0, 0.0]).collect())
        }

        fn dimension(&self) -> usize {
            2
        }
    }

    struct DownEmbedder;

    #[async_trait]
    impl Embedder for DownEmbedder {
        async fn embed_batch(&self, _inputs: &[String]) -> Result<Vec<Vec<f32>>, PipelineError> {
            Err(PipelineError::embedding("provider is down", false))
        }

        fn dimension(&self) -> usize {
            2
        }
    }

    /// Counts provider calls; one call should cover a whole part batch.
    struct CountingEmbedder {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl Embedder for CountingEmbedder {
        async fn embed_batch(&self, inputs: &[String]) -> Result<Vec<Vec<f32>>, PipelineError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(inputs.iter().map(|_| vec![1.0, 0.0]).collect())
        }

        fn dimension(&self) -> usize {
            2
        }
    }

    async fn store_in(dir: &TempDir) -> SqliteStore {
        SqliteStore::with_path(dir.path().join("recall.db"))
            .await
            .unwrap()
    }

    fn importer_with(
        dir: &TempDir,
        store: SqliteStore,
        embedder: Arc<dyn Embedder>,
    ) -> DocumentImporter {
        let paths = AppPaths::under(dir.path().to_path_buf());

        let vector_config = VectorConfig {
            verify_base_delay_ms: 1,
            ..Default::default()
        };
        let sync = Arc::new(VectorSynchronizer::new(
            Arc::new(MemoryVectorIndex::new()),
            &vector_config,
        ));
        DocumentImporter::new(
            store,
            embedder,
            sync,
            ChunkerConfig::default(),
            ImporterConfig::default(),
            &paths,
        )
    }

    async fn importer_in(dir: &TempDir) -> (DocumentImporter, SqliteStore) {
        let store = store_in(dir).await;
        let importer = importer_with(dir, store.clone(), Arc::new(FixedEmbedder));
        (importer, store)
    }

    #[tokio::test]
    async fn imports_text_files_as_system_document_records() {
        let dir = TempDir::new().unwrap();
        let (importer, store) = importer_in(&dir).await;

        std::fs::write(importer.import_dir.join("notes.txt"), "Paris is lovely in spring.")
            .unwrap();

        let report = importer.run().await.unwrap();
        assert_eq!(report.imported, 1);
        assert_eq!(report.quarantined, 0);
        assert_eq!(report.failed, 0);

        let record = store.get_record("doc_notes").await.unwrap().unwrap();
        assert_eq!(record.sender, "system");
        assert_eq!(record.kind, "document");
        assert!(record.last_embedded_at.is_some());

        // Source file is consumed on success.
        assert!(!importer.import_dir.join("notes.txt").exists());
    }

    #[tokio::test]
    async fn malformed_file_is_quarantined_and_siblings_still_import() {
        let dir = TempDir::new().unwrap();
        let (importer, store) = importer_in(&dir).await;

        std::fs::write(importer.import_dir.join("good.md"), "# Fine document").unwrap();
        // Garbage bytes with a pdf extension fail extraction.
        std::fs::write(importer.import_dir.join("broken.pdf"), b"not a pdf at all").unwrap();

        let report = importer.run().await.unwrap();
        assert_eq!(report.imported, 1);
        assert_eq!(report.quarantined, 1);

        assert!(importer.quarantine_dir.join("broken.pdf").exists());
        assert!(importer.quarantine_dir.join("broken.pdf.error.txt").exists());
        assert!(!importer.import_dir.join("broken.pdf").exists());

        let alerts = store.list_alerts(true).await.unwrap();
        assert!(alerts
            .iter()
            .any(|a| a.kind == "warning" && a.message.contains("broken.pdf")));
    }

    #[tokio::test]
    async fn long_document_is_split_into_numbered_parts() {
        let dir = TempDir::new().unwrap();
        let (importer, store) = importer_in(&dir).await;

        let long = "A complete sentence sits here. ".repeat(400);
        std::fs::write(importer.import_dir.join("manual.txt"), &long).unwrap();

        let report = importer.run().await.unwrap();
        assert!(report.imported > 1);

        let first = store.get_record("doc_manual_part_1").await.unwrap().unwrap();
        assert!(first.content.len() <= ImporterConfig::default().max_part_chars);
        let title = first.metadata.unwrap()["title"].as_str().unwrap().to_string();
        assert!(title.contains("(part 1)"));
    }

    #[tokio::test]
    async fn empty_and_unsupported_files_are_handled() {
        let dir = TempDir::new().unwrap();
        let (importer, _store) = importer_in(&dir).await;

        std::fs::write(importer.import_dir.join("empty.txt"), "   ").unwrap();
        std::fs::write(importer.import_dir.join("image.png"), b"\x89PNG").unwrap();

        let report = importer.run().await.unwrap();
        assert_eq!(report.imported, 0);
        // The blank file quarantines; the png is not picked up at all.
        assert_eq!(report.quarantined, 1);
        assert!(importer.import_dir.join("image.png").exists());
    }

    #[tokio::test]
    async fn embedding_failure_keeps_source_for_a_later_run() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir).await;

        let failing = importer_with(&dir, store.clone(), Arc::new(DownEmbedder));
        std::fs::write(
            failing.import_dir.join("notes.txt"),
            "Paris is lovely in spring.",
        )
        .unwrap();

        let report = failing.run().await.unwrap();
        assert_eq!(report.failed, 1);
        assert_eq!(report.imported, 0);
        assert_eq!(report.quarantined, 0);

        // The source stays put and the failure is visible as an alert.
        assert!(failing.import_dir.join("notes.txt").exists());
        assert!(!failing.quarantine_dir.join("notes.txt").exists());
        let record = store.get_record("doc_notes").await.unwrap().unwrap();
        assert!(record.last_embedded_at.is_none());
        let alerts = store.list_alerts(true).await.unwrap();
        assert!(alerts
            .iter()
            .any(|a| a.kind == "warning" && a.message.contains("notes.txt")));

        // A later run with a healthy provider picks the file up again.
        let healthy = importer_with(&dir, store.clone(), Arc::new(FixedEmbedder));
        let retry = healthy.run().await.unwrap();
        assert_eq!(retry.imported, 1);
        assert_eq!(retry.failed, 0);
        assert!(!healthy.import_dir.join("notes.txt").exists());
        let record = store.get_record("doc_notes").await.unwrap().unwrap();
        assert!(record.last_embedded_at.is_some());
    }

    #[tokio::test]
    async fn parts_are_submitted_in_batches() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir).await;

        let embedder = Arc::new(CountingEmbedder {
            calls: AtomicUsize::new(0),
        });
        let importer = importer_with(&dir, store, embedder.clone());

        // Packs into 6 parts of ~4000 chars; with batch_size 5 that is
        // two provider calls.
        let long = "A complete sentence sits here. ".repeat(700);
        std::fs::write(importer.import_dir.join("manual.txt"), &long).unwrap();

        let report = importer.run().await.unwrap();
        assert_eq!(report.imported, 6);
        assert_eq!(report.failed, 0);
        assert_eq!(embedder.calls.load(Ordering::SeqCst), 2);
    }
}
