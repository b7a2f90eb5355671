//! Staleness-driven re-embedding scheduler.
//!
//! A fixed-interval job that finds records never embedded or embedded
//! too long ago, drives them through chunk → embed → verified upsert,
//! and records job health. One run at a time: a tick that finds a run
//! still active skips instead of queueing. Only records whose segments
//! verified get `last_embedded_at` advanced, so a failed run simply
//! retries on the next tick.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::core::config::SchedulerConfig;
use crate::core::errors::PipelineError;
use crate::pipeline::chunker::{chunk_record, ChunkerConfig};
use crate::pipeline::embedder::{EmbedStatus, Embedder};
use crate::pipeline::sync::VectorSynchronizer;
use crate::pipeline::EmbeddedSegment;
use crate::store::{hours_ago_rfc3339, now_rfc3339, AlertKind, Record, SqliteStore};
use crate::store::{JobHealth, CRITICAL_FAILURE_THRESHOLD};

pub const JOB_NAME: &str = "reembed";
const SERVICE: &str = "reembed-scheduler";
const SYSTEM_SENDER: &str = "system";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Completed,
    Skipped,
    Failed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunSummary {
    pub success: bool,
    pub messages_processed: usize,
    pub processing_time_ms: u64,
    pub status: RunStatus,
}

impl RunSummary {
    fn skipped() -> Self {
        Self {
            success: true,
            messages_processed: 0,
            processing_time_ms: 0,
            status: RunStatus::Skipped,
        }
    }
}

/// Releases the single-flight guard even when a run path returns early.
struct RunGuard<'a>(&'a AtomicBool);

impl Drop for RunGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

pub struct ReembedScheduler {
    store: SqliteStore,
    embedder: Arc<dyn Embedder>,
    sync: Arc<VectorSynchronizer>,
    chunker: ChunkerConfig,
    config: SchedulerConfig,
    running: AtomicBool,
}

impl ReembedScheduler {
    pub fn new(
        store: SqliteStore,
        embedder: Arc<dyn Embedder>,
        sync: Arc<VectorSynchronizer>,
        chunker: ChunkerConfig,
        config: SchedulerConfig,
    ) -> Self {
        Self {
            store,
            embedder,
            sync,
            chunker,
            config,
            running: AtomicBool::new(false),
        }
    }

    /// Ticks `run_once` on a fixed interval for the life of the process.
    pub fn spawn_interval_loop(self: Arc<Self>) -> tokio::task::JoinHandle<()> {
        let interval = Duration::from_secs(self.config.interval_secs.max(1));
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            // The first tick fires immediately; skip it so startup and
            // the first scheduled run do not race.
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let summary = self.run_once().await;
                tracing::info!(
                    "re-embedding tick finished: status={:?} processed={} elapsed={}ms",
                    summary.status,
                    summary.messages_processed,
                    summary.processing_time_ms
                );
            }
        })
    }

    /// Executes one full cycle. Never panics the caller: every failure
    /// path lands in the summary, the job-status row and the alert log.
    pub async fn run_once(&self) -> RunSummary {
        if self.running.swap(true, Ordering::SeqCst) {
            tracing::info!("re-embedding run still active, skipping tick");
            return RunSummary::skipped();
        }
        let _guard = RunGuard(&self.running);

        let started = Instant::now();
        let cutoff = hours_ago_rfc3339(self.config.reembed_after_hours);

        let records = match self
            .store
            .stale_records(&cutoff, SYSTEM_SENDER, self.config.max_records_per_run)
            .await
        {
            Ok(records) => records,
            Err(err) => {
                return self
                    .finish_failed_run(started, 0, &format!("stale-record query failed: {}", err))
                    .await;
            }
        };

        let mut status = EmbedStatus::start(records.len());
        let mut failed: Vec<(String, String)> = Vec::new();

        for (index, record) in records.iter().enumerate() {
            match self.process_record(record).await {
                Ok(()) => status.record_progress(1),
                Err(err) => {
                    // One bad record must not sink its siblings; collect
                    // and move on. It stays stale and retries next tick.
                    tracing::warn!("re-embedding failed for record {}: {}", record.id, err);
                    status.record_error(&err);
                    failed.push((record.id.clone(), err.to_string()));
                }
            }

            if index + 1 < records.len() && self.config.batch_delay_ms > 0 {
                tokio::time::sleep(Duration::from_millis(self.config.batch_delay_ms)).await;
            }
        }

        let elapsed_ms = started.elapsed().as_millis() as u64;
        let processed = status.processed_count;
        let success = failed.is_empty();

        if !success {
            let run_error = PipelineError::SchedulerRun {
                failed: failed.len(),
                total: records.len(),
            };
            self.alert(
                AlertKind::Error,
                &run_error.to_string(),
                json!({
                    "failedRecords": failed
                        .iter()
                        .map(|(id, reason)| json!({"id": id, "reason": reason}))
                        .collect::<Vec<_>>(),
                }),
            )
            .await;
        }

        self.finish_run(success, processed, elapsed_ms).await;

        RunSummary {
            success,
            messages_processed: processed,
            processing_time_ms: elapsed_ms,
            status: if success {
                RunStatus::Completed
            } else {
                RunStatus::Failed
            },
        }
    }

    /// Chunk → embed → verified upsert for one record. The staleness
    /// marker moves only after verification succeeds.
    async fn process_record(&self, record: &Record) -> Result<(), PipelineError> {
        let segments = chunk_record(record, &self.chunker);
        let texts: Vec<String> = segments.iter().map(|s| s.content.clone()).collect();

        let vectors = self.embedder.embed_batch(&texts).await?;
        if vectors.len() != segments.len() {
            return Err(PipelineError::Data(format!(
                "{} vectors for {} segments of record {}",
                vectors.len(),
                segments.len(),
                record.id
            )));
        }

        let embedded: Vec<EmbeddedSegment> = segments
            .into_iter()
            .zip(vectors)
            .map(|(segment, vector)| EmbeddedSegment { segment, vector })
            .collect();

        self.sync.upsert_verified(&embedded).await?;
        self.store.mark_embedded(&record.id, &now_rfc3339()).await?;
        Ok(())
    }

    async fn finish_failed_run(
        &self,
        started: Instant,
        processed: usize,
        reason: &str,
    ) -> RunSummary {
        let elapsed_ms = started.elapsed().as_millis() as u64;
        self.alert(
            AlertKind::Error,
            &format!("re-embedding run failed: {}", reason),
            json!({}),
        )
        .await;
        self.finish_run(false, processed, elapsed_ms).await;
        RunSummary {
            success: false,
            messages_processed: processed,
            processing_time_ms: elapsed_ms,
            status: RunStatus::Failed,
        }
    }

    /// Updates the job-status row and raises threshold alerts.
    async fn finish_run(&self, success: bool, processed: usize, elapsed_ms: u64) {
        let previous_failures = match self.store.job_status(JOB_NAME).await {
            Ok(status) => status.map(|s| s.consecutive_failures).unwrap_or(0),
            Err(err) => {
                tracing::error!("failed to read job status: {}", err);
                0
            }
        };

        match self
            .store
            .record_run(JOB_NAME, success, processed, elapsed_ms)
            .await
        {
            Ok(status) => {
                if status.health() == JobHealth::Critical
                    && previous_failures < CRITICAL_FAILURE_THRESHOLD
                {
                    self.alert(
                        AlertKind::Error,
                        "re-embedding job is critical after repeated failures",
                        json!({
                            "consecutiveFailures": status.consecutive_failures,
                            "threshold": CRITICAL_FAILURE_THRESHOLD,
                        }),
                    )
                    .await;
                }
            }
            Err(err) => tracing::error!("failed to update job status: {}", err),
        }

        let ceiling_ms = self.config.run_time_ceiling_secs * 1_000;
        if elapsed_ms > ceiling_ms {
            self.alert(
                AlertKind::Warning,
                "re-embedding run exceeded its time ceiling",
                json!({
                    "elapsedMs": elapsed_ms,
                    "ceilingMs": ceiling_ms,
                }),
            )
            .await;
        }
    }

    async fn alert(&self, kind: AlertKind, message: &str, details: serde_json::Value) {
        if let Err(err) = self
            .store
            .insert_alert(kind, message, details, SERVICE)
            .await
        {
            tracing::error!("failed to persist alert '{}': {}", message, err);
        }
    }
}
