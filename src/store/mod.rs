//! Source-of-truth store.
//!
//! SQLite tables for records, per-job status rows and append-only alerts.
//! The pipeline reads records and writes back exactly one field,
//! `last_embedded_at`; job status and alerts are owned by the scheduler.

use std::path::PathBuf;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

use crate::core::config::AppPaths;
use crate::core::errors::PipelineError;

/// Consecutive failures at or past this count flip a job to critical.
pub const CRITICAL_FAILURE_THRESHOLD: i64 = 3;

/// RFC3339 UTC with millisecond precision; lexicographic order matches
/// chronological order, which the staleness predicate relies on.
pub fn now_rfc3339() -> String {
    format_rfc3339(Utc::now())
}

pub fn format_rfc3339(at: DateTime<Utc>) -> String {
    at.format("%Y-%m-%dT%H:%M:%S%.3fZ").to_string()
}

pub fn hours_ago_rfc3339(hours: i64) -> String {
    format_rfc3339(Utc::now() - Duration::hours(hours))
}

/// A unit of retrievable text: a chat message or an imported document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Record {
    pub id: String,
    pub content: String,
    pub sender: String,
    pub channel: String,
    pub kind: String,
    pub metadata: Option<Value>,
    pub created_at: String,
    pub last_embedded_at: Option<String>,
}

#[derive(Debug, Clone)]
pub struct NewRecord {
    pub id: String,
    pub content: String,
    pub sender: String,
    pub channel: String,
    pub kind: String,
    pub metadata: Option<Value>,
}

impl NewRecord {
    pub fn message(content: &str, sender: &str, channel: &str) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            content: content.to_string(),
            sender: sender.to_string(),
            channel: channel.to_string(),
            kind: "message".to_string(),
            metadata: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobHealth {
    Healthy,
    Warning,
    Critical,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobStatus {
    pub job_name: String,
    pub last_run_time: Option<String>,
    pub last_run_status: String,
    pub consecutive_failures: i64,
    pub last_processed_count: i64,
    pub avg_processing_time_ms: f64,
}

impl JobStatus {
    pub fn health(&self) -> JobHealth {
        if self.consecutive_failures >= CRITICAL_FAILURE_THRESHOLD {
            JobHealth::Critical
        } else if self.consecutive_failures > 0 {
            JobHealth::Warning
        } else {
            JobHealth::Healthy
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertKind {
    Error,
    Warning,
    Info,
}

impl AlertKind {
    fn as_str(&self) -> &'static str {
        match self {
            AlertKind::Error => "error",
            AlertKind::Warning => "warning",
            AlertKind::Info => "info",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Alert {
    pub id: String,
    pub kind: String,
    pub message: String,
    pub details: Value,
    pub service: String,
    pub created_at: String,
    pub acknowledged: bool,
    pub acknowledged_at: Option<String>,
}

#[derive(Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    pub async fn new(paths: &AppPaths) -> Result<Self, PipelineError> {
        Self::with_path(paths.db_path.clone()).await
    }

    pub async fn with_path(db_path: PathBuf) -> Result<Self, PipelineError> {
        let options = SqliteConnectOptions::new()
            .filename(&db_path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .foreign_keys(true);

        let pool = SqlitePoolOptions::new()
            .min_connections(1)
            .max_connections(4)
            .connect_with(options)
            .await
            .map_err(PipelineError::store)?;

        let store = Self { pool };
        store.init_schema().await?;
        Ok(store)
    }

    async fn init_schema(&self) -> Result<(), PipelineError> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS records (
                id TEXT PRIMARY KEY,
                content TEXT NOT NULL,
                sender TEXT NOT NULL DEFAULT '',
                channel TEXT NOT NULL DEFAULT '',
                kind TEXT NOT NULL DEFAULT 'message',
                metadata TEXT NOT NULL DEFAULT '{}',
                created_at TEXT NOT NULL DEFAULT (STRFTIME('%Y-%m-%dT%H:%M:%fZ', 'now')),
                last_embedded_at TEXT
            )",
        )
        .execute(&self.pool)
        .await
        .map_err(PipelineError::store)?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_records_embedded ON records(last_embedded_at)",
        )
        .execute(&self.pool)
        .await
        .map_err(PipelineError::store)?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS job_status (
                job_name TEXT PRIMARY KEY,
                last_run_time TEXT,
                last_run_status TEXT NOT NULL DEFAULT 'success',
                consecutive_failures INTEGER NOT NULL DEFAULT 0,
                last_processed_count INTEGER NOT NULL DEFAULT 0,
                avg_processing_time_ms REAL NOT NULL DEFAULT 0
            )",
        )
        .execute(&self.pool)
        .await
        .map_err(PipelineError::store)?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS alerts (
                id TEXT PRIMARY KEY,
                kind TEXT NOT NULL,
                message TEXT NOT NULL,
                details TEXT NOT NULL DEFAULT '{}',
                service TEXT NOT NULL,
                created_at TEXT NOT NULL DEFAULT (STRFTIME('%Y-%m-%dT%H:%M:%fZ', 'now')),
                acknowledged INTEGER NOT NULL DEFAULT 0,
                acknowledged_at TEXT
            )",
        )
        .execute(&self.pool)
        .await
        .map_err(PipelineError::store)?;

        Ok(())
    }

    fn row_to_record(row: &sqlx::sqlite::SqliteRow) -> Record {
        let metadata_str: String = row.get("metadata");
        let metadata = serde_json::from_str::<Value>(&metadata_str).ok();

        Record {
            id: row.get("id"),
            content: row.get("content"),
            sender: row.get("sender"),
            channel: row.get("channel"),
            kind: row.get("kind"),
            metadata,
            created_at: row.get("created_at"),
            last_embedded_at: row.get("last_embedded_at"),
        }
    }

    pub async fn insert_record(&self, record: NewRecord) -> Result<Record, PipelineError> {
        let metadata_str = record
            .metadata
            .as_ref()
            .map(|m| serde_json::to_string(m).unwrap_or_default())
            .unwrap_or_else(|| "{}".to_string());

        sqlx::query(
            "INSERT OR REPLACE INTO records (id, content, sender, channel, kind, metadata, last_embedded_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, NULL)",
        )
        .bind(&record.id)
        .bind(&record.content)
        .bind(&record.sender)
        .bind(&record.channel)
        .bind(&record.kind)
        .bind(&metadata_str)
        .execute(&self.pool)
        .await
        .map_err(PipelineError::store)?;

        self.get_record(&record.id)
            .await?
            .ok_or_else(|| PipelineError::Store("inserted record not found".to_string()))
    }

    pub async fn get_record(&self, id: &str) -> Result<Option<Record>, PipelineError> {
        let row = sqlx::query("SELECT * FROM records WHERE id = ?1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(PipelineError::store)?;

        Ok(row.as_ref().map(Self::row_to_record))
    }

    /// Records never embedded, or embedded before `cutoff`. System-authored
    /// records are the importer's own and are excluded from re-embedding.
    pub async fn stale_records(
        &self,
        cutoff: &str,
        exclude_sender: &str,
        limit: usize,
    ) -> Result<Vec<Record>, PipelineError> {
        let rows = sqlx::query(
            "SELECT * FROM records
             WHERE (last_embedded_at IS NULL OR last_embedded_at < ?1)
               AND sender != ?2
             ORDER BY created_at ASC
             LIMIT ?3",
        )
        .bind(cutoff)
        .bind(exclude_sender)
        .bind(limit.max(1) as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(PipelineError::store)?;

        Ok(rows.iter().map(Self::row_to_record).collect())
    }

    pub async fn mark_embedded(&self, id: &str, at: &str) -> Result<(), PipelineError> {
        sqlx::query("UPDATE records SET last_embedded_at = ?1 WHERE id = ?2")
            .bind(at)
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(PipelineError::store)?;
        Ok(())
    }

    pub async fn job_status(&self, job_name: &str) -> Result<Option<JobStatus>, PipelineError> {
        let row = sqlx::query("SELECT * FROM job_status WHERE job_name = ?1")
            .bind(job_name)
            .fetch_optional(&self.pool)
            .await
            .map_err(PipelineError::store)?;

        Ok(row.map(|row| JobStatus {
            job_name: row.get("job_name"),
            last_run_time: row.get("last_run_time"),
            last_run_status: row.get("last_run_status"),
            consecutive_failures: row.get("consecutive_failures"),
            last_processed_count: row.get("last_processed_count"),
            avg_processing_time_ms: row.get("avg_processing_time_ms"),
        }))
    }

    /// Folds one run into the job's status row: failure streak, last
    /// outcome, and the 0.2/0.8 moving average of processing time.
    /// Returns the updated row. Safe as read-then-write because the
    /// single-flight guard allows only one run at a time.
    pub async fn record_run(
        &self,
        job_name: &str,
        success: bool,
        processed: usize,
        duration_ms: u64,
    ) -> Result<JobStatus, PipelineError> {
        let previous = self.job_status(job_name).await?;

        let consecutive_failures = if success {
            0
        } else {
            previous
                .as_ref()
                .map(|status| status.consecutive_failures + 1)
                .unwrap_or(1)
        };

        let avg = match previous.as_ref() {
            Some(status) if status.avg_processing_time_ms > 0.0 => {
                0.2 * duration_ms as f64 + 0.8 * status.avg_processing_time_ms
            }
            _ => duration_ms as f64,
        };

        let status = JobStatus {
            job_name: job_name.to_string(),
            last_run_time: Some(now_rfc3339()),
            last_run_status: if success { "success" } else { "failed" }.to_string(),
            consecutive_failures,
            last_processed_count: processed as i64,
            avg_processing_time_ms: avg,
        };

        sqlx::query(
            "INSERT OR REPLACE INTO job_status
             (job_name, last_run_time, last_run_status, consecutive_failures, last_processed_count, avg_processing_time_ms)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        )
        .bind(&status.job_name)
        .bind(&status.last_run_time)
        .bind(&status.last_run_status)
        .bind(status.consecutive_failures)
        .bind(status.last_processed_count)
        .bind(status.avg_processing_time_ms)
        .execute(&self.pool)
        .await
        .map_err(PipelineError::store)?;

        Ok(status)
    }

    pub async fn insert_alert(
        &self,
        kind: AlertKind,
        message: &str,
        details: Value,
        service: &str,
    ) -> Result<Alert, PipelineError> {
        let id = Uuid::new_v4().to_string();
        let details_str = serde_json::to_string(&details).unwrap_or_else(|_| "{}".to_string());

        sqlx::query(
            "INSERT INTO alerts (id, kind, message, details, service)
             VALUES (?1, ?2, ?3, ?4, ?5)",
        )
        .bind(&id)
        .bind(kind.as_str())
        .bind(message)
        .bind(&details_str)
        .bind(service)
        .execute(&self.pool)
        .await
        .map_err(PipelineError::store)?;

        tracing::warn!("alert [{}/{}]: {}", service, kind.as_str(), message);

        let row = sqlx::query("SELECT * FROM alerts WHERE id = ?1")
            .bind(&id)
            .fetch_one(&self.pool)
            .await
            .map_err(PipelineError::store)?;

        Ok(Self::row_to_alert(&row))
    }

    fn row_to_alert(row: &sqlx::sqlite::SqliteRow) -> Alert {
        let details_str: String = row.get("details");
        let acknowledged: i64 = row.get("acknowledged");
        Alert {
            id: row.get("id"),
            kind: row.get("kind"),
            message: row.get("message"),
            details: serde_json::from_str(&details_str).unwrap_or(Value::Null),
            service: row.get("service"),
            created_at: row.get("created_at"),
            acknowledged: acknowledged != 0,
            acknowledged_at: row.get("acknowledged_at"),
        }
    }

    pub async fn list_alerts(&self, unacknowledged_only: bool) -> Result<Vec<Alert>, PipelineError> {
        let rows = if unacknowledged_only {
            sqlx::query("SELECT * FROM alerts WHERE acknowledged = 0 ORDER BY created_at DESC")
                .fetch_all(&self.pool)
                .await
        } else {
            sqlx::query("SELECT * FROM alerts ORDER BY created_at DESC")
                .fetch_all(&self.pool)
                .await
        }
        .map_err(PipelineError::store)?;

        Ok(rows.iter().map(Self::row_to_alert).collect())
    }

    pub async fn acknowledge_alert(&self, id: &str) -> Result<bool, PipelineError> {
        let result = sqlx::query(
            "UPDATE alerts SET acknowledged = 1, acknowledged_at = ?1 WHERE id = ?2 AND acknowledged = 0",
        )
        .bind(now_rfc3339())
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(PipelineError::store)?;

        Ok(result.rows_affected() > 0)
    }
}
