//! Typed configuration for the retrieval pipeline.
//!
//! Loaded from `config.yml` in the data directory (or the path named by
//! `RECALL_CONFIG_PATH`), with serde defaults for every section so a
//! missing or partial file still yields a runnable configuration.

mod paths;

pub use paths::AppPaths;

use std::env;
use std::fs;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub embedding: EmbeddingConfig,
    pub vector: VectorConfig,
    pub scheduler: SchedulerConfig,
    pub search: SearchConfig,
    pub importer: ImporterConfig,
    pub completion: Option<CompletionConfig>,
}

impl AppConfig {
    /// Reads the config file, falling back to defaults when absent.
    pub fn load(paths: &AppPaths) -> anyhow::Result<Self> {
        let path = config_path(paths);
        if !path.exists() {
            return Ok(AppConfig::default());
        }

        let contents = fs::read_to_string(&path)?;
        let config: AppConfig = serde_yaml::from_str(&contents)?;
        Ok(config)
    }
}

fn config_path(paths: &AppPaths) -> PathBuf {
    if let Ok(path) = env::var("RECALL_CONFIG_PATH") {
        return PathBuf::from(path);
    }
    paths.data_dir.join("config.yml")
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbeddingConfig {
    /// OpenAI-compatible base URL, e.g. `https://api.openai.com`.
    pub base_url: String,
    pub model: String,
    /// API key; the `RECALL_EMBEDDING_API_KEY` env var takes precedence.
    pub api_key: Option<String>,
    pub dimension: usize,
    /// Provider ceiling on texts per call.
    pub batch_size: usize,
    pub timeout_secs: u64,
    pub max_retries: u32,
    pub retry_base_delay_ms: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.openai.com".to_string(),
            model: "text-embedding-3-large".to_string(),
            api_key: None,
            dimension: 3072,
            batch_size: 512,
            timeout_secs: 60,
            max_retries: 5,
            retry_base_delay_ms: 500,
        }
    }
}

impl EmbeddingConfig {
    pub fn resolve_api_key(&self) -> Option<String> {
        env::var("RECALL_EMBEDDING_API_KEY")
            .ok()
            .filter(|key| !key.trim().is_empty())
            .or_else(|| self.api_key.clone())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VectorConfig {
    /// `memory` for the in-process index, `http` for a remote service.
    pub backend: String,
    pub base_url: String,
    pub api_key: Option<String>,
    pub upsert_batch_size: usize,
    pub verify_base_delay_ms: u64,
    pub verify_max_attempts: u32,
}

impl Default for VectorConfig {
    fn default() -> Self {
        Self {
            backend: "memory".to_string(),
            base_url: String::new(),
            api_key: None,
            upsert_batch_size: 100,
            verify_base_delay_ms: 2_000,
            verify_max_attempts: 5,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    pub interval_secs: u64,
    pub reembed_after_hours: i64,
    /// Runs longer than this raise a warning alert. Kept below the
    /// schedule interval so a flagged run cannot overlap the next tick.
    pub run_time_ceiling_secs: u64,
    pub batch_delay_ms: u64,
    pub max_records_per_run: usize,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            interval_secs: 300,
            reembed_after_hours: 24,
            run_time_ceiling_secs: 240,
            batch_delay_ms: 500,
            max_records_per_run: 500,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchConfig {
    pub top_k: usize,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self { top_k: 5 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ImporterConfig {
    pub max_part_chars: usize,
    /// Documents submitted to the embedding path per batch.
    pub batch_size: usize,
}

impl Default for ImporterConfig {
    fn default() -> Self {
        Self {
            max_part_chars: 4_000,
            batch_size: 5,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CompletionConfig {
    pub base_url: String,
    pub model: String,
    pub api_key: Option<String>,
    pub max_tokens: Option<u32>,
    pub temperature: Option<f32>,
}

impl Default for CompletionConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.openai.com".to_string(),
            model: "gpt-4o-mini".to_string(),
            api_key: None,
            max_tokens: Some(1024),
            temperature: Some(0.2),
        }
    }
}
