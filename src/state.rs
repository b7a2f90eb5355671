//! Application state.
//!
//! Everything the handlers and background jobs share. Built once at
//! startup with explicit, awaited initialization so a broken database or
//! misconfigured backend fails the process instead of limping along.

use std::sync::Arc;

use crate::core::config::{AppConfig, AppPaths};
use crate::core::security::{init_api_token, ApiToken};
use crate::importer::DocumentImporter;
use crate::pipeline::chunker::ChunkerConfig;
use crate::pipeline::completion::CompletionClient;
use crate::pipeline::embedder::{Embedder, HttpEmbedder};
use crate::pipeline::search::SearchEngine;
use crate::pipeline::sync::VectorSynchronizer;
use crate::scheduler::ReembedScheduler;
use crate::store::SqliteStore;
use crate::vector::{HttpVectorIndex, MemoryVectorIndex, VectorIndex};

pub struct AppState {
    pub paths: AppPaths,
    pub config: AppConfig,
    pub api_token: ApiToken,
    pub store: SqliteStore,
    pub embedder: Arc<dyn Embedder>,
    pub index: Arc<dyn VectorIndex>,
    pub synchronizer: Arc<VectorSynchronizer>,
    pub search: Arc<SearchEngine>,
    pub scheduler: Arc<ReembedScheduler>,
    pub importer: Arc<DocumentImporter>,
    pub completion: Option<Arc<CompletionClient>>,
}

impl AppState {
    pub async fn initialize() -> anyhow::Result<Arc<Self>> {
        let paths = AppPaths::new();
        let config = AppConfig::load(&paths)?;
        let api_token = init_api_token(&paths);

        let store = SqliteStore::new(&paths).await?;

        let embedder: Arc<dyn Embedder> = Arc::new(HttpEmbedder::new(&config.embedding)?);

        let index: Arc<dyn VectorIndex> = match config.vector.backend.as_str() {
            "http" => Arc::new(HttpVectorIndex::new(
                &config.vector.base_url,
                config.vector.api_key.as_deref(),
            )?),
            "memory" => Arc::new(MemoryVectorIndex::new()),
            other => anyhow::bail!("unknown vector backend '{}'", other),
        };

        let synchronizer = Arc::new(VectorSynchronizer::new(index.clone(), &config.vector));

        let search = Arc::new(SearchEngine::new(
            embedder.clone(),
            index.clone(),
            config.search.top_k,
        ));

        let chunker = ChunkerConfig::default();
        let scheduler = Arc::new(ReembedScheduler::new(
            store.clone(),
            embedder.clone(),
            synchronizer.clone(),
            chunker.clone(),
            config.scheduler.clone(),
        ));

        let importer = Arc::new(DocumentImporter::new(
            store.clone(),
            embedder.clone(),
            synchronizer.clone(),
            chunker,
            config.importer.clone(),
            &paths,
        ));

        let completion = match &config.completion {
            Some(completion_config) => Some(Arc::new(CompletionClient::new(completion_config)?)),
            None => None,
        };

        Ok(Arc::new(Self {
            paths,
            config,
            api_token,
            store,
            embedder,
            index,
            synchronizer,
            search,
            scheduler,
            importer,
            completion,
        }))
    }
}
