//! Explicit application context
//!
//! Everything a command needs is built once from `Settings` and passed
//! down; nothing lives in globals.

use crate::analysis::ConsensusAnalyzer;
use crate::config::{ApiKeys, Settings};
use crate::core::llm::providers_from_keys;
use crate::core::similarity::SimilarityScorer;
use crate::pipeline::PageProcessor;
use crate::shared_data::SharedDataManager;
use crate::storage::{CrawlStateStore, JsonStateStore, SharedDataStore, SqliteStore};
use anyhow::{Context as _, Result};
use std::sync::Arc;

pub struct AppContext {
    pub settings: Settings,
    pub analyzer: Arc<ConsensusAnalyzer>,
    pub shared: Arc<SharedDataManager>,
    pub state_store: Arc<dyn CrawlStateStore>,
}

impl AppContext {
    /// Wire the context from explicit parts; used by tests and embedders
    pub fn from_parts(
        settings: Settings,
        analyzer: ConsensusAnalyzer,
        store: Arc<dyn SharedDataStore>,
        state_store: Arc<dyn CrawlStateStore>,
    ) -> Self {
        let scorer = SimilarityScorer::new(settings.matching.threshold);
        Self {
            settings,
            analyzer: Arc::new(analyzer),
            shared: Arc::new(SharedDataManager::new(store, scorer)),
            state_store,
        }
    }

    /// SQLite store, JSON crawl state and one provider per API key
    pub async fn init(settings: Settings, keys: &ApiKeys) -> Result<Self> {
        if keys.is_empty() {
            tracing::warn!(
                "No provider API keys set (OPENAI_API_KEY, ANTHROPIC_API_KEY, GEMINI_API_KEY); \
                 field analysis will use fallbacks"
            );
        }
        let analyzer = ConsensusAnalyzer::new(providers_from_keys(keys, &settings.providers));

        let store = SqliteStore::open(&settings.storage.database_path).with_context(|| {
            format!("Failed to open database {:?}", settings.storage.database_path)
        })?;
        let state_store = JsonStateStore::new(settings.storage.state_dir.clone())
            .await
            .context("Failed to prepare crawl state directory")?;

        tracing::info!(
            "Context ready: providers={:?}, database={:?}",
            analyzer.provider_names(),
            settings.storage.database_path
        );

        Ok(Self::from_parts(
            settings,
            analyzer,
            Arc::new(store),
            Arc::new(state_store),
        ))
    }

    pub async fn page_processor(&self) -> Result<PageProcessor> {
        PageProcessor::new(
            Arc::clone(&self.analyzer),
            Arc::clone(&self.shared),
            Arc::clone(&self.state_store),
        )
        .await
    }
}
