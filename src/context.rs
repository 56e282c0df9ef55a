//! Process-wide resources shared by every request.
//!
//! [`AppContext`] is built once at startup, handed to the HTTP handlers and
//! the CLI, and closed on shutdown. Nothing here is global.

use anyhow::{Context, Result};
use sqlx::SqlitePool;
use std::sync::Arc;

use crate::chat::OpenAiChat;
use crate::config::Config;
use crate::corpus::sqlite::SqliteCorpus;
use crate::corpus::CorpusStore;
use crate::db;
use crate::embedding::create_embedder;
use crate::semantic::{SemanticEngine, SemanticParams};
use crate::simplify::Simplifier;
use crate::vector_store::weaviate::WeaviateStore;

pub struct AppContext {
    pub config: Arc<Config>,
    pub corpus: Arc<dyn CorpusStore>,
    /// `None` when the embedding provider is disabled.
    pub semantic: Option<SemanticEngine>,
    pool: Option<SqlitePool>,
}

impl AppContext {
    /// Open the corpus pool and construct every configured collaborator.
    pub async fn build(config: &Config) -> Result<Self> {
        let pool = db::connect(&config.db).await?;
        let corpus: Arc<dyn CorpusStore> = Arc::new(SqliteCorpus::new(pool.clone(), &config.db));

        let semantic = if config.embedding.is_enabled() {
            let embedder = create_embedder(&config.embedding)
                .await
                .context("Failed to initialize embedding provider")?;
            let store = WeaviateStore::new(&config.vector)?;
            if !store.is_ready().await {
                tracing::warn!(url = %config.vector.url, "vector store is not ready yet");
            }
            let simplifier = match &config.chat {
                Some(chat) => Some(Arc::new(Simplifier::new(
                    Arc::new(OpenAiChat::new(chat)?),
                    config.search.max_clean_threshold,
                ))),
                None => None,
            };
            tracing::info!(
                model = embedder.model_name(),
                dims = embedder.dims(),
                simplifier = simplifier.is_some(),
                "semantic search enabled"
            );
            Some(SemanticEngine {
                embedder,
                store: Arc::new(store),
                simplifier,
            })
        } else {
            tracing::info!("embedding provider disabled; /vector_search will refuse requests");
            None
        };

        Ok(Self {
            config: Arc::new(config.clone()),
            corpus,
            semantic,
            pool: Some(pool),
        })
    }

    /// Assemble a context from ready-made collaborators.
    pub fn from_parts(
        config: Config,
        corpus: Arc<dyn CorpusStore>,
        semantic: Option<SemanticEngine>,
    ) -> Self {
        Self {
            config: Arc::new(config),
            corpus,
            semantic,
            pool: None,
        }
    }

    pub fn semantic_params(&self) -> SemanticParams {
        SemanticParams::from_config(&self.config)
    }

    /// Release pooled connections.
    pub async fn close(&self) {
        if let Some(pool) = &self.pool {
            pool.close().await;
        }
    }
}
