//! Wiring of the concrete backends into the core services.
//!
//! Every command that touches documents opens a [`Services`]: one SQLite
//! pool, the filesystem blob store, the extractor and the configured
//! embedding provider, shared by the evaluator and the indexer.

use std::sync::Arc;

use anyhow::Result;
use docsim_core::batch::EmbeddingBatcher;
use docsim_core::embedding::EmbeddingProvider;
use docsim_core::indexing::DocumentIndexer;
use docsim_core::lifecycle::DocumentLifecycle;
use docsim_core::similarity::{SimilarityEvaluator, SimilarityOptions};
use docsim_core::store::Backends;
use sqlx::SqlitePool;

use crate::blob::FsBlobStore;
use crate::config::Config;
use crate::db;
use crate::embedding;
use crate::extract::ContentExtractor;
use crate::migrate;
use crate::sqlite_store::SqliteStore;

pub struct Services {
    pub config: Config,
    pub pool: SqlitePool,
    pub store: Arc<SqliteStore>,
    pub blobs: Arc<FsBlobStore>,
    pub lifecycle: DocumentLifecycle,
    pub extractor: Arc<ContentExtractor>,
    pub evaluator: SimilarityEvaluator,
    pub indexer: DocumentIndexer,
    embeddings_enabled: bool,
}

impl Services {
    /// Connect, migrate and build services with the configured provider.
    pub async fn open(config: &Config) -> Result<Self> {
        let provider = embedding::create_provider(&config.embedding)?;
        let pool = db::connect(config).await?;
        migrate::run_migrations(&pool).await?;
        Ok(Self::assemble(
            config.clone(),
            pool,
            provider,
            config.embedding.is_enabled(),
        ))
    }

    /// Build services over an existing (migrated) pool with a given provider.
    pub fn assemble(
        config: Config,
        pool: SqlitePool,
        provider: Arc<dyn EmbeddingProvider>,
        embeddings_enabled: bool,
    ) -> Self {
        let store = Arc::new(SqliteStore::new(pool.clone()));
        let blobs = Arc::new(FsBlobStore::new(config.storage.root.clone()));
        let backends = Backends::from_store(store.clone(), blobs.clone());
        let lifecycle = DocumentLifecycle::new(backends, config.storage.deleted_prefix.clone());

        let batcher = Arc::new(EmbeddingBatcher::new(
            provider,
            config.embedding.batcher_config(),
        ));
        let extractor = Arc::new(ContentExtractor::new());

        let evaluator = SimilarityEvaluator::new(
            lifecycle.clone(),
            extractor.clone(),
            batcher.clone(),
            config.chunking.clone(),
        );
        let indexer = DocumentIndexer::new(lifecycle.clone(), batcher, config.chunking.clone());

        Self {
            config,
            pool,
            store,
            blobs,
            lifecycle,
            extractor,
            evaluator,
            indexer,
            embeddings_enabled,
        }
    }

    pub fn embeddings_enabled(&self) -> bool {
        self.embeddings_enabled
    }

    /// Configured similarity options, with the vector check switched off
    /// when no provider is configured.
    pub fn similarity_options(&self) -> SimilarityOptions {
        let mut options = self.config.similarity.clone();
        if !self.embeddings_enabled {
            options.skip_embeddings = true;
        }
        options
    }

    pub async fn close(self) {
        self.pool.close().await;
    }
}
