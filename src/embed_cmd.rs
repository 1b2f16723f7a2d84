//! `docsim embed pending`: backfill embeddings for stored chunks.
//!
//! Chunks end up without a vector when a document was stored while the
//! provider was disabled or failing.

use anyhow::{bail, Result};
use docsim_core::indexing::EmbedPendingReport;
use docsim_core::store::DocumentRepository;

use crate::config::Config;
use crate::services::Services;

/// Totals over every document processed by one run.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PendingTotals {
    pub documents: usize,
    pub attempted: usize,
    pub embedded: usize,
    pub failed: usize,
    pub tokens_used: u64,
}

impl PendingTotals {
    fn add(&mut self, report: &EmbedPendingReport) {
        if report.attempted > 0 {
            self.documents += 1;
        }
        self.attempted += report.attempted;
        self.embedded += report.embedded;
        self.failed += report.failed;
        self.tokens_used += report.tokens_used;
    }
}

/// Embed pending chunks of one document, or of every non-deleted document.
pub async fn embed_pending(services: &Services, id: Option<&str>) -> Result<PendingTotals> {
    if !services.embeddings_enabled() {
        bail!("Embedding provider is disabled. Set [embedding] provider in config.");
    }

    let ids: Vec<String> = match id {
        Some(id) => vec![id.to_string()],
        None => services
            .store
            .list(None)
            .await?
            .into_iter()
            .filter(|d| !d.status.is_deleted())
            .map(|d| d.id)
            .collect(),
    };

    let mut totals = PendingTotals::default();
    for doc_id in &ids {
        let report = services.indexer.embed_pending(doc_id).await?;
        totals.add(&report);
    }
    Ok(totals)
}

pub async fn run_embed_pending(config: &Config, id: Option<&str>) -> Result<()> {
    let services = Services::open(config).await?;
    let result = embed_pending(&services, id).await;
    services.close().await;
    let totals = result?;

    println!("embed pending");
    if totals.attempted == 0 {
        println!("  all chunks up to date");
        return Ok(());
    }
    println!("  documents: {}", totals.documents);
    println!("  total pending: {}", totals.attempted);
    println!("  embedded: {}", totals.embedded);
    println!("  failed: {}", totals.failed);
    println!("  tokens: {}", totals.tokens_used);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use docsim_core::embedding::{
        EmbeddingError, EmbeddingProvider, IndexedEmbedding, ProviderEmbeddings,
    };
    use docsim_core::store::ChunkRepository;
    use std::sync::Arc;
    use tempfile::TempDir;

    use crate::ingest::{submit_file, SubmitAction, SubmitOptions};

    struct ConstantProvider;

    #[async_trait]
    impl EmbeddingProvider for ConstantProvider {
        fn model_name(&self) -> &str {
            "constant"
        }
        fn dims(&self) -> usize {
            3
        }
        async fn embed(&self, texts: &[String]) -> Result<ProviderEmbeddings, EmbeddingError> {
            Ok(ProviderEmbeddings {
                embeddings: (0..texts.len())
                    .map(|index| IndexedEmbedding {
                        index,
                        vector: vec![1.0, 0.0, 0.0],
                    })
                    .collect(),
                tokens_used: texts.len() as u64,
            })
        }
    }

    fn config(tmp: &TempDir) -> Config {
        let toml_text = format!(
            "[db]\npath = \"{}\"\n[storage]\nroot = \"{}\"\n[embedding]\ninter_batch_delay_ms = 0\n",
            tmp.path().join("db.sqlite").display(),
            tmp.path().join("files").display()
        );
        toml::from_str(&toml_text).unwrap()
    }

    #[tokio::test]
    async fn test_backfills_chunks_stored_without_vectors() {
        let tmp = TempDir::new().unwrap();
        let cfg = config(&tmp);
        let pool = crate::db::connect(&cfg).await.unwrap();
        crate::migrate::run_migrations(&pool).await.unwrap();

        // Store while the provider is off.
        let offline = Services::assemble(
            cfg.clone(),
            pool.clone(),
            Arc::new(crate::embedding::DisabledProvider),
            false,
        );
        let path = tmp.path().join("a.txt");
        std::fs::write(
            &path,
            "A paragraph that is long enough to become a chunk of its own here.",
        )
        .unwrap();
        let id = match submit_file(&offline, &path, &SubmitOptions::default())
            .await
            .unwrap()
            .action
        {
            SubmitAction::Stored { document_id, .. } => document_id,
            other => panic!("expected stored, got {:?}", other),
        };
        assert!(embed_pending(&offline, None).await.is_err());

        let online = Services::assemble(cfg, pool, Arc::new(ConstantProvider), true);
        let totals = embed_pending(&online, None).await.unwrap();
        assert_eq!(totals.documents, 1);
        assert_eq!(totals.embedded, 1);
        assert_eq!(totals.failed, 0);

        let chunks = online.store.find_by_document_id(&id).await.unwrap();
        assert!(chunks.iter().all(|c| c.embedding.is_some()));

        let again = embed_pending(&online, Some(&id)).await.unwrap();
        assert_eq!(again.attempted, 0);
    }
}
