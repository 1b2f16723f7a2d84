//! Persisting chunks and embeddings for a document.
//!
//! [`DocumentIndexer::index_document`] is the write side of the pipeline.
//! It claims the document through the lifecycle gate (`→ Processing`),
//! replaces any previous chunks, stores the new chunks together with
//! whatever embeddings are available, attaches the text hash and finishes
//! with `→ Processed`. Any failure after the claim leaves the document in
//! `Error`.
//!
//! Chunks whose embedding failed are stored without a vector and can be
//! filled in later by [`DocumentIndexer::embed_pending`].

use std::sync::Arc;

use serde::Serialize;
use tracing::{info, warn};

use crate::batch::EmbeddingBatcher;
use crate::chunk::{to_document_chunks, ChunkStats, ChunkerConfig};
use crate::error::{DocsimError, Result, Step, StepContext};
use crate::hash;
use crate::lifecycle::DocumentLifecycle;
use crate::models::SimilarityCandidate;
use crate::similarity::{find_candidates, prepare_chunks, PreparedChunks, SimilarityOptions};
use crate::store::Backends;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IndexReport {
    pub document_id: String,
    pub chunk_count: usize,
    pub embedded: usize,
    /// Chunks stored without a vector.
    pub pending: usize,
    pub tokens_used: u64,
    pub stats: ChunkStats,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct EmbedPendingReport {
    pub document_id: String,
    pub attempted: usize,
    pub embedded: usize,
    pub failed: usize,
    pub tokens_used: u64,
}

pub struct DocumentIndexer {
    lifecycle: DocumentLifecycle,
    batcher: Arc<EmbeddingBatcher>,
    chunker: ChunkerConfig,
}

impl DocumentIndexer {
    pub fn new(
        lifecycle: DocumentLifecycle,
        batcher: Arc<EmbeddingBatcher>,
        chunker: ChunkerConfig,
    ) -> Self {
        Self {
            lifecycle,
            batcher,
            chunker,
        }
    }

    fn backends(&self) -> &Backends {
        self.lifecycle.backends()
    }

    /// Chunk, embed and store `text` as the content of `document_id`.
    ///
    /// Pass `prepared` when the evaluator already chunked and embedded the
    /// same text; it is used as-is instead of calling the provider again.
    pub async fn index_document(
        &self,
        document_id: &str,
        text: &str,
        prepared: Option<PreparedChunks>,
    ) -> Result<IndexReport> {
        self.lifecycle.begin_processing(document_id).await?;

        match self.write_chunks(document_id, text, prepared).await {
            Ok(report) => {
                self.lifecycle.mark_processed(document_id).await?;
                info!(
                    document_id,
                    chunks = report.chunk_count,
                    embedded = report.embedded,
                    pending = report.pending,
                    "document indexed"
                );
                Ok(report)
            }
            Err(e) => {
                warn!(document_id, err = %e, "indexing failed");
                if let Err(mark) = self.lifecycle.mark_error(document_id).await {
                    warn!(document_id, err = %mark, "could not mark document as errored");
                }
                Err(e)
            }
        }
    }

    async fn write_chunks(
        &self,
        document_id: &str,
        text: &str,
        prepared: Option<PreparedChunks>,
    ) -> Result<IndexReport> {
        let prepared = match prepared {
            Some(p) => p,
            None => prepare_chunks(text, &self.chunker, &self.batcher).await?,
        };
        if prepared.embeddings.len() != prepared.chunks.len() {
            return Err(DocsimError::Validation(format!(
                "{} embeddings supplied for {} chunks",
                prepared.embeddings.len(),
                prepared.chunks.len()
            )));
        }

        let backends = self.backends();
        backends
            .documents
            .associate_hashes(document_id, &hash::text_fingerprint(text), Some(text))
            .await
            .step(Step::Store)?;

        let mut chunks = to_document_chunks(document_id, &prepared.chunks);
        for (chunk, vector) in chunks.iter_mut().zip(prepared.embeddings) {
            chunk.embedding = vector;
        }
        let embedded = chunks.iter().filter(|c| c.embedding.is_some()).count();

        backends
            .chunks
            .delete_by_document_id(document_id)
            .await
            .step(Step::Store)?;
        backends
            .chunks
            .save_many(&chunks)
            .await
            .step(Step::Store)?;

        Ok(IndexReport {
            document_id: document_id.to_string(),
            chunk_count: chunks.len(),
            embedded,
            pending: chunks.len() - embedded,
            tokens_used: prepared.tokens_used,
            stats: prepared.stats,
        })
    }

    /// Embed the active chunks of `document_id` that have no vector yet.
    pub async fn embed_pending(&self, document_id: &str) -> Result<EmbedPendingReport> {
        let doc = self.lifecycle.load(document_id).await?;
        if doc.status.is_deleted() {
            return Err(DocsimError::NotFound(format!(
                "document {} is deleted",
                document_id
            )));
        }

        let backends = self.backends();
        let pending: Vec<_> = backends
            .chunks
            .find_by_document_id(document_id)
            .await
            .step(Step::Store)?
            .into_iter()
            .filter(|c| c.is_active && c.embedding.is_none())
            .collect();

        let mut report = EmbedPendingReport {
            document_id: document_id.to_string(),
            attempted: pending.len(),
            ..EmbedPendingReport::default()
        };
        if pending.is_empty() {
            return Ok(report);
        }

        let mut updates = Vec::new();
        let per_call = self.batcher.config().max_texts.max(1);
        for group in pending.chunks(per_call) {
            let texts: Vec<String> = group.iter().map(|c| c.content.clone()).collect();
            let result = self.batcher.embed_all(&texts).await?;
            report.tokens_used += result.total_tokens_used;
            report.failed += result.failed_count;
            for (chunk, vector) in group.iter().zip(result.embeddings) {
                if let Some(vector) = vector {
                    updates.push((chunk.id.clone(), vector));
                }
            }
        }

        backends
            .chunks
            .update_batch_embeddings(&updates)
            .await
            .step(Step::Embed)?;
        report.embedded = updates.len();

        info!(
            document_id,
            embedded = report.embedded,
            failed = report.failed,
            "pending embeddings processed"
        );
        Ok(report)
    }

    /// Documents similar to an already indexed one, excluding itself.
    pub async fn find_similar(
        &self,
        document_id: &str,
        options: &SimilarityOptions,
    ) -> Result<Vec<SimilarityCandidate>> {
        options.validate()?;
        let doc = self.lifecycle.load(document_id).await?;
        if doc.status.is_deleted() {
            return Err(DocsimError::NotFound(format!(
                "document {} is deleted",
                document_id
            )));
        }

        let chunks = self
            .backends()
            .chunks
            .find_by_document_id(document_id)
            .await
            .step(Step::Search)?;
        let vectors: Vec<&[f32]> = chunks
            .iter()
            .filter(|c| c.is_active)
            .filter_map(|c| c.embedding.as_deref())
            .collect();

        find_candidates(self.backends(), &vectors, options, Some(document_id)).await
    }
}
