//! Per-document commands: `similar`, `delete`, `restore` and `reindex`.

use anyhow::{anyhow, bail, Context, Result};
use docsim_core::chunk::chunk_text;
use docsim_core::indexing::IndexReport;
use docsim_core::models::SimilarityCandidate;
use docsim_core::similarity::PreparedChunks;
use docsim_core::store::{BlobStore, TextExtractor};

use crate::config::Config;
use crate::services::Services;

/// Documents similar to `id`, from its stored embeddings.
pub async fn similar_documents(
    services: &Services,
    id: &str,
    threshold: Option<f64>,
    limit: Option<usize>,
) -> Result<Vec<SimilarityCandidate>> {
    let mut options = services.config.similarity.clone();
    if let Some(t) = threshold {
        options.threshold = t;
    }
    if let Some(n) = limit {
        options.max_candidates = n;
    }
    Ok(services.indexer.find_similar(id, &options).await?)
}

/// Re-chunk and re-embed a document, replacing its chunks.
///
/// Uses the stored extracted text, falling back to extracting the stored
/// file.
pub async fn reindex_document(services: &Services, id: &str) -> Result<IndexReport> {
    let doc = services.lifecycle.load(id).await?;
    if doc.status.is_deleted() {
        bail!("document {} is deleted; restore it first", id);
    }

    let text = match doc.extracted_text {
        Some(text) => text,
        None => {
            let key = doc
                .storage_key
                .as_deref()
                .ok_or_else(|| anyhow!("document {} has neither text nor a stored file", id))?;
            let bytes = services.blobs.download_bytes(key).await?;
            services
                .extractor
                .extract(&bytes, &doc.content_type)
                .await
                .with_context(|| format!("Failed to extract {}", key))?
        }
    };

    let prepared = if services.embeddings_enabled() {
        None
    } else {
        let output = chunk_text(&text, &services.config.chunking)?;
        Some(PreparedChunks {
            embeddings: vec![None; output.chunks.len()],
            chunks: output.chunks,
            stats: output.stats,
            ..PreparedChunks::default()
        })
    };

    Ok(services
        .indexer
        .index_document(id, &text, prepared)
        .await?)
}

pub async fn run_similar(
    config: &Config,
    id: &str,
    threshold: Option<f64>,
    limit: Option<usize>,
    json: bool,
) -> Result<()> {
    let services = Services::open(config).await?;
    let result = similar_documents(&services, id, threshold, limit).await;
    services.close().await;
    let candidates = result?;

    if json {
        println!("{}", serde_json::to_string_pretty(&candidates)?);
        return Ok(());
    }

    println!("similar {}", id);
    if candidates.is_empty() {
        println!("  no similar documents");
    }
    for c in &candidates {
        println!(
            "  {}  score {:.3} (avg {:.3}, {}/{} chunks)",
            c.document_id, c.final_score, c.avg_similarity, c.matched_chunks, c.total_chunks
        );
    }
    Ok(())
}

pub async fn run_delete(config: &Config, id: &str) -> Result<()> {
    let services = Services::open(config).await?;
    let result = services.lifecycle.soft_delete(id).await;
    services.close().await;
    let doc = result?;

    println!("deleted {}", doc.id);
    println!("  file: {}", doc.file_name);
    Ok(())
}

pub async fn run_restore(config: &Config, id: &str) -> Result<()> {
    let services = Services::open(config).await?;
    let result = services.lifecycle.restore(id).await;
    services.close().await;
    let doc = result?;

    println!("restored {}", doc.id);
    println!("  status: {}", doc.status);
    Ok(())
}

pub async fn run_reindex(config: &Config, id: &str) -> Result<()> {
    let services = Services::open(config).await?;
    let result = reindex_document(&services, id).await;
    services.close().await;
    let report = result?;

    println!("reindex {}", id);
    println!("  chunks: {}", report.chunk_count);
    println!("  embedded: {}", report.embedded);
    println!("  pending: {}", report.pending);
    if report.tokens_used > 0 {
        println!("  tokens: {}", report.tokens_used);
    }
    Ok(())
}
