//! Storage and collaborator abstractions.
//!
//! The core reaches persistence, vector search, blob storage and text
//! extraction only through the traits in this module. The app crate
//! implements them on SQLite and the local filesystem; [`memory`] provides
//! in-memory implementations for tests and embedding the core elsewhere.
//!
//! All traits are `Send + Sync` and return [`anyhow::Result`]; the core tags
//! failures with the pipeline step that invoked them.

pub mod memory;

use std::collections::HashSet;
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use serde::Serialize;

use crate::embedding::cosine_distance;
use crate::models::{ChunkType, Document, DocumentChunk, DocumentStatus};

/// Which half of the document set a hash lookup searches.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LookupScope {
    /// Any status other than `Deleted`.
    Active,
    Deleted,
}

impl LookupScope {
    pub fn admits(&self, status: DocumentStatus) -> bool {
        match self {
            LookupScope::Active => !status.is_deleted(),
            LookupScope::Deleted => status.is_deleted(),
        }
    }
}

/// Document rows.
///
/// | Method | Purpose |
/// |--------|---------|
/// | [`insert`](DocumentRepository::insert) | Create a document row |
/// | [`find_by_binary_hash`](DocumentRepository::find_by_binary_hash) | Exact-match lookup on raw bytes |
/// | [`find_by_text_hash`](DocumentRepository::find_by_text_hash) | Exact-match lookup on normalized text |
/// | [`compare_and_set_status`](DocumentRepository::compare_and_set_status) | Single-writer status gate |
/// | [`associate_hashes`](DocumentRepository::associate_hashes) | Attach text hash and extracted text |
#[async_trait]
pub trait DocumentRepository: Send + Sync {
    async fn insert(&self, doc: &Document) -> Result<()>;

    async fn get(&self, id: &str) -> Result<Option<Document>>;

    async fn find_by_binary_hash(&self, hash: &str, scope: LookupScope)
        -> Result<Option<Document>>;

    async fn find_by_text_hash(&self, hash: &str, scope: LookupScope) -> Result<Option<Document>>;

    /// Unconditional status write. Prefer
    /// [`compare_and_set_status`](DocumentRepository::compare_and_set_status).
    async fn update_status(&self, id: &str, status: DocumentStatus) -> Result<()>;

    /// Set `next` only if the stored status is still `expected`.
    ///
    /// Returns `false` when another writer got there first or the document
    /// does not exist.
    async fn compare_and_set_status(
        &self,
        id: &str,
        expected: DocumentStatus,
        next: DocumentStatus,
    ) -> Result<bool>;

    async fn associate_hashes(
        &self,
        id: &str,
        text_hash: &str,
        extracted_text: Option<&str>,
    ) -> Result<()>;

    async fn set_storage_key(&self, id: &str, key: Option<&str>) -> Result<()>;

    /// All documents, optionally filtered by status, oldest first.
    async fn list(&self, status: Option<DocumentStatus>) -> Result<Vec<Document>>;
}

/// Chunk rows and their embeddings.
#[async_trait]
pub trait ChunkRepository: Send + Sync {
    /// Insert chunks, including any embeddings they already carry, as one write.
    async fn save_many(&self, chunks: &[DocumentChunk]) -> Result<()>;

    /// Every chunk of a document, active or not, ordered by `chunk_index`.
    async fn find_by_document_id(&self, document_id: &str) -> Result<Vec<DocumentChunk>>;

    /// Hard delete, used when a document is reindexed.
    async fn delete_by_document_id(&self, document_id: &str) -> Result<u64>;

    async fn soft_delete_by_document_id(&self, document_id: &str) -> Result<u64>;

    async fn restore_by_document_id(&self, document_id: &str) -> Result<u64>;

    /// Number of active chunks.
    async fn count_by_document_id(&self, document_id: &str) -> Result<usize>;

    async fn update_embedding(&self, chunk_id: &str, vector: &[f32]) -> Result<()>;

    /// Write many embeddings at once so readers never see half a document.
    async fn update_batch_embeddings(&self, updates: &[(String, Vec<f32>)]) -> Result<()>;

    async fn has_embedding(&self, chunk_id: &str) -> Result<bool>;
}

/// Parameters of a nearest-neighbour query.
#[derive(Debug, Clone, PartialEq)]
pub struct NeighborQuery {
    pub k: usize,
    /// Minimum similarity (`1 − cosine distance`) a hit must reach.
    pub threshold: f64,
    /// When set, only these documents are searched.
    pub include_documents: Option<HashSet<String>>,
    pub exclude_documents: HashSet<String>,
    /// When set, only chunks of these types are searched.
    pub chunk_types: Option<Vec<ChunkType>>,
}

impl NeighborQuery {
    pub fn new(k: usize, threshold: f64) -> Self {
        Self {
            k,
            threshold,
            include_documents: None,
            exclude_documents: HashSet::new(),
            chunk_types: None,
        }
    }

    pub fn excluding(mut self, document_id: impl Into<String>) -> Self {
        self.exclude_documents.insert(document_id.into());
        self
    }

    pub fn admits(&self, document_id: &str, chunk_type: ChunkType) -> bool {
        if self.exclude_documents.contains(document_id) {
            return false;
        }
        if let Some(include) = &self.include_documents {
            if !include.contains(document_id) {
                return false;
            }
        }
        if let Some(types) = &self.chunk_types {
            if !types.contains(&chunk_type) {
                return false;
            }
        }
        true
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NeighborHit {
    pub chunk_id: String,
    pub document_id: String,
    pub similarity: f64,
}

/// A stored vector considered by [`rank_neighbors`].
pub struct StoredVector<'a> {
    pub chunk_id: &'a str,
    pub document_id: &'a str,
    pub chunk_type: ChunkType,
    pub vector: &'a [f32],
}

/// Brute-force k-NN over `rows`: filter, score by `1 − cosine distance`,
/// drop hits under the threshold, sort by similarity desc then chunk id,
/// keep `k`.
pub fn rank_neighbors<'a>(
    query_vec: &[f32],
    query: &NeighborQuery,
    rows: impl IntoIterator<Item = StoredVector<'a>>,
) -> Vec<NeighborHit> {
    let mut hits: Vec<NeighborHit> = rows
        .into_iter()
        .filter(|row| query.admits(row.document_id, row.chunk_type))
        .filter_map(|row| {
            let similarity = 1.0 - cosine_distance(query_vec, row.vector);
            (similarity >= query.threshold).then(|| NeighborHit {
                chunk_id: row.chunk_id.to_string(),
                document_id: row.document_id.to_string(),
                similarity,
            })
        })
        .collect();

    hits.sort_by(|a, b| {
        b.similarity
            .partial_cmp(&a.similarity)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.chunk_id.cmp(&b.chunk_id))
    });
    hits.truncate(query.k);
    hits
}

/// Nearest-neighbour search over active chunk embeddings.
///
/// Reads are safe for any number of concurrent callers. An empty result is
/// not an error.
#[async_trait]
pub trait VectorIndex: Send + Sync {
    async fn nearest_neighbors(&self, vector: &[f32], query: &NeighborQuery)
        -> Result<Vec<NeighborHit>>;
}

/// File storage used by the delete/restore flow.
#[async_trait]
pub trait BlobStore: Send + Sync {
    async fn exists(&self, key: &str) -> Result<bool>;
    async fn download_bytes(&self, key: &str) -> Result<Vec<u8>>;
    async fn upload_bytes(&self, key: &str, bytes: &[u8]) -> Result<()>;
    async fn move_file(&self, src_key: &str, dst_key: &str) -> Result<()>;
}

/// Turns raw file bytes into plain text.
#[async_trait]
pub trait TextExtractor: Send + Sync {
    async fn extract(&self, bytes: &[u8], content_type: &str) -> Result<String>;
}

/// The persistence collaborators, bundled for the services that need them.
#[derive(Clone)]
pub struct Backends {
    pub documents: Arc<dyn DocumentRepository>,
    pub chunks: Arc<dyn ChunkRepository>,
    pub vectors: Arc<dyn VectorIndex>,
    pub blobs: Arc<dyn BlobStore>,
}

impl Backends {
    /// Use one store for documents, chunks and vectors.
    pub fn from_store<S>(store: Arc<S>, blobs: Arc<dyn BlobStore>) -> Self
    where
        S: DocumentRepository + ChunkRepository + VectorIndex + 'static,
    {
        Self {
            documents: store.clone(),
            chunks: store.clone(),
            vectors: store,
            blobs,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row<'a>(chunk: &'a str, doc: &'a str, t: ChunkType, v: &'a [f32]) -> StoredVector<'a> {
        StoredVector {
            chunk_id: chunk,
            document_id: doc,
            chunk_type: t,
            vector: v,
        }
    }

    #[test]
    fn test_rank_orders_and_thresholds() {
        let q = [1.0f32, 0.0];
        let a = [1.0f32, 0.0];
        let b = [1.0f32, 1.0];
        let c = [0.0f32, 1.0];
        let rows = vec![
            row("c", "d3", ChunkType::Paragraph, &c),
            row("b", "d2", ChunkType::Paragraph, &b),
            row("a", "d1", ChunkType::Paragraph, &a),
        ];
        let hits = rank_neighbors(&q, &NeighborQuery::new(10, 0.5), rows);
        let ids: Vec<&str> = hits.iter().map(|h| h.chunk_id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b"]);
        assert!((hits[0].similarity - 1.0).abs() < 1e-6);
        assert!((hits[1].similarity - std::f64::consts::FRAC_1_SQRT_2).abs() < 1e-6);
    }

    #[test]
    fn test_rank_filters() {
        let v = [1.0f32, 0.0];
        let rows = || {
            vec![
                row("a", "d1", ChunkType::Paragraph, &v),
                row("b", "d2", ChunkType::WordGroup, &v),
                row("c", "d3", ChunkType::SentenceGroup, &v),
            ]
        };

        let excl = NeighborQuery::new(10, 0.0).excluding("d1");
        assert_eq!(rank_neighbors(&v, &excl, rows()).len(), 2);

        let mut incl = NeighborQuery::new(10, 0.0);
        incl.include_documents = Some(["d2".to_string()].into_iter().collect());
        let hits = rank_neighbors(&v, &incl, rows());
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].document_id, "d2");

        let mut typed = NeighborQuery::new(10, 0.0);
        typed.chunk_types = Some(vec![ChunkType::SentenceGroup]);
        let hits = rank_neighbors(&v, &typed, rows());
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].chunk_id, "c");
    }

    #[test]
    fn test_rank_truncates_to_k_and_tolerates_empty() {
        let v = [1.0f32, 0.0];
        let rows = vec![
            row("a", "d1", ChunkType::Paragraph, &v),
            row("b", "d1", ChunkType::Paragraph, &v),
            row("c", "d1", ChunkType::Paragraph, &v),
        ];
        let hits = rank_neighbors(&v, &NeighborQuery::new(2, 0.0), rows);
        let ids: Vec<&str> = hits.iter().map(|h| h.chunk_id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b"]);

        let none = rank_neighbors(&v, &NeighborQuery::new(5, 0.9), Vec::new());
        assert!(none.is_empty());
    }

    #[test]
    fn test_lookup_scope() {
        assert!(LookupScope::Active.admits(DocumentStatus::Processed));
        assert!(LookupScope::Active.admits(DocumentStatus::Error));
        assert!(!LookupScope::Active.admits(DocumentStatus::Deleted));
        assert!(LookupScope::Deleted.admits(DocumentStatus::Deleted));
        assert!(!LookupScope::Deleted.admits(DocumentStatus::Uploaded));
    }
}
