//! Embedding provider trait and vector utilities.
//!
//! Defines the [`EmbeddingProvider`] trait that all embedding backends
//! implement, the provider error type the batcher reacts to, and pure
//! helpers for vector serialization and similarity.
//!
//! Concrete providers (OpenAI, Ollama, local fastembed) live in the
//! `docsim` app crate.

use async_trait::async_trait;

/// One vector returned by a provider.
///
/// `index` is the position of the source text within the slice passed to
/// [`EmbeddingProvider::embed`]. Providers may return vectors out of order.
#[derive(Debug, Clone, PartialEq)]
pub struct IndexedEmbedding {
    pub index: usize,
    pub vector: Vec<f32>,
}

/// Result of a single provider call.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProviderEmbeddings {
    pub embeddings: Vec<IndexedEmbedding>,
    /// Tokens billed by the provider, or an estimate when it reports none.
    pub tokens_used: u64,
}

#[derive(Debug, thiserror::Error)]
pub enum EmbeddingError {
    #[error("rate limited by provider: {0}")]
    RateLimited(String),
    /// The request exceeded the provider's item or token limit.
    /// The batcher reacts by splitting the sub-batch.
    #[error("batch exceeds provider limits: {0}")]
    BatchTooLarge(String),
    #[error("provider request timed out")]
    Timeout,
    #[error("provider returned HTTP {status}: {body}")]
    Http { status: u16, body: String },
    #[error("invalid provider response: {0}")]
    InvalidResponse(String),
    #[error("embedding provider is disabled")]
    Disabled,
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// An embedding backend.
///
/// Implementations must be stateless with respect to callers (or guard
/// their own state) so that one provider can serve concurrent batches.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Returns the model identifier (e.g. `"text-embedding-3-small"`).
    fn model_name(&self) -> &str;
    /// Returns the embedding vector dimensionality (e.g. `1536`).
    fn dims(&self) -> usize;
    /// Embed one provider-sized batch of texts.
    async fn embed(&self, texts: &[String]) -> Result<ProviderEmbeddings, EmbeddingError>;
}

/// Encode a float vector as a BLOB (little-endian f32 bytes).
///
/// ```rust
/// use docsim_core::embedding::{vec_to_blob, blob_to_vec};
///
/// let v = vec![1.0f32, -2.5, 3.125];
/// let blob = vec_to_blob(&v);
/// assert_eq!(blob.len(), 12);
/// assert_eq!(blob_to_vec(&blob), v);
/// ```
pub fn vec_to_blob(vec: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(vec.len() * 4);
    for &v in vec {
        bytes.extend_from_slice(&v.to_le_bytes());
    }
    bytes
}

/// Decode a BLOB produced by [`vec_to_blob`].
pub fn blob_to_vec(blob: &[u8]) -> Vec<f32> {
    blob.chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect()
}

/// Cosine similarity in `[-1.0, 1.0]`.
///
/// Returns `0.0` for empty vectors, vectors of different lengths, or a
/// zero-magnitude vector.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;

    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom < f32::EPSILON {
        return 0.0;
    }

    dot / denom
}

/// Cosine distance, `1 − cosine_similarity`, in `[0.0, 2.0]`.
pub fn cosine_distance(a: &[f32], b: &[f32]) -> f64 {
    1.0 - cosine_similarity(a, b) as f64
}
