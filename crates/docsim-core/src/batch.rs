//! Batched embedding generation with partial-failure accounting.
//!
//! [`EmbeddingBatcher`] turns an ordered list of texts into vectors by
//! splitting it into provider-sized sub-batches. Sub-batches are bounded by
//! item count and by an estimated token budget, run sequentially with a
//! short pause between them, and fail independently: a failed sub-batch is
//! recorded in [`BatchEmbeddingResult::errors`] and the next one still runs.
//!
//! Inputs are validated up front. One empty or oversized text rejects the
//! whole call before any provider request is made.

use std::ops::Range;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tracing::{debug, warn};

use crate::embedding::{EmbeddingError, EmbeddingProvider, IndexedEmbedding, ProviderEmbeddings};
use crate::error::{DocsimError, Result};

#[derive(Debug, Clone)]
pub struct BatcherConfig {
    /// Maximum texts per provider call.
    pub max_batch_size: usize,
    /// Maximum estimated tokens per provider call.
    pub max_batch_tokens: usize,
    /// Maximum characters of a single input text.
    pub max_text_chars: usize,
    /// Maximum texts accepted by one [`EmbeddingBatcher::embed_all`] call.
    pub max_texts: usize,
    pub inter_batch_delay: Duration,
    pub request_timeout: Duration,
    /// Extra attempts for a sub-batch after a transient failure.
    pub batch_retries: u32,
}

impl Default for BatcherConfig {
    fn default() -> Self {
        Self {
            max_batch_size: 100,
            max_batch_tokens: 8_000,
            max_text_chars: 32_000,
            max_texts: 2_048,
            inter_batch_delay: Duration::from_millis(100),
            request_timeout: Duration::from_secs(60),
            batch_retries: 1,
        }
    }
}

/// A sub-batch (or part of one) that could not be embedded.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BatchFailure {
    pub batch_index: usize,
    /// Positions in the original input that were not embedded.
    pub input_indices: Vec<usize>,
    pub message: String,
}

/// Aggregate outcome of [`EmbeddingBatcher::embed_all`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BatchEmbeddingResult {
    /// One slot per input text, in input order; `None` where embedding failed.
    pub embeddings: Vec<Option<Vec<f32>>>,
    pub successful_count: usize,
    pub failed_count: usize,
    pub total_tokens_used: u64,
    pub errors: Vec<BatchFailure>,
    pub batch_count: usize,
}

impl BatchEmbeddingResult {
    fn with_len(len: usize) -> Self {
        Self {
            embeddings: vec![None; len],
            ..Self::default()
        }
    }

    pub fn is_complete(&self) -> bool {
        self.failed_count == 0
    }

    /// Share of inputs that received a vector; `1.0` for an empty input.
    pub fn success_ratio(&self) -> f64 {
        if self.embeddings.is_empty() {
            1.0
        } else {
            self.successful_count as f64 / self.embeddings.len() as f64
        }
    }

    fn record_failure(&mut self, batch_index: usize, range: Range<usize>, message: String) {
        self.failed_count += range.len();
        self.errors.push(BatchFailure {
            batch_index,
            input_indices: range.collect(),
            message,
        });
    }
}

/// Rough token estimate used for sub-batch budgeting.
///
/// Exact tokenization is provider-specific. This uses ~4 characters per
/// token over non-whitespace text, never fewer tokens than words, plus one
/// token per two punctuation marks since tokenizers tend to split those out.
pub fn estimate_tokens(text: &str) -> usize {
    let mut non_ws = 0usize;
    let mut punct = 0usize;
    for c in text.chars() {
        if c.is_whitespace() {
            continue;
        }
        non_ws += 1;
        if c.is_ascii_punctuation() {
            punct += 1;
        }
    }
    if non_ws == 0 {
        return 0;
    }
    let words = text.split_whitespace().count();
    non_ws.div_ceil(4).max(words) + punct.div_ceil(2)
}

/// Greedily partition `texts` into ranges bounded by item count and
/// estimated tokens. A text that alone exceeds the token budget gets a
/// sub-batch of its own.
pub fn plan_batches(texts: &[String], max_batch_size: usize, max_batch_tokens: usize) -> Vec<Range<usize>> {
    let max_batch_size = max_batch_size.max(1);
    let mut batches = Vec::new();
    let mut start = 0usize;
    let mut tokens = 0usize;

    for (i, text) in texts.iter().enumerate() {
        let t = estimate_tokens(text);
        let count = i - start;
        if count > 0 && (count >= max_batch_size || tokens + t > max_batch_tokens) {
            batches.push(start..i);
            start = i;
            tokens = 0;
        }
        tokens += t;
    }
    if start < texts.len() {
        batches.push(start..texts.len());
    }
    batches
}

/// Put provider output back into input order and check its shape.
fn restore_order(
    embeddings: Vec<IndexedEmbedding>,
    expected: usize,
    dims: Option<usize>,
) -> std::result::Result<Vec<Vec<f32>>, EmbeddingError> {
    if embeddings.len() != expected {
        return Err(EmbeddingError::InvalidResponse(format!(
            "expected {} embeddings, got {}",
            expected,
            embeddings.len()
        )));
    }
    let mut slots: Vec<Option<Vec<f32>>> = vec![None; expected];
    for item in embeddings {
        let slot = slots.get_mut(item.index).ok_or_else(|| {
            EmbeddingError::InvalidResponse(format!("embedding index {} out of range", item.index))
        })?;
        if slot.is_some() {
            return Err(EmbeddingError::InvalidResponse(format!(
                "duplicate embedding index {}",
                item.index
            )));
        }
        *slot = Some(item.vector);
    }

    let vectors: Vec<Vec<f32>> = slots.into_iter().flatten().collect();
    let width = dims.or_else(|| vectors.first().map(|v| v.len())).unwrap_or(0);
    if width == 0 || vectors.iter().any(|v| v.len() != width) {
        return Err(EmbeddingError::InvalidResponse(format!(
            "embeddings do not share the expected dimensionality {}",
            width
        )));
    }
    Ok(vectors)
}

/// Splits embedding work into provider-sized sub-batches.
///
/// Holds no mutable state; share it behind an `Arc` across concurrent
/// indexing jobs.
pub struct EmbeddingBatcher {
    provider: Arc<dyn EmbeddingProvider>,
    config: BatcherConfig,
}

impl EmbeddingBatcher {
    pub fn new(provider: Arc<dyn EmbeddingProvider>, config: BatcherConfig) -> Self {
        Self { provider, config }
    }

    pub fn provider(&self) -> &dyn EmbeddingProvider {
        self.provider.as_ref()
    }

    pub fn config(&self) -> &BatcherConfig {
        &self.config
    }

    /// Reject the call if any input is unusable.
    pub fn validate(&self, texts: &[String]) -> Result<()> {
        if texts.len() > self.config.max_texts {
            return Err(DocsimError::Validation(format!(
                "{} texts submitted, at most {} allowed per call",
                texts.len(),
                self.config.max_texts
            )));
        }
        for (index, text) in texts.iter().enumerate() {
            if text.trim().is_empty() {
                return Err(DocsimError::InvalidInput {
                    index,
                    reason: "text is empty".to_string(),
                });
            }
            let chars = text.chars().count();
            if chars > self.config.max_text_chars {
                return Err(DocsimError::InvalidInput {
                    index,
                    reason: format!(
                        "text has {} characters, limit is {}",
                        chars, self.config.max_text_chars
                    ),
                });
            }
        }
        Ok(())
    }

    /// Embed every text, returning vectors in input order.
    ///
    /// Provider failures do not fail the call; they are accounted for in the
    /// result so the caller can judge whether the coverage is good enough.
    pub async fn embed_all(&self, texts: &[String]) -> Result<BatchEmbeddingResult> {
        self.validate(texts)?;

        let mut result = BatchEmbeddingResult::with_len(texts.len());
        let plan = plan_batches(
            texts,
            self.config.max_batch_size,
            self.config.max_batch_tokens,
        );
        result.batch_count = plan.len();
        let mut dims = match self.provider.dims() {
            0 => None,
            d => Some(d),
        };

        for (batch_index, range) in plan.into_iter().enumerate() {
            if batch_index > 0 && !self.config.inter_batch_delay.is_zero() {
                tokio::time::sleep(self.config.inter_batch_delay).await;
            }

            // Ranges still to send for this sub-batch; grows when the
            // provider says a request was too large.
            let mut pending = vec![range];
            while let Some(part) = pending.pop() {
                let outcome = match self.call_with_retries(&texts[part.clone()]).await {
                    Ok(resp) => restore_order(resp.embeddings, part.len(), dims)
                        .map(|vectors| (vectors, resp.tokens_used)),
                    Err(e) => Err(e),
                };

                match outcome {
                    Ok((vectors, tokens)) => {
                        if dims.is_none() {
                            dims = vectors.first().map(|v| v.len());
                        }
                        for (offset, vector) in vectors.into_iter().enumerate() {
                            result.embeddings[part.start + offset] = Some(vector);
                        }
                        result.successful_count += part.len();
                        result.total_tokens_used += tokens;
                    }
                    Err(EmbeddingError::BatchTooLarge(msg)) if part.len() > 1 => {
                        let mid = part.start + part.len() / 2;
                        debug!(
                            batch_index,
                            size = part.len(),
                            reason = %msg,
                            "splitting oversized embedding batch"
                        );
                        pending.push(mid..part.end);
                        pending.push(part.start..mid);
                    }
                    Err(e) => {
                        warn!(
                            batch_index,
                            size = part.len(),
                            err = %e,
                            "embedding batch failed"
                        );
                        result.record_failure(batch_index, part, e.to_string());
                    }
                }
            }
        }

        debug!(
            ok = result.successful_count,
            failed = result.failed_count,
            tokens = result.total_tokens_used,
            batches = result.batch_count,
            "embedding run finished"
        );
        Ok(result)
    }

    async fn call_with_retries(
        &self,
        texts: &[String],
    ) -> std::result::Result<ProviderEmbeddings, EmbeddingError> {
        let mut last_err = None;

        for attempt in 0..=self.config.batch_retries {
            if attempt > 0 {
                let delay = self.config.inter_batch_delay * (1 << attempt.min(5));
                tokio::time::sleep(delay).await;
            }

            match tokio::time::timeout(self.config.request_timeout, self.provider.embed(texts)).await {
                Ok(Ok(resp)) => return Ok(resp),
                Ok(Err(e @ (EmbeddingError::BatchTooLarge(_) | EmbeddingError::Disabled))) => {
                    return Err(e)
                }
                Ok(Err(e)) => {
                    debug!(attempt, err = %e, "embedding call failed");
                    last_err = Some(e);
                }
                Err(_) => {
                    debug!(
                        attempt,
                        timeout_ms = self.config.request_timeout.as_millis() as u64,
                        "embedding call timed out"
                    );
                    last_err = Some(EmbeddingError::Timeout);
                }
            }
        }

        Err(last_err.unwrap_or(EmbeddingError::Timeout))
    }
}
