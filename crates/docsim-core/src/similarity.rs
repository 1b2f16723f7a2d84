//! Submission classification and candidate scoring.
//!
//! [`SimilarityEvaluator::evaluate`] walks a submission through the cheap
//! checks first and stops at the first decisive answer:
//!
//! ```text
//! CheckingBinary ──match──▶ ExactMatch | Restore
//!       │
//!       ▼
//! CheckingText ────match──▶ TextMatch  | Restore
//!       │
//!       ▼
//! CheckingVectors ────────▶ Candidates | NoMatch
//! ```
//!
//! Each exact check looks at active documents before deleted ones. A hit on
//! a deleted document is restored when `auto_restore` is set and reported
//! with `deleted: true` otherwise.
//!
//! The vector check chunks and embeds the submission, queries the index for
//! each chunk at a relaxed threshold, and groups the hits by document:
//!
//! - `avg_similarity` is the mean over every hit against the document
//! - `coverage` is the number of distinct matched chunks of that document
//!   over its active chunk count
//! - `final_score = avg_similarity × coverage`
//!
//! Documents whose final score reaches the configured threshold become
//! candidates, best first.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::batch::{BatchFailure, EmbeddingBatcher};
use crate::chunk::{chunk_text, ChunkStats, ChunkerConfig, TextChunk};
use crate::error::{DocsimError, Result, Step, StepContext};
use crate::hash;
use crate::lifecycle::DocumentLifecycle;
use crate::models::{clamp_unit, final_score, Document, SimilarityCandidate};
use crate::store::{Backends, LookupScope, NeighborHit, NeighborQuery, TextExtractor};

/// Where a submission is in the evaluation pipeline, and where it ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckState {
    CheckingBinary,
    CheckingText,
    CheckingVectors,
    ExactMatch,
    TextMatch,
    Candidates,
    NoMatch,
    Restore,
}

impl CheckState {
    pub fn as_str(&self) -> &'static str {
        match self {
            CheckState::CheckingBinary => "checking_binary",
            CheckState::CheckingText => "checking_text",
            CheckState::CheckingVectors => "checking_vectors",
            CheckState::ExactMatch => "exact_match",
            CheckState::TextMatch => "text_match",
            CheckState::Candidates => "candidates",
            CheckState::NoMatch => "no_match",
            CheckState::Restore => "restore",
        }
    }
}

impl fmt::Display for CheckState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Tunables for one evaluation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimilarityOptions {
    /// Minimum final score for a candidate.
    pub threshold: f64,
    pub max_candidates: usize,
    /// Restore a deleted document on an exact or text match.
    pub auto_restore: bool,
    /// Stop after the binary check.
    pub skip_extraction: bool,
    /// Stop after the text check.
    pub skip_embeddings: bool,
    /// Neighbours requested per submission chunk.
    pub neighbors_per_chunk: usize,
    pub relaxed_threshold_floor: f64,
    pub relaxed_threshold_offset: f64,
    /// Share of submission chunks that must be embedded for the vector
    /// check to run. Below it the evaluation fails with a provider error.
    pub min_embedding_coverage: f64,
}

impl Default for SimilarityOptions {
    fn default() -> Self {
        Self {
            threshold: 0.7,
            max_candidates: 10,
            auto_restore: false,
            skip_extraction: false,
            skip_embeddings: false,
            neighbors_per_chunk: 5,
            relaxed_threshold_floor: 0.3,
            relaxed_threshold_offset: 0.2,
            min_embedding_coverage: 1.0,
        }
    }
}

impl SimilarityOptions {
    /// Per-hit similarity floor for the neighbour queries.
    ///
    /// Lower than `threshold` so that documents with many moderately
    /// similar chunks still reach aggregation.
    pub fn relaxed_threshold(&self) -> f64 {
        (self.threshold - self.relaxed_threshold_offset).max(self.relaxed_threshold_floor)
    }

    pub fn validate(&self) -> Result<()> {
        let unit = |name: &str, v: f64| {
            if (0.0..=1.0).contains(&v) {
                Ok(())
            } else {
                Err(DocsimError::Validation(format!(
                    "{} must be within [0, 1], got {}",
                    name, v
                )))
            }
        };
        unit("threshold", self.threshold)?;
        unit("relaxed_threshold_floor", self.relaxed_threshold_floor)?;
        unit("min_embedding_coverage", self.min_embedding_coverage)?;
        if self.relaxed_threshold_offset < 0.0 {
            return Err(DocsimError::Validation(
                "relaxed_threshold_offset must be >= 0".to_string(),
            ));
        }
        if self.neighbors_per_chunk == 0 || self.max_candidates == 0 {
            return Err(DocsimError::Validation(
                "neighbors_per_chunk and max_candidates must be > 0".to_string(),
            ));
        }
        Ok(())
    }
}

/// A file offered for dedup evaluation.
#[derive(Debug, Clone)]
pub struct Submission {
    pub bytes: Vec<u8>,
    pub file_name: String,
    pub content_type: String,
}

impl Submission {
    pub fn new(
        bytes: impl Into<Vec<u8>>,
        file_name: impl Into<String>,
        content_type: impl Into<String>,
    ) -> Self {
        Self {
            bytes: bytes.into(),
            file_name: file_name.into(),
            content_type: content_type.into(),
        }
    }
}

/// Which fingerprint found a document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchKind {
    Binary,
    Text,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SimilarityOutcome {
    ExactMatch { document_id: String, deleted: bool },
    TextMatch { document_id: String, deleted: bool },
    Restored { document_id: String, matched_on: MatchKind },
    Candidates { candidates: Vec<SimilarityCandidate> },
    NoMatch,
}

impl SimilarityOutcome {
    /// The terminal state this outcome corresponds to.
    pub fn state(&self) -> CheckState {
        match self {
            SimilarityOutcome::ExactMatch { .. } => CheckState::ExactMatch,
            SimilarityOutcome::TextMatch { .. } => CheckState::TextMatch,
            SimilarityOutcome::Restored { .. } => CheckState::Restore,
            SimilarityOutcome::Candidates { .. } => CheckState::Candidates,
            SimilarityOutcome::NoMatch => CheckState::NoMatch,
        }
    }

    /// The matched document for exact, text and restore outcomes.
    pub fn matched_document(&self) -> Option<&str> {
        match self {
            SimilarityOutcome::ExactMatch { document_id, .. }
            | SimilarityOutcome::TextMatch { document_id, .. }
            | SimilarityOutcome::Restored { document_id, .. } => Some(document_id),
            _ => None,
        }
    }
}

/// Chunks and embeddings computed for a text, reusable by the indexer so a
/// novel submission is not embedded twice.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PreparedChunks {
    pub chunks: Vec<TextChunk>,
    pub stats: ChunkStats,
    /// One slot per chunk; `None` where embedding failed.
    pub embeddings: Vec<Option<Vec<f32>>>,
    pub tokens_used: u64,
    pub failures: Vec<BatchFailure>,
}

impl PreparedChunks {
    pub fn embedded_count(&self) -> usize {
        self.embeddings.iter().filter(|e| e.is_some()).count()
    }

    /// Share of chunks that have a vector; `1.0` when there are no chunks.
    pub fn embedding_coverage(&self) -> f64 {
        if self.chunks.is_empty() {
            1.0
        } else {
            self.embedded_count() as f64 / self.chunks.len() as f64
        }
    }

    pub fn vectors(&self) -> Vec<&[f32]> {
        self.embeddings.iter().flatten().map(Vec::as_slice).collect()
    }
}

/// Chunk `text` and embed every chunk.
///
/// Embedding failures are recorded, not raised; check
/// [`PreparedChunks::embedding_coverage`].
pub async fn prepare_chunks(
    text: &str,
    chunker: &ChunkerConfig,
    batcher: &EmbeddingBatcher,
) -> Result<PreparedChunks> {
    let output = chunk_text(text, chunker)?;
    let texts: Vec<String> = output.chunks.iter().map(|c| c.content.clone()).collect();

    let mut embeddings = Vec::with_capacity(texts.len());
    let mut tokens_used = 0;
    let mut failures = Vec::new();
    let per_call = batcher.config().max_texts.max(1);
    for (group, slice) in texts.chunks(per_call).enumerate() {
        let result = batcher.embed_all(slice).await?;
        tokens_used += result.total_tokens_used;
        let offset = group * per_call;
        failures.extend(result.errors.into_iter().map(|mut f| {
            f.input_indices.iter_mut().for_each(|i| *i += offset);
            f
        }));
        embeddings.extend(result.embeddings);
    }

    Ok(PreparedChunks {
        chunks: output.chunks,
        stats: output.stats,
        embeddings,
        tokens_used,
        failures,
    })
}

/// Group per-chunk neighbour hits by document and score each document.
///
/// `hits_per_chunk` holds one hit list per submission chunk. `active_totals`
/// maps document id to its active chunk count; a document missing from it
/// scores zero coverage. Pure function.
pub fn aggregate_candidates(
    hits_per_chunk: &[Vec<NeighborHit>],
    active_totals: &HashMap<String, usize>,
    threshold: f64,
    max_candidates: usize,
) -> Vec<SimilarityCandidate> {
    #[derive(Default)]
    struct Acc<'a> {
        sum: f64,
        hits: usize,
        matched: BTreeSet<&'a str>,
    }

    let mut by_doc: BTreeMap<&str, Acc> = BTreeMap::new();
    for hit in hits_per_chunk.iter().flatten() {
        let acc = by_doc.entry(hit.document_id.as_str()).or_default();
        acc.sum += hit.similarity;
        acc.hits += 1;
        acc.matched.insert(hit.chunk_id.as_str());
    }

    let mut candidates: Vec<SimilarityCandidate> = by_doc
        .into_iter()
        .filter_map(|(document_id, acc)| {
            let total = active_totals.get(document_id).copied().unwrap_or(0);
            let avg = clamp_unit(acc.sum / acc.hits as f64);
            let coverage = if total == 0 {
                0.0
            } else {
                clamp_unit(acc.matched.len() as f64 / total as f64)
            };
            let score = final_score(avg, coverage);
            (score >= threshold).then(|| SimilarityCandidate {
                document_id: document_id.to_string(),
                avg_similarity: avg,
                coverage,
                matched_chunks: acc.matched.len(),
                total_chunks: total,
                final_score: score,
            })
        })
        .collect();

    candidates.sort_by(|a, b| {
        b.final_score
            .partial_cmp(&a.final_score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.document_id.cmp(&b.document_id))
    });
    candidates.truncate(max_candidates);
    candidates
}

/// Query the index with each vector and aggregate the hits into candidates.
pub async fn find_candidates(
    backends: &Backends,
    vectors: &[&[f32]],
    options: &SimilarityOptions,
    exclude_document: Option<&str>,
) -> Result<Vec<SimilarityCandidate>> {
    let mut query = NeighborQuery::new(options.neighbors_per_chunk, options.relaxed_threshold());
    if let Some(id) = exclude_document {
        query = query.excluding(id);
    }

    let mut hits_per_chunk = Vec::with_capacity(vectors.len());
    for vector in vectors {
        let hits = backends
            .vectors
            .nearest_neighbors(vector, &query)
            .await
            .step(Step::Search)?;
        hits_per_chunk.push(hits);
    }

    let doc_ids: BTreeSet<&str> = hits_per_chunk
        .iter()
        .flatten()
        .map(|h| h.document_id.as_str())
        .collect();
    let mut totals = HashMap::with_capacity(doc_ids.len());
    for id in doc_ids {
        let count = backends
            .chunks
            .count_by_document_id(id)
            .await
            .step(Step::Search)?;
        totals.insert(id.to_string(), count);
    }

    Ok(aggregate_candidates(
        &hits_per_chunk,
        &totals,
        options.threshold,
        options.max_candidates,
    ))
}

/// Everything learned about a submission.
#[derive(Debug, Clone, PartialEq)]
pub struct SimilarityReport {
    pub outcome: SimilarityOutcome,
    /// States visited, in order, ending with the outcome's state.
    pub trail: Vec<CheckState>,
    pub binary_hash: String,
    pub text_hash: Option<String>,
    pub extracted_text: Option<String>,
    /// Present when the vector check ran.
    pub prepared: Option<PreparedChunks>,
}

impl SimilarityReport {
    pub fn state(&self) -> CheckState {
        self.outcome.state()
    }

    /// The submission matched nothing exactly and may be stored.
    pub fn is_novel(&self) -> bool {
        matches!(
            self.outcome,
            SimilarityOutcome::Candidates { .. } | SimilarityOutcome::NoMatch
        )
    }
}

/// Decides whether a submission is new, a duplicate, or a near-duplicate.
pub struct SimilarityEvaluator {
    lifecycle: DocumentLifecycle,
    extractor: Arc<dyn TextExtractor>,
    batcher: Arc<EmbeddingBatcher>,
    chunker: ChunkerConfig,
}

impl SimilarityEvaluator {
    pub fn new(
        lifecycle: DocumentLifecycle,
        extractor: Arc<dyn TextExtractor>,
        batcher: Arc<EmbeddingBatcher>,
        chunker: ChunkerConfig,
    ) -> Self {
        Self {
            lifecycle,
            extractor,
            batcher,
            chunker,
        }
    }

    fn backends(&self) -> &Backends {
        self.lifecycle.backends()
    }

    pub async fn evaluate(
        &self,
        submission: &Submission,
        options: &SimilarityOptions,
    ) -> Result<SimilarityReport> {
        options.validate()?;

        let file = submission.file_name.as_str();
        let mut trail = Vec::new();
        enter(&mut trail, CheckState::CheckingBinary, file);
        let binary_hash = hash::binary_fingerprint(&submission.bytes);
        let mut report = SimilarityReport {
            outcome: SimilarityOutcome::NoMatch,
            trail: Vec::new(),
            binary_hash: binary_hash.clone(),
            text_hash: None,
            extracted_text: None,
            prepared: None,
        };

        if let Some(outcome) = self
            .check_exact(MatchKind::Binary, &binary_hash, options)
            .await?
        {
            return Ok(finish(report, trail, outcome, file));
        }
        if options.skip_extraction {
            return Ok(finish(report, trail, SimilarityOutcome::NoMatch, file));
        }

        enter(&mut trail, CheckState::CheckingText, file);
        let text = self
            .extractor
            .extract(&submission.bytes, &submission.content_type)
            .await
            .step(Step::Extract)?;
        let normalized_empty = hash::normalize_text(&text).is_empty();
        let text_hash = hash::text_fingerprint(&text);
        report.text_hash = Some(text_hash.clone());
        report.extracted_text = Some(text);

        // Blank extractions all share one hash; matching on it means nothing.
        if !normalized_empty {
            if let Some(outcome) = self
                .check_exact(MatchKind::Text, &text_hash, options)
                .await?
            {
                return Ok(finish(report, trail, outcome, file));
            }
        }
        if options.skip_embeddings || normalized_empty {
            return Ok(finish(report, trail, SimilarityOutcome::NoMatch, file));
        }

        enter(&mut trail, CheckState::CheckingVectors, file);
        let text = report.extracted_text.as_deref().unwrap_or_default();
        let prepared = prepare_chunks(text, &self.chunker, &self.batcher).await?;
        let coverage = prepared.embedding_coverage();
        if coverage < options.min_embedding_coverage {
            return Err(DocsimError::Provider(format!(
                "only {} of {} chunks embedded ({:.0}% < {:.0}% required): {}",
                prepared.embedded_count(),
                prepared.chunks.len(),
                coverage * 100.0,
                options.min_embedding_coverage * 100.0,
                prepared
                    .failures
                    .first()
                    .map(|f| f.message.as_str())
                    .unwrap_or("no vectors returned")
            )));
        }

        let candidates = find_candidates(self.backends(), &prepared.vectors(), options, None).await?;
        debug!(
            chunks = prepared.chunks.len(),
            candidates = candidates.len(),
            "vector check finished"
        );
        report.prepared = Some(prepared);

        let outcome = if candidates.is_empty() {
            SimilarityOutcome::NoMatch
        } else {
            SimilarityOutcome::Candidates { candidates }
        };
        Ok(finish(report, trail, outcome, file))
    }

    async fn find(
        &self,
        kind: MatchKind,
        hash: &str,
        scope: LookupScope,
    ) -> Result<Option<Document>> {
        let documents = &self.backends().documents;
        let found = match kind {
            MatchKind::Binary => documents.find_by_binary_hash(hash, scope).await,
            MatchKind::Text => documents.find_by_text_hash(hash, scope).await,
        };
        found.step(Step::Hash)
    }

    async fn check_exact(
        &self,
        kind: MatchKind,
        hash: &str,
        options: &SimilarityOptions,
    ) -> Result<Option<SimilarityOutcome>> {
        let matched = |document_id: String, deleted: bool| match kind {
            MatchKind::Binary => SimilarityOutcome::ExactMatch {
                document_id,
                deleted,
            },
            MatchKind::Text => SimilarityOutcome::TextMatch {
                document_id,
                deleted,
            },
        };

        if let Some(doc) = self.find(kind, hash, LookupScope::Active).await? {
            return Ok(Some(matched(doc.id, false)));
        }

        let Some(doc) = self.find(kind, hash, LookupScope::Deleted).await? else {
            return Ok(None);
        };
        if !options.auto_restore {
            return Ok(Some(matched(doc.id, true)));
        }

        self.lifecycle.restore(&doc.id).await?;
        Ok(Some(SimilarityOutcome::Restored {
            document_id: doc.id,
            matched_on: kind,
        }))
    }
}

fn enter(trail: &mut Vec<CheckState>, state: CheckState, file_name: &str) {
    debug!(file = file_name, %state, step = trail.len(), "check state");
    trail.push(state);
}

fn finish(
    mut report: SimilarityReport,
    mut trail: Vec<CheckState>,
    outcome: SimilarityOutcome,
    file_name: &str,
) -> SimilarityReport {
    enter(&mut trail, outcome.state(), file_name);
    info!(
        file = file_name,
        outcome = %outcome.state(),
        document_id = outcome.matched_document().unwrap_or("-"),
        "submission evaluated"
    );
    report.trail = trail;
    report.outcome = outcome;
    report
}
