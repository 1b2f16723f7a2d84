//! Submission pipeline: `docsim check` and `docsim submit`.
//!
//! A submission is evaluated by the core [`SimilarityEvaluator`]
//! (binary hash, then text hash, then vectors). `check` stops there.
//! `submit` then acts on the outcome:
//!
//! | Outcome | Action |
//! |---------|--------|
//! | exact or text match | skipped as a duplicate |
//! | match on a deleted document, `auto_restore` | document restored |
//! | near-duplicate candidates | flagged; stored only with `--force` |
//! | no match | file stored, document created and indexed |
//!
//! Directories are walked with the `[submit]` include/exclude globs.
//!
//! [`SimilarityEvaluator`]: docsim_core::similarity::SimilarityEvaluator

use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use docsim_core::chunk::{chunk_text, ChunkerConfig};
use docsim_core::indexing::IndexReport;
use docsim_core::models::{Document, SimilarityCandidate};
use docsim_core::similarity::{
    CheckState, MatchKind, PreparedChunks, SimilarityOptions, SimilarityOutcome,
    SimilarityReport, Submission,
};
use docsim_core::store::{BlobStore, DocumentRepository, LookupScope};
use globset::{Glob, GlobSet, GlobSetBuilder};
use serde::Serialize;
use tracing::{info, warn};
use walkdir::WalkDir;

use crate::config::{Config, SubmitConfig};
use crate::extract;
use crate::services::Services;
use crate::sqlite_store::is_unique_violation;

/// Per-run overrides of the `[similarity]` settings.
#[derive(Debug, Clone, Default)]
pub struct SubmitOptions {
    pub collection: Option<String>,
    pub auto_restore: bool,
    /// Store near-duplicates instead of only flagging them.
    pub force: bool,
    pub threshold: Option<f64>,
    pub skip_embeddings: bool,
}

impl SubmitOptions {
    fn apply(&self, mut options: SimilarityOptions) -> SimilarityOptions {
        if self.auto_restore {
            options.auto_restore = true;
        }
        if let Some(t) = self.threshold {
            options.threshold = t;
        }
        if self.skip_embeddings {
            options.skip_embeddings = true;
        }
        options
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum SubmitAction {
    Stored {
        document_id: String,
        chunks: usize,
        embedded: usize,
        pending: usize,
        /// Near-duplicates that were overridden with `--force`.
        similar: Vec<SimilarityCandidate>,
    },
    Duplicate {
        document_id: String,
        matched_on: MatchKind,
        deleted: bool,
    },
    Restored {
        document_id: String,
        matched_on: MatchKind,
    },
    Flagged {
        candidates: Vec<SimilarityCandidate>,
    },
    Failed {
        error: String,
    },
}

#[derive(Debug, Clone, Serialize)]
pub struct SubmitResult {
    pub path: String,
    pub binary_hash: Option<String>,
    pub text_hash: Option<String>,
    pub trail: Vec<CheckState>,
    #[serde(flatten)]
    pub action: SubmitAction,
}

impl SubmitResult {
    fn without_report(path: &Path, action: SubmitAction) -> Self {
        Self {
            path: path.display().to_string(),
            binary_hash: None,
            text_hash: None,
            trail: Vec::new(),
            action,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct CheckResult {
    pub path: String,
    pub binary_hash: String,
    pub text_hash: Option<String>,
    pub trail: Vec<CheckState>,
    pub outcome: SimilarityOutcome,
}

async fn read_submission(path: &Path, max_bytes: u64) -> Result<Submission> {
    let metadata = tokio::fs::metadata(path)
        .await
        .with_context(|| format!("Failed to stat {}", path.display()))?;
    if metadata.len() > max_bytes {
        bail!(
            "{} is {} bytes, above the {} byte limit",
            path.display(),
            metadata.len(),
            max_bytes
        );
    }
    let content_type = extract::content_type_for_path(path);
    if !extract::is_supported(content_type) {
        bail!("unsupported file type: {}", path.display());
    }
    let bytes = tokio::fs::read(path)
        .await
        .with_context(|| format!("Failed to read {}", path.display()))?;
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| "file".to_string());
    Ok(Submission::new(bytes, file_name, content_type))
}

/// Evaluate a file without changing anything.
pub async fn check_file(
    services: &Services,
    path: &Path,
    overrides: &SubmitOptions,
) -> Result<CheckResult> {
    let submission = read_submission(path, services.config.submit.max_file_bytes).await?;
    let mut options = overrides.apply(services.similarity_options());
    // Checking never mutates.
    options.auto_restore = false;

    let report = services.evaluator.evaluate(&submission, &options).await?;
    Ok(CheckResult {
        path: path.display().to_string(),
        binary_hash: report.binary_hash,
        text_hash: report.text_hash,
        trail: report.trail,
        outcome: report.outcome,
    })
}

/// Evaluate a file and store it when it is novel.
pub async fn submit_file(
    services: &Services,
    path: &Path,
    overrides: &SubmitOptions,
) -> Result<SubmitResult> {
    let submission = read_submission(path, services.config.submit.max_file_bytes).await?;
    let options = overrides.apply(services.similarity_options());
    let mut report = services.evaluator.evaluate(&submission, &options).await?;

    let action = match report.outcome.clone() {
        SimilarityOutcome::ExactMatch {
            document_id,
            deleted,
        } => SubmitAction::Duplicate {
            document_id,
            matched_on: MatchKind::Binary,
            deleted,
        },
        SimilarityOutcome::TextMatch {
            document_id,
            deleted,
        } => SubmitAction::Duplicate {
            document_id,
            matched_on: MatchKind::Text,
            deleted,
        },
        SimilarityOutcome::Restored {
            document_id,
            matched_on,
        } => SubmitAction::Restored {
            document_id,
            matched_on,
        },
        SimilarityOutcome::Candidates { candidates } if !overrides.force => {
            SubmitAction::Flagged { candidates }
        }
        SimilarityOutcome::Candidates { candidates } => {
            store_document(services, &submission, &mut report, &options, overrides, candidates)
                .await?
        }
        SimilarityOutcome::NoMatch => {
            store_document(services, &submission, &mut report, &options, overrides, Vec::new())
                .await?
        }
    };

    Ok(SubmitResult {
        path: path.display().to_string(),
        binary_hash: Some(report.binary_hash),
        text_hash: report.text_hash,
        trail: report.trail,
        action,
    })
}

async fn store_document(
    services: &Services,
    submission: &Submission,
    report: &mut SimilarityReport,
    options: &SimilarityOptions,
    overrides: &SubmitOptions,
    similar: Vec<SimilarityCandidate>,
) -> Result<SubmitAction> {
    let mut doc = Document::new_uploaded(
        submission.file_name.clone(),
        submission.content_type.clone(),
        report.binary_hash.clone(),
    );
    doc.collection_id = overrides.collection.clone();

    // The row goes in first: the unique binary hash decides a race between
    // identical submissions before any file is written.
    if let Err(e) = services.store.insert(&doc).await {
        if is_unique_violation(&e) {
            if let Some(action) = concurrent_duplicate(services, &report.binary_hash).await? {
                info!(file = %submission.file_name, "identical file stored concurrently");
                return Ok(action);
            }
        }
        return Err(e.context("Failed to record document"));
    }

    let key = format!("{}/{}", doc.id, submission.file_name);
    let stored: Result<()> = async {
        services.blobs.upload_bytes(&key, &submission.bytes).await?;
        services.store.set_storage_key(&doc.id, Some(&key)).await
    }
    .await;
    if let Err(e) = stored {
        warn!(document_id = %doc.id, err = %e, "document recorded but file was not stored");
        if let Err(mark) = services.lifecycle.mark_error(&doc.id).await {
            warn!(document_id = %doc.id, err = %mark, "could not mark document as failed");
        }
        return Err(e.context(format!("Failed to store {}", key)));
    }

    let report = match report.extracted_text.as_deref() {
        Some(text) => {
            let prepared = match report.prepared.take() {
                Some(p) => Some(p),
                None if options.skip_embeddings => {
                    Some(chunks_without_embeddings(text, &services.config.chunking)?)
                }
                None => None,
            };
            services
                .indexer
                .index_document(&doc.id, text, prepared)
                .await?
        }
        None => IndexReport {
            document_id: doc.id.clone(),
            chunk_count: 0,
            embedded: 0,
            pending: 0,
            tokens_used: 0,
            stats: Default::default(),
        },
    };

    info!(
        document_id = %doc.id,
        file = %submission.file_name,
        chunks = report.chunk_count,
        "document stored"
    );
    Ok(SubmitAction::Stored {
        document_id: doc.id,
        chunks: report.chunk_count,
        embedded: report.embedded,
        pending: report.pending,
        similar,
    })
}

/// The document another submission stored with the same bytes.
async fn concurrent_duplicate(services: &Services, binary_hash: &str) -> Result<Option<SubmitAction>> {
    for (scope, deleted) in [(LookupScope::Active, false), (LookupScope::Deleted, true)] {
        if let Some(existing) = services.store.find_by_binary_hash(binary_hash, scope).await? {
            return Ok(Some(SubmitAction::Duplicate {
                document_id: existing.id,
                matched_on: MatchKind::Binary,
                deleted,
            }));
        }
    }
    Ok(None)
}

/// Chunk `text` with every embedding slot left empty; `embed pending` fills them later.
fn chunks_without_embeddings(text: &str, chunker: &ChunkerConfig) -> Result<PreparedChunks> {
    let output = chunk_text(text, chunker)?;
    let embeddings = vec![None; output.chunks.len()];
    Ok(PreparedChunks {
        chunks: output.chunks,
        stats: output.stats,
        embeddings,
        ..PreparedChunks::default()
    })
}

/// Submit a file, or every matching file under a directory.
///
/// Per-file failures inside a directory walk are reported, not raised.
pub async fn submit_path(
    services: &Services,
    path: &Path,
    overrides: &SubmitOptions,
) -> Result<Vec<SubmitResult>> {
    if !path.is_dir() {
        return Ok(vec![submit_file(services, path, overrides).await?]);
    }

    let files = collect_files(path, &services.config.submit)?;
    let mut results = Vec::with_capacity(files.len());
    for file in files {
        match submit_file(services, &file, overrides).await {
            Ok(result) => results.push(result),
            Err(e) => {
                warn!(path = %file.display(), err = %e, "submission failed");
                results.push(SubmitResult::without_report(
                    &file,
                    SubmitAction::Failed {
                        error: format!("{:#}", e),
                    },
                ));
            }
        }
    }
    Ok(results)
}

/// Files under `root` matching the include globs and none of the excludes,
/// sorted by path.
pub fn collect_files(root: &Path, submit: &SubmitConfig) -> Result<Vec<PathBuf>> {
    let include_set = build_globset(&submit.include_globs)?;

    let mut excludes = vec!["**/.git/**".to_string()];
    excludes.extend(submit.exclude_globs.clone());
    let exclude_set = build_globset(&excludes)?;

    let mut files = Vec::new();
    for entry in WalkDir::new(root).follow_links(submit.follow_symlinks) {
        let entry = entry?;
        if !entry.file_type().is_file() {
            continue;
        }

        let path = entry.path();
        let relative = path.strip_prefix(root).unwrap_or(path);
        let rel_str = relative.to_string_lossy().to_string();

        if exclude_set.is_match(&rel_str) || !include_set.is_match(&rel_str) {
            continue;
        }
        files.push(path.to_path_buf());
    }

    files.sort();
    Ok(files)
}

fn build_globset(patterns: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        builder.add(Glob::new(pattern)?);
    }
    Ok(builder.build()?)
}

fn print_candidates(candidates: &[SimilarityCandidate]) {
    for c in candidates {
        println!(
            "    {}  score {:.3} (avg {:.3}, {}/{} chunks)",
            c.document_id, c.final_score, c.avg_similarity, c.matched_chunks, c.total_chunks
        );
    }
}

fn print_outcome(outcome: &SimilarityOutcome) {
    match outcome {
        SimilarityOutcome::ExactMatch {
            document_id,
            deleted,
        } => println!(
            "  exact match: {}{}",
            document_id,
            if *deleted { " (deleted)" } else { "" }
        ),
        SimilarityOutcome::TextMatch {
            document_id,
            deleted,
        } => println!(
            "  text match: {}{}",
            document_id,
            if *deleted { " (deleted)" } else { "" }
        ),
        SimilarityOutcome::Restored {
            document_id,
            matched_on,
        } => println!("  restored: {} (matched on {:?})", document_id, matched_on),
        SimilarityOutcome::Candidates { candidates } => {
            println!("  candidates: {}", candidates.len());
            print_candidates(candidates);
        }
        SimilarityOutcome::NoMatch => println!("  no match"),
    }
}

/// CLI entry point for `docsim check`.
pub async fn run_check(
    config: &Config,
    path: &Path,
    overrides: &SubmitOptions,
    json: bool,
) -> Result<()> {
    let services = Services::open(config).await?;
    let result = check_file(&services, path, overrides).await;
    services.close().await;
    let result = result?;

    if json {
        println!("{}", serde_json::to_string_pretty(&result)?);
        return Ok(());
    }

    println!("check {}", result.path);
    println!("  binary hash: {}", result.binary_hash);
    if let Some(ref h) = result.text_hash {
        println!("  text hash:   {}", h);
    }
    print_outcome(&result.outcome);
    Ok(())
}

/// CLI entry point for `docsim submit`.
pub async fn run_submit(
    config: &Config,
    path: &Path,
    overrides: &SubmitOptions,
    json: bool,
) -> Result<()> {
    let services = Services::open(config).await?;
    let results = submit_path(&services, path, overrides).await;
    services.close().await;
    let results = results?;

    if json {
        println!("{}", serde_json::to_string_pretty(&results)?);
        return Ok(());
    }

    let mut stored = 0usize;
    let mut duplicates = 0usize;
    let mut flagged = 0usize;
    let mut failed = 0usize;

    for r in &results {
        match &r.action {
            SubmitAction::Stored {
                document_id,
                chunks,
                embedded,
                pending,
                similar,
            } => {
                stored += 1;
                println!("stored     {} -> {}", r.path, document_id);
                println!(
                    "  chunks: {}  embedded: {}  pending: {}",
                    chunks, embedded, pending
                );
                if !similar.is_empty() {
                    println!("  stored despite {} similar document(s):", similar.len());
                    print_candidates(similar);
                }
            }
            SubmitAction::Duplicate {
                document_id,
                matched_on,
                deleted,
            } => {
                duplicates += 1;
                println!(
                    "duplicate  {} == {} ({:?}{})",
                    r.path,
                    document_id,
                    matched_on,
                    if *deleted { ", deleted" } else { "" }
                );
            }
            SubmitAction::Restored {
                document_id,
                matched_on,
            } => {
                duplicates += 1;
                println!("restored   {} -> {} ({:?})", r.path, document_id, matched_on);
            }
            SubmitAction::Flagged { candidates } => {
                flagged += 1;
                println!("flagged    {} ({} similar)", r.path, candidates.len());
                print_candidates(candidates);
            }
            SubmitAction::Failed { error } => {
                failed += 1;
                println!("failed     {}: {}", r.path, error);
            }
        }
    }

    if results.len() > 1 {
        println!();
        println!("submit");
        println!("  files: {}", results.len());
        println!("  stored: {}", stored);
        println!("  duplicates: {}", duplicates);
        println!("  flagged: {}", flagged);
        println!("  failed: {}", failed);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use docsim_core::embedding::{
        EmbeddingError, EmbeddingProvider, IndexedEmbedding, ProviderEmbeddings,
    };
    use docsim_core::models::DocumentStatus;
    use docsim_core::store::ChunkRepository;
    use std::sync::Arc;
    use tempfile::TempDir;

    const VOCAB: [&str; 8] = [
        "river", "mountain", "ocean", "forest", "desert", "city", "music", "code",
    ];

    /// Counts vocabulary words; texts on the same topics get parallel vectors.
    struct VocabProvider;

    #[async_trait]
    impl EmbeddingProvider for VocabProvider {
        fn model_name(&self) -> &str {
            "vocab"
        }
        fn dims(&self) -> usize {
            VOCAB.len()
        }
        async fn embed(&self, texts: &[String]) -> Result<ProviderEmbeddings, EmbeddingError> {
            let embeddings = texts
                .iter()
                .enumerate()
                .map(|(index, t)| {
                    let lower = t.to_lowercase();
                    IndexedEmbedding {
                        index,
                        vector: VOCAB
                            .iter()
                            .map(|w| lower.matches(w).count() as f32)
                            .collect(),
                    }
                })
                .collect();
            Ok(ProviderEmbeddings {
                embeddings,
                tokens_used: texts.len() as u64,
            })
        }
    }

    const NATURE: &str =
        "Rivers flow from the mountain into the ocean while the forest listens quietly.";
    const NATURE_REWORDED: &str =
        "The forest by the river reaches the mountain and finally the ocean at dusk today.";
    const URBAN: &str =
        "Music and code fill the city with a busy noise every single night around here.";

    async fn services(tmp: &TempDir, with_vectors: bool) -> Services {
        let toml_text = format!(
            "[db]\npath = \"{}\"\n[storage]\nroot = \"{}\"\n[embedding]\ninter_batch_delay_ms = 0\n",
            tmp.path().join("db.sqlite").display(),
            tmp.path().join("files").display()
        );
        let config: Config = toml::from_str(&toml_text).unwrap();
        let pool = crate::db::connect(&config).await.unwrap();
        crate::migrate::run_migrations(&pool).await.unwrap();
        let provider: Arc<dyn EmbeddingProvider> = if with_vectors {
            Arc::new(VocabProvider)
        } else {
            Arc::new(crate::embedding::DisabledProvider)
        };
        Services::assemble(config, pool, provider, with_vectors)
    }

    fn write(tmp: &TempDir, name: &str, body: &str) -> PathBuf {
        let dir = tmp.path().join("in");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join(name);
        std::fs::write(&path, body).unwrap();
        path
    }

    fn stored_id(result: &SubmitResult) -> String {
        match &result.action {
            SubmitAction::Stored { document_id, .. } => document_id.clone(),
            other => panic!("expected stored, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_novel_file_is_stored_and_indexed() {
        let tmp = TempDir::new().unwrap();
        let svc = services(&tmp, true).await;
        let path = write(&tmp, "a.txt", NATURE);

        let result = submit_file(&svc, &path, &SubmitOptions::default())
            .await
            .unwrap();
        let id = stored_id(&result);
        assert_eq!(result.trail.last(), Some(&CheckState::NoMatch));

        let doc = svc.store.get(&id).await.unwrap().unwrap();
        assert_eq!(doc.status, DocumentStatus::Processed);
        let key = doc.storage_key.unwrap();
        assert_eq!(key, format!("{}/a.txt", id));
        assert!(svc.blobs.exists(&key).await.unwrap());

        let chunks = svc.store.find_by_document_id(&id).await.unwrap();
        assert_eq!(chunks.len(), 1);
        assert!(chunks[0].embedding.is_some());
    }

    #[tokio::test]
    async fn test_concurrent_identical_submissions_store_once() {
        let tmp = TempDir::new().unwrap();
        let svc = services(&tmp, false).await;
        let path = write(&tmp, "a.txt", NATURE);
        let options = SubmitOptions::default();

        let (a, b) = tokio::join!(
            submit_file(&svc, &path, &options),
            submit_file(&svc, &path, &options)
        );
        let (a, b) = (a.unwrap(), b.unwrap());
        let (stored, other) = match (&a.action, &b.action) {
            (SubmitAction::Stored { .. }, _) => (&a, &b),
            _ => (&b, &a),
        };
        let id = stored_id(stored);
        assert!(matches!(
            &other.action,
            SubmitAction::Duplicate { document_id, matched_on: MatchKind::Binary, deleted: false }
                if *document_id == id
        ));

        assert_eq!(svc.store.list(None).await.unwrap().len(), 1);
        let files = walkdir::WalkDir::new(tmp.path().join("files"))
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().is_file())
            .count();
        assert_eq!(files, 1);
    }

    #[tokio::test]
    async fn test_binary_and_text_duplicates_are_skipped() {
        let tmp = TempDir::new().unwrap();
        let svc = services(&tmp, true).await;
        let first = write(&tmp, "a.txt", NATURE);
        let id = stored_id(
            &submit_file(&svc, &first, &SubmitOptions::default())
                .await
                .unwrap(),
        );

        let copy = write(&tmp, "copy.txt", NATURE);
        let result = submit_file(&svc, &copy, &SubmitOptions::default())
            .await
            .unwrap();
        assert!(matches!(
            result.action,
            SubmitAction::Duplicate { ref document_id, matched_on: MatchKind::Binary, deleted: false }
                if *document_id == id
        ));

        let respaced = write(&tmp, "respaced.txt", &format!("  {}  \n", NATURE.to_uppercase()));
        let result = submit_file(&svc, &respaced, &SubmitOptions::default())
            .await
            .unwrap();
        assert!(matches!(
            result.action,
            SubmitAction::Duplicate { matched_on: MatchKind::Text, .. }
        ));
        assert_eq!(svc.store.list(None).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_near_duplicate_flagged_unless_forced() {
        let tmp = TempDir::new().unwrap();
        let svc = services(&tmp, true).await;
        let original = stored_id(
            &submit_file(&svc, &write(&tmp, "a.txt", NATURE), &SubmitOptions::default())
                .await
                .unwrap(),
        );

        let reworded = write(&tmp, "b.txt", NATURE_REWORDED);
        let result = submit_file(&svc, &reworded, &SubmitOptions::default())
            .await
            .unwrap();
        match &result.action {
            SubmitAction::Flagged { candidates } => {
                assert_eq!(candidates.len(), 1);
                assert_eq!(candidates[0].document_id, original);
                assert!(candidates[0].final_score > 0.99);
            }
            other => panic!("expected flagged, got {:?}", other),
        }

        let forced = SubmitOptions {
            force: true,
            ..SubmitOptions::default()
        };
        let result = submit_file(&svc, &reworded, &forced).await.unwrap();
        match &result.action {
            SubmitAction::Stored { similar, .. } => assert_eq!(similar.len(), 1),
            other => panic!("expected stored, got {:?}", other),
        }

        let unrelated = write(&tmp, "c.txt", URBAN);
        let result = submit_file(&svc, &unrelated, &SubmitOptions::default())
            .await
            .unwrap();
        stored_id(&result);
    }

    #[tokio::test]
    async fn test_deleted_match_and_auto_restore() {
        let tmp = TempDir::new().unwrap();
        let svc = services(&tmp, false).await;
        let path = write(&tmp, "a.txt", NATURE);
        let id = stored_id(
            &submit_file(&svc, &path, &SubmitOptions::default())
                .await
                .unwrap(),
        );
        svc.lifecycle.soft_delete(&id).await.unwrap();

        let result = submit_file(&svc, &path, &SubmitOptions::default())
            .await
            .unwrap();
        assert!(matches!(
            result.action,
            SubmitAction::Duplicate { deleted: true, .. }
        ));

        let restore = SubmitOptions {
            auto_restore: true,
            ..SubmitOptions::default()
        };
        let result = submit_file(&svc, &path, &restore).await.unwrap();
        assert!(matches!(
            result.action,
            SubmitAction::Restored { ref document_id, .. } if *document_id == id
        ));
        let doc = svc.store.get(&id).await.unwrap().unwrap();
        assert_eq!(doc.status, DocumentStatus::Uploaded);
        assert_eq!(svc.store.count_by_document_id(&id).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_disabled_provider_leaves_chunks_pending() {
        let tmp = TempDir::new().unwrap();
        let svc = services(&tmp, false).await;
        let result = submit_file(&svc, &write(&tmp, "a.txt", NATURE), &SubmitOptions::default())
            .await
            .unwrap();
        match result.action {
            SubmitAction::Stored {
                chunks,
                embedded,
                pending,
                ..
            } => {
                assert_eq!(chunks, 1);
                assert_eq!(embedded, 0);
                assert_eq!(pending, 1);
            }
            other => panic!("expected stored, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_check_does_not_restore() {
        let tmp = TempDir::new().unwrap();
        let svc = services(&tmp, false).await;
        let path = write(&tmp, "a.txt", NATURE);
        let id = stored_id(
            &submit_file(&svc, &path, &SubmitOptions::default())
                .await
                .unwrap(),
        );
        svc.lifecycle.soft_delete(&id).await.unwrap();

        let overrides = SubmitOptions {
            auto_restore: true,
            ..SubmitOptions::default()
        };
        let result = check_file(&svc, &path, &overrides).await.unwrap();
        assert!(matches!(
            result.outcome,
            SimilarityOutcome::ExactMatch { deleted: true, .. }
        ));
        let doc = svc.store.get(&id).await.unwrap().unwrap();
        assert_eq!(doc.status, DocumentStatus::Deleted);
    }

    #[tokio::test]
    async fn test_directory_walk_reports_each_file() {
        let tmp = TempDir::new().unwrap();
        let svc = services(&tmp, false).await;
        write(&tmp, "a.txt", NATURE);
        write(&tmp, "b.md", URBAN);
        write(&tmp, "c.bin", "ignored by the include globs");
        write(&tmp, "d.txt", NATURE);

        let results = submit_path(&svc, &tmp.path().join("in"), &SubmitOptions::default())
            .await
            .unwrap();
        assert_eq!(results.len(), 3);
        assert!(matches!(results[0].action, SubmitAction::Stored { .. }));
        assert!(matches!(results[1].action, SubmitAction::Stored { .. }));
        assert!(matches!(results[2].action, SubmitAction::Duplicate { .. }));
    }

    #[test]
    fn test_collect_files_applies_globs() {
        let tmp = TempDir::new().unwrap();
        write(&tmp, "keep.pdf", "x");
        write(&tmp, "skip.bin", "x");
        std::fs::create_dir_all(tmp.path().join("in/drafts")).unwrap();
        std::fs::write(tmp.path().join("in/drafts/old.txt"), "x").unwrap();

        let submit = SubmitConfig {
            exclude_globs: vec!["drafts/**".to_string()],
            ..SubmitConfig::default()
        };
        let files = collect_files(&tmp.path().join("in"), &submit).unwrap();
        let names: Vec<String> = files
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().to_string())
            .collect();
        assert_eq!(names, vec!["keep.pdf"]);
    }

    #[tokio::test]
    async fn test_unsupported_file_is_rejected() {
        let tmp = TempDir::new().unwrap();
        let svc = services(&tmp, false).await;
        let path = write(&tmp, "blob.bin", "data");
        let err = submit_file(&svc, &path, &SubmitOptions::default())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("unsupported"));
    }
}
