//! TOML configuration.
//!
//! ```toml
//! [db]
//! path = "./data/docsim.sqlite"
//!
//! [storage]
//! root = "./data/files"
//! deleted_prefix = "deleted"
//!
//! [chunking]
//! max_chunk_size = 1000
//! overlap = 200
//!
//! [embedding]
//! provider = "ollama"
//! model = "nomic-embed-text"
//! dims = 768
//!
//! [similarity]
//! threshold = 0.7
//! auto_restore = false
//!
//! [submit]
//! include_globs = ["**/*.pdf", "**/*.docx", "**/*.txt", "**/*.md"]
//! ```
//!
//! Every section except `[db]` is optional.

use anyhow::{bail, Context, Result};
use docsim_core::batch::BatcherConfig;
use docsim_core::chunk::ChunkerConfig;
use docsim_core::similarity::SimilarityOptions;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub chunking: ChunkerConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub similarity: SimilarityOptions,
    #[serde(default)]
    pub submit: SubmitConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct StorageConfig {
    #[serde(default = "default_storage_root")]
    pub root: PathBuf,
    /// Key prefix deleted files are moved under.
    #[serde(default = "default_deleted_prefix")]
    pub deleted_prefix: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            root: default_storage_root(),
            deleted_prefix: default_deleted_prefix(),
        }
    }
}

fn default_storage_root() -> PathBuf {
    PathBuf::from("./data/files")
}
fn default_deleted_prefix() -> String {
    "deleted".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub dims: Option<usize>,
    /// Base URL for `openai` (OpenAI-compatible APIs) and `ollama`.
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_max_batch_tokens")]
    pub max_batch_tokens: usize,
    #[serde(default = "default_max_text_chars")]
    pub max_text_chars: usize,
    #[serde(default = "default_inter_batch_delay_ms")]
    pub inter_batch_delay_ms: u64,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: None,
            dims: None,
            url: None,
            batch_size: default_batch_size(),
            max_batch_tokens: default_max_batch_tokens(),
            max_text_chars: default_max_text_chars(),
            inter_batch_delay_ms: default_inter_batch_delay_ms(),
            max_retries: default_max_retries(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

fn default_provider() -> String {
    "disabled".to_string()
}
fn default_batch_size() -> usize {
    64
}
fn default_max_batch_tokens() -> usize {
    8_000
}
fn default_max_text_chars() -> usize {
    32_000
}
fn default_inter_batch_delay_ms() -> u64 {
    100
}
fn default_max_retries() -> u32 {
    5
}
fn default_timeout_secs() -> u64 {
    30
}

impl EmbeddingConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }

    /// Sub-batching limits for the core batcher.
    ///
    /// HTTP providers already retry 429/5xx internally, so the batcher adds
    /// only one extra attempt per sub-batch.
    pub fn batcher_config(&self) -> BatcherConfig {
        BatcherConfig {
            max_batch_size: self.batch_size,
            max_batch_tokens: self.max_batch_tokens,
            max_text_chars: self.max_text_chars,
            inter_batch_delay: Duration::from_millis(self.inter_batch_delay_ms),
            // Covers the provider's own retries with backoff.
            request_timeout: Duration::from_secs(
                self.timeout_secs
                    .saturating_mul(u64::from(self.max_retries) + 1)
                    .saturating_add(60),
            ),
            batch_retries: 1,
            ..BatcherConfig::default()
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct SubmitConfig {
    /// Globs a directory walk keeps, relative to the submitted directory.
    #[serde(default = "default_include_globs")]
    pub include_globs: Vec<String>,
    #[serde(default)]
    pub exclude_globs: Vec<String>,
    #[serde(default)]
    pub follow_symlinks: bool,
    /// Files larger than this are skipped.
    #[serde(default = "default_max_file_bytes")]
    pub max_file_bytes: u64,
}

impl Default for SubmitConfig {
    fn default() -> Self {
        Self {
            include_globs: default_include_globs(),
            exclude_globs: Vec::new(),
            follow_symlinks: false,
            max_file_bytes: default_max_file_bytes(),
        }
    }
}

fn default_include_globs() -> Vec<String> {
    ["**/*.pdf", "**/*.docx", "**/*.pptx", "**/*.txt", "**/*.md"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}
fn default_max_file_bytes() -> u64 {
    50 * 1024 * 1024
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;
    validate(&config)?;
    Ok(config)
}

fn validate(config: &Config) -> Result<()> {
    config
        .chunking
        .validate()
        .context("invalid [chunking] section")?;
    config
        .similarity
        .validate()
        .context("invalid [similarity] section")?;

    if config.storage.deleted_prefix.trim_matches('/').is_empty() {
        bail!("storage.deleted_prefix must not be empty");
    }

    let embedding = &config.embedding;
    match embedding.provider.as_str() {
        "disabled" | "openai" | "ollama" | "local" => {}
        other => bail!(
            "Unknown embedding provider: '{}'. Must be disabled, openai, ollama, or local.",
            other
        ),
    }

    if embedding.is_enabled() {
        if embedding.provider != "local" {
            if embedding.dims.is_none() || embedding.dims == Some(0) {
                bail!(
                    "embedding.dims must be > 0 when provider is '{}'",
                    embedding.provider
                );
            }
            if embedding.model.is_none() {
                bail!(
                    "embedding.model must be specified when provider is '{}'",
                    embedding.provider
                );
            }
        }
        if embedding.batch_size == 0 || embedding.max_batch_tokens == 0 {
            bail!("embedding.batch_size and embedding.max_batch_tokens must be > 0");
        }
        // Chunks grow by up to `overlap` characters after splitting.
        if config.chunking.max_output_chars() > embedding.max_text_chars {
            bail!(
                "chunking.max_chunk_size + chunking.overlap ({}) exceeds embedding.max_text_chars ({})",
                config.chunking.max_output_chars(),
                embedding.max_text_chars
            );
        }
    }

    for glob in config
        .submit
        .include_globs
        .iter()
        .chain(&config.submit.exclude_globs)
    {
        globset::Glob::new(glob).with_context(|| format!("invalid glob in [submit]: {}", glob))?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(toml_text: &str) -> Result<Config> {
        let config: Config = toml::from_str(toml_text)?;
        validate(&config)?;
        Ok(config)
    }

    #[test]
    fn test_minimal_config_uses_defaults() {
        let config = parse("[db]\npath = \"x.sqlite\"\n").unwrap();
        assert_eq!(config.chunking, ChunkerConfig::default());
        assert_eq!(config.similarity, SimilarityOptions::default());
        assert_eq!(config.storage.deleted_prefix, "deleted");
        assert!(!config.embedding.is_enabled());
        assert!(config
            .submit
            .include_globs
            .contains(&"**/*.pdf".to_string()));
    }

    #[test]
    fn test_partial_sections_keep_other_defaults() {
        let config = parse(
            r#"
            [db]
            path = "x.sqlite"

            [chunking]
            max_chunk_size = 500
            overlap = 50

            [similarity]
            threshold = 0.8
            "#,
        )
        .unwrap();
        assert_eq!(config.chunking.max_chunk_size, 500);
        assert_eq!(config.chunking.min_chunk_size, 50);
        assert!((config.similarity.threshold - 0.8).abs() < 1e-9);
        assert_eq!(config.similarity.neighbors_per_chunk, 5);
    }

    #[test]
    fn test_rejects_bad_threshold() {
        let err = parse("[db]\npath = \"x\"\n[similarity]\nthreshold = 1.2\n").unwrap_err();
        assert!(format!("{:#}", err).contains("threshold"));
    }

    #[test]
    fn test_rejects_overlap_not_below_max() {
        let err =
            parse("[db]\npath = \"x\"\n[chunking]\nmax_chunk_size = 100\noverlap = 100\n").unwrap_err();
        assert!(format!("{:#}", err).contains("overlap"));
    }

    #[test]
    fn test_enabled_provider_requires_model_and_dims() {
        let err = parse("[db]\npath = \"x\"\n[embedding]\nprovider = \"openai\"\n").unwrap_err();
        assert!(err.to_string().contains("dims"));

        let ok = parse(
            "[db]\npath = \"x\"\n[embedding]\nprovider = \"ollama\"\nmodel = \"m\"\ndims = 4\n",
        );
        assert!(ok.is_ok());
    }

    #[test]
    fn test_text_limit_covers_overlap() {
        let base = "[db]\npath = \"x\"\n[embedding]\nprovider = \"ollama\"\nmodel = \"m\"\ndims = 4\nmax_text_chars = 1000\n[chunking]\n";
        let err = parse(&format!("{}max_chunk_size = 1000\noverlap = 200\n", base)).unwrap_err();
        assert!(err.to_string().contains("chunking.overlap"), "{}", err);

        assert!(parse(&format!("{}max_chunk_size = 800\noverlap = 200\n", base)).is_ok());
    }

    #[test]
    fn test_unknown_provider() {
        let err = parse("[db]\npath = \"x\"\n[embedding]\nprovider = \"magic\"\n").unwrap_err();
        assert!(err.to_string().contains("Unknown embedding provider"));
    }

    #[test]
    fn test_batcher_config_mapping() {
        let cfg = EmbeddingConfig {
            batch_size: 16,
            inter_batch_delay_ms: 0,
            ..EmbeddingConfig::default()
        };
        let batcher = cfg.batcher_config();
        assert_eq!(batcher.max_batch_size, 16);
        assert!(batcher.inter_batch_delay.is_zero());
        assert_eq!(batcher.max_text_chars, 32_000);
    }
}
