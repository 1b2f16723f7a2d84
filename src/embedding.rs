//! Embedding provider implementations.
//!
//! Concrete backends for the core [`EmbeddingProvider`] trait:
//! - **[`DisabledProvider`]**: fails every call; used when embeddings are not configured.
//! - **[`OpenAIProvider`]**: `POST {url}/embeddings` on the OpenAI API or a compatible server.
//! - **[`OllamaProvider`]**: `POST {url}/api/embed` on a local Ollama instance.
//! - **`LocalProvider`**: in-process fastembed inference (feature `local-embeddings-fastembed`).
//!
//! # Retry Strategy
//!
//! HTTP providers retry transient errors with exponential backoff:
//! - HTTP 429 (rate limited) and 5xx (server error) → retry
//! - HTTP 413, or a 400 that complains about input size → [`EmbeddingError::BatchTooLarge`]
//!   so the batcher can split the sub-batch
//! - other HTTP 4xx → fail immediately
//! - network errors and timeouts → retry
//! - backoff: 1s, 2s, 4s, 8s, 16s, 32s (capped at 2^5)

use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Result};
use async_trait::async_trait;
use docsim_core::batch::estimate_tokens;
use docsim_core::embedding::{
    EmbeddingError, EmbeddingProvider, IndexedEmbedding, ProviderEmbeddings,
};
use tracing::warn;

use crate::config::EmbeddingConfig;

const DEFAULT_OPENAI_URL: &str = "https://api.openai.com/v1";
const DEFAULT_OLLAMA_URL: &str = "http://localhost:11434";

// ============ Disabled Provider ============

/// Used when `embedding.provider = "disabled"`. Every call fails with
/// [`EmbeddingError::Disabled`].
pub struct DisabledProvider;

#[async_trait]
impl EmbeddingProvider for DisabledProvider {
    fn model_name(&self) -> &str {
        "disabled"
    }
    fn dims(&self) -> usize {
        0
    }
    async fn embed(&self, _texts: &[String]) -> Result<ProviderEmbeddings, EmbeddingError> {
        Err(EmbeddingError::Disabled)
    }
}

// ============ Shared HTTP plumbing ============

struct HttpSettings {
    client: reqwest::Client,
    max_retries: u32,
}

impl HttpSettings {
    fn new(config: &EmbeddingConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self {
            client,
            max_retries: config.max_retries,
        })
    }
}

fn is_too_large(status: u16, body: &str) -> bool {
    if status == 413 {
        return true;
    }
    let body = body.to_ascii_lowercase();
    status == 400
        && (body.contains("too many")
            || body.contains("too long")
            || body.contains("maximum context length"))
}

/// POST `body` to `url`, retrying 429/5xx and network errors.
async fn post_with_retry(
    http: &HttpSettings,
    url: &str,
    bearer: Option<&str>,
    body: &serde_json::Value,
    label: &str,
) -> Result<serde_json::Value, EmbeddingError> {
    let mut last_err = None;

    for attempt in 0..=http.max_retries {
        if attempt > 0 {
            let delay = Duration::from_secs(1 << (attempt - 1).min(5));
            tokio::time::sleep(delay).await;
        }

        let mut request = http
            .client
            .post(url)
            .header("Content-Type", "application/json")
            .json(body);
        if let Some(key) = bearer {
            request = request.header("Authorization", format!("Bearer {}", key));
        }

        match request.send().await {
            Ok(response) => {
                let status = response.status();

                if status.is_success() {
                    return response
                        .json::<serde_json::Value>()
                        .await
                        .map_err(|e| EmbeddingError::InvalidResponse(e.to_string()));
                }

                let code = status.as_u16();
                let body_text = response.text().await.unwrap_or_default();

                if code == 429 {
                    warn!(provider = label, attempt, "rate limited, backing off");
                    last_err = Some(EmbeddingError::RateLimited(body_text));
                    continue;
                }
                if status.is_server_error() {
                    warn!(provider = label, attempt, status = code, "server error, retrying");
                    last_err = Some(EmbeddingError::Http {
                        status: code,
                        body: body_text,
                    });
                    continue;
                }
                if is_too_large(code, &body_text) {
                    return Err(EmbeddingError::BatchTooLarge(body_text));
                }
                return Err(EmbeddingError::Http {
                    status: code,
                    body: body_text,
                });
            }
            Err(e) if e.is_timeout() => {
                warn!(provider = label, attempt, "request timed out");
                last_err = Some(EmbeddingError::Timeout);
            }
            Err(e) => {
                warn!(provider = label, attempt, error = %e, "connection error");
                last_err = Some(EmbeddingError::Other(anyhow::anyhow!(
                    "{} connection error ({}): {}",
                    label,
                    url,
                    e
                )));
            }
        }
    }

    Err(last_err.unwrap_or_else(|| {
        EmbeddingError::Other(anyhow::anyhow!("{} embedding failed after retries", label))
    }))
}

fn parse_vector(value: &serde_json::Value, what: &str) -> Result<Vec<f32>, EmbeddingError> {
    let items = value
        .as_array()
        .ok_or_else(|| EmbeddingError::InvalidResponse(format!("{} is not an array", what)))?;
    items
        .iter()
        .map(|v| {
            v.as_f64()
                .map(|f| f as f32)
                .ok_or_else(|| EmbeddingError::InvalidResponse(format!("{} has a non-number", what)))
        })
        .collect()
}

fn estimated_tokens(texts: &[String]) -> u64 {
    texts.iter().map(|t| estimate_tokens(t) as u64).sum()
}

// ============ OpenAI Provider ============

/// Embedding provider using the OpenAI API (or any server speaking its
/// `/embeddings` protocol).
///
/// Requires the `OPENAI_API_KEY` environment variable.
pub struct OpenAIProvider {
    model: String,
    dims: usize,
    url: String,
    api_key: String,
    http: HttpSettings,
}

impl OpenAIProvider {
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        let model = config
            .model
            .clone()
            .ok_or_else(|| anyhow::anyhow!("embedding.model required for OpenAI provider"))?;
        let dims = config
            .dims
            .ok_or_else(|| anyhow::anyhow!("embedding.dims required for OpenAI provider"))?;
        let api_key = std::env::var("OPENAI_API_KEY")
            .map_err(|_| anyhow::anyhow!("OPENAI_API_KEY environment variable not set"))?;
        let url = config
            .url
            .clone()
            .unwrap_or_else(|| DEFAULT_OPENAI_URL.to_string());

        Ok(Self {
            model,
            dims,
            url: url.trim_end_matches('/').to_string(),
            api_key,
            http: HttpSettings::new(config)?,
        })
    }
}

#[async_trait]
impl EmbeddingProvider for OpenAIProvider {
    fn model_name(&self) -> &str {
        &self.model
    }
    fn dims(&self) -> usize {
        self.dims
    }

    async fn embed(&self, texts: &[String]) -> Result<ProviderEmbeddings, EmbeddingError> {
        let body = serde_json::json!({
            "model": self.model,
            "input": texts,
        });
        let json = post_with_retry(
            &self.http,
            &format!("{}/embeddings", self.url),
            Some(&self.api_key),
            &body,
            "openai",
        )
        .await?;
        parse_openai_response(&json, texts)
    }
}

/// Parse `data[].{index, embedding}` and `usage.total_tokens`.
///
/// Items without an `index` take their position in `data`.
fn parse_openai_response(
    json: &serde_json::Value,
    texts: &[String],
) -> Result<ProviderEmbeddings, EmbeddingError> {
    let data = json
        .get("data")
        .and_then(|d| d.as_array())
        .ok_or_else(|| EmbeddingError::InvalidResponse("missing data array".to_string()))?;

    let mut embeddings = Vec::with_capacity(data.len());
    for (position, item) in data.iter().enumerate() {
        let index = item
            .get("index")
            .and_then(|i| i.as_u64())
            .map(|i| i as usize)
            .unwrap_or(position);
        let embedding = item
            .get("embedding")
            .ok_or_else(|| EmbeddingError::InvalidResponse("missing embedding".to_string()))?;
        embeddings.push(IndexedEmbedding {
            index,
            vector: parse_vector(embedding, "embedding")?,
        });
    }

    let tokens_used = json
        .get("usage")
        .and_then(|u| u.get("total_tokens"))
        .and_then(|t| t.as_u64())
        .unwrap_or_else(|| estimated_tokens(texts));

    Ok(ProviderEmbeddings {
        embeddings,
        tokens_used,
    })
}

// ============ Ollama Provider ============

/// Embedding provider using a local Ollama instance.
///
/// Calls `POST /api/embed` on the configured URL (default `http://localhost:11434`).
/// The model must already be pulled (e.g. `ollama pull nomic-embed-text`).
pub struct OllamaProvider {
    model: String,
    dims: usize,
    url: String,
    http: HttpSettings,
}

impl OllamaProvider {
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        let model = config
            .model
            .clone()
            .ok_or_else(|| anyhow::anyhow!("embedding.model required for Ollama provider"))?;
        let dims = config
            .dims
            .ok_or_else(|| anyhow::anyhow!("embedding.dims required for Ollama provider"))?;
        let url = config
            .url
            .clone()
            .unwrap_or_else(|| DEFAULT_OLLAMA_URL.to_string());

        Ok(Self {
            model,
            dims,
            url: url.trim_end_matches('/').to_string(),
            http: HttpSettings::new(config)?,
        })
    }
}

#[async_trait]
impl EmbeddingProvider for OllamaProvider {
    fn model_name(&self) -> &str {
        &self.model
    }
    fn dims(&self) -> usize {
        self.dims
    }

    async fn embed(&self, texts: &[String]) -> Result<ProviderEmbeddings, EmbeddingError> {
        let body = serde_json::json!({
            "model": self.model,
            "input": texts,
        });
        let json = post_with_retry(
            &self.http,
            &format!("{}/api/embed", self.url),
            None,
            &body,
            "ollama",
        )
        .await?;
        parse_ollama_response(&json, texts)
    }
}

/// Ollama returns `embeddings` in input order and bills `prompt_eval_count`.
fn parse_ollama_response(
    json: &serde_json::Value,
    texts: &[String],
) -> Result<ProviderEmbeddings, EmbeddingError> {
    let items = json
        .get("embeddings")
        .and_then(|e| e.as_array())
        .ok_or_else(|| EmbeddingError::InvalidResponse("missing embeddings array".to_string()))?;

    let embeddings = items
        .iter()
        .enumerate()
        .map(|(index, v)| {
            Ok(IndexedEmbedding {
                index,
                vector: parse_vector(v, "embedding")?,
            })
        })
        .collect::<Result<Vec<_>, EmbeddingError>>()?;

    let tokens_used = json
        .get("prompt_eval_count")
        .and_then(|t| t.as_u64())
        .unwrap_or_else(|| estimated_tokens(texts));

    Ok(ProviderEmbeddings {
        embeddings,
        tokens_used,
    })
}

// ============ Local Provider (fastembed) ============

/// In-process embeddings via fastembed.
///
/// The model is downloaded from Hugging Face on first use and cached;
/// after that no network calls are made. The loaded model is kept for the
/// lifetime of the provider.
#[cfg(feature = "local-embeddings-fastembed")]
pub struct LocalProvider {
    model_name: String,
    dims: usize,
    model: fastembed::EmbeddingModel,
    loaded: Arc<std::sync::Mutex<Option<fastembed::TextEmbedding>>>,
}

#[cfg(feature = "local-embeddings-fastembed")]
impl LocalProvider {
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        let model_name = config
            .model
            .clone()
            .unwrap_or_else(|| "all-minilm-l6-v2".to_string());
        let dims = config.dims.unwrap_or_else(|| local_model_dims(&model_name));
        let model = config_to_fastembed_model(&model_name)?;
        Ok(Self {
            model_name,
            dims,
            model,
            loaded: Arc::new(std::sync::Mutex::new(None)),
        })
    }
}

#[cfg(feature = "local-embeddings-fastembed")]
#[async_trait]
impl EmbeddingProvider for LocalProvider {
    fn model_name(&self) -> &str {
        &self.model_name
    }
    fn dims(&self) -> usize {
        self.dims
    }

    async fn embed(&self, texts: &[String]) -> Result<ProviderEmbeddings, EmbeddingError> {
        let loaded = Arc::clone(&self.loaded);
        let model = self.model.clone();
        let owned = texts.to_vec();

        let vectors = tokio::task::spawn_blocking(move || -> Result<Vec<Vec<f32>>> {
            let mut guard = loaded
                .lock()
                .map_err(|_| anyhow::anyhow!("local embedding model lock poisoned"))?;
            if guard.is_none() {
                let instance = fastembed::TextEmbedding::try_new(
                    fastembed::InitOptions::new(model).with_show_download_progress(true),
                )
                .map_err(|e| anyhow::anyhow!("Failed to initialize local embedding model: {}", e))?;
                *guard = Some(instance);
            }
            let instance = guard
                .as_mut()
                .ok_or_else(|| anyhow::anyhow!("local embedding model not loaded"))?;
            instance
                .embed(owned, None)
                .map_err(|e| anyhow::anyhow!("Local embedding failed: {}", e))
        })
        .await
        .map_err(|e| EmbeddingError::Other(e.into()))??;

        Ok(ProviderEmbeddings {
            embeddings: vectors
                .into_iter()
                .enumerate()
                .map(|(index, vector)| IndexedEmbedding { index, vector })
                .collect(),
            tokens_used: estimated_tokens(texts),
        })
    }
}

#[cfg(feature = "local-embeddings-fastembed")]
fn local_model_dims(name: &str) -> usize {
    match name {
        "bge-base-en-v1.5" | "nomic-embed-text-v1" | "nomic-embed-text-v1.5" => 768,
        "multilingual-e5-base" => 768,
        "bge-large-en-v1.5" | "multilingual-e5-large" => 1024,
        _ => 384,
    }
}

#[cfg(feature = "local-embeddings-fastembed")]
fn config_to_fastembed_model(name: &str) -> Result<fastembed::EmbeddingModel> {
    match name {
        "all-minilm-l6-v2" => Ok(fastembed::EmbeddingModel::AllMiniLML6V2),
        "bge-small-en-v1.5" => Ok(fastembed::EmbeddingModel::BGESmallENV15),
        "bge-base-en-v1.5" => Ok(fastembed::EmbeddingModel::BGEBaseENV15),
        "bge-large-en-v1.5" => Ok(fastembed::EmbeddingModel::BGELargeENV15),
        "nomic-embed-text-v1" => Ok(fastembed::EmbeddingModel::NomicEmbedTextV1),
        "nomic-embed-text-v1.5" => Ok(fastembed::EmbeddingModel::NomicEmbedTextV15),
        "multilingual-e5-small" => Ok(fastembed::EmbeddingModel::MultilingualE5Small),
        "multilingual-e5-base" => Ok(fastembed::EmbeddingModel::MultilingualE5Base),
        "multilingual-e5-large" => Ok(fastembed::EmbeddingModel::MultilingualE5Large),
        other => bail!(
            "Unknown local embedding model: '{}'. Supported models: \
             all-minilm-l6-v2, bge-small-en-v1.5, bge-base-en-v1.5, bge-large-en-v1.5, \
             nomic-embed-text-v1, nomic-embed-text-v1.5, \
             multilingual-e5-small, multilingual-e5-base, multilingual-e5-large",
            other
        ),
    }
}

/// Create the provider named by `config.provider`.
///
/// | Config Value | Provider |
/// |-------------|----------|
/// | `"disabled"` | [`DisabledProvider`] |
/// | `"openai"` | [`OpenAIProvider`] |
/// | `"ollama"` | [`OllamaProvider`] |
/// | `"local"` | `LocalProvider` (feature `local-embeddings-fastembed`) |
pub fn create_provider(config: &EmbeddingConfig) -> Result<Arc<dyn EmbeddingProvider>> {
    match config.provider.as_str() {
        "disabled" => Ok(Arc::new(DisabledProvider)),
        "openai" => Ok(Arc::new(OpenAIProvider::new(config)?)),
        "ollama" => Ok(Arc::new(OllamaProvider::new(config)?)),
        #[cfg(feature = "local-embeddings-fastembed")]
        "local" => Ok(Arc::new(LocalProvider::new(config)?)),
        #[cfg(not(feature = "local-embeddings-fastembed"))]
        "local" => bail!(
            "Local embedding provider requires building with --features local-embeddings-fastembed"
        ),
        other => bail!("Unknown embedding provider: {}", other),
    }
}
