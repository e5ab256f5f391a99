//! Embedding provider abstraction and implementations.
//!
//! Defines the [`EmbeddingProvider`] trait and two concrete variants:
//! - **[`DeterministicProvider`]**: derives a reproducible pseudo-random
//!   vector from the SHA-256 of the text. No semantic meaning; exists so
//!   the rest of the pipeline can be exercised without a network.
//! - **[`OpenAIProvider`]**: calls the OpenAI embeddings API with batching,
//!   retry and backoff. When the remote call fails the whole request is
//!   answered by the deterministic variant instead, so callers always get
//!   vectors of the configured dimension.
//!
//! The variant is chosen once, by [`create_provider`].
//!
//! # Retry Strategy
//!
//! The OpenAI provider uses exponential backoff for transient errors:
//! - HTTP 429 (rate limited) and 5xx (server error) → retry
//! - HTTP 4xx (client error, not 429) → fail immediately
//! - Network errors and timeouts → retry
//! - Backoff: 1s, 2s, 4s, 8s, 16s, 32s (capped at 2^5)

use anyhow::bail;
use async_trait::async_trait;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use sha2::{Digest, Sha256};
use std::time::Duration;
use thiserror::Error;

use crate::config::EmbeddingConfig;
use crate::models::EmbeddingInfo;

#[derive(Debug, Error)]
pub enum EmbeddingError {
    #[error("embedding API error {status}: {body}")]
    Api { status: u16, body: String },
    #[error("embedding request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("invalid embedding response: {0}")]
    InvalidResponse(String),
    #[error("expected {expected} embeddings, got {actual}")]
    CountMismatch { expected: usize, actual: usize },
    #[error("expected dimension {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },
}

/// Maps text to fixed-length vectors.
///
/// Every vector returned by one provider has length [`dims`](EmbeddingProvider::dims).
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Short provider name (`"deterministic"`, `"openai"`).
    fn name(&self) -> &str;
    /// Model identifier (e.g. `"text-embedding-ada-002"`).
    fn model_name(&self) -> &str;
    /// Vector dimensionality (e.g. `1536`).
    fn dims(&self) -> usize;
    /// Texts sent per remote request; `None` for local providers.
    fn batch_size(&self) -> Option<usize>;

    /// Embed a batch of texts, returning one vector per text in input order.
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError>;

    /// Embed a single text.
    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        let mut vectors = self.embed_batch(&[text.to_string()]).await?;
        vectors.pop().ok_or(EmbeddingError::CountMismatch {
            expected: 1,
            actual: 0,
        })
    }

    fn info(&self) -> EmbeddingInfo {
        EmbeddingInfo {
            provider: self.name().to_string(),
            model: self.model_name().to_string(),
            dims: self.dims(),
            batch_size: self.batch_size(),
        }
    }
}

// ============ Deterministic Provider ============

/// Hash-seeded pseudo-random embeddings.
///
/// The SHA-256 digest of the UTF-8 text seeds a ChaCha8 generator, which
/// yields `dims` values uniformly in `[0, 1)`. Identical text gives an
/// identical vector on every call and in every process.
#[derive(Debug, Clone)]
pub struct DeterministicProvider {
    dims: usize,
}

impl DeterministicProvider {
    pub fn new(dims: usize) -> Self {
        Self { dims }
    }

    pub fn vector_for(&self, text: &str) -> Vec<f32> {
        let digest = Sha256::digest(text.as_bytes());
        let mut seed = [0u8; 32];
        seed.copy_from_slice(&digest);
        let mut rng = ChaCha8Rng::from_seed(seed);
        (0..self.dims).map(|_| rng.gen::<f32>()).collect()
    }
}

#[async_trait]
impl EmbeddingProvider for DeterministicProvider {
    fn name(&self) -> &str {
        "deterministic"
    }
    fn model_name(&self) -> &str {
        "deterministic-sha256"
    }
    fn dims(&self) -> usize {
        self.dims
    }
    fn batch_size(&self) -> Option<usize> {
        None
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        Ok(texts.iter().map(|t| self.vector_for(t)).collect())
    }
}

// ============ OpenAI Provider ============

/// Embedding provider using the OpenAI API.
///
/// Calls `POST {base_url}/embeddings` with the configured model, splitting
/// input into `batch_size` requests. Requires `OPENAI_API_KEY`.
pub struct OpenAIProvider {
    model: String,
    dims: usize,
    batch_size: usize,
    max_retries: u32,
    endpoint: String,
    api_key: String,
    client: reqwest::Client,
    fallback: DeterministicProvider,
}

impl OpenAIProvider {
    /// Create a provider reading the API key from `OPENAI_API_KEY`.
    pub fn new(config: &EmbeddingConfig) -> anyhow::Result<Self> {
        let api_key = match std::env::var("OPENAI_API_KEY") {
            Ok(key) if !key.trim().is_empty() => key,
            _ => bail!("OPENAI_API_KEY environment variable not set"),
        };
        Self::with_api_key(config, api_key)
    }

    pub fn with_api_key(config: &EmbeddingConfig, api_key: String) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self {
            model: config.model.clone(),
            dims: config.dims,
            batch_size: config.batch_size.max(1),
            max_retries: config.max_retries,
            endpoint: format!("{}/embeddings", config.base_url.trim_end_matches('/')),
            api_key,
            client,
            fallback: DeterministicProvider::new(config.dims),
        })
    }

    async fn embed_remote(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        let mut embeddings = Vec::with_capacity(texts.len());
        for (n, batch) in texts.chunks(self.batch_size).enumerate() {
            let vectors = self.request_with_retry(batch).await?;
            if vectors.len() != batch.len() {
                return Err(EmbeddingError::CountMismatch {
                    expected: batch.len(),
                    actual: vectors.len(),
                });
            }
            if let Some(bad) = vectors.iter().find(|v| v.len() != self.dims) {
                return Err(EmbeddingError::DimensionMismatch {
                    expected: self.dims,
                    actual: bad.len(),
                });
            }
            tracing::debug!(batch = n + 1, size = batch.len(), "embedded batch");
            embeddings.extend(vectors);
        }
        Ok(embeddings)
    }

    /// Retry strategy:
    /// - HTTP 429 or 5xx → retry with exponential backoff
    /// - HTTP 4xx (not 429) → fail immediately
    /// - Network error → retry
    async fn request_with_retry(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        let body = serde_json::json!({
            "model": self.model,
            "input": texts,
        });

        let mut last_err = None;

        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                let delay = Duration::from_secs(1 << (attempt - 1).min(5));
                tokio::time::sleep(delay).await;
            }

            let resp = self
                .client
                .post(&self.endpoint)
                .bearer_auth(&self.api_key)
                .json(&body)
                .send()
                .await;

            match resp {
                Ok(response) => {
                    let status = response.status();

                    if status.is_success() {
                        let json: serde_json::Value = response.json().await?;
                        return parse_openai_response(&json);
                    }

                    let body_text = response.text().await.unwrap_or_default();
                    let err = EmbeddingError::Api {
                        status: status.as_u16(),
                        body: body_text,
                    };
                    if status.as_u16() == 429 || status.is_server_error() {
                        last_err = Some(err);
                        continue;
                    }
                    return Err(err);
                }
                Err(e) => {
                    last_err = Some(EmbeddingError::Http(e));
                    continue;
                }
            }
        }

        Err(last_err.unwrap_or_else(|| {
            EmbeddingError::InvalidResponse("embedding failed after retries".to_string())
        }))
    }
}

#[async_trait]
impl EmbeddingProvider for OpenAIProvider {
    fn name(&self) -> &str {
        "openai"
    }
    fn model_name(&self) -> &str {
        &self.model
    }
    fn dims(&self) -> usize {
        self.dims
    }
    fn batch_size(&self) -> Option<usize> {
        Some(self.batch_size)
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        match self.embed_remote(texts).await {
            Ok(vectors) => Ok(vectors),
            Err(e) => {
                tracing::warn!(error = %e, texts = texts.len(), "remote embedding failed, using deterministic vectors");
                self.fallback.embed_batch(texts).await
            }
        }
    }
}

/// Extract `data[].embedding` arrays, ordered by their `index` field.
fn parse_openai_response(json: &serde_json::Value) -> Result<Vec<Vec<f32>>, EmbeddingError> {
    let data = json
        .get("data")
        .and_then(|d| d.as_array())
        .ok_or_else(|| EmbeddingError::InvalidResponse("missing data array".to_string()))?;

    let mut indexed = Vec::with_capacity(data.len());
    for (position, item) in data.iter().enumerate() {
        let embedding = item
            .get("embedding")
            .and_then(|e| e.as_array())
            .ok_or_else(|| EmbeddingError::InvalidResponse("missing embedding".to_string()))?;
        let index = item
            .get("index")
            .and_then(|i| i.as_u64())
            .map(|i| i as usize)
            .unwrap_or(position);

        let vec: Vec<f32> = embedding
            .iter()
            .map(|v| v.as_f64().unwrap_or(0.0) as f32)
            .collect();
        indexed.push((index, vec));
    }

    indexed.sort_by_key(|(index, _)| *index);
    Ok(indexed.into_iter().map(|(_, v)| v).collect())
}

/// Create the configured [`EmbeddingProvider`].
///
/// | Config Value | Provider |
/// |-------------|----------|
/// | `"deterministic"` | [`DeterministicProvider`] |
/// | `"openai"` | [`OpenAIProvider`] |
pub fn create_provider(config: &EmbeddingConfig) -> anyhow::Result<Box<dyn EmbeddingProvider>> {
    match config.provider.as_str() {
        "deterministic" => Ok(Box::new(DeterministicProvider::new(config.dims))),
        "openai" => Ok(Box::new(OpenAIProvider::new(config)?)),
        other => bail!("Unknown embedding provider: {}", other),
    }
}
