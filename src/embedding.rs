//! Embedding capability.
//!
//! Chunks are embedded from their enriched text at ingestion time and
//! queries are embedded on every search, both through
//! [`EmbeddingProvider`]. [`create_provider`] picks the adapter named in
//! `[embedding]`:
//!
//! | `provider` | Adapter |
//! |------------|---------|
//! | `"disabled"` | [`DisabledProvider`], every call fails |
//! | `"openai"` | [`OpenAIProvider`], batched `/embeddings` calls |

use anyhow::{bail, Result};
use async_trait::async_trait;
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use crate::config::EmbeddingConfig;
use crate::openai::OpenAiClient;

#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    fn model_name(&self) -> &str;
    /// Vector dimensionality; `0` when unknown.
    fn dims(&self) -> usize;
    /// One vector per input text, in input order.
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;
}

/// Embed a single query text.
pub async fn embed_query(provider: &dyn EmbeddingProvider, text: &str) -> Result<Vec<f32>> {
    provider
        .embed(&[text.to_string()])
        .await?
        .pop()
        .ok_or_else(|| anyhow::anyhow!("embedding provider returned no vector"))
}

pub struct DisabledProvider;

#[async_trait]
impl EmbeddingProvider for DisabledProvider {
    fn model_name(&self) -> &str {
        "disabled"
    }
    fn dims(&self) -> usize {
        0
    }
    async fn embed(&self, _texts: &[String]) -> Result<Vec<Vec<f32>>> {
        bail!("Embedding provider is disabled")
    }
}

/// Embeddings from an OpenAI-compatible API. Needs `OPENAI_API_KEY`.
pub struct OpenAIProvider {
    model: String,
    dims: usize,
    batch_size: usize,
    api: OpenAiClient,
}

#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingDatum>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingDatum {
    #[serde(default)]
    index: Option<usize>,
    embedding: Vec<f32>,
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
        let api = OpenAiClient::from_env(
            "embedding",
            config.base_url.as_deref(),
            Duration::from_secs(config.timeout_secs),
            config.max_retries,
        )?;
        Ok(Self {
            model,
            dims,
            batch_size: config.batch_size.max(1),
            api,
        })
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let body = serde_json::json!({ "model": self.model, "input": texts });
        let response: EmbeddingResponse = self.api.post_json("embeddings", &body).await?;
        check_vectors(into_ordered_vectors(response), texts.len(), self.dims)
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
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let mut out = Vec::with_capacity(texts.len());
        for (n, batch) in texts.chunks(self.batch_size).enumerate() {
            debug!(batch = n, size = batch.len(), model = %self.model, "embedding batch");
            out.extend(self.embed_batch(batch).await?);
        }
        Ok(out)
    }
}

/// Vectors in `index` order; items without an index keep their position.
fn into_ordered_vectors(response: EmbeddingResponse) -> Vec<Vec<f32>> {
    let mut data: Vec<(usize, Vec<f32>)> = response
        .data
        .into_iter()
        .enumerate()
        .map(|(pos, d)| (d.index.unwrap_or(pos), d.embedding))
        .collect();
    data.sort_by_key(|(index, _)| *index);
    data.into_iter().map(|(_, v)| v).collect()
}

/// One vector per input, each `dims` wide.
fn check_vectors(vectors: Vec<Vec<f32>>, inputs: usize, dims: usize) -> Result<Vec<Vec<f32>>> {
    if vectors.len() != inputs {
        bail!(
            "embedding API returned {} vectors for {} inputs",
            vectors.len(),
            inputs
        );
    }
    if let Some(v) = vectors.iter().find(|v| v.len() != dims) {
        bail!(
            "embedding API returned a {}-dimensional vector, expected {}",
            v.len(),
            dims
        );
    }
    Ok(vectors)
}

pub fn create_provider(config: &EmbeddingConfig) -> Result<Arc<dyn EmbeddingProvider>> {
    match config.provider.as_str() {
        "disabled" => Ok(Arc::new(DisabledProvider)),
        "openai" => Ok(Arc::new(OpenAIProvider::new(config)?)),
        other => bail!("Unknown embedding provider: {}", other),
    }
}

/// Cosine similarity in `[-1, 1]`; `0` for empty, mismatched or zero vectors.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let (dot, norm_a, norm_b) = a
        .iter()
        .zip(b)
        .fold((0.0f32, 0.0f32, 0.0f32), |(d, na, nb), (x, y)| {
            (d + x * y, na + x * x, nb + y * y)
        });
    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom < f32::EPSILON {
        0.0
    } else {
        dot / denom
    }
}
