//! Text generation capability.
//!
//! The pipeline only depends on the [`Generator`] trait. Two adapters ship
//! with the crate:
//! - **[`DisabledGenerator`]**: always errors; the pipeline degrades to an
//!   error-describing answer.
//! - **[`OpenAIGenerator`]**: OpenAI-compatible `/chat/completions`
//!   (works against any compatible base URL, e.g. a local server).
//!
//! The request timeout applied by the pipeline is the authoritative bound;
//! the HTTP client timeout here only protects against dead connections.

use anyhow::{bail, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use crate::config::GenerationConfig;
use crate::openai::OpenAiClient;

/// A fully assembled prompt plus sampling parameters.
#[derive(Debug, Clone, Serialize)]
pub struct GenerationRequest {
    pub system: String,
    pub prompt: String,
    pub temperature: f32,
    pub max_tokens: u32,
}

/// Trait for text generation backends.
#[async_trait]
pub trait Generator: Send + Sync {
    /// Returns the model identifier.
    fn model_name(&self) -> &str;
    /// Generate a completion for the request.
    async fn generate(&self, request: &GenerationRequest) -> Result<String>;
}

pub struct DisabledGenerator;

#[async_trait]
impl Generator for DisabledGenerator {
    fn model_name(&self) -> &str {
        "disabled"
    }
    async fn generate(&self, _request: &GenerationRequest) -> Result<String> {
        bail!("Generation provider is disabled")
    }
}

/// Chat-completions generator for OpenAI-compatible APIs. Needs
/// `OPENAI_API_KEY`.
pub struct OpenAIGenerator {
    model: String,
    api: OpenAiClient,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Debug, Deserialize)]
struct ChatMessage {
    #[serde(default)]
    content: Option<String>,
}

impl OpenAIGenerator {
    pub fn new(config: &GenerationConfig) -> Result<Self> {
        let model = config
            .model
            .clone()
            .ok_or_else(|| anyhow::anyhow!("generation.model required for OpenAI provider"))?;
        let api = OpenAiClient::from_env(
            "generation",
            config.base_url.as_deref(),
            Duration::from_secs(config.timeout_secs),
            config.max_retries,
        )?;
        Ok(Self { model, api })
    }
}

#[async_trait]
impl Generator for OpenAIGenerator {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn generate(&self, request: &GenerationRequest) -> Result<String> {
        let body = serde_json::json!({
            "model": self.model,
            "messages": [
                { "role": "system", "content": request.system },
                { "role": "user", "content": request.prompt },
            ],
            "temperature": request.temperature,
            "max_tokens": request.max_tokens,
        });
        debug!(model = %self.model, prompt_chars = request.prompt.len(), "requesting completion");
        let response: ChatResponse = self.api.post_json("chat/completions", &body).await?;
        first_message(response)
    }
}

/// Content of the first choice.
fn first_message(response: ChatResponse) -> Result<String> {
    response
        .choices
        .into_iter()
        .next()
        .and_then(|c| c.message.content)
        .ok_or_else(|| anyhow::anyhow!("Invalid chat response: no message content"))
}

/// Create the [`Generator`] named by the configuration.
pub fn create_generator(config: &GenerationConfig) -> Result<Arc<dyn Generator>> {
    match config.provider.as_str() {
        "disabled" => Ok(Arc::new(DisabledGenerator)),
        "openai" => Ok(Arc::new(OpenAIGenerator::new(config)?)),
        other => bail!("Unknown generation provider: {}", other),
    }
}
