use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::chunk::MIN_HEADER_CHARS;

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub generation: GenerationConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub scoring: ScoringConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
    #[serde(default)]
    pub corpus: Option<CorpusConfig>,
}

/// What to do with the sentences left over once an oversized section has
/// filled a chunk.
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum Overflow {
    /// Remaining sentences start the next chunk.
    #[default]
    Continue,
    /// Remaining sentences are discarded.
    Truncate,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChunkingConfig {
    #[serde(default = "default_max_chunk_size")]
    pub max_chunk_size: usize,
    #[serde(default = "default_min_chunk_size")]
    pub min_chunk_size: usize,
    #[serde(default)]
    pub overflow: Overflow,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            max_chunk_size: default_max_chunk_size(),
            min_chunk_size: default_min_chunk_size(),
            overflow: Overflow::Continue,
        }
    }
}

fn default_max_chunk_size() -> usize {
    1000
}
fn default_min_chunk_size() -> usize {
    100
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    #[serde(default = "default_k")]
    pub k: usize,
    #[serde(default = "default_semantic_weight")]
    pub semantic_weight: f64,
    #[serde(default = "default_lexical_weight")]
    pub lexical_weight: f64,
    #[serde(default = "default_min_similarity")]
    pub min_similarity: f64,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            k: default_k(),
            semantic_weight: default_semantic_weight(),
            lexical_weight: default_lexical_weight(),
            min_similarity: default_min_similarity(),
        }
    }
}

fn default_k() -> usize {
    5
}
fn default_semantic_weight() -> f64 {
    0.7
}
fn default_lexical_weight() -> f64 {
    0.3
}
fn default_min_similarity() -> f64 {
    0.3
}

#[derive(Debug, Deserialize, Clone)]
pub struct GenerationConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "default_generation_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_generation_retries")]
    pub max_retries: u32,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: None,
            base_url: None,
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
            timeout_secs: default_generation_timeout_secs(),
            max_retries: default_generation_retries(),
        }
    }
}

fn default_temperature() -> f32 {
    0.1
}
fn default_max_tokens() -> u32 {
    1024
}
fn default_generation_timeout_secs() -> u64 {
    60
}
fn default_generation_retries() -> u32 {
    2
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub dims: Option<usize>,
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
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
            base_url: None,
            batch_size: default_batch_size(),
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
fn default_max_retries() -> u32 {
    5
}
fn default_timeout_secs() -> u64 {
    30
}

#[derive(Debug, Deserialize, Clone)]
pub struct ScoringConfig {
    /// `"disabled"` (word-overlap only) or `"http"`.
    #[serde(default = "default_provider")]
    pub classifier: String,
    #[serde(default)]
    pub endpoint: Option<String>,
    #[serde(default = "default_scoring_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_max_context_chars")]
    pub max_context_chars: usize,
    /// Score answers on a background task instead of inline.
    #[serde(default)]
    pub background: bool,
}

impl Default for ScoringConfig {
    fn default() -> Self {
        Self {
            classifier: default_provider(),
            endpoint: None,
            timeout_secs: default_scoring_timeout_secs(),
            max_context_chars: default_max_context_chars(),
            background: false,
        }
    }
}

fn default_scoring_timeout_secs() -> u64 {
    20
}
fn default_max_context_chars() -> usize {
    2000
}

#[derive(Debug, Deserialize, Clone)]
pub struct MetricsConfig {
    #[serde(default = "default_metrics_path")]
    pub path: PathBuf,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            path: default_metrics_path(),
        }
    }
}

fn default_metrics_path() -> PathBuf {
    PathBuf::from("metrics.jsonl")
}

#[derive(Debug, Deserialize, Clone)]
pub struct CorpusConfig {
    pub root: PathBuf,
    #[serde(default = "default_include_globs")]
    pub include_globs: Vec<String>,
    #[serde(default)]
    pub exclude_globs: Vec<String>,
}

fn default_include_globs() -> Vec<String> {
    vec!["**/*.txt".to_string(), "**/*.md".to_string()]
}

impl EmbeddingConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }
}

impl GenerationConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;
    validate(&config)?;
    Ok(config)
}

pub fn validate(config: &Config) -> Result<()> {
    // Validate chunking
    if config.chunking.max_chunk_size == 0 {
        anyhow::bail!("chunking.max_chunk_size must be > 0");
    }
    if config.chunking.min_chunk_size >= config.chunking.max_chunk_size {
        anyhow::bail!("chunking.min_chunk_size must be < chunking.max_chunk_size");
    }
    if config.chunking.max_chunk_size - config.chunking.min_chunk_size < MIN_HEADER_CHARS {
        anyhow::bail!(
            "chunking.max_chunk_size must exceed chunking.min_chunk_size by at least {} (context header)",
            MIN_HEADER_CHARS
        );
    }

    // Validate retrieval
    let retrieval = &config.retrieval;
    if retrieval.k < 1 {
        anyhow::bail!("retrieval.k must be >= 1");
    }
    if retrieval.semantic_weight < 0.0 || retrieval.lexical_weight < 0.0 {
        anyhow::bail!("retrieval weights must be >= 0.0");
    }
    if retrieval.semantic_weight + retrieval.lexical_weight <= 0.0 {
        anyhow::bail!("retrieval.semantic_weight and retrieval.lexical_weight cannot both be 0");
    }
    if retrieval.min_similarity < 0.0 {
        anyhow::bail!("retrieval.min_similarity must be >= 0.0");
    }

    // Validate generation
    let generation = &config.generation;
    if !(0.0..=2.0).contains(&generation.temperature) {
        anyhow::bail!("generation.temperature must be in [0.0, 2.0]");
    }
    if generation.max_tokens == 0 {
        anyhow::bail!("generation.max_tokens must be > 0");
    }
    if generation.timeout_secs == 0 {
        anyhow::bail!("generation.timeout_secs must be > 0");
    }
    match generation.provider.as_str() {
        "disabled" => {}
        "openai" => {
            if generation.model.is_none() {
                anyhow::bail!("generation.model must be specified when provider is 'openai'");
            }
        }
        other => anyhow::bail!(
            "Unknown generation provider: '{}'. Must be disabled or openai.",
            other
        ),
    }

    // Validate embedding
    if config.embedding.is_enabled() {
        if config.embedding.dims.is_none() || config.embedding.dims == Some(0) {
            anyhow::bail!(
                "embedding.dims must be > 0 when provider is '{}'",
                config.embedding.provider
            );
        }
        if config.embedding.model.is_none() {
            anyhow::bail!(
                "embedding.model must be specified when provider is '{}'",
                config.embedding.provider
            );
        }
    }

    match config.embedding.provider.as_str() {
        "disabled" | "openai" => {}
        other => anyhow::bail!(
            "Unknown embedding provider: '{}'. Must be disabled or openai.",
            other
        ),
    }

    // Validate scoring
    match config.scoring.classifier.as_str() {
        "disabled" => {}
        "http" => {
            if config.scoring.endpoint.is_none() {
                anyhow::bail!("scoring.endpoint must be specified when classifier is 'http'");
            }
        }
        other => anyhow::bail!(
            "Unknown scoring classifier: '{}'. Must be disabled or http.",
            other
        ),
    }
    if config.scoring.max_context_chars == 0 {
        anyhow::bail!("scoring.max_context_chars must be > 0");
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(toml_str: &str) -> Result<Config> {
        let config: Config = toml::from_str(toml_str)?;
        validate(&config)?;
        Ok(config)
    }

    #[test]
    fn test_empty_file_uses_defaults() {
        let config = parse("").unwrap();
        assert_eq!(config.chunking.max_chunk_size, 1000);
        assert_eq!(config.chunking.overflow, Overflow::Continue);
        assert_eq!(config.retrieval.k, 5);
        assert!((config.retrieval.semantic_weight - 0.7).abs() < 1e-9);
        assert!((config.retrieval.lexical_weight - 0.3).abs() < 1e-9);
        assert!(!config.generation.is_enabled());
        assert!(config.corpus.is_none());
    }

    #[test]
    fn test_full_config() {
        let config = parse(
            r#"
[chunking]
max_chunk_size = 800
min_chunk_size = 50
overflow = "truncate"

[retrieval]
k = 8
min_similarity = 0.25

[generation]
provider = "openai"
model = "gpt-4o-mini"
timeout_secs = 10

[scoring]
classifier = "http"
endpoint = "http://localhost:8080/classify"
background = true

[metrics]
path = "/tmp/m.jsonl"

[corpus]
root = "./docs"
"#,
        )
        .unwrap();
        assert_eq!(config.chunking.overflow, Overflow::Truncate);
        assert_eq!(config.retrieval.k, 8);
        assert!(config.generation.is_enabled());
        assert!(config.scoring.background);
        let corpus = config.corpus.unwrap();
        assert_eq!(corpus.include_globs.len(), 2);
    }

    #[test]
    fn test_rejects_min_above_max() {
        let err = parse("[chunking]\nmax_chunk_size = 100\nmin_chunk_size = 200\n").unwrap_err();
        assert!(err.to_string().contains("min_chunk_size"));
    }

    #[test]
    fn test_rejects_sizes_without_header_room() {
        let err = parse("[chunking]\nmax_chunk_size = 110\nmin_chunk_size = 100\n").unwrap_err();
        assert!(err.to_string().contains("context header"));
        assert!(parse("[chunking]\nmax_chunk_size = 150\nmin_chunk_size = 100\n").is_ok());
    }

    #[test]
    fn test_embedding_defaults_match_serde_defaults() {
        let config = parse("[embedding]\nprovider = \"disabled\"\n").unwrap();
        let default = EmbeddingConfig::default();
        assert_eq!(config.embedding.batch_size, default.batch_size);
        assert_eq!(config.embedding.max_retries, default.max_retries);
        assert_eq!(config.embedding.timeout_secs, default.timeout_secs);
    }

    #[test]
    fn test_rejects_zero_weights() {
        let err =
            parse("[retrieval]\nsemantic_weight = 0.0\nlexical_weight = 0.0\n").unwrap_err();
        assert!(err.to_string().contains("cannot both be 0"));
    }

    #[test]
    fn test_openai_generation_requires_model() {
        let err = parse("[generation]\nprovider = \"openai\"\n").unwrap_err();
        assert!(err.to_string().contains("generation.model"));
    }

    #[test]
    fn test_http_classifier_requires_endpoint() {
        let err = parse("[scoring]\nclassifier = \"http\"\n").unwrap_err();
        assert!(err.to_string().contains("scoring.endpoint"));
    }

    #[test]
    fn test_load_config_missing_file() {
        let err = load_config(Path::new("/nonexistent/lexrag.toml")).unwrap_err();
        assert!(err.to_string().contains("Failed to read config file"));
    }
}
