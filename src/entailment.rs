//! Textual-entailment (NLI) classifier capability.
//!
//! [`EntailmentClassifier::classify`] answers "does `premise` entail
//! `hypothesis`?" with a label and a confidence. The crate ships an HTTP
//! adapter for text-classification inference servers that accept
//! `{"inputs": {"text": premise, "text_pair": hypothesis}}` and answer with
//! a list (possibly nested) of `{label, score}` objects.

use anyhow::{bail, Result};
use async_trait::async_trait;
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;

use crate::config::ScoringConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntailmentLabel {
    Entailment,
    Neutral,
    Contradiction,
}

impl EntailmentLabel {
    /// Parse a model label; accepts any casing and common abbreviations.
    pub fn parse(label: &str) -> Option<Self> {
        match label.trim().to_lowercase().as_str() {
            "entailment" | "entail" | "entailed" => Some(EntailmentLabel::Entailment),
            "neutral" => Some(EntailmentLabel::Neutral),
            "contradiction" | "contradict" | "contradicted" => Some(EntailmentLabel::Contradiction),
            _ => None,
        }
    }
}

/// One classification: the winning label and its probability.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Entailment {
    pub label: EntailmentLabel,
    pub score: f64,
}

#[async_trait]
pub trait EntailmentClassifier: Send + Sync {
    fn name(&self) -> &str;
    async fn classify(&self, premise: &str, hypothesis: &str) -> Result<Entailment>;
}

/// Optional bearer token for the classifier endpoint.
pub const TOKEN_ENV: &str = "NLI_API_TOKEN";

/// Classifier backed by an HTTP inference endpoint.
pub struct HttpEntailmentClassifier {
    endpoint: String,
    token: Option<String>,
    client: reqwest::Client,
}

impl HttpEntailmentClassifier {
    pub fn new(endpoint: &str, timeout: Duration, token: Option<String>) -> Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            endpoint: endpoint.to_string(),
            token: token.filter(|t| !t.trim().is_empty()),
            client,
        })
    }
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum LabelScores {
    Flat(Vec<LabelScore>),
    Nested(Vec<Vec<LabelScore>>),
}

#[derive(Debug, Deserialize)]
struct LabelScore {
    label: String,
    score: f64,
}

#[async_trait]
impl EntailmentClassifier for HttpEntailmentClassifier {
    fn name(&self) -> &str {
        &self.endpoint
    }

    async fn classify(&self, premise: &str, hypothesis: &str) -> Result<Entailment> {
        let mut request = self.client.post(&self.endpoint).json(&serde_json::json!({
            "inputs": { "text": premise, "text_pair": hypothesis },
        }));
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }
        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            let body_text = response.text().await.unwrap_or_default();
            bail!("Classifier error {}: {}", status, body_text);
        }
        let scores: LabelScores = response.json().await?;
        best_label(scores)
    }
}

fn best_label(scores: LabelScores) -> Result<Entailment> {
    let flat = match scores {
        LabelScores::Flat(v) => v,
        LabelScores::Nested(v) => v.into_iter().flatten().collect(),
    };
    flat.into_iter()
        .filter_map(|ls| EntailmentLabel::parse(&ls.label).map(|label| Entailment { label, score: ls.score }))
        .max_by(|a, b| a.score.partial_cmp(&b.score).unwrap_or(std::cmp::Ordering::Equal))
        .ok_or_else(|| anyhow::anyhow!("Classifier response had no recognised labels"))
}

/// Create the classifier named by the configuration, or `None` when
/// scoring should use the word-overlap heuristic only.
pub fn create_classifier(config: &ScoringConfig) -> Result<Option<Arc<dyn EntailmentClassifier>>> {
    match config.classifier.as_str() {
        "disabled" => Ok(None),
        "http" => {
            let endpoint = config
                .endpoint
                .as_deref()
                .ok_or_else(|| anyhow::anyhow!("scoring.endpoint required for http classifier"))?;
            Ok(Some(Arc::new(HttpEntailmentClassifier::new(
                endpoint,
                Duration::from_secs(config.timeout_secs),
                std::env::var(TOKEN_ENV).ok(),
            )?)))
        }
        other => bail!("Unknown scoring classifier: {}", other),
    }
}
