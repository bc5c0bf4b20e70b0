//! Question answering orchestration.
//!
//! [`Pipeline::answer`] runs retrieval, the similarity filter, generation,
//! quality scoring and the metrics write before returning.
//! [`Pipeline::answer_async`] returns as soon as the answer exists and hands
//! scoring plus the metrics write to a background task.
//!
//! Neither variant returns an error. Retrieval and generation failures
//! become a degraded [`AnswerEnvelope`] whose `error` field carries the
//! cause; the same text lands in the metrics log.

use anyhow::Result;
use chrono::Utc;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::config::Config;
use crate::entailment::create_classifier;
use crate::error::PipelineError;
use crate::generation::{create_generator, GenerationRequest, Generator};
use crate::metrics::MetricsRecorder;
use crate::models::{AnswerEnvelope, MetricRecord, QualityBucket, RetrievalResult};
use crate::scoring::QualityScorer;
use crate::search::{HybridRetriever, SearchParams};
use crate::store::VectorStore;

const SYSTEM_PROMPT: &str = "You answer questions about legal and financial documents. \
Use only the numbered context passages. Cite the passages you rely on as [Source N]. \
If the context does not contain the answer, say that you could not find it.";

pub const NO_CONTEXT_ANSWER: &str =
    "I could not find relevant information in the available documents to answer this question.";

const RETRIEVAL_FAILED_ANSWER: &str =
    "I could not search the document collection right now. Please try again later.";

/// Per-call knobs for [`Pipeline::answer`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AnswerOptions {
    pub k: usize,
    /// Results with a final score below this are not used as context.
    pub min_similarity: f64,
    pub semantic_weight: f64,
    pub lexical_weight: f64,
    pub temperature: f32,
    pub max_tokens: u32,
}

impl Default for AnswerOptions {
    fn default() -> Self {
        let search = SearchParams::default();
        Self {
            k: search.k,
            min_similarity: 0.3,
            semantic_weight: search.semantic_weight,
            lexical_weight: search.lexical_weight,
            temperature: 0.1,
            max_tokens: 1024,
        }
    }
}

impl AnswerOptions {
    pub fn from_config(config: &Config) -> Self {
        Self {
            k: config.retrieval.k,
            min_similarity: config.retrieval.min_similarity,
            semantic_weight: config.retrieval.semantic_weight,
            lexical_weight: config.retrieval.lexical_weight,
            temperature: config.generation.temperature,
            max_tokens: config.generation.max_tokens,
        }
    }

    fn search_params(&self) -> SearchParams {
        SearchParams {
            k: self.k,
            semantic_weight: self.semantic_weight,
            lexical_weight: self.lexical_weight,
        }
    }
}

/// Everything known about a request once generation has finished (or
/// been skipped).
struct Draft {
    envelope: AnswerEnvelope,
    retrieved: usize,
    retrieval_ms: u64,
    generation_ms: u64,
    /// Context texts the answer was generated from.
    contexts: Vec<String>,
    /// Set when no scoring applies; the envelope is already final.
    settled: Option<QualityBucket>,
}

impl Draft {
    fn metric(&self, quality: QualityBucket, background: bool) -> MetricRecord {
        MetricRecord {
            query_id: self.envelope.query_id.clone(),
            timestamp: Utc::now(),
            question: self.envelope.question.clone(),
            retrieved: self.retrieved,
            chunks_used: self.envelope.chunks_used,
            retrieval_ms: self.retrieval_ms,
            generation_ms: self.generation_ms,
            total_ms: self.envelope.elapsed_ms,
            confidence: self.envelope.confidence,
            faithfulness: self.envelope.faithfulness,
            relevance: self.envelope.relevance,
            quality,
            background,
            error: self.envelope.error.clone(),
        }
    }
}

pub struct Pipeline {
    retriever: Arc<HybridRetriever>,
    generator: Arc<dyn Generator>,
    scorer: Arc<QualityScorer>,
    metrics: Arc<MetricsRecorder>,
    generation_timeout: Duration,
    background: Mutex<Vec<JoinHandle<()>>>,
}

impl Pipeline {
    pub fn new(
        retriever: Arc<HybridRetriever>,
        generator: Arc<dyn Generator>,
        scorer: Arc<QualityScorer>,
        metrics: Arc<MetricsRecorder>,
        generation_timeout: Duration,
    ) -> Self {
        Self {
            retriever,
            generator,
            scorer,
            metrics,
            generation_timeout,
            background: Mutex::new(Vec::new()),
        }
    }

    /// Compose a pipeline from configuration over an existing store. The
    /// entailment classifier is probed here, once.
    pub async fn from_config(config: &Config, store: Arc<dyn VectorStore>) -> Result<Self> {
        let retriever = Arc::new(HybridRetriever::build(store).await?);
        let generator = create_generator(&config.generation)?;
        let classifier = create_classifier(&config.scoring)?;
        let scorer = QualityScorer::probe(classifier, config.scoring.max_context_chars).await;
        let metrics = MetricsRecorder::open(&config.metrics.path)?;
        Ok(Self::new(
            retriever,
            generator,
            Arc::new(scorer),
            Arc::new(metrics),
            Duration::from_secs(config.generation.timeout_secs),
        ))
    }

    pub fn retriever(&self) -> &Arc<HybridRetriever> {
        &self.retriever
    }

    pub fn metrics(&self) -> &Arc<MetricsRecorder> {
        &self.metrics
    }

    /// Answer a question, scoring and logging before returning.
    #[instrument(level = "info", skip_all, fields(k = opts.k))]
    pub async fn answer(&self, question: &str, opts: &AnswerOptions) -> AnswerEnvelope {
        let mut draft = self.draft(question, opts).await;
        let quality = match draft.settled {
            Some(bucket) => bucket,
            None => {
                let scores = self
                    .scorer
                    .score(question, &draft.envelope.answer, &draft.contexts)
                    .await;
                draft.envelope.faithfulness = Some(scores.faithfulness);
                draft.envelope.relevance = Some(scores.relevance);
                QualityBucket::classify(
                    draft.envelope.confidence,
                    draft.envelope.faithfulness,
                    draft.envelope.relevance,
                )
            }
        };
        self.log_metric(&draft.metric(quality, false));
        draft.envelope
    }

    /// Answer a question; scoring and the metrics write happen afterwards in
    /// a background task, so `faithfulness` and `relevance` are `None` in
    /// the returned envelope.
    #[instrument(level = "info", skip_all, fields(k = opts.k))]
    pub async fn answer_async(&self, question: &str, opts: &AnswerOptions) -> AnswerEnvelope {
        let draft = self.draft(question, opts).await;
        if let Some(bucket) = draft.settled {
            self.log_metric(&draft.metric(bucket, false));
            return draft.envelope;
        }

        let envelope = draft.envelope.clone();
        let scorer = Arc::clone(&self.scorer);
        let metrics = Arc::clone(&self.metrics);
        let question = question.to_string();
        let handle = tokio::spawn(async move {
            let mut draft = draft;
            let scores = scorer
                .score(&question, &draft.envelope.answer, &draft.contexts)
                .await;
            draft.envelope.faithfulness = Some(scores.faithfulness);
            draft.envelope.relevance = Some(scores.relevance);
            let quality = QualityBucket::classify(
                draft.envelope.confidence,
                draft.envelope.faithfulness,
                draft.envelope.relevance,
            );
            if let Err(e) = metrics.record(draft.metric(quality, true)) {
                warn!(query_id = %draft.envelope.query_id, error = %e, "background metric write failed");
            }
            debug!(query_id = %draft.envelope.query_id, "background scoring finished");
        });

        self.track_background(handle);
        envelope
    }

    /// Wait for every background scoring task spawned so far.
    pub async fn wait_for_background(&self) {
        loop {
            let pending = self.take_background();
            if pending.is_empty() {
                return;
            }
            for handle in pending {
                if let Err(e) = handle.await {
                    warn!(error = %e, "background scoring task failed");
                }
            }
        }
    }

    fn track_background(&self, handle: JoinHandle<()>) {
        let mut tasks = match self.background.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        tasks.retain(|h| !h.is_finished());
        tasks.push(handle);
    }

    fn take_background(&self) -> Vec<JoinHandle<()>> {
        match self.background.lock() {
            Ok(mut guard) => guard.drain(..).collect(),
            Err(poisoned) => poisoned.into_inner().drain(..).collect(),
        }
    }

    fn log_metric(&self, record: &MetricRecord) {
        if let Err(e) = self.metrics.record(record.clone()) {
            warn!(query_id = %record.query_id, error = %e, "metric write failed");
        }
    }

    /// Retrieval, filtering and generation.
    async fn draft(&self, question: &str, opts: &AnswerOptions) -> Draft {
        let query_id = Uuid::new_v4().to_string();

        let retrieval_started = Instant::now();
        let retrieved = self.retriever.search(question, opts.search_params()).await;
        let retrieval_ms = elapsed_ms(retrieval_started);

        let results = match retrieved {
            Ok(results) => results,
            Err(e) => {
                let err = PipelineError::Retrieval(e);
                warn!(%query_id, error = %err, "retrieval failed");
                return Draft {
                    envelope: AnswerEnvelope {
                        query_id,
                        question: question.to_string(),
                        answer: RETRIEVAL_FAILED_ANSWER.to_string(),
                        sources: Vec::new(),
                        confidence: 0.0,
                        chunks_used: 0,
                        elapsed_ms: retrieval_ms,
                        faithfulness: None,
                        relevance: None,
                        error: Some(err.to_string()),
                    },
                    retrieved: 0,
                    retrieval_ms,
                    generation_ms: 0,
                    contexts: Vec::new(),
                    settled: Some(QualityBucket::Error),
                };
            }
        };

        let retrieved_count = results.len();
        let kept: Vec<RetrievalResult> = results
            .into_iter()
            .filter(|r| r.final_score >= opts.min_similarity)
            .collect();
        debug!(%query_id, retrieved = retrieved_count, kept = kept.len(), "similarity filter applied");

        if kept.is_empty() {
            info!(%query_id, "no relevant context found");
            return Draft {
                envelope: AnswerEnvelope {
                    query_id,
                    question: question.to_string(),
                    answer: NO_CONTEXT_ANSWER.to_string(),
                    sources: Vec::new(),
                    confidence: 0.0,
                    chunks_used: 0,
                    elapsed_ms: retrieval_ms,
                    faithfulness: Some(0.0),
                    relevance: Some(0.0),
                    error: None,
                },
                retrieved: retrieved_count,
                retrieval_ms,
                generation_ms: 0,
                contexts: Vec::new(),
                settled: Some(QualityBucket::NoContext),
            };
        }

        let confidence = confidence(&kept);
        let sources = kept.iter().map(format_citation).collect();
        let request = GenerationRequest {
            system: SYSTEM_PROMPT.to_string(),
            prompt: build_prompt(question, &kept),
            temperature: opts.temperature,
            max_tokens: opts.max_tokens,
        };

        let generation_started = Instant::now();
        let generated = self.generate(&request).await;
        let generation_ms = elapsed_ms(generation_started);

        let (answer, error, settled) = match generated {
            Ok(text) => (text, None, None),
            Err(err) => {
                warn!(%query_id, error = %err, "generation failed");
                (
                    format!(
                        "I found relevant passages but could not generate an answer ({}). \
                         Please consult the sources listed.",
                        err
                    ),
                    Some(err.to_string()),
                    Some(QualityBucket::Error),
                )
            }
        };

        let envelope = AnswerEnvelope {
            query_id,
            question: question.to_string(),
            answer,
            sources,
            confidence,
            chunks_used: kept.len(),
            elapsed_ms: retrieval_ms + generation_ms,
            faithfulness: None,
            relevance: None,
            error,
        };
        info!(
            query_id = %envelope.query_id,
            chunks_used = envelope.chunks_used,
            confidence = envelope.confidence,
            elapsed_ms = envelope.elapsed_ms,
            "answer generated"
        );
        Draft {
            envelope,
            retrieved: retrieved_count,
            retrieval_ms,
            generation_ms,
            contexts: kept.into_iter().map(|r| r.text).collect(),
            settled,
        }
    }

    async fn generate(&self, request: &GenerationRequest) -> Result<String, PipelineError> {
        match tokio::time::timeout(self.generation_timeout, self.generator.generate(request)).await {
            Err(_) => Err(PipelineError::GenerationTimeout(self.generation_timeout)),
            Ok(Err(e)) => Err(PipelineError::Generation(e)),
            Ok(Ok(text)) if text.trim().is_empty() => Err(PipelineError::EmptyGeneration),
            Ok(Ok(text)) => Ok(text.trim().to_string()),
        }
    }
}

fn elapsed_ms(started: Instant) -> u64 {
    started.elapsed().as_millis() as u64
}

/// Mean final score of the kept results, clamped to `[0, 1]`.
pub fn confidence(kept: &[RetrievalResult]) -> f64 {
    if kept.is_empty() {
        return 0.0;
    }
    let mean = kept.iter().map(|r| r.final_score).sum::<f64>() / kept.len() as f64;
    mean.clamp(0.0, 1.0)
}

/// `"<source> (Page <page>, <score%> match)"`
pub fn format_citation(result: &RetrievalResult) -> String {
    format!(
        "{} (Page {}, {:.1}% match)",
        result.source,
        result.page,
        result.final_score.clamp(0.0, 1.0) * 100.0
    )
}

/// Context passages labeled with their source and position, then the question.
pub fn build_prompt(question: &str, kept: &[RetrievalResult]) -> String {
    let mut prompt = String::from("Context:\n\n");
    for (i, r) in kept.iter().enumerate() {
        prompt.push_str(&format!(
            "[Source {}: {}, Page {}]\n{}\n\n",
            i + 1,
            r.source,
            r.page,
            r.text.trim()
        ));
    }
    prompt.push_str(&format!("Question: {}\n\nAnswer:", question.trim()));
    prompt
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ChunkMetadata, MatchType};

    fn result(source: &str, page: Option<u32>, score: f64) -> RetrievalResult {
        let metadata = ChunkMetadata {
            source: source.to_string(),
            page,
            ..Default::default()
        };
        RetrievalResult {
            chunk_id: "d:0".to_string(),
            text: "Every registered person shall furnish a return.".to_string(),
            source: source.to_string(),
            page: metadata.page_label(),
            metadata,
            semantic_score: score,
            lexical_score: 0.0,
            boost: 1.0,
            final_score: score,
            match_type: MatchType::Semantic,
        }
    }

    #[test]
    fn test_format_citation() {
        assert_eq!(
            format_citation(&result("CGST Act", Some(12), 0.876)),
            "CGST Act (Page 12, 87.6% match)"
        );
        assert_eq!(
            format_citation(&result("Circular 170", None, 1.4)),
            "Circular 170 (Page N/A, 100.0% match)"
        );
    }

    #[test]
    fn test_confidence_is_clamped_mean() {
        assert_eq!(confidence(&[]), 0.0);
        let kept = vec![result("a", None, 0.4), result("b", None, 0.8)];
        assert!((confidence(&kept) - 0.6).abs() < 1e-9);
        let boosted = vec![result("a", None, 1.3), result("b", None, 1.5)];
        assert_eq!(confidence(&boosted), 1.0);
    }

    #[test]
    fn test_build_prompt_labels_sources() {
        let prompt = build_prompt(
            "When is the return due?",
            &[result("CGST Act", Some(3), 0.9), result("GSTR Rules", None, 0.5)],
        );
        assert!(prompt.contains("[Source 1: CGST Act, Page 3]"));
        assert!(prompt.contains("[Source 2: GSTR Rules, Page N/A]"));
        assert!(prompt.ends_with("Question: When is the return due?\n\nAnswer:"));
    }

    #[test]
    fn test_options_from_config() {
        let mut config = Config::default();
        config.retrieval.k = 8;
        config.retrieval.min_similarity = 0.45;
        let opts = AnswerOptions::from_config(&config);
        assert_eq!(opts.k, 8);
        assert_eq!(opts.min_similarity, 0.45);
        assert_eq!(opts.semantic_weight, 0.7);
    }
}
