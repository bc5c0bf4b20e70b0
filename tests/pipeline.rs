use anyhow::Result;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

use lexrag::generation::{GenerationRequest, Generator};
use lexrag::metrics::{load_records, MetricsRecorder};
use lexrag::models::{Chunk, ChunkMetadata, QualityBucket, StoredChunk};
use lexrag::pipeline::{AnswerOptions, Pipeline, NO_CONTEXT_ANSWER};
use lexrag::scoring::QualityScorer;
use lexrag::search::HybridRetriever;
use lexrag::store::{VectorHit, VectorStore};

const SECTION_16: &str = "Section 16. Every registered person shall be entitled to take \
    input tax credit on any supply of goods or services used in the course of business.";
const SECTION_54: &str = "Section 54. Any person claiming refund of any tax may make an \
    application before the expiry of two years from the relevant date.";

/// Vector store returning fixed distances, or failing every query.
struct ScriptedStore {
    hits: Vec<(StoredChunk, f64)>,
    fail_queries: bool,
}

impl ScriptedStore {
    fn new(hits: Vec<(StoredChunk, f64)>) -> Self {
        Self {
            hits,
            fail_queries: false,
        }
    }
}

#[async_trait]
impl VectorStore for ScriptedStore {
    async fn replace_chunks(&self, _document_id: &str, _chunks: &[Chunk]) -> Result<()> {
        Ok(())
    }

    async fn query(&self, _text: &str, k: usize) -> Result<Vec<VectorHit>> {
        if self.fail_queries {
            anyhow::bail!("connection refused");
        }
        Ok(self
            .hits
            .iter()
            .take(k)
            .map(|(chunk, distance)| VectorHit {
                chunk: chunk.clone(),
                distance: *distance,
            })
            .collect())
    }

    async fn get_all(&self) -> Result<Vec<StoredChunk>> {
        Ok(self.hits.iter().map(|(c, _)| c.clone()).collect())
    }
}

fn stored(id: &str, text: &str, page: u32) -> StoredChunk {
    StoredChunk {
        id: id.to_string(),
        text: format!("Document: CGST Act\n\n{}", text),
        metadata: ChunkMetadata {
            document_id: "cgst".to_string(),
            source: "CGST Act".to_string(),
            doc_type: "act".to_string(),
            page: Some(page),
            raw_text: text.to_string(),
            ..Default::default()
        },
    }
}

fn corpus() -> ScriptedStore {
    ScriptedStore::new(vec![
        (stored("cgst:0", SECTION_16, 12), 0.2),
        (stored("cgst:1", SECTION_54, 40), 0.6),
    ])
}

struct FixedGenerator(&'static str);

#[async_trait]
impl Generator for FixedGenerator {
    fn model_name(&self) -> &str {
        "fixed"
    }
    async fn generate(&self, _request: &GenerationRequest) -> Result<String> {
        Ok(self.0.to_string())
    }
}

struct StalledGenerator;

#[async_trait]
impl Generator for StalledGenerator {
    fn model_name(&self) -> &str {
        "stalled"
    }
    async fn generate(&self, _request: &GenerationRequest) -> Result<String> {
        tokio::time::sleep(Duration::from_secs(30)).await;
        Ok("too late".to_string())
    }
}

const GROUNDED_ANSWER: &str =
    "Every registered person shall be entitled to take input tax credit [Source 1].";

async fn pipeline_with(
    store: ScriptedStore,
    generator: Arc<dyn Generator>,
    metrics: Arc<MetricsRecorder>,
    timeout: Duration,
) -> Pipeline {
    let retriever = HybridRetriever::build(Arc::new(store)).await.unwrap();
    Pipeline::new(
        Arc::new(retriever),
        generator,
        Arc::new(QualityScorer::word_overlap(2000)),
        metrics,
        timeout,
    )
}

#[tokio::test]
async fn test_answer_scores_inline_and_logs() {
    let metrics = Arc::new(MetricsRecorder::in_memory());
    let pipeline = pipeline_with(
        corpus(),
        Arc::new(FixedGenerator(GROUNDED_ANSWER)),
        Arc::clone(&metrics),
        Duration::from_secs(5),
    )
    .await;

    let envelope = pipeline
        .answer("What is input tax credit under Section 16?", &AnswerOptions::default())
        .await;

    assert_eq!(pipeline.retriever().indexed_chunks(), 2);
    assert!(pipeline.metrics().path().is_none());
    assert!(envelope.error.is_none());
    assert_eq!(envelope.answer, GROUNDED_ANSWER);
    assert!(envelope.chunks_used >= 1);
    assert!(envelope.sources[0].starts_with("CGST Act (Page 12, "));
    assert!(envelope.confidence > 0.0 && envelope.confidence <= 1.0);
    assert_eq!(envelope.faithfulness, Some(1.0));
    assert!(envelope.relevance.unwrap() > 0.5);

    let records = metrics.records();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].query_id, envelope.query_id);
    assert_eq!(records[0].faithfulness, Some(1.0));
    assert!(!records[0].background);
    assert_ne!(records[0].quality, QualityBucket::Pending);
}

#[tokio::test]
async fn test_empty_corpus_returns_no_context_envelope() {
    let metrics = Arc::new(MetricsRecorder::in_memory());
    let pipeline = pipeline_with(
        ScriptedStore::new(Vec::new()),
        Arc::new(FixedGenerator("unused")),
        Arc::clone(&metrics),
        Duration::from_secs(5),
    )
    .await;

    let envelope = pipeline
        .answer("What is input tax credit?", &AnswerOptions::default())
        .await;

    assert_eq!(envelope.answer, NO_CONTEXT_ANSWER);
    assert!(envelope.sources.is_empty());
    assert_eq!(envelope.confidence, 0.0);
    assert_eq!(envelope.chunks_used, 0);
    assert_eq!(envelope.faithfulness, Some(0.0));
    assert_eq!(envelope.relevance, Some(0.0));
    assert!(envelope.error.is_none());
    assert_eq!(metrics.records()[0].quality, QualityBucket::NoContext);
}

#[tokio::test]
async fn test_min_similarity_above_every_candidate() {
    let pipeline = pipeline_with(
        corpus(),
        Arc::new(FixedGenerator(GROUNDED_ANSWER)),
        Arc::new(MetricsRecorder::in_memory()),
        Duration::from_secs(5),
    )
    .await;
    let opts = AnswerOptions {
        min_similarity: 5.0,
        ..Default::default()
    };

    let envelope = pipeline.answer("Section 16 input tax credit", &opts).await;

    assert_eq!(envelope.answer, NO_CONTEXT_ANSWER);
    assert_eq!(envelope.confidence, 0.0);
    assert!(envelope.sources.is_empty());
}

#[tokio::test]
async fn test_generation_timeout_keeps_sources() {
    let metrics = Arc::new(MetricsRecorder::in_memory());
    let pipeline = pipeline_with(
        corpus(),
        Arc::new(StalledGenerator),
        Arc::clone(&metrics),
        Duration::from_millis(100),
    )
    .await;

    let envelope = pipeline
        .answer("Section 16 input tax credit", &AnswerOptions::default())
        .await;

    assert!(!envelope.sources.is_empty());
    assert!(envelope.confidence > 0.0);
    let error = envelope.error.as_deref().unwrap();
    assert!(error.contains("timed out"), "{}", error);
    assert!(envelope.answer.contains("could not generate"));
    assert_eq!(metrics.records()[0].quality, QualityBucket::Error);
    assert_eq!(metrics.records()[0].error.as_deref(), Some(error));
}

#[tokio::test]
async fn test_empty_generation_is_an_error() {
    let pipeline = pipeline_with(
        corpus(),
        Arc::new(FixedGenerator("   ")),
        Arc::new(MetricsRecorder::in_memory()),
        Duration::from_secs(5),
    )
    .await;

    let envelope = pipeline
        .answer("Section 16 input tax credit", &AnswerOptions::default())
        .await;

    assert!(envelope.error.unwrap().contains("empty"));
    assert!(!envelope.sources.is_empty());
}

#[tokio::test]
async fn test_retrieval_failure_is_degraded_envelope() {
    let metrics = Arc::new(MetricsRecorder::in_memory());
    let store = ScriptedStore {
        fail_queries: true,
        ..corpus()
    };
    let pipeline = pipeline_with(
        store,
        Arc::new(FixedGenerator(GROUNDED_ANSWER)),
        Arc::clone(&metrics),
        Duration::from_secs(5),
    )
    .await;

    let envelope = pipeline
        .answer("Section 16 input tax credit", &AnswerOptions::default())
        .await;

    assert!(envelope.sources.is_empty());
    assert_eq!(envelope.confidence, 0.0);
    assert_eq!(envelope.chunks_used, 0);
    let error = envelope.error.unwrap();
    assert!(error.starts_with("retrieval failed"), "{}", error);
    assert!(error.contains("connection refused"));
    assert_eq!(metrics.records()[0].quality, QualityBucket::Error);
}

#[tokio::test]
async fn test_answer_async_scores_in_background() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("metrics.jsonl");
    let metrics = Arc::new(MetricsRecorder::open(&path).unwrap());
    let pipeline = pipeline_with(
        corpus(),
        Arc::new(FixedGenerator(GROUNDED_ANSWER)),
        Arc::clone(&metrics),
        Duration::from_secs(5),
    )
    .await;

    let envelope = pipeline
        .answer_async("What is input tax credit under Section 16?", &AnswerOptions::default())
        .await;
    assert_eq!(pipeline.metrics().path(), Some(path.as_path()));
    assert_eq!(envelope.faithfulness, None);
    assert_eq!(envelope.relevance, None);
    assert!(!envelope.sources.is_empty());

    pipeline.wait_for_background().await;

    let record = metrics.find(&envelope.query_id).unwrap();
    assert!(record.background);
    assert_eq!(record.faithfulness, Some(1.0));
    assert!(record.relevance.is_some());

    let on_disk = load_records(&path).unwrap();
    assert_eq!(on_disk.len(), 1);
    assert_eq!(on_disk[0].query_id, envelope.query_id);
}

#[tokio::test]
async fn test_concurrent_async_answers_each_logged_once() {
    let metrics = Arc::new(MetricsRecorder::in_memory());
    let pipeline = Arc::new(
        pipeline_with(
            corpus(),
            Arc::new(FixedGenerator(GROUNDED_ANSWER)),
            Arc::clone(&metrics),
            Duration::from_secs(5),
        )
        .await,
    );

    let mut handles = Vec::new();
    for i in 0..8 {
        let pipeline = Arc::clone(&pipeline);
        handles.push(tokio::spawn(async move {
            let question = format!("Section 16 input tax credit question {}", i);
            pipeline
                .answer_async(&question, &AnswerOptions::default())
                .await
                .query_id
        }));
    }
    let mut ids = Vec::new();
    for h in handles {
        ids.push(h.await.unwrap());
    }
    pipeline.wait_for_background().await;

    let records = metrics.records();
    assert_eq!(records.len(), 8);
    for id in ids {
        assert_eq!(records.iter().filter(|r| r.query_id == id).count(), 1);
    }
}
