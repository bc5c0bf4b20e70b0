//! Core data models used throughout lexrag.
//!
//! These types represent the documents, chunks, retrieval results, answer
//! envelopes, and metric records that flow through the ingestion and
//! answering pipeline.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A source document as handed to the chunker. Immutable after ingestion.
#[derive(Debug, Clone, PartialEq)]
pub struct RawDocument {
    pub id: String,
    pub text: String,
    /// Human-readable label used in citations (usually the file name).
    pub name: String,
    /// Coarse document type, e.g. `"act"`, `"rules"`, `"circular"`.
    pub doc_type: String,
}

/// A contiguous span of a [`RawDocument`] plus its context header.
#[derive(Debug, Clone, PartialEq)]
pub struct Chunk {
    pub id: String,
    pub document_id: String,
    /// Byte offset of the span start in the owning document.
    pub start: usize,
    /// Exclusive byte offset of the span end.
    pub end: usize,
    pub section: Option<String>,
    /// Context header followed by the raw span; this is what gets embedded.
    pub enriched_text: String,
    /// The span itself, shown to the end user in citations.
    pub raw_text: String,
    pub chunk_index: usize,
    /// SHA-256 of `enriched_text`; stores reuse vectors of unchanged chunks.
    pub hash: String,
    pub metadata: ChunkMetadata,
}

/// Typed metadata stored alongside every chunk.
///
/// Fixed fields are first-class; `extra` only carries tags that are not
/// known at compile time.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChunkMetadata {
    pub document_id: String,
    pub source: String,
    pub doc_type: String,
    pub section: Option<String>,
    pub page: Option<u32>,
    pub chunk_index: usize,
    pub start: usize,
    pub end: usize,
    pub raw_text: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub extra: BTreeMap<String, serde_json::Value>,
}

impl ChunkMetadata {
    /// Page label for citations, `"N/A"` when the source had no pagination.
    pub fn page_label(&self) -> String {
        self.page
            .map(|p| p.to_string())
            .unwrap_or_else(|| "N/A".to_string())
    }
}

/// A chunk as persisted in a vector store and read back via `get_all`.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredChunk {
    pub id: String,
    /// Enriched text (the embedded form).
    pub text: String,
    pub metadata: ChunkMetadata,
}

/// Which retrieval signal(s) produced a fused result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MatchType {
    Semantic,
    Keyword,
    Both,
}

/// One fused hybrid search hit.
#[derive(Debug, Clone, Serialize)]
pub struct RetrievalResult {
    pub chunk_id: String,
    /// Raw span text used for citations and prompt context.
    pub text: String,
    pub source: String,
    pub page: String,
    pub metadata: ChunkMetadata,
    pub semantic_score: f64,
    pub lexical_score: f64,
    pub boost: f64,
    pub final_score: f64,
    pub match_type: MatchType,
}

/// The response returned for one question.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnswerEnvelope {
    pub query_id: String,
    pub question: String,
    pub answer: String,
    pub sources: Vec<String>,
    pub confidence: f64,
    pub chunks_used: usize,
    pub elapsed_ms: u64,
    /// `None` until scored, either inline or by the background task.
    pub faithfulness: Option<f64>,
    pub relevance: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Coarse classification of a response, used for aggregate reporting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QualityBucket {
    High,
    Medium,
    Low,
    NoContext,
    Pending,
    Error,
}

impl QualityBucket {
    /// Classify from the envelope scores. Missing scores mean the record is
    /// still awaiting background scoring.
    pub fn classify(
        confidence: f64,
        faithfulness: Option<f64>,
        relevance: Option<f64>,
    ) -> QualityBucket {
        match (faithfulness, relevance) {
            (Some(f), Some(r)) => {
                let mean = (confidence + f + r) / 3.0;
                if mean >= 0.7 {
                    QualityBucket::High
                } else if mean >= 0.4 {
                    QualityBucket::Medium
                } else {
                    QualityBucket::Low
                }
            }
            _ => QualityBucket::Pending,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            QualityBucket::High => "high",
            QualityBucket::Medium => "medium",
            QualityBucket::Low => "low",
            QualityBucket::NoContext => "no_context",
            QualityBucket::Pending => "pending",
            QualityBucket::Error => "error",
        }
    }
}

/// One line of the append-only metrics log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricRecord {
    pub query_id: String,
    pub timestamp: DateTime<Utc>,
    pub question: String,
    /// Fused candidates returned by the retriever.
    pub retrieved: usize,
    /// Candidates that survived the similarity filter.
    pub chunks_used: usize,
    pub retrieval_ms: u64,
    pub generation_ms: u64,
    pub total_ms: u64,
    pub confidence: f64,
    pub faithfulness: Option<f64>,
    pub relevance: Option<f64>,
    pub quality: QualityBucket,
    /// `true` when produced by the background scoring path.
    pub background: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bucket_pending_without_scores() {
        assert_eq!(
            QualityBucket::classify(0.9, None, Some(0.9)),
            QualityBucket::Pending
        );
    }

    #[test]
    fn test_bucket_thresholds() {
        assert_eq!(
            QualityBucket::classify(0.8, Some(0.9), Some(0.7)),
            QualityBucket::High
        );
        assert_eq!(
            QualityBucket::classify(0.5, Some(0.5), Some(0.4)),
            QualityBucket::Medium
        );
        assert_eq!(
            QualityBucket::classify(0.1, Some(0.2), Some(0.3)),
            QualityBucket::Low
        );
    }

    #[test]
    fn test_page_label() {
        let mut meta = ChunkMetadata::default();
        assert_eq!(meta.page_label(), "N/A");
        meta.page = Some(12);
        assert_eq!(meta.page_label(), "12");
    }

    #[test]
    fn test_metric_record_serializes_bucket_snake_case() {
        let record = MetricRecord {
            query_id: "q1".to_string(),
            timestamp: Utc::now(),
            question: "q".to_string(),
            retrieved: 0,
            chunks_used: 0,
            retrieval_ms: 1,
            generation_ms: 0,
            total_ms: 1,
            confidence: 0.0,
            faithfulness: Some(0.0),
            relevance: Some(0.0),
            quality: QualityBucket::NoContext,
            background: false,
            error: None,
        };
        let line = serde_json::to_string(&record).unwrap();
        assert!(line.contains("\"quality\":\"no_context\""));
        assert!(!line.contains("\"error\""));
    }
}
