//! Error taxonomy for the answering pipeline.
//!
//! None of these ever cross the public [`Pipeline`](crate::pipeline::Pipeline)
//! boundary as an `Err`: retrieval and generation failures are converted
//! into a degraded [`AnswerEnvelope`](crate::models::AnswerEnvelope) whose
//! `error` field carries the `Display` text below, and scoring failures are
//! absorbed by the heuristic fallback.

use std::time::Duration;

use thiserror::Error;

/// Failures observed while answering a question.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// Vector store unreachable, or the index is missing.
    #[error("retrieval failed: {0:#}")]
    Retrieval(anyhow::Error),

    /// Inference capability unreachable or returned an error.
    #[error("generation failed: {0:#}")]
    Generation(anyhow::Error),

    /// Inference capability did not answer within the configured bound.
    #[error("generation timed out after {}s", .0.as_secs_f64())]
    GenerationTimeout(Duration),

    /// Inference capability answered with nothing.
    #[error("generation returned an empty answer")]
    EmptyGeneration,

    /// Entailment classifier unavailable; logged only, never surfaced.
    #[error("scoring degraded: {0:#}")]
    Scoring(anyhow::Error),
}
