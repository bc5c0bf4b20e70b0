//! Answer quality scoring: faithfulness and relevance.
//!
//! Faithfulness asks how much of the answer is supported by the retrieved
//! context. With an [`EntailmentClassifier`] available each answer sentence
//! is checked against the context; otherwise (or whenever the classifier
//! fails for a sentence) a word-overlap heuristic decides support.
//!
//! Which strategy is used is decided once, by [`QualityScorer::probe`], when
//! the scorer is built. Scoring never fails: degraded paths are logged.
//!
//! Relevance is independent of the context:
//! `0.7 × keyword coverage + 0.3 × question-type match`.

use regex::Regex;
use std::collections::HashSet;
use std::sync::{Arc, OnceLock};
use tracing::{debug, info, warn};

use crate::entailment::{EntailmentClassifier, EntailmentLabel};
use crate::error::PipelineError;

/// Sentences shorter than this (after citation stripping) are not checked.
pub const MIN_SENTENCE_CHARS: usize = 10;
/// Entailment probability needed for a sentence to count as supported.
pub const ENTAILMENT_THRESHOLD: f64 = 0.5;
/// A "neutral" verdict counts as supported only above this probability.
pub const NEUTRAL_THRESHOLD: f64 = 0.9;
/// Fraction of significant words that must appear in the context.
pub const OVERLAP_THRESHOLD: f64 = 0.5;

const KEYWORD_WEIGHT: f64 = 0.7;
const TYPE_WEIGHT: f64 = 0.3;

const STOPWORDS: &[&str] = &[
    "a", "about", "above", "after", "again", "all", "also", "an", "and", "any", "are", "as", "at",
    "be", "been", "being", "but", "by", "can", "could", "did", "do", "does", "for", "from", "had",
    "has", "have", "how", "if", "in", "into", "is", "it", "its", "may", "might", "not", "of", "on",
    "or", "other", "our", "shall", "should", "such", "than", "that", "the", "their", "them",
    "then", "there", "these", "they", "this", "those", "through", "to", "under", "upon", "was",
    "were", "what", "when", "where", "which", "while", "who", "whom", "why", "will", "with",
    "would", "you", "your",
];

/// Scores produced for one answer.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct QualityScores {
    pub faithfulness: f64,
    pub relevance: f64,
}

/// How faithfulness is measured.
#[derive(Clone)]
pub enum FaithfulnessStrategy {
    Entailment(Arc<dyn EntailmentClassifier>),
    WordOverlap,
}

impl FaithfulnessStrategy {
    pub fn name(&self) -> &'static str {
        match self {
            FaithfulnessStrategy::Entailment(_) => "entailment",
            FaithfulnessStrategy::WordOverlap => "word_overlap",
        }
    }
}

pub struct QualityScorer {
    strategy: FaithfulnessStrategy,
    max_context_chars: usize,
}

impl QualityScorer {
    pub fn new(strategy: FaithfulnessStrategy, max_context_chars: usize) -> Self {
        Self {
            strategy,
            max_context_chars,
        }
    }

    /// Heuristic-only scorer.
    pub fn word_overlap(max_context_chars: usize) -> Self {
        Self::new(FaithfulnessStrategy::WordOverlap, max_context_chars)
    }

    /// Build a scorer, checking once whether the classifier answers.
    pub async fn probe(
        classifier: Option<Arc<dyn EntailmentClassifier>>,
        max_context_chars: usize,
    ) -> Self {
        let Some(classifier) = classifier else {
            info!("no entailment classifier configured, using word overlap");
            return Self::word_overlap(max_context_chars);
        };
        let probe = "The filing deadline is the twentieth of the month.";
        match classifier.classify(probe, probe).await {
            Ok(verdict) => {
                info!(
                    classifier = classifier.name(),
                    label = ?verdict.label,
                    "entailment classifier available"
                );
                Self::new(FaithfulnessStrategy::Entailment(classifier), max_context_chars)
            }
            Err(e) => {
                warn!(
                    classifier = classifier.name(),
                    error = %PipelineError::Scoring(e),
                    "entailment classifier unavailable, using word overlap"
                );
                Self::word_overlap(max_context_chars)
            }
        }
    }

    pub fn strategy(&self) -> &FaithfulnessStrategy {
        &self.strategy
    }

    /// Score an answer against its question and supporting contexts.
    pub async fn score(&self, question: &str, answer: &str, contexts: &[String]) -> QualityScores {
        QualityScores {
            faithfulness: self.faithfulness(answer, contexts).await,
            relevance: relevance(question, answer),
        }
    }

    /// Fraction of checkable answer sentences supported by the context.
    pub async fn faithfulness(&self, answer: &str, contexts: &[String]) -> f64 {
        let sentences = checkable_sentences(answer);
        if sentences.is_empty() {
            return 0.0;
        }
        let context = truncate_chars(&contexts.join("\n\n"), self.max_context_chars);

        let classifier = match &self.strategy {
            FaithfulnessStrategy::Entailment(c) => c,
            FaithfulnessStrategy::WordOverlap => {
                return supported_fraction(&sentences, |s| overlap_supported(s, &context));
            }
        };

        let context_words = significant_words(&context);
        let mut supported = 0usize;
        for sentence in &sentences {
            let ok = match classifier.classify(&context, sentence).await {
                Ok(verdict) => match verdict.label {
                    EntailmentLabel::Entailment => verdict.score >= ENTAILMENT_THRESHOLD,
                    EntailmentLabel::Neutral => verdict.score >= NEUTRAL_THRESHOLD,
                    EntailmentLabel::Contradiction => false,
                },
                Err(e) => {
                    debug!(error = %PipelineError::Scoring(e), "sentence check fell back to overlap");
                    overlap_ratio(sentence, &context_words) >= OVERLAP_THRESHOLD
                }
            };
            if ok {
                supported += 1;
            }
        }
        supported as f64 / sentences.len() as f64
    }
}

/// Word-overlap faithfulness, without any classifier.
pub fn faithfulness_by_overlap(answer: &str, contexts: &[String], max_context_chars: usize) -> f64 {
    let sentences = checkable_sentences(answer);
    if sentences.is_empty() {
        return 0.0;
    }
    let context = truncate_chars(&contexts.join("\n\n"), max_context_chars);
    supported_fraction(&sentences, |s| overlap_supported(s, &context))
}

fn supported_fraction(sentences: &[String], mut supported: impl FnMut(&str) -> bool) -> f64 {
    let count = sentences.iter().filter(|s| supported(s.as_str())).count();
    count as f64 / sentences.len() as f64
}

fn overlap_supported(sentence: &str, context: &str) -> bool {
    overlap_ratio(sentence, &significant_words(context)) >= OVERLAP_THRESHOLD
}

/// Share of the sentence's significant words present in the context.
/// A sentence with no significant words is unsupported.
fn overlap_ratio(sentence: &str, context_words: &HashSet<String>) -> f64 {
    let words = significant_words(sentence);
    if words.is_empty() {
        return 0.0;
    }
    let found = words.iter().filter(|w| context_words.contains(*w)).count();
    found as f64 / words.len() as f64
}

fn significant_words(text: &str) -> HashSet<String> {
    words(text)
        .filter(|w| w.chars().count() > 3 && !STOPWORDS.contains(&w.as_str()))
        .collect()
}

fn words(text: &str) -> impl Iterator<Item = String> + '_ {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .map(|w| w.to_lowercase())
}

fn citation_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)\[(?:source\s*)?\d+[^\]]*\]|\((?:source|page)\b[^)]*\)")
            .expect("citation regex")
    })
}

/// Split an answer into sentences worth checking: citation markers removed,
/// very short fragments dropped.
pub fn checkable_sentences(answer: &str) -> Vec<String> {
    let stripped = citation_regex().replace_all(answer, "");
    stripped
        .split(['.', '!', '?'])
        .map(|s| s.split_whitespace().collect::<Vec<_>>().join(" "))
        .filter(|s| s.chars().count() >= MIN_SENTENCE_CHARS)
        .collect()
}

fn truncate_chars(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((byte_idx, _)) => text[..byte_idx].to_string(),
        None => text.to_string(),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum QuestionKind {
    Definition,
    Procedural,
    Other,
}

fn question_kind(question: &str) -> QuestionKind {
    let q = question.to_lowercase();
    let q = q.trim_start();
    const DEFINITION: &[&str] = &["what is", "what are", "what does", "define", "meaning of", "definition of"];
    const PROCEDURAL: &[&str] = &["how to", "how do", "how does", "how can", "how should", "procedure", "steps", "process for"];
    if DEFINITION.iter().any(|p| q.contains(p)) {
        QuestionKind::Definition
    } else if PROCEDURAL.iter().any(|p| q.contains(p)) {
        QuestionKind::Procedural
    } else {
        QuestionKind::Other
    }
}

fn definition_cue() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)\b(?:means|refers to|is defined as|defined as|denotes|is an?|are)\b")
            .expect("definition regex")
    })
}

fn procedure_cue() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)\b(?:must|should|shall|required|need to|needs to|steps?|first|then|file|submit|apply)\b")
            .expect("procedure regex")
    })
}

/// `0.7 × keyword coverage + 0.3 × question-type match`, in `[0, 1]`.
///
/// Keyword coverage is the fraction of the question's content words that
/// appear in the answer (0.5 when the question has none). The type match is
/// 1 or 0 for definition and procedural questions depending on whether the
/// answer has the expected shape, and 0.5 for anything else.
pub fn relevance(question: &str, answer: &str) -> f64 {
    let keywords: HashSet<String> = words(question)
        .filter(|w| w.chars().count() >= 3 && !STOPWORDS.contains(&w.as_str()))
        .collect();
    let answer_words: HashSet<String> = words(answer).collect();

    let keyword_score = if keywords.is_empty() {
        0.5
    } else {
        keywords.iter().filter(|k| answer_words.contains(*k)).count() as f64 / keywords.len() as f64
    };

    let type_score = match question_kind(question) {
        QuestionKind::Definition => f64::from(u8::from(definition_cue().is_match(answer))),
        QuestionKind::Procedural => f64::from(u8::from(procedure_cue().is_match(answer))),
        QuestionKind::Other => 0.5,
    };

    (KEYWORD_WEIGHT * keyword_score + TYPE_WEIGHT * type_score).clamp(0.0, 1.0)
}
