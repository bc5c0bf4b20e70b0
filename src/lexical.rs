//! BM25 keyword index and important-term extraction.
//!
//! The [`LexicalIndex`] is a read-through structure derived from the chunks
//! held by a vector store: it is built once from `get_all()` and can be
//! rebuilt at any time. Tokenization is lowercase + whitespace split.
//!
//! Scoring uses Okapi BM25 (`k1 = 1.2`, `b = 0.75`) with the `+1` IDF
//! variant, which stays positive for terms present in most chunks, so rare
//! query terms dominate without common terms ever subtracting score.
//!
//! [`extract_important_terms`] pulls exact-match anchors out of a raw query
//! (legal references, quantities with units, domain abbreviations, dates);
//! the hybrid retriever turns matches on these into a score boost.

use regex::Regex;
use std::collections::{HashMap, HashSet};
use std::sync::OnceLock;

use crate::models::StoredChunk;

const K1: f64 = 1.2;
const B: f64 = 0.75;

/// Abbreviations matched verbatim (case-sensitive, whole word) in queries.
pub const DOMAIN_ABBREVIATIONS: &[&str] = &[
    "GST", "CGST", "SGST", "IGST", "UTGST", "ITC", "GSTIN", "GSTR", "HSN", "SAC", "RCM", "CBIC",
    "TDS", "TCS", "PAN", "TAN", "ITR", "AY", "FY", "LTCG", "STCG", "NRI", "HUF", "SEBI", "RBI",
    "FEMA", "MAT", "AMT", "DTAA", "EPF", "PPF", "NPS", "ELSS", "CBDT", "MSME", "LLP",
];

/// Lowercase + whitespace tokenization.
pub fn tokenize(text: &str) -> Vec<String> {
    text.to_lowercase()
        .split_whitespace()
        .map(str::to_string)
        .collect()
}

/// Okapi BM25 index over stored chunks.
#[derive(Debug, Default)]
pub struct LexicalIndex {
    chunks: Vec<StoredChunk>,
    term_freqs: Vec<HashMap<String, usize>>,
    doc_lens: Vec<usize>,
    doc_freq: HashMap<String, usize>,
    avg_doc_len: f64,
}

impl LexicalIndex {
    /// Build an index over the given chunks. Each chunk's `text` (the
    /// enriched form stored in the vector store) is tokenized.
    pub fn build(chunks: Vec<StoredChunk>) -> Self {
        let mut term_freqs = Vec::with_capacity(chunks.len());
        let mut doc_lens = Vec::with_capacity(chunks.len());
        let mut doc_freq: HashMap<String, usize> = HashMap::new();

        for chunk in &chunks {
            let tokens = tokenize(&chunk.text);
            doc_lens.push(tokens.len());
            let mut tf: HashMap<String, usize> = HashMap::new();
            for token in tokens {
                *tf.entry(token).or_insert(0) += 1;
            }
            for term in tf.keys() {
                *doc_freq.entry(term.clone()).or_insert(0) += 1;
            }
            term_freqs.push(tf);
        }

        let avg_doc_len = if doc_lens.is_empty() {
            0.0
        } else {
            doc_lens.iter().sum::<usize>() as f64 / doc_lens.len() as f64
        };

        Self {
            chunks,
            term_freqs,
            doc_lens,
            doc_freq,
            avg_doc_len,
        }
    }

    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    pub fn chunk(&self, idx: usize) -> Option<&StoredChunk> {
        self.chunks.get(idx)
    }

    /// BM25 score of every indexed chunk for `query`, in index order.
    pub fn score(&self, query: &str) -> Vec<f64> {
        let mut query_terms = tokenize(query);
        let mut seen = HashSet::new();
        query_terms.retain(|t| seen.insert(t.clone()));

        let total_docs = self.chunks.len() as f64;
        (0..self.chunks.len())
            .map(|idx| {
                if self.avg_doc_len <= f64::EPSILON {
                    return 0.0;
                }
                let doc_len = self.doc_lens[idx] as f64;
                query_terms
                    .iter()
                    .map(|term| {
                        let tf = self.term_freqs[idx].get(term).copied().unwrap_or(0) as f64;
                        if tf <= 0.0 {
                            return 0.0;
                        }
                        let df = self.doc_freq.get(term).copied().unwrap_or(0) as f64;
                        let idf = ((total_docs - df + 0.5) / (df + 0.5) + 1.0).ln();
                        let denom = tf + K1 * (1.0 - B + B * (doc_len / self.avg_doc_len));
                        idf * (tf * (K1 + 1.0)) / denom.max(f64::EPSILON)
                    })
                    .sum()
            })
            .collect()
    }

    /// Indices and scores of the `k` best chunks. Zero-score chunks are
    /// excluded; ties keep index order.
    pub fn top_k(&self, query: &str, k: usize) -> Vec<(usize, f64)> {
        let mut scored: Vec<(usize, f64)> = self
            .score(query)
            .into_iter()
            .enumerate()
            .filter(|(_, s)| *s > 0.0)
            .collect();
        scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(k);
        scored
    }
}

fn legal_reference_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"(?i)\b(?:section|sec\.|rule|article|clause|chapter|schedule)\s*\d+[a-z]?(?:\s*\(\s*[0-9a-z]+\s*\))*",
        )
        .expect("legal reference regex")
    })
}

fn quantity_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"(?i)(?:(?:\b(?:rs\.?|inr)|₹|\$)\s*\d+(?:[.,]\d+)*|\b\d+(?:[.,]\d+)*\s*(?:%|\b(?:percent|per cent|days?|weeks?|months?|years?|hours?|rupees?|lakhs?|crores?|dollars?|usd|inr)\b))",
        )
        .expect("quantity regex")
    })
}

fn date_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        let month = r"(?:jan(?:uary)?|feb(?:ruary)?|mar(?:ch)?|apr(?:il)?|may|jun(?:e)?|jul(?:y)?|aug(?:ust)?|sep(?:t(?:ember)?)?|oct(?:ober)?|nov(?:ember)?|dec(?:ember)?)";
        Regex::new(&format!(
            r"(?i)\b(?:\d{{4}}-\d{{2}}-\d{{2}}|\d{{1,2}}[/-]\d{{1,2}}[/-]\d{{2,4}}|\d{{1,2}}(?:st|nd|rd|th)?\s+{month}\.?,?\s+\d{{4}}|{month}\.?\s+\d{{1,2}}(?:st|nd|rd|th)?,?\s+\d{{4}})\b"
        ))
        .expect("date regex")
    })
}

fn abbreviation_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(&format!(r"\b(?:{})\b", DOMAIN_ABBREVIATIONS.join("|")))
            .expect("abbreviation regex")
    })
}

/// Extract exact-match anchor terms from a raw query.
///
/// Returns, in order of category then position: legal/structural
/// references (`"Section 16(2)"`), quantities with units (`"180 days"`),
/// domain abbreviations present verbatim (`"ITC"`), and calendar dates.
/// Terms are whitespace-normalized and de-duplicated case-insensitively.
pub fn extract_important_terms(query: &str) -> Vec<String> {
    let mut terms = Vec::new();
    let mut seen = HashSet::new();

    let patterns = [
        legal_reference_re(),
        quantity_re(),
        abbreviation_re(),
        date_re(),
    ];
    for re in patterns {
        for m in re.find_iter(query) {
            let term = m.as_str().split_whitespace().collect::<Vec<_>>().join(" ");
            if !term.is_empty() && seen.insert(term.to_lowercase()) {
                terms.push(term);
            }
        }
    }
    terms
}

/// Number of `terms` found case-insensitively in `text`.
pub fn count_term_matches(terms: &[String], text: &str) -> usize {
    let haystack = text.to_lowercase();
    terms
        .iter()
        .filter(|t| haystack.contains(&t.to_lowercase()))
        .count()
}
