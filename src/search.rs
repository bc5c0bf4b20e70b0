//! Hybrid semantic + lexical retrieval with term boosting.
//!
//! The retriever operates entirely through the [`VectorStore`] trait and an
//! in-process [`LexicalIndex`] derived from the store's contents.
//!
//! # Hybrid Scoring Algorithm
//!
//! 1. Fetch the top `k` semantic candidates (`similarity = 1 - distance`).
//! 2. Fetch the top `k` lexical candidates (BM25 over the whole corpus).
//! 3. Union both lists; a chunk missing from one side scores `0` there.
//!    Lexical scores are divided by the maximum lexical score in the
//!    candidate set.
//! 4. `boost = 1 + 0.2 × (important query terms found in the chunk)`.
//! 5. `final = semantic × w_s × boost + lexical × w_l × boost`.
//! 6. Stable sort by `final` (desc): ties keep first-seen order, semantic
//!    candidates first, then lexical-only candidates in lexical rank order.
//! 7. Truncate to `k`.

use anyhow::{Context, Result};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use tracing::{debug, info};

use crate::lexical::{count_term_matches, extract_important_terms, LexicalIndex};
use crate::models::{MatchType, RetrievalResult, StoredChunk};
use crate::store::VectorStore;

/// Boost added per matched important term.
pub const BOOST_PER_TERM: f64 = 0.2;

/// Retrieval tuning parameters for one call.
#[derive(Debug, Clone, Copy)]
pub struct SearchParams {
    pub k: usize,
    pub semantic_weight: f64,
    pub lexical_weight: f64,
}

impl Default for SearchParams {
    fn default() -> Self {
        Self {
            k: 5,
            semantic_weight: 0.7,
            lexical_weight: 0.3,
        }
    }
}

/// Fuses vector search and BM25 ranking into one ordered result set.
pub struct HybridRetriever {
    store: Arc<dyn VectorStore>,
    lexical: RwLock<Arc<LexicalIndex>>,
}

impl HybridRetriever {
    /// Create a retriever and build its lexical index from the store.
    pub async fn build(store: Arc<dyn VectorStore>) -> Result<Self> {
        let retriever = Self {
            store,
            lexical: RwLock::new(Arc::new(LexicalIndex::default())),
        };
        retriever.rebuild_index().await?;
        Ok(retriever)
    }

    /// Re-read every stored chunk and swap in a fresh lexical index.
    pub async fn rebuild_index(&self) -> Result<usize> {
        let chunks = self
            .store
            .get_all()
            .await
            .context("reading stored chunks for lexical index")?;
        let index = Arc::new(LexicalIndex::build(chunks));
        let count = index.len();
        match self.lexical.write() {
            Ok(mut guard) => *guard = index,
            Err(poisoned) => *poisoned.into_inner() = index,
        }
        info!(chunks = count, "lexical index rebuilt");
        Ok(count)
    }

    pub fn indexed_chunks(&self) -> usize {
        self.lexical_index().len()
    }

    fn lexical_index(&self) -> Arc<LexicalIndex> {
        match self.lexical.read() {
            Ok(guard) => Arc::clone(&guard),
            Err(poisoned) => Arc::clone(&poisoned.into_inner()),
        }
    }

    /// Run a hybrid search. Fails only when the vector store does.
    pub async fn search(&self, query: &str, params: SearchParams) -> Result<Vec<RetrievalResult>> {
        if query.trim().is_empty() || params.k == 0 {
            return Ok(Vec::new());
        }

        let semantic = self
            .store
            .query(query, params.k)
            .await
            .context("vector store query")?;
        let semantic: Vec<(StoredChunk, f64)> = semantic
            .into_iter()
            .map(|hit| {
                let sim = hit.similarity();
                (hit.chunk, sim)
            })
            .collect();

        let index = self.lexical_index();
        let lexical: Vec<(StoredChunk, f64)> = index
            .top_k(query, params.k)
            .into_iter()
            .filter_map(|(idx, score)| index.chunk(idx).map(|c| (c.clone(), score)))
            .collect();

        let terms = extract_important_terms(query);
        debug!(
            semantic = semantic.len(),
            lexical = lexical.len(),
            terms = ?terms,
            "fusing candidates"
        );

        Ok(fuse(semantic, lexical, &terms, params))
    }
}

/// Fuse semantic and lexical candidate lists.
///
/// Pure and deterministic: identical inputs always produce the same order.
pub fn fuse(
    semantic: Vec<(StoredChunk, f64)>,
    lexical: Vec<(StoredChunk, f64)>,
    terms: &[String],
    params: SearchParams,
) -> Vec<RetrievalResult> {
    struct Candidate {
        chunk: StoredChunk,
        semantic: Option<f64>,
        lexical: Option<f64>,
    }

    let max_lexical = lexical.iter().map(|(_, s)| *s).fold(0.0_f64, f64::max);

    let mut order: Vec<Candidate> = Vec::new();
    let mut positions: HashMap<String, usize> = HashMap::new();

    for (chunk, sim) in semantic {
        if let Some(&pos) = positions.get(&chunk.id) {
            let existing = order[pos].semantic.unwrap_or(0.0);
            order[pos].semantic = Some(existing.max(sim));
            continue;
        }
        positions.insert(chunk.id.clone(), order.len());
        order.push(Candidate {
            chunk,
            semantic: Some(sim),
            lexical: None,
        });
    }
    for (chunk, raw) in lexical {
        let norm = if max_lexical > 0.0 { raw / max_lexical } else { 0.0 };
        match positions.get(&chunk.id) {
            Some(&pos) => order[pos].lexical = Some(norm),
            None => {
                positions.insert(chunk.id.clone(), order.len());
                order.push(Candidate {
                    chunk,
                    semantic: None,
                    lexical: Some(norm),
                });
            }
        }
    }

    let mut results: Vec<RetrievalResult> = order
        .into_iter()
        .map(|c| {
            let semantic_score = c.semantic.unwrap_or(0.0);
            let lexical_score = c.lexical.unwrap_or(0.0);
            let boost = 1.0 + BOOST_PER_TERM * count_term_matches(terms, &c.chunk.text) as f64;
            let final_score = final_score(
                semantic_score,
                lexical_score,
                boost,
                params.semantic_weight,
                params.lexical_weight,
            );
            let match_type = match (c.semantic.is_some(), c.lexical.is_some()) {
                (true, true) => MatchType::Both,
                (true, false) => MatchType::Semantic,
                _ => MatchType::Keyword,
            };
            let metadata = c.chunk.metadata;
            let text = if metadata.raw_text.is_empty() {
                c.chunk.text
            } else {
                metadata.raw_text.clone()
            };
            RetrievalResult {
                chunk_id: c.chunk.id,
                text,
                source: metadata.source.clone(),
                page: metadata.page_label(),
                metadata,
                semantic_score,
                lexical_score,
                boost,
                final_score,
                match_type,
            }
        })
        .collect();

    // `sort_by` is stable, so equal scores keep first-seen order.
    results.sort_by(|a, b| {
        b.final_score
            .partial_cmp(&a.final_score)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    results.truncate(params.k);
    results
}

/// `semantic × w_s × boost + lexical × w_l × boost`
pub fn final_score(
    semantic: f64,
    lexical: f64,
    boost: f64,
    semantic_weight: f64,
    lexical_weight: f64,
) -> f64 {
    semantic * semantic_weight * boost + lexical * lexical_weight * boost
}
