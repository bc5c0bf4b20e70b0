//! Vector store abstraction.
//!
//! The [`VectorStore`] trait is the seam between the answering engine and
//! whatever persists chunk embeddings. The engine needs three things from
//! it: replacing a document's chunks at ingestion time, nearest-neighbour
//! search by query text, and a read-through of every stored chunk so the
//! lexical index can be (re)built.
//!
//! Implementations must be `Send + Sync` to work with async runtimes.

pub mod memory;

use anyhow::Result;
use async_trait::async_trait;

use crate::models::{Chunk, StoredChunk};

/// A nearest-neighbour hit from vector search.
#[derive(Debug, Clone)]
pub struct VectorHit {
    pub chunk: StoredChunk,
    /// Cosine distance; `similarity = 1 - distance`.
    pub distance: f64,
}

impl VectorHit {
    /// Similarity clamped to `[0, 1]`.
    pub fn similarity(&self) -> f64 {
        (1.0 - self.distance).clamp(0.0, 1.0)
    }
}

/// Abstract storage backend holding embedded chunks.
///
/// | Method | Purpose |
/// |--------|---------|
/// | [`replace_chunks`](VectorStore::replace_chunks) | Replace all chunks of a document (full re-ingestion) |
/// | [`query`](VectorStore::query) | Top-`k` nearest chunks for a query text |
/// | [`get_all`](VectorStore::get_all) | Every stored chunk, for lexical index builds |
#[async_trait]
pub trait VectorStore: Send + Sync {
    /// Replace all chunks for a document, embedding their enriched text.
    async fn replace_chunks(&self, document_id: &str, chunks: &[Chunk]) -> Result<()>;

    /// Return the `k` chunks closest to `text`, nearest first.
    async fn query(&self, text: &str, k: usize) -> Result<Vec<VectorHit>>;

    /// Return every stored chunk in a stable order.
    async fn get_all(&self) -> Result<Vec<StoredChunk>>;
}
