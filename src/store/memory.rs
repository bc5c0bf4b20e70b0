//! In-memory [`VectorStore`] implementation.
//!
//! Uses a `Vec` behind `std::sync::RwLock` for thread safety. Vector search
//! is brute-force cosine similarity over all stored vectors; query texts are
//! embedded with the [`EmbeddingProvider`] supplied at construction.
//!
//! Re-ingesting a document only embeds chunks whose content hash changed;
//! vectors of unchanged chunks are carried over.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use anyhow::Result;
use async_trait::async_trait;
use tracing::debug;

use crate::embedding::{cosine_similarity, embed_query, EmbeddingProvider};
use crate::models::{Chunk, StoredChunk};

use super::{VectorHit, VectorStore};

struct StoredVector {
    chunk: StoredChunk,
    vector: Vec<f32>,
    content_hash: String,
}

/// In-memory vector store for tests and small corpora.
pub struct InMemoryVectorStore {
    provider: Arc<dyn EmbeddingProvider>,
    entries: RwLock<Vec<StoredVector>>,
}

impl InMemoryVectorStore {
    pub fn new(provider: Arc<dyn EmbeddingProvider>) -> Self {
        Self {
            provider,
            entries: RwLock::new(Vec::new()),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.read().map(|e| e.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl VectorStore for InMemoryVectorStore {
    async fn replace_chunks(&self, document_id: &str, chunks: &[Chunk]) -> Result<()> {
        let reusable: HashMap<String, Vec<f32>> = {
            let entries = self
                .entries
                .read()
                .map_err(|_| anyhow::anyhow!("vector store lock poisoned"))?;
            entries
                .iter()
                .filter(|e| e.chunk.metadata.document_id == document_id)
                .filter(|e| !e.content_hash.is_empty())
                .map(|e| (e.content_hash.clone(), e.vector.clone()))
                .collect()
        };

        let stale: Vec<&Chunk> = chunks
            .iter()
            .filter(|c| !reusable.contains_key(&c.hash))
            .collect();
        let texts: Vec<String> = stale.iter().map(|c| c.enriched_text.clone()).collect();
        let fresh = if texts.is_empty() {
            Vec::new()
        } else {
            self.provider.embed(&texts).await?
        };
        if fresh.len() != stale.len() {
            anyhow::bail!(
                "embedding provider returned {} vectors for {} chunks",
                fresh.len(),
                stale.len()
            );
        }
        let mut fresh = fresh.into_iter();
        let mut vectors = Vec::with_capacity(chunks.len());
        for c in chunks {
            let vector = match reusable.get(&c.hash) {
                Some(v) => v.clone(),
                None => fresh
                    .next()
                    .ok_or_else(|| anyhow::anyhow!("missing vector for chunk {}", c.id))?,
            };
            vectors.push(vector);
        }

        let mut entries = self
            .entries
            .write()
            .map_err(|_| anyhow::anyhow!("vector store lock poisoned"))?;
        entries.retain(|e| e.chunk.metadata.document_id != document_id);
        for (c, v) in chunks.iter().zip(vectors) {
            entries.push(StoredVector {
                chunk: StoredChunk {
                    id: c.id.clone(),
                    text: c.enriched_text.clone(),
                    metadata: c.metadata.clone(),
                },
                vector: v,
                content_hash: c.hash.clone(),
            });
        }
        debug!(
            document_id,
            chunks = chunks.len(),
            embedded = stale.len(),
            "replaced chunks"
        );
        Ok(())
    }

    async fn query(&self, text: &str, k: usize) -> Result<Vec<VectorHit>> {
        let query_vec = embed_query(self.provider.as_ref(), text).await?;
        let entries = self
            .entries
            .read()
            .map_err(|_| anyhow::anyhow!("vector store lock poisoned"))?;
        let mut hits: Vec<VectorHit> = entries
            .iter()
            .map(|e| VectorHit {
                chunk: e.chunk.clone(),
                distance: 1.0 - cosine_similarity(&query_vec, &e.vector) as f64,
            })
            .collect();
        hits.sort_by(|a, b| {
            a.distance
                .partial_cmp(&b.distance)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        hits.truncate(k);
        Ok(hits)
    }

    async fn get_all(&self) -> Result<Vec<StoredChunk>> {
        let entries = self
            .entries
            .read()
            .map_err(|_| anyhow::anyhow!("vector store lock poisoned"))?;
        Ok(entries.iter().map(|e| e.chunk.clone()).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunk::content_hash;
    use crate::models::ChunkMetadata;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Embeds text as counts over a tiny fixed vocabulary.
    struct VocabEmbedder;

    #[async_trait]
    impl EmbeddingProvider for VocabEmbedder {
        fn model_name(&self) -> &str {
            "vocab"
        }
        fn dims(&self) -> usize {
            3
        }
        async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
            Ok(texts
                .iter()
                .map(|t| {
                    let t = t.to_lowercase();
                    ["credit", "refund", "penalty"]
                        .iter()
                        .map(|w| t.matches(w).count() as f32)
                        .collect()
                })
                .collect())
        }
    }

    fn chunk(doc: &str, idx: usize, text: &str) -> Chunk {
        Chunk {
            id: format!("{}:{}", doc, idx),
            document_id: doc.to_string(),
            start: 0,
            end: text.len(),
            section: None,
            enriched_text: text.to_string(),
            raw_text: text.to_string(),
            chunk_index: idx,
            hash: content_hash(text),
            metadata: ChunkMetadata {
                document_id: doc.to_string(),
                chunk_index: idx,
                raw_text: text.to_string(),
                ..Default::default()
            },
        }
    }

    #[tokio::test]
    async fn test_query_orders_by_distance() {
        let store = InMemoryVectorStore::new(Arc::new(VocabEmbedder));
        store
            .replace_chunks(
                "d1",
                &[chunk("d1", 0, "refund rules"), chunk("d1", 1, "credit credit rules")],
            )
            .await
            .unwrap();
        let hits = store.query("credit", 2).await.unwrap();
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].chunk.id, "d1:1");
        assert!((hits[0].similarity() - 1.0).abs() < 1e-6);
        assert!(hits[1].similarity() < 1e-6);
    }

    #[tokio::test]
    async fn test_replace_chunks_drops_previous_version() {
        let store = InMemoryVectorStore::new(Arc::new(VocabEmbedder));
        store.replace_chunks("d1", &[chunk("d1", 0, "credit")]).await.unwrap();
        store.replace_chunks("d2", &[chunk("d2", 0, "refund")]).await.unwrap();
        store
            .replace_chunks("d1", &[chunk("d1", 0, "penalty"), chunk("d1", 1, "credit")])
            .await
            .unwrap();
        let all = store.get_all().await.unwrap();
        assert_eq!(all.len(), 3);
        assert_eq!(all[0].id, "d2:0");
        assert_eq!(store.len(), 3);
    }

    /// Counts how many texts reach the embedder.
    struct CountingEmbedder(AtomicUsize);

    #[async_trait]
    impl EmbeddingProvider for CountingEmbedder {
        fn model_name(&self) -> &str {
            "counting"
        }
        fn dims(&self) -> usize {
            3
        }
        async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
            self.0.fetch_add(texts.len(), Ordering::SeqCst);
            VocabEmbedder.embed(texts).await
        }
    }

    #[tokio::test]
    async fn test_reingest_embeds_only_changed_chunks() {
        let embedder = Arc::new(CountingEmbedder(AtomicUsize::new(0)));
        let store = InMemoryVectorStore::new(embedder.clone());
        let v1 = [chunk("d1", 0, "credit rules"), chunk("d1", 1, "refund rules")];
        store.replace_chunks("d1", &v1).await.unwrap();
        assert_eq!(embedder.0.load(Ordering::SeqCst), 2);

        store.replace_chunks("d1", &v1).await.unwrap();
        assert_eq!(embedder.0.load(Ordering::SeqCst), 2);

        let v2 = [chunk("d1", 0, "credit rules"), chunk("d1", 1, "penalty rules")];
        store.replace_chunks("d1", &v2).await.unwrap();
        assert_eq!(embedder.0.load(Ordering::SeqCst), 3);
        assert_eq!(store.len(), 2);

        let hits = store.query("penalty", 1).await.unwrap();
        assert_eq!(hits[0].chunk.id, "d1:1");
        assert!((hits[0].similarity() - 1.0).abs() < 1e-6);
    }

    #[tokio::test]
    async fn test_hashes_are_not_shared_across_documents() {
        let embedder = Arc::new(CountingEmbedder(AtomicUsize::new(0)));
        let store = InMemoryVectorStore::new(embedder.clone());
        store.replace_chunks("d1", &[chunk("d1", 0, "credit")]).await.unwrap();
        store.replace_chunks("d2", &[chunk("d2", 0, "credit")]).await.unwrap();
        assert_eq!(embedder.0.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_empty_store_query() {
        let store = InMemoryVectorStore::new(Arc::new(VocabEmbedder));
        assert!(store.is_empty());
        assert!(store.query("credit", 5).await.unwrap().is_empty());
    }
}
