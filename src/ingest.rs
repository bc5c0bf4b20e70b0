//! Corpus loading and ingestion.
//!
//! Walks the configured corpus root, turns matching files into
//! [`RawDocument`]s, chunks them and replaces their chunks in the
//! [`VectorStore`]. Re-ingesting a document always replaces every chunk it
//! had before.

use anyhow::{bail, Context, Result};
use globset::{Glob, GlobSet, GlobSetBuilder};
use std::path::Path;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::chunk::Chunker;
use crate::config::CorpusConfig;
use crate::models::RawDocument;
use crate::store::VectorStore;

/// Totals from one ingestion run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IngestReport {
    pub documents: usize,
    pub chunks: usize,
    /// Ids of documents that produced no chunks (empty or whitespace only).
    pub empty_documents: Vec<String>,
}

/// Read every matching file under `corpus.root`, sorted by id.
pub fn load_corpus(corpus: &CorpusConfig) -> Result<Vec<RawDocument>> {
    let root = &corpus.root;
    if !root.exists() {
        bail!("Corpus root does not exist: {}", root.display());
    }

    let include_set = build_globset(&corpus.include_globs)?;
    let mut excludes = vec!["**/.git/**".to_string(), "**/target/**".to_string()];
    excludes.extend(corpus.exclude_globs.iter().cloned());
    let exclude_set = build_globset(&excludes)?;

    let mut docs = Vec::new();
    for entry in WalkDir::new(root) {
        let entry = entry?;
        if !entry.file_type().is_file() {
            continue;
        }
        let path = entry.path();
        let relative = path.strip_prefix(root).unwrap_or(path);
        let rel_str = relative.to_string_lossy().replace('\\', "/");

        if exclude_set.is_match(&rel_str) || !include_set.is_match(&rel_str) {
            continue;
        }

        let text = match std::fs::read_to_string(path) {
            Ok(text) => text,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "skipping unreadable file");
                continue;
            }
        };
        docs.push(RawDocument {
            id: rel_str.clone(),
            name: display_name(relative),
            doc_type: infer_doc_type(relative),
            text,
        });
    }

    docs.sort_by(|a, b| a.id.cmp(&b.id));
    debug!(root = %root.display(), documents = docs.len(), "corpus loaded");
    Ok(docs)
}

/// Chunk each document and replace its chunks in the store.
pub async fn ingest_documents(
    store: &dyn VectorStore,
    chunker: &Chunker,
    docs: &[RawDocument],
) -> Result<IngestReport> {
    let mut report = IngestReport::default();
    for doc in docs {
        let chunks = chunker.chunk_document(doc);
        if chunks.is_empty() {
            report.empty_documents.push(doc.id.clone());
        }
        store
            .replace_chunks(&doc.id, &chunks)
            .await
            .with_context(|| format!("storing chunks for {}", doc.id))?;
        debug!(document = %doc.id, chunks = chunks.len(), "document ingested");
        report.documents += 1;
        report.chunks += chunks.len();
    }
    info!(
        documents = report.documents,
        chunks = report.chunks,
        empty = report.empty_documents.len(),
        "ingestion complete"
    );
    Ok(report)
}

fn display_name(relative: &Path) -> String {
    relative
        .file_stem()
        .map(|s| s.to_string_lossy().replace(['_', '-'], " "))
        .unwrap_or_else(|| relative.to_string_lossy().to_string())
}

/// Coarse type from the file or parent directory name.
fn infer_doc_type(relative: &Path) -> String {
    let haystack = relative.to_string_lossy().to_lowercase();
    const KINDS: &[(&str, &str)] = &[
        ("rules", "rules"),
        ("circular", "circular"),
        ("notification", "notification"),
        ("faq", "faq"),
        ("act", "act"),
    ];
    KINDS
        .iter()
        .find(|(needle, _)| haystack.contains(needle))
        .map(|(_, kind)| kind.to_string())
        .unwrap_or_else(|| "document".to_string())
}

fn build_globset(patterns: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        builder.add(Glob::new(pattern)?);
    }
    Ok(builder.build()?)
}
