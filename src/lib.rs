//! # lexrag
//!
//! Hybrid retrieval-augmented question answering over legal and financial
//! document collections.
//!
//! Documents are cut into section-aware chunks, embedded into a vector
//! store and indexed with BM25. A question is answered by fusing semantic
//! and lexical candidates (with a boost for exact legal references,
//! amounts, abbreviations and dates), generating an answer from the best
//! passages, and scoring that answer for faithfulness and relevance.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────┐   ┌──────────┐   ┌──────────────┐
//! │  Corpus  │──▶│ Chunker  │──▶│ VectorStore  │──┐
//! └──────────┘   └──────────┘   └──────────────┘  │ get_all
//!                                      │ query     ▼
//!                                      │     ┌──────────────┐
//!                                      └────▶│ HybridRetr.  │◀── LexicalIndex
//!                                            └──────┬───────┘
//!                                                   ▼
//!              ┌──────────┐   ┌───────────┐   ┌──────────┐
//!              │ Metrics  │◀──│  Scorer   │◀──│ Pipeline │──▶ Generator
//!              └──────────┘   └───────────┘   └──────────┘
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing and validation |
//! | [`models`] | Core data types |
//! | [`chunk`] | Boundary-aware chunking with context headers |
//! | [`lexical`] | BM25 index and important-term extraction |
//! | [`embedding`] | Embedding provider abstraction |
//! | [`store`] | Vector store abstraction and in-memory store |
//! | [`search`] | Hybrid fusion retriever |
//! | [`generation`] | Text generation abstraction |
//! | [`openai`] | Shared client for OpenAI-compatible APIs |
//! | [`entailment`] | Entailment classifier abstraction |
//! | [`scoring`] | Faithfulness and relevance scoring |
//! | [`metrics`] | Append-only JSONL metrics log |
//! | [`pipeline`] | Question answering orchestration |
//! | [`ingest`] | Corpus loading and ingestion |
//! | [`error`] | Pipeline error taxonomy |

pub mod chunk;
pub mod config;
pub mod embedding;
pub mod entailment;
pub mod error;
pub mod generation;
pub mod ingest;
pub mod lexical;
pub mod metrics;
pub mod models;
pub mod openai;
pub mod pipeline;
pub mod scoring;
pub mod search;
pub mod store;
