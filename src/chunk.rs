//! Structure-aware, sentence-preserving document chunker.
//!
//! Splits a [`RawDocument`] into [`Chunk`]s whose boundaries follow the
//! document's own structure (section, rule, article and chapter headings,
//! numbered headers, paragraph breaks) and never fall inside a sentence.
//!
//! Each chunk carries two texts: the raw span, shown to the end user in
//! citations, and an enriched form with a short context header (document
//! label and detected section), which is what gets embedded.
//!
//! # Algorithm
//!
//! 1. Collect candidate boundaries: structural markers are *hard*
//!    boundaries, paragraph breaks are *soft*. Offsets `0` and `len` are
//!    always boundaries.
//! 2. Merge adjacent segments across soft boundaries while the merged span
//!    still fits the raw-text budget. Hard boundaries are never merged
//!    across, so a heading always opens its chunk.
//! 3. A span that fits the budget becomes one chunk. An oversized span is
//!    split into sentences that are accumulated greedily; a chunk that
//!    would fall below `min_chunk_size` force-includes one more full
//!    sentence, even past the maximum.
//! 4. Spans still shorter than `min_chunk_size` are dropped.
//!
//! The raw-text budget is `max_chunk_size` minus the largest header the
//! document can get. The header is fitted into `max_chunk_size -
//! min_chunk_size` by shortening the document label, then the section label,
//! so only forced sentences can push enriched text past the maximum.
//!
//! Offsets are byte offsets into the document text; sizes are measured in
//! characters.
//!
//! # Example
//!
//! ```rust
//! use lexrag::chunk::Chunker;
//! use lexrag::config::ChunkingConfig;
//! use lexrag::models::RawDocument;
//!
//! let chunker = Chunker::new(&ChunkingConfig { max_chunk_size: 400, min_chunk_size: 10, ..Default::default() });
//! let doc = RawDocument {
//!     id: "cgst".into(),
//!     text: "Section 16. Eligibility for input tax credit.\n\nEvery registered person shall be entitled to credit.".into(),
//!     name: "CGST Act".into(),
//!     doc_type: "act".into(),
//! };
//! let chunks = chunker.chunk_document(&doc);
//! assert_eq!(chunks.len(), 1);
//! assert_eq!(chunks[0].section.as_deref(), Some("Section 16"));
//! ```

use regex::Regex;
use sha2::{Digest, Sha256};
use std::collections::VecDeque;
use std::sync::OnceLock;

use crate::config::{ChunkingConfig, Overflow};
use crate::models::{Chunk, ChunkMetadata, RawDocument};

/// How far into a chunk the section pattern is searched.
const SECTION_SCAN_CHARS: usize = 300;
/// Longest section label carried into the header.
const MAX_SECTION_LABEL: usize = 40;
/// Longest document label carried into the header.
const MAX_DOC_LABEL: usize = 60;
/// `"Document: \n\n"` without the label.
const DOC_LINE_CHARS: usize = 12;
/// `"Section: \n"` without the label.
const SECTION_LINE_CHARS: usize = 10;
/// Smallest header: a `Document:` line with an empty label. Configs must
/// leave at least this much room between the minimum and maximum size.
pub const MIN_HEADER_CHARS: usize = DOC_LINE_CHARS;

fn structural_marker_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"(?m)^[ \t]*(?:(?i:section|sec\.|rule|article|clause|chapter)[ \t]+(?:\d+[A-Za-z]?|[IVXLCivxlc]+)\b|\d+(?:\.\d+)*[.)][ \t]+[A-Z])",
        )
        .expect("structural marker regex")
    })
}

fn paragraph_break_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\n[ \t]*\n\s*").expect("paragraph break regex"))
}

fn sentence_end_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r#"([.!?]+["'”’)\]]*)(?:\s+|$)"#).expect("sentence end regex")
    })
}

fn section_label_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"\b(?i:(section|sec\.|rule|chapter|article|clause))\s+(\d+[A-Za-z]?(?:\s*\(\s*[0-9A-Za-z]+\s*\))*|[IVXLC]+\b)",
        )
        .expect("section label regex")
    })
}

/// A candidate split point.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Boundary {
    offset: usize,
    /// Hard boundaries come from structural markers and are never merged across.
    hard: bool,
}

/// Splits documents into enriched chunks.
#[derive(Debug, Clone)]
pub struct Chunker {
    max_chunk_size: usize,
    min_chunk_size: usize,
    overflow: Overflow,
}

impl Chunker {
    pub fn new(config: &ChunkingConfig) -> Self {
        Self {
            max_chunk_size: config.max_chunk_size,
            min_chunk_size: config.min_chunk_size,
            overflow: config.overflow,
        }
    }

    /// Lazily chunk a document. Spans are sized on demand as the iterator
    /// advances; an empty document yields nothing.
    pub fn chunks<'a>(&'a self, doc: &'a RawDocument) -> Chunks<'a> {
        let header = self.header_layout(&doc.name);
        let budget = self.raw_budget(&header);
        let spans = merge_segments(&doc.text, &detect_boundaries(&doc.text), budget);
        Chunks {
            chunker: self,
            doc,
            header,
            budget,
            spans: spans.into(),
            ready: VecDeque::new(),
            next_index: 0,
        }
    }

    /// Eagerly chunk a document.
    pub fn chunk_document(&self, doc: &RawDocument) -> Vec<Chunk> {
        self.chunks(doc).collect()
    }

    /// Fit the header into `max_chunk_size - min_chunk_size`: the document
    /// label is shortened first, then the section line gets what is left.
    fn header_layout(&self, name: &str) -> HeaderLayout {
        let room = self.max_chunk_size.saturating_sub(self.min_chunk_size);
        let doc_label = truncate_chars(
            name.trim(),
            room.saturating_sub(DOC_LINE_CHARS).min(MAX_DOC_LABEL),
        );
        let section_chars = room
            .saturating_sub(DOC_LINE_CHARS + char_len(&doc_label) + SECTION_LINE_CHARS)
            .min(MAX_SECTION_LABEL);
        HeaderLayout {
            doc_label,
            section_chars,
        }
    }

    /// Characters available for raw text once the largest possible header
    /// for this document has been reserved.
    fn raw_budget(&self, header: &HeaderLayout) -> usize {
        self.max_chunk_size.saturating_sub(header.reserve()).max(1)
    }

    /// Size one merged span into zero or more final `[start, end)` spans.
    fn size_span(&self, text: &str, start: usize, end: usize, budget: usize) -> Vec<(usize, usize)> {
        let (start, end) = trim_span(text, start, end);
        if start >= end {
            return Vec::new();
        }
        if char_len(&text[start..end]) <= budget {
            return vec![(start, end)];
        }

        let sentences = sentence_spans(text, start, end);
        let mut out = Vec::new();
        let mut i = 0;
        while i < sentences.len() {
            let span_start = sentences[i].0;
            let mut span_end = span_start;
            let mut j = i;
            while j < sentences.len() && char_len(&text[span_start..sentences[j].1]) <= budget {
                span_end = sentences[j].1;
                j += 1;
            }
            // Completeness over the upper bound: take one more whole sentence
            // when the chunk would otherwise be empty or undersized.
            if (j == i || char_len(&text[span_start..span_end]) < self.min_chunk_size)
                && j < sentences.len()
            {
                span_end = sentences[j].1;
                j += 1;
            }
            out.push((span_start, span_end));
            if self.overflow == Overflow::Truncate {
                break;
            }
            i = j;
        }
        out
    }

    fn make_chunk(
        &self,
        doc: &RawDocument,
        header: &HeaderLayout,
        index: usize,
        start: usize,
        end: usize,
    ) -> Chunk {
        let raw_text = doc.text[start..end].to_string();
        let section = detect_section(&raw_text);
        let enriched_text = format!("{}{}", header.render(section.as_deref()), raw_text);
        let hash = content_hash(&enriched_text);

        let metadata = ChunkMetadata {
            document_id: doc.id.clone(),
            source: doc.name.clone(),
            doc_type: doc.doc_type.clone(),
            section: section.clone(),
            page: None,
            chunk_index: index,
            start,
            end,
            raw_text: raw_text.clone(),
            extra: Default::default(),
        };

        Chunk {
            id: format!("{}:{}", doc.id, index),
            document_id: doc.id.clone(),
            start,
            end,
            section,
            enriched_text,
            raw_text,
            chunk_index: index,
            hash,
            metadata,
        }
    }
}

/// Header sizes chosen for one document.
#[derive(Debug, Clone)]
struct HeaderLayout {
    doc_label: String,
    /// Longest section label that fits; `0` drops the `Section:` line.
    section_chars: usize,
}

impl HeaderLayout {
    fn reserve(&self) -> usize {
        let section_line = if self.section_chars > 0 {
            SECTION_LINE_CHARS + self.section_chars
        } else {
            0
        };
        DOC_LINE_CHARS + char_len(&self.doc_label) + section_line
    }

    fn render(&self, section: Option<&str>) -> String {
        match section {
            Some(section) if self.section_chars > 0 => {
                let section = truncate_chars(section, self.section_chars);
                context_header(&self.doc_label, Some(section.as_str()))
            }
            _ => context_header(&self.doc_label, None),
        }
    }
}

/// Iterator returned by [`Chunker::chunks`].
pub struct Chunks<'a> {
    chunker: &'a Chunker,
    doc: &'a RawDocument,
    header: HeaderLayout,
    budget: usize,
    spans: VecDeque<(usize, usize)>,
    ready: VecDeque<(usize, usize)>,
    next_index: usize,
}

impl Iterator for Chunks<'_> {
    type Item = Chunk;

    fn next(&mut self) -> Option<Chunk> {
        loop {
            while let Some((start, end)) = self.ready.pop_front() {
                if char_len(&self.doc.text[start..end]) < self.chunker.min_chunk_size {
                    continue;
                }
                let chunk = self.chunker.make_chunk(
                    self.doc,
                    &self.header,
                    self.next_index,
                    start,
                    end,
                );
                self.next_index += 1;
                return Some(chunk);
            }
            let (start, end) = self.spans.pop_front()?;
            self.ready = self
                .chunker
                .size_span(&self.doc.text, start, end, self.budget)
                .into();
        }
    }
}

/// Collect sorted, de-duplicated boundaries. A hard marker wins over a
/// paragraph break at the same offset.
fn detect_boundaries(text: &str) -> Vec<Boundary> {
    let mut boundaries = vec![
        Boundary { offset: 0, hard: true },
        Boundary { offset: text.len(), hard: true },
    ];
    for m in structural_marker_re().find_iter(text) {
        boundaries.push(Boundary { offset: m.start(), hard: true });
    }
    for m in paragraph_break_re().find_iter(text) {
        boundaries.push(Boundary { offset: m.end(), hard: false });
    }
    boundaries.sort_by(|a, b| a.offset.cmp(&b.offset).then(b.hard.cmp(&a.hard)));
    boundaries.dedup_by_key(|b| b.offset);
    boundaries
}

/// Turn boundaries into spans, merging across soft boundaries while the
/// trimmed result fits `budget`.
fn merge_segments(text: &str, boundaries: &[Boundary], budget: usize) -> Vec<(usize, usize)> {
    let mut spans = Vec::new();
    let mut current: Option<(usize, usize)> = None;

    for pair in boundaries.windows(2) {
        let (start, end) = (pair[0].offset, pair[1].offset);
        if start >= end {
            continue;
        }
        current = match current {
            None => Some((start, end)),
            Some((cur_start, cur_end)) => {
                let (ts, te) = trim_span(text, cur_start, end);
                if !pair[0].hard && char_len(&text[ts..te]) <= budget {
                    Some((cur_start, end))
                } else {
                    spans.push((cur_start, cur_end));
                    Some((start, end))
                }
            }
        };
    }
    if let Some(span) = current {
        spans.push(span);
    }
    spans
}

/// Sentence spans inside `[start, end)`, each trimmed of surrounding whitespace.
fn sentence_spans(text: &str, start: usize, end: usize) -> Vec<(usize, usize)> {
    let slice = &text[start..end];
    let mut spans = Vec::new();
    let mut cursor = 0;
    for caps in sentence_end_re().captures_iter(slice) {
        let (Some(whole), Some(punct)) = (caps.get(0), caps.get(1)) else {
            continue;
        };
        let (s, e) = trim_span(text, start + cursor, start + punct.end());
        if s < e {
            spans.push((s, e));
        }
        cursor = whole.end();
    }
    if cursor < slice.len() {
        let (s, e) = trim_span(text, start + cursor, end);
        if s < e {
            spans.push((s, e));
        }
    }
    spans
}

/// Find a section identifier near the start of a chunk, normalized to
/// e.g. `"Section 16(2)"` or `"Chapter IV"`.
pub fn detect_section(raw: &str) -> Option<String> {
    let head = truncate_chars(raw, SECTION_SCAN_CHARS);
    let caps = section_label_re().captures(&head)?;
    let keyword = caps.get(1)?.as_str().to_lowercase();
    let keyword = match keyword.as_str() {
        "sec." | "section" => "Section",
        "rule" => "Rule",
        "chapter" => "Chapter",
        "article" => "Article",
        _ => "Clause",
    };
    let number: String = caps
        .get(2)?
        .as_str()
        .chars()
        .filter(|c| !c.is_whitespace())
        .collect();
    Some(truncate_chars(
        &format!("{} {}", keyword, number),
        MAX_SECTION_LABEL,
    ))
}

/// Header prepended to the raw text before embedding.
fn context_header(doc_label: &str, section: Option<&str>) -> String {
    match section {
        Some(section) => format!("Document: {}\nSection: {}\n\n", doc_label, section),
        None => format!("Document: {}\n\n", doc_label),
    }
}

/// Hex SHA-256 of a chunk's enriched text. Stores compare it to skip
/// re-embedding unchanged chunks.
pub fn content_hash(text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    format!("{:x}", hasher.finalize())
}

fn trim_span(text: &str, start: usize, end: usize) -> (usize, usize) {
    let slice = &text[start..end];
    let leading = slice.len() - slice.trim_start().len();
    let trailing = slice.len() - slice.trim_end().len();
    if leading == slice.len() {
        return (start, start);
    }
    (start + leading, end - trailing)
}

fn char_len(s: &str) -> usize {
    s.chars().count()
}

fn truncate_chars(s: &str, max: usize) -> String {
    s.chars().take(max).collect()
}
