//! Document chunking.
//!
//! [`SectionChunker`] drops pages that belong to non-substantive sections
//! (references, appendices, limitations, ethics statements), splits the
//! remaining text recursively on paragraph, line, sentence, and word
//! boundaries, falling back to raw characters, and merges the pieces into
//! overlapping chunks of bounded length. Every chunk is tagged with a coarse
//! [`Section`] label derived from its page.
//!
//! All lengths are measured in characters, not bytes.

use std::collections::VecDeque;

use tracing::debug;

use crate::config::validate_chunking;
use crate::document::{Chunk, Document, Page, Section};
use crate::error::Result;

/// Pages whose text contains any of these words (case-insensitive) are discarded.
pub const EXCLUDED_KEYWORDS: [&str; 4] = ["references", "appendix", "limitations", "ethics"];

/// Boundaries tried in order when a piece of text is too long.
const SEPARATORS: [&str; 5] = ["\n\n", "\n", ". ", " ", ""];

/// A strategy for splitting documents into chunks.
pub trait Chunker: Send + Sync {
    /// Split a document into chunks.
    ///
    /// Returns an empty `Vec` when nothing survives filtering; callers treat
    /// that as "nothing to index".
    fn chunk(&self, document: &Document) -> Vec<Chunk>;
}

/// Keyword-filtering recursive chunker with overlap and section labels.
///
/// # Example
///
/// ```rust,ignore
/// use docqa_rag::chunking::{Chunker, SectionChunker};
///
/// let chunker = SectionChunker::new(300, 100)?;
/// let chunks = chunker.chunk(&document);
/// ```
#[derive(Debug, Clone)]
pub struct SectionChunker {
    chunk_size: usize,
    chunk_overlap: usize,
}

impl SectionChunker {
    /// Create a new `SectionChunker`.
    ///
    /// # Errors
    ///
    /// Returns [`RagError::InvalidConfiguration`](crate::RagError::InvalidConfiguration)
    /// unless `chunk_overlap < chunk_size`.
    pub fn new(chunk_size: usize, chunk_overlap: usize) -> Result<Self> {
        validate_chunking(chunk_size, chunk_overlap)?;
        Ok(Self { chunk_size, chunk_overlap })
    }

    /// Maximum chunk length in characters.
    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    /// Overlap between consecutive chunks in characters.
    pub fn chunk_overlap(&self) -> usize {
        self.chunk_overlap
    }
}

/// Whether a page mentions any excluded section keyword.
pub fn is_excluded(page: &Page) -> bool {
    let lowered = page.text.to_lowercase();
    EXCLUDED_KEYWORDS.iter().any(|keyword| lowered.contains(keyword))
}

impl Chunker for SectionChunker {
    fn chunk(&self, document: &Document) -> Vec<Chunk> {
        let mut chunks = Vec::new();
        let mut skipped = 0usize;

        for page in &document.pages {
            if is_excluded(page) {
                skipped += 1;
                continue;
            }
            let section = Section::from_page(page.index);
            for text in split_text(&page.text, self.chunk_size, self.chunk_overlap) {
                chunks.push(Chunk {
                    id: format!("{}_{}", document.id, chunks.len()),
                    text,
                    document_id: document.id.clone(),
                    page: page.index,
                    section,
                });
            }
        }

        debug!(
            document.id = %document.id,
            pages = document.pages.len(),
            skipped_pages = skipped,
            chunk_count = chunks.len(),
            "chunked document"
        );
        chunks
    }
}

/// Split text into chunks of at most `chunk_size` characters, consecutive
/// chunks sharing up to `chunk_overlap` characters.
pub fn split_text(text: &str, chunk_size: usize, chunk_overlap: usize) -> Vec<String> {
    if text.trim().is_empty() || chunk_size == 0 {
        return Vec::new();
    }
    split_recursive(text, chunk_size, chunk_overlap, &SEPARATORS)
}

fn char_len(s: &str) -> usize {
    s.chars().count()
}

/// Split on the first separator present in `text`, merge pieces that fit, and
/// recurse with the finer separators on pieces that do not.
fn split_recursive(
    text: &str,
    chunk_size: usize,
    chunk_overlap: usize,
    separators: &[&str],
) -> Vec<String> {
    let position = separators
        .iter()
        .position(|sep| sep.is_empty() || text.contains(sep))
        .unwrap_or(separators.len().saturating_sub(1));
    let separator = separators.get(position).copied().unwrap_or("");
    let finer = separators.get(position + 1..).unwrap_or(&[]);

    let pieces: Vec<&str> = if separator.is_empty() {
        text.char_indices().map(|(i, c)| &text[i..i + c.len_utf8()]).collect()
    } else {
        split_keeping_separator(text, separator)
    };

    let mut chunks = Vec::new();
    let mut pending: Vec<&str> = Vec::new();

    for piece in pieces {
        if char_len(piece) <= chunk_size {
            pending.push(piece);
            continue;
        }
        if !pending.is_empty() {
            chunks.extend(merge_pieces(&pending, chunk_size, chunk_overlap));
            pending.clear();
        }
        chunks.extend(split_recursive(piece, chunk_size, chunk_overlap, finer));
    }

    if !pending.is_empty() {
        chunks.extend(merge_pieces(&pending, chunk_size, chunk_overlap));
    }

    chunks
}

/// Split text at a separator while keeping the separator attached to the preceding segment.
fn split_keeping_separator<'a>(text: &'a str, separator: &str) -> Vec<&'a str> {
    let mut result = Vec::new();
    let mut start = 0;

    while let Some(pos) = text[start..].find(separator) {
        let end = start + pos + separator.len();
        result.push(&text[start..end]);
        start = end;
    }

    if start < text.len() {
        result.push(&text[start..]);
    }

    result
}

/// Greedily pack pieces (each at most `chunk_size`) into chunks, carrying the
/// trailing pieces of each emitted chunk into the next one while they fit in
/// `chunk_overlap`.
fn merge_pieces(pieces: &[&str], chunk_size: usize, chunk_overlap: usize) -> Vec<String> {
    let mut chunks = Vec::new();
    let mut window: VecDeque<&str> = VecDeque::new();
    let mut total = 0usize;

    for piece in pieces {
        let len = char_len(piece);
        if total + len > chunk_size && !window.is_empty() {
            push_window(&mut chunks, &window);
            while total > chunk_overlap || (total + len > chunk_size && total > 0) {
                match window.pop_front() {
                    Some(front) => total -= char_len(front),
                    None => break,
                }
            }
        }
        window.push_back(piece);
        total += len;
    }

    if !window.is_empty() {
        push_window(&mut chunks, &window);
    }

    chunks
}

fn push_window(chunks: &mut Vec<String>, window: &VecDeque<&str>) {
    let joined: String = window.iter().copied().collect();
    let trimmed = joined.trim();
    if !trimmed.is_empty() {
        chunks.push(trimmed.to_string());
    }
}
