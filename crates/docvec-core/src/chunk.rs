//! Word-window text chunker with overlap.
//!
//! Splits document text into [`DocumentChunk`]s of at most `chunk_size`
//! whitespace-delimited words, with consecutive chunks sharing `overlap`
//! words. Sizes are expressed in words, not tokens: the token estimate is
//! computed per chunk but never drives slicing.
//!
//! Each chunk receives a deterministic UUID derived from its document ID
//! and index, plus a SHA-256 hash of its text for staleness detection.
//!
//! # Algorithm
//!
//! 1. Reject `chunk_size == 0` and `overlap >= chunk_size`.
//! 2. Locate every word (maximal run of non-whitespace) in the text.
//! 3. Starting at word 0, take `chunk_size` words as one chunk.
//! 4. Advance the start by `chunk_size - overlap` words.
//! 5. Stop once a chunk ends on the last word.
//!
//! A chunk's content is the original text from its first word's start to
//! its last word's end, so line breaks inside a chunk are kept.
//!
//! # Example
//!
//! ```rust
//! use docvec_core::chunk::chunk_text;
//!
//! let chunks = chunk_text("doc-123", "one two three four five", 3, 1).unwrap();
//! assert_eq!(chunks.len(), 2);
//! assert_eq!(chunks[0].content, "one two three");
//! assert_eq!(chunks[1].content, "three four five");
//! ```

use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::models::{ChunkMetadata, DocumentChunk};

/// Approximate characters-per-token ratio used for token estimates.
pub const CHARS_PER_TOKEN: usize = 4;

/// Structural markers counted by [`looks_like_code`].
const CODE_MARKERS: &[&str] = &[
    "{", "}", "=>", "->", "==", "!=", " = ", "();", "};", "fn ", "def ", "class ",
    "function ", "return ", "import ", "#include", "let ", "const ", "var ", "if (",
    "for (", "while (", "else {", "pub ", "public ", "private ", "struct ", "impl ",
];

/// Estimate tokens for `text` at [`CHARS_PER_TOKEN`] characters per token.
pub fn estimate_tokens(text: &str) -> usize {
    text.chars().count().div_ceil(CHARS_PER_TOKEN)
}

/// Keyword heuristic: true when at least two distinct structural markers
/// (braces, assignment, arrows, control-flow or declaration keywords)
/// appear in the text.
pub fn looks_like_code(text: &str) -> bool {
    CODE_MARKERS
        .iter()
        .filter(|marker| text.contains(*marker))
        .take(2)
        .count()
        >= 2
}

/// Validate chunking parameters.
pub fn validate_params(chunk_size: usize, overlap: usize) -> Result<()> {
    if chunk_size == 0 {
        return Err(Error::Configuration("chunk size must be > 0".to_string()));
    }
    if overlap >= chunk_size {
        return Err(Error::Configuration(format!(
            "chunk overlap ({}) must be smaller than chunk size ({})",
            overlap, chunk_size
        )));
    }
    Ok(())
}

/// Byte ranges of every whitespace-delimited word in `text`.
fn word_spans(text: &str) -> Vec<(usize, usize)> {
    let mut spans = Vec::new();
    let mut start: Option<usize> = None;
    for (i, ch) in text.char_indices() {
        if ch.is_whitespace() {
            if let Some(s) = start.take() {
                spans.push((s, i));
            }
        } else if start.is_none() {
            start = Some(i);
        }
    }
    if let Some(s) = start {
        spans.push((s, text.len()));
    }
    spans
}

/// Split text into overlapping word windows.
///
/// # Arguments
///
/// * `document_id`: The parent document's id (used for chunk ids).
/// * `text`: The full document text.
/// * `chunk_size`: Maximum words per chunk.
/// * `overlap`: Words shared between consecutive chunks.
///
/// # Guarantees
///
/// - Chunk indices are contiguous: `0, 1, 2, …, N-1`.
/// - Word offsets strictly increase and consecutive chunks share exactly
///   `overlap` words (the last chunk may share more when it is short).
/// - Empty or whitespace-only text produces no chunks.
///
/// # Errors
///
/// [`Error::Configuration`] when `chunk_size == 0` or `overlap >= chunk_size`.
pub fn chunk_text(
    document_id: &str,
    text: &str,
    chunk_size: usize,
    overlap: usize,
) -> Result<Vec<DocumentChunk>> {
    validate_params(chunk_size, overlap)?;

    let spans = word_spans(text);
    let total = spans.len();
    let step = chunk_size - overlap;
    let mut chunks = Vec::new();
    let mut start = 0usize;

    while start < total {
        let end = (start + chunk_size).min(total);
        let content = &text[spans[start].0..spans[end - 1].1];
        chunks.push(make_chunk(document_id, chunks.len(), content, start, end));
        if end == total {
            break;
        }
        start += step;
    }

    Ok(chunks)
}

/// Deterministic chunk id: UUID v5 over `document_id:index`.
pub fn chunk_id(document_id: &str, index: usize) -> String {
    Uuid::new_v5(
        &Uuid::NAMESPACE_OID,
        format!("{}:{}", document_id, index).as_bytes(),
    )
    .to_string()
}

/// Create a single [`DocumentChunk`] with an id and SHA-256 content hash.
fn make_chunk(
    document_id: &str,
    index: usize,
    content: &str,
    start: usize,
    end: usize,
) -> DocumentChunk {
    let mut hasher = Sha256::new();
    hasher.update(content.as_bytes());
    let hash = format!("{:x}", hasher.finalize());

    DocumentChunk {
        id: chunk_id(document_id, index),
        document_id: document_id.to_string(),
        index,
        content: content.to_string(),
        token_count: estimate_tokens(content),
        char_count: content.chars().count(),
        start_offset: start,
        end_offset: end,
        metadata: ChunkMetadata {
            word_count: end - start,
            looks_like_code: looks_like_code(content),
        },
        hash,
    }
}
