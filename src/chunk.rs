//! Sentence-boundary text chunker.
//!
//! Splits document text into [`Chunk`]s that target a configurable
//! `max_chars` length. Splitting occurs after sentence terminators
//! (`.`, `!`, `?`, `؟`) followed by whitespace, so a chunk never ends
//! mid-sentence unless the sentence itself is longer than the target.
//!
//! # Algorithm
//!
//! 1. Cut the text into sentence units, each keeping its terminator and
//!    trailing whitespace.
//! 2. Greedily accumulate units into a buffer; when the next unit would
//!    push the buffer past `max_chars`, close the buffer as a chunk.
//! 3. Merge pass: a chunk shorter than `max_chars / 2` is appended to the
//!    previous chunk. A short first chunk has no predecessor and stays
//!    standalone, so only the first and last chunks of a document can be
//!    short.
//!
//! `max_chars` is a target, not a hard limit: a text without sentence
//! terminators yields exactly one chunk regardless of its length.
//!
//! Lengths are measured in characters, not bytes.

use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::models::{Chunk, Document};

/// Chunk a document, attaching its metadata to every chunk.
///
/// Returns an empty list only for whitespace-only text (which the loader
/// never produces).
pub fn chunk_document(doc: &Document, max_chars: usize) -> Vec<Chunk> {
    let pieces = split_text(&doc.text, max_chars);
    let total = pieces.len();

    pieces
        .into_iter()
        .enumerate()
        .map(|(index, text)| Chunk {
            id: Uuid::new_v4().to_string(),
            document_id: doc.id.clone(),
            filename: doc.filename.clone(),
            format: doc.format,
            language: doc.language,
            chunk_index: index,
            total_chunks: total,
            hash: content_hash(&text),
            text,
        })
        .collect()
}

/// Split text into trimmed chunk strings. See the module docs.
pub fn split_text(text: &str, max_chars: usize) -> Vec<String> {
    if text.trim().is_empty() {
        return Vec::new();
    }
    let max_chars = max_chars.max(1);

    let mut chunks: Vec<String> = Vec::new();
    let mut buf = String::new();
    let mut buf_chars = 0usize;

    for unit in sentence_units(text) {
        let unit_chars = unit.chars().count();
        if buf_chars > 0 && buf_chars + unit_chars > max_chars {
            push_trimmed(&mut chunks, &buf);
            buf.clear();
            buf_chars = 0;
        }
        buf.push_str(unit);
        buf_chars += unit_chars;
    }
    push_trimmed(&mut chunks, &buf);

    if chunks.is_empty() {
        return vec![text.trim().to_string()];
    }

    merge_short_chunks(chunks, max_chars / 2)
}

/// Cut `text` after every sentence terminator that is followed by
/// whitespace. Units keep their trailing whitespace, so concatenating
/// them reproduces `text` exactly.
fn sentence_units(text: &str) -> Vec<&str> {
    let mut units = Vec::new();
    let mut start = 0usize;
    let mut chars = text.char_indices().peekable();

    while let Some((_, c)) = chars.next() {
        if !matches!(c, '.' | '!' | '?' | '؟') {
            continue;
        }
        if !matches!(chars.peek(), Some((_, next)) if next.is_whitespace()) {
            continue;
        }
        // consume the whole whitespace run into this unit
        let mut end = text.len();
        while let Some(&(i, next)) = chars.peek() {
            if next.is_whitespace() {
                chars.next();
            } else {
                end = i;
                break;
            }
        }
        units.push(&text[start..end]);
        start = end;
    }
    if start < text.len() {
        units.push(&text[start..]);
    }
    units
}

fn push_trimmed(chunks: &mut Vec<String>, buf: &str) {
    let trimmed = buf.trim();
    if !trimmed.is_empty() {
        chunks.push(trimmed.to_string());
    }
}

fn merge_short_chunks(chunks: Vec<String>, min_chars: usize) -> Vec<String> {
    let mut merged: Vec<String> = Vec::with_capacity(chunks.len());
    for chunk in chunks {
        let short = chunk.chars().count() < min_chars;
        match merged.last_mut() {
            Some(last) if short => {
                last.push(' ');
                last.push_str(&chunk);
            }
            _ => merged.push(chunk),
        }
    }
    merged
}

/// SHA-256 of the chunk text, hex encoded.
pub fn content_hash(text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    format!("{:x}", hasher.finalize())
}
