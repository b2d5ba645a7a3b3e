//! Text chunking.
//!
//! Prose is split with a character-budget sliding window: window of
//! `max_chars`, stepping by `max_chars - overlap_chars`. Inside the tail of
//! each window the cut prefers a paragraph break (`\n\n`), then a sentence
//! break, then whitespace, falling back to a hard cut. Break-free text of
//! length S therefore yields exactly `ceil((S-O)/(C-O))` chunks, each at
//! most C characters.
//!
//! Tabular content (CSV/XLSX rows) is chunked record-wise: whole records
//! are packed into chunks under the same budget and never split mid-row.
//!
//! Each chunk gets a fresh UUID and a SHA-256 hash of its text for
//! staleness detection.

use std::collections::BTreeMap;

use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::models::Chunk;

/// Split prose into chunks of at most `max_chars` characters with
/// `overlap_chars` of carry-over between consecutive chunks.
/// Indices are contiguous from 0. Empty input yields no chunks.
pub fn chunk_prose(
    source_id: &str,
    text: &str,
    max_chars: usize,
    overlap_chars: usize,
    metadata: &BTreeMap<String, String>,
) -> Vec<Chunk> {
    assert!(overlap_chars < max_chars, "overlap must be < window");

    let text = text.trim();
    if text.is_empty() {
        return Vec::new();
    }
    if text.len() <= max_chars {
        return vec![make_chunk(source_id, 0, text, metadata)];
    }

    let mut chunks = Vec::new();
    let mut index: i64 = 0;
    let mut start = 0usize;

    while start < text.len() {
        let hard_end = prev_char_boundary(text, (start + max_chars).min(text.len()));
        let end = if hard_end == text.len() {
            hard_end
        } else {
            pick_cut(text, start, hard_end)
        };

        let piece = text[start..end].trim();
        if !piece.is_empty() {
            chunks.push(make_chunk(source_id, index, piece, metadata));
            index += 1;
        }

        if end == text.len() {
            break;
        }
        let mut next = end.saturating_sub(overlap_chars);
        next = prev_char_boundary(text, next.max(start + 1));
        // Overlap must never stall the window.
        start = if next > start { next } else { end };
    }

    chunks
}

/// Pack whole records (one string per row) into chunks of at most
/// `max_chars`. A single record larger than the budget is windowed on its
/// own rather than merged with neighbors.
pub fn chunk_records(
    source_id: &str,
    records: &[String],
    max_chars: usize,
    metadata: &BTreeMap<String, String>,
) -> Vec<Chunk> {
    let mut chunks = Vec::new();
    let mut index: i64 = 0;
    let mut buf = String::new();

    let mut flush = |buf: &mut String, chunks: &mut Vec<Chunk>, index: &mut i64| {
        if !buf.is_empty() {
            chunks.push(make_chunk(source_id, *index, buf, metadata));
            *index += 1;
            buf.clear();
        }
    };

    for record in records {
        let record = record.trim();
        if record.is_empty() {
            continue;
        }

        if record.len() > max_chars {
            flush(&mut buf, &mut chunks, &mut index);
            for piece in chunk_prose(source_id, record, max_chars, 0, metadata) {
                chunks.push(make_chunk(source_id, index, &piece.text, metadata));
                index += 1;
            }
            continue;
        }

        let would_be = if buf.is_empty() {
            record.len()
        } else {
            buf.len() + 2 + record.len()
        };
        if would_be > max_chars {
            flush(&mut buf, &mut chunks, &mut index);
        }
        if !buf.is_empty() {
            buf.push_str("\n\n");
        }
        buf.push_str(record);
    }

    flush(&mut buf, &mut chunks, &mut index);
    chunks
}

/// Choose a cut point in `(start, hard_end]`, preferring natural breaks in
/// the tail half of the window.
fn pick_cut(text: &str, start: usize, hard_end: usize) -> usize {
    let window = &text[start..hard_end];
    // Only look for breaks in the back half so chunks stay reasonably full.
    let floor = window.len() / 2;

    if let Some(pos) = window.rfind("\n\n") {
        if pos >= floor {
            return start + pos;
        }
    }
    for pattern in [". ", ".\n", "! ", "? "] {
        if let Some(pos) = window.rfind(pattern) {
            if pos >= floor {
                return start + pos + 1;
            }
        }
    }
    if let Some(pos) = window.rfind(|c: char| c.is_whitespace()) {
        if pos >= floor {
            return start + pos;
        }
    }
    hard_end
}

/// Largest char boundary at or below `idx`.
fn prev_char_boundary(text: &str, mut idx: usize) -> usize {
    while idx > 0 && !text.is_char_boundary(idx) {
        idx -= 1;
    }
    idx
}

fn make_chunk(
    source_id: &str,
    index: i64,
    text: &str,
    metadata: &BTreeMap<String, String>,
) -> Chunk {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    let hash = format!("{:x}", hasher.finalize());

    Chunk {
        id: Uuid::new_v4().to_string(),
        source_id: source_id.to_string(),
        chunk_index: index,
        text: text.to_string(),
        hash,
        metadata: metadata.clone(),
    }
}

/// SHA-256 over a whole document body, used for per-source idempotence.
pub fn content_hash(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}
