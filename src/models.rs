//! Core data models that flow through the watch → chunk → embed → answer
//! pipeline.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// What happened to a source item between two poll cycles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeKind {
    Created,
    Modified,
    Deleted,
}

/// A change detected by the watcher, published on the bus and consumed by
/// the processor. Delivery is at-least-once; the processor is idempotent
/// per `source_id` + content hash.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChangeEvent {
    pub source_id: String,
    pub name: String,
    pub mime_type: String,
    pub kind: ChangeKind,
    pub modified: DateTime<Utc>,
}

/// One entry from a document source listing.
#[derive(Debug, Clone)]
pub struct SourceEntry {
    pub id: String,
    pub name: String,
    pub mime_type: String,
    pub modified: DateTime<Utc>,
}

/// Raw bytes fetched for a source item.
#[derive(Debug, Clone)]
pub struct FetchedDocument {
    pub bytes: Vec<u8>,
    pub mime_type: String,
}

/// A bounded-size slice of a document's text, the unit of embedding and
/// retrieval. Immutable once created; a changed document replaces all of
/// its chunks rather than mutating them.
#[derive(Debug, Clone)]
pub struct Chunk {
    pub id: String,
    pub source_id: String,
    pub chunk_index: i64,
    pub text: String,
    /// SHA-256 of `text`, used for staleness detection.
    pub hash: String,
    pub metadata: BTreeMap<String, String>,
}

/// A chunk returned from similarity search, ranked by descending score.
#[derive(Debug, Clone)]
pub struct ScoredChunk {
    pub chunk_id: String,
    pub source_id: String,
    pub text: String,
    pub score: f64,
}

/// A source the store currently holds chunks for.
#[derive(Debug, Clone)]
pub struct KnownSource {
    pub source_id: String,
    pub name: String,
    pub modified: DateTime<Utc>,
    pub content_hash: String,
}

/// Everything the store records about a document generation, persisted
/// alongside its chunks and vectors in one transaction.
#[derive(Debug, Clone)]
pub struct SourceRecord {
    pub source_id: String,
    pub name: String,
    pub content_hash: String,
    pub context_type: String,
    pub modified: DateTime<Utc>,
}

/// A user question scoped to one retrieval partition.
#[derive(Debug, Clone)]
pub struct Query {
    pub text: String,
    pub context_type: String,
}

/// The agent's reply. When retrieval finds nothing, `text` explains that
/// and `supporting_chunk_ids` is empty — no language-model call is made.
#[derive(Debug, Clone)]
pub struct Answer {
    pub text: String,
    pub supporting_chunk_ids: Vec<String>,
}

impl Answer {
    pub fn no_context(context_type: &str) -> Self {
        Self {
            text: format!("No relevant context found for \"{context_type}\"."),
            supporting_chunk_ids: Vec::new(),
        }
    }

    pub fn has_context(&self) -> bool {
        !self.supporting_chunk_ids.is_empty()
    }
}
