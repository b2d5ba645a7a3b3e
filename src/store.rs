//! Vector store abstraction.
//!
//! The store is the single source of truth for processed documents. Writes
//! happen one source at a time: [`VectorStore::replace_source`] swaps a
//! document's entire generation (source row, chunks, vectors) atomically,
//! so readers never observe a half-written document. Similarity search is
//! scoped to one context type and ranked by descending cosine score, ties
//! broken by insertion order.
//!
//! Two implementations: [`SqliteStore`](crate::store_sqlite::SqliteStore)
//! for real runs and [`MemoryStore`](crate::store_memory::MemoryStore) for
//! tests.

use async_trait::async_trait;

use crate::errors::PipelineError;
use crate::models::{Chunk, KnownSource, ScoredChunk, SourceRecord};

#[async_trait]
pub trait VectorStore: Send + Sync {
    /// Atomically replace everything stored for `record.source_id` with the
    /// given chunks and their vectors. `chunks` and `vectors` must be the
    /// same length and aligned by position; a mismatch is a
    /// [`Consistency`](PipelineError::Consistency) error and nothing is
    /// written.
    async fn replace_source(
        &self,
        record: &SourceRecord,
        chunks: &[Chunk],
        vectors: &[Vec<f32>],
    ) -> Result<(), PipelineError>;

    /// Remove a source and all of its chunks and vectors.
    async fn delete_source(&self, source_id: &str) -> Result<(), PipelineError>;

    /// The content hash of the currently stored generation, if any.
    /// Drives processor idempotence.
    async fn content_hash(&self, source_id: &str) -> Result<Option<String>, PipelineError>;

    /// Top-`k` chunks for `context_type` by cosine similarity to `vector`.
    async fn query(
        &self,
        vector: &[f32],
        context_type: &str,
        k: usize,
    ) -> Result<Vec<ScoredChunk>, PipelineError>;

    /// All sources the store currently knows. The watcher seeds its
    /// last-seen map from this at startup.
    async fn sources(&self) -> Result<Vec<KnownSource>, PipelineError>;
}

/// Shared precondition check for both implementations.
pub(crate) fn check_aligned(chunks: &[Chunk], vectors: &[Vec<f32>]) -> Result<(), PipelineError> {
    if chunks.len() != vectors.len() {
        return Err(PipelineError::Consistency(format!(
            "{} chunks but {} vectors; refusing partial write",
            chunks.len(),
            vectors.len()
        )));
    }
    Ok(())
}
