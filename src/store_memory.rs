//! In-memory [`VectorStore`] for tests.
//!
//! Same contract as the SQLite store: atomic per-source replacement,
//! context-scoped brute-force cosine ranking, insertion-order tie-break.

use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;

use crate::embedding::cosine_similarity;
use crate::errors::PipelineError;
use crate::models::{Chunk, KnownSource, ScoredChunk, SourceRecord};
use crate::store::{check_aligned, VectorStore};

struct StoredChunk {
    chunk: Chunk,
    vector: Vec<f32>,
    context_type: String,
    seq: u64,
}

#[derive(Default)]
struct Inner {
    sources: HashMap<String, SourceRecord>,
    chunks: Vec<StoredChunk>,
    next_seq: u64,
}

#[derive(Default)]
pub struct MemoryStore {
    inner: RwLock<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of chunks currently held for a source; test helper.
    pub fn chunk_count(&self, source_id: &str) -> usize {
        self.inner
            .read()
            .unwrap()
            .chunks
            .iter()
            .filter(|s| s.chunk.source_id == source_id)
            .count()
    }
}

#[async_trait]
impl VectorStore for MemoryStore {
    async fn replace_source(
        &self,
        record: &SourceRecord,
        chunks: &[Chunk],
        vectors: &[Vec<f32>],
    ) -> Result<(), PipelineError> {
        check_aligned(chunks, vectors)?;

        let mut inner = self.inner.write().unwrap();
        inner.chunks.retain(|s| s.chunk.source_id != record.source_id);
        for (chunk, vector) in chunks.iter().zip(vectors.iter()) {
            let seq = inner.next_seq;
            inner.next_seq += 1;
            inner.chunks.push(StoredChunk {
                chunk: chunk.clone(),
                vector: vector.clone(),
                context_type: record.context_type.clone(),
                seq,
            });
        }
        inner
            .sources
            .insert(record.source_id.clone(), record.clone());
        Ok(())
    }

    async fn delete_source(&self, source_id: &str) -> Result<(), PipelineError> {
        let mut inner = self.inner.write().unwrap();
        inner.chunks.retain(|s| s.chunk.source_id != source_id);
        inner.sources.remove(source_id);
        Ok(())
    }

    async fn content_hash(&self, source_id: &str) -> Result<Option<String>, PipelineError> {
        Ok(self
            .inner
            .read()
            .unwrap()
            .sources
            .get(source_id)
            .map(|r| r.content_hash.clone()))
    }

    async fn query(
        &self,
        vector: &[f32],
        context_type: &str,
        k: usize,
    ) -> Result<Vec<ScoredChunk>, PipelineError> {
        let inner = self.inner.read().unwrap();
        let mut scored: Vec<(u64, ScoredChunk)> = inner
            .chunks
            .iter()
            .filter(|s| s.context_type == context_type)
            .map(|s| {
                (
                    s.seq,
                    ScoredChunk {
                        chunk_id: s.chunk.id.clone(),
                        source_id: s.chunk.source_id.clone(),
                        text: s.chunk.text.clone(),
                        score: cosine_similarity(vector, &s.vector),
                    },
                )
            })
            .collect();

        scored.sort_by(|a, b| {
            b.1.score
                .partial_cmp(&a.1.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(a.0.cmp(&b.0))
        });
        Ok(scored.into_iter().take(k).map(|(_, c)| c).collect())
    }

    async fn sources(&self) -> Result<Vec<KnownSource>, PipelineError> {
        let inner = self.inner.read().unwrap();
        let mut known: Vec<KnownSource> = inner
            .sources
            .values()
            .map(|r| KnownSource {
                source_id: r.source_id.clone(),
                name: r.name.clone(),
                modified: r.modified,
                content_hash: r.content_hash.clone(),
            })
            .collect();
        known.sort_by(|a, b| a.source_id.cmp(&b.source_id));
        Ok(known)
    }
}
