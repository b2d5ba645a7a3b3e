//! SQLite-backed [`VectorStore`].
//!
//! Vectors are stored as little-endian f32 BLOBs; similarity search is
//! brute-force cosine over all vectors in one context type, computed in
//! Rust. Fine at this corpus scale, and it keeps the ranking semantics
//! (descending score, insertion-order tie-break) exact.

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use sqlx::{Row, SqlitePool};

use crate::embedding::{blob_to_vec, cosine_similarity, vec_to_blob};
use crate::errors::PipelineError;
use crate::models::{Chunk, KnownSource, ScoredChunk, SourceRecord};
use crate::store::{check_aligned, VectorStore};

pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl VectorStore for SqliteStore {
    async fn replace_source(
        &self,
        record: &SourceRecord,
        chunks: &[Chunk],
        vectors: &[Vec<f32>],
    ) -> Result<(), PipelineError> {
        check_aligned(chunks, vectors)?;

        let mut tx = self.pool.begin().await?;

        sqlx::query("DELETE FROM vectors WHERE source_id = ?")
            .bind(&record.source_id)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM chunks WHERE source_id = ?")
            .bind(&record.source_id)
            .execute(&mut *tx)
            .await?;

        sqlx::query(
            r#"
            INSERT INTO sources (source_id, name, content_hash, context_type, modified, updated_at)
            VALUES (?, ?, ?, ?, ?, ?)
            ON CONFLICT(source_id) DO UPDATE SET
                name = excluded.name,
                content_hash = excluded.content_hash,
                context_type = excluded.context_type,
                modified = excluded.modified,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(&record.source_id)
        .bind(&record.name)
        .bind(&record.content_hash)
        .bind(&record.context_type)
        .bind(record.modified.timestamp())
        .bind(Utc::now().timestamp())
        .execute(&mut *tx)
        .await?;

        // Monotonic insertion sequence; rowids can be reused after deletes,
        // so the tie-break order gets its own column.
        let base_seq: i64 = sqlx::query_scalar("SELECT COALESCE(MAX(seq), 0) FROM chunks")
            .fetch_one(&mut *tx)
            .await?;

        for (offset, (chunk, vector)) in chunks.iter().zip(vectors.iter()).enumerate() {
            let metadata_json = serde_json::to_string(&chunk.metadata)
                .map_err(|e| PipelineError::Consistency(format!("metadata encode: {e}")))?;
            sqlx::query(
                "INSERT INTO chunks (id, source_id, chunk_index, text, hash, metadata_json, seq)
                 VALUES (?, ?, ?, ?, ?, ?, ?)",
            )
            .bind(&chunk.id)
            .bind(&chunk.source_id)
            .bind(chunk.chunk_index)
            .bind(&chunk.text)
            .bind(&chunk.hash)
            .bind(&metadata_json)
            .bind(base_seq + 1 + offset as i64)
            .execute(&mut *tx)
            .await?;

            sqlx::query(
                "INSERT INTO vectors (chunk_id, source_id, context_type, dims, embedding)
                 VALUES (?, ?, ?, ?, ?)",
            )
            .bind(&chunk.id)
            .bind(&chunk.source_id)
            .bind(&record.context_type)
            .bind(vector.len() as i64)
            .bind(vec_to_blob(vector))
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    async fn delete_source(&self, source_id: &str) -> Result<(), PipelineError> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM vectors WHERE source_id = ?")
            .bind(source_id)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM chunks WHERE source_id = ?")
            .bind(source_id)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM sources WHERE source_id = ?")
            .bind(source_id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(())
    }

    async fn content_hash(&self, source_id: &str) -> Result<Option<String>, PipelineError> {
        let hash: Option<String> =
            sqlx::query_scalar("SELECT content_hash FROM sources WHERE source_id = ?")
                .bind(source_id)
                .fetch_optional(&self.pool)
                .await?;
        Ok(hash)
    }

    async fn query(
        &self,
        vector: &[f32],
        context_type: &str,
        k: usize,
    ) -> Result<Vec<ScoredChunk>, PipelineError> {
        let rows = sqlx::query(
            r#"
            SELECT c.id, c.source_id, c.text, v.embedding
            FROM vectors v
            JOIN chunks c ON c.id = v.chunk_id
            WHERE v.context_type = ?
            ORDER BY c.seq
            "#,
        )
        .bind(context_type)
        .fetch_all(&self.pool)
        .await?;

        let mut scored: Vec<ScoredChunk> = rows
            .into_iter()
            .map(|row| {
                let embedding: Vec<u8> = row.get("embedding");
                ScoredChunk {
                    chunk_id: row.get("id"),
                    source_id: row.get("source_id"),
                    text: row.get("text"),
                    score: cosine_similarity(vector, &blob_to_vec(&embedding)),
                }
            })
            .collect();

        // Stable sort keeps insertion order for equal scores.
        scored.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(k);
        Ok(scored)
    }

    async fn sources(&self) -> Result<Vec<KnownSource>, PipelineError> {
        let rows = sqlx::query(
            "SELECT source_id, name, content_hash, modified FROM sources ORDER BY source_id",
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|row| {
                let modified: i64 = row.get("modified");
                KnownSource {
                    source_id: row.get("source_id"),
                    name: row.get("name"),
                    content_hash: row.get("content_hash"),
                    modified: Utc
                        .timestamp_opt(modified, 0)
                        .single()
                        .unwrap_or_default(),
                }
            })
            .collect())
    }
}
