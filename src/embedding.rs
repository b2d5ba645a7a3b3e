//! Embedding client abstraction and the OpenAI implementation.
//!
//! [`EmbeddingClient::embed`] is order-preserving: one vector per input
//! text, same order. The OpenAI client batches texts into a single
//! `POST /v1/embeddings` call and retries transient failures with
//! exponential backoff (1s, 2s, 4s, ...), up to the configured attempt
//! budget. 4xx responses other than 429 fail immediately.
//!
//! Vector helpers for the SQLite store live here too:
//! [`cosine_similarity`], [`vec_to_blob`], [`blob_to_vec`].

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::warn;

use crate::config::EmbeddingConfig;
use crate::errors::PipelineError;

const OPENAI_API: &str = "https://api.openai.com/v1";

#[async_trait]
pub trait EmbeddingClient: Send + Sync {
    /// Embed a batch of texts. Returns one vector per input, in input order.
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, PipelineError>;

    /// Vector dimensionality this client produces.
    fn dims(&self) -> usize;
}

/// OpenAI embeddings API client.
pub struct OpenAiEmbeddings {
    http: reqwest::Client,
    api_key: String,
    model: String,
    dims: usize,
    max_attempts: u32,
    base_url: String,
}

#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingDatum>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingDatum {
    index: usize,
    embedding: Vec<f32>,
}

impl OpenAiEmbeddings {
    pub fn new(config: &EmbeddingConfig) -> Result<Self, PipelineError> {
        let api_key = std::env::var("OPENAI_API_KEY").map_err(|_| {
            PipelineError::Permanent("OPENAI_API_KEY environment variable not set".to_string())
        })?;
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self {
            http,
            api_key,
            model: config.model.clone(),
            dims: config.dims,
            max_attempts: config.max_attempts,
            base_url: config
                .base_url
                .clone()
                .unwrap_or_else(|| OPENAI_API.to_string()),
        })
    }

    async fn request_once(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, PipelineError> {
        let body = serde_json::json!({
            "model": self.model,
            "input": texts,
        });
        let response = self
            .http
            .post(format!("{}/embeddings", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(PipelineError::from_status(status, "embeddings"));
        }

        let parsed: EmbeddingResponse = response
            .json()
            .await
            .map_err(|e| PipelineError::Transient(format!("embeddings decode: {e}")))?;

        if parsed.data.len() != texts.len() {
            return Err(PipelineError::Permanent(format!(
                "embeddings: {} inputs but {} vectors returned",
                texts.len(),
                parsed.data.len()
            )));
        }

        // The API may reorder; the index field restores input order.
        let mut vectors: Vec<Vec<f32>> = vec![Vec::new(); texts.len()];
        for datum in parsed.data {
            if datum.index >= vectors.len() {
                return Err(PipelineError::Permanent(
                    "embeddings: out-of-range index in response".to_string(),
                ));
            }
            vectors[datum.index] = datum.embedding;
        }
        Ok(vectors)
    }
}

#[async_trait]
impl EmbeddingClient for OpenAiEmbeddings {
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, PipelineError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let mut last_err = PipelineError::Transient("no attempts made".to_string());
        for attempt in 0..self.max_attempts {
            if attempt > 0 {
                let delay = Duration::from_secs(1 << (attempt - 1).min(5));
                tokio::time::sleep(delay).await;
            }
            match self.request_once(texts).await {
                Ok(vectors) => return Ok(vectors),
                Err(err) if err.is_retryable() => {
                    warn!(attempt, %err, "embedding attempt failed; backing off");
                    last_err = err;
                }
                Err(err) => return Err(err),
            }
        }
        Err(last_err)
    }

    fn dims(&self) -> usize {
        self.dims
    }
}

/// Cosine similarity of two equal-length vectors; 0.0 when either is zero.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f64 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let mut dot = 0.0f64;
    let mut norm_a = 0.0f64;
    let mut norm_b = 0.0f64;
    for (x, y) in a.iter().zip(b.iter()) {
        dot += (*x as f64) * (*y as f64);
        norm_a += (*x as f64) * (*x as f64);
        norm_b += (*y as f64) * (*y as f64);
    }
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a.sqrt() * norm_b.sqrt())
}

/// Encode a vector as little-endian f32 bytes for BLOB storage.
pub fn vec_to_blob(vector: &[f32]) -> Vec<u8> {
    let mut blob = Vec::with_capacity(vector.len() * 4);
    for value in vector {
        blob.extend_from_slice(&value.to_le_bytes());
    }
    blob
}

/// Decode a BLOB written by [`vec_to_blob`].
pub fn blob_to_vec(blob: &[u8]) -> Vec<f32> {
    blob.chunks_exact(4)
        .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
        .collect()
}
