//! Document processor: change events in, stored chunk generations out.
//!
//! For a created/modified event the processor fetches the raw document,
//! parses it by declared mime type, chunks it, embeds the chunk texts in
//! batches, and hands the whole generation to the store in one atomic
//! replace. For a deleted event it drops the source outright.
//!
//! Nothing is persisted unless every chunk embedded: an embedding failure
//! after the client's own retry budget leaves the store on the previous
//! generation and publishes a failed event. Reprocessing a document whose
//! content hash already matches the stored generation is a no-op.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info, warn};

use crate::bus::{BusMessage, MessageBus, Subscriber, TOPIC_FAILED, TOPIC_PROCESSED};
use crate::chunk::{chunk_prose, chunk_records, content_hash};
use crate::config::ChunkingConfig;
use crate::embedding::EmbeddingClient;
use crate::errors::PipelineError;
use crate::models::{ChangeEvent, ChangeKind, Chunk, SourceRecord};
use crate::parse::{context_type_for, parse_document, ParsedContent};
use crate::source::DocumentSource;
use crate::store::VectorStore;

pub struct DocumentProcessor {
    source: Arc<dyn DocumentSource>,
    store: Arc<dyn VectorStore>,
    embedder: Arc<dyn EmbeddingClient>,
    bus: Arc<MessageBus>,
    chunking: ChunkingConfig,
    batch_size: usize,
}

impl DocumentProcessor {
    pub fn new(
        source: Arc<dyn DocumentSource>,
        store: Arc<dyn VectorStore>,
        embedder: Arc<dyn EmbeddingClient>,
        bus: Arc<MessageBus>,
        chunking: ChunkingConfig,
        batch_size: usize,
    ) -> Self {
        Self {
            source,
            store,
            embedder,
            bus,
            chunking,
            batch_size,
        }
    }

    /// Process one change event end to end.
    pub async fn handle_change(&self, event: &ChangeEvent) -> Result<(), PipelineError> {
        if event.kind == ChangeKind::Deleted {
            self.store.delete_source(&event.source_id).await?;
            info!(source_id = %event.source_id, "source deleted from store");
            self.bus.publish(
                TOPIC_PROCESSED,
                BusMessage::Processed {
                    source_id: event.source_id.clone(),
                    chunk_count: 0,
                },
            );
            return Ok(());
        }

        let document = self.source.fetch(&event.source_id).await?;
        let hash = content_hash(&document.bytes);

        if self.store.content_hash(&event.source_id).await?.as_deref() == Some(hash.as_str()) {
            debug!(source_id = %event.source_id, "content unchanged; skipping");
            return Ok(());
        }

        let chunks = self.chunk_document(event, &document.bytes, &document.mime_type)?;
        let vectors = self.embed_chunks(&chunks).await?;

        let record = SourceRecord {
            source_id: event.source_id.clone(),
            name: event.name.clone(),
            content_hash: hash,
            context_type: context_type_for(&document.mime_type).to_string(),
            modified: event.modified,
        };
        self.store.replace_source(&record, &chunks, &vectors).await?;

        info!(
            source_id = %event.source_id,
            chunks = chunks.len(),
            context_type = %record.context_type,
            "document processed"
        );
        self.bus.publish(
            TOPIC_PROCESSED,
            BusMessage::Processed {
                source_id: event.source_id.clone(),
                chunk_count: chunks.len(),
            },
        );
        Ok(())
    }

    fn chunk_document(
        &self,
        event: &ChangeEvent,
        bytes: &[u8],
        mime_type: &str,
    ) -> Result<Vec<Chunk>, PipelineError> {
        let metadata = BTreeMap::from([
            ("name".to_string(), event.name.clone()),
            ("mime_type".to_string(), mime_type.to_string()),
        ]);

        let chunks = match parse_document(bytes, mime_type)? {
            ParsedContent::Prose(text) => chunk_prose(
                &event.source_id,
                &text,
                self.chunking.max_chars,
                self.chunking.overlap_chars,
                &metadata,
            ),
            ParsedContent::Records(records) => chunk_records(
                &event.source_id,
                &records,
                self.chunking.max_chars,
                &metadata,
            ),
        };
        Ok(chunks)
    }

    async fn embed_chunks(&self, chunks: &[Chunk]) -> Result<Vec<Vec<f32>>, PipelineError> {
        let mut vectors = Vec::with_capacity(chunks.len());
        for batch in chunks.chunks(self.batch_size.max(1)) {
            let texts: Vec<String> = batch.iter().map(|c| c.text.clone()).collect();
            vectors.extend(self.embedder.embed(&texts).await?);
        }
        Ok(vectors)
    }
}

#[async_trait]
impl Subscriber for DocumentProcessor {
    async fn handle(&self, message: &BusMessage) -> Result<(), PipelineError> {
        let BusMessage::Change(event) = message else {
            return Ok(());
        };
        if let Err(err) = self.handle_change(event).await {
            warn!(source_id = %event.source_id, %err, "processing failed");
            self.bus.publish(
                TOPIC_FAILED,
                BusMessage::Failed {
                    source_id: event.source_id.clone(),
                    error: err.to_string(),
                    retryable: err.is_retryable(),
                },
            );
        }
        Ok(())
    }
}
