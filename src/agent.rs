//! Query agent: question in, grounded answer out.
//!
//! Embeds the question, retrieves the top-k chunks for the query's context
//! type, and forwards a context-stuffed prompt to the language model. An
//! empty retrieval short-circuits into a "no relevant context" answer with
//! no model call. A transient model failure gets exactly one automatic
//! retry; everything else surfaces to the caller as a typed error, never a
//! fabricated answer.

use std::sync::Arc;

use tracing::{debug, info};

use crate::embedding::EmbeddingClient;
use crate::errors::PipelineError;
use crate::llm::LanguageModel;
use crate::models::{Answer, Query, ScoredChunk};
use crate::store::VectorStore;

pub struct QueryAgent {
    store: Arc<dyn VectorStore>,
    embedder: Arc<dyn EmbeddingClient>,
    llm: Arc<dyn LanguageModel>,
    top_k: usize,
    max_context_chars: usize,
}

impl QueryAgent {
    pub fn new(
        store: Arc<dyn VectorStore>,
        embedder: Arc<dyn EmbeddingClient>,
        llm: Arc<dyn LanguageModel>,
        top_k: usize,
        max_context_chars: usize,
    ) -> Self {
        Self {
            store,
            embedder,
            llm,
            top_k,
            max_context_chars,
        }
    }

    pub async fn answer(&self, query: &Query) -> Result<Answer, PipelineError> {
        let vector = self
            .embedder
            .embed(std::slice::from_ref(&query.text))
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| PipelineError::Permanent("empty embedding response".to_string()))?;

        let hits = self
            .store
            .query(&vector, &query.context_type, self.top_k)
            .await?;
        if hits.is_empty() {
            debug!(context_type = %query.context_type, "no retrieval hits");
            return Ok(Answer::no_context(&query.context_type));
        }

        let (prompt, used_ids) = self.build_prompt(&query.text, &hits);
        info!(
            hits = hits.len(),
            used = used_ids.len(),
            context_type = %query.context_type,
            "forwarding prompt to language model"
        );

        let text = match self.llm.generate(&prompt).await {
            Ok(text) => text,
            Err(err) if err.is_retryable() => {
                debug!(%err, "model call failed; retrying once");
                self.llm.generate(&prompt).await?
            }
            Err(err) => return Err(err),
        };

        Ok(Answer {
            text,
            supporting_chunk_ids: used_ids,
        })
    }

    /// Concatenate retrieved chunks, best first, until the context budget
    /// is spent. The first chunk is always included, truncated if it alone
    /// exceeds the budget. Returns the prompt and the ids actually used,
    /// in rank order.
    fn build_prompt(&self, question: &str, hits: &[ScoredChunk]) -> (String, Vec<String>) {
        let mut context = String::new();
        let mut used_ids = Vec::new();

        for hit in hits {
            if context.is_empty() {
                let mut text = hit.text.as_str();
                if text.len() > self.max_context_chars {
                    let mut end = self.max_context_chars;
                    while end > 0 && !text.is_char_boundary(end) {
                        end -= 1;
                    }
                    text = &text[..end];
                }
                context.push_str(text);
                used_ids.push(hit.chunk_id.clone());
                continue;
            }
            if context.len() + 2 + hit.text.len() > self.max_context_chars {
                break;
            }
            context.push_str("\n\n");
            context.push_str(&hit.text);
            used_ids.push(hit.chunk_id.clone());
        }

        let prompt = format!("Context:\n{context}\n\nQuestion: {question}");
        (prompt, used_ids)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store_memory::MemoryStore;
    use async_trait::async_trait;
    use std::collections::BTreeMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    struct UnitEmbedder;

    #[async_trait]
    impl EmbeddingClient for UnitEmbedder {
        async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, PipelineError> {
            Ok(texts.iter().map(|_| vec![1.0, 0.0]).collect())
        }
        fn dims(&self) -> usize {
            2
        }
    }

    /// Scripted model: fails `failures` times, then echoes the prompt.
    struct ScriptedModel {
        calls: AtomicUsize,
        failures: usize,
        error: fn(String) -> PipelineError,
        prompts: Mutex<Vec<String>>,
    }

    impl ScriptedModel {
        fn succeeding() -> Self {
            Self::with_failures(0, PipelineError::Transient)
        }
        fn with_failures(failures: usize, error: fn(String) -> PipelineError) -> Self {
            Self {
                calls: AtomicUsize::new(0),
                failures,
                error,
                prompts: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl LanguageModel for ScriptedModel {
        async fn generate(&self, prompt: &str) -> Result<String, PipelineError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if call < self.failures {
                return Err((self.error)("model down".to_string()));
            }
            self.prompts.lock().unwrap().push(prompt.to_string());
            Ok("generated answer".to_string())
        }
    }

    async fn store_with_chunks(texts: &[&str], context_type: &str) -> Arc<MemoryStore> {
        let store = Arc::new(MemoryStore::new());
        let chunks: Vec<crate::models::Chunk> = texts
            .iter()
            .enumerate()
            .map(|(i, t)| crate::models::Chunk {
                id: format!("c{i}"),
                source_id: "s1".to_string(),
                chunk_index: i as i64,
                text: t.to_string(),
                hash: format!("h{i}"),
                metadata: BTreeMap::new(),
            })
            .collect();
        let vectors: Vec<Vec<f32>> = (0..texts.len())
            .map(|i| vec![1.0, i as f32 * 0.1])
            .collect();
        store
            .replace_source(
                &crate::models::SourceRecord {
                    source_id: "s1".to_string(),
                    name: "s1.csv".to_string(),
                    content_hash: "h".to_string(),
                    context_type: context_type.to_string(),
                    modified: chrono::Utc::now(),
                },
                &chunks,
                &vectors,
            )
            .await
            .unwrap();
        store
    }

    fn agent(
        store: Arc<MemoryStore>,
        llm: Arc<ScriptedModel>,
        max_context_chars: usize,
    ) -> QueryAgent {
        QueryAgent::new(store, Arc::new(UnitEmbedder), llm, 5, max_context_chars)
    }

    fn query(text: &str, context_type: &str) -> Query {
        Query {
            text: text.to_string(),
            context_type: context_type.to_string(),
        }
    }

    #[tokio::test]
    async fn empty_retrieval_skips_the_model() {
        let store = store_with_chunks(&["docs only"], "docs").await;
        let llm = Arc::new(ScriptedModel::succeeding());
        let a = agent(store, Arc::clone(&llm), 1000);

        let answer = a.answer(&query("anything", "business")).await.unwrap();
        assert!(!answer.has_context());
        assert_eq!(llm.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn answer_cites_supporting_chunks_in_rank_order() {
        let store = store_with_chunks(&["q4 revenue was 120", "q4 units were 85"], "business").await;
        let llm = Arc::new(ScriptedModel::succeeding());
        let a = agent(store, Arc::clone(&llm), 1000);

        let answer = a
            .answer(&query("What were our Q4 sales?", "business"))
            .await
            .unwrap();
        assert_eq!(answer.text, "generated answer");
        assert_eq!(answer.supporting_chunk_ids, vec!["c0", "c1"]);

        let prompts = llm.prompts.lock().unwrap();
        assert!(prompts[0].contains("q4 revenue was 120"));
        assert!(prompts[0].contains("Question: What were our Q4 sales?"));
    }

    #[tokio::test]
    async fn context_budget_limits_cited_chunks() {
        let store = store_with_chunks(&["aaaaaaaaaa", "bbbbbbbbbb", "cccccccccc"], "docs").await;
        let llm = Arc::new(ScriptedModel::succeeding());
        let a = agent(store, Arc::clone(&llm), 25);

        let answer = a.answer(&query("q", "docs")).await.unwrap();
        // 10 + 2 + 10 = 22 fits; adding the third (34) does not.
        assert_eq!(answer.supporting_chunk_ids.len(), 2);
    }

    #[tokio::test]
    async fn transient_model_failure_retried_once() {
        let store = store_with_chunks(&["ctx"], "docs").await;
        let llm = Arc::new(ScriptedModel::with_failures(1, PipelineError::Transient));
        let a = agent(store, Arc::clone(&llm), 1000);

        let answer = a.answer(&query("q", "docs")).await.unwrap();
        assert_eq!(answer.text, "generated answer");
        assert_eq!(llm.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn two_transient_failures_surface_the_error() {
        let store = store_with_chunks(&["ctx"], "docs").await;
        let llm = Arc::new(ScriptedModel::with_failures(2, PipelineError::Transient));
        let a = agent(store, Arc::clone(&llm), 1000);

        let err = a.answer(&query("q", "docs")).await.unwrap_err();
        assert!(err.is_retryable());
        assert_eq!(llm.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn permanent_model_failure_not_retried() {
        let store = store_with_chunks(&["ctx"], "docs").await;
        let llm = Arc::new(ScriptedModel::with_failures(1, PipelineError::Permanent));
        let a = agent(store, Arc::clone(&llm), 1000);

        let err = a.answer(&query("q", "docs")).await.unwrap_err();
        assert!(matches!(err, PipelineError::Permanent(_)));
        assert_eq!(llm.calls.load(Ordering::SeqCst), 1);
    }
}
