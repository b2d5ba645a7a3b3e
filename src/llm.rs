//! Language model client.
//!
//! One operation: turn a prompt into generated text. The OpenAI chat
//! completions implementation sends a fixed system message plus the
//! assembled prompt. Retry policy lives in the query agent (a single
//! automatic retry), not here.

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;

use crate::config::LlmConfig;
use crate::errors::PipelineError;

const OPENAI_API: &str = "https://api.openai.com/v1";

const SYSTEM_PROMPT: &str = "You are a helpful assistant answering questions from retrieved \
document excerpts. Use only the provided context; when the context does not contain the \
answer, say so rather than guessing.";

#[async_trait]
pub trait LanguageModel: Send + Sync {
    async fn generate(&self, prompt: &str) -> Result<String, PipelineError>;
}

pub struct OpenAiChat {
    http: reqwest::Client,
    api_key: String,
    model: String,
    base_url: String,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Debug, Deserialize)]
struct ChatMessage {
    content: String,
}

impl OpenAiChat {
    pub fn new(config: &LlmConfig) -> Result<Self, PipelineError> {
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
            base_url: config
                .base_url
                .clone()
                .unwrap_or_else(|| OPENAI_API.to_string()),
        })
    }
}

#[async_trait]
impl LanguageModel for OpenAiChat {
    async fn generate(&self, prompt: &str) -> Result<String, PipelineError> {
        let body = serde_json::json!({
            "model": self.model,
            "messages": [
                {"role": "system", "content": SYSTEM_PROMPT},
                {"role": "user", "content": prompt}
            ],
            "temperature": 0.7,
        });

        let response = self
            .http
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(PipelineError::from_status(status, "chat completion"));
        }

        let parsed: ChatResponse = response
            .json()
            .await
            .map_err(|e| PipelineError::Transient(format!("chat decode: {e}")))?;

        parsed
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .ok_or_else(|| PipelineError::Permanent("chat completion: empty choices".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::prelude::*;

    fn chat(server: &MockServer) -> OpenAiChat {
        OpenAiChat {
            http: reqwest::Client::new(),
            api_key: "test-key".to_string(),
            model: "gpt-4".to_string(),
            base_url: server.base_url(),
        }
    }

    #[tokio::test]
    async fn returns_first_choice_content() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(POST).path("/chat/completions");
            then.status(200).json_body(serde_json::json!({
                "choices": [{"message": {"content": "Q4 sales were strong."}}]
            }));
        });

        let answer = chat(&server).generate("what were Q4 sales?").await.unwrap();
        assert_eq!(answer, "Q4 sales were strong.");
    }

    #[tokio::test]
    async fn rate_limit_is_transient() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(POST).path("/chat/completions");
            then.status(429);
        });

        let err = chat(&server).generate("q").await.unwrap_err();
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn empty_choices_is_permanent() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(POST).path("/chat/completions");
            then.status(200).json_body(serde_json::json!({"choices": []}));
        });

        let err = chat(&server).generate("q").await.unwrap_err();
        assert!(matches!(err, PipelineError::Permanent(_)));
    }
}
