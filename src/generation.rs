//! Generation backend client.
//!
//! [`Generator`] is the black-box "messages in, text out" capability used by
//! the RAG pipeline. [`OllamaGenerator`] implements it against Ollama's
//! `POST /api/chat` with streaming disabled. Failures are returned as
//! [`RagError::GenerationBackend`] and never retried here.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::config::OllamaConfig;
use crate::error::{RagError, RagResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

/// One turn of a conversation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }
}

#[async_trait]
pub trait Generator: Send + Sync {
    /// Send `messages` to `model` and return the full reply text.
    async fn generate(&self, model: &str, messages: &[ChatMessage]) -> RagResult<String>;
}

/// Ollama `/api/chat` request body.
#[derive(Debug, Serialize)]
struct OllamaChatRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    stream: bool,
}

/// Ollama `/api/chat` reply (non-streaming).
#[derive(Debug, Deserialize)]
struct OllamaChatResponse {
    message: ChatMessage,
    #[serde(default)]
    done: bool,
}

pub struct OllamaGenerator {
    base_url: String,
    client: reqwest::Client,
}

impl OllamaGenerator {
    pub fn new(config: &OllamaConfig) -> RagResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| RagError::GenerationBackend(format!("failed to build client: {}", e)))?;

        Ok(Self {
            base_url: config.host.clone(),
            client,
        })
    }
}

#[async_trait]
impl Generator for OllamaGenerator {
    async fn generate(&self, model: &str, messages: &[ChatMessage]) -> RagResult<String> {
        if model.trim().is_empty() {
            return Err(RagError::GenerationBackend(
                "model identifier must not be empty".into(),
            ));
        }

        tracing::info!(model, messages = messages.len(), "sending chat request to Ollama");

        let request = OllamaChatRequest {
            model,
            messages,
            stream: false,
        };

        let response = self
            .client
            .post(format!("{}/api/chat", self.base_url))
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                RagError::GenerationBackend(format!("Failed to send request to Ollama: {}", e))
            })?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(RagError::GenerationBackend(format!(
                "Ollama API error ({}): {}",
                status, error_text
            )));
        }

        let text = response.text().await.map_err(|e| {
            RagError::GenerationBackend(format!("Failed to read Ollama response: {}", e))
        })?;

        let content = parse_chat_response(&text)?;
        tracing::info!("received completion from Ollama");
        Ok(content)
    }
}

fn parse_chat_response(body: &str) -> RagResult<String> {
    let reply: OllamaChatResponse = serde_json::from_str(body).map_err(|e| {
        RagError::GenerationBackend(format!("Failed to parse Ollama response: {}", e))
    })?;
    if !reply.done {
        tracing::warn!("Ollama reply not marked done");
    }
    Ok(reply.message.content)
}
