//! Ollama embedding backend.
//!
//! Calls `POST {host}/api/embed` with `{"model", "input": [...]}` and reads
//! the `embeddings` array from the reply. Requires Ollama to be running with
//! the embedding model pulled (e.g. `ollama pull nomic-embed-text`).

use async_trait::async_trait;
use std::time::Duration;

use super::Embedder;
use crate::config::OllamaConfig;
use crate::error::{RagError, RagResult};

pub struct OllamaEmbedder {
    model: String,
    dims: usize,
    url: String,
    client: reqwest::Client,
}

impl OllamaEmbedder {
    pub fn new(config: &OllamaConfig) -> RagResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| RagError::EmbeddingBackend(format!("failed to build client: {}", e)))?;

        Ok(Self {
            model: config.embedding_model.clone(),
            dims: config.embedding_dims,
            url: config.host.clone(),
            client,
        })
    }
}

#[async_trait]
impl Embedder for OllamaEmbedder {
    fn model_name(&self) -> &str {
        &self.model
    }

    fn dims(&self) -> usize {
        self.dims
    }

    async fn embed(&self, texts: &[String]) -> RagResult<Vec<Vec<f32>>> {
        let body = serde_json::json!({
            "model": self.model,
            "input": texts,
        });

        tracing::debug!(model = %self.model, count = texts.len(), "requesting embeddings");

        let response = self
            .client
            .post(format!("{}/api/embed", self.url))
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                RagError::EmbeddingBackend(format!(
                    "Ollama connection error (is Ollama running at {}?): {}",
                    self.url, e
                ))
            })?;

        let status = response.status();
        if !status.is_success() {
            let body_text = response.text().await.unwrap_or_default();
            return Err(RagError::EmbeddingBackend(format!(
                "Ollama API error {}: {}",
                status, body_text
            )));
        }

        let json: serde_json::Value = response.json().await.map_err(|e| {
            RagError::EmbeddingBackend(format!("Invalid Ollama response body: {}", e))
        })?;

        parse_ollama_response(&json)
    }
}

fn parse_ollama_response(json: &serde_json::Value) -> RagResult<Vec<Vec<f32>>> {
    let embeddings = json
        .get("embeddings")
        .and_then(|e| e.as_array())
        .ok_or_else(|| {
            RagError::EmbeddingBackend("Invalid Ollama response: missing embeddings array".into())
        })?;

    let mut result = Vec::with_capacity(embeddings.len());

    for embedding in embeddings {
        let vec = embedding
            .as_array()
            .ok_or_else(|| {
                RagError::EmbeddingBackend(
                    "Invalid Ollama response: embedding is not an array".into(),
                )
            })?
            .iter()
            .map(|v| {
                v.as_f64().map(|f| f as f32).ok_or_else(|| {
                    RagError::EmbeddingBackend(
                        "Invalid Ollama response: non-numeric embedding value".into(),
                    )
                })
            })
            .collect::<RagResult<Vec<f32>>>()?;
        result.push(vec);
    }

    Ok(result)
}
