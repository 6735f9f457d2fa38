//! Retrieval-augmented answering.
//!
//! [`RagPipeline::answer`] runs one question through the full pipeline:
//!
//! 1. [`retrieve`] the nearest chunks for the question.
//! 2. Newline-join their texts into `retrieved_text`.
//! 3. Render the grounding template with `{question, retrieved_text}`.
//! 4. Send the rendered prompt as a single user message to the generator.
//!
//! Every step is fallible and the first failure aborts the request; in
//! particular, a missing template means the generator is never called.
//! An empty index is not an error: the template is rendered with empty
//! `retrieved_text`.

use serde::Serialize;
use sqlx::SqlitePool;
use std::sync::Arc;

use crate::config::Config;
use crate::embedding::Embedder;
use crate::error::{RagError, RagResult};
use crate::generation::{ChatMessage, Generator};
use crate::models::RetrievedChunk;
use crate::prompt::{self, PromptRenderer};
use crate::retrieve::{self, RetrieveParams};

#[derive(Debug, Serialize)]
struct GroundingContext<'a> {
    question: &'a str,
    retrieved_text: &'a str,
}

/// Everything needed to answer a question. Shared across requests.
#[derive(Clone)]
pub struct RagPipeline {
    pool: SqlitePool,
    embedder: Arc<dyn Embedder>,
    generator: Arc<dyn Generator>,
    prompts: Arc<PromptRenderer>,
    generation_model: String,
    grounding_template: String,
    params: RetrieveParams,
}

impl RagPipeline {
    pub fn new(
        pool: SqlitePool,
        embedder: Arc<dyn Embedder>,
        generator: Arc<dyn Generator>,
        prompts: Arc<PromptRenderer>,
        config: &Config,
    ) -> Self {
        let mut params = RetrieveParams::new(config.retrieval.limit);
        params.similarity_threshold = config.retrieval.similarity_threshold;

        Self {
            pool,
            embedder,
            generator,
            prompts,
            generation_model: config.ollama.generation_model.clone(),
            grounding_template: config.prompts.grounding_template.clone(),
            params,
        }
    }

    /// Nearest chunks for `query` using the configured limit and threshold.
    pub async fn search(&self, query: &str) -> RagResult<Vec<RetrievedChunk>> {
        self.search_with(query, self.params).await
    }

    pub async fn search_with(
        &self,
        query: &str,
        params: RetrieveParams,
    ) -> RagResult<Vec<RetrievedChunk>> {
        retrieve::retrieve(&self.pool, self.embedder.as_ref(), query, params).await
    }

    /// Answer `question` grounded on the retrieved chunks.
    pub async fn answer(&self, question: &str) -> RagResult<String> {
        if question.trim().is_empty() {
            return Err(RagError::InvalidInput("question must not be empty".into()));
        }

        let chunks = self.search(question).await?;
        let retrieved_text = prompt::join_chunks(chunks.iter().map(|c| c.chunk.chunk.as_str()));

        tracing::debug!(
            chunks = chunks.len(),
            template = %self.grounding_template,
            "rendering grounding prompt"
        );

        let rendered = self.prompts.render(
            &self.grounding_template,
            &GroundingContext {
                question,
                retrieved_text: &retrieved_text,
            },
        )?;

        self.generator
            .generate(&self.generation_model, &[ChatMessage::user(rendered)])
            .await
    }
}
