//! Error taxonomy for the retrieval pipeline and content store.
//!
//! Lower layers return [`RagError`]; the HTTP boundary in [`crate::server`]
//! classifies each variant into a status code. Process setup (config,
//! migrations, CLI) uses `anyhow` instead.

use thiserror::Error;

/// Unified error type for store, retrieval, prompt and generation code.
#[derive(Error, Debug)]
pub enum RagError {
    /// Malformed identifier or failed payload validation (client error).
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// No row matches the requested identifier.
    #[error("{0}")]
    NotFound(String),

    /// Embedding backend unreachable or returned malformed output.
    #[error("embedding backend error: {0}")]
    EmbeddingBackend(String),

    /// Generation backend unreachable or returned malformed output.
    #[error("generation backend error: {0}")]
    GenerationBackend(String),

    /// The named prompt template is not registered.
    #[error("template not found: {0}")]
    TemplateNotFound(String),

    /// The template exists but failed to render.
    #[error("template render error: {0}")]
    TemplateRender(String),

    /// Underlying database failure.
    #[error("storage error: {0}")]
    Storage(#[from] sqlx::Error),
}

impl RagError {
    /// True for errors caused by the caller rather than the service.
    pub fn is_client_error(&self) -> bool {
        matches!(self, RagError::InvalidInput(_) | RagError::NotFound(_))
    }
}

/// Convenience alias used across the pipeline modules.
pub type RagResult<T> = Result<T, RagError>;
