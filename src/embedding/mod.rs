//! Embedding backend abstraction and vector utilities.
//!
//! - [`Embedder`]: async trait implemented by embedding backends.
//! - [`OllamaEmbedder`]: calls an Ollama instance's `/api/embed` endpoint.
//!
//! Vector helpers used by the retriever and indexer:
//! - [`cosine_similarity`] / [`cosine_distance`]
//! - [`vec_to_blob`] / [`blob_to_vec`]: little-endian `f32` BLOB encoding
//!
//! A single call to [`Embedder::embed`] never retries. Callers that want
//! retry/backoff (the indexer) wrap it with [`embed_with_retry`].

mod ollama;

pub use ollama::OllamaEmbedder;

use async_trait::async_trait;
use std::time::Duration;

use crate::error::{RagError, RagResult};

/// An embedding backend: text in, fixed-dimension vectors out.
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Model identifier (e.g. `"nomic-embed-text"`).
    fn model_name(&self) -> &str;

    /// Dimensionality every returned vector must have.
    fn dims(&self) -> usize;

    /// Embed a batch of texts, returning one vector per input in order.
    ///
    /// Fails with [`RagError::EmbeddingBackend`] when the backend is
    /// unreachable or the reply is malformed.
    async fn embed(&self, texts: &[String]) -> RagResult<Vec<Vec<f32>>>;
}

/// Embed a single query text and check its dimensionality.
pub async fn embed_query(embedder: &dyn Embedder, text: &str) -> RagResult<Vec<f32>> {
    let mut vectors = embedder.embed(&[text.to_string()]).await?;
    if vectors.len() != 1 {
        return Err(RagError::EmbeddingBackend(format!(
            "expected 1 embedding, got {}",
            vectors.len()
        )));
    }
    let vector = vectors.remove(0);
    check_dims(embedder.dims(), &vector)?;
    Ok(vector)
}

/// Reject vectors whose length differs from the configured dimensionality.
pub fn check_dims(expected: usize, vector: &[f32]) -> RagResult<()> {
    if vector.len() != expected {
        return Err(RagError::EmbeddingBackend(format!(
            "embedding has {} dimensions, expected {}",
            vector.len(),
            expected
        )));
    }
    Ok(())
}

/// Embed a batch with exponential backoff: 1s, 2s, 4s, ... capped at 32s.
///
/// Every returned vector is checked against [`Embedder::dims`]; a dimension
/// mismatch is not retried.
pub async fn embed_with_retry(
    embedder: &dyn Embedder,
    texts: &[String],
    max_retries: u32,
) -> RagResult<Vec<Vec<f32>>> {
    let mut last_err = None;

    for attempt in 0..=max_retries {
        if attempt > 0 {
            let delay = Duration::from_secs(1 << (attempt - 1).min(5));
            tokio::time::sleep(delay).await;
        }

        match embedder.embed(texts).await {
            Ok(vectors) => {
                if vectors.len() != texts.len() {
                    return Err(RagError::EmbeddingBackend(format!(
                        "expected {} embeddings, got {}",
                        texts.len(),
                        vectors.len()
                    )));
                }
                for v in &vectors {
                    check_dims(embedder.dims(), v)?;
                }
                return Ok(vectors);
            }
            Err(e) => {
                tracing::warn!(attempt, error = %e, "embedding attempt failed");
                last_err = Some(e);
            }
        }
    }

    Err(last_err
        .unwrap_or_else(|| RagError::EmbeddingBackend("embedding failed after retries".into())))
}

/// Encode a float vector as a BLOB (little-endian f32 bytes).
pub fn vec_to_blob(vec: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(vec.len() * 4);
    for &v in vec {
        bytes.extend_from_slice(&v.to_le_bytes());
    }
    bytes
}

/// Decode a BLOB back into a float vector.
pub fn blob_to_vec(blob: &[u8]) -> Vec<f32> {
    blob.chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect()
}

/// Compute cosine similarity between two embedding vectors.
///
/// Returns a value in `[-1.0, 1.0]`, or `0.0` for empty vectors, vectors of
/// different lengths, or zero-norm vectors.
///
/// ```text
///            a · b
/// cos(θ) = ─────────
///          ‖a‖ × ‖b‖
/// ```
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;

    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom < f32::EPSILON {
        return 0.0;
    }

    (dot / denom).clamp(-1.0, 1.0)
}

/// Cosine distance, `1 - cosine_similarity`, in `[0.0, 2.0]`; 0 = identical.
pub fn cosine_distance(a: &[f32], b: &[f32]) -> f32 {
    1.0 - cosine_similarity(a, b)
}
