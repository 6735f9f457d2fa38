//! Similarity retrieval over the embedding index.
//!
//! # Algorithm
//!
//! 1. Embed the query with the configured [`Embedder`] (one call).
//! 2. Load every chunk vector written by the same embedding model with the
//!    same dimensionality, in insertion order (one query). Rows left over
//!    from another model stay invisible until the indexer replaces them.
//! 3. Score each chunk by cosine distance to the query.
//! 4. If a threshold is given, keep chunks with `distance < threshold`.
//! 5. Stable sort ascending by distance, so ties keep insertion order.
//! 6. Truncate to `limit`.

use sqlx::{Row, SqlitePool};

use crate::embedding::{self, Embedder};
use crate::error::{RagError, RagResult};
use crate::models::{EmbeddingChunk, RetrievedChunk};

/// Parameters for one retrieval call.
#[derive(Debug, Clone, Copy)]
pub struct RetrieveParams {
    /// Maximum number of chunks returned; must be at least 1.
    pub limit: usize,
    /// Optional cosine-distance cut-off in `[0, 1]`. Off by default.
    pub similarity_threshold: Option<f32>,
}

impl RetrieveParams {
    pub fn new(limit: usize) -> Self {
        Self {
            limit,
            similarity_threshold: None,
        }
    }

    pub fn with_threshold(mut self, threshold: f32) -> Self {
        self.similarity_threshold = Some(threshold);
        self
    }

    fn validate(&self) -> RagResult<()> {
        if self.limit == 0 {
            return Err(RagError::InvalidInput("limit must be >= 1".into()));
        }
        if let Some(t) = self.similarity_threshold {
            if !(0.0..=1.0).contains(&t) {
                return Err(RagError::InvalidInput(format!(
                    "similarity_threshold must be in [0, 1], got {}",
                    t
                )));
            }
        }
        Ok(())
    }
}

/// Return the chunks closest to `query`, nearest first.
///
/// An empty index, or a threshold nothing passes, yields an empty vector.
pub async fn retrieve(
    pool: &SqlitePool,
    embedder: &dyn Embedder,
    query: &str,
    params: RetrieveParams,
) -> RagResult<Vec<RetrievedChunk>> {
    params.validate()?;

    let query_vec = embedding::embed_query(embedder, query).await?;
    let candidates = load_chunks(pool, embedder).await?;

    tracing::debug!(
        candidates = candidates.len(),
        limit = params.limit,
        threshold = ?params.similarity_threshold,
        "ranking chunks"
    );

    Ok(rank_chunks(&query_vec, candidates, params))
}

async fn load_chunks(pool: &SqlitePool, embedder: &dyn Embedder) -> RagResult<Vec<EmbeddingChunk>> {
    let rows = sqlx::query(
        r#"
        SELECT id, page_id, chunk_seq, chunk, embedding
        FROM pages_embeddings
        WHERE model = ? AND dims = ?
        ORDER BY id ASC
        "#,
    )
    .bind(embedder.model_name())
    .bind(embedder.dims() as i64)
    .fetch_all(pool)
    .await?;

    rows.iter()
        .map(|row| -> RagResult<EmbeddingChunk> {
            let blob: Vec<u8> = row.try_get("embedding")?;
            Ok(EmbeddingChunk {
                id: row.try_get("id")?,
                page_id: row.try_get("page_id")?,
                chunk_seq: row.try_get("chunk_seq")?,
                chunk: row.try_get("chunk")?,
                embedding: embedding::blob_to_vec(&blob),
            })
        })
        .collect()
}

/// Score, filter, sort and truncate `candidates` (given in insertion order).
pub fn rank_chunks(
    query_vec: &[f32],
    candidates: Vec<EmbeddingChunk>,
    params: RetrieveParams,
) -> Vec<RetrievedChunk> {
    let mut scored: Vec<RetrievedChunk> = candidates
        .into_iter()
        .map(|chunk| {
            let distance = embedding::cosine_distance(query_vec, &chunk.embedding);
            RetrievedChunk { chunk, distance }
        })
        .filter(|rc| match params.similarity_threshold {
            Some(t) => rc.distance < t,
            None => true,
        })
        .collect();

    // sort_by is stable: equal distances keep insertion order
    scored.sort_by(|a, b| a.distance.total_cmp(&b.distance));
    scored.truncate(params.limit);
    scored
}
