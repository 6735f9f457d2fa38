//! Embedding index maintenance.
//!
//! The `pages_embeddings` table is a derived projection of `pages`. It is
//! written only from here, never by request handlers:
//!
//! - [`Indexer::spawn`] starts a background worker; handlers call
//!   [`Indexer::enqueue`] after creating a page and return immediately.
//! - [`index_page`] chunks one page, embeds each chunk as
//!   `"{title} - {chunk}"` and replaces the page's rows in one transaction.
//! - [`pending_pages`] lists pages that were never indexed or are stale, so
//!   the server can catch up at startup and the CLI can backfill.
//!
//! Each indexed page has a `pages_index_state` row recording the content
//! hash, embedding model and dimensionality it was indexed with, written in
//! the same transaction as its chunks. A page is current only when all three
//! match; a page with no chunkable text still gets a state row.
//!
//! Embedding calls made here retry with exponential backoff; a page that
//! still fails is logged and stays pending.

use sqlx::{Row, SqlitePool};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::chunk;
use crate::config::{ChunkingConfig, Config};
use crate::embedding::{self, Embedder};
use crate::error::RagResult;
use crate::store;

/// Number of chunk texts sent per embedding request.
const EMBED_BATCH_SIZE: usize = 32;

/// Settings the indexer needs from [`Config`].
#[derive(Debug, Clone)]
pub struct IndexSettings {
    pub chunking: ChunkingConfig,
    pub max_retries: u32,
}

impl IndexSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            chunking: config.chunking.clone(),
            max_retries: config.ollama.max_retries,
        }
    }
}

/// What a page was last indexed from.
struct IndexState {
    content_hash: String,
    model: String,
    dims: i64,
}

impl IndexState {
    fn is_current(&self, content_hash: &str, embedder: &dyn Embedder) -> bool {
        self.content_hash == content_hash
            && self.model == embedder.model_name()
            && self.dims == embedder.dims() as i64
    }
}

/// Result of indexing a single page.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexOutcome {
    /// The page's chunk set was (re)written.
    Indexed { chunks: usize },
    /// Stored chunks already match the page content and embedder.
    UpToDate,
    /// No page with that id exists.
    PageMissing,
}

/// (Re)build the chunk set of one page.
pub async fn index_page(
    pool: &SqlitePool,
    embedder: &dyn Embedder,
    settings: &IndexSettings,
    page_id: i64,
) -> RagResult<IndexOutcome> {
    let Some(page) = store::get_page_by_id(pool, page_id).await? else {
        return Ok(IndexOutcome::PageMissing);
    };

    let hash = chunk::content_hash(&page.content);
    let state = sqlx::query(
        "SELECT content_hash, model, dims FROM pages_index_state WHERE page_id = ?",
    )
    .bind(page_id)
    .fetch_optional(pool)
    .await?;
    if let Some(row) = state {
        let stored = IndexState {
            content_hash: row.try_get("content_hash")?,
            model: row.try_get("model")?,
            dims: row.try_get("dims")?,
        };
        if stored.is_current(&hash, embedder) {
            return Ok(IndexOutcome::UpToDate);
        }
    }

    let chunks = chunk::chunk_text(&page.content, &settings.chunking);
    let texts: Vec<String> = chunks
        .iter()
        .map(|c| chunk::format_for_embedding(&page.title, c))
        .collect();

    let mut vectors = Vec::with_capacity(texts.len());
    for batch in texts.chunks(EMBED_BATCH_SIZE) {
        let embedded = embedding::embed_with_retry(embedder, batch, settings.max_retries).await?;
        vectors.extend(embedded);
    }

    let now = chrono::Utc::now();
    let mut tx = pool.begin().await?;

    sqlx::query("DELETE FROM pages_embeddings WHERE page_id = ?")
        .bind(page_id)
        .execute(&mut *tx)
        .await?;

    for (seq, (text, vector)) in chunks.iter().zip(vectors.iter()).enumerate() {
        sqlx::query(
            r#"
            INSERT INTO pages_embeddings
                (page_id, chunk_seq, chunk, embedding, model, dims, content_hash, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(page_id)
        .bind(seq as i64)
        .bind(text)
        .bind(embedding::vec_to_blob(vector))
        .bind(embedder.model_name())
        .bind(vector.len() as i64)
        .bind(&hash)
        .bind(now)
        .execute(&mut *tx)
        .await?;
    }

    sqlx::query(
        r#"
        INSERT INTO pages_index_state (page_id, content_hash, model, dims, chunks, indexed_at)
        VALUES (?, ?, ?, ?, ?, ?)
        ON CONFLICT(page_id) DO UPDATE SET
            content_hash = excluded.content_hash,
            model = excluded.model,
            dims = excluded.dims,
            chunks = excluded.chunks,
            indexed_at = excluded.indexed_at
        "#,
    )
    .bind(page_id)
    .bind(&hash)
    .bind(embedder.model_name())
    .bind(embedder.dims() as i64)
    .bind(chunks.len() as i64)
    .bind(now)
    .execute(&mut *tx)
    .await?;

    tx.commit().await?;

    if chunks.is_empty() {
        tracing::warn!(page_id, "page has no text to embed");
    } else {
        tracing::info!(page_id, chunks = chunks.len(), "page indexed");
    }
    Ok(IndexOutcome::Indexed {
        chunks: chunks.len(),
    })
}

/// Ids of pages never indexed, or indexed from older content or with a
/// different embedding model or dimensionality than `embedder`.
pub async fn pending_pages(pool: &SqlitePool, embedder: &dyn Embedder) -> RagResult<Vec<i64>> {
    let rows = sqlx::query(
        r#"
        SELECT p.id, p.content, s.content_hash, s.model, s.dims
        FROM pages p
        LEFT JOIN pages_index_state s ON s.page_id = p.id
        ORDER BY p.id ASC
        "#,
    )
    .fetch_all(pool)
    .await?;

    let mut pending = Vec::new();
    for row in &rows {
        let content: String = row.try_get("content")?;
        let stored: Option<String> = row.try_get("content_hash")?;
        let current = match stored {
            Some(content_hash) => IndexState {
                content_hash,
                model: row.try_get("model")?,
                dims: row.try_get("dims")?,
            }
            .is_current(&chunk::content_hash(&content), embedder),
            None => false,
        };
        if !current {
            pending.push(row.try_get("id")?);
        }
    }
    Ok(pending)
}

/// Delete every stored chunk and index state row. Returns the chunk count.
pub async fn clear_index(pool: &SqlitePool) -> RagResult<u64> {
    let mut tx = pool.begin().await?;
    let result = sqlx::query("DELETE FROM pages_embeddings")
        .execute(&mut *tx)
        .await?;
    sqlx::query("DELETE FROM pages_index_state")
        .execute(&mut *tx)
        .await?;
    tx.commit().await?;
    Ok(result.rows_affected())
}

/// Totals reported by [`index_pending`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IndexReport {
    /// Pages that now have at least one chunk.
    pub pages: usize,
    pub chunks: usize,
    /// Pages with no text to embed.
    pub empty: usize,
    pub failed: usize,
}

/// Index every pending page in sequence. Failures are counted, not fatal.
pub async fn index_pending(
    pool: &SqlitePool,
    embedder: &dyn Embedder,
    settings: &IndexSettings,
) -> RagResult<IndexReport> {
    let mut report = IndexReport::default();

    for page_id in pending_pages(pool, embedder).await? {
        match index_page(pool, embedder, settings, page_id).await {
            Ok(IndexOutcome::Indexed { chunks: 0 }) => report.empty += 1,
            Ok(IndexOutcome::Indexed { chunks }) => {
                report.pages += 1;
                report.chunks += chunks;
            }
            Ok(_) => {}
            Err(e) => {
                tracing::error!(page_id, error = %e, "failed to index page");
                report.failed += 1;
            }
        }
    }

    Ok(report)
}

/// Handle to the background indexing worker. Cheap to clone.
#[derive(Clone)]
pub struct Indexer {
    tx: mpsc::UnboundedSender<i64>,
}

impl Indexer {
    /// Start the worker. It runs until every handle is dropped.
    pub fn spawn(
        pool: SqlitePool,
        embedder: Arc<dyn Embedder>,
        settings: IndexSettings,
    ) -> (Self, JoinHandle<()>) {
        let (tx, mut rx) = mpsc::unbounded_channel::<i64>();

        let worker = tokio::spawn(async move {
            while let Some(page_id) = rx.recv().await {
                match index_page(&pool, embedder.as_ref(), &settings, page_id).await {
                    Ok(outcome) => tracing::debug!(page_id, ?outcome, "indexing finished"),
                    Err(e) => tracing::error!(page_id, error = %e, "failed to index page"),
                }
            }
            tracing::debug!("indexer stopped");
        });

        (Self { tx }, worker)
    }

    /// Queue a page for indexing. Never blocks.
    pub fn enqueue(&self, page_id: i64) {
        if self.tx.send(page_id).is_err() {
            tracing::warn!(page_id, "indexer is not running; page left pending");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DbConfig;
    use crate::models::NewPage;
    use crate::{db, migrate};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::TempDir;

    /// Embeds a text as `[char_count, 1.0, 1.0, ...]` with `dims` components.
    struct CountingEmbedder {
        model: &'static str,
        dims: usize,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl Embedder for CountingEmbedder {
        fn model_name(&self) -> &str {
            self.model
        }

        fn dims(&self) -> usize {
            self.dims
        }

        async fn embed(&self, texts: &[String]) -> RagResult<Vec<Vec<f32>>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(texts
                .iter()
                .map(|t| {
                    let mut v = vec![1.0; self.dims];
                    v[0] = t.chars().count() as f32;
                    v
                })
                .collect())
        }
    }

    fn embedder_with(model: &'static str, dims: usize) -> CountingEmbedder {
        CountingEmbedder {
            model,
            dims,
            calls: AtomicUsize::new(0),
        }
    }

    fn embedder() -> CountingEmbedder {
        embedder_with("counting", 2)
    }

    fn settings() -> IndexSettings {
        IndexSettings {
            chunking: ChunkingConfig {
                chunk_size: 40,
                chunk_overlap: 10,
                separator: ".".to_string(),
            },
            max_retries: 0,
        }
    }

    async fn setup() -> (TempDir, SqlitePool) {
        let tmp = TempDir::new().unwrap();
        let pool = db::connect(&DbConfig {
            path: tmp.path().join("test.sqlite"),
        })
        .await
        .unwrap();
        migrate::run_migrations(&pool).await.unwrap();
        (tmp, pool)
    }

    async fn add_page(pool: &SqlitePool, title: &str, content: &str) -> i64 {
        let page = store::create_page(
            pool,
            &NewPage {
                title: title.to_string(),
                content: content.to_string(),
            },
        )
        .await
        .unwrap();
        page.id
    }

    async fn stored_chunks(pool: &SqlitePool, page_id: i64) -> Vec<(i64, String)> {
        sqlx::query_as(
            "SELECT chunk_seq, chunk FROM pages_embeddings WHERE page_id = ? ORDER BY chunk_seq",
        )
        .bind(page_id)
        .fetch_all(pool)
        .await
        .unwrap()
    }

    #[tokio::test]
    async fn test_index_page_writes_sequenced_chunks() {
        let (_tmp, pool) = setup().await;
        let id = add_page(
            &pool,
            "Rust",
            "Rust is a systems language. It has no garbage collector. Ownership is checked at compile time.",
        )
        .await;

        let emb = embedder();
        let outcome = index_page(&pool, &emb, &settings(), id).await.unwrap();
        let IndexOutcome::Indexed { chunks } = outcome else {
            panic!("expected Indexed, got {:?}", outcome);
        };
        assert!(chunks > 1);

        let rows = stored_chunks(&pool, id).await;
        assert_eq!(rows.len(), chunks);
        for (i, (seq, text)) in rows.iter().enumerate() {
            assert_eq!(*seq, i as i64);
            assert!(!text.is_empty());
        }

        let dims: i64 = sqlx::query_scalar("SELECT dims FROM pages_embeddings LIMIT 1")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(dims, 2);
    }

    #[tokio::test]
    async fn test_embedding_text_is_prefixed_with_title() {
        let (_tmp, pool) = setup().await;
        let id = add_page(&pool, "Title", "Short body").await;

        index_page(&pool, &embedder(), &settings(), id).await.unwrap();

        let blob: Vec<u8> = sqlx::query_scalar("SELECT embedding FROM pages_embeddings")
            .fetch_one(&pool)
            .await
            .unwrap();
        let vector = embedding::blob_to_vec(&blob);
        // CountingEmbedder encodes the char count of "Title - Short body"
        assert_eq!(vector, vec!["Title - Short body".chars().count() as f32, 1.0]);

        let stored: Vec<(i64, String)> = stored_chunks(&pool, id).await;
        assert_eq!(stored[0].1, "Short body");
    }

    #[tokio::test]
    async fn test_unchanged_page_is_not_reembedded() {
        let (_tmp, pool) = setup().await;
        let id = add_page(&pool, "T", "Some content. More content.").await;
        let emb = embedder();

        index_page(&pool, &emb, &settings(), id).await.unwrap();
        let calls = emb.calls.load(Ordering::SeqCst);

        let outcome = index_page(&pool, &emb, &settings(), id).await.unwrap();
        assert_eq!(outcome, IndexOutcome::UpToDate);
        assert_eq!(emb.calls.load(Ordering::SeqCst), calls);
    }

    #[tokio::test]
    async fn test_stale_hash_replaces_chunk_set() {
        let (_tmp, pool) = setup().await;
        let id = add_page(&pool, "T", "Original text.").await;
        index_page(&pool, &embedder(), &settings(), id).await.unwrap();

        sqlx::query("UPDATE pages SET content = ? WHERE id = ?")
            .bind("Replacement text")
            .bind(id)
            .execute(&pool)
            .await
            .unwrap();
        assert_eq!(pending_pages(&pool, &embedder()).await.unwrap(), vec![id]);

        index_page(&pool, &embedder(), &settings(), id).await.unwrap();
        let rows = stored_chunks(&pool, id).await;
        assert_eq!(rows, vec![(0, "Replacement text".to_string())]);
        assert!(pending_pages(&pool, &embedder()).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_missing_page() {
        let (_tmp, pool) = setup().await;
        let outcome = index_page(&pool, &embedder(), &settings(), 42).await.unwrap();
        assert_eq!(outcome, IndexOutcome::PageMissing);
    }

    #[tokio::test]
    async fn test_index_pending_and_clear() {
        let (_tmp, pool) = setup().await;
        let a = add_page(&pool, "A", "First page.").await;
        let b = add_page(&pool, "B", "Second page.").await;
        assert_eq!(pending_pages(&pool, &embedder()).await.unwrap(), vec![a, b]);

        let report = index_pending(&pool, &embedder(), &settings()).await.unwrap();
        assert_eq!(report.pages, 2);
        assert_eq!(report.failed, 0);
        assert!(pending_pages(&pool, &embedder()).await.unwrap().is_empty());

        let removed = clear_index(&pool).await.unwrap();
        assert_eq!(removed as usize, report.chunks);
        assert_eq!(pending_pages(&pool, &embedder()).await.unwrap(), vec![a, b]);
    }

    #[tokio::test]
    async fn test_worker_indexes_enqueued_pages() {
        let (_tmp, pool) = setup().await;
        let id = add_page(&pool, "Queued", "Body text.").await;

        let (indexer, worker) =
            Indexer::spawn(pool.clone(), Arc::new(embedder()), settings());
        indexer.enqueue(id);
        drop(indexer);
        worker.await.unwrap();

        assert!(!stored_chunks(&pool, id).await.is_empty());
    }

    #[tokio::test]
    async fn test_model_change_marks_pages_pending() {
        let (_tmp, pool) = setup().await;
        let id = add_page(&pool, "T", "Some content.").await;
        index_page(&pool, &embedder(), &settings(), id).await.unwrap();
        assert!(pending_pages(&pool, &embedder()).await.unwrap().is_empty());

        let renamed = embedder_with("other-model", 2);
        assert_eq!(pending_pages(&pool, &renamed).await.unwrap(), vec![id]);

        let resized = embedder_with("counting", 3);
        assert_eq!(pending_pages(&pool, &resized).await.unwrap(), vec![id]);
    }

    #[tokio::test]
    async fn test_model_change_reembeds_page() {
        let (_tmp, pool) = setup().await;
        let id = add_page(&pool, "T", "Some content.").await;
        index_page(&pool, &embedder(), &settings(), id).await.unwrap();

        let resized = embedder_with("new-model", 3);
        let outcome = index_page(&pool, &resized, &settings(), id).await.unwrap();
        assert_eq!(outcome, IndexOutcome::Indexed { chunks: 1 });
        assert_eq!(resized.calls.load(Ordering::SeqCst), 1);

        let (model, dims): (String, i64) =
            sqlx::query_as("SELECT model, dims FROM pages_embeddings WHERE page_id = ?")
                .bind(id)
                .fetch_one(&pool)
                .await
                .unwrap();
        assert_eq!(model, "new-model");
        assert_eq!(dims, 3);
        assert!(pending_pages(&pool, &resized).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_page_without_text_is_indexed_once() {
        let (_tmp, pool) = setup().await;
        let id = add_page(&pool, "Dots", "...").await;
        let emb = embedder();

        let first = index_pending(&pool, &emb, &settings()).await.unwrap();
        assert_eq!(
            first,
            IndexReport {
                pages: 0,
                chunks: 0,
                empty: 1,
                failed: 0
            }
        );
        assert!(stored_chunks(&pool, id).await.is_empty());
        assert!(pending_pages(&pool, &emb).await.unwrap().is_empty());

        let second = index_pending(&pool, &emb, &settings()).await.unwrap();
        assert_eq!(second, IndexReport::default());
        assert_eq!(emb.calls.load(Ordering::SeqCst), 0);
    }
}
