use anyhow::Result;
use sqlx::SqlitePool;

/// Create all tables and indexes. Idempotent.
pub async fn run_migrations(pool: &SqlitePool) -> Result<()> {
    // Create users table
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS users (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            uuid TEXT NOT NULL UNIQUE,
            name TEXT NOT NULL,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Create pages table
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS pages (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            uuid TEXT NOT NULL UNIQUE,
            title TEXT NOT NULL,
            content TEXT NOT NULL,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Derived chunk + vector table, maintained by the indexer only
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS pages_embeddings (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            page_id INTEGER NOT NULL,
            chunk_seq INTEGER NOT NULL,
            chunk TEXT NOT NULL,
            embedding BLOB NOT NULL,
            model TEXT NOT NULL,
            dims INTEGER NOT NULL,
            content_hash TEXT NOT NULL,
            created_at TEXT NOT NULL,
            UNIQUE(page_id, chunk_seq),
            FOREIGN KEY (page_id) REFERENCES pages(id) ON DELETE CASCADE
        )
        "#,
    )
    .execute(pool)
    .await?;

    // One row per indexed page, written even when the page yields no chunks
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS pages_index_state (
            page_id INTEGER PRIMARY KEY,
            content_hash TEXT NOT NULL,
            model TEXT NOT NULL,
            dims INTEGER NOT NULL,
            chunks INTEGER NOT NULL,
            indexed_at TEXT NOT NULL,
            FOREIGN KEY (page_id) REFERENCES pages(id) ON DELETE CASCADE
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Create indexes
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_pages_embeddings_page_id ON pages_embeddings(page_id)")
        .execute(pool)
        .await?;

    tracing::debug!("migrations applied");
    Ok(())
}
