//! Content store: create/list/lookup for users and pages.
//!
//! Lookups by external identifier return a [`Lookup`] instead of raising:
//! the identifier is parsed as a UUID before any query runs, so a malformed
//! id ([`Lookup::InvalidId`]) is told apart from a missing row
//! ([`Lookup::NotFound`]) without inspecting driver errors. Storage failures
//! surface as `Err(RagError::Storage)`.

use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

use crate::error::{RagError, RagResult};
use crate::models::{NewPage, NewUser, Page, User};

/// Outcome of a lookup by external identifier.
#[derive(Debug, Clone, PartialEq)]
pub enum Lookup<T> {
    Found(T),
    NotFound,
    /// The identifier is not a well-formed UUID.
    InvalidId(String),
}

impl<T> Lookup<T> {
    /// Collapse into a `Result`, naming the resource in error messages.
    pub fn into_result(self, kind: &str, id: &str) -> RagResult<T> {
        match self {
            Lookup::Found(v) => Ok(v),
            Lookup::NotFound => Err(RagError::NotFound(format!(
                "{} with id '{}' not found",
                kind, id
            ))),
            Lookup::InvalidId(reason) => Err(RagError::InvalidInput(format!(
                "Invalid UUID provided: {}",
                reason
            ))),
        }
    }
}

fn parse_external_id(id: &str) -> Result<Uuid, String> {
    Uuid::parse_str(id.trim()).map_err(|e| e.to_string())
}

fn decode_uuid(row: &SqliteRow) -> RagResult<Uuid> {
    let raw: String = row.try_get("uuid")?;
    Uuid::parse_str(&raw).map_err(|e| RagError::Storage(sqlx::Error::Decode(Box::new(e))))
}

fn user_from_row(row: &SqliteRow) -> RagResult<User> {
    Ok(User {
        id: row.try_get("id")?,
        uuid: decode_uuid(row)?,
        name: row.try_get("name")?,
        created_at: row.try_get::<DateTime<Utc>, _>("created_at")?,
        updated_at: row.try_get::<DateTime<Utc>, _>("updated_at")?,
    })
}

fn page_from_row(row: &SqliteRow) -> RagResult<Page> {
    Ok(Page {
        id: row.try_get("id")?,
        uuid: decode_uuid(row)?,
        title: row.try_get("title")?,
        content: row.try_get("content")?,
        created_at: row.try_get::<DateTime<Utc>, _>("created_at")?,
        updated_at: row.try_get::<DateTime<Utc>, _>("updated_at")?,
    })
}

// ============ Users ============

pub async fn create_user(pool: &SqlitePool, payload: &NewUser) -> RagResult<User> {
    payload.validate().map_err(RagError::InvalidInput)?;

    let uuid = Uuid::new_v4();
    let now = Utc::now();

    let mut tx = pool.begin().await?;
    let id: i64 = sqlx::query_scalar(
        "INSERT INTO users (uuid, name, created_at, updated_at) VALUES (?, ?, ?, ?) RETURNING id",
    )
    .bind(uuid.to_string())
    .bind(payload.name.trim())
    .bind(now)
    .bind(now)
    .fetch_one(&mut *tx)
    .await?;
    tx.commit().await?;

    tracing::debug!(user_id = id, %uuid, "user created");

    Ok(User {
        id,
        uuid,
        name: payload.name.trim().to_string(),
        created_at: now,
        updated_at: now,
    })
}

pub async fn list_users(pool: &SqlitePool) -> RagResult<Vec<User>> {
    let rows = sqlx::query("SELECT id, uuid, name, created_at, updated_at FROM users ORDER BY id ASC")
        .fetch_all(pool)
        .await?;
    rows.iter().map(user_from_row).collect()
}

pub async fn get_user(pool: &SqlitePool, external_id: &str) -> RagResult<Lookup<User>> {
    let uuid = match parse_external_id(external_id) {
        Ok(u) => u,
        Err(reason) => return Ok(Lookup::InvalidId(reason)),
    };

    let row = sqlx::query("SELECT id, uuid, name, created_at, updated_at FROM users WHERE uuid = ?")
        .bind(uuid.to_string())
        .fetch_optional(pool)
        .await?;

    match row {
        Some(row) => Ok(Lookup::Found(user_from_row(&row)?)),
        None => Ok(Lookup::NotFound),
    }
}

// ============ Pages ============

pub async fn create_page(pool: &SqlitePool, payload: &NewPage) -> RagResult<Page> {
    payload.validate().map_err(RagError::InvalidInput)?;

    let uuid = Uuid::new_v4();
    let now = Utc::now();

    let mut tx = pool.begin().await?;
    let id: i64 = sqlx::query_scalar(
        "INSERT INTO pages (uuid, title, content, created_at, updated_at) VALUES (?, ?, ?, ?, ?) RETURNING id",
    )
    .bind(uuid.to_string())
    .bind(&payload.title)
    .bind(&payload.content)
    .bind(now)
    .bind(now)
    .fetch_one(&mut *tx)
    .await?;
    tx.commit().await?;

    tracing::debug!(page_id = id, %uuid, "page created");

    Ok(Page {
        id,
        uuid,
        title: payload.title.clone(),
        content: payload.content.clone(),
        created_at: now,
        updated_at: now,
    })
}

pub async fn list_pages(pool: &SqlitePool) -> RagResult<Vec<Page>> {
    let rows = sqlx::query(
        "SELECT id, uuid, title, content, created_at, updated_at FROM pages ORDER BY id ASC",
    )
    .fetch_all(pool)
    .await?;
    rows.iter().map(page_from_row).collect()
}

pub async fn get_page(pool: &SqlitePool, external_id: &str) -> RagResult<Lookup<Page>> {
    let uuid = match parse_external_id(external_id) {
        Ok(u) => u,
        Err(reason) => return Ok(Lookup::InvalidId(reason)),
    };

    let row = sqlx::query(
        "SELECT id, uuid, title, content, created_at, updated_at FROM pages WHERE uuid = ?",
    )
    .bind(uuid.to_string())
    .fetch_optional(pool)
    .await?;

    match row {
        Some(row) => Ok(Lookup::Found(page_from_row(&row)?)),
        None => Ok(Lookup::NotFound),
    }
}

/// Fetch a page by its internal id (used by the indexer).
pub async fn get_page_by_id(pool: &SqlitePool, id: i64) -> RagResult<Option<Page>> {
    let row = sqlx::query(
        "SELECT id, uuid, title, content, created_at, updated_at FROM pages WHERE id = ?",
    )
    .bind(id)
    .fetch_optional(pool)
    .await?;

    row.as_ref().map(page_from_row).transpose()
}
