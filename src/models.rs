//! Core data models.
//!
//! [`User`] and [`Page`] rows are owned by the content store. An
//! [`EmbeddingChunk`] is a derived projection of a page maintained by the
//! indexer; it is never a source of truth for page content.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A registered user.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct User {
    pub id: i64,
    pub uuid: Uuid,
    pub name: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A unit of ingested text.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Page {
    pub id: i64,
    pub uuid: Uuid,
    pub title: String,
    pub content: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Payload for `POST /users`.
#[derive(Debug, Clone, Deserialize)]
pub struct NewUser {
    pub name: String,
}

/// Payload for `POST /pages`.
#[derive(Debug, Clone, Deserialize)]
pub struct NewPage {
    pub title: String,
    pub content: String,
}

/// A chunk of a page's content plus its embedding vector.
#[derive(Debug, Clone)]
pub struct EmbeddingChunk {
    pub id: i64,
    /// Back-reference to [`Page::id`].
    pub page_id: i64,
    /// Position of the chunk within its page, starting at 0.
    pub chunk_seq: i64,
    pub chunk: String,
    pub embedding: Vec<f32>,
}

/// A chunk returned by the retriever with its cosine distance to the query.
#[derive(Debug, Clone)]
pub struct RetrievedChunk {
    pub chunk: EmbeddingChunk,
    /// `1 - cosine_similarity`, in `[0, 2]`; lower is closer.
    pub distance: f32,
}

/// Name length limit for users.
pub const MAX_USER_NAME_LEN: usize = 50;

impl NewUser {
    pub fn validate(&self) -> Result<(), String> {
        let name = self.name.trim();
        if name.is_empty() {
            return Err("name must not be empty".to_string());
        }
        if name.chars().count() > MAX_USER_NAME_LEN {
            return Err(format!(
                "name must be at most {} characters",
                MAX_USER_NAME_LEN
            ));
        }
        Ok(())
    }
}

impl NewPage {
    pub fn validate(&self) -> Result<(), String> {
        if self.title.trim().is_empty() {
            return Err("title must not be empty".to_string());
        }
        if self.content.trim().is_empty() {
            return Err("content must not be empty".to_string());
        }
        Ok(())
    }
}
