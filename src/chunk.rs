//! Separator-based text chunker with overlap.
//!
//! Page content is split on a separator (`"."` by default), then the pieces
//! are greedily merged back into chunks of at most `chunk_size` characters,
//! re-joined with the separator. When a chunk is flushed, leading pieces are
//! dropped until at most `chunk_overlap` characters remain, so consecutive
//! chunks share context. A single piece longer than `chunk_size` becomes its
//! own oversized chunk.
//!
//! Lengths are counted in characters, not bytes. The output depends only on
//! the input text and the [`ChunkingConfig`], so re-indexing the same content
//! yields the same chunk set.

use sha2::{Digest, Sha256};

use crate::config::ChunkingConfig;

/// Split `text` into chunks per `config`. Empty or whitespace-only text
/// yields no chunks.
pub fn chunk_text(text: &str, config: &ChunkingConfig) -> Vec<String> {
    let separator = config.separator.as_str();
    let sep_len = separator.chars().count();

    let splits: Vec<&str> = text.split(separator).filter(|s| !s.is_empty()).collect();

    let mut chunks = Vec::new();
    let mut current: Vec<&str> = Vec::new();
    let mut total: usize = 0;

    for piece in splits {
        let len = piece.chars().count();
        let joined_len = |total: usize, current: &[&str]| {
            total + len + if current.is_empty() { 0 } else { sep_len }
        };

        if joined_len(total, &current) > config.chunk_size && !current.is_empty() {
            if total > config.chunk_size {
                tracing::warn!(
                    total,
                    chunk_size = config.chunk_size,
                    "created a chunk longer than the configured size"
                );
            }
            if let Some(chunk) = join_pieces(&current, separator) {
                chunks.push(chunk);
            }

            // Drop leading pieces until the remainder fits the overlap window
            // and leaves room for the incoming piece.
            while total > config.chunk_overlap
                || (joined_len(total, &current) > config.chunk_size && total > 0)
            {
                let first = current.remove(0);
                total -= first.chars().count() + if current.is_empty() { 0 } else { sep_len };
            }
        }

        current.push(piece);
        total += len + if current.len() > 1 { sep_len } else { 0 };
    }

    if let Some(chunk) = join_pieces(&current, separator) {
        chunks.push(chunk);
    }

    chunks
}

fn join_pieces(pieces: &[&str], separator: &str) -> Option<String> {
    let joined = pieces.join(separator);
    let trimmed = joined.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

/// SHA-256 of page content, used to detect stale chunk sets.
pub fn content_hash(text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Text sent to the embedding backend for one chunk.
pub fn format_for_embedding(title: &str, chunk: &str) -> String {
    format!("{} - {}", title, chunk)
}
