use std::sync::Arc;
use thiserror::Error;

use crate::story::{Story, StoryId};

// ============================================================================
// Error Types
// ============================================================================

/// Database-specific errors with user-friendly messages
#[derive(Debug, Error)]
pub enum DatabaseError {
    /// Another process holds the cache file locked
    #[error("The offline cache is locked by another process. Please close it and try again.")]
    InstanceLocked,

    #[error("Database migration failed: {0}")]
    Migration(String),

    #[error("Database error: {0}")]
    Other(#[from] sqlx::Error),
}

impl DatabaseError {
    /// Map lock-related sqlx errors (SQLITE_BUSY, SQLITE_LOCKED, SQLITE_CANTOPEN)
    /// to [`DatabaseError::InstanceLocked`].
    pub(crate) fn from_sqlx(err: sqlx::Error) -> Self {
        if is_lock_message(&err.to_string()) {
            return DatabaseError::InstanceLocked;
        }
        DatabaseError::Other(err)
    }
}

pub(crate) fn is_lock_message(message: &str) -> bool {
    let message = message.to_lowercase();
    message.contains("database is locked")
        || message.contains("database table is locked")
        || message.contains("sqlite_busy")
        || message.contains("sqlite_locked")
        || message.contains("unable to open database file")
}

// ============================================================================
// Row Types
// ============================================================================

/// Row shape of the `stories` table (used by sqlx FromRow).
/// Converts to [`Story`] via `into_story()`.
#[derive(Debug, sqlx::FromRow)]
pub(crate) struct StoryRow {
    pub story_hash: String,
    pub feed_id: i64,
    pub title: String,
    pub content: Option<String>,
    pub permalink: Option<String>,
    /// JSON array of strings
    pub image_urls: String,
    pub published: i64,
    pub score: i64,
    pub read: bool,
    pub saved: bool,
}

impl StoryRow {
    pub(crate) fn into_story(self) -> Story {
        let image_urls: Vec<String> = match serde_json::from_str(&self.image_urls) {
            Ok(urls) => urls,
            Err(e) => {
                tracing::warn!(story = %self.story_hash, error = %e, "Corrupt image_urls column, ignoring");
                Vec::new()
            }
        };

        Story {
            id: StoryId::from(self.story_hash),
            feed_id: self.feed_id,
            title: Arc::from(self.title),
            content: self.content.map(Arc::from),
            permalink: self.permalink.map(Arc::from),
            image_urls: image_urls.into_iter().map(Arc::from).collect(),
            published: self.published,
            score: self.score.clamp(-1, 1) as i8,
            read: self.read,
            saved: self.saved,
        }
    }
}
