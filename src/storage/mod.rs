//! Offline story cache.
//!
//! The loader talks to the cache through the [`OfflineCache`] trait. The
//! SQLite-backed [`Database`] is the production implementation: stories are
//! stored once by hash and linked to every feed or river context they were
//! fetched under, in arrival order.

mod schema;
mod stories;
mod types;

use anyhow::Result;
use async_trait::async_trait;

use crate::story::{FeedContext, Story};

pub use schema::Database;
pub use types::DatabaseError;

/// Local story store consulted when the server is unreachable or has not
/// answered yet.
///
/// Errors are reported to the caller but the loader treats them as
/// non-fatal: a broken cache only costs offline reading.
#[async_trait]
pub trait OfflineCache: Send + Sync {
    /// Stories previously saved for `context`, in the order they were saved.
    async fn load_cached(&self, context: &FeedContext) -> Result<Vec<Story>>;

    /// Upsert `stories` and append any new ones to `context`'s list.
    async fn save(&self, context: &FeedContext, stories: &[Story]) -> Result<()>;

    /// Make `stories` the whole list for `context`, dropping older entries.
    async fn replace(&self, context: &FeedContext, stories: &[Story]) -> Result<()>;
}
