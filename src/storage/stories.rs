use anyhow::Result;
use async_trait::async_trait;
use sqlx::SqliteConnection;

use super::schema::Database;
use super::types::StoryRow;
use super::OfflineCache;
use crate::story::{FeedContext, Story};

/// Upper bound on stories returned for one context (OOM protection)
const MAX_CACHED_STORIES: i64 = 2000;

impl Database {
    // ========================================================================
    // Story Cache Operations
    // ========================================================================

    /// Upsert stories and link them to `context_key` after its current tail.
    ///
    /// Server copies overwrite stored ones, flags included. Stories already
    /// linked to the context keep their original position.
    pub async fn save_stories(&self, context_key: &str, stories: &[Story]) -> Result<()> {
        if stories.is_empty() {
            return Ok(());
        }

        let mut tx = self.pool.begin().await?;
        link_stories(&mut tx, context_key, stories).await?;
        tx.commit().await?;
        Ok(())
    }

    /// Swap the stories linked to `context_key` for `stories` and evict
    /// the stories left without a context, all in one transaction.
    ///
    /// Returns the number of links removed and stories evicted.
    pub async fn replace_stories(&self, context_key: &str, stories: &[Story]) -> Result<(u64, u64)> {
        let mut tx = self.pool.begin().await?;

        let unlinked = sqlx::query("DELETE FROM context_stories WHERE context_key = ?")
            .bind(context_key)
            .execute(&mut *tx)
            .await?
            .rows_affected();
        link_stories(&mut tx, context_key, stories).await?;
        let evicted = sqlx::query(
            "DELETE FROM stories WHERE story_hash NOT IN (SELECT story_hash FROM context_stories)",
        )
        .execute(&mut *tx)
        .await?
        .rows_affected();

        tx.commit().await?;
        Ok((unlinked, evicted))
    }

    /// Stories linked to `context_key`, in saved order.
    pub async fn stories_for_context(&self, context_key: &str) -> Result<Vec<Story>> {
        let rows: Vec<StoryRow> = sqlx::query_as(
            r#"
            SELECT s.story_hash, s.feed_id, s.title, s.content, s.permalink, s.image_urls,
                   s.published, s.score, s.read, s.saved
            FROM context_stories c
            JOIN stories s ON s.story_hash = c.story_hash
            WHERE c.context_key = ?
            ORDER BY c.position
            LIMIT ?
        "#,
        )
        .bind(context_key)
        .bind(MAX_CACHED_STORIES)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(StoryRow::into_story).collect())
    }

    /// Total number of cached stories across all contexts.
    pub async fn story_count(&self) -> Result<i64> {
        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM stories")
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }
}

#[async_trait]
impl OfflineCache for Database {
    async fn load_cached(&self, context: &FeedContext) -> Result<Vec<Story>> {
        self.stories_for_context(&context.key()).await
    }

    async fn save(&self, context: &FeedContext, stories: &[Story]) -> Result<()> {
        self.save_stories(&context.key(), stories).await
    }

    async fn replace(&self, context: &FeedContext, stories: &[Story]) -> Result<()> {
        let key = context.key();
        let (unlinked, evicted) = self.replace_stories(&key, stories).await?;
        tracing::debug!(context = %key, unlinked, evicted, "Replaced cached stories");
        Ok(())
    }
}

/// Upsert `stories` and append new links inside an open transaction.
async fn link_stories(conn: &mut SqliteConnection, context_key: &str, stories: &[Story]) -> Result<()> {
    let now = chrono::Utc::now().timestamp();

    let (mut next_position,): (i64,) = sqlx::query_as(
        "SELECT COALESCE(MAX(position), -1) + 1 FROM context_stories WHERE context_key = ?",
    )
    .bind(context_key)
    .fetch_one(&mut *conn)
    .await?;

    for story in stories {
        let image_urls = serde_json::to_string(
            &story.image_urls.iter().map(|u| &**u).collect::<Vec<&str>>(),
        )?;

        sqlx::query(
            r#"
            INSERT INTO stories
                (story_hash, feed_id, title, content, permalink, image_urls,
                 published, score, read, saved, fetched_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(story_hash) DO UPDATE SET
                feed_id = excluded.feed_id,
                title = excluded.title,
                content = excluded.content,
                permalink = excluded.permalink,
                image_urls = excluded.image_urls,
                published = excluded.published,
                score = excluded.score,
                read = excluded.read,
                saved = excluded.saved
        "#,
        )
        .bind(story.id.as_str())
        .bind(story.feed_id)
        .bind(&*story.title)
        .bind(story.content.as_deref())
        .bind(story.permalink.as_deref())
        .bind(&image_urls)
        .bind(story.published)
        .bind(i64::from(story.score))
        .bind(story.read)
        .bind(story.saved)
        .bind(now)
        .execute(&mut *conn)
        .await?;

        let linked = sqlx::query(
            "INSERT OR IGNORE INTO context_stories (context_key, story_hash, position) VALUES (?, ?, ?)",
        )
        .bind(context_key)
        .bind(story.id.as_str())
        .bind(next_position)
        .execute(&mut *conn)
        .await?;

        if linked.rows_affected() > 0 {
            next_position += 1;
        }
    }

    Ok(())
}
