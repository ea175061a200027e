//! Story database operations
//!
//! The import pipeline only reads stories and maintains their aggregate
//! fields; story CRUD itself lives elsewhere.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;
use uuid::Uuid;

use crate::error::Result;

/// Story record (fields the import pipeline touches)
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Story {
    pub id: String,
    pub title: String,
    pub slug: String,
    pub author_id: Option<String>,
    pub word_count: i64,
    pub chapter_count: i64,
    pub created_at: String,
    pub updated_at: String,
}

/// Story repository
pub struct StoryRepository<'a> {
    pool: &'a SqlitePool,
}

impl<'a> StoryRepository<'a> {
    pub fn new(pool: &'a SqlitePool) -> Self {
        Self { pool }
    }

    /// Get a story by id
    pub async fn get(&self, id: &str) -> Result<Option<Story>> {
        let story = sqlx::query_as::<_, Story>(
            r#"
            SELECT id, title, slug, author_id, word_count, chapter_count,
                   created_at, updated_at
            FROM stories
            WHERE id = ?
            "#,
        )
        .bind(id)
        .fetch_optional(self.pool)
        .await?;

        Ok(story)
    }

    /// Check whether a story exists
    pub async fn exists(&self, id: &str) -> Result<bool> {
        let result: Option<(i64,)> = sqlx::query_as("SELECT 1 FROM stories WHERE id = ?")
            .bind(id)
            .fetch_optional(self.pool)
            .await?;

        Ok(result.is_some())
    }

    /// Create a story (used by seeding and tests)
    pub async fn create(&self, title: &str, slug: &str, author_id: Option<&str>) -> Result<Story> {
        let id = Uuid::new_v4().to_string();
        let now = Utc::now().to_rfc3339();

        sqlx::query(
            r#"
            INSERT INTO stories (id, title, slug, author_id, word_count, chapter_count, created_at, updated_at)
            VALUES (?, ?, ?, ?, 0, 0, ?, ?)
            "#,
        )
        .bind(&id)
        .bind(title)
        .bind(slug)
        .bind(author_id)
        .bind(&now)
        .bind(&now)
        .execute(self.pool)
        .await?;

        self.get(&id)
            .await?
            .ok_or_else(|| crate::error::AppError::Internal("Failed to fetch created story".to_string()))
    }

    /// Add to a story's aggregate word count and bump its chapter count
    /// inside an open transaction
    pub async fn add_chapter_words_tx(
        &self,
        tx: &mut sqlx::Transaction<'_, sqlx::Sqlite>,
        id: &str,
        words: i64,
    ) -> Result<()> {
        let now = Utc::now().to_rfc3339();

        sqlx::query(
            r#"
            UPDATE stories
            SET word_count = word_count + ?,
                chapter_count = chapter_count + 1,
                updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(words)
        .bind(&now)
        .bind(id)
        .execute(&mut **tx)
        .await?;

        Ok(())
    }

    /// Refresh a story's updated-at timestamp and aggregate counters from
    /// its live chapters
    pub async fn refresh_aggregates(&self, id: &str) -> Result<()> {
        let now = Utc::now().to_rfc3339();

        sqlx::query(
            r#"
            UPDATE stories
            SET word_count = (
                    SELECT COALESCE(SUM(word_count), 0) FROM chapters
                    WHERE story_id = ? AND deleted_at IS NULL
                ),
                chapter_count = (
                    SELECT COUNT(*) FROM chapters
                    WHERE story_id = ? AND deleted_at IS NULL
                ),
                updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(id)
        .bind(id)
        .bind(&now)
        .bind(id)
        .execute(self.pool)
        .await?;

        Ok(())
    }
}
