//! Chapter database operations

use chrono::Utc;
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;
use uuid::Uuid;

use crate::error::Result;

/// Chapter record
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Chapter {
    pub id: String,
    pub story_id: String,
    pub chapter_number: f64,
    pub title: String,
    pub slug: String,
    pub content: String,
    pub word_count: i64,
    pub reading_time_minutes: i64,
    pub sort_order: f64,
    pub status: String,
    pub is_published: bool,
    pub is_premium: bool,
    pub source_file: Option<String>,
    pub imported_at: Option<String>,
    pub deleted_at: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

/// Relocated media reference attached to a chapter
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct ChapterMedia {
    pub id: String,
    pub chapter_id: String,
    pub position: i64,
    pub media_url: String,
    pub thumbnail_url: Option<String>,
    pub content_type: String,
    pub display_name: String,
    pub uploaded_by: Option<String>,
    pub created_at: String,
}

/// Data for a chapter to be created
#[derive(Debug, Clone)]
pub struct NewChapter {
    pub story_id: String,
    pub chapter_number: f64,
    pub title: String,
    pub slug: String,
    pub content: String,
    pub word_count: i64,
    pub reading_time_minutes: i64,
    pub sort_order: f64,
    pub is_published: bool,
    pub is_premium: bool,
    pub source_file: Option<String>,
    pub imported_at: Option<String>,
}

/// Derive the publication status stored on a chapter.
///
/// Unpublished chapters are always drafts; the premium flag only matters
/// once a chapter is published.
pub fn publication_status(is_published: bool, is_premium: bool) -> &'static str {
    match (is_published, is_premium) {
        (false, _) => "draft",
        (true, true) => "premium",
        (true, false) => "free",
    }
}

const CHAPTER_COLUMNS: &str = r#"id, story_id, chapter_number, title, slug, content,
       word_count, reading_time_minutes, sort_order, status,
       is_published, is_premium, source_file, imported_at, deleted_at,
       created_at, updated_at"#;

/// Chapter repository
pub struct ChapterRepository<'a> {
    pool: &'a SqlitePool,
}

impl<'a> ChapterRepository<'a> {
    pub fn new(pool: &'a SqlitePool) -> Self {
        Self { pool }
    }

    /// Get a chapter by id
    pub async fn get(&self, id: &str) -> Result<Option<Chapter>> {
        let chapter = sqlx::query_as::<_, Chapter>(&format!(
            "SELECT {} FROM chapters WHERE id = ?",
            CHAPTER_COLUMNS
        ))
        .bind(id)
        .fetch_optional(self.pool)
        .await?;

        Ok(chapter)
    }

    /// List live chapters of a story in display order
    pub async fn list_for_story(&self, story_id: &str) -> Result<Vec<Chapter>> {
        let chapters = sqlx::query_as::<_, Chapter>(&format!(
            r#"
            SELECT {}
            FROM chapters
            WHERE story_id = ? AND deleted_at IS NULL
            ORDER BY sort_order ASC
            "#,
            CHAPTER_COLUMNS
        ))
        .bind(story_id)
        .fetch_all(self.pool)
        .await?;

        Ok(chapters)
    }

    /// Chapter numbers of a story's live chapters
    pub async fn numbers(&self, story_id: &str) -> Result<Vec<f64>> {
        let rows: Vec<(f64,)> = sqlx::query_as(
            r#"
            SELECT chapter_number FROM chapters
            WHERE story_id = ? AND deleted_at IS NULL
            ORDER BY chapter_number ASC
            "#,
        )
        .bind(story_id)
        .fetch_all(self.pool)
        .await?;

        Ok(rows.into_iter().map(|r| r.0).collect())
    }

    /// Highest live chapter number of a story, if any
    pub async fn max_number(&self, story_id: &str) -> Result<Option<f64>> {
        let row: (Option<f64>,) = sqlx::query_as(
            r#"
            SELECT MAX(chapter_number) FROM chapters
            WHERE story_id = ? AND deleted_at IS NULL
            "#,
        )
        .bind(story_id)
        .fetch_one(self.pool)
        .await?;

        Ok(row.0)
    }

    /// Next free display-order slot for a story
    pub async fn next_sort_order(&self, story_id: &str) -> Result<f64> {
        let row: (Option<f64>,) = sqlx::query_as(
            r#"
            SELECT MAX(sort_order) FROM chapters
            WHERE story_id = ? AND deleted_at IS NULL
            "#,
        )
        .bind(story_id)
        .fetch_one(self.pool)
        .await?;

        Ok(row.0.map(|m| m + 1.0).unwrap_or(1.0))
    }

    /// Create a chapter inside an open transaction, returning its id
    pub async fn create_tx(
        &self,
        tx: &mut sqlx::Transaction<'_, sqlx::Sqlite>,
        data: &NewChapter,
    ) -> Result<String> {
        let id = Uuid::new_v4().to_string();
        let now = Utc::now().to_rfc3339();
        let status = publication_status(data.is_published, data.is_premium);

        sqlx::query(
            r#"
            INSERT INTO chapters (
                id, story_id, chapter_number, title, slug, content,
                word_count, reading_time_minutes, sort_order, status,
                is_published, is_premium, source_file, imported_at,
                created_at, updated_at
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&id)
        .bind(&data.story_id)
        .bind(data.chapter_number)
        .bind(&data.title)
        .bind(&data.slug)
        .bind(&data.content)
        .bind(data.word_count)
        .bind(data.reading_time_minutes)
        .bind(data.sort_order)
        .bind(status)
        .bind(data.is_published)
        .bind(data.is_premium)
        .bind(&data.source_file)
        .bind(&data.imported_at)
        .bind(&now)
        .bind(&now)
        .execute(&mut **tx)
        .await?;

        Ok(id)
    }

    /// Create a chapter in its own transaction
    pub async fn create(&self, data: &NewChapter) -> Result<Chapter> {
        let mut tx = self.pool.begin().await?;
        let id = self.create_tx(&mut tx, data).await?;
        tx.commit().await?;

        self.get(&id)
            .await?
            .ok_or_else(|| crate::error::AppError::Internal("Failed to fetch created chapter".to_string()))
    }

    /// Attach a relocated media reference to a chapter inside an open
    /// transaction
    #[allow(clippy::too_many_arguments)]
    pub async fn add_media_tx(
        &self,
        tx: &mut sqlx::Transaction<'_, sqlx::Sqlite>,
        chapter_id: &str,
        position: i64,
        media_url: &str,
        thumbnail_url: Option<&str>,
        content_type: &str,
        display_name: &str,
        uploaded_by: Option<&str>,
    ) -> Result<()> {
        let id = Uuid::new_v4().to_string();
        let now = Utc::now().to_rfc3339();

        sqlx::query(
            r#"
            INSERT INTO chapter_media (
                id, chapter_id, position, media_url, thumbnail_url,
                content_type, display_name, uploaded_by, created_at
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&id)
        .bind(chapter_id)
        .bind(position)
        .bind(media_url)
        .bind(thumbnail_url)
        .bind(content_type)
        .bind(display_name)
        .bind(uploaded_by)
        .bind(&now)
        .execute(&mut **tx)
        .await?;

        Ok(())
    }

    /// List a chapter's media references in order
    pub async fn list_media(&self, chapter_id: &str) -> Result<Vec<ChapterMedia>> {
        let media = sqlx::query_as::<_, ChapterMedia>(
            r#"
            SELECT id, chapter_id, position, media_url, thumbnail_url,
                   content_type, display_name, uploaded_by, created_at
            FROM chapter_media
            WHERE chapter_id = ?
            ORDER BY position ASC
            "#,
        )
        .bind(chapter_id)
        .fetch_all(self.pool)
        .await?;

        Ok(media)
    }
}
