//! Import job database operations
//!
//! Jobs are the audit trail for every upload-to-chapters attempt. Rows are
//! never deleted; they only move forward through their lifecycle:
//! pending -> processing -> completed | failed. All transition queries are
//! guarded by the current status so a terminal job can never be revived.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;
use uuid::Uuid;

use crate::error::Result;

/// Import job lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Processing => "processing",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }
}

/// Kind of import a job tracks
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImportKind {
    Document,
    Batch,
}

impl ImportKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ImportKind::Document => "document",
            ImportKind::Batch => "batch",
        }
    }
}

/// One failed (or skipped) unit of work inside an import
///
/// Validation errors carry the 1-based sheet row; persistence errors carry
/// the chapter number and title of the row that failed.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RowError {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub row: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub chapter_number: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    pub message: String,
}

impl RowError {
    /// Error tied to a sheet row (validation stage)
    pub fn for_row(row: i64, message: impl Into<String>) -> Self {
        Self {
            row: Some(row),
            chapter_number: None,
            title: None,
            message: message.into(),
        }
    }

    /// Error tied to a chapter candidate (persistence stage)
    pub fn for_chapter(chapter_number: f64, title: &str, message: impl Into<String>) -> Self {
        Self {
            row: None,
            chapter_number: Some(chapter_number),
            title: Some(title.to_string()),
            message: message.into(),
        }
    }
}

/// Import job record
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct ImportJob {
    pub id: String,
    pub file_name: String,
    pub file_size: i64,
    pub mime_type: String,
    pub kind: String,
    pub story_id: Option<String>,
    pub uploader_id: Option<String>,
    pub status: String,
    pub progress: i64,
    pub chapters_created: i64,
    pub images_extracted: i64,
    pub error_message: Option<String>,
    pub row_errors: String,
    pub settings: String,
    pub source_key: Option<String>,
    pub created_at: String,
    pub started_at: Option<String>,
    pub completed_at: Option<String>,
}

impl ImportJob {
    /// Parsed lifecycle status; unknown values read as failed
    pub fn job_status(&self) -> JobStatus {
        match self.status.as_str() {
            "pending" => JobStatus::Pending,
            "processing" => JobStatus::Processing,
            "completed" => JobStatus::Completed,
            _ => JobStatus::Failed,
        }
    }

    /// Decoded per-row error list
    pub fn row_error_list(&self) -> Vec<RowError> {
        serde_json::from_str(&self.row_errors).unwrap_or_default()
    }
}

/// Data for a job to be created
#[derive(Debug, Clone)]
pub struct NewImportJob {
    pub file_name: String,
    pub file_size: i64,
    pub mime_type: String,
    pub kind: ImportKind,
    pub story_id: Option<String>,
    pub uploader_id: Option<String>,
    pub settings: String,
}

const JOB_COLUMNS: &str = r#"id, file_name, file_size, mime_type, kind, story_id, uploader_id,
       status, progress, chapters_created, images_extracted,
       error_message, row_errors, settings, source_key,
       created_at, started_at, completed_at"#;

/// Import job repository
pub struct ImportJobRepository<'a> {
    pool: &'a SqlitePool,
}

impl<'a> ImportJobRepository<'a> {
    pub fn new(pool: &'a SqlitePool) -> Self {
        Self { pool }
    }

    /// Get a job by id
    pub async fn get(&self, id: &str) -> Result<Option<ImportJob>> {
        let job = sqlx::query_as::<_, ImportJob>(&format!(
            "SELECT {} FROM import_jobs WHERE id = ?",
            JOB_COLUMNS
        ))
        .bind(id)
        .fetch_optional(self.pool)
        .await?;

        Ok(job)
    }

    /// List a story's jobs, newest first
    pub async fn list_for_story(&self, story_id: &str) -> Result<Vec<ImportJob>> {
        let jobs = sqlx::query_as::<_, ImportJob>(&format!(
            r#"
            SELECT {}
            FROM import_jobs
            WHERE story_id = ?
            ORDER BY created_at DESC
            "#,
            JOB_COLUMNS
        ))
        .bind(story_id)
        .fetch_all(self.pool)
        .await?;

        Ok(jobs)
    }

    /// Create a pending job
    pub async fn create(&self, data: &NewImportJob) -> Result<ImportJob> {
        let id = Uuid::new_v4().to_string();
        let now = Utc::now().to_rfc3339();

        sqlx::query(
            r#"
            INSERT INTO import_jobs (
                id, file_name, file_size, mime_type, kind, story_id,
                uploader_id, status, settings, created_at
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, 'pending', ?, ?)
            "#,
        )
        .bind(&id)
        .bind(&data.file_name)
        .bind(data.file_size)
        .bind(&data.mime_type)
        .bind(data.kind.as_str())
        .bind(&data.story_id)
        .bind(&data.uploader_id)
        .bind(&data.settings)
        .bind(&now)
        .execute(self.pool)
        .await?;

        self.get(&id)
            .await?
            .ok_or_else(|| crate::error::AppError::Internal("Failed to fetch created job".to_string()))
    }

    /// Record the key of the temporarily stored source object
    pub async fn set_source_key(&self, id: &str, source_key: &str) -> Result<()> {
        sqlx::query("UPDATE import_jobs SET source_key = ? WHERE id = ?")
            .bind(source_key)
            .bind(id)
            .execute(self.pool)
            .await?;

        Ok(())
    }

    /// Move a pending job to processing; false if it already left pending
    pub async fn mark_processing(&self, id: &str) -> Result<bool> {
        let now = Utc::now().to_rfc3339();

        let result = sqlx::query(
            r#"
            UPDATE import_jobs
            SET status = 'processing', started_at = ?
            WHERE id = ? AND status = 'pending'
            "#,
        )
        .bind(&now)
        .bind(id)
        .execute(self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Raise a processing job's progress percentage
    ///
    /// `max(progress, ?)` keeps progress monotonic even if stage updates
    /// arrive out of order.
    pub async fn update_progress(&self, id: &str, progress: i64) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE import_jobs
            SET progress = max(progress, ?)
            WHERE id = ? AND status = 'processing'
            "#,
        )
        .bind(progress.clamp(0, 100))
        .bind(id)
        .execute(self.pool)
        .await?;

        Ok(())
    }

    /// Record how many images the parser extracted
    pub async fn set_images_extracted(&self, id: &str, count: i64) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE import_jobs
            SET images_extracted = ?
            WHERE id = ? AND status = 'processing'
            "#,
        )
        .bind(count)
        .bind(id)
        .execute(self.pool)
        .await?;

        Ok(())
    }

    /// Finish a processing job successfully
    pub async fn complete(
        &self,
        id: &str,
        chapters_created: i64,
        row_errors: &[RowError],
    ) -> Result<bool> {
        let now = Utc::now().to_rfc3339();
        let errors_json = serde_json::to_string(row_errors)
            .map_err(|e| crate::error::AppError::Internal(format!("Failed to encode row errors: {}", e)))?;

        let result = sqlx::query(
            r#"
            UPDATE import_jobs
            SET status = 'completed', progress = 100, chapters_created = ?,
                row_errors = ?, completed_at = ?
            WHERE id = ? AND status = 'processing'
            "#,
        )
        .bind(chapters_created)
        .bind(&errors_json)
        .bind(&now)
        .bind(id)
        .execute(self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Mark a job failed with a human-readable message
    pub async fn fail(&self, id: &str, message: &str) -> Result<bool> {
        let now = Utc::now().to_rfc3339();

        let result = sqlx::query(
            r#"
            UPDATE import_jobs
            SET status = 'failed', error_message = ?, completed_at = ?
            WHERE id = ? AND status IN ('pending', 'processing')
            "#,
        )
        .bind(message)
        .bind(&now)
        .bind(id)
        .execute(self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Sweep jobs left non-terminal by a previous process
    ///
    /// Called once at startup; returns how many jobs were swept.
    pub async fn fail_interrupted(&self) -> Result<u64> {
        let now = Utc::now().to_rfc3339();

        let result = sqlx::query(
            r#"
            UPDATE import_jobs
            SET status = 'failed',
                error_message = 'Import interrupted by server restart',
                completed_at = ?
            WHERE status IN ('pending', 'processing')
            "#,
        )
        .bind(&now)
        .execute(self.pool)
        .await?;

        Ok(result.rows_affected())
    }
}
