//! Import orchestration
//!
//! Ties the pipeline together for both upload paths. A preview call
//! creates the job, stashes the uploaded source in object storage, runs
//! parsing and validation, and returns candidates while the job stays in
//! `processing`. The confirm call re-reads the stored source by job id
//! (the client round-trips only the job id and scalar overrides, never
//! chapter content), then persists chapters.
//!
//! Document confirms run synchronously in the request: one chapter, one
//! transaction. Batch confirms detach onto a bounded background task and
//! report through the job record, which the caller polls.

use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;
use tokio::sync::{Mutex, Semaphore};
use tokio::task::JoinHandle;

use crate::db::{
    Chapter, ChapterRepository, ImportJob, ImportJobRepository, ImportKind, JobStatus,
    NewChapter, NewImportJob, RowError, StoryRepository,
};
use crate::storage::{sanitize_object_name, MediaStorage};

use super::conflicts::{find_conflicts, next_number, StoryLocks};
use super::docx::{parse_docx, ParsedDocument};
use super::images::{extract_embedded_images, relocate_images};
use super::sheet::read_batch_sheet;
use super::splitter::{filename_hint, split_chapters};
use super::template;
use super::text::{format_number, reading_time_minutes, slugify, word_count};
use super::types::{
    BatchRow, ChapterCandidate, ImportError, ImportSettings, DOCX_MIME, XLSX_MIME,
};

/// An uploaded file as received from the transport layer
#[derive(Debug, Clone)]
pub struct UploadedFile {
    pub filename: String,
    pub content_type: Option<String>,
    pub bytes: Vec<u8>,
}

impl UploadedFile {
    fn content_type_or(&self, fallback: &str) -> String {
        self.content_type
            .clone()
            .unwrap_or_else(|| fallback.to_string())
    }
}

/// Preview of a parsed manuscript, returned before anything persists
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DocumentPreview {
    pub job_id: String,
    pub file_name: String,
    pub candidates: Vec<ChapterCandidate>,
    pub warnings: Vec<String>,
}

/// Preview of a validated batch sheet
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchPreview {
    pub job_id: String,
    pub rows: Vec<ChapterCandidate>,
    /// Candidate numbers already taken by live chapters of the story
    pub conflicts: Vec<f64>,
}

/// Scalar overrides accepted when confirming a document import
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ConfirmDocumentRequest {
    /// Which preview candidate to persist
    pub candidate_index: usize,
    pub chapter_number: Option<f64>,
    pub title: Option<String>,
    pub publish: Option<bool>,
    pub premium: Option<bool>,
}

/// Row selection accepted when confirming a batch import
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ConfirmBatchRequest {
    /// Chapter numbers to import; absent means every previewed row
    pub chapter_numbers: Option<Vec<f64>>,
}

/// The import pipeline service shared across request handlers
#[derive(Clone)]
pub struct ImportService {
    db: SqlitePool,
    media: Arc<dyn MediaStorage>,
    locks: StoryLocks,
    batch_permits: Arc<Semaphore>,
    tasks: Arc<Mutex<HashMap<String, JoinHandle<()>>>>,
}

impl ImportService {
    pub fn new(db: SqlitePool, media: Arc<dyn MediaStorage>, max_concurrent_imports: usize) -> Self {
        Self {
            db,
            media,
            locks: StoryLocks::new(),
            batch_permits: Arc::new(Semaphore::new(max_concurrent_imports.max(1))),
            tasks: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    // ------------------------------------------------------------------
    // Document path
    // ------------------------------------------------------------------

    /// Parse a manuscript into chapter candidates without persisting
    ///
    /// Creates the import job, stores the source file for the later
    /// confirm call, and leaves the job in `processing`. Parse and split
    /// failures mark the job failed and surface synchronously.
    pub async fn submit_document_preview(
        &self,
        story_id: &str,
        file: UploadedFile,
        settings: ImportSettings,
        uploader_id: Option<String>,
    ) -> Result<DocumentPreview, ImportError> {
        if !StoryRepository::new(&self.db).exists(story_id).await? {
            return Err(ImportError::StoryNotFound(story_id.to_string()));
        }

        let job = self
            .create_job(story_id, &file, ImportKind::Document, &settings, uploader_id)
            .await?;

        match self.run_document_preview(&job, &file, &settings).await {
            Ok(preview) => Ok(preview),
            Err(err) => {
                self.fail_job(&job.id, &err).await;
                Err(err)
            }
        }
    }

    async fn run_document_preview(
        &self,
        job: &ImportJob,
        file: &UploadedFile,
        settings: &ImportSettings,
    ) -> Result<DocumentPreview, ImportError> {
        let jobs = ImportJobRepository::new(&self.db);

        self.stash_source(job, file, DOCX_MIME).await?;
        jobs.mark_processing(&job.id).await?;

        let parsed = parse_docx(&file.bytes)?;
        jobs.update_progress(&job.id, 25).await?;

        let (mut candidates, mut warnings) =
            resolve_candidates(parsed, &file.filename, settings)?;
        jobs.update_progress(&job.id, 50).await?;

        let mut total_images = 0i64;
        for candidate in &mut candidates {
            let extraction = extract_embedded_images(&candidate.body)?;
            candidate.image_count = extraction.images.len() as i64;
            total_images += candidate.image_count;
            warnings.extend(extraction.warnings);
        }
        jobs.set_images_extracted(&job.id, total_images).await?;
        jobs.update_progress(&job.id, 75).await?;

        Ok(DocumentPreview {
            job_id: job.id.clone(),
            file_name: job.file_name.clone(),
            candidates,
            warnings,
        })
    }

    /// Persist one previewed candidate as a chapter
    ///
    /// Re-parses the stored source, applies the request's overrides,
    /// renumbers past the story maximum on a number conflict, relocates
    /// images, and writes the chapter in a single transaction.
    pub async fn confirm_document(
        &self,
        story_id: &str,
        job_id: &str,
        request: ConfirmDocumentRequest,
    ) -> Result<Chapter, ImportError> {
        let job = self
            .confirmable_job(story_id, job_id, ImportKind::Document)
            .await?;

        match self.run_document_confirm(&job, story_id, &request).await {
            Ok(chapter) => Ok(chapter),
            Err(err) => {
                // A bad candidate index is a request error; the job stays
                // confirmable with a corrected one
                if !matches!(err, ImportError::CandidateOutOfRange { .. }) {
                    self.fail_job(&job.id, &err).await;
                }
                Err(err)
            }
        }
    }

    async fn run_document_confirm(
        &self,
        job: &ImportJob,
        story_id: &str,
        request: &ConfirmDocumentRequest,
    ) -> Result<Chapter, ImportError> {
        let jobs = ImportJobRepository::new(&self.db);
        let chapters = ChapterRepository::new(&self.db);
        let stories = StoryRepository::new(&self.db);

        let settings: ImportSettings = serde_json::from_str(&job.settings).unwrap_or_default();
        let source_key = job.source_key.clone().ok_or_else(|| {
            ImportError::Internal("import job has no stored source file".to_string())
        })?;

        let bytes = self.media.fetch_source(&source_key).await?;
        let parsed = parse_docx(&bytes)?;
        let (candidates, _) = resolve_candidates(parsed, &job.file_name, &settings)?;

        let count = candidates.len();
        let candidate = candidates
            .into_iter()
            .nth(request.candidate_index)
            .ok_or(ImportError::CandidateOutOfRange {
                index: request.candidate_index,
                count,
            })?;

        let title = request
            .title
            .clone()
            .filter(|t| !t.trim().is_empty())
            .unwrap_or(candidate.title);
        let is_published = request.publish.unwrap_or(settings.publish_on_import);
        let is_premium = request.premium.unwrap_or(settings.premium_on_import);

        // Hold the story lock across the conflict check and the insert
        let _guard = self.locks.acquire(story_id).await;

        let number = match request.chapter_number.or(candidate.number) {
            Some(requested) => {
                let conflicts = find_conflicts(&self.db, story_id, &[requested]).await?;
                if conflicts.is_empty() {
                    requested
                } else {
                    let reassigned = next_number(&self.db, story_id).await?;
                    tracing::info!(
                        "Chapter number {} already taken in story {}; renumbering to {}",
                        format_number(requested),
                        story_id,
                        format_number(reassigned)
                    );
                    reassigned
                }
            }
            None => next_number(&self.db, story_id).await?,
        };

        let extraction = extract_embedded_images(&candidate.body)?;
        let (content, outcomes) = relocate_images(
            &extraction.body,
            &extraction.images,
            self.media.as_ref(),
            job.uploader_id.as_deref(),
        )
        .await?;
        let stored_images = outcomes.iter().filter(|o| o.is_some()).count() as i64;
        jobs.update_progress(&job.id, 90).await?;

        let words = word_count(&content);
        let sort_order = chapters.next_sort_order(story_id).await?;
        let new_chapter = NewChapter {
            story_id: story_id.to_string(),
            chapter_number: number,
            title: title.clone(),
            slug: slugify(&title, number),
            content,
            word_count: words,
            reading_time_minutes: reading_time_minutes(words),
            sort_order,
            is_published,
            is_premium,
            source_file: Some(job.file_name.clone()),
            imported_at: Some(chrono::Utc::now().to_rfc3339()),
        };

        let mut tx = self.db.begin().await?;
        let chapter_id = chapters.create_tx(&mut tx, &new_chapter).await?;
        for (position, outcome) in outcomes.iter().enumerate() {
            if let Some(stored) = outcome {
                let image = &extraction.images[position];
                chapters
                    .add_media_tx(
                        &mut tx,
                        &chapter_id,
                        position as i64,
                        &stored.url,
                        stored.thumbnail_url.as_deref(),
                        &image.content_type,
                        &image.display_name,
                        job.uploader_id.as_deref(),
                    )
                    .await?;
            }
        }
        stories.add_chapter_words_tx(&mut tx, story_id, words).await?;
        tx.commit().await?;

        jobs.set_images_extracted(&job.id, stored_images).await?;
        jobs.complete(&job.id, 1, &[]).await?;
        self.discard_source(&source_key).await;

        chapters.get(&chapter_id).await?.ok_or_else(|| {
            ImportError::Internal("created chapter could not be read back".to_string())
        })
    }

    // ------------------------------------------------------------------
    // Batch path
    // ------------------------------------------------------------------

    /// Validate a batch sheet and report candidates and number conflicts
    pub async fn submit_batch_preview(
        &self,
        story_id: &str,
        file: UploadedFile,
        settings: ImportSettings,
        uploader_id: Option<String>,
    ) -> Result<BatchPreview, ImportError> {
        if !StoryRepository::new(&self.db).exists(story_id).await? {
            return Err(ImportError::StoryNotFound(story_id.to_string()));
        }

        let job = self
            .create_job(story_id, &file, ImportKind::Batch, &settings, uploader_id)
            .await?;

        match self.run_batch_preview(&job, story_id, &file).await {
            Ok(preview) => Ok(preview),
            Err(err) => {
                self.fail_job(&job.id, &err).await;
                Err(err)
            }
        }
    }

    async fn run_batch_preview(
        &self,
        job: &ImportJob,
        story_id: &str,
        file: &UploadedFile,
    ) -> Result<BatchPreview, ImportError> {
        let jobs = ImportJobRepository::new(&self.db);

        self.stash_source(job, file, XLSX_MIME).await?;
        jobs.mark_processing(&job.id).await?;

        let rows = read_batch_sheet(&file.bytes)?;
        jobs.update_progress(&job.id, 20).await?;

        let numbers: Vec<f64> = rows.iter().map(|r| r.chapter_number).collect();
        let conflicts = find_conflicts(&self.db, story_id, &numbers).await?;
        jobs.update_progress(&job.id, 40).await?;

        Ok(BatchPreview {
            job_id: job.id.clone(),
            rows: rows.iter().map(BatchRow::to_candidate).collect(),
            conflicts,
        })
    }

    /// Start the confirmed batch import as a detached background task
    ///
    /// Returns the job snapshot immediately; the caller polls for the
    /// outcome. Rows whose number conflicts at import time are skipped
    /// and reported in the job's row errors.
    pub async fn confirm_batch(
        &self,
        story_id: &str,
        job_id: &str,
        request: ConfirmBatchRequest,
    ) -> Result<ImportJob, ImportError> {
        let job = self
            .confirmable_job(story_id, job_id, ImportKind::Batch)
            .await?;

        let service = self.clone();
        let task_job = job.clone();
        let task_story = story_id.to_string();
        let handle = tokio::spawn(async move {
            service
                .run_batch_import(task_job, task_story, request.chapter_numbers)
                .await;
        });

        let mut tasks = self.tasks.lock().await;
        tasks.retain(|_, h| !h.is_finished());
        tasks.insert(job.id.clone(), handle);

        Ok(job)
    }

    async fn run_batch_import(
        &self,
        job: ImportJob,
        story_id: String,
        selection: Option<Vec<f64>>,
    ) {
        let permit = match self.batch_permits.clone().acquire_owned().await {
            Ok(permit) => permit,
            // Semaphore closed; the server is shutting down
            Err(_) => return,
        };

        if let Err(err) = self
            .run_batch_rows(&job, &story_id, selection.as_deref())
            .await
        {
            self.fail_job(&job.id, &err).await;
        }

        drop(permit);
        self.tasks.lock().await.remove(&job.id);
    }

    async fn run_batch_rows(
        &self,
        job: &ImportJob,
        story_id: &str,
        selection: Option<&[f64]>,
    ) -> Result<(), ImportError> {
        let jobs = ImportJobRepository::new(&self.db);
        let stories = StoryRepository::new(&self.db);

        let source_key = job.source_key.clone().ok_or_else(|| {
            ImportError::Internal("import job has no stored source file".to_string())
        })?;
        let bytes = self.media.fetch_source(&source_key).await?;
        let mut rows = read_batch_sheet(&bytes)?;

        if let Some(selected) = selection {
            rows.retain(|row| selected.contains(&row.chapter_number));
        }

        let _guard = self.locks.acquire(story_id).await;

        // Fresh conflict check under the lock. Conflicting rows are
        // skipped rather than renumbered: the sheet's numbering is the
        // author's explicit intent.
        let numbers: Vec<f64> = rows.iter().map(|r| r.chapter_number).collect();
        let conflicts = find_conflicts(&self.db, story_id, &numbers).await?;

        let mut errors: Vec<RowError> = Vec::new();
        let mut pending: Vec<BatchRow> = Vec::new();
        for row in rows {
            if conflicts.contains(&row.chapter_number) {
                errors.push(RowError::for_chapter(
                    row.chapter_number,
                    &row.title,
                    "chapter number already exists; row skipped",
                ));
            } else {
                pending.push(row);
            }
        }

        let total = pending.len().max(1);
        let mut created = 0i64;
        let imported_at = chrono::Utc::now().to_rfc3339();

        for (index, row) in pending.into_iter().enumerate() {
            match self
                .create_batch_chapter(story_id, &row, &job.file_name, &imported_at)
                .await
            {
                Ok(_) => created += 1,
                Err(err) => {
                    tracing::warn!(
                        "Batch row {} (chapter {}) failed: {}",
                        row.row,
                        format_number(row.chapter_number),
                        err
                    );
                    errors.push(RowError::for_chapter(
                        row.chapter_number,
                        &row.title,
                        err.to_string(),
                    ));
                }
            }
            let progress = 40 + (((index + 1) * 55) / total) as i64;
            jobs.update_progress(&job.id, progress).await?;
        }

        if created > 0 {
            stories.refresh_aggregates(story_id).await?;
        }

        jobs.complete(&job.id, created, &errors).await?;
        self.discard_source(&source_key).await;

        tracing::info!(
            "Batch import {} finished: {} chapter(s) created, {} row error(s)",
            job.id,
            created,
            errors.len()
        );
        Ok(())
    }

    async fn create_batch_chapter(
        &self,
        story_id: &str,
        row: &BatchRow,
        source_file: &str,
        imported_at: &str,
    ) -> Result<Chapter, ImportError> {
        let chapters = ChapterRepository::new(&self.db);
        let words = word_count(&row.content);
        let sort_order = chapters.next_sort_order(story_id).await?;

        let chapter = chapters
            .create(&NewChapter {
                story_id: story_id.to_string(),
                chapter_number: row.chapter_number,
                title: row.title.clone(),
                slug: slugify(&row.title, row.chapter_number),
                content: row.content.clone(),
                word_count: words,
                reading_time_minutes: reading_time_minutes(words),
                sort_order,
                is_published: row.is_published,
                is_premium: row.is_premium,
                source_file: Some(source_file.to_string()),
                imported_at: Some(imported_at.to_string()),
            })
            .await?;
        Ok(chapter)
    }

    // ------------------------------------------------------------------
    // Status and housekeeping
    // ------------------------------------------------------------------

    /// Current snapshot of an import job
    pub async fn job_status(&self, job_id: &str) -> Result<ImportJob, ImportError> {
        ImportJobRepository::new(&self.db)
            .get(job_id)
            .await?
            .ok_or_else(|| ImportError::JobNotFound(job_id.to_string()))
    }

    /// A story's import jobs, newest first
    pub async fn jobs_for_story(&self, story_id: &str) -> Result<Vec<ImportJob>, ImportError> {
        if !StoryRepository::new(&self.db).exists(story_id).await? {
            return Err(ImportError::StoryNotFound(story_id.to_string()));
        }
        Ok(ImportJobRepository::new(&self.db)
            .list_for_story(story_id)
            .await?)
    }

    /// The downloadable batch template workbook
    pub fn batch_template(&self) -> Result<Vec<u8>, ImportError> {
        Ok(template::batch_template_xlsx()?)
    }

    /// Stop accepting background work and abort in-flight batch tasks
    ///
    /// Aborted jobs stay in `processing` and are swept to `failed` on the
    /// next startup.
    pub async fn shutdown(&self) {
        self.batch_permits.close();
        let mut tasks = self.tasks.lock().await;
        for (job_id, handle) in tasks.drain() {
            if !handle.is_finished() {
                tracing::warn!("Aborting in-flight import job {}", job_id);
                handle.abort();
            }
        }
    }

    // ------------------------------------------------------------------
    // Shared steps
    // ------------------------------------------------------------------

    async fn create_job(
        &self,
        story_id: &str,
        file: &UploadedFile,
        kind: ImportKind,
        settings: &ImportSettings,
        uploader_id: Option<String>,
    ) -> Result<ImportJob, ImportError> {
        let settings_json = serde_json::to_string(settings)
            .map_err(|e| ImportError::Internal(format!("failed to encode settings: {}", e)))?;
        let fallback_mime = match kind {
            ImportKind::Document => DOCX_MIME,
            ImportKind::Batch => XLSX_MIME,
        };

        let job = ImportJobRepository::new(&self.db)
            .create(&NewImportJob {
                file_name: file.filename.clone(),
                file_size: file.bytes.len() as i64,
                mime_type: file.content_type_or(fallback_mime),
                kind,
                story_id: Some(story_id.to_string()),
                uploader_id,
                settings: settings_json,
            })
            .await?;

        tracing::debug!(
            "Created {} import job {} for story {} ({}, {} bytes)",
            job.kind,
            job.id,
            story_id,
            job.file_name,
            job.file_size
        );
        Ok(job)
    }

    async fn stash_source(
        &self,
        job: &ImportJob,
        file: &UploadedFile,
        fallback_mime: &str,
    ) -> Result<(), ImportError> {
        let key = format!(
            "imports/sources/{}/{}",
            job.id,
            sanitize_object_name(&file.filename)
        );
        self.media
            .put_source(&key, &file.bytes, &file.content_type_or(fallback_mime))
            .await?;
        ImportJobRepository::new(&self.db)
            .set_source_key(&job.id, &key)
            .await?;
        Ok(())
    }

    async fn discard_source(&self, source_key: &str) {
        if let Err(e) = self.media.delete_source(source_key).await {
            tracing::warn!("Failed to delete import source {}: {}", source_key, e);
        }
    }

    async fn confirmable_job(
        &self,
        story_id: &str,
        job_id: &str,
        kind: ImportKind,
    ) -> Result<ImportJob, ImportError> {
        let job = ImportJobRepository::new(&self.db)
            .get(job_id)
            .await?
            .ok_or_else(|| ImportError::JobNotFound(job_id.to_string()))?;

        // A job id from another story is treated as unknown
        if job.story_id.as_deref() != Some(story_id) {
            return Err(ImportError::JobNotFound(job_id.to_string()));
        }
        if job.kind != kind.as_str() {
            return Err(ImportError::InvalidUpload(format!(
                "job {} is a {} import",
                job.id, job.kind
            )));
        }
        if job.job_status() != JobStatus::Processing {
            return Err(ImportError::JobNotConfirmable {
                id: job.id.clone(),
                status: job.status.clone(),
            });
        }
        Ok(job)
    }

    async fn fail_job(&self, job_id: &str, err: &ImportError) {
        tracing::error!("Import job {} failed: {}", job_id, err);
        if let Err(db_err) = ImportJobRepository::new(&self.db)
            .fail(job_id, &err.to_string())
            .await
        {
            tracing::error!("Failed to record failure on job {}: {}", job_id, db_err);
        }
    }
}

/// Split a parsed document and settle candidate numbers and titles
///
/// With no headings the whole document is one candidate and the filename
/// supplies both number and title. With exactly one heading-derived
/// candidate that lacks a number, the filename supplies the number only.
/// The settings' starting number is the last resort either way.
fn resolve_candidates(
    parsed: ParsedDocument,
    filename: &str,
    settings: &ImportSettings,
) -> Result<(Vec<ChapterCandidate>, Vec<String>), ImportError> {
    let split = split_chapters(&parsed.blocks);

    let mut candidates = split.candidates;
    let mut warnings = parsed.warnings;
    warnings.extend(split.warnings);

    if candidates.is_empty() {
        return Err(ImportError::EmptyDocument);
    }

    if !split.used_headings {
        let (number, title) = filename_hint(filename);
        let candidate = &mut candidates[0];
        candidate.number = number.or(settings.starting_number);
        if !title.is_empty() {
            candidate.title = title;
        }
    } else if candidates.len() == 1 && candidates[0].number.is_none() {
        let (number, _) = filename_hint(filename);
        candidates[0].number = number.or(settings.starting_number);
    }

    Ok((candidates, warnings))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::create_test_pool;
    use crate::import::test_fixtures::{batch_sheet, tiny_png_bytes, DocxBuilder};
    use crate::storage::MemoryStorage;
    use std::time::Duration;

    async fn setup() -> (ImportService, SqlitePool, Arc<MemoryStorage>, String) {
        let pool = create_test_pool().await.unwrap();
        let storage = Arc::new(MemoryStorage::new());
        let service = ImportService::new(pool.clone(), storage.clone(), 2);
        let story = StoryRepository::new(&pool)
            .create("The Long Voyage", "the-long-voyage", None)
            .await
            .unwrap();
        (service, pool, storage, story.id)
    }

    fn docx_file(name: &str, bytes: Vec<u8>) -> UploadedFile {
        UploadedFile {
            filename: name.to_string(),
            content_type: Some(DOCX_MIME.to_string()),
            bytes,
        }
    }

    fn xlsx_file(name: &str, bytes: Vec<u8>) -> UploadedFile {
        UploadedFile {
            filename: name.to_string(),
            content_type: Some(XLSX_MIME.to_string()),
            bytes,
        }
    }

    async fn wait_terminal(service: &ImportService, job_id: &str) -> ImportJob {
        for _ in 0..200 {
            let job = service.job_status(job_id).await.unwrap();
            if job.job_status().is_terminal() {
                return job;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("job {} never reached a terminal state", job_id);
    }

    #[tokio::test]
    async fn test_document_preview_then_confirm_creates_chapter() {
        let (service, pool, storage, story_id) = setup().await;

        let docx = DocxBuilder::new()
            .heading(1, "Chapter 1: Smoke")
            .paragraph("The city burned quietly that night.")
            .image_paragraph("rId5")
            .media("rId5", "media/image1.png", &tiny_png_bytes())
            .build();

        let preview = service
            .submit_document_preview(
                &story_id,
                docx_file("smoke.docx", docx),
                ImportSettings::default(),
                Some("user-1".to_string()),
            )
            .await
            .unwrap();

        assert_eq!(preview.candidates.len(), 1);
        let candidate = &preview.candidates[0];
        assert_eq!(candidate.number, Some(1.0));
        assert_eq!(candidate.title, "Smoke");
        assert_eq!(candidate.image_count, 1);
        // Preview keeps the body renderable
        assert!(candidate.body.contains("data:image/png;base64,"));

        let job = service.job_status(&preview.job_id).await.unwrap();
        assert_eq!(job.job_status(), JobStatus::Processing);
        assert_eq!(job.progress, 75);
        assert!(job.source_key.is_some());

        let chapter = service
            .confirm_document(&story_id, &preview.job_id, ConfirmDocumentRequest::default())
            .await
            .unwrap();

        assert_eq!(chapter.chapter_number, 1.0);
        assert_eq!(chapter.title, "Smoke");
        assert_eq!(chapter.slug, "smoke");
        assert_eq!(chapter.status, "draft");
        assert!(chapter.content.contains("memory://media/"));
        assert!(!chapter.content.contains("data:"));

        let media = ChapterRepository::new(&pool)
            .list_media(&chapter.id)
            .await
            .unwrap();
        assert_eq!(media.len(), 1);
        assert!(media[0].thumbnail_url.is_some());

        let job = service.job_status(&preview.job_id).await.unwrap();
        assert_eq!(job.job_status(), JobStatus::Completed);
        assert_eq!(job.progress, 100);
        assert_eq!(job.chapters_created, 1);
        assert_eq!(job.images_extracted, 1);

        // The temporary source is gone once the chapter persists
        let source_key = job.source_key.unwrap();
        assert!(!storage.contains(&source_key).await);

        let story = StoryRepository::new(&pool)
            .get(&story_id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(story.chapter_count, 1);
        assert_eq!(story.word_count, chapter.word_count);
    }

    #[tokio::test]
    async fn test_document_confirm_renumbers_past_story_maximum() {
        let (service, _pool, _storage, story_id) = setup().await;

        let first = DocxBuilder::new()
            .heading(1, "Chapter 2: Original")
            .paragraph("the original second chapter")
            .build();
        let preview = service
            .submit_document_preview(
                &story_id,
                docx_file("two.docx", first),
                ImportSettings::default(),
                None,
            )
            .await
            .unwrap();
        service
            .confirm_document(&story_id, &preview.job_id, ConfirmDocumentRequest::default())
            .await
            .unwrap();

        let second = DocxBuilder::new()
            .heading(1, "Chapter 2: Duplicate")
            .paragraph("collides with the existing chapter")
            .build();
        let preview = service
            .submit_document_preview(
                &story_id,
                docx_file("dupe.docx", second),
                ImportSettings::default(),
                None,
            )
            .await
            .unwrap();
        let chapter = service
            .confirm_document(&story_id, &preview.job_id, ConfirmDocumentRequest::default())
            .await
            .unwrap();

        assert_eq!(chapter.chapter_number, 3.0);
        assert_eq!(chapter.title, "Duplicate");
    }

    #[tokio::test]
    async fn test_document_confirm_applies_overrides() {
        let (service, _pool, _storage, story_id) = setup().await;

        let docx = DocxBuilder::new()
            .heading(1, "Chapter 1: Draft Title")
            .paragraph("body text")
            .build();
        let preview = service
            .submit_document_preview(
                &story_id,
                docx_file("draft.docx", docx),
                ImportSettings::default(),
                None,
            )
            .await
            .unwrap();

        let chapter = service
            .confirm_document(
                &story_id,
                &preview.job_id,
                ConfirmDocumentRequest {
                    candidate_index: 0,
                    chapter_number: Some(7.5),
                    title: Some("Final Title".to_string()),
                    publish: Some(true),
                    premium: Some(true),
                },
            )
            .await
            .unwrap();

        assert_eq!(chapter.chapter_number, 7.5);
        assert_eq!(chapter.title, "Final Title");
        assert_eq!(chapter.status, "premium");
        assert!(chapter.is_published);
    }

    #[tokio::test]
    async fn test_filename_supplies_number_for_headingless_document() {
        let (service, _pool, _storage, story_id) = setup().await;

        let docx = DocxBuilder::new()
            .paragraph("just prose, no headings at all")
            .build();
        let preview = service
            .submit_document_preview(
                &story_id,
                docx_file("Chapter 3: The Return.docx", docx),
                ImportSettings::default(),
                None,
            )
            .await
            .unwrap();

        assert_eq!(preview.candidates.len(), 1);
        assert_eq!(preview.candidates[0].number, Some(3.0));
        assert_eq!(preview.candidates[0].title, "The Return");
    }

    #[tokio::test]
    async fn test_unparseable_upload_fails_job_synchronously() {
        let (service, _pool, _storage, story_id) = setup().await;

        let err = service
            .submit_document_preview(
                &story_id,
                docx_file("nope.docx", b"not a document".to_vec()),
                ImportSettings::default(),
                None,
            )
            .await
            .unwrap_err();
        assert!(matches!(err, ImportError::UnsupportedFormat(_)));

        // The rejected upload still leaves an audit record
        let jobs = service.jobs_for_story(&story_id).await.unwrap();
        assert_eq!(jobs.len(), 1);
        assert_eq!(jobs[0].job_status(), JobStatus::Failed);
        assert!(jobs[0].error_message.as_deref().unwrap_or("").contains("Unsupported"));
    }

    #[tokio::test]
    async fn test_candidate_out_of_range_keeps_job_confirmable() {
        let (service, _pool, _storage, story_id) = setup().await;

        let docx = DocxBuilder::new()
            .heading(1, "Chapter 1: Only One")
            .paragraph("content")
            .build();
        let preview = service
            .submit_document_preview(
                &story_id,
                docx_file("one.docx", docx),
                ImportSettings::default(),
                None,
            )
            .await
            .unwrap();

        let err = service
            .confirm_document(
                &story_id,
                &preview.job_id,
                ConfirmDocumentRequest {
                    candidate_index: 4,
                    ..Default::default()
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            ImportError::CandidateOutOfRange { index: 4, count: 1 }
        ));

        // The job survived the bad index and confirms fine afterwards
        service
            .confirm_document(&story_id, &preview.job_id, ConfirmDocumentRequest::default())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_confirm_rejects_terminal_and_foreign_jobs() {
        let (service, pool, _storage, story_id) = setup().await;

        let docx = DocxBuilder::new()
            .heading(1, "Chapter 1: Done")
            .paragraph("content")
            .build();
        let preview = service
            .submit_document_preview(
                &story_id,
                docx_file("done.docx", docx),
                ImportSettings::default(),
                None,
            )
            .await
            .unwrap();
        service
            .confirm_document(&story_id, &preview.job_id, ConfirmDocumentRequest::default())
            .await
            .unwrap();

        // Confirming a completed job conflicts
        let err = service
            .confirm_document(&story_id, &preview.job_id, ConfirmDocumentRequest::default())
            .await
            .unwrap_err();
        assert!(matches!(err, ImportError::JobNotConfirmable { .. }));

        // A job id under a different story reads as unknown
        let other = StoryRepository::new(&pool)
            .create("Other", "other", None)
            .await
            .unwrap();
        let err = service
            .confirm_document(&other.id, &preview.job_id, ConfirmDocumentRequest::default())
            .await
            .unwrap_err();
        assert!(matches!(err, ImportError::JobNotFound(_)));
    }

    #[tokio::test]
    async fn test_batch_preview_reports_conflicts() {
        let (service, _pool, _storage, story_id) = setup().await;

        // Chapter 1 exists before the batch arrives
        let docx = DocxBuilder::new()
            .heading(1, "Chapter 1: Existing")
            .paragraph("already here")
            .build();
        let preview = service
            .submit_document_preview(
                &story_id,
                docx_file("one.docx", docx),
                ImportSettings::default(),
                None,
            )
            .await
            .unwrap();
        service
            .confirm_document(&story_id, &preview.job_id, ConfirmDocumentRequest::default())
            .await
            .unwrap();

        let sheet = batch_sheet(&[
            (1.0, "Collides", "<p>a</p>", false, false),
            (2.0, "Free", "<p>b</p>", false, true),
        ]);
        let preview = service
            .submit_batch_preview(
                &story_id,
                xlsx_file("batch.xlsx", sheet),
                ImportSettings::default(),
                None,
            )
            .await
            .unwrap();

        assert_eq!(preview.rows.len(), 2);
        assert_eq!(preview.conflicts, vec![1.0]);

        let job = service.job_status(&preview.job_id).await.unwrap();
        assert_eq!(job.job_status(), JobStatus::Processing);
        assert_eq!(job.progress, 40);
    }

    #[tokio::test]
    async fn test_batch_confirm_skips_conflicts_and_completes() {
        let (service, pool, _storage, story_id) = setup().await;

        let docx = DocxBuilder::new()
            .heading(1, "Chapter 1: Existing")
            .paragraph("already here")
            .build();
        let doc_preview = service
            .submit_document_preview(
                &story_id,
                docx_file("one.docx", docx),
                ImportSettings::default(),
                None,
            )
            .await
            .unwrap();
        service
            .confirm_document(&story_id, &doc_preview.job_id, ConfirmDocumentRequest::default())
            .await
            .unwrap();

        let sheet = batch_sheet(&[
            (1.0, "Collides", "<p>a</p>", false, false),
            (2.0, "Second", "<p>b</p>", false, true),
            (3.0, "Third", "<p>c</p>", true, true),
        ]);
        let preview = service
            .submit_batch_preview(
                &story_id,
                xlsx_file("batch.xlsx", sheet),
                ImportSettings::default(),
                None,
            )
            .await
            .unwrap();
        service
            .confirm_batch(&story_id, &preview.job_id, ConfirmBatchRequest::default())
            .await
            .unwrap();

        let job = wait_terminal(&service, &preview.job_id).await;
        assert_eq!(job.job_status(), JobStatus::Completed);
        assert_eq!(job.chapters_created, 2);

        let errors = job.row_error_list();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].chapter_number, Some(1.0));
        assert!(errors[0].message.contains("already exists"));

        let numbers = ChapterRepository::new(&pool)
            .numbers(&story_id)
            .await
            .unwrap();
        assert_eq!(numbers, vec![1.0, 2.0, 3.0]);

        // Published/premium flags flow through to chapter status
        let chapters = ChapterRepository::new(&pool)
            .list_for_story(&story_id)
            .await
            .unwrap();
        let third = chapters
            .iter()
            .find(|c| c.chapter_number == 3.0)
            .unwrap();
        assert_eq!(third.status, "premium");
    }

    #[tokio::test]
    async fn test_batch_partial_failure_reports_created_and_errors() {
        let (service, _pool, _storage, story_id) = setup().await;

        // Five clean rows plus one duplicate number that will hit the
        // unique index during persistence
        let sheet = batch_sheet(&[
            (1.0, "One", "<p>a</p>", false, false),
            (2.0, "Two", "<p>b</p>", false, false),
            (3.0, "Three", "<p>c</p>", false, false),
            (4.0, "Four", "<p>d</p>", false, false),
            (5.0, "Five", "<p>e</p>", false, false),
            (5.0, "Five Again", "<p>f</p>", false, false),
        ]);
        let preview = service
            .submit_batch_preview(
                &story_id,
                xlsx_file("batch.xlsx", sheet),
                ImportSettings::default(),
                None,
            )
            .await
            .unwrap();
        assert!(preview.conflicts.is_empty());

        service
            .confirm_batch(&story_id, &preview.job_id, ConfirmBatchRequest::default())
            .await
            .unwrap();

        let job = wait_terminal(&service, &preview.job_id).await;
        assert_eq!(job.job_status(), JobStatus::Completed);
        assert_eq!(job.chapters_created, 5);

        let errors = job.row_error_list();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].title.as_deref(), Some("Five Again"));
    }

    #[tokio::test]
    async fn test_batch_confirm_honors_row_selection() {
        let (service, pool, _storage, story_id) = setup().await;

        let sheet = batch_sheet(&[
            (1.0, "One", "<p>a</p>", false, false),
            (2.0, "Two", "<p>b</p>", false, false),
            (3.0, "Three", "<p>c</p>", false, false),
        ]);
        let preview = service
            .submit_batch_preview(
                &story_id,
                xlsx_file("batch.xlsx", sheet),
                ImportSettings::default(),
                None,
            )
            .await
            .unwrap();

        service
            .confirm_batch(
                &story_id,
                &preview.job_id,
                ConfirmBatchRequest {
                    chapter_numbers: Some(vec![1.0, 3.0]),
                },
            )
            .await
            .unwrap();

        let job = wait_terminal(&service, &preview.job_id).await;
        assert_eq!(job.chapters_created, 2);

        let numbers = ChapterRepository::new(&pool)
            .numbers(&story_id)
            .await
            .unwrap();
        assert_eq!(numbers, vec![1.0, 3.0]);
    }

    #[tokio::test]
    async fn test_terminal_job_status_is_stable() {
        let (service, _pool, _storage, story_id) = setup().await;

        let sheet = batch_sheet(&[(1.0, "Only", "<p>a</p>", false, false)]);
        let preview = service
            .submit_batch_preview(
                &story_id,
                xlsx_file("batch.xlsx", sheet),
                ImportSettings::default(),
                None,
            )
            .await
            .unwrap();
        service
            .confirm_batch(&story_id, &preview.job_id, ConfirmBatchRequest::default())
            .await
            .unwrap();

        let first = wait_terminal(&service, &preview.job_id).await;
        tokio::time::sleep(Duration::from_millis(30)).await;
        let second = service.job_status(&preview.job_id).await.unwrap();

        assert_eq!(first.status, second.status);
        assert_eq!(first.progress, second.progress);
        assert_eq!(first.chapters_created, second.chapters_created);
        assert_eq!(first.error_message, second.error_message);
        assert_eq!(first.completed_at, second.completed_at);
    }

    #[tokio::test]
    async fn test_template_round_trips_through_batch_preview() {
        let (service, _pool, _storage, story_id) = setup().await;

        let template = service.batch_template().unwrap();
        let preview = service
            .submit_batch_preview(
                &story_id,
                xlsx_file("template.xlsx", template),
                ImportSettings::default(),
                None,
            )
            .await
            .unwrap();

        assert_eq!(preview.rows.len(), 3);
        assert!(preview.conflicts.is_empty());
        assert_eq!(preview.rows[0].title, "The Beginning");
        assert_eq!(preview.rows[2].number, Some(2.5));
    }

    #[tokio::test]
    async fn test_unknown_story_rejected_before_job_creation() {
        let (service, _pool, _storage, _story_id) = setup().await;

        let docx = DocxBuilder::new().paragraph("content").build();
        let err = service
            .submit_document_preview(
                "missing-story",
                docx_file("a.docx", docx),
                ImportSettings::default(),
                None,
            )
            .await
            .unwrap_err();
        assert!(matches!(err, ImportError::StoryNotFound(_)));
    }
}
