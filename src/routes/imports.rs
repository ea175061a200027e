//! Import Routes
//!
//! HTTP endpoints for the two-phase chapter import flow.
//!
//! Endpoints:
//! - POST /api/v1/imports/stories/:story_id/document - Preview a DOCX manuscript
//! - POST /api/v1/imports/stories/:story_id/document/confirm - Persist one candidate
//! - POST /api/v1/imports/stories/:story_id/batch - Preview an XLSX batch sheet
//! - POST /api/v1/imports/stories/:story_id/batch/confirm - Start the batch import
//! - GET /api/v1/imports/jobs/:job_id - Get job status
//! - GET /api/v1/imports/stories/:story_id/jobs - List a story's jobs
//! - GET /api/v1/imports/template - Download the batch sheet template

use axum::{
    body::Body,
    extract::{DefaultBodyLimit, Multipart, Path, State},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};

use crate::db::{Chapter, ImportJob, RowError};
use crate::import::{
    BatchPreview, ConfirmBatchRequest, ConfirmDocumentRequest, DocumentPreview, ImportError,
    ImportSettings, UploadedFile, DOCX_MIME, MAX_UPLOAD_SIZE, XLSX_MIME,
};
use crate::state::AppState;

/// Filename offered for the downloadable batch template
const TEMPLATE_FILENAME: &str = "chapter-batch-template.xlsx";

// ============================================================================
// Error Response
// ============================================================================

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ErrorResponse {
    error: String,
    code: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    row_errors: Option<Vec<RowError>>,
}

impl IntoResponse for ImportError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let code = match &self {
            ImportError::UnsupportedFormat(_) => "UNSUPPORTED_FORMAT",
            ImportError::ParseFailure(_) => "PARSE_FAILURE",
            ImportError::EmptyDocument => "EMPTY_DOCUMENT",
            ImportError::ValidationFailure(_) => "VALIDATION_FAILURE",
            ImportError::EmptyBatch => "EMPTY_BATCH",
            ImportError::BatchTooLarge { .. } => "BATCH_TOO_LARGE",
            ImportError::StoryNotFound(_) => "STORY_NOT_FOUND",
            ImportError::JobNotFound(_) => "JOB_NOT_FOUND",
            ImportError::JobNotConfirmable { .. } => "JOB_NOT_CONFIRMABLE",
            ImportError::CandidateOutOfRange { .. } => "CANDIDATE_OUT_OF_RANGE",
            ImportError::MissingFile => "MISSING_FILE",
            ImportError::InvalidUpload(_) => "INVALID_UPLOAD",
            ImportError::Storage(_) => "STORAGE_ERROR",
            ImportError::Database(_) => "DATABASE_ERROR",
            ImportError::Internal(_) => "INTERNAL_ERROR",
        };

        let body = Json(ErrorResponse {
            error: self.to_string(),
            code: code.to_string(),
            row_errors: self.row_errors().map(|errors| errors.to_vec()),
        });

        (status, body).into_response()
    }
}

// ============================================================================
// Response Types
// ============================================================================

/// Public view of an import job record
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JobView {
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
    pub row_errors: Vec<RowError>,
    pub created_at: String,
    pub started_at: Option<String>,
    pub completed_at: Option<String>,
}

impl From<ImportJob> for JobView {
    fn from(job: ImportJob) -> Self {
        let row_errors = job.row_error_list();
        Self {
            id: job.id,
            file_name: job.file_name,
            file_size: job.file_size,
            mime_type: job.mime_type,
            kind: job.kind,
            story_id: job.story_id,
            uploader_id: job.uploader_id,
            status: job.status,
            progress: job.progress,
            chapters_created: job.chapters_created,
            images_extracted: job.images_extracted,
            error_message: job.error_message,
            row_errors,
            created_at: job.created_at,
            started_at: job.started_at,
            completed_at: job.completed_at,
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct JobListResponse {
    jobs: Vec<JobView>,
    total: usize,
}

/// Acknowledgement that a batch import was handed to the background worker
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct BatchStarted {
    job_id: String,
    status: String,
}

// ============================================================================
// Request Types
// ============================================================================

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ConfirmDocumentBody {
    job_id: String,
    #[serde(flatten)]
    request: ConfirmDocumentRequest,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ConfirmBatchBody {
    job_id: String,
    #[serde(flatten)]
    request: ConfirmBatchRequest,
}

// ============================================================================
// Router
// ============================================================================

/// Create the imports router
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/stories/:story_id/document", post(preview_document))
        .route("/stories/:story_id/document/confirm", post(confirm_document))
        .route("/stories/:story_id/batch", post(preview_batch))
        .route("/stories/:story_id/batch/confirm", post(confirm_batch))
        .route("/stories/:story_id/jobs", get(list_jobs))
        .route("/jobs/:job_id", get(get_job))
        .route("/template", get(download_template))
        .layer(DefaultBodyLimit::max(MAX_UPLOAD_SIZE))
}

// ============================================================================
// Handlers
// ============================================================================

/// POST /api/v1/imports/stories/:story_id/document
///
/// Upload a manuscript and get back chapter candidates. Nothing persists
/// until the matching confirm call.
async fn preview_document(
    State(state): State<AppState>,
    Path(story_id): Path<String>,
    headers: HeaderMap,
    multipart: Multipart,
) -> Result<Json<DocumentPreview>, ImportError> {
    let uploader_id = uploader_from_headers(&headers);
    let (file, settings) = read_upload(multipart).await?;
    require_format(&file, ".docx", DOCX_MIME)?;

    let preview = state
        .imports()
        .submit_document_preview(&story_id, file, settings, uploader_id)
        .await?;

    tracing::info!(
        job_id = %preview.job_id,
        story_id = %story_id,
        candidates = preview.candidates.len(),
        warnings = preview.warnings.len(),
        "Document preview ready"
    );
    Ok(Json(preview))
}

/// POST /api/v1/imports/stories/:story_id/document/confirm
///
/// Persist one previewed candidate as a chapter.
async fn confirm_document(
    State(state): State<AppState>,
    Path(story_id): Path<String>,
    Json(body): Json<ConfirmDocumentBody>,
) -> Result<Json<Chapter>, ImportError> {
    let chapter = state
        .imports()
        .confirm_document(&story_id, &body.job_id, body.request)
        .await?;

    tracing::info!(
        job_id = %body.job_id,
        chapter_id = %chapter.id,
        chapter_number = %chapter.chapter_number,
        "Document import confirmed"
    );
    Ok(Json(chapter))
}

/// POST /api/v1/imports/stories/:story_id/batch
///
/// Upload a batch sheet and get back validated rows plus any chapter
/// number conflicts. Validation is all-or-nothing; a sheet with any bad
/// row is rejected with the full error list.
async fn preview_batch(
    State(state): State<AppState>,
    Path(story_id): Path<String>,
    headers: HeaderMap,
    multipart: Multipart,
) -> Result<Json<BatchPreview>, ImportError> {
    let uploader_id = uploader_from_headers(&headers);
    let (file, settings) = read_upload(multipart).await?;
    require_format(&file, ".xlsx", XLSX_MIME)?;

    let preview = state
        .imports()
        .submit_batch_preview(&story_id, file, settings, uploader_id)
        .await?;

    tracing::info!(
        job_id = %preview.job_id,
        story_id = %story_id,
        rows = preview.rows.len(),
        conflicts = preview.conflicts.len(),
        "Batch preview ready"
    );
    Ok(Json(preview))
}

/// POST /api/v1/imports/stories/:story_id/batch/confirm
///
/// Start the confirmed batch import in the background. Returns 202; poll
/// the job endpoint for the outcome.
async fn confirm_batch(
    State(state): State<AppState>,
    Path(story_id): Path<String>,
    Json(body): Json<ConfirmBatchBody>,
) -> Result<(StatusCode, Json<BatchStarted>), ImportError> {
    let job = state
        .imports()
        .confirm_batch(&story_id, &body.job_id, body.request)
        .await?;

    tracing::info!(job_id = %job.id, story_id = %story_id, "Batch import started");
    Ok((
        StatusCode::ACCEPTED,
        Json(BatchStarted {
            job_id: job.id,
            status: job.status,
        }),
    ))
}

/// GET /api/v1/imports/jobs/:job_id
///
/// Current status, progress, and error detail for one job.
async fn get_job(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> Result<Json<JobView>, ImportError> {
    let job = state.imports().job_status(&job_id).await?;
    Ok(Json(job.into()))
}

/// GET /api/v1/imports/stories/:story_id/jobs
///
/// Import history for a story, newest first.
async fn list_jobs(
    State(state): State<AppState>,
    Path(story_id): Path<String>,
) -> Result<Json<JobListResponse>, ImportError> {
    let jobs: Vec<JobView> = state
        .imports()
        .jobs_for_story(&story_id)
        .await?
        .into_iter()
        .map(JobView::from)
        .collect();
    let total = jobs.len();
    Ok(Json(JobListResponse { jobs, total }))
}

/// GET /api/v1/imports/template
///
/// Download the XLSX template authors fill in for batch imports.
async fn download_template(State(state): State<AppState>) -> Result<Response, ImportError> {
    let bytes = state.imports().batch_template()?;

    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, XLSX_MIME)
        .header(header::CONTENT_LENGTH, bytes.len())
        .header(
            header::CONTENT_DISPOSITION,
            format!("attachment; filename=\"{}\"", TEMPLATE_FILENAME),
        )
        .body(Body::from(bytes))
        .map_err(|e| ImportError::Internal(e.to_string()))
}

// ============================================================================
// Helpers
// ============================================================================

fn uploader_from_headers(headers: &HeaderMap) -> Option<String> {
    headers
        .get("X-Uploader-Id")
        .and_then(|v| v.to_str().ok())
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// Read the uploaded file and inline settings fields from a multipart form
///
/// The file travels in the `file` field; `startingNumber`,
/// `publishOnImport`, and `premiumOnImport` ride alongside as plain text
/// fields.
async fn read_upload(
    mut multipart: Multipart,
) -> Result<(UploadedFile, ImportSettings), ImportError> {
    let mut file: Option<UploadedFile> = None;
    let mut settings = ImportSettings::default();

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ImportError::InvalidUpload(e.to_string()))?
    {
        let name = field.name().unwrap_or("").to_string();
        match name.as_str() {
            "file" => {
                let filename = field
                    .file_name()
                    .map(|s| s.to_string())
                    .unwrap_or_else(|| "upload".to_string());
                let content_type = field.content_type().map(|s| s.to_string());
                let bytes = field
                    .bytes()
                    .await
                    .map_err(|e| ImportError::InvalidUpload(e.to_string()))?;
                file = Some(UploadedFile {
                    filename,
                    content_type,
                    bytes: bytes.to_vec(),
                });
            }
            "startingNumber" => {
                let text = field
                    .text()
                    .await
                    .map_err(|e| ImportError::InvalidUpload(e.to_string()))?;
                let value: f64 = text.trim().parse().map_err(|_| {
                    ImportError::InvalidUpload(format!("'{}' is not a chapter number", text))
                })?;
                settings.starting_number = Some(value);
            }
            "publishOnImport" => {
                settings.publish_on_import = flag_field(field).await?;
            }
            "premiumOnImport" => {
                settings.premium_on_import = flag_field(field).await?;
            }
            _ => {
                // Unknown fields are ignored so clients can evolve
                let _ = field.bytes().await;
            }
        }
    }

    let file = file.ok_or(ImportError::MissingFile)?;
    if file.bytes.is_empty() {
        return Err(ImportError::InvalidUpload("uploaded file is empty".to_string()));
    }
    Ok((file, settings))
}

async fn flag_field(field: axum::extract::multipart::Field<'_>) -> Result<bool, ImportError> {
    let text = field
        .text()
        .await
        .map_err(|e| ImportError::InvalidUpload(e.to_string()))?;
    Ok(text.trim().eq_ignore_ascii_case("true"))
}

/// Reject uploads that are not even the right container before parsing
fn require_format(file: &UploadedFile, extension: &str, mime: &str) -> Result<(), ImportError> {
    let name_matches = file
        .filename
        .to_ascii_lowercase()
        .ends_with(&extension.to_ascii_lowercase());
    let mime_matches = file.content_type.as_deref() == Some(mime);

    if name_matches || mime_matches {
        Ok(())
    } else {
        Err(ImportError::UnsupportedFormat(format!(
            "expected a {} upload, got '{}'",
            extension, file.filename
        )))
    }
}
