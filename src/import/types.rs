//! Types for the document import pipeline

use serde::{Deserialize, Serialize};

use crate::db::RowError;

// ============================================================================
// Constants
// ============================================================================

/// Maximum number of chapter rows accepted in one batch sheet
pub const MAX_BATCH_ROWS: usize = 50;

/// Reading speed used for estimated reading time
pub const WORDS_PER_MINUTE: i64 = 200;

/// Maximum accepted upload size: 20MB
pub const MAX_UPLOAD_SIZE: usize = 20 * 1024 * 1024;

/// Declared media type of DOCX uploads
pub const DOCX_MIME: &str =
    "application/vnd.openxmlformats-officedocument.wordprocessingml.document";

/// Declared media type of XLSX uploads
pub const XLSX_MIME: &str =
    "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet";

// ============================================================================
// Settings
// ============================================================================

/// Per-job import settings, stored as the job's opaque settings blob
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ImportSettings {
    /// Chapter number to use when neither content nor filename yields one
    pub starting_number: Option<f64>,

    /// Publish chapters as soon as they are created
    pub publish_on_import: bool,

    /// Mark published chapters premium
    pub premium_on_import: bool,
}

// ============================================================================
// Candidates
// ============================================================================

/// A proposed chapter extracted from an upload, not yet persisted
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChapterCandidate {
    /// Decimal chapter number; side chapters like 1.5 are valid.
    /// Absent when neither content nor filename yielded one.
    pub number: Option<f64>,

    pub title: String,

    /// Body markup. At preview time embedded images are still inline
    /// data URIs so the caller can render the candidate as-is.
    pub body: String,

    pub word_count: i64,

    /// Embedded images found in the body
    pub image_count: i64,
}

/// An embedded image pulled out of candidate markup
///
/// Lives only between extraction and relocation; after relocation the
/// body references the stored media address instead.
#[derive(Debug, Clone, PartialEq)]
pub struct ExtractedImage {
    pub data: Vec<u8>,
    pub content_type: String,
    pub display_name: String,
}

/// One validated row of a batch sheet
#[derive(Debug, Clone, PartialEq)]
pub struct BatchRow {
    /// 1-based sheet row this record came from
    pub row: i64,
    pub chapter_number: f64,
    pub title: String,
    pub content: String,
    pub is_premium: bool,
    pub is_published: bool,
}

impl BatchRow {
    /// Render the row as a preview candidate
    pub fn to_candidate(&self) -> ChapterCandidate {
        ChapterCandidate {
            number: Some(self.chapter_number),
            title: self.title.clone(),
            body: self.content.clone(),
            word_count: super::text::word_count(&self.content),
            image_count: 0,
        }
    }
}

// ============================================================================
// Errors
// ============================================================================

/// Import pipeline errors
#[derive(Debug, thiserror::Error)]
pub enum ImportError {
    #[error("Unsupported file format: {0}")]
    UnsupportedFormat(String),

    #[error("Failed to parse document: {0}")]
    ParseFailure(String),

    #[error("Document contains no readable content")]
    EmptyDocument,

    #[error("{} row(s) failed validation", .0.len())]
    ValidationFailure(Vec<RowError>),

    #[error("Batch sheet contains no chapter rows")]
    EmptyBatch,

    #[error("Batch sheet has {rows} rows (maximum {max})")]
    BatchTooLarge { rows: usize, max: usize },

    #[error("Story not found: {0}")]
    StoryNotFound(String),

    #[error("Import job not found: {0}")]
    JobNotFound(String),

    #[error("Import job {id} is {status} and cannot be confirmed")]
    JobNotConfirmable { id: String, status: String },

    #[error("Candidate index {index} out of range ({count} candidates)")]
    CandidateOutOfRange { index: usize, count: usize },

    #[error("No file provided. Use multipart field name 'file'")]
    MissingFile,

    #[error("Invalid upload: {0}")]
    InvalidUpload(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl ImportError {
    /// Get HTTP status code for this error
    pub fn status_code(&self) -> axum::http::StatusCode {
        use axum::http::StatusCode;
        match self {
            Self::UnsupportedFormat(_) => StatusCode::UNSUPPORTED_MEDIA_TYPE,
            Self::ParseFailure(_) => StatusCode::UNPROCESSABLE_ENTITY,
            Self::EmptyDocument => StatusCode::UNPROCESSABLE_ENTITY,
            Self::ValidationFailure(_) => StatusCode::UNPROCESSABLE_ENTITY,
            Self::EmptyBatch => StatusCode::UNPROCESSABLE_ENTITY,
            Self::BatchTooLarge { .. } => StatusCode::UNPROCESSABLE_ENTITY,
            Self::StoryNotFound(_) => StatusCode::NOT_FOUND,
            Self::JobNotFound(_) => StatusCode::NOT_FOUND,
            Self::JobNotConfirmable { .. } => StatusCode::CONFLICT,
            Self::CandidateOutOfRange { .. } => StatusCode::BAD_REQUEST,
            Self::MissingFile => StatusCode::BAD_REQUEST,
            Self::InvalidUpload(_) => StatusCode::BAD_REQUEST,
            Self::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::Database(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Row errors attached to this failure, if any
    pub fn row_errors(&self) -> Option<&[RowError]> {
        match self {
            Self::ValidationFailure(errors) => Some(errors),
            _ => None,
        }
    }
}

impl From<crate::error::AppError> for ImportError {
    fn from(err: crate::error::AppError) -> Self {
        match err {
            crate::error::AppError::Database(e) => ImportError::Database(e),
            crate::error::AppError::Storage(e) => ImportError::Storage(e.to_string()),
            crate::error::AppError::NotFound(msg) => ImportError::Internal(msg),
            other => ImportError::Internal(other.to_string()),
        }
    }
}
