//! Document and batch import pipeline
//!
//! Turns uploaded DOCX manuscripts into chapter candidates (splitting on
//! headings, extracting embedded images) and uploaded XLSX sheets into
//! validated chapter rows, then persists confirmed candidates as chapters
//! under progress-tracked import jobs.

mod conflicts;
mod docx;
mod images;
mod service;
mod sheet;
mod splitter;
mod template;
#[cfg(test)]
pub(crate) mod test_fixtures;
mod text;
mod types;

pub use conflicts::{find_conflicts, next_number, StoryLocks};
pub use docx::{parse_docx, DocBlock, ParsedDocument};
pub use images::{extract_embedded_images, relocate_images, ExtractionResult};
pub use service::{
    BatchPreview, ConfirmBatchRequest, ConfirmDocumentRequest, DocumentPreview, ImportService,
    UploadedFile,
};
pub use sheet::read_batch_sheet;
pub use splitter::{split_chapters, SplitResult};
pub use template::batch_template_xlsx;
pub use text::{format_number, reading_time_minutes, slugify, strip_tags, word_count};
pub use types::{
    BatchRow, ChapterCandidate, ExtractedImage, ImportError, ImportSettings, DOCX_MIME,
    MAX_BATCH_ROWS, MAX_UPLOAD_SIZE, WORDS_PER_MINUTE, XLSX_MIME,
};
