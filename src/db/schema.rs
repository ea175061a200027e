//! Database schema initialization

use sqlx::SqlitePool;

use crate::error::Result;

/// Initialize the database schema
pub async fn initialize_schema(pool: &SqlitePool) -> Result<()> {
    sqlx::query(SCHEMA_SQL)
        .execute(pool)
        .await?;

    Ok(())
}

const SCHEMA_SQL: &str = r#"
-- Stories table (aggregate fields maintained by the import pipeline)
CREATE TABLE IF NOT EXISTS stories (
    id TEXT PRIMARY KEY,
    title TEXT NOT NULL,
    slug TEXT NOT NULL,
    author_id TEXT,
    word_count INTEGER NOT NULL DEFAULT 0,
    chapter_count INTEGER NOT NULL DEFAULT 0,
    created_at TEXT NOT NULL DEFAULT (datetime('now')),
    updated_at TEXT NOT NULL DEFAULT (datetime('now'))
);

CREATE INDEX IF NOT EXISTS idx_stories_slug ON stories(slug);

-- Chapters table
CREATE TABLE IF NOT EXISTS chapters (
    id TEXT PRIMARY KEY,
    story_id TEXT NOT NULL,
    -- Decimal so side chapters like 1.5 sort between whole numbers
    chapter_number REAL NOT NULL,
    title TEXT NOT NULL,
    slug TEXT NOT NULL,
    content TEXT NOT NULL,
    word_count INTEGER NOT NULL DEFAULT 0,
    reading_time_minutes INTEGER NOT NULL DEFAULT 1,
    -- Display order is independent of chapter number so reordering
    -- never forces renumbering
    sort_order REAL NOT NULL,
    -- 'draft', 'free' or 'premium'
    status TEXT NOT NULL DEFAULT 'draft',
    is_published INTEGER NOT NULL DEFAULT 0,
    is_premium INTEGER NOT NULL DEFAULT 0,
    -- Provenance when created by the import pipeline
    source_file TEXT,
    imported_at TEXT,
    deleted_at TEXT,
    created_at TEXT NOT NULL DEFAULT (datetime('now')),
    updated_at TEXT NOT NULL DEFAULT (datetime('now'))
);

CREATE INDEX IF NOT EXISTS idx_chapters_story_id ON chapters(story_id);
CREATE INDEX IF NOT EXISTS idx_chapters_sort_order ON chapters(story_id, sort_order);
-- Chapter numbers are unique per story among live rows
CREATE UNIQUE INDEX IF NOT EXISTS idx_chapters_story_number
    ON chapters(story_id, chapter_number) WHERE deleted_at IS NULL;

-- Relocated media per chapter (ordered by position)
CREATE TABLE IF NOT EXISTS chapter_media (
    id TEXT PRIMARY KEY,
    chapter_id TEXT NOT NULL,
    position INTEGER NOT NULL,
    media_url TEXT NOT NULL,
    thumbnail_url TEXT,
    content_type TEXT NOT NULL,
    display_name TEXT NOT NULL,
    uploaded_by TEXT,
    created_at TEXT NOT NULL DEFAULT (datetime('now'))
);

CREATE INDEX IF NOT EXISTS idx_chapter_media_chapter_id ON chapter_media(chapter_id);

-- Import jobs (audit trail; rows are never deleted, only marked terminal)
CREATE TABLE IF NOT EXISTS import_jobs (
    id TEXT PRIMARY KEY,
    file_name TEXT NOT NULL,
    file_size INTEGER NOT NULL,
    mime_type TEXT NOT NULL,
    -- 'document' or 'batch'
    kind TEXT NOT NULL,
    story_id TEXT,
    uploader_id TEXT,
    -- 'pending', 'processing', 'completed' or 'failed'
    status TEXT NOT NULL DEFAULT 'pending',
    progress INTEGER NOT NULL DEFAULT 0,
    chapters_created INTEGER NOT NULL DEFAULT 0,
    images_extracted INTEGER NOT NULL DEFAULT 0,
    error_message TEXT,
    -- JSON array of per-row errors collected during batch persistence
    row_errors TEXT NOT NULL DEFAULT '[]',
    -- JSON settings blob (starting number, publish/premium flags)
    settings TEXT NOT NULL DEFAULT '{}',
    -- Key of the temporarily stored source object
    source_key TEXT,
    created_at TEXT NOT NULL DEFAULT (datetime('now')),
    started_at TEXT,
    completed_at TEXT
);

CREATE INDEX IF NOT EXISTS idx_import_jobs_story_id ON import_jobs(story_id);
CREATE INDEX IF NOT EXISTS idx_import_jobs_status ON import_jobs(status);
CREATE INDEX IF NOT EXISTS idx_import_jobs_created_at ON import_jobs(created_at);
"#;
