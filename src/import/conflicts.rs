//! Chapter-number conflict detection and per-story serialization
//!
//! Conflict checks and chapter creation race when two imports target the
//! same story, so confirmed imports hold a keyed async lock for their
//! story while they check and write. The unique index on live chapter
//! numbers backstops anything that still slips through.

use std::collections::HashMap;
use std::sync::Arc;

use sqlx::SqlitePool;
use tokio::sync::{Mutex, OwnedMutexGuard};

use crate::db::ChapterRepository;

use super::types::ImportError;

/// Candidate numbers that collide with the story's live chapters
///
/// Result order follows the candidate list; duplicates report once.
pub async fn find_conflicts(
    pool: &SqlitePool,
    story_id: &str,
    numbers: &[f64],
) -> Result<Vec<f64>, ImportError> {
    let existing = ChapterRepository::new(pool).numbers(story_id).await?;

    let mut conflicts: Vec<f64> = Vec::new();
    for number in numbers {
        if existing.contains(number) && !conflicts.contains(number) {
            conflicts.push(*number);
        }
    }
    Ok(conflicts)
}

/// Number assigned when a single-document candidate collides: one past
/// the story's current maximum
pub async fn next_number(pool: &SqlitePool, story_id: &str) -> Result<f64, ImportError> {
    let max = ChapterRepository::new(pool).max_number(story_id).await?;
    Ok(max.map(|m| m + 1.0).unwrap_or(1.0))
}

/// One async mutex per story id
///
/// Guards the conflict-check-then-create window. Lock entries are tiny
/// and stay in the map for the life of the process.
#[derive(Clone, Default)]
pub struct StoryLocks {
    inner: Arc<Mutex<HashMap<String, Arc<Mutex<()>>>>>,
}

impl StoryLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for exclusive access to a story's chapter-number space
    pub async fn acquire(&self, story_id: &str) -> OwnedMutexGuard<()> {
        let lock = {
            let mut map = self.inner.lock().await;
            map.entry(story_id.to_string())
                .or_insert_with(|| Arc::new(Mutex::new(())))
                .clone()
        };
        lock.lock_owned().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{create_test_pool, NewChapter, StoryRepository};
    use std::time::Duration;

    async fn seed_story_with_numbers(pool: &SqlitePool, numbers: &[f64]) -> String {
        let story = StoryRepository::new(pool)
            .create("Test Story", "test-story", None)
            .await
            .unwrap();
        let chapters = ChapterRepository::new(pool);
        for number in numbers {
            chapters
                .create(&NewChapter {
                    story_id: story.id.clone(),
                    chapter_number: *number,
                    title: format!("Chapter {}", number),
                    slug: format!("chapter-{}", number),
                    content: "<p>body</p>".to_string(),
                    word_count: 1,
                    reading_time_minutes: 1,
                    sort_order: *number,
                    is_published: false,
                    is_premium: false,
                    source_file: None,
                    imported_at: None,
                })
                .await
                .unwrap();
        }
        story.id
    }

    #[tokio::test]
    async fn test_find_conflicts_reports_collisions_in_candidate_order() {
        let pool = create_test_pool().await.unwrap();
        let story_id = seed_story_with_numbers(&pool, &[1.0, 2.0, 2.5]).await;

        let conflicts = find_conflicts(&pool, &story_id, &[2.5, 4.0, 1.0, 2.5])
            .await
            .unwrap();
        assert_eq!(conflicts, vec![2.5, 1.0]);
    }

    #[tokio::test]
    async fn test_find_conflicts_empty_when_numbers_free() {
        let pool = create_test_pool().await.unwrap();
        let story_id = seed_story_with_numbers(&pool, &[1.0]).await;

        let conflicts = find_conflicts(&pool, &story_id, &[3.0, 4.5]).await.unwrap();
        assert!(conflicts.is_empty());
    }

    #[tokio::test]
    async fn test_next_number_past_current_maximum() {
        let pool = create_test_pool().await.unwrap();

        let empty_story = seed_story_with_numbers(&pool, &[]).await;
        assert_eq!(next_number(&pool, &empty_story).await.unwrap(), 1.0);

        let story_id = seed_story_with_numbers(&pool, &[1.0, 2.5]).await;
        assert_eq!(next_number(&pool, &story_id).await.unwrap(), 3.5);
    }

    #[tokio::test]
    async fn test_story_locks_serialize_per_story() {
        let locks = StoryLocks::new();

        let held = locks.acquire("story-a").await;

        // A different story is not blocked
        let other = tokio::time::timeout(Duration::from_millis(50), locks.acquire("story-b")).await;
        assert!(other.is_ok());

        // The same story waits until the guard drops
        let blocked = tokio::time::timeout(Duration::from_millis(50), locks.acquire("story-a")).await;
        assert!(blocked.is_err());

        drop(held);
        let unblocked = tokio::time::timeout(Duration::from_millis(50), locks.acquire("story-a")).await;
        assert!(unblocked.is_ok());
    }
}
