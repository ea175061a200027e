//! Application state management

use std::sync::Arc;

use sqlx::SqlitePool;

use crate::config::Config;
use crate::import::ImportService;
use crate::storage::MediaStorage;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    inner: Arc<AppStateInner>,
}

struct AppStateInner {
    pub config: Config,
    pub db: SqlitePool,
    pub media: Arc<dyn MediaStorage>,
    pub imports: ImportService,
}

impl AppState {
    /// Create a new application state
    pub fn new(config: Config, db: SqlitePool, media: Arc<dyn MediaStorage>) -> Self {
        let imports = ImportService::new(
            db.clone(),
            media.clone(),
            config.import.max_concurrent_imports,
        );

        Self {
            inner: Arc::new(AppStateInner {
                config,
                db,
                media,
                imports,
            }),
        }
    }

    /// Get the configuration
    pub fn config(&self) -> &Config {
        &self.inner.config
    }

    /// Get the database pool
    pub fn db(&self) -> &SqlitePool {
        &self.inner.db
    }

    /// Get the media storage backend
    pub fn media(&self) -> &Arc<dyn MediaStorage> {
        &self.inner.media
    }

    /// Get the import service
    pub fn imports(&self) -> &ImportService {
        &self.inner.imports
    }

    /// Stop background import work before the application exits
    pub async fn shutdown(&self) {
        tracing::info!("Shutting down application state...");
        self.inner.imports.shutdown().await;
    }
}
