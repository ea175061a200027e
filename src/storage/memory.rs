//! In-process storage backend
//!
//! Holds objects in a map. Used by tests and by the `memory` storage
//! provider for credential-free local development; contents vanish on
//! restart.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::error::{AppError, Result, StorageError};

use super::{render_thumbnail, sanitize_object_name, MediaStorage, StoredMedia};

struct StoredObject {
    data: Vec<u8>,
    content_type: String,
}

/// Map-backed media storage
#[derive(Clone, Default)]
pub struct MemoryStorage {
    objects: Arc<RwLock<HashMap<String, StoredObject>>>,
    fail_media_stores: Arc<AtomicBool>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make subsequent `store_media` calls fail, for degradation tests
    pub fn set_fail_media_stores(&self, fail: bool) {
        self.fail_media_stores.store(fail, Ordering::SeqCst);
    }

    /// Number of stored objects
    pub async fn object_count(&self) -> usize {
        self.objects.read().await.len()
    }

    /// Whether an object exists under the given key
    pub async fn contains(&self, key: &str) -> bool {
        self.objects.read().await.contains_key(key)
    }

    /// Bytes and content type of a stored object
    pub async fn get_object(&self, key: &str) -> Option<(Vec<u8>, String)> {
        self.objects
            .read()
            .await
            .get(key)
            .map(|o| (o.data.clone(), o.content_type.clone()))
    }

    async fn insert(&self, key: &str, data: &[u8], content_type: &str) {
        self.objects.write().await.insert(
            key.to_string(),
            StoredObject {
                data: data.to_vec(),
                content_type: content_type.to_string(),
            },
        );
    }
}

#[async_trait]
impl MediaStorage for MemoryStorage {
    async fn store_media(
        &self,
        data: &[u8],
        content_type: &str,
        display_name: &str,
        _uploader_id: Option<&str>,
    ) -> Result<StoredMedia> {
        if self.fail_media_stores.load(Ordering::SeqCst) {
            return Err(AppError::Storage(StorageError::SdkError(
                "media store failure injected".to_string(),
            )));
        }

        let key = format!(
            "media/{}/{}",
            Uuid::new_v4(),
            sanitize_object_name(display_name)
        );
        self.insert(&key, data, content_type).await;

        let thumbnail_url = match render_thumbnail(data) {
            Some(thumb) => {
                let thumb_key = format!("{}.thumb.jpg", key);
                self.insert(&thumb_key, &thumb, "image/jpeg").await;
                Some(format!("memory://{}", thumb_key))
            }
            None => None,
        };

        Ok(StoredMedia {
            url: format!("memory://{}", key),
            thumbnail_url,
            key,
        })
    }

    async fn put_source(&self, key: &str, data: &[u8], content_type: &str) -> Result<()> {
        self.insert(key, data, content_type).await;
        Ok(())
    }

    async fn fetch_source(&self, key: &str) -> Result<Vec<u8>> {
        self.objects
            .read()
            .await
            .get(key)
            .map(|o| o.data.clone())
            .ok_or_else(|| AppError::Storage(StorageError::ObjectNotFound(key.to_string())))
    }

    async fn delete_source(&self, key: &str) -> Result<()> {
        self.objects.write().await.remove(key);
        Ok(())
    }
}
