//! S3-compatible storage backend
//!
//! Wraps the AWS SDK for S3-compatible object stores (MinIO, R2, B2, AWS).

use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_sdk_s3::{
    config::{Credentials, Region},
    primitives::ByteStream,
    Client,
};
use uuid::Uuid;

use crate::config::StorageConfig;
use crate::error::{AppError, Result, StorageError};

use super::{render_thumbnail, sanitize_object_name, MediaStorage, StoredMedia};

/// S3-backed media storage
#[derive(Clone)]
pub struct S3Storage {
    client: Client,
    bucket: String,
    public_base: String,
}

impl S3Storage {
    /// Create a new S3 storage backend from configuration
    pub async fn new(config: &StorageConfig) -> Result<Self> {
        let credentials = Credentials::new(
            &config.access_key,
            &config.secret_key,
            None,
            None,
            "fableport",
        );

        let region = config
            .region
            .clone()
            .unwrap_or_else(|| "us-east-1".to_string());

        let s3_config = aws_sdk_s3::Config::builder()
            .behavior_version(BehaviorVersion::latest())
            .endpoint_url(&config.endpoint)
            .region(Region::new(region))
            .credentials_provider(credentials)
            .force_path_style(true) // Required for MinIO and other S3-compatible services
            .build();

        let client = Client::from_conf(s3_config);

        // Test connection by checking if bucket exists
        let bucket = config.bucket.clone();
        match client.head_bucket().bucket(&bucket).send().await {
            Ok(_) => {
                tracing::info!("Connected to S3 bucket: {}", bucket);
            }
            Err(e) => {
                tracing::warn!(
                    "Could not verify bucket {}: {}. Will attempt operations anyway.",
                    bucket,
                    e
                );
            }
        }

        let public_base = config
            .public_url
            .clone()
            .unwrap_or_else(|| format!("{}/{}", config.endpoint.trim_end_matches('/'), bucket))
            .trim_end_matches('/')
            .to_string();

        Ok(Self {
            client,
            bucket,
            public_base,
        })
    }

    /// Public address of an object key
    fn public_url(&self, key: &str) -> String {
        format!("{}/{}", self.public_base, key)
    }

    async fn put_object(
        &self,
        key: &str,
        data: Vec<u8>,
        content_type: &str,
        uploader_id: Option<&str>,
    ) -> Result<()> {
        let mut request = self
            .client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .content_type(content_type)
            .body(ByteStream::from(data));

        if let Some(uploader) = uploader_id {
            request = request.metadata("uploaded-by", uploader);
        }

        request
            .send()
            .await
            .map_err(|e| map_sdk_error(key, &e.to_string()))?;

        Ok(())
    }
}

fn map_sdk_error(key: &str, message: &str) -> AppError {
    if message.contains("404") || message.contains("NoSuchKey") {
        AppError::Storage(StorageError::ObjectNotFound(key.to_string()))
    } else if message.contains("403") || message.contains("AccessDenied") {
        AppError::Storage(StorageError::AccessDenied(key.to_string()))
    } else {
        AppError::Storage(StorageError::SdkError(format!("{}: {}", key, message)))
    }
}

#[async_trait]
impl MediaStorage for S3Storage {
    async fn store_media(
        &self,
        data: &[u8],
        content_type: &str,
        display_name: &str,
        uploader_id: Option<&str>,
    ) -> Result<StoredMedia> {
        let key = format!(
            "media/{}/{}",
            Uuid::new_v4(),
            sanitize_object_name(display_name)
        );

        self.put_object(&key, data.to_vec(), content_type, uploader_id)
            .await?;

        let thumbnail_url = match render_thumbnail(data) {
            Some(thumb) => {
                let thumb_key = format!("{}.thumb.jpg", key);
                self.put_object(&thumb_key, thumb, "image/jpeg", uploader_id)
                    .await?;
                Some(self.public_url(&thumb_key))
            }
            None => {
                tracing::warn!(key = %key, "Could not render thumbnail, publishing original only");
                None
            }
        };

        Ok(StoredMedia {
            url: self.public_url(&key),
            thumbnail_url,
            key,
        })
    }

    async fn put_source(&self, key: &str, data: &[u8], content_type: &str) -> Result<()> {
        self.put_object(key, data.to_vec(), content_type, None).await
    }

    async fn fetch_source(&self, key: &str) -> Result<Vec<u8>> {
        let response = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| map_sdk_error(key, &e.to_string()))?;

        let data = response
            .body
            .collect()
            .await
            .map_err(|e| StorageError::SdkError(format!("Failed to read object body: {}", e)))?
            .into_bytes()
            .to_vec();

        Ok(data)
    }

    async fn delete_source(&self, key: &str) -> Result<()> {
        self.client
            .delete_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| map_sdk_error(key, &e.to_string()))?;

        Ok(())
    }
}
