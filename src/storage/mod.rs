//! Durable object storage for relocated media and temporary source files
//!
//! The import pipeline talks to storage through the [`MediaStorage`] trait
//! so the service can run against S3-compatible object stores in production
//! and an in-process map in tests and development.

mod memory;
mod s3;

pub use memory::MemoryStorage;
pub use s3::S3Storage;

use std::io::Cursor;

use async_trait::async_trait;

use crate::error::Result;

/// Longest edge of generated thumbnails, in pixels
const THUMBNAIL_MAX_DIM: u32 = 480;

/// Addresses of a stored media object
#[derive(Debug, Clone)]
pub struct StoredMedia {
    /// Permanent public address of the original payload
    pub url: String,

    /// Public address of the generated thumbnail, when one could be rendered
    pub thumbnail_url: Option<String>,

    /// Object key of the original payload
    pub key: String,
}

/// Storage backend used by the import pipeline
#[async_trait]
pub trait MediaStorage: Send + Sync {
    /// Store an image payload permanently, alongside a generated thumbnail
    async fn store_media(
        &self,
        data: &[u8],
        content_type: &str,
        display_name: &str,
        uploader_id: Option<&str>,
    ) -> Result<StoredMedia>;

    /// Store an uploaded source file under a caller-chosen key
    async fn put_source(&self, key: &str, data: &[u8], content_type: &str) -> Result<()>;

    /// Read back a stored source file
    async fn fetch_source(&self, key: &str) -> Result<Vec<u8>>;

    /// Delete a stored source file
    async fn delete_source(&self, key: &str) -> Result<()>;
}

/// Render a JPEG thumbnail bounded to [`THUMBNAIL_MAX_DIM`] pixels
///
/// Returns `None` when the payload is not a decodable image; callers fall
/// back to publishing the original without a thumbnail.
fn render_thumbnail(data: &[u8]) -> Option<Vec<u8>> {
    let img = image::load_from_memory(data).ok()?;
    let thumb = img.thumbnail(THUMBNAIL_MAX_DIM, THUMBNAIL_MAX_DIM);

    // JPEG has no alpha channel, so flatten first
    let rgb = image::DynamicImage::ImageRgb8(thumb.to_rgb8());
    let mut out = Cursor::new(Vec::new());
    rgb.write_to(&mut out, image::ImageFormat::Jpeg).ok()?;

    Some(out.into_inner())
}

/// Make a display name safe for use inside an object key
pub(crate) fn sanitize_object_name(name: &str) -> String {
    let cleaned: String = name
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '.' || c == '-' || c == '_' {
                c
            } else {
                '-'
            }
        })
        .collect();

    if cleaned.trim_matches('-').is_empty() {
        "file".to_string()
    } else {
        cleaned
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tiny_png() -> Vec<u8> {
        let img = image::RgbaImage::from_pixel(4, 4, image::Rgba([200, 40, 40, 255]));
        let mut out = Cursor::new(Vec::new());
        image::DynamicImage::ImageRgba8(img)
            .write_to(&mut out, image::ImageFormat::Png)
            .unwrap();
        out.into_inner()
    }

    #[test]
    fn test_render_thumbnail_from_png() {
        let thumb = render_thumbnail(&tiny_png()).expect("thumbnail for valid png");
        assert!(!thumb.is_empty());
        // JPEG magic bytes
        assert_eq!(&thumb[..2], &[0xFF, 0xD8]);
    }

    #[test]
    fn test_render_thumbnail_rejects_garbage() {
        assert!(render_thumbnail(b"not an image").is_none());
    }

    #[test]
    fn test_sanitize_object_name() {
        assert_eq!(sanitize_object_name("cover art (final).png"), "cover-art--final-.png");
        assert_eq!(sanitize_object_name("///"), "file");
        assert_eq!(sanitize_object_name("plain.jpg"), "plain.jpg");
    }
}
