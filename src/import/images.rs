//! Embedded image extraction and relocation
//!
//! Candidate bodies arrive with images inlined as base64 data URIs. Before
//! a chapter is persisted the payloads are pulled out, each `src` is
//! rewritten to an indexed `import-image://N` marker, the binaries go to
//! media storage, and a second pass swaps every marker for the stored
//! address. A failed upload leaves that one `src` empty instead of
//! failing the chapter.

use base64::Engine as _;
use lol_html::{element, rewrite_str, RewriteStrSettings};

use crate::storage::{MediaStorage, StoredMedia};

use super::types::{ExtractedImage, ImportError};

const PLACEHOLDER_SCHEME: &str = "import-image://";

/// Extraction output: rewritten markup plus the pulled payloads
#[derive(Debug, Default)]
pub struct ExtractionResult {
    pub body: String,
    pub images: Vec<ExtractedImage>,
    pub warnings: Vec<String>,
}

/// Pull embedded data-URI images out of chapter markup
///
/// Image order follows document order; the marker index doubles as the
/// position into the returned image list. Undecodable data URIs stay in
/// place and only produce a warning.
pub fn extract_embedded_images(body: &str) -> Result<ExtractionResult, ImportError> {
    let mut images: Vec<ExtractedImage> = Vec::new();
    let mut warnings: Vec<String> = Vec::new();

    let rewritten = rewrite_str(
        body,
        RewriteStrSettings {
            element_content_handlers: vec![element!("img[src]", |el| {
                let src = el.get_attribute("src").unwrap_or_default();
                if !src.starts_with("data:") {
                    return Ok(());
                }

                match decode_data_uri(&src) {
                    Some((content_type, data)) => {
                        let index = images.len();
                        let display_name =
                            format!("image-{}.{}", index + 1, extension_for(&content_type));
                        images.push(ExtractedImage {
                            data,
                            content_type,
                            display_name,
                        });
                        el.set_attribute("src", &format!("{}{}", PLACEHOLDER_SCHEME, index))?;
                    }
                    None => {
                        warnings.push(format!(
                            "embedded image {} could not be decoded and was left inline",
                            images.len() + 1
                        ));
                    }
                }
                Ok(())
            })],
            ..RewriteStrSettings::default()
        },
    )
    .map_err(|e| ImportError::Internal(format!("markup rewrite failed: {}", e)))?;

    Ok(ExtractionResult {
        body: rewritten,
        images,
        warnings,
    })
}

/// Upload extracted images and point the markup at their stored addresses
///
/// Returns the final markup and one entry per input image: the stored
/// addresses, or `None` where the upload failed. A marker whose upload
/// failed gets an empty `src`.
pub async fn relocate_images(
    body: &str,
    images: &[ExtractedImage],
    storage: &dyn MediaStorage,
    uploader_id: Option<&str>,
) -> Result<(String, Vec<Option<StoredMedia>>), ImportError> {
    let mut outcomes: Vec<Option<StoredMedia>> = Vec::with_capacity(images.len());

    for (index, image) in images.iter().enumerate() {
        match storage
            .store_media(&image.data, &image.content_type, &image.display_name, uploader_id)
            .await
        {
            Ok(stored) => outcomes.push(Some(stored)),
            Err(e) => {
                tracing::warn!(
                    "Failed to store chapter image {} ({}): {}",
                    index + 1,
                    image.display_name,
                    e
                );
                outcomes.push(None);
            }
        }
    }

    let rewritten = rewrite_str(
        body,
        RewriteStrSettings {
            element_content_handlers: vec![element!("img[src]", |el| {
                let src = el.get_attribute("src").unwrap_or_default();
                let Some(marker) = src.strip_prefix(PLACEHOLDER_SCHEME) else {
                    return Ok(());
                };

                let resolved = marker
                    .parse::<usize>()
                    .ok()
                    .and_then(|index| outcomes.get(index))
                    .and_then(|outcome| outcome.as_ref().map(|s| s.url.clone()));
                el.set_attribute("src", resolved.as_deref().unwrap_or(""))?;
                Ok(())
            })],
            ..RewriteStrSettings::default()
        },
    )
    .map_err(|e| ImportError::Internal(format!("markup rewrite failed: {}", e)))?;

    Ok((rewritten, outcomes))
}

/// Split a `data:<mime>;base64,<payload>` URI into its type and bytes
fn decode_data_uri(uri: &str) -> Option<(String, Vec<u8>)> {
    let rest = uri.strip_prefix("data:")?;
    let (header, payload) = rest.split_once(',')?;
    if !header.ends_with(";base64") {
        return None;
    }
    let content_type = header.trim_end_matches(";base64").to_string();
    if content_type.is_empty() {
        return None;
    }
    let data = base64::engine::general_purpose::STANDARD
        .decode(payload.trim())
        .ok()?;
    Some((content_type, data))
}

fn extension_for(content_type: &str) -> &'static str {
    match content_type {
        "image/png" => "png",
        "image/jpeg" => "jpg",
        "image/gif" => "gif",
        "image/webp" => "webp",
        "image/bmp" => "bmp",
        "image/svg+xml" => "svg",
        "image/tiff" => "tif",
        _ => "bin",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStorage;

    fn data_uri(content_type: &str, bytes: &[u8]) -> String {
        format!(
            "data:{};base64,{}",
            content_type,
            base64::engine::general_purpose::STANDARD.encode(bytes)
        )
    }

    #[test]
    fn test_extracts_images_in_document_order() {
        let body = format!(
            "<p>one</p><img src=\"{}\" /><p>two</p><img src=\"{}\" />",
            data_uri("image/png", b"png-bytes"),
            data_uri("image/gif", b"gif-bytes")
        );

        let result = extract_embedded_images(&body).unwrap();
        assert!(result.warnings.is_empty());
        assert_eq!(result.images.len(), 2);
        assert_eq!(result.images[0].content_type, "image/png");
        assert_eq!(result.images[0].data, b"png-bytes");
        assert_eq!(result.images[0].display_name, "image-1.png");
        assert_eq!(result.images[1].display_name, "image-2.gif");
        assert!(result.body.contains("import-image://0"));
        assert!(result.body.contains("import-image://1"));
        assert!(!result.body.contains("data:"));
    }

    #[test]
    fn test_external_image_sources_are_untouched() {
        let body = "<p>text</p><img src=\"https://cdn.example.com/a.png\" />";

        let result = extract_embedded_images(body).unwrap();
        assert!(result.images.is_empty());
        assert!(result.body.contains("https://cdn.example.com/a.png"));
    }

    #[test]
    fn test_undecodable_data_uri_stays_inline() {
        let body = "<img src=\"data:image/png;base64,@@not-base64@@\" />";

        let result = extract_embedded_images(body).unwrap();
        assert!(result.images.is_empty());
        assert_eq!(result.warnings.len(), 1);
        assert!(result.body.contains("data:image/png"));
    }

    #[tokio::test]
    async fn test_relocation_rewrites_markers_to_stored_urls() {
        let storage = MemoryStorage::new();
        let body = format!(
            "<img src=\"{}\" /><p>between</p><img src=\"{}\" />",
            data_uri("image/png", b"first"),
            data_uri("image/png", b"second")
        );
        let extraction = extract_embedded_images(&body).unwrap();

        let (rewritten, outcomes) =
            relocate_images(&extraction.body, &extraction.images, &storage, Some("u-1"))
                .await
                .unwrap();

        assert_eq!(outcomes.len(), 2);
        assert!(outcomes.iter().all(|o| o.is_some()));
        assert!(!rewritten.contains(PLACEHOLDER_SCHEME));
        assert!(rewritten.contains("memory://media/"));
        // Raw byte payloads are not decodable images, so no thumbnails
        assert_eq!(storage.object_count().await, 2);
    }

    #[tokio::test]
    async fn test_failed_upload_leaves_empty_src() {
        let storage = MemoryStorage::new();
        storage.set_fail_media_stores(true);
        let body = format!("<img src=\"{}\" />", data_uri("image/png", b"bytes"));
        let extraction = extract_embedded_images(&body).unwrap();

        let (rewritten, outcomes) =
            relocate_images(&extraction.body, &extraction.images, &storage, None)
                .await
                .unwrap();

        assert_eq!(outcomes.len(), 1);
        assert!(outcomes[0].is_none());
        assert!(rewritten.contains("src=\"\""));
    }

    #[test]
    fn test_decode_data_uri_rejects_non_base64_encodings() {
        assert!(decode_data_uri("data:text/plain,hello").is_none());
        assert!(decode_data_uri("data:;base64,aGk=").is_none());
        let decoded = decode_data_uri("data:image/png;base64,aGk=").unwrap();
        assert_eq!(decoded.0, "image/png");
        assert_eq!(decoded.1, b"hi");
    }
}
