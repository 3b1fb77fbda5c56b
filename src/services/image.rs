use anyhow::Result;
use base64::{engine::general_purpose, Engine};
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;

/// Ceiling on the base64-encoded image sent to the model (20 MiB).
pub const MAX_ENCODED_IMAGE_BYTES: usize = 20 * 1024 * 1024;

/// Source of raw image bytes behind an opaque reference.
#[async_trait::async_trait]
pub trait BlobStore: Send + Sync {
    async fn fetch_bytes(&self, image_ref: &str) -> Result<Vec<u8>>;

    /// Raw size of the blob when the store can tell without reading it.
    async fn content_length(&self, _image_ref: &str) -> Result<Option<u64>> {
        Ok(None)
    }
}

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("Invalid image reference: {0}")]
    InvalidReference(String),

    #[error("Could not fetch image {image_ref}: {reason}")]
    Unavailable { image_ref: String, reason: String },

    #[error("Image {0} is empty")]
    Empty(String),

    #[error("Encoded image is {size} bytes, limit is {limit} bytes")]
    PayloadTooLarge { size: usize, limit: usize },
}

/// Image ready to be attached to a model request.
#[derive(Debug, Clone, PartialEq)]
pub struct ImagePart {
    pub media_type: String,
    pub base64_data: String,
}

impl ImagePart {
    pub fn data_url(&self) -> String {
        format!("data:{};base64,{}", self.media_type, self.base64_data)
    }

    pub fn encoded_len(&self) -> usize {
        self.base64_data.len()
    }
}

/// MIME type from the reference's extension, `image/jpeg` when unknown.
pub fn media_type_for(image_ref: &str) -> &'static str {
    let extension = Path::new(image_ref)
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase());

    match extension.as_deref() {
        Some("png") => "image/png",
        Some("jpg") | Some("jpeg") => "image/jpeg",
        Some("webp") => "image/webp",
        Some("gif") => "image/gif",
        Some("heic") => "image/heic",
        _ => "image/jpeg",
    }
}

pub struct ImageFetcher {
    store: Arc<dyn BlobStore>,
    max_encoded_bytes: usize,
}

impl ImageFetcher {
    pub fn new(store: Arc<dyn BlobStore>) -> Self {
        Self {
            store,
            max_encoded_bytes: MAX_ENCODED_IMAGE_BYTES,
        }
    }

    pub fn with_max_encoded_bytes(mut self, max_encoded_bytes: usize) -> Self {
        self.max_encoded_bytes = max_encoded_bytes;
        self
    }

    pub async fn fetch(&self, image_ref: &str) -> std::result::Result<ImagePart, FetchError> {
        log::debug!("Fetching image: {}", image_ref);

        let unavailable = |e: anyhow::Error| match e.downcast::<FetchError>() {
            Ok(fetch_error) => fetch_error,
            Err(e) => FetchError::Unavailable {
                image_ref: image_ref.to_string(),
                reason: e.to_string(),
            },
        };

        // Reject from the stored size so oversized blobs are never read
        if let Some(raw_len) = self.store.content_length(image_ref).await.map_err(unavailable)? {
            let raw_len = usize::try_from(raw_len).unwrap_or(usize::MAX);
            self.check_size(image_ref, raw_len)?;
        }

        let bytes = self.store.fetch_bytes(image_ref).await.map_err(unavailable)?;

        if bytes.is_empty() {
            return Err(FetchError::Empty(image_ref.to_string()));
        }

        // Stores without a size hint are checked before encoding
        self.check_size(image_ref, bytes.len())?;

        let base64_data = general_purpose::STANDARD.encode(&bytes);
        log::debug!(
            "Image {}: {} bytes raw, {} bytes encoded",
            image_ref,
            bytes.len(),
            base64_data.len()
        );

        Ok(ImagePart {
            media_type: media_type_for(image_ref).to_string(),
            base64_data,
        })
    }

    fn check_size(&self, image_ref: &str, raw_len: usize) -> std::result::Result<(), FetchError> {
        let size = base64_len(raw_len);
        if size > self.max_encoded_bytes {
            log::warn!(
                "Image {} rejected: encoded size {} bytes exceeds {} bytes",
                image_ref, size, self.max_encoded_bytes
            );
            return Err(FetchError::PayloadTooLarge {
                size,
                limit: self.max_encoded_bytes,
            });
        }
        Ok(())
    }
}

/// Padded standard base64 output length.
fn base64_len(raw_len: usize) -> usize {
    raw_len.div_ceil(3).saturating_mul(4)
}

/// Blob store backed by a local directory; references are file names under it.
pub struct LocalBlobStore {
    base_dir: PathBuf,
}

impl LocalBlobStore {
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
        }
    }

    fn resolve(&self, image_ref: &str) -> Result<PathBuf> {
        let relative = Path::new(image_ref);
        let is_plain = relative
            .components()
            .all(|c| matches!(c, Component::Normal(_)));

        if image_ref.is_empty() || !is_plain {
            return Err(FetchError::InvalidReference(image_ref.to_string()).into());
        }

        Ok(self.base_dir.join(relative))
    }
}

#[async_trait::async_trait]
impl BlobStore for LocalBlobStore {
    async fn fetch_bytes(&self, image_ref: &str) -> Result<Vec<u8>> {
        let path = self.resolve(image_ref)?;
        let bytes = tokio::fs::read(&path).await?;
        Ok(bytes)
    }

    async fn content_length(&self, image_ref: &str) -> Result<Option<u64>> {
        let path = self.resolve(image_ref)?;
        let metadata = tokio::fs::metadata(&path).await?;
        Ok(Some(metadata.len()))
    }
}
