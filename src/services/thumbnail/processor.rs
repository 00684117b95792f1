//! Thumbnail processor
//!
//! Resamples an image to a fixed square dimension and re-encodes it as JPEG
//! with a fixed quality, so identical input always yields identical output.
//! CPU-heavy work runs on `spawn_blocking` to keep the async runtime free.

use crate::config::ThumbnailSettings;
use crate::error::{AppError, Result};
use bytes::Bytes;
use image::imageops::FilterType;
use image::ImageOutputFormat;
use std::io::Cursor;
use std::sync::Arc;
use tracing::debug;

/// Result of thumbnail generation
#[derive(Debug)]
pub struct ThumbnailResult {
    /// JPEG-encoded thumbnail bytes
    pub data: Bytes,
    pub width: u32,
    pub height: u32,
}

/// Fixed-dimension thumbnail generator
pub struct ThumbnailProcessor {
    settings: ThumbnailSettings,
}

impl ThumbnailProcessor {
    pub fn new(settings: ThumbnailSettings) -> Self {
        Self { settings }
    }

    pub fn with_defaults() -> Self {
        Self::new(ThumbnailSettings {
            dimension: 100,
            quality: 85,
        })
    }

    /// Generate a thumbnail from raw image bytes (blocking).
    ///
    /// Call `generate_async` from async code.
    pub fn generate(&self, original: &[u8]) -> Result<ThumbnailResult> {
        let img = image::load_from_memory(original)
            .map_err(|e| AppError::Transform(format!("failed to decode image: {e}")))?;

        let dim = self.settings.dimension;
        let resized = img.resize_exact(dim, dim, FilterType::Triangle);

        let mut buf = Vec::new();
        resized
            .write_to(
                &mut Cursor::new(&mut buf),
                ImageOutputFormat::Jpeg(self.settings.quality),
            )
            .map_err(|e| AppError::Transform(format!("failed to encode JPEG: {e}")))?;

        debug!(width = dim, height = dim, size = buf.len(), "thumbnail generated");

        Ok(ThumbnailResult {
            data: Bytes::from(buf),
            width: dim,
            height: dim,
        })
    }

    /// Generate a thumbnail on the blocking thread pool
    pub async fn generate_async(self: Arc<Self>, original: Bytes) -> Result<ThumbnailResult> {
        let processor = self.clone();
        tokio::task::spawn_blocking(move || processor.generate(&original))
            .await
            .map_err(|e| AppError::Internal(format!("thumbnail task panicked: {e}")))?
    }
}
