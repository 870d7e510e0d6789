//! Thumbnail rendering: decode, resize to an exact box, encode as JPEG.
//!
//! CPU-bound; async callers go through [`ThumbnailProcessor::render_async`],
//! which runs on the blocking pool.

use std::fmt;
use std::io::Cursor;
use std::sync::Arc;

use bytes::Bytes;
use image::imageops::FilterType;
use image::{DynamicImage, ImageOutputFormat};
use thiserror::Error;
use tracing::{debug, Span};

use crate::config::ThumbnailSettings;

/// Per-message progress, logged at debug level
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Received,
    Fetching,
    Decoding,
    Resizing,
    Encoding,
    Storing,
    Acknowledged,
    Failed,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

#[derive(Debug, Error)]
pub enum RenderError {
    #[error("failed to decode image: {0}")]
    Decode(#[source] image::ImageError),

    #[error("failed to encode thumbnail: {0}")]
    Encode(#[source] image::ImageError),

    #[error("thumbnail task panicked: {0}")]
    Panicked(String),
}

/// A rendered thumbnail
#[derive(Debug)]
pub struct Thumbnail {
    pub data: Bytes,
    pub width: u32,
    pub height: u32,
}

pub struct ThumbnailProcessor {
    width: u32,
    height: u32,
    quality: u8,
}

impl ThumbnailProcessor {
    pub fn new(settings: &ThumbnailSettings) -> Self {
        Self {
            width: settings.width.max(1),
            height: settings.height.max(1),
            quality: settings.quality.clamp(1, 100),
        }
    }

    /// Render on the calling thread
    pub fn render(&self, original: &[u8]) -> Result<Thumbnail, RenderError> {
        debug!(stage = %Stage::Decoding, bytes = original.len());
        let img = image::load_from_memory(original).map_err(RenderError::Decode)?;

        debug!(
            stage = %Stage::Resizing,
            original_width = img.width(),
            original_height = img.height(),
            width = self.width,
            height = self.height
        );
        let resized = img.resize_exact(self.width, self.height, FilterType::Lanczos3);

        debug!(stage = %Stage::Encoding, quality = self.quality);
        let data = self.encode_jpeg(resized)?;

        Ok(Thumbnail {
            data,
            width: self.width,
            height: self.height,
        })
    }

    /// Render on the blocking pool, keeping the caller's span
    pub async fn render_async(self: Arc<Self>, original: Bytes) -> Result<Thumbnail, RenderError> {
        let span = Span::current();
        tokio::task::spawn_blocking(move || {
            let _entered = span.enter();
            self.render(&original)
        })
        .await
        .map_err(|e| RenderError::Panicked(e.to_string()))?
    }

    // JPEG has no alpha channel
    fn encode_jpeg(&self, img: DynamicImage) -> Result<Bytes, RenderError> {
        let rgb = DynamicImage::ImageRgb8(img.to_rgb8());
        let mut buf = Vec::new();
        rgb.write_to(&mut Cursor::new(&mut buf), ImageOutputFormat::Jpeg(self.quality))
            .map_err(RenderError::Encode)?;
        Ok(Bytes::from(buf))
    }
}
