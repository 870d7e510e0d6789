//! # lens-photos
//!
//! Photo ingestion, thumbnail generation and retrieval on top of
//! [`lens_blob`] and [`lens_queue`].
//!
//! ```text
//! upload ──► PhotosService::ingest ──► photos collection
//!                    │
//!                    └─► queue "photos" ──► ThumbnailWorker ──► thumbnails collection
//!
//! PhotosService::{open_original, open_thumbnail, photo_info, photos_by_owner}
//! ```
//!
//! ```rust
//! use lens_photos::prelude::*;
//!
//! # #[tokio::main]
//! # async fn main() -> anyhow::Result<()> {
//! let ctx = AppContext::in_memory().await?;
//! let photos = ctx.photos();
//! assert!(photos.photos_by_owner("507f1f77bcf86cd799439011").await?.is_empty());
//! ctx.shutdown(Vec::new()).await;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod context;
pub mod error;
pub mod photos;
pub mod telemetry;
pub mod thumbnails;

pub use config::PhotosConfig;
pub use context::AppContext;
pub use error::{PipelineError, PipelineResult};
pub use photos::{
    IngestResponse, MediaStream, PhotoInfo, PhotoUpload, PhotosService, UploadFields,
};
pub use thumbnails::{ThumbnailOutcome, ThumbnailWorker};

pub mod prelude {
    pub use crate::{
        AppContext, IngestResponse, MediaStream, PhotoInfo, PhotoUpload, PhotosConfig,
        PhotosService, PipelineError, PipelineResult, ThumbnailWorker, UploadFields,
    };
}
