use std::sync::Arc;

use async_trait::async_trait;
use lens_blob::{BlobAdapter, BlobError, BlobFile, BlobId, Collection};
use lens_queue::{Delivery, HandlerError, MessageHandler};
use tracing::{debug, info, info_span, warn, Instrument};

use super::thumbnails_processor::{Stage, ThumbnailProcessor};
use crate::config::ThumbnailSettings;
use crate::error::PipelineError;
use crate::photos::ThumbnailMetadata;

/// What a successful run did
#[derive(Debug)]
pub enum ThumbnailOutcome {
    Created(BlobFile),
    /// A thumbnail for this original already existed
    AlreadyExists,
}

/// Consumes original ids and stores one thumbnail per original.
///
/// Idempotent: a redelivered id whose thumbnail already exists is acked
/// without work, and the unique `originalId` field makes a concurrent
/// duplicate lose at commit.
#[derive(Clone)]
pub struct ThumbnailWorker {
    blobs: BlobAdapter,
    processor: Arc<ThumbnailProcessor>,
    max_source_bytes: u64,
}

impl ThumbnailWorker {
    pub fn new(blobs: BlobAdapter, settings: &ThumbnailSettings) -> Self {
        Self {
            blobs,
            processor: Arc::new(ThumbnailProcessor::new(settings)),
            max_source_bytes: settings.max_source_bytes,
        }
    }

    /// Run the pipeline for one payload
    pub async fn process(&self, payload: &[u8]) -> Result<ThumbnailOutcome, HandlerError> {
        debug!(stage = %Stage::Received);
        let original_id = std::str::from_utf8(payload)
            .ok()
            .and_then(|s| BlobId::parse(s.trim()))
            .ok_or_else(|| HandlerError::permanent("payload is not a photo id"))?;

        let span = info_span!("thumbnail", original_id = %original_id);
        self.process_original(original_id).instrument(span).await
    }

    async fn process_original(&self, original_id: BlobId) -> Result<ThumbnailOutcome, HandlerError> {
        let thumbnails = Collection::thumbnails();
        let existing = self
            .blobs
            .find_by_metadata(
                &thumbnails,
                ThumbnailMetadata::ORIGINAL_ID,
                original_id.to_string(),
            )
            .await
            .map_err(storage_failure)?;
        if !existing.is_empty() {
            debug!("Thumbnail already exists, skipping");
            return Ok(ThumbnailOutcome::AlreadyExists);
        }

        debug!(stage = %Stage::Fetching);
        let opened = self
            .blobs
            .open_read(&Collection::photos(), &original_id)
            .await
            .map_err(|e| match e {
                BlobError::NotFound { .. } => HandlerError::permanent("original photo not found"),
                other => storage_failure(other),
            })?;
        let original = opened
            .into_bytes(self.max_source_bytes)
            .await
            .map_err(|e| match e {
                BlobError::TooLarge { limit } => {
                    HandlerError::permanent(format!("original exceeds {limit} bytes"))
                }
                other => storage_failure(other),
            })?;

        let thumbnail = self
            .processor
            .clone()
            .render_async(original)
            .await
            .map_err(|e| HandlerError::retryable(PipelineError::from(e).to_string()))?;

        debug!(stage = %Stage::Storing, bytes = thumbnail.data.len());
        let metadata = ThumbnailMetadata::for_original(&original_id);
        let mut writer = self.blobs.open_write(&thumbnails, metadata.to_put());
        let stored = match writer.write(&thumbnail.data).await {
            Ok(()) => writer.finish().await,
            Err(e) => Err(e),
        };

        match stored {
            Ok(file) => {
                info!(thumbnail_id = %file.id, "Thumbnail stored");
                Ok(ThumbnailOutcome::Created(file))
            }
            Err(e) if e.is_conflict() => {
                debug!("Concurrent worker stored the thumbnail first");
                Ok(ThumbnailOutcome::AlreadyExists)
            }
            Err(e) => Err(storage_failure(e)),
        }
    }
}

fn storage_failure(err: BlobError) -> HandlerError {
    HandlerError::retryable(format!("storage: {err}"))
}

#[async_trait]
impl MessageHandler for ThumbnailWorker {
    async fn handle(&self, delivery: &Delivery) -> Result<(), HandlerError> {
        match self.process(delivery.payload()).await {
            Ok(_) => {
                debug!(message_id = %delivery.id(), stage = %Stage::Acknowledged);
                Ok(())
            }
            Err(e) => {
                warn!(
                    message_id = %delivery.id(),
                    attempt = delivery.attempt(),
                    stage = %Stage::Failed,
                    error = %e,
                    "Thumbnail generation failed"
                );
                Err(e)
            }
        }
    }
}
