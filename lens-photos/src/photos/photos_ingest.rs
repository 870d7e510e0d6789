use lens_blob::{BlobAdapter, ByteStream, Collection};
use lens_queue::QueueChannel;
use serde_json::Value;
use tracing::{debug, error, info, instrument, warn};

use super::photos_schema::UploadFields;
use super::photos_shared::{IngestResponse, PhotoMetadata, PhotoUpload};
use crate::error::{PipelineError, PipelineResult};

/// Ingestion and retrieval of photos over the shared blob store and
/// queue channel. Cheap to clone.
#[derive(Clone)]
pub struct PhotosService {
    pub(crate) blobs: BlobAdapter,
    pub(crate) queue: QueueChannel,
    pub(crate) queue_name: String,
}

impl PhotosService {
    pub fn new(blobs: BlobAdapter, queue: QueueChannel, queue_name: impl Into<String>) -> Self {
        Self {
            blobs,
            queue,
            queue_name: queue_name.into(),
        }
    }

    /// Validate, store the original, then publish its id.
    ///
    /// Publishing happens strictly after the blob is committed. A publish
    /// failure leaves the photo stored and returns
    /// [`PipelineError::QueuePublish`] carrying its id.
    #[instrument(skip_all, fields(owner_id = %upload.fields.owner_id))]
    pub async fn ingest(&self, upload: PhotoUpload) -> PipelineResult<IngestResponse> {
        let PhotoUpload { fields, source } = upload;
        lens_schema::validate(&fields)?;
        let fields = fields.canonicalized();

        let metadata = PhotoMetadata::from(&fields);
        let file = self
            .blobs
            .put(&Collection::photos(), metadata.to_put(), source)
            .await
            .map_err(|e| {
                warn!(error = %e, "Photo write aborted");
                PipelineError::from(e)
            })?;
        debug!(photo_id = %file.id, bytes = file.length, chunks = file.chunk_count, "Photo stored");

        if let Err(source) = self.queue.publish(&self.queue_name, file.id.to_string()).await {
            error!(
                photo_id = %file.id,
                queue = %self.queue_name,
                error = %source,
                "Photo stored but thumbnail publish failed"
            );
            return Err(PipelineError::QueuePublish {
                id: file.id,
                source,
            });
        }

        info!(photo_id = %file.id, "Photo ingested");
        Ok(IngestResponse::new(&file.id, &fields.owner_id))
    }

    /// Same as [`ingest`](Self::ingest) for loosely-typed form fields
    pub async fn ingest_form(&self, form: &Value, source: ByteStream) -> PipelineResult<IngestResponse> {
        let fields = UploadFields::from_form(form)?;
        self.ingest(PhotoUpload::new(fields, source)).await
    }

    pub fn blobs(&self) -> &BlobAdapter {
        &self.blobs
    }

    pub fn queue_name(&self) -> &str {
        &self.queue_name
    }
}
