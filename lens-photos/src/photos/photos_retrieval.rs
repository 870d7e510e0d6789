use lens_blob::{BlobFile, BlobId, ByteStream, Collection, OpenedBlob};
use lens_core::ObjectId;
use tracing::debug;

use super::photos_ingest::PhotosService;
use super::photos_shared::{PhotoInfo, PhotoMetadata, ThumbnailMetadata};
use crate::error::{PipelineError, PipelineResult};

const FALLBACK_CONTENT_TYPE: &str = "application/octet-stream";

/// Bytes of a stored image plus what a response needs to frame them
pub struct MediaStream {
    pub content_type: String,
    pub content_length: u64,
    pub filename: Option<String>,
    pub stream: ByteStream,
}

impl MediaStream {
    fn from_opened(opened: OpenedBlob, content_type: Option<String>) -> Self {
        let content_type = content_type
            .or_else(|| opened.file.content_type.clone())
            .unwrap_or_else(|| FALLBACK_CONTENT_TYPE.to_string());
        Self {
            content_type,
            content_length: opened.file.length,
            filename: opened.file.filename.clone(),
            stream: opened.stream,
        }
    }
}

impl PhotosService {
    /// Stream an original. Malformed and absent ids are both `NotFound`.
    pub async fn open_original(&self, id: &str) -> PipelineResult<MediaStream> {
        let opened = self.blobs.open_read(&Collection::photos(), id).await?;
        let mimetype = PhotoMetadata::from_file(&opened.file).map(|m| m.mimetype);
        debug!(photo_id = %opened.file.id, "Streaming original");
        Ok(MediaStream::from_opened(opened, mimetype))
    }

    /// Stream the thumbnail derived from `original_id`
    pub async fn open_thumbnail(&self, original_id: &str) -> PipelineResult<MediaStream> {
        let thumbnails = Collection::thumbnails();
        let file = self
            .find_thumbnail(original_id)
            .await?
            .ok_or_else(|| PipelineError::not_found(original_id))?;

        let opened = self.blobs.open_read(&thumbnails, &file.id).await?;
        debug!(original_id, thumbnail_id = %opened.file.id, "Streaming thumbnail");
        Ok(MediaStream::from_opened(opened, None))
    }

    pub async fn photo_info(&self, id: &str) -> PipelineResult<PhotoInfo> {
        let file = self
            .blobs
            .get(&Collection::photos(), id)
            .await?
            .ok_or_else(|| PipelineError::not_found(id))?;
        Ok(PhotoInfo::from_file(&file))
    }

    /// Every photo of an owner, oldest first. An invalid owner id has no
    /// photos.
    pub async fn photos_by_owner(&self, owner_id: &str) -> PipelineResult<Vec<PhotoInfo>> {
        let Ok(owner) = ObjectId::parse_str(owner_id) else {
            return Ok(Vec::new());
        };
        let mut files = self
            .blobs
            .find_by_metadata(&Collection::photos(), "ownerId", owner.to_hex())
            .await?;
        files.sort_by(|a, b| a.uploaded_at.cmp(&b.uploaded_at).then_with(|| a.id.cmp(&b.id)));
        Ok(files.iter().map(PhotoInfo::from_file).collect())
    }

    /// The thumbnail document for an original, if one was created
    pub async fn find_thumbnail(&self, original_id: &str) -> PipelineResult<Option<BlobFile>> {
        let Some(original) = BlobId::parse(original_id) else {
            return Ok(None);
        };
        let mut found = self
            .blobs
            .find_by_metadata(
                &Collection::thumbnails(),
                ThumbnailMetadata::ORIGINAL_ID,
                original.to_string(),
            )
            .await?;
        Ok(found.pop())
    }
}
