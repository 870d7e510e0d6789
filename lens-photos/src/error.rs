use lens_blob::{BlobError, BlobId};
use lens_core::LensError;
use lens_queue::QueueError;
use lens_schema::SchemaErrors;
use serde_json::json;
use thiserror::Error;

use crate::thumbnails::RenderError;

pub type PipelineResult<T> = Result<T, PipelineError>;

/// Failures of the ingestion, worker and retrieval paths
#[derive(Debug, Error)]
pub enum PipelineError {
    /// Rejected before the store was touched; never retried
    #[error("invalid upload: {0}")]
    Validation(#[from] SchemaErrors),

    /// Absent or malformed id
    #[error("not found: {0}")]
    NotFound(String),

    #[error("storage failure: {0}")]
    Storage(#[source] BlobError),

    /// The photo is stored but no thumbnail was scheduled for it
    #[error("photo {id} stored but publishing to the queue failed: {source}")]
    QueuePublish {
        id: BlobId,
        #[source]
        source: QueueError,
    },

    /// The worker could not turn a fetched original into a thumbnail
    #[error("processing failed: {0}")]
    Processing(#[from] RenderError),
}

impl From<BlobError> for PipelineError {
    fn from(err: BlobError) -> Self {
        match err {
            BlobError::NotFound { id } => Self::NotFound(id),
            other => Self::Storage(other),
        }
    }
}

impl PipelineError {
    pub fn not_found(id: impl Into<String>) -> Self {
        Self::NotFound(id.into())
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }

    /// Client-facing error. Internal causes stay in the logs.
    pub fn to_client_error(&self) -> LensError {
        match self {
            Self::Validation(errors) => errors.clone().into_lens_error("Invalid upload"),
            Self::NotFound(id) => LensError::not_found(format!("No photo with id '{id}'")),
            Self::Storage(BlobError::TooLarge { limit }) => {
                LensError::payload_too_large(format!("Upload exceeds {limit} bytes"))
            }
            Self::Storage(_) => LensError::general_error("Storage failure"),
            Self::QueuePublish { id, .. } => {
                LensError::general_error("Photo stored but thumbnail could not be scheduled")
                    .with_data(json!({ "id": id.to_string() }))
            }
            Self::Processing(err) => LensError::unprocessable(err.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lens_core::ErrorKind;

    #[test]
    fn blob_not_found_becomes_not_found() {
        let err = PipelineError::from(BlobError::not_found("abc"));
        assert!(err.is_not_found());
        assert_eq!(err.to_client_error().kind, ErrorKind::NotFound);
    }

    #[test]
    fn validation_carries_field_errors() {
        let mut errors = SchemaErrors::default();
        errors.push_field("ownerId", "must be a valid object id");
        let client = PipelineError::from(errors).to_client_error();

        assert_eq!(client.code(), 400);
        let body = client.to_json();
        assert_eq!(body["errors"]["ownerId"][0], "must be a valid object id");
    }

    #[test]
    fn publish_failure_reports_the_id() {
        let id = BlobId::new();
        let err = PipelineError::QueuePublish {
            id,
            source: QueueError::Backend("connection reset".into()),
        };
        let client = err.to_client_error();

        assert_eq!(client.code(), 500);
        assert_eq!(client.to_json()["data"]["id"], id.to_string());
        assert!(!client.message.contains("connection reset"));
    }

    #[test]
    fn render_failure_is_unprocessable() {
        let err = PipelineError::from(RenderError::Panicked("decoder aborted".into()));
        assert!(err.to_string().starts_with("processing failed"));
        assert_eq!(err.to_client_error().code(), 422);
    }

    #[test]
    fn storage_details_stay_internal() {
        let err = PipelineError::from(BlobError::invalid("chunk 3 missing"));
        let client = err.to_client_error();
        assert_eq!(client.code(), 500);
        assert!(!client.message.contains("chunk"));

        let too_large = PipelineError::from(BlobError::TooLarge { limit: 10 });
        assert_eq!(too_large.to_client_error().code(), 413);
    }
}
