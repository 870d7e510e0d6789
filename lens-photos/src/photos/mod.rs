mod photos_ingest;
mod photos_retrieval;
mod photos_schema;
mod photos_shared;

pub use photos_ingest::PhotosService;
pub use photos_retrieval::MediaStream;
pub use photos_schema::{validate_mimetype, UploadFields, ALLOWED_MIMETYPES};
pub use photos_shared::{
    stored_filename, IngestLinks, IngestResponse, PhotoInfo, PhotoMetadata, PhotoUpload,
    ThumbnailMetadata,
};
