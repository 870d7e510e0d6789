use lens_blob::{BlobFile, BlobId, BlobPut, ByteStream};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::photos_schema::UploadFields;

/// Metadata document stored with every original
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PhotoMetadata {
    pub owner_id: String,
    pub mimetype: String,
    pub filename: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub caption: Option<String>,
}

impl PhotoMetadata {
    pub fn from_file(file: &BlobFile) -> Option<Self> {
        serde_json::from_value(Value::Object(file.metadata.clone())).ok()
    }

    pub(crate) fn to_put(&self) -> BlobPut {
        let mut put = BlobPut::new()
            .with_filename(self.filename.clone())
            .with_content_type(self.mimetype.clone())
            .with_metadata("ownerId", self.owner_id.clone())
            .with_metadata("mimetype", self.mimetype.clone())
            .with_metadata("filename", self.filename.clone());
        if let Some(caption) = &self.caption {
            put = put.with_metadata("caption", caption.clone());
        }
        put
    }
}

impl From<&UploadFields> for PhotoMetadata {
    fn from(fields: &UploadFields) -> Self {
        Self {
            owner_id: fields.owner_id.clone(),
            mimetype: fields.mimetype.clone(),
            filename: fields.filename.clone(),
            caption: fields.caption.clone(),
        }
    }
}

/// Metadata document stored with every thumbnail
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ThumbnailMetadata {
    pub original_id: String,
    pub filename: String,
}

impl ThumbnailMetadata {
    /// Metadata field that links a thumbnail to its original
    pub const ORIGINAL_ID: &'static str = "originalId";

    pub fn for_original(original: &BlobId) -> Self {
        Self {
            original_id: original.to_string(),
            filename: format!("{original}.jpg"),
        }
    }

    pub fn from_file(file: &BlobFile) -> Option<Self> {
        serde_json::from_value(Value::Object(file.metadata.clone())).ok()
    }

    pub(crate) fn to_put(&self) -> BlobPut {
        BlobPut::new()
            .with_filename(self.filename.clone())
            .with_content_type("image/jpeg")
            .with_metadata(Self::ORIGINAL_ID, self.original_id.clone())
            .with_metadata("filename", self.filename.clone())
            .with_unique_field(Self::ORIGINAL_ID)
    }
}

/// An upload: validated-on-ingest fields plus the byte source
pub struct PhotoUpload {
    pub fields: UploadFields,
    pub source: ByteStream,
}

impl PhotoUpload {
    pub fn new(fields: UploadFields, source: ByteStream) -> Self {
        Self { fields, source }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IngestLinks {
    pub photo: String,
    pub business: String,
}

/// Response to a successful upload (201 analog)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IngestResponse {
    pub id: String,
    pub links: IngestLinks,
}

impl IngestResponse {
    pub fn new(id: &BlobId, owner_id: &str) -> Self {
        Self {
            id: id.to_string(),
            links: IngestLinks {
                photo: format!("/photos/{id}"),
                business: format!("/businesses/{owner_id}"),
            },
        }
    }
}

/// Public view of a stored photo
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PhotoInfo {
    pub id: String,
    pub url: String,
    pub thumbnail_url: String,
    pub mimetype: String,
    pub owner_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub caption: Option<String>,
}

impl PhotoInfo {
    pub fn from_file(file: &BlobFile) -> Self {
        let metadata = PhotoMetadata::from_file(file);
        let mimetype = metadata
            .as_ref()
            .map(|m| m.mimetype.clone())
            .or_else(|| file.content_type.clone())
            .unwrap_or_default();

        Self {
            id: file.id.to_string(),
            url: format!("/media/photos/{}", file.id),
            thumbnail_url: format!("/media/thumbs/{}", file.id),
            mimetype,
            owner_id: metadata.as_ref().map(|m| m.owner_id.clone()).unwrap_or_default(),
            caption: metadata.and_then(|m| m.caption),
        }
    }
}

/// Stored filename for a raw upload: 32 random hex digits and the
/// extension of the mimetype. `None` for types outside the allow-list.
pub fn stored_filename(mimetype: &str) -> Option<String> {
    let ext = match mimetype {
        "image/jpeg" => "jpg",
        "image/png" => "png",
        _ => return None,
    };
    let mut bytes = [0u8; 16];
    rand::thread_rng().fill_bytes(&mut bytes);
    Some(format!("{}.{}", hex::encode(bytes), ext))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn stored_filenames_are_random_hex() {
        let a = stored_filename("image/jpeg").unwrap();
        let b = stored_filename("image/jpeg").unwrap();
        assert_ne!(a, b);
        let (stem, ext) = a.split_once('.').unwrap();
        assert_eq!(stem.len(), 32);
        assert!(stem.chars().all(|c| c.is_ascii_hexdigit()));
        assert_eq!(ext, "jpg");
        assert!(stored_filename("image/png").unwrap().ends_with(".png"));
        assert_eq!(stored_filename("image/gif"), None);
    }

    #[test]
    fn ingest_response_links() {
        let id = BlobId::new();
        let response = IngestResponse::new(&id, "507f1f77bcf86cd799439011");
        assert_eq!(
            serde_json::to_value(&response).unwrap(),
            json!({
                "id": id.to_string(),
                "links": {
                    "photo": format!("/photos/{id}"),
                    "business": "/businesses/507f1f77bcf86cd799439011",
                }
            })
        );
    }

    #[test]
    fn thumbnail_metadata_names_the_original() {
        let id = BlobId::new();
        let metadata = ThumbnailMetadata::for_original(&id);
        assert_eq!(metadata.filename, format!("{id}.jpg"));
        assert_eq!(
            serde_json::to_value(&metadata).unwrap()["originalId"],
            id.to_string()
        );
    }
}
