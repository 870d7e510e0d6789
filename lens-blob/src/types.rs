use bytes::Bytes;
use chrono::{DateTime, Utc};
use futures_core::Stream;
use lens_core::ObjectId;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::pin::Pin;
use std::str::FromStr;

/// Stream of bytes for blob content
pub type ByteStream = Pin<Box<dyn Stream<Item = Result<Bytes, std::io::Error>> + Send>>;

/// Free-form metadata attached to a blob's file document
pub type Metadata = Map<String, Value>;

/// Identifier assigned to a blob when its writer is opened
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BlobId(ObjectId);

impl BlobId {
    pub fn new() -> Self {
        Self(ObjectId::new())
    }

    /// `None` for anything that is not a 24-hex id.
    pub fn parse(s: &str) -> Option<Self> {
        ObjectId::parse_str(s).ok().map(Self)
    }

    pub fn object_id(&self) -> ObjectId {
        self.0
    }
}

impl Default for BlobId {
    fn default() -> Self {
        Self::new()
    }
}

impl From<ObjectId> for BlobId {
    fn from(id: ObjectId) -> Self {
        Self(id)
    }
}

impl FromStr for BlobId {
    type Err = lens_core::ParseObjectIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ObjectId::parse_str(s).map(Self)
    }
}

impl fmt::Display for BlobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Anything a caller may hand in as a blob reference. Strings that do not
/// parse resolve to `None`, which lookups report as absence.
pub trait BlobKey: fmt::Display {
    fn blob_id(&self) -> Option<BlobId>;
}

impl BlobKey for BlobId {
    fn blob_id(&self) -> Option<BlobId> {
        Some(*self)
    }
}

impl BlobKey for str {
    fn blob_id(&self) -> Option<BlobId> {
        BlobId::parse(self)
    }
}

impl BlobKey for String {
    fn blob_id(&self) -> Option<BlobId> {
        BlobId::parse(self)
    }
}

/// Named group of blobs (a bucket)
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Collection(String);

impl Collection {
    /// Collection names double as directory names, so only
    /// `[a-z0-9_-]` is accepted.
    pub fn new(name: impl Into<String>) -> crate::BlobResult<Self> {
        let name = name.into();
        let ok = !name.is_empty()
            && name
                .bytes()
                .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || b == b'_' || b == b'-');
        if ok {
            Ok(Self(name))
        } else {
            Err(crate::BlobError::invalid(format!("invalid collection name: {name:?}")))
        }
    }

    pub fn photos() -> Self {
        Self("photos".to_string())
    }

    pub fn thumbnails() -> Self {
        Self("thumbnails".to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Collection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Request to store a blob
#[derive(Debug, Clone, Default)]
pub struct BlobPut {
    pub filename: Option<String>,
    pub content_type: Option<String>,
    pub metadata: Metadata,
    pub unique_field: Option<String>,
}

impl BlobPut {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_filename<S: Into<String>>(mut self, filename: S) -> Self {
        self.filename = Some(filename.into());
        self
    }

    pub fn with_content_type<S: Into<String>>(mut self, content_type: S) -> Self {
        self.content_type = Some(content_type.into());
        self
    }

    pub fn with_metadata<K: Into<String>, V: Into<Value>>(mut self, key: K, value: V) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// Commit fails with `Conflict` if a committed blob in the same
    /// collection carries an equal value under `field`.
    pub fn with_unique_field<S: Into<String>>(mut self, field: S) -> Self {
        self.unique_field = Some(field.into());
        self
    }
}

/// File document describing a committed blob
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BlobFile {
    pub id: BlobId,
    pub collection: Collection,
    pub filename: Option<String>,
    pub content_type: Option<String>,
    pub length: u64,
    pub chunk_size: u32,
    pub chunk_count: u32,
    pub uploaded_at: DateTime<Utc>,
    #[serde(default)]
    pub metadata: Metadata,
}

impl BlobFile {
    pub fn metadata_str(&self, field: &str) -> Option<&str> {
        self.metadata.get(field).and_then(|v| v.as_str())
    }

    pub fn matches(&self, field: &str, value: &Value) -> bool {
        self.metadata.get(field) == Some(value)
    }
}
