use std::borrow::Cow;

use lens_schema::{validate_json, validate_object_id, SchemaErrors};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use validator::{Validate, ValidationError};

/// Image types accepted at ingestion
pub const ALLOWED_MIMETYPES: [&str; 2] = ["image/jpeg", "image/png"];

/// Upload intake record: the form fields that travel with the bytes.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct UploadFields {
    #[serde(rename = "ownerId")]
    #[validate(custom(function = "validate_object_id"))]
    pub owner_id: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[validate(length(max = 2048))]
    pub caption: Option<String>,

    #[validate(custom(function = "validate_mimetype"))]
    pub mimetype: String,

    #[validate(length(min = 1, max = 255))]
    pub filename: String,
}

impl UploadFields {
    pub fn new(
        owner_id: impl Into<String>,
        mimetype: impl Into<String>,
        filename: impl Into<String>,
    ) -> Self {
        Self {
            owner_id: owner_id.into(),
            caption: None,
            mimetype: mimetype.into(),
            filename: filename.into(),
        }
    }

    pub fn with_caption(mut self, caption: impl Into<String>) -> Self {
        self.caption = Some(caption.into());
        self
    }

    /// Lowercase the owner id so lookups match however the client cased it.
    pub fn canonicalized(mut self) -> Self {
        self.owner_id.make_ascii_lowercase();
        self
    }

    /// Parse and validate loosely-typed form data
    pub fn from_form(form: &Value) -> Result<Self, SchemaErrors> {
        validate_json(form)
    }
}

pub fn validate_mimetype(value: &str) -> Result<(), ValidationError> {
    if ALLOWED_MIMETYPES.contains(&value) {
        Ok(())
    } else {
        Err(ValidationError::new("mimetype")
            .with_message(Cow::Borrowed("must be image/jpeg or image/png")))
    }
}
