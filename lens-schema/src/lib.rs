//! lens-schema: validation of inbound records.
//!
//! Records derive [`validator::Validate`]; failures are flattened into
//! [`SchemaErrors`], a field-path → messages map that converts into a
//! 400-class [`LensError`] at the boundary.

use std::fmt;

use lens_core::{LensError, ObjectId};
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use validator::{Validate, ValidationError, ValidationErrors, ValidationErrorsKind};

/// Key used for errors that belong to the record as a whole.
pub const SCHEMA_KEY: &str = "_schema";

#[derive(Debug, Clone, Default, PartialEq)]
pub struct SchemaErrors {
    map: Map<String, Value>,
}

impl SchemaErrors {
    pub fn push_schema(&mut self, msg: impl Into<String>) {
        Self::push_to(&mut self.map, SCHEMA_KEY, msg);
    }

    pub fn push_field(&mut self, field: &str, msg: impl Into<String>) {
        Self::push_to(&mut self.map, field, msg);
    }

    fn push_to(map: &mut Map<String, Value>, key: &str, msg: impl Into<String>) {
        let msg = Value::String(msg.into());
        match map.get_mut(key) {
            Some(Value::Array(arr)) => arr.push(msg),
            _ => {
                map.insert(key.to_string(), Value::Array(vec![msg]));
            }
        }
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    /// Field paths that carry at least one message.
    pub fn fields(&self) -> impl Iterator<Item = &str> {
        self.map.keys().map(|k| k.as_str())
    }

    pub fn messages(&self, field: &str) -> Vec<&str> {
        match self.map.get(field) {
            Some(Value::Array(arr)) => arr.iter().filter_map(|v| v.as_str()).collect(),
            _ => Vec::new(),
        }
    }

    pub fn to_value(&self) -> Value {
        Value::Object(self.map.clone())
    }

    pub fn into_lens_error(self, message: &str) -> LensError {
        LensError::bad_request(message).with_errors(Value::Object(self.map))
    }

    pub fn into_bad_request_anyhow(self, message: &str) -> anyhow::Error {
        self.into_lens_error(message).into_anyhow()
    }
}

impl fmt::Display for SchemaErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let fields: Vec<&str> = self.fields().collect();
        write!(f, "invalid fields: {}", fields.join(", "))
    }
}

impl std::error::Error for SchemaErrors {}

impl From<&ValidationErrors> for SchemaErrors {
    fn from(errs: &ValidationErrors) -> Self {
        let mut out = SchemaErrors::default();
        push_validation_errors(&mut out, "", errs);
        out
    }
}

fn friendly_message(code: &str) -> Option<&'static str> {
    match code {
        "required" => Some("is required"),
        "length" => Some("has invalid length"),
        "range" => Some("is out of range"),
        "object_id" => Some("must be a valid object id"),
        _ => None,
    }
}

fn join_path(prefix: &str, field: &str) -> String {
    if prefix.is_empty() {
        field.to_string()
    } else {
        format!("{prefix}.{field}")
    }
}

fn push_validation_errors(out: &mut SchemaErrors, prefix: &str, errs: &ValidationErrors) {
    for (field, kind) in errs.errors() {
        match kind {
            ValidationErrorsKind::Field(field_errors) => {
                let key = join_path(prefix, field);
                for e in field_errors {
                    let msg = e
                        .message
                        .as_ref()
                        .map(|m| m.to_string())
                        .or_else(|| friendly_message(&e.code).map(|m| m.to_string()))
                        .unwrap_or_else(|| e.code.to_string());
                    out.push_field(&key, msg);
                }
            }
            ValidationErrorsKind::Struct(nested) => {
                push_validation_errors(out, &join_path(prefix, field), nested.as_ref());
            }
            ValidationErrorsKind::List(list) => {
                let base = join_path(prefix, field);
                for (idx, nested) in list {
                    push_validation_errors(out, &format!("{base}[{idx}]"), nested.as_ref());
                }
            }
        }
    }
}

/// Run the derived validators on an already-typed record.
pub fn validate<T: Validate>(record: &T) -> Result<(), SchemaErrors> {
    record.validate().map_err(|e| SchemaErrors::from(&e))
}

/// Deserialize and validate a loosely-typed record. Shape errors land
/// under [`SCHEMA_KEY`].
pub fn validate_json<T>(data: &Value) -> Result<T, SchemaErrors>
where
    T: DeserializeOwned + Validate,
{
    let parsed: T = serde_json::from_value(data.clone()).map_err(|e| {
        let mut errs = SchemaErrors::default();
        errs.push_schema(e.to_string());
        errs
    })?;
    validate(&parsed)?;
    Ok(parsed)
}

/// Field validator for 24-hex object ids.
pub fn validate_object_id(value: &str) -> Result<(), ValidationError> {
    if ObjectId::is_valid(value) {
        Ok(())
    } else {
        Err(ValidationError::new("object_id"))
    }
}

#[cfg(test)]
mod tests {
    use lens_core::ErrorKind;
    use serde::Deserialize;
    use serde_json::json;
    use validator::Validate;

    use super::*;

    #[derive(Debug, Deserialize, Validate)]
    struct Album {
        #[validate(custom(function = "crate::validate_object_id"))]
        owner: String,
        #[validate(length(min = 1, message = "title must not be empty"))]
        title: String,
        #[validate(nested)]
        tags: Vec<Tag>,
    }

    #[derive(Debug, Deserialize, Validate)]
    struct Tag {
        #[validate(length(max = 8))]
        label: String,
    }

    #[test]
    fn field_and_list_errors_are_flattened_with_paths() {
        let data = json!({
            "owner": "abc",
            "title": "",
            "tags": [{"label": "ok"}, {"label": "far-too-long"}]
        });

        let errs = validate_json::<Album>(&data).unwrap_err();
        assert_eq!(errs.messages("owner"), vec!["must be a valid object id"]);
        assert_eq!(errs.messages("title"), vec!["title must not be empty"]);
        assert_eq!(errs.messages("tags[1].label"), vec!["has invalid length"]);
        assert!(errs.messages("tags[0].label").is_empty());
    }

    #[test]
    fn shape_errors_go_under_schema_key() {
        let errs = validate_json::<Album>(&json!({"title": 3})).unwrap_err();
        assert_eq!(errs.fields().collect::<Vec<_>>(), vec![SCHEMA_KEY]);
    }

    #[test]
    fn valid_record_passes() {
        let data = json!({"owner": "507f1f77bcf86cd799439011", "title": "t", "tags": []});
        let album = validate_json::<Album>(&data).unwrap();
        assert_eq!(album.title, "t");
    }

    #[test]
    fn converts_into_bad_request() {
        let mut errs = SchemaErrors::default();
        errs.push_field("mimetype", "unsupported");
        let err = errs.into_lens_error("Request body is not a valid photo object");
        assert_eq!(err.kind, ErrorKind::BadRequest);
        assert_eq!(err.errors.unwrap()["mimetype"][0], "unsupported");
    }
}
