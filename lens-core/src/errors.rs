//! # Errors
//!
//! Structured errors shared by every lens crate. Library crates keep their
//! own `thiserror` enums and convert into [`LensError`] at the boundary,
//! where a caller (CLI, worker, HTTP layer) needs a status-coded,
//! client-safe value.
//!
//! - consistent status codes + class names
//! - can be carried through `anyhow::Error`
//! - transport-agnostic
//!
//! With feature `serde`, `data` / `errors` are `serde_json::Value` and
//! [`LensError::to_json`] is available.

use std::fmt;

use anyhow::Error as AnyError;

/// Result type for boundary code that carries a [`LensError`] inside anyhow.
pub type LensResult<T> = std::result::Result<T, AnyError>;

/// Error classes with their HTTP status analogs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    BadRequest,      // 400
    NotFound,        // 404
    Conflict,        // 409
    PayloadTooLarge, // 413
    Unprocessable,   // 422
    GeneralError,    // 500
    Unavailable,     // 503
}

impl ErrorKind {
    pub fn status_code(&self) -> u16 {
        match self {
            ErrorKind::BadRequest => 400,
            ErrorKind::NotFound => 404,
            ErrorKind::Conflict => 409,
            ErrorKind::PayloadTooLarge => 413,
            ErrorKind::Unprocessable => 422,
            ErrorKind::GeneralError => 500,
            ErrorKind::Unavailable => 503,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            ErrorKind::BadRequest => "BadRequest",
            ErrorKind::NotFound => "NotFound",
            ErrorKind::Conflict => "Conflict",
            ErrorKind::PayloadTooLarge => "PayloadTooLarge",
            ErrorKind::Unprocessable => "Unprocessable",
            ErrorKind::GeneralError => "GeneralError",
            ErrorKind::Unavailable => "Unavailable",
        }
    }

    /// Kebab-cased class name (e.g. "not-found")
    pub fn class_name(&self) -> &'static str {
        match self {
            ErrorKind::BadRequest => "bad-request",
            ErrorKind::NotFound => "not-found",
            ErrorKind::Conflict => "conflict",
            ErrorKind::PayloadTooLarge => "payload-too-large",
            ErrorKind::Unprocessable => "unprocessable",
            ErrorKind::GeneralError => "general-error",
            ErrorKind::Unavailable => "unavailable",
        }
    }

    /// True for 5xx kinds.
    pub fn is_server_error(&self) -> bool {
        self.status_code() >= 500
    }
}

#[cfg(feature = "serde")]
pub type ErrorValue = serde_json::Value;

#[cfg(not(feature = "serde"))]
pub type ErrorValue = std::sync::Arc<dyn std::any::Any + Send + Sync>;

/// A structured error that can live inside `anyhow::Error`.
///
/// `data` carries context the caller may act on (for example the id of a
/// blob that was stored before a later step failed); `errors` carries
/// per-field validation messages.
#[derive(Debug)]
pub struct LensError {
    pub kind: ErrorKind,
    pub message: String,
    pub data: Option<ErrorValue>,
    pub errors: Option<ErrorValue>,
    pub source: Option<AnyError>,
}

impl LensError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            data: None,
            errors: None,
            source: None,
        }
    }

    pub fn with_data(mut self, data: ErrorValue) -> Self {
        self.data = Some(data);
        self
    }

    pub fn with_errors(mut self, errors: ErrorValue) -> Self {
        self.errors = Some(errors);
        self
    }

    pub fn with_source(mut self, source: AnyError) -> Self {
        self.source = Some(source);
        self
    }

    pub fn code(&self) -> u16 {
        self.kind.status_code()
    }

    pub fn name(&self) -> &'static str {
        self.kind.name()
    }

    pub fn class_name(&self) -> &'static str {
        self.kind.class_name()
    }

    pub fn into_anyhow(self) -> AnyError {
        AnyError::new(self)
    }

    /// Downcast an `anyhow::Error` to a `LensError` if possible.
    pub fn from_anyhow(err: &AnyError) -> Option<&LensError> {
        err.downcast_ref::<LensError>()
    }

    /// Turn any error into a `LensError`, keeping an existing one as is and
    /// wrapping everything else as `GeneralError`.
    pub fn normalize(err: AnyError) -> LensError {
        match err.downcast::<LensError>() {
            Ok(lens) => lens,
            Err(other) => {
                LensError::new(ErrorKind::GeneralError, other.to_string()).with_source(other)
            }
        }
    }

    /// Copy without the inner `source`, safe to hand back to clients.
    pub fn sanitize_for_client(&self) -> LensError {
        LensError {
            kind: self.kind,
            message: self.message.clone(),
            data: self.data.clone(),
            errors: self.errors.clone(),
            source: None,
        }
    }

    pub fn bad_request(msg: impl Into<String>) -> Self {
        Self::new(ErrorKind::BadRequest, msg)
    }
    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::new(ErrorKind::NotFound, msg)
    }
    pub fn conflict(msg: impl Into<String>) -> Self {
        Self::new(ErrorKind::Conflict, msg)
    }
    pub fn payload_too_large(msg: impl Into<String>) -> Self {
        Self::new(ErrorKind::PayloadTooLarge, msg)
    }
    pub fn unprocessable(msg: impl Into<String>) -> Self {
        Self::new(ErrorKind::Unprocessable, msg)
    }
    pub fn general_error(msg: impl Into<String>) -> Self {
        Self::new(ErrorKind::GeneralError, msg)
    }
    pub fn unavailable(msg: impl Into<String>) -> Self {
        Self::new(ErrorKind::Unavailable, msg)
    }
}

impl fmt::Display for LensError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({}): {}", self.name(), self.code(), self.message)
    }
}

impl std::error::Error for LensError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source
            .as_ref()
            .map(|e| e.as_ref() as &(dyn std::error::Error + 'static))
    }
}

#[cfg(feature = "serde")]
impl LensError {
    /// JSON payload with `name`, `message`, `code`, `className` and the
    /// optional `data` / `errors` members.
    pub fn to_json(&self) -> serde_json::Value {
        use serde_json::json;

        let mut base = json!({
            "name": self.name(),
            "message": self.message,
            "code": self.code(),
            "className": self.class_name(),
        });

        if let Some(d) = &self.data {
            base["data"] = d.clone();
        }
        if let Some(e) = &self.errors {
            base["errors"] = e.clone();
        }
        base
    }
}

/// Return early with a `LensError` wrapped in anyhow.
#[macro_export]
macro_rules! bail_lens {
    ($ctor:ident, $msg:expr) => {
        return Err($crate::errors::LensError::$ctor($msg).into_anyhow());
    };
    ($ctor:ident, $fmt:expr, $($arg:tt)*) => {
        return Err($crate::errors::LensError::$ctor(format!($fmt, $($arg)*)).into_anyhow());
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lookup(id: &str) -> LensResult<()> {
        if id.len() != 24 {
            crate::bail_lens!(not_found, "No photo with id {}", id);
        }
        Ok(())
    }

    #[test]
    fn bail_macro_produces_downcastable_error() {
        let err = lookup("abc").unwrap_err();
        let lens = LensError::from_anyhow(&err).expect("must be LensError");
        assert_eq!(lens.kind, ErrorKind::NotFound);
        assert_eq!(lens.code(), 404);
        assert_eq!(lens.message, "No photo with id abc");
    }

    #[test]
    fn normalize_wraps_foreign_errors_as_general() {
        let err = anyhow::anyhow!("disk on fire");
        let lens = LensError::normalize(err);
        assert_eq!(lens.kind, ErrorKind::GeneralError);
        assert!(lens.source.is_some());
        assert!(lens.kind.is_server_error());
    }

    #[test]
    fn normalize_keeps_lens_errors() {
        let err = LensError::conflict("already there").into_anyhow();
        let lens = LensError::normalize(err);
        assert_eq!(lens.kind, ErrorKind::Conflict);
        assert_eq!(lens.class_name(), "conflict");
    }

    #[test]
    fn sanitize_drops_source() {
        let err = LensError::general_error("boom").with_source(anyhow::anyhow!("secret path"));
        let safe = err.sanitize_for_client();
        assert!(safe.source.is_none());
        assert_eq!(safe.message, "boom");
        assert_eq!(safe.to_string(), "GeneralError (500): boom");
    }

    #[cfg(feature = "serde")]
    #[test]
    fn json_payload_carries_errors_and_data() {
        let err = LensError::bad_request("Request body is not a valid photo object")
            .with_errors(serde_json::json!({"ownerId": ["must be a valid object id"]}))
            .with_data(serde_json::json!({"id": "507f1f77bcf86cd799439011"}));
        let json = err.to_json();
        assert_eq!(json["code"], 400);
        assert_eq!(json["className"], "bad-request");
        assert_eq!(json["errors"]["ownerId"][0], "must be a valid object id");
        assert_eq!(json["data"]["id"], "507f1f77bcf86cd799439011");
    }
}
