//! Error types for SCIM server operations.
//!
//! Every failure in the server maps onto one of the SCIM error kinds from
//! RFC 7644 Section 3.12. The kind determines both the `scimType` value in
//! the wire-level error resource and the HTTP status code.

use serde_json::{Value, json};

/// The SCIM error schema URN carried by every error response.
pub const ERROR_SCHEMA: &str = "urn:ietf:params:scim:api:messages:2.0:Error";

/// Main error type for SCIM server operations.
///
/// Each variant corresponds to a SCIM error kind; the `detail` message is
/// rendered verbatim into the error resource.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ScimError {
    /// The filter expression could not be parsed or evaluated
    #[error("invalid filter: {0}")]
    InvalidFilter(String),

    /// The attribute path could not be parsed or does not resolve
    #[error("invalid path: {0}")]
    InvalidPath(String),

    /// The request body is not well-formed SCIM JSON
    #[error("invalid syntax: {0}")]
    InvalidSyntax(String),

    /// A value does not conform to the attribute definition
    #[error("invalid value: {0}")]
    InvalidValue(String),

    /// A write violated the attribute's mutability rules
    #[error("mutability violation: {0}")]
    Mutability(String),

    /// A value collides with another resource under a uniqueness constraint
    #[error("uniqueness violation: {0}")]
    Uniqueness(String),

    /// A patch remove/replace path matched no target
    #[error("no target: {0}")]
    NoTarget(String),

    /// The request matched more resources than the server is willing to return
    #[error("too many results: {0}")]
    TooMany(String),

    /// The request attempted to return a sensitive value
    #[error("sensitive value: {0}")]
    Sensitive(String),

    /// The resource does not exist
    #[error("not found: {0}")]
    NotFound(String),

    /// A version-matched replace or delete found no matching document
    #[error("precondition failed: {0}")]
    PreCondition(String),

    /// An unexpected server-side failure
    #[error("internal error: {0}")]
    Internal(String),

    /// The request was cancelled before the operation completed
    #[error("cancelled: {0}")]
    Cancelled(String),
}

impl ScimError {
    pub fn invalid_filter(detail: impl Into<String>) -> Self {
        Self::InvalidFilter(detail.into())
    }

    pub fn invalid_path(detail: impl Into<String>) -> Self {
        Self::InvalidPath(detail.into())
    }

    pub fn invalid_syntax(detail: impl Into<String>) -> Self {
        Self::InvalidSyntax(detail.into())
    }

    pub fn invalid_value(detail: impl Into<String>) -> Self {
        Self::InvalidValue(detail.into())
    }

    pub fn mutability(detail: impl Into<String>) -> Self {
        Self::Mutability(detail.into())
    }

    pub fn uniqueness(detail: impl Into<String>) -> Self {
        Self::Uniqueness(detail.into())
    }

    pub fn no_target(detail: impl Into<String>) -> Self {
        Self::NoTarget(detail.into())
    }

    pub fn not_found(detail: impl Into<String>) -> Self {
        Self::NotFound(detail.into())
    }

    pub fn pre_condition(detail: impl Into<String>) -> Self {
        Self::PreCondition(detail.into())
    }

    pub fn internal(detail: impl Into<String>) -> Self {
        Self::Internal(detail.into())
    }

    pub fn cancelled(detail: impl Into<String>) -> Self {
        Self::Cancelled(detail.into())
    }

    /// The `scimType` value for the error resource, where RFC 7644 defines one.
    pub fn scim_type(&self) -> Option<&'static str> {
        match self {
            Self::InvalidFilter(_) => Some("invalidFilter"),
            Self::InvalidPath(_) => Some("invalidPath"),
            Self::InvalidSyntax(_) => Some("invalidSyntax"),
            Self::InvalidValue(_) => Some("invalidValue"),
            Self::Mutability(_) => Some("mutability"),
            Self::Uniqueness(_) => Some("uniqueness"),
            Self::NoTarget(_) => Some("noTarget"),
            Self::TooMany(_) => Some("tooMany"),
            Self::Sensitive(_) => Some("sensitivity"),
            Self::NotFound(_) | Self::PreCondition(_) | Self::Internal(_) | Self::Cancelled(_) => {
                None
            }
        }
    }

    /// The HTTP status code this error renders as.
    pub fn http_status(&self) -> u16 {
        match self {
            Self::InvalidFilter(_)
            | Self::InvalidPath(_)
            | Self::InvalidSyntax(_)
            | Self::InvalidValue(_)
            | Self::Mutability(_)
            | Self::NoTarget(_)
            | Self::TooMany(_) => 400,
            Self::Sensitive(_) => 403,
            Self::NotFound(_) => 404,
            Self::Uniqueness(_) => 409,
            Self::PreCondition(_) => 412,
            Self::Internal(_) | Self::Cancelled(_) => 500,
        }
    }

    /// Render this error as the SCIM error resource.
    pub fn to_resource(&self) -> Value {
        let mut body = json!({
            "schemas": [ERROR_SCHEMA],
            "status": self.http_status().to_string(),
            "detail": self.to_string(),
        });
        if let Some(scim_type) = self.scim_type() {
            body["scimType"] = Value::String(scim_type.to_string());
        }
        body
    }

    /// Prefix the detail message with the attribute path that caused it.
    ///
    /// Used by pipeline filters so that validation failures name the
    /// offending attribute.
    pub fn at_path(self, path: &str) -> Self {
        let tag = |detail: String| format!("[{}] {}", path, detail);
        match self {
            Self::InvalidFilter(d) => Self::InvalidFilter(tag(d)),
            Self::InvalidPath(d) => Self::InvalidPath(tag(d)),
            Self::InvalidSyntax(d) => Self::InvalidSyntax(tag(d)),
            Self::InvalidValue(d) => Self::InvalidValue(tag(d)),
            Self::Mutability(d) => Self::Mutability(tag(d)),
            Self::Uniqueness(d) => Self::Uniqueness(tag(d)),
            Self::NoTarget(d) => Self::NoTarget(tag(d)),
            Self::TooMany(d) => Self::TooMany(tag(d)),
            Self::Sensitive(d) => Self::Sensitive(tag(d)),
            Self::NotFound(d) => Self::NotFound(tag(d)),
            Self::PreCondition(d) => Self::PreCondition(tag(d)),
            Self::Internal(d) => Self::Internal(tag(d)),
            Self::Cancelled(d) => Self::Cancelled(tag(d)),
        }
    }
}

impl From<serde_json::Error> for ScimError {
    fn from(err: serde_json::Error) -> Self {
        Self::InvalidSyntax(err.to_string())
    }
}

/// Result type alias used throughout the crate.
pub type ScimResult<T> = Result<T, ScimError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        assert_eq!(ScimError::invalid_filter("x").http_status(), 400);
        assert_eq!(ScimError::uniqueness("x").http_status(), 409);
        assert_eq!(ScimError::not_found("x").http_status(), 404);
        assert_eq!(ScimError::pre_condition("x").http_status(), 412);
        assert_eq!(ScimError::internal("x").http_status(), 500);
    }

    #[test]
    fn test_error_resource() {
        let body = ScimError::mutability("id is read only").to_resource();
        assert_eq!(body["schemas"][0], ERROR_SCHEMA);
        assert_eq!(body["status"], "400");
        assert_eq!(body["scimType"], "mutability");
        assert!(body["detail"].as_str().unwrap().contains("read only"));
    }

    #[test]
    fn test_at_path_prefix() {
        let err = ScimError::invalid_value("expected a string").at_path("name.givenName");
        assert!(err.to_string().contains("[name.givenName]"));
    }
}
