//! HTTP Client Error Types
//!
//! Every outcome of a request that isn't a decoded value ends up as one of the
//! [`ErrorKind`] variants below. Callers match on the kind; nothing downstream
//! should need to re-inspect response bodies.

use derive_more::{Display, Error};
use serde::Serialize;

/// An HTTP client error with automatic location tracking.
pub type Error = exn::Exn<ErrorKind>;
/// Result type alias for HTTP client operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Fixed message for responses that don't match the expected shape.
pub const SCHEMA_VALIDATION_MESSAGE: &str = "Response schema validation failed";

/// Classified failure returned by the API (or synthesized for it).
#[derive(Debug, Clone, PartialEq, Eq, Display, Serialize)]
#[display("{message} ({status})")]
pub struct ApiError {
    pub status: u16,
    /// User-facing message
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    /// Offending request field, when the server names one
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parameter: Option<String>,
}
impl ApiError {
    pub fn new(status: u16, message: impl Into<String>) -> Self {
        Self { status, message: message.into(), code: None, parameter: None }
    }

    pub fn with_code(mut self, code: impl Into<String>) -> Self {
        self.code = Some(code.into());
        self
    }

    pub fn with_parameter(mut self, parameter: impl Into<String>) -> Self {
        self.parameter = Some(parameter.into());
        self
    }
}

#[derive(Debug, Display, Error)]
pub enum ErrorKind {
    /// The request never produced a response
    #[display("network error: {_0}")]
    Network(#[error(not(source))] String),
    /// Non-2xx response
    #[display("{_0}")]
    Http(#[error(not(source))] ApiError),
    /// Success response whose body doesn't decode into the expected type
    #[display("{_0}")]
    SchemaValidation(#[error(not(source))] ApiError),
    /// 401 outside the sign-in/sign-up endpoints; the session has been torn down
    #[display("session expired: {_0}")]
    SessionExpired(#[error(not(source))] ApiError),
    /// Request could not be built locally (bad header, unserializable body)
    #[display("invalid request: {_0}")]
    InvalidRequest(#[error(not(source))] String),
}

impl ErrorKind {
    pub(crate) fn schema_validation() -> Self {
        Self::SchemaValidation(ApiError::new(500, SCHEMA_VALIDATION_MESSAGE))
    }

    /// Classified HTTP status. Schema failures always report 500.
    pub fn status(&self) -> Option<u16> {
        self.api_error().map(|error| error.status)
    }

    pub fn api_error(&self) -> Option<&ApiError> {
        match self {
            Self::Http(error) | Self::SchemaValidation(error) | Self::SessionExpired(error) => Some(error),
            Self::Network(_) | Self::InvalidRequest(_) => None,
        }
    }

    /// Server-provided error code, if any.
    pub fn code(&self) -> Option<&str> {
        self.api_error().and_then(|error| error.code.as_deref())
    }

    /// Returns `true` if retrying might succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Network(_) => true,
            Self::Http(error) => error.status >= 500 || matches!(error.status, 408 | 429),
            Self::SchemaValidation(_) | Self::SessionExpired(_) | Self::InvalidRequest(_) => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[test]
    fn test_schema_validation_is_500() {
        let kind = ErrorKind::schema_validation();
        assert_eq!(kind.status(), Some(500));
        assert_eq!(kind.to_string(), "Response schema validation failed (500)");
    }

    #[test]
    fn test_code_accessor() {
        let kind = ErrorKind::Http(ApiError::new(401, "nope").with_code("INVALID_CREDENTIALS"));
        assert_eq!(kind.code(), Some("INVALID_CREDENTIALS"));
        assert_eq!(ErrorKind::Network("refused".into()).code(), None);
    }

    #[rstest]
    #[case::network(ErrorKind::Network("refused".into()), true)]
    #[case::server(ErrorKind::Http(ApiError::new(503, "down")), true)]
    #[case::throttled(ErrorKind::Http(ApiError::new(429, "slow down")), true)]
    #[case::client(ErrorKind::Http(ApiError::new(404, "missing")), false)]
    #[case::session(ErrorKind::SessionExpired(ApiError::new(401, "expired")), false)]
    #[case::schema(ErrorKind::schema_validation(), false)]
    fn test_retryable(#[case] kind: ErrorKind, #[case] expected: bool) {
        assert_eq!(kind.is_retryable(), expected);
    }
}
