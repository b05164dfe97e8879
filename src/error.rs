//! Error types for the resolver gateway

use crate::grpc_client::BackendFailure;
use crate::types::{Location, PathSegment};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use thiserror::Error;

/// Result type alias using our Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for the gateway
///
/// Startup errors (`SchemaLoad`, `UnboundField`, `DuplicateBinding`,
/// `UnknownBinding`, `Config`) abort gateway construction. The remaining
/// variants surface while serving traffic.
#[derive(Error, Debug)]
pub enum Error {
    /// The schema document is malformed or internally inconsistent
    #[error("schema load error: {0}")]
    SchemaLoad(String),

    /// A root operation field has no resolver bound to it
    #[error("no resolver bound for {type_name}.{field}")]
    UnboundField { type_name: String, field: String },

    /// A field was bound to more than one resolver
    #[error("resolver for {type_name}.{field} is bound more than once")]
    DuplicateBinding { type_name: String, field: String },

    /// A binding targets a type or field the schema does not declare
    #[error("cannot bind resolver: {0}")]
    UnknownBinding(String),

    /// Invalid gateway configuration
    #[error("configuration error: {0}")]
    Config(String),

    /// gRPC status errors
    #[error("gRPC error: {0}")]
    Grpc(#[from] tonic::Status),

    /// gRPC transport errors
    #[error("gRPC transport error: {0}")]
    Transport(#[from] tonic::transport::Error),

    /// Connection errors
    #[error("Connection error: {0}")]
    Connection(String),

    /// No gRPC client registered under the requested name
    #[error("no gRPC client registered as '{0}'")]
    UnknownBackend(String),

    /// Middleware errors
    #[error("Middleware error: {0}")]
    Middleware(String),

    /// Serialization errors
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Any other error
    #[error("Error: {0}")]
    Other(#[from] anyhow::Error),
}

impl Error {
    /// Convert error to GraphQL error format
    pub fn to_graphql_error(&self) -> GraphQLError {
        GraphQLError::new(self.to_string(), self.code())
    }

    /// Stable machine-readable classification of this error.
    pub fn code(&self) -> ErrorCode {
        match self {
            Error::Grpc(status) => FieldError::from(status.clone()).code(),
            Error::Transport(_) | Error::Connection(_) => ErrorCode::Unavailable,
            Error::Middleware(_) => ErrorCode::InvalidArgument,
            _ => ErrorCode::Internal,
        }
    }
}

/// Stable error codes written to `extensions.code` of every response error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    DocumentInvalid,
    Unauthenticated,
    NotFound,
    PermissionDenied,
    InvalidArgument,
    Unavailable,
    Internal,
    Cancelled,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::DocumentInvalid => "DOCUMENT_INVALID",
            ErrorCode::Unauthenticated => "UNAUTHENTICATED",
            ErrorCode::NotFound => "NOT_FOUND",
            ErrorCode::PermissionDenied => "PERMISSION_DENIED",
            ErrorCode::InvalidArgument => "INVALID_ARGUMENT",
            ErrorCode::Unavailable => "UNAVAILABLE",
            ErrorCode::Internal => "INTERNAL",
            ErrorCode::Cancelled => "CANCELLED",
        }
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What went wrong while resolving a single field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldErrorKind {
    /// No usable identity on the request context
    Unauthenticated,
    /// The backend RPC failed with a classified status
    Backend(BackendFailure),
    /// The request was cancelled while the field was resolving
    Cancelled,
    /// The resolver or value completion failed
    Internal,
}

/// Error scoped to one resolved field.
///
/// Field errors never abort a request: the engine records them in the
/// response `errors` list and nulls the nearest nullable position.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{message}")]
pub struct FieldError {
    kind: FieldErrorKind,
    message: String,
}

impl FieldError {
    pub fn new(kind: FieldErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn unauthenticated(message: impl Into<String>) -> Self {
        Self::new(FieldErrorKind::Unauthenticated, message)
    }

    pub fn backend(failure: BackendFailure, message: impl Into<String>) -> Self {
        Self::new(FieldErrorKind::Backend(failure), message)
    }

    pub fn cancelled() -> Self {
        Self::new(FieldErrorKind::Cancelled, "request cancelled")
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(FieldErrorKind::Internal, message)
    }

    pub fn kind(&self) -> &FieldErrorKind {
        &self.kind
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn code(&self) -> ErrorCode {
        match &self.kind {
            FieldErrorKind::Unauthenticated => ErrorCode::Unauthenticated,
            FieldErrorKind::Backend(failure) => failure.code(),
            FieldErrorKind::Cancelled => ErrorCode::Cancelled,
            FieldErrorKind::Internal => ErrorCode::Internal,
        }
    }
}

impl From<tonic::Status> for FieldError {
    fn from(status: tonic::Status) -> Self {
        let message = status.message().to_string();
        match status.code() {
            tonic::Code::Unauthenticated => FieldError::unauthenticated(message),
            tonic::Code::Cancelled => FieldError::new(FieldErrorKind::Cancelled, message),
            _ => FieldError::backend(BackendFailure::from(&status), message),
        }
    }
}

impl From<async_graphql::SerializerError> for FieldError {
    fn from(err: async_graphql::SerializerError) -> Self {
        FieldError::internal(format!("cannot serialize resolver output: {err}"))
    }
}

/// GraphQL error response format
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphQLError {
    pub message: String,
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub locations: Vec<Location>,
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub path: Vec<PathSegment>,
    #[serde(skip_serializing_if = "HashMap::is_empty", default)]
    pub extensions: HashMap<String, serde_json::Value>,
}

impl GraphQLError {
    pub fn new(message: impl Into<String>, code: ErrorCode) -> Self {
        let mut extensions = HashMap::new();
        extensions.insert("code".to_string(), serde_json::json!(code.as_str()));
        Self {
            message: message.into(),
            locations: Vec::new(),
            path: Vec::new(),
            extensions,
        }
    }

    pub fn with_locations(mut self, locations: Vec<Location>) -> Self {
        self.locations = locations;
        self
    }

    pub fn with_path(mut self, path: Vec<PathSegment>) -> Self {
        self.path = path;
        self
    }

    /// The `extensions.code` value, if present.
    pub fn code(&self) -> Option<&str> {
        self.extensions.get("code").and_then(|v| v.as_str())
    }

    pub(crate) fn from_field_error(
        err: &FieldError,
        path: Vec<PathSegment>,
        location: Option<Location>,
    ) -> Self {
        GraphQLError::new(err.message(), err.code())
            .with_path(path)
            .with_locations(location.into_iter().collect())
    }
}

impl From<Error> for GraphQLError {
    fn from(err: Error) -> Self {
        err.to_graphql_error()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backend_status_maps_to_stable_codes() {
        let cases = [
            (tonic::Status::not_found("gone"), ErrorCode::NotFound),
            (tonic::Status::permission_denied("no"), ErrorCode::PermissionDenied),
            (tonic::Status::invalid_argument("bad"), ErrorCode::InvalidArgument),
            (tonic::Status::failed_precondition("bad"), ErrorCode::InvalidArgument),
            (tonic::Status::unavailable("down"), ErrorCode::Unavailable),
            (tonic::Status::deadline_exceeded("slow"), ErrorCode::Unavailable),
            (tonic::Status::internal("boom"), ErrorCode::Internal),
            (tonic::Status::unknown("?"), ErrorCode::Internal),
            (tonic::Status::unauthenticated("who"), ErrorCode::Unauthenticated),
            (tonic::Status::cancelled("stop"), ErrorCode::Cancelled),
        ];

        for (status, code) in cases {
            let err = FieldError::from(status);
            assert_eq!(err.code(), code, "{err:?}");
        }
    }

    #[test]
    fn field_error_keeps_backend_message() {
        let err = FieldError::from(tonic::Status::not_found("cluster c1 not found"));
        assert_eq!(err.message(), "cluster c1 not found");
        assert_eq!(err.kind(), &FieldErrorKind::Backend(BackendFailure::NotFound));
    }

    #[test]
    fn graphql_error_serializes_code_and_path() {
        let err = GraphQLError::new("nope", ErrorCode::Unauthenticated)
            .with_path(vec![PathSegment::Field("user".into())])
            .with_locations(vec![Location { line: 1, column: 3 }]);

        let json = serde_json::to_value(&err).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "message": "nope",
                "locations": [{"line": 1, "column": 3}],
                "path": ["user"],
                "extensions": {"code": "UNAUTHENTICATED"}
            })
        );
    }

    #[test]
    fn startup_errors_are_internal() {
        let err = Error::UnboundField {
            type_name: "Query".into(),
            field: "user".into(),
        };
        assert_eq!(err.to_string(), "no resolver bound for Query.user");
        assert_eq!(err.code(), ErrorCode::Internal);
    }
}
