//! Type definitions for the GraphQL gateway

use async_graphql::Value;
use serde::{Deserialize, Serialize};

/// GraphQL request from client
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GraphQLRequest {
    /// GraphQL query string
    #[serde(default)]
    pub query: String,

    /// Operation name (optional)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub operation_name: Option<String>,

    /// Variables for the query
    #[serde(default)]
    pub variables: serde_json::Map<String, serde_json::Value>,
}

impl GraphQLRequest {
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            ..Default::default()
        }
    }

    pub fn operation_name(mut self, name: impl Into<String>) -> Self {
        self.operation_name = Some(name.into());
        self
    }

    pub fn variables(mut self, variables: serde_json::Value) -> Self {
        if let serde_json::Value::Object(map) = variables {
            self.variables = map;
        }
        self
    }
}

impl TryFrom<async_graphql::Request> for GraphQLRequest {
    type Error = crate::error::GraphQLError;

    /// Variables that cannot be represented as a JSON object reject the
    /// request as `DOCUMENT_INVALID`.
    fn try_from(request: async_graphql::Request) -> Result<Self, Self::Error> {
        let invalid = |reason: String| {
            crate::error::GraphQLError::new(
                format!("invalid variables: {reason}"),
                crate::error::ErrorCode::DocumentInvalid,
            )
        };
        let variables = match request.variables.into_value().into_json() {
            Ok(serde_json::Value::Object(map)) => map,
            Ok(other) => return Err(invalid(format!("expected an object, found {other}"))),
            Err(e) => return Err(invalid(e.to_string())),
        };
        Ok(Self {
            query: request.query,
            operation_name: request.operation_name,
            variables,
        })
    }
}

/// GraphQL response to client
///
/// `data` is an `async_graphql::Value` so object keys keep document order
/// when serialized.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraphQLResponse {
    /// Response data. `None` means the key is omitted entirely.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,

    /// Errors if any
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub errors: Vec<crate::error::GraphQLError>,
}

impl GraphQLResponse {
    /// Create a successful response
    pub fn success(data: Value) -> Self {
        Self {
            data: Some(data),
            errors: Vec::new(),
        }
    }

    /// Create an error response
    pub fn error(error: crate::error::GraphQLError) -> Self {
        Self {
            data: None,
            errors: vec![error],
        }
    }

    /// Create an error response from multiple errors
    pub fn errors(errors: Vec<crate::error::GraphQLError>) -> Self {
        Self { data: None, errors }
    }

    pub fn is_ok(&self) -> bool {
        self.errors.is_empty()
    }

    /// Serialize into a JSON value. Object keys keep document order.
    pub fn to_json(&self) -> serde_json::Result<serde_json::Value> {
        serde_json::to_value(self)
    }
}

/// Root operation kinds a schema can declare.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OperationType {
    Query,
    Mutation,
    Subscription,
}

impl OperationType {
    /// Conventional root type name used when the schema has no `schema { .. }` block.
    pub fn default_type_name(&self) -> &'static str {
        match self {
            OperationType::Query => "Query",
            OperationType::Mutation => "Mutation",
            OperationType::Subscription => "Subscription",
        }
    }
}

impl std::fmt::Display for OperationType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OperationType::Query => f.write_str("query"),
            OperationType::Mutation => f.write_str("mutation"),
            OperationType::Subscription => f.write_str("subscription"),
        }
    }
}

impl From<async_graphql::parser::types::OperationType> for OperationType {
    fn from(ty: async_graphql::parser::types::OperationType) -> Self {
        use async_graphql::parser::types::OperationType as Parsed;
        match ty {
            Parsed::Query => OperationType::Query,
            Parsed::Mutation => OperationType::Mutation,
            Parsed::Subscription => OperationType::Subscription,
        }
    }
}

/// One step of a response path: a field response key or a list index.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PathSegment {
    Field(String),
    Index(usize),
}

/// Source position in the request document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Location {
    pub line: usize,
    pub column: usize,
}

impl From<async_graphql::Pos> for Location {
    fn from(pos: async_graphql::Pos) -> Self {
        Self {
            line: pos.line,
            column: pos.column,
        }
    }
}
