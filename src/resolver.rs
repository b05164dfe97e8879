//! Field resolver contract.
//!
//! A resolver receives a [`FieldContext`] (request context, coerced
//! arguments, parent object) and produces the field's value or a
//! [`FieldError`]. Argument shape was already checked by the engine, so
//! resolvers only decode and use them.
//!
//! # Example
//!
//! ```rust,ignore
//! registry.bind(OperationType::Query, "cluster", |ctx: FieldContext| async move {
//!     let id: String = ctx.try_argument("id")?;
//!     let mut client = ClusterServiceClient::new(ctx.grpc_channel("clusters")?);
//!     let reply = client.get_cluster(ctx.grpc_request(GetClusterRequest { id })).await?;
//!     Ok(async_graphql::to_value(reply.into_inner())?)
//! });
//! ```

use crate::auth::{self, AuthenticatedIdentity};
use crate::context::RequestContext;
use crate::error::FieldError;
use crate::grpc_client::GrpcClientPool;
use crate::types::PathSegment;
use async_graphql::indexmap::IndexMap;
use async_graphql::{Name, Value};
use serde::de::DeserializeOwned;
use std::future::Future;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tonic::transport::Channel;

/// Outcome of one resolver invocation.
pub type FieldResult = std::result::Result<Value, FieldError>;

/// Shared handle to a bound resolver.
pub type BoxedResolver = Arc<dyn FieldResolver>;

/// Resolves the value of one schema field.
#[async_trait::async_trait]
pub trait FieldResolver: Send + Sync {
    async fn resolve(&self, ctx: FieldContext) -> FieldResult;
}

#[async_trait::async_trait]
impl<F, Fut> FieldResolver for F
where
    F: Fn(FieldContext) -> Fut + Send + Sync,
    Fut: Future<Output = FieldResult> + Send,
{
    async fn resolve(&self, ctx: FieldContext) -> FieldResult {
        (self)(ctx).await
    }
}

/// Reads the field from the parent object by name.
///
/// Used for every non-root field without an explicit binding. Missing keys
/// resolve to `null`.
#[derive(Debug, Clone, Copy, Default)]
pub struct PropertyResolver;

#[async_trait::async_trait]
impl FieldResolver for PropertyResolver {
    async fn resolve(&self, ctx: FieldContext) -> FieldResult {
        Ok(match ctx.parent() {
            Value::Object(object) => object
                .get(ctx.field_name())
                .cloned()
                .unwrap_or(Value::Null),
            _ => Value::Null,
        })
    }
}

/// Everything a resolver may read while resolving one field.
#[derive(Clone)]
pub struct FieldContext {
    request: Arc<RequestContext>,
    backends: GrpcClientPool,
    parent_type: Arc<str>,
    field_name: Name,
    arguments: IndexMap<Name, Value>,
    parent: Value,
    path: Vec<PathSegment>,
}

impl FieldContext {
    pub(crate) fn new(
        request: Arc<RequestContext>,
        backends: GrpcClientPool,
        parent_type: Arc<str>,
        field_name: Name,
        arguments: IndexMap<Name, Value>,
        parent: Value,
        path: Vec<PathSegment>,
    ) -> Self {
        Self {
            request,
            backends,
            parent_type,
            field_name,
            arguments,
            parent,
            path,
        }
    }

    pub fn request(&self) -> &RequestContext {
        &self.request
    }

    /// The caller's identity, or an `UNAUTHENTICATED` field error.
    pub fn identity(&self) -> Result<Arc<AuthenticatedIdentity>, FieldError> {
        auth::extract(&self.request)
    }

    pub fn parent_type(&self) -> &str {
        &self.parent_type
    }

    pub fn field_name(&self) -> &str {
        self.field_name.as_str()
    }

    /// Resolved value of the parent field; `null` for root fields.
    pub fn parent(&self) -> &Value {
        &self.parent
    }

    /// Decode the parent object into a typed value.
    pub fn parent_as<T: DeserializeOwned>(&self) -> Result<T, FieldError> {
        async_graphql::from_value(self.parent.clone())
            .map_err(|e| FieldError::internal(format!("cannot decode parent object: {e}")))
    }

    pub fn path(&self) -> &[PathSegment] {
        &self.path
    }

    /// Coerced arguments, including declared defaults.
    pub fn arguments(&self) -> &IndexMap<Name, Value> {
        &self.arguments
    }

    pub fn argument(&self, name: &str) -> Option<&Value> {
        self.arguments.get(name)
    }

    /// Decode one argument; absent arguments decode from `null`.
    pub fn try_argument<T: DeserializeOwned>(&self, name: &str) -> Result<T, FieldError> {
        let value = self.argument(name).cloned().unwrap_or(Value::Null);
        async_graphql::from_value(value).map_err(|e| {
            FieldError::internal(format!("cannot decode argument '{name}': {e}"))
        })
    }

    /// Decode all arguments as one object.
    pub fn arguments_as<T: DeserializeOwned>(&self) -> Result<T, FieldError> {
        async_graphql::from_value(Value::Object(self.arguments.clone()))
            .map_err(|e| FieldError::internal(format!("cannot decode arguments: {e}")))
    }

    /// Channel to the named backend service.
    pub fn grpc_channel(&self, backend: &str) -> Result<Channel, FieldError> {
        self.backends
            .channel(backend)
            .map_err(|e| FieldError::internal(e.to_string()))
    }

    /// Wrap an RPC message, carrying the request's remaining deadline.
    pub fn grpc_request<T>(&self, message: T) -> tonic::Request<T> {
        let mut request = tonic::Request::new(message);
        if let Some(remaining) = self.request.remaining() {
            request.set_timeout(remaining);
        }
        request
    }

    /// Cancelled when the request is cancelled or its deadline passes.
    pub fn cancellation(&self) -> &CancellationToken {
        self.request.cancellation()
    }
}

impl std::fmt::Debug for FieldContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FieldContext")
            .field("parent_type", &self.parent_type)
            .field("field_name", &self.field_name)
            .field("path", &self.path)
            .finish()
    }
}
