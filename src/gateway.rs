//! Gateway builder and main orchestration

use crate::config::GatewayConfig;
use crate::engine::{ExecutionEngine, DEFAULT_MAX_PARALLELISM};
use crate::error::{Error, GraphQLError, Result};
use crate::grpc_client::{GrpcClient, GrpcClientPool};
use crate::middleware::{IdentityHeaderMiddleware, Middleware, DEFAULT_IDENTITY_HEADER};
use crate::registry::ResolverRegistry;
use crate::resolver::FieldResolver;
use crate::runtime::{ErrorHandler, ServeMux};
use crate::schema::{Schema, SchemaLoader};
use crate::types::OperationType;
use axum::Router;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

/// Main Gateway struct - entry point for the library
pub struct Gateway {
    mux: ServeMux,
    client_pool: GrpcClientPool,
    schema: Schema,
    listen_addr: String,
}

impl Gateway {
    /// Create a new gateway builder
    pub fn builder() -> GatewayBuilder {
        GatewayBuilder::new()
    }

    /// Get the ServeMux
    pub fn mux(&self) -> &ServeMux {
        &self.mux
    }

    /// Access the loaded GraphQL schema
    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    /// Get the client pool
    pub fn client_pool(&self) -> &GrpcClientPool {
        &self.client_pool
    }

    /// Address used by [`Gateway::serve`]
    pub fn listen_addr(&self) -> &str {
        &self.listen_addr
    }

    /// Convert gateway into Axum router
    pub fn into_router(self) -> Router {
        self.mux.into_router()
    }

    /// Serve on the configured listen address until the process stops.
    pub async fn serve(self) -> Result<()> {
        let listener = tokio::net::TcpListener::bind(&self.listen_addr).await?;
        tracing::info!("Gateway server listening on {}", self.listen_addr);

        axum::serve(listener, self.into_router()).await?;
        Ok(())
    }
}

enum SchemaSource {
    Loader(SchemaLoader),
    Ready(Schema),
}

/// Builder for creating a Gateway
///
/// Collects the schema, resolver bindings, backends and middleware. `build`
/// seals the bindings against the schema, so a gateway with an unbound Query
/// or Mutation field never starts.
pub struct GatewayBuilder {
    client_pool: GrpcClientPool,
    schema: Option<SchemaSource>,
    registry: ResolverRegistry,
    middlewares: Vec<Arc<dyn Middleware>>,
    error_handler: Option<ErrorHandler>,
    max_parallelism: usize,
    request_timeout: Option<Duration>,
    identity_header: String,
    listen_addr: String,
}

impl GatewayBuilder {
    /// Create a new gateway builder
    pub fn new() -> Self {
        let defaults = GatewayConfig::default();
        Self {
            client_pool: GrpcClientPool::new(),
            schema: None,
            registry: ResolverRegistry::new(),
            middlewares: Vec::new(),
            error_handler: None,
            max_parallelism: DEFAULT_MAX_PARALLELISM,
            request_timeout: None,
            identity_header: DEFAULT_IDENTITY_HEADER.to_string(),
            listen_addr: defaults.listen_addr,
        }
    }

    /// Apply a loaded configuration, including its schema file if set.
    pub fn with_config(mut self, config: GatewayConfig) -> Result<Self> {
        if let Some(path) = &config.schema_path {
            self = self.with_schema_file(path)?;
        }
        self.max_parallelism = config.max_parallelism;
        self.request_timeout = config.request_timeout();
        self.identity_header = config.identity_header;
        self.listen_addr = config.listen_addr;
        Ok(self)
    }

    /// Use an already loaded schema
    pub fn with_schema(mut self, schema: Schema) -> Self {
        self.schema = Some(SchemaSource::Ready(schema));
        self
    }

    /// Provide the schema as SDL text; it is parsed by `build`
    pub fn with_schema_sdl(mut self, sdl: impl Into<String>) -> Self {
        self.schema = Some(SchemaSource::Loader(SchemaLoader::new().with_sdl(sdl)));
        self
    }

    /// Read the schema SDL from a file
    pub fn with_schema_file(mut self, path: impl AsRef<Path>) -> Result<Self> {
        self.schema = Some(SchemaSource::Loader(SchemaLoader::new().with_sdl_file(path)?));
        Ok(self)
    }

    /// Bind a resolver to a `Query` field
    pub fn bind_query<R>(mut self, field: impl Into<String>, resolver: R) -> Self
    where
        R: FieldResolver + 'static,
    {
        self.registry.bind(OperationType::Query, field, resolver);
        self
    }

    /// Bind a resolver to a `Mutation` field
    pub fn bind_mutation<R>(mut self, field: impl Into<String>, resolver: R) -> Self
    where
        R: FieldResolver + 'static,
    {
        self.registry.bind(OperationType::Mutation, field, resolver);
        self
    }

    /// Bind a resolver to a field of any object or interface type
    ///
    /// Interface bindings apply to implementing object types that have no
    /// binding of their own for the field.
    pub fn bind_field<R>(
        mut self,
        type_name: impl Into<String>,
        field: impl Into<String>,
        resolver: R,
    ) -> Self
    where
        R: FieldResolver + 'static,
    {
        self.registry.bind_field(type_name, field, resolver);
        self
    }

    /// Add a gRPC client to the pool
    pub fn add_grpc_client(self, name: impl Into<String>, client: GrpcClient) -> Self {
        self.client_pool.add(name, client);
        self
    }

    /// Add many gRPC clients in one shot.
    pub fn add_grpc_clients<I>(self, clients: I) -> Self
    where
        I: IntoIterator<Item = (String, GrpcClient)>,
    {
        for (name, client) in clients {
            self.client_pool.add(name, client);
        }
        self
    }

    /// Add middleware
    ///
    /// Runs after the identity header middleware, in registration order.
    pub fn add_middleware<M: Middleware + 'static>(mut self, middleware: M) -> Self {
        self.middlewares.push(Arc::new(middleware));
        self
    }

    /// Provide a handler to inspect GraphQL errors before they are returned.
    pub fn with_error_handler<F>(mut self, handler: F) -> Self
    where
        F: Fn(Vec<GraphQLError>) + Send + Sync + 'static,
    {
        self.error_handler = Some(Arc::new(handler));
        self
    }

    /// Cap on concurrently running resolvers within one request
    pub fn max_parallelism(mut self, limit: usize) -> Self {
        self.max_parallelism = limit;
        self
    }

    /// Deadline applied to every request
    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = Some(timeout);
        self
    }

    /// Header the identity middleware reads
    pub fn identity_header(mut self, header: impl Into<String>) -> Self {
        self.identity_header = header.into();
        self
    }

    /// Address used by [`Gateway::serve`]
    pub fn listen_addr(mut self, addr: impl Into<String>) -> Self {
        self.listen_addr = addr.into();
        self
    }

    /// Build the gateway
    pub fn build(self) -> Result<Gateway> {
        if self.max_parallelism == 0 {
            return Err(Error::Config("max_parallelism must be at least 1".into()));
        }

        let schema = match self.schema {
            Some(SchemaSource::Ready(schema)) => schema,
            Some(SchemaSource::Loader(loader)) => loader.load()?,
            None => return Err(Error::SchemaLoad("no schema provided".into())),
        };

        let registry = self.registry.seal(&schema).map_err(|e| {
            tracing::error!(error = %e, "resolver bindings rejected");
            e
        })?;

        let engine = ExecutionEngine::new(
            schema.clone(),
            registry,
            self.client_pool.clone(),
            self.max_parallelism,
        );
        let mut mux = ServeMux::new(engine);
        mux.set_request_timeout(self.request_timeout);
        mux.add_middleware(Arc::new(IdentityHeaderMiddleware::new(self.identity_header)));

        // Add middlewares
        for middleware in self.middlewares {
            mux.add_middleware(middleware);
        }

        if let Some(handler) = self.error_handler {
            mux.set_error_handler_arc(handler);
        }

        tracing::info!(
            backends = ?self.client_pool.names(),
            max_parallelism = self.max_parallelism,
            request_timeout = ?self.request_timeout,
            "gateway built"
        );

        Ok(Gateway {
            mux,
            client_pool: self.client_pool,
            schema,
            listen_addr: self.listen_addr,
        })
    }

    /// Build and start the gateway server
    pub async fn serve(self, addr: impl Into<String>) -> Result<()> {
        self.listen_addr(addr).build()?.serve().await
    }
}

impl Default for GatewayBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resolver::{FieldContext, FieldResult};
    use async_graphql::Value;

    const SDL: &str = r#"
        type Query { user: UserInfo ping: String }
        type UserInfo { id: ID! }
    "#;

    async fn pong(_ctx: FieldContext) -> FieldResult {
        Ok(Value::from("pong"))
    }

    #[test]
    fn build_requires_schema() {
        let result = GatewayBuilder::new().build();
        assert!(matches!(result, Err(Error::SchemaLoad(_))));
    }

    #[test]
    fn unbound_field_fails_build() {
        let result = Gateway::builder()
            .with_schema_sdl(SDL)
            .bind_query("user", pong)
            .build();

        match result {
            Err(Error::UnboundField { type_name, field }) => {
                assert_eq!(type_name, "Query");
                assert_eq!(field, "ping");
            }
            Err(other) => panic!("expected UnboundField, got {other}"),
            Ok(_) => panic!("expected build to fail"),
        }
    }

    #[test]
    fn invalid_sdl_fails_build() {
        let result = Gateway::builder().with_schema_sdl("type Query {").build();
        assert!(matches!(result, Err(Error::SchemaLoad(_))));
    }

    #[tokio::test]
    async fn builds_with_every_root_field_bound() {
        let gateway = Gateway::builder()
            .with_schema_sdl(SDL)
            .bind_query("user", pong)
            .bind_query("ping", pong)
            .max_parallelism(3)
            .build()
            .unwrap();

        assert_eq!(gateway.mux().engine().max_parallelism(), 3);
        assert!(gateway.schema().get_type("UserInfo").is_some());
        assert_eq!(gateway.client_pool().names().len(), 0);
        assert_eq!(gateway.listen_addr(), "0.0.0.0:8888");
    }

    #[tokio::test]
    async fn config_is_applied() {
        let path = std::env::temp_dir().join(format!("gateway-schema-{}.graphql", std::process::id()));
        std::fs::write(&path, SDL).unwrap();

        let config = GatewayConfig {
            listen_addr: "127.0.0.1:0".into(),
            max_parallelism: 7,
            request_timeout_ms: Some(100),
            schema_path: Some(path.clone()),
            ..GatewayConfig::default()
        };
        let gateway = Gateway::builder()
            .with_config(config)
            .unwrap()
            .bind_query("user", pong)
            .bind_query("ping", pong)
            .build()
            .unwrap();
        std::fs::remove_file(&path).unwrap();

        assert_eq!(gateway.listen_addr(), "127.0.0.1:0");
        assert_eq!(gateway.mux().engine().max_parallelism(), 7);
    }

    #[test]
    fn zero_parallelism_is_rejected() {
        let result = Gateway::builder()
            .with_schema_sdl(SDL)
            .bind_query("user", pong)
            .bind_query("ping", pong)
            .max_parallelism(0)
            .build();
        assert!(matches!(result, Err(Error::Config(_))));
    }
}
