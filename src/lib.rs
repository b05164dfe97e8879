//! # grpc-graphql-resolver-gateway
//!
//! A GraphQL gateway that serves a static SDL schema and resolves each field
//! through a resolver bound at startup, typically one calling a gRPC backend.
//!
//! ## Features
//!
//! - **Schema-first**: the schema is SDL, loaded and validated once at startup
//! - **Fail-fast bindings**: every `Query` and `Mutation` field must have a
//!   resolver before the gateway builds
//! - **Concurrent execution**: sibling fields resolve concurrently under a
//!   per-request parallelism cap, and responses keep document order
//! - **Localized errors**: a failing field becomes `null` plus one error; it
//!   never fails the whole request
//! - **Identity**: resolvers read the caller identity attached upstream
//! - **Cancellation**: client disconnects and request deadlines stop
//!   outstanding resolvers and backend calls
//!
//! ## Main Components
//!
//! - [`Gateway`]: The main entry point for creating and running the gateway.
//! - [`GatewayBuilder`]: Configuration builder for the gateway.
//! - [`SchemaLoader`]: Loads and validates the SDL schema.
//! - [`ResolverRegistry`]: Binds schema fields to [`FieldResolver`]s.
//! - [`ExecutionEngine`]: Executes requests against the bound resolvers.
//! - [`GrpcClient`]: Manages connections to gRPC services.
//!
//! ## Example
//!
//! ```rust,no_run
//! use grpc_graphql_resolver_gateway::{FieldContext, FieldResult, Gateway};
//!
//! async fn user(ctx: FieldContext) -> FieldResult {
//!     let identity = ctx.identity()?;
//!     Ok(async_graphql::value!({ "id": identity.user_id.clone() }))
//! }
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let gateway = Gateway::builder()
//!         .with_schema_sdl("type Query { user: UserInfo } type UserInfo { id: ID! }")
//!         .bind_query("user", user)
//!         .build()?;
//!
//!     let app = gateway.into_router();
//!
//!     let listener = tokio::net::TcpListener::bind("0.0.0.0:8888").await?;
//!     axum::serve(listener, app).await?;
//!
//!     Ok(())
//! }
//! ```

pub mod auth;
pub mod config;
pub mod context;
pub mod engine;
pub mod error;
pub mod gateway;
pub mod grpc_client;
pub mod middleware;
pub mod registry;
pub mod resolver;
pub mod runtime;
pub mod schema;
pub mod types;

pub use auth::AuthenticatedIdentity;
pub use config::GatewayConfig;
pub use context::RequestContext;
pub use engine::{ExecutionEngine, ExecutionPhase};
pub use error::{Error, ErrorCode, FieldError, GraphQLError, Result};
pub use gateway::{Gateway, GatewayBuilder};
pub use grpc_client::{GrpcClient, GrpcClientPool};
pub use middleware::{IdentityHeaderMiddleware, Middleware};
pub use registry::{BoundRegistry, ResolverRegistry};
pub use resolver::{FieldContext, FieldResolver, FieldResult};
pub use runtime::ServeMux;
pub use schema::{Schema, SchemaLoader};
pub use types::{GraphQLRequest, GraphQLResponse, OperationType};
