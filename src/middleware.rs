//! Middleware support for the gateway

use crate::auth::AuthenticatedIdentity;
use crate::context::RequestContext;
use crate::error::Result;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;

/// Header carrying the upstream-authenticated identity.
pub const DEFAULT_IDENTITY_HEADER: &str = "x-authenticated-identity";

/// Middleware trait for processing requests
///
/// Middleware runs in registration order before the request is executed and
/// may populate the [`RequestContext`]. An error aborts the request with a
/// response that carries only top-level errors.
///
/// # Example
///
/// ```rust,ignore
/// use grpc_graphql_resolver_gateway::middleware::Middleware;
/// use grpc_graphql_resolver_gateway::{RequestContext, Result};
///
/// struct TenantMiddleware;
///
/// #[async_trait::async_trait]
/// impl Middleware for TenantMiddleware {
///     async fn call(&self, ctx: &mut RequestContext) -> Result<()> {
///         let tenant = ctx.headers.get("x-tenant").and_then(|v| v.to_str().ok());
///         ctx.insert("tenant", serde_json::json!(tenant));
///         Ok(())
///     }
/// }
/// ```
#[async_trait::async_trait]
pub trait Middleware: Send + Sync {
    /// Process the request context
    async fn call(&self, ctx: &mut RequestContext) -> Result<()>;
}

/// Type alias for boxed middleware
pub type BoxMiddleware = Box<dyn Middleware>;

/// Attaches the identity an upstream proxy already authenticated.
///
/// The header value is base64 (standard alphabet) encoded JSON such as
/// `{"userId": "...", "orgId": "...", "email": "..."}`. A missing header
/// leaves the request anonymous; an undecodable one marks the identity as
/// malformed so resolvers needing it fail with `UNAUTHENTICATED`.
#[derive(Debug, Clone)]
pub struct IdentityHeaderMiddleware {
    header: String,
}

impl Default for IdentityHeaderMiddleware {
    fn default() -> Self {
        Self::new(DEFAULT_IDENTITY_HEADER)
    }
}

impl IdentityHeaderMiddleware {
    pub fn new(header: impl Into<String>) -> Self {
        Self {
            header: header.into().to_ascii_lowercase(),
        }
    }

    pub fn header(&self) -> &str {
        &self.header
    }

    /// Encode an identity the way this middleware expects to read it.
    pub fn encode(identity: &AuthenticatedIdentity) -> Result<String> {
        Ok(STANDARD.encode(serde_json::to_vec(identity)?))
    }

    fn decode(raw: &[u8]) -> std::result::Result<AuthenticatedIdentity, String> {
        let bytes = STANDARD
            .decode(raw)
            .map_err(|e| format!("identity header is not base64: {e}"))?;
        serde_json::from_slice(&bytes).map_err(|e| format!("identity header is not valid JSON: {e}"))
    }
}

#[async_trait::async_trait]
impl Middleware for IdentityHeaderMiddleware {
    async fn call(&self, ctx: &mut RequestContext) -> Result<()> {
        let Some(value) = ctx.headers.get(self.header.as_str()) else {
            return Ok(());
        };

        match Self::decode(value.as_bytes()) {
            Ok(identity) => {
                tracing::trace!(user_id = %identity.user_id, "identity attached");
                ctx.set_identity(identity)
            }
            Err(reason) => {
                tracing::warn!(header = %self.header, %reason, "malformed identity header");
                ctx.set_malformed_identity(reason)
            }
        }
    }
}

/// Logging middleware
///
/// Logs incoming GraphQL requests using the `tracing` crate.
#[derive(Debug, Clone, Default)]
pub struct LoggingMiddleware;

#[async_trait::async_trait]
impl Middleware for LoggingMiddleware {
    async fn call(&self, ctx: &mut RequestContext) -> Result<()> {
        tracing::debug!(
            headers = ?ctx.headers.keys().map(|k| k.as_str()).collect::<Vec<_>>(),
            deadline = ?ctx.remaining(),
            "processing GraphQL request"
        );
        Ok(())
    }
}
