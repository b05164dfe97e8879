//! Per-request context carried into every resolver.

use crate::auth::AuthenticatedIdentity;
use crate::error::{Error, Result};
use http::HeaderMap;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Identity as carried on the request, before extraction.
#[derive(Debug, Clone, Default)]
pub enum CarriedIdentity {
    #[default]
    Absent,
    Present(Arc<AuthenticatedIdentity>),
    /// Upstream attached something that could not be decoded
    Malformed(String),
}

/// Request-scoped state: identity, cancellation and deadline.
///
/// Built by the HTTP handler, populated by middleware, then shared read-only
/// with the request's resolvers. Never shared between requests.
#[derive(Debug, Clone)]
pub struct RequestContext {
    /// Request headers
    pub headers: HeaderMap,

    /// Additional context data written by middleware
    pub extensions: HashMap<String, serde_json::Value>,

    identity: CarriedIdentity,
    cancellation: CancellationToken,
    deadline: Option<Instant>,
}

impl Default for RequestContext {
    fn default() -> Self {
        Self::new(HeaderMap::new())
    }
}

impl RequestContext {
    pub fn new(headers: HeaderMap) -> Self {
        Self {
            headers,
            extensions: HashMap::new(),
            identity: CarriedIdentity::Absent,
            cancellation: CancellationToken::new(),
            deadline: None,
        }
    }

    /// Create a context from an inbound HTTP request
    pub fn from_request<B>(req: &http::Request<B>) -> Self {
        Self::new(req.headers().clone())
    }

    /// Attach the authenticated identity.
    ///
    /// An identity is immutable for the life of the request: a second
    /// attachment fails.
    pub fn set_identity(&mut self, identity: AuthenticatedIdentity) -> Result<()> {
        self.carry(CarriedIdentity::Present(Arc::new(identity)))
    }

    /// Record that upstream attached an identity that could not be decoded.
    pub fn set_malformed_identity(&mut self, reason: impl Into<String>) -> Result<()> {
        self.carry(CarriedIdentity::Malformed(reason.into()))
    }

    fn carry(&mut self, identity: CarriedIdentity) -> Result<()> {
        if !matches!(self.identity, CarriedIdentity::Absent) {
            return Err(Error::Middleware(
                "identity is already attached to this request".into(),
            ));
        }
        self.identity = identity;
        Ok(())
    }

    pub fn carried_identity(&self) -> &CarriedIdentity {
        &self.identity
    }

    /// Use an externally owned cancellation token for this request.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancellation = token;
        self
    }

    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(deadline);
        self
    }

    pub fn with_timeout(self, timeout: Duration) -> Self {
        self.with_deadline(Instant::now() + timeout)
    }

    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancellation
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancellation.is_cancelled()
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Time left before the deadline; `None` when no deadline is set.
    pub fn remaining(&self) -> Option<Duration> {
        self.deadline
            .map(|deadline| deadline.saturating_duration_since(Instant::now()))
    }

    /// Insert extension data
    pub fn insert(&mut self, key: impl Into<String>, value: serde_json::Value) {
        self.extensions.insert(key.into(), value);
    }

    /// Get extension data
    pub fn get(&self, key: &str) -> Option<&serde_json::Value> {
        self.extensions.get(key)
    }
}
