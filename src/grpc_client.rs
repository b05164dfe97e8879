//! Backend gRPC channels and failure classification.
//!
//! Resolvers reach backend services through named [`GrpcClient`]s held in a
//! [`GrpcClientPool`]. The pool hands out tonic [`Channel`]s; typed stubs
//! generated for each backend are built on top of them by the resolver.

use crate::error::{Error, ErrorCode, Result};
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;
use tonic::transport::{Channel, Endpoint};

/// Classified failure of a backend RPC.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BackendFailure {
    NotFound,
    PermissionDenied,
    InvalidArgument,
    Unavailable,
    Internal,
}

impl BackendFailure {
    /// GraphQL error code reported for this failure.
    pub fn code(&self) -> ErrorCode {
        match self {
            BackendFailure::NotFound => ErrorCode::NotFound,
            BackendFailure::PermissionDenied => ErrorCode::PermissionDenied,
            BackendFailure::InvalidArgument => ErrorCode::InvalidArgument,
            BackendFailure::Unavailable => ErrorCode::Unavailable,
            BackendFailure::Internal => ErrorCode::Internal,
        }
    }
}

impl From<&tonic::Status> for BackendFailure {
    fn from(status: &tonic::Status) -> Self {
        use tonic::Code;
        match status.code() {
            Code::NotFound => BackendFailure::NotFound,
            Code::PermissionDenied => BackendFailure::PermissionDenied,
            Code::InvalidArgument
            | Code::OutOfRange
            | Code::FailedPrecondition
            | Code::AlreadyExists => BackendFailure::InvalidArgument,
            Code::Unavailable
            | Code::DeadlineExceeded
            | Code::ResourceExhausted
            | Code::Aborted => BackendFailure::Unavailable,
            _ => BackendFailure::Internal,
        }
    }
}

/// Connection to one backend gRPC service
///
/// # Example
///
/// ```rust,no_run
/// use grpc_graphql_resolver_gateway::GrpcClient;
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// // Connect immediately
/// let client = GrpcClient::new("http://localhost:50051").await?;
///
/// // Or connect on first call
/// let lazy_client = GrpcClient::builder("http://localhost:50051")
///     .timeout(std::time::Duration::from_secs(5))
///     .connect_lazy()?;
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct GrpcClient {
    endpoint: String,
    channel: Channel,
    insecure: bool,
}

impl GrpcClient {
    /// Start building a gRPC client with custom connection behavior.
    pub fn builder(endpoint: impl Into<String>) -> GrpcClientBuilder {
        GrpcClientBuilder::new(endpoint)
    }

    /// Create a new plaintext client, connecting eagerly
    pub async fn new(endpoint: impl Into<String>) -> Result<Self> {
        Self::builder(endpoint).connect().await
    }

    /// Create a new TLS client, connecting eagerly
    pub async fn new_secure(endpoint: impl Into<String>) -> Result<Self> {
        Self::builder(endpoint).insecure(false).connect().await
    }

    /// Create a client that connects on first use.
    ///
    /// Lets the gateway start before its backends are reachable.
    pub fn connect_lazy(endpoint: impl Into<String>, insecure: bool) -> Result<Self> {
        Self::builder(endpoint).insecure(insecure).connect_lazy()
    }

    /// Channel for building typed service stubs
    pub fn channel(&self) -> Channel {
        self.channel.clone()
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    pub fn is_insecure(&self) -> bool {
        self.insecure
    }
}

impl std::fmt::Debug for GrpcClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GrpcClient")
            .field("endpoint", &self.endpoint)
            .field("insecure", &self.insecure)
            .finish()
    }
}

/// Builder for configuring gRPC client creation.
pub struct GrpcClientBuilder {
    endpoint: String,
    insecure: bool,
    lazy: bool,
    timeout: Option<Duration>,
    connect_timeout: Option<Duration>,
}

impl GrpcClientBuilder {
    fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            insecure: true,
            lazy: false,
            timeout: None,
            connect_timeout: None,
        }
    }

    /// Toggle insecure (plaintext) connections.
    pub fn insecure(mut self, insecure: bool) -> Self {
        self.insecure = insecure;
        self
    }

    /// Perform a lazy connect (defer until first use).
    pub fn lazy(mut self, lazy: bool) -> Self {
        self.lazy = lazy;
        self
    }

    /// Upper bound for every call on this channel.
    ///
    /// A shorter per-request deadline set by the gateway still wins.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = Some(timeout);
        self
    }

    /// Establish the channel immediately.
    pub async fn connect(self) -> Result<GrpcClient> {
        if self.lazy {
            return self.connect_lazy();
        }

        let channel = self
            .endpoint()?
            .connect()
            .await
            .map_err(|e| Error::Connection(e.to_string()))?;

        tracing::debug!(endpoint = %self.endpoint, "connected to gRPC backend");

        Ok(GrpcClient {
            endpoint: self.endpoint,
            channel,
            insecure: self.insecure,
        })
    }

    /// Create a lazily connecting client.
    pub fn connect_lazy(self) -> Result<GrpcClient> {
        let channel = self.endpoint()?.connect_lazy();

        Ok(GrpcClient {
            endpoint: self.endpoint,
            channel,
            insecure: self.insecure,
        })
    }

    fn endpoint(&self) -> Result<Endpoint> {
        let mut endpoint = Endpoint::from_shared(self.endpoint.clone())
            .map_err(|e| Error::Connection(e.to_string()))?;

        if !self.insecure {
            endpoint = endpoint
                .tls_config(tonic::transport::ClientTlsConfig::new())
                .map_err(|e| Error::Connection(e.to_string()))?;
        }
        if let Some(timeout) = self.timeout {
            endpoint = endpoint.timeout(timeout);
        }
        if let Some(timeout) = self.connect_timeout {
            endpoint = endpoint.connect_timeout(timeout);
        }

        Ok(endpoint)
    }
}

/// Named backend clients shared by every request.
///
/// Populated while the gateway is being built; read concurrently afterwards.
#[derive(Clone, Default)]
pub struct GrpcClientPool {
    clients: Arc<RwLock<HashMap<String, GrpcClient>>>,
}

impl GrpcClientPool {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a client to the pool, replacing any client with the same name
    pub fn add(&self, name: impl Into<String>, client: GrpcClient) {
        let mut clients = self.clients.write().unwrap_or_else(PoisonError::into_inner);
        clients.insert(name.into(), client);
    }

    pub fn get(&self, name: &str) -> Option<GrpcClient> {
        let clients = self.clients.read().unwrap_or_else(PoisonError::into_inner);
        clients.get(name).cloned()
    }

    /// Channel for the named backend.
    pub fn channel(&self, name: &str) -> Result<Channel> {
        self.get(name)
            .map(|client| client.channel())
            .ok_or_else(|| Error::UnknownBackend(name.to_string()))
    }

    pub fn names(&self) -> Vec<String> {
        let clients = self.clients.read().unwrap_or_else(PoisonError::into_inner);
        let mut names: Vec<String> = clients.keys().cloned().collect();
        names.sort();
        names
    }
}

impl std::fmt::Debug for GrpcClientPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GrpcClientPool")
            .field("clients", &self.names())
            .finish()
    }
}
