//! Runtime support for the gateway - HTTP integration.

use crate::context::RequestContext;
use crate::engine::ExecutionEngine;
use crate::error::GraphQLError;
use crate::middleware::Middleware;
use crate::types::{GraphQLRequest, GraphQLResponse};
use async_graphql_axum::GraphQLRequest as HttpGraphQLRequest;
use axum::{
    extract::State,
    http::HeaderMap,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;

/// Callback observing the errors of every response that has any.
pub type ErrorHandler = Arc<dyn Fn(Vec<GraphQLError>) + Send + Sync>;

/// ServeMux - main gateway handler
///
/// The `ServeMux` builds the request context, runs the middlewares and hands
/// the request to the execution engine. It can be converted into an Axum
/// router.
#[derive(Clone)]
pub struct ServeMux {
    engine: Arc<ExecutionEngine>,
    middlewares: Vec<Arc<dyn Middleware>>,
    error_handler: Option<ErrorHandler>,
    request_timeout: Option<Duration>,
}

impl ServeMux {
    pub fn new(engine: ExecutionEngine) -> Self {
        Self {
            engine: Arc::new(engine),
            middlewares: Vec::new(),
            error_handler: None,
            request_timeout: None,
        }
    }

    pub fn engine(&self) -> &ExecutionEngine {
        &self.engine
    }

    /// Add middleware to the execution pipeline
    ///
    /// Middlewares are executed in the order they are added.
    pub fn add_middleware(&mut self, middleware: Arc<dyn Middleware>) {
        self.middlewares.push(middleware);
    }

    /// Use middleware (builder pattern)
    pub fn with_middleware(mut self, middleware: Arc<dyn Middleware>) -> Self {
        self.add_middleware(middleware);
        self
    }

    /// Deadline applied to every request.
    pub fn set_request_timeout(&mut self, timeout: Option<Duration>) {
        self.request_timeout = timeout;
    }

    /// Set error handler from an `Arc` for cases where the caller already shares ownership.
    pub fn set_error_handler_arc(&mut self, handler: ErrorHandler) {
        self.error_handler = Some(handler);
    }

    /// Set error handler
    pub fn set_error_handler<F>(&mut self, handler: F)
    where
        F: Fn(Vec<GraphQLError>) + Send + Sync + 'static,
    {
        self.set_error_handler_arc(Arc::new(handler));
    }

    /// Handle one GraphQL request
    ///
    /// 1. Creates a context from headers, with the configured deadline
    /// 2. Runs all middlewares; a failure short-circuits with top-level errors
    /// 3. Executes the request
    /// 4. Reports any errors to the error handler
    ///
    /// The request's cancellation token fires if this future is dropped,
    /// e.g. when the client disconnects.
    pub async fn handle_http(&self, headers: HeaderMap, request: GraphQLRequest) -> GraphQLResponse {
        let token = CancellationToken::new();
        let _cancel_on_drop = token.clone().drop_guard();

        let mut ctx = RequestContext::new(headers).with_cancellation(token);
        if let Some(timeout) = self.request_timeout {
            ctx = ctx.with_timeout(timeout);
        }

        for middleware in &self.middlewares {
            if let Err(err) = middleware.call(&mut ctx).await {
                tracing::debug!(error = %err, "request rejected by middleware");
                let response = GraphQLResponse::error(err.into());
                self.report(&response);
                return response;
            }
        }

        let response = self.engine.execute(&request, ctx).await;
        self.report(&response);
        response
    }

    fn report(&self, response: &GraphQLResponse) {
        if response.errors.is_empty() {
            return;
        }
        if let Some(handler) = &self.error_handler {
            handler(response.errors.clone());
        }
    }

    /// Convert to Axum router
    ///
    /// Serves `POST /graphql`, `GET /graphql` (query parameters) and
    /// `GET /health`.
    pub fn into_router(self) -> Router {
        let state = Arc::new(self);

        Router::new()
            .route("/graphql", post(handle_graphql).get(handle_graphql))
            .route("/health", get(health))
            .layer(TraceLayer::new_for_http())
            .with_state(state)
    }
}

impl std::fmt::Debug for ServeMux {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServeMux")
            .field("engine", &self.engine)
            .field("middlewares", &self.middlewares.len())
            .field("request_timeout", &self.request_timeout)
            .finish()
    }
}

/// Handler for GraphQL requests on /graphql
async fn handle_graphql(
    State(mux): State<Arc<ServeMux>>,
    headers: HeaderMap,
    request: HttpGraphQLRequest,
) -> impl IntoResponse {
    let request = match GraphQLRequest::try_from(request.into_inner()) {
        Ok(request) => request,
        Err(error) => {
            let response = GraphQLResponse::error(error);
            mux.report(&response);
            return Json(response);
        }
    };
    Json(mux.handle_http(headers, request).await)
}

async fn health() -> &'static str {
    "ok"
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::AuthenticatedIdentity;
    use crate::error::{Error, Result};
    use crate::grpc_client::GrpcClientPool;
    use crate::middleware::{IdentityHeaderMiddleware, DEFAULT_IDENTITY_HEADER};
    use crate::registry::ResolverRegistry;
    use crate::resolver::{FieldContext, FieldResult};
    use crate::schema::Schema;
    use crate::types::OperationType;
    use async_graphql::Value;
    use axum::{
        body::{to_bytes, Body},
        http::{Request, StatusCode},
    };
    use std::sync::Mutex;
    use tower::ServiceExt;

    const SDL: &str = r#"
        type Query { ping: String user: UserInfo }
        type UserInfo { id: ID! }
    "#;

    fn mux() -> ServeMux {
        let schema = Schema::parse(SDL).unwrap();
        let mut registry = ResolverRegistry::new();
        registry
            .bind(OperationType::Query, "ping", |_ctx: FieldContext| async move {
                FieldResult::Ok(Value::from("pong"))
            })
            .bind(OperationType::Query, "user", |ctx: FieldContext| async move {
                let identity = ctx.identity()?;
                FieldResult::Ok(async_graphql::value!({"id": identity.user_id.clone()}))
            });
        let bound = registry.seal(&schema).unwrap();
        let engine = ExecutionEngine::new(schema, bound, GrpcClientPool::new(), 4);
        ServeMux::new(engine).with_middleware(Arc::new(IdentityHeaderMiddleware::default()))
    }

    fn post(body: serde_json::Value) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri("/graphql")
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .expect("build request")
    }

    async fn send(app: Router, request: Request<Body>) -> (StatusCode, serde_json::Value) {
        let response = app.oneshot(request).await.expect("receive response");
        let status = response.status();
        let body = to_bytes(response.into_body(), 1024 * 1024)
            .await
            .expect("read body");
        (status, serde_json::from_slice(&body).expect("json body"))
    }

    #[tokio::test]
    async fn post_executes_query() {
        let (status, body) = send(mux().into_router(), post(serde_json::json!({"query": "{ ping }"}))).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, serde_json::json!({"data": {"ping": "pong"}}));
    }

    #[tokio::test]
    async fn get_reads_query_parameters() {
        let request = Request::builder()
            .uri("/graphql?query=%7B%20ping%20%7D")
            .body(Body::empty())
            .expect("build request");
        let (status, body) = send(mux().into_router(), request).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["ping"], "pong");
    }

    #[tokio::test]
    async fn identity_header_reaches_resolvers() {
        let encoded = IdentityHeaderMiddleware::encode(&AuthenticatedIdentity::new("u-9")).unwrap();
        let mut request = post(serde_json::json!({"query": "{ user { id } }"}));
        request
            .headers_mut()
            .insert(DEFAULT_IDENTITY_HEADER, encoded.parse().unwrap());

        let (_, body) = send(mux().into_router(), request).await;
        assert_eq!(body, serde_json::json!({"data": {"user": {"id": "u-9"}}}));
    }

    #[tokio::test]
    async fn missing_identity_is_a_field_error() {
        let (status, body) = send(
            mux().into_router(),
            post(serde_json::json!({"query": "{ user { id } ping }"})),
        )
        .await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"], serde_json::json!({"user": null, "ping": "pong"}));
        assert_eq!(body["errors"][0]["path"], serde_json::json!(["user"]));
        assert_eq!(body["errors"][0]["extensions"]["code"], "UNAUTHENTICATED");
    }

    #[tokio::test]
    async fn invalid_document_has_no_data() {
        let (status, body) = send(
            mux().into_router(),
            post(serde_json::json!({"query": "{ nonexistentField }"})),
        )
        .await;

        assert_eq!(status, StatusCode::OK);
        assert!(body.get("data").is_none());
        assert_eq!(body["errors"][0]["extensions"]["code"], "DOCUMENT_INVALID");
        assert_eq!(
            body["errors"][0]["locations"],
            serde_json::json!([{"line": 1, "column": 3}])
        );
    }

    struct Reject;

    #[async_trait::async_trait]
    impl Middleware for Reject {
        async fn call(&self, _ctx: &mut RequestContext) -> Result<()> {
            Err(Error::Middleware("blocked".into()))
        }
    }

    #[tokio::test]
    async fn middleware_failure_short_circuits() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let mut mux = mux().with_middleware(Arc::new(Reject));
        mux.set_error_handler(move |errors| sink.lock().unwrap().extend(errors));

        let (_, body) = send(mux.into_router(), post(serde_json::json!({"query": "{ ping }"}))).await;

        assert!(body.get("data").is_none());
        assert_eq!(body["errors"][0]["extensions"]["code"], "INVALID_ARGUMENT");
        assert_eq!(seen.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn error_handler_skips_clean_responses() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let mut mux = mux();
        mux.set_error_handler(move |errors| sink.lock().unwrap().extend(errors));

        let response = mux.handle_http(HeaderMap::new(), GraphQLRequest::new("{ ping }")).await;
        assert!(response.is_ok());
        assert!(seen.lock().unwrap().is_empty());

        mux.handle_http(HeaderMap::new(), GraphQLRequest::new("{ user { id } }")).await;
        assert_eq!(seen.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn health_endpoint() {
        let request = Request::builder()
            .uri("/health")
            .body(Body::empty())
            .expect("build request");
        let response = mux().into_router().oneshot(request).await.expect("receive response");

        assert_eq!(response.status(), StatusCode::OK);
        let body = to_bytes(response.into_body(), 1024).await.expect("read body");
        assert_eq!(&body[..], b"ok");
    }
}
