//! Resolvers calling a live tonic service through the client pool.

use async_graphql::value;
use futures::future::BoxFuture;
use grpc_graphql_resolver_gateway::{FieldContext, FieldResult, Gateway, GraphQLRequest, GraphQLResponse, GrpcClient};
use http::HeaderMap;
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};
use std::time::{Duration, Instant};
use tokio_stream::wrappers::TcpListenerStream;
use tonic::body::BoxBody;
use tonic::codec::ProstCodec;
use tonic::transport::Channel;
use tonic::{Request, Response, Status};

const GET_CLUSTER: &str = "/clusters.v1.Clusters/GetCluster";

const SDL: &str = r#"
    type Query { cluster(id: ID!): Cluster }
    type Cluster { id: ID! name: String! }
"#;

#[derive(Clone, PartialEq, prost::Message)]
struct GetClusterRequest {
    #[prost(string, tag = "1")]
    id: String,
}

#[derive(Clone, PartialEq, prost::Message)]
struct ClusterReply {
    #[prost(string, tag = "1")]
    id: String,
    #[prost(string, tag = "2")]
    name: String,
}

/// Backend recording the `grpc-timeout` each call arrived with.
#[derive(Clone, Default)]
struct Clusters {
    timeouts: Arc<Mutex<Vec<Option<String>>>>,
}

impl Clusters {
    async fn get_cluster(&self, request: Request<GetClusterRequest>) -> Result<Response<ClusterReply>, Status> {
        let timeout = request
            .metadata()
            .get("grpc-timeout")
            .and_then(|value| value.to_str().ok())
            .map(str::to_string);
        self.timeouts.lock().unwrap().push(timeout);

        match request.get_ref().id.as_str() {
            "c1" => Ok(Response::new(ClusterReply {
                id: "c1".into(),
                name: "prod-east".into(),
            })),
            "locked" => Err(Status::permission_denied("cluster locked")),
            "slow" => {
                tokio::time::sleep(Duration::from_secs(2)).await;
                Err(Status::internal("answered too late"))
            }
            id => Err(Status::not_found(format!("cluster {id} not found"))),
        }
    }
}

struct GetClusterSvc(Clusters);

impl tonic::server::UnaryService<GetClusterRequest> for GetClusterSvc {
    type Response = ClusterReply;
    type Future = BoxFuture<'static, Result<Response<ClusterReply>, Status>>;

    fn call(&mut self, request: Request<GetClusterRequest>) -> Self::Future {
        let service = self.0.clone();
        Box::pin(async move { service.get_cluster(request).await })
    }
}

impl tonic::codegen::Service<http::Request<BoxBody>> for Clusters {
    type Response = http::Response<BoxBody>;
    type Error = std::convert::Infallible;
    type Future = BoxFuture<'static, Result<Self::Response, Self::Error>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    // Single-method service: every call is GetCluster.
    fn call(&mut self, request: http::Request<BoxBody>) -> Self::Future {
        let service = self.clone();
        Box::pin(async move {
            let mut grpc = tonic::server::Grpc::new(ProstCodec::default());
            Ok(grpc.unary(GetClusterSvc(service), request).await)
        })
    }
}

impl tonic::server::NamedService for Clusters {
    const NAME: &'static str = "clusters.v1.Clusters";
}

/// Client call as a generated stub would make it.
async fn get_cluster(channel: Channel, request: Request<GetClusterRequest>) -> Result<Response<ClusterReply>, Status> {
    let mut grpc = tonic::client::Grpc::new(channel);
    grpc.ready()
        .await
        .map_err(|e| Status::unavailable(format!("backend not ready: {e}")))?;
    let path = http::uri::PathAndQuery::from_static(GET_CLUSTER);
    grpc.unary(request, path, ProstCodec::default()).await
}

async fn start_backend(service: Clusters) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(
        tonic::transport::Server::builder()
            .add_service(service)
            .serve_with_incoming(TcpListenerStream::new(listener)),
    );
    format!("http://{addr}")
}

async fn resolve_cluster(ctx: FieldContext) -> FieldResult {
    let id: String = ctx.try_argument("id")?;
    let channel = ctx.grpc_channel("clusters")?;
    let reply = get_cluster(channel, ctx.grpc_request(GetClusterRequest { id }))
        .await?
        .into_inner();
    Ok(value!({"id": reply.id, "name": reply.name}))
}

fn gateway(endpoint: &str, request_timeout: Duration) -> Gateway {
    let client = GrpcClient::builder(endpoint).connect_lazy().unwrap();
    Gateway::builder()
        .with_schema_sdl(SDL)
        .add_grpc_client("clusters", client)
        .request_timeout(request_timeout)
        .bind_query("cluster", resolve_cluster)
        .build()
        .unwrap()
}

async fn query(gateway: &Gateway, query: &str) -> GraphQLResponse {
    gateway
        .mux()
        .handle_http(HeaderMap::new(), GraphQLRequest::new(query))
        .await
}

fn parse_grpc_timeout(header: &str) -> Duration {
    let (amount, unit) = header.split_at(header.len() - 1);
    let amount: u64 = amount.parse().unwrap();
    match unit {
        "H" => Duration::from_secs(amount * 3600),
        "M" => Duration::from_secs(amount * 60),
        "S" => Duration::from_secs(amount),
        "m" => Duration::from_millis(amount),
        "u" => Duration::from_micros(amount),
        "n" => Duration::from_nanos(amount),
        other => panic!("unknown grpc-timeout unit {other}"),
    }
}

#[tokio::test]
async fn resolves_through_backend_with_remaining_deadline() {
    let backend = Clusters::default();
    let endpoint = start_backend(backend.clone()).await;
    let gateway = gateway(&endpoint, Duration::from_secs(5));

    let response = query(&gateway, r#"{ cluster(id: "c1") { id name } }"#).await;

    assert!(response.is_ok(), "{:?}", response.errors);
    assert_eq!(
        response.data,
        Some(value!({"cluster": {"id": "c1", "name": "prod-east"}}))
    );

    let timeouts = backend.timeouts.lock().unwrap();
    let header = timeouts[0].as_deref().expect("grpc-timeout header sent");
    let timeout = parse_grpc_timeout(header);
    assert!(timeout <= Duration::from_secs(5), "{header}");
    assert!(timeout > Duration::from_secs(1), "{header}");
}

#[tokio::test]
async fn backend_statuses_become_field_errors() {
    let endpoint = start_backend(Clusters::default()).await;
    let gateway = gateway(&endpoint, Duration::from_secs(5));

    let response = query(
        &gateway,
        r#"{ missing: cluster(id: "nope") { id } locked: cluster(id: "locked") { id } found: cluster(id: "c1") { name } }"#,
    )
    .await;

    assert_eq!(
        response.data,
        Some(value!({"missing": null, "locked": null, "found": {"name": "prod-east"}}))
    );
    assert_eq!(response.errors.len(), 2);
    assert_eq!(response.errors[0].code(), Some("NOT_FOUND"));
    assert_eq!(response.errors[0].message, "cluster nope not found");
    assert_eq!(response.errors[1].code(), Some("PERMISSION_DENIED"));

    let json = response.to_json().unwrap();
    assert_eq!(json["errors"][0]["path"], serde_json::json!(["missing"]));
    assert_eq!(json["errors"][1]["path"], serde_json::json!(["locked"]));
}

#[tokio::test]
async fn request_deadline_cuts_off_slow_backend() {
    let backend = Clusters::default();
    let endpoint = start_backend(backend.clone()).await;
    let gateway = gateway(&endpoint, Duration::from_millis(200));

    let started = Instant::now();
    let response = query(&gateway, r#"{ cluster(id: "slow") { id } }"#).await;

    assert!(started.elapsed() < Duration::from_secs(1));
    assert_eq!(response.data, Some(value!({"cluster": null})));
    assert!(
        response.errors.iter().any(|e| e.code() == Some("CANCELLED")),
        "{:?}",
        response.errors
    );

    let timeouts = backend.timeouts.lock().unwrap();
    if let Some(Some(header)) = timeouts.first() {
        assert!(parse_grpc_timeout(header) <= Duration::from_millis(200), "{header}");
    }
}
