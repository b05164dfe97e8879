use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Result;
use grpc_graphql_resolver_gateway::middleware::LoggingMiddleware;
use grpc_graphql_resolver_gateway::{FieldContext, FieldResult, Gateway, GatewayConfig};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tonic::{Request, Response, Status};
use tracing::info;

const SCHEMA: &str = include_str!("schema.graphql");

#[derive(Debug, Clone, Serialize, Deserialize)]
struct ClusterInfo {
    id: String,
    name: String,
    status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    version: Option<String>,
}

/// In-process stand-in for the cluster gRPC service.
#[derive(Clone, Default)]
struct ClusterService {
    clusters: Arc<RwLock<HashMap<String, ClusterInfo>>>,
}

impl ClusterService {
    fn seeded() -> Self {
        let clusters = [
            ("c-1", "prod-east", "HEALTHY", Some("0.14.2")),
            ("c-2", "prod-west", "UNHEALTHY", Some("0.14.1")),
            ("c-3", "staging", "DISCONNECTED", None),
        ]
        .into_iter()
        .map(|(id, name, status, version)| {
            (
                id.to_string(),
                ClusterInfo {
                    id: id.to_string(),
                    name: name.to_string(),
                    status: status.to_string(),
                    version: version.map(str::to_string),
                },
            )
        })
        .collect();

        Self {
            clusters: Arc::new(RwLock::new(clusters)),
        }
    }

    async fn get_cluster(&self, request: Request<String>) -> Result<Response<ClusterInfo>, Status> {
        let id = request.into_inner();
        self.clusters
            .read()
            .await
            .get(&id)
            .cloned()
            .map(Response::new)
            .ok_or_else(|| Status::not_found(format!("cluster {id} not found")))
    }

    async fn list_clusters(&self, request: Request<Option<String>>) -> Result<Response<Vec<ClusterInfo>>, Status> {
        let status = request.into_inner();
        let mut clusters: Vec<ClusterInfo> = self
            .clusters
            .read()
            .await
            .values()
            .filter(|c| status.as_ref().map_or(true, |s| &c.status == s))
            .cloned()
            .collect();
        clusters.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(Response::new(clusters))
    }

    async fn rename_cluster(&self, request: Request<(String, String)>) -> Result<Response<ClusterInfo>, Status> {
        let (id, name) = request.into_inner();
        if name.trim().is_empty() {
            return Err(Status::invalid_argument("cluster name must not be empty"));
        }
        let mut clusters = self.clusters.write().await;
        let cluster = clusters
            .get_mut(&id)
            .ok_or_else(|| Status::not_found(format!("cluster {id} not found")))?;
        cluster.name = name;
        Ok(Response::new(cluster.clone()))
    }
}

async fn user(ctx: FieldContext) -> FieldResult {
    let identity = ctx.identity()?;
    Ok(async_graphql::value!({
        "id": identity.user_id.clone(),
        "email": identity.email.clone(),
        "orgId": identity.org_id.clone(),
    }))
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .compact()
        .init();

    let config = GatewayConfig::from_env()?;
    let service = ClusterService::seeded();

    let get = service.clone();
    let list = service.clone();
    let rename = service.clone();

    let gateway = Gateway::builder()
        .with_schema_sdl(SCHEMA)
        .with_config(config)?
        .add_middleware(LoggingMiddleware)
        .bind_query("user", user)
        .bind_query("cluster", move |ctx: FieldContext| {
            let service = get.clone();
            async move {
                let id: String = ctx.try_argument("id")?;
                let reply = service.get_cluster(ctx.grpc_request(id)).await?;
                FieldResult::Ok(async_graphql::to_value(reply.into_inner())?)
            }
        })
        .bind_query("clusters", move |ctx: FieldContext| {
            let service = list.clone();
            async move {
                let status: Option<String> = ctx.try_argument("status")?;
                let reply = service.list_clusters(ctx.grpc_request(status)).await?;
                FieldResult::Ok(async_graphql::to_value(reply.into_inner())?)
            }
        })
        .bind_mutation("renameCluster", move |ctx: FieldContext| {
            let service = rename.clone();
            async move {
                let id: String = ctx.try_argument("id")?;
                let name: String = ctx.try_argument("name")?;
                let reply = service.rename_cluster(ctx.grpc_request((id, name))).await?;
                FieldResult::Ok(async_graphql::to_value(reply.into_inner())?)
            }
        })
        .build()?;

    let addr = gateway.listen_addr().to_string();
    info!("GraphQL gateway listening on http://{}/graphql", addr);
    info!(
        "try: curl -s http://{addr}/graphql -H 'content-type: application/json' \
         -d '{{\"query\":\"{{ clusters {{ id name status }} }}\"}}'"
    );

    gateway.serve().await?;
    Ok(())
}
