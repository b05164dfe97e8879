//! Query execution engine.
//!
//! A request moves through `Parsed -> Planned -> Executing -> Aggregated ->
//! Done`, or to `Failed` when the document is rejected. Sibling fields are
//! resolved concurrently under a per-request cap, results are assembled in
//! document order and errors are localized to the fields that produced them.

mod aggregate;
pub(crate) mod coerce;
mod execute;
mod plan;
mod validate;

use crate::context::RequestContext;
use crate::error::{ErrorCode, GraphQLError};
use crate::grpc_client::GrpcClientPool;
use crate::registry::BoundRegistry;
use crate::schema::Schema;
use crate::types::{GraphQLRequest, GraphQLResponse, Location};
use aggregate::aggregate;
use execute::Executor;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

/// Default cap on concurrently running resolvers per request.
pub const DEFAULT_MAX_PARALLELISM: usize = 20;

/// Stage of one request's execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionPhase {
    Parsed,
    Planned,
    Executing,
    Aggregated,
    Done,
    Failed,
}

impl ExecutionPhase {
    pub fn is_terminal(self) -> bool {
        matches!(self, ExecutionPhase::Done | ExecutionPhase::Failed)
    }

    /// Whether `to` may follow `from` (`None` before parsing finished).
    pub fn allows(from: Option<Self>, to: Self) -> bool {
        use ExecutionPhase::*;
        match (from, to) {
            (None, Parsed) => true,
            (Some(Parsed), Planned) => true,
            (Some(Planned), Executing) => true,
            (Some(Executing), Aggregated) => true,
            (Some(Aggregated), Done) => true,
            (from, Failed) => from.map_or(true, |phase| !phase.is_terminal()),
            _ => false,
        }
    }
}

#[derive(Default)]
struct Lifecycle {
    phase: Option<ExecutionPhase>,
}

impl Lifecycle {
    fn enter(&mut self, next: ExecutionPhase) {
        debug_assert!(
            ExecutionPhase::allows(self.phase, next),
            "invalid transition {:?} -> {next:?}",
            self.phase
        );
        tracing::trace!(from = ?self.phase, to = ?next, "execution phase");
        self.phase = Some(next);
    }
}

/// Cancels the request token when its deadline passes.
struct DeadlineGuard(Option<JoinHandle<()>>);

impl DeadlineGuard {
    fn arm(ctx: &RequestContext) -> Self {
        let handle = ctx.deadline().map(|deadline| {
            let token = ctx.cancellation().clone();
            tokio::spawn(async move {
                tokio::time::sleep_until(deadline).await;
                tracing::debug!("request deadline reached");
                token.cancel();
            })
        });
        Self(handle)
    }
}

impl Drop for DeadlineGuard {
    fn drop(&mut self) {
        if let Some(handle) = self.0.take() {
            handle.abort();
        }
    }
}

/// Executes GraphQL requests against a schema and its bound resolvers.
///
/// Shared read-only by every request; all mutable execution state lives in
/// the per-request executor.
pub struct ExecutionEngine {
    schema: Schema,
    registry: BoundRegistry,
    backends: GrpcClientPool,
    max_parallelism: usize,
}

impl ExecutionEngine {
    pub fn new(
        schema: Schema,
        registry: BoundRegistry,
        backends: GrpcClientPool,
        max_parallelism: usize,
    ) -> Self {
        Self {
            schema,
            registry,
            backends,
            max_parallelism: max_parallelism.max(1),
        }
    }

    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    pub fn max_parallelism(&self) -> usize {
        self.max_parallelism
    }

    /// Execute one request.
    ///
    /// Never fails: document errors yield a response without `data`, field
    /// errors yield partial data, cancellation yields partial data plus one
    /// `CANCELLED` error.
    pub async fn execute(&self, request: &GraphQLRequest, ctx: RequestContext) -> GraphQLResponse {
        let mut lifecycle = Lifecycle::default();

        let document = match validate::validate(&self.schema, request) {
            Ok(document) => document,
            Err(errors) => {
                lifecycle.enter(ExecutionPhase::Failed);
                tracing::debug!(errors = errors.len(), "document rejected");
                return GraphQLResponse::errors(errors);
            }
        };
        lifecycle.enter(ExecutionPhase::Parsed);

        let plan = match plan::plan(&self.schema, &document, self.max_parallelism) {
            Ok(plan) => plan,
            Err((message, pos)) => {
                lifecycle.enter(ExecutionPhase::Failed);
                return GraphQLResponse::error(
                    GraphQLError::new(message, ErrorCode::DocumentInvalid)
                        .with_locations(vec![Location::from(pos)]),
                );
            }
        };
        lifecycle.enter(ExecutionPhase::Planned);

        tracing::debug!(
            operation = %plan.operation_type,
            root = plan.root_type,
            fields = plan.root_fields.len(),
            "executing operation"
        );

        let ctx = Arc::new(ctx);
        let _deadline = DeadlineGuard::arm(&ctx);

        lifecycle.enter(ExecutionPhase::Executing);
        let executor = Executor::new(
            &self.schema,
            &self.registry,
            &self.backends,
            &plan,
            Arc::clone(&ctx),
        );
        let nodes = executor.run().await;

        let (data, mut errors) = aggregate(nodes);
        if executor.was_interrupted() {
            let message = if ctx.remaining() == Some(Duration::ZERO) {
                "request deadline exceeded"
            } else {
                "request cancelled"
            };
            errors.push(GraphQLError::new(message, ErrorCode::Cancelled));
        }
        lifecycle.enter(ExecutionPhase::Aggregated);

        tracing::debug!(errors = errors.len(), "operation complete");
        lifecycle.enter(ExecutionPhase::Done);

        GraphQLResponse {
            data: Some(data),
            errors,
        }
    }
}

impl std::fmt::Debug for ExecutionEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecutionEngine")
            .field("registry", &self.registry)
            .field("max_parallelism", &self.max_parallelism)
            .finish()
    }
}
