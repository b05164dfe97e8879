//! Concurrent field resolution.
//!
//! Produces a result tree mirroring the selection: every field ends up
//! resolved, failed, or skipped because the request was cancelled. Null
//! propagation happens afterwards in [`super::aggregate`].

use super::coerce::complete_leaf;
use super::plan::{collect_fields, PlannedField, ResolutionPlan};
use crate::context::RequestContext;
use crate::error::FieldError;
use crate::grpc_client::GrpcClientPool;
use crate::registry::BoundRegistry;
use crate::resolver::{FieldContext, FieldResult};
use crate::schema::{Schema, TypeKind};
use crate::types::PathSegment;
use async_graphql::parser::types::{BaseType, SelectionSet, Type};
use async_graphql::{Name, Pos, Value};
use futures::future::{join_all, BoxFuture};
use futures::FutureExt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Semaphore;

/// One executed field and where it sits in the document.
#[derive(Debug)]
pub(crate) struct FieldNode {
    pub response_key: Name,
    pub parent_type: String,
    pub field_name: Name,
    pub ty: Type,
    pub pos: Pos,
    pub outcome: Resolved,
}

#[derive(Debug)]
pub(crate) enum Resolved {
    Null,
    Leaf(Value),
    Object(Vec<FieldNode>),
    List(Vec<Resolved>),
    Failed(FieldError),
    /// Not resolved because the request was cancelled
    Skipped,
}

pub(crate) struct Executor<'a> {
    schema: &'a Schema,
    registry: &'a BoundRegistry,
    backends: &'a GrpcClientPool,
    plan: &'a ResolutionPlan<'a>,
    request: Arc<RequestContext>,
    permits: Semaphore,
    interrupted: AtomicBool,
}

impl<'a> Executor<'a> {
    pub fn new(
        schema: &'a Schema,
        registry: &'a BoundRegistry,
        backends: &'a GrpcClientPool,
        plan: &'a ResolutionPlan<'a>,
        request: Arc<RequestContext>,
    ) -> Self {
        Self {
            schema,
            registry,
            backends,
            plan,
            request,
            permits: Semaphore::new(plan.max_concurrency),
            interrupted: AtomicBool::new(false),
        }
    }

    /// Whether cancellation skipped or interrupted at least one field.
    pub fn was_interrupted(&self) -> bool {
        self.interrupted.load(Ordering::Acquire)
    }

    /// Resolve the root selection set.
    pub async fn run(&self) -> Vec<FieldNode> {
        let root = Value::Null;
        let fields = &self.plan.root_fields;

        if self.plan.is_serial() {
            let mut nodes = Vec::with_capacity(fields.len());
            for field in fields {
                nodes.push(self.resolve_field(field, &root, &[]).await);
            }
            nodes
        } else {
            join_all(fields.iter().map(|field| self.resolve_field(field, &root, &[]))).await
        }
    }

    fn resolve_field<'b>(
        &'b self,
        field: &'b PlannedField<'a>,
        parent: &'b Value,
        parent_path: &'b [PathSegment],
    ) -> BoxFuture<'b, FieldNode> {
        async move {
            let mut path = parent_path.to_vec();
            path.push(PathSegment::Field(field.response_key.to_string()));

            let outcome = if field.is_typename() {
                Resolved::Leaf(Value::String(field.parent_type.to_string()))
            } else {
                match self.invoke(field, parent, &path).await {
                    Some(Ok(value)) => self.complete(&field.ty, value, &field.selections, &path).await,
                    Some(Err(err)) => Resolved::Failed(err),
                    None => Resolved::Skipped,
                }
            };

            if let Resolved::Failed(err) = &outcome {
                tracing::warn!(
                    path = %display_path(&path),
                    code = %err.code(),
                    error = %err,
                    "field resolution failed"
                );
            }

            FieldNode {
                response_key: field.response_key.clone(),
                parent_type: field.parent_type.to_string(),
                field_name: field.field_name.clone(),
                ty: field.ty.clone(),
                pos: field.pos,
                outcome,
            }
        }
        .boxed()
    }

    /// Run the field's resolver under a concurrency permit.
    ///
    /// Returns `None` when cancellation prevented or interrupted the call.
    async fn invoke(
        &self,
        field: &PlannedField<'a>,
        parent: &Value,
        path: &[PathSegment],
    ) -> Option<FieldResult> {
        let token = self.request.cancellation();
        if token.is_cancelled() {
            self.mark_interrupted();
            return None;
        }

        let _permit = tokio::select! {
            biased;
            _ = token.cancelled() => {
                self.mark_interrupted();
                return None;
            }
            permit = self.permits.acquire() => match permit {
                Ok(permit) => permit,
                Err(_) => return Some(Err(FieldError::internal("resolver permits closed"))),
            },
        };

        let resolver = self
            .registry
            .resolver_for(field.parent_type, field.field_name.as_str());
        let ctx = FieldContext::new(
            Arc::clone(&self.request),
            self.backends.clone(),
            Arc::from(field.parent_type),
            field.field_name.clone(),
            field.arguments.clone(),
            parent.clone(),
            path.to_vec(),
        );

        tracing::trace!(path = %display_path(path), "dispatching resolver");

        tokio::select! {
            biased;
            _ = token.cancelled() => {
                self.mark_interrupted();
                None
            }
            result = resolver.resolve(ctx) => Some(result),
        }
    }

    fn mark_interrupted(&self) {
        self.interrupted.store(true, Ordering::Release);
    }

    /// Complete a resolver value against its declared output type.
    fn complete<'b>(
        &'b self,
        ty: &'b Type,
        value: Value,
        selections: &'b [&'a SelectionSet],
        path: &'b [PathSegment],
    ) -> BoxFuture<'b, Resolved> {
        async move {
            if matches!(value, Value::Null) {
                return Resolved::Null;
            }

            match &ty.base {
                BaseType::List(inner) => {
                    let items = match value {
                        Value::List(items) => items,
                        other => {
                            return Resolved::Failed(FieldError::internal(format!(
                                "expected a list for type {ty}, found {other}"
                            )))
                        }
                    };
                    let inner: &Type = inner;
                    let items = items.into_iter().enumerate().map(|(index, item)| {
                        let mut item_path = path.to_vec();
                        item_path.push(PathSegment::Index(index));
                        async move { self.complete(inner, item, selections, &item_path).await }
                    });
                    Resolved::List(join_all(items).await)
                }
                BaseType::Named(name) => {
                    let Some(def) = self.schema.get_type(name.as_str()) else {
                        return Resolved::Failed(FieldError::internal(format!("unknown type {name}")));
                    };
                    match def.kind {
                        TypeKind::Scalar | TypeKind::Enum => match complete_leaf(def, value) {
                            Ok(value) => Resolved::Leaf(value),
                            Err(message) => Resolved::Failed(FieldError::internal(message)),
                        },
                        TypeKind::Object => {
                            self.complete_object(&def.name, value, selections, path).await
                        }
                        TypeKind::Interface | TypeKind::Union => {
                            let concrete = match &value {
                                Value::Object(object) => match object.get("__typename") {
                                    Some(Value::String(s)) => Some(s.as_str()),
                                    Some(Value::Enum(n)) => Some(n.as_str()),
                                    _ => None,
                                },
                                _ => None,
                            };
                            let target = concrete.and_then(|n| self.schema.get_type(n)).filter(|d| {
                                d.kind == TypeKind::Object
                                    && self.schema.is_possible_type(&def.name, &d.name)
                            });
                            match target {
                                Some(target) => {
                                    self.complete_object(&target.name, value, selections, path).await
                                }
                                None => Resolved::Failed(FieldError::internal(format!(
                                    "cannot determine the concrete type of {} value",
                                    def.name
                                ))),
                            }
                        }
                        TypeKind::InputObject => Resolved::Failed(FieldError::internal(format!(
                            "{name} is not an output type"
                        ))),
                    }
                }
            }
        }
        .boxed()
    }

    async fn complete_object(
        &self,
        type_name: &'a str,
        value: Value,
        selections: &[&'a SelectionSet],
        path: &[PathSegment],
    ) -> Resolved {
        if !matches!(value, Value::Object(_)) {
            return Resolved::Failed(FieldError::internal(format!(
                "expected an object for type {type_name}, found {value}"
            )));
        }

        let fields = match collect_fields(
            self.schema,
            type_name,
            selections,
            self.plan.fragments,
            self.plan.variables,
        ) {
            Ok(fields) => fields,
            Err((message, _)) => return Resolved::Failed(FieldError::internal(message)),
        };

        let nodes = join_all(
            fields
                .iter()
                .map(|field| self.resolve_field(field, &value, path)),
        )
        .await;
        Resolved::Object(nodes)
    }
}

/// Render a response path as `user.clusters.0.name`.
pub(crate) fn display_path(path: &[PathSegment]) -> String {
    path.iter()
        .map(|segment| match segment {
            PathSegment::Field(name) => name.clone(),
            PathSegment::Index(index) => index.to_string(),
        })
        .collect::<Vec<_>>()
        .join(".")
}
