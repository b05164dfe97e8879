//! Binding of schema fields to resolvers.
//!
//! Resolvers are registered at startup and the registry is then sealed
//! against the schema. Sealing fails fast when a Query or Mutation field is
//! left without a resolver, so a misconfigured gateway never serves traffic.

use crate::error::{Error, Result};
use crate::resolver::{BoxedResolver, FieldResolver, PropertyResolver};
use crate::schema::{Schema, TypeKind};
use crate::types::OperationType;
use std::collections::HashMap;
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum BindingTarget {
    Root(OperationType),
    Type(String),
}

struct Binding {
    target: BindingTarget,
    field: String,
    resolver: BoxedResolver,
}

/// Collects resolver bindings before the gateway starts.
#[derive(Default)]
pub struct ResolverRegistry {
    bindings: Vec<Binding>,
}

impl ResolverRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind a resolver to a field of a root operation type.
    pub fn bind<R>(&mut self, operation: OperationType, field: impl Into<String>, resolver: R) -> &mut Self
    where
        R: FieldResolver + 'static,
    {
        self.bindings.push(Binding {
            target: BindingTarget::Root(operation),
            field: field.into(),
            resolver: Arc::new(resolver),
        });
        self
    }

    /// Bind a resolver to a field of any object or interface type.
    ///
    /// A binding on an interface field serves every implementing object type
    /// that has no binding of its own for that field. Unbound fields of
    /// non-root types read their value from the parent object.
    pub fn bind_field<R>(
        &mut self,
        type_name: impl Into<String>,
        field: impl Into<String>,
        resolver: R,
    ) -> &mut Self
    where
        R: FieldResolver + 'static,
    {
        self.bindings.push(Binding {
            target: BindingTarget::Type(type_name.into()),
            field: field.into(),
            resolver: Arc::new(resolver),
        });
        self
    }

    pub fn len(&self) -> usize {
        self.bindings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bindings.is_empty()
    }

    /// Check every binding against the schema and freeze the registry.
    pub fn seal(self, schema: &Schema) -> Result<BoundRegistry> {
        let mut resolvers: HashMap<(String, String), BoxedResolver> = HashMap::new();

        for binding in self.bindings {
            let type_name = match &binding.target {
                BindingTarget::Root(OperationType::Subscription) => {
                    return Err(Error::UnknownBinding(format!(
                        "subscription field '{}' cannot be bound: subscriptions are not served",
                        binding.field
                    )))
                }
                BindingTarget::Root(op) => schema
                    .root_type(*op)
                    .ok_or_else(|| {
                        Error::UnknownBinding(format!(
                            "schema declares no {op} root for field '{}'",
                            binding.field
                        ))
                    })?
                    .to_string(),
                BindingTarget::Type(name) => name.clone(),
            };

            let ty = schema.get_type(&type_name).ok_or_else(|| {
                Error::UnknownBinding(format!("type '{type_name}' is not declared"))
            })?;
            if !matches!(ty.kind, TypeKind::Object | TypeKind::Interface) {
                return Err(Error::UnknownBinding(format!(
                    "type '{type_name}' has no fields to bind"
                )));
            }
            if schema.operation_for_root(&type_name) == Some(OperationType::Subscription) {
                return Err(Error::UnknownBinding(format!(
                    "subscription field '{}' cannot be bound: subscriptions are not served",
                    binding.field
                )));
            }
            if ty.field(&binding.field).is_none() {
                return Err(Error::UnknownBinding(format!(
                    "field '{type_name}.{}' is not declared",
                    binding.field
                )));
            }

            let key = (type_name, binding.field);
            if resolvers.contains_key(&key) {
                let (type_name, field) = key;
                return Err(Error::DuplicateBinding { type_name, field });
            }
            resolvers.insert(key, binding.resolver);
        }

        inherit_interface_bindings(schema, &mut resolvers)?;

        for op in [OperationType::Query, OperationType::Mutation] {
            let Some(root) = schema.root_type(op) else {
                continue;
            };
            let Some(root_ty) = schema.get_type(root) else {
                continue;
            };
            let unbound: Vec<&str> = root_ty
                .fields
                .keys()
                .filter(|field| !resolvers.contains_key(&(root.to_string(), field.to_string())))
                .map(String::as_str)
                .collect();
            if let Some(first) = unbound.first() {
                tracing::error!(root = %root, fields = ?unbound, "root fields without resolvers");
                return Err(Error::UnboundField {
                    type_name: root.to_string(),
                    field: first.to_string(),
                });
            }
        }

        tracing::info!(bindings = resolvers.len(), "resolver registry sealed");

        Ok(BoundRegistry {
            resolvers,
            fallback: Arc::new(PropertyResolver),
        })
    }
}

/// Copy interface bindings onto implementing object types without their own.
fn inherit_interface_bindings(
    schema: &Schema,
    resolvers: &mut HashMap<(String, String), BoxedResolver>,
) -> Result<()> {
    let mut inherited: HashMap<(String, String), (String, BoxedResolver)> = HashMap::new();

    for ((interface, field), resolver) in resolvers.iter() {
        if schema.get_type(interface).map(|ty| ty.kind) != Some(TypeKind::Interface) {
            continue;
        }
        let implementors = schema
            .types()
            .filter(|ty| ty.kind == TypeKind::Object && ty.interfaces.iter().any(|i| i == interface));
        for object in implementors {
            let key = (object.name.clone(), field.clone());
            if resolvers.contains_key(&key) {
                continue;
            }
            if let Some((other, _)) = inherited.get(&key) {
                tracing::error!(
                    object = %object.name,
                    %field,
                    first = %other,
                    second = %interface,
                    "field bound through more than one interface"
                );
                return Err(Error::DuplicateBinding {
                    type_name: object.name.clone(),
                    field: field.clone(),
                });
            }
            inherited.insert(key, (interface.clone(), Arc::clone(resolver)));
        }
    }

    for (key, (interface, resolver)) in inherited {
        tracing::debug!(object = %key.0, field = %key.1, %interface, "inherited interface binding");
        resolvers.insert(key, resolver);
    }
    Ok(())
}

impl std::fmt::Debug for ResolverRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResolverRegistry")
            .field(
                "bindings",
                &self
                    .bindings
                    .iter()
                    .map(|b| (b.target.clone(), b.field.as_str()))
                    .collect::<Vec<_>>(),
            )
            .finish()
    }
}

/// Sealed, read-only registry shared by all requests.
pub struct BoundRegistry {
    resolvers: HashMap<(String, String), BoxedResolver>,
    fallback: BoxedResolver,
}

impl BoundRegistry {
    /// Resolver explicitly bound to `type_name.field`.
    pub fn get(&self, type_name: &str, field: &str) -> Option<&BoxedResolver> {
        self.resolvers
            .get(&(type_name.to_string(), field.to_string()))
    }

    /// Resolver for a root operation field.
    pub fn lookup(&self, schema: &Schema, operation: OperationType, field: &str) -> Result<&BoxedResolver> {
        let unbound = || Error::UnboundField {
            type_name: operation.default_type_name().to_string(),
            field: field.to_string(),
        };
        let root = schema.root_type(operation).ok_or_else(unbound)?;
        self.get(root, field).ok_or_else(unbound)
    }

    /// Resolver used when executing `type_name.field`: the bound one, or the
    /// property resolver for non-root fields.
    pub fn resolver_for(&self, type_name: &str, field: &str) -> &BoxedResolver {
        self.get(type_name, field).unwrap_or(&self.fallback)
    }
}

impl std::fmt::Debug for BoundRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut keys: Vec<String> = self
            .resolvers
            .keys()
            .map(|(ty, field)| format!("{ty}.{field}"))
            .collect();
        keys.sort();
        f.debug_struct("BoundRegistry").field("resolvers", &keys).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resolver::{FieldContext, FieldResult};
    use async_graphql::Value;

    const SDL: &str = r#"
        type Query { user: UserInfo ping: String }
        type Mutation { touch: Boolean }
        type Subscription { ticks: Int }
        interface Node { id: ID! }
        interface Named { name: String }
        type UserInfo implements Node & Named { id: ID! name: String }
        type Team implements Node { id: ID! }
    "#;

    async fn ping(_ctx: FieldContext) -> FieldResult {
        Ok(Value::from("pong"))
    }

    fn complete() -> ResolverRegistry {
        let mut registry = ResolverRegistry::new();
        registry
            .bind(OperationType::Query, "user", ping)
            .bind(OperationType::Query, "ping", ping)
            .bind(OperationType::Mutation, "touch", ping);
        registry
    }

    #[test]
    fn seals_when_every_root_field_is_bound() {
        let schema = Schema::parse(SDL).unwrap();
        let bound = complete().seal(&schema).unwrap();

        assert!(bound.lookup(&schema, OperationType::Query, "ping").is_ok());
        assert!(bound.get("UserInfo", "id").is_none());
        assert!(matches!(
            bound.lookup(&schema, OperationType::Query, "missing"),
            Err(Error::UnboundField { .. })
        ));
    }

    #[test]
    fn unbound_root_field_fails_at_startup() {
        let schema = Schema::parse(SDL).unwrap();
        let mut registry = ResolverRegistry::new();
        registry
            .bind(OperationType::Query, "user", ping)
            .bind(OperationType::Mutation, "touch", ping);

        match registry.seal(&schema) {
            Err(Error::UnboundField { type_name, field }) => {
                assert_eq!(type_name, "Query");
                assert_eq!(field, "ping");
            }
            other => panic!("expected UnboundField, got {other:?}"),
        }
    }

    #[test]
    fn duplicate_binding_is_rejected() {
        let schema = Schema::parse(SDL).unwrap();
        let mut registry = complete();
        registry.bind_field("Query", "ping", ping);

        assert!(matches!(
            registry.seal(&schema),
            Err(Error::DuplicateBinding { field, .. }) if field == "ping"
        ));
    }

    #[test]
    fn bindings_must_target_declared_fields() {
        let schema = Schema::parse(SDL).unwrap();

        let mut unknown_field = complete();
        unknown_field.bind_field("UserInfo", "avatar", ping);
        assert!(matches!(unknown_field.seal(&schema), Err(Error::UnknownBinding(_))));

        let mut unknown_type = complete();
        unknown_type.bind_field("Cluster", "id", ping);
        assert!(matches!(unknown_type.seal(&schema), Err(Error::UnknownBinding(_))));

        let mut subscription = complete();
        subscription.bind(OperationType::Subscription, "ticks", ping);
        assert!(matches!(subscription.seal(&schema), Err(Error::UnknownBinding(_))));
    }

    #[test]
    fn non_root_fields_fall_back_to_property_resolver() {
        let schema = Schema::parse(SDL).unwrap();
        let mut registry = complete();
        registry.bind_field("UserInfo", "name", ping);
        let bound = registry.seal(&schema).unwrap();

        assert!(bound.get("UserInfo", "name").is_some());
        assert!(Arc::ptr_eq(bound.resolver_for("UserInfo", "id"), &bound.fallback));
    }

    #[test]
    fn interface_bindings_reach_implementing_types() {
        let schema = Schema::parse(SDL).unwrap();
        let mut registry = complete();
        registry
            .bind_field("Node", "id", ping)
            .bind_field("Team", "id", ping);
        let bound = registry.seal(&schema).unwrap();

        let interface = bound.get("Node", "id").unwrap();
        assert!(Arc::ptr_eq(bound.resolver_for("UserInfo", "id"), interface));
        assert!(!Arc::ptr_eq(bound.resolver_for("Team", "id"), interface));
        assert!(Arc::ptr_eq(bound.resolver_for("UserInfo", "name"), &bound.fallback));
    }

    #[test]
    fn field_bound_through_two_interfaces_is_ambiguous() {
        let schema = Schema::parse(
            "type Query { a: A } interface X { f: Int } interface Y { f: Int } type A implements X & Y { f: Int }",
        )
        .unwrap();
        let mut registry = ResolverRegistry::new();
        registry
            .bind(OperationType::Query, "a", ping)
            .bind_field("X", "f", ping)
            .bind_field("Y", "f", ping);

        assert!(matches!(
            registry.seal(&schema),
            Err(Error::DuplicateBinding { type_name, field }) if type_name == "A" && field == "f"
        ));
    }
}
