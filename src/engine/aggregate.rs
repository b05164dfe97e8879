//! Assembly of the response from the result tree.
//!
//! A post-order walk: children are completed before their parent, so a null
//! in a non-null position is known before the parent is built and can null
//! the nearest nullable ancestor.

use super::execute::{FieldNode, Resolved};
use crate::error::{ErrorCode, GraphQLError};
use crate::types::{Location, PathSegment};
use async_graphql::indexmap::IndexMap;
use async_graphql::parser::types::{BaseType, Type};
use async_graphql::{Name, Value};

/// A non-null position became null; the parent must be nulled too.
struct Bubble;

/// Build `data` and the field errors, in document order.
pub(crate) fn aggregate(root: Vec<FieldNode>) -> (Value, Vec<GraphQLError>) {
    let mut errors = Vec::new();
    let mut path = Vec::new();
    let data = object(root, &mut path, &mut errors).unwrap_or(Value::Null);
    (data, errors)
}

fn object(
    nodes: Vec<FieldNode>,
    path: &mut Vec<PathSegment>,
    errors: &mut Vec<GraphQLError>,
) -> Result<Value, Bubble> {
    let mut map = IndexMap::with_capacity(nodes.len());
    let mut bubbled = false;

    for node in nodes {
        path.push(PathSegment::Field(node.response_key.to_string()));
        let field = FieldInfo {
            parent_type: &node.parent_type,
            field_name: &node.field_name,
            location: Location::from(node.pos),
        };
        let completed = complete(node.outcome, &node.ty, &field, path, errors);
        path.pop();

        match completed {
            Ok(value) => {
                map.insert(node.response_key, value);
            }
            Err(Bubble) => bubbled = true,
        }
    }

    if bubbled {
        Err(Bubble)
    } else {
        Ok(Value::Object(map))
    }
}

struct FieldInfo<'n> {
    parent_type: &'n str,
    field_name: &'n Name,
    location: Location,
}

fn complete(
    outcome: Resolved,
    ty: &Type,
    field: &FieldInfo<'_>,
    path: &mut Vec<PathSegment>,
    errors: &mut Vec<GraphQLError>,
) -> Result<Value, Bubble> {
    let value = match outcome {
        Resolved::Null => Value::Null,
        Resolved::Leaf(value) => value,
        Resolved::Skipped => return nullable(ty),
        Resolved::Failed(err) => {
            errors.push(GraphQLError::from_field_error(
                &err,
                path.clone(),
                Some(field.location),
            ));
            return nullable(ty);
        }
        Resolved::Object(nodes) => match object(nodes, path, errors) {
            Ok(value) => value,
            Err(Bubble) => return nullable(ty),
        },
        Resolved::List(items) => {
            let inner = match &ty.base {
                BaseType::List(inner) => inner.as_ref(),
                BaseType::Named(_) => ty,
            };
            let mut values = Vec::with_capacity(items.len());
            let mut bubbled = false;
            for (index, item) in items.into_iter().enumerate() {
                path.push(PathSegment::Index(index));
                match complete(item, inner, field, path, errors) {
                    Ok(value) => values.push(value),
                    Err(Bubble) => bubbled = true,
                }
                path.pop();
            }
            if bubbled {
                return nullable(ty);
            }
            Value::List(values)
        }
    };

    if matches!(value, Value::Null) && !ty.nullable {
        errors.push(
            GraphQLError::new(
                format!(
                    "Cannot return null for non-nullable field {}.{}",
                    field.parent_type, field.field_name
                ),
                ErrorCode::Internal,
            )
            .with_path(path.clone())
            .with_locations(vec![field.location]),
        );
        return Err(Bubble);
    }
    Ok(value)
}

/// Null at this position, or bubble when the position is non-null.
fn nullable(ty: &Type) -> Result<Value, Bubble> {
    if ty.nullable {
        Ok(Value::Null)
    } else {
        Err(Bubble)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::FieldError;
    use async_graphql::{value, Pos};

    fn node(key: &str, ty: &str, outcome: Resolved) -> FieldNode {
        FieldNode {
            response_key: Name::new(key),
            parent_type: "Query".into(),
            field_name: Name::new(key),
            ty: Type::new(ty).unwrap(),
            pos: Pos { line: 1, column: 3 },
            outcome,
        }
    }

    #[test]
    fn nullable_failure_nulls_only_that_field() {
        let (data, errors) = aggregate(vec![
            node("a", "String", Resolved::Failed(FieldError::internal("boom"))),
            node("b", "String", Resolved::Leaf(value!("ok"))),
        ]);

        assert_eq!(data, value!({"a": null, "b": "ok"}));
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].path, vec![PathSegment::Field("a".into())]);
        assert_eq!(errors[0].locations, vec![Location { line: 1, column: 3 }]);
    }

    #[test]
    fn non_null_failure_nulls_nearest_nullable_parent() {
        let user = node(
            "user",
            "User",
            Resolved::Object(vec![
                node("id", "ID!", Resolved::Leaf(value!("u1"))),
                node("email", "String!", Resolved::Failed(FieldError::internal("boom"))),
            ]),
        );
        let (data, errors) = aggregate(vec![user, node("ping", "String", Resolved::Leaf(value!("pong")))]);

        assert_eq!(data, value!({"user": null, "ping": "pong"}));
        assert_eq!(errors.len(), 1);
        assert_eq!(
            errors[0].path,
            vec![PathSegment::Field("user".into()), PathSegment::Field("email".into())]
        );
    }

    #[test]
    fn null_in_non_null_root_field_nulls_data() {
        let (data, errors) = aggregate(vec![node("user", "User!", Resolved::Null)]);

        assert_eq!(data, Value::Null);
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].message, "Cannot return null for non-nullable field Query.user");
    }

    #[test]
    fn list_items_bubble_into_the_list() {
        let (data, errors) = aggregate(vec![node(
            "tags",
            "[String!]",
            Resolved::List(vec![Resolved::Leaf(value!("a")), Resolved::Null]),
        )]);

        assert_eq!(data, value!({"tags": null}));
        assert_eq!(
            errors[0].path,
            vec![PathSegment::Field("tags".into()), PathSegment::Index(1)]
        );

        let (data, errors) = aggregate(vec![node(
            "tags",
            "[String]!",
            Resolved::List(vec![Resolved::Leaf(value!("a")), Resolved::Null]),
        )]);
        assert_eq!(data, value!({"tags": ["a", null]}));
        assert!(errors.is_empty());
    }

    #[test]
    fn skipped_fields_null_silently() {
        let (data, errors) = aggregate(vec![
            node("a", "String!", Resolved::Skipped),
            node("b", "String", Resolved::Leaf(value!("done"))),
        ]);

        assert_eq!(data, Value::Null);
        assert!(errors.is_empty());
    }
}
