//! Input coercion and leaf output completion.

use crate::schema::{Schema, TypeDefinition, TypeKind};
use async_graphql::indexmap::IndexMap;
use async_graphql::parser::types::{BaseType, Type};
use async_graphql::{Name, Number, Value};

/// A value written in the document, possibly containing `$variables`.
pub(crate) type LiteralValue = async_graphql_value::Value;

/// Where an input value was written.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum InputSource {
    /// GraphQL syntax: document literals and schema defaults. Enum values
    /// must be bare names.
    Literal,
    /// Request variables decoded from JSON. Enum values arrive as strings.
    Json,
}

/// Variables after coercion against their definitions. Variables the request
/// omitted (and that have no default) are absent from the map.
pub(crate) type CoercedVariables = IndexMap<Name, Value>;

/// Coerce a document literal against an input type.
///
/// Returns `Ok(None)` when the literal is a variable the request did not
/// provide, so the caller can treat the argument as absent.
pub(crate) fn coerce_literal(
    schema: &Schema,
    ty: &Type,
    literal: &LiteralValue,
    variables: &CoercedVariables,
    defined: &dyn Fn(&str) -> bool,
) -> Result<Option<Value>, String> {
    if let LiteralValue::Variable(name) = literal {
        if !defined(name.as_str()) {
            return Err(format!("variable ${name} is not defined"));
        }
        return match variables.get(name) {
            Some(value) => coerce_const(schema, ty, value.clone(), InputSource::Json).map(Some),
            None => Ok(None),
        };
    }

    let value = literal.clone().into_const_with(|name| {
        if !defined(name.as_str()) {
            return Err(format!("variable ${name} is not defined"));
        }
        Ok(variables.get(&name).cloned().unwrap_or(Value::Null))
    })?;
    coerce_const(schema, ty, value, InputSource::Literal).map(Some)
}

/// Coerce a constant (variable value or resolved literal) against an input type.
pub(crate) fn coerce_const(
    schema: &Schema,
    ty: &Type,
    value: Value,
    source: InputSource,
) -> Result<Value, String> {
    if value == Value::Null {
        return if ty.nullable {
            Ok(Value::Null)
        } else {
            Err(format!("expected non-null value of type {ty}"))
        };
    }

    match &ty.base {
        BaseType::List(inner) => match value {
            Value::List(items) => items
                .into_iter()
                .map(|item| coerce_const(schema, inner, item, source))
                .collect::<Result<Vec<_>, _>>()
                .map(Value::List),
            single => coerce_const(schema, inner, single, source).map(|item| Value::List(vec![item])),
        },
        BaseType::Named(name) => {
            let Some(def) = schema.get_type(name) else {
                return Err(format!("unknown type {name}"));
            };
            match def.kind {
                TypeKind::Scalar => coerce_scalar_input(name.as_str(), value),
                TypeKind::Enum => coerce_enum(def, value, source),
                TypeKind::InputObject => coerce_input_object(schema, def, value, source),
                _ => Err(format!("{name} is not an input type")),
            }
        }
    }
}

fn coerce_scalar_input(name: &str, value: Value) -> Result<Value, String> {
    let mismatch = |value: &Value| format!("expected {name}, found {value}");
    match name {
        "Int" => match &value {
            Value::Number(n) if as_i32(n).is_some() => Ok(value),
            _ => Err(mismatch(&value)),
        },
        "Float" => match &value {
            Value::Number(n) => n
                .as_f64()
                .and_then(Number::from_f64)
                .map(Value::Number)
                .ok_or_else(|| mismatch(&value)),
            _ => Err(mismatch(&value)),
        },
        "String" => match value {
            Value::String(_) => Ok(value),
            other => Err(mismatch(&other)),
        },
        "Boolean" => match value {
            Value::Boolean(_) => Ok(value),
            other => Err(mismatch(&other)),
        },
        "ID" => match value {
            Value::String(_) => Ok(value),
            Value::Number(n) if n.is_i64() || n.is_u64() => Ok(Value::String(n.to_string())),
            other => Err(mismatch(&other)),
        },
        // Custom scalars are opaque to the gateway.
        _ => Ok(value),
    }
}

fn coerce_enum(def: &TypeDefinition, value: Value, source: InputSource) -> Result<Value, String> {
    let name = match &value {
        Value::Enum(name) => name.as_str(),
        Value::String(s) if source == InputSource::Json => s.as_str(),
        Value::String(s) => {
            return Err(format!(
                "expected {}, found string \"{s}\"; enum values are written without quotes",
                def.name
            ))
        }
        other => return Err(format!("expected {}, found {other}", def.name)),
    };
    if def.enum_values.iter().any(|v| v == name) {
        Ok(Value::Enum(Name::new(name)))
    } else {
        Err(format!("'{name}' is not a value of enum {}", def.name))
    }
}

fn coerce_input_object(
    schema: &Schema,
    def: &TypeDefinition,
    value: Value,
    source: InputSource,
) -> Result<Value, String> {
    let Value::Object(mut provided) = value else {
        return Err(format!("expected input object {}", def.name));
    };

    let mut coerced = IndexMap::new();
    for (field_name, field) in &def.input_fields {
        let key = Name::new(field_name);
        match provided.shift_remove(&key) {
            Some(v) => {
                let v = coerce_const(schema, &field.ty, v, source)
                    .map_err(|e| format!("{}.{field_name}: {e}", def.name))?;
                coerced.insert(key, v);
            }
            None => match &field.default_value {
                Some(default) => {
                    coerced.insert(key, default.clone());
                }
                None if !field.ty.nullable => {
                    return Err(format!("{}.{field_name} of type {} is required", def.name, field.ty));
                }
                None => {}
            },
        }
    }

    if let Some(unknown) = provided.keys().next() {
        return Err(format!("{} has no field '{unknown}'", def.name));
    }
    Ok(Value::Object(coerced))
}

fn as_i32(n: &Number) -> Option<i32> {
    n.as_i64().and_then(|v| i32::try_from(v).ok())
}

/// Check a resolver's value for a scalar or enum output position.
pub(crate) fn complete_leaf(def: &TypeDefinition, value: Value) -> Result<Value, String> {
    let mismatch = |value: &Value| format!("{} cannot represent value {value}", def.name);
    if def.kind == TypeKind::Enum {
        return match &value {
            Value::Enum(name) if def.enum_values.iter().any(|v| v == name.as_str()) => Ok(value),
            Value::String(s) if def.enum_values.iter().any(|v| v == s) => {
                Ok(Value::Enum(Name::new(s)))
            }
            _ => Err(mismatch(&value)),
        };
    }

    match def.name.as_str() {
        "Int" => match &value {
            Value::Number(n) if as_i32(n).is_some() => Ok(value),
            _ => Err(mismatch(&value)),
        },
        "Float" => match &value {
            Value::Number(_) => Ok(value),
            _ => Err(mismatch(&value)),
        },
        "String" => match value {
            Value::String(_) => Ok(value),
            Value::Enum(name) => Ok(Value::String(name.to_string())),
            other => Err(mismatch(&other)),
        },
        "Boolean" => match value {
            Value::Boolean(_) => Ok(value),
            other => Err(mismatch(&other)),
        },
        "ID" => match value {
            Value::String(_) => Ok(value),
            Value::Number(n) if n.is_i64() || n.is_u64() => Ok(Value::String(n.to_string())),
            other => Err(mismatch(&other)),
        },
        _ => Ok(value),
    }
}
