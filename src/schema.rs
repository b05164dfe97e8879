//! Schema loading and validation.
//!
//! The gateway's schema is a static SDL document read once at startup. It is
//! parsed with the `async-graphql` parser, checked for internal consistency
//! and frozen into an immutable [`Schema`] shared by every request.

use crate::engine::coerce::{coerce_const, InputSource};
use crate::error::{Error, Result};
use crate::types::OperationType;
use async_graphql::indexmap::IndexMap;
use async_graphql::parser::types::{
    BaseType, FieldDefinition as ParsedFieldDefinition,
    InputValueDefinition as ParsedInputValueDefinition, ServiceDocument, Type,
    TypeDefinition as ParsedTypeDefinition, TypeKind as ParsedTypeKind, TypeSystemDefinition,
};
use async_graphql::parser::Positioned;
use async_graphql::{Pos, Value};
use std::path::Path;
use std::sync::Arc;

/// Scalars every schema has without declaring them.
pub const BUILTIN_SCALARS: [&str; 5] = ["Int", "Float", "String", "Boolean", "ID"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TypeKind {
    Scalar,
    Object,
    Interface,
    Union,
    Enum,
    InputObject,
}

/// A named type declared in the schema.
#[derive(Debug, Clone)]
pub struct TypeDefinition {
    pub name: String,
    pub kind: TypeKind,
    /// Fields of objects and interfaces
    pub fields: IndexMap<String, FieldDefinition>,
    /// Fields of input objects
    pub input_fields: IndexMap<String, InputValueDefinition>,
    pub enum_values: Vec<String>,
    /// Members of a union
    pub possible_types: Vec<String>,
    /// Interfaces implemented by an object or interface
    pub interfaces: Vec<String>,
    pos: Pos,
}

impl TypeDefinition {
    fn new(name: impl Into<String>, kind: TypeKind, pos: Pos) -> Self {
        Self {
            name: name.into(),
            kind,
            fields: IndexMap::new(),
            input_fields: IndexMap::new(),
            enum_values: Vec::new(),
            possible_types: Vec::new(),
            interfaces: Vec::new(),
            pos,
        }
    }

    pub fn field(&self, name: &str) -> Option<&FieldDefinition> {
        self.fields.get(name)
    }

    /// Scalars and enums have no sub-selection.
    pub fn is_leaf(&self) -> bool {
        matches!(self.kind, TypeKind::Scalar | TypeKind::Enum)
    }

    pub fn is_abstract(&self) -> bool {
        matches!(self.kind, TypeKind::Interface | TypeKind::Union)
    }

    pub fn is_input(&self) -> bool {
        matches!(
            self.kind,
            TypeKind::Scalar | TypeKind::Enum | TypeKind::InputObject
        )
    }

    pub fn is_output(&self) -> bool {
        self.kind != TypeKind::InputObject
    }
}

#[derive(Debug, Clone)]
pub struct FieldDefinition {
    pub name: String,
    pub arguments: IndexMap<String, InputValueDefinition>,
    pub ty: Type,
    pos: Pos,
}

/// An argument or input-object field.
#[derive(Debug, Clone)]
pub struct InputValueDefinition {
    pub name: String,
    pub ty: Type,
    pub default_value: Option<Value>,
    pos: Pos,
}

/// Name of the innermost named type of a (possibly wrapped) type reference.
pub fn named_type(ty: &Type) -> &str {
    match &ty.base {
        BaseType::Named(name) => name.as_str(),
        BaseType::List(inner) => named_type(inner),
    }
}

/// Validated, immutable GraphQL schema.
///
/// Cloning is cheap; all clones share the same definitions.
#[derive(Debug, Clone)]
pub struct Schema {
    inner: Arc<SchemaInner>,
}

#[derive(Debug, Clone)]
struct SchemaInner {
    types: IndexMap<String, TypeDefinition>,
    query_type: String,
    mutation_type: Option<String>,
    subscription_type: Option<String>,
}

impl Schema {
    /// Parse and validate an SDL document.
    pub fn parse(sdl: &str) -> Result<Self> {
        SchemaLoader::new().with_sdl(sdl).load()
    }

    pub fn query_type(&self) -> &str {
        &self.inner.query_type
    }

    pub fn mutation_type(&self) -> Option<&str> {
        self.inner.mutation_type.as_deref()
    }

    pub fn subscription_type(&self) -> Option<&str> {
        self.inner.subscription_type.as_deref()
    }

    /// Type name of the root for an operation kind, if the schema declares it.
    pub fn root_type(&self, operation: OperationType) -> Option<&str> {
        match operation {
            OperationType::Query => Some(self.query_type()),
            OperationType::Mutation => self.mutation_type(),
            OperationType::Subscription => self.subscription_type(),
        }
    }

    /// Root operation kind whose root type is `type_name`.
    pub fn operation_for_root(&self, type_name: &str) -> Option<OperationType> {
        [
            OperationType::Query,
            OperationType::Mutation,
            OperationType::Subscription,
        ]
        .into_iter()
        .find(|op| self.root_type(*op) == Some(type_name))
    }

    pub fn get_type(&self, name: &str) -> Option<&TypeDefinition> {
        self.inner.types.get(name)
    }

    pub fn types(&self) -> impl Iterator<Item = &TypeDefinition> {
        self.inner.types.values()
    }

    pub fn field(&self, type_name: &str, field: &str) -> Option<&FieldDefinition> {
        self.get_type(type_name).and_then(|ty| ty.field(field))
    }

    /// Whether `concrete` can appear where `abstract_or_same` is expected.
    pub fn is_possible_type(&self, abstract_or_same: &str, concrete: &str) -> bool {
        if abstract_or_same == concrete {
            return true;
        }
        match self.get_type(abstract_or_same).map(|ty| ty.kind) {
            Some(TypeKind::Union) => self
                .get_type(abstract_or_same)
                .is_some_and(|ty| ty.possible_types.iter().any(|m| m == concrete)),
            Some(TypeKind::Interface) => self
                .get_type(concrete)
                .is_some_and(|ty| ty.interfaces.iter().any(|i| i == abstract_or_same)),
            _ => false,
        }
    }

    /// Whether a fragment on `condition` can apply to a value of `parent` type.
    pub fn types_overlap(&self, parent: &str, condition: &str) -> bool {
        if parent == condition {
            return true;
        }
        let object_types: Vec<&str> = self
            .types()
            .filter(|ty| ty.kind == TypeKind::Object)
            .map(|ty| ty.name.as_str())
            .collect();
        object_types
            .iter()
            .any(|obj| self.is_possible_type(parent, obj) && self.is_possible_type(condition, obj))
    }
}

/// Loads the schema document at startup.
///
/// # Example
///
/// ```rust,no_run
/// use grpc_graphql_resolver_gateway::SchemaLoader;
///
/// let schema = SchemaLoader::new()
///     .with_sdl_file("schema/gateway.graphql")?
///     .load()?;
/// # Ok::<(), grpc_graphql_resolver_gateway::Error>(())
/// ```
#[derive(Debug, Default)]
pub struct SchemaLoader {
    sdl: Option<String>,
}

impl SchemaLoader {
    pub fn new() -> Self {
        Self::default()
    }

    /// Provide the SDL source directly
    pub fn with_sdl(mut self, sdl: impl Into<String>) -> Self {
        self.sdl = Some(sdl.into());
        self
    }

    /// Read the SDL source from a file
    pub fn with_sdl_file(mut self, path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let sdl = std::fs::read_to_string(path).map_err(|e| {
            Error::SchemaLoad(format!("cannot read schema file {}: {e}", path.display()))
        })?;
        self.sdl = Some(sdl);
        Ok(self)
    }

    /// Parse and validate the schema.
    pub fn load(self) -> Result<Schema> {
        let sdl = self
            .sdl
            .ok_or_else(|| Error::SchemaLoad("schema source is required".into()))?;

        let document = async_graphql::parser::parse_schema(&sdl)
            .map_err(|e| Error::SchemaLoad(format!("syntax error: {e}")))?;

        let schema = build(document)?;
        tracing::info!(
            types = schema.inner.types.len(),
            query = %schema.query_type(),
            mutation = ?schema.mutation_type(),
            "schema loaded"
        );
        Ok(schema)
    }
}

fn load_error(pos: Pos, message: impl std::fmt::Display) -> Error {
    Error::SchemaLoad(format!("{message} (at {}:{})", pos.line, pos.column))
}

fn build(document: ServiceDocument) -> Result<Schema> {
    let mut types: IndexMap<String, TypeDefinition> = IndexMap::new();
    for scalar in BUILTIN_SCALARS {
        types.insert(
            scalar.to_string(),
            TypeDefinition::new(scalar, TypeKind::Scalar, Pos::default()),
        );
    }

    let mut roots: [Option<String>; 3] = [None, None, None];
    let mut saw_schema_block = false;
    let mut extensions = Vec::new();

    for definition in document.definitions {
        match definition {
            TypeSystemDefinition::Schema(schema_def) => {
                let pos = schema_def.pos;
                let def = schema_def.node;
                if saw_schema_block && !def.extend {
                    return Err(load_error(pos, "schema block declared more than once"));
                }
                saw_schema_block = true;
                for (slot, name) in roots.iter_mut().zip([def.query, def.mutation, def.subscription]) {
                    if let Some(name) = name {
                        *slot = Some(name.node.to_string());
                    }
                }
            }
            TypeSystemDefinition::Type(type_def) => {
                if type_def.node.extend {
                    extensions.push(type_def);
                    continue;
                }
                let converted = convert_type(&type_def)?;
                if types.contains_key(&converted.name) {
                    return Err(load_error(
                        type_def.pos,
                        format!("type '{}' is declared more than once", converted.name),
                    ));
                }
                types.insert(converted.name.clone(), converted);
            }
            TypeSystemDefinition::Directive(_) => {}
        }
    }

    for extension in extensions {
        let converted = convert_type(&extension)?;
        let Some(base) = types.get_mut(&converted.name) else {
            return Err(load_error(
                extension.pos,
                format!("cannot extend undeclared type '{}'", converted.name),
            ));
        };
        if base.kind != converted.kind {
            return Err(load_error(
                extension.pos,
                format!("extension of '{}' changes its kind", converted.name),
            ));
        }
        for (name, field) in converted.fields {
            if base.fields.insert(name.clone(), field).is_some() {
                return Err(load_error(
                    extension.pos,
                    format!("field '{}.{name}' is declared more than once", converted.name),
                ));
            }
        }
        base.input_fields.extend(converted.input_fields);
        base.enum_values.extend(converted.enum_values);
        base.possible_types.extend(converted.possible_types);
        base.interfaces.extend(converted.interfaces);
    }

    let [query, mutation, subscription] = roots;
    let query_type = match query {
        Some(name) => name,
        None if saw_schema_block => {
            return Err(Error::SchemaLoad("schema block has no query root".into()))
        }
        None => OperationType::Query.default_type_name().to_string(),
    };
    let default_root = |op: OperationType| {
        (!saw_schema_block && types.contains_key(op.default_type_name()))
            .then(|| op.default_type_name().to_string())
    };
    let mutation_type = mutation.or_else(|| default_root(OperationType::Mutation));
    let subscription_type = subscription.or_else(|| default_root(OperationType::Subscription));

    let mut schema = Schema {
        inner: Arc::new(SchemaInner {
            types,
            query_type,
            mutation_type,
            subscription_type,
        }),
    };
    validate(&schema)?;

    let defaults = coerce_defaults(&schema)?;
    let inner = Arc::make_mut(&mut schema.inner);
    for default in defaults {
        let Some(ty) = inner.types.get_mut(&default.type_name) else {
            continue;
        };
        let slot = match &default.field {
            Some(field) => ty
                .fields
                .get_mut(field)
                .and_then(|f| f.arguments.get_mut(&default.input)),
            None => ty.input_fields.get_mut(&default.input),
        };
        if let Some(slot) = slot {
            slot.default_value = Some(default.value);
        }
    }
    Ok(schema)
}

/// A default value after coercion against its declared type.
struct CoercedDefault {
    type_name: String,
    /// Set for field arguments, `None` for input-object fields
    field: Option<String>,
    input: String,
    value: Value,
}

fn coerce_defaults(schema: &Schema) -> Result<Vec<CoercedDefault>> {
    let mut coerced = Vec::new();
    for ty in schema.types() {
        for field in ty.fields.values() {
            for arg in field.arguments.values() {
                let owner = format!("{}.{}({})", ty.name, field.name, arg.name);
                if let Some(value) = coerce_default(schema, arg, &owner)? {
                    coerced.push(CoercedDefault {
                        type_name: ty.name.clone(),
                        field: Some(field.name.clone()),
                        input: arg.name.clone(),
                        value,
                    });
                }
            }
        }
        for input in ty.input_fields.values() {
            let owner = format!("{}.{}", ty.name, input.name);
            if let Some(value) = coerce_default(schema, input, &owner)? {
                coerced.push(CoercedDefault {
                    type_name: ty.name.clone(),
                    field: None,
                    input: input.name.clone(),
                    value,
                });
            }
        }
    }
    Ok(coerced)
}

fn coerce_default(schema: &Schema, input: &InputValueDefinition, owner: &str) -> Result<Option<Value>> {
    let Some(default) = &input.default_value else {
        return Ok(None);
    };
    coerce_const(schema, &input.ty, default.clone(), InputSource::Literal)
        .map(Some)
        .map_err(|e| load_error(input.pos, format!("default value of '{owner}' is invalid: {e}")))
}

fn convert_type(def: &Positioned<ParsedTypeDefinition>) -> Result<TypeDefinition> {
    let name = def.node.name.node.to_string();
    let pos = def.pos;

    if BUILTIN_SCALARS.contains(&name.as_str()) {
        return Err(load_error(pos, format!("type '{name}' shadows a built-in scalar")));
    }
    if name.starts_with("__") {
        return Err(load_error(pos, format!("type name '{name}' is reserved")));
    }

    let ty = match &def.node.kind {
        ParsedTypeKind::Scalar => TypeDefinition::new(&name, TypeKind::Scalar, pos),
        ParsedTypeKind::Object(object) => {
            let mut ty = TypeDefinition::new(&name, TypeKind::Object, pos);
            ty.interfaces = object.implements.iter().map(|i| i.node.to_string()).collect();
            ty.fields = convert_fields(&name, &object.fields)?;
            ty
        }
        ParsedTypeKind::Interface(interface) => {
            let mut ty = TypeDefinition::new(&name, TypeKind::Interface, pos);
            ty.interfaces = interface.implements.iter().map(|i| i.node.to_string()).collect();
            ty.fields = convert_fields(&name, &interface.fields)?;
            ty
        }
        ParsedTypeKind::Union(union) => {
            let mut ty = TypeDefinition::new(&name, TypeKind::Union, pos);
            ty.possible_types = union.members.iter().map(|m| m.node.to_string()).collect();
            ty
        }
        ParsedTypeKind::Enum(en) => {
            let mut ty = TypeDefinition::new(&name, TypeKind::Enum, pos);
            ty.enum_values = en.values.iter().map(|v| v.node.value.node.to_string()).collect();
            ty
        }
        ParsedTypeKind::InputObject(input) => {
            let mut ty = TypeDefinition::new(&name, TypeKind::InputObject, pos);
            ty.input_fields = collect_inputs(&input.fields, &name)?;
            ty
        }
    };

    if def.node.extend {
        // Extensions may legitimately add nothing but directives.
        return Ok(ty);
    }
    if matches!(ty.kind, TypeKind::Object | TypeKind::Interface) && ty.fields.is_empty() {
        return Err(load_error(pos, format!("type '{name}' must declare at least one field")));
    }
    if ty.kind == TypeKind::Enum && ty.enum_values.is_empty() {
        return Err(load_error(pos, format!("enum '{name}' must declare at least one value")));
    }
    Ok(ty)
}

fn convert_fields(
    owner: &str,
    fields: &[Positioned<ParsedFieldDefinition>],
) -> Result<IndexMap<String, FieldDefinition>> {
    let mut map = IndexMap::new();
    for field in fields {
        let name = field.node.name.node.to_string();
        let definition = FieldDefinition {
            name: name.clone(),
            arguments: collect_inputs(&field.node.arguments, &format!("{owner}.{name}"))?,
            ty: field.node.ty.node.clone(),
            pos: field.pos,
        };
        if map.insert(name.clone(), definition).is_some() {
            return Err(load_error(
                field.pos,
                format!("field '{owner}.{name}' is declared more than once"),
            ));
        }
    }
    Ok(map)
}

fn collect_inputs(
    values: &[Positioned<ParsedInputValueDefinition>],
    owner: &str,
) -> Result<IndexMap<String, InputValueDefinition>> {
    let mut map = IndexMap::new();
    for value in values {
        let name = value.node.name.node.to_string();
        let input = InputValueDefinition {
            name: name.clone(),
            ty: value.node.ty.node.clone(),
            default_value: value.node.default_value.as_ref().map(|v| v.node.clone()),
            pos: value.pos,
        };
        if map.insert(name.clone(), input).is_some() {
            return Err(load_error(
                value.pos,
                format!("'{owner}' declares '{name}' more than once"),
            ));
        }
    }
    Ok(map)
}

fn validate(schema: &Schema) -> Result<()> {
    for op in [
        OperationType::Query,
        OperationType::Mutation,
        OperationType::Subscription,
    ] {
        let Some(root) = schema.root_type(op) else {
            continue;
        };
        match schema.get_type(root) {
            Some(ty) if ty.kind == TypeKind::Object => {}
            Some(ty) => {
                return Err(load_error(ty.pos, format!("{op} root '{root}' must be an object type")))
            }
            None => {
                return Err(Error::SchemaLoad(format!(
                    "{op} root type '{root}' is not declared"
                )))
            }
        }
    }

    for ty in schema.types() {
        for field in ty.fields.values() {
            let target = named_type(&field.ty);
            match schema.get_type(target) {
                Some(target_ty) if target_ty.is_output() => {}
                Some(_) => {
                    return Err(load_error(
                        field.pos,
                        format!("field '{}.{}' cannot return input type '{target}'", ty.name, field.name),
                    ))
                }
                None => {
                    return Err(load_error(
                        field.pos,
                        format!("field '{}.{}' references unknown type '{target}'", ty.name, field.name),
                    ))
                }
            }
            for arg in field.arguments.values() {
                check_input_reference(schema, arg, &format!("{}.{}", ty.name, field.name))?;
            }
        }

        for input in ty.input_fields.values() {
            check_input_reference(schema, input, &ty.name)?;
        }

        for member in &ty.possible_types {
            if schema.get_type(member).map(|m| m.kind) != Some(TypeKind::Object) {
                return Err(load_error(
                    ty.pos,
                    format!("union '{}' member '{member}' must be an object type", ty.name),
                ));
            }
        }

        for interface_name in &ty.interfaces {
            let interface = match schema.get_type(interface_name) {
                Some(i) if i.kind == TypeKind::Interface => i,
                _ => {
                    return Err(load_error(
                        ty.pos,
                        format!("'{}' implements '{interface_name}', which is not an interface", ty.name),
                    ))
                }
            };
            for field_name in interface.fields.keys() {
                if !ty.fields.contains_key(field_name) {
                    return Err(load_error(
                        ty.pos,
                        format!(
                            "'{}' does not declare '{field_name}' required by interface '{interface_name}'",
                            ty.name
                        ),
                    ));
                }
            }
        }
    }

    Ok(())
}

fn check_input_reference(schema: &Schema, input: &InputValueDefinition, owner: &str) -> Result<()> {
    let target = named_type(&input.ty);
    match schema.get_type(target) {
        Some(ty) if ty.is_input() => Ok(()),
        Some(_) => Err(load_error(
            input.pos,
            format!("'{owner}.{}' must use an input type, found '{target}'", input.name),
        )),
        None => Err(load_error(
            input.pos,
            format!("'{owner}.{}' references unknown type '{target}'", input.name),
        )),
    }
}
