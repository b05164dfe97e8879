//! Document parsing and validation against the schema.

use super::coerce::{coerce_const, coerce_literal, CoercedVariables, InputSource, LiteralValue};
use crate::error::{ErrorCode, GraphQLError};
use crate::schema::{named_type, Schema, TypeKind};
use crate::types::{GraphQLRequest, Location, OperationType};
use async_graphql::indexmap::IndexMap;
use async_graphql::parser::types::{
    Directive, DocumentOperations, ExecutableDocument, Field, FragmentDefinition,
    OperationDefinition, Selection, SelectionSet,
};
use async_graphql::parser::Positioned;
use async_graphql::{Name, Pos, Value};
use std::collections::{HashMap, HashSet};

/// A parsed document whose selected operation passed validation.
#[derive(Debug)]
pub(crate) struct ValidatedDocument {
    pub operation_type: OperationType,
    pub root_type: String,
    pub operation: Positioned<OperationDefinition>,
    pub fragments: HashMap<Name, Positioned<FragmentDefinition>>,
    pub variables: CoercedVariables,
}

fn invalid(message: impl Into<String>, pos: Option<Pos>) -> GraphQLError {
    GraphQLError::new(message, ErrorCode::DocumentInvalid)
        .with_locations(pos.map(Location::from).into_iter().collect())
}

/// Parse the request document, select its operation and validate it.
pub(crate) fn validate(
    schema: &Schema,
    request: &GraphQLRequest,
) -> Result<ValidatedDocument, Vec<GraphQLError>> {
    let document = async_graphql::parser::parse_query(&request.query).map_err(|e| {
        vec![GraphQLError::new(e.to_string(), ErrorCode::DocumentInvalid)
            .with_locations(e.positions().map(Location::from).collect())]
    })?;

    let ExecutableDocument {
        operations,
        fragments,
    } = document;

    let operation = select_operation(operations, request.operation_name.as_deref())
        .map_err(|e| vec![e])?;

    let operation_type = OperationType::from(operation.node.ty);
    let root_type = match operation_type {
        OperationType::Subscription => {
            return Err(vec![invalid(
                "subscriptions are not supported by this gateway",
                Some(operation.pos),
            )])
        }
        op => schema.root_type(op).map(str::to_string).ok_or_else(|| {
            vec![invalid(
                format!("schema does not support {op} operations"),
                Some(operation.pos),
            )]
        })?,
    };

    let variables = coerce_variables(schema, &operation.node, request)?;

    let defined: HashSet<&str> = operation
        .node
        .variable_definitions
        .iter()
        .map(|def| def.node.name.node.as_str())
        .collect();

    let mut validator = Validator {
        schema,
        fragments: &fragments,
        variables: &variables,
        defined: &defined,
        spreading: Vec::new(),
        validated_fragments: HashSet::new(),
        errors: Vec::new(),
    };
    validator.directives(&operation.node.directives);
    validator.selection_set(&root_type, &operation.node.selection_set);
    let mut errors = validator.errors;

    if errors.is_empty() {
        let mut merge = MergeCheck {
            schema,
            fragments: &fragments,
            checked: HashSet::new(),
            errors: Vec::new(),
        };
        merge.selection_sets(&root_type, &[&operation.node.selection_set]);
        errors = merge.errors;
    }

    if !errors.is_empty() {
        return Err(errors);
    }

    Ok(ValidatedDocument {
        operation_type,
        root_type,
        operation,
        fragments,
        variables,
    })
}

fn select_operation(
    operations: DocumentOperations,
    name: Option<&str>,
) -> Result<Positioned<OperationDefinition>, GraphQLError> {
    match operations {
        DocumentOperations::Single(op) => Ok(op),
        DocumentOperations::Multiple(mut ops) => match name {
            Some(name) => ops
                .remove(name)
                .ok_or_else(|| invalid(format!("unknown operation named \"{name}\""), None)),
            None if ops.len() == 1 => ops
                .into_values()
                .next()
                .ok_or_else(|| invalid("document contains no operation", None)),
            None => Err(invalid(
                "operation name is required when the document contains several operations",
                None,
            )),
        },
    }
}

fn coerce_variables(
    schema: &Schema,
    operation: &OperationDefinition,
    request: &GraphQLRequest,
) -> Result<CoercedVariables, Vec<GraphQLError>> {
    let mut coerced = CoercedVariables::new();
    let mut errors = Vec::new();

    for definition in &operation.variable_definitions {
        let name = &definition.node.name.node;
        let ty = &definition.node.var_type.node;

        match schema.get_type(named_type(ty)) {
            Some(def) if def.is_input() => {}
            _ => {
                errors.push(invalid(
                    format!("variable ${name} cannot be of non-input type {ty}"),
                    Some(definition.pos),
                ));
                continue;
            }
        }

        let provided = request.variables.get(name.as_str());
        let (value, source) = match provided {
            Some(json) => match Value::from_json(json.clone()) {
                Ok(value) => (value, InputSource::Json),
                Err(e) => {
                    errors.push(invalid(
                        format!("variable ${name} is not valid JSON: {e}"),
                        Some(definition.pos),
                    ));
                    continue;
                }
            },
            None => match &definition.node.default_value {
                Some(default) => (default.node.clone(), InputSource::Literal),
                None if !ty.nullable => {
                    errors.push(invalid(
                        format!("variable ${name} of required type {ty} was not provided"),
                        Some(definition.pos),
                    ));
                    continue;
                }
                None => continue,
            },
        };

        match coerce_const(schema, ty, value, source) {
            Ok(value) => {
                coerced.insert(name.clone(), value);
            }
            Err(e) => errors.push(invalid(
                format!("variable ${name} got invalid value: {e}"),
                Some(definition.pos),
            )),
        }
    }

    if errors.is_empty() {
        Ok(coerced)
    } else {
        Err(errors)
    }
}

struct Validator<'a> {
    schema: &'a Schema,
    fragments: &'a HashMap<Name, Positioned<FragmentDefinition>>,
    variables: &'a CoercedVariables,
    defined: &'a HashSet<&'a str>,
    spreading: Vec<Name>,
    /// Fragments whose body was already walked; a body is validated against
    /// its own type condition, so once is enough.
    validated_fragments: HashSet<Name>,
    errors: Vec<GraphQLError>,
}

impl<'a> Validator<'a> {
    fn error(&mut self, message: impl Into<String>, pos: Pos) {
        self.errors.push(invalid(message, Some(pos)));
    }

    fn selection_set(&mut self, parent_type: &str, set: &Positioned<SelectionSet>) {
        for selection in &set.node.items {
            match &selection.node {
                Selection::Field(field) => self.field(parent_type, field),
                Selection::FragmentSpread(spread) => {
                    self.directives(&spread.node.directives);
                    let name = &spread.node.fragment_name.node;
                    let Some(fragment) = self.fragments.get(name) else {
                        self.error(format!("unknown fragment \"{name}\""), spread.pos);
                        continue;
                    };
                    if self.spreading.contains(name) {
                        self.error(format!("cannot spread fragment \"{name}\" within itself"), spread.pos);
                        continue;
                    }
                    let condition = fragment.node.type_condition.node.on.node.as_str();
                    if !self.type_condition_applies(parent_type, condition, spread.pos) {
                        continue;
                    }
                    if !self.validated_fragments.insert(name.clone()) {
                        continue;
                    }
                    self.directives(&fragment.node.directives);
                    self.spreading.push(name.clone());
                    self.selection_set(condition, &fragment.node.selection_set);
                    self.spreading.pop();
                }
                Selection::InlineFragment(inline) => {
                    self.directives(&inline.node.directives);
                    let condition = match &inline.node.type_condition {
                        Some(cond) => {
                            let on = cond.node.on.node.as_str();
                            if !self.type_condition_applies(parent_type, on, inline.pos) {
                                continue;
                            }
                            on
                        }
                        None => parent_type,
                    };
                    self.selection_set(condition, &inline.node.selection_set);
                }
            }
        }
    }

    fn type_condition_applies(&mut self, parent_type: &str, condition: &str, pos: Pos) -> bool {
        match self.schema.get_type(condition) {
            Some(def) if !def.is_leaf() && def.is_output() => {}
            Some(_) => {
                self.error(format!("fragment cannot condition on non-composite type \"{condition}\""), pos);
                return false;
            }
            None => {
                self.error(format!("unknown type \"{condition}\""), pos);
                return false;
            }
        }
        if !self.schema.types_overlap(parent_type, condition) {
            self.error(
                format!("fragment on \"{condition}\" can never apply to type \"{parent_type}\""),
                pos,
            );
            return false;
        }
        true
    }

    fn field(&mut self, parent_type: &str, field: &Positioned<Field>) {
        let name = field.node.name.node.as_str();
        self.directives(&field.node.directives);

        if name == "__typename" {
            if !field.node.arguments.is_empty() {
                self.error("\"__typename\" takes no arguments", field.pos);
            }
            if !field.node.selection_set.node.items.is_empty() {
                self.error("\"__typename\" must not have a selection", field.pos);
            }
            return;
        }

        let Some(definition) = self.schema.field(parent_type, name) else {
            self.error(
                format!("cannot query field \"{name}\" on type \"{parent_type}\""),
                field.pos,
            );
            return;
        };

        let mut seen = HashSet::new();
        for (arg_name, arg_value) in &field.node.arguments {
            let arg = arg_name.node.as_str();
            if !seen.insert(arg) {
                self.error(format!("argument \"{arg}\" is given more than once"), arg_name.pos);
                continue;
            }
            let Some(arg_def) = definition.arguments.get(arg) else {
                self.error(
                    format!("unknown argument \"{arg}\" on field \"{parent_type}.{name}\""),
                    arg_name.pos,
                );
                continue;
            };
            let defined = |var: &str| self.defined.contains(var);
            if let Err(e) = coerce_literal(self.schema, &arg_def.ty, &arg_value.node, self.variables, &defined) {
                self.error(format!("invalid value for argument \"{arg}\": {e}"), arg_value.pos);
            }
        }
        for (arg_name, arg_def) in &definition.arguments {
            if !arg_def.ty.nullable
                && arg_def.default_value.is_none()
                && !seen.contains(arg_name.as_str())
            {
                self.error(
                    format!(
                        "field \"{name}\" argument \"{arg_name}\" of type {} is required",
                        arg_def.ty
                    ),
                    field.pos,
                );
            }
        }

        let target = named_type(&definition.ty);
        let has_selection = !field.node.selection_set.node.items.is_empty();
        match self.schema.get_type(target) {
            Some(def) if def.is_leaf() && has_selection => self.error(
                format!("field \"{name}\" must not have a selection since type \"{target}\" has no subfields"),
                field.pos,
            ),
            Some(def) if !def.is_leaf() && !has_selection => self.error(
                format!("field \"{name}\" of type \"{}\" must have a selection of subfields", definition.ty),
                field.pos,
            ),
            Some(def) if !def.is_leaf() => {
                self.selection_set(target, &field.node.selection_set)
            }
            _ => {}
        }
    }

    fn directives(&mut self, directives: &[Positioned<Directive>]) {
        for directive in directives {
            let name = directive.node.name.node.as_str();
            if name != "skip" && name != "include" {
                self.error(format!("unknown directive \"@{name}\""), directive.pos);
                continue;
            }
            match directive.node.get_argument("if") {
                Some(value) => {
                    let defined = |var: &str| self.defined.contains(var);
                    let boolean = async_graphql::parser::types::Type::new("Boolean!");
                    let result = boolean
                        .ok_or_else(|| "Boolean! is not a valid type".to_string())
                        .and_then(|ty| {
                            coerce_literal(self.schema, &ty, &value.node, self.variables, &defined)
                        });
                    match result {
                        Ok(Some(_)) => {}
                        Ok(None) => self.error(
                            format!("directive \"@{name}\" argument \"if\" was not provided"),
                            directive.pos,
                        ),
                        Err(e) => self.error(
                            format!("invalid value for directive \"@{name}\": {e}"),
                            value.pos,
                        ),
                    }
                }
                None => self.error(
                    format!("directive \"@{name}\" requires argument \"if\""),
                    directive.pos,
                ),
            }
        }
    }
}

/// A field together with the type it was selected on.
type Selected<'a> = (&'a str, &'a Positioned<Field>);

/// Fields that end up under one response key must be mergeable: they select
/// the same field with the same arguments, unless they sit on two different
/// object types and so never apply to the same value.
struct MergeCheck<'a> {
    schema: &'a Schema,
    fragments: &'a HashMap<Name, Positioned<FragmentDefinition>>,
    checked: HashSet<(&'a str, Vec<Pos>)>,
    errors: Vec<GraphQLError>,
}

impl<'a> MergeCheck<'a> {
    fn selection_sets(&mut self, parent_type: &'a str, sets: &[&'a Positioned<SelectionSet>]) {
        let mut positions: Vec<Pos> = sets.iter().map(|set| set.pos).collect();
        positions.sort();
        positions.dedup();
        if !self.checked.insert((parent_type, positions)) {
            return;
        }

        let mut by_key: IndexMap<&'a Name, Vec<Selected<'a>>> = IndexMap::new();
        let mut visited = HashSet::new();
        for set in sets {
            self.collect(parent_type, &set.node, &mut visited, &mut by_key);
        }

        for (key, fields) in by_key {
            if let Some((reason, pos)) = self.conflict(&fields) {
                self.errors
                    .push(invalid(format!("fields \"{key}\" conflict because {reason}"), Some(pos)));
                continue;
            }
            for group in self.merge_groups(&fields) {
                let (parent, field) = group[0];
                let Some(definition) = self.schema.field(parent, field.node.name.node.as_str()) else {
                    continue;
                };
                let sets: Vec<_> = group
                    .iter()
                    .map(|&(_, f)| &f.node.selection_set)
                    .filter(|set| !set.node.items.is_empty())
                    .collect();
                if !sets.is_empty() {
                    self.selection_sets(named_type(&definition.ty), &sets);
                }
            }
        }
    }

    fn collect(
        &self,
        parent_type: &'a str,
        set: &'a SelectionSet,
        visited: &mut HashSet<&'a Name>,
        out: &mut IndexMap<&'a Name, Vec<Selected<'a>>>,
    ) {
        for selection in &set.items {
            match &selection.node {
                Selection::Field(field) => out
                    .entry(&field.node.response_key().node)
                    .or_default()
                    .push((parent_type, field)),
                Selection::FragmentSpread(spread) => {
                    let name = &spread.node.fragment_name.node;
                    if !visited.insert(name) {
                        continue;
                    }
                    if let Some(fragment) = self.fragments.get(name) {
                        let condition = fragment.node.type_condition.node.on.node.as_str();
                        self.collect(condition, &fragment.node.selection_set.node, visited, out);
                    }
                }
                Selection::InlineFragment(inline) => {
                    let condition = inline
                        .node
                        .type_condition
                        .as_ref()
                        .map_or(parent_type, |cond| cond.node.on.node.as_str());
                    self.collect(condition, &inline.node.selection_set.node, visited, out);
                }
            }
        }
    }

    fn is_object(&self, type_name: &str) -> bool {
        self.schema.get_type(type_name).map(|ty| ty.kind) == Some(TypeKind::Object)
    }

    fn disjoint(&self, a: &str, b: &str) -> bool {
        a != b && self.is_object(a) && self.is_object(b)
    }

    fn conflict(&self, fields: &[Selected<'a>]) -> Option<(String, Pos)> {
        for (i, (parent_a, a)) in fields.iter().enumerate() {
            for (parent_b, b) in &fields[i + 1..] {
                if self.disjoint(parent_a, parent_b) {
                    continue;
                }
                let (name_a, name_b) = (&a.node.name.node, &b.node.name.node);
                if name_a != name_b {
                    return Some((format!("\"{name_a}\" and \"{name_b}\" are different fields"), b.pos));
                }
                if argument_map(&a.node) != argument_map(&b.node) {
                    return Some((format!("they select \"{name_a}\" with differing arguments"), b.pos));
                }
            }
        }
        None
    }

    /// Fields that can apply to the same runtime object: one group per
    /// object parent, with fields on abstract parents joining every group.
    fn merge_groups(&self, fields: &[Selected<'a>]) -> Vec<Vec<Selected<'a>>> {
        let (objects, shared): (Vec<_>, Vec<_>) =
            fields.iter().copied().partition(|(parent, _)| self.is_object(parent));
        if objects.is_empty() {
            return vec![shared];
        }

        let mut groups: IndexMap<&'a str, Vec<Selected<'a>>> = IndexMap::new();
        for selected in objects {
            groups.entry(selected.0).or_default().push(selected);
        }
        groups
            .into_values()
            .map(|mut group| {
                group.extend(shared.iter().copied());
                group
            })
            .collect()
    }
}

fn argument_map(field: &Field) -> IndexMap<&Name, &LiteralValue> {
    field
        .arguments
        .iter()
        .map(|(name, value)| (&name.node, &value.node))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    const SDL: &str = r#"
        type Query {
            user: UserInfo
            cluster(id: ID!): Cluster
            clusters(status: Status = HEALTHY, first: Int): [Cluster!]!
            node(id: ID!): Node
        }
        type Mutation { rename(id: ID!, name: String!): Cluster }
        type Subscription { ticks: Int }
        interface Node { id: ID! }
        type UserInfo implements Node { id: ID! email: String }
        type Cluster implements Node { id: ID! name: String! status: Status! }
        enum Status { HEALTHY UNHEALTHY }
    "#;

    fn check(query: &str) -> Result<ValidatedDocument, Vec<GraphQLError>> {
        check_with(GraphQLRequest::new(query))
    }

    fn check_with(request: GraphQLRequest) -> Result<ValidatedDocument, Vec<GraphQLError>> {
        let schema = Schema::parse(SDL).unwrap();
        validate(&schema, &request)
    }

    fn first_error(query: &str) -> String {
        match check(query) {
            Err(errors) => errors[0].message.clone(),
            Ok(_) => panic!("expected {query} to be invalid"),
        }
    }

    #[test]
    fn accepts_valid_documents() {
        let doc = check("{ user { id email __typename } clusters { id name status } }").unwrap();
        assert_eq!(doc.operation_type, OperationType::Query);
        assert_eq!(doc.root_type, "Query");
    }

    #[test]
    fn unknown_field_is_rejected_with_location() {
        let errors = check("{ nonexistentField }").unwrap_err();
        assert_eq!(errors.len(), 1);
        assert_eq!(
            errors[0].message,
            "cannot query field \"nonexistentField\" on type \"Query\""
        );
        assert_eq!(errors[0].locations, vec![Location { line: 1, column: 3 }]);
        assert_eq!(errors[0].code(), Some("DOCUMENT_INVALID"));
    }

    #[test]
    fn syntax_errors_are_document_invalid() {
        let errors = check("{ user { id }").unwrap_err();
        assert_eq!(errors[0].code(), Some("DOCUMENT_INVALID"));
    }

    #[test]
    fn selection_shape_is_checked() {
        assert!(first_error("{ user }").contains("must have a selection of subfields"));
        assert!(first_error("{ user { id { x } } }").contains("must not have a selection"));
    }

    #[test]
    fn arguments_are_checked() {
        assert!(first_error("{ cluster { id } }").contains("argument \"id\" of type ID! is required"));
        assert!(first_error("{ cluster(id: \"1\", zone: 2) { id } }").contains("unknown argument \"zone\""));
        assert!(first_error("{ clusters(first: \"ten\") { id } }").contains("invalid value for argument \"first\""));
        assert!(first_error("{ clusters(status: SIDEWAYS) { id } }").contains("not a value of enum Status"));
    }

    #[test]
    fn variables_are_coerced_and_required() {
        let doc = check_with(
            GraphQLRequest::new("query($id: ID!) { cluster(id: $id) { id } }")
                .variables(serde_json::json!({"id": 42})),
        )
        .unwrap();
        assert_eq!(doc.variables["id"], Value::from("42"));

        let missing = check("query($id: ID!) { cluster(id: $id) { id } }").unwrap_err();
        assert!(missing[0].message.contains("was not provided"));

        assert!(first_error("{ cluster(id: $nope) { id } }").contains("variable $nope is not defined"));
    }

    #[test]
    fn fragments_are_checked() {
        assert!(check("{ node(id: \"1\") { id ... on Cluster { name } ...U } } fragment U on UserInfo { email }").is_ok());
        assert!(first_error("{ user { ...Missing } }").contains("unknown fragment"));
        assert!(first_error("{ user { ... on Cluster { name } } }").contains("can never apply"));
        assert!(first_error("{ user { ...A } } fragment A on UserInfo { ...A }").contains("within itself"));
    }

    #[test]
    fn operation_selection() {
        let doc = "query A { user { id } } query B { clusters { id } }";
        assert!(check_with(GraphQLRequest::new(doc).operation_name("B")).is_ok());
        assert!(check(doc).unwrap_err()[0].message.contains("operation name is required"));
        assert!(check_with(GraphQLRequest::new(doc).operation_name("C")).is_err());
    }

    #[test]
    fn subscriptions_are_rejected() {
        assert!(first_error("subscription { ticks }").contains("not supported"));
    }

    #[test]
    fn directives_are_checked() {
        assert!(check("query($s: Boolean!) { user @skip(if: $s) { id } }")
            .unwrap_err()[0]
            .message
            .contains("was not provided"));
        assert!(check("{ user @include(if: true) { id } }").is_ok());
        assert!(first_error("{ user @cached { id } }").contains("unknown directive"));
    }

    #[test]
    fn conflicting_aliases_are_rejected() {
        assert!(first_error("{ x: user { id } x: clusters { id } }").contains("conflict"));
        assert!(check("{ user { id } user { email } }").is_ok());
    }

    #[test]
    fn same_key_needs_same_arguments() {
        assert!(first_error(r#"{ cluster(id: "c1") { id } cluster(id: "c2") { name } }"#)
            .contains("differing arguments"));
        assert!(check(r#"{ cluster(id: "c1") { id } cluster(id: "c1") { name } }"#).is_ok());
        assert!(check_with(
            GraphQLRequest::new("query($id: ID!) { cluster(id: $id) { id } ...C } fragment C on Query { cluster(id: $id) { name } }")
                .variables(serde_json::json!({"id": "c1"}))
        )
        .is_ok());
    }

    #[test]
    fn aliases_may_differ_across_object_types() {
        assert!(check(r#"{ node(id: "c1") { ... on Cluster { x: name } ... on UserInfo { x: email } } }"#).is_ok());
        assert!(first_error(r#"{ node(id: "c1") { x: id ... on Cluster { x: name } } }"#)
            .contains("different fields"));
    }

    #[test]
    fn merged_subselections_are_checked() {
        assert!(first_error(r#"{ cluster(id: "c1") { x: id } cluster(id: "c1") { x: name } }"#)
            .contains("conflict"));
        assert!(first_error(r#"{ ...A ...B } fragment A on Query { user { x: id } } fragment B on Query { user { x: email } }"#)
            .contains("conflict"));
    }

    #[test]
    fn repeated_fragment_spreads_validate_in_linear_time() {
        let depth = 30;
        let mut query = String::from("{ ...F0 }");
        for i in 0..depth {
            let next = i + 1;
            query.push_str(&format!(" fragment F{i} on Query {{ ...F{next} ...F{next} }}"));
        }
        query.push_str(&format!(" fragment F{depth} on Query {{ __typename user {{ id }} }}"));

        let started = std::time::Instant::now();
        assert!(check(&query).is_ok());
        assert!(started.elapsed() < std::time::Duration::from_secs(2));
    }
}
