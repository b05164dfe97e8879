//! Resolution planning: which fields run, with which arguments.

use super::coerce::{coerce_literal, CoercedVariables};
use super::validate::ValidatedDocument;
use crate::schema::{FieldDefinition, Schema};
use crate::types::OperationType;
use async_graphql::indexmap::IndexMap;
use async_graphql::parser::types::{
    BaseType, Directive, Field, FragmentDefinition, Selection, SelectionSet, Type,
};
use async_graphql::parser::Positioned;
use async_graphql::{Name, Pos, Value};
use std::collections::{HashMap, HashSet};

/// Field invocations for one request.
pub(crate) struct ResolutionPlan<'a> {
    pub operation_type: OperationType,
    pub root_type: &'a str,
    pub root_fields: Vec<PlannedField<'a>>,
    pub fragments: &'a HashMap<Name, Positioned<FragmentDefinition>>,
    pub variables: &'a CoercedVariables,
    pub max_concurrency: usize,
}

impl<'a> ResolutionPlan<'a> {
    /// Root fields of one mutation run one after another.
    pub fn is_serial(&self) -> bool {
        self.operation_type == OperationType::Mutation
    }
}

/// One field to resolve on a known parent object type.
pub(crate) struct PlannedField<'a> {
    pub response_key: Name,
    pub field_name: Name,
    pub parent_type: &'a str,
    pub ty: Type,
    pub arguments: IndexMap<Name, Value>,
    /// Every selection set merged under this response key
    pub selections: Vec<&'a SelectionSet>,
    pub pos: Pos,
}

impl PlannedField<'_> {
    pub fn is_typename(&self) -> bool {
        self.field_name.as_str() == "__typename"
    }
}

/// Build the plan for a validated document.
pub(crate) fn plan<'a>(
    schema: &'a Schema,
    document: &'a ValidatedDocument,
    max_concurrency: usize,
) -> Result<ResolutionPlan<'a>, (String, Pos)> {
    let root_type = document.root_type.as_str();
    let root_fields = collect_fields(
        schema,
        root_type,
        &[&document.operation.node.selection_set.node],
        &document.fragments,
        &document.variables,
    )?;

    Ok(ResolutionPlan {
        operation_type: document.operation_type,
        root_type,
        root_fields,
        fragments: &document.fragments,
        variables: &document.variables,
        max_concurrency: max_concurrency.max(1),
    })
}

/// Collect the fields selected on a value of concrete `object_type`, in
/// document order, merging fields that share a response key.
pub(crate) fn collect_fields<'a>(
    schema: &'a Schema,
    object_type: &'a str,
    selection_sets: &[&'a SelectionSet],
    fragments: &'a HashMap<Name, Positioned<FragmentDefinition>>,
    variables: &CoercedVariables,
) -> Result<Vec<PlannedField<'a>>, (String, Pos)> {
    let mut collector = Collector {
        schema,
        object_type,
        fragments,
        variables,
        visited: HashSet::new(),
        fields: IndexMap::new(),
    };
    for set in selection_sets {
        collector.selection_set(set)?;
    }
    Ok(collector.fields.into_values().collect())
}

struct Collector<'a, 'v> {
    schema: &'a Schema,
    object_type: &'a str,
    fragments: &'a HashMap<Name, Positioned<FragmentDefinition>>,
    variables: &'v CoercedVariables,
    visited: HashSet<&'a Name>,
    fields: IndexMap<Name, PlannedField<'a>>,
}

impl<'a> Collector<'a, '_> {
    fn selection_set(&mut self, set: &'a SelectionSet) -> Result<(), (String, Pos)> {
        for selection in &set.items {
            match &selection.node {
                Selection::Field(field) => {
                    if self.included(&field.node.directives)? {
                        self.field(field)?;
                    }
                }
                Selection::FragmentSpread(spread) => {
                    if !self.included(&spread.node.directives)? {
                        continue;
                    }
                    let name = &spread.node.fragment_name.node;
                    if !self.visited.insert(name) {
                        continue;
                    }
                    let Some(fragment) = self.fragments.get(name) else {
                        continue;
                    };
                    let condition = fragment.node.type_condition.node.on.node.as_str();
                    if self.included(&fragment.node.directives)?
                        && self.schema.is_possible_type(condition, self.object_type)
                    {
                        self.selection_set(&fragment.node.selection_set.node)?;
                    }
                }
                Selection::InlineFragment(inline) => {
                    if !self.included(&inline.node.directives)? {
                        continue;
                    }
                    let applies = inline.node.type_condition.as_ref().map_or(true, |cond| {
                        self.schema
                            .is_possible_type(cond.node.on.node.as_str(), self.object_type)
                    });
                    if applies {
                        self.selection_set(&inline.node.selection_set.node)?;
                    }
                }
            }
        }
        Ok(())
    }

    fn field(&mut self, field: &'a Positioned<Field>) -> Result<(), (String, Pos)> {
        let key = field.node.response_key().node.clone();
        if let Some(existing) = self.fields.get_mut(&key) {
            existing.selections.push(&field.node.selection_set.node);
            return Ok(());
        }

        let name = field.node.name.node.clone();
        let planned = if name.as_str() == "__typename" {
            PlannedField {
                response_key: key.clone(),
                field_name: name,
                parent_type: self.object_type,
                ty: Type {
                    base: BaseType::Named(Name::new("String")),
                    nullable: false,
                },
                arguments: IndexMap::new(),
                selections: Vec::new(),
                pos: field.pos,
            }
        } else {
            let definition = self
                .schema
                .field(self.object_type, name.as_str())
                .ok_or_else(|| {
                    (
                        format!("cannot query field \"{name}\" on type \"{}\"", self.object_type),
                        field.pos,
                    )
                })?;
            PlannedField {
                response_key: key.clone(),
                arguments: self.arguments(definition, &field.node)?,
                field_name: name,
                parent_type: self.object_type,
                ty: definition.ty.clone(),
                selections: vec![&field.node.selection_set.node],
                pos: field.pos,
            }
        };
        self.fields.insert(key, planned);
        Ok(())
    }

    fn arguments(
        &self,
        definition: &FieldDefinition,
        field: &Field,
    ) -> Result<IndexMap<Name, Value>, (String, Pos)> {
        let defined = |_: &str| true;
        let mut arguments = IndexMap::new();
        for (name, arg_def) in &definition.arguments {
            let provided = field.get_argument(name);
            let value = match provided {
                Some(literal) => {
                    coerce_literal(self.schema, &arg_def.ty, &literal.node, self.variables, &defined)
                        .map_err(|e| (format!("invalid value for argument \"{name}\": {e}"), literal.pos))?
                }
                None => None,
            };
            match value.or_else(|| arg_def.default_value.clone()) {
                Some(value) => {
                    arguments.insert(Name::new(name), value);
                }
                None if !arg_def.ty.nullable => {
                    return Err((format!("argument \"{name}\" of type {} is required", arg_def.ty), field.name.pos));
                }
                None => {}
            }
        }
        Ok(arguments)
    }

    /// Evaluate `@skip` / `@include`.
    fn included(&self, directives: &[Positioned<Directive>]) -> Result<bool, (String, Pos)> {
        for directive in directives {
            let skip_when = match directive.node.name.node.as_str() {
                "skip" => true,
                "include" => false,
                _ => continue,
            };
            let condition = directive
                .node
                .get_argument("if")
                .map(|value| {
                    value.node.clone().into_const_with(|name| {
                        self.variables
                            .get(&name)
                            .cloned()
                            .ok_or_else(|| (format!("variable ${name} was not provided"), value.pos))
                    })
                })
                .transpose()?;
            if let Some(Value::Boolean(flag)) = condition {
                if flag == skip_when {
                    return Ok(false);
                }
            }
        }
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::validate::validate;
    use crate::types::GraphQLRequest;
    use async_graphql::value;

    const SDL: &str = r#"
        type Query {
            user: UserInfo
            clusters(status: Status = HEALTHY, first: Int): [Cluster!]!
            node(id: ID!): Node
        }
        interface Node { id: ID! }
        type UserInfo implements Node { id: ID! email: String }
        type Cluster implements Node { id: ID! name: String! }
        enum Status { HEALTHY UNHEALTHY }
    "#;

    fn with_plan(request: GraphQLRequest, check: impl FnOnce(&Schema, &ResolutionPlan<'_>)) {
        let schema = Schema::parse(SDL).unwrap();
        let document = validate(&schema, &request).unwrap_or_else(|e| panic!("{e:?}"));
        let plan = plan(&schema, &document, 4).unwrap();
        check(&schema, &plan);
    }

    fn keys(fields: &[PlannedField<'_>]) -> Vec<String> {
        fields.iter().map(|f| f.response_key.to_string()).collect()
    }

    #[test]
    fn root_fields_keep_document_order_and_merge_keys() {
        with_plan(
            GraphQLRequest::new("{ clusters { id } me: user { id } __typename user { email } me: user { email } }"),
            |_, plan| {
                assert_eq!(keys(&plan.root_fields), vec!["clusters", "me", "__typename", "user"]);
                assert_eq!(plan.root_fields[1].selections.len(), 2);
                assert!(plan.root_fields[2].is_typename());
                assert!(!plan.is_serial());
            },
        );
    }

    #[test]
    fn arguments_get_defaults_and_variables() {
        with_plan(
            GraphQLRequest::new("query($n: Int) { clusters(first: $n) { id } }")
                .variables(serde_json::json!({"n": 3})),
            |_, plan| {
                let args = &plan.root_fields[0].arguments;
                assert_eq!(args["status"], Value::Enum(Name::new("HEALTHY")));
                assert_eq!(args["first"], value!(3));
            },
        );

        with_plan(
            GraphQLRequest::new("query($n: Int) { clusters(first: $n) { id } }"),
            |_, plan| {
                assert!(plan.root_fields[0].arguments.get("first").is_none());
            },
        );
    }

    #[test]
    fn skip_and_include_directives() {
        with_plan(
            GraphQLRequest::new("query($hide: Boolean!) { user @skip(if: $hide) { id } clusters @include(if: false) { id } node(id: 1) { id } }")
                .variables(serde_json::json!({"hide": true})),
            |_, plan| assert_eq!(keys(&plan.root_fields), vec!["node"]),
        );
    }

    #[test]
    fn fragments_apply_by_concrete_type() {
        with_plan(
            GraphQLRequest::new("{ node(id: 1) { id ... on Cluster { name } ...U } } fragment U on UserInfo { email }"),
            |schema, plan| {
                let node = &plan.root_fields[0];
                let as_cluster =
                    collect_fields(schema, "Cluster", &node.selections, plan.fragments, plan.variables).unwrap();
                assert_eq!(keys(&as_cluster), vec!["id", "name"]);

                let as_user =
                    collect_fields(schema, "UserInfo", &node.selections, plan.fragments, plan.variables).unwrap();
                assert_eq!(keys(&as_user), vec!["id", "email"]);
            },
        );
    }
}
