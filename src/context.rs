use crate::builder::collect_fields;
use crate::consts::{meta_field_def_for_name, MUTATION_TYPE_NAME, QUERY_TYPE_NAME};
use crate::federation::Federation;
use crate::helpers::{
    build_possible_types, names_to_types, response_name, type_name, Op, OperationKind,
};
use crate::{QueryPlanError, Result};
use graphql_parser::query::{
    FragmentDefinition, Selection, SelectionSet, Type, TypeCondition, Value, VariableDefinition,
};
use graphql_parser::schema::{
    DirectiveDefinition, InterfaceType, ObjectType, TypeDefinition, UnionType,
};
use graphql_parser::{query, schema, Pos};
use linked_hash_map::LinkedHashMap;
use std::collections::{HashMap, HashSet};

/// The resolved target operation plus the document's named fragments.
#[derive(Debug, Clone)]
pub struct OperationContext<'q> {
    pub schema: &'q schema::Document<'static, String>,
    pub operation: Op<'q>,
    pub fragments: HashMap<&'q str, &'q FragmentDefinition<'static, String>>,
}

/// Cached accessors over the schema and operation for one planning run.
#[derive(Debug)]
pub struct QueryPlanningContext<'q> {
    pub schema: &'q schema::Document<'static, String>,
    pub operation: Op<'q>,
    pub fragments: HashMap<&'q str, &'q FragmentDefinition<'static, String>>,
    pub names_to_types: HashMap<&'q str, &'q TypeDefinition<'static, String>>,
    pub possible_types: HashMap<&'q str, Vec<&'q ObjectType<'static, String>>>,
    pub variable_name_to_def: HashMap<&'q str, &'q VariableDefinition<'static, String>>,
    pub federation: Federation,
}

impl<'q> QueryPlanningContext<'q> {
    pub fn new(operation_context: &'q OperationContext<'q>) -> QueryPlanningContext<'q> {
        let types = names_to_types(operation_context.schema);
        let possible_types = build_possible_types(operation_context.schema, &types);

        QueryPlanningContext {
            schema: operation_context.schema,
            operation: operation_context.operation.clone(),
            fragments: operation_context.fragments.clone(),
            possible_types,
            variable_name_to_def: operation_context
                .operation
                .variable_definitions
                .iter()
                .map(|vd| (vd.name.as_str(), vd))
                .collect(),
            federation: Federation::new(operation_context.schema),
            names_to_types: types,
        }
    }

    pub fn get_type(&self, type_name: &str) -> Option<&'q TypeDefinition<'static, String>> {
        self.names_to_types.get(type_name).copied()
    }

    pub fn root_type(&self, kind: OperationKind) -> Result<&'q TypeDefinition<'static, String>> {
        let mut root_name = match kind {
            OperationKind::Mutation => MUTATION_TYPE_NAME,
            _ => QUERY_TYPE_NAME,
        };
        for definition in &self.schema.definitions {
            if let schema::Definition::SchemaDefinition(sd) = definition {
                let declared = match kind {
                    OperationKind::Query => sd.query.as_deref(),
                    OperationKind::Mutation => sd.mutation.as_deref(),
                    OperationKind::Subscription => sd.subscription.as_deref(),
                };
                if let Some(name) = declared {
                    root_name = name;
                }
            }
        }
        self.get_type(root_name)
            .ok_or_else(|| QueryPlanError::MissingRootType(root_name.to_string()))
    }

    pub fn composite_type(&self, type_name: &str) -> Option<GraphQLCompositeType<'q>> {
        match self.get_type(type_name) {
            Some(td @ TypeDefinition::Object(_))
            | Some(td @ TypeDefinition::Interface(_))
            | Some(td @ TypeDefinition::Union(_)) => Some(GraphQLCompositeType::from(td)),
            _ => None,
        }
    }

    pub fn get_possible_types(
        &self,
        composite: &GraphQLCompositeType<'q>,
    ) -> Vec<&'q ObjectType<'static, String>> {
        match composite {
            GraphQLCompositeType::Object(obj) => vec![*obj],
            _ => self
                .possible_types
                .get(composite.name())
                .cloned()
                .unwrap_or_default(),
        }
    }

    pub fn get_field_def(
        &self,
        parent_type: &GraphQLCompositeType<'q>,
        field_name: &str,
        position: Pos,
    ) -> Result<&'q schema::Field<'static, String>> {
        if let Some(meta) = meta_field_def_for_name(field_name) {
            return Ok(meta);
        }

        let fields = match parent_type {
            GraphQLCompositeType::Object(obj) => Some(&obj.fields),
            GraphQLCompositeType::Interface(iface) => Some(&iface.fields),
            GraphQLCompositeType::Union(_) => None,
        };

        fields
            .and_then(|fields| fields.iter().find(|f| f.name == field_name))
            .ok_or_else(|| QueryPlanError::UnknownField {
                parent_type: parent_type.name().to_string(),
                field_name: field_name.to_string(),
                position,
            })
    }

    pub fn get_base_service(&self, parent_type: &ObjectType<'static, String>) -> Option<String> {
        self.federation.service_name_for_type(parent_type)
    }

    pub fn get_owning_service(
        &self,
        parent_type: &ObjectType<'static, String>,
        field_def: &schema::Field<'static, String>,
    ) -> Option<String> {
        self.federation
            .service_name_for_field(field_def)
            .or_else(|| self.get_base_service(parent_type))
    }

    /// `__typename` plus, for every possible concrete type, the first key
    /// declared for the service, expanded into fields under that concrete
    /// type. Without declared keys the result is `__typename` alone.
    pub fn get_key_fields(
        &self,
        parent_type: &GraphQLCompositeType<'q>,
        service_name: &str,
    ) -> Result<FieldSet<'q>> {
        let mut key_fields = vec![Field::typename(parent_type.clone())];

        for possible_type in self.get_possible_types(parent_type) {
            if let Some(key) = self.federation.key(possible_type, service_name) {
                let mut visited = HashSet::new();
                collect_fields(
                    self,
                    GraphQLCompositeType::Object(possible_type),
                    key,
                    &mut key_fields,
                    &mut visited,
                )?;
            }
        }

        Ok(key_fields)
    }

    /// Keys of the parent in the owning service, plus any `@requires`
    /// selection expanded under the parent type.
    pub fn get_required_fields(
        &self,
        parent_type: &GraphQLCompositeType<'q>,
        field_def: &schema::Field<'static, String>,
        service_name: &str,
    ) -> Result<FieldSet<'q>> {
        let mut required_fields = self.get_key_fields(parent_type, service_name)?;

        if let Some(requires) = self.federation.requires(field_def) {
            let mut visited = HashSet::new();
            collect_fields(
                self,
                parent_type.clone(),
                requires,
                &mut required_fields,
                &mut visited,
            )?;
        }

        Ok(required_fields)
    }

    /// Fields the service returns inline for the given field: keys of the
    /// composite return type plus any `@provides` selection. Empty for
    /// non-composite returns.
    pub fn get_provided_fields(
        &self,
        field_def: &'q schema::Field<'static, String>,
        service_name: &str,
    ) -> Result<FieldSet<'q>> {
        let return_type_name = crate::helpers::named_type_of(&field_def.field_type);
        let return_type = match self.composite_type(return_type_name) {
            Some(composite) => composite,
            None => return Ok(vec![]),
        };

        let mut provided_fields = self.get_key_fields(&return_type, service_name)?;

        if let Some(provides) = self.federation.provides(field_def) {
            let mut visited = HashSet::new();
            collect_fields(
                self,
                return_type,
                provides,
                &mut provided_fields,
                &mut visited,
            )?;
        }

        Ok(provided_fields)
    }

    /// Variable references inside the selection set, in first-use order, with
    /// the input type expected at the usage site. The operation's
    /// variable-definition default overrides the schema's input default.
    /// Variable definitions themselves are not reported.
    pub fn get_variable_usages(
        &self,
        parent_type: Option<&GraphQLCompositeType<'q>>,
        selection_set: &SelectionSet<'static, String>,
    ) -> Vec<VariableUsage> {
        let mut usages: LinkedHashMap<String, VariableUsage> = LinkedHashMap::new();
        self.collect_variable_usages(parent_type, selection_set, &mut usages);
        usages.into_iter().map(|(_, usage)| usage).collect()
    }

    fn collect_variable_usages(
        &self,
        parent_type: Option<&GraphQLCompositeType<'q>>,
        selection_set: &SelectionSet<'static, String>,
        usages: &mut LinkedHashMap<String, VariableUsage>,
    ) {
        for selection in &selection_set.items {
            match selection {
                Selection::Field(field) => {
                    let field_def = parent_type.and_then(|parent| {
                        self.get_field_def(parent, &field.name, field.position).ok()
                    });

                    for (name, value) in &field.arguments {
                        let expected = field_def.and_then(|fd| {
                            fd.arguments.iter().find(|input| &input.name == name).map(
                                |input| (&input.value_type, input.default_value.as_ref()),
                            )
                        });
                        self.collect_usages_in_value(value, expected, usages);
                    }
                    self.collect_directive_usages(&field.directives, usages);

                    if !field.selection_set.items.is_empty() {
                        let return_type = field_def.and_then(|fd| {
                            self.composite_type(crate::helpers::named_type_of(&fd.field_type))
                        });
                        self.collect_variable_usages(
                            return_type.as_ref(),
                            &field.selection_set,
                            usages,
                        );
                    }
                }
                Selection::InlineFragment(inline) => {
                    self.collect_directive_usages(&inline.directives, usages);
                    let condition_type = match &inline.type_condition {
                        Some(TypeCondition::On(condition)) => self.composite_type(condition),
                        None => None,
                    };
                    self.collect_variable_usages(
                        condition_type.as_ref().or(parent_type),
                        &inline.selection_set,
                        usages,
                    );
                }
                // Fragments are inlined before rendering; spreads never
                // appear in planned selection sets.
                Selection::FragmentSpread(_) => (),
            }
        }
    }

    fn collect_directive_usages(
        &self,
        directives: &[query::Directive<'static, String>],
        usages: &mut LinkedHashMap<String, VariableUsage>,
    ) {
        for directive in directives {
            let definition = self.directive_definition(&directive.name);
            for (name, value) in &directive.arguments {
                let expected = definition.and_then(|dd| {
                    dd.arguments
                        .iter()
                        .find(|input| &input.name == name)
                        .map(|input| (&input.value_type, input.default_value.as_ref()))
                });
                self.collect_usages_in_value(value, expected, usages);
            }
        }
    }

    fn collect_usages_in_value(
        &self,
        value: &Value<'static, String>,
        expected: Option<(&Type<'static, String>, Option<&Value<'static, String>>)>,
        usages: &mut LinkedHashMap<String, VariableUsage>,
    ) {
        match value {
            Value::Variable(name) => {
                if usages.contains_key(name.as_str()) {
                    return;
                }
                let variable_def = self.variable_name_to_def.get(name.as_str());
                let input_type = match expected {
                    Some((ty, _)) => ty.clone(),
                    None => match variable_def {
                        Some(vd) => vd.var_type.clone(),
                        None => return,
                    },
                };
                let default_value = variable_def
                    .and_then(|vd| vd.default_value.clone())
                    .or_else(|| expected.and_then(|(_, default)| default.cloned()));
                usages.insert(
                    name.clone(),
                    VariableUsage {
                        name: name.clone(),
                        input_type,
                        default_value,
                    },
                );
            }
            Value::List(items) => {
                let item_expected: Option<(
                    &Type<'static, String>,
                    Option<&Value<'static, String>>,
                )> = expected.map(|(ty, _)| (list_item_type(ty), None));
                for item in items {
                    self.collect_usages_in_value(item, item_expected, usages);
                }
            }
            Value::Object(entries) => {
                let input_object = expected.and_then(|(ty, _)| {
                    match self.get_type(crate::helpers::named_type_of(ty)) {
                        Some(TypeDefinition::InputObject(io)) => Some(io),
                        _ => None,
                    }
                });
                for (key, entry) in entries {
                    let entry_expected = input_object.and_then(|io| {
                        io.fields
                            .iter()
                            .find(|input| &input.name == key)
                            .map(|input| (&input.value_type, input.default_value.as_ref()))
                    });
                    self.collect_usages_in_value(entry, entry_expected, usages);
                }
            }
            _ => (),
        }
    }

    fn directive_definition(
        &self,
        name: &str,
    ) -> Option<&'q DirectiveDefinition<'static, String>> {
        self.schema.definitions.iter().find_map(|d| match d {
            schema::Definition::DirectiveDefinition(dd) if dd.name == name => Some(dd),
            _ => None,
        })
    }
}

fn list_item_type<'a>(ty: &'a Type<'static, String>) -> &'a Type<'static, String> {
    match ty {
        Type::NonNullType(inner) => list_item_type(inner),
        Type::ListType(inner) => inner,
        Type::NamedType(_) => ty,
    }
}

/// A variable reference found while walking a selection set with type
/// tracking.
#[derive(Debug, Clone, PartialEq)]
pub struct VariableUsage {
    pub name: String,
    pub input_type: Type<'static, String>,
    pub default_value: Option<Value<'static, String>>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum GraphQLCompositeType<'q> {
    Object(&'q ObjectType<'static, String>),
    Interface(&'q InterfaceType<'static, String>),
    Union(&'q UnionType<'static, String>),
}

impl<'q> GraphQLCompositeType<'q> {
    pub fn name(&self) -> &'q str {
        match self {
            GraphQLCompositeType::Object(obj) => &obj.name,
            GraphQLCompositeType::Interface(iface) => &iface.name,
            GraphQLCompositeType::Union(un) => &un.name,
        }
    }

    pub fn is_abstract(&self) -> bool {
        !matches!(self, GraphQLCompositeType::Object(_))
    }
}

impl<'q> From<&'q TypeDefinition<'static, String>> for GraphQLCompositeType<'q> {
    fn from(td: &'q TypeDefinition<'static, String>) -> Self {
        match td {
            TypeDefinition::Object(o) => GraphQLCompositeType::Object(o),
            TypeDefinition::Interface(iface) => GraphQLCompositeType::Interface(iface),
            TypeDefinition::Union(un) => GraphQLCompositeType::Union(un),
            other => unreachable!("not a composite type: {}", type_name(other)),
        }
    }
}

/// One collected field: the composite type it was selected on, the (possibly
/// rewritten) AST node, and its schema definition.
#[derive(Debug, Clone, PartialEq)]
pub struct Field<'q> {
    pub parent_type: GraphQLCompositeType<'q>,
    pub field_node: query::Field<'static, String>,
    pub field_def: &'q schema::Field<'static, String>,
}

impl<'q> Field<'q> {
    pub fn typename(parent_type: GraphQLCompositeType<'q>) -> Field<'q> {
        Field {
            parent_type,
            field_node: crate::consts::typename_field_node(),
            field_def: crate::consts::typename_field_def(),
        }
    }
}

pub type FieldSet<'q> = Vec<Field<'q>>;

/// Structural match on response name, field name and arguments; selection
/// sets are merged elsewhere, never compared.
pub fn matches_field(a: &Field<'_>, b: &Field<'_>) -> bool {
    response_name(&a.field_node) == response_name(&b.field_node)
        && a.field_node.name == b.field_node.name
        && a.field_node.arguments == b.field_node.arguments
}
