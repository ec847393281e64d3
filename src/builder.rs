use crate::consts::TYPENAME_FIELD_NAME;
use crate::context::{
    matches_field, Field, FieldSet, GraphQLCompositeType, OperationContext, QueryPlanningContext,
};
use crate::groups::{
    FetchGroup, GroupArena, GroupForField, GroupId, ParallelGroupForField, SerialGroupForField,
};
use crate::helpers::{
    group_by, is_introspection_type, named_type_of, pos, response_name, span, Head,
    merge_selection_sets, NodeCollectionKind, Op, OperationKind,
};
use crate::minified::minify_selection_set;
use crate::model;
use crate::model::{FetchNode, FlattenNode, PlanNode, QueryPlan, ResponsePath};
use crate::{QueryPlanError, Result};
use graphql_parser::query::{
    FragmentDefinition, InlineFragment, Selection, SelectionSet, Type, TypeCondition,
};
use graphql_parser::{query, schema};
use std::collections::{HashMap, HashSet};
use tracing::{instrument, trace};

/// Resolves the target operation and collects named fragments from a parsed
/// document.
pub fn build_operation_context<'q>(
    schema: &'q schema::Document<'static, String>,
    document: &'q query::Document<'static, String>,
    operation_name: Option<&str>,
) -> Result<OperationContext<'q>> {
    let mut fragments: HashMap<&'q str, &'q FragmentDefinition<'static, String>> = HashMap::new();
    let mut operations: Vec<Op<'q>> = vec![];

    for definition in &document.definitions {
        match definition {
            query::Definition::Operation(operation) => {
                operations.push(Op::from_definition(operation))
            }
            query::Definition::Fragment(fragment) => {
                fragments.insert(fragment.name.as_str(), fragment);
            }
        }
    }

    let operation = match operation_name {
        Some(name) => operations
            .into_iter()
            .find(|op| op.name == Some(name))
            .ok_or_else(|| QueryPlanError::UnknownOperation(name.to_string()))?,
        None => {
            if operations.len() > 1 {
                return Err(QueryPlanError::AmbiguousOperation);
            }
            match operations.pop() {
                Some(operation) => operation,
                None => return Err(QueryPlanError::MissingOperation),
            }
        }
    };

    Ok(OperationContext {
        schema,
        operation,
        fragments,
    })
}

/// Builds the query plan: partitions the operation's fields into per-service
/// fetch groups and wraps them into the executable plan tree.
#[instrument(skip_all)]
pub fn build_query_plan(operation_context: &OperationContext<'_>) -> Result<QueryPlan> {
    if let OperationKind::Subscription = operation_context.operation.kind {
        return Err(QueryPlanError::SubscriptionsUnsupported);
    }

    let context = QueryPlanningContext::new(operation_context);
    let is_mutation = matches!(context.operation.kind, OperationKind::Mutation);

    let root_type = context.root_type(context.operation.kind)?;
    let root_composite = GraphQLCompositeType::from(root_type);

    let mut fields: FieldSet<'_> = vec![];
    let mut visited_fragment_names = HashSet::new();
    collect_fields(
        &context,
        root_composite.clone(),
        context.operation.selection_set,
        &mut fields,
        &mut visited_fragment_names,
    )?;
    trace!(root_fields = fields.len(), "collected root fields");

    let mut arena = GroupArena::new();
    let group_ids = if is_mutation {
        split_root_fields_serially(&context, fields, &mut arena)?
    } else {
        split_root_fields(&context, fields, &mut arena)?
    };
    trace!(groups = group_ids.len(), "partitioned root fields");

    let nodes: Vec<PlanNode> = group_ids
        .into_iter()
        .map(|id| execution_node_for_group(&context, &arena, id, Some(&root_composite)))
        .collect();

    if nodes.is_empty() {
        return Ok(QueryPlan::new(None));
    }

    let kind = if is_mutation {
        NodeCollectionKind::Sequence
    } else {
        NodeCollectionKind::Parallel
    };
    Ok(QueryPlan::new(Some(flat_wrap(kind, nodes))))
}

/// Flattens a selection set into a field set. Inline fragments recurse under
/// their type condition; named fragments resolve through the context, each at
/// most once per call, which also breaks spread cycles. Unknown fragment
/// names and type conditions are skipped; validation happens upstream.
pub(crate) fn collect_fields<'q>(
    context: &QueryPlanningContext<'q>,
    parent_type: GraphQLCompositeType<'q>,
    selection_set: &SelectionSet<'static, String>,
    fields: &mut FieldSet<'q>,
    visited_fragment_names: &mut HashSet<String>,
) -> Result<()> {
    for selection in &selection_set.items {
        match selection {
            Selection::Field(field_node) => {
                let field_def =
                    context.get_field_def(&parent_type, &field_node.name, field_node.position)?;
                fields.push(Field {
                    parent_type: parent_type.clone(),
                    field_node: field_node.clone(),
                    field_def,
                });
            }
            Selection::InlineFragment(inline) => match &inline.type_condition {
                Some(TypeCondition::On(condition)) => {
                    if let Some(condition_type) = context.composite_type(condition) {
                        collect_fields(
                            context,
                            condition_type,
                            &inline.selection_set,
                            fields,
                            visited_fragment_names,
                        )?;
                    }
                }
                None => collect_fields(
                    context,
                    parent_type.clone(),
                    &inline.selection_set,
                    fields,
                    visited_fragment_names,
                )?,
            },
            Selection::FragmentSpread(spread) => {
                if visited_fragment_names.contains(spread.fragment_name.as_str()) {
                    continue;
                }
                visited_fragment_names.insert(spread.fragment_name.clone());

                if let Some(fragment) = context.fragments.get(spread.fragment_name.as_str()) {
                    let TypeCondition::On(condition) = &fragment.type_condition;
                    if let Some(condition_type) = context.composite_type(condition) {
                        collect_fields(
                            context,
                            condition_type,
                            &fragment.selection_set,
                            fields,
                            visited_fragment_names,
                        )?;
                    }
                }
            }
        }
    }
    Ok(())
}

/// Collapses the subselections of every input field under the nominal return
/// type, sharing one visited-fragments set across all of them. Per-runtime-
/// type parent information is re-derived by the splitter.
fn collect_subfields<'q>(
    context: &QueryPlanningContext<'q>,
    return_type: GraphQLCompositeType<'q>,
    fields: &FieldSet<'q>,
) -> Result<FieldSet<'q>> {
    let mut subfields: FieldSet<'q> = vec![];
    let mut visited_fragment_names = HashSet::new();

    for field in fields {
        if !field.field_node.selection_set.items.is_empty() {
            collect_fields(
                context,
                return_type.clone(),
                &field.field_node.selection_set,
                &mut subfields,
                &mut visited_fragment_names,
            )?;
        }
    }

    Ok(subfields)
}

fn split_root_fields<'q>(
    context: &QueryPlanningContext<'q>,
    fields: FieldSet<'q>,
    arena: &mut GroupArena<'q>,
) -> Result<Vec<GroupId>> {
    let mut selector = ParallelGroupForField::new(context);
    split_fields(context, &vec![], fields, arena, &mut selector)?;
    Ok(selector.into_groups())
}

fn split_root_fields_serially<'q>(
    context: &QueryPlanningContext<'q>,
    fields: FieldSet<'q>,
    arena: &mut GroupArena<'q>,
) -> Result<Vec<GroupId>> {
    let mut selector = SerialGroupForField::new(context);
    split_fields(context, &vec![], fields, arena, &mut selector)?;
    Ok(selector.into_groups())
}

/// Partitions a field set into fetch groups. For each response-name group
/// and parent-type group, the first field is the representative; siblings are
/// re-consulted only when subselections merge.
fn split_fields<'q, S: GroupForField<'q>>(
    context: &QueryPlanningContext<'q>,
    path: &ResponsePath,
    fields: FieldSet<'q>,
    arena: &mut GroupArena<'q>,
    selector: &mut S,
) -> Result<()> {
    for (_response_name, fields_for_response_name) in
        group_by(fields, |f| response_name(&f.field_node).to_string())
    {
        for (_parent_name, fields_for_parent_type) in
            group_by(fields_for_response_name, |f| {
                f.parent_type.name().to_string()
            })
        {
            let field = &fields_for_parent_type[0];

            // __typename needs no fetching at this level, and introspection
            // is answered by the gateway, never by a service.
            if field.field_def.name == TYPENAME_FIELD_NAME {
                continue;
            }
            if is_introspection_type(named_type_of(&field.field_def.field_type)) {
                continue;
            }

            if !field.parent_type.is_abstract() {
                let group_id = selector.group_for_field(arena, field)?;
                let completed =
                    complete_field(context, arena, group_id, path, fields_for_parent_type)?;
                arena.group_mut(group_id).fields.push(completed);
            } else {
                // Re-derive the owner per concrete runtime type.
                let possible_types = context.get_possible_types(&field.parent_type);
                let mut groups_by_runtime_type: linked_hash_map::LinkedHashMap<
                    GroupId,
                    Vec<&'q schema::ObjectType<'static, String>>,
                > = linked_hash_map::LinkedHashMap::new();

                for runtime_type in &possible_types {
                    let runtime_parent = GraphQLCompositeType::Object(*runtime_type);
                    let field_def = context.get_field_def(
                        &runtime_parent,
                        &field.field_node.name,
                        field.field_node.position,
                    )?;
                    let runtime_field = Field {
                        parent_type: runtime_parent,
                        field_node: field.field_node.clone(),
                        field_def,
                    };
                    let group_id = selector.group_for_field(arena, &runtime_field)?;
                    groups_by_runtime_type
                        .entry(group_id)
                        .or_insert_with(Vec::new)
                        .push(*runtime_type);
                }

                if groups_by_runtime_type.len() == 1 {
                    // One group covers every runtime type: request the field
                    // once under the abstract parent. Assumes the group's
                    // service declares the interface; the composer asserts
                    // that, it is not re-derived here.
                    let group_id = match groups_by_runtime_type.iter().next() {
                        Some((group_id, _)) => *group_id,
                        None => continue,
                    };
                    let completed =
                        complete_field(context, arena, group_id, path, fields_for_parent_type)?;
                    arena.group_mut(group_id).fields.push(completed);
                } else {
                    // Owners diverge: add the field under each concrete
                    // parent so the executor can guard fetches by __typename.
                    for (group_id, runtime_types) in groups_by_runtime_type {
                        for runtime_type in runtime_types {
                            let runtime_parent = GraphQLCompositeType::Object(runtime_type);
                            let field_def = context.get_field_def(
                                &runtime_parent,
                                &field.field_node.name,
                                field.field_node.position,
                            )?;
                            let runtime_fields: FieldSet<'q> = fields_for_parent_type
                                .iter()
                                .map(|f| Field {
                                    parent_type: runtime_parent.clone(),
                                    field_node: f.field_node.clone(),
                                    field_def,
                                })
                                .collect();
                            let completed = complete_field(
                                context,
                                arena,
                                group_id,
                                path,
                                runtime_fields,
                            )?;
                            arena.group_mut(group_id).fields.push(completed);
                        }
                    }
                }
            }
        }
    }
    Ok(())
}

struct SubfieldGroupForField<'a, 'q> {
    context: &'a QueryPlanningContext<'q>,
    parent_group: GroupId,
}

fn split_subfields<'q>(
    context: &QueryPlanningContext<'q>,
    path: &ResponsePath,
    fields: FieldSet<'q>,
    arena: &mut GroupArena<'q>,
    parent_group: GroupId,
) -> Result<()> {
    let mut selector = SubfieldGroupForField {
        context,
        parent_group,
    };
    split_fields(context, path, fields, arena, &mut selector)
}

impl<'a, 'q> GroupForField<'q> for SubfieldGroupForField<'a, 'q> {
    fn group_for_field(
        &mut self,
        arena: &mut GroupArena<'q>,
        field: &Field<'q>,
    ) -> Result<GroupId> {
        let context = self.context;
        let parent_obj = letp!(GraphQLCompositeType::Object(obj) = &field.parent_type => *obj);

        let base_service =
            context
                .get_base_service(parent_obj)
                .ok_or_else(|| QueryPlanError::MissingBaseService {
                    type_name: parent_obj.name.clone(),
                    position: parent_obj.position,
                })?;
        let owning_service = context
            .get_owning_service(parent_obj, field.field_def)
            .ok_or_else(|| QueryPlanError::MissingOwningService {
                parent_type: parent_obj.name.clone(),
                field_name: field.field_def.name.clone(),
                position: field.field_node.position,
            })?;

        if owning_service == base_service {
            // Field defined on the base type.
            let keep_in_parent = {
                let parent_group = arena.group(self.parent_group);
                owning_service == parent_group.service_name
                    || parent_group
                        .provided_fields
                        .iter()
                        .any(|provided| matches_field(provided, field))
            };
            if keep_in_parent {
                return Ok(self.parent_group);
            }

            let key_fields = context.get_key_fields(&field.parent_type, &owning_service)?;
            Ok(arena.dependent_group_for_service(self.parent_group, &owning_service, key_fields))
        } else {
            // Extension field: the owning service needs its inputs first.
            let required_fields =
                context.get_required_fields(&field.parent_type, field.field_def, &owning_service)?;

            let all_provided = {
                let parent_group = arena.group(self.parent_group);
                required_fields.iter().all(|required| {
                    parent_group
                        .provided_fields
                        .iter()
                        .any(|provided| matches_field(provided, required))
                })
            };
            if all_provided {
                return Ok(arena.dependent_group_for_service(
                    self.parent_group,
                    &owning_service,
                    required_fields,
                ));
            }

            if base_service == arena.group(self.parent_group).service_name {
                // The parent fetch already runs against the base service and
                // supplies the requirements itself.
                return Ok(arena.dependent_group_for_service(
                    self.parent_group,
                    &owning_service,
                    required_fields,
                ));
            }

            // Hop through the base service first.
            let key_fields = context.get_key_fields(&field.parent_type, &base_service)?;
            if key_fields.len() <= 1 {
                return Err(QueryPlanError::MissingKeys {
                    type_name: parent_obj.name.clone(),
                    service_name: base_service,
                });
            }
            let base_group =
                arena.dependent_group_for_service(self.parent_group, &base_service, key_fields);
            Ok(arena.dependent_group_for_service(base_group, &owning_service, required_fields))
        }
    }
}

/// Completes one representative field. Leaves pass through unchanged;
/// composite returns get a fresh sub-group on the parent's service whose
/// planned fields replace the node's selection set, with any dependent
/// groups created underneath lifted onto the parent fetch.
fn complete_field<'q>(
    context: &QueryPlanningContext<'q>,
    arena: &mut GroupArena<'q>,
    parent_group: GroupId,
    path: &ResponsePath,
    fields: FieldSet<'q>,
) -> Result<Field<'q>> {
    let field_def = fields[0].field_def;

    let return_type = match context.composite_type(named_type_of(&field_def.field_type)) {
        Some(composite) => composite,
        None => {
            // Leaf field.
            // TODO: merge directives from sibling nodes instead of keeping
            // only the representative's.
            let (head, _) = fields.head();
            return Ok(head);
        }
    };

    let field_path = add_path(path, response_name(&fields[0].field_node), &field_def.field_type);

    let parent_service = arena.group(parent_group).service_name.clone();
    let provided_fields = context.get_provided_fields(field_def, &parent_service)?;

    let mut sub_group = FetchGroup::init(parent_service);
    sub_group.merge_at = field_path.clone();
    sub_group.provided_fields = provided_fields;
    let sub_group_id = arena.add(sub_group);

    if return_type.is_abstract() {
        // Runtime discrimination on abstract returns.
        arena
            .group_mut(sub_group_id)
            .fields
            .push(Field::typename(return_type.clone()));
    }

    let subfields = collect_subfields(context, return_type.clone(), &fields)?;
    split_subfields(context, &field_path, subfields, arena, sub_group_id)?;

    // Dependents created while planning subfields hang off the parent fetch,
    // not off the sub-group, which is itself part of the parent's selection.
    let lifted: Vec<GroupId> = {
        let sub = arena.group_mut(sub_group_id);
        let by_service = std::mem::replace(
            &mut sub.dependent_groups_by_service,
            linked_hash_map::LinkedHashMap::new(),
        );
        let mut ids: Vec<GroupId> = by_service.into_iter().map(|(_, id)| id).collect();
        ids.extend(sub.other_dependent_groups.drain(..));
        ids
    };
    arena
        .group_mut(parent_group)
        .other_dependent_groups
        .extend(lifted);

    let selection_set =
        selection_set_from_field_set(&arena.group(sub_group_id).fields, Some(&return_type));

    let (head, _) = fields.head();
    let mut field_node = head.field_node;
    field_node.selection_set = selection_set;

    Ok(Field {
        parent_type: head.parent_type,
        field_node,
        field_def: head.field_def,
    })
}

/// Pushes the response name, then one `@` per list wrapper in the declared
/// type, so the executor knows at which depths to flatten.
fn add_path(
    path: &ResponsePath,
    response_name: &str,
    field_type: &Type<'static, String>,
) -> ResponsePath {
    let mut new_path = path.clone();
    new_path.push(response_name.to_string());

    let mut current = field_type;
    loop {
        match current {
            Type::NamedType(_) => break,
            Type::NonNullType(inner) => current = inner,
            Type::ListType(inner) => {
                new_path.push(String::from("@"));
                current = inner;
            }
        }
    }

    new_path
}

/// Renders a field set back into an AST selection set: entries group by
/// parent type and response name in insertion order, entries sharing both
/// merge their subselections, and a parent-type run is wrapped in an inline
/// fragment unless it matches the caller's context type.
pub(crate) fn selection_set_from_field_set<'q>(
    fields: &FieldSet<'q>,
    parent_type: Option<&GraphQLCompositeType<'q>>,
) -> SelectionSet<'static, String> {
    let mut items: Vec<Selection<'static, String>> = vec![];

    let field_refs: Vec<&Field<'q>> = fields.iter().collect();
    for (type_condition, fields_for_parent_type) in
        group_by(field_refs, |f| f.parent_type.name().to_string())
    {
        let mut selections: Vec<Selection<'static, String>> = vec![];
        for (_name, fields_for_response_name) in group_by(fields_for_parent_type, |f| {
            response_name(&f.field_node).to_string()
        }) {
            selections.push(Selection::Field(combine_fields(fields_for_response_name)));
        }

        let under_context_type = parent_type
            .map(|p| p.name() == type_condition)
            .unwrap_or(false);
        if under_context_type {
            items.extend(selections);
        } else {
            items.push(Selection::InlineFragment(InlineFragment {
                position: pos(),
                type_condition: Some(TypeCondition::On(type_condition)),
                directives: vec![],
                selection_set: SelectionSet {
                    span: span(),
                    items: selections,
                },
            }));
        }
    }

    SelectionSet {
        span: span(),
        items,
    }
}

fn combine_fields<'q>(
    fields_with_same_response_name: Vec<&Field<'q>>,
) -> query::Field<'static, String> {
    let first = fields_with_same_response_name[0];
    if fields_with_same_response_name.len() == 1
        || first.field_node.selection_set.items.is_empty()
    {
        return first.field_node.clone();
    }

    let mut node = first.field_node.clone();
    node.selection_set = merge_selection_sets(
        fields_with_same_response_name
            .iter()
            .map(|f| &f.field_node)
            .collect(),
    );
    node
}

fn into_model_selection_set(selection_set: &SelectionSet<'static, String>) -> model::SelectionSet {
    selection_set
        .items
        .iter()
        .filter_map(|selection| match selection {
            Selection::Field(field) => Some(model::Selection::Field(model::Field {
                alias: field.alias.clone(),
                name: field.name.clone(),
                selections: if field.selection_set.items.is_empty() {
                    None
                } else {
                    Some(into_model_selection_set(&field.selection_set))
                },
            })),
            Selection::InlineFragment(inline) => {
                let type_condition = inline.type_condition.as_ref().map(|tc| match tc {
                    TypeCondition::On(name) => name.clone(),
                });
                Some(model::Selection::InlineFragment(model::InlineFragment {
                    type_condition,
                    selections: into_model_selection_set(&inline.selection_set),
                }))
            }
            Selection::FragmentSpread(_) => None,
        })
        .collect()
}

fn execution_node_for_group<'q>(
    context: &QueryPlanningContext<'q>,
    arena: &GroupArena<'q>,
    group_id: GroupId,
    parent_type: Option<&GraphQLCompositeType<'q>>,
) -> PlanNode {
    let group = arena.group(group_id);

    let selection_set = selection_set_from_field_set(&group.fields, parent_type);
    let requires = if group.required_fields.is_empty() {
        None
    } else {
        Some(into_model_selection_set(&selection_set_from_field_set(
            &group.required_fields,
            None,
        )))
    };
    let variable_usages = context
        .get_variable_usages(parent_type, &selection_set)
        .into_iter()
        .map(|usage| usage.name)
        .collect();

    let fetch_node = PlanNode::Fetch(FetchNode {
        service_name: group.service_name.clone(),
        variable_usages,
        requires,
        selection_set: minify_selection_set(&selection_set),
    });

    let plan_node = if group.merge_at.is_empty() {
        fetch_node
    } else {
        PlanNode::Flatten(FlattenNode {
            path: group.merge_at.clone(),
            node: Box::new(fetch_node),
        })
    };

    let dependent_ids = group.dependent_group_ids();
    if dependent_ids.is_empty() {
        plan_node
    } else {
        let dependent_nodes: Vec<PlanNode> = dependent_ids
            .into_iter()
            .map(|id| execution_node_for_group(context, arena, id, None))
            .collect();

        flat_wrap(
            NodeCollectionKind::Sequence,
            vec![
                plan_node,
                flat_wrap(NodeCollectionKind::Parallel, dependent_nodes),
            ],
        )
    }
}

fn flat_wrap(kind: NodeCollectionKind, mut nodes: Vec<PlanNode>) -> PlanNode {
    if nodes.is_empty() {
        panic!("programming error: should always be called with nodes")
    }

    if nodes.len() == 1 {
        return nodes.pop().expect("length checked above");
    }

    let nodes = nodes
        .into_iter()
        .flat_map(|n| match n {
            PlanNode::Sequence { nodes } if matches!(kind, NodeCollectionKind::Sequence) => nodes,
            PlanNode::Parallel { nodes } if matches!(kind, NodeCollectionKind::Parallel) => nodes,
            n => vec![n],
        })
        .collect();

    match kind {
        NodeCollectionKind::Sequence => PlanNode::Sequence { nodes },
        NodeCollectionKind::Parallel => PlanNode::Parallel { nodes },
    }
}
