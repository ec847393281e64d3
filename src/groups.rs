use crate::context::{Field, FieldSet, GraphQLCompositeType, QueryPlanningContext};
use crate::model::ResponsePath;
use crate::{QueryPlanError, Result};
use linked_hash_map::LinkedHashMap;

/// Handle into the arena that owns every fetch group of a planning run.
/// Groups form a DAG (a dependent can be reached from two parents after
/// lifting), so they live in one arena and reference each other by index
/// instead of holding cross-references.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct GroupId(usize);

#[derive(Debug, Default)]
pub struct GroupArena<'q> {
    groups: Vec<FetchGroup<'q>>,
}

impl<'q> GroupArena<'q> {
    pub fn new() -> GroupArena<'q> {
        GroupArena { groups: vec![] }
    }

    pub fn add(&mut self, group: FetchGroup<'q>) -> GroupId {
        self.groups.push(group);
        GroupId(self.groups.len() - 1)
    }

    pub fn group(&self, id: GroupId) -> &FetchGroup<'q> {
        &self.groups[id.0]
    }

    pub fn group_mut(&mut self, id: GroupId) -> &mut FetchGroup<'q> {
        &mut self.groups[id.0]
    }

    /// Returns the dependent group of `parent` for the service, creating it
    /// at the parent's merge path if absent. The required fields are appended
    /// to the dependent's inputs and pushed into the parent's own selection:
    /// the parent must fetch the keys it hands off.
    pub fn dependent_group_for_service(
        &mut self,
        parent: GroupId,
        service_name: &str,
        required_fields: FieldSet<'q>,
    ) -> GroupId {
        let existing = self
            .group(parent)
            .dependent_groups_by_service
            .get(service_name)
            .copied();
        let id = match existing {
            Some(id) => id,
            None => {
                let mut group = FetchGroup::init(service_name.to_string());
                group.merge_at = self.group(parent).merge_at.clone();
                let id = self.add(group);
                self.group_mut(parent)
                    .dependent_groups_by_service
                    .insert(service_name.to_string(), id);
                id
            }
        };

        if !required_fields.is_empty() {
            self.group_mut(id)
                .required_fields
                .extend(required_fields.iter().cloned());
            self.group_mut(parent).fields.extend(required_fields);
        }

        id
    }
}

/// One planned service fetch: what to select, which inputs it needs from its
/// parent, what the parent already provides inline, and where the executor
/// splices the result.
#[derive(Debug, Clone)]
pub struct FetchGroup<'q> {
    pub service_name: String,
    pub fields: FieldSet<'q>,
    pub required_fields: FieldSet<'q>,
    pub provided_fields: FieldSet<'q>,
    pub merge_at: ResponsePath,
    pub dependent_groups_by_service: LinkedHashMap<String, GroupId>,
    pub other_dependent_groups: Vec<GroupId>,
}

impl<'q> FetchGroup<'q> {
    pub fn init(service_name: String) -> FetchGroup<'q> {
        FetchGroup {
            service_name,
            fields: vec![],
            required_fields: vec![],
            provided_fields: vec![],
            merge_at: vec![],
            dependent_groups_by_service: LinkedHashMap::new(),
            other_dependent_groups: vec![],
        }
    }

    /// Service-keyed dependents first, then the groups lifted from recursive
    /// subfield planning.
    pub fn dependent_group_ids(&self) -> Vec<GroupId> {
        self.dependent_groups_by_service
            .iter()
            .map(|(_, id)| *id)
            .chain(self.other_dependent_groups.iter().copied())
            .collect()
    }
}

pub(crate) trait GroupForField<'q> {
    fn group_for_field(
        &mut self,
        arena: &mut GroupArena<'q>,
        field: &Field<'q>,
    ) -> Result<GroupId>;
}

// Used by split_root_fields: every root field joins its owning service's
// group, in first-occurrence order.
pub(crate) struct ParallelGroupForField<'a, 'q> {
    context: &'a QueryPlanningContext<'q>,
    groups_map: LinkedHashMap<String, GroupId>,
}

impl<'a, 'q> ParallelGroupForField<'a, 'q> {
    pub fn new(context: &'a QueryPlanningContext<'q>) -> Self {
        Self {
            context,
            groups_map: LinkedHashMap::new(),
        }
    }

    pub fn into_groups(self) -> Vec<GroupId> {
        self.groups_map.into_iter().map(|(_, id)| id).collect()
    }
}

impl<'a, 'q> GroupForField<'q> for ParallelGroupForField<'a, 'q> {
    fn group_for_field(
        &mut self,
        arena: &mut GroupArena<'q>,
        field: &Field<'q>,
    ) -> Result<GroupId> {
        let service_name = owning_service_for(self.context, field)?;

        let id = match self.groups_map.get(&service_name).copied() {
            Some(id) => id,
            None => {
                let id = arena.add(FetchGroup::init(service_name.clone()));
                self.groups_map.insert(service_name, id);
                id
            }
        };
        Ok(id)
    }
}

// Used by split_root_fields_serially: the trailing group is reused only for
// an adjacent field of the same service, preserving mutation order.
pub(crate) struct SerialGroupForField<'a, 'q> {
    context: &'a QueryPlanningContext<'q>,
    groups: Vec<GroupId>,
}

impl<'a, 'q> SerialGroupForField<'a, 'q> {
    pub fn new(context: &'a QueryPlanningContext<'q>) -> Self {
        Self {
            context,
            groups: vec![],
        }
    }

    pub fn into_groups(self) -> Vec<GroupId> {
        self.groups
    }
}

impl<'a, 'q> GroupForField<'q> for SerialGroupForField<'a, 'q> {
    fn group_for_field(
        &mut self,
        arena: &mut GroupArena<'q>,
        field: &Field<'q>,
    ) -> Result<GroupId> {
        let service_name = owning_service_for(self.context, field)?;

        let reuse_last = match self.groups.last() {
            Some(id) => arena.group(*id).service_name == service_name,
            None => false,
        };
        if !reuse_last {
            let id = arena.add(FetchGroup::init(service_name));
            self.groups.push(id);
        }

        Ok(*self.groups.last().expect("a group was just ensured"))
    }
}

fn owning_service_for<'q>(
    context: &QueryPlanningContext<'q>,
    field: &Field<'q>,
) -> Result<String> {
    let parent_type = letp!(GraphQLCompositeType::Object(obj) = &field.parent_type => *obj);
    context
        .get_owning_service(parent_type, field.field_def)
        .ok_or_else(|| QueryPlanError::MissingOwningService {
            parent_type: parent_type.name.clone(),
            field_name: field.field_def.name.clone(),
            position: field.field_node.position,
        })
}
