use graphql_parser::query::{
    OperationDefinition, Selection, SelectionSet, VariableDefinition,
};
use graphql_parser::schema::TypeDefinition;
use graphql_parser::{query, schema, Pos};
use linked_hash_map::LinkedHashMap;
use std::collections::HashMap;
use std::hash::Hash;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationKind {
    Query,
    Mutation,
    Subscription,
}

impl OperationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            OperationKind::Query => "query",
            OperationKind::Mutation => "mutation",
            OperationKind::Subscription => "subscription",
        }
    }
}

/// A resolved operation: kind, name, variables and the root selection set,
/// borrowed from the parsed document.
#[derive(Debug, Clone)]
pub struct Op<'q> {
    pub kind: OperationKind,
    pub name: Option<&'q str>,
    pub variable_definitions: &'q [VariableDefinition<'static, String>],
    pub selection_set: &'q SelectionSet<'static, String>,
}

impl<'q> Op<'q> {
    pub fn from_definition(definition: &'q OperationDefinition<'static, String>) -> Op<'q> {
        match definition {
            OperationDefinition::SelectionSet(selection_set) => Op {
                kind: OperationKind::Query,
                name: None,
                variable_definitions: &[],
                selection_set,
            },
            OperationDefinition::Query(q) => Op {
                kind: OperationKind::Query,
                name: q.name.as_deref(),
                variable_definitions: &q.variable_definitions,
                selection_set: &q.selection_set,
            },
            OperationDefinition::Mutation(m) => Op {
                kind: OperationKind::Mutation,
                name: m.name.as_deref(),
                variable_definitions: &m.variable_definitions,
                selection_set: &m.selection_set,
            },
            OperationDefinition::Subscription(s) => Op {
                kind: OperationKind::Subscription,
                name: s.name.as_deref(),
                variable_definitions: &s.variable_definitions,
                selection_set: &s.selection_set,
            },
        }
    }
}

pub fn type_name<'s>(td: &'s TypeDefinition<'static, String>) -> &'s str {
    match td {
        TypeDefinition::Scalar(t) => &t.name,
        TypeDefinition::Object(t) => &t.name,
        TypeDefinition::Interface(t) => &t.name,
        TypeDefinition::Union(t) => &t.name,
        TypeDefinition::Enum(t) => &t.name,
        TypeDefinition::InputObject(t) => &t.name,
    }
}

pub fn names_to_types<'s>(
    schema: &'s schema::Document<'static, String>,
) -> HashMap<&'s str, &'s TypeDefinition<'static, String>> {
    schema
        .definitions
        .iter()
        .flat_map(|d| match d {
            schema::Definition::TypeDefinition(td) => Some(td),
            _ => None,
        })
        .map(|td| (type_name(td), td))
        .collect()
}

/// Possible concrete types per composite type name: objects map to
/// themselves, interfaces to their declared implementors, unions to their
/// members. Built from the document in definition order so that
/// abstract-type expansion is deterministic.
pub fn build_possible_types<'s>(
    schema: &'s schema::Document<'static, String>,
    types: &HashMap<&'s str, &'s TypeDefinition<'static, String>>,
) -> HashMap<&'s str, Vec<&'s schema::ObjectType<'static, String>>> {
    let mut possible_types: HashMap<&'s str, Vec<&'s schema::ObjectType<'static, String>>> =
        HashMap::new();

    for definition in &schema.definitions {
        let td = match definition {
            schema::Definition::TypeDefinition(td) => td,
            _ => continue,
        };
        match td {
            TypeDefinition::Object(obj) => {
                possible_types
                    .entry(obj.name.as_str())
                    .or_insert_with(Vec::new)
                    .push(obj);
                // Objects declare transitively implemented interfaces
                // explicitly, so one level is the whole story.
                for iface in &obj.implements_interfaces {
                    possible_types
                        .entry(iface.as_str())
                        .or_insert_with(Vec::new)
                        .push(obj);
                }
            }
            TypeDefinition::Union(union_type) => {
                for member in &union_type.types {
                    if let Some(TypeDefinition::Object(obj)) = types.get(member.as_str()).copied() {
                        possible_types
                            .entry(union_type.name.as_str())
                            .or_insert_with(Vec::new)
                            .push(obj);
                    }
                }
            }
            _ => (),
        }
    }

    possible_types
}

pub(crate) fn pos() -> Pos {
    Pos { line: 0, column: 0 }
}

pub(crate) fn span() -> (Pos, Pos) {
    (pos(), pos())
}

pub fn response_name<'a>(field: &'a query::Field<'static, String>) -> &'a str {
    field.alias.as_deref().unwrap_or(&field.name)
}

pub fn named_type_of<'a>(ty: &'a query::Type<'static, String>) -> &'a str {
    match ty {
        query::Type::NamedType(name) => name.as_str(),
        query::Type::ListType(inner) => named_type_of(inner),
        query::Type::NonNullType(inner) => named_type_of(inner),
    }
}

/// Merges the selection sets of several nodes sharing a response name into
/// one selection set: non-aliased fields with the same name collapse into a
/// single field whose subselections merge recursively; aliased fields and
/// fragments are carried over untouched.
pub fn merge_selection_sets(
    field_nodes: Vec<&query::Field<'static, String>>,
) -> SelectionSet<'static, String> {
    let selections = field_nodes
        .into_iter()
        .flat_map(|f| f.selection_set.items.iter().cloned())
        .collect();

    SelectionSet {
        span: span(),
        items: merge_field_selections(selections),
    }
}

fn merge_field_selections(
    items: Vec<Selection<'static, String>>,
) -> Vec<Selection<'static, String>> {
    let (field_nodes, fragment_nodes): (Vec<_>, Vec<_>) = items
        .into_iter()
        .partition(|s| matches!(s, Selection::Field(_)));

    let (aliased, non_aliased): (Vec<_>, Vec<_>) = field_nodes.into_iter().partition(|s| {
        matches!(s, Selection::Field(f) if f.alias.is_some())
    });

    let by_name = group_by(non_aliased, |s| {
        letp!(Selection::Field(f) = s => f.name.clone())
    });

    let mut merged: Vec<Selection<'static, String>> = Vec::new();
    for (_, nodes_with_same_name) in by_name {
        let (head, tail) = nodes_with_same_name.head();
        let mut head_field = letp!(Selection::Field(f) = head => f);

        if !tail.is_empty() && !head_field.selection_set.items.is_empty() {
            let mut sub_items = std::mem::replace(&mut head_field.selection_set.items, vec![]);
            for node in tail {
                letp!(Selection::Field(f) = node => sub_items.extend(f.selection_set.items));
            }
            head_field.selection_set.items = merge_field_selections(sub_items);
        }

        merged.push(Selection::Field(head_field));
    }

    merged.extend(aliased);
    merged.extend(fragment_nodes);
    merged
}

pub fn group_by<T, K, F>(v: Vec<T>, f: F) -> LinkedHashMap<K, Vec<T>>
where
    F: Fn(&T) -> K,
    K: Hash + PartialEq + Eq,
{
    let mut map: LinkedHashMap<K, Vec<T>> = LinkedHashMap::new();
    for element in v.into_iter() {
        map.entry(f(&element)).or_insert_with(Vec::new).push(element)
    }
    map
}

// https://github.com/graphql/graphql-js/blob/7b3241329e1ff49fb647b043b80568f0cf9e1a7c/src/type/introspection.js#L500-L509
pub fn is_introspection_type(name: &str) -> bool {
    name == "__Schema"
        || name == "__Directive"
        || name == "__DirectiveLocation"
        || name == "__Type"
        || name == "__Field"
        || name == "__InputValue"
        || name == "__EnumValue"
        || name == "__TypeKind"
}

pub trait Head<T> {
    /// gets the head and tail of a vector
    fn head(self) -> (T, Vec<T>);
}

impl<T> Head<T> for Vec<T> {
    fn head(self) -> (T, Vec<T>) {
        if self.is_empty() {
            panic!("head must be called on a non empty Vec")
        } else {
            let mut iter = self.into_iter();
            (iter.next().unwrap(), iter.collect())
        }
    }
}

pub enum NodeCollectionKind {
    Sequence,
    Parallel,
}

#[cfg(test)]
mod tests {
    use super::*;
    use graphql_parser::parse_query;

    fn first_selection_set(src: &str) -> SelectionSet<'static, String> {
        let doc = parse_query(src).unwrap().into_static();
        letp!(
            query::Definition::Operation(OperationDefinition::SelectionSet(ss)) =
                doc.definitions.into_iter().next().unwrap() => ss
        )
    }

    #[test]
    fn group_by_preserves_insertion_order() {
        let grouped = group_by(vec!["b1", "a1", "b2", "c1"], |s| s.as_bytes()[0]);
        let keys: Vec<u8> = grouped.keys().cloned().collect();
        assert_eq!(keys, vec![b'b', b'a', b'c']);
        assert_eq!(grouped[&b'b'], vec!["b1", "b2"]);
    }

    #[test]
    fn merge_selection_sets_collapses_same_name_fields() {
        let ss = first_selection_set("{a{x{f1}}a{x{f2}y}}");
        let fields: Vec<&query::Field<'static, String>> = ss
            .items
            .iter()
            .map(|s| letp!(Selection::Field(f) = s => f))
            .collect();

        let merged = merge_selection_sets(fields);
        assert_eq!(crate::minified::minify_selection_set(&merged), "{x{f1 f2}y}");
    }

    #[test]
    fn merge_selection_sets_keeps_aliased_fields_apart() {
        let ss = first_selection_set("{a{x:f}a{x:f}}");
        let fields: Vec<&query::Field<'static, String>> = ss
            .items
            .iter()
            .map(|s| letp!(Selection::Field(f) = s => f))
            .collect();

        let merged = merge_selection_sets(fields);
        assert_eq!(crate::minified::minify_selection_set(&merged), "{x:f x:f}");
    }
}
