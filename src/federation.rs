use crate::helpers::named_type_of;
use graphql_parser::query::{Definition, OperationDefinition, Selection, SelectionSet};
use graphql_parser::schema::{Directive, ObjectType, TypeDefinition, Value};
use graphql_parser::{parse_query, schema, Pos};
use linked_hash_map::LinkedHashMap;
use std::collections::HashMap;

/// Federation metadata attached to the composed schema, keyed by the AST
/// position of the annotated type or field.
#[derive(Debug, Default, PartialEq)]
struct FederationTypeMetadata {
    keys: HashMap<Pos, LinkedHashMap<String, Vec<SelectionSet<'static, String>>>>,
    owner: HashMap<Pos, String>,
    externals: HashMap<Pos, LinkedHashMap<String, Vec<String>>>,
}

#[derive(Debug, Default, PartialEq)]
struct FederationFieldMetadata {
    service_name: HashMap<Pos, String>,
    requires: HashMap<Pos, SelectionSet<'static, String>>,
    provides: HashMap<Pos, SelectionSet<'static, String>>,
}

#[derive(Debug, PartialEq)]
pub struct Federation {
    types: FederationTypeMetadata,
    fields: FederationFieldMetadata,
}

impl Federation {
    pub fn new(schema: &schema::Document<'static, String>) -> Federation {
        let mut types = FederationTypeMetadata::default();
        let mut fields = FederationFieldMetadata::default();

        let obj_types = schema.definitions.iter().flat_map(|d| {
            if let schema::Definition::TypeDefinition(TypeDefinition::Object(obj)) = d {
                Some(obj)
            } else {
                None
            }
        });

        for obj_type in obj_types {
            if let Some(owner_directive) = get_directive!(obj_type.directives, "owner").next() {
                if let Some(graph) = string_argument(owner_directive, "graph") {
                    types.owner.insert(obj_type.position, graph);
                }
            }

            let mut keys_for_obj: LinkedHashMap<String, Vec<SelectionSet<'static, String>>> =
                LinkedHashMap::new();
            for key_directive in get_directive!(obj_type.directives, "key") {
                if let (Some(graph), Some(key_fields)) = (
                    string_argument(key_directive, "graph"),
                    string_argument(key_directive, "fields"),
                ) {
                    keys_for_obj
                        .entry(graph)
                        .or_insert_with(Vec::new)
                        .push(parse_field_set(&key_fields));
                }
            }
            types.keys.insert(obj_type.position, keys_for_obj);

            let mut externals_for_obj: LinkedHashMap<String, Vec<String>> = LinkedHashMap::new();
            for field in obj_type.fields.iter() {
                for directive in field.directives.iter() {
                    match directive.name.as_str() {
                        "requires" => {
                            if let Some(requires) = string_argument(directive, "fields") {
                                fields
                                    .requires
                                    .insert(field.position, parse_field_set(&requires));
                            }
                        }
                        "provides" => {
                            if let Some(provides) = string_argument(directive, "fields") {
                                fields
                                    .provides
                                    .insert(field.position, parse_field_set(&provides));
                            }
                        }
                        "resolve" => {
                            if let Some(graph) = string_argument(directive, "graph") {
                                fields.service_name.insert(field.position, graph);
                            }
                        }
                        "external" => {
                            if let Some(graph) = string_argument(directive, "graph") {
                                externals_for_obj
                                    .entry(graph)
                                    .or_insert_with(Vec::new)
                                    .push(field.name.clone());
                            }
                        }
                        _ => (),
                    }
                }

                // For service_name, fall back to the owner of the type.
                if !fields.service_name.contains_key(&field.position) {
                    if let Some(graph) = types.owner.get(&obj_type.position) {
                        fields.service_name.insert(field.position, graph.clone());
                    }
                }
            }
            types.externals.insert(obj_type.position, externals_for_obj);
        }

        Federation { types, fields }
    }

    pub fn service_name_for_field(
        &self,
        field_def: &schema::Field<'static, String>,
    ) -> Option<String> {
        self.fields.service_name.get(&field_def.position).cloned()
    }

    pub fn requires(
        &self,
        field_def: &schema::Field<'static, String>,
    ) -> Option<&SelectionSet<'static, String>> {
        self.fields.requires.get(&field_def.position)
    }

    pub fn provides(
        &self,
        field_def: &schema::Field<'static, String>,
    ) -> Option<&SelectionSet<'static, String>> {
        self.fields.provides.get(&field_def.position)
    }

    pub fn service_name_for_type(
        &self,
        object_type: &ObjectType<'static, String>,
    ) -> Option<String> {
        self.types.owner.get(&object_type.position).cloned()
    }

    /// The first key declared for the type in the given service; later keys
    /// are ignored.
    pub fn key(
        &self,
        object_type: &ObjectType<'static, String>,
        service_name: &str,
    ) -> Option<&SelectionSet<'static, String>> {
        self.types
            .keys
            .get(&object_type.position)
            .and_then(|keys_map| keys_map.get(service_name))
            .and_then(|keys| keys.first())
    }

    pub fn externals(
        &self,
        object_type: &ObjectType<'static, String>,
        service_name: &str,
    ) -> &[String] {
        self.types
            .externals
            .get(&object_type.position)
            .and_then(|per_service| per_service.get(service_name))
            .map(|names| names.as_slice())
            .unwrap_or(&[])
    }

    /// Representative composition check: every field named by a `@provides`
    /// must be declared `@external` in the providing service. Exposed for the
    /// composition pipeline; the planner itself assumes a composed schema.
    pub fn check_provided_externals(
        &self,
        schema: &schema::Document<'static, String>,
    ) -> Vec<ProvidesViolation> {
        let types = crate::helpers::names_to_types(schema);
        let mut violations = Vec::new();

        let obj_types = schema.definitions.iter().flat_map(|d| {
            if let schema::Definition::TypeDefinition(TypeDefinition::Object(obj)) = d {
                Some(obj)
            } else {
                None
            }
        });

        for obj_type in obj_types {
            for field in obj_type.fields.iter() {
                let provides = match self.provides(field) {
                    Some(provides) => provides,
                    None => continue,
                };
                let service_name = match self.service_name_for_field(field) {
                    Some(service_name) => service_name,
                    None => continue,
                };
                let return_type = match types.get(named_type_of(&field.field_type)).copied() {
                    Some(TypeDefinition::Object(obj)) => obj,
                    _ => continue,
                };

                let externals = self.externals(return_type, &service_name);
                for selection in &provides.items {
                    if let Selection::Field(provided) = selection {
                        if !externals.iter().any(|name| name == &provided.name) {
                            violations.push(ProvidesViolation {
                                type_name: obj_type.name.clone(),
                                field_name: field.name.clone(),
                                provided_field: provided.name.clone(),
                                service_name: service_name.clone(),
                            });
                        }
                    }
                }
            }
        }

        violations
    }
}

/// A `@provides` field with no matching `@external` declaration.
#[derive(Debug, Clone, PartialEq)]
pub struct ProvidesViolation {
    pub type_name: String,
    pub field_name: String,
    pub provided_field: String,
    pub service_name: String,
}

fn string_argument(directive: &Directive<'static, String>, name: &str) -> Option<String> {
    directive.arguments.iter().find_map(|(key, value)| {
        if key == name {
            if let Value::String(value) = value {
                Some(value.clone())
            } else {
                None
            }
        } else {
            None
        }
    })
}

/// `fields:` arguments hold selection-set source, with or without the outer
/// braces.
fn parse_field_set(source: &str) -> SelectionSet<'static, String> {
    let braced = if source.trim_start().starts_with('{') {
        source.to_string()
    } else {
        format!("{{{}}}", source)
    };
    let doc = parse_query(&braced)
        .expect("failed parsing directive value as a selection set")
        .into_static();
    letp!(
        Definition::Operation(OperationDefinition::SelectionSet(ss)) =
            doc.definitions.into_iter().next().expect("directive value parsed to an empty document") => ss
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::minified::minify_selection_set;
    use graphql_parser::parse_schema;

    fn schema_doc(sdl: &str) -> schema::Document<'static, String> {
        parse_schema(sdl).unwrap().into_static()
    }

    fn object_type<'s>(
        schema: &'s schema::Document<'static, String>,
        name: &str,
    ) -> &'s ObjectType<'static, String> {
        schema
            .definitions
            .iter()
            .find_map(|d| match d {
                schema::Definition::TypeDefinition(TypeDefinition::Object(obj))
                    if obj.name == name =>
                {
                    Some(obj)
                }
                _ => None,
            })
            .unwrap()
    }

    const SCHEMA: &str = r#"
type Query {
  topReviews: [Review] @resolve(graph: "reviews")
}

type User
  @owner(graph: "accounts")
  @key(fields: "id", graph: "accounts")
  @key(fields: "id name", graph: "accounts")
  @key(fields: "id", graph: "reviews")
{
  id: ID!
  name: String
  username: String @external(graph: "reviews")
}

type Review @owner(graph: "reviews") @key(fields: "id", graph: "reviews") {
  id: ID!
  body: String
  author: User @provides(fields: "username")
  editor: User @provides(fields: "name")
}
"#;

    #[test]
    fn reads_owner_and_first_key_per_service() {
        let schema = schema_doc(SCHEMA);
        let federation = Federation::new(&schema);
        let user = object_type(&schema, "User");

        assert_eq!(
            federation.service_name_for_type(user),
            Some(String::from("accounts"))
        );
        assert_eq!(
            minify_selection_set(federation.key(user, "accounts").unwrap()),
            "{id}"
        );
        assert_eq!(
            minify_selection_set(federation.key(user, "reviews").unwrap()),
            "{id}"
        );
        assert!(federation.key(user, "books").is_none());
    }

    #[test]
    fn field_service_name_falls_back_to_type_owner() {
        let schema = schema_doc(SCHEMA);
        let federation = Federation::new(&schema);
        let review = object_type(&schema, "Review");

        let body = review.fields.iter().find(|f| f.name == "body").unwrap();
        assert_eq!(
            federation.service_name_for_field(body),
            Some(String::from("reviews"))
        );

        let author = review.fields.iter().find(|f| f.name == "author").unwrap();
        assert_eq!(
            minify_selection_set(federation.provides(author).unwrap()),
            "{username}"
        );
        assert!(federation.requires(author).is_none());
    }

    #[test]
    fn flags_provides_without_external() {
        let schema = schema_doc(SCHEMA);
        let federation = Federation::new(&schema);

        let violations = federation.check_provided_externals(&schema);
        assert_eq!(
            violations,
            vec![ProvidesViolation {
                type_name: String::from("Review"),
                field_name: String::from("editor"),
                provided_field: String::from("name"),
                service_name: String::from("reviews"),
            }]
        );
    }
}
