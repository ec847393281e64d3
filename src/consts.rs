use crate::helpers::{pos, span};
use graphql_parser::query::{SelectionSet, Type};
use graphql_parser::{query, schema};
use lazy_static::lazy_static;

pub static TYPENAME_FIELD_NAME: &str = "__typename";
pub static SCHEMA_FIELD_NAME: &str = "__schema";
pub static TYPE_FIELD_NAME: &str = "__type";
pub static QUERY_TYPE_NAME: &str = "Query";
pub static MUTATION_TYPE_NAME: &str = "Mutation";

lazy_static! {
    static ref TYPENAME_SCHEMA_FIELD: schema::Field<'static, String> = meta_field_def(
        TYPENAME_FIELD_NAME,
        Type::NonNullType(Box::new(Type::NamedType(String::from("String")))),
    );
    static ref SCHEMA_SCHEMA_FIELD: schema::Field<'static, String> = meta_field_def(
        SCHEMA_FIELD_NAME,
        Type::NonNullType(Box::new(Type::NamedType(String::from("__Schema")))),
    );
    static ref TYPE_SCHEMA_FIELD: schema::Field<'static, String> =
        meta_field_def(TYPE_FIELD_NAME, Type::NamedType(String::from("__Type")));
}

fn meta_field_def(name: &str, field_type: Type<'static, String>) -> schema::Field<'static, String> {
    schema::Field {
        position: pos(),
        description: None,
        name: String::from(name),
        arguments: vec![],
        field_type,
        directives: vec![],
    }
}

pub fn typename_field_def<'a>() -> &'a schema::Field<'static, String> {
    &TYPENAME_SCHEMA_FIELD
}

/// Synthetic definitions for the meta fields, so field collection can resolve
/// them; the splitter drops them again by their introspection return types.
pub fn meta_field_def_for_name<'a>(name: &str) -> Option<&'a schema::Field<'static, String>> {
    if name == TYPENAME_FIELD_NAME {
        Some(&TYPENAME_SCHEMA_FIELD)
    } else if name == SCHEMA_FIELD_NAME {
        Some(&SCHEMA_SCHEMA_FIELD)
    } else if name == TYPE_FIELD_NAME {
        Some(&TYPE_SCHEMA_FIELD)
    } else {
        None
    }
}

pub fn typename_field_node() -> query::Field<'static, String> {
    query::Field {
        position: pos(),
        alias: None,
        name: String::from(TYPENAME_FIELD_NAME),
        arguments: vec![],
        directives: vec![],
        selection_set: SelectionSet {
            span: span(),
            items: vec![],
        },
    }
}
