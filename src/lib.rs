//! Query planner for a federated GraphQL gateway.
//!
//! Given a composed schema annotated with federation directives and a parsed
//! operation, the planner partitions the operation into per-service fetches
//! and emits an executable plan tree: `Fetch` leaves wired together with
//! `Sequence`, `Parallel` and `Flatten` nodes that spell out the data
//! dependencies between services.
//!
//! Planning is synchronous and pure: no I/O, no shared state, the same
//! inputs always produce a structurally identical plan.

#[macro_use]
mod macros;

mod builder;
mod consts;
mod context;
mod display;
mod federation;
mod groups;
pub mod helpers;
mod minified;
pub mod model;

pub use crate::builder::{build_operation_context, build_query_plan};
pub use crate::context::{
    Field, FieldSet, GraphQLCompositeType, OperationContext, QueryPlanningContext, VariableUsage,
};
pub use crate::federation::{Federation, ProvidesViolation};
pub use crate::model::QueryPlan;

use graphql_parser::{parse_query, parse_schema, schema, Pos};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum QueryPlanError {
    #[error("failed parsing schema: {0}")]
    FailedParsingSchema(graphql_parser::schema::ParseError),
    #[error("failed parsing query: {0}")]
    FailedParsingQuery(graphql_parser::query::ParseError),
    #[error("subscriptions are not supported")]
    SubscriptionsUnsupported,
    #[error("no operation definition found in the document")]
    MissingOperation,
    #[error("the document defines multiple operations; an operation name is required")]
    AmbiguousOperation,
    #[error("unknown operation named \"{0}\"")]
    UnknownOperation(String),
    #[error("cannot query field \"{field_name}\" on type \"{parent_type}\"")]
    UnknownField {
        parent_type: String,
        field_name: String,
        position: Pos,
    },
    #[error("could not find an owning service for field \"{parent_type}.{field_name}\"")]
    MissingOwningService {
        parent_type: String,
        field_name: String,
        position: Pos,
    },
    #[error("could not find a base service for type \"{type_name}\"")]
    MissingBaseService { type_name: String, position: Pos },
    #[error("no keys are declared for type \"{type_name}\" in service \"{service_name}\"")]
    MissingKeys {
        type_name: String,
        service_name: String,
    },
    #[error("schema does not define a root type named \"{0}\"")]
    MissingRootType(String),
}

pub type Result<T> = std::result::Result<T, QueryPlanError>;

/// Owns a parsed composed schema and plans operations against it.
pub struct QueryPlanner {
    schema: schema::Document<'static, String>,
}

impl QueryPlanner {
    pub fn new(schema: &str) -> Result<QueryPlanner> {
        let schema = parse_schema(schema)
            .map_err(QueryPlanError::FailedParsingSchema)?
            .into_static();
        Ok(QueryPlanner { schema })
    }

    pub fn plan(&self, query: &str, operation_name: Option<&str>) -> Result<QueryPlan> {
        let query = parse_query(query)
            .map_err(QueryPlanError::FailedParsingQuery)?
            .into_static();
        let operation_context = build_operation_context(&self.schema, &query, operation_name)?;
        build_query_plan(&operation_context)
    }

    pub fn schema(&self) -> &schema::Document<'static, String> {
        &self.schema
    }
}
