use serde::{Deserialize, Serialize};
use std::fmt;

/// Response-name path at which a dependent fetch's result is spliced into
/// its parent's result; `"@"` marks each list level.
pub type ResponsePath = Vec<String>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryPlan {
    pub kind: String, // always "QueryPlan"
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node: Option<PlanNode>,
}

impl QueryPlan {
    pub fn new(node: Option<PlanNode>) -> QueryPlan {
        QueryPlan {
            kind: String::from("QueryPlan"),
            node,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum PlanNode {
    Sequence { nodes: Vec<PlanNode> },
    Parallel { nodes: Vec<PlanNode> },
    Fetch(FetchNode),
    Flatten(FlattenNode),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FetchNode {
    pub service_name: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub variable_usages: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub requires: Option<SelectionSet>,
    /// The group's fields as a minified GraphQL selection set; the executor
    /// wraps it in whatever operation envelope the service call needs.
    pub selection_set: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FlattenNode {
    pub path: ResponsePath,
    pub node: Box<PlanNode>,
}

pub type SelectionSet = Vec<Selection>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum Selection {
    Field(Field),
    InlineFragment(InlineFragment),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Field {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alias: Option<String>,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub selections: Option<SelectionSet>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InlineFragment {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub type_condition: Option<String>,
    pub selections: SelectionSet,
}

impl fmt::Display for Selection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Selection::Field(field) => {
                if let Some(alias) = &field.alias {
                    write!(f, "{}:", alias)?;
                }
                write!(f, "{}", field.name)?;
                if let Some(selections) = &field.selections {
                    write_selections(f, selections)?;
                }
                Ok(())
            }
            Selection::InlineFragment(inline) => {
                write!(f, "...")?;
                if let Some(condition) = &inline.type_condition {
                    write!(f, "on {}", condition)?;
                }
                write_selections(f, &inline.selections)
            }
        }
    }
}

fn write_selections(f: &mut fmt::Formatter<'_>, selections: &[Selection]) -> fmt::Result {
    write!(f, "{{")?;
    for (i, selection) in selections.iter().enumerate() {
        if i > 0 {
            write!(f, " ")?;
        }
        write!(f, "{}", selection)?;
    }
    write!(f, "}}")
}
