//! Human-readable rendering of a query plan, for logs and test output.

use itertools::Itertools;
use std::fmt;

use crate::model::{PlanNode, QueryPlan, Selection};

static INDENT: &str = "  ";

impl fmt::Display for QueryPlan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut result: Vec<String> = Vec::new();
        result.push("QueryPlan {\n".to_string());
        for node in self.node.iter() {
            append_nodes(vec![node], INDENT, &mut result)
        }
        result.push("}".to_string());
        write!(f, "{}", result.join(""))
    }
}

fn append_nodes(nodes: Vec<&PlanNode>, indentation: &str, result: &mut Vec<String>) {
    if nodes.is_empty() {
        return;
    }

    for node in nodes.iter() {
        append_node(node, indentation, result);
        result.push(",\n".to_string());
    }
}

fn append_node(node: &PlanNode, indentation: &str, result: &mut Vec<String>) {
    let indent_all = |str: String| -> String {
        str.lines()
            .map(|l| indentation.to_string() + INDENT + l)
            .join("\n")
    };

    result.push(indentation.to_string());

    let indentation_next = indentation.to_string() + INDENT;

    let nodes: Vec<&PlanNode> = match node {
        PlanNode::Fetch(fetch) => {
            result.push(format!("Fetch(service: \"{}\") {{\n", fetch.service_name));
            {
                if let Some(requires) = &fetch.requires {
                    result.push(indent_all(format_selections(requires)));
                    result.push(" =>\n".to_string());
                }

                result.push(indent_all(fetch.selection_set.clone()));
                result.push("\n".to_string());
            }
            result.push(indentation.to_string());
            result.push("}".to_string());
            Vec::new()
        }
        PlanNode::Flatten(flatten) => {
            result.push(format!("Flatten(path: \"{}\")", flatten.path.iter().join(".")));
            vec![flatten.node.as_ref()]
        }
        PlanNode::Parallel { nodes } => {
            result.push("Parallel".to_string());
            nodes.iter().collect::<Vec<&PlanNode>>()
        }
        PlanNode::Sequence { nodes } => {
            result.push("Sequence".to_string());
            nodes.iter().collect::<Vec<&PlanNode>>()
        }
    };

    if !nodes.is_empty() {
        result.push(" {\n".to_string());
        append_nodes(nodes, indentation_next.as_str(), result);
        result.push(indentation.to_string());
        result.push("}".to_string());
    };
}

fn format_selections(selections: &[Selection]) -> String {
    selections.iter().map(|s| s.to_string()).join(" ")
}

#[cfg(test)]
mod tests {
    use crate::QueryPlanner;

    const SCHEMA: &str = r#"
schema { query: Query }

type Query {
  me: User @resolve(graph: "accounts")
}

type User @owner(graph: "accounts") @key(fields: "id", graph: "accounts") {
  id: ID!
  name: String
}
"#;

    #[test]
    fn renders_an_indented_plan_tree() {
        let planner = QueryPlanner::new(SCHEMA).unwrap();
        let plan = planner.plan("{ me { name } }", None).unwrap();

        let expected = "QueryPlan {\n  Fetch(service: \"accounts\") {\n    {me{name}}\n  },\n}";
        assert_eq!(plan.to_string(), expected);
    }
}
