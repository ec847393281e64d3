//! Minified rendering of query AST selection sets. Output is byte
//! deterministic; whitespace appears only where the previous token would
//! otherwise run into the next one.

use graphql_parser::query::{
    Directive, Field, FragmentSpread, InlineFragment, Selection, SelectionSet, TypeCondition,
    Value,
};

pub fn minify_selection_set(selection_set: &SelectionSet<'static, String>) -> String {
    let mut out = String::with_capacity(256);
    selection_set.minify(&mut out);
    out
}

/// Writes the minified form of the node and reports whether a separator is
/// needed before a following sibling token.
trait Minify {
    fn minify(&self, out: &mut String) -> bool;
}

fn minify_separated<'a, T: Minify + 'a>(items: impl Iterator<Item = &'a T>, out: &mut String) {
    let mut needs_space = false;
    for item in items {
        if needs_space {
            out.push(' ');
        }
        needs_space = item.minify(out);
    }
}

impl Minify for SelectionSet<'static, String> {
    fn minify(&self, out: &mut String) -> bool {
        if !self.items.is_empty() {
            out.push('{');
            minify_separated(self.items.iter(), out);
            out.push('}');
        }
        false
    }
}

impl Minify for Selection<'static, String> {
    fn minify(&self, out: &mut String) -> bool {
        match self {
            Selection::Field(field) => field.minify(out),
            Selection::FragmentSpread(spread) => spread.minify(out),
            Selection::InlineFragment(inline) => inline.minify(out),
        }
    }
}

impl Minify for Field<'static, String> {
    fn minify(&self, out: &mut String) -> bool {
        if let Some(alias) = &self.alias {
            out.push_str(alias);
            out.push(':');
        }
        out.push_str(&self.name);
        minify_arguments(&self.arguments, out);
        minify_separated(self.directives.iter(), out);
        self.selection_set.minify(out);
        self.selection_set.items.is_empty()
    }
}

impl Minify for FragmentSpread<'static, String> {
    fn minify(&self, out: &mut String) -> bool {
        out.push_str("...");
        out.push_str(&self.fragment_name);
        minify_separated(self.directives.iter(), out);
        true
    }
}

impl Minify for InlineFragment<'static, String> {
    fn minify(&self, out: &mut String) -> bool {
        out.push_str("...");
        if let Some(TypeCondition::On(condition)) = &self.type_condition {
            out.push_str("on ");
            out.push_str(condition);
        }
        minify_separated(self.directives.iter(), out);
        self.selection_set.minify(out);
        self.selection_set.items.is_empty()
    }
}

impl Minify for Directive<'static, String> {
    fn minify(&self, out: &mut String) -> bool {
        out.push('@');
        out.push_str(&self.name);
        minify_arguments(&self.arguments, out);
        true
    }
}

fn minify_arguments(arguments: &[(String, Value<'static, String>)], out: &mut String) {
    if arguments.is_empty() {
        return;
    }
    out.push('(');
    let mut needs_space = false;
    for (name, value) in arguments {
        if needs_space {
            out.push(' ');
        }
        out.push_str(name);
        out.push(':');
        needs_space = value.minify(out);
    }
    out.push(')');
}

impl Minify for Value<'static, String> {
    fn minify(&self, out: &mut String) -> bool {
        match self {
            Value::Variable(name) => {
                out.push('$');
                out.push_str(name);
                true
            }
            Value::Int(num) => {
                if let Some(v) = num.as_i64() {
                    out.push_str(&v.to_string());
                }
                true
            }
            Value::Float(v) => {
                out.push_str(&v.to_string());
                true
            }
            Value::String(v) => {
                out.push('"');
                for c in v.chars() {
                    match c {
                        '"' => out.push_str("\\\""),
                        '\\' => out.push_str("\\\\"),
                        '\n' => out.push_str("\\n"),
                        other => out.push(other),
                    }
                }
                out.push('"');
                true
            }
            Value::Boolean(true) => {
                out.push_str("true");
                true
            }
            Value::Boolean(false) => {
                out.push_str("false");
                true
            }
            Value::Null => {
                out.push_str("null");
                true
            }
            Value::Enum(name) => {
                out.push_str(name);
                true
            }
            Value::List(items) => {
                out.push('[');
                minify_separated(items.iter(), out);
                out.push(']');
                false
            }
            Value::Object(entries) => {
                out.push('{');
                let mut needs_space = false;
                for (key, value) in entries {
                    if needs_space {
                        out.push(' ');
                    }
                    out.push_str(key);
                    out.push(':');
                    needs_space = value.minify(out);
                }
                out.push('}');
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::minify_selection_set;
    use graphql_parser::parse_query;
    use graphql_parser::query::{Definition, OperationDefinition, SelectionSet};

    fn roundtrip(src: &str) -> String {
        let doc = parse_query(src).unwrap().into_static();
        let ss: SelectionSet<'static, String> = letp!(
            Definition::Operation(OperationDefinition::SelectionSet(ss)) =
                doc.definitions.into_iter().next().unwrap() => ss
        );
        minify_selection_set(&ss)
    }

    #[test]
    fn minifies_already_minified_selection_sets_verbatim() {
        let cases = vec![
            "{a{b}c}",
            "{body{__typename nested{__typename}}test{__typename nested{__typename}}}",
            "{body{__typename ...on Image{attributes{url}}...on Text{attributes{bold text}}}}",
            "{field(argValue:$arg){otherField field3(foo:$arg2)}}",
            "{topReviews{body author@skip(if:true){__typename id}}}",
            "{product(upc:\"1\"){name title:name}}",
        ];
        for case in cases {
            assert_eq!(roundtrip(case), case);
        }
    }

    #[test]
    fn strips_insignificant_whitespace() {
        assert_eq!(roundtrip("{ me { name  id } }"), "{me{name id}}");
        assert_eq!(
            roundtrip("{ x { ... on B { f } ... on C { g } } }"),
            "{x{...on B{f}...on C{g}}}"
        );
    }
}
