use std::collections::{HashMap, HashSet};
use std::fmt::Write;

use super::{display_token, NotationElement, NotationModel};

const INDENT: &str = "    ";

/// Parent id to children, in insertion order. Built once per render.
struct ChildIndex<'a> {
    roots: Vec<&'a NotationElement>,
    children: HashMap<&'a str, Vec<&'a NotationElement>>,
}

impl<'a> ChildIndex<'a> {
    fn build(elements: &'a [NotationElement]) -> Self {
        let known: HashSet<&str> = elements.iter().map(|e| e.id.as_str()).collect();
        let mut roots = Vec::new();
        let mut children: HashMap<&str, Vec<&NotationElement>> = HashMap::new();
        for element in elements {
            match element.parent_id.as_deref() {
                Some(parent) if known.contains(parent) => {
                    children.entry(parent).or_default().push(element)
                }
                _ => roots.push(element),
            }
        }
        Self { roots, children }
    }

    fn children_of(&self, id: &str) -> &[&'a NotationElement] {
        self.children.get(id).map(Vec::as_slice).unwrap_or(&[])
    }
}

fn quote(text: &str) -> String {
    let mut quoted = String::with_capacity(text.len() + 2);
    quoted.push('"');
    for c in text.chars() {
        match c {
            '"' => quoted.push_str("\\\""),
            '\\' => quoted.push_str("\\\\"),
            '\n' => quoted.push_str("\\n"),
            c => quoted.push(c),
        }
    }
    quoted.push('"');
    quoted
}

/// Render a workspace model as notation text.
///
/// Deterministic: nesting follows `parent_id`, siblings keep their order in
/// `model.elements`, and relationships follow all elements inside `model`.
/// A missing element description is written as `"null"`.
pub fn render(model: &NotationModel) -> String {
    let index = ChildIndex::build(&model.elements);
    let names: HashMap<&str, &str> = model
        .elements
        .iter()
        .map(|e| (e.id.as_str(), e.name.as_str()))
        .collect();

    let mut out = String::new();
    out.push_str("workspace ");
    out.push_str(&quote(&model.workspace.name));
    if let Some(description) = &model.workspace.description {
        out.push(' ');
        out.push_str(&quote(description));
    }
    out.push_str(" {\n");
    let _ = writeln!(out, "{INDENT}model {{");

    for element in &index.roots {
        write_element(&mut out, &index, element, 2);
    }

    for relationship in &model.relationships {
        let token = |id: &str| display_token(names.get(id).copied().unwrap_or(id));
        let _ = write!(
            out,
            "{}{} -> {}",
            INDENT.repeat(2),
            token(&relationship.source_id),
            token(&relationship.destination_id)
        );
        if let Some(description) = &relationship.description {
            out.push(' ');
            out.push_str(&quote(description));
        }
        out.push('\n');
    }

    let _ = writeln!(out, "{INDENT}}}");
    out.push_str("}\n");
    out
}

fn write_element(out: &mut String, index: &ChildIndex<'_>, element: &NotationElement, depth: usize) {
    let indent = INDENT.repeat(depth);
    let _ = write!(
        out,
        "{}{} = {} {} {}",
        indent,
        display_token(&element.name),
        element.kind.keyword(),
        quote(&element.name),
        quote(element.description.as_deref().unwrap_or("null"))
    );

    let children = index.children_of(&element.id);
    if children.is_empty() {
        out.push('\n');
        return;
    }

    out.push_str(" {\n");
    for child in children {
        write_element(out, index, child, depth + 1);
    }
    out.push_str(&indent);
    out.push_str("}\n");
}
