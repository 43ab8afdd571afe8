//! Syntax source: the error-tolerant parser seam.
//!
//! Parsing is delegated to tree-sitter with the Python grammar. Trees are
//! position-annotated and tolerant of incomplete input; the builder is the
//! only consumer of tree nodes. Everything downstream works on the lowered
//! [`loupe_core::graph::Fragment`] types.

use once_cell::sync::Lazy;
use tree_sitter::{Language, Node, Parser, Tree};

use loupe_core::graph::Span;

static PYTHON: Lazy<Language> = Lazy::new(|| tree_sitter_python::LANGUAGE.into());

/// Parse Python source into a syntax tree.
///
/// Returns `None` only if the parser itself cannot run; malformed input still
/// yields a best-effort tree with ERROR nodes.
pub fn parse(text: &str) -> Option<Tree> {
    let mut parser = Parser::new();
    parser.set_language(&PYTHON).ok()?;
    parser.parse(text, None)
}

/// Byte span of a node.
pub fn span(node: Node<'_>) -> Span {
    let range = node.byte_range();
    Span::new(range.start, range.end)
}

/// Source text of a node.
pub fn text<'s>(node: Node<'_>, src: &'s str) -> &'s str {
    node.utf8_text(src.as_bytes()).unwrap_or("")
}

/// Named children of a node, collected.
pub fn children<'t>(node: Node<'t>) -> Vec<Node<'t>> {
    let mut cursor = node.walk();
    node.named_children(&mut cursor).collect()
}

/// Extract the value of a string literal node, `None` for anything else.
///
/// Concatenates the node's `string_content` parts; escape sequences are kept
/// verbatim (registered names and field paths never contain them in
/// practice).
pub fn string_value(node: Node<'_>, src: &str) -> Option<String> {
    if node.kind() != "string" {
        return None;
    }
    let mut out = String::new();
    for child in children(node) {
        if child.kind() == "string_content" {
            out.push_str(text(child, src));
        }
    }
    Some(out)
}

/// Flatten an identifier / attribute chain into its dotted parts.
///
/// `a` → `["a"]`, `a.b.c` → `["a", "b", "c"]`. Returns `None` when the
/// chain's base is not a pure name (calls, subscripts, literals).
pub fn name_chain(node: Node<'_>, src: &str) -> Option<Vec<String>> {
    match node.kind() {
        "identifier" => Some(vec![text(node, src).to_string()]),
        "attribute" => {
            let object = node.child_by_field_name("object")?;
            let attr = node.child_by_field_name("attribute")?;
            let mut chain = name_chain(object, src)?;
            chain.push(text(attr, src).to_string());
            Some(chain)
        }
        _ => None,
    }
}

/// The docstring of a body block: its first statement when that is a plain
/// string expression.
pub fn docstring(body: Node<'_>, src: &str) -> Option<String> {
    let first = children(body).into_iter().next()?;
    if first.kind() != "expression_statement" {
        return None;
    }
    let expr = children(first).into_iter().next()?;
    string_value(expr, src)
}

/// Contiguous `#` comment lines directly above a declaration, joined.
pub fn leading_comments(node: Node<'_>, src: &str) -> Option<String> {
    let mut lines = Vec::new();
    let mut prev = node.prev_named_sibling();
    let mut expected_row = node.start_position().row;
    while let Some(p) = prev {
        if p.kind() != "comment" {
            break;
        }
        // Only comments stacked immediately above, no blank-line gap.
        if p.end_position().row + 1 != expected_row {
            break;
        }
        expected_row = p.start_position().row;
        let line = text(p, src).trim_start_matches('#').trim().to_string();
        lines.push(line);
        prev = p.prev_named_sibling();
    }
    if lines.is_empty() {
        return None;
    }
    lines.reverse();
    Some(lines.join("\n"))
}
