//! Graphviz rendering of an AST, used by the compile chain's debug output.

use super::{Ast, NodeId};
use std::fmt::Write;

pub fn to_dot(ast: &Ast, root: NodeId) -> String {
    let mut out = String::from("digraph AST {\n  node [shape=box, fontname=\"monospace\"];\n");
    for id in ast.preorder(root) {
        let mut label = ast.kind(id).name().to_string();
        if let Some(v) = ast.value(id) {
            let _ = write!(label, "\\n{}", escape(v));
        }
        for (k, v) in ast.properties(id) {
            let _ = write!(label, "\\n{}={}", escape(k), escape(v));
        }
        let _ = writeln!(out, "  {id} [label=\"{label}\"];");
        for child in ast.children(id) {
            let _ = writeln!(out, "  {id} -> {child};");
        }
    }
    out.push_str("}\n");
    out
}

fn escape(s: &str) -> String {
    s.replace('\\', "\\\\").replace('"', "\\\"")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::AstKind;

    #[test]
    fn renders_edges_and_escaped_labels() {
        let mut ast = Ast::new();
        let s = ast.create_value(AstKind::Str, "say \"hi\"");
        let body = ast.node(AstKind::QueryBody, &[s]);
        let dot = to_dot(&ast, body);
        assert!(dot.starts_with("digraph AST {"));
        assert!(dot.contains(&format!("{body} -> {s};")));
        assert!(dot.contains("say \\\"hi\\\""));
    }
}
