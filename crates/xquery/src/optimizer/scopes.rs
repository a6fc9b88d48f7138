//! Variable scope information re-derived from a (possibly rewritten) tree.
//!
//! The parser's scope stack is gone after parsing; passes that need to know where a
//! variable is bound rebuild this table from the `Variable` nodes and drop it after every
//! structural change they make.

use crate::ast::{Ast, AstKind, NodeId};
use std::collections::{HashMap, HashSet};

/// Nodes that only wrap a declaration; the binder is the first ancestor above them.
fn is_declaration_wrapper(kind: AstKind) -> bool {
    matches!(
        kind,
        AstKind::TypedVariableBinding
            | AstKind::TypedVariableDeclaration
            | AstKind::CurrentItem
            | AstKind::PositionalVar
            | AstKind::PreviousItem
            | AstKind::NextItem
            | AstKind::WindowVars
            | AstKind::WindowStartCondition
            | AstKind::WindowEndCondition
            | AstKind::CatchVar
            | AstKind::CopyVariableBinding
    )
}

#[derive(Debug, Default)]
pub struct ScopeTable {
    binders: HashMap<String, NodeId>,
}

impl ScopeTable {
    pub fn build(ast: &Ast, root: NodeId) -> Self {
        let mut binders = HashMap::new();
        for node in ast.preorder(root) {
            if ast.kind(node) != AstKind::Variable {
                continue;
            }
            let Some(name) = ast.value(node) else { continue };
            let binder = ast.ancestors(node).find(|a| !is_declaration_wrapper(ast.kind(*a)));
            if let Some(binder) = binder {
                binders.insert(name.to_string(), binder);
            }
        }
        Self { binders }
    }

    /// The node introducing `var` (a pipe operator, clause, function, ...).
    pub fn binder(&self, var: &str) -> Option<NodeId> {
        self.binders.get(var).copied()
    }
}

/// Names declared anywhere inside `node`.
pub fn declared_in(ast: &Ast, node: NodeId) -> HashSet<String> {
    ast.preorder(node)
        .into_iter()
        .filter(|n| ast.kind(*n) == AstKind::Variable)
        .filter_map(|n| ast.value(n).map(str::to_string))
        .collect()
}

/// Variables referenced inside `node` but declared outside of it, in first-use order.
pub fn free_variables(ast: &Ast, node: NodeId) -> Vec<String> {
    let declared = declared_in(ast, node);
    let mut seen = HashSet::new();
    ast.preorder(node)
        .into_iter()
        .filter(|n| ast.kind(*n) == AstKind::VariableRef)
        .filter_map(|n| ast.value(n))
        .filter(|name| !declared.contains(*name))
        .filter(|name| seen.insert(name.to_string()))
        .map(str::to_string)
        .collect()
}

pub fn references_any(ast: &Ast, node: NodeId, names: &[String]) -> bool {
    ast.preorder(node)
        .into_iter()
        .any(|n| ast.kind(n) == AstKind::VariableRef && ast.value(n).is_some_and(|v| names.iter().any(|x| x == v)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse;

    #[test]
    fn binder_skips_wrappers_and_free_variables_exclude_locals() {
        let ast = parse("for $x in (1, 2) let $y := $x return for $z in $y return ($z, $x)").unwrap();
        let root = ast.root().unwrap();
        let table = ScopeTable::build(&ast, root);
        let for_x = table.binder("x;0").unwrap();
        assert_eq!(ast.kind(for_x), AstKind::ForClause);
        assert_eq!(ast.kind(table.binder("y;1").unwrap()), AstKind::LetClause);

        let inner = ast.preorder(root).into_iter().filter(|n| ast.kind(*n) == AstKind::FlowrExpr).nth(1).unwrap();
        assert_eq!(free_variables(&ast, inner), vec!["y;1".to_string(), "x;0".to_string()]);
        assert!(references_any(&ast, inner, &["x;0".to_string()]));
        assert!(!references_any(&ast, inner, &["q".to_string()]));
    }
}
