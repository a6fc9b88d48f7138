use super::scopes::{ScopeTable, free_variables};
use super::walker::{Traversal, Walker};
use crate::ast::{Ast, AstKind, NodeId};
use crate::error::Error;
use std::collections::HashSet;
use tracing::debug;

/// Marks the iteration groups a join's right input belongs to.
///
/// The right input of a `Join` only has to be re-evaluated when a variable it depends on
/// changes. This pass finds the closest pipeline operator binding such a variable, wraps that
/// operator's continuation in a `Count` over a fresh `#joingroup;N` variable and records the
/// variable in the join's `group` property. A join whose right input is constant for the
/// whole pipeline is left unmarked.
#[derive(Debug, Default)]
pub struct JoinGroupDemarcation {
    next_group: usize,
    scopes: Option<ScopeTable>,
}

impl JoinGroupDemarcation {
    fn scopes(&mut self, ast: &Ast) -> &ScopeTable {
        self.scopes.get_or_insert_with(|| match ast.root() {
            Some(root) => ScopeTable::build(ast, root),
            None => ScopeTable::default(),
        })
    }

    fn group_var_name(&mut self) -> String {
        let name = format!("#joingroup;{}", self.next_group);
        self.next_group += 1;
        name
    }
}

/// Climbing may pass every node except a `Start` that opens a pipeline outside of a join.
fn independent(ast: &Ast, node: NodeId) -> bool {
    ast.kind(node) != AstKind::Start || ast.parent(node).is_some_and(|p| ast.kind(p) == AstKind::Join)
}

impl Walker for JoinGroupDemarcation {
    fn name(&self) -> &'static str {
        "join-group-demarcation"
    }

    fn traversal(&self) -> Traversal {
        Traversal::TopDown
    }

    fn visit(&mut self, ast: &mut Ast, join: NodeId) -> Result<NodeId, Error> {
        if ast.kind(join) != AstKind::Join || ast.property(join, "group").is_some() {
            return Ok(join);
        }
        let right = ast.child(join, 1).ok_or_else(|| Error::illegal_state("join without right input"))?;
        let free = free_variables(ast, right);
        let binders: HashSet<NodeId> = {
            let scopes = self.scopes(ast);
            free.iter().filter_map(|v| scopes.binder(v)).collect()
        };
        let stop_at = ast.ancestors(join).find(|a| binders.contains(a));

        let Some(mut anc) = ast.parent(join) else { return Ok(join) };
        while Some(anc) != stop_at && independent(ast, anc) {
            match ast.parent(anc) {
                Some(parent) => anc = parent,
                None => break,
            }
        }
        // Let bindings do not change within one iteration of their input.
        while ast.kind(anc) == AstKind::LetBind {
            match ast.parent(anc) {
                Some(parent) => anc = parent,
                None => break,
            }
        }
        if ast.kind(anc) == AstKind::Start && ast.parent(anc).is_none_or(|p| ast.kind(p) != AstKind::Join) {
            return Ok(join);
        }

        let group_var = self.group_var_name();
        ast.set_property(join, "group", group_var.as_str());
        let var = ast.create_value(AstKind::Variable, group_var.as_str());
        let binding = ast.node(AstKind::TypedVariableBinding, &[var]);
        let count = ast.node(AstKind::Count, &[binding]);
        let last = ast.child_count(anc).checked_sub(1).ok_or_else(|| Error::illegal_state("empty operator"))?;
        let continuation =
            ast.replace_child(anc, last, count).ok_or_else(|| Error::illegal_state("operator lost its continuation"))?;
        ast.add_child(count, continuation);
        self.scopes = None;
        debug!(%join, group = %group_var, at = %anc, "demarcated join group");
        Ok(anc)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::optimizer::join_recognition::JoinRecognition;
    use crate::optimizer::pipelining::Pipelining;
    use crate::optimizer::walker::walk;
    use crate::parser::parse;

    fn joined(query: &str) -> Ast {
        let mut ast = parse(query).unwrap();
        walk(&mut Pipelining, &mut ast).unwrap();
        walk(&mut JoinRecognition, &mut ast).unwrap();
        ast
    }

    fn joins(ast: &Ast) -> Vec<NodeId> {
        let root = ast.root().unwrap();
        ast.preorder(root).into_iter().filter(|n| ast.kind(*n) == AstKind::Join).collect()
    }

    #[test]
    fn dependent_join_gets_a_count_boundary() {
        let mut ast = joined("for $z in (1, 2) for $a in (1, 2, 3) for $b in ($z, 3) where $a = $b return $a");
        let mut pass = JoinGroupDemarcation::default();
        assert_eq!(walk(&mut pass, &mut ast).unwrap(), 1);
        let join = joins(&ast)[0];
        assert_eq!(ast.property(join, "group"), Some("#joingroup;0"));
        let count = ast.parent(join).unwrap();
        assert_eq!(ast.kind(count), AstKind::Count);
        assert_eq!(ast.display(ast.child(count, 0).unwrap()), "TypedVariableBinding(Variable[#joingroup;0])");
        assert_eq!(ast.kind(ast.parent(count).unwrap()), AstKind::ForBind);

        let before = ast.display(ast.root().unwrap());
        assert_eq!(walk(&mut pass, &mut ast).unwrap(), 0);
        assert_eq!(ast.display(ast.root().unwrap()), before);
    }

    #[test]
    fn let_bindings_are_climbed_over() {
        let mut ast =
            joined("for $z in (1, 2) let $w := $z for $a in (1, 2) for $b in ($w, 3) where $a = $b return $a");
        walk(&mut JoinGroupDemarcation::default(), &mut ast).unwrap();
        let join = joins(&ast)[0];
        let count = ast.ancestors(join).find(|a| ast.kind(*a) == AstKind::Count).unwrap();
        assert_eq!(ast.kind(ast.child(count, 1).unwrap()), AstKind::LetBind);
        assert_eq!(ast.kind(ast.parent(count).unwrap()), AstKind::ForBind);
    }

    #[test]
    fn independent_join_is_unmarked() {
        let mut ast = joined("for $a in (1, 2) for $b in (2, 3) where $a = $b return $a");
        assert_eq!(walk(&mut JoinGroupDemarcation::default(), &mut ast).unwrap(), 0);
        assert_eq!(ast.property(joins(&ast)[0], "group"), None);
    }

    #[test]
    fn distinct_joins_get_distinct_groups() {
        let mut ast = joined(
            "for $z in (1, 2) return (\
               for $y in (1, 2) for $a in (1, 2) for $b in ($z, $y) where $a = $b return $a, \
               for $y in (3, 4) for $a in (1, 2) for $b in ($z, $y) where $a = $b return $a)",
        );
        walk(&mut JoinGroupDemarcation::default(), &mut ast).unwrap();
        let groups: HashSet<String> =
            joins(&ast).iter().filter_map(|j| ast.property(*j, "group").map(str::to_string)).collect();
        assert_eq!(groups.len(), 2);
    }
}
