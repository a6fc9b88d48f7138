use super::scopes::references_any;
use super::walker::Walker;
use crate::ast::{Ast, AstKind, NodeId};
use crate::error::Error;

/// Replaces the chain `ForBind $a -> ForBind $b -> Selection(l cmp r)` by a `Join` when `$b`'s
/// input does not depend on `$a` and the comparison splits into a key over the left binding
/// and a key over the right binding:
///
/// `Join(Start(ForBind $a .. End), Start(ForBind $b .. End), JoinClause(cmp, lkey, rkey), next)`
#[derive(Debug, Default)]
pub struct JoinRecognition;

/// Variables declared by a `ForBind` (the item variable and the optional position).
fn bound_names(ast: &Ast, for_bind: NodeId) -> Vec<String> {
    ast.children(for_bind)
        .iter()
        .filter(|c| ast.kind(**c) == AstKind::TypedVariableBinding)
        .filter_map(|c| ast.child(*c, 0).and_then(|v| ast.value(v)))
        .map(str::to_string)
        .collect()
}

fn binding_expr(ast: &Ast, for_bind: NodeId) -> Option<NodeId> {
    let count = ast.child_count(for_bind);
    ast.child(for_bind, count.checked_sub(2)?)
}

fn plain_for(ast: &Ast, node: NodeId) -> bool {
    ast.kind(node) == AstKind::ForBind && ast.property(node, "allowingEmpty").is_none()
}

fn joinable(kind: AstKind) -> bool {
    (kind.is_general_comparison() || kind.is_value_comparison())
        && !matches!(kind, AstKind::GeneralCompNE | AstKind::ValueCompNE)
}

/// The comparison with its operands swapped (`a < b` is `b > a`).
fn mirrored(kind: AstKind) -> AstKind {
    match kind {
        AstKind::GeneralCompLT => AstKind::GeneralCompGT,
        AstKind::GeneralCompLE => AstKind::GeneralCompGE,
        AstKind::GeneralCompGT => AstKind::GeneralCompLT,
        AstKind::GeneralCompGE => AstKind::GeneralCompLE,
        AstKind::ValueCompLT => AstKind::ValueCompGT,
        AstKind::ValueCompLE => AstKind::ValueCompGE,
        AstKind::ValueCompGT => AstKind::ValueCompLT,
        AstKind::ValueCompGE => AstKind::ValueCompLE,
        other => other,
    }
}

impl Walker for JoinRecognition {
    fn name(&self) -> &'static str {
        "join-recognition"
    }

    fn visit(&mut self, ast: &mut Ast, node: NodeId) -> Result<NodeId, Error> {
        if !plain_for(ast, node) {
            return Ok(node);
        }
        let Some(right) = ast.last_child(node).filter(|r| plain_for(ast, *r)) else {
            return Ok(node);
        };
        let Some(select) = ast.last_child(right).filter(|s| ast.kind(*s) == AstKind::Selection) else {
            return Ok(node);
        };
        let Some(cmp) = ast.child(select, 0).filter(|c| ast.kind(*c) == AstKind::ComparisonExpr) else {
            return Ok(node);
        };
        let (Some(op), Some(l), Some(r)) = (ast.child(cmp, 0), ast.child(cmp, 1), ast.child(cmp, 2)) else {
            return Ok(node);
        };
        let op_kind = ast.kind(op);
        if !joinable(op_kind) {
            return Ok(node);
        }

        let left_vars = bound_names(ast, node);
        let right_vars = bound_names(ast, right);
        match binding_expr(ast, right) {
            Some(expr) if !references_any(ast, expr, &left_vars) => {}
            _ => return Ok(node),
        }
        let (left_key, right_key, kind) =
            if !references_any(ast, l, &right_vars) && !references_any(ast, r, &left_vars) {
                (l, r, op_kind)
            } else if !references_any(ast, r, &right_vars) && !references_any(ast, l, &left_vars) {
                (r, l, mirrored(op_kind))
            } else {
                return Ok(node);
            };
        let Some(next) = ast.last_child(select) else {
            return Err(Error::illegal_state("selection without continuation"));
        };

        let join = ast.create(AstKind::Join);
        if !ast.replace(node, join) {
            return Err(Error::illegal_state("detached for binding"));
        }
        let left_end = ast.create(AstKind::End);
        ast.replace_child(node, ast.child_count(node) - 1, left_end);
        let right_end = ast.create(AstKind::End);
        ast.replace_child(right, ast.child_count(right) - 1, right_end);

        let left_start = ast.node(AstKind::Start, &[node]);
        let right_start = ast.node(AstKind::Start, &[right]);
        let cmp_op = ast.create(kind);
        let clause = ast.node(AstKind::JoinClause, &[cmp_op, left_key, right_key]);
        for child in [left_start, right_start, clause, next] {
            ast.add_child(join, child);
        }
        Ok(join)
    }
}
