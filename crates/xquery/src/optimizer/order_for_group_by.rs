use super::walker::Walker;
use crate::ast::{Ast, AstKind, NodeId};
use crate::error::Error;

/// Puts an `OrderByClause` on the grouping variables in front of every `GroupByClause`
/// that is not already preceded by one. The grouping operator relies on sorted input.
#[derive(Debug, Default)]
pub struct OrderForGroupBy;

fn orders_by_group_keys(ast: &Ast, group_by: NodeId, order_by: NodeId) -> bool {
    let groups = ast.children(group_by);
    let orders = ast.children(order_by);
    groups.len() == orders.len()
        && groups.iter().zip(orders).all(|(g, o)| {
            let group_var = ast.child(*g, 0).and_then(|v| ast.value(v));
            let order_key = ast.child(*o, 0).filter(|k| ast.kind(*k) == AstKind::VariableRef);
            group_var.is_some() && order_key.and_then(|k| ast.value(k)) == group_var
        })
}

impl Walker for OrderForGroupBy {
    fn name(&self) -> &'static str {
        "order-for-group-by"
    }

    fn visit(&mut self, ast: &mut Ast, node: NodeId) -> Result<NodeId, Error> {
        if ast.kind(node) != AstKind::GroupByClause {
            return Ok(node);
        }
        let (Some(parent), Some(index)) = (ast.parent(node), ast.child_index(node)) else {
            return Ok(node);
        };
        if let Some(prev) = index.checked_sub(1).and_then(|i| ast.child(parent, i))
            && ast.kind(prev) == AstKind::OrderByClause
            && orders_by_group_keys(ast, node, prev)
        {
            return Ok(node);
        }

        let order_by = ast.create(AstKind::OrderByClause);
        for spec in ast.children(node).to_vec() {
            let Some(key) = ast.child(spec, 0) else { continue };
            let key = ast.copy_tree(key);
            let order_spec = ast.node(AstKind::OrderBySpec, &[key]);
            if let Some(collation) = ast.child_of_kind(spec, AstKind::Collation) {
                let collation = ast.copy_tree(collation);
                ast.add_child(order_spec, collation);
            }
            ast.add_child(order_by, order_spec);
        }
        ast.insert_child(parent, index, order_by);
        Ok(order_by)
    }
}
