use super::walker::Walker;
use crate::ast::{Ast, AstKind, NodeId};
use crate::error::Error;

/// Turns FLWOR clause lists into operator chains:
/// `FlowrExpr(c1, .., cn, ReturnClause(e))` becomes `ReturnExpr(Start(op1(.., op2(.., End))), e)`.
/// Each operator keeps the clause's children and appends its downstream continuation as
/// last child. FLWORs with window clauses are left alone.
#[derive(Debug, Default)]
pub struct Pipelining;

fn operator_kind(clause: AstKind) -> Option<AstKind> {
    Some(match clause {
        AstKind::ForClause => AstKind::ForBind,
        AstKind::LetClause => AstKind::LetBind,
        AstKind::WhereClause => AstKind::Selection,
        AstKind::OrderByClause => AstKind::OrderBy,
        AstKind::GroupByClause => AstKind::GroupBy,
        AstKind::CountClause => AstKind::Count,
        _ => return None,
    })
}

fn operator(ast: &mut Ast, clause: NodeId, next: NodeId) -> Result<NodeId, Error> {
    let clause_kind = ast.kind(clause);
    let kind = operator_kind(clause_kind)
        .ok_or_else(|| Error::illegal_state(format!("{clause_kind} cannot be pipelined")))?;
    let op = ast.create(kind);
    let properties: Vec<(String, String)> = ast.properties(clause).map(|(k, v)| (k.to_string(), v.to_string())).collect();
    for (key, value) in properties {
        ast.set_property(op, &key, value);
    }
    for child in ast.children(clause).to_vec() {
        match ast.kind(child) {
            AstKind::AllowingEmpty => ast.set_property(op, "allowingEmpty", "true"),
            AstKind::Variable => {
                let binding = ast.node(AstKind::TypedVariableBinding, &[child]);
                ast.add_child(op, binding);
            }
            _ => ast.add_child(op, child),
        }
    }
    ast.add_child(op, next);
    Ok(op)
}

impl Walker for Pipelining {
    fn name(&self) -> &'static str {
        "pipelining"
    }

    fn visit(&mut self, ast: &mut Ast, node: NodeId) -> Result<NodeId, Error> {
        if ast.kind(node) != AstKind::FlowrExpr {
            return Ok(node);
        }
        let clauses = ast.children(node).to_vec();
        if clauses.iter().any(|c| matches!(ast.kind(*c), AstKind::SlidingWindowClause | AstKind::TumblingWindowClause)) {
            return Ok(node);
        }
        let Some((&ret, body)) = clauses.split_last() else {
            return Err(Error::illegal_state("empty FLWOR"));
        };
        let ret_expr = ast.child(ret, 0).ok_or_else(|| Error::illegal_state("return clause without expression"))?;

        let mut next = ast.create(AstKind::End);
        for clause in body.iter().rev() {
            next = operator(ast, *clause, next)?;
        }
        let start = ast.node(AstKind::Start, &[next]);
        let pipeline = ast.node(AstKind::ReturnExpr, &[start, ret_expr]);
        if !ast.replace(node, pipeline) {
            return Err(Error::illegal_state("detached FLWOR"));
        }
        Ok(pipeline)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::optimizer::walker::walk;
    use crate::parser::parse;

    fn body(ast: &Ast) -> String {
        let root = ast.root().unwrap();
        let body = ast.preorder(root).into_iter().find(|n| ast.kind(*n) == AstKind::QueryBody).unwrap();
        ast.display(ast.child(body, 0).unwrap())
    }

    #[test]
    fn clauses_become_a_chain() {
        let mut ast = parse("for $x allowing empty at $i in (1, 2) let $y := $x where $y count $c return $c").unwrap();
        assert_eq!(walk(&mut Pipelining, &mut ast).unwrap(), 1);
        assert_eq!(
            body(&ast),
            "ReturnExpr(Start(ForBind(TypedVariableBinding(Variable[x;0]), TypedVariableBinding(Variable[i;1]), \
             SequenceExpr(Int[1], Int[2]), LetBind(TypedVariableBinding(Variable[y;2]), VariableRef[x;0], \
             Selection(VariableRef[y;2], Count(TypedVariableBinding(Variable[c;3]), End))))), VariableRef[c;3])"
        );
        let root = ast.root().unwrap();
        let for_bind = ast.preorder(root).into_iter().find(|n| ast.kind(*n) == AstKind::ForBind).unwrap();
        assert_eq!(ast.property(for_bind, "allowingEmpty"), Some("true"));
    }

    #[test]
    fn nested_flwors_are_pipelined() {
        let mut ast = parse("for $x in (1, 2) return for $y in $x return $y").unwrap();
        assert_eq!(walk(&mut Pipelining, &mut ast).unwrap(), 2);
        assert!(!body(&ast).contains("FlowrExpr"));
    }

    #[test]
    fn window_flwors_stay() {
        let mut ast = parse("for tumbling window $w in (1, 2) start when true() return $w").unwrap();
        assert_eq!(walk(&mut Pipelining, &mut ast).unwrap(), 0);
    }
}
