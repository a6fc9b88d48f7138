use crate::ast::{Ast, NodeId};
use crate::error::Error;
use tracing::debug;

/// Restarts one walker may trigger before it is considered non-converging.
const MAX_REWRITES: usize = 10_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Traversal {
    /// Children before parents (post-order).
    BottomUp,
    /// Parents before children (pre-order).
    TopDown,
}

/// A single AST rewrite pass.
pub trait Walker {
    fn name(&self) -> &'static str;

    fn traversal(&self) -> Traversal {
        Traversal::BottomUp
    }

    /// Inspect `node` and possibly rewrite around it. Returning `node` means nothing changed;
    /// any other id (a replacement or a rewritten ancestor) restarts the sweep from the root.
    fn visit(&mut self, ast: &mut Ast, node: NodeId) -> Result<NodeId, Error>;
}

/// Run `walker` over the tree until a full sweep makes no change. Returns the number of
/// rewrites performed.
pub fn walk(walker: &mut dyn Walker, ast: &mut Ast) -> Result<usize, Error> {
    let mut rewrites = 0;
    'sweep: loop {
        let Some(root) = ast.root() else { return Ok(rewrites) };
        let order = match walker.traversal() {
            Traversal::TopDown => ast.preorder(root),
            Traversal::BottomUp => postorder(ast, root),
        };
        for node in order {
            let result = walker.visit(ast, node)?;
            if result != node {
                rewrites += 1;
                debug!(walker = walker.name(), %node, %result, "rewrite");
                if rewrites > MAX_REWRITES {
                    return Err(Error::illegal_state(format!("walker {} does not converge", walker.name())));
                }
                continue 'sweep;
            }
        }
        return Ok(rewrites);
    }
}

/// `id` and its descendants, children before parents, siblings left to right.
pub fn postorder(ast: &Ast, id: NodeId) -> Vec<NodeId> {
    let mut out = Vec::new();
    let mut stack = vec![id];
    while let Some(n) = stack.pop() {
        out.push(n);
        stack.extend(ast.children(n).iter().copied());
    }
    out.reverse();
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::AstKind;

    /// Rewrites every `Int[1]` into `Int[2]` by replacement.
    struct Bump;

    impl Walker for Bump {
        fn name(&self) -> &'static str {
            "bump"
        }

        fn visit(&mut self, ast: &mut Ast, node: NodeId) -> Result<NodeId, Error> {
            if ast.kind(node) == AstKind::Int && ast.value(node) == Some("1") {
                let two = ast.create_value(AstKind::Int, "2");
                ast.replace(node, two);
                return Ok(two);
            }
            Ok(node)
        }
    }

    struct Forever;

    impl Walker for Forever {
        fn name(&self) -> &'static str {
            "forever"
        }

        fn visit(&mut self, ast: &mut Ast, node: NodeId) -> Result<NodeId, Error> {
            let fresh = ast.create(AstKind::EmptySequence);
            ast.replace(node, fresh);
            Ok(fresh)
        }
    }

    fn sample() -> Ast {
        let mut ast = Ast::new();
        let a = ast.create_value(AstKind::Int, "1");
        let b = ast.create_value(AstKind::Int, "1");
        let seq = ast.node(AstKind::SequenceExpr, &[a, b]);
        ast.set_root(seq);
        ast
    }

    #[test]
    fn postorder_visits_children_first() {
        let ast = sample();
        let root = ast.root().unwrap();
        let order: Vec<AstKind> = postorder(&ast, root).into_iter().map(|n| ast.kind(n)).collect();
        assert_eq!(order, vec![AstKind::Int, AstKind::Int, AstKind::SequenceExpr]);
    }

    #[test]
    fn walk_reaches_fixpoint() {
        let mut ast = sample();
        assert_eq!(walk(&mut Bump, &mut ast).unwrap(), 2);
        assert_eq!(ast.display(ast.root().unwrap()), "SequenceExpr(Int[2], Int[2])");
        assert_eq!(walk(&mut Bump, &mut ast).unwrap(), 0);
    }

    #[test]
    fn non_converging_walker_is_an_internal_error() {
        let mut ast = sample();
        let err = walk(&mut Forever, &mut ast).unwrap_err();
        assert_eq!(err.code, crate::error::ErrorCode::BIST0001);
    }
}
