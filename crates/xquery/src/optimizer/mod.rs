//! AST rewriting between parser and translator.
//!
//! An [`Optimizer`] owns an ordered list of walker stages. Each stage is a fresh
//! [`Walker`] that runs to a fixpoint over the whole tree before the next one starts.

pub mod join_group_demarcation;
pub mod join_recognition;
pub mod order_for_group_by;
pub mod pipelining;
pub mod scopes;
pub mod walker;

pub use join_group_demarcation::JoinGroupDemarcation;
pub use join_recognition::JoinRecognition;
pub use order_for_group_by::OrderForGroupBy;
pub use pipelining::Pipelining;
pub use walker::{Traversal, Walker, walk};

use crate::ast::Ast;
use crate::error::Error;
use tracing::debug;

/// Pluggable optimization strategy of a compile chain.
pub trait Optimizer: Send + Sync {
    fn optimize(&self, ast: &mut Ast) -> Result<(), Error>;
}

/// Creates a walker for one optimization run.
pub type Stage = fn() -> Box<dyn Walker>;

pub struct DefaultOptimizer {
    stages: Vec<Stage>,
}

impl Default for DefaultOptimizer {
    fn default() -> Self {
        Self {
            stages: vec![
                order_for_group_by_stage as Stage,
                pipelining_stage,
                join_recognition_stage,
                join_group_demarcation_stage,
            ],
        }
    }
}

fn order_for_group_by_stage() -> Box<dyn Walker> {
    Box::new(OrderForGroupBy)
}

fn pipelining_stage() -> Box<dyn Walker> {
    Box::new(Pipelining)
}

fn join_recognition_stage() -> Box<dyn Walker> {
    Box::new(JoinRecognition)
}

fn join_group_demarcation_stage() -> Box<dyn Walker> {
    Box::new(JoinGroupDemarcation::default())
}

impl DefaultOptimizer {
    pub fn new() -> Self {
        Self::default()
    }

    /// An optimizer without any stage; the tree is handed to the translator as parsed.
    pub fn empty() -> Self {
        Self { stages: Vec::new() }
    }

    pub fn with_stage(mut self, stage: Stage) -> Self {
        self.stages.push(stage);
        self
    }

    pub fn stage_names(&self) -> Vec<&'static str> {
        self.stages.iter().map(|stage| stage().name()).collect()
    }
}

impl Optimizer for DefaultOptimizer {
    fn optimize(&self, ast: &mut Ast) -> Result<(), Error> {
        for stage in &self.stages {
            let mut walker = stage();
            let rewrites = walk(walker.as_mut(), ast)?;
            debug!(stage = walker.name(), rewrites, "optimizer stage done");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::AstKind;
    use crate::parser::parse;

    #[test]
    fn default_pipeline_order() {
        assert_eq!(
            DefaultOptimizer::new().stage_names(),
            vec!["order-for-group-by", "pipelining", "join-recognition", "join-group-demarcation"]
        );
    }

    #[test]
    fn group_by_ends_up_as_ordered_pipe() {
        let mut ast = parse("for $x in (2, 1, 2) group by $x return $x").unwrap();
        DefaultOptimizer::new().optimize(&mut ast).unwrap();
        let root = ast.root().unwrap();
        let kinds: Vec<AstKind> = ast.preorder(root).into_iter().map(|n| ast.kind(n)).collect();
        let order_by = kinds.iter().position(|k| *k == AstKind::OrderBy).unwrap();
        let group_by = kinds.iter().position(|k| *k == AstKind::GroupBy).unwrap();
        assert!(order_by < group_by);
        assert!(!kinds.contains(&AstKind::FlowrExpr));
    }

    #[test]
    fn empty_optimizer_keeps_the_tree() {
        let mut ast = parse("for $x in (1, 2) return $x").unwrap();
        let before = ast.display(ast.root().unwrap());
        DefaultOptimizer::empty().optimize(&mut ast).unwrap();
        assert_eq!(ast.display(ast.root().unwrap()), before);
    }
}
