//! Physical plan: expressions evaluated per tuple and tuple-stream operators.
//!
//! The translator turns an optimized AST into a tree of [`Expr`] values. Pipeline parts of
//! the tree are chains of [`Operator`]s that are pulled through [`Cursor`]s; everything else
//! evaluates eagerly to an [`XdmSequence`].

pub mod arith;
pub mod compare;
pub mod construct;
pub mod context;
pub mod control;
pub mod cursor;
pub mod expr;
pub mod functions;
pub mod group;
pub mod join;
pub mod path;
pub mod pipeline;
pub mod tuple;
pub mod types;
pub mod updating;
pub mod variable;
pub mod window;

use crate::error::Error;
use crate::xdm::XdmSequence;
use core::fmt;
use std::sync::Arc;

pub use context::{QueryContext, QueryContextBuilder};
pub use cursor::{Cursor, CursorGuard, Operator, OperatorRef};
pub use functions::{FunctionRegistry, default_function_registry};
pub use tuple::Tuple;

/// A translated expression.
pub trait Expr: fmt::Debug + Send + Sync {
    /// Value of the expression for the bindings in `tuple`.
    fn evaluate(&self, ctx: &QueryContext, tuple: &Tuple) -> Result<XdmSequence, Error>;

    /// Whether evaluating the expression may append to the pending update list.
    fn is_updating(&self) -> bool {
        false
    }
}

pub type ExprRef = Arc<dyn Expr>;
