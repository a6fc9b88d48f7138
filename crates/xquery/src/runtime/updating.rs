//! Update primitives. Each one evaluates its operands and appends operations to the pending
//! update list of the query context; none of them touches a node.

use super::context::QueryContext;
use super::tuple::Tuple;
use super::{Expr, ExprRef};
use crate::error::Error;
use crate::model::{NodeHandle, NodeKind, QName};
use crate::update::{UpdateKind, UpdateOp, UpdatePayload};
use crate::xdm::{XdmAtomicValue, XdmItem, XdmSequence, atomize, atomize_opt};
use itertools::Itertools;

fn single_target(seq: XdmSequence, what: &str) -> Result<NodeHandle, Error> {
    let mut items = seq.into_iter();
    match (items.next(), items.next()) {
        (Some(XdmItem::Node(n)), None) => Ok(n),
        _ => Err(Error::type_error(format!("target of {what} must be a single node"))),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertPosition {
    Into,
    AsFirst,
    AsLast,
    Before,
    After,
}

impl InsertPosition {
    fn kind(self) -> UpdateKind {
        match self {
            InsertPosition::Into => UpdateKind::InsertInto,
            InsertPosition::AsFirst => UpdateKind::InsertIntoAsFirst,
            InsertPosition::AsLast => UpdateKind::InsertIntoAsLast,
            InsertPosition::Before => UpdateKind::InsertBefore,
            InsertPosition::After => UpdateKind::InsertAfter,
        }
    }
}

/// `insert node(s) source (into|as first into|as last into|before|after) target`
#[derive(Debug)]
pub struct Insert {
    pub position: InsertPosition,
    pub source: ExprRef,
    pub target: ExprRef,
}

impl Expr for Insert {
    fn evaluate(&self, ctx: &QueryContext, tuple: &Tuple) -> Result<XdmSequence, Error> {
        let source = self.source.evaluate(ctx, tuple)?;
        let target = single_target(self.target.evaluate(ctx, tuple)?, "insert")?;
        ctx.push_update(UpdateOp::new(self.position.kind(), target, UpdatePayload::Nodes(source)));
        Ok(Vec::new())
    }

    fn is_updating(&self) -> bool {
        true
    }
}

/// `delete node(s) target`; an empty target deletes nothing.
#[derive(Debug)]
pub struct Delete {
    pub target: ExprRef,
}

impl Expr for Delete {
    fn evaluate(&self, ctx: &QueryContext, tuple: &Tuple) -> Result<XdmSequence, Error> {
        for item in self.target.evaluate(ctx, tuple)? {
            match item {
                XdmItem::Node(n) => ctx.push_update(UpdateOp::new(UpdateKind::Delete, n, UpdatePayload::None)),
                XdmItem::Atomic(a) => return Err(Error::type_error(format!("cannot delete {}", a.type_name()))),
            }
        }
        Ok(Vec::new())
    }

    fn is_updating(&self) -> bool {
        true
    }
}

/// `rename node target as name`
#[derive(Debug)]
pub struct Rename {
    pub target: ExprRef,
    pub name: ExprRef,
}

impl Expr for Rename {
    fn evaluate(&self, ctx: &QueryContext, tuple: &Tuple) -> Result<XdmSequence, Error> {
        let target = single_target(self.target.evaluate(ctx, tuple)?, "rename")?;
        let name = match atomize_opt(&self.name.evaluate(ctx, tuple)?)? {
            Some(XdmAtomicValue::QName(q)) => q,
            Some(v) if v.is_string_like() => QName::local(v.string_value().trim()),
            _ => return Err(Error::type_error("new name must be a single xs:QName or string")),
        };
        ctx.push_update(UpdateOp::new(UpdateKind::Rename, target, UpdatePayload::Name(name)));
        Ok(Vec::new())
    }

    fn is_updating(&self) -> bool {
        true
    }
}

/// `replace node target with replacement`
#[derive(Debug)]
pub struct ReplaceNode {
    pub target: ExprRef,
    pub replacement: ExprRef,
}

impl Expr for ReplaceNode {
    fn evaluate(&self, ctx: &QueryContext, tuple: &Tuple) -> Result<XdmSequence, Error> {
        let target = single_target(self.target.evaluate(ctx, tuple)?, "replace")?;
        let replacement = self.replacement.evaluate(ctx, tuple)?;
        ctx.push_update(UpdateOp::new(UpdateKind::ReplaceNode, target, UpdatePayload::Nodes(replacement)));
        Ok(Vec::new())
    }

    fn is_updating(&self) -> bool {
        true
    }
}

/// `replace value of node target with value`. On an element this replaces its content.
#[derive(Debug)]
pub struct ReplaceValue {
    pub target: ExprRef,
    pub value: ExprRef,
}

impl Expr for ReplaceValue {
    fn evaluate(&self, ctx: &QueryContext, tuple: &Tuple) -> Result<XdmSequence, Error> {
        let target = single_target(self.target.evaluate(ctx, tuple)?, "replace value")?;
        let text = atomize(&self.value.evaluate(ctx, tuple)?).iter().map(XdmAtomicValue::string_value).join(" ");
        let kind = match target.kind() {
            NodeKind::Element => UpdateKind::ReplaceElementContent,
            _ => UpdateKind::ReplaceValue,
        };
        ctx.push_update(UpdateOp::new(kind, target, UpdatePayload::Value(text)));
        Ok(Vec::new())
    }

    fn is_updating(&self) -> bool {
        true
    }
}
