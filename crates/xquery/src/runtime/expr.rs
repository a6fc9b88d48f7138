//! Expressions evaluated against one tuple: literals, sequences, conditionals, logic, ranges,
//! filters, node set operations and the type operators.

use super::context::QueryContext;
use super::tuple::Tuple;
use super::types::{AtomicType, SequenceType, cast_atomic};
use super::variable::Slot;
use super::{Expr, ExprRef};
use crate::error::{Error, ErrorCode};
use crate::xdm::{XdmAtomicValue, XdmItem, XdmSequence, atomize, atomize_opt, effective_boolean_value};
use itertools::Itertools;
use std::collections::HashSet;
use std::sync::Arc;

#[derive(Debug)]
pub struct Literal {
    value: XdmSequence,
}

impl Literal {
    pub fn new(value: XdmSequence) -> Self {
        Self { value }
    }

    pub fn empty() -> Self {
        Self { value: Vec::new() }
    }
}

impl Expr for Literal {
    fn evaluate(&self, _ctx: &QueryContext, _tuple: &Tuple) -> Result<XdmSequence, Error> {
        Ok(self.value.clone())
    }
}

/// `(e1, e2, ...)`
#[derive(Debug)]
pub struct Sequence {
    pub items: Vec<ExprRef>,
}

impl Expr for Sequence {
    fn evaluate(&self, ctx: &QueryContext, tuple: &Tuple) -> Result<XdmSequence, Error> {
        let mut out = Vec::new();
        for item in &self.items {
            out.extend(item.evaluate(ctx, tuple)?);
        }
        Ok(out)
    }

    fn is_updating(&self) -> bool {
        self.items.iter().any(|e| e.is_updating())
    }
}

#[derive(Debug)]
pub struct If {
    pub condition: ExprRef,
    pub then: ExprRef,
    pub otherwise: ExprRef,
}

impl Expr for If {
    fn evaluate(&self, ctx: &QueryContext, tuple: &Tuple) -> Result<XdmSequence, Error> {
        if effective_boolean_value(&self.condition.evaluate(ctx, tuple)?)? {
            self.then.evaluate(ctx, tuple)
        } else {
            self.otherwise.evaluate(ctx, tuple)
        }
    }

    fn is_updating(&self) -> bool {
        self.then.is_updating() || self.otherwise.is_updating()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogicalOp {
    And,
    Or,
}

/// `and` / `or` with left-to-right short-circuit evaluation.
#[derive(Debug)]
pub struct Logical {
    pub op: LogicalOp,
    pub left: ExprRef,
    pub right: ExprRef,
}

impl Expr for Logical {
    fn evaluate(&self, ctx: &QueryContext, tuple: &Tuple) -> Result<XdmSequence, Error> {
        let left = effective_boolean_value(&self.left.evaluate(ctx, tuple)?)?;
        let result = match (self.op, left) {
            (LogicalOp::And, false) => false,
            (LogicalOp::Or, true) => true,
            _ => effective_boolean_value(&self.right.evaluate(ctx, tuple)?)?,
        };
        Ok(vec![XdmItem::from(result)])
    }
}

/// `from to to`
#[derive(Debug)]
pub struct Range {
    pub from: ExprRef,
    pub to: ExprRef,
}

fn range_bound(value: Option<XdmAtomicValue>) -> Result<Option<i64>, Error> {
    match value {
        None => Ok(None),
        Some(v @ XdmAtomicValue::UntypedAtomic(_)) => match cast_atomic(&v, AtomicType::Integer)? {
            XdmAtomicValue::Integer(i) => Ok(Some(i)),
            other => Err(Error::type_error(format!("range bound of type {}", other.type_name()))),
        },
        Some(XdmAtomicValue::Integer(i)) => Ok(Some(i)),
        Some(other) => Err(Error::type_error(format!("range bound of type {}", other.type_name()))),
    }
}

impl Expr for Range {
    fn evaluate(&self, ctx: &QueryContext, tuple: &Tuple) -> Result<XdmSequence, Error> {
        let from = range_bound(atomize_opt(&self.from.evaluate(ctx, tuple)?)?)?;
        let to = range_bound(atomize_opt(&self.to.evaluate(ctx, tuple)?)?)?;
        match (from, to) {
            (Some(from), Some(to)) if from <= to => Ok((from..=to).map(XdmItem::from).collect()),
            _ => Ok(Vec::new()),
        }
    }
}

/// `base[predicate]`. The predicate sees the focus through three bindings: item, position
/// and size. A numeric predicate value selects by position.
#[derive(Debug)]
pub struct Filter {
    pub base: ExprRef,
    pub predicate: ExprRef,
    pub item: Arc<Slot>,
    pub position: Arc<Slot>,
    pub last: Arc<Slot>,
}

fn predicate_holds(value: &[XdmItem], position: usize) -> Result<bool, Error> {
    match value {
        [XdmItem::Atomic(a)] if a.is_numeric() => {
            #[allow(clippy::cast_precision_loss)]
            let position = position as f64;
            Ok(a.as_f64() == Some(position))
        }
        _ => effective_boolean_value(value),
    }
}

impl Expr for Filter {
    fn evaluate(&self, ctx: &QueryContext, tuple: &Tuple) -> Result<XdmSequence, Error> {
        let base = self.base.evaluate(ctx, tuple)?;
        let size = i64::try_from(base.len()).unwrap_or(i64::MAX);
        let mut out = Vec::new();
        for (index, item) in base.into_iter().enumerate() {
            let mut focus = tuple.clone();
            self.item.bind(&mut focus, Some(vec![item.clone()]))?;
            self.position.bind(&mut focus, Some(vec![XdmItem::from(i64::try_from(index + 1).unwrap_or(i64::MAX))]))?;
            self.last.bind(&mut focus, Some(vec![XdmItem::from(size)]))?;
            if predicate_holds(&self.predicate.evaluate(ctx, &focus)?, index + 1)? {
                out.push(item);
            }
        }
        Ok(out)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SetOp {
    Union,
    Intersect,
    Except,
}

/// `union`, `intersect` and `except` over nodes; results are in document order without
/// duplicates.
#[derive(Debug)]
pub struct NodeSet {
    pub op: SetOp,
    pub left: ExprRef,
    pub right: ExprRef,
}

fn only_nodes(seq: XdmSequence) -> Result<XdmSequence, Error> {
    match seq.iter().find(|i| matches!(i, XdmItem::Atomic(_))) {
        Some(XdmItem::Atomic(a)) => Err(Error::type_error(format!("set operation on {}", a.type_name()))),
        _ => Ok(seq),
    }
}

fn node_id(item: &XdmItem) -> u64 {
    match item {
        XdmItem::Node(n) => n.node_id(),
        XdmItem::Atomic(_) => 0,
    }
}

impl Expr for NodeSet {
    fn evaluate(&self, ctx: &QueryContext, tuple: &Tuple) -> Result<XdmSequence, Error> {
        let left = only_nodes(self.left.evaluate(ctx, tuple)?)?;
        let right = only_nodes(self.right.evaluate(ctx, tuple)?)?;
        let right_ids: HashSet<u64> = right.iter().map(node_id).collect();
        let selected: Vec<XdmItem> = match self.op {
            SetOp::Union => left.into_iter().chain(right).collect(),
            SetOp::Intersect => left.into_iter().filter(|n| right_ids.contains(&node_id(n))).collect(),
            SetOp::Except => left.into_iter().filter(|n| !right_ids.contains(&node_id(n))).collect(),
        };
        Ok(selected.into_iter().sorted_by_key(node_id).dedup_by(|a, b| node_id(a) == node_id(b)).collect())
    }
}

/// `expr instance of type`
#[derive(Debug)]
pub struct InstanceOf {
    pub expr: ExprRef,
    pub ty: SequenceType,
}

impl Expr for InstanceOf {
    fn evaluate(&self, ctx: &QueryContext, tuple: &Tuple) -> Result<XdmSequence, Error> {
        Ok(vec![XdmItem::from(self.ty.matches(&self.expr.evaluate(ctx, tuple)?))])
    }
}

/// `expr treat as type`
#[derive(Debug)]
pub struct Treat {
    pub expr: ExprRef,
    pub ty: SequenceType,
}

impl Expr for Treat {
    fn evaluate(&self, ctx: &QueryContext, tuple: &Tuple) -> Result<XdmSequence, Error> {
        let value = self.expr.evaluate(ctx, tuple)?;
        if self.ty.matches(&value) {
            Ok(value)
        } else {
            Err(Error::from_code(ErrorCode::XPDY0050, format!("value does not match {}", self.ty)))
        }
    }
}

/// `expr cast as T?` and `expr castable as T?`
#[derive(Debug)]
pub struct Cast {
    pub expr: ExprRef,
    pub target: AtomicType,
    pub allow_empty: bool,
    pub castable: bool,
}

impl Cast {
    fn cast(&self, value: &[XdmItem]) -> Result<XdmSequence, Error> {
        let mut atoms = atomize(value);
        match atoms.len() {
            0 if self.allow_empty => Ok(Vec::new()),
            0 => Err(Error::type_error(format!("empty sequence cast to {}", self.target.name()))),
            1 => {
                let atom = atoms.pop().ok_or_else(|| Error::illegal_state("cast operand vanished"))?;
                Ok(vec![XdmItem::Atomic(cast_atomic(&atom, self.target)?)])
            }
            n => Err(Error::type_error(format!("cast of {n} values to {}", self.target.name()))),
        }
    }
}

impl Expr for Cast {
    fn evaluate(&self, ctx: &QueryContext, tuple: &Tuple) -> Result<XdmSequence, Error> {
        let value = self.expr.evaluate(ctx, tuple)?;
        if self.castable {
            Ok(vec![XdmItem::from(self.cast(&value).is_ok())])
        } else {
            self.cast(&value)
        }
    }
}
