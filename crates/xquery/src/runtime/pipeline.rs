//! Tuple-stream operators of the pipe form and the expression that drives a pipeline.
//!
//! A pipeline is a chain of operators, each pulling from its `input`. `Start` feeds the
//! chain with the tuple the pipeline expression is evaluated on; every binding operator
//! appends one column per live variable.

use super::compare::sort_compare;
use super::context::QueryContext;
use super::cursor::{Cursor, CursorGuard, CursorState, Operator, OperatorRef};
use super::tuple::Tuple;
use super::variable::Slot;
use super::{Expr, ExprRef};
use crate::error::Error;
use crate::xdm::{XdmAtomicValue, XdmItem, XdmSequence, atomize_opt, effective_boolean_value};
use core::cmp::Ordering;
use std::sync::Arc;

/// `ReturnExpr(Start(chain), ret)`: evaluates `ret` once per tuple of the pipeline.
#[derive(Debug)]
pub struct Pipeline {
    pub operator: OperatorRef,
    pub ret: ExprRef,
}

impl Expr for Pipeline {
    fn evaluate(&self, ctx: &QueryContext, tuple: &Tuple) -> Result<XdmSequence, Error> {
        let mut cursor = CursorGuard::open(self.operator.create(ctx, tuple)?, ctx)?;
        let mut out = Vec::new();
        while let Some(t) = cursor.next(ctx)? {
            out.extend(self.ret.evaluate(ctx, &t)?);
        }
        Ok(out)
    }

    fn is_updating(&self) -> bool {
        self.ret.is_updating()
    }
}

/// Yields its input tuple exactly once.
#[derive(Debug, Default)]
pub struct Start;

struct StartCursor {
    tuple: Tuple,
    emitted: bool,
    state: CursorState,
}

impl Cursor for StartCursor {
    fn open(&mut self, _ctx: &QueryContext) -> Result<(), Error> {
        self.emitted = false;
        self.state.open();
        Ok(())
    }

    fn next(&mut self, _ctx: &QueryContext) -> Result<Option<Tuple>, Error> {
        if !self.state.pull("Start")? {
            return Ok(None);
        }
        if self.emitted {
            self.state.exhaust();
            return Ok(None);
        }
        self.emitted = true;
        Ok(Some(self.tuple.clone()))
    }

    fn close(&mut self) {
        self.state.close();
    }
}

impl Operator for Start {
    fn create<'a>(&'a self, _ctx: &QueryContext, tuple: &Tuple) -> Result<Box<dyn Cursor + 'a>, Error> {
        Ok(Box::new(StartCursor { tuple: tuple.clone(), emitted: false, state: CursorState::default() }))
    }
}

/// `for $v (at $p)? (allowing empty)? in expr`
#[derive(Debug)]
pub struct ForBind {
    pub input: OperatorRef,
    pub var: Arc<Slot>,
    pub position: Option<Arc<Slot>>,
    pub allowing_empty: bool,
    pub expr: ExprRef,
}

struct ForBindCursor<'a> {
    op: &'a ForBind,
    input: Box<dyn Cursor + 'a>,
    current: Option<(Tuple, std::vec::IntoIter<XdmItem>, i64)>,
    state: CursorState,
}

impl ForBindCursor<'_> {
    fn emit(&self, base: &Tuple, item: XdmSequence, position: i64) -> Result<Tuple, Error> {
        let mut out = base.clone();
        self.op.var.bind_checked(&mut out, item)?;
        if let Some(p) = &self.op.position {
            p.bind(&mut out, Some(vec![XdmItem::from(position)]))?;
        }
        Ok(out)
    }
}

impl Cursor for ForBindCursor<'_> {
    fn open(&mut self, ctx: &QueryContext) -> Result<(), Error> {
        self.current = None;
        self.input.open(ctx)?;
        self.state.open();
        Ok(())
    }

    fn next(&mut self, ctx: &QueryContext) -> Result<Option<Tuple>, Error> {
        if !self.state.pull("ForBind")? {
            return Ok(None);
        }
        loop {
            if let Some((base, items, position)) = &mut self.current
                && let Some(item) = items.next()
            {
                *position += 1;
                let (base, position) = (base.clone(), *position);
                return self.emit(&base, vec![item], position).map(Some);
            }
            let Some(t) = self.input.next(ctx)? else {
                self.state.exhaust();
                return Ok(None);
            };
            let items = self.op.expr.evaluate(ctx, &t)?;
            if items.is_empty() && self.op.allowing_empty {
                self.current = None;
                return self.emit(&t, Vec::new(), 0).map(Some);
            }
            self.current = Some((t, items.into_iter(), 0));
        }
    }

    fn close(&mut self) {
        if self.state.close() {
            self.input.close();
        }
    }
}

impl Operator for ForBind {
    fn create<'a>(&'a self, ctx: &QueryContext, tuple: &Tuple) -> Result<Box<dyn Cursor + 'a>, Error> {
        let input = self.input.create(ctx, tuple)?;
        Ok(Box::new(ForBindCursor { op: self, input, current: None, state: CursorState::default() }))
    }
}

/// Evaluates one stateless function per input tuple and passes the result on (or drops the
/// tuple on `None`). Shared by `LetBind` and `Select`.
struct MapCursor<'a, F> {
    name: &'static str,
    input: Box<dyn Cursor + 'a>,
    map: F,
    state: CursorState,
}

impl<F> Cursor for MapCursor<'_, F>
where
    F: FnMut(&QueryContext, Tuple) -> Result<Option<Tuple>, Error>,
{
    fn open(&mut self, ctx: &QueryContext) -> Result<(), Error> {
        self.input.open(ctx)?;
        self.state.open();
        Ok(())
    }

    fn next(&mut self, ctx: &QueryContext) -> Result<Option<Tuple>, Error> {
        if !self.state.pull(self.name)? {
            return Ok(None);
        }
        while let Some(t) = self.input.next(ctx)? {
            if let Some(out) = (self.map)(ctx, t)? {
                return Ok(Some(out));
            }
        }
        self.state.exhaust();
        Ok(None)
    }

    fn close(&mut self) {
        if self.state.close() {
            self.input.close();
        }
    }
}

/// `let $v := expr`
#[derive(Debug)]
pub struct LetBind {
    pub input: OperatorRef,
    pub var: Arc<Slot>,
    pub expr: ExprRef,
}

impl Operator for LetBind {
    fn create<'a>(&'a self, ctx: &QueryContext, tuple: &Tuple) -> Result<Box<dyn Cursor + 'a>, Error> {
        let input = self.input.create(ctx, tuple)?;
        let map = move |ctx: &QueryContext, mut t: Tuple| -> Result<Option<Tuple>, Error> {
            if self.var.is_live() {
                let value = self.expr.evaluate(ctx, &t)?;
                self.var.bind_checked(&mut t, value)?;
            }
            Ok(Some(t))
        };
        Ok(Box::new(MapCursor { name: "LetBind", input, map, state: CursorState::default() }))
    }
}

/// `where expr`
#[derive(Debug)]
pub struct Select {
    pub input: OperatorRef,
    pub predicate: ExprRef,
}

impl Operator for Select {
    fn create<'a>(&'a self, ctx: &QueryContext, tuple: &Tuple) -> Result<Box<dyn Cursor + 'a>, Error> {
        let input = self.input.create(ctx, tuple)?;
        let map = move |ctx: &QueryContext, t: Tuple| -> Result<Option<Tuple>, Error> {
            Ok(effective_boolean_value(&self.predicate.evaluate(ctx, &t)?)?.then_some(t))
        };
        Ok(Box::new(MapCursor { name: "Select", input, map, state: CursorState::default() }))
    }
}

/// `count $v`: numbers tuples from 1. With a check expression the counter resets to zero
/// whenever the check is empty or false; such tuples carry a null column.
#[derive(Debug)]
pub struct Count {
    pub input: OperatorRef,
    pub var: Arc<Slot>,
    pub check: Option<ExprRef>,
}

struct CountCursor<'a> {
    op: &'a Count,
    input: Box<dyn Cursor + 'a>,
    counter: i64,
    state: CursorState,
}

impl Cursor for CountCursor<'_> {
    fn open(&mut self, ctx: &QueryContext) -> Result<(), Error> {
        self.counter = 0;
        self.input.open(ctx)?;
        self.state.open();
        Ok(())
    }

    fn next(&mut self, ctx: &QueryContext) -> Result<Option<Tuple>, Error> {
        if !self.state.pull("Count")? {
            return Ok(None);
        }
        let Some(mut t) = self.input.next(ctx)? else {
            self.state.exhaust();
            return Ok(None);
        };
        let pass = match &self.op.check {
            Some(check) => effective_boolean_value(&check.evaluate(ctx, &t)?)?,
            None => true,
        };
        if pass {
            self.counter += 1;
            self.op.var.bind(&mut t, Some(vec![XdmItem::from(self.counter)]))?;
        } else {
            self.counter = 0;
            self.op.var.bind(&mut t, None)?;
        }
        Ok(Some(t))
    }

    fn close(&mut self) {
        if self.state.close() {
            self.input.close();
        }
    }
}

impl Operator for Count {
    fn create<'a>(&'a self, ctx: &QueryContext, tuple: &Tuple) -> Result<Box<dyn Cursor + 'a>, Error> {
        let input = self.input.create(ctx, tuple)?;
        if !self.var.is_live() {
            return Ok(input);
        }
        Ok(Box::new(CountCursor { op: self, input, counter: 0, state: CursorState::default() }))
    }
}

/// One `order by` key.
#[derive(Debug)]
pub struct OrderSpec {
    pub key: ExprRef,
    pub descending: bool,
    pub empty_greatest: bool,
}

impl OrderSpec {
    fn compare(&self, a: Option<&XdmAtomicValue>, b: Option<&XdmAtomicValue>) -> Result<Ordering, Error> {
        let ordering = match (a, b) {
            (None, None) => Ordering::Equal,
            (None, Some(_)) => if self.empty_greatest { Ordering::Greater } else { Ordering::Less },
            (Some(_), None) => if self.empty_greatest { Ordering::Less } else { Ordering::Greater },
            (Some(a), Some(b)) => sort_compare(a, b)?,
        };
        Ok(if self.descending { ordering.reverse() } else { ordering })
    }
}

/// `order by spec, ...`: materializes its input and sorts stably.
#[derive(Debug)]
pub struct OrderBy {
    pub input: OperatorRef,
    pub specs: Vec<OrderSpec>,
}

struct OrderByCursor<'a> {
    op: &'a OrderBy,
    input: Box<dyn Cursor + 'a>,
    sorted: std::vec::IntoIter<Tuple>,
    state: CursorState,
}

impl OrderByCursor<'_> {
    fn sort(&mut self, ctx: &QueryContext) -> Result<Vec<Tuple>, Error> {
        let mut rows = Vec::new();
        while let Some(t) = self.input.next(ctx)? {
            let keys = self
                .op
                .specs
                .iter()
                .map(|s| atomize_opt(&s.key.evaluate(ctx, &t)?))
                .collect::<Result<Vec<_>, Error>>()?;
            rows.push((keys, t));
        }
        let mut failure = None;
        rows.sort_by(|(a, _), (b, _)| {
            for (spec, (x, y)) in self.op.specs.iter().zip(a.iter().zip(b)) {
                match spec.compare(x.as_ref(), y.as_ref()) {
                    Ok(Ordering::Equal) => {}
                    Ok(o) => return o,
                    Err(e) => {
                        if failure.is_none() {
                            failure = Some(e);
                        }
                        return Ordering::Equal;
                    }
                }
            }
            Ordering::Equal
        });
        match failure {
            Some(e) => Err(e),
            None => Ok(rows.into_iter().map(|(_, t)| t).collect()),
        }
    }
}

impl Cursor for OrderByCursor<'_> {
    fn open(&mut self, ctx: &QueryContext) -> Result<(), Error> {
        self.input.open(ctx)?;
        self.sorted = self.sort(ctx)?.into_iter();
        self.state.open();
        Ok(())
    }

    fn next(&mut self, _ctx: &QueryContext) -> Result<Option<Tuple>, Error> {
        if !self.state.pull("OrderBy")? {
            return Ok(None);
        }
        let next = self.sorted.next();
        if next.is_none() {
            self.state.exhaust();
        }
        Ok(next)
    }

    fn close(&mut self) {
        if self.state.close() {
            self.input.close();
        }
    }
}

impl Operator for OrderBy {
    fn create<'a>(&'a self, ctx: &QueryContext, tuple: &Tuple) -> Result<Box<dyn Cursor + 'a>, Error> {
        let input = self.input.create(ctx, tuple)?;
        Ok(Box::new(OrderByCursor { op: self, input, sorted: Vec::new().into_iter(), state: CursorState::default() }))
    }
}
