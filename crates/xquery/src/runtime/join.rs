//! Nested-loop join of two independent binding chains.

use super::compare::Comparison;
use super::context::QueryContext;
use super::cursor::{Cursor, CursorGuard, CursorState, Operator, OperatorRef};
use super::tuple::Tuple;
use super::variable::Slot;
use crate::error::Error;
use crate::xdm::XdmSequence;
use std::sync::Arc;
use tracing::trace;

/// `Join(left, right, JoinClause(cmp, lkey, rkey))`.
///
/// Both inputs are evaluated from the join's input tuple. The right chain sees that tuple
/// padded with one null column per live left binding, so its bindings land behind the left
/// ones. Output tuples are the left tuple followed by the right bindings. The right input is
/// materialized once, or once per value of `group` when it depends on an enclosing binding.
#[derive(Debug)]
pub struct Join {
    pub input: OperatorRef,
    pub left: OperatorRef,
    pub right: OperatorRef,
    pub left_vars: Vec<Arc<Slot>>,
    /// `lkey` is evaluated on left tuples, `rkey` on right tuples.
    pub comparison: Comparison,
    pub group: Option<Arc<Slot>>,
}

struct JoinCursor<'a> {
    op: &'a Join,
    input: Box<dyn Cursor + 'a>,
    width: usize,
    outer_len: usize,
    left: Option<CursorGuard<'a>>,
    current: Option<(Tuple, XdmSequence, usize)>,
    right: Vec<(Tuple, XdmSequence)>,
    cached_for: Option<Option<XdmSequence>>,
    state: CursorState,
}

impl<'a> JoinCursor<'a> {
    fn refresh_right(&mut self, ctx: &QueryContext, tuple: &Tuple) -> Result<(), Error> {
        let group = self.op.group.as_ref().map(|g| g.read(tuple)).transpose()?;
        if self.cached_for.as_ref().is_some_and(|cached| *cached == group) {
            return Ok(());
        }
        let padded = tuple.concat(std::iter::repeat_n(None, self.width));
        let mut cursor = CursorGuard::open(self.op.right.create(ctx, &padded)?, ctx)?;
        self.right.clear();
        while let Some(r) = cursor.next(ctx)? {
            let key = self.op.comparison.right.evaluate(ctx, &r)?;
            self.right.push((r, key));
        }
        trace!(rows = self.right.len(), grouped = group.is_some(), "join right input materialized");
        self.cached_for = Some(group);
        Ok(())
    }
}

impl Cursor for JoinCursor<'_> {
    fn open(&mut self, ctx: &QueryContext) -> Result<(), Error> {
        self.left = None;
        self.current = None;
        self.right.clear();
        self.cached_for = None;
        self.outer_len = 0;
        self.input.open(ctx)?;
        self.state.open();
        Ok(())
    }

    fn next(&mut self, ctx: &QueryContext) -> Result<Option<Tuple>, Error> {
        if !self.state.pull("Join")? {
            return Ok(None);
        }
        loop {
            if let Some((l, lkey, index)) = &mut self.current {
                while let Some((r, rkey)) = self.right.get(*index) {
                    *index += 1;
                    if self.op.comparison.compare(lkey, rkey)? == Some(true) {
                        let skip = self.outer_len + self.width;
                        return Ok(Some(l.concat(r.tail(skip).iter().cloned())));
                    }
                }
                self.current = None;
            }
            if let Some(left) = &mut self.left {
                if let Some(l) = left.next(ctx)? {
                    let lkey = self.op.comparison.left.evaluate(ctx, &l)?;
                    self.current = Some((l, lkey, 0));
                    continue;
                }
                self.left = None;
            }
            let Some(t) = self.input.next(ctx)? else {
                self.state.exhaust();
                return Ok(None);
            };
            self.refresh_right(ctx, &t)?;
            if self.right.is_empty() {
                continue;
            }
            self.outer_len = t.len();
            self.left = Some(CursorGuard::open(self.op.left.create(ctx, &t)?, ctx)?);
        }
    }

    fn close(&mut self) {
        if self.state.close() {
            self.left = None;
            self.input.close();
        }
    }
}

impl Operator for Join {
    fn create<'a>(&'a self, ctx: &QueryContext, tuple: &Tuple) -> Result<Box<dyn Cursor + 'a>, Error> {
        let input = self.input.create(ctx, tuple)?;
        Ok(Box::new(JoinCursor {
            op: self,
            input,
            width: self.left_vars.iter().filter(|v| v.is_live()).count(),
            outer_len: 0,
            left: None,
            current: None,
            right: Vec::new(),
            cached_for: None,
            state: CursorState::default(),
        }))
    }
}
