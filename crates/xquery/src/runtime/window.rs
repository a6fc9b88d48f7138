//! `for tumbling window` and `for sliding window`.
//!
//! Windows are computed per input tuple over the materialized binding sequence. Each output
//! tuple carries the start variables, then the end variables, then the window itself.

use super::context::QueryContext;
use super::cursor::{Cursor, CursorState, Operator, OperatorRef};
use super::tuple::Tuple;
use super::variable::Slot;
use super::ExprRef;
use crate::error::Error;
use crate::xdm::{XdmItem, XdmSequence, effective_boolean_value};
use std::collections::VecDeque;
use std::sync::Arc;
use tracing::trace;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WindowKind {
    Tumbling,
    Sliding,
}

/// `$current at $position previous $previous next $next`; each part is optional.
#[derive(Debug, Default)]
pub struct WindowVars {
    pub current: Option<Arc<Slot>>,
    pub position: Option<Arc<Slot>>,
    pub previous: Option<Arc<Slot>>,
    pub next: Option<Arc<Slot>>,
}

impl WindowVars {
    /// Bind the variables for the item at `index` of `items`.
    fn bind(&self, tuple: &mut Tuple, items: &[XdmItem], index: usize) -> Result<(), Error> {
        let at = |i: Option<usize>| i.and_then(|i| items.get(i)).cloned().into_iter().collect::<XdmSequence>();
        if let Some(v) = &self.current {
            v.bind(tuple, Some(at(Some(index))))?;
        }
        if let Some(v) = &self.position {
            v.bind(tuple, Some(vec![XdmItem::from(i64::try_from(index + 1).unwrap_or(i64::MAX))]))?;
        }
        if let Some(v) = &self.previous {
            v.bind(tuple, Some(at(index.checked_sub(1))))?;
        }
        if let Some(v) = &self.next {
            v.bind(tuple, Some(at(Some(index + 1))))?;
        }
        Ok(())
    }
}

#[derive(Debug)]
pub struct WindowCondition {
    pub vars: WindowVars,
    pub when: ExprRef,
}

#[derive(Debug)]
pub struct WindowBind {
    pub input: OperatorRef,
    pub kind: WindowKind,
    pub var: Arc<Slot>,
    pub expr: ExprRef,
    pub start: WindowCondition,
    pub end: Option<WindowCondition>,
    /// `only end`: a window whose end condition never held is dropped.
    pub only_end: bool,
}

/// A window as inclusive item indexes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Span {
    start: usize,
    end: usize,
}

impl WindowBind {
    fn start_tuple(&self, base: &Tuple, items: &[XdmItem], start: usize) -> Result<Tuple, Error> {
        let mut t = base.clone();
        self.start.vars.bind(&mut t, items, start)?;
        Ok(t)
    }

    fn starts(&self, ctx: &QueryContext, base: &Tuple, items: &[XdmItem], at: usize) -> Result<bool, Error> {
        let t = self.start_tuple(base, items, at)?;
        effective_boolean_value(&self.start.when.evaluate(ctx, &t)?)
    }

    /// First index from `start` on where the end condition holds.
    fn end_of(&self, ctx: &QueryContext, base: &Tuple, items: &[XdmItem], start: usize) -> Result<Option<usize>, Error> {
        let Some(end) = &self.end else { return Ok(None) };
        let started = self.start_tuple(base, items, start)?;
        for at in start..items.len() {
            let mut t = started.clone();
            end.vars.bind(&mut t, items, at)?;
            if effective_boolean_value(&end.when.evaluate(ctx, &t)?)? {
                return Ok(Some(at));
            }
        }
        Ok(None)
    }

    fn spans(&self, ctx: &QueryContext, base: &Tuple, items: &[XdmItem]) -> Result<Vec<Span>, Error> {
        let last = items.len().saturating_sub(1);
        let mut spans = Vec::new();
        let mut at = 0;
        while at < items.len() {
            if !self.starts(ctx, base, items, at)? {
                at += 1;
                continue;
            }
            let span = if self.end.is_some() {
                match self.end_of(ctx, base, items, at)? {
                    Some(end) => Some(Span { start: at, end }),
                    None if self.only_end => None,
                    None => Some(Span { start: at, end: last }),
                }
            } else {
                // Without an end condition a tumbling window runs up to the next start.
                let mut end = at;
                while end < last && !self.starts(ctx, base, items, end + 1)? {
                    end += 1;
                }
                Some(Span { start: at, end })
            };
            at = match (self.kind, span) {
                (WindowKind::Tumbling, Some(span)) => span.end + 1,
                _ => at + 1,
            };
            spans.extend(span);
        }
        Ok(spans)
    }

    fn emit(&self, base: &Tuple, items: &[XdmItem], span: Span) -> Result<Tuple, Error> {
        let mut t = self.start_tuple(base, items, span.start)?;
        if let Some(end) = &self.end {
            end.vars.bind(&mut t, items, span.end)?;
        }
        let window = items.get(span.start..=span.end).unwrap_or_default().to_vec();
        self.var.bind_checked(&mut t, window)?;
        Ok(t)
    }
}

struct WindowCursor<'a> {
    op: &'a WindowBind,
    input: Box<dyn Cursor + 'a>,
    current: Option<(Tuple, XdmSequence, VecDeque<Span>)>,
    state: CursorState,
}

impl Cursor for WindowCursor<'_> {
    fn open(&mut self, ctx: &QueryContext) -> Result<(), Error> {
        self.current = None;
        self.input.open(ctx)?;
        self.state.open();
        Ok(())
    }

    fn next(&mut self, ctx: &QueryContext) -> Result<Option<Tuple>, Error> {
        if !self.state.pull("WindowBind")? {
            return Ok(None);
        }
        loop {
            if let Some((base, items, spans)) = &mut self.current
                && let Some(span) = spans.pop_front()
            {
                return self.op.emit(base, items, span).map(Some);
            }
            let Some(t) = self.input.next(ctx)? else {
                self.state.exhaust();
                return Ok(None);
            };
            let items = self.op.expr.evaluate(ctx, &t)?;
            let spans = self.op.spans(ctx, &t, &items)?;
            trace!(kind = ?self.op.kind, items = items.len(), windows = spans.len(), "windows");
            self.current = Some((t, items, spans.into()));
        }
    }

    fn close(&mut self) {
        if self.state.close() {
            self.input.close();
        }
    }
}

impl Operator for WindowBind {
    fn create<'a>(&'a self, ctx: &QueryContext, tuple: &Tuple) -> Result<Box<dyn Cursor + 'a>, Error> {
        let input = self.input.create(ctx, tuple)?;
        Ok(Box::new(WindowCursor { op: self, input, current: None, state: CursorState::default() }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::pipeline::Start;
    use crate::runtime::pipeline::tests::{OneOf, ints, lit, run, slot};

    fn window(kind: WindowKind, starts: &[i64], ends: Option<&[i64]>, only_end: bool) -> WindowBind {
        let s = slot("s", 0);
        let start = WindowCondition {
            vars: WindowVars { current: Some(s.clone()), ..WindowVars::default() },
            when: Arc::new(OneOf(s, starts.to_vec())),
        };
        let (end, w) = match ends {
            Some(ends) => {
                let e = slot("e", 1);
                let end = WindowCondition {
                    vars: WindowVars { current: Some(e.clone()), ..WindowVars::default() },
                    when: Arc::new(OneOf(e, ends.to_vec())),
                };
                (Some(end), slot("w", 2))
            }
            None => (None, slot("w", 1)),
        };
        WindowBind { input: Arc::new(Start), kind, var: w, expr: lit(ints(&[1, 2, 3, 4, 5])), start, end, only_end }
    }

    fn windows(op: &WindowBind) -> Vec<XdmSequence> {
        let column = op.var.position().unwrap();
        run(op).unwrap().iter().map(|t| t.get(column).cloned().unwrap_or_default()).collect()
    }

    #[test]
    fn tumbling_windows_run_to_the_next_start() {
        let op = window(WindowKind::Tumbling, &[1, 3, 4], None, false);
        assert_eq!(windows(&op), vec![ints(&[1, 2]), ints(&[3]), ints(&[4, 5])]);
    }

    #[test]
    fn tumbling_windows_do_not_overlap() {
        let op = window(WindowKind::Tumbling, &[1, 2, 3, 4, 5], Some(&[2, 5]), false);
        assert_eq!(windows(&op), vec![ints(&[1, 2]), ints(&[3, 4, 5])]);
    }

    #[test]
    fn sliding_windows_start_at_every_match() {
        let op = window(WindowKind::Sliding, &[1, 2, 3, 4, 5], Some(&[3, 5]), false);
        assert_eq!(
            windows(&op),
            vec![ints(&[1, 2, 3]), ints(&[2, 3]), ints(&[3]), ints(&[4, 5]), ints(&[5])]
        );
    }

    #[test]
    fn only_end_drops_unterminated_windows() {
        let open = window(WindowKind::Tumbling, &[1, 4], Some(&[2]), false);
        assert_eq!(windows(&open), vec![ints(&[1, 2]), ints(&[4, 5])]);
        let only = window(WindowKind::Tumbling, &[1, 4], Some(&[2]), true);
        assert_eq!(windows(&only), vec![ints(&[1, 2])]);
    }

    #[test]
    fn previous_and_next_are_empty_at_the_edges() {
        let vars = WindowVars { previous: Some(slot("p", 0)), next: Some(slot("n", 1)), ..WindowVars::default() };
        let items = ints(&[7, 8]);
        let mut t = Tuple::new();
        vars.bind(&mut t, &items, 0).unwrap();
        assert_eq!(t.get(0), Some(&Vec::new()));
        assert_eq!(t.get(1), Some(&ints(&[8])));
    }
}
