//! Pull-based iteration protocol of the operator engine.
//!
//! An [`Operator`] is a node of the physical plan. For every input tuple it creates a fresh
//! [`Cursor`] that is opened, pulled with `next` until it returns `None` and closed. Closing
//! is idempotent and releases nested cursors depth-first.

use super::context::QueryContext;
use super::tuple::Tuple;
use crate::error::Error;
use core::fmt;
use std::ops::{Deref, DerefMut};
use std::sync::Arc;

pub trait Cursor {
    /// Start (or, after `close`, restart) the iteration. Opening resets every per-run state.
    fn open(&mut self, ctx: &QueryContext) -> Result<(), Error>;

    /// Next tuple, or `None` once the input is exhausted (and on every call after that).
    fn next(&mut self, ctx: &QueryContext) -> Result<Option<Tuple>, Error>;

    fn close(&mut self);
}

pub trait Operator: fmt::Debug + Send + Sync {
    /// Cursor over the tuples this operator derives from `tuple`.
    fn create<'a>(&'a self, ctx: &QueryContext, tuple: &Tuple) -> Result<Box<dyn Cursor + 'a>, Error>;
}

pub type OperatorRef = Arc<dyn Operator>;

/// Lifecycle of a single cursor: unopened, open, exhausted, closed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum CursorState {
    #[default]
    Unopened,
    Open,
    Exhausted,
    Closed,
}

impl CursorState {
    pub fn open(&mut self) {
        *self = CursorState::Open;
    }

    /// Whether `next` may produce a tuple. Exhausted cursors answer `false`; pulling an
    /// unopened or closed cursor is a framework error.
    pub fn pull(self, operator: &str) -> Result<bool, Error> {
        match self {
            CursorState::Open => Ok(true),
            CursorState::Exhausted => Ok(false),
            CursorState::Unopened => Err(Error::illegal_state(format!("{operator} cursor pulled before open"))),
            CursorState::Closed => Err(Error::illegal_state(format!("{operator} cursor pulled after close"))),
        }
    }

    pub fn exhaust(&mut self) {
        if *self == CursorState::Open {
            *self = CursorState::Exhausted;
        }
    }

    /// Mark closed. Returns false if the cursor was already closed.
    pub fn close(&mut self) -> bool {
        std::mem::replace(self, CursorState::Closed) != CursorState::Closed
    }
}

/// Owns a cursor and closes it when dropped, so errors unwinding through an evaluation
/// release every cursor opened on the way.
pub struct CursorGuard<'a> {
    cursor: Box<dyn Cursor + 'a>,
}

impl<'a> CursorGuard<'a> {
    /// Open `cursor` and guard it. A cursor failing to open is closed right away.
    pub fn open(mut cursor: Box<dyn Cursor + 'a>, ctx: &QueryContext) -> Result<Self, Error> {
        match cursor.open(ctx) {
            Ok(()) => Ok(Self { cursor }),
            Err(e) => {
                cursor.close();
                Err(e)
            }
        }
    }

    /// Pull every remaining tuple.
    pub fn drain(&mut self, ctx: &QueryContext) -> Result<Vec<Tuple>, Error> {
        let mut out = Vec::new();
        while let Some(t) = self.cursor.next(ctx)? {
            out.push(t);
        }
        Ok(out)
    }
}

impl<'a> Deref for CursorGuard<'a> {
    type Target = dyn Cursor + 'a;

    fn deref(&self) -> &Self::Target {
        self.cursor.as_ref()
    }
}

impl DerefMut for CursorGuard<'_> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.cursor.as_mut()
    }
}

impl Drop for CursorGuard<'_> {
    fn drop(&mut self) {
        self.cursor.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorCode;

    #[test]
    fn state_transitions() {
        let mut s = CursorState::default();
        assert_eq!(s.pull("Test").unwrap_err().code, ErrorCode::BIST0001);
        s.open();
        assert!(s.pull("Test").unwrap());
        s.exhaust();
        assert!(!s.pull("Test").unwrap());
        assert!(!s.pull("Test").unwrap());
        assert!(s.close());
        assert!(!s.close());
        assert_eq!(s.pull("Test").unwrap_err().code, ErrorCode::BIST0001);
        s.open();
        assert!(s.pull("Test").unwrap());
    }

    struct Tracked<'a> {
        closed: &'a std::cell::Cell<usize>,
        fail_open: bool,
    }

    impl Cursor for Tracked<'_> {
        fn open(&mut self, _ctx: &QueryContext) -> Result<(), Error> {
            if self.fail_open { Err(Error::not_implemented("tracked open")) } else { Ok(()) }
        }

        fn next(&mut self, _ctx: &QueryContext) -> Result<Option<Tuple>, Error> {
            Ok(None)
        }

        fn close(&mut self) {
            self.closed.set(self.closed.get() + 1);
        }
    }

    #[test]
    fn guard_closes_on_drop_and_on_failed_open() {
        let ctx = QueryContext::default();
        let closed = std::cell::Cell::new(0);
        {
            let mut guard = CursorGuard::open(Box::new(Tracked { closed: &closed, fail_open: false }), &ctx).unwrap();
            assert!(guard.drain(&ctx).unwrap().is_empty());
        }
        assert_eq!(closed.get(), 1);
        assert!(CursorGuard::open(Box::new(Tracked { closed: &closed, fail_open: true }), &ctx).is_err());
        assert_eq!(closed.get(), 2);
    }
}
