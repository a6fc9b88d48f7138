//! Single-pass grouping over input sorted by the grouping keys.

use super::compare::atomic_equal;
use super::context::QueryContext;
use super::cursor::{Cursor, CursorState, Operator, OperatorRef};
use super::tuple::{Column, Tuple};
use super::variable::Slot;
use crate::error::Error;
use crate::xdm::{XdmAtomicValue, XdmItem, atomize};
use std::sync::Arc;

/// Accumulates one output column.
#[derive(Debug, Clone)]
pub enum Aggregator {
    /// Keeps the first value seen (group keys and columns bound outside the pipeline).
    Skip(Option<Column>),
    /// Concatenates the values of every tuple of the group.
    Concat(Vec<XdmItem>),
}

impl Aggregator {
    fn add(&mut self, column: Option<&Column>) {
        match self {
            Aggregator::Skip(kept @ None) => *kept = Some(column.cloned().flatten()),
            Aggregator::Skip(Some(_)) => {}
            Aggregator::Concat(items) => items.extend(column.cloned().flatten().unwrap_or_default()),
        }
    }

    fn take(&mut self) -> Column {
        match self {
            Aggregator::Skip(kept) => kept.take().flatten(),
            Aggregator::Concat(items) => Some(std::mem::take(items)),
        }
    }
}

type Key = Vec<Option<XdmAtomicValue>>;

fn key_equal(a: &Key, b: &Key) -> bool {
    a.len() == b.len()
        && a.iter().zip(b).all(|(x, y)| match (x, y) {
            (None, None) => true,
            (Some(x), Some(y)) => atomic_equal(x, y),
            _ => false,
        })
}

/// Groups consecutive tuples with equal keys into one tuple each.
#[derive(Debug)]
pub struct Grouping {
    key_columns: Vec<usize>,
    aggregate_from: usize,
    aggregators: Vec<Aggregator>,
    current: Option<Key>,
    size: usize,
}

impl Grouping {
    /// `key_columns` and every column before `aggregate_from` are kept once, all others are
    /// concatenated. Aggregators are laid out by the first tuple added.
    pub fn new(key_columns: Vec<usize>, aggregate_from: usize) -> Self {
        Self { key_columns, aggregate_from, aggregators: Vec::new(), current: None, size: 0 }
    }

    fn layout(&mut self, width: usize) {
        let (keys, outer) = (&self.key_columns, self.aggregate_from);
        self.aggregators.extend((self.aggregators.len()..width).map(|c| {
            if c < outer || keys.contains(&c) { Aggregator::Skip(None) } else { Aggregator::Concat(Vec::new()) }
        }));
    }

    fn key(&self, tuple: &Tuple) -> Result<Key, Error> {
        self.key_columns
            .iter()
            .map(|c| {
                let mut atoms = atomize(tuple.get(*c).map(Vec::as_slice).unwrap_or_default());
                match atoms.len() {
                    0 => Ok(None),
                    1 => Ok(atoms.pop().map(|a| match a {
                        XdmAtomicValue::UntypedAtomic(s) => XdmAtomicValue::String(s),
                        other => other,
                    })),
                    n => Err(Error::type_error(format!("grouping key of {n} values"))),
                }
            })
            .collect()
    }

    /// Add `tuple` to the current group. Returns `false` without consuming the tuple when its
    /// key differs from the current group's; the caller must [`emit`](Self::emit) first.
    pub fn add(&mut self, tuple: &Tuple) -> Result<bool, Error> {
        let key = self.key(tuple)?;
        match &self.current {
            Some(current) if !key_equal(current, &key) => return Ok(false),
            Some(_) => {}
            None => self.current = Some(key),
        }
        self.layout(tuple.len());
        for (c, aggregator) in self.aggregators.iter_mut().enumerate() {
            aggregator.add(tuple.columns().get(c));
        }
        self.size += 1;
        Ok(true)
    }

    /// Number of tuples added to the current group.
    pub fn size(&self) -> usize {
        self.size
    }

    /// The finished current group, if any.
    pub fn emit(&mut self) -> Option<Tuple> {
        self.current.take()?;
        self.size = 0;
        Some(Tuple::from_columns(self.aggregators.iter_mut().map(Aggregator::take)))
    }

    /// Drop the current group without emitting it.
    pub fn clear(&mut self) {
        self.current = None;
        self.size = 0;
        self.aggregators.clear();
    }
}

/// `group by $k, ...`
#[derive(Debug)]
pub struct GroupBy {
    pub input: OperatorRef,
    pub keys: Vec<Arc<Slot>>,
}

struct GroupByCursor<'a> {
    input: Box<dyn Cursor + 'a>,
    grouping: Grouping,
    state: CursorState,
}

impl Cursor for GroupByCursor<'_> {
    fn open(&mut self, ctx: &QueryContext) -> Result<(), Error> {
        self.grouping.clear();
        self.input.open(ctx)?;
        self.state.open();
        Ok(())
    }

    fn next(&mut self, ctx: &QueryContext) -> Result<Option<Tuple>, Error> {
        if !self.state.pull("GroupBy")? {
            return Ok(None);
        }
        while let Some(t) = self.input.next(ctx)? {
            if self.grouping.add(&t)? {
                continue;
            }
            let finished = self.grouping.emit();
            if !self.grouping.add(&t)? {
                return Err(Error::illegal_state("fresh group rejected its first tuple"));
            }
            return Ok(finished);
        }
        let last = self.grouping.emit();
        if last.is_none() {
            self.state.exhaust();
        }
        Ok(last)
    }

    fn close(&mut self) {
        if self.state.close() {
            self.input.close();
        }
    }
}

impl Operator for GroupBy {
    fn create<'a>(&'a self, ctx: &QueryContext, tuple: &Tuple) -> Result<Box<dyn Cursor + 'a>, Error> {
        let key_columns = self
            .keys
            .iter()
            .map(|k| k.position().ok_or_else(|| Error::illegal_state(format!("group key ${} has no column", k.name()))))
            .collect::<Result<Vec<_>, _>>()?;
        let input = self.input.create(ctx, tuple)?;
        let grouping = Grouping::new(key_columns, tuple.len());
        Ok(Box::new(GroupByCursor { input, grouping, state: CursorState::default() }))
    }
}
