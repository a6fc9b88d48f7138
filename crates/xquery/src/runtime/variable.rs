//! Variable storage: tuple slots for local bindings and lazily evaluated globals.

use super::context::QueryContext;
use super::tuple::{Column, Tuple};
use super::types::SequenceType;
use super::{Expr, ExprRef};
use crate::error::{Error, ErrorCode};
use crate::xdm::{XdmItem, XdmSequence};
use std::sync::{Arc, OnceLock};

/// One binding of the variable table. Its tuple position is assigned once the enclosing
/// target is fully translated; a binding eliminated as dead never receives one and its
/// operator does not materialize a column for it.
#[derive(Debug)]
pub struct Slot {
    name: String,
    ty: Option<SequenceType>,
    position: OnceLock<usize>,
}

impl Slot {
    pub fn new(name: impl Into<String>, ty: Option<SequenceType>) -> Self {
        Self { name: name.into(), ty, position: OnceLock::new() }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn ty(&self) -> Option<&SequenceType> {
        self.ty.as_ref()
    }

    pub fn position(&self) -> Option<usize> {
        self.position.get().copied()
    }

    pub fn is_live(&self) -> bool {
        self.position.get().is_some()
    }

    pub(crate) fn assign(&self, position: usize) -> Result<(), Error> {
        match self.position.set(position) {
            Ok(()) => Ok(()),
            Err(_) if self.position() == Some(position) => Ok(()),
            Err(_) => Err(Error::illegal_state(format!("${} already has a position", self.name))),
        }
    }

    /// Append `column` to `tuple` if this binding is live. The column must land on the
    /// binding's position.
    pub fn bind(&self, tuple: &mut Tuple, column: Column) -> Result<(), Error> {
        let Some(position) = self.position() else { return Ok(()) };
        if tuple.len() != position {
            return Err(Error::illegal_state(format!(
                "${} bound at column {} but its position is {position}",
                self.name,
                tuple.len()
            )));
        }
        tuple.push(column);
        Ok(())
    }

    /// Like [`Slot::bind`], checking the value against the declared type first.
    pub fn bind_checked(&self, tuple: &mut Tuple, value: XdmSequence) -> Result<(), Error> {
        let value = match &self.ty {
            Some(ty) => ty.check(value, &format!("${}", self.name))?,
            None => value,
        };
        self.bind(tuple, Some(value))
    }

    /// Value of this binding in `tuple`. A null column reads as the empty sequence.
    pub fn read(&self, tuple: &Tuple) -> Result<XdmSequence, Error> {
        let position =
            self.position().ok_or_else(|| Error::illegal_state(format!("${} read without a position", self.name)))?;
        if position >= tuple.len() {
            return Err(Error::illegal_state(format!("${} at column {position} of {}", self.name, tuple.len())));
        }
        Ok(tuple.get(position).cloned().unwrap_or_default())
    }
}

/// Where a global variable gets its value from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GlobalSource {
    /// `declare variable`; external ones are looked up in the query context first.
    Declared { external: bool },
    /// The context item, from the query context or the context item declaration.
    ContextItem { external: bool },
    ContextPosition,
    ContextSize,
}

/// A prolog-level variable, evaluated at most once per query context.
#[derive(Debug)]
pub struct GlobalVar {
    name: String,
    index: usize,
    source: GlobalSource,
    ty: Option<SequenceType>,
    init: OnceLock<ExprRef>,
}

impl GlobalVar {
    pub fn new(name: impl Into<String>, index: usize, source: GlobalSource, ty: Option<SequenceType>) -> Self {
        Self { name: name.into(), index, source, ty, init: OnceLock::new() }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn source(&self) -> GlobalSource {
        self.source
    }

    /// Install the initializer. Globals are created before their initializer is translated.
    pub fn set_init(&self, init: ExprRef) -> Result<(), Error> {
        self.init.set(init).map_err(|_| Error::illegal_state(format!("${} initialized twice", self.name)))
    }

    pub fn value(&self, ctx: &QueryContext) -> Result<XdmSequence, Error> {
        ctx.global(self.index, || {
            let value = self.compute(ctx)?;
            match &self.ty {
                Some(ty) => ty.check(value, &format!("${}", self.name)),
                None => Ok(value),
            }
        })
    }

    fn compute(&self, ctx: &QueryContext) -> Result<XdmSequence, Error> {
        match self.source {
            GlobalSource::ContextPosition => return Ok(vec![XdmItem::from(ctx.context_position())]),
            GlobalSource::ContextSize => return Ok(vec![XdmItem::from(ctx.context_size())]),
            GlobalSource::ContextItem { external: true } => {
                if let Some(item) = ctx.context_item() {
                    return Ok(vec![item.clone()]);
                }
            }
            GlobalSource::Declared { external: true } => {
                if let Some(value) = ctx.external(&self.name) {
                    return Ok(value.clone());
                }
            }
            GlobalSource::ContextItem { external: false } | GlobalSource::Declared { external: false } => {}
        }
        match self.init.get() {
            Some(init) => init.evaluate(ctx, &Tuple::new()),
            None => Err(Error::from_code(ErrorCode::XPDY0002, format!("no value supplied for ${}", self.name))),
        }
    }
}

/// Reads a local binding from the current tuple.
#[derive(Debug)]
pub struct SlotRef {
    pub slot: Arc<Slot>,
}

impl Expr for SlotRef {
    fn evaluate(&self, _ctx: &QueryContext, tuple: &Tuple) -> Result<XdmSequence, Error> {
        self.slot.read(tuple)
    }
}

/// Reads a global variable.
#[derive(Debug)]
pub struct GlobalRef {
    pub var: Arc<GlobalVar>,
}

impl Expr for GlobalRef {
    fn evaluate(&self, ctx: &QueryContext, _tuple: &Tuple) -> Result<XdmSequence, Error> {
        self.var.value(ctx)
    }
}
