//! Translate-time variable table.
//!
//! Every variable binding the translator meets becomes a [`Slot`]. Bindings are chained to the
//! innermost binding that is open when they are declared, so each chain mirrors the tuple
//! layout at runtime: a binding's column is the number of live bindings above it. Positions
//! are only assigned by [`VariableTable::resolve_positions`] once translation is finished,
//! because a binding that turns out to be unreferenced is dropped from its chain and takes
//! no column.

use crate::consts::{CTX_ITEM, CTX_LAST, CTX_POSITION};
use crate::error::{Error, ErrorCode};
use crate::runtime::ExprRef;
use crate::runtime::types::SequenceType;
use crate::runtime::variable::{GlobalRef, GlobalSource, GlobalVar, Slot, SlotRef};
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use tracing::trace;

/// Global indices key the per-context value cache, so they are unique across all modules
/// that may run in one query context.
static NEXT_GLOBAL: AtomicUsize = AtomicUsize::new(0);

#[derive(Debug)]
struct Binding {
    slot: Arc<Slot>,
    parent: Option<usize>,
    referenced: bool,
    dead: bool,
}

/// What surrounds the code translated in a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameKind {
    /// Query body or global initializer; the default context is reachable.
    Query,
    /// Function body; there is no focus.
    Function,
    /// Initializer of the context item declaration.
    ContextItem,
}

#[derive(Debug, Clone, Copy)]
struct Frame {
    kind: FrameKind,
    base: usize,
}

fn is_context_name(name: &str) -> bool {
    matches!(name, CTX_ITEM | CTX_POSITION | CTX_LAST)
}

#[derive(Debug)]
pub struct VariableTable {
    bindings: Vec<Binding>,
    open: Vec<usize>,
    frames: Vec<Frame>,
    globals: HashMap<String, Arc<GlobalVar>>,
    global_order: Vec<Arc<GlobalVar>>,
}

impl Default for VariableTable {
    fn default() -> Self {
        Self::new()
    }
}

impl VariableTable {
    pub fn new() -> Self {
        Self {
            bindings: Vec::new(),
            open: Vec::new(),
            frames: vec![Frame { kind: FrameKind::Query, base: 0 }],
            globals: HashMap::new(),
            global_order: Vec::new(),
        }
    }

    fn frame(&self) -> Frame {
        self.frames.last().copied().unwrap_or(Frame { kind: FrameKind::Query, base: 0 })
    }

    /// Start translating an independent piece of code (function body, global initializer).
    /// Its bindings form new chains whose roots are the first column of a fresh tuple.
    pub fn push_frame(&mut self, kind: FrameKind) {
        self.frames.push(Frame { kind, base: self.open.len() });
    }

    pub fn pop_frame(&mut self) -> Result<(), Error> {
        let frame = self.frame();
        if self.open.len() > frame.base {
            return Err(Error::illegal_state("frame closed with open bindings"));
        }
        if self.frames.len() <= 1 {
            return Err(Error::illegal_state("pop_frame without pushed frame"));
        }
        self.frames.pop();
        Ok(())
    }

    /// Open a binding below the innermost open binding of the current frame.
    pub fn bind(&mut self, name: &str, ty: Option<SequenceType>) -> Arc<Slot> {
        let slot = Arc::new(Slot::new(name, ty));
        self.attach(slot.clone());
        slot
    }

    /// Open a binding for a slot created outside the table, e.g. a function parameter that
    /// had to exist before the function body is translated.
    pub fn attach(&mut self, slot: Arc<Slot>) {
        let frame = self.frame();
        let parent = self.open.get(frame.base..).and_then(<[usize]>::last).copied();
        trace!(name = slot.name(), depth = self.open.len() - frame.base, "bind");
        self.bindings.push(Binding { slot, parent, referenced: false, dead: false });
        self.open.push(self.bindings.len() - 1);
    }

    /// Close the most recent binding. An unreferenced binding is unlinked from its chain.
    pub fn unbind(&mut self) -> Result<Arc<Slot>, Error> {
        let frame = self.frame();
        if self.open.len() <= frame.base {
            return Err(Error::illegal_state("unbind without open binding"));
        }
        let index = self.open.pop().ok_or_else(|| Error::illegal_state("unbind without open binding"))?;
        let binding = &mut self.bindings[index];
        binding.dead = !binding.referenced;
        trace!(name = binding.slot.name(), dead = binding.dead, "unbind");
        Ok(binding.slot.clone())
    }

    /// Close the `count` most recent bindings.
    pub fn unbind_all(&mut self, count: usize) -> Result<(), Error> {
        for _ in 0..count {
            self.unbind()?;
        }
        Ok(())
    }

    fn lookup_local(&mut self, name: &str) -> Option<Arc<Slot>> {
        let base = self.frame().base;
        let index = self.open.get(base..)?.iter().rev().copied().find(|i| self.bindings[*i].slot.name() == name)?;
        let binding = &mut self.bindings[index];
        binding.referenced = true;
        Some(binding.slot.clone())
    }

    /// The open local binding `name`, marked as referenced.
    pub fn resolve_slot(&mut self, name: &str) -> Result<Arc<Slot>, Error> {
        let slot = self.lookup_local(name).ok_or_else(|| Error::undefined(name))?;
        trace!(name, "resolved local");
        Ok(slot)
    }

    /// Expression reading `name`: the innermost open binding of the current frame, else a
    /// default-context accessor, else a declared global.
    pub fn resolve(&mut self, name: &str) -> Result<ExprRef, Error> {
        if let Some(slot) = self.lookup_local(name) {
            trace!(name, "resolved local");
            return Ok(Arc::new(SlotRef { slot }));
        }
        if is_context_name(name) {
            return match self.frame().kind {
                FrameKind::Function => {
                    Err(Error::from_code(ErrorCode::XPDY0002, "the context item is absent in a function body"))
                }
                FrameKind::ContextItem => Err(Error::from_code(
                    ErrorCode::XQDY0054,
                    "the context item is referenced by its own initializer",
                )),
                FrameKind::Query => {
                    trace!(name, "resolved default context");
                    Ok(Arc::new(GlobalRef { var: self.context_global(name) }))
                }
            };
        }
        match self.globals.get(name) {
            Some(var) => {
                trace!(name, "resolved global");
                Ok(Arc::new(GlobalRef { var: var.clone() }))
            }
            None => Err(Error::undefined(name)),
        }
    }

    fn insert_global(&mut self, name: &str, source: GlobalSource, ty: Option<SequenceType>) -> Arc<GlobalVar> {
        let var = Arc::new(GlobalVar::new(name, NEXT_GLOBAL.fetch_add(1, Ordering::Relaxed), source, ty));
        self.globals.insert(name.to_string(), var.clone());
        self.global_order.push(var.clone());
        var
    }

    fn context_global(&mut self, name: &str) -> Arc<GlobalVar> {
        if let Some(var) = self.globals.get(name) {
            return var.clone();
        }
        let source = match name {
            CTX_POSITION => GlobalSource::ContextPosition,
            CTX_LAST => GlobalSource::ContextSize,
            _ => GlobalSource::ContextItem { external: true },
        };
        self.insert_global(name, source, None)
    }

    /// Declare a prolog variable.
    pub fn declare_global(
        &mut self,
        name: &str,
        external: bool,
        ty: Option<SequenceType>,
    ) -> Result<Arc<GlobalVar>, Error> {
        if self.globals.contains_key(name) {
            return Err(Error::duplicate(name));
        }
        Ok(self.insert_global(name, GlobalSource::Declared { external }, ty))
    }

    /// Declare the context item. Must happen before anything resolves `.`.
    pub fn declare_context_item(&mut self, external: bool, ty: Option<SequenceType>) -> Result<Arc<GlobalVar>, Error> {
        if self.globals.contains_key(CTX_ITEM) {
            return Err(Error::duplicate(CTX_ITEM));
        }
        Ok(self.insert_global(CTX_ITEM, GlobalSource::ContextItem { external }, ty))
    }

    /// Globals in declaration order, the default-context accessors included.
    pub fn globals(&self) -> &[Arc<GlobalVar>] {
        &self.global_order
    }

    /// Assign tuple positions to every live binding. All bindings must be closed.
    pub fn resolve_positions(&self) -> Result<(), Error> {
        if let Some(index) = self.open.last() {
            return Err(Error::illegal_state(format!("${} is still bound", self.bindings[*index].slot.name())));
        }
        let mut depth: Vec<usize> = Vec::with_capacity(self.bindings.len());
        for binding in &self.bindings {
            let d = binding.parent.map_or(0, |p| depth[p] + usize::from(!self.bindings[p].dead));
            depth.push(d);
            if !binding.dead {
                binding.slot.assign(d)?;
            }
        }
        trace!(bindings = self.bindings.len(), "positions resolved");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::context::QueryContextBuilder;
    use crate::runtime::tuple::Tuple;
    use crate::xdm::XdmItem;
    use proptest::prelude::*;

    #[test]
    fn unreferenced_bindings_take_no_column() {
        let mut table = VariableTable::new();
        let x = table.bind("x;0", None);
        let y = table.bind("y;1", None);
        table.resolve("y;1").unwrap();
        table.unbind().unwrap();
        table.unbind().unwrap();
        table.resolve_positions().unwrap();
        assert_eq!(x.position(), None);
        assert_eq!(y.position(), Some(0));
    }

    #[test]
    fn siblings_share_a_depth() {
        let mut table = VariableTable::new();
        let outer = table.bind("o;0", None);
        table.resolve("o;0").unwrap();
        let a = table.bind("a;1", None);
        table.resolve("a;1").unwrap();
        table.unbind().unwrap();
        let b = table.bind("b;2", None);
        table.resolve("b;2").unwrap();
        table.unbind().unwrap();
        table.unbind().unwrap();
        table.resolve_positions().unwrap();
        assert_eq!(outer.position(), Some(0));
        assert_eq!((a.position(), b.position()), (Some(1), Some(1)));
    }

    #[test]
    fn innermost_binding_wins() {
        let mut table = VariableTable::new();
        let outer = table.bind("fs:dot", None);
        let inner = table.bind("fs:dot", None);
        table.resolve("fs:dot").unwrap();
        table.unbind_all(2).unwrap();
        table.resolve_positions().unwrap();
        assert!(!outer.is_live());
        assert_eq!(inner.position(), Some(0));
    }

    #[test]
    fn frames_start_new_chains() {
        let mut table = VariableTable::new();
        let outer = table.bind("o;0", None);
        table.resolve("o;0").unwrap();
        table.push_frame(FrameKind::Function);
        let param = table.bind("p;1", None);
        table.resolve("p;1").unwrap();
        assert_eq!(table.resolve("o;0").unwrap_err().code, ErrorCode::XPST0008);
        assert_eq!(table.pop_frame().unwrap_err().code, ErrorCode::BIST0001);
        table.unbind().unwrap();
        table.pop_frame().unwrap();
        table.unbind().unwrap();
        table.resolve_positions().unwrap();
        assert_eq!((outer.position(), param.position()), (Some(0), Some(0)));
    }

    #[test]
    fn unbalanced_use_is_an_internal_error() {
        let mut table = VariableTable::new();
        assert_eq!(table.unbind().unwrap_err().code, ErrorCode::BIST0001);
        table.bind("x;0", None);
        assert_eq!(table.resolve_positions().unwrap_err().code, ErrorCode::BIST0001);
        table.push_frame(FrameKind::Query);
        assert_eq!(table.unbind().unwrap_err().code, ErrorCode::BIST0001);
    }

    #[test]
    fn default_context_depends_on_the_frame() {
        let mut table = VariableTable::new();
        table.push_frame(FrameKind::ContextItem);
        assert_eq!(table.resolve(CTX_ITEM).unwrap_err().code, ErrorCode::XQDY0054);
        table.pop_frame().unwrap();
        table.push_frame(FrameKind::Function);
        assert_eq!(table.resolve(CTX_POSITION).unwrap_err().code, ErrorCode::XPDY0002);
        table.pop_frame().unwrap();

        let dot = table.resolve(CTX_ITEM).unwrap();
        let last = table.resolve(CTX_LAST).unwrap();
        let ctx = QueryContextBuilder::new().with_context_item(5i64).with_focus(2, 9).build();
        assert_eq!(dot.evaluate(&ctx, &Tuple::new()).unwrap(), vec![XdmItem::from(5i64)]);
        assert_eq!(last.evaluate(&ctx, &Tuple::new()).unwrap(), vec![XdmItem::from(9i64)]);
        assert_eq!(table.globals().len(), 2);
    }

    #[test]
    fn globals_resolve_after_locals() {
        let mut table = VariableTable::new();
        table.declare_global("g", true, None).unwrap();
        assert_eq!(table.declare_global("g", false, None).unwrap_err().code, ErrorCode::XQST0049);
        let ctx = QueryContextBuilder::new().with_variable("g", vec![XdmItem::from("v")]).build();
        let g = table.resolve("g").unwrap();
        assert_eq!(g.evaluate(&ctx, &Tuple::new()).unwrap(), vec![XdmItem::from("v")]);
        assert_eq!(table.resolve("nope").unwrap_err().code, ErrorCode::XPST0008);
    }

    #[derive(Debug, Clone)]
    enum Op {
        Bind,
        Reference(usize),
        Unbind,
    }

    fn ops() -> impl Strategy<Value = Vec<Op>> {
        proptest::collection::vec(
            prop_oneof![Just(Op::Bind), (0usize..8).prop_map(Op::Reference), Just(Op::Unbind)],
            0..40,
        )
    }

    proptest! {
        #[test]
        fn positions_count_live_ancestors(ops in ops()) {
            let mut table = VariableTable::new();
            // (slot, parent, referenced) per binding, and the open stack
            let mut model: Vec<(Arc<Slot>, Option<usize>, bool)> = Vec::new();
            let mut open: Vec<usize> = Vec::new();
            for op in ops {
                match op {
                    Op::Bind => {
                        let name = format!("v;{}", model.len());
                        let slot = table.bind(&name, None);
                        model.push((slot, open.last().copied(), false));
                        open.push(model.len() - 1);
                    }
                    Op::Reference(k) if !open.is_empty() => {
                        let index = open[k % open.len()];
                        let name = model[index].0.name().to_string();
                        table.resolve(&name).unwrap();
                        model[index].2 = true;
                    }
                    Op::Unbind if !open.is_empty() => {
                        table.unbind().unwrap();
                        open.pop();
                    }
                    _ => {}
                }
            }
            table.unbind_all(open.len()).unwrap();
            table.resolve_positions().unwrap();
            for (slot, parent, referenced) in &model {
                prop_assert_eq!(slot.is_live(), *referenced);
                if *referenced {
                    let mut live_ancestors = 0;
                    let mut p = *parent;
                    while let Some(i) = p {
                        live_ancestors += usize::from(model[i].2);
                        p = model[i].1;
                    }
                    prop_assert_eq!(slot.position(), Some(live_ancestors));
                }
            }
        }
    }
}
