use crate::error::{Error, ErrorCode};
use crate::store::Store;
use crate::update::{UpdateList, UpdateOp};
use crate::xdm::{XdmItem, XdmSequence};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

/// Dynamic context of one query execution.
///
/// Holds the externally supplied focus and variable values, the store, the pending update
/// list and the lazily computed values of declared (global) variables. Expressions and
/// cursors only read from it; the two mutable parts sit behind locks so a context can be
/// shared by reference throughout one evaluation.
pub struct QueryContext {
    context_item: Option<XdmItem>,
    context_position: i64,
    context_size: i64,
    externals: HashMap<String, XdmSequence>,
    store: Option<Arc<dyn Store>>,
    updates: Mutex<UpdateList>,
    globals: Mutex<HashMap<usize, XdmSequence>>,
}

impl Default for QueryContext {
    fn default() -> Self {
        Self {
            context_item: None,
            context_position: 1,
            context_size: 1,
            externals: HashMap::new(),
            store: None,
            updates: Mutex::new(UpdateList::new()),
            globals: Mutex::new(HashMap::new()),
        }
    }
}

impl QueryContext {
    pub fn context_item(&self) -> Option<&XdmItem> {
        self.context_item.as_ref()
    }

    pub fn context_position(&self) -> i64 {
        self.context_position
    }

    pub fn context_size(&self) -> i64 {
        self.context_size
    }

    pub fn external(&self, name: &str) -> Option<&XdmSequence> {
        self.externals.get(name)
    }

    pub fn store(&self) -> Result<&Arc<dyn Store>, Error> {
        self.store.as_ref().ok_or_else(|| Error::from_code(ErrorCode::FODC0002, "no store available"))
    }

    pub fn push_update(&self, op: UpdateOp) {
        self.updates.lock().unwrap_or_else(PoisonError::into_inner).append(op);
    }

    pub fn pending_updates(&self) -> usize {
        self.updates.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// Remove and return all pending updates.
    pub fn take_updates(&self) -> UpdateList {
        std::mem::take(&mut *self.updates.lock().unwrap_or_else(PoisonError::into_inner))
    }

    /// Value of global `index`, computed by `init` on first access. The lock is not held while
    /// `init` runs, so initializers may read other globals.
    pub fn global(&self, index: usize, init: impl FnOnce() -> Result<XdmSequence, Error>) -> Result<XdmSequence, Error> {
        if let Some(v) = self.globals.lock().unwrap_or_else(PoisonError::into_inner).get(&index) {
            return Ok(v.clone());
        }
        let value = init()?;
        let mut globals = self.globals.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(globals.entry(index).or_insert(value).clone())
    }
}

/// Builder for [`QueryContext`].
#[derive(Default)]
pub struct QueryContextBuilder {
    ctx: QueryContext,
}

impl QueryContextBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_context_item(mut self, item: impl Into<XdmItem>) -> Self {
        self.ctx.context_item = Some(item.into());
        self
    }

    /// Position and size of the initial focus (both default to 1).
    pub fn with_focus(mut self, position: i64, size: i64) -> Self {
        self.ctx.context_position = position;
        self.ctx.context_size = size;
        self
    }

    /// Value of an external variable, keyed by its name as written in the query.
    pub fn with_variable(mut self, name: impl Into<String>, value: impl Into<XdmSequence>) -> Self {
        self.ctx.externals.insert(name.into(), value.into());
        self
    }

    pub fn with_store(mut self, store: Arc<dyn Store>) -> Self {
        self.ctx.store = Some(store);
        self
    }

    pub fn build(self) -> QueryContext {
        self.ctx
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    #[test]
    fn globals_are_computed_once() {
        let ctx = QueryContext::default();
        let calls = Cell::new(0);
        let init = || {
            calls.set(calls.get() + 1);
            Ok(vec![XdmItem::from(42i64)])
        };
        assert_eq!(ctx.global(0, init).unwrap(), vec![XdmItem::from(42i64)]);
        assert_eq!(ctx.global(0, init).unwrap(), vec![XdmItem::from(42i64)]);
        assert_eq!(calls.get(), 1);
    }

    #[test]
    fn builder_sets_focus_and_variables() {
        let ctx = QueryContextBuilder::new()
            .with_context_item(7i64)
            .with_focus(2, 5)
            .with_variable("x", vec![XdmItem::from("a")])
            .build();
        assert_eq!(ctx.context_item(), Some(&XdmItem::from(7i64)));
        assert_eq!((ctx.context_position(), ctx.context_size()), (2, 5));
        assert_eq!(ctx.external("x").map(Vec::len), Some(1));
        assert_eq!(ctx.store().err().map(|e| e.code), Some(ErrorCode::FODC0002));
    }
}
