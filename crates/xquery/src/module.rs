//! Compiled modules and the registry library modules are imported from.

use crate::error::Error;
use crate::model::QName;
use crate::runtime::ExprRef;
use crate::runtime::functions::UserFunction;
use std::collections::HashMap;
use std::sync::{Arc, LazyLock, Mutex, PoisonError};
use tracing::debug;

#[derive(Debug)]
pub enum ModuleKind {
    Main { body: ExprRef },
    Library { namespace: String },
}

/// Result of translating one main or library module.
#[derive(Debug)]
pub struct Module {
    kind: ModuleKind,
    functions: HashMap<(QName, usize), Arc<UserFunction>>,
}

impl Module {
    pub fn new(kind: ModuleKind, functions: impl IntoIterator<Item = Arc<UserFunction>>) -> Self {
        let functions = functions.into_iter().map(|f| ((f.name().clone(), f.arity()), f)).collect();
        Self { kind, functions }
    }

    pub fn kind(&self) -> &ModuleKind {
        &self.kind
    }

    /// Query body of a main module.
    pub fn body(&self) -> Option<&ExprRef> {
        match &self.kind {
            ModuleKind::Main { body } => Some(body),
            ModuleKind::Library { .. } => None,
        }
    }

    /// Target namespace of a library module.
    pub fn namespace(&self) -> Option<&str> {
        match &self.kind {
            ModuleKind::Library { namespace } => Some(namespace),
            ModuleKind::Main { .. } => None,
        }
    }

    pub fn function(&self, name: &QName, arity: usize) -> Option<&Arc<UserFunction>> {
        self.functions.get(&(name.clone(), arity))
    }

    pub fn functions(&self) -> impl Iterator<Item = &Arc<UserFunction>> {
        self.functions.values()
    }

    /// Whether running the body may produce pending updates.
    pub fn is_updating(&self) -> bool {
        self.body().is_some_and(|b| b.is_updating())
    }
}

/// Where library modules are registered after compilation and looked up by imports.
pub trait ModuleResolver: Send + Sync {
    fn register(&self, namespace: &str, module: Arc<Module>) -> Result<(), Error>;
    fn resolve(&self, namespace: &str) -> Option<Arc<Module>>;
}

static SHARED: LazyLock<Arc<BaseResolver>> = LazyLock::new(|| Arc::new(BaseResolver::new()));

/// In-memory resolver. A later registration for a namespace replaces the earlier one.
#[derive(Debug, Default)]
pub struct BaseResolver {
    modules: Mutex<HashMap<String, Arc<Module>>>,
}

impl BaseResolver {
    pub fn new() -> Self {
        Self::default()
    }

    /// The process-wide resolver used by compile chains that were not given their own.
    pub fn shared() -> Arc<BaseResolver> {
        SHARED.clone()
    }

    pub fn len(&self) -> usize {
        self.modules.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl ModuleResolver for BaseResolver {
    fn register(&self, namespace: &str, module: Arc<Module>) -> Result<(), Error> {
        if module.namespace() != Some(namespace) {
            return Err(Error::illegal_state(format!("module registered under foreign namespace {namespace}")));
        }
        debug!(namespace, functions = module.functions.len(), "registered library module");
        self.modules.lock().unwrap_or_else(PoisonError::into_inner).insert(namespace.to_string(), module);
        Ok(())
    }

    fn resolve(&self, namespace: &str) -> Option<Arc<Module>> {
        self.modules.lock().unwrap_or_else(PoisonError::into_inner).get(namespace).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorCode;
    use crate::runtime::expr::Literal;

    fn library(ns: &str) -> Arc<Module> {
        let f = Arc::new(UserFunction::new(QName::new(Some(ns), Some("m"), "f"), Vec::new(), None, false));
        Arc::new(Module::new(ModuleKind::Library { namespace: ns.to_string() }, [f]))
    }

    #[test]
    fn register_and_resolve() {
        let resolver = BaseResolver::new();
        assert!(resolver.resolve("urn:a").is_none());
        resolver.register("urn:a", library("urn:a")).unwrap();
        let module = resolver.resolve("urn:a").unwrap();
        assert!(module.function(&QName::new(Some("urn:a"), None, "f"), 0).is_some());
        assert!(module.function(&QName::new(Some("urn:a"), None, "f"), 1).is_none());
        assert_eq!(resolver.len(), 1);
    }

    #[test]
    fn namespace_must_match() {
        let resolver = BaseResolver::new();
        let err = resolver.register("urn:b", library("urn:a")).unwrap_err();
        assert_eq!(err.code, ErrorCode::BIST0001);
        assert!(resolver.is_empty());
    }

    #[test]
    fn main_modules_have_a_body() {
        let main = Module::new(ModuleKind::Main { body: Arc::new(Literal::empty()) }, []);
        assert!(main.body().is_some());
        assert!(main.namespace().is_none());
        assert!(!main.is_updating());
    }
}
