//! Function registry, built-in function families and user-declared functions.
//!
//! Registration conventions:
//! - One registration per function name using an arity range; the implementation dispatches
//!   on `args.len()` where parameters are optional.
//! - Truly variadic functions (`fn:concat`) use `register_ns_variadic`.
//! - Calls are resolved at translation time, so a missing function or arity is a static error.

mod aggregate;
mod boolean;
mod environment;
mod sequence;
mod string;

use super::context::QueryContext;
use super::tuple::Tuple;
use super::types::SequenceType;
use super::variable::Slot;
use super::{Expr, ExprRef};
use crate::consts::FNS;
use crate::error::Error;
use crate::model::QName;
use crate::xdm::XdmSequence;
use core::fmt;
use std::collections::HashMap;
use std::sync::{Arc, OnceLock};

pub type Arity = usize;

/// Error type returned by function resolution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResolveError {
    /// No function with the (possibly default-namespace resolved) name exists.
    Unknown(QName),
    /// Function exists, but not for the requested arity.
    WrongArity { name: QName, available: Vec<Arity> },
}

impl ResolveError {
    pub fn into_error(self) -> Error {
        match self {
            ResolveError::Unknown(name) => {
                Error::from_code(crate::error::ErrorCode::XPST0017, format!("unknown function {name}"))
            }
            ResolveError::WrongArity { name, available } => Error::from_code(
                crate::error::ErrorCode::XPST0017,
                format!("function {name} takes {available:?} arguments"),
            ),
        }
    }
}

/// What a built-in sees of the dynamic context.
pub struct CallCtx<'a> {
    pub query: &'a QueryContext,
}

pub type FunctionImpl = Arc<dyn Fn(&CallCtx, &[XdmSequence]) -> Result<XdmSequence, Error> + Send + Sync>;

pub type FunctionOverload = (Arity, Option<Arity>, FunctionImpl);

#[derive(Default, Clone)]
pub struct FunctionRegistry {
    // Each entry holds (min_arity, max_arity, impl); max `None` means variadic. Entries are
    // kept ordered so the most specific overload (higher min, then smaller max) wins.
    fns: HashMap<QName, Vec<FunctionOverload>>,
}

impl fmt::Debug for FunctionRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FunctionRegistry").field("functions", &self.fns.len()).finish()
    }
}

impl FunctionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, name: QName, arity: Arity, func: FunctionImpl) {
        self.register_range(name, arity, Some(arity), func);
    }

    pub fn register_range(&mut self, name: QName, min_arity: Arity, max_arity: Option<Arity>, func: FunctionImpl) {
        let overloads = self.fns.entry(name).or_default();
        overloads.push((min_arity, max_arity, func));
        overloads.sort_by(|a, b| b.0.cmp(&a.0).then_with(|| a.1.unwrap_or(Arity::MAX).cmp(&b.1.unwrap_or(Arity::MAX))));
    }

    pub fn register_variadic(&mut self, name: QName, min_arity: Arity, func: FunctionImpl) {
        self.register_range(name, min_arity, None, func);
    }

    pub fn register_ns<F>(&mut self, ns_uri: &str, local: &str, arity: Arity, f: F)
    where
        F: 'static + Send + Sync + Fn(&CallCtx, &[XdmSequence]) -> Result<XdmSequence, Error>,
    {
        self.register(QName::new(Some(ns_uri), None, local), arity, Arc::new(f));
    }

    pub fn register_ns_range<F>(&mut self, ns_uri: &str, local: &str, min_arity: Arity, max_arity: Option<Arity>, f: F)
    where
        F: 'static + Send + Sync + Fn(&CallCtx, &[XdmSequence]) -> Result<XdmSequence, Error>,
    {
        self.register_range(QName::new(Some(ns_uri), None, local), min_arity, max_arity, Arc::new(f));
    }

    pub fn register_ns_variadic<F>(&mut self, ns_uri: &str, local: &str, min_arity: Arity, f: F)
    where
        F: 'static + Send + Sync + Fn(&CallCtx, &[XdmSequence]) -> Result<XdmSequence, Error>,
    {
        self.register_variadic(QName::new(Some(ns_uri), None, local), min_arity, Arc::new(f));
    }

    /// Register a function without a namespace.
    pub fn register_local<F>(&mut self, local: &str, arity: Arity, f: F)
    where
        F: 'static + Send + Sync + Fn(&CallCtx, &[XdmSequence]) -> Result<XdmSequence, Error>,
    {
        self.register(QName::local(local), arity, Arc::new(f));
    }

    /// Resolve by name and arity. A name without namespace is looked up as given first (exact
    /// arity only) and then in `default_ns`.
    pub fn resolve(&self, name: &QName, arity: Arity, default_ns: Option<&str>) -> Result<&FunctionImpl, ResolveError> {
        let effective = match (&name.ns_uri, default_ns) {
            (None, Some(ns)) => QName::new(Some(ns), name.prefix.as_deref(), &name.local),
            _ => name.clone(),
        };
        if let Some(candidates) = self.fns.get(name)
            && let Some((_, _, f)) = candidates.iter().find(|(min, max, _)| *min == arity && *max == Some(arity))
        {
            return Ok(f);
        }
        let Some(candidates) = self.fns.get(&effective) else {
            return Err(ResolveError::Unknown(effective));
        };
        if let Some((_, _, f)) = candidates.iter().find(|(min, max, _)| arity >= *min && max.is_none_or(|m| arity <= m)) {
            return Ok(f);
        }
        let mut available: Vec<Arity> =
            candidates.iter().filter_map(|(min, max, _)| max.map(|m| *min..=m)).flatten().collect();
        available.sort_unstable();
        available.dedup();
        Err(ResolveError::WrongArity { name: effective, available })
    }

    pub fn contains(&self, name: &QName) -> bool {
        self.fns.contains_key(name)
    }
}

/// The built-in core of the `fn` namespace. Position and size of the focus are compiled to
/// variable references and are not registered here.
pub fn default_function_registry() -> FunctionRegistry {
    let mut reg = FunctionRegistry::new();

    reg.register_ns(FNS, "true", 0, boolean::fn_true);
    reg.register_ns(FNS, "false", 0, boolean::fn_false);
    reg.register_ns(FNS, "not", 1, boolean::fn_not);
    reg.register_ns(FNS, "boolean", 1, boolean::fn_boolean);

    reg.register_ns(FNS, "empty", 1, sequence::fn_empty);
    reg.register_ns(FNS, "exists", 1, sequence::fn_exists);
    reg.register_ns(FNS, "count", 1, sequence::fn_count);
    reg.register_ns(FNS, "data", 1, sequence::fn_data);
    reg.register_ns(FNS, "reverse", 1, sequence::fn_reverse);
    reg.register_ns_range(FNS, "distinct-values", 1, Some(2), sequence::fn_distinct_values);

    reg.register_ns_range(FNS, "sum", 1, Some(2), aggregate::fn_sum);
    reg.register_ns(FNS, "avg", 1, aggregate::fn_avg);
    reg.register_ns_range(FNS, "min", 1, Some(2), aggregate::fn_min);
    reg.register_ns_range(FNS, "max", 1, Some(2), aggregate::fn_max);

    reg.register_ns(FNS, "string", 1, string::fn_string);
    reg.register_ns(FNS, "string-length", 1, string::fn_string_length);
    reg.register_ns_variadic(FNS, "concat", 2, string::fn_concat);

    reg.register_ns_range(FNS, "error", 0, Some(3), environment::fn_error);
    reg.register_ns(FNS, "collection", 1, environment::fn_collection);
    reg
}

/// Call of a built-in resolved at translation time.
pub struct FunctionCall {
    pub name: QName,
    pub func: FunctionImpl,
    pub args: Vec<ExprRef>,
}

impl fmt::Debug for FunctionCall {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FunctionCall").field("name", &self.name).field("args", &self.args).finish()
    }
}

impl Expr for FunctionCall {
    fn evaluate(&self, ctx: &QueryContext, tuple: &Tuple) -> Result<XdmSequence, Error> {
        let args = self.args.iter().map(|a| a.evaluate(ctx, tuple)).collect::<Result<Vec<_>, _>>()?;
        (self.func)(&CallCtx { query: ctx }, &args)
    }
}

/// A function declared in a prolog. It is registered before its body is translated so the
/// body can call itself.
#[derive(Debug)]
pub struct UserFunction {
    name: QName,
    params: Vec<Arc<Slot>>,
    ret: Option<SequenceType>,
    updating: bool,
    body: OnceLock<ExprRef>,
}

impl UserFunction {
    pub fn new(name: QName, params: Vec<Arc<Slot>>, ret: Option<SequenceType>, updating: bool) -> Self {
        Self { name, params, ret, updating, body: OnceLock::new() }
    }

    pub fn name(&self) -> &QName {
        &self.name
    }

    pub fn arity(&self) -> usize {
        self.params.len()
    }

    pub fn is_updating(&self) -> bool {
        self.updating
    }

    pub fn set_body(&self, body: ExprRef) -> Result<(), Error> {
        self.body.set(body).map_err(|_| Error::illegal_state(format!("function {} defined twice", self.name)))
    }

    /// Evaluate the body with `args` bound to the parameters. Parameters are the roots of the
    /// body's tuple; unused ones take no column.
    pub fn invoke(&self, ctx: &QueryContext, args: Vec<XdmSequence>) -> Result<XdmSequence, Error> {
        let body = self.body.get().ok_or_else(|| Error::illegal_state(format!("function {} has no body", self.name)))?;
        let mut tuple = Tuple::new();
        for (param, arg) in self.params.iter().zip(args) {
            param.bind_checked(&mut tuple, arg)?;
        }
        let value = body.evaluate(ctx, &tuple)?;
        match &self.ret {
            Some(ty) => ty.check(value, &format!("result of {}", self.name)),
            None => Ok(value),
        }
    }
}

#[derive(Debug)]
pub struct UserCall {
    pub func: Arc<UserFunction>,
    pub args: Vec<ExprRef>,
}

impl Expr for UserCall {
    fn evaluate(&self, ctx: &QueryContext, tuple: &Tuple) -> Result<XdmSequence, Error> {
        let args = self.args.iter().map(|a| a.evaluate(ctx, tuple)).collect::<Result<Vec<_>, _>>()?;
        self.func.invoke(ctx, args)
    }

    fn is_updating(&self) -> bool {
        self.func.is_updating()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorCode;
    use crate::runtime::expr::Literal;
    use crate::runtime::variable::SlotRef;
    use crate::xdm::XdmItem;

    fn fns(local: &str) -> QName {
        QName::new(Some(FNS), Some("fn"), local)
    }

    fn call(local: &str, args: Vec<XdmSequence>) -> Result<XdmSequence, Error> {
        let reg = default_function_registry();
        let f = reg.resolve(&fns(local), args.len(), None).map_err(ResolveError::into_error)?;
        f(&CallCtx { query: &QueryContext::default() }, &args)
    }

    #[test]
    fn resolution_reports_arity() {
        let reg = default_function_registry();
        assert!(reg.resolve(&QName::local("count"), 1, Some(FNS)).is_ok());
        match reg.resolve(&QName::local("count"), 2, Some(FNS)) {
            Err(ResolveError::WrongArity { available, .. }) => assert_eq!(available, vec![1]),
            _ => panic!("expected wrong arity"),
        }
        assert!(matches!(reg.resolve(&QName::local("nope"), 0, Some(FNS)), Err(ResolveError::Unknown(_))));
        assert!(reg.resolve(&fns("concat"), 7, None).is_ok());
        assert_eq!(
            reg.resolve(&fns("concat"), 1, None).map(|_| ()).map_err(ResolveError::into_error).unwrap_err().code,
            ErrorCode::XPST0017
        );
    }

    #[test]
    fn local_registrations_win_for_exact_arity() {
        let mut reg = default_function_registry();
        reg.register_local("count", 1, |_ctx, _args| Ok(vec![XdmItem::from("mine")]));
        let f = reg.resolve(&QName::local("count"), 1, Some(FNS)).unwrap();
        let out = f(&CallCtx { query: &QueryContext::default() }, &[vec![]]).unwrap();
        assert_eq!(out, vec![XdmItem::from("mine")]);
    }

    #[test]
    fn builtins_smoke() {
        assert_eq!(call("not", vec![vec![]]).unwrap(), vec![XdmItem::from(true)]);
        assert_eq!(call("count", vec![vec![XdmItem::from(1i64); 3]]).unwrap(), vec![XdmItem::from(3i64)]);
        assert_eq!(
            call("concat", vec![vec![XdmItem::from("a")], vec![], vec![XdmItem::from(1i64)]]).unwrap(),
            vec![XdmItem::from("a1")]
        );
    }

    #[test]
    fn user_function_binds_parameters() {
        let x = Arc::new(Slot::new("x;0", None));
        x.assign(0).unwrap();
        let unused = Arc::new(Slot::new("y;0", None));
        let f = Arc::new(UserFunction::new(QName::local("id"), vec![x.clone(), unused], None, false));
        f.set_body(Arc::new(SlotRef { slot: x })).unwrap();
        let call = UserCall {
            func: f.clone(),
            args: vec![Arc::new(Literal::new(vec![XdmItem::from(4i64)])), Arc::new(Literal::empty())],
        };
        assert_eq!(call.evaluate(&QueryContext::default(), &Tuple::new()).unwrap(), vec![XdmItem::from(4i64)]);
        assert_eq!(f.set_body(Arc::new(Literal::empty())).unwrap_err().code, ErrorCode::BIST0001);
    }
}
