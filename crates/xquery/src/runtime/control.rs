//! Binding and branching expressions: quantifiers, switch, typeswitch and try/catch.

use super::compare::atomic_equal;
use super::context::QueryContext;
use super::tuple::Tuple;
use super::types::SequenceType;
use super::variable::Slot;
use super::{Expr, ExprRef};
use crate::error::{Error, ErrorCode};
use crate::model::QName;
use crate::xdm::{XdmAtomicValue, XdmItem, XdmSequence, atomize_opt, effective_boolean_value};
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Quantifier {
    Some,
    Every,
}

/// `some|every $v in domain (, $w in domain)* satisfies test`
#[derive(Debug)]
pub struct Quantified {
    pub quantifier: Quantifier,
    pub bindings: Vec<(Arc<Slot>, ExprRef)>,
    pub satisfies: ExprRef,
}

impl Quantified {
    /// Whether the quantifier is decided at this binding depth: `some` stops at the first
    /// satisfying combination, `every` at the first failing one.
    fn search(&self, ctx: &QueryContext, tuple: &Tuple, depth: usize) -> Result<bool, Error> {
        let Some((slot, domain)) = self.bindings.get(depth) else {
            let holds = effective_boolean_value(&self.satisfies.evaluate(ctx, tuple)?)?;
            return Ok(holds == (self.quantifier == Quantifier::Some));
        };
        for item in domain.evaluate(ctx, tuple)? {
            let mut next = tuple.clone();
            slot.bind_checked(&mut next, vec![item])?;
            if self.search(ctx, &next, depth + 1)? {
                return Ok(true);
            }
        }
        Ok(false)
    }
}

impl Expr for Quantified {
    fn evaluate(&self, ctx: &QueryContext, tuple: &Tuple) -> Result<XdmSequence, Error> {
        let decided = self.search(ctx, tuple, 0)?;
        let result = match self.quantifier {
            Quantifier::Some => decided,
            Quantifier::Every => !decided,
        };
        Ok(vec![XdmItem::from(result)])
    }
}

#[derive(Debug)]
pub struct SwitchCase {
    pub operands: Vec<ExprRef>,
    pub ret: ExprRef,
}

/// `switch (operand) case ... return ... default return ...`
#[derive(Debug)]
pub struct Switch {
    pub operand: ExprRef,
    pub cases: Vec<SwitchCase>,
    pub default: ExprRef,
}

fn switch_matches(a: Option<&XdmAtomicValue>, b: Option<&XdmAtomicValue>) -> bool {
    match (a, b) {
        (None, None) => true,
        (Some(a), Some(b)) => atomic_equal(a, b),
        _ => false,
    }
}

impl Expr for Switch {
    fn evaluate(&self, ctx: &QueryContext, tuple: &Tuple) -> Result<XdmSequence, Error> {
        let operand = atomize_opt(&self.operand.evaluate(ctx, tuple)?)?;
        for case in &self.cases {
            for candidate in &case.operands {
                let candidate = atomize_opt(&candidate.evaluate(ctx, tuple)?)?;
                if switch_matches(operand.as_ref(), candidate.as_ref()) {
                    return case.ret.evaluate(ctx, tuple);
                }
            }
        }
        self.default.evaluate(ctx, tuple)
    }

    fn is_updating(&self) -> bool {
        self.default.is_updating() || self.cases.iter().any(|c| c.ret.is_updating())
    }
}

/// One `case` of a typeswitch; the default case has no types.
#[derive(Debug)]
pub struct TypeCase {
    pub types: Vec<SequenceType>,
    pub var: Option<Arc<Slot>>,
    pub ret: ExprRef,
}

impl TypeCase {
    fn evaluate(&self, ctx: &QueryContext, tuple: &Tuple, value: XdmSequence) -> Result<XdmSequence, Error> {
        match &self.var {
            Some(slot) if slot.is_live() => {
                let mut next = tuple.clone();
                slot.bind(&mut next, Some(value))?;
                self.ret.evaluate(ctx, &next)
            }
            _ => self.ret.evaluate(ctx, tuple),
        }
    }
}

#[derive(Debug)]
pub struct TypeSwitch {
    pub operand: ExprRef,
    pub cases: Vec<TypeCase>,
    pub default: TypeCase,
}

impl Expr for TypeSwitch {
    fn evaluate(&self, ctx: &QueryContext, tuple: &Tuple) -> Result<XdmSequence, Error> {
        let value = self.operand.evaluate(ctx, tuple)?;
        let case = self.cases.iter().find(|c| c.types.iter().any(|t| t.matches(&value))).unwrap_or(&self.default);
        case.evaluate(ctx, tuple, value)
    }

    fn is_updating(&self) -> bool {
        self.default.ret.is_updating() || self.cases.iter().any(|c| c.ret.is_updating())
    }
}

/// Name test of a `catch` clause.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ErrorTest {
    Any,
    Name(QName),
    /// `*:local`
    Local(String),
    /// `prefix:*`, resolved to its namespace
    Namespace(String),
}

impl ErrorTest {
    pub fn matches(&self, code: &QName) -> bool {
        match self {
            ErrorTest::Any => true,
            ErrorTest::Name(name) => name == code,
            ErrorTest::Local(local) => &*code.local == local.as_str(),
            ErrorTest::Namespace(ns) => code.ns_uri.as_deref() == Some(ns.as_str()),
        }
    }
}

#[derive(Debug)]
pub struct CatchClause {
    pub tests: Vec<ErrorTest>,
    /// `$code`, `$description`, `$value`
    pub vars: [Option<Arc<Slot>>; 3],
    pub handler: ExprRef,
}

impl CatchClause {
    fn handle(&self, ctx: &QueryContext, tuple: &Tuple, err: Error) -> Result<XdmSequence, Error> {
        let columns = [
            vec![XdmItem::Atomic(XdmAtomicValue::QName(err.code_qname()))],
            vec![XdmItem::from(err.message.as_str())],
            err.value.unwrap_or_default(),
        ];
        let mut next = tuple.clone();
        for (slot, value) in self.vars.iter().zip(columns) {
            if let Some(slot) = slot {
                slot.bind(&mut next, Some(value))?;
            }
        }
        self.handler.evaluate(ctx, &next)
    }
}

/// `try { body } catch tests { handler }`. Internal framework errors are never caught.
#[derive(Debug)]
pub struct TryCatch {
    pub body: ExprRef,
    pub clauses: Vec<CatchClause>,
}

impl Expr for TryCatch {
    fn evaluate(&self, ctx: &QueryContext, tuple: &Tuple) -> Result<XdmSequence, Error> {
        let err = match self.body.evaluate(ctx, tuple) {
            Ok(value) => return Ok(value),
            Err(err) if err.code == ErrorCode::BIST0001 => return Err(err),
            Err(err) => err,
        };
        let code = err.code_qname();
        match self.clauses.iter().find(|c| c.tests.iter().any(|t| t.matches(&code))) {
            Some(clause) => clause.handle(ctx, tuple, err),
            None => Err(err),
        }
    }

    fn is_updating(&self) -> bool {
        self.body.is_updating() || self.clauses.iter().any(|c| c.handler.is_updating())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::consts::ERR_NS;
    use crate::runtime::expr::{Literal, Sequence};
    use crate::runtime::types::{AtomicType, Occurrence};
    use crate::runtime::variable::SlotRef;

    fn lit(items: Vec<XdmItem>) -> ExprRef {
        Arc::new(Literal::new(items))
    }

    fn slot(name: &str, position: usize) -> Arc<Slot> {
        let slot = Arc::new(Slot::new(name, None));
        slot.assign(position).unwrap();
        slot
    }

    #[derive(Debug)]
    struct Fail(Error);

    impl Expr for Fail {
        fn evaluate(&self, _ctx: &QueryContext, _tuple: &Tuple) -> Result<XdmSequence, Error> {
            Err(self.0.clone())
        }
    }

    #[derive(Debug)]
    struct GreaterThan(Arc<Slot>, i64);

    impl Expr for GreaterThan {
        fn evaluate(&self, _ctx: &QueryContext, tuple: &Tuple) -> Result<XdmSequence, Error> {
            let v = self.0.read(tuple)?;
            Ok(vec![XdmItem::from(matches!(v.as_slice(), [XdmItem::Atomic(XdmAtomicValue::Integer(i))] if *i > self.1))])
        }
    }

    #[test]
    fn quantifiers() {
        let x = slot("x", 0);
        let domain = lit((1..=3).map(XdmItem::from).collect());
        let ctx = QueryContext::default();
        let some = Quantified {
            quantifier: Quantifier::Some,
            bindings: vec![(x.clone(), domain.clone())],
            satisfies: Arc::new(GreaterThan(x.clone(), 2)),
        };
        assert_eq!(some.evaluate(&ctx, &Tuple::new()).unwrap(), vec![XdmItem::from(true)]);
        let every = Quantified {
            quantifier: Quantifier::Every,
            bindings: vec![(x.clone(), domain)],
            satisfies: Arc::new(GreaterThan(x.clone(), 2)),
        };
        assert_eq!(every.evaluate(&ctx, &Tuple::new()).unwrap(), vec![XdmItem::from(false)]);
        let vacuous = Quantified {
            quantifier: Quantifier::Every,
            bindings: vec![(x.clone(), lit(vec![]))],
            satisfies: Arc::new(GreaterThan(x, 2)),
        };
        assert_eq!(vacuous.evaluate(&ctx, &Tuple::new()).unwrap(), vec![XdmItem::from(true)]);
    }

    #[test]
    fn switch_picks_first_match() {
        let switch = Switch {
            operand: lit(vec![XdmItem::from(2i64)]),
            cases: vec![
                SwitchCase { operands: vec![lit(vec![XdmItem::from(1i64)])], ret: lit(vec![XdmItem::from("one")]) },
                SwitchCase {
                    operands: vec![lit(vec![]), lit(vec![XdmItem::from(2i64)])],
                    ret: lit(vec![XdmItem::from("two")]),
                },
            ],
            default: lit(vec![XdmItem::from("other")]),
        };
        assert_eq!(switch.evaluate(&QueryContext::default(), &Tuple::new()).unwrap(), vec![XdmItem::from("two")]);
    }

    #[test]
    fn typeswitch_binds_case_variable() {
        let v = slot("v", 0);
        let ts = TypeSwitch {
            operand: lit(vec![XdmItem::from(5i64)]),
            cases: vec![
                TypeCase {
                    types: vec![SequenceType::atomic(AtomicType::String, Occurrence::One)],
                    var: None,
                    ret: lit(vec![XdmItem::from("string")]),
                },
                TypeCase {
                    types: vec![SequenceType::atomic(AtomicType::Integer, Occurrence::One)],
                    var: Some(v.clone()),
                    ret: Arc::new(SlotRef { slot: v }),
                },
            ],
            default: TypeCase { types: vec![], var: None, ret: lit(vec![]) },
        };
        assert_eq!(ts.evaluate(&QueryContext::default(), &Tuple::new()).unwrap(), vec![XdmItem::from(5i64)]);
    }

    #[test]
    fn try_catch_exposes_code_and_description() {
        let code = slot("code", 0);
        let desc = slot("desc", 1);
        let tc = TryCatch {
            body: Arc::new(Fail(Error::from_code(ErrorCode::FOAR0001, "boom"))),
            clauses: vec![
                CatchClause {
                    tests: vec![ErrorTest::Local("XPTY0004".into())],
                    vars: [None, None, None],
                    handler: lit(vec![XdmItem::from("type")]),
                },
                CatchClause {
                    tests: vec![ErrorTest::Namespace(ERR_NS.into())],
                    vars: [Some(code.clone()), Some(desc.clone()), None],
                    handler: Arc::new(Sequence {
                        items: vec![Arc::new(SlotRef { slot: code }), Arc::new(SlotRef { slot: desc })],
                    }),
                },
            ],
        };
        let out = tc.evaluate(&QueryContext::default(), &Tuple::new()).unwrap();
        assert_eq!(out[0], XdmItem::Atomic(XdmAtomicValue::QName(ErrorCode::FOAR0001.qname())));
        assert_eq!(out[1], XdmItem::from("boom"));
    }

    #[test]
    fn uncaught_and_internal_errors_propagate() {
        let any = || CatchClause { tests: vec![ErrorTest::Any], vars: [None, None, None], handler: lit(vec![]) };
        let internal = TryCatch { body: Arc::new(Fail(Error::illegal_state("bug"))), clauses: vec![any()] };
        let ctx = QueryContext::default();
        assert_eq!(internal.evaluate(&ctx, &Tuple::new()).unwrap_err().code, ErrorCode::BIST0001);
        let other = TryCatch {
            body: Arc::new(Fail(Error::custom(QName::new(Some("urn:app"), Some("app"), "E1"), "custom"))),
            clauses: vec![CatchClause {
                tests: vec![ErrorTest::Name(ErrorCode::FOER0000.qname())],
                vars: [None, None, None],
                handler: lit(vec![]),
            }],
        };
        let err = other.evaluate(&ctx, &Tuple::new()).unwrap_err();
        assert_eq!(err.code_qname(), QName::new(Some("urn:app"), None, "E1"));
    }
}
