//! Value, general and node comparisons plus the orderings used by sorting, grouping and
//! `distinct-values`. Strings compare by codepoint.

use super::context::QueryContext;
use super::tuple::Tuple;
use super::types::{AtomicType, cast_atomic};
use super::{Expr, ExprRef};
use crate::error::Error;
use crate::xdm::{XdmAtomicValue, XdmItem, XdmSequence, atomize, atomize_opt};
use core::cmp::Ordering;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ComparisonOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

impl ComparisonOp {
    fn holds(self, ordering: Option<Ordering>) -> bool {
        match ordering {
            // NaN: only `ne` holds
            None => self == ComparisonOp::Ne,
            Some(o) => match self {
                ComparisonOp::Eq => o == Ordering::Equal,
                ComparisonOp::Ne => o != Ordering::Equal,
                ComparisonOp::Lt => o == Ordering::Less,
                ComparisonOp::Le => o != Ordering::Greater,
                ComparisonOp::Gt => o == Ordering::Greater,
                ComparisonOp::Ge => o != Ordering::Less,
            },
        }
    }

    fn is_equality(self) -> bool {
        matches!(self, ComparisonOp::Eq | ComparisonOp::Ne)
    }
}

fn incomparable(a: &XdmAtomicValue, b: &XdmAtomicValue) -> Error {
    Error::type_error(format!("cannot compare {} with {}", a.type_name(), b.type_name()))
}

/// Order two atomic values of comparable types. `Ok(None)` means unordered (NaN involved).
/// Untyped values must have been converted by the caller.
pub fn compare_atomic(a: &XdmAtomicValue, b: &XdmAtomicValue) -> Result<Option<Ordering>, Error> {
    use XdmAtomicValue as V;
    Ok(match (a, b) {
        (V::Integer(x), V::Integer(y)) => Some(x.cmp(y)),
        (x, y) if x.is_numeric() && y.is_numeric() => x.as_f64().zip(y.as_f64()).and_then(|(x, y)| x.partial_cmp(&y)),
        (x, y) if x.is_string_like() && y.is_string_like() => Some(x.string_value().cmp(&y.string_value())),
        (V::Boolean(x), V::Boolean(y)) => Some(x.cmp(y)),
        // QNames only support equality
        (V::QName(x), V::QName(y)) => Some(if x == y { Ordering::Equal } else { Ordering::Less }),
        _ => return Err(incomparable(a, b)),
    })
}

fn untyped_to_string(v: XdmAtomicValue) -> XdmAtomicValue {
    match v {
        XdmAtomicValue::UntypedAtomic(s) => XdmAtomicValue::String(s),
        other => other,
    }
}

/// Value comparison of two single atomic values (`eq`, `lt`, ...).
pub fn value_compare(op: ComparisonOp, a: XdmAtomicValue, b: XdmAtomicValue) -> Result<bool, Error> {
    let (a, b) = (untyped_to_string(a), untyped_to_string(b));
    if matches!((&a, &b), (XdmAtomicValue::QName(_), XdmAtomicValue::QName(_))) && !op.is_equality() {
        return Err(incomparable(&a, &b));
    }
    Ok(op.holds(compare_atomic(&a, &b)?))
}

/// Convert an untyped operand of a general comparison according to the other operand.
fn general_operands(a: &XdmAtomicValue, b: &XdmAtomicValue) -> Result<(XdmAtomicValue, XdmAtomicValue), Error> {
    use XdmAtomicValue as V;
    let convert = |untyped: &XdmAtomicValue, other: &XdmAtomicValue| -> Result<XdmAtomicValue, Error> {
        match other {
            V::UntypedAtomic(_) | V::String(_) | V::AnyUri(_) => cast_atomic(untyped, AtomicType::String),
            o if o.is_numeric() => cast_atomic(untyped, AtomicType::Double),
            V::Boolean(_) => cast_atomic(untyped, AtomicType::Boolean),
            V::QName(_) => cast_atomic(untyped, AtomicType::QName),
            _ => Ok(untyped.clone()),
        }
    };
    Ok(match (a, b) {
        (V::UntypedAtomic(_), _) => (convert(a, b)?, untyped_to_string(b.clone())),
        (_, V::UntypedAtomic(_)) => (a.clone(), convert(b, a)?),
        _ => (a.clone(), b.clone()),
    })
}

/// Existentially quantified comparison over two atomized sequences.
pub fn general_compare(op: ComparisonOp, left: &[XdmAtomicValue], right: &[XdmAtomicValue]) -> Result<bool, Error> {
    for a in left {
        for b in right {
            let (x, y) = general_operands(a, b)?;
            if value_compare(op, x, y)? {
                return Ok(true);
            }
        }
    }
    Ok(false)
}

/// Total order used by `order by`, `min`/`max` and key sorting: NaN sorts below every
/// other value, untyped values compare as strings.
pub fn sort_compare(a: &XdmAtomicValue, b: &XdmAtomicValue) -> Result<Ordering, Error> {
    let (a, b) = (untyped_to_string(a.clone()), untyped_to_string(b.clone()));
    let nan = |v: &XdmAtomicValue| v.as_f64().is_some_and(f64::is_nan);
    match (nan(&a), nan(&b)) {
        (true, true) => return Ok(Ordering::Equal),
        (true, false) if b.is_numeric() => return Ok(Ordering::Less),
        (false, true) if a.is_numeric() => return Ok(Ordering::Greater),
        _ => {}
    }
    Ok(compare_atomic(&a, &b)?.unwrap_or(Ordering::Equal))
}

/// Equality as used for grouping keys and `distinct-values`: values of incomparable types
/// are distinct, NaN equals NaN.
pub fn atomic_equal(a: &XdmAtomicValue, b: &XdmAtomicValue) -> bool {
    let (a, b) = (untyped_to_string(a.clone()), untyped_to_string(b.clone()));
    if a.as_f64().is_some_and(f64::is_nan) && b.as_f64().is_some_and(f64::is_nan) {
        return true;
    }
    matches!(compare_atomic(&a, &b), Ok(Some(Ordering::Equal)))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ComparisonMode {
    General,
    Value,
}

#[derive(Debug)]
pub struct Comparison {
    pub mode: ComparisonMode,
    pub op: ComparisonOp,
    pub left: ExprRef,
    pub right: ExprRef,
}

impl Comparison {
    /// Compare two already evaluated operands.
    pub fn compare(&self, left: &[XdmItem], right: &[XdmItem]) -> Result<Option<bool>, Error> {
        match self.mode {
            ComparisonMode::General => general_compare(self.op, &atomize(left), &atomize(right)).map(Some),
            ComparisonMode::Value => match (atomize_opt(left)?, atomize_opt(right)?) {
                (Some(a), Some(b)) => value_compare(self.op, a, b).map(Some),
                _ => Ok(None),
            },
        }
    }
}

impl Expr for Comparison {
    fn evaluate(&self, ctx: &QueryContext, tuple: &Tuple) -> Result<XdmSequence, Error> {
        let left = self.left.evaluate(ctx, tuple)?;
        let right = self.right.evaluate(ctx, tuple)?;
        Ok(self.compare(&left, &right)?.map(|b| vec![XdmItem::from(b)]).unwrap_or_default())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeComparisonOp {
    Is,
    Precedes,
    Follows,
}

/// `is`, `<<` and `>>` on node identity and document order.
#[derive(Debug)]
pub struct NodeComparison {
    pub op: NodeComparisonOp,
    pub left: ExprRef,
    pub right: ExprRef,
}

fn single_node_id(seq: &[XdmItem]) -> Result<Option<u64>, Error> {
    match seq {
        [] => Ok(None),
        [XdmItem::Node(n)] => Ok(Some(n.node_id())),
        _ => Err(Error::type_error("node comparison expects at most one node per operand")),
    }
}

impl Expr for NodeComparison {
    fn evaluate(&self, ctx: &QueryContext, tuple: &Tuple) -> Result<XdmSequence, Error> {
        let left = single_node_id(&self.left.evaluate(ctx, tuple)?)?;
        let right = single_node_id(&self.right.evaluate(ctx, tuple)?)?;
        let Some((l, r)) = left.zip(right) else { return Ok(Vec::new()) };
        let result = match self.op {
            NodeComparisonOp::Is => l == r,
            NodeComparisonOp::Precedes => l < r,
            NodeComparisonOp::Follows => l > r,
        };
        Ok(vec![XdmItem::from(result)])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorCode;
    use rstest::rstest;

    fn untyped(s: &str) -> XdmAtomicValue {
        XdmAtomicValue::UntypedAtomic(s.into())
    }

    #[rstest]
    #[case(ComparisonOp::Eq, XdmAtomicValue::Integer(1), XdmAtomicValue::Double(1.0), true)]
    #[case(ComparisonOp::Lt, XdmAtomicValue::from("a"), XdmAtomicValue::from("b"), true)]
    #[case(ComparisonOp::Ne, XdmAtomicValue::Double(f64::NAN), XdmAtomicValue::Double(f64::NAN), true)]
    #[case(ComparisonOp::Eq, XdmAtomicValue::Double(f64::NAN), XdmAtomicValue::Double(f64::NAN), false)]
    #[case(ComparisonOp::Eq, untyped("1"), XdmAtomicValue::from("1"), true)]
    fn value_comparisons(
        #[case] op: ComparisonOp,
        #[case] a: XdmAtomicValue,
        #[case] b: XdmAtomicValue,
        #[case] expected: bool,
    ) {
        assert_eq!(value_compare(op, a, b).unwrap(), expected);
    }

    #[test]
    fn value_comparison_rejects_mixed_types() {
        let err = value_compare(ComparisonOp::Eq, XdmAtomicValue::Integer(1), XdmAtomicValue::from("1")).unwrap_err();
        assert_eq!(err.code, ErrorCode::XPTY0004);
    }

    #[test]
    fn general_comparison_converts_untyped_and_is_existential() {
        let left = vec![untyped("2"), untyped("10")];
        assert!(general_compare(ComparisonOp::Eq, &left, &[XdmAtomicValue::Integer(10)]).unwrap());
        assert!(!general_compare(ComparisonOp::Gt, &left, &[XdmAtomicValue::Integer(10)]).unwrap());
        assert!(!general_compare(ComparisonOp::Eq, &[], &[XdmAtomicValue::Integer(1)]).unwrap());
        let err = general_compare(ComparisonOp::Eq, &[untyped("x")], &[XdmAtomicValue::Integer(1)]).unwrap_err();
        assert_eq!(err.code, ErrorCode::FORG0001);
    }

    #[test]
    fn sort_order_puts_nan_first() {
        let nan = XdmAtomicValue::Double(f64::NAN);
        assert_eq!(sort_compare(&nan, &XdmAtomicValue::Integer(-5)).unwrap(), Ordering::Less);
        assert_eq!(sort_compare(&untyped("b"), &XdmAtomicValue::from("a")).unwrap(), Ordering::Greater);
        assert!(sort_compare(&XdmAtomicValue::Integer(1), &XdmAtomicValue::from("a")).is_err());
    }

    #[test]
    fn grouping_equality() {
        assert!(atomic_equal(&XdmAtomicValue::Integer(2), &XdmAtomicValue::Decimal(2.0)));
        assert!(atomic_equal(&XdmAtomicValue::Double(f64::NAN), &XdmAtomicValue::Double(f64::NAN)));
        assert!(!atomic_equal(&XdmAtomicValue::Integer(1), &XdmAtomicValue::from("1")));
        assert!(atomic_equal(&untyped("a"), &XdmAtomicValue::from("a")));
    }
}
