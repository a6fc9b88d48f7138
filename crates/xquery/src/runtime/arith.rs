use super::context::QueryContext;
use super::tuple::Tuple;
use super::types::{AtomicType, cast_atomic};
use super::{Expr, ExprRef};
use crate::error::{Error, ErrorCode};
use crate::xdm::{XdmAtomicValue, XdmItem, XdmSequence, atomize_opt};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArithmeticOp {
    Add,
    Sub,
    Mul,
    Div,
    IDiv,
    Mod,
}

#[derive(Debug)]
pub struct Arithmetic {
    pub op: ArithmeticOp,
    pub left: ExprRef,
    pub right: ExprRef,
}

fn overflow() -> Error {
    Error::from_code(ErrorCode::FOAR0002, "integer overflow")
}

fn division_by_zero() -> Error {
    Error::from_code(ErrorCode::FOAR0001, "division by zero")
}

/// Untyped operands are promoted to double; anything else non-numeric is a type error.
fn numeric_operand(v: XdmAtomicValue) -> Result<XdmAtomicValue, Error> {
    match v {
        XdmAtomicValue::UntypedAtomic(_) => cast_atomic(&v, AtomicType::Double),
        v if v.is_numeric() => Ok(v),
        v => Err(Error::type_error(format!("arithmetic on {}", v.type_name()))),
    }
}

#[allow(clippy::cast_possible_truncation, clippy::cast_precision_loss)]
fn integer_division(a: f64, b: f64) -> Result<i64, Error> {
    if b == 0.0 {
        return Err(division_by_zero());
    }
    let q = (a / b).trunc();
    if q.is_finite() && q.abs() < 9.2e18 { Ok(q as i64) } else { Err(overflow()) }
}

/// Apply `op` to two numeric values with the usual promotion: integer op integer stays
/// integer (except `div`), double wins over decimal.
#[allow(clippy::cast_precision_loss)]
pub fn apply(op: ArithmeticOp, a: XdmAtomicValue, b: XdmAtomicValue) -> Result<XdmAtomicValue, Error> {
    use XdmAtomicValue as V;
    let (a, b) = (numeric_operand(a)?, numeric_operand(b)?);
    if let (V::Integer(x), V::Integer(y)) = (&a, &b) {
        let (x, y) = (*x, *y);
        return match op {
            ArithmeticOp::Add => x.checked_add(y).map(V::Integer).ok_or_else(overflow),
            ArithmeticOp::Sub => x.checked_sub(y).map(V::Integer).ok_or_else(overflow),
            ArithmeticOp::Mul => x.checked_mul(y).map(V::Integer).ok_or_else(overflow),
            ArithmeticOp::IDiv | ArithmeticOp::Mod if y == 0 => Err(division_by_zero()),
            ArithmeticOp::IDiv => x.checked_div(y).map(V::Integer).ok_or_else(overflow),
            ArithmeticOp::Mod => Ok(V::Integer(x.checked_rem(y).unwrap_or(0))),
            ArithmeticOp::Div if y == 0 => Err(division_by_zero()),
            ArithmeticOp::Div => {
                if x.checked_rem(y) == Some(0) {
                    Ok(V::Decimal((x / y) as f64))
                } else {
                    Ok(V::Decimal(x as f64 / y as f64))
                }
            }
        };
    }
    let double = matches!(a, V::Double(_)) || matches!(b, V::Double(_));
    let (x, y) = match a.as_f64().zip(b.as_f64()) {
        Some(pair) => pair,
        None => return Err(Error::illegal_state("numeric operand without value")),
    };
    let wrap = |v: f64| if double { V::Double(v) } else { V::Decimal(v) };
    match op {
        ArithmeticOp::Add => Ok(wrap(x + y)),
        ArithmeticOp::Sub => Ok(wrap(x - y)),
        ArithmeticOp::Mul => Ok(wrap(x * y)),
        ArithmeticOp::Div if !double && y == 0.0 => Err(division_by_zero()),
        ArithmeticOp::Div => Ok(wrap(x / y)),
        ArithmeticOp::IDiv => integer_division(x, y).map(V::Integer),
        ArithmeticOp::Mod if !double && y == 0.0 => Err(division_by_zero()),
        ArithmeticOp::Mod => Ok(wrap(x % y)),
    }
}

impl Expr for Arithmetic {
    fn evaluate(&self, ctx: &QueryContext, tuple: &Tuple) -> Result<XdmSequence, Error> {
        let left = atomize_opt(&self.left.evaluate(ctx, tuple)?)?;
        let right = atomize_opt(&self.right.evaluate(ctx, tuple)?)?;
        match (left, right) {
            (Some(a), Some(b)) => Ok(vec![XdmItem::Atomic(apply(self.op, a, b)?)]),
            _ => Ok(Vec::new()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(ArithmeticOp::Add, XdmAtomicValue::Integer(2), XdmAtomicValue::Integer(3), XdmAtomicValue::Integer(5))]
    #[case(ArithmeticOp::Div, XdmAtomicValue::Integer(6), XdmAtomicValue::Integer(4), XdmAtomicValue::Decimal(1.5))]
    #[case(ArithmeticOp::IDiv, XdmAtomicValue::Integer(7), XdmAtomicValue::Integer(2), XdmAtomicValue::Integer(3))]
    #[case(ArithmeticOp::Mod, XdmAtomicValue::Integer(-7), XdmAtomicValue::Integer(2), XdmAtomicValue::Integer(-1))]
    #[case(ArithmeticOp::Mul, XdmAtomicValue::Decimal(1.5), XdmAtomicValue::Integer(2), XdmAtomicValue::Decimal(3.0))]
    #[case(ArithmeticOp::Add, XdmAtomicValue::Double(0.5), XdmAtomicValue::Decimal(1.0), XdmAtomicValue::Double(1.5))]
    #[case(ArithmeticOp::Add, XdmAtomicValue::UntypedAtomic("2".into()), XdmAtomicValue::Integer(1), XdmAtomicValue::Double(3.0))]
    fn promotion(
        #[case] op: ArithmeticOp,
        #[case] a: XdmAtomicValue,
        #[case] b: XdmAtomicValue,
        #[case] expected: XdmAtomicValue,
    ) {
        assert_eq!(apply(op, a, b).unwrap(), expected);
    }

    #[test]
    fn division_by_zero_and_overflow() {
        let zero = XdmAtomicValue::Integer(0);
        assert_eq!(apply(ArithmeticOp::Div, XdmAtomicValue::Integer(1), zero.clone()).unwrap_err().code, ErrorCode::FOAR0001);
        assert_eq!(apply(ArithmeticOp::Mod, XdmAtomicValue::Integer(1), zero).unwrap_err().code, ErrorCode::FOAR0001);
        assert_eq!(
            apply(ArithmeticOp::Div, XdmAtomicValue::Double(1.0), XdmAtomicValue::Integer(0)).unwrap(),
            XdmAtomicValue::Double(f64::INFINITY)
        );
        assert_eq!(
            apply(ArithmeticOp::Add, XdmAtomicValue::Integer(i64::MAX), XdmAtomicValue::Integer(1)).unwrap_err().code,
            ErrorCode::FOAR0002
        );
        assert_eq!(
            apply(ArithmeticOp::Add, XdmAtomicValue::from("a"), XdmAtomicValue::Integer(1)).unwrap_err().code,
            ErrorCode::XPTY0004
        );
    }
}
