use super::CallCtx;
use crate::error::Error;
use crate::runtime::arith::{ArithmeticOp, apply};
use crate::runtime::compare::{ComparisonOp, value_compare};
use crate::runtime::types::{AtomicType, cast_atomic};
use crate::xdm::{XdmAtomicValue, XdmItem, XdmSequence, atomize};

/// Atomized argument with untyped values promoted to double.
fn numeric_values(seq: &[XdmItem]) -> Result<Vec<XdmAtomicValue>, Error> {
    atomize(seq)
        .into_iter()
        .map(|v| match v {
            XdmAtomicValue::UntypedAtomic(_) => cast_atomic(&v, AtomicType::Double),
            v => Ok(v),
        })
        .collect()
}

fn total(values: Vec<XdmAtomicValue>) -> Result<Option<XdmAtomicValue>, Error> {
    let mut values = values.into_iter();
    let Some(first) = values.next() else { return Ok(None) };
    values.try_fold(first, |acc, v| apply(ArithmeticOp::Add, acc, v)).map(Some)
}

pub(super) fn fn_sum(_ctx: &CallCtx, args: &[XdmSequence]) -> Result<XdmSequence, Error> {
    match total(numeric_values(&args[0])?)? {
        Some(sum) => Ok(vec![XdmItem::Atomic(sum)]),
        None if args.len() == 2 => Ok(args[1].clone()),
        None => Ok(vec![XdmItem::from(0i64)]),
    }
}

pub(super) fn fn_avg(_ctx: &CallCtx, args: &[XdmSequence]) -> Result<XdmSequence, Error> {
    let values = numeric_values(&args[0])?;
    let count = i64::try_from(values.len()).unwrap_or(i64::MAX);
    match total(values)? {
        Some(sum) => Ok(vec![XdmItem::Atomic(apply(ArithmeticOp::Div, sum, XdmAtomicValue::Integer(count))?)]),
        None => Ok(Vec::new()),
    }
}

/// Smallest (`Lt`) or largest (`Gt`) value; NaN anywhere makes the result NaN.
fn extreme(args: &[XdmSequence], op: ComparisonOp) -> Result<XdmSequence, Error> {
    let values = numeric_values(&args[0])?;
    if values.iter().any(|v| matches!(v, XdmAtomicValue::Double(d) if d.is_nan())) {
        return Ok(vec![XdmItem::Atomic(XdmAtomicValue::Double(f64::NAN))]);
    }
    let mut best: Option<XdmAtomicValue> = None;
    for value in values {
        best = Some(match best {
            Some(current) if !value_compare(op, value.clone(), current.clone())? => current,
            _ => value,
        });
    }
    Ok(best.map(XdmItem::Atomic).into_iter().collect())
}

pub(super) fn fn_min(_ctx: &CallCtx, args: &[XdmSequence]) -> Result<XdmSequence, Error> {
    extreme(args, ComparisonOp::Lt)
}

pub(super) fn fn_max(_ctx: &CallCtx, args: &[XdmSequence]) -> Result<XdmSequence, Error> {
    extreme(args, ComparisonOp::Gt)
}
