use super::CallCtx;
use crate::error::Error;
use crate::runtime::compare::atomic_equal;
use crate::xdm::{XdmAtomicValue, XdmItem, XdmSequence, atomize};

pub(super) fn fn_empty(_ctx: &CallCtx, args: &[XdmSequence]) -> Result<XdmSequence, Error> {
    Ok(vec![XdmItem::from(args[0].is_empty())])
}

pub(super) fn fn_exists(_ctx: &CallCtx, args: &[XdmSequence]) -> Result<XdmSequence, Error> {
    Ok(vec![XdmItem::from(!args[0].is_empty())])
}

pub(super) fn fn_count(_ctx: &CallCtx, args: &[XdmSequence]) -> Result<XdmSequence, Error> {
    Ok(vec![XdmItem::from(i64::try_from(args[0].len()).unwrap_or(i64::MAX))])
}

pub(super) fn fn_data(_ctx: &CallCtx, args: &[XdmSequence]) -> Result<XdmSequence, Error> {
    Ok(atomize(&args[0]).into_iter().map(XdmItem::Atomic).collect())
}

pub(super) fn fn_reverse(_ctx: &CallCtx, args: &[XdmSequence]) -> Result<XdmSequence, Error> {
    Ok(args[0].iter().rev().cloned().collect())
}

/// First occurrence of every distinct value, in input order. Only the codepoint collation is
/// supported, so a collation argument is ignored.
pub(super) fn fn_distinct_values(_ctx: &CallCtx, args: &[XdmSequence]) -> Result<XdmSequence, Error> {
    let mut seen: Vec<XdmAtomicValue> = Vec::new();
    for value in atomize(&args[0]) {
        if !seen.iter().any(|s| atomic_equal(s, &value)) {
            seen.push(value);
        }
    }
    Ok(seen.into_iter().map(XdmItem::Atomic).collect())
}
