use super::CallCtx;
use crate::error::Error;
use crate::xdm::{XdmAtomicValue, XdmItem, XdmSequence, atomize_opt};

fn string_value(seq: &[XdmItem]) -> Result<String, Error> {
    match seq {
        [] => Ok(String::new()),
        [XdmItem::Node(n)] => Ok(n.string_value()),
        [XdmItem::Atomic(a)] => Ok(a.string_value()),
        _ => Err(Error::type_error(format!("expected at most one item, got {}", seq.len()))),
    }
}

fn string_item(s: impl Into<compact_str::CompactString>) -> XdmSequence {
    vec![XdmItem::Atomic(XdmAtomicValue::String(s.into()))]
}

pub(super) fn fn_string(_ctx: &CallCtx, args: &[XdmSequence]) -> Result<XdmSequence, Error> {
    Ok(string_item(string_value(&args[0])?))
}

pub(super) fn fn_string_length(_ctx: &CallCtx, args: &[XdmSequence]) -> Result<XdmSequence, Error> {
    let len = string_value(&args[0])?.chars().count();
    Ok(vec![XdmItem::from(i64::try_from(len).unwrap_or(i64::MAX))])
}

pub(super) fn fn_concat(_ctx: &CallCtx, args: &[XdmSequence]) -> Result<XdmSequence, Error> {
    let mut out = String::new();
    for arg in args {
        if let Some(value) = atomize_opt(arg)? {
            out.push_str(&value.string_value());
        }
    }
    Ok(string_item(out))
}
