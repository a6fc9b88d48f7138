use super::CallCtx;
use crate::error::Error;
use crate::xdm::{XdmItem, XdmSequence, effective_boolean_value};

pub(super) fn fn_true(_ctx: &CallCtx, _args: &[XdmSequence]) -> Result<XdmSequence, Error> {
    Ok(vec![XdmItem::from(true)])
}

pub(super) fn fn_false(_ctx: &CallCtx, _args: &[XdmSequence]) -> Result<XdmSequence, Error> {
    Ok(vec![XdmItem::from(false)])
}

pub(super) fn fn_not(_ctx: &CallCtx, args: &[XdmSequence]) -> Result<XdmSequence, Error> {
    Ok(vec![XdmItem::from(!effective_boolean_value(&args[0])?)])
}

pub(super) fn fn_boolean(_ctx: &CallCtx, args: &[XdmSequence]) -> Result<XdmSequence, Error> {
    Ok(vec![XdmItem::from(effective_boolean_value(&args[0])?)])
}
