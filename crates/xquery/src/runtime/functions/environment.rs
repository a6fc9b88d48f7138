use super::CallCtx;
use crate::error::{Error, ErrorCode};
use crate::xdm::{XdmAtomicValue, XdmItem, XdmSequence, atomize_opt};

/// `fn:error()`, `fn:error($code)`, `fn:error($code, $description)` and
/// `fn:error($code, $description, $value)`. An empty code raises `FOER0000`.
pub(super) fn fn_error(_ctx: &CallCtx, args: &[XdmSequence]) -> Result<XdmSequence, Error> {
    let description = match args.get(1) {
        Some(d) => atomize_opt(d)?.map(|v| v.string_value()),
        None => None,
    };
    let mut err = match args.first().map(|c| atomize_opt(c)).transpose()?.flatten() {
        None => Error::from_code(ErrorCode::FOER0000, description.unwrap_or_else(|| "error raised".to_string())),
        Some(XdmAtomicValue::QName(name)) => {
            let message = description.unwrap_or_else(|| format!("error {name} raised"));
            Error::custom(name, message)
        }
        Some(other) => return Err(Error::type_error(format!("error code must be an xs:QName, got {}", other.type_name()))),
    };
    if let Some(value) = args.get(2) {
        err = err.with_value(value.clone());
    }
    Err(err)
}

/// Documents of a collection of the store in the query context.
pub(super) fn fn_collection(ctx: &CallCtx, args: &[XdmSequence]) -> Result<XdmSequence, Error> {
    let name = match atomize_opt(&args[0])? {
        Some(v) => v.string_value(),
        None => return Err(Error::from_code(ErrorCode::FODC0002, "no default collection")),
    };
    let collection = ctx.query.store()?.lookup(&name)?;
    Ok(collection.documents()?.into_iter().map(XdmItem::Node).collect())
}
