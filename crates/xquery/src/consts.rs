pub const XS: &str = "http://www.w3.org/2001/XMLSchema";
pub const FNS: &str = "http://www.w3.org/2005/xpath-functions";
pub const ERR_NS: &str = "http://www.w3.org/2005/xqt-errors";
pub const LOCAL_NS: &str = "http://www.w3.org/2005/xquery-local-functions";
pub const XML_URI: &str = "http://www.w3.org/XML/1998/namespace";
pub const XSI: &str = "http://www.w3.org/2001/XMLSchema-instance";

/// Names of the synthetic default-context variables. The `fs:` prefix cannot be produced by
/// the parser for user variables, so these never collide with declared names.
pub const CTX_ITEM: &str = "fs:dot";
pub const CTX_POSITION: &str = "fs:position";
pub const CTX_LAST: &str = "fs:last";

/// Prefixes bound in every static context.
pub const PREDECLARED_NAMESPACES: &[(&str, &str)] = &[
    ("xml", XML_URI),
    ("xs", XS),
    ("xsi", XSI),
    ("fn", FNS),
    ("local", LOCAL_NS),
    ("err", ERR_NS),
];
