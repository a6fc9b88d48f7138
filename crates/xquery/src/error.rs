use crate::consts::ERR_NS;
use crate::model::QName;
use crate::xdm::XdmSequence;
use core::fmt;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    // Static errors
    XPST0003, // grammar mismatch
    XPST0008, // undefined variable reference
    XPST0017, // unknown function / wrong arity
    XPST0051, // unknown atomic type
    XPST0081, // unbound namespace prefix
    XQST0034, // duplicate function declaration
    XQST0049, // duplicate variable declaration
    XQST0059, // module import not found
    XQST0090, // character reference to a non-XML character
    // Dynamic errors
    XPDY0002, // context item or external value absent
    XQDY0054, // context item referenced by its own initializer
    XPDY0050, // treat as mismatch
    XPTY0004, // type error
    XPTY0018, // path result mixes nodes and atomic values
    XPTY0019, // path step applied to a non-node
    XPTY0020, // axis step without a node context
    XQTY0024, // attribute constructed after element content
    XQDY0025, // duplicate attribute name
    XQDY0072, // constructed comment contains '--' or ends with '-'
    XQDY0074, // computed constructor name is not a valid QName
    FOAR0001, // divide by zero
    FOAR0002, // numeric overflow
    FOER0000, // fn:error without code
    FORG0001, // invalid lexical form / cast failure
    FORG0006, // invalid effective boolean value
    FODC0002, // collection lookup failure
    // Update conflicts
    XUDY0015, // node renamed twice
    XUDY0016, // node replaced twice
    XUDY0017, // node value replaced twice
    XUDY0021, // replaced content twice
    // Project specific
    BIST0001, // illegal internal state (framework bug)
    NYI0000,  // not yet implemented
    // Fallback (kept last)
    Unknown,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::XPST0003 => "err:XPST0003",
            ErrorCode::XPST0008 => "err:XPST0008",
            ErrorCode::XPST0017 => "err:XPST0017",
            ErrorCode::XPST0051 => "err:XPST0051",
            ErrorCode::XPST0081 => "err:XPST0081",
            ErrorCode::XQST0034 => "err:XQST0034",
            ErrorCode::XQST0049 => "err:XQST0049",
            ErrorCode::XQST0059 => "err:XQST0059",
            ErrorCode::XQST0090 => "err:XQST0090",
            ErrorCode::XPDY0002 => "err:XPDY0002",
            ErrorCode::XQDY0054 => "err:XQDY0054",
            ErrorCode::XPDY0050 => "err:XPDY0050",
            ErrorCode::XPTY0004 => "err:XPTY0004",
            ErrorCode::XPTY0018 => "err:XPTY0018",
            ErrorCode::XPTY0019 => "err:XPTY0019",
            ErrorCode::XPTY0020 => "err:XPTY0020",
            ErrorCode::XQTY0024 => "err:XQTY0024",
            ErrorCode::XQDY0025 => "err:XQDY0025",
            ErrorCode::XQDY0072 => "err:XQDY0072",
            ErrorCode::XQDY0074 => "err:XQDY0074",
            ErrorCode::FOAR0001 => "err:FOAR0001",
            ErrorCode::FOAR0002 => "err:FOAR0002",
            ErrorCode::FOER0000 => "err:FOER0000",
            ErrorCode::FORG0001 => "err:FORG0001",
            ErrorCode::FORG0006 => "err:FORG0006",
            ErrorCode::FODC0002 => "err:FODC0002",
            ErrorCode::XUDY0015 => "err:XUDY0015",
            ErrorCode::XUDY0016 => "err:XUDY0016",
            ErrorCode::XUDY0017 => "err:XUDY0017",
            ErrorCode::XUDY0021 => "err:XUDY0021",
            ErrorCode::BIST0001 => "err:BIST0001",
            ErrorCode::NYI0000 => "err:NYI0000",
            ErrorCode::Unknown => "err:UNKNOWN",
        }
    }

    pub fn from_code(s: &str) -> Self {
        use ErrorCode::*;
        match s {
            "err:XPST0003" => XPST0003,
            "err:XPST0008" => XPST0008,
            "err:XPST0017" => XPST0017,
            "err:XPST0051" => XPST0051,
            "err:XPST0081" => XPST0081,
            "err:XQST0034" => XQST0034,
            "err:XQST0049" => XQST0049,
            "err:XQST0059" => XQST0059,
            "err:XQST0090" => XQST0090,
            "err:XPDY0002" => XPDY0002,
            "err:XQDY0054" => XQDY0054,
            "err:XPDY0050" => XPDY0050,
            "err:XPTY0004" => XPTY0004,
            "err:XPTY0018" => XPTY0018,
            "err:XPTY0019" => XPTY0019,
            "err:XPTY0020" => XPTY0020,
            "err:XQTY0024" => XQTY0024,
            "err:XQDY0025" => XQDY0025,
            "err:XQDY0072" => XQDY0072,
            "err:XQDY0074" => XQDY0074,
            "err:FOAR0001" => FOAR0001,
            "err:FOAR0002" => FOAR0002,
            "err:FOER0000" => FOER0000,
            "err:FORG0001" => FORG0001,
            "err:FORG0006" => FORG0006,
            "err:FODC0002" => FODC0002,
            "err:XUDY0015" => XUDY0015,
            "err:XUDY0016" => XUDY0016,
            "err:XUDY0017" => XUDY0017,
            "err:XUDY0021" => XUDY0021,
            "err:BIST0001" => BIST0001,
            "err:NYI0000" => NYI0000,
            _ => Unknown,
        }
    }

    /// Local part of the code inside the `err` namespace.
    pub fn local(&self) -> &'static str {
        &self.as_str()[4..]
    }

    pub fn qname(&self) -> QName {
        QName::new(Some(ERR_NS), Some("err"), self.local())
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, thiserror::Error)]
pub struct Error {
    pub code: ErrorCode,
    pub message: String,
    /// Code raised by `fn:error` outside the known set; `code` is `Unknown` then.
    pub name: Option<QName>,
    /// Error object passed to `fn:error`.
    pub value: Option<XdmSequence>,
    #[source]
    pub source: Option<Arc<dyn std::error::Error + Send + Sync>>, // optional chained cause
}

impl Error {
    pub fn from_code(code: ErrorCode, msg: impl Into<String>) -> Self {
        Self { code, message: msg.into(), name: None, value: None, source: None }
    }

    /// Error identified by an arbitrary QName, as raised by `fn:error`.
    pub fn custom(name: QName, msg: impl Into<String>) -> Self {
        let code = match name.ns_uri.as_deref() {
            Some(ERR_NS) => ErrorCode::from_code(&format!("err:{}", name.local)),
            _ => ErrorCode::Unknown,
        };
        let mut err = Self::from_code(code, msg);
        if code == ErrorCode::Unknown {
            err.name = Some(name);
        }
        err
    }

    /// The error's code as QName (the custom name if there is one).
    pub fn code_qname(&self) -> QName {
        self.name.clone().unwrap_or_else(|| self.code.qname())
    }

    #[must_use]
    pub fn with_value(mut self, value: XdmSequence) -> Self {
        self.value = Some(value);
        self
    }

    /// Grammar mismatch: lists the alternatives the parser would have accepted and the
    /// input fragment found instead.
    pub fn parse(expected: &[&str], fragment: &str) -> Self {
        let alternatives = expected.iter().map(|e| format!("'{e}'")).collect::<Vec<_>>().join(", ");
        Self::from_code(ErrorCode::XPST0003, format!("Expected one of [{alternatives}]: '{fragment}'"))
    }

    pub fn duplicate(name: &str) -> Self {
        Self::from_code(ErrorCode::XQST0049, format!("Did not expect variable declaration: ${name}"))
    }

    pub fn undefined(name: &str) -> Self {
        Self::from_code(ErrorCode::XPST0008, format!("Did not find variable declaration: ${name}"))
    }

    pub fn illegal_state(msg: impl Into<String>) -> Self {
        Self::from_code(ErrorCode::BIST0001, msg)
    }

    pub fn type_error(msg: impl Into<String>) -> Self {
        Self::from_code(ErrorCode::XPTY0004, msg)
    }

    pub fn not_implemented(feature: &str) -> Self {
        Self::from_code(ErrorCode::NYI0000, format!("not implemented: {feature}"))
    }

    pub fn code_enum(&self) -> ErrorCode {
        self.code
    }

    /// Compose an error with a source cause.
    pub fn with_source(mut self, source: impl Into<Option<Arc<dyn std::error::Error + Send + Sync>>>) -> Self {
        self.source = source.into();
        self
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::from_code(ErrorCode::FODC0002, e.to_string())
            .with_source(Some(Arc::new(e) as Arc<dyn std::error::Error + Send + Sync>))
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.name {
            Some(name) => write!(f, "error: {} ({name})", self.message),
            None => write!(f, "error: {} ({})", self.message, self.code),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_round_trip() {
        for code in [
            ErrorCode::XPST0003,
            ErrorCode::XQST0049,
            ErrorCode::XQDY0054,
            ErrorCode::XQST0090,
            ErrorCode::XPTY0019,
            ErrorCode::XQDY0025,
            ErrorCode::XUDY0016,
            ErrorCode::BIST0001,
            ErrorCode::NYI0000,
        ] {
            assert_eq!(ErrorCode::from_code(code.as_str()), code);
        }
        assert_eq!(ErrorCode::from_code("err:NOPE0000"), ErrorCode::Unknown);
    }

    #[test]
    fn parse_error_lists_alternatives() {
        let err = Error::parse(&["return", "where"], "retrun $x");
        assert_eq!(err.code, ErrorCode::XPST0003);
        assert_eq!(err.message, "Expected one of ['return', 'where']: 'retrun $x'");
    }

    #[test]
    fn custom_codes_keep_their_name() {
        let known = Error::custom(QName::new(Some(ERR_NS), Some("err"), "FOAR0001"), "div");
        assert_eq!(known.code, ErrorCode::FOAR0001);
        assert!(known.name.is_none());
        let custom = Error::custom(QName::new(Some("urn:app"), Some("app"), "E1"), "boom");
        assert_eq!(custom.code, ErrorCode::Unknown);
        assert_eq!(&*custom.code_qname().local, "E1");
        assert_eq!(custom.to_string(), "error: boom (app:E1)");
    }

    #[test]
    fn code_local_part() {
        assert_eq!(ErrorCode::XUDY0015.local(), "XUDY0015");
        assert_eq!(&*ErrorCode::XUDY0015.qname().local, "XUDY0015");
    }
}
