use crate::error::{Error, ErrorCode};
use crate::model::{NodeHandle, QName};
use compact_str::CompactString;
use core::fmt;
use std::sync::Arc;

/// Atomic values supported by the engine. Decimals are carried as `f64`.
#[derive(Debug, Clone, PartialEq)]
pub enum XdmAtomicValue {
    Boolean(bool),
    Integer(i64),
    Decimal(f64),
    Double(f64),
    String(CompactString),
    UntypedAtomic(CompactString),
    AnyUri(CompactString),
    QName(QName),
}

impl XdmAtomicValue {
    pub fn type_name(&self) -> &'static str {
        match self {
            XdmAtomicValue::Boolean(_) => "xs:boolean",
            XdmAtomicValue::Integer(_) => "xs:integer",
            XdmAtomicValue::Decimal(_) => "xs:decimal",
            XdmAtomicValue::Double(_) => "xs:double",
            XdmAtomicValue::String(_) => "xs:string",
            XdmAtomicValue::UntypedAtomic(_) => "xs:untypedAtomic",
            XdmAtomicValue::AnyUri(_) => "xs:anyURI",
            XdmAtomicValue::QName(_) => "xs:QName",
        }
    }

    pub fn is_numeric(&self) -> bool {
        matches!(self, XdmAtomicValue::Integer(_) | XdmAtomicValue::Decimal(_) | XdmAtomicValue::Double(_))
    }

    pub fn is_string_like(&self) -> bool {
        matches!(self, XdmAtomicValue::String(_) | XdmAtomicValue::UntypedAtomic(_) | XdmAtomicValue::AnyUri(_))
    }

    #[allow(clippy::cast_precision_loss)]
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            XdmAtomicValue::Integer(i) => Some(*i as f64),
            XdmAtomicValue::Decimal(d) | XdmAtomicValue::Double(d) => Some(*d),
            _ => None,
        }
    }

    pub fn string_value(&self) -> String {
        match self {
            XdmAtomicValue::Boolean(b) => b.to_string(),
            XdmAtomicValue::Integer(i) => i.to_string(),
            XdmAtomicValue::Decimal(d) => format_decimal(*d),
            XdmAtomicValue::Double(d) => format_double(*d),
            XdmAtomicValue::String(s) | XdmAtomicValue::UntypedAtomic(s) | XdmAtomicValue::AnyUri(s) => s.to_string(),
            XdmAtomicValue::QName(q) => q.to_string(),
        }
    }
}

fn format_decimal(d: f64) -> String {
    if d.fract() == 0.0 && d.abs() < 1e18 { format!("{d:.0}") } else { d.to_string() }
}

fn format_double(d: f64) -> String {
    if d.is_nan() {
        "NaN".to_string()
    } else if d.is_infinite() {
        if d > 0.0 { "INF".to_string() } else { "-INF".to_string() }
    } else if d == 0.0 {
        if d.is_sign_negative() { "-0".to_string() } else { "0".to_string() }
    } else if (1e-6..1e6).contains(&d.abs()) {
        format_decimal(d)
    } else {
        let s = format!("{d:E}");
        // Rust renders 1e7 as "1E7"; the canonical form keeps one fractional digit.
        match s.split_once('E') {
            Some((mantissa, exp)) if !mantissa.contains('.') => format!("{mantissa}.0E{exp}"),
            _ => s,
        }
    }
}

impl From<bool> for XdmAtomicValue {
    fn from(b: bool) -> Self {
        XdmAtomicValue::Boolean(b)
    }
}

impl From<i64> for XdmAtomicValue {
    fn from(i: i64) -> Self {
        XdmAtomicValue::Integer(i)
    }
}

impl From<&str> for XdmAtomicValue {
    fn from(s: &str) -> Self {
        XdmAtomicValue::String(s.into())
    }
}

impl fmt::Display for XdmAtomicValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.string_value())
    }
}

#[derive(Debug, Clone)]
pub enum XdmItem {
    Node(NodeHandle),
    Atomic(XdmAtomicValue),
}

impl PartialEq for XdmItem {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (XdmItem::Node(a), XdmItem::Node(b)) => Arc::ptr_eq(a, b) || a.node_id() == b.node_id(),
            (XdmItem::Atomic(a), XdmItem::Atomic(b)) => a == b,
            _ => false,
        }
    }
}

impl From<XdmAtomicValue> for XdmItem {
    fn from(v: XdmAtomicValue) -> Self {
        XdmItem::Atomic(v)
    }
}

impl From<bool> for XdmItem {
    fn from(b: bool) -> Self {
        XdmItem::Atomic(XdmAtomicValue::Boolean(b))
    }
}

impl From<i64> for XdmItem {
    fn from(i: i64) -> Self {
        XdmItem::Atomic(XdmAtomicValue::Integer(i))
    }
}

impl From<&str> for XdmItem {
    fn from(s: &str) -> Self {
        XdmItem::Atomic(XdmAtomicValue::String(s.into()))
    }
}

impl fmt::Display for XdmItem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            XdmItem::Node(n) => f.write_str(&n.string_value()),
            XdmItem::Atomic(a) => write!(f, "{a}"),
        }
    }
}

pub type XdmSequence = Vec<XdmItem>;

/// Atomize a sequence: nodes contribute their typed value, atomics pass through.
pub fn atomize(seq: &[XdmItem]) -> Vec<XdmAtomicValue> {
    let mut out = Vec::with_capacity(seq.len());
    for item in seq {
        match item {
            XdmItem::Atomic(a) => out.push(a.clone()),
            XdmItem::Node(n) => {
                out.extend(n.typed_value().into_iter().filter_map(|i| match i {
                    XdmItem::Atomic(a) => Some(a),
                    XdmItem::Node(_) => None,
                }));
            }
        }
    }
    out
}

/// Atomize to at most one value; more than one is a type error.
pub fn atomize_opt(seq: &[XdmItem]) -> Result<Option<XdmAtomicValue>, Error> {
    let mut atoms = atomize(seq);
    match atoms.len() {
        0 => Ok(None),
        1 => Ok(atoms.pop()),
        n => Err(Error::type_error(format!("expected at most one atomic value, got {n}"))),
    }
}

pub fn effective_boolean_value(seq: &[XdmItem]) -> Result<bool, Error> {
    match seq {
        [] => Ok(false),
        [XdmItem::Node(_), ..] => Ok(true),
        [XdmItem::Atomic(a)] => match a {
            XdmAtomicValue::Boolean(b) => Ok(*b),
            XdmAtomicValue::String(s) | XdmAtomicValue::UntypedAtomic(s) | XdmAtomicValue::AnyUri(s) => Ok(!s.is_empty()),
            XdmAtomicValue::Integer(i) => Ok(*i != 0),
            XdmAtomicValue::Decimal(d) | XdmAtomicValue::Double(d) => Ok(*d != 0.0 && !d.is_nan()),
            XdmAtomicValue::QName(_) => {
                Err(Error::from_code(ErrorCode::FORG0006, "effective boolean value of xs:QName"))
            }
        },
        _ => Err(Error::from_code(ErrorCode::FORG0006, "effective boolean value of a sequence of atomic values")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(XdmAtomicValue::Double(1.0), "1")]
    #[case(XdmAtomicValue::Double(1.5), "1.5")]
    #[case(XdmAtomicValue::Double(1e7), "1.0E7")]
    #[case(XdmAtomicValue::Double(f64::NAN), "NaN")]
    #[case(XdmAtomicValue::Decimal(2.0), "2")]
    #[case(XdmAtomicValue::Integer(-3), "-3")]
    fn canonical_strings(#[case] v: XdmAtomicValue, #[case] expected: &str) {
        assert_eq!(v.string_value(), expected);
    }

    #[test]
    fn ebv_rules() {
        assert!(!effective_boolean_value(&[]).unwrap());
        assert!(effective_boolean_value(&[XdmItem::from(1i64)]).unwrap());
        assert!(!effective_boolean_value(&[XdmItem::from("")]).unwrap());
        let err = effective_boolean_value(&[XdmItem::from(1i64), XdmItem::from(2i64)]).unwrap_err();
        assert_eq!(err.code, ErrorCode::FORG0006);
    }
}
