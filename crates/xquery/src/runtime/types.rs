//! Sequence types, matching and casting between the supported atomic types.

use crate::error::{Error, ErrorCode};
use crate::model::{NodeKind, QName};
use crate::xdm::{XdmAtomicValue, XdmItem, XdmSequence};
use core::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AtomicType {
    AnyAtomic,
    Numeric,
    Boolean,
    Integer,
    Decimal,
    Double,
    String,
    UntypedAtomic,
    AnyUri,
    QName,
}

impl AtomicType {
    /// Resolve an `xs:` local name. Integer subtypes map onto `Integer` and `float` onto
    /// `Double`, matching the value space the engine carries.
    pub fn from_local(local: &str) -> Option<Self> {
        Some(match local {
            "anyAtomicType" => AtomicType::AnyAtomic,
            "numeric" => AtomicType::Numeric,
            "boolean" => AtomicType::Boolean,
            "integer" | "int" | "long" | "short" | "byte" | "nonNegativeInteger" | "positiveInteger"
            | "negativeInteger" | "nonPositiveInteger" | "unsignedInt" | "unsignedLong" => AtomicType::Integer,
            "decimal" => AtomicType::Decimal,
            "double" | "float" => AtomicType::Double,
            "string" | "normalizedString" | "token" | "NCName" | "Name" | "language" => AtomicType::String,
            "untypedAtomic" => AtomicType::UntypedAtomic,
            "anyURI" => AtomicType::AnyUri,
            "QName" => AtomicType::QName,
            _ => return None,
        })
    }

    pub fn name(self) -> &'static str {
        match self {
            AtomicType::AnyAtomic => "xs:anyAtomicType",
            AtomicType::Numeric => "xs:numeric",
            AtomicType::Boolean => "xs:boolean",
            AtomicType::Integer => "xs:integer",
            AtomicType::Decimal => "xs:decimal",
            AtomicType::Double => "xs:double",
            AtomicType::String => "xs:string",
            AtomicType::UntypedAtomic => "xs:untypedAtomic",
            AtomicType::AnyUri => "xs:anyURI",
            AtomicType::QName => "xs:QName",
        }
    }

    /// Whether `value` is an instance of this type (integers are decimals).
    pub fn matches(self, value: &XdmAtomicValue) -> bool {
        match (self, value) {
            (AtomicType::AnyAtomic, _) => true,
            (AtomicType::Numeric, v) => v.is_numeric(),
            (AtomicType::Boolean, XdmAtomicValue::Boolean(_))
            | (AtomicType::Integer, XdmAtomicValue::Integer(_))
            | (AtomicType::Decimal, XdmAtomicValue::Decimal(_) | XdmAtomicValue::Integer(_))
            | (AtomicType::Double, XdmAtomicValue::Double(_))
            | (AtomicType::String, XdmAtomicValue::String(_))
            | (AtomicType::UntypedAtomic, XdmAtomicValue::UntypedAtomic(_))
            | (AtomicType::AnyUri, XdmAtomicValue::AnyUri(_))
            | (AtomicType::QName, XdmAtomicValue::QName(_)) => true,
            _ => false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ItemTest {
    AnyItem,
    AnyNode,
    /// Node of a kind, optionally restricted to a name (`None` or `*` match any name).
    Node(NodeKind, Option<QName>),
    Atomic(AtomicType),
    AnyFunction,
}

impl ItemTest {
    pub fn matches(&self, item: &XdmItem) -> bool {
        match (self, item) {
            (ItemTest::AnyItem, _) | (ItemTest::AnyNode, XdmItem::Node(_)) => true,
            (ItemTest::Node(kind, name), XdmItem::Node(n)) => {
                n.kind() == *kind && name.as_ref().is_none_or(|q| n.name().as_ref() == Some(q))
            }
            (ItemTest::Atomic(t), XdmItem::Atomic(a)) => t.matches(a),
            _ => false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Occurrence {
    One,
    ZeroOrOne,
    ZeroOrMore,
    OneOrMore,
}

impl Occurrence {
    pub fn allows(self, len: usize) -> bool {
        match self {
            Occurrence::One => len == 1,
            Occurrence::ZeroOrOne => len <= 1,
            Occurrence::ZeroOrMore => true,
            Occurrence::OneOrMore => len >= 1,
        }
    }

    fn suffix(self) -> &'static str {
        match self {
            Occurrence::One => "",
            Occurrence::ZeroOrOne => "?",
            Occurrence::ZeroOrMore => "*",
            Occurrence::OneOrMore => "+",
        }
    }
}

/// `empty-sequence()` when `item` is `None`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SequenceType {
    pub item: Option<ItemTest>,
    pub occurrence: Occurrence,
}

impl SequenceType {
    pub fn empty() -> Self {
        Self { item: None, occurrence: Occurrence::ZeroOrOne }
    }

    pub fn new(item: ItemTest, occurrence: Occurrence) -> Self {
        Self { item: Some(item), occurrence }
    }

    pub fn atomic(ty: AtomicType, occurrence: Occurrence) -> Self {
        Self::new(ItemTest::Atomic(ty), occurrence)
    }

    pub fn matches(&self, seq: &[XdmItem]) -> bool {
        match &self.item {
            None => seq.is_empty(),
            Some(test) => self.occurrence.allows(seq.len()) && seq.iter().all(|i| test.matches(i)),
        }
    }

    /// `seq` unchanged if it matches, otherwise `XPTY0004` naming `what`.
    pub fn check(&self, seq: XdmSequence, what: &str) -> Result<XdmSequence, Error> {
        if self.matches(&seq) {
            Ok(seq)
        } else {
            Err(Error::type_error(format!("{what}: value of {} item(s) does not match {self}", seq.len())))
        }
    }
}

impl fmt::Display for SequenceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let item = match &self.item {
            None => return f.write_str("empty-sequence()"),
            Some(ItemTest::AnyItem) => "item()".to_string(),
            Some(ItemTest::AnyNode) => "node()".to_string(),
            Some(ItemTest::Node(kind, name)) => {
                let kind = match kind {
                    NodeKind::Document => "document-node",
                    NodeKind::Element => "element",
                    NodeKind::Attribute => "attribute",
                    NodeKind::Text => "text",
                    NodeKind::Comment => "comment",
                    NodeKind::ProcessingInstruction => "processing-instruction",
                    NodeKind::Namespace => "namespace-node",
                };
                match name {
                    Some(n) => format!("{kind}({n})"),
                    None => format!("{kind}()"),
                }
            }
            Some(ItemTest::Atomic(t)) => t.name().to_string(),
            Some(ItemTest::AnyFunction) => "function(*)".to_string(),
        };
        write!(f, "{item}{}", self.occurrence.suffix())
    }
}

fn cast_error(value: &XdmAtomicValue, target: AtomicType) -> Error {
    Error::from_code(ErrorCode::FORG0001, format!("cannot cast '{value}' ({}) to {}", value.type_name(), target.name()))
}

fn parse_double(s: &str) -> Option<f64> {
    match s {
        "INF" | "+INF" => Some(f64::INFINITY),
        "-INF" => Some(f64::NEG_INFINITY),
        "NaN" => Some(f64::NAN),
        _ if s.contains(|c: char| c.is_ascii_digit()) && !s.contains(['i', 'I', 'n', 'N']) => s.parse().ok(),
        _ => None,
    }
}

fn parse_decimal(s: &str) -> Option<f64> {
    let digits = s.strip_prefix(['+', '-']).unwrap_or(s);
    let valid = !digits.is_empty()
        && digits.chars().filter(|c| *c == '.').count() <= 1
        && digits.chars().all(|c| c.is_ascii_digit() || c == '.')
        && digits != ".";
    if valid { s.parse().ok() } else { None }
}

#[allow(clippy::cast_possible_truncation, clippy::cast_precision_loss)]
fn f64_to_integer(d: f64) -> Option<i64> {
    (d.is_finite() && d.trunc().abs() < 9.2e18).then(|| d.trunc() as i64)
}

/// Cast one atomic value to `target` following the casting rules of the supported types.
pub fn cast_atomic(value: &XdmAtomicValue, target: AtomicType) -> Result<XdmAtomicValue, Error> {
    use XdmAtomicValue as V;
    if target != AtomicType::Numeric && target.matches(value) && !matches!(target, AtomicType::Decimal) {
        return Ok(value.clone());
    }
    let text = value.string_value();
    let trimmed = text.trim();
    let out = match target {
        AtomicType::AnyAtomic => Some(value.clone()),
        AtomicType::String => Some(V::String(text.as_str().into())),
        AtomicType::UntypedAtomic => Some(V::UntypedAtomic(text.as_str().into())),
        AtomicType::AnyUri => value.is_string_like().then(|| V::AnyUri(trimmed.into())),
        AtomicType::Boolean => match value {
            V::Integer(i) => Some(V::Boolean(*i != 0)),
            V::Decimal(d) | V::Double(d) => Some(V::Boolean(*d != 0.0 && !d.is_nan())),
            V::String(_) | V::UntypedAtomic(_) => match trimmed {
                "true" | "1" => Some(V::Boolean(true)),
                "false" | "0" => Some(V::Boolean(false)),
                _ => None,
            },
            _ => None,
        },
        AtomicType::Integer => match value {
            V::Boolean(b) => Some(V::Integer(i64::from(*b))),
            V::Decimal(d) | V::Double(d) => f64_to_integer(*d).map(V::Integer),
            V::String(_) | V::UntypedAtomic(_) => {
                trimmed.strip_prefix('+').unwrap_or(trimmed).parse::<i64>().ok().map(V::Integer)
            }
            _ => None,
        },
        AtomicType::Decimal => match value {
            V::Boolean(b) => Some(V::Decimal(if *b { 1.0 } else { 0.0 })),
            V::Integer(_) | V::Decimal(_) => value.as_f64().map(V::Decimal),
            V::Double(d) => d.is_finite().then_some(V::Decimal(*d)),
            V::String(_) | V::UntypedAtomic(_) => parse_decimal(trimmed).map(V::Decimal),
            _ => None,
        },
        AtomicType::Double | AtomicType::Numeric => match value {
            V::Boolean(b) => Some(V::Double(if *b { 1.0 } else { 0.0 })),
            V::Integer(_) | V::Decimal(_) if target == AtomicType::Numeric => Some(value.clone()),
            V::Integer(_) | V::Decimal(_) | V::Double(_) => value.as_f64().map(V::Double),
            V::String(_) | V::UntypedAtomic(_) => parse_double(trimmed).map(V::Double),
            _ => None,
        },
        AtomicType::QName => match value {
            V::String(_) | V::UntypedAtomic(_) => match trimmed.split_once(':') {
                Some((prefix, local)) => Some(V::QName(QName::new(None, Some(prefix), local))),
                None if !trimmed.is_empty() => Some(V::QName(QName::local(trimmed))),
                None => None,
            },
            _ => None,
        },
    };
    out.ok_or_else(|| cast_error(value, target))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::simple_node::elem;
    use rstest::rstest;

    #[rstest]
    #[case(XdmAtomicValue::from("42"), AtomicType::Integer, XdmAtomicValue::Integer(42))]
    #[case(XdmAtomicValue::from(" 1.5 "), AtomicType::Double, XdmAtomicValue::Double(1.5))]
    #[case(XdmAtomicValue::Double(2.7), AtomicType::Integer, XdmAtomicValue::Integer(2))]
    #[case(XdmAtomicValue::from("true"), AtomicType::Boolean, XdmAtomicValue::Boolean(true))]
    #[case(XdmAtomicValue::Integer(3), AtomicType::Decimal, XdmAtomicValue::Decimal(3.0))]
    #[case(XdmAtomicValue::Integer(3), AtomicType::String, XdmAtomicValue::from("3"))]
    #[case(XdmAtomicValue::from("INF"), AtomicType::Double, XdmAtomicValue::Double(f64::INFINITY))]
    fn casts(#[case] value: XdmAtomicValue, #[case] target: AtomicType, #[case] expected: XdmAtomicValue) {
        assert_eq!(cast_atomic(&value, target).unwrap(), expected);
    }

    #[rstest]
    #[case(XdmAtomicValue::from("abc"), AtomicType::Integer)]
    #[case(XdmAtomicValue::from("1e3"), AtomicType::Decimal)]
    #[case(XdmAtomicValue::Double(f64::NAN), AtomicType::Integer)]
    #[case(XdmAtomicValue::from("yes"), AtomicType::Boolean)]
    fn invalid_casts(#[case] value: XdmAtomicValue, #[case] target: AtomicType) {
        assert_eq!(cast_atomic(&value, target).unwrap_err().code, ErrorCode::FORG0001);
    }

    #[test]
    fn sequence_type_matching() {
        let ints = SequenceType::atomic(AtomicType::Integer, Occurrence::OneOrMore);
        assert!(ints.matches(&[XdmItem::from(1i64), XdmItem::from(2i64)]));
        assert!(!ints.matches(&[]));
        assert!(!ints.matches(&[XdmItem::from("a")]));
        assert!(SequenceType::empty().matches(&[]));
        let dec = SequenceType::atomic(AtomicType::Decimal, Occurrence::One);
        assert!(dec.matches(&[XdmItem::from(1i64)]));

        let a = elem("a").build().into_item();
        let named = SequenceType::new(ItemTest::Node(NodeKind::Element, Some(QName::local("a"))), Occurrence::One);
        assert!(named.matches(std::slice::from_ref(&a)));
        let other = SequenceType::new(ItemTest::Node(NodeKind::Element, Some(QName::local("b"))), Occurrence::One);
        assert!(!other.matches(&[a]));
        assert_eq!(other.to_string(), "element(b)");
        assert_eq!(ints.to_string(), "xs:integer+");
    }

    #[test]
    fn check_reports_type_errors() {
        let one = SequenceType::atomic(AtomicType::String, Occurrence::One);
        assert_eq!(one.check(vec![], "argument").unwrap_err().code, ErrorCode::XPTY0004);
        assert_eq!(one.check(vec![XdmItem::from("x")], "argument").unwrap().len(), 1);
    }
}
