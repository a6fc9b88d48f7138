//! Node constructors. Constructed nodes are fresh [`SimpleNode`] trees; content nodes are
//! copied into them.

use super::context::QueryContext;
use super::tuple::Tuple;
use super::{Expr, ExprRef};
use crate::error::{Error, ErrorCode};
use crate::model::{NodeKind, QName, XdmNode};
use crate::simple_node::{self, SimpleNode, SimpleNodeBuilder};
use crate::xdm::{XdmAtomicValue, XdmItem, XdmSequence, atomize, atomize_opt};
use std::collections::{HashMap, HashSet};
use tracing::trace;

/// Name of an element, attribute or processing instruction constructor.
#[derive(Debug)]
pub enum ConstructorName {
    Fixed(QName),
    /// `element { expr } { ... }`; a prefixed string is expanded with the in-scope
    /// namespaces of the constructor.
    Computed { expr: ExprRef, namespaces: HashMap<String, String>, default_ns: Option<String> },
}

fn is_ncname(name: &str) -> bool {
    let mut chars = name.chars();
    chars.next().is_some_and(|c| c.is_alphabetic() || c == '_')
        && chars.all(|c| c.is_alphanumeric() || matches!(c, '_' | '-' | '.'))
}

impl ConstructorName {
    fn resolve(&self, ctx: &QueryContext, tuple: &Tuple) -> Result<QName, Error> {
        let (expr, namespaces, default_ns) = match self {
            ConstructorName::Fixed(name) => return Ok(name.clone()),
            ConstructorName::Computed { expr, namespaces, default_ns } => (expr, namespaces, default_ns),
        };
        let invalid = |lexical: &str| {
            Error::from_code(ErrorCode::XQDY0074, format!("'{lexical}' is not a valid constructor name"))
        };
        match atomize_opt(&expr.evaluate(ctx, tuple)?)? {
            Some(XdmAtomicValue::QName(q)) => Ok(q),
            Some(v) if v.is_string_like() => {
                let lexical = v.string_value();
                let lexical = lexical.trim();
                match lexical.split_once(':') {
                    Some((prefix, local)) if is_ncname(prefix) && is_ncname(local) => {
                        let uri = namespaces.get(prefix).ok_or_else(|| invalid(lexical))?;
                        Ok(QName::new(Some(uri), Some(prefix), local))
                    }
                    None if is_ncname(lexical) => Ok(QName::new(default_ns.as_deref(), None, lexical)),
                    _ => Err(invalid(lexical)),
                }
            }
            _ => Err(Error::type_error("constructor name must be a single xs:QName or string")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConstructorKind {
    Document,
    Element,
    Attribute,
    Text,
    Comment,
    ProcessingInstruction,
    Namespace,
}

/// One constructor. Each entry of `content` is one enclosed expression or one literal
/// text run; adjacent atomic values of one entry are joined with a space.
#[derive(Debug)]
pub struct NodeConstructor {
    pub kind: ConstructorKind,
    pub name: Option<ConstructorName>,
    pub content: Vec<ExprRef>,
}

/// Children of an element or document under construction. Text runs are merged until the
/// next node arrives.
struct Content {
    builder: SimpleNodeBuilder,
    attributes: HashSet<QName>,
    text: String,
    has_children: bool,
}

impl Content {
    fn new(builder: SimpleNodeBuilder) -> Self {
        Self { builder, attributes: HashSet::new(), text: String::new(), has_children: false }
    }

    fn flush(&mut self) {
        if !self.text.is_empty() {
            let text = simple_node::text(&std::mem::take(&mut self.text));
            self.push_child(text);
        }
    }

    fn push_child(&mut self, node: SimpleNode) {
        self.builder.push_child(node);
        self.has_children = true;
    }

    fn attribute(&mut self, node: &dyn XdmNode, element: bool) -> Result<(), Error> {
        if !element {
            return Err(Error::type_error("a document node cannot hold attributes"));
        }
        if self.has_children || !self.text.is_empty() {
            return Err(Error::from_code(ErrorCode::XQTY0024, "attribute constructed after element content"));
        }
        let name = node.name().ok_or_else(|| Error::illegal_state("attribute without name"))?;
        if !self.attributes.insert(name.clone()) {
            return Err(Error::from_code(ErrorCode::XQDY0025, format!("duplicate attribute {name}")));
        }
        self.builder.push_attr(SimpleNode::copy_of(node));
        Ok(())
    }

    fn add(&mut self, part: XdmSequence, element: bool) -> Result<(), Error> {
        let mut atomic_run = false;
        for item in part {
            match item {
                XdmItem::Atomic(a) => {
                    if atomic_run {
                        self.text.push(' ');
                    }
                    self.text.push_str(&a.string_value());
                    atomic_run = true;
                }
                XdmItem::Node(node) => {
                    atomic_run = false;
                    match node.kind() {
                        NodeKind::Attribute => self.attribute(node.as_ref(), element)?,
                        NodeKind::Text => self.text.push_str(&node.string_value()),
                        NodeKind::Document => {
                            for child in node.children() {
                                self.add(vec![XdmItem::Node(child)], element)?;
                            }
                        }
                        NodeKind::Namespace => {}
                        _ => {
                            self.flush();
                            self.push_child(SimpleNode::copy_of(node.as_ref()));
                        }
                    }
                }
            }
        }
        Ok(())
    }

    fn finish(mut self) -> SimpleNode {
        self.flush();
        self.builder.build()
    }
}

impl NodeConstructor {
    fn name(&self, ctx: &QueryContext, tuple: &Tuple) -> Result<QName, Error> {
        self.name
            .as_ref()
            .ok_or_else(|| Error::illegal_state("named constructor without name"))?
            .resolve(ctx, tuple)
    }

    /// Content as one string: atomic values of an entry joined with a space, entries
    /// concatenated.
    fn text(&self, ctx: &QueryContext, tuple: &Tuple) -> Result<Option<String>, Error> {
        let mut out: Option<String> = None;
        for part in &self.content {
            let values = atomize(&part.evaluate(ctx, tuple)?);
            if values.is_empty() {
                continue;
            }
            let joined = values.iter().map(XdmAtomicValue::string_value).collect::<Vec<_>>().join(" ");
            out.get_or_insert_with(String::new).push_str(&joined);
        }
        Ok(out)
    }

    fn tree(&self, ctx: &QueryContext, tuple: &Tuple, builder: SimpleNodeBuilder) -> Result<SimpleNode, Error> {
        let element = self.kind == ConstructorKind::Element;
        let mut content = Content::new(builder);
        for part in &self.content {
            content.add(part.evaluate(ctx, tuple)?, element)?;
        }
        Ok(content.finish())
    }
}

impl Expr for NodeConstructor {
    fn evaluate(&self, ctx: &QueryContext, tuple: &Tuple) -> Result<XdmSequence, Error> {
        let node = match self.kind {
            ConstructorKind::Document => self.tree(ctx, tuple, simple_node::doc())?,
            ConstructorKind::Element => {
                let name = self.name(ctx, tuple)?;
                self.tree(ctx, tuple, simple_node::element(name))?
            }
            ConstructorKind::Attribute => {
                let name = self.name(ctx, tuple)?;
                simple_node::attribute(name, &self.text(ctx, tuple)?.unwrap_or_default())
            }
            ConstructorKind::Text => match self.text(ctx, tuple)? {
                Some(value) => simple_node::text(&value),
                None => return Ok(Vec::new()),
            },
            ConstructorKind::Comment => {
                let value = self.text(ctx, tuple)?.unwrap_or_default();
                if value.contains("--") || value.ends_with('-') {
                    return Err(Error::from_code(ErrorCode::XQDY0072, format!("invalid comment content '{value}'")));
                }
                simple_node::comment(&value)
            }
            ConstructorKind::ProcessingInstruction => {
                let target = self.name(ctx, tuple)?;
                let value = self.text(ctx, tuple)?.unwrap_or_default();
                simple_node::processing_instruction(&target.local, value.trim_start())
            }
            ConstructorKind::Namespace => {
                let prefix = self.name(ctx, tuple)?;
                simple_node::namespace(&prefix.local, &self.text(ctx, tuple)?.unwrap_or_default())
            }
        };
        trace!(kind = ?self.kind, id = node.node_id(), "constructed node");
        Ok(vec![node.into_item()])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::ExprRef;
    use crate::runtime::expr::Literal;
    use crate::simple_node::{attr, elem, text};
    use std::sync::Arc;

    fn lit(items: Vec<XdmItem>) -> ExprRef {
        Arc::new(Literal::new(items))
    }

    fn element(name: &str, content: Vec<ExprRef>) -> NodeConstructor {
        NodeConstructor {
            kind: ConstructorKind::Element,
            name: Some(ConstructorName::Fixed(QName::local(name))),
            content,
        }
    }

    fn build(constructor: &NodeConstructor) -> Result<XdmItem, Error> {
        let mut out = constructor.evaluate(&QueryContext::default(), &Tuple::new())?;
        Ok(out.remove(0))
    }

    fn node(item: XdmItem) -> crate::model::NodeHandle {
        match item {
            XdmItem::Node(n) => n,
            XdmItem::Atomic(a) => panic!("expected a node, got {a}"),
        }
    }

    #[test]
    fn atomic_values_of_one_part_are_space_separated() {
        let e = element("a", vec![lit(vec![XdmItem::from(1), XdmItem::from(2)]), lit(vec![XdmItem::from("x")])]);
        let a = node(build(&e).unwrap());
        assert_eq!(a.string_value(), "1 2x");
        assert_eq!(a.children().len(), 1);
    }

    #[test]
    fn content_nodes_are_copied_under_the_new_element() {
        let original = elem("b").attr(attr("k", "v")).child(text("t")).build();
        let e = element("a", vec![lit(vec![original.clone().into_item()]), lit(vec![XdmItem::from("!")])]);
        let a = node(build(&e).unwrap());
        let kids = a.children();
        assert_eq!(kids.len(), 2);
        assert_ne!(kids[0].node_id(), original.node_id());
        assert_eq!(kids[0].parent().map(|p| p.node_id()), Some(a.node_id()));
        assert_eq!(kids[0].attributes().len(), 1);
        assert_eq!(a.string_value(), "t!");
    }

    #[test]
    fn attributes_must_come_first_and_only_once() {
        let late = element("a", vec![lit(vec![XdmItem::from("x")]), lit(vec![attr("k", "v").into_item()])]);
        assert_eq!(build(&late).unwrap_err().code, ErrorCode::XQTY0024);
        let twice = element("a", vec![lit(vec![attr("k", "1").into_item(), attr("k", "2").into_item()])]);
        assert_eq!(build(&twice).unwrap_err().code, ErrorCode::XQDY0025);
        let ok = element("a", vec![lit(vec![attr("k", "1").into_item(), attr("j", "2").into_item()])]);
        assert_eq!(node(build(&ok).unwrap()).attributes().len(), 2);
    }

    #[test]
    fn computed_names_must_be_qnames() {
        let named = |value: &str| NodeConstructor {
            kind: ConstructorKind::Element,
            name: Some(ConstructorName::Computed {
                expr: lit(vec![XdmItem::from(value)]),
                namespaces: HashMap::from([("p".to_string(), "urn:p".to_string())]),
                default_ns: None,
            }),
            content: Vec::new(),
        };
        let e = node(build(&named("p:item")).unwrap());
        assert_eq!(e.name(), Some(QName::new(Some("urn:p"), Some("p"), "item")));
        assert_eq!(build(&named("1st")).unwrap_err().code, ErrorCode::XQDY0074);
        assert_eq!(build(&named("q:item")).unwrap_err().code, ErrorCode::XQDY0074);
    }

    #[test]
    fn comments_reject_double_hyphens() {
        let comment = |value: &str| NodeConstructor {
            kind: ConstructorKind::Comment,
            name: None,
            content: vec![lit(vec![XdmItem::from(value)])],
        };
        assert_eq!(node(build(&comment("fine")).unwrap()).string_value(), "fine");
        assert_eq!(build(&comment("a--b")).unwrap_err().code, ErrorCode::XQDY0072);
        assert_eq!(build(&comment("end-")).unwrap_err().code, ErrorCode::XQDY0072);
    }

    #[test]
    fn empty_text_constructor_yields_nothing() {
        let t = NodeConstructor { kind: ConstructorKind::Text, name: None, content: vec![lit(Vec::new())] };
        assert!(t.evaluate(&QueryContext::default(), &Tuple::new()).unwrap().is_empty());
    }
}
