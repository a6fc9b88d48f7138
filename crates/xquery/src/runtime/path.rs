//! Path expressions: axis steps over [`XdmNode`](crate::model::XdmNode) trees, the root
//! expression `/` and the `E1/E2` mapping that keeps results in document order.

use super::context::QueryContext;
use super::tuple::Tuple;
use super::types::ItemTest;
use super::variable::Slot;
use super::{Expr, ExprRef};
use crate::error::{Error, ErrorCode};
use crate::model::{NodeHandle, NodeKind, QName};
use crate::xdm::{XdmItem, XdmSequence};
use itertools::Itertools;
use std::sync::Arc;
use tracing::trace;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Axis {
    Child,
    Descendant,
    DescendantOrSelf,
    Attribute,
    SelfAxis,
    Parent,
    Ancestor,
    AncestorOrSelf,
    FollowingSibling,
    PrecedingSibling,
}

impl Axis {
    pub fn from_name(name: &str) -> Option<Self> {
        Some(match name {
            "child" => Axis::Child,
            "descendant" => Axis::Descendant,
            "descendant-or-self" => Axis::DescendantOrSelf,
            "attribute" => Axis::Attribute,
            "self" => Axis::SelfAxis,
            "parent" => Axis::Parent,
            "ancestor" => Axis::Ancestor,
            "ancestor-or-self" => Axis::AncestorOrSelf,
            "following-sibling" => Axis::FollowingSibling,
            "preceding-sibling" => Axis::PrecedingSibling,
            _ => return None,
        })
    }

    /// Node kind a name test selects on this axis.
    pub fn principal_kind(self) -> NodeKind {
        if self == Axis::Attribute { NodeKind::Attribute } else { NodeKind::Element }
    }

    /// Nodes on this axis, nearest first. Reverse axes therefore come out in reverse
    /// document order, which is what positional predicates count in.
    pub fn select(self, node: &NodeHandle) -> Vec<NodeHandle> {
        match self {
            Axis::SelfAxis => vec![node.clone()],
            Axis::Child => node.children(),
            Axis::Attribute => node.attributes(),
            Axis::Parent => node.parent().into_iter().collect(),
            Axis::Ancestor => ancestors(node),
            Axis::AncestorOrSelf => {
                let mut out = vec![node.clone()];
                out.extend(ancestors(node));
                out
            }
            Axis::Descendant => descendants(node, false),
            Axis::DescendantOrSelf => descendants(node, true),
            Axis::FollowingSibling | Axis::PrecedingSibling => {
                if node.kind() == NodeKind::Attribute {
                    return Vec::new();
                }
                let Some(parent) = node.parent() else { return Vec::new() };
                let siblings = parent.children();
                let Some(at) = siblings.iter().position(|s| s.node_id() == node.node_id()) else {
                    return Vec::new();
                };
                let (before, after) = siblings.split_at(at);
                if self == Axis::FollowingSibling {
                    after.iter().skip(1).cloned().collect()
                } else {
                    before.iter().rev().cloned().collect()
                }
            }
        }
    }
}

fn ancestors(node: &NodeHandle) -> Vec<NodeHandle> {
    let mut out = Vec::new();
    let mut current = node.parent();
    while let Some(parent) = current {
        current = parent.parent();
        out.push(parent);
    }
    out
}

fn descendants(node: &NodeHandle, include_self: bool) -> Vec<NodeHandle> {
    let mut out = Vec::new();
    if include_self {
        out.push(node.clone());
    }
    let mut stack: Vec<NodeHandle> = node.children();
    stack.reverse();
    while let Some(current) = stack.pop() {
        let mut children = current.children();
        children.reverse();
        stack.extend(children);
        out.push(current);
    }
    out
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NodeTest {
    /// A kind test such as `text()` or `element(a)`.
    Kind(ItemTest),
    Name(QName),
    /// `*`
    AnyName,
    /// `prefix:*`, holding the bound namespace URI.
    Namespace(Option<String>),
    /// `*:local`
    Local(String),
}

impl NodeTest {
    pub fn matches(&self, node: &NodeHandle, axis: Axis) -> bool {
        if let NodeTest::Kind(test) = self {
            return test.matches(&XdmItem::Node(node.clone()));
        }
        if node.kind() != axis.principal_kind() {
            return false;
        }
        let Some(name) = node.name() else { return false };
        match self {
            NodeTest::Name(q) => name == *q,
            NodeTest::AnyName => true,
            NodeTest::Namespace(uri) => name.ns_uri.as_deref() == uri.as_deref(),
            NodeTest::Local(local) => &*name.local == local,
            NodeTest::Kind(_) => false,
        }
    }
}

fn context_node(context: &ExprRef, ctx: &QueryContext, tuple: &Tuple) -> Result<NodeHandle, Error> {
    match context.evaluate(ctx, tuple)?.as_slice() {
        [XdmItem::Node(node)] => Ok(node.clone()),
        [item] => Err(Error::from_code(ErrorCode::XPTY0020, format!("axis step on {}", item_kind(item)))),
        items => Err(Error::from_code(
            ErrorCode::XPTY0020,
            format!("axis step needs one context node, found {} items", items.len()),
        )),
    }
}

fn item_kind(item: &XdmItem) -> String {
    match item {
        XdmItem::Node(n) => format!("{:?} node", n.kind()),
        XdmItem::Atomic(a) => a.type_name().to_string(),
    }
}

/// `axis::test` applied to the context item.
#[derive(Debug)]
pub struct AxisStep {
    pub axis: Axis,
    pub test: NodeTest,
    pub context: ExprRef,
}

impl Expr for AxisStep {
    fn evaluate(&self, ctx: &QueryContext, tuple: &Tuple) -> Result<XdmSequence, Error> {
        let node = context_node(&self.context, ctx, tuple)?;
        Ok(self
            .axis
            .select(&node)
            .into_iter()
            .filter(|n| self.test.matches(n, self.axis))
            .map(XdmItem::Node)
            .collect())
    }
}

/// Leading `/`: the document node above the context node.
#[derive(Debug)]
pub struct Root {
    pub context: ExprRef,
}

impl Expr for Root {
    fn evaluate(&self, ctx: &QueryContext, tuple: &Tuple) -> Result<XdmSequence, Error> {
        let mut node = context_node(&self.context, ctx, tuple)?;
        while let Some(parent) = node.parent() {
            node = parent;
        }
        if node.kind() != NodeKind::Document {
            return Err(Error::from_code(ErrorCode::XPDY0050, "the root of the context node is not a document"));
        }
        Ok(vec![XdmItem::Node(node)])
    }
}

/// `first/step/step...`. Every step runs once per item of the previous result with that
/// item as its focus.
#[derive(Debug)]
pub struct Path {
    pub first: ExprRef,
    pub steps: Vec<ExprRef>,
    pub item: Arc<Slot>,
    pub position: Arc<Slot>,
    pub last: Arc<Slot>,
}

fn node_id(item: &XdmItem) -> u64 {
    match item {
        XdmItem::Node(n) => n.node_id(),
        XdmItem::Atomic(_) => 0,
    }
}

/// Nodes sorted into document order without duplicates; atomic values as they came.
fn document_order(items: XdmSequence) -> Result<XdmSequence, Error> {
    let nodes = items.iter().filter(|i| matches!(i, XdmItem::Node(_))).count();
    if nodes == 0 {
        return Ok(items);
    }
    if nodes != items.len() {
        return Err(Error::from_code(ErrorCode::XPTY0018, "path step returned both nodes and atomic values"));
    }
    Ok(items.into_iter().sorted_by_key(node_id).dedup_by(|a, b| node_id(a) == node_id(b)).collect())
}

impl Expr for Path {
    fn evaluate(&self, ctx: &QueryContext, tuple: &Tuple) -> Result<XdmSequence, Error> {
        let mut current = self.first.evaluate(ctx, tuple)?;
        for step in &self.steps {
            if let Some(item) = current.iter().find(|i| matches!(i, XdmItem::Atomic(_))) {
                return Err(Error::from_code(ErrorCode::XPTY0019, format!("path step on {}", item_kind(item))));
            }
            let size = i64::try_from(current.len()).unwrap_or(i64::MAX);
            let mut out = Vec::new();
            for (index, item) in current.into_iter().enumerate() {
                let mut focus = tuple.clone();
                self.item.bind(&mut focus, Some(vec![item]))?;
                self.position.bind(&mut focus, Some(vec![XdmItem::from(i64::try_from(index + 1).unwrap_or(i64::MAX))]))?;
                self.last.bind(&mut focus, Some(vec![XdmItem::from(size)]))?;
                out.extend(step.evaluate(ctx, &focus)?);
            }
            current = document_order(out)?;
        }
        trace!(steps = self.steps.len(), items = current.len(), "path");
        Ok(current)
    }
}
