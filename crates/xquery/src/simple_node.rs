//! Small immutable in-memory tree implementing [`XdmNode`], for tests, the command line
//! front end and quick prototypes.
//!
//! ```
//! use platynui_xquery::simple_node::{attr, elem, text};
//! use platynui_xquery::model::XdmNode;
//!
//! // <root id="r"><child>Hello</child></root>
//! let root = elem("root").attr(attr("id", "r")).child(elem("child").child(text("Hello"))).build();
//! assert_eq!(root.string_value(), "Hello");
//! assert_eq!(root.children().len(), 1);
//! ```
//!
//! Node ids are drawn from a process-wide counter when a node (or builder) is created, so a
//! tree written top-down with the builder gets ids in document order.

use crate::model::{NodeHandle, NodeKind, QName, XdmNode};
use crate::xdm::XdmItem;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock, Weak};

static NEXT_ID: AtomicU64 = AtomicU64::new(1);

fn next_id() -> u64 {
    NEXT_ID.fetch_add(1, Ordering::Relaxed)
}

#[derive(Debug)]
struct Inner {
    id: u64,
    kind: NodeKind,
    name: Option<QName>,
    value: Option<String>,
    attributes: Vec<SimpleNode>,
    children: Vec<SimpleNode>,
    parent: RwLock<Option<Weak<Inner>>>,
}

/// Handle on one node. Parent links are weak; a handle reached by navigating from another
/// handle also holds the root it came from, so the tree stays alive while it is in use.
#[derive(Debug, Clone)]
pub struct SimpleNode(Arc<Inner>, Option<Arc<Inner>>);

impl SimpleNode {
    fn leaf(kind: NodeKind, name: Option<QName>, value: &str) -> Self {
        SimpleNode(Arc::new(Inner {
            id: next_id(),
            kind,
            name,
            value: Some(value.to_string()),
            attributes: Vec::new(),
            children: Vec::new(),
            parent: RwLock::new(None),
        }), None)
    }

    fn reached(&self, inner: &Arc<Inner>) -> NodeHandle {
        let anchor = self.1.clone().unwrap_or_else(|| self.0.clone());
        Arc::new(SimpleNode(inner.clone(), Some(anchor)))
    }

    fn adopt(&self, parent: &Arc<Inner>) {
        if let Ok(mut slot) = self.0.parent.write() {
            *slot = Some(Arc::downgrade(parent));
        }
    }

    /// Deep copy of any node with fresh ids, as node constructors copy their content.
    pub fn copy_of(node: &dyn XdmNode) -> SimpleNode {
        match node.kind() {
            kind @ (NodeKind::Element | NodeKind::Document) => {
                let mut builder = SimpleNodeBuilder::new(kind, node.name());
                for attribute in node.attributes() {
                    builder = builder.attr(SimpleNode::copy_of(attribute.as_ref()));
                }
                for child in node.children() {
                    builder = builder.child(SimpleNode::copy_of(child.as_ref()));
                }
                builder.build()
            }
            kind => SimpleNode::leaf(kind, node.name(), &node.string_value()),
        }
    }

    pub fn attributes(&self) -> &[SimpleNode] {
        &self.0.attributes
    }

    pub fn handle(&self) -> NodeHandle {
        Arc::new(self.clone())
    }

    pub fn into_item(self) -> XdmItem {
        XdmItem::Node(Arc::new(self))
    }
}

impl PartialEq for SimpleNode {
    fn eq(&self, other: &Self) -> bool {
        self.0.id == other.0.id
    }
}

impl Eq for SimpleNode {}

pub struct SimpleNodeBuilder {
    id: u64,
    kind: NodeKind,
    name: Option<QName>,
    attributes: Vec<SimpleNode>,
    children: Vec<SimpleNode>,
}

impl SimpleNodeBuilder {
    fn new(kind: NodeKind, name: Option<QName>) -> Self {
        Self { id: next_id(), kind, name, attributes: Vec::new(), children: Vec::new() }
    }

    #[must_use]
    pub fn child(mut self, child: impl Into<SimpleNodeOrBuilder>) -> Self {
        self.children.push(match child.into() {
            SimpleNodeOrBuilder::Built(node) => node,
            SimpleNodeOrBuilder::Builder(builder) => builder.build(),
        });
        self
    }

    #[must_use]
    pub fn attr(mut self, attribute: SimpleNode) -> Self {
        self.push_attr(attribute);
        self
    }

    pub fn push_child(&mut self, child: SimpleNode) {
        self.children.push(child);
    }

    pub fn push_attr(&mut self, attribute: SimpleNode) {
        debug_assert!(attribute.0.kind == NodeKind::Attribute);
        self.attributes.push(attribute);
    }

    /// Finish the node and link its attributes and children back to it.
    pub fn build(self) -> SimpleNode {
        let inner = Arc::new(Inner {
            id: self.id,
            kind: self.kind,
            name: self.name,
            value: None,
            attributes: self.attributes,
            children: self.children,
            parent: RwLock::new(None),
        });
        for node in inner.attributes.iter().chain(&inner.children) {
            node.adopt(&inner);
        }
        SimpleNode(inner, None)
    }

    pub fn build_handle(self) -> NodeHandle {
        self.build().handle()
    }
}

pub enum SimpleNodeOrBuilder {
    Built(SimpleNode),
    Builder(SimpleNodeBuilder),
}

impl From<SimpleNode> for SimpleNodeOrBuilder {
    fn from(n: SimpleNode) -> Self {
        SimpleNodeOrBuilder::Built(n)
    }
}

impl From<SimpleNodeBuilder> for SimpleNodeOrBuilder {
    fn from(b: SimpleNodeBuilder) -> Self {
        SimpleNodeOrBuilder::Builder(b)
    }
}

pub fn doc() -> SimpleNodeBuilder {
    SimpleNodeBuilder::new(NodeKind::Document, None)
}

pub fn elem(name: &str) -> SimpleNodeBuilder {
    element(QName::local(name))
}

pub fn element(name: QName) -> SimpleNodeBuilder {
    SimpleNodeBuilder::new(NodeKind::Element, Some(name))
}

pub fn text(value: &str) -> SimpleNode {
    SimpleNode::leaf(NodeKind::Text, None, value)
}

pub fn attr(name: &str, value: &str) -> SimpleNode {
    attribute(QName::local(name), value)
}

pub fn attribute(name: QName, value: &str) -> SimpleNode {
    SimpleNode::leaf(NodeKind::Attribute, Some(name), value)
}

pub fn processing_instruction(target: &str, value: &str) -> SimpleNode {
    SimpleNode::leaf(NodeKind::ProcessingInstruction, Some(QName::local(target)), value)
}

pub fn namespace(prefix: &str, uri: &str) -> SimpleNode {
    SimpleNode::leaf(NodeKind::Namespace, Some(QName::local(prefix)), uri)
}

pub fn comment(value: &str) -> SimpleNode {
    SimpleNode::leaf(NodeKind::Comment, None, value)
}

impl XdmNode for SimpleNode {
    fn node_id(&self) -> u64 {
        self.0.id
    }

    fn kind(&self) -> NodeKind {
        self.0.kind
    }

    fn name(&self) -> Option<QName> {
        self.0.name.clone()
    }

    fn string_value(&self) -> String {
        match self.0.kind {
            NodeKind::Element | NodeKind::Document => {
                fn collect(node: &SimpleNode, out: &mut String) {
                    for child in &node.0.children {
                        match child.0.kind {
                            NodeKind::Text => out.push_str(child.0.value.as_deref().unwrap_or_default()),
                            NodeKind::Element => collect(child, out),
                            _ => {}
                        }
                    }
                }
                let mut out = String::new();
                collect(self, &mut out);
                out
            }
            _ => self.0.value.clone().unwrap_or_default(),
        }
    }

    fn children(&self) -> Vec<NodeHandle> {
        self.0.children.iter().map(|c| self.reached(&c.0)).collect()
    }

    fn attributes(&self) -> Vec<NodeHandle> {
        self.0.attributes.iter().map(|a| self.reached(&a.0)).collect()
    }

    fn parent(&self) -> Option<NodeHandle> {
        let parent = self.0.parent.read().ok()?.as_ref()?.upgrade()?;
        Some(self.reached(&parent))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_ids_follow_document_order() {
        let root = doc().child(elem("a").child(text("x")).child(elem("b").child(text("y")))).build();
        let a = root.children()[0].clone();
        assert!(root.node_id() < a.node_id());
        let kids = a.children();
        assert!(kids[0].node_id() < kids[1].node_id());
        assert_eq!(root.string_value(), "xy");
        assert_eq!(a.name().map(|n| n.local.to_string()).as_deref(), Some("a"));
    }

    #[test]
    fn attributes_are_kept_apart_from_children() {
        let e = elem("e").attr(attr("k", "v")).child(comment("c")).build();
        assert_eq!(e.attributes().len(), 1);
        assert_eq!(e.attributes()[0].string_value(), "v");
        assert_eq!(e.children().len(), 1);
        assert_eq!(e.string_value(), "");
    }

    #[test]
    fn built_nodes_know_their_parent() {
        let root = doc().child(elem("a").attr(attr("k", "v")).child(text("x"))).build();
        let a = root.children()[0].clone();
        assert_eq!(a.parent().map(|p| p.node_id()), Some(root.node_id()));
        assert_eq!(a.children()[0].parent().map(|p| p.node_id()), Some(a.node_id()));
        assert_eq!(XdmNode::attributes(a.as_ref())[0].parent().map(|p| p.node_id()), Some(a.node_id()));
        assert!(root.parent().is_none());
    }

    #[test]
    fn copies_get_fresh_ids_in_document_order() {
        let original = elem("a").attr(attr("k", "v")).child(elem("b").child(text("x"))).build();
        let copy = SimpleNode::copy_of(&original);
        assert!(copy.node_id() > original.node_id());
        assert_eq!(copy.attributes()[0].string_value(), "v");
        let b = copy.children()[0].clone();
        assert!(b.node_id() > copy.node_id());
        assert_eq!(copy.string_value(), "x");
        assert!(copy.parent().is_none());
    }

    #[test]
    fn navigated_handles_keep_the_tree_alive() {
        let leaf = {
            let root = elem("a").child(elem("b").child(text("x"))).build();
            root.children()[0].children()[0].clone()
        };
        let b = leaf.parent().unwrap();
        assert_eq!(b.name().map(|n| n.local.to_string()).as_deref(), Some("b"));
        assert_eq!(b.parent().and_then(|a| a.name()).map(|n| n.local.to_string()).as_deref(), Some("a"));
    }
}
