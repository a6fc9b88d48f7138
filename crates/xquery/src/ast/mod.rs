//! Arena-backed abstract syntax tree shared by parser, optimizer and translator.
//!
//! Nodes own their children through the arena; the parent link is a plain index used for
//! navigation and in-place rewriting. Every structural mutation updates both sides of the
//! parent/child relation together.

pub mod dot;
pub mod kind;

pub use kind::{AstKind, EXTENSION_BASE, allocate_kinds};

use compact_str::CompactString;
use core::fmt;
use smallvec::SmallVec;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(u32);

impl NodeId {
    fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "n{}", self.0)
    }
}

#[derive(Debug, Clone)]
struct AstNode {
    kind: AstKind,
    value: Option<CompactString>,
    children: SmallVec<[NodeId; 4]>,
    parent: Option<NodeId>,
    properties: SmallVec<[(CompactString, CompactString); 1]>,
}

#[derive(Debug, Clone, Default)]
pub struct Ast {
    nodes: Vec<AstNode>,
    root: Option<NodeId>,
}

impl Ast {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn root(&self) -> Option<NodeId> {
        self.root
    }

    pub fn set_root(&mut self, root: NodeId) {
        self.root = Some(root);
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn create(&mut self, kind: AstKind) -> NodeId {
        self.push(kind, None)
    }

    pub fn create_value(&mut self, kind: AstKind, value: impl Into<CompactString>) -> NodeId {
        self.push(kind, Some(value.into()))
    }

    fn push(&mut self, kind: AstKind, value: Option<CompactString>) -> NodeId {
        let id = NodeId(u32::try_from(self.nodes.len()).unwrap_or(u32::MAX));
        self.nodes.push(AstNode { kind, value, children: SmallVec::new(), parent: None, properties: SmallVec::new() });
        id
    }

    /// Create a node and attach `children` in order.
    pub fn node(&mut self, kind: AstKind, children: &[NodeId]) -> NodeId {
        let id = self.create(kind);
        for &c in children {
            self.add_child(id, c);
        }
        id
    }

    pub fn kind(&self, id: NodeId) -> AstKind {
        self.nodes[id.index()].kind
    }

    pub fn set_kind(&mut self, id: NodeId, kind: AstKind) {
        self.nodes[id.index()].kind = kind;
    }

    pub fn value(&self, id: NodeId) -> Option<&str> {
        self.nodes[id.index()].value.as_deref()
    }

    pub fn set_value(&mut self, id: NodeId, value: impl Into<CompactString>) {
        self.nodes[id.index()].value = Some(value.into());
    }

    pub fn children(&self, id: NodeId) -> &[NodeId] {
        &self.nodes[id.index()].children
    }

    pub fn child(&self, id: NodeId, index: usize) -> Option<NodeId> {
        self.nodes[id.index()].children.get(index).copied()
    }

    pub fn child_count(&self, id: NodeId) -> usize {
        self.nodes[id.index()].children.len()
    }

    pub fn last_child(&self, id: NodeId) -> Option<NodeId> {
        self.nodes[id.index()].children.last().copied()
    }

    /// First child of the given kind.
    pub fn child_of_kind(&self, id: NodeId, kind: AstKind) -> Option<NodeId> {
        self.children(id).iter().copied().find(|c| self.kind(*c) == kind)
    }

    pub fn parent(&self, id: NodeId) -> Option<NodeId> {
        self.nodes[id.index()].parent
    }

    /// Position of `id` within its parent's child list.
    pub fn child_index(&self, id: NodeId) -> Option<usize> {
        let parent = self.parent(id)?;
        self.children(parent).iter().position(|c| *c == id)
    }

    pub fn ancestors(&self, id: NodeId) -> impl Iterator<Item = NodeId> + '_ {
        std::iter::successors(self.parent(id), |n| self.parent(*n))
    }

    pub fn is_ancestor_of(&self, ancestor: NodeId, node: NodeId) -> bool {
        self.ancestors(node).any(|a| a == ancestor)
    }

    /// `id` and all of its descendants in document (pre-)order.
    pub fn preorder(&self, id: NodeId) -> Vec<NodeId> {
        let mut out = Vec::new();
        let mut stack = vec![id];
        while let Some(n) = stack.pop() {
            out.push(n);
            stack.extend(self.children(n).iter().rev().copied());
        }
        out
    }

    fn detach(&mut self, child: NodeId) {
        if let Some(parent) = self.nodes[child.index()].parent.take() {
            self.nodes[parent.index()].children.retain(|c| *c != child);
        }
    }

    pub fn add_child(&mut self, parent: NodeId, child: NodeId) {
        self.detach(child);
        self.nodes[parent.index()].children.push(child);
        self.nodes[child.index()].parent = Some(parent);
    }

    pub fn insert_child(&mut self, parent: NodeId, index: usize, child: NodeId) {
        self.detach(child);
        let children = &mut self.nodes[parent.index()].children;
        let index = index.min(children.len());
        children.insert(index, child);
        self.nodes[child.index()].parent = Some(parent);
    }

    /// Replace the child at `index`, returning the now detached previous child.
    pub fn replace_child(&mut self, parent: NodeId, index: usize, child: NodeId) -> Option<NodeId> {
        self.detach(child);
        let old = *self.nodes[parent.index()].children.get(index)?;
        self.nodes[parent.index()].children[index] = child;
        self.nodes[child.index()].parent = Some(parent);
        self.nodes[old.index()].parent = None;
        Some(old)
    }

    /// Put `new` where `old` currently hangs. Returns false when `old` has no parent.
    pub fn replace(&mut self, old: NodeId, new: NodeId) -> bool {
        match (self.parent(old), self.child_index(old)) {
            (Some(parent), Some(index)) => self.replace_child(parent, index, new).is_some(),
            _ if self.root == Some(old) => {
                self.detach(new);
                self.root = Some(new);
                true
            }
            _ => false,
        }
    }

    pub fn remove_child(&mut self, parent: NodeId, index: usize) -> Option<NodeId> {
        let children = &mut self.nodes[parent.index()].children;
        if index >= children.len() {
            return None;
        }
        let old = children.remove(index);
        self.nodes[old.index()].parent = None;
        Some(old)
    }

    /// Deep copy of the subtree rooted at `id`. The copy is detached.
    pub fn copy_tree(&mut self, id: NodeId) -> NodeId {
        let src = self.nodes[id.index()].clone();
        let copy = self.push(src.kind, src.value);
        self.nodes[copy.index()].properties = src.properties;
        for child in src.children {
            let c = self.copy_tree(child);
            self.add_child(copy, c);
        }
        copy
    }

    pub fn property(&self, id: NodeId, key: &str) -> Option<&str> {
        self.nodes[id.index()].properties.iter().find(|(k, _)| k.as_str() == key).map(|(_, v)| v.as_str())
    }

    pub fn set_property(&mut self, id: NodeId, key: &str, value: impl Into<CompactString>) {
        let value = value.into();
        let props = &mut self.nodes[id.index()].properties;
        match props.iter_mut().find(|(k, _)| k.as_str() == key) {
            Some(entry) => entry.1 = value,
            None => props.push((key.into(), value)),
        }
    }

    pub fn properties(&self, id: NodeId) -> impl Iterator<Item = (&str, &str)> {
        self.nodes[id.index()].properties.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Compact textual rendering, e.g. `FlowrExpr(ForClause(...), ReturnClause(Int[1]))`.
    pub fn display(&self, id: NodeId) -> String {
        let mut out = String::new();
        self.write_node(&mut out, id);
        out
    }

    fn write_node(&self, out: &mut String, id: NodeId) {
        out.push_str(self.kind(id).name());
        if let Some(v) = self.value(id) {
            out.push('[');
            out.push_str(v);
            out.push(']');
        }
        let children = self.children(id);
        if !children.is_empty() {
            out.push('(');
            for (i, c) in children.iter().enumerate() {
                if i > 0 {
                    out.push_str(", ");
                }
                self.write_node(out, *c);
            }
            out.push(')');
        }
    }

    /// Structural equality of two subtrees (kind, value, children; properties included).
    pub fn same_tree(&self, a: NodeId, b: NodeId) -> bool {
        let (na, nb) = (&self.nodes[a.index()], &self.nodes[b.index()]);
        na.kind == nb.kind
            && na.value == nb.value
            && na.properties == nb.properties
            && na.children.len() == nb.children.len()
            && na.children.iter().zip(nb.children.iter()).all(|(x, y)| self.same_tree(*x, *y))
    }
}
