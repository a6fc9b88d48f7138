use crate::xdm::{XdmAtomicValue, XdmSequence};
use core::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use string_cache::DefaultAtom;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NodeKind {
    Document,
    Element,
    Attribute,
    Text,
    Comment,
    ProcessingInstruction,
    Namespace,
}

/// Qualified name. Equality and hashing only consider namespace URI and local part.
#[derive(Debug, Clone)]
pub struct QName {
    pub ns_uri: Option<DefaultAtom>,
    pub prefix: Option<DefaultAtom>,
    pub local: DefaultAtom,
}

impl QName {
    pub fn new(ns_uri: Option<&str>, prefix: Option<&str>, local: &str) -> Self {
        Self { ns_uri: ns_uri.map(DefaultAtom::from), prefix: prefix.map(DefaultAtom::from), local: DefaultAtom::from(local) }
    }

    pub fn local(local: &str) -> Self {
        Self::new(None, None, local)
    }
}

impl PartialEq for QName {
    fn eq(&self, other: &Self) -> bool {
        self.ns_uri == other.ns_uri && self.local == other.local
    }
}

impl Eq for QName {}

impl Hash for QName {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.ns_uri.hash(state);
        self.local.hash(state);
    }
}

impl fmt::Display for QName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (&self.prefix, &self.ns_uri) {
            (Some(p), _) if !p.is_empty() => write!(f, "{}:{}", p, self.local),
            (None, Some(ns)) => write!(f, "Q{{{}}}{}", ns, self.local),
            _ => f.write_str(&self.local),
        }
    }
}

/// Node model boundary. Stores hand nodes to the engine through this trait; the engine never
/// mutates them (updates go through the pending update list).
pub trait XdmNode: fmt::Debug + Send + Sync {
    /// Stable identity. Nodes of one store compare in document order by this id.
    fn node_id(&self) -> u64;
    fn kind(&self) -> NodeKind;
    fn name(&self) -> Option<QName>;
    fn string_value(&self) -> String;
    fn typed_value(&self) -> XdmSequence {
        vec![crate::xdm::XdmItem::Atomic(XdmAtomicValue::UntypedAtomic(self.string_value().into()))]
    }
    fn children(&self) -> Vec<NodeHandle> {
        Vec::new()
    }
    fn attributes(&self) -> Vec<NodeHandle> {
        Vec::new()
    }
    fn parent(&self) -> Option<NodeHandle> {
        None
    }
}

pub type NodeHandle = Arc<dyn XdmNode>;
