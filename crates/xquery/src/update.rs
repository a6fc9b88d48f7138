//! Pending update list of the update facility.
//!
//! Updating expressions never touch nodes during the read phase; they append operations to
//! the query context's [`UpdateList`]. Once the read phase has finished the list is sorted by
//! application order, checked for conflicting targets and handed operation by operation to
//! an external [`UpdateApplier`].

use crate::error::{Error, ErrorCode};
use crate::model::{NodeHandle, QName};
use crate::xdm::XdmSequence;
use core::fmt;
use tracing::debug;

/// Operation kinds in application order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum UpdateKind {
    InsertInto,
    ReplaceValue,
    Rename,
    InsertBefore,
    InsertAfter,
    InsertIntoAsFirst,
    InsertIntoAsLast,
    ReplaceNode,
    ReplaceElementContent,
    Delete,
}

impl UpdateKind {
    /// Error raised when two operations of this kind share a target, if that is a conflict.
    fn conflict_code(self) -> Option<ErrorCode> {
        match self {
            UpdateKind::Rename => Some(ErrorCode::XUDY0015),
            UpdateKind::ReplaceNode => Some(ErrorCode::XUDY0016),
            UpdateKind::ReplaceValue => Some(ErrorCode::XUDY0017),
            UpdateKind::ReplaceElementContent => Some(ErrorCode::XUDY0021),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
pub enum UpdatePayload {
    None,
    Nodes(XdmSequence),
    Name(QName),
    Value(String),
}

#[derive(Debug, Clone)]
pub struct UpdateOp {
    pub kind: UpdateKind,
    pub target: NodeHandle,
    pub payload: UpdatePayload,
}

impl UpdateOp {
    pub fn new(kind: UpdateKind, target: NodeHandle, payload: UpdatePayload) -> Self {
        Self { kind, target, payload }
    }
}

impl fmt::Display for UpdateOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?} on node {}", self.kind, self.target.node_id())
    }
}

/// Receives checked operations in application order. Implemented by stores.
pub trait UpdateApplier {
    fn apply(&mut self, op: &UpdateOp) -> Result<(), Error>;
}

#[derive(Debug, Clone, Default)]
pub struct UpdateList {
    ops: Vec<UpdateOp>,
}

impl UpdateList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn append(&mut self, op: UpdateOp) {
        self.ops.push(op);
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    pub fn ops(&self) -> &[UpdateOp] {
        &self.ops
    }

    /// Sort by application order (stable within a kind) and reject operations of a
    /// conflict-checked kind that share a target.
    pub fn check(&mut self) -> Result<(), Error> {
        self.ops.sort_by_key(|op| op.kind);
        for (i, first) in self.ops.iter().enumerate() {
            let Some(code) = first.kind.conflict_code() else { continue };
            for second in self.ops[i + 1..].iter().take_while(|op| op.kind == first.kind) {
                if first.target.node_id() == second.target.node_id() {
                    return Err(Error::from_code(
                        code,
                        format!("node {} is target of more than one {:?} operation", first.target.node_id(), first.kind),
                    ));
                }
            }
        }
        Ok(())
    }

    /// Check the list and apply every operation. Returns the number of applied operations.
    pub fn apply(mut self, applier: &mut dyn UpdateApplier) -> Result<usize, Error> {
        self.check()?;
        for op in &self.ops {
            debug!(%op, "applying pending update");
            applier.apply(op)?;
        }
        Ok(self.ops.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::simple_node::{elem, text};

    #[derive(Default)]
    struct Recorder(Vec<UpdateKind>);

    impl UpdateApplier for Recorder {
        fn apply(&mut self, op: &UpdateOp) -> Result<(), Error> {
            self.0.push(op.kind);
            Ok(())
        }
    }

    #[test]
    fn ops_are_applied_in_kind_order() {
        let a: NodeHandle = elem("a").build_handle();
        let b: NodeHandle = elem("b").build_handle();
        let mut list = UpdateList::new();
        list.append(UpdateOp::new(UpdateKind::Delete, a.clone(), UpdatePayload::None));
        list.append(UpdateOp::new(UpdateKind::Rename, b.clone(), UpdatePayload::Name(QName::local("c"))));
        list.append(UpdateOp::new(UpdateKind::InsertInto, a, UpdatePayload::Nodes(vec![text("x").into_item()])));
        list.append(UpdateOp::new(UpdateKind::ReplaceValue, b, UpdatePayload::Value("v".into())));
        let mut recorder = Recorder::default();
        assert_eq!(list.apply(&mut recorder).unwrap(), 4);
        assert_eq!(
            recorder.0,
            vec![UpdateKind::InsertInto, UpdateKind::ReplaceValue, UpdateKind::Rename, UpdateKind::Delete]
        );
    }

    #[test]
    fn duplicate_targets_conflict_per_kind() {
        let a: NodeHandle = elem("a").build_handle();
        for (kind, code) in [
            (UpdateKind::Rename, ErrorCode::XUDY0015),
            (UpdateKind::ReplaceNode, ErrorCode::XUDY0016),
            (UpdateKind::ReplaceValue, ErrorCode::XUDY0017),
            (UpdateKind::ReplaceElementContent, ErrorCode::XUDY0021),
        ] {
            let mut list = UpdateList::new();
            list.append(UpdateOp::new(kind, a.clone(), UpdatePayload::None));
            list.append(UpdateOp::new(UpdateKind::Delete, a.clone(), UpdatePayload::None));
            list.append(UpdateOp::new(kind, a.clone(), UpdatePayload::None));
            let err = list.apply(&mut Recorder::default()).unwrap_err();
            assert_eq!(err.code, code);
        }
    }

    #[test]
    fn repeated_deletes_are_fine() {
        let a: NodeHandle = elem("a").build_handle();
        let mut list = UpdateList::new();
        list.append(UpdateOp::new(UpdateKind::Delete, a.clone(), UpdatePayload::None));
        list.append(UpdateOp::new(UpdateKind::Delete, a, UpdatePayload::None));
        assert_eq!(list.apply(&mut Recorder::default()).unwrap(), 2);
    }
}
