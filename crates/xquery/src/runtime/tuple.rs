use crate::xdm::XdmSequence;
use smallvec::SmallVec;

/// One tuple column. `None` is the null column (e.g. a reset counter or a padded slot).
pub type Column = Option<XdmSequence>;

/// Fixed-arity positional row flowing through an operator pipeline.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Tuple {
    columns: SmallVec<[Column; 6]>,
}

impl Tuple {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_columns(columns: impl IntoIterator<Item = Column>) -> Self {
        Self { columns: columns.into_iter().collect() }
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    /// Value at `pos`; `None` for a null column or a position past the end.
    pub fn get(&self, pos: usize) -> Option<&XdmSequence> {
        self.columns.get(pos).and_then(Option::as_ref)
    }

    pub fn push(&mut self, column: Column) {
        self.columns.push(column);
    }

    /// Copy of `self` extended by `columns`.
    #[must_use]
    pub fn concat(&self, columns: impl IntoIterator<Item = Column>) -> Tuple {
        let mut out = self.clone();
        out.columns.extend(columns);
        out
    }

    /// Columns from `start` to the end.
    pub fn tail(&self, start: usize) -> &[Column] {
        self.columns.get(start..).unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::xdm::XdmItem;

    #[test]
    fn null_and_missing_columns_read_as_none() {
        let t = Tuple::from_columns([Some(vec![XdmItem::from(1i64)]), None]);
        assert_eq!(t.len(), 2);
        assert_eq!(t.get(0), Some(&vec![XdmItem::from(1i64)]));
        assert_eq!(t.get(1), None);
        assert_eq!(t.get(7), None);
    }

    #[test]
    fn concat_keeps_the_original() {
        let t = Tuple::from_columns([Some(vec![XdmItem::from("a")])]);
        let u = t.concat([None, Some(Vec::new())]);
        assert_eq!(t.len(), 1);
        assert_eq!(u.len(), 3);
        assert_eq!(u.tail(1), &[None, Some(Vec::new())]);
        assert!(u.tail(5).is_empty());
    }
}
