//! Lexical variable scopes threaded through the parser.
//!
//! Scopes form a tree addressed by index. Two cursors point into it: `current` receives new
//! declarations, `resolve_in` is where lookups start. Keeping them apart lets a binding clause
//! declare its variable while the clause's own expression still resolves against the
//! enclosing scope; `offer_scope` then makes the new names visible.

use crate::error::Error;
use std::collections::HashMap;

#[derive(Debug, Default)]
struct Scope {
    parent: Option<usize>,
    names: HashMap<String, String>,
}

#[derive(Debug)]
pub struct VarScopes {
    scopes: Vec<Scope>,
    current: usize,
    resolve_in: usize,
    level: usize,
    id_sequence: u64,
}

impl Default for VarScopes {
    fn default() -> Self {
        Self::new()
    }
}

impl VarScopes {
    pub fn new() -> Self {
        Self { scopes: vec![Scope::default()], current: 0, resolve_in: 0, level: 0, id_sequence: 0 }
    }

    /// Nesting depth of the declaration scope; 0 is the module level.
    pub fn level(&self) -> usize {
        self.level
    }

    pub fn open_scope(&mut self) {
        self.scopes.push(Scope { parent: Some(self.current), names: HashMap::new() });
        self.current = self.scopes.len() - 1;
        self.level += 1;
    }

    pub fn close_scope(&mut self) -> Result<(), Error> {
        let parent = match self.scopes[self.current].parent {
            Some(p) if self.level > 0 => p,
            _ => return Err(Error::illegal_state("close_scope without open scope")),
        };
        if self.resolve_in == self.current {
            self.resolve_in = parent;
        }
        self.current = parent;
        self.level -= 1;
        Ok(())
    }

    /// Make declarations of the current scope visible to subsequent lookups.
    pub fn offer_scope(&mut self) {
        self.resolve_in = self.current;
    }

    /// Declare `name` in the current scope and return its internal name. Module-level names
    /// stay unqualified; nested names get a unique `;id` suffix.
    pub fn declare(&mut self, name: &str) -> Result<String, Error> {
        let scope = &mut self.scopes[self.current];
        if scope.names.contains_key(name) {
            return Err(Error::duplicate(name));
        }
        let internal = if self.level == 0 {
            name.to_string()
        } else {
            let id = self.id_sequence;
            self.id_sequence += 1;
            format!("{name};{id}")
        };
        scope.names.insert(name.to_string(), internal.clone());
        Ok(internal)
    }

    pub fn resolve(&self, name: &str) -> Result<String, Error> {
        let mut scope = Some(self.resolve_in);
        while let Some(index) = scope {
            let s = &self.scopes[index];
            if let Some(internal) = s.names.get(name) {
                return Ok(internal.clone());
            }
            scope = s.parent;
        }
        Err(Error::undefined(name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorCode;

    #[test]
    fn module_level_names_are_plain() {
        let mut s = VarScopes::new();
        assert_eq!(s.declare("x").unwrap(), "x");
        assert_eq!(s.resolve("x").unwrap(), "x");
    }

    #[test]
    fn nested_names_are_suffixed_and_unique() {
        let mut s = VarScopes::new();
        s.open_scope();
        let a = s.declare("x").unwrap();
        s.open_scope();
        let b = s.declare("x").unwrap();
        assert_ne!(a, b);
        assert!(a.starts_with("x;"));
    }

    #[test]
    fn declaration_hidden_until_offered() {
        let mut s = VarScopes::new();
        s.declare("x").unwrap();
        s.open_scope();
        let inner = s.declare("x").unwrap();
        assert_eq!(s.resolve("x").unwrap(), "x");
        s.offer_scope();
        assert_eq!(s.resolve("x").unwrap(), inner);
        s.close_scope().unwrap();
        assert_eq!(s.resolve("x").unwrap(), "x");
    }

    #[test]
    fn duplicate_in_same_scope_fails() {
        let mut s = VarScopes::new();
        s.open_scope();
        s.declare("x").unwrap();
        assert_eq!(s.declare("x").unwrap_err().code, ErrorCode::XQST0049);
    }

    #[test]
    fn sibling_scope_is_invisible() {
        let mut s = VarScopes::new();
        s.open_scope();
        s.declare("x").unwrap();
        s.offer_scope();
        s.close_scope().unwrap();
        s.open_scope();
        s.offer_scope();
        assert_eq!(s.resolve("x").unwrap_err().code, ErrorCode::XPST0008);
    }

    #[test]
    fn closing_module_scope_is_illegal() {
        let mut s = VarScopes::new();
        assert_eq!(s.close_scope().unwrap_err().code, ErrorCode::BIST0001);
    }

    proptest::proptest! {
        #[test]
        fn balanced_scopes_resolve_innermost(shadows in proptest::collection::vec(proptest::bool::ANY, 1..12)) {
            let mut s = VarScopes::new();
            let outer = s.declare("v").unwrap();
            let mut visible = vec![outer.clone()];
            for &shadow in &shadows {
                s.open_scope();
                if shadow {
                    visible.push(s.declare("v").unwrap());
                } else {
                    visible.push(visible[visible.len() - 1].clone());
                }
                s.offer_scope();
                proptest::prop_assert_eq!(&s.resolve("v").unwrap(), &visible[visible.len() - 1]);
            }
            for _ in &shadows {
                s.close_scope().unwrap();
                visible.pop();
                proptest::prop_assert_eq!(&s.resolve("v").unwrap(), &visible[visible.len() - 1]);
            }
            proptest::prop_assert_eq!(s.level(), 0);
            proptest::prop_assert_eq!(s.resolve("v").unwrap(), outer);
            proptest::prop_assert!(s.close_scope().is_err());
        }
    }
}
