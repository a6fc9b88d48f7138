//! Boundary to document storage.
//!
//! The engine only needs to look collections up, create them and iterate their documents.
//! [`MemoryStore`] keeps collections of node handles in memory; persistent stores implement
//! the same traits.

use crate::error::{Error, ErrorCode};
use crate::model::NodeHandle;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

/// Produces the root of one subtree, e.g. by parsing a document.
pub trait SubtreeParser {
    fn parse(&mut self) -> Result<NodeHandle, Error>;
}

impl<F> SubtreeParser for F
where
    F: FnMut() -> Result<NodeHandle, Error>,
{
    fn parse(&mut self) -> Result<NodeHandle, Error> {
        self()
    }
}

pub trait Collection: Send + Sync {
    fn name(&self) -> &str;
    fn documents(&self) -> Result<Vec<NodeHandle>, Error>;
    fn add(&self, parser: &mut dyn SubtreeParser) -> Result<NodeHandle, Error>;
}

pub trait Store: Send + Sync {
    /// The collection called `name`; `FODC0002` if there is none.
    fn lookup(&self, name: &str) -> Result<Arc<dyn Collection>, Error>;
    fn create(&self, name: &str) -> Result<Arc<dyn Collection>, Error>;
    fn drop_collection(&self, name: &str) -> Result<(), Error>;
}

#[derive(Debug, Default)]
pub struct MemoryCollection {
    name: String,
    documents: Mutex<Vec<NodeHandle>>,
}

impl MemoryCollection {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into(), documents: Mutex::new(Vec::new()) }
    }
}

impl Collection for MemoryCollection {
    fn name(&self) -> &str {
        &self.name
    }

    fn documents(&self) -> Result<Vec<NodeHandle>, Error> {
        Ok(self.documents.lock().unwrap_or_else(PoisonError::into_inner).clone())
    }

    fn add(&self, parser: &mut dyn SubtreeParser) -> Result<NodeHandle, Error> {
        let root = parser.parse()?;
        self.documents.lock().unwrap_or_else(PoisonError::into_inner).push(root.clone());
        Ok(root)
    }
}

#[derive(Default)]
pub struct MemoryStore {
    collections: Mutex<HashMap<String, Arc<MemoryCollection>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Store for MemoryStore {
    fn lookup(&self, name: &str) -> Result<Arc<dyn Collection>, Error> {
        let collections = self.collections.lock().unwrap_or_else(PoisonError::into_inner);
        match collections.get(name) {
            Some(c) => Ok(c.clone() as Arc<dyn Collection>),
            None => Err(Error::from_code(ErrorCode::FODC0002, format!("collection not found: {name}"))),
        }
    }

    fn create(&self, name: &str) -> Result<Arc<dyn Collection>, Error> {
        let mut collections = self.collections.lock().unwrap_or_else(PoisonError::into_inner);
        let collection = collections.entry(name.to_string()).or_insert_with(|| Arc::new(MemoryCollection::new(name)));
        Ok(collection.clone() as Arc<dyn Collection>)
    }

    fn drop_collection(&self, name: &str) -> Result<(), Error> {
        let mut collections = self.collections.lock().unwrap_or_else(PoisonError::into_inner);
        match collections.remove(name) {
            Some(_) => Ok(()),
            None => Err(Error::from_code(ErrorCode::FODC0002, format!("collection not found: {name}"))),
        }
    }
}
