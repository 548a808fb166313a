//! Document-store transport and the claim backend built on it.
//!
//! A document store keeps JSON objects in named collections and matches them
//! with equality filters: a document matches when every field of the filter
//! is present with an equal value. An empty filter matches everything.

mod backend;
mod memory;
mod postgres;

use std::sync::Arc;

use anyhow::Result;
use serde_json::{Map, Value};

pub use backend::DocumentBackend;
pub use memory::MemoryDocumentStore;
pub use postgres::{PostgresDocumentStore, PostgresSettings};

pub type Document = Map<String, Value>;

/// Abstract storage interface for documents.
///
/// Implementations:
/// - `MemoryDocumentStore` - in-memory HashMap (tests, throwaway servers)
/// - `PostgresDocumentStore` - one JSONB table per collection
pub trait DocumentStore: Send + Sync {
    /// All matching documents, oldest first.
    fn find(&self, collection: &str, filter: &Document) -> Result<Vec<Document>>;

    fn find_one(&self, collection: &str, filter: &Document) -> Result<Option<Document>> {
        Ok(self.find(collection, filter)?.into_iter().next())
    }

    /// Merge `fields` into the first matching document, or insert
    /// `filter + fields` when nothing matches.
    fn upsert(&self, collection: &str, filter: &Document, fields: &Document) -> Result<()>;

    /// Remove the first matching document and return it.
    fn find_and_remove(&self, collection: &str, filter: &Document) -> Result<Option<Document>>;

    fn insert(&self, collection: &str, document: &Document) -> Result<()>;

    /// Remove matching documents one at a time until none is left. Stores do
    /// not enforce unique keys, so one logical record may exist many times.
    fn remove_all(&self, collection: &str, filter: &Document) -> Result<usize> {
        let mut removed = 0;
        while self.find_and_remove(collection, filter)?.is_some() {
            removed += 1;
        }
        Ok(removed)
    }
}

impl<T: DocumentStore + ?Sized> DocumentStore for Arc<T> {
    fn find(&self, collection: &str, filter: &Document) -> Result<Vec<Document>> {
        (**self).find(collection, filter)
    }

    fn find_one(&self, collection: &str, filter: &Document) -> Result<Option<Document>> {
        (**self).find_one(collection, filter)
    }

    fn upsert(&self, collection: &str, filter: &Document, fields: &Document) -> Result<()> {
        (**self).upsert(collection, filter, fields)
    }

    fn find_and_remove(&self, collection: &str, filter: &Document) -> Result<Option<Document>> {
        (**self).find_and_remove(collection, filter)
    }

    fn insert(&self, collection: &str, document: &Document) -> Result<()> {
        (**self).insert(collection, document)
    }
}

/// Build a document from a `serde_json::json!` object literal.
pub fn document(value: Value) -> Document {
    match value {
        Value::Object(map) => map,
        _ => Map::new(),
    }
}

/// Whether `doc` satisfies the equality filter.
pub fn matches(doc: &Document, filter: &Document) -> bool {
    filter.iter().all(|(key, want)| doc.get(key) == Some(want))
}

/// `filter` with `fields` laid over it.
pub fn merged(filter: &Document, fields: &Document) -> Document {
    let mut doc = filter.clone();
    for (key, value) in fields {
        doc.insert(key.clone(), value.clone());
    }
    doc
}
