//! In-memory document store using HashMap.
//!
//! Useful for development and testing. Data is lost on restart.

use std::collections::HashMap;
use std::sync::RwLock;

use anyhow::Result;

use super::{matches, merged, Document, DocumentStore};

/// Collections of documents kept in insertion order.
#[derive(Default)]
pub struct MemoryDocumentStore {
    collections: RwLock<HashMap<String, Vec<Document>>>,
}

impl MemoryDocumentStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of documents in a collection.
    pub fn count(&self, collection: &str) -> usize {
        self.read(|c| c.get(collection).map_or(0, Vec::len))
    }

    fn read<R>(&self, f: impl FnOnce(&HashMap<String, Vec<Document>>) -> R) -> R {
        let guard = self.collections.read().unwrap_or_else(|e| e.into_inner());
        f(&guard)
    }

    fn write<R>(&self, f: impl FnOnce(&mut HashMap<String, Vec<Document>>) -> R) -> R {
        let mut guard = self.collections.write().unwrap_or_else(|e| e.into_inner());
        f(&mut guard)
    }
}

impl DocumentStore for MemoryDocumentStore {
    fn find(&self, collection: &str, filter: &Document) -> Result<Vec<Document>> {
        Ok(self.read(|c| {
            c.get(collection)
                .map(|docs| docs.iter().filter(|d| matches(d, filter)).cloned().collect())
                .unwrap_or_default()
        }))
    }

    fn upsert(&self, collection: &str, filter: &Document, fields: &Document) -> Result<()> {
        self.write(|c| {
            let docs = c.entry(collection.to_string()).or_default();
            match docs.iter_mut().find(|d| matches(d, filter)) {
                Some(doc) => {
                    for (key, value) in fields {
                        doc.insert(key.clone(), value.clone());
                    }
                }
                None => docs.push(merged(filter, fields)),
            }
        });
        Ok(())
    }

    fn find_and_remove(&self, collection: &str, filter: &Document) -> Result<Option<Document>> {
        Ok(self.write(|c| {
            let docs = c.get_mut(collection)?;
            let pos = docs.iter().position(|d| matches(d, filter))?;
            Some(docs.remove(pos))
        }))
    }

    fn insert(&self, collection: &str, document: &Document) -> Result<()> {
        self.write(|c| {
            c.entry(collection.to_string())
                .or_default()
                .push(document.clone())
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::document;
    use serde_json::json;

    #[test]
    fn test_memory_store() {
        let store = MemoryDocumentStore::new();
        let alice = document(json!({ "name": "alice" }));

        assert!(store.find_one("playerdata", &alice).unwrap().is_none());
        store
            .upsert("playerdata", &alice, &document(json!({ "bonusblocks": 5 })))
            .unwrap();
        store
            .upsert("playerdata", &alice, &document(json!({ "bonusblocks": 7 })))
            .unwrap();
        assert_eq!(store.count("playerdata"), 1);
        let doc = store.find_one("playerdata", &alice).unwrap().unwrap();
        assert_eq!(doc["bonusblocks"], 7);

        store.insert("playerdata", &alice).unwrap();
        assert_eq!(store.remove_all("playerdata", &alice).unwrap(), 2);
        assert_eq!(store.count("playerdata"), 0);
        assert!(store.find_and_remove("missing", &alice).unwrap().is_none());
    }
}
