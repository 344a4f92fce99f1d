//! In-memory [`Store`] implementation for testing.
//!
//! Collections are `Vec`s of documents behind a single `std::sync::RwLock`,
//! so insertion order is preserved and every operation is atomic with
//! respect to the others. Unique keys are checked by scanning.

use std::collections::HashMap;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use anyhow::anyhow;
use async_trait::async_trait;
use serde_json::Value;

use super::{
    document_id, key_values, now_timestamp, stamp_new, validate_collection_name, CollectionSpec,
    Document, Filter, Store, StoreError, StoreResult, Update, ID_FIELD, UPDATED_AT_FIELD,
};

#[derive(Default)]
struct Collection {
    unique: Vec<Vec<String>>,
    docs: Vec<Document>,
}

impl Collection {
    /// Returns the first unique key that `candidate` would violate, ignoring
    /// the document at `skip`.
    fn violated_key(&self, candidate: &Document, skip: Option<usize>) -> Option<Vec<String>> {
        let id = document_id(candidate);
        let id_taken = self
            .docs
            .iter()
            .enumerate()
            .any(|(i, d)| Some(i) != skip && document_id(d) == id);
        if id_taken {
            return Some(vec![ID_FIELD.to_string()]);
        }
        self.unique
            .iter()
            .find(|fields| {
                let key = key_values(candidate, fields);
                self.docs
                    .iter()
                    .enumerate()
                    .any(|(i, d)| Some(i) != skip && key_values(d, fields) == key)
            })
            .cloned()
    }
}

/// In-memory store for tests.
pub struct InMemoryStore {
    collections: RwLock<HashMap<String, Collection>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self {
            collections: RwLock::new(HashMap::new()),
        }
    }

    fn read(&self) -> StoreResult<RwLockReadGuard<'_, HashMap<String, Collection>>> {
        self.collections
            .read()
            .map_err(|_| StoreError::Backend(anyhow!("in-memory store lock poisoned")))
    }

    fn write(&self) -> StoreResult<RwLockWriteGuard<'_, HashMap<String, Collection>>> {
        self.collections
            .write()
            .map_err(|_| StoreError::Backend(anyhow!("in-memory store lock poisoned")))
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Store for InMemoryStore {
    async fn ensure_collection(&self, spec: &CollectionSpec) -> StoreResult<()> {
        validate_collection_name(&spec.name)?;
        let mut collections = self.write()?;
        let coll = collections.entry(spec.name.clone()).or_default();
        for key in &spec.unique {
            if !coll.unique.contains(key) {
                coll.unique.push(key.clone());
            }
        }
        Ok(())
    }

    async fn collection_exists(&self, name: &str) -> StoreResult<bool> {
        Ok(self.read()?.contains_key(name))
    }

    async fn list_collections(&self) -> StoreResult<Vec<String>> {
        let mut names: Vec<String> = self.read()?.keys().cloned().collect();
        names.sort();
        Ok(names)
    }

    async fn find(&self, collection: &str, filter: &Filter) -> StoreResult<Vec<Document>> {
        let collections = self.read()?;
        Ok(collections
            .get(collection)
            .map(|c| {
                c.docs
                    .iter()
                    .filter(|d| filter.matches(d))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn insert(&self, collection: &str, mut doc: Document) -> StoreResult<Document> {
        validate_collection_name(collection)?;
        stamp_new(&mut doc);
        let mut collections = self.write()?;
        let coll = collections.entry(collection.to_string()).or_default();
        if let Some(fields) = coll.violated_key(&doc, None) {
            return Err(StoreError::Duplicate {
                collection: collection.to_string(),
                fields,
            });
        }
        coll.docs.push(doc.clone());
        Ok(doc)
    }

    async fn update_one(
        &self,
        collection: &str,
        filter: &Filter,
        update: &Update,
    ) -> StoreResult<Option<Document>> {
        let mut collections = self.write()?;
        let coll = match collections.get_mut(collection) {
            Some(c) => c,
            None => return Ok(None),
        };
        let idx = match coll.docs.iter().position(|d| filter.matches(d)) {
            Some(i) => i,
            None => return Ok(None),
        };

        let mut updated = coll.docs[idx].clone();
        update.apply(&mut updated)?;
        updated.insert(
            UPDATED_AT_FIELD.to_string(),
            Value::String(now_timestamp()),
        );
        if let Some(fields) = coll.violated_key(&updated, Some(idx)) {
            return Err(StoreError::Duplicate {
                collection: collection.to_string(),
                fields,
            });
        }
        coll.docs[idx] = updated.clone();
        Ok(Some(updated))
    }

    async fn delete_by_id(&self, collection: &str, id: &str) -> StoreResult<Option<Document>> {
        let mut collections = self.write()?;
        let coll = match collections.get_mut(collection) {
            Some(c) => c,
            None => return Ok(None),
        };
        Ok(coll
            .docs
            .iter()
            .position(|d| document_id(d) == id)
            .map(|idx| coll.docs.remove(idx)))
    }
}
