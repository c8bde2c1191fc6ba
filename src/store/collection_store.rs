use bson::{Bson, Document};
use indexmap::IndexMap;
use parking_lot::RwLock;

use super::index::{ID_INDEX_NAME, IndexSpec};
use crate::errors::DbError;
use crate::types::DocumentKey;

/// Documents and index definitions of one collection, guarded as a unit.
#[derive(Debug, Default)]
pub struct CollectionData {
    pub(crate) documents: IndexMap<DocumentKey, Document>,
    pub(crate) indexes: Vec<IndexSpec>,
    pub(crate) force_created: bool,
}

impl CollectionData {
    /// Stores `doc`, which must already carry an `_id`.
    ///
    /// # Errors
    /// `DuplicateKey` on an `_id` or unique-index collision.
    pub(crate) fn insert(&mut self, doc: Document) -> Result<DocumentKey, DbError> {
        let id = doc.get("_id").ok_or_else(|| DbError::InvalidDocument("document has no _id".into()))?;
        let key = DocumentKey::from_bson(id);
        if self.documents.contains_key(&key) {
            return Err(DbError::duplicate_key(format!("index: {ID_INDEX_NAME} dup key: {{ _id: {id} }}")));
        }
        for index in &self.indexes {
            index.check(&doc, self.documents.values())?;
        }
        self.documents.insert(key.clone(), doc);
        Ok(key)
    }

    /// Swaps the document stored under `key` for `doc`, moving it to a new slot in place when
    /// its `_id` changed.
    ///
    /// # Errors
    /// `DuplicateKey` when the new `_id` or a unique index collides with another document.
    pub(crate) fn replace(&mut self, key: &DocumentKey, doc: Document) -> Result<DocumentKey, DbError> {
        let Some(position) = self.documents.get_index_of(key) else {
            return Err(DbError::InvalidOperation("document vanished during update".into()));
        };
        let id = doc.get("_id").unwrap_or(&Bson::Null);
        let new_key = DocumentKey::from_bson(id);
        if &new_key != key && self.documents.contains_key(&new_key) {
            return Err(DbError::duplicate_key(format!("index: {ID_INDEX_NAME} dup key: {{ _id: {id} }}")));
        }
        for index in &self.indexes {
            index.check(&doc, self.documents.iter().filter(|(k, _)| *k != key).map(|(_, d)| d))?;
        }
        if &new_key == key {
            self.documents.insert(new_key.clone(), doc);
        } else {
            self.documents.shift_remove(key);
            self.documents.shift_insert(position, new_key.clone(), doc);
        }
        Ok(new_key)
    }

    pub(crate) fn remove(&mut self, key: &DocumentKey) -> Option<Document> {
        self.documents.shift_remove(key)
    }

    /// Adds an index definition, failing if existing documents already violate it.
    ///
    /// # Errors
    /// `OperationFailure` (85) on a conflicting redefinition, `DuplicateKey` when the data
    /// violates a new unique index.
    pub(crate) fn add_index(&mut self, spec: IndexSpec) -> Result<String, DbError> {
        if let Some(existing) = self.indexes.iter().find(|i| i.name == spec.name) {
            if *existing == spec {
                return Ok(spec.name);
            }
            return Err(DbError::operation_failure(
                85,
                format!("Index with name: {} already exists with different options", spec.name),
            ));
        }
        let docs: Vec<&Document> = self.documents.values().collect();
        for (i, doc) in docs.iter().enumerate() {
            spec.check(doc, docs[i + 1..].iter().copied())?;
        }
        let name = spec.name.clone();
        self.indexes.push(spec);
        Ok(name)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.documents.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.documents.is_empty()
    }
}

/// One collection's storage slot. All access goes through [`CollectionStore::read`] and
/// [`CollectionStore::write`], whose guards are released on every exit path, unwinding
/// included.
#[derive(Debug)]
pub struct CollectionStore {
    name: String,
    data: RwLock<CollectionData>,
}

impl CollectionStore {
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into(), data: RwLock::new(CollectionData::default()) }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn read<R>(&self, f: impl FnOnce(&CollectionData) -> R) -> R {
        let guard = self.data.read();
        f(&guard)
    }

    pub fn write<R>(&self, f: impl FnOnce(&mut CollectionData) -> R) -> R {
        let mut guard = self.data.write();
        f(&mut guard)
    }

    /// Copies every document out under a read lock, in insertion order.
    #[must_use]
    pub fn snapshot(&self) -> Vec<Document> {
        self.read(|data| data.documents.values().cloned().collect())
    }

    /// Present for enumeration: it holds documents or indexes, or was created explicitly.
    #[must_use]
    pub fn is_created(&self) -> bool {
        self.read(|data| data.force_created || !data.documents.is_empty() || !data.indexes.is_empty())
    }

    pub fn mark_created(&self) {
        self.write(|data| data.force_created = true);
    }

    /// Forgets documents, indexes and the created flag; the slot itself stays addressable.
    pub fn clear(&self) {
        self.write(|data| *data = CollectionData::default());
    }

    /// Moves all content out, leaving the slot empty.
    pub(crate) fn take(&self) -> CollectionData {
        self.write(std::mem::take)
    }

    pub(crate) fn restore(&self, content: CollectionData) {
        self.write(|data| *data = content);
    }

    /// True when no thread holds the data lock.
    #[must_use]
    pub fn is_unlocked(&self) -> bool {
        !self.data.is_locked()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bson::doc;

    #[test]
    fn insert_rejects_duplicate_ids_across_numeric_types() {
        let store = CollectionStore::new("c");
        store.write(|d| d.insert(doc! {"_id": 1})).unwrap();
        let err = store.write(|d| d.insert(doc! {"_id": 1.0})).unwrap_err();
        assert_eq!(err.code(), Some(11000));
        assert!(store.is_unlocked());
    }

    #[test]
    fn rekey_keeps_position() {
        let store = CollectionStore::new("c");
        store.write(|d| {
            d.insert(doc! {"_id": 1}).unwrap();
            d.insert(doc! {"_id": 2}).unwrap();
            d.insert(doc! {"_id": 3}).unwrap();
            d.replace(&DocumentKey::from_bson(&Bson::Int32(2)), doc! {"_id": 9}).unwrap();
        });
        let ids: Vec<i32> = store.snapshot().iter().map(|d| d.get_i32("_id").unwrap()).collect();
        assert_eq!(ids, vec![1, 9, 3]);
    }

    #[test]
    fn created_flag_tracks_content() {
        let store = CollectionStore::new("c");
        assert!(!store.is_created());
        store.mark_created();
        assert!(store.is_created());
        store.clear();
        assert!(!store.is_created());
    }

    #[test]
    fn lock_is_released_after_a_panic() {
        let store = CollectionStore::new("c");
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            store.write(|d| {
                if d.documents.is_empty() {
                    panic!("boom");
                }
            });
        }));
        assert!(result.is_err());
        assert!(store.is_unlocked());
        store.write(|d| d.insert(doc! {"_id": 1})).unwrap();
    }
}
