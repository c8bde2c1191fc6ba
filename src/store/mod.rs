//! The server → database → collection storage hierarchy.
//!
//! Slots are created lazily on first access and never removed by a drop; a dropped collection is
//! emptied in place so that handles addressing it by name keep working.

mod collection_store;
mod index;

use bson::{Bson, Document};
use indexmap::IndexMap;
use parking_lot::RwLock;
use std::sync::Arc;

pub use collection_store::{CollectionData, CollectionStore};
pub use index::{ID_INDEX_NAME, IndexOptions, IndexSpec, id_index_description};

use crate::aggregate::Catalog;
use crate::errors::DbError;
use crate::types::new_object_id;

/// Rejects names a collection can never have.
///
/// # Errors
/// `InvalidName` for empty names, `$`, NUL, or a leading/trailing dot.
pub fn validate_collection_name(name: &str) -> Result<(), DbError> {
    if name.is_empty() {
        return Err(DbError::InvalidName("collection names cannot be empty".into()));
    }
    if name.contains('$') {
        return Err(DbError::InvalidName(format!("collection names must not contain '$': {name}")));
    }
    if name.starts_with('.') || name.ends_with('.') {
        return Err(DbError::InvalidName(format!("collection names must not start or end with '.': {name}")));
    }
    if name.contains('\0') {
        return Err(DbError::InvalidName("collection names must not contain the null character".into()));
    }
    Ok(())
}

/// # Errors
/// `InvalidName` for empty names or names containing `/\. "$` or NUL.
pub fn validate_database_name(name: &str) -> Result<(), DbError> {
    if name.is_empty() {
        return Err(DbError::InvalidName("database name cannot be empty".into()));
    }
    if let Some(bad) = name.chars().find(|c| matches!(c, '/' | '\\' | '.' | ' ' | '"' | '$' | '\0')) {
        return Err(DbError::InvalidName(format!("database names cannot contain the character {bad:?}")));
    }
    Ok(())
}

/// Puts an `_id` first when the document has none.
pub(crate) fn with_id(doc: Document) -> Document {
    if doc.contains_key("_id") {
        return doc;
    }
    let mut out = Document::new();
    out.insert("_id", new_object_id());
    out.extend(doc);
    out
}

#[derive(Debug)]
pub struct DatabaseStore {
    name: String,
    collections: RwLock<IndexMap<String, Arc<CollectionStore>>>,
}

impl DatabaseStore {
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into(), collections: RwLock::new(IndexMap::new()) }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The slot for `name`, creating an empty one on first access.
    pub fn collection(&self, name: &str) -> Arc<CollectionStore> {
        if let Some(existing) = self.collections.read().get(name) {
            return existing.clone();
        }
        self.collections
            .write()
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(CollectionStore::new(name)))
            .clone()
    }

    #[must_use]
    pub fn existing(&self, name: &str) -> Option<Arc<CollectionStore>> {
        self.collections.read().get(name).cloned()
    }

    /// Names of collections that are present for enumeration, in creation order.
    #[must_use]
    pub fn created_names(&self) -> Vec<String> {
        self.collections
            .read()
            .iter()
            .filter(|(_, store)| store.is_created())
            .map(|(name, _)| name.clone())
            .collect()
    }

    #[must_use]
    pub fn has_created(&self) -> bool {
        self.collections.read().values().any(|s| s.is_created())
    }

    /// Moves the content of `from` into `to`.
    ///
    /// # Errors
    /// `OperationFailure` 26 when `from` is not present, 48 when `to` is present and
    /// `drop_target` is false, 20 when the names are equal.
    pub fn rename(&self, from: &str, to: &str, drop_target: bool) -> Result<(), DbError> {
        validate_collection_name(to)?;
        if from == to {
            return Err(DbError::operation_failure(20, "Can't rename a collection to itself"));
        }
        let source = self
            .existing(from)
            .filter(|s| s.is_created())
            .ok_or_else(|| DbError::operation_failure(26, format!("source namespace does not exist: {from}")))?;
        let target = self.collection(to);
        if target.is_created() && !drop_target {
            return Err(DbError::operation_failure(48, format!("target namespace exists: {to}")));
        }
        target.restore(source.take());
        log::debug!("renamed {}.{from} to {}.{to}", self.name, self.name);
        Ok(())
    }

    /// Empties every collection slot.
    pub fn clear(&self) {
        for store in self.collections.read().values() {
            store.clear();
        }
    }

    pub(crate) fn slots(&self) -> Vec<(String, Arc<CollectionStore>)> {
        self.collections.read().iter().map(|(k, v)| (k.clone(), v.clone())).collect()
    }
}

impl Catalog for DatabaseStore {
    fn documents(&self, collection: &str) -> Result<Vec<Document>, DbError> {
        validate_collection_name(collection)?;
        Ok(self.existing(collection).map(|s| s.snapshot()).unwrap_or_default())
    }

    fn replace_documents(&self, collection: &str, docs: Vec<Document>) -> Result<(), DbError> {
        validate_collection_name(collection)?;
        let store = self.collection(collection);
        store.write(|data| {
            let mut fresh = CollectionData { indexes: data.indexes.clone(), force_created: true, ..Default::default() };
            for doc in docs {
                fresh.insert(with_id(doc))?;
            }
            *data = fresh;
            Ok::<_, DbError>(())
        })
    }
}

/// Everything a set of client handles shares.
#[derive(Debug, Default)]
pub struct ServerStore {
    databases: RwLock<IndexMap<String, Arc<DatabaseStore>>>,
}

impl ServerStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn database(&self, name: &str) -> Arc<DatabaseStore> {
        if let Some(existing) = self.databases.read().get(name) {
            return existing.clone();
        }
        self.databases
            .write()
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(DatabaseStore::new(name)))
            .clone()
    }

    /// Databases holding at least one present collection.
    #[must_use]
    pub fn database_names(&self) -> Vec<String> {
        self.databases
            .read()
            .iter()
            .filter(|(_, db)| db.has_created())
            .map(|(name, _)| name.clone())
            .collect()
    }

    pub fn drop_database(&self, name: &str) {
        if let Some(db) = self.databases.read().get(name) {
            db.clear();
        }
    }

    pub(crate) fn databases(&self) -> Vec<(String, Arc<DatabaseStore>)> {
        self.databases.read().iter().map(|(k, v)| (k.clone(), v.clone())).collect()
    }
}

/// Plain `_id` extraction used by write paths.
pub(crate) fn id_of(doc: &Document) -> Bson {
    doc.get("_id").cloned().unwrap_or(Bson::Null)
}
