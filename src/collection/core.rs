use bson::Document;
use std::fmt;
use std::sync::Arc;
use std::time::Instant;

use crate::errors::DbError;
use crate::query::matches;
use crate::query::telemetry;
use crate::store::{CollectionData, CollectionStore, DatabaseStore};
use crate::types::DocumentKey;

/// A handle on one named collection. Handles are cheap to clone and address their slot by
/// name, so a handle stays valid across drops and renames.
#[derive(Clone)]
pub struct Collection {
    pub(crate) db: Arc<DatabaseStore>,
    pub(crate) name: String,
}

impl Collection {
    pub(crate) fn new(db: Arc<DatabaseStore>, name: String) -> Self {
        Self { db, name }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// `database.collection`, the namespace used in logs.
    #[must_use]
    pub fn full_name(&self) -> String {
        format!("{}.{}", self.db.name(), self.name)
    }

    pub(crate) fn store(&self) -> Arc<CollectionStore> {
        self.db.collection(&self.name)
    }

    pub(crate) fn timed<R>(&self, op: &str, f: impl FnOnce() -> Result<R, DbError>, count: impl Fn(&R) -> usize) -> Result<R, DbError> {
        let start = Instant::now();
        let result = f();
        if let Ok(r) = &result {
            telemetry::log_query(&self.full_name(), op, start.elapsed().as_millis(), count(r));
        }
        result
    }
}

impl fmt::Debug for Collection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Collection").field("namespace", &self.full_name()).finish()
    }
}

/// Keys of the documents matching `filter`, in insertion order.
pub(crate) fn matching_keys(data: &CollectionData, filter: &Document) -> Result<Vec<DocumentKey>, DbError> {
    let mut keys = Vec::new();
    for (key, doc) in &data.documents {
        if matches(filter, doc)? {
            keys.push(key.clone());
        }
    }
    Ok(keys)
}

/// Copies of the documents matching `filter`, in insertion order.
pub(crate) fn matching_docs(data: &CollectionData, filter: &Document) -> Result<Vec<Document>, DbError> {
    let mut docs = Vec::new();
    for doc in data.documents.values() {
        if matches(filter, doc)? {
            docs.push(doc.clone());
        }
    }
    Ok(docs)
}
