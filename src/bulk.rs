//! Batched writes: explicit [`WriteModel`] lists and the accumulating [`BulkOperationBuilder`].

use bson::{Bson, Document};

use crate::collection::Collection;
use crate::errors::DbError;

/// One write in a batch.
#[derive(Debug, Clone, PartialEq)]
pub enum WriteModel {
    InsertOne { document: Document },
    UpdateOne { filter: Document, update: Document, upsert: bool },
    UpdateMany { filter: Document, update: Document, upsert: bool },
    ReplaceOne { filter: Document, replacement: Document, upsert: bool },
    DeleteOne { filter: Document },
    DeleteMany { filter: Document },
}

impl WriteModel {
    pub(crate) fn kind(&self) -> &'static str {
        match self {
            WriteModel::InsertOne { .. } => "insert",
            WriteModel::UpdateOne { .. } | WriteModel::UpdateMany { .. } | WriteModel::ReplaceOne { .. } => "update",
            WriteModel::DeleteOne { .. } | WriteModel::DeleteMany { .. } => "delete",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Upserted {
    pub index: usize,
    pub id: Bson,
}

/// A failed item of a batch, by position in the submitted list.
#[derive(Debug, Clone, PartialEq)]
pub struct BulkWriteFailure {
    pub index: usize,
    pub code: i32,
    pub message: String,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct BulkWriteResult {
    pub n_inserted: u64,
    pub n_matched: u64,
    pub n_modified: u64,
    pub n_removed: u64,
    pub n_upserted: u64,
    pub upserted: Vec<Upserted>,
    pub write_errors: Vec<BulkWriteFailure>,
}

/// Collects operations against one collection and submits them once through
/// [`BulkOperationBuilder::execute`].
#[derive(Debug)]
pub struct BulkOperationBuilder {
    collection: Collection,
    ordered: bool,
    models: Vec<WriteModel>,
}

impl BulkOperationBuilder {
    #[must_use]
    pub fn new(collection: Collection, ordered: bool) -> Self {
        Self { collection, ordered, models: Vec::new() }
    }

    pub fn insert(&mut self, document: Document) -> &mut Self {
        self.models.push(WriteModel::InsertOne { document });
        self
    }

    /// Starts a selector; the following call decides which write it becomes.
    pub fn find(&mut self, filter: Document) -> BulkSelector<'_> {
        BulkSelector { builder: self, filter, upsert: false }
    }

    /// Number of queued operations.
    #[must_use]
    pub fn len(&self) -> usize {
        self.models.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.models.is_empty()
    }

    /// Runs the queued operations.
    ///
    /// # Errors
    /// `InvalidOperation` when nothing was queued, `BulkWrite` when any item failed.
    pub fn execute(self) -> Result<BulkWriteResult, DbError> {
        if self.models.is_empty() {
            return Err(DbError::InvalidOperation("No operations to execute".into()));
        }
        self.collection.bulk_write(self.models, self.ordered)
    }
}

/// A pending `find(...)` inside a [`BulkOperationBuilder`].
#[derive(Debug)]
pub struct BulkSelector<'b> {
    builder: &'b mut BulkOperationBuilder,
    filter: Document,
    upsert: bool,
}

impl BulkSelector<'_> {
    /// Makes the following update or replacement an upsert.
    ///
    /// # Panics
    /// When called a second time on the same selector.
    #[must_use]
    pub fn upsert(mut self) -> Self {
        assert!(!self.upsert, "upsert() was already called on this selector");
        self.upsert = true;
        self
    }

    pub fn update_one(self, update: Document) {
        let upsert = self.upsert;
        self.builder.models.push(WriteModel::UpdateOne { filter: self.filter, update, upsert });
    }

    pub fn update(self, update: Document) {
        let upsert = self.upsert;
        self.builder.models.push(WriteModel::UpdateMany { filter: self.filter, update, upsert });
    }

    pub fn replace_one(self, replacement: Document) {
        let upsert = self.upsert;
        self.builder.models.push(WriteModel::ReplaceOne { filter: self.filter, replacement, upsert });
    }

    pub fn delete_one(self) {
        self.builder.models.push(WriteModel::DeleteOne { filter: self.filter });
    }

    pub fn delete(self) {
        self.builder.models.push(WriteModel::DeleteMany { filter: self.filter });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::Client;
    use bson::doc;

    fn collection() -> Collection {
        Client::new().database("test").unwrap().collection("bulk").unwrap()
    }

    #[test]
    fn builder_accumulates_then_executes_once() {
        let coll = collection();
        let mut bulk = coll.initialize_ordered_bulk_op();
        bulk.insert(doc! {"_id": 1, "n": 1});
        bulk.insert(doc! {"_id": 2, "n": 2});
        bulk.find(doc! {"_id": 1}).update_one(doc! {"$inc": {"n": 10}});
        bulk.find(doc! {"_id": 3}).upsert().update_one(doc! {"$set": {"n": 3}});
        bulk.find(doc! {"_id": 2}).delete_one();
        let result = bulk.execute().unwrap();
        assert_eq!(result.n_inserted, 2);
        assert_eq!(result.n_matched, 1);
        assert_eq!(result.n_modified, 1);
        assert_eq!(result.n_upserted, 1);
        assert_eq!(result.n_removed, 1);
        assert_eq!(result.upserted, vec![Upserted { index: 3, id: Bson::Int32(3) }]);
        assert_eq!(coll.count_documents(doc! {}, Default::default()).unwrap(), 2);
    }

    #[test]
    fn empty_batch_is_invalid() {
        let err = collection().initialize_unordered_bulk_op().execute().unwrap_err();
        assert!(matches!(err, DbError::InvalidOperation(_)));
    }

    #[test]
    #[should_panic(expected = "upsert() was already called")]
    fn upsert_twice_panics() {
        let coll = collection();
        let mut bulk = coll.initialize_ordered_bulk_op();
        let _ = bulk.find(doc! {}).upsert().upsert();
    }

    #[test]
    fn ordered_batches_stop_at_the_first_failure() {
        let coll = collection();
        let models = vec![
            WriteModel::InsertOne { document: doc! {"_id": 1} },
            WriteModel::InsertOne { document: doc! {"_id": 1} },
            WriteModel::InsertOne { document: doc! {"_id": 2} },
        ];
        let Err(DbError::BulkWrite(result)) = coll.bulk_write(models.clone(), true) else {
            panic!("expected a bulk write error");
        };
        assert_eq!(result.n_inserted, 1);
        assert_eq!(result.write_errors[0].index, 1);
        assert_eq!(result.write_errors[0].code, 11000);

        let other = collection();
        let Err(DbError::BulkWrite(result)) = other.bulk_write(models, false) else {
            panic!("expected a bulk write error");
        };
        assert_eq!(result.n_inserted, 2);
        assert_eq!(result.write_errors.len(), 1);
    }
}
