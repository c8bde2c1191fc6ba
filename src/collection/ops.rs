use bson::{Bson, Document};
use std::sync::Arc;
use std::time::Instant;

use super::core::{Collection, matching_docs, matching_keys};
use crate::bulk::{BulkWriteFailure, BulkWriteResult};
use crate::errors::DbError;
use crate::query::telemetry;
use crate::query::{
    CountOptions, Cursor, DeleteReport, FindOptions, InsertManyReport, InsertOneReport, Projection,
    distinct_values, validate_filter,
};
use crate::store::{id_of, with_id};
use crate::value::validate_document;

impl Collection {
    /// # Errors
    /// `InvalidDocument` for documents the store cannot hold, `DuplicateKey` on an `_id` or
    /// unique-index collision.
    pub fn insert_one(&self, document: Document) -> Result<InsertOneReport, DbError> {
        validate_document(&document)?;
        let document = with_id(document);
        let inserted_id = id_of(&document);
        self.store().write(|data| data.insert(document))?;
        telemetry::log_audit("insert", &self.full_name(), &inserted_id.to_string());
        Ok(InsertOneReport { inserted_id })
    }

    /// Inserts in order. An ordered batch stops at the first failure; an unordered one keeps
    /// going. Either way a failure surfaces as `BulkWrite` with the per-item errors.
    ///
    /// # Errors
    /// `InvalidOperation` for an empty list, `BulkWrite` when any document was rejected.
    pub fn insert_many(&self, documents: Vec<Document>, ordered: bool) -> Result<InsertManyReport, DbError> {
        if documents.is_empty() {
            return Err(DbError::InvalidOperation("documents must be a non-empty list".into()));
        }
        let mut report = InsertManyReport::default();
        let mut result = BulkWriteResult::default();
        let store = self.store();
        store.write(|data| {
            for (index, document) in documents.into_iter().enumerate() {
                let outcome = validate_document(&document).and_then(|()| {
                    let document = with_id(document);
                    let id = id_of(&document);
                    data.insert(document).map(|_| id)
                });
                match outcome {
                    Ok(id) => {
                        result.n_inserted += 1;
                        report.inserted_ids.push(id);
                    }
                    Err(e) => {
                        result.write_errors.push(BulkWriteFailure { index, code: e.code().unwrap_or(2), message: e.to_string() });
                        if ordered {
                            break;
                        }
                    }
                }
            }
        });
        telemetry::log_audit("insert_many", &self.full_name(), &format!("inserted={}", result.n_inserted));
        if result.write_errors.is_empty() {
            Ok(report)
        } else {
            Err(DbError::BulkWrite(Box::new(result)))
        }
    }

    /// # Errors
    /// See [`Collection::find_with`].
    pub fn find(&self, filter: Document) -> Result<Cursor, DbError> {
        self.find_with(filter, FindOptions::default())
    }

    /// A lazy cursor over the matching documents. The filter and projection are checked now;
    /// the scan runs when the cursor is first read.
    ///
    /// # Errors
    /// `OperationFailure` or `NotImplemented` for a malformed filter or projection.
    pub fn find_with(&self, filter: Document, options: FindOptions) -> Result<Cursor, DbError> {
        validate_filter(&filter)?;
        let projection = options.projection.as_ref().map(Projection::parse).transpose()?;
        let store = self.store();
        let namespace = self.full_name();
        let filter = Arc::new(filter);
        let mut cursor = Cursor::new(Arc::new(move || {
            let start = Instant::now();
            let docs = store.read(|data| matching_docs(data, &filter))?;
            telemetry::log_query(&namespace, "find", start.elapsed().as_millis(), docs.len());
            Ok(docs)
        }))
        .skip(options.skip)
        .limit(options.limit);
        if let Some(keys) = options.sort {
            cursor = cursor.sort(keys);
        }
        if let Some(p) = projection {
            cursor = cursor.projection(p);
        }
        Ok(cursor)
    }

    /// # Errors
    /// See [`Collection::find_with`].
    pub fn find_one(&self, filter: Document) -> Result<Option<Document>, DbError> {
        self.find_with(filter, FindOptions { limit: 1, ..Default::default() })?.try_next()
    }

    /// # Errors
    /// `OperationFailure` for a malformed filter.
    pub fn count_documents(&self, filter: Document, options: CountOptions) -> Result<u64, DbError> {
        validate_filter(&filter)?;
        self.timed(
            "count",
            || {
                let matched = self.store().read(|data| matching_keys(data, &filter))?.len();
                let after_skip = matched.saturating_sub(options.skip);
                let n = if options.limit == 0 { after_skip } else { after_skip.min(options.limit) };
                Ok(n as u64)
            },
            |n| usize::try_from(*n).unwrap_or(usize::MAX),
        )
    }

    #[must_use]
    pub fn estimated_document_count(&self) -> u64 {
        self.store().read(|data| data.len()) as u64
    }

    /// Distinct values of `key` among the documents matching `filter`; array values contribute
    /// their elements.
    ///
    /// # Errors
    /// `OperationFailure` for a malformed filter.
    pub fn distinct(&self, key: &str, filter: Document) -> Result<Vec<Bson>, DbError> {
        validate_filter(&filter)?;
        self.timed(
            "distinct",
            || {
                let docs = self.store().read(|data| matching_docs(data, &filter))?;
                Ok(distinct_values(&docs, key))
            },
            Vec::len,
        )
    }

    /// # Errors
    /// `OperationFailure` for a malformed filter.
    pub fn delete_one(&self, filter: Document) -> Result<DeleteReport, DbError> {
        self.delete(filter, false)
    }

    /// # Errors
    /// `OperationFailure` for a malformed filter.
    pub fn delete_many(&self, filter: Document) -> Result<DeleteReport, DbError> {
        self.delete(filter, true)
    }

    fn delete(&self, filter: Document, multi: bool) -> Result<DeleteReport, DbError> {
        validate_filter(&filter)?;
        let deleted = self.store().write(|data| {
            let mut keys = matching_keys(data, &filter)?;
            if !multi {
                keys.truncate(1);
            }
            Ok::<_, DbError>(keys.iter().filter(|k| data.remove(k).is_some()).count())
        })?;
        telemetry::log_audit(if multi { "delete_many" } else { "delete_one" }, &self.full_name(), &format!("deleted={deleted}"));
        Ok(DeleteReport { deleted: deleted as u64 })
    }
}

#[cfg(test)]
mod tests {
    use crate::client::Client;
    use crate::collection::Collection;
    use crate::query::{CountOptions, FindOptions, SortSpec};
    use crate::DbError;
    use bson::{Bson, doc};

    fn people() -> Collection {
        let coll = Client::new().database("test").unwrap().collection("people").unwrap();
        coll.insert_many(
            vec![
                doc! {"_id": 1, "name": "ann", "age": 30, "tags": ["x", "y"]},
                doc! {"_id": 2, "name": "bob", "age": 25, "tags": ["y"]},
                doc! {"_id": 3, "name": "cyd", "age": 35},
            ],
            true,
        )
        .unwrap();
        coll
    }

    #[test]
    fn insert_assigns_object_ids_first() {
        let coll = Client::new().database("t").unwrap().collection("c").unwrap();
        let report = coll.insert_one(doc! {"a": 1}).unwrap();
        assert!(matches!(report.inserted_id, Bson::ObjectId(_)));
        let stored = coll.find_one(doc! {}).unwrap().unwrap();
        assert_eq!(stored.keys().next().map(String::as_str), Some("_id"));
    }

    #[test]
    fn insert_rejects_duplicates_and_bad_documents() {
        let coll = people();
        assert_eq!(coll.insert_one(doc! {"_id": 1}).unwrap_err().code(), Some(11000));
        assert!(matches!(coll.insert_one(doc! {"$bad": 1}), Err(DbError::InvalidDocument(_))));
    }

    #[test]
    fn reads_are_copies() {
        let coll = people();
        let mut first = coll.find_one(doc! {"_id": 1}).unwrap().unwrap();
        first.insert("name", "changed");
        assert_eq!(coll.find_one(doc! {"_id": 1}).unwrap().unwrap().get_str("name").unwrap(), "ann");
    }

    #[test]
    fn find_with_options() {
        let coll = people();
        let opts = FindOptions {
            projection: Some(doc! {"name": 1, "_id": 0}),
            sort: Some(vec![SortSpec::desc("age")]),
            skip: 1,
            limit: 1,
        };
        let docs = coll.find_with(doc! {}, opts).unwrap().to_vec().unwrap();
        assert_eq!(docs, vec![doc! {"name": "ann"}]);
    }

    #[test]
    fn find_fails_eagerly_on_bad_filters() {
        let coll = people();
        assert_eq!(coll.find(doc! {"$bogus": 1}).unwrap_err().code(), Some(2));
        assert!(matches!(coll.find(doc! {"$where": "1"}), Err(DbError::NotImplemented(_))));
    }

    #[test]
    fn cursor_sees_writes_made_before_it_starts() {
        let coll = people();
        let cursor = coll.find(doc! {"age": {"$gt": 26}}).unwrap();
        coll.insert_one(doc! {"_id": 4, "age": 40}).unwrap();
        assert_eq!(crate::query::Cursor::count(&cursor, false).unwrap(), 3);
    }

    #[test]
    fn counting_and_distinct() {
        let coll = people();
        assert_eq!(coll.count_documents(doc! {}, CountOptions { skip: 1, limit: 5 }).unwrap(), 2);
        assert_eq!(coll.estimated_document_count(), 3);
        assert_eq!(coll.distinct("tags", doc! {}).unwrap(), vec![Bson::from("x"), Bson::from("y")]);
    }

    #[test]
    fn deletes() {
        let coll = people();
        assert_eq!(coll.delete_one(doc! {"age": {"$gte": 25}}).unwrap().deleted, 1);
        assert_eq!(coll.find_one(doc! {}).unwrap().unwrap().get_i32("_id").unwrap(), 2);
        assert_eq!(coll.delete_many(doc! {}).unwrap().deleted, 2);
        assert_eq!(coll.estimated_document_count(), 0);
    }
}
