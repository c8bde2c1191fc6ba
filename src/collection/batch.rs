//! Whole-collection operations: aggregation, batched writes, drop and rename.

use bson::Document;

use super::core::Collection;
use crate::aggregate::run_pipeline;
use crate::bulk::{BulkOperationBuilder, BulkWriteFailure, BulkWriteResult, Upserted, WriteModel};
use crate::errors::DbError;
use crate::query::telemetry;
use crate::query::{Cursor, UpdateOptions};

impl Collection {
    /// Runs `pipeline` over a snapshot of the collection. The collection lock is released
    /// before the first stage runs, so stages may read or write any collection.
    ///
    /// # Errors
    /// See [`run_pipeline`].
    pub fn aggregate(&self, pipeline: &[Document]) -> Result<Cursor, DbError> {
        let input = self.store().snapshot();
        let docs = self.timed("aggregate", || run_pipeline(input, pipeline, self.db.as_ref()), Vec::len)?;
        Ok(Cursor::from_documents(docs))
    }

    /// Runs `models` in order. Ordered batches stop at the first failed item; unordered ones
    /// record it and continue.
    ///
    /// # Errors
    /// `BulkWrite` with the partial counts when any item failed, or the first error that is not
    /// a per-item failure (see [`DbError::is_write_error`]), for example `NotImplemented`.
    pub fn bulk_write(&self, models: Vec<WriteModel>, ordered: bool) -> Result<BulkWriteResult, DbError> {
        let mut result = BulkWriteResult::default();
        for (index, model) in models.into_iter().enumerate() {
            let kind = model.kind();
            match self.apply_model(model, index, &mut result) {
                Ok(()) => {}
                Err(e) if e.is_write_error() => {
                    log::debug!("bulk {kind} #{index} on {} failed: {e}", self.full_name());
                    result.write_errors.push(BulkWriteFailure { index, code: e.code().unwrap_or(2), message: e.to_string() });
                    if ordered {
                        break;
                    }
                }
                Err(e) => return Err(e),
            }
        }
        if result.write_errors.is_empty() {
            Ok(result)
        } else {
            Err(DbError::BulkWrite(Box::new(result)))
        }
    }

    fn apply_model(&self, model: WriteModel, index: usize, result: &mut BulkWriteResult) -> Result<(), DbError> {
        let report = match model {
            WriteModel::InsertOne { document } => {
                self.insert_one(document)?;
                result.n_inserted += 1;
                return Ok(());
            }
            WriteModel::DeleteOne { filter } => {
                result.n_removed += self.delete_one(filter)?.deleted;
                return Ok(());
            }
            WriteModel::DeleteMany { filter } => {
                result.n_removed += self.delete_many(filter)?.deleted;
                return Ok(());
            }
            WriteModel::UpdateOne { filter, update, upsert } => self.update_one(filter, update, UpdateOptions { upsert })?,
            WriteModel::UpdateMany { filter, update, upsert } => self.update_many(filter, update, UpdateOptions { upsert })?,
            WriteModel::ReplaceOne { filter, replacement, upsert } => {
                self.replace_one(filter, replacement, UpdateOptions { upsert })?
            }
        };
        result.n_matched += report.matched;
        result.n_modified += report.modified;
        if let Some(id) = report.upserted_id {
            result.n_upserted += 1;
            result.upserted.push(Upserted { index, id });
        }
        Ok(())
    }

    #[must_use]
    pub fn initialize_ordered_bulk_op(&self) -> BulkOperationBuilder {
        BulkOperationBuilder::new(self.clone(), true)
    }

    #[must_use]
    pub fn initialize_unordered_bulk_op(&self) -> BulkOperationBuilder {
        BulkOperationBuilder::new(self.clone(), false)
    }

    /// Empties the collection and forgets its indexes; the handle stays usable.
    pub fn drop(&self) {
        self.store().clear();
        telemetry::log_audit("drop", &self.full_name(), "");
    }

    /// Moves this collection's content to `new_name` in the same database.
    ///
    /// # Errors
    /// See [`crate::store::DatabaseStore::rename`].
    pub fn rename(&self, new_name: &str, drop_target: bool) -> Result<(), DbError> {
        self.db.rename(&self.name, new_name, drop_target)?;
        telemetry::log_audit("rename", &self.full_name(), new_name);
        Ok(())
    }
}
