use bson::Document;

use super::core::Collection;
use crate::errors::DbError;
use crate::query::telemetry;
use crate::store::{ID_INDEX_NAME, IndexOptions, IndexSpec, id_index_description};

impl Collection {
    // --- Index admin helpers ---

    /// Registers an index and returns its name. Existing documents must already satisfy a new
    /// unique index.
    ///
    /// # Errors
    /// `OperationFailure` for malformed keys or a conflicting redefinition, `DuplicateKey` when
    /// the current data violates uniqueness.
    pub fn create_index(&self, keys: Document, options: IndexOptions) -> Result<String, DbError> {
        let spec = IndexSpec::new(keys, &options)?;
        if spec.name == ID_INDEX_NAME {
            return Ok(spec.name);
        }
        let name = self.store().write(|data| data.add_index(spec))?;
        telemetry::log_audit("create_index", &self.full_name(), &name);
        Ok(name)
    }

    /// # Errors
    /// `OperationFailure` 72 for the `_id` index, 27 when no index has that name.
    pub fn drop_index(&self, name: &str) -> Result<(), DbError> {
        if name == ID_INDEX_NAME {
            return Err(DbError::operation_failure(72, "cannot drop _id index"));
        }
        self.store().write(|data| {
            let before = data.indexes.len();
            data.indexes.retain(|i| i.name != name);
            if data.indexes.len() == before {
                return Err(DbError::operation_failure(27, format!("index not found with name [{name}]")));
            }
            Ok(())
        })?;
        telemetry::log_audit("drop_index", &self.full_name(), name);
        Ok(())
    }

    /// Drops every index except `_id_`.
    pub fn drop_indexes(&self) {
        self.store().write(|data| data.indexes.clear());
        telemetry::log_audit("drop_indexes", &self.full_name(), "all");
    }

    /// Index descriptions, `_id_` first.
    #[must_use]
    pub fn list_indexes(&self) -> Vec<Document> {
        let mut out = vec![id_index_description()];
        out.extend(self.store().read(|data| data.indexes.iter().map(IndexSpec::describe).collect::<Vec<_>>()));
        out
    }
}
