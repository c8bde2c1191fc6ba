use std::path::Path;
use std::sync::Arc;

use crate::collection::Collection;
use crate::errors::DbError;
use crate::persistence;
use crate::query::telemetry;
use crate::store::{DatabaseStore, validate_collection_name};

/// A handle on one database. Cloning is cheap; clones see the same data.
#[derive(Clone)]
pub struct Database {
    store: Arc<DatabaseStore>,
}

impl Database {
    pub(crate) fn new(store: Arc<DatabaseStore>) -> Self {
        Self { store }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        self.store.name()
    }

    /// A handle for `name`. Nothing is created until the first write.
    ///
    /// # Errors
    /// `InvalidName` for names a collection cannot have.
    pub fn collection(&self, name: &str) -> Result<Collection, DbError> {
        validate_collection_name(name)?;
        Ok(Collection::new(self.store.clone(), name.to_string()))
    }

    /// Creates an empty collection that is listed straight away.
    ///
    /// # Errors
    /// `OperationFailure` 48 when the collection already exists, `InvalidName` for bad names.
    pub fn create_collection(&self, name: &str) -> Result<Collection, DbError> {
        let coll = self.collection(name)?;
        let slot = self.store.collection(name);
        if slot.is_created() {
            return Err(DbError::operation_failure(48, format!("collection already exists: {}.{name}", self.name())));
        }
        slot.mark_created();
        telemetry::log_audit("create_collection", &coll.full_name(), "");
        Ok(coll)
    }

    /// Collections that hold documents, indexes, or were created explicitly.
    #[must_use]
    pub fn list_collection_names(&self) -> Vec<String> {
        self.store.created_names()
    }

    /// # Errors
    /// `InvalidName` for bad names.
    pub fn drop_collection(&self, name: &str) -> Result<(), DbError> {
        self.collection(name)?.drop();
        Ok(())
    }

    /// # Errors
    /// See [`DatabaseStore::rename`].
    pub fn rename_collection(&self, from: &str, to: &str, drop_target: bool) -> Result<(), DbError> {
        self.collection(from)?.rename(to, drop_target)
    }

    /// Writes only this database to `path`, in the same format as [`persistence::dump`].
    ///
    /// # Errors
    /// `Io` or `Json` when the file cannot be written.
    pub fn dump(&self, path: &Path) -> Result<(), DbError> {
        persistence::dump_databases(std::slice::from_ref(&self.store), path)
    }

    /// Replaces this database's content with the matching database from a dump file. Other
    /// databases in the file are ignored.
    ///
    /// # Errors
    /// `Io`, `Json` or `ExtJson` for unreadable files, `OperationFailure` for an unknown format.
    pub fn load(&self, path: &Path) -> Result<(), DbError> {
        persistence::load_into(path, |name| (name == self.name()).then(|| self.store.clone()))
    }
}

impl std::fmt::Debug for Database {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Database").field("name", &self.name()).finish()
    }
}
