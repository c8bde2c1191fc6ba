use std::sync::Arc;

use crate::database::Database;
use crate::errors::DbError;
use crate::query::telemetry;
use crate::store::{ServerStore, validate_database_name};

/// Entry point: a handle on an in-memory server. Handles built from the same store share data.
#[derive(Clone, Default)]
pub struct Client {
    store: Arc<ServerStore>,
}

impl Client {
    /// A client over a fresh, empty server.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_store(store: Arc<ServerStore>) -> Self {
        Self { store }
    }

    #[must_use]
    pub fn store(&self) -> &Arc<ServerStore> {
        &self.store
    }

    /// # Errors
    /// `InvalidName` for names a database cannot have.
    pub fn database(&self, name: &str) -> Result<Database, DbError> {
        validate_database_name(name)?;
        Ok(Database::new(self.store.database(name)))
    }

    #[must_use]
    pub fn list_database_names(&self) -> Vec<String> {
        self.store.database_names()
    }

    pub fn drop_database(&self, name: &str) {
        self.store.drop_database(name);
        telemetry::log_audit("drop_database", name, "");
    }
}

impl std::fmt::Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client").field("databases", &self.list_database_names()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bson::doc;

    #[test]
    fn handles_over_one_store_share_data() {
        let a = Client::new();
        let b = Client::with_store(a.store().clone());
        a.database("x").unwrap().collection("c").unwrap().insert_one(doc! {"_id": 1}).unwrap();
        assert_eq!(b.list_database_names(), vec!["x".to_string()]);
        assert!(Client::new().list_database_names().is_empty());
    }

    #[test]
    fn dropping_a_database_hides_it() {
        let client = Client::new();
        let coll = client.database("x").unwrap().collection("c").unwrap();
        coll.insert_one(doc! {"_id": 1}).unwrap();
        client.drop_database("x");
        assert!(client.list_database_names().is_empty());
        assert_eq!(coll.estimated_document_count(), 0);
        assert!(matches!(client.database("a.b"), Err(DbError::InvalidName(_))));
    }
}
