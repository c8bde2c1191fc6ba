//! docmock: an in-memory stand-in for a document database server, for tests.
//!
//! ```
//! use docmock::{Client, doc};
//!
//! let client = Client::new();
//! let users = client.database("app").unwrap().collection("users").unwrap();
//! users.insert_one(doc! {"_id": 1, "name": "ann"}).unwrap();
//! assert_eq!(users.count_documents(doc! {"name": "ann"}, Default::default()).unwrap(), 1);
//! ```

pub mod aggregate;
pub mod bulk;
pub mod client;
pub mod collection;
pub mod config;
pub mod database;
pub mod devlog;
pub mod errors;
pub mod logger;
pub mod persistence;
pub mod query;
pub mod store;
pub mod types;
pub mod value;

pub use bson::{Document, doc};
pub use client::Client;
pub use collection::Collection;
pub use database::Database;
pub use errors::DbError;
pub use query::Cursor;

/// Any value a document field can hold.
pub type Value = bson::Bson;

/// Installs logging from the `DOCMOCK_LOG_*` environment variables and applies
/// `DOCMOCK_SLOW_QUERY_MS`/`DOCMOCK_AUDIT`.
///
/// # Errors
/// See [`logger::configure_from_env`].
pub fn init() -> Result<(), DbError> {
    config::EngineConfig::from_env().apply_telemetry();
    logger::configure_from_env()
}
