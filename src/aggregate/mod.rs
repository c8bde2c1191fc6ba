//! Aggregation pipelines: an ordered list of single-key stage documents run left to right over a
//! snapshot of documents.

mod expr;
mod graph;
mod group;
mod project;
mod stages;

use bson::Document;

use crate::errors::DbError;

pub use expr::{Evaluator, ExprError, is_unimplemented_operator};
pub use stages::is_unimplemented_stage;

/// Collections a pipeline may read from (`$lookup`, `$graphLookup`) or write to (`$out`).
pub trait Catalog {
    /// Documents of `collection` in insertion order; empty when it does not exist.
    ///
    /// # Errors
    /// Implementation-defined, for example an invalid collection name.
    fn documents(&self, collection: &str) -> Result<Vec<Document>, DbError>;

    /// Replaces the contents of `collection` with `docs`.
    ///
    /// # Errors
    /// Implementation-defined, for example a duplicate `_id` among `docs`.
    fn replace_documents(&self, collection: &str, docs: Vec<Document>) -> Result<(), DbError>;
}

/// Runs `pipeline` over `input`.
///
/// # Errors
/// `OperationFailure` for malformed stages or expressions, `NotImplemented` for known stages and
/// operators that are not supported, or whatever the catalog raises.
pub fn run_pipeline(input: Vec<Document>, pipeline: &[Document], catalog: &dyn Catalog) -> Result<Vec<Document>, DbError> {
    stages::run(input, pipeline, catalog, 0)
}
