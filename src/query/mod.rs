// Telemetry is a submodule of query
pub mod telemetry;

mod cursor;
mod matcher;
mod pattern;
mod projection;
mod types;
mod update;

pub use crate::value::path::resolve;
pub(crate) use cursor::{compare_for_sort, distinct_values};
pub use cursor::{Cursor, DatasetFactory};
pub(crate) use matcher::is_operator_document;
pub use matcher::{matches, validate_filter};
pub use pattern::{compile_bson_regex, compile_pattern};
pub(crate) use projection::FieldTree;
pub use projection::Projection;
pub(crate) use types::MAX_PIPELINE_DEPTH;
pub use types::{
    CountOptions, DeleteReport, FindOneAndOptions, FindOptions, InsertManyReport, InsertOneReport, Order,
    ReturnDocument, SortSpec, UpdateOptions, UpdateReport, parse_sort,
};
pub use update::{apply_update, is_replacement, upsert_seed};
