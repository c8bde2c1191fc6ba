use bson::{Bson, Document};
use serde::{Deserialize, Serialize};

use crate::errors::DbError;
use crate::value::convert::as_i64_exact;

// Safety limits to prevent resource abuse
pub(crate) const MAX_SORT_FIELDS: usize = 32;
pub(crate) const MAX_PIPELINE_DEPTH: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Order {
    Asc,
    Desc,
}

impl Order {
    /// # Errors
    /// `OperationFailure` unless the value is 1 or -1.
    pub fn from_bson(v: &Bson) -> Result<Self, DbError> {
        match as_i64_exact(v) {
            Some(1) => Ok(Order::Asc),
            Some(-1) => Ok(Order::Desc),
            _ => Err(DbError::operation_failure(15975, format!("bad sort direction: {v}"))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SortSpec {
    pub field: String,
    pub order: Order,
}

impl SortSpec {
    pub fn asc(field: impl Into<String>) -> Self {
        Self { field: field.into(), order: Order::Asc }
    }

    pub fn desc(field: impl Into<String>) -> Self {
        Self { field: field.into(), order: Order::Desc }
    }
}

/// Parses `{"a": 1, "b": -1}` into sort keys, first key outermost.
///
/// # Errors
/// `OperationFailure` for an empty spec, too many keys, or a bad direction.
pub fn parse_sort(spec: &Document) -> Result<Vec<SortSpec>, DbError> {
    if spec.is_empty() {
        return Err(DbError::operation_failure(15976, "sort specification must have at least one field"));
    }
    if spec.len() > MAX_SORT_FIELDS {
        return Err(DbError::operation_failure(15976, "too many sort fields"));
    }
    spec.iter()
        .map(|(k, v)| Ok(SortSpec { field: k.clone(), order: Order::from_bson(v)? }))
        .collect()
}

/// Options for `Collection::find`.
#[derive(Debug, Clone, Default)]
pub struct FindOptions {
    pub projection: Option<Document>,
    pub sort: Option<Vec<SortSpec>>,
    pub skip: usize,
    /// Zero means unbounded.
    pub limit: usize,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct UpdateOptions {
    pub upsert: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ReturnDocument {
    #[default]
    Before,
    After,
}

/// Options shared by the `find_one_and_*` family.
#[derive(Debug, Clone, Default)]
pub struct FindOneAndOptions {
    pub projection: Option<Document>,
    pub sort: Option<Vec<SortSpec>>,
    pub upsert: bool,
    pub return_document: ReturnDocument,
}

/// Options for `count_documents`.
#[derive(Debug, Clone, Copy, Default)]
pub struct CountOptions {
    pub skip: usize,
    /// Zero means unbounded.
    pub limit: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub struct InsertOneReport {
    pub inserted_id: Bson,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct InsertManyReport {
    pub inserted_ids: Vec<Bson>,
}

#[derive(Debug, Default, Clone, PartialEq)]
pub struct UpdateReport {
    pub matched: u64,
    pub modified: u64,
    pub upserted_id: Option<Bson>,
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct DeleteReport {
    pub deleted: u64,
}
