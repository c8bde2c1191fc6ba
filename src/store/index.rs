use bson::{Bson, Document, doc};
use serde::{Deserialize, Serialize};

use crate::errors::DbError;
use crate::value::compare::values_equal;
use crate::value::path::resolve;

/// Name of the implicit primary-key index every collection reports.
pub const ID_INDEX_NAME: &str = "_id_";

/// A secondary index definition. Indexes are never used for lookups; they only carry
/// uniqueness constraints and show up in `list_indexes`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexSpec {
    pub name: String,
    pub key: Document,
    #[serde(default)]
    pub unique: bool,
    #[serde(default)]
    pub sparse: bool,
}

#[derive(Debug, Clone, Default)]
pub struct IndexOptions {
    pub name: Option<String>,
    pub unique: bool,
    pub sparse: bool,
}

impl IndexSpec {
    /// # Errors
    /// `OperationFailure` when the key document is empty or a direction is not 1/-1/string.
    pub fn new(key: Document, options: &IndexOptions) -> Result<Self, DbError> {
        if key.is_empty() {
            return Err(DbError::operation_failure(67, "index keys cannot be empty"));
        }
        let mut parts = Vec::with_capacity(key.len());
        for (field, dir) in &key {
            let dir = match dir {
                Bson::Int32(1) | Bson::Int64(1) => "1".to_string(),
                Bson::Int32(-1) | Bson::Int64(-1) => "-1".to_string(),
                Bson::Double(d) if *d == 1.0 || *d == -1.0 => format!("{d}"),
                Bson::String(kind) => kind.clone(),
                other => {
                    return Err(DbError::operation_failure(67, format!("bad index key direction for '{field}': {other}")));
                }
            };
            parts.push(format!("{field}_{dir}"));
        }
        let name = options.name.clone().unwrap_or_else(|| parts.join("_"));
        Ok(Self { name, key, unique: options.unique, sparse: options.sparse })
    }

    /// The `list_indexes` view of this index.
    #[must_use]
    pub fn describe(&self) -> Document {
        let mut d = doc! {"v": 2, "key": self.key.clone(), "name": self.name.clone()};
        if self.unique {
            d.insert("unique", true);
        }
        if self.sparse {
            d.insert("sparse", true);
        }
        d
    }

    /// Indexed values of `doc`, or `None` when a sparse index skips it.
    fn values(&self, doc: &Document) -> Option<Vec<Bson>> {
        let values: Vec<Option<&Bson>> = self.key.keys().map(|f| resolve(doc, f)).collect();
        if self.sparse && values.iter().all(Option::is_none) {
            return None;
        }
        Some(values.into_iter().map(|v| v.cloned().unwrap_or(Bson::Null)).collect())
    }

    /// Fails when `candidate` would collide with any of `others` under this unique index.
    pub(crate) fn check<'a>(&self, candidate: &Document, others: impl Iterator<Item = &'a Document>) -> Result<(), DbError> {
        if !self.unique {
            return Ok(());
        }
        let Some(mine) = self.values(candidate) else {
            return Ok(());
        };
        for other in others {
            if let Some(theirs) = self.values(other)
                && mine.iter().zip(&theirs).all(|(a, b)| values_equal(a, b))
            {
                let shown: Vec<String> = self.key.keys().zip(&mine).map(|(k, v)| format!("{k}: {v}")).collect();
                return Err(DbError::duplicate_key(format!("index: {} dup key: {{ {} }}", self.name, shown.join(", "))));
            }
        }
        Ok(())
    }
}

#[must_use]
pub fn id_index_description() -> Document {
    doc! {"v": 2, "key": {"_id": 1}, "name": ID_INDEX_NAME}
}
