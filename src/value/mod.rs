//! The value model: `bson::Bson` restricted to the variants the engine understands, plus path
//! resolution, ordering and coercions over it.

pub mod compare;
pub mod convert;
pub mod path;

pub use compare::{compare_bson, documents_equal, type_rank, values_equal};
pub use convert::{Number, truthy, type_name};
pub use path::{candidates, resolve, resolve_expanding, resolve_value, set_path};

use bson::{Bson, Document};

use crate::errors::DbError;

/// Values a stored document may hold.
#[must_use]
pub fn is_supported(v: &Bson) -> bool {
    matches!(
        v,
        Bson::Null
            | Bson::Boolean(_)
            | Bson::Int32(_)
            | Bson::Int64(_)
            | Bson::Double(_)
            | Bson::String(_)
            | Bson::DateTime(_)
            | Bson::ObjectId(_)
            | Bson::Array(_)
            | Bson::Document(_)
            | Bson::RegularExpression(_)
    )
}

/// Rejects documents the store cannot hold: unsupported value variants, `$`-prefixed keys and
/// dotted keys at any depth.
///
/// # Errors
/// Returns `InvalidDocument` naming the offending key.
pub fn validate_document(doc: &Document) -> Result<(), DbError> {
    for (key, value) in doc {
        if key.starts_with('$') {
            return Err(DbError::InvalidDocument(format!("key '{key}' must not start with '$'")));
        }
        if key.contains('.') {
            return Err(DbError::InvalidDocument(format!("key '{key}' must not contain '.'")));
        }
        validate_value(key, value)?;
    }
    Ok(())
}

fn validate_value(key: &str, value: &Bson) -> Result<(), DbError> {
    match value {
        Bson::Document(d) => validate_document(d),
        Bson::Array(items) => items.iter().try_for_each(|v| validate_value(key, v)),
        v if is_supported(v) => Ok(()),
        v => Err(DbError::InvalidDocument(format!(
            "field '{key}' holds unsupported type {}",
            type_name(v)
        ))),
    }
}
