use bson::Bson;
use bson::oid::ObjectId;

use crate::errors::DbError;

/// Hashable storage key derived from a document's `_id` value.
///
/// Numeric ids fold together the way the matcher compares them, so `1`, `1i64` and `1.0`
/// address the same slot. Structured ids fall back to their canonical extended JSON text.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum DocumentKey {
    Null,
    Bool(bool),
    Int(i64),
    Float(u64),
    Str(String),
    ObjectId([u8; 12]),
    DateTime(i64),
    Other(String),
}

impl DocumentKey {
    #[must_use]
    pub fn from_bson(id: &Bson) -> Self {
        match id {
            Bson::Null => DocumentKey::Null,
            Bson::Boolean(b) => DocumentKey::Bool(*b),
            Bson::Int32(i) => DocumentKey::Int(i64::from(*i)),
            Bson::Int64(i) => DocumentKey::Int(*i),
            Bson::Double(f) => {
                if f.fract() == 0.0 && *f >= i64::MIN as f64 && *f <= i64::MAX as f64 {
                    DocumentKey::Int(*f as i64)
                } else {
                    DocumentKey::Float(f.to_bits())
                }
            }
            Bson::String(s) => DocumentKey::Str(s.clone()),
            Bson::ObjectId(oid) => DocumentKey::ObjectId(oid.bytes()),
            Bson::DateTime(dt) => DocumentKey::DateTime(dt.timestamp_millis()),
            other => DocumentKey::Other(other.clone().into_canonical_extjson().to_string()),
        }
    }
}

/// Fresh identifier for a document inserted without `_id`.
#[must_use]
pub fn new_object_id() -> Bson {
    Bson::ObjectId(ObjectId::new())
}

/// Rebuilds an identifier from its 24-character hex form.
///
/// # Errors
/// Returns `InvalidDocument` when the text is not a valid ObjectId.
pub fn object_id_from_hex(hex: &str) -> Result<ObjectId, DbError> {
    ObjectId::parse_str(hex).map_err(|e| DbError::InvalidDocument(format!("bad ObjectId '{hex}': {e}")))
}

/// Rebuilds an identifier from its 12-byte form.
#[must_use]
pub fn object_id_from_bytes(bytes: [u8; 12]) -> ObjectId {
    ObjectId::from_bytes(bytes)
}
