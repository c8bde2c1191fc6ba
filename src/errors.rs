use bson::Document;
use thiserror::Error;

use crate::bulk::BulkWriteResult;

/// Code carried by every duplicate-key failure.
pub const DUPLICATE_KEY_CODE: i32 = 11000;

#[derive(Debug, Error)]
pub enum DbError {
    #[error("{message} (code {code})")]
    OperationFailure { code: i32, message: String, details: Option<Document> },

    #[error("E11000 duplicate key error: {message}")]
    DuplicateKey { message: String },

    #[error("write error: {message} (code {code})")]
    WriteError { code: i32, message: String },

    #[error("batch op errors occurred: {} write error(s)", .0.write_errors.len())]
    BulkWrite(Box<BulkWriteResult>),

    #[error("not implemented: {0}")]
    NotImplemented(String),

    #[error("invalid operation: {0}")]
    InvalidOperation(String),

    #[error("invalid name: {0}")]
    InvalidName(String),

    #[error("invalid document: {0}")]
    InvalidDocument(String),

    #[error("I/O error: {0}")]
    Io(String),

    #[error("Serde JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Extended JSON: {0}")]
    ExtJson(#[from] bson::extjson::de::Error),

    #[error("config error: {0}")]
    Config(String),
}

impl DbError {
    pub fn operation_failure(code: i32, message: impl Into<String>) -> Self {
        DbError::OperationFailure { code, message: message.into(), details: None }
    }

    pub fn not_implemented(what: impl Into<String>) -> Self {
        let what = what.into();
        log::warn!("rejecting unimplemented feature: {what}");
        DbError::NotImplemented(what)
    }

    pub fn write_error(code: i32, message: impl Into<String>) -> Self {
        DbError::WriteError { code, message: message.into() }
    }

    pub fn duplicate_key(message: impl Into<String>) -> Self {
        DbError::DuplicateKey { message: message.into() }
    }

    /// Numeric server code, when the failure category has one.
    #[must_use]
    pub fn code(&self) -> Option<i32> {
        match self {
            DbError::OperationFailure { code, .. } | DbError::WriteError { code, .. } => Some(*code),
            DbError::DuplicateKey { .. } => Some(DUPLICATE_KEY_CODE),
            DbError::BulkWrite(_) => Some(65),
            _ => None,
        }
    }

    /// Errors that a bulk batch records per item instead of aborting on. Unbuilt features and
    /// I/O or configuration failures are not about the item and abort the batch.
    #[must_use]
    pub fn is_write_error(&self) -> bool {
        !matches!(
            self,
            DbError::NotImplemented(_)
                | DbError::BulkWrite(_)
                | DbError::Io(_)
                | DbError::Json(_)
                | DbError::ExtJson(_)
                | DbError::Config(_)
        )
    }
}

impl From<std::io::Error> for DbError {
    fn from(e: std::io::Error) -> Self {
        DbError::Io(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn duplicate_key_carries_code_11000() {
        let e = DbError::duplicate_key("_id 1");
        assert_eq!(e.code(), Some(11000));
        assert!(e.is_write_error());
        assert!(e.to_string().contains("E11000"));
    }

    #[test]
    fn not_implemented_has_no_code() {
        let e = DbError::not_implemented("$where");
        assert_eq!(e.code(), None);
        assert!(!e.is_write_error());
    }

    #[test]
    fn item_level_failures_are_write_errors_even_without_a_code() {
        assert!(DbError::InvalidDocument("key '$bad'".into()).is_write_error());
        assert!(DbError::InvalidOperation("mixed update".into()).is_write_error());
        assert!(DbError::operation_failure(2, "bad filter").is_write_error());
        assert!(!DbError::Config("x".into()).is_write_error());
    }
}
