use parking_lot::Mutex;
use regex::{Regex, RegexBuilder};
use std::collections::HashMap;
use std::sync::LazyLock;

use crate::errors::DbError;

const MAX_CACHED_PATTERNS: usize = 256;

static COMPILED: LazyLock<Mutex<HashMap<(String, String), Regex>>> =
    LazyLock::new(|| Mutex::new(HashMap::new()));

/// Compiles a pattern with server-style option letters (`i`, `m`, `s`, `x`).
///
/// # Errors
/// `OperationFailure` for an unknown option letter or a pattern the regex engine rejects.
pub fn compile_pattern(pattern: &str, options: &str) -> Result<Regex, DbError> {
    let key = (pattern.to_string(), options.to_string());
    if let Some(re) = COMPILED.lock().get(&key) {
        return Ok(re.clone());
    }
    let mut builder = RegexBuilder::new(pattern);
    for flag in options.chars() {
        match flag {
            'i' => {
                builder.case_insensitive(true);
            }
            'm' => {
                builder.multi_line(true);
            }
            's' => {
                builder.dot_matches_new_line(true);
            }
            'x' => {
                builder.ignore_whitespace(true);
            }
            'u' | 'l' => {}
            other => {
                return Err(DbError::operation_failure(
                    51108,
                    format!("invalid flag in regex options: {other}"),
                ));
            }
        }
    }
    let re = builder
        .build()
        .map_err(|e| DbError::operation_failure(51091, format!("Regular expression is invalid: {e}")))?;
    let mut cache = COMPILED.lock();
    if cache.len() >= MAX_CACHED_PATTERNS {
        cache.clear();
    }
    cache.insert(key, re.clone());
    Ok(re)
}

/// # Errors
/// See [`compile_pattern`].
pub fn compile_bson_regex(re: &bson::Regex) -> Result<Regex, DbError> {
    compile_pattern(&re.pattern, &re.options)
}
