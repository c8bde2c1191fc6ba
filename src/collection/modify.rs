//! Updates, replacements and the `find_one_and_*` family.

use bson::Document;

use super::core::{Collection, matching_keys};
use crate::errors::DbError;
use crate::query::telemetry;
use crate::query::{
    FindOneAndOptions, Projection, ReturnDocument, SortSpec, UpdateOptions, UpdateReport, apply_update,
    compare_for_sort, is_replacement, upsert_seed, validate_filter,
};
use crate::store::{CollectionData, with_id};
use crate::types::DocumentKey;
use crate::value::validate_document;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Shape {
    /// Operators, or a replacement for single-document updates.
    Any,
    Operators,
    Replacement,
}

/// What happened to the one document a `find_one_and_*` call touched.
struct Touched {
    before: Option<Document>,
    after: Option<Document>,
}

fn check_shape(update: &Document, shape: Shape) -> Result<bool, DbError> {
    let replacement = is_replacement(update)?;
    match shape {
        Shape::Replacement if !replacement => {
            Err(DbError::InvalidOperation("replacement document must not contain update operators".into()))
        }
        Shape::Operators if replacement => {
            Err(DbError::InvalidOperation("update document must contain only update operators".into()))
        }
        _ => Ok(replacement),
    }
}

/// Builds the document an upsert inserts.
fn upsert_document(filter: &Document, update: &Document, replacement: bool) -> Result<Document, DbError> {
    let seed = upsert_seed(filter);
    let doc = if replacement {
        let mut doc = Document::new();
        if let Some(id) = update.get("_id").or_else(|| seed.get("_id")) {
            doc.insert("_id", id.clone());
        }
        doc.extend(update.iter().filter(|(k, _)| k.as_str() != "_id").map(|(k, v)| (k.clone(), v.clone())));
        doc
    } else {
        let mut doc = seed;
        apply_update(&mut doc, update, filter, true)?;
        doc
    };
    validate_document(&doc)?;
    Ok(with_id(doc))
}

/// Applies `update` to the stored document under `key`. Returns the stored copies before and
/// after, and whether the content changed.
fn update_stored(
    data: &mut CollectionData,
    key: &DocumentKey,
    filter: &Document,
    update: &Document,
) -> Result<(Document, Document, bool), DbError> {
    let before = data
        .documents
        .get(key)
        .cloned()
        .ok_or_else(|| DbError::InvalidOperation("document vanished during update".into()))?;
    let mut after = before.clone();
    let changed = apply_update(&mut after, update, filter, false)?;
    if changed {
        data.replace(key, after.clone())?;
    }
    Ok((before, after, changed))
}

impl Collection {
    /// Updates the first matching document. A document without operators replaces the match.
    ///
    /// # Errors
    /// `OperationFailure`/`WriteError` for malformed updates or type conflicts, `DuplicateKey`
    /// on unique-index collisions.
    pub fn update_one(&self, filter: Document, update: Document, options: UpdateOptions) -> Result<UpdateReport, DbError> {
        self.update(&filter, &update, options.upsert, false, Shape::Any, "update_one")
    }

    /// # Errors
    /// As [`Collection::update_one`]; `InvalidOperation` when `update` has no operators.
    pub fn update_many(&self, filter: Document, update: Document, options: UpdateOptions) -> Result<UpdateReport, DbError> {
        self.update(&filter, &update, options.upsert, true, Shape::Operators, "update_many")
    }

    /// # Errors
    /// As [`Collection::update_one`]; `InvalidOperation` when `replacement` has operators.
    pub fn replace_one(&self, filter: Document, replacement: Document, options: UpdateOptions) -> Result<UpdateReport, DbError> {
        self.update(&filter, &replacement, options.upsert, false, Shape::Replacement, "replace_one")
    }

    fn update(&self, filter: &Document, update: &Document, upsert: bool, multi: bool, shape: Shape, op: &str) -> Result<UpdateReport, DbError> {
        validate_filter(filter)?;
        let replacement = check_shape(update, shape)?;
        let report = self.timed(
            op,
            || {
                self.store().write(|data| {
                    let mut keys = matching_keys(data, filter)?;
                    if !multi {
                        keys.truncate(1);
                    }
                    let mut report = UpdateReport { matched: keys.len() as u64, ..Default::default() };
                    for key in &keys {
                        let (_, _, changed) = update_stored(data, key, filter, update)?;
                        if changed {
                            report.modified += 1;
                        }
                    }
                    if keys.is_empty() && upsert {
                        let doc = upsert_document(filter, update, replacement)?;
                        report.upserted_id = doc.get("_id").cloned();
                        data.insert(doc)?;
                    }
                    Ok::<_, DbError>(report)
                })
            },
            |r| usize::try_from(r.matched).unwrap_or(usize::MAX),
        )?;
        telemetry::log_audit(
            op,
            &self.full_name(),
            &format!("matched={} modified={} upserted={}", report.matched, report.modified, report.upserted_id.is_some()),
        );
        Ok(report)
    }

    /// # Errors
    /// As [`Collection::update_one`].
    pub fn find_one_and_update(&self, filter: Document, update: Document, options: FindOneAndOptions) -> Result<Option<Document>, DbError> {
        self.find_one_and(&filter, Some(&update), Shape::Operators, &options, "find_one_and_update")
    }

    /// # Errors
    /// As [`Collection::replace_one`].
    pub fn find_one_and_replace(&self, filter: Document, replacement: Document, options: FindOneAndOptions) -> Result<Option<Document>, DbError> {
        self.find_one_and(&filter, Some(&replacement), Shape::Replacement, &options, "find_one_and_replace")
    }

    /// Removes the first matching document (after sorting) and returns it.
    ///
    /// # Errors
    /// `OperationFailure` for a malformed filter, sort or projection.
    pub fn find_one_and_delete(&self, filter: Document, options: FindOneAndOptions) -> Result<Option<Document>, DbError> {
        self.find_one_and(&filter, None, Shape::Any, &options, "find_one_and_delete")
    }

    fn find_one_and(
        &self,
        filter: &Document,
        update: Option<&Document>,
        shape: Shape,
        options: &FindOneAndOptions,
        op: &str,
    ) -> Result<Option<Document>, DbError> {
        validate_filter(filter)?;
        let replacement = update.map(|u| check_shape(u, shape)).transpose()?.unwrap_or(false);
        let projection = options.projection.as_ref().map(Projection::parse).transpose()?;
        let sort: &[SortSpec] = options.sort.as_deref().unwrap_or(&[]);

        let touched = self.store().write(|data| {
            let keys = matching_keys(data, filter)?;
            let target = keys.into_iter().min_by(|a, b| match (data.documents.get(a), data.documents.get(b)) {
                (Some(x), Some(y)) => compare_for_sort(x, y, sort),
                _ => std::cmp::Ordering::Equal,
            });
            let Some(update) = update else {
                let before = target.and_then(|k| data.remove(&k));
                return Ok::<_, DbError>(Touched { before: before.clone(), after: before });
            };
            match target {
                Some(key) => {
                    let (before, after, _) = update_stored(data, &key, filter, update)?;
                    Ok(Touched { before: Some(before), after: Some(after) })
                }
                None if options.upsert => {
                    let doc = upsert_document(filter, update, replacement)?;
                    data.insert(doc.clone())?;
                    Ok(Touched { before: None, after: Some(doc) })
                }
                None => Ok(Touched { before: None, after: None }),
            }
        })?;
        if touched.after.is_some() || touched.before.is_some() {
            telemetry::log_audit(op, &self.full_name(), "1 document");
        }
        let chosen = match options.return_document {
            ReturnDocument::Before => touched.before,
            ReturnDocument::After => touched.after,
        };
        Ok(chosen.map(|d| match &projection {
            Some(p) => p.apply(&d),
            None => d,
        }))
    }
}
