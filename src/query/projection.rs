//! Find-style projections: inclusion or exclusion trees plus `$elemMatch` and `$slice`.

use bson::{Bson, Document};
use std::collections::HashMap;

use super::matcher::element_matches;
use crate::errors::DbError;
use crate::value::convert::{as_i64_exact, truthy};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    Include,
    Exclude,
}

/// Field paths folded into a tree: `a.b` and `a.c` share the `a` node.
#[derive(Debug, Clone, Default)]
pub(crate) struct FieldTree {
    leaf: bool,
    children: HashMap<String, FieldTree>,
}

impl FieldTree {
    /// # Errors
    /// `OperationFailure` (31249) when one path is a prefix of another.
    pub(crate) fn from_paths<'a>(paths: impl IntoIterator<Item = &'a str>) -> Result<Self, DbError> {
        let mut root = FieldTree::default();
        for path in paths {
            let mut node = &mut root;
            let parts: Vec<&str> = path.split('.').collect();
            for (i, part) in parts.iter().enumerate() {
                if node.leaf {
                    return Err(collision(path));
                }
                node = node.children.entry((*part).to_string()).or_default();
                if i + 1 == parts.len() {
                    if node.leaf || !node.children.is_empty() {
                        return Err(collision(path));
                    }
                    node.leaf = true;
                }
            }
        }
        Ok(root)
    }

    /// Keeps only the fields in the tree. `_id` is not special here.
    pub(crate) fn include(&self, doc: &Document) -> Document {
        let mut out = Document::new();
        for (k, v) in doc {
            let Some(node) = self.children.get(k) else {
                continue;
            };
            if node.leaf {
                out.insert(k.clone(), v.clone());
                continue;
            }
            match v {
                Bson::Document(sub) => {
                    out.insert(k.clone(), node.include(sub));
                }
                Bson::Array(items) => {
                    let kept: Vec<Bson> = items
                        .iter()
                        .filter_map(|item| match item {
                            Bson::Document(sub) => Some(Bson::Document(node.include(sub))),
                            _ => None,
                        })
                        .collect();
                    out.insert(k.clone(), kept);
                }
                _ => {}
            }
        }
        out
    }

    /// Drops the fields in the tree and keeps everything else.
    pub(crate) fn exclude(&self, doc: &Document) -> Document {
        let mut out = Document::new();
        for (k, v) in doc {
            let Some(node) = self.children.get(k) else {
                out.insert(k.clone(), v.clone());
                continue;
            };
            if node.leaf {
                continue;
            }
            let kept = match v {
                Bson::Document(sub) => Bson::Document(node.exclude(sub)),
                Bson::Array(items) => Bson::Array(
                    items
                        .iter()
                        .map(|item| match item {
                            Bson::Document(sub) => Bson::Document(node.exclude(sub)),
                            other => other.clone(),
                        })
                        .collect(),
                ),
                other => other.clone(),
            };
            out.insert(k.clone(), kept);
        }
        out
    }
}

fn collision(path: &str) -> DbError {
    DbError::operation_failure(31249, format!("Path collision at {path}"))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SliceSpec {
    Count(i64),
    Range(i64, i64),
}

/// A parsed find projection.
#[derive(Debug, Clone)]
pub struct Projection {
    mode: Mode,
    tree: FieldTree,
    include_id: bool,
    elem_match: Vec<(String, Document)>,
    slices: Vec<(String, SliceSpec)>,
}

impl Projection {
    /// # Errors
    /// `OperationFailure` for mixed inclusion/exclusion or colliding paths, `NotImplemented`
    /// for positional projection and unsupported projection operators.
    pub fn parse(spec: &Document) -> Result<Self, DbError> {
        let mut include_id = true;
        let mut included: Vec<String> = Vec::new();
        let mut excluded: Vec<String> = Vec::new();
        let mut elem_match = Vec::new();
        let mut slices = Vec::new();
        for (key, value) in spec {
            if key == "$" || key.ends_with(".$") || key.contains(".$.") {
                return Err(DbError::not_implemented("positional projection"));
            }
            if key == "_id" && !matches!(value, Bson::Document(_)) {
                include_id = truthy(value);
                continue;
            }
            match value {
                Bson::Document(op) => match op.iter().next() {
                    Some((name, arg)) if name == "$elemMatch" && op.len() == 1 => {
                        let Bson::Document(sub) = arg else {
                            return Err(DbError::operation_failure(2, "$elemMatch needs an Object"));
                        };
                        if key.contains('.') {
                            return Err(DbError::operation_failure(2, "Cannot use $elemMatch projection on a nested field"));
                        }
                        element_matches(sub, &Bson::Null)?;
                        included.push(key.clone());
                        elem_match.push((key.clone(), sub.clone()));
                    }
                    Some((name, arg)) if name == "$slice" && op.len() == 1 => {
                        slices.push((key.clone(), parse_slice(arg)?));
                    }
                    Some((name, _)) if name.starts_with('$') => {
                        return Err(DbError::not_implemented(format!("projection operator {name}")));
                    }
                    _ => {
                        // Nested form {"a": {"b": 1}} is the same as {"a.b": 1}.
                        for (sub_key, sub_value) in op {
                            let path = format!("{key}.{sub_key}");
                            if truthy(sub_value) {
                                included.push(path);
                            } else {
                                excluded.push(path);
                            }
                        }
                    }
                },
                flag => {
                    if truthy(flag) {
                        included.push(key.clone());
                    } else {
                        excluded.push(key.clone());
                    }
                }
            }
        }
        let mode = match (included.is_empty(), excluded.is_empty()) {
            (false, false) => {
                return Err(DbError::operation_failure(
                    31254,
                    format!("Cannot do exclusion on field {} in inclusion projection", excluded[0]),
                ));
            }
            (false, true) => Mode::Include,
            _ => Mode::Exclude,
        };
        let paths = if mode == Mode::Include { &included } else { &excluded };
        let tree = FieldTree::from_paths(paths.iter().map(String::as_str))?;
        Ok(Self { mode, tree, include_id, elem_match, slices })
    }

    /// Projects a document. The input is not modified.
    #[must_use]
    pub fn apply(&self, doc: &Document) -> Document {
        let mut out = match self.mode {
            Mode::Include => {
                let mut projected = self.tree.include(doc);
                if self.include_id && let Some(id) = doc.get("_id") {
                    let mut with_id = Document::new();
                    with_id.insert("_id", id.clone());
                    with_id.extend(projected);
                    projected = with_id;
                }
                projected
            }
            Mode::Exclude => {
                let mut projected = self.tree.exclude(doc);
                if !self.include_id {
                    projected.remove("_id");
                }
                projected
            }
        };
        for (field, sub) in &self.elem_match {
            let hit = match doc.get(field) {
                Some(Bson::Array(items)) => items.iter().find(|item| element_matches(sub, item).unwrap_or(false)).cloned(),
                _ => None,
            };
            match hit {
                Some(item) => {
                    out.insert(field.clone(), Bson::Array(vec![item]));
                }
                None => {
                    out.remove(field);
                }
            }
        }
        for (field, slice) in &self.slices {
            if let Some(Bson::Array(items)) = out.get_mut(field) {
                *items = apply_slice(items, *slice);
            }
        }
        out
    }
}

fn parse_slice(arg: &Bson) -> Result<SliceSpec, DbError> {
    match arg {
        Bson::Array(pair) if pair.len() == 2 => {
            let skip = as_i64_exact(&pair[0]);
            let limit = as_i64_exact(&pair[1]);
            match (skip, limit) {
                (Some(s), Some(l)) if l > 0 => Ok(SliceSpec::Range(s, l)),
                _ => Err(DbError::operation_failure(2, "$slice limit must be positive")),
            }
        }
        other => as_i64_exact(other)
            .map(SliceSpec::Count)
            .ok_or_else(|| DbError::operation_failure(2, "$slice only supports numbers and [skip, limit] arrays")),
    }
}

fn apply_slice(items: &[Bson], slice: SliceSpec) -> Vec<Bson> {
    let len = i64::try_from(items.len()).unwrap_or(i64::MAX);
    let (start, count) = match slice {
        SliceSpec::Count(n) if n >= 0 => (0, n),
        SliceSpec::Count(n) => (len.saturating_add(n).max(0), n.saturating_neg()),
        SliceSpec::Range(s, l) if s >= 0 => (s.min(len), l),
        SliceSpec::Range(s, l) => (len.saturating_add(s).max(0), l),
    };
    let start = usize::try_from(start).unwrap_or(items.len());
    let count = usize::try_from(count).unwrap_or(usize::MAX);
    items.iter().skip(start).take(count).cloned().collect()
}
