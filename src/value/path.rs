//! Dotted-path addressing over documents and arrays.

use bson::{Bson, Document};

/// Deepest path the engine will walk.
pub(crate) const MAX_PATH_DEPTH: usize = 100;

/// Parses a path segment as an array index. Signs and blanks are field names.
#[must_use]
pub fn parse_index(segment: &str) -> Option<usize> {
    if segment.is_empty() || !segment.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    segment.parse().ok()
}

/// Resolves `path` against a document. `None` is the absent marker, distinct from `Bson::Null`.
#[must_use]
pub fn resolve<'a>(doc: &'a Document, path: &str) -> Option<&'a Bson> {
    let (head, rest) = match path.split_once('.') {
        Some((h, r)) => (h, Some(r)),
        None => (path, None),
    };
    let first = doc.get(head)?;
    match rest {
        None => Some(first),
        Some(rest) => resolve_value(first, rest),
    }
}

/// Resolves `path` against an arbitrary value.
///
/// An integer segment indexes into arrays; any other segment is a field lookup on a document.
/// A scalar, a missing key, an out-of-range index or a shape mismatch yields `None`.
#[must_use]
pub fn resolve_value<'a>(value: &'a Bson, path: &str) -> Option<&'a Bson> {
    let mut cur = value;
    for (depth, seg) in path.split('.').enumerate() {
        if depth >= MAX_PATH_DEPTH {
            return None;
        }
        cur = match cur {
            Bson::Array(items) => items.get(parse_index(seg)?)?,
            Bson::Document(d) => d.get(seg)?,
            _ => return None,
        };
    }
    Some(cur)
}

/// Every value a filter path can address, fanning out over arrays of sub-documents.
///
/// `None` entries stand for an absent field. An empty result means the path ran into a scalar.
#[must_use]
pub fn candidates<'a>(doc: &'a Document, path: &str) -> Vec<Option<&'a Bson>> {
    let parts: Vec<&str> = path.split('.').take(MAX_PATH_DEPTH).collect();
    let mut out = Vec::new();
    collect_in_document(doc, &parts, &mut out);
    out
}

fn collect_in_document<'a>(doc: &'a Document, parts: &[&str], out: &mut Vec<Option<&'a Bson>>) {
    let Some((first, rest)) = parts.split_first() else {
        return;
    };
    match doc.get(*first) {
        None => out.push(None),
        Some(v) if rest.is_empty() => out.push(Some(v)),
        Some(v) => collect_in_value(v, rest, out),
    }
}

fn collect_in_value<'a>(value: &'a Bson, parts: &[&str], out: &mut Vec<Option<&'a Bson>>) {
    match value {
        Bson::Document(d) => collect_in_document(d, parts, out),
        Bson::Array(items) => {
            let Some((first, rest)) = parts.split_first() else {
                return;
            };
            if let Some(idx) = parse_index(first) {
                if let Some(item) = items.get(idx) {
                    if rest.is_empty() {
                        out.push(Some(item));
                    } else {
                        collect_in_value(item, rest, out);
                    }
                }
                return;
            }
            for item in items {
                if let Bson::Document(d) = item
                    && d.contains_key(*first)
                {
                    collect_in_document(d, parts, out);
                }
            }
        }
        _ => {}
    }
}

/// Resolution used by aggregation field references: a field name met at an array maps over the
/// array's sub-documents and produces an array of the results.
#[must_use]
pub fn resolve_expanding(doc: &Document, path: &str) -> Option<Bson> {
    let parts: Vec<&str> = path.split('.').collect();
    if parts.len() > MAX_PATH_DEPTH {
        return None;
    }
    let (first, rest) = parts.split_first()?;
    expand(doc.get(*first)?, rest)
}

/// Same as [`resolve_expanding`] but rooted at any value.
#[must_use]
pub fn resolve_value_expanding(value: &Bson, path: &str) -> Option<Bson> {
    let parts: Vec<&str> = path.split('.').collect();
    if parts.len() > MAX_PATH_DEPTH {
        return None;
    }
    expand(value, &parts)
}

fn expand(value: &Bson, parts: &[&str]) -> Option<Bson> {
    let Some((first, rest)) = parts.split_first() else {
        return Some(value.clone());
    };
    match value {
        Bson::Document(d) => expand(d.get(*first)?, rest),
        Bson::Array(items) => {
            if let Some(idx) = parse_index(first) {
                return expand(items.get(idx)?, rest);
            }
            let mut out = Vec::new();
            for item in items {
                if let Bson::Document(d) = item
                    && let Some(v) = d.get(*first)
                    && let Some(x) = expand(v, rest)
                {
                    out.push(x);
                }
            }
            Some(Bson::Array(out))
        }
        _ => None,
    }
}

/// Assigns `value` at a dotted path, creating sub-documents and replacing scalars in the way.
pub fn set_path(doc: &mut Document, path: &str, value: Bson) {
    match path.split_once('.') {
        None => {
            doc.insert(path, value);
        }
        Some((head, rest)) => {
            let slot = doc.entry(head.to_string()).or_insert_with(|| Bson::Document(Document::new()));
            if !matches!(slot, Bson::Document(_)) {
                *slot = Bson::Document(Document::new());
            }
            if let Bson::Document(sub) = slot {
                set_path(sub, rest, value);
            }
        }
    }
}

/// Removes the value at a dotted path. Arrays of sub-documents are visited element-wise.
pub fn remove_path(doc: &mut Document, path: &str) {
    match path.split_once('.') {
        None => {
            doc.remove(path);
        }
        Some((head, rest)) => match doc.get_mut(head) {
            Some(Bson::Document(sub)) => remove_path(sub, rest),
            Some(Bson::Array(items)) => {
                for item in items.iter_mut() {
                    if let Bson::Document(sub) = item {
                        remove_path(sub, rest);
                    }
                }
            }
            _ => {}
        },
    }
}
