//! Update interpreter: operator documents and whole-document replacement.

use bson::{Bson, Document};
use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::LazyLock;

use super::matcher::{element_matches, element_satisfies, is_operator_document};
use super::types::{Order, parse_sort};
use crate::errors::DbError;
use crate::value::compare::{compare_bson, values_equal};
use crate::value::convert::{Number, as_i64_exact, type_name};
use crate::value::path::{parse_index, resolve, resolve_value, set_path};
use crate::value::validate_document;

const FAILED_TO_PARSE: i32 = 9;
const TYPE_MISMATCH: i32 = 14;
const PATH_NOT_VIABLE: i32 = 28;
const IMMUTABLE_FIELD: i32 = 66;
/// Most `null` elements a single write may pad an array with.
const MAX_ARRAY_PADDING: usize = 1_500_000;

struct UpdateCtx {
    is_insert: bool,
}

type UpdateOp = fn(&mut Document, &str, &Bson, &UpdateCtx) -> Result<(), DbError>;

static UPDATE_OPERATORS: LazyLock<HashMap<&'static str, UpdateOp>> = LazyLock::new(|| {
    let mut m: HashMap<&'static str, UpdateOp> = HashMap::new();
    m.insert("$set", op_set);
    m.insert("$unset", op_unset);
    m.insert("$inc", op_inc);
    m.insert("$mul", op_mul);
    m.insert("$min", op_min);
    m.insert("$max", op_max);
    m.insert("$currentDate", op_current_date);
    m.insert("$setOnInsert", op_set_on_insert);
    m.insert("$rename", op_rename);
    m.insert("$push", op_push);
    m.insert("$addToSet", op_add_to_set);
    m.insert("$pull", op_pull);
    m.insert("$pullAll", op_pull_all);
    m.insert("$pop", op_pop);
    m
});

const UNSUPPORTED_UPDATE_OPERATORS: &[&str] = &["$bit"];

/// True when `update` replaces the whole document rather than applying operators.
///
/// # Errors
/// `OperationFailure` when operator keys and plain keys are mixed.
pub fn is_replacement(update: &Document) -> Result<bool, DbError> {
    let operators = update.keys().filter(|k| k.starts_with('$')).count();
    if operators == 0 {
        Ok(true)
    } else if operators == update.len() {
        Ok(false)
    } else {
        Err(DbError::operation_failure(
            FAILED_TO_PARSE,
            "update document cannot mix operators and plain fields",
        ))
    }
}

/// Applies `update` to `doc`, resolving positional `$` segments against `query`.
///
/// Returns whether the document content changed. On error the document may be partially
/// updated; callers work on a copy and only commit it on success.
///
/// # Errors
/// `OperationFailure` for malformed updates, `WriteError` for type conflicts, `NotImplemented`
/// for unsupported operators.
pub fn apply_update(doc: &mut Document, update: &Document, query: &Document, is_insert: bool) -> Result<bool, DbError> {
    let before = doc.clone();
    if is_replacement(update)? {
        replace_document(doc, update);
    } else {
        let ctx = UpdateCtx { is_insert };
        for (op, arg) in update {
            let Some(handler) = UPDATE_OPERATORS.get(op.as_str()) else {
                return Err(if UNSUPPORTED_UPDATE_OPERATORS.contains(&op.as_str()) {
                    DbError::not_implemented(format!("update operator {op}"))
                } else {
                    DbError::operation_failure(FAILED_TO_PARSE, format!("Unknown modifier: {op}"))
                });
            };
            let Bson::Document(fields) = arg else {
                return Err(DbError::operation_failure(
                    FAILED_TO_PARSE,
                    format!("Modifiers operate on fields but we found type {} instead", type_name(arg)),
                ));
            };
            for (path, value) in fields {
                let path = resolve_positional(path, &before, query)?;
                handler(doc, &path, value, &ctx)?;
            }
        }
        if !is_insert && before.get("_id").is_some_and(|id| doc.get("_id") != Some(id)) {
            return Err(DbError::write_error(
                IMMUTABLE_FIELD,
                "Performing an update on the path '_id' would modify the immutable field '_id'",
            ));
        }
    }
    validate_document(doc)?;
    Ok(before != *doc)
}

/// Replaces every field but `_id`. A replacement carrying its own `_id` keeps that one.
fn replace_document(doc: &mut Document, replacement: &Document) {
    let id = replacement.get("_id").or_else(|| doc.get("_id")).cloned();
    doc.clear();
    if let Some(id) = id {
        doc.insert("_id", id);
    }
    for (k, v) in replacement {
        if k != "_id" {
            doc.insert(k.clone(), v.clone());
        }
    }
}

/// Builds the document an upsert starts from: the query's equality clauses with dotted keys
/// expanded.
#[must_use]
pub fn upsert_seed(query: &Document) -> Document {
    let mut out = Document::new();
    seed_into(&mut out, query);
    out
}

fn seed_into(out: &mut Document, query: &Document) {
    for (key, cond) in query {
        if key == "$and" {
            if let Bson::Array(subs) = cond {
                for sub in subs {
                    if let Bson::Document(d) = sub {
                        seed_into(out, d);
                    }
                }
            }
            continue;
        }
        if key.starts_with('$') {
            continue;
        }
        let value = match cond {
            Bson::Document(d) if is_operator_document(d) => match d.get("$eq") {
                Some(eq) => eq.clone(),
                None => continue,
            },
            Bson::RegularExpression(_) => continue,
            other => other.clone(),
        };
        set_path(out, key, value);
    }
}

/// Rewrites a path's single `$` segment to the index of the first array element the query
/// selected.
fn resolve_positional(path: &str, doc: &Document, query: &Document) -> Result<String, DbError> {
    let parts: Vec<&str> = path.split('.').collect();
    let positional: Vec<usize> = parts.iter().enumerate().filter(|(_, p)| **p == "$").map(|(i, _)| i).collect();
    let pos = match positional.as_slice() {
        [] => return Ok(path.to_string()),
        [pos] => *pos,
        _ => {
            return Err(DbError::operation_failure(
                2,
                format!("Too many positional (i.e. '$') elements found in path '{path}'"),
            ));
        }
    };
    let not_found = || DbError::write_error(2, "The positional operator did not find the match needed from the query.");
    if pos == 0 {
        return Err(not_found());
    }
    let prefix = parts[..pos].join(".");
    let Some(Bson::Array(items)) = resolve(doc, &prefix) else {
        return Err(not_found());
    };
    let mut narrowed = Bson::Document(query.clone());
    for part in &parts[..pos] {
        narrowed = narrow_spec(&narrowed, part);
    }
    let cond = match &narrowed {
        Bson::Document(d) if d.contains_key("$elemMatch") => d.get("$elemMatch").cloned().unwrap_or(Bson::Null),
        other => other.clone(),
    };
    if matches!(&cond, Bson::Document(d) if d.is_empty()) {
        return Err(not_found());
    }
    for (idx, item) in items.iter().enumerate() {
        if element_satisfies(&cond, item)? {
            let mut out: Vec<String> = parts.iter().map(|p| (*p).to_string()).collect();
            out[pos] = idx.to_string();
            return Ok(out.join("."));
        }
    }
    Err(not_found())
}

/// Narrows a query to the clauses under one path segment: `{"a.b": 1}` under `a` is `{"b": 1}`,
/// and `{"a": X}` under `a` is `X`.
fn narrow_spec(spec: &Bson, part: &str) -> Bson {
    let Bson::Document(d) = spec else {
        return Bson::Document(Document::new());
    };
    if let Some(exact) = d.get(part) {
        return exact.clone();
    }
    let mut out = Document::new();
    let prefix = format!("{part}.");
    for (k, v) in d {
        if let Some(rest) = k.strip_prefix(&prefix) {
            out.insert(rest.to_string(), v.clone());
        }
    }
    Bson::Document(out)
}

enum Container<'d> {
    Doc(&'d mut Document),
    Arr(&'d mut Vec<Bson>),
}

/// The place a path's last segment names, inside its parent container.
enum Slot<'d> {
    Field(&'d mut Document, String),
    Index(&'d mut Vec<Bson>, usize),
}

impl Slot<'_> {
    fn get(&self) -> Option<&Bson> {
        match self {
            Slot::Field(d, k) => d.get(k.as_str()),
            Slot::Index(a, i) => a.get(*i),
        }
    }

    fn get_mut(&mut self) -> Option<&mut Bson> {
        match self {
            Slot::Field(d, k) => d.get_mut(k.as_str()),
            Slot::Index(a, i) => a.get_mut(*i),
        }
    }

    fn set(self, value: Bson) {
        match self {
            Slot::Field(d, k) => {
                d.insert(k, value);
            }
            Slot::Index(a, i) => {
                if i >= a.len() {
                    a.resize(i, Bson::Null);
                    a.push(value);
                } else {
                    a[i] = value;
                }
            }
        }
    }

    fn remove(self) -> Option<Bson> {
        match self {
            Slot::Field(d, k) => d.remove(k.as_str()),
            Slot::Index(a, i) => a.get_mut(i).map(|v| std::mem::replace(v, Bson::Null)),
        }
    }
}

/// Walks to the parent of `path`'s last segment. With `create`, missing sub-documents are made
/// along the way; without it a missing or scalar parent yields `None`.
fn locate<'d>(doc: &'d mut Document, path: &str, create: bool) -> Result<Option<Slot<'d>>, DbError> {
    let parts: Vec<&str> = path.split('.').collect();
    let Some((last, parents)) = parts.split_last() else {
        return Ok(None);
    };
    if parts.iter().any(|p| p.is_empty()) {
        return Err(DbError::write_error(56, format!("An empty update path is not valid: '{path}'")));
    }
    fn not_viable(seg: &str, found: &Bson) -> DbError {
        DbError::write_error(
            PATH_NOT_VIABLE,
            format!("Cannot create field '{seg}' in element of type {}", type_name(found)),
        )
    }
    let mut cur = Container::Doc(doc);
    for seg in parents {
        cur = match cur {
            Container::Doc(d) => {
                if !d.contains_key(*seg) {
                    if !create {
                        return Ok(None);
                    }
                    d.insert(*seg, Document::new());
                }
                match d.get_mut(*seg) {
                    Some(Bson::Document(sub)) => Container::Doc(sub),
                    Some(Bson::Array(items)) => Container::Arr(items),
                    Some(_) if !create => return Ok(None),
                    Some(other) => return Err(not_viable(seg, other)),
                    None => return Ok(None),
                }
            }
            Container::Arr(items) => {
                let Some(idx) = parse_index(seg) else {
                    if !create {
                        return Ok(None);
                    }
                    return Err(DbError::write_error(
                        PATH_NOT_VIABLE,
                        format!("Cannot create field '{seg}' in an array"),
                    ));
                };
                if idx >= items.len() {
                    if !create {
                        return Ok(None);
                    }
                    check_padding(items.len(), idx, path)?;
                    items.resize(idx, Bson::Null);
                    items.push(Bson::Null);
                }
                let slot = &mut items[idx];
                if create && matches!(slot, Bson::Null) {
                    *slot = Bson::Document(Document::new());
                }
                match slot {
                    Bson::Document(sub) => Container::Doc(sub),
                    Bson::Array(inner) => Container::Arr(inner),
                    _ if !create => return Ok(None),
                    other => return Err(not_viable(seg, other)),
                }
            }
        };
    }
    match cur {
        Container::Doc(d) => Ok(Some(Slot::Field(d, (*last).to_string()))),
        Container::Arr(a) => match parse_index(last) {
            Some(i) => {
                if create {
                    check_padding(a.len(), i, path)?;
                }
                Ok(Some(Slot::Index(a, i)))
            }
            None if !create => Ok(None),
            None => Err(DbError::write_error(
                PATH_NOT_VIABLE,
                format!("Cannot create field '{last}' in an array"),
            )),
        },
    }
}

fn check_padding(len: usize, idx: usize, path: &str) -> Result<(), DbError> {
    if idx.saturating_sub(len) > MAX_ARRAY_PADDING {
        return Err(DbError::operation_failure(
            2,
            format!("can't write to '{path}': padding an array of {len} elements to index {idx} is too large"),
        ));
    }
    Ok(())
}

fn op_set(doc: &mut Document, path: &str, value: &Bson, _ctx: &UpdateCtx) -> Result<(), DbError> {
    if let Some(slot) = locate(doc, path, true)? {
        slot.set(value.clone());
    }
    Ok(())
}

fn op_set_on_insert(doc: &mut Document, path: &str, value: &Bson, ctx: &UpdateCtx) -> Result<(), DbError> {
    if ctx.is_insert {
        op_set(doc, path, value, ctx)?;
    }
    Ok(())
}

fn op_unset(doc: &mut Document, path: &str, _value: &Bson, _ctx: &UpdateCtx) -> Result<(), DbError> {
    if let Some(slot) = locate(doc, path, false)? {
        slot.remove();
    }
    Ok(())
}

fn numeric_arg(op: &str, value: &Bson) -> Result<Number, DbError> {
    Number::from_bson(value).ok_or_else(|| {
        DbError::write_error(
            TYPE_MISMATCH,
            format!("Cannot apply {op} with non-numeric argument of type {}", type_name(value)),
        )
    })
}

fn arith(op: &str, doc: &mut Document, path: &str, value: &Bson, combine: fn(Number, Number) -> Number, missing: fn(Number) -> Number) -> Result<(), DbError> {
    let arg = numeric_arg(op, value)?;
    let Some(mut slot) = locate(doc, path, true)? else {
        return Ok(());
    };
    let next = match slot.get_mut() {
        None => missing(arg),
        Some(cur) => match Number::from_bson(cur) {
            Some(n) => combine(n, arg),
            None => {
                return Err(DbError::write_error(
                    TYPE_MISMATCH,
                    format!("Cannot apply {op} to a value of non-numeric type {} at '{path}'", type_name(cur)),
                ));
            }
        },
    };
    slot.set(next.to_bson());
    Ok(())
}

fn op_inc(doc: &mut Document, path: &str, value: &Bson, _ctx: &UpdateCtx) -> Result<(), DbError> {
    arith("$inc", doc, path, value, Number::add, |arg| arg)
}

fn op_mul(doc: &mut Document, path: &str, value: &Bson, _ctx: &UpdateCtx) -> Result<(), DbError> {
    arith("$mul", doc, path, value, Number::mul, |arg| Number::Int(0).mul(arg))
}

fn bound(doc: &mut Document, path: &str, value: &Bson, replace_when: Ordering) -> Result<(), DbError> {
    let Some(slot) = locate(doc, path, true)? else {
        return Ok(());
    };
    let replace = match slot.get() {
        None => true,
        Some(cur) => compare_bson(value, cur) == replace_when,
    };
    if replace {
        slot.set(value.clone());
    }
    Ok(())
}

fn op_min(doc: &mut Document, path: &str, value: &Bson, _ctx: &UpdateCtx) -> Result<(), DbError> {
    bound(doc, path, value, Ordering::Less)
}

fn op_max(doc: &mut Document, path: &str, value: &Bson, _ctx: &UpdateCtx) -> Result<(), DbError> {
    bound(doc, path, value, Ordering::Greater)
}

fn op_current_date(doc: &mut Document, path: &str, value: &Bson, ctx: &UpdateCtx) -> Result<(), DbError> {
    match value {
        Bson::Boolean(true) => {}
        Bson::Document(d) => match d.get("$type") {
            Some(Bson::String(t)) if t == "date" => {}
            Some(Bson::String(t)) if t == "timestamp" => {
                return Err(DbError::not_implemented("$currentDate with $type timestamp"));
            }
            _ => {
                return Err(DbError::operation_failure(2, "The '$type' string field is required to be 'date' or 'timestamp'"));
            }
        },
        _ => {
            return Err(DbError::operation_failure(2, format!("{value} is not valid type for $currentDate")));
        }
    }
    op_set(doc, path, &Bson::DateTime(bson::DateTime::now()), ctx)
}

fn op_rename(doc: &mut Document, path: &str, value: &Bson, _ctx: &UpdateCtx) -> Result<(), DbError> {
    let Bson::String(target) = value else {
        return Err(DbError::operation_failure(2, "The 'to' field for $rename must be a string"));
    };
    if path.contains('.') || target.contains('.') {
        return Err(DbError::not_implemented("$rename with dotted paths"));
    }
    if path == target {
        return Err(DbError::operation_failure(2, "The source and target field for $rename must differ"));
    }
    if let Some(v) = doc.remove(path) {
        doc.insert(target.clone(), v);
    }
    Ok(())
}

fn array_at<'s>(slot: &'s mut Slot<'_>, op: &str, path: &str) -> Result<Option<&'s mut Vec<Bson>>, DbError> {
    match slot.get_mut() {
        None => Ok(None),
        Some(Bson::Array(items)) => Ok(Some(items)),
        Some(other) => Err(DbError::write_error(
            TYPE_MISMATCH,
            format!("Cannot apply {op} to non-array field '{path}' of type {}", type_name(other)),
        )),
    }
}

struct PushSpec {
    values: Vec<Bson>,
    position: Option<i64>,
    slice: Option<i64>,
    sort: Option<Bson>,
}

fn parse_push(value: &Bson) -> Result<PushSpec, DbError> {
    let Bson::Document(d) = value else {
        return Ok(PushSpec { values: vec![value.clone()], position: None, slice: None, sort: None });
    };
    if !d.contains_key("$each") {
        return Ok(PushSpec { values: vec![value.clone()], position: None, slice: None, sort: None });
    }
    let mut spec = PushSpec { values: Vec::new(), position: None, slice: None, sort: None };
    for (k, v) in d {
        match k.as_str() {
            "$each" => match v {
                Bson::Array(items) => spec.values = items.clone(),
                _ => return Err(DbError::write_error(2, "The argument to $each in $push must be an array")),
            },
            "$position" => {
                spec.position = Some(as_i64_exact(v).ok_or_else(|| DbError::write_error(2, "The value for $position must be an integer"))?);
            }
            "$slice" => {
                spec.slice = Some(as_i64_exact(v).ok_or_else(|| DbError::write_error(2, "The value for $slice must be an integer"))?);
            }
            "$sort" => spec.sort = Some(v.clone()),
            other => return Err(DbError::write_error(2, format!("Unrecognized clause in $push: {other}"))),
        }
    }
    Ok(spec)
}

fn sort_pushed(items: &mut [Bson], how: &Bson) -> Result<(), DbError> {
    match how {
        Bson::Document(keys) => {
            let keys = parse_sort(keys)?;
            items.sort_by(|a, b| {
                for k in &keys {
                    let va = resolve_value(a, &k.field).unwrap_or(&Bson::Null);
                    let vb = resolve_value(b, &k.field).unwrap_or(&Bson::Null);
                    let ord = compare_bson(va, vb);
                    if ord != Ordering::Equal {
                        return if k.order == Order::Asc { ord } else { ord.reverse() };
                    }
                }
                Ordering::Equal
            });
        }
        other => match Order::from_bson(other)? {
            Order::Asc => items.sort_by(compare_bson),
            Order::Desc => items.sort_by(|a, b| compare_bson(b, a)),
        },
    }
    Ok(())
}

fn op_push(doc: &mut Document, path: &str, value: &Bson, _ctx: &UpdateCtx) -> Result<(), DbError> {
    let spec = parse_push(value)?;
    let Some(mut slot) = locate(doc, path, true)? else {
        return Ok(());
    };
    let mut items = match array_at(&mut slot, "$push", path)? {
        Some(items) => std::mem::take(items),
        None => Vec::new(),
    };
    match spec.position {
        Some(p) => {
            let len = i64::try_from(items.len()).unwrap_or(i64::MAX);
            let at = if p < 0 { (len + p).max(0) } else { p.min(len) };
            let at = usize::try_from(at).unwrap_or(items.len());
            for (offset, v) in spec.values.into_iter().enumerate() {
                items.insert(at + offset, v);
            }
        }
        None => items.extend(spec.values),
    }
    if let Some(how) = &spec.sort {
        sort_pushed(&mut items, how)?;
    }
    if let Some(n) = spec.slice {
        let len = items.len();
        let keep = usize::try_from(n.unsigned_abs()).unwrap_or(usize::MAX).min(len);
        if n >= 0 {
            items.truncate(keep);
        } else {
            items.drain(..len - keep);
        }
    }
    slot.set(Bson::Array(items));
    Ok(())
}

fn op_add_to_set(doc: &mut Document, path: &str, value: &Bson, _ctx: &UpdateCtx) -> Result<(), DbError> {
    let values = match value {
        Bson::Document(d) if d.contains_key("$each") => match d.get("$each") {
            Some(Bson::Array(items)) => items.clone(),
            _ => return Err(DbError::write_error(2, "The argument to $each in $addToSet must be an array")),
        },
        other => vec![other.clone()],
    };
    let Some(mut slot) = locate(doc, path, true)? else {
        return Ok(());
    };
    let mut items = match array_at(&mut slot, "$addToSet", path)? {
        Some(items) => std::mem::take(items),
        None => Vec::new(),
    };
    for v in values {
        if !items.iter().any(|existing| values_equal(existing, &v)) {
            items.push(v);
        }
    }
    slot.set(Bson::Array(items));
    Ok(())
}

fn op_pull(doc: &mut Document, path: &str, value: &Bson, _ctx: &UpdateCtx) -> Result<(), DbError> {
    let Some(mut slot) = locate(doc, path, false)? else {
        return Ok(());
    };
    let Some(items) = array_at(&mut slot, "$pull", path)? else {
        return Ok(());
    };
    let mut kept = Vec::with_capacity(items.len());
    for item in items.drain(..) {
        let remove = match value {
            Bson::Document(sub) => element_matches(sub, &item)?,
            Bson::RegularExpression(_) => element_satisfies(value, &item)?,
            literal => values_equal(&item, literal),
        };
        if !remove {
            kept.push(item);
        }
    }
    *items = kept;
    Ok(())
}

fn op_pull_all(doc: &mut Document, path: &str, value: &Bson, _ctx: &UpdateCtx) -> Result<(), DbError> {
    let Bson::Array(unwanted) = value else {
        return Err(DbError::write_error(2, "$pullAll requires an array argument"));
    };
    let Some(mut slot) = locate(doc, path, false)? else {
        return Ok(());
    };
    if let Some(items) = array_at(&mut slot, "$pullAll", path)? {
        items.retain(|item| !unwanted.iter().any(|u| values_equal(item, u)));
    }
    Ok(())
}

fn op_pop(doc: &mut Document, path: &str, value: &Bson, _ctx: &UpdateCtx) -> Result<(), DbError> {
    let from_front = match as_i64_exact(value) {
        Some(1) => false,
        Some(-1) => true,
        _ => return Err(DbError::operation_failure(FAILED_TO_PARSE, "$pop expects 1 or -1")),
    };
    let Some(mut slot) = locate(doc, path, false)? else {
        return Ok(());
    };
    if let Some(items) = array_at(&mut slot, "$pop", path)?
        && !items.is_empty()
    {
        if from_front {
            items.remove(0);
        } else {
            items.pop();
        }
    }
    Ok(())
}
