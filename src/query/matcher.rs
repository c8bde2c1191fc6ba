//! Filter evaluation: `matches(spec, document)`.
//!
//! Each field operator is a plain function in a static table. Operators the server defines but
//! this engine does not support live in a separate list so callers can tell "not implemented"
//! from "unknown operator".

use bson::{Bson, Document};
use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::LazyLock;

use super::pattern::{compile_bson_regex, compile_pattern};
use crate::errors::DbError;
use crate::value::compare::{compare_bson, same_bracket, values_equal};
use crate::value::convert::{as_i64_exact, scalar_to_string, truthy};
use crate::value::path::candidates;

const BAD_VALUE: i32 = 2;

type FieldOp = fn(&FieldContext<'_>, &Bson) -> Result<bool, DbError>;

/// What an operator sees: every value the path addressed, and its sibling operators.
struct FieldContext<'a> {
    candidates: &'a [Option<&'a Bson>],
    operators: &'a Document,
}

static FIELD_OPERATORS: LazyLock<HashMap<&'static str, FieldOp>> = LazyLock::new(|| {
    let mut m: HashMap<&'static str, FieldOp> = HashMap::new();
    m.insert("$eq", op_eq);
    m.insert("$ne", op_ne);
    m.insert("$gt", op_gt);
    m.insert("$gte", op_gte);
    m.insert("$lt", op_lt);
    m.insert("$lte", op_lte);
    m.insert("$in", op_in);
    m.insert("$nin", op_nin);
    m.insert("$all", op_all);
    m.insert("$exists", op_exists);
    m.insert("$regex", op_regex);
    m.insert("$options", op_options);
    m.insert("$elemMatch", op_elem_match);
    m.insert("$size", op_size);
    m.insert("$not", op_not);
    m
});

const UNSUPPORTED_FIELD_OPERATORS: &[&str] = &[
    "$type",
    "$mod",
    "$geoWithin",
    "$geoIntersects",
    "$near",
    "$nearSphere",
    "$bitsAllSet",
    "$bitsAnySet",
    "$bitsAllClear",
    "$bitsAnyClear",
];

const UNSUPPORTED_TOP_LEVEL: &[&str] = &["$where", "$text", "$expr", "$jsonSchema", "$comment"];

/// Returns true when `doc` satisfies every clause of `spec`.
///
/// # Errors
/// `OperationFailure` for malformed clauses or unknown operators, `NotImplemented` for
/// operators this engine does not support.
pub fn matches(spec: &Document, doc: &Document) -> Result<bool, DbError> {
    for (key, cond) in spec {
        let held = match key.as_str() {
            "$and" => {
                let mut all = true;
                for sub in logical_operands(key, cond)? {
                    if !matches(sub, doc)? {
                        all = false;
                        break;
                    }
                }
                all
            }
            "$or" => any_matches(key, cond, doc)?,
            "$nor" => !any_matches(key, cond, doc)?,
            k if k.starts_with('$') => return Err(top_level_error(k)),
            path => field_matches(doc, path, cond)?,
        };
        if !held {
            return Ok(false);
        }
    }
    Ok(true)
}

fn any_matches(key: &str, cond: &Bson, doc: &Document) -> Result<bool, DbError> {
    for sub in logical_operands(key, cond)? {
        if matches(sub, doc)? {
            return Ok(true);
        }
    }
    Ok(false)
}

fn logical_operands<'a>(key: &str, cond: &'a Bson) -> Result<Vec<&'a Document>, DbError> {
    let bad = || DbError::operation_failure(BAD_VALUE, format!("{key} must be a nonempty array"));
    let Bson::Array(items) = cond else {
        return Err(bad());
    };
    if items.is_empty() {
        return Err(bad());
    }
    items
        .iter()
        .map(|item| match item {
            Bson::Document(d) => Ok(d),
            _ => Err(DbError::operation_failure(
                BAD_VALUE,
                format!("{key} argument's entries must be objects"),
            )),
        })
        .collect()
}

fn top_level_error(key: &str) -> DbError {
    if UNSUPPORTED_TOP_LEVEL.contains(&key) {
        DbError::not_implemented(format!("query operator {key}"))
    } else {
        DbError::operation_failure(BAD_VALUE, format!("unknown top level operator: {key}"))
    }
}

/// An operator document is a non-empty document whose first key starts with `$`.
pub(crate) fn is_operator_document(d: &Document) -> bool {
    d.keys().next().is_some_and(|k| k.starts_with('$'))
}

fn field_matches(doc: &Document, path: &str, cond: &Bson) -> Result<bool, DbError> {
    let mut cands = candidates(doc, path);
    if cands.is_empty() {
        cands.push(None);
    }
    match cond {
        Bson::Document(ops) if is_operator_document(ops) => operators_hold(&cands, ops),
        Bson::RegularExpression(re) => {
            let re = compile_bson_regex(re)?;
            Ok(cands.iter().flatten().any(|v| pattern_matches(&re, v)))
        }
        literal => Ok(cands.iter().any(|c| equals_literal(*c, literal))),
    }
}

fn operators_hold(cands: &[Option<&Bson>], ops: &Document) -> Result<bool, DbError> {
    let ctx = FieldContext { candidates: cands, operators: ops };
    for (op, arg) in ops {
        let held = match FIELD_OPERATORS.get(op.as_str()) {
            Some(f) => f(&ctx, arg)?,
            None => return Err(field_operator_error(op)),
        };
        if !held {
            return Ok(false);
        }
    }
    Ok(true)
}

fn field_operator_error(op: &str) -> DbError {
    if UNSUPPORTED_FIELD_OPERATORS.contains(&op) {
        DbError::not_implemented(format!("query operator {op}"))
    } else {
        DbError::operation_failure(BAD_VALUE, format!("unknown operator: {op}"))
    }
}

/// Equality against a literal: arrays also match when any element equals it, and `null`
/// matches an absent field.
fn equals_literal(cand: Option<&Bson>, literal: &Bson) -> bool {
    match cand {
        None => matches!(literal, Bson::Null),
        Some(whole @ Bson::Array(items)) => {
            values_equal(whole, literal) || items.iter().any(|i| values_equal(i, literal))
        }
        Some(v) => values_equal(v, literal),
    }
}

fn pattern_matches(re: &regex::Regex, v: &Bson) -> bool {
    match v {
        Bson::String(s) => re.is_match(s),
        Bson::Array(items) => items.iter().filter_map(scalar_to_string).any(|s| re.is_match(&s)),
        _ => false,
    }
}

fn op_eq(ctx: &FieldContext<'_>, arg: &Bson) -> Result<bool, DbError> {
    Ok(ctx.candidates.iter().any(|c| equals_literal(*c, arg)))
}

fn op_ne(ctx: &FieldContext<'_>, arg: &Bson) -> Result<bool, DbError> {
    Ok(!op_eq(ctx, arg)?)
}

fn op_order(ctx: &FieldContext<'_>, arg: &Bson, accept: fn(Ordering) -> bool) -> Result<bool, DbError> {
    let test = |v: &Bson| same_bracket(v, arg) && accept(compare_bson(v, arg));
    Ok(ctx.candidates.iter().flatten().copied().any(|v| match v {
        Bson::Array(items) if !matches!(arg, Bson::Array(_)) => items.iter().any(test),
        other => test(other),
    }))
}

fn op_gt(ctx: &FieldContext<'_>, arg: &Bson) -> Result<bool, DbError> {
    op_order(ctx, arg, |o| o == Ordering::Greater)
}

fn op_gte(ctx: &FieldContext<'_>, arg: &Bson) -> Result<bool, DbError> {
    op_order(ctx, arg, |o| o != Ordering::Less)
}

fn op_lt(ctx: &FieldContext<'_>, arg: &Bson) -> Result<bool, DbError> {
    op_order(ctx, arg, |o| o == Ordering::Less)
}

fn op_lte(ctx: &FieldContext<'_>, arg: &Bson) -> Result<bool, DbError> {
    op_order(ctx, arg, |o| o != Ordering::Greater)
}

fn in_list(cand: Option<&Bson>, list: &[Bson]) -> Result<bool, DbError> {
    for item in list {
        let hit = match item {
            Bson::RegularExpression(re) => {
                let re = compile_bson_regex(re)?;
                cand.is_some_and(|v| pattern_matches(&re, v))
            }
            literal => equals_literal(cand, literal),
        };
        if hit {
            return Ok(true);
        }
    }
    Ok(false)
}

fn array_arg<'a>(op: &str, arg: &'a Bson) -> Result<&'a [Bson], DbError> {
    match arg {
        Bson::Array(items) => Ok(items),
        _ => Err(DbError::operation_failure(BAD_VALUE, format!("{op} needs an array"))),
    }
}

fn op_in(ctx: &FieldContext<'_>, arg: &Bson) -> Result<bool, DbError> {
    let list = array_arg("$in", arg)?;
    for c in ctx.candidates {
        if in_list(*c, list)? {
            return Ok(true);
        }
    }
    Ok(false)
}

fn op_nin(ctx: &FieldContext<'_>, arg: &Bson) -> Result<bool, DbError> {
    array_arg("$nin", arg)?;
    Ok(!op_in(ctx, arg)?)
}

fn op_all(ctx: &FieldContext<'_>, arg: &Bson) -> Result<bool, DbError> {
    let wanted = array_arg("$all", arg)?;
    if wanted.is_empty() {
        return Ok(false);
    }
    for item in wanted {
        let found = match item {
            Bson::Document(d) if d.contains_key("$elemMatch") => {
                let sub = d.get("$elemMatch").unwrap_or(&Bson::Null);
                op_elem_match(ctx, sub)?
            }
            literal => ctx.candidates.iter().any(|c| equals_literal(*c, literal)),
        };
        if !found {
            return Ok(false);
        }
    }
    Ok(true)
}

fn op_exists(ctx: &FieldContext<'_>, arg: &Bson) -> Result<bool, DbError> {
    let present = ctx.candidates.iter().any(Option::is_some);
    Ok(truthy(arg) == present)
}

fn op_regex(ctx: &FieldContext<'_>, arg: &Bson) -> Result<bool, DbError> {
    let options = match ctx.operators.get("$options") {
        Some(Bson::String(s)) => s.as_str(),
        Some(_) => {
            return Err(DbError::operation_failure(BAD_VALUE, "$options has to be a string"));
        }
        None => "",
    };
    let re = match arg {
        Bson::String(p) => compile_pattern(p, options)?,
        Bson::RegularExpression(r) if options.is_empty() => compile_bson_regex(r)?,
        Bson::RegularExpression(r) => compile_pattern(&r.pattern, options)?,
        _ => return Err(DbError::operation_failure(BAD_VALUE, "$regex has to be a string")),
    };
    Ok(ctx.candidates.iter().flatten().any(|v| pattern_matches(&re, v)))
}

fn op_options(ctx: &FieldContext<'_>, _arg: &Bson) -> Result<bool, DbError> {
    if ctx.operators.contains_key("$regex") {
        Ok(true)
    } else {
        Err(DbError::operation_failure(BAD_VALUE, "$options needs a $regex"))
    }
}

fn op_elem_match(ctx: &FieldContext<'_>, arg: &Bson) -> Result<bool, DbError> {
    let Bson::Document(sub) = arg else {
        return Err(DbError::operation_failure(BAD_VALUE, "$elemMatch needs an Object"));
    };
    for cand in ctx.candidates.iter().flatten() {
        if let Bson::Array(items) = cand {
            for item in items {
                if element_matches(sub, item)? {
                    return Ok(true);
                }
            }
        }
    }
    Ok(false)
}

fn op_size(ctx: &FieldContext<'_>, arg: &Bson) -> Result<bool, DbError> {
    let Some(n) = as_i64_exact(arg) else {
        return Err(DbError::operation_failure(BAD_VALUE, "$size needs a number"));
    };
    Ok(ctx.candidates.iter().flatten().any(|v| match v {
        Bson::Array(items) => i64::try_from(items.len()).is_ok_and(|len| len == n),
        _ => false,
    }))
}

fn op_not(ctx: &FieldContext<'_>, arg: &Bson) -> Result<bool, DbError> {
    match arg {
        Bson::RegularExpression(re) => {
            let re = compile_bson_regex(re)?;
            Ok(!ctx.candidates.iter().flatten().any(|v| pattern_matches(&re, v)))
        }
        Bson::Document(sub) => {
            if sub.contains_key("$regex") {
                return Err(DbError::operation_failure(BAD_VALUE, "$not cannot have a regex"));
            }
            if !is_operator_document(sub) {
                return Err(DbError::operation_failure(BAD_VALUE, "$not needs a document of operators"));
            }
            Ok(!operators_hold(ctx.candidates, sub)?)
        }
        _ => Err(DbError::operation_failure(BAD_VALUE, "$not needs a regex or a document")),
    }
}

/// Tests one array element against an `$elemMatch`-style sub-spec.
///
/// A spec made purely of field operators applies to the element itself, so scalar arrays can be
/// matched with `{"$gte": 80}`. Otherwise the element must be a document matching the sub-filter.
pub(crate) fn element_matches(sub: &Document, elem: &Bson) -> Result<bool, DbError> {
    let logical = sub.keys().any(|k| matches!(k.as_str(), "$and" | "$or" | "$nor"));
    if is_operator_document(sub) && !logical {
        return operators_hold(&[Some(elem)], sub);
    }
    match elem {
        Bson::Document(d) => matches(sub, d),
        _ => Ok(false),
    }
}

/// Tests an array element against an arbitrary condition: a sub-spec, a pattern or a literal.
pub(crate) fn element_satisfies(cond: &Bson, elem: &Bson) -> Result<bool, DbError> {
    match cond {
        Bson::Document(sub) => element_matches(sub, elem),
        Bson::RegularExpression(re) => Ok(pattern_matches(&compile_bson_regex(re)?, elem)),
        literal => Ok(equals_literal(Some(elem), literal)),
    }
}

/// Checks a filter's structure without evaluating it against data.
///
/// # Errors
/// The same errors `matches` would raise for the malformed clause.
pub fn validate_filter(spec: &Document) -> Result<(), DbError> {
    for (key, cond) in spec {
        match key.as_str() {
            "$and" | "$or" | "$nor" => {
                for sub in logical_operands(key, cond)? {
                    validate_filter(sub)?;
                }
            }
            k if k.starts_with('$') => return Err(top_level_error(k)),
            _ => match cond {
                Bson::Document(ops) if is_operator_document(ops) => validate_operators(ops)?,
                Bson::RegularExpression(re) => {
                    compile_bson_regex(re)?;
                }
                _ => {}
            },
        }
    }
    Ok(())
}

fn validate_operators(ops: &Document) -> Result<(), DbError> {
    for (op, arg) in ops {
        if !FIELD_OPERATORS.contains_key(op.as_str()) {
            return Err(field_operator_error(op));
        }
        match (op.as_str(), arg) {
            ("$in" | "$nin" | "$all", _) => {
                array_arg(op, arg)?;
            }
            ("$elemMatch", Bson::Document(sub)) => {
                let logical = sub.keys().any(|k| matches!(k.as_str(), "$and" | "$or" | "$nor"));
                if is_operator_document(sub) && !logical {
                    validate_operators(sub)?;
                } else {
                    validate_filter(sub)?;
                }
            }
            ("$elemMatch", _) => {
                return Err(DbError::operation_failure(BAD_VALUE, "$elemMatch needs an Object"));
            }
            ("$not", Bson::Document(sub)) => {
                if sub.contains_key("$regex") {
                    return Err(DbError::operation_failure(BAD_VALUE, "$not cannot have a regex"));
                }
                if !is_operator_document(sub) {
                    return Err(DbError::operation_failure(BAD_VALUE, "$not needs a document of operators"));
                }
                validate_operators(sub)?;
            }
            ("$not", Bson::RegularExpression(_)) => {}
            ("$not", _) => {
                return Err(DbError::operation_failure(BAD_VALUE, "$not needs a regex or a document"));
            }
            ("$size", v) if as_i64_exact(v).is_none() => {
                return Err(DbError::operation_failure(BAD_VALUE, "$size needs a number"));
            }
            ("$options", _) if !ops.contains_key("$regex") => {
                return Err(DbError::operation_failure(BAD_VALUE, "$options needs a $regex"));
            }
            _ => {}
        }
    }
    Ok(())
}
