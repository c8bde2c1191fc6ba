//! Aggregation expressions.
//!
//! An expression is a literal, a `$field` reference, a `$$variable` reference, an array of
//! expressions, an object of expressions, or a single-key `{"$op": args}` document. Operators are
//! looked up in two disjoint tables: the implemented ones, and the ones that are valid server
//! operators but not built here. Anything else is an unrecognised expression.

use bson::{Bson, DateTime, Document};
use chrono::{Datelike, Timelike, Utc};
use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::LazyLock;

use crate::errors::DbError;
use crate::query::compile_pattern;
use crate::value::compare::{compare_bson, values_equal};
use crate::value::convert::{Number, as_i64_exact, scalar_to_string, truthy, type_name};
use crate::value::path::{resolve_expanding, resolve_value_expanding};

const UNRECOGNIZED_EXPRESSION: i32 = 168;
const WRONG_ARG_COUNT: i32 = 16020;

/// Evaluation outcome short of a value: the expression referenced something absent, or failed.
#[derive(Debug)]
pub enum ExprError {
    Missing,
    Db(DbError),
}

impl From<DbError> for ExprError {
    fn from(e: DbError) -> Self {
        ExprError::Db(e)
    }
}

type Eval = Result<Bson, ExprError>;
type ExprOp = fn(&Evaluator<'_>, &Bson) -> Eval;

fn fail(code: i32, message: impl Into<String>) -> ExprError {
    ExprError::Db(DbError::operation_failure(code, message))
}

static IMPLEMENTED: LazyLock<HashMap<&'static str, ExprOp>> = LazyLock::new(|| {
    let table: &[(&'static str, ExprOp)] = &[
        // arithmetic
        ("$abs", op_abs),
        ("$add", op_add),
        ("$ceil", op_ceil),
        ("$divide", op_divide),
        ("$exp", op_exp),
        ("$floor", op_floor),
        ("$ln", op_ln),
        ("$log", op_log),
        ("$log10", op_log10),
        ("$mod", op_mod),
        ("$multiply", op_multiply),
        ("$pow", op_pow),
        ("$sqrt", op_sqrt),
        ("$subtract", op_subtract),
        ("$trunc", op_trunc),
        // comparison
        ("$cmp", op_cmp),
        ("$eq", op_eq),
        ("$ne", op_ne),
        ("$gt", op_gt),
        ("$gte", op_gte),
        ("$lt", op_lt),
        ("$lte", op_lte),
        // conditional
        ("$cond", op_cond),
        ("$ifNull", op_if_null),
        ("$switch", op_switch),
        // date
        ("$dayOfYear", op_day_of_year),
        ("$dayOfMonth", op_day_of_month),
        ("$dayOfWeek", op_day_of_week),
        ("$year", op_year),
        ("$month", op_month),
        ("$week", op_week),
        ("$hour", op_hour),
        ("$minute", op_minute),
        ("$second", op_second),
        ("$millisecond", op_millisecond),
        ("$isoDayOfWeek", op_iso_day_of_week),
        ("$isoWeek", op_iso_week),
        ("$isoWeekYear", op_iso_week_year),
        ("$dateToString", op_date_to_string),
        // array
        ("$size", op_size),
        ("$filter", op_filter),
        ("$slice", op_slice),
        ("$arrayElemAt", op_array_elem_at),
        ("$concatArrays", op_concat_arrays),
        ("$isArray", op_is_array),
        ("$reverseArray", op_reverse_array),
        ("$in", op_in),
        // string
        ("$toLower", op_to_lower),
        ("$toUpper", op_to_upper),
        ("$concat", op_concat),
        ("$split", op_split),
        ("$substr", op_substr),
        ("$strcasecmp", op_strcasecmp),
        ("$strLenCP", op_str_len_cp),
        ("$strLenBytes", op_str_len_bytes),
        ("$regexMatch", op_regex_match),
        // set
        ("$setUnion", op_set_union),
        ("$setIntersection", op_set_intersection),
        ("$setDifference", op_set_difference),
        ("$setEquals", op_set_equals),
        ("$setIsSubset", op_set_is_subset),
        ("$anyElementTrue", op_any_element_true),
        ("$allElementsTrue", op_all_elements_true),
        // boolean
        ("$and", op_and),
        ("$or", op_or),
        ("$not", op_not),
        // conversion
        ("$toString", op_to_string),
        ("$toInt", op_to_int),
        ("$arrayToObject", op_array_to_object),
        // accumulators usable inside expressions
        ("$sum", op_sum),
        ("$avg", op_avg),
        ("$min", op_min),
        ("$max", op_max),
        ("$literal", op_literal),
    ];
    table.iter().copied().collect()
});

const UNIMPLEMENTED: &[&str] = &[
    "$let",
    "$map",
    "$reduce",
    "$zip",
    "$range",
    "$indexOfArray",
    "$mergeObjects",
    "$meta",
    "$toDecimal",
    "$toDouble",
    "$toLong",
    "$toBool",
    "$toDate",
    "$toObjectId",
    "$convert",
    "$type",
    "$objectToArray",
    "$trim",
    "$ltrim",
    "$rtrim",
    "$indexOfBytes",
    "$indexOfCP",
    "$substrBytes",
    "$substrCP",
    "$dateFromString",
    "$dateFromParts",
    "$dateToParts",
    "$stdDevPop",
    "$stdDevSamp",
];

/// True for operators this evaluator knows are valid but does not implement.
#[must_use]
pub fn is_unimplemented_operator(name: &str) -> bool {
    UNIMPLEMENTED.contains(&name)
}

/// Evaluates expressions against one document.
#[derive(Debug, Clone)]
pub struct Evaluator<'a> {
    root: &'a Document,
    vars: HashMap<String, Bson>,
}

impl<'a> Evaluator<'a> {
    #[must_use]
    pub fn new(root: &'a Document) -> Self {
        Self { root, vars: HashMap::new() }
    }

    fn with_var(&self, name: &str, value: Bson) -> Evaluator<'a> {
        let mut vars = self.vars.clone();
        vars.insert(name.to_string(), value);
        Evaluator { root: self.root, vars }
    }

    /// Evaluates `expr`; `Ok(None)` means it referenced a missing field.
    ///
    /// # Errors
    /// `OperationFailure` for malformed or mistyped expressions, `NotImplemented` for known
    /// operators that are not supported.
    pub fn evaluate(&self, expr: &Bson) -> Result<Option<Bson>, DbError> {
        match self.eval(expr) {
            Ok(v) => Ok(Some(v)),
            Err(ExprError::Missing) => Ok(None),
            Err(ExprError::Db(e)) => Err(e),
        }
    }

    /// Like [`Evaluator::evaluate`] but folds null into `None` as well.
    fn nullish(&self, expr: &Bson) -> Result<Option<Bson>, DbError> {
        Ok(self.evaluate(expr)?.filter(|v| !matches!(v, Bson::Null)))
    }

    pub(crate) fn eval(&self, expr: &Bson) -> Eval {
        match expr {
            Bson::String(s) if s.starts_with("$$") => self.variable(&s[2..]),
            Bson::String(s) if s.starts_with('$') => {
                resolve_expanding(self.root, &s[1..]).ok_or(ExprError::Missing)
            }
            Bson::Document(d) => self.eval_document(d),
            Bson::Array(items) => items
                .iter()
                .map(|item| match self.eval(item) {
                    Err(ExprError::Missing) => Ok(Bson::Null),
                    other => other,
                })
                .collect::<Result<Vec<_>, _>>()
                .map(Bson::Array),
            other => Ok(other.clone()),
        }
    }

    fn variable(&self, spec: &str) -> Eval {
        let (name, rest) = match spec.split_once('.') {
            Some((n, r)) => (n, Some(r)),
            None => (spec, None),
        };
        match name {
            "ROOT" | "CURRENT" => match rest {
                Some(path) => resolve_expanding(self.root, path).ok_or(ExprError::Missing),
                None => Ok(Bson::Document(self.root.clone())),
            },
            "REMOVE" => Err(ExprError::Missing),
            other => {
                let base = self
                    .vars
                    .get(other)
                    .ok_or_else(|| fail(17276, format!("Use of undefined variable: {other}")))?;
                match rest {
                    Some(path) => resolve_value_expanding(base, path).ok_or(ExprError::Missing),
                    None => Ok(base.clone()),
                }
            }
        }
    }

    fn eval_document(&self, d: &Document) -> Eval {
        let has_operator = d.keys().any(|k| k.starts_with('$'));
        if has_operator && d.len() > 1 {
            return Err(fail(
                15983,
                format!(
                    "an expression specification must contain exactly one field, the name of the expression. Found {} fields",
                    d.len()
                ),
            ));
        }
        if let Some((name, arg)) = d.iter().next()
            && name.starts_with('$')
        {
            if let Some(op) = IMPLEMENTED.get(name.as_str()) {
                return op(self, arg);
            }
            if is_unimplemented_operator(name) {
                return Err(DbError::not_implemented(format!("expression operator {name}")).into());
            }
            return Err(fail(UNRECOGNIZED_EXPRESSION, format!("Unrecognized expression '{name}'")));
        }
        let mut out = Document::new();
        for (k, v) in d {
            match self.eval(v) {
                Ok(x) => {
                    out.insert(k.clone(), x);
                }
                Err(ExprError::Missing) => {}
                Err(e) => return Err(e),
            }
        }
        Ok(Bson::Document(out))
    }

    fn unary(&self, op: &str, arg: &Bson) -> Result<Option<Bson>, ExprError> {
        let args = exact_args(op, arg, 1)?;
        Ok(self.nullish(args[0])?)
    }

    fn binary(&self, op: &str, arg: &Bson) -> Result<Option<(Bson, Bson)>, ExprError> {
        let args = exact_args(op, arg, 2)?;
        let a = self.nullish(args[0])?;
        let b = self.nullish(args[1])?;
        Ok(a.zip(b))
    }
}

fn list(arg: &Bson) -> Vec<&Bson> {
    match arg {
        Bson::Array(items) => items.iter().collect(),
        other => vec![other],
    }
}

fn exact_args<'b>(op: &str, arg: &'b Bson, n: usize) -> Result<Vec<&'b Bson>, ExprError> {
    let args = list(arg);
    if args.len() != n {
        return Err(fail(
            WRONG_ARG_COUNT,
            format!("Expression {op} takes exactly {n} arguments. {} were passed in.", args.len()),
        ));
    }
    Ok(args)
}

fn required<'b>(d: &'b Document, key: &str, op: &str, code: i32) -> Result<&'b Bson, ExprError> {
    d.get(key).ok_or_else(|| fail(code, format!("Missing '{key}' parameter to {op}")))
}

fn numeric(op: &str, v: &Bson, code: i32) -> Result<Number, ExprError> {
    Number::from_bson(v).ok_or_else(|| fail(code, format!("{op} only supports numeric types, not {}", type_name(v))))
}

fn rounded_i64(n: Number) -> i64 {
    match n {
        Number::Int(i) => i64::from(i),
        Number::Long(i) => i,
        Number::Double(f) => f.round() as i64,
    }
}

// --- arithmetic ---

fn op_abs(ev: &Evaluator<'_>, arg: &Bson) -> Eval {
    let Some(v) = ev.unary("$abs", arg)? else {
        return Ok(Bson::Null);
    };
    Ok(match numeric("$abs", &v, 28765)? {
        Number::Int(i) => i.checked_abs().map_or(Bson::Int64(i64::from(i).abs()), Bson::Int32),
        Number::Long(i) => i.checked_abs().map_or(Bson::Double((i as f64).abs()), Bson::Int64),
        Number::Double(f) => Bson::Double(f.abs()),
    })
}

fn op_add(ev: &Evaluator<'_>, arg: &Bson) -> Eval {
    let mut total = Number::Int(0);
    let mut date: Option<i64> = None;
    for e in list(arg) {
        let Some(v) = ev.nullish(e)? else {
            return Ok(Bson::Null);
        };
        match v {
            Bson::DateTime(d) => {
                if date.is_some() {
                    return Err(fail(16612, "only one date allowed in an $add expression"));
                }
                date = Some(d.timestamp_millis());
            }
            other => total = total.add(numeric("$add", &other, 16554)?),
        }
    }
    Ok(match date {
        Some(ms) => Bson::DateTime(DateTime::from_millis(ms.saturating_add(rounded_i64(total)))),
        None => total.to_bson(),
    })
}

fn op_subtract(ev: &Evaluator<'_>, arg: &Bson) -> Eval {
    let Some(pair) = ev.binary("$subtract", arg)? else {
        return Ok(Bson::Null);
    };
    match pair {
        (Bson::DateTime(a), Bson::DateTime(b)) => {
            Ok(Bson::Int64(a.timestamp_millis().saturating_sub(b.timestamp_millis())))
        }
        (Bson::DateTime(a), n) => {
            let delta = rounded_i64(numeric("$subtract", &n, 16556)?);
            Ok(Bson::DateTime(DateTime::from_millis(a.timestamp_millis().saturating_sub(delta))))
        }
        (a, b) => Ok(numeric("$subtract", &a, 16556)?.sub(numeric("$subtract", &b, 16556)?).to_bson()),
    }
}

fn op_multiply(ev: &Evaluator<'_>, arg: &Bson) -> Eval {
    let mut product = Number::Int(1);
    for e in list(arg) {
        let Some(v) = ev.nullish(e)? else {
            return Ok(Bson::Null);
        };
        product = product.mul(numeric("$multiply", &v, 16555)?);
    }
    Ok(product.to_bson())
}

fn op_divide(ev: &Evaluator<'_>, arg: &Bson) -> Eval {
    let Some((a, b)) = ev.binary("$divide", arg)? else {
        return Ok(Bson::Null);
    };
    let a = numeric("$divide", &a, 16609)?;
    let b = numeric("$divide", &b, 16609)?;
    if b.is_zero() {
        return Err(fail(16608, "can't $divide by zero"));
    }
    Ok(Bson::Double(a.as_f64() / b.as_f64()))
}

fn op_mod(ev: &Evaluator<'_>, arg: &Bson) -> Eval {
    let Some((a, b)) = ev.binary("$mod", arg)? else {
        return Ok(Bson::Null);
    };
    let a = numeric("$mod", &a, 16611)?;
    let b = numeric("$mod", &b, 16611)?;
    if b.is_zero() {
        return Err(fail(16610, "can't $mod by zero"));
    }
    a.rem(b).map(Number::to_bson).ok_or_else(|| fail(16610, "can't $mod by zero"))
}

fn op_pow(ev: &Evaluator<'_>, arg: &Bson) -> Eval {
    let Some((base, exp)) = ev.binary("$pow", arg)? else {
        return Ok(Bson::Null);
    };
    let base = numeric("$pow", &base, 28762)?;
    let exp = numeric("$pow", &exp, 28763)?;
    if base.is_zero() && exp.as_f64() < 0.0 {
        return Err(fail(28764, "$pow cannot take a base of 0 and a negative exponent"));
    }
    let both_int = matches!(base, Number::Int(_)) && matches!(exp, Number::Int(_));
    let integral = match (base, exp) {
        (Number::Int(_) | Number::Long(_), Number::Int(_) | Number::Long(_)) => {
            let e = u32::try_from(rounded_i64(exp)).ok();
            e.and_then(|e| rounded_i64(base).checked_pow(e))
        }
        _ => None,
    };
    Ok(match integral {
        Some(r) if both_int => i32::try_from(r).map_or(Bson::Int64(r), Bson::Int32),
        Some(r) => Bson::Int64(r),
        None => Bson::Double(base.as_f64().powf(exp.as_f64())),
    })
}

fn op_log(ev: &Evaluator<'_>, arg: &Bson) -> Eval {
    let Some((n, base)) = ev.binary("$log", arg)? else {
        return Ok(Bson::Null);
    };
    let n = numeric("$log", &n, 28756)?.as_f64();
    let base = numeric("$log", &base, 28757)?.as_f64();
    if n <= 0.0 {
        return Err(fail(28758, "$log's argument must be a positive number"));
    }
    if base <= 0.0 || base == 1.0 {
        return Err(fail(28759, "$log's base must be a positive number not equal to 1"));
    }
    Ok(Bson::Double(n.ln() / base.ln()))
}

fn rounding(ev: &Evaluator<'_>, op: &str, arg: &Bson, f: fn(f64) -> f64) -> Eval {
    let Some(v) = ev.unary(op, arg)? else {
        return Ok(Bson::Null);
    };
    Ok(match numeric(op, &v, 28765)? {
        Number::Double(x) => Bson::Double(f(x)),
        integral => integral.to_bson(),
    })
}

fn op_ceil(ev: &Evaluator<'_>, arg: &Bson) -> Eval {
    rounding(ev, "$ceil", arg, f64::ceil)
}

fn op_floor(ev: &Evaluator<'_>, arg: &Bson) -> Eval {
    rounding(ev, "$floor", arg, f64::floor)
}

fn op_trunc(ev: &Evaluator<'_>, arg: &Bson) -> Eval {
    rounding(ev, "$trunc", arg, f64::trunc)
}

fn float_unary(ev: &Evaluator<'_>, op: &str, arg: &Bson, accept: fn(f64) -> bool, code: i32, f: fn(f64) -> f64) -> Eval {
    let Some(v) = ev.unary(op, arg)? else {
        return Ok(Bson::Null);
    };
    let x = numeric(op, &v, 28765)?.as_f64();
    if !accept(x) {
        return Err(fail(code, format!("{op}'s argument is out of its domain: {x}")));
    }
    Ok(Bson::Double(f(x)))
}

fn op_exp(ev: &Evaluator<'_>, arg: &Bson) -> Eval {
    float_unary(ev, "$exp", arg, |_| true, 28765, f64::exp)
}

fn op_ln(ev: &Evaluator<'_>, arg: &Bson) -> Eval {
    float_unary(ev, "$ln", arg, |x| x > 0.0, 28766, f64::ln)
}

fn op_log10(ev: &Evaluator<'_>, arg: &Bson) -> Eval {
    float_unary(ev, "$log10", arg, |x| x > 0.0, 28761, f64::log10)
}

fn op_sqrt(ev: &Evaluator<'_>, arg: &Bson) -> Eval {
    float_unary(ev, "$sqrt", arg, |x| x >= 0.0, 28714, f64::sqrt)
}

// --- comparison ---

fn compare_operands(ev: &Evaluator<'_>, op: &str, arg: &Bson) -> Result<(Option<Bson>, Option<Bson>), ExprError> {
    let args = exact_args(op, arg, 2)?;
    Ok((ev.evaluate(args[0])?, ev.evaluate(args[1])?))
}

/// Total order with "missing" below every value.
fn cmp_opt(a: Option<&Bson>, b: Option<&Bson>) -> Ordering {
    match (a, b) {
        (None, None) => Ordering::Equal,
        (None, Some(_)) => Ordering::Less,
        (Some(_), None) => Ordering::Greater,
        (Some(x), Some(y)) => compare_bson(x, y),
    }
}

fn eq_opt(a: Option<&Bson>, b: Option<&Bson>) -> bool {
    match (a, b) {
        (Some(x), Some(y)) => values_equal(x, y),
        (None, None) => true,
        _ => false,
    }
}

fn op_cmp(ev: &Evaluator<'_>, arg: &Bson) -> Eval {
    let (a, b) = compare_operands(ev, "$cmp", arg)?;
    Ok(Bson::Int32(match cmp_opt(a.as_ref(), b.as_ref()) {
        Ordering::Less => -1,
        Ordering::Equal => 0,
        Ordering::Greater => 1,
    }))
}

fn op_eq(ev: &Evaluator<'_>, arg: &Bson) -> Eval {
    let (a, b) = compare_operands(ev, "$eq", arg)?;
    Ok(Bson::Boolean(eq_opt(a.as_ref(), b.as_ref())))
}

fn op_ne(ev: &Evaluator<'_>, arg: &Bson) -> Eval {
    let (a, b) = compare_operands(ev, "$ne", arg)?;
    Ok(Bson::Boolean(!eq_opt(a.as_ref(), b.as_ref())))
}

fn ordered(ev: &Evaluator<'_>, op: &str, arg: &Bson, accept: fn(Ordering) -> bool) -> Eval {
    let (a, b) = compare_operands(ev, op, arg)?;
    Ok(Bson::Boolean(accept(cmp_opt(a.as_ref(), b.as_ref()))))
}

fn op_gt(ev: &Evaluator<'_>, arg: &Bson) -> Eval {
    ordered(ev, "$gt", arg, Ordering::is_gt)
}

fn op_gte(ev: &Evaluator<'_>, arg: &Bson) -> Eval {
    ordered(ev, "$gte", arg, Ordering::is_ge)
}

fn op_lt(ev: &Evaluator<'_>, arg: &Bson) -> Eval {
    ordered(ev, "$lt", arg, Ordering::is_lt)
}

fn op_lte(ev: &Evaluator<'_>, arg: &Bson) -> Eval {
    ordered(ev, "$lte", arg, Ordering::is_le)
}

// --- conditional ---

fn op_cond(ev: &Evaluator<'_>, arg: &Bson) -> Eval {
    let (cond, then, otherwise) = match arg {
        Bson::Array(items) if items.len() == 3 => (&items[0], &items[1], &items[2]),
        Bson::Document(d) => {
            if let Some(k) = d.keys().find(|k| !matches!(k.as_str(), "if" | "then" | "else")) {
                return Err(fail(17083, format!("Unrecognized parameter to $cond: {k}")));
            }
            (
                required(d, "if", "$cond", 17080)?,
                required(d, "then", "$cond", 17081)?,
                required(d, "else", "$cond", 17082)?,
            )
        }
        other => {
            return Err(fail(
                WRONG_ARG_COUNT,
                format!("Expression $cond takes exactly 3 arguments. {} were passed in.", list(other).len()),
            ));
        }
    };
    // Any failure in the condition arm reads as false.
    let pick = ev.eval(cond).map(|v| truthy(&v)).unwrap_or(false);
    ev.eval(if pick { then } else { otherwise })
}

fn op_if_null(ev: &Evaluator<'_>, arg: &Bson) -> Eval {
    let args = list(arg);
    let Some((fallback, candidates)) = args.split_last().filter(|_| args.len() >= 2) else {
        return Err(fail(1257300, "$ifNull needs at least two arguments"));
    };
    for candidate in candidates {
        if let Some(v) = ev.nullish(candidate)? {
            return Ok(v);
        }
    }
    ev.eval(fallback)
}

fn op_switch(ev: &Evaluator<'_>, arg: &Bson) -> Eval {
    let Bson::Document(spec) = arg else {
        return Err(fail(40060, format!("$switch requires an object as an argument, found: {}", type_name(arg))));
    };
    let branches = match spec.get("branches") {
        Some(Bson::Array(items)) => items.as_slice(),
        None => &[],
        Some(other) => {
            return Err(fail(40061, format!("$switch expected an array for 'branches', found: {}", type_name(other))));
        }
    };
    if branches.is_empty() {
        return Err(fail(40068, "$switch requires at least one branch."));
    }
    let mut parsed = Vec::with_capacity(branches.len());
    for branch in branches {
        let Bson::Document(b) = branch else {
            return Err(fail(40062, format!("$switch expected each branch to be an object, found: {}", type_name(branch))));
        };
        let case = b.get("case").ok_or_else(|| fail(40064, "$switch requires each branch have a 'case' expression"))?;
        let then = b.get("then").ok_or_else(|| fail(40065, "$switch requires each branch have a 'then' expression."))?;
        parsed.push((case, then));
    }
    for (case, then) in parsed {
        let hit = match ev.eval(case) {
            Ok(v) => truthy(&v),
            Err(ExprError::Missing) => false,
            Err(e) => return Err(e),
        };
        if hit {
            return ev.eval(then);
        }
    }
    match spec.get("default") {
        Some(default) => ev.eval(default),
        None => Err(fail(
            40066,
            "$switch could not find a matching branch for an input, and no default was specified.",
        )),
    }
}

// --- date ---

fn date_operand(ev: &Evaluator<'_>, op: &str, arg: &Bson) -> Result<Option<chrono::DateTime<Utc>>, ExprError> {
    let inner = match arg {
        Bson::Document(d) => match d.get("date") {
            Some(date) => {
                if d.contains_key("timezone") {
                    return Err(DbError::not_implemented(format!("timezone argument to {op}")).into());
                }
                date
            }
            None => arg,
        },
        Bson::Array(items) if items.len() == 1 => &items[0],
        other => other,
    };
    match ev.nullish(inner)? {
        None => Ok(None),
        Some(Bson::DateTime(dt)) => Ok(Some(dt.to_chrono())),
        Some(other) => Err(fail(16006, format!("can't convert from BSON type {} to Date", type_name(&other)))),
    }
}

fn date_part(ev: &Evaluator<'_>, op: &str, arg: &Bson, part: fn(&chrono::DateTime<Utc>) -> i32) -> Eval {
    Ok(date_operand(ev, op, arg)?.map_or(Bson::Null, |dt| Bson::Int32(part(&dt))))
}

/// Week of the year with weeks starting on Sunday; days before the first Sunday are week 0.
fn sunday_week(dt: &chrono::DateTime<Utc>) -> i32 {
    let yday = dt.ordinal0() as i32;
    let wday = dt.weekday().num_days_from_sunday() as i32;
    (yday + 7 - wday) / 7
}

fn op_day_of_year(ev: &Evaluator<'_>, arg: &Bson) -> Eval {
    date_part(ev, "$dayOfYear", arg, |d| d.ordinal() as i32)
}

fn op_day_of_month(ev: &Evaluator<'_>, arg: &Bson) -> Eval {
    date_part(ev, "$dayOfMonth", arg, |d| d.day() as i32)
}

fn op_day_of_week(ev: &Evaluator<'_>, arg: &Bson) -> Eval {
    date_part(ev, "$dayOfWeek", arg, |d| d.weekday().number_from_sunday() as i32)
}

fn op_year(ev: &Evaluator<'_>, arg: &Bson) -> Eval {
    date_part(ev, "$year", arg, |d| d.year())
}

fn op_month(ev: &Evaluator<'_>, arg: &Bson) -> Eval {
    date_part(ev, "$month", arg, |d| d.month() as i32)
}

fn op_week(ev: &Evaluator<'_>, arg: &Bson) -> Eval {
    date_part(ev, "$week", arg, sunday_week)
}

fn op_hour(ev: &Evaluator<'_>, arg: &Bson) -> Eval {
    date_part(ev, "$hour", arg, |d| d.hour() as i32)
}

fn op_minute(ev: &Evaluator<'_>, arg: &Bson) -> Eval {
    date_part(ev, "$minute", arg, |d| d.minute() as i32)
}

fn op_second(ev: &Evaluator<'_>, arg: &Bson) -> Eval {
    date_part(ev, "$second", arg, |d| d.second() as i32)
}

fn op_millisecond(ev: &Evaluator<'_>, arg: &Bson) -> Eval {
    date_part(ev, "$millisecond", arg, |d| d.timestamp_subsec_millis() as i32)
}

fn op_iso_day_of_week(ev: &Evaluator<'_>, arg: &Bson) -> Eval {
    date_part(ev, "$isoDayOfWeek", arg, |d| d.weekday().number_from_monday() as i32)
}

fn op_iso_week(ev: &Evaluator<'_>, arg: &Bson) -> Eval {
    date_part(ev, "$isoWeek", arg, |d| d.iso_week().week() as i32)
}

fn op_iso_week_year(ev: &Evaluator<'_>, arg: &Bson) -> Eval {
    date_part(ev, "$isoWeekYear", arg, |d| d.iso_week().year())
}

const DEFAULT_DATE_FORMAT: &str = "%Y-%m-%dT%H:%M:%S.%LZ";

fn format_date(dt: &chrono::DateTime<Utc>, format: &str) -> Result<String, ExprError> {
    let mut out = String::with_capacity(format.len() + 8);
    let mut chars = format.chars();
    while let Some(c) = chars.next() {
        if c != '%' {
            out.push(c);
            continue;
        }
        let piece = match chars.next() {
            Some('Y') => format!("{:04}", dt.year()),
            Some('m') => format!("{:02}", dt.month()),
            Some('d') => format!("{:02}", dt.day()),
            Some('H') => format!("{:02}", dt.hour()),
            Some('M') => format!("{:02}", dt.minute()),
            Some('S') => format!("{:02}", dt.second()),
            Some('L') => format!("{:03}", dt.timestamp_subsec_millis()),
            Some('j') => format!("{:03}", dt.ordinal()),
            Some('w') => dt.weekday().number_from_sunday().to_string(),
            Some('u') => dt.weekday().number_from_monday().to_string(),
            Some('U') => format!("{:02}", sunday_week(dt)),
            Some('V') => format!("{:02}", dt.iso_week().week()),
            Some('G') => format!("{:04}", dt.iso_week().year()),
            Some('z') => "+0000".to_string(),
            Some('Z') => "0".to_string(),
            Some('%') => "%".to_string(),
            Some(other) => return Err(fail(18536, format!("Invalid format character '%{other}' in format string"))),
            None => return Err(fail(18535, "Unmatched '%' at end of format string")),
        };
        out.push_str(&piece);
    }
    Ok(out)
}

fn op_date_to_string(ev: &Evaluator<'_>, arg: &Bson) -> Eval {
    let Bson::Document(spec) = arg else {
        return Err(fail(18629, "$dateToString only supports an object as its argument"));
    };
    if let Some(k) = spec.keys().find(|k| !matches!(k.as_str(), "format" | "date" | "timezone" | "onNull")) {
        return Err(fail(18534, format!("Unrecognized parameter to $dateToString: {k}")));
    }
    if spec.contains_key("timezone") {
        return Err(DbError::not_implemented("timezone argument to $dateToString").into());
    }
    let date = required(spec, "date", "$dateToString", 18628)?;
    let format = match spec.get("format") {
        None => DEFAULT_DATE_FORMAT.to_string(),
        Some(f) => match ev.eval(f)? {
            Bson::String(s) => s,
            other => return Err(fail(18533, format!("$dateToString requires that 'format' be a string, found: {}", type_name(&other)))),
        },
    };
    match date_operand(ev, "$dateToString", date)? {
        Some(dt) => Ok(Bson::String(format_date(&dt, &format)?)),
        None => match spec.get("onNull") {
            Some(on_null) => ev.eval(on_null),
            None => Ok(Bson::Null),
        },
    }
}

// --- array ---

fn op_size(ev: &Evaluator<'_>, arg: &Bson) -> Eval {
    let args = exact_args("$size", arg, 1)?;
    match ev.evaluate(args[0])? {
        Some(Bson::Array(items)) => Ok(Bson::Int32(i32::try_from(items.len()).unwrap_or(i32::MAX))),
        other => Err(fail(
            17124,
            format!(
                "The argument to $size must be an array. Type: {}",
                other.as_ref().map_or("missing", type_name)
            ),
        )),
    }
}

fn op_filter(ev: &Evaluator<'_>, arg: &Bson) -> Eval {
    let Bson::Document(spec) = arg else {
        return Err(fail(28646, "$filter only supports an object as its argument"));
    };
    if let Some(k) = spec.keys().find(|k| !matches!(k.as_str(), "input" | "cond" | "as")) {
        return Err(fail(28647, format!("Unrecognized parameter to $filter: {k}")));
    }
    let input = required(spec, "input", "$filter", 28648)?;
    let cond = required(spec, "cond", "$filter", 28648)?;
    let name = match spec.get("as") {
        None => "this",
        Some(Bson::String(s)) => s.as_str(),
        Some(other) => return Err(fail(28649, format!("$filter 'as' must be a string, found {}", type_name(other)))),
    };
    let items = match ev.nullish(input)? {
        None => return Ok(Bson::Null),
        Some(Bson::Array(items)) => items,
        Some(other) => {
            return Err(fail(28651, format!("input to $filter must be an array not {}", type_name(&other))));
        }
    };
    let mut kept = Vec::new();
    for item in items {
        let keep = match ev.with_var(name, item.clone()).eval(cond) {
            Ok(v) => truthy(&v),
            Err(ExprError::Missing) => false,
            Err(e) => return Err(e),
        };
        if keep {
            kept.push(item);
        }
    }
    Ok(Bson::Array(kept))
}

fn op_slice(ev: &Evaluator<'_>, arg: &Bson) -> Eval {
    let Bson::Array(args) = arg else {
        return Err(fail(28667, "$slice only supports a list as its argument"));
    };
    if !(2..=3).contains(&args.len()) {
        return Err(fail(
            28667,
            format!("Expression $slice takes at least 2 arguments, and at most 3, but {} were passed in.", args.len()),
        ));
    }
    let items = match ev.nullish(&args[0])? {
        None => return Ok(Bson::Null),
        Some(Bson::Array(items)) => items,
        Some(other) => {
            return Err(fail(28724, format!("First argument to $slice must be an array, but is of type: {}", type_name(&other))));
        }
    };
    let mut ints = Vec::with_capacity(2);
    for (label, e) in ["Second", "Third"].iter().zip(&args[1..]) {
        let v = ev.evaluate(e)?.unwrap_or(Bson::Null);
        let n = as_i64_exact(&v)
            .ok_or_else(|| fail(28725, format!("{label} argument to $slice must be numeric, but is of type: {}", type_name(&v))))?;
        ints.push(n);
    }
    let len = i64::try_from(items.len()).unwrap_or(i64::MAX);
    let (start, count) = match ints.as_slice() {
        [n] if *n >= 0 => (0, *n),
        [n] => (len.saturating_add(*n).max(0), n.saturating_neg()),
        [_, n] if *n <= 0 => {
            return Err(fail(28729, format!("Third argument to $slice must be positive: {n}")));
        }
        [p, n] if *p >= 0 => (*p.min(&len), *n),
        [p, n] => (len.saturating_add(*p).max(0), *n),
        _ => (0, 0),
    };
    let start = usize::try_from(start).unwrap_or(items.len());
    let count = usize::try_from(count).unwrap_or(usize::MAX);
    Ok(Bson::Array(items.into_iter().skip(start).take(count).collect()))
}

fn op_array_elem_at(ev: &Evaluator<'_>, arg: &Bson) -> Eval {
    let Some((array, index)) = ev.binary("$arrayElemAt", arg)? else {
        return Ok(Bson::Null);
    };
    let Bson::Array(items) = array else {
        return Err(fail(28689, format!("$arrayElemAt's first argument must be an array, but is {}", type_name(&array))));
    };
    let idx = as_i64_exact(&index)
        .ok_or_else(|| fail(28690, format!("$arrayElemAt's second argument must be a numeric value, but is {}", type_name(&index))))?;
    let len = i64::try_from(items.len()).unwrap_or(i64::MAX);
    let at = if idx < 0 { len + idx } else { idx };
    usize::try_from(at)
        .ok()
        .and_then(|i| items.into_iter().nth(i))
        .ok_or(ExprError::Missing)
}

fn op_concat_arrays(ev: &Evaluator<'_>, arg: &Bson) -> Eval {
    let mut out = Vec::new();
    for e in list(arg) {
        match ev.nullish(e)? {
            None => return Ok(Bson::Null),
            Some(Bson::Array(items)) => out.extend(items),
            Some(other) => {
                return Err(fail(28664, format!("$concatArrays only supports arrays, not {}", type_name(&other))));
            }
        }
    }
    Ok(Bson::Array(out))
}

fn op_is_array(ev: &Evaluator<'_>, arg: &Bson) -> Eval {
    let args = exact_args("$isArray", arg, 1)?;
    Ok(Bson::Boolean(matches!(ev.evaluate(args[0])?, Some(Bson::Array(_)))))
}

fn op_reverse_array(ev: &Evaluator<'_>, arg: &Bson) -> Eval {
    match ev.unary("$reverseArray", arg)? {
        None => Ok(Bson::Null),
        Some(Bson::Array(mut items)) => {
            items.reverse();
            Ok(Bson::Array(items))
        }
        Some(other) => Err(fail(34435, format!("The argument to $reverseArray must be an array, but was of type: {}", type_name(&other)))),
    }
}

fn op_in(ev: &Evaluator<'_>, arg: &Bson) -> Eval {
    let args = exact_args("$in", arg, 2)?;
    let needle = ev.evaluate(args[0])?;
    match ev.evaluate(args[1])? {
        Some(Bson::Array(items)) => Ok(Bson::Boolean(items.iter().any(|item| eq_opt(needle.as_ref(), Some(item))))),
        other => Err(fail(
            40081,
            format!("$in requires an array as a second argument, found: {}", other.as_ref().map_or("missing", type_name)),
        )),
    }
}

// --- string ---

fn coerce_string(op: &str, v: Option<Bson>) -> Result<String, ExprError> {
    match v {
        None => Ok(String::new()),
        Some(Bson::DateTime(dt)) => Ok(iso_millis(dt)),
        Some(other) => scalar_to_string(&other)
            .ok_or_else(|| fail(16007, format!("can't convert from BSON type {} to String in {op}", type_name(&other)))),
    }
}

fn op_to_lower(ev: &Evaluator<'_>, arg: &Bson) -> Eval {
    Ok(Bson::String(coerce_string("$toLower", ev.unary("$toLower", arg)?)?.to_lowercase()))
}

fn op_to_upper(ev: &Evaluator<'_>, arg: &Bson) -> Eval {
    Ok(Bson::String(coerce_string("$toUpper", ev.unary("$toUpper", arg)?)?.to_uppercase()))
}

fn op_concat(ev: &Evaluator<'_>, arg: &Bson) -> Eval {
    let mut out = String::new();
    for e in list(arg) {
        match ev.nullish(e)? {
            None => return Ok(Bson::Null),
            Some(Bson::String(s)) => out.push_str(&s),
            Some(other) => {
                return Err(fail(16702, format!("$concat only supports strings, not {}", type_name(&other))));
            }
        }
    }
    Ok(Bson::String(out))
}

fn op_split(ev: &Evaluator<'_>, arg: &Bson) -> Eval {
    let Some((s, delim)) = ev.binary("$split", arg)? else {
        return Ok(Bson::Null);
    };
    let Bson::String(s) = s else {
        return Err(fail(40085, format!("$split requires an expression that evaluates to a string as a first argument, found: {}", type_name(&s))));
    };
    let Bson::String(delim) = delim else {
        return Err(fail(40086, format!("$split requires an expression that evaluates to a string as a second argument, found: {}", type_name(&delim))));
    };
    if delim.is_empty() {
        return Err(fail(40087, "$split requires a non-empty separator"));
    }
    Ok(Bson::Array(s.split(delim.as_str()).map(|part| Bson::String(part.to_string())).collect()))
}

fn op_substr(ev: &Evaluator<'_>, arg: &Bson) -> Eval {
    let args = exact_args("$substr", arg, 3)?;
    let s = coerce_string("$substr", ev.nullish(args[0])?)?;
    let start = ev.evaluate(args[1])?.as_ref().and_then(as_i64_exact);
    let len = ev.evaluate(args[2])?.as_ref().and_then(as_i64_exact);
    let (Some(start), Some(len)) = (start, len) else {
        return Err(fail(16034, "$substr: starting index and length must be numeric"));
    };
    if start < 0 {
        return Ok(Bson::String(String::new()));
    }
    let start = usize::try_from(start).unwrap_or(usize::MAX);
    let chars = s.chars().skip(start);
    let out: String = match usize::try_from(len) {
        Ok(n) => chars.take(n).collect(),
        Err(_) => chars.collect(),
    };
    Ok(Bson::String(out))
}

fn op_strcasecmp(ev: &Evaluator<'_>, arg: &Bson) -> Eval {
    let args = exact_args("$strcasecmp", arg, 2)?;
    let a = coerce_string("$strcasecmp", ev.nullish(args[0])?)?.to_lowercase();
    let b = coerce_string("$strcasecmp", ev.nullish(args[1])?)?.to_lowercase();
    Ok(Bson::Int32(match a.cmp(&b) {
        Ordering::Less => -1,
        Ordering::Equal => 0,
        Ordering::Greater => 1,
    }))
}

fn string_operand(ev: &Evaluator<'_>, op: &str, arg: &Bson, code: i32) -> Result<String, ExprError> {
    let args = exact_args(op, arg, 1)?;
    match ev.evaluate(args[0])? {
        Some(Bson::String(s)) => Ok(s),
        other => Err(fail(
            code,
            format!("{op} requires a string argument, found: {}", other.as_ref().map_or("missing", type_name)),
        )),
    }
}

fn op_str_len_cp(ev: &Evaluator<'_>, arg: &Bson) -> Eval {
    let s = string_operand(ev, "$strLenCP", arg, 34471)?;
    Ok(Bson::Int32(i32::try_from(s.chars().count()).unwrap_or(i32::MAX)))
}

fn op_str_len_bytes(ev: &Evaluator<'_>, arg: &Bson) -> Eval {
    let s = string_operand(ev, "$strLenBytes", arg, 34473)?;
    Ok(Bson::Int32(i32::try_from(s.len()).unwrap_or(i32::MAX)))
}

fn op_regex_match(ev: &Evaluator<'_>, arg: &Bson) -> Eval {
    let Bson::Document(spec) = arg else {
        return Err(fail(51103, format!("$regexMatch expects an object of named arguments but found: {}", type_name(arg))));
    };
    if let Some(k) = spec.keys().find(|k| !matches!(k.as_str(), "input" | "regex" | "options")) {
        return Err(fail(31024, format!("$regexMatch found an unknown argument: {k}")));
    }
    let input = required(spec, "input", "$regexMatch", 31022)?;
    let regex = required(spec, "regex", "$regexMatch", 31023)?;
    let input = match ev.nullish(input)? {
        None => return Ok(Bson::Boolean(false)),
        Some(Bson::String(s)) => s,
        Some(other) => {
            return Err(fail(51104, format!("$regexMatch needs 'input' to be of type string, found {}", type_name(&other))));
        }
    };
    let options = match spec.get("options") {
        None => None,
        Some(o) => match ev.nullish(o)? {
            None => None,
            Some(Bson::String(s)) => Some(s),
            Some(other) => {
                return Err(fail(51106, format!("$regexMatch needs 'options' to be of type string, found {}", type_name(&other))));
            }
        },
    };
    let (pattern, flags) = match ev.nullish(regex)? {
        None => return Ok(Bson::Boolean(false)),
        Some(Bson::String(p)) => (p, options.unwrap_or_default()),
        Some(Bson::RegularExpression(re)) => match options {
            Some(_) if !re.options.is_empty() => {
                return Err(fail(51075, "$regexMatch: regex option(s) specified in both 'regex' and 'option' fields"));
            }
            Some(o) => (re.pattern, o),
            None => (re.pattern, re.options),
        },
        Some(other) => {
            return Err(fail(51105, format!("$regexMatch needs 'regex' to be of type string or regex, found {}", type_name(&other))));
        }
    };
    Ok(Bson::Boolean(compile_pattern(&pattern, &flags)?.is_match(&input)))
}

// --- set ---

fn push_unique(out: &mut Vec<Bson>, v: Bson) {
    if !out.iter().any(|seen| values_equal(seen, &v)) {
        out.push(v);
    }
}

fn contains(items: &[Bson], v: &Bson) -> bool {
    items.iter().any(|x| values_equal(x, v))
}

/// Evaluates every operand to an array; `None` when any operand is null or missing.
fn array_operands(ev: &Evaluator<'_>, op: &str, arg: &Bson) -> Result<Option<Vec<Vec<Bson>>>, ExprError> {
    let mut out = Vec::new();
    for e in list(arg) {
        match ev.nullish(e)? {
            None => return Ok(None),
            Some(Bson::Array(items)) => out.push(items),
            Some(other) => {
                return Err(fail(17044, format!("All operands of {op} must be arrays. One argument is of type: {}", type_name(&other))));
            }
        }
    }
    Ok(Some(out))
}

fn op_set_union(ev: &Evaluator<'_>, arg: &Bson) -> Eval {
    let Some(sets) = array_operands(ev, "$setUnion", arg)? else {
        return Ok(Bson::Null);
    };
    let mut out = Vec::new();
    for v in sets.into_iter().flatten() {
        push_unique(&mut out, v);
    }
    Ok(Bson::Array(out))
}

fn op_set_intersection(ev: &Evaluator<'_>, arg: &Bson) -> Eval {
    let Some(sets) = array_operands(ev, "$setIntersection", arg)? else {
        return Ok(Bson::Null);
    };
    let Some((first, rest)) = sets.split_first() else {
        return Ok(Bson::Array(Vec::new()));
    };
    let mut out = Vec::new();
    for v in first {
        if rest.iter().all(|s| contains(s, v)) {
            push_unique(&mut out, v.clone());
        }
    }
    Ok(Bson::Array(out))
}

fn op_set_difference(ev: &Evaluator<'_>, arg: &Bson) -> Eval {
    exact_args("$setDifference", arg, 2)?;
    let Some(sets) = array_operands(ev, "$setDifference", arg)? else {
        return Ok(Bson::Null);
    };
    let mut out = Vec::new();
    for v in &sets[0] {
        if !contains(&sets[1], v) {
            push_unique(&mut out, v.clone());
        }
    }
    Ok(Bson::Array(out))
}

fn op_set_equals(ev: &Evaluator<'_>, arg: &Bson) -> Eval {
    if list(arg).len() < 2 {
        return Err(fail(17045, "$setEquals needs at least two arguments"));
    }
    let sets = array_operands(ev, "$setEquals", arg)?
        .ok_or_else(|| fail(17044, "All operands of $setEquals must be arrays"))?;
    let first = &sets[0];
    let same = sets[1..]
        .iter()
        .all(|s| s.iter().all(|v| contains(first, v)) && first.iter().all(|v| contains(s, v)));
    Ok(Bson::Boolean(same))
}

fn op_set_is_subset(ev: &Evaluator<'_>, arg: &Bson) -> Eval {
    exact_args("$setIsSubset", arg, 2)?;
    let sets = array_operands(ev, "$setIsSubset", arg)?
        .ok_or_else(|| fail(17046, "both operands of $setIsSubset must be arrays"))?;
    Ok(Bson::Boolean(sets[0].iter().all(|v| contains(&sets[1], v))))
}

fn element_truth(ev: &Evaluator<'_>, op: &str, arg: &Bson, code: i32) -> Result<Vec<bool>, ExprError> {
    let args = exact_args(op, arg, 1)?;
    match ev.evaluate(args[0])? {
        Some(Bson::Array(items)) => Ok(items.iter().map(truthy).collect()),
        other => Err(fail(
            code,
            format!("{op}'s argument must be an array, but is {}", other.as_ref().map_or("missing", type_name)),
        )),
    }
}

fn op_any_element_true(ev: &Evaluator<'_>, arg: &Bson) -> Eval {
    Ok(Bson::Boolean(element_truth(ev, "$anyElementTrue", arg, 17041)?.into_iter().any(|b| b)))
}

fn op_all_elements_true(ev: &Evaluator<'_>, arg: &Bson) -> Eval {
    Ok(Bson::Boolean(element_truth(ev, "$allElementsTrue", arg, 17040)?.into_iter().all(|b| b)))
}

// --- boolean ---

fn truth_of(ev: &Evaluator<'_>, e: &Bson) -> Result<bool, ExprError> {
    match ev.eval(e) {
        Ok(v) => Ok(truthy(&v)),
        Err(ExprError::Missing) => Ok(false),
        Err(err) => Err(err),
    }
}

fn op_and(ev: &Evaluator<'_>, arg: &Bson) -> Eval {
    for e in list(arg) {
        if !truth_of(ev, e)? {
            return Ok(Bson::Boolean(false));
        }
    }
    Ok(Bson::Boolean(true))
}

fn op_or(ev: &Evaluator<'_>, arg: &Bson) -> Eval {
    for e in list(arg) {
        if truth_of(ev, e)? {
            return Ok(Bson::Boolean(true));
        }
    }
    Ok(Bson::Boolean(false))
}

fn op_not(ev: &Evaluator<'_>, arg: &Bson) -> Eval {
    let args = exact_args("$not", arg, 1)?;
    Ok(Bson::Boolean(!truth_of(ev, args[0])?))
}

// --- conversion ---

fn iso_millis(dt: DateTime) -> String {
    dt.to_chrono().to_rfc3339_opts(chrono::SecondsFormat::Millis, true)
}

fn op_to_string(ev: &Evaluator<'_>, arg: &Bson) -> Eval {
    match ev.unary("$toString", arg)? {
        None => Ok(Bson::Null),
        Some(Bson::DateTime(dt)) => Ok(Bson::String(iso_millis(dt))),
        Some(other) => scalar_to_string(&other)
            .map(Bson::String)
            .ok_or_else(|| fail(241, format!("Unsupported conversion from {} to string", type_name(&other)))),
    }
}

fn op_to_int(ev: &Evaluator<'_>, arg: &Bson) -> Eval {
    let Some(v) = ev.unary("$toInt", arg)? else {
        return Ok(Bson::Null);
    };
    let out_of_range = || fail(241, format!("Conversion would overflow target type in $toInt: {v}"));
    match &v {
        Bson::Int32(i) => Ok(Bson::Int32(*i)),
        Bson::Boolean(b) => Ok(Bson::Int32(i32::from(*b))),
        Bson::Int64(i) => i32::try_from(*i).map(Bson::Int32).map_err(|_| out_of_range()),
        Bson::Double(f) => {
            let t = f.trunc();
            if t.is_finite() && t >= f64::from(i32::MIN) && t <= f64::from(i32::MAX) {
                Ok(Bson::Int32(t as i32))
            } else {
                Err(out_of_range())
            }
        }
        Bson::String(s) => s
            .trim()
            .parse::<i32>()
            .map(Bson::Int32)
            .map_err(|_| fail(241, format!("Failed to parse number '{s}' in $toInt"))),
        other => Err(fail(241, format!("Unsupported conversion from {} to int", type_name(other)))),
    }
}

fn op_array_to_object(ev: &Evaluator<'_>, arg: &Bson) -> Eval {
    let items = match ev.unary("$arrayToObject", arg)? {
        None => return Ok(Bson::Null),
        Some(Bson::Array(items)) => items,
        Some(other) => {
            return Err(fail(40386, format!("$arrayToObject requires an array input, found: {}", type_name(&other))));
        }
    };
    let mut out = Document::new();
    for item in items {
        let (k, v) = match item {
            Bson::Document(mut d) if d.len() == 2 && d.contains_key("k") && d.contains_key("v") => {
                (d.remove("k"), d.remove("v"))
            }
            Bson::Array(pair) if pair.len() == 2 => {
                let mut it = pair.into_iter();
                (it.next(), it.next())
            }
            _ => (None, None),
        };
        match (k, v) {
            (Some(Bson::String(k)), Some(v)) => {
                out.insert(k, v);
            }
            _ => {
                return Err(fail(
                    40398,
                    "arrays used with $arrayToObject must contain documents with k and v fields or two-element arrays",
                ));
            }
        }
    }
    Ok(Bson::Document(out))
}

// --- accumulators ---

/// Sum of the numeric values; everything else is ignored.
pub(crate) fn sum_of(values: &[Bson]) -> Bson {
    values
        .iter()
        .filter_map(Number::from_bson)
        .fold(Number::Int(0), Number::add)
        .to_bson()
}

/// Mean of the numeric values, or null when there are none.
pub(crate) fn avg_of(values: &[Bson]) -> Bson {
    let nums: Vec<f64> = values.iter().filter_map(Number::from_bson).map(Number::as_f64).collect();
    if nums.is_empty() {
        return Bson::Null;
    }
    Bson::Double(nums.iter().sum::<f64>() / nums.len() as f64)
}

/// Smallest (`Ordering::Less`) or largest (`Ordering::Greater`) non-null value.
pub(crate) fn extreme_of(values: &[Bson], keep: Ordering) -> Bson {
    values
        .iter()
        .filter(|v| !matches!(v, Bson::Null))
        .fold(None::<&Bson>, |best, v| match best {
            Some(b) if compare_bson(v, b) != keep => Some(b),
            _ => Some(v),
        })
        .cloned()
        .unwrap_or(Bson::Null)
}

fn accumulator_operands(ev: &Evaluator<'_>, arg: &Bson) -> Result<Vec<Bson>, ExprError> {
    match arg {
        Bson::Array(items) if items.len() != 1 => {
            let mut out = Vec::with_capacity(items.len());
            for item in items {
                if let Some(v) = ev.evaluate(item)? {
                    out.push(v);
                }
            }
            Ok(out)
        }
        other => {
            let single = match other {
                Bson::Array(items) => &items[0],
                e => e,
            };
            Ok(match ev.evaluate(single)? {
                Some(Bson::Array(items)) => items,
                Some(v) => vec![v],
                None => Vec::new(),
            })
        }
    }
}

fn op_sum(ev: &Evaluator<'_>, arg: &Bson) -> Eval {
    Ok(sum_of(&accumulator_operands(ev, arg)?))
}

fn op_avg(ev: &Evaluator<'_>, arg: &Bson) -> Eval {
    Ok(avg_of(&accumulator_operands(ev, arg)?))
}

fn op_min(ev: &Evaluator<'_>, arg: &Bson) -> Eval {
    Ok(extreme_of(&accumulator_operands(ev, arg)?, Ordering::Less))
}

fn op_max(ev: &Evaluator<'_>, arg: &Bson) -> Eval {
    Ok(extreme_of(&accumulator_operands(ev, arg)?, Ordering::Greater))
}

fn op_literal(_ev: &Evaluator<'_>, arg: &Bson) -> Eval {
    Ok(arg.clone())
}
