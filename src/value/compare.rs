use bson::{Bson, Document};
use std::cmp::Ordering;

/// Cross-type sort order: null, numbers, strings, documents, arrays, binary, ids, booleans,
/// dates, timestamps, patterns.
#[must_use]
pub fn type_rank(v: &Bson) -> u8 {
    use bson::Bson as T;
    match v {
        T::MinKey => 0,
        T::Undefined | T::Null => 1,
        T::Int32(_) | T::Int64(_) | T::Double(_) | T::Decimal128(_) => 2,
        T::String(_) | T::Symbol(_) => 3,
        T::Document(_) => 4,
        T::Array(_) => 5,
        T::Binary(_) => 6,
        T::ObjectId(_) => 7,
        T::Boolean(_) => 8,
        T::DateTime(_) => 9,
        T::Timestamp(_) => 10,
        T::RegularExpression(_) => 11,
        T::DbPointer(_) => 12,
        T::JavaScriptCode(_) => 13,
        T::JavaScriptCodeWithScope(_) => 14,
        T::MaxKey => 255,
    }
}

#[must_use]
pub fn is_number(v: &Bson) -> bool {
    matches!(v, Bson::Int32(_) | Bson::Int64(_) | Bson::Double(_))
}

fn compare_numbers(a: &Bson, b: &Bson) -> Ordering {
    match (a, b) {
        (Bson::Int32(x), Bson::Int32(y)) => x.cmp(y),
        (Bson::Int32(x), Bson::Int64(y)) => i64::from(*x).cmp(y),
        (Bson::Int64(x), Bson::Int32(y)) => x.cmp(&i64::from(*y)),
        (Bson::Int64(x), Bson::Int64(y)) => x.cmp(y),
        _ => {
            let x = super::convert::as_f64(a).unwrap_or(f64::NAN);
            let y = super::convert::as_f64(b).unwrap_or(f64::NAN);
            // NaN sorts below every other number and equals itself.
            match (x.is_nan(), y.is_nan()) {
                (true, true) => Ordering::Equal,
                (true, false) => Ordering::Less,
                (false, true) => Ordering::Greater,
                (false, false) => x.partial_cmp(&y).unwrap_or(Ordering::Equal),
            }
        }
    }
}

/// Total order over values, used by sorting, `$min`/`$max` and the ordering operators.
#[must_use]
pub fn compare_bson(a: &Bson, b: &Bson) -> Ordering {
    use bson::Bson as T;
    let (ra, rb) = (type_rank(a), type_rank(b));
    if ra != rb {
        return ra.cmp(&rb);
    }
    match (a, b) {
        _ if is_number(a) && is_number(b) => compare_numbers(a, b),
        (T::String(x), T::String(y)) => x.cmp(y),
        (T::Document(x), T::Document(y)) => compare_documents(x, y),
        (T::Array(x), T::Array(y)) => compare_arrays(x, y),
        (T::ObjectId(x), T::ObjectId(y)) => x.bytes().cmp(&y.bytes()),
        (T::Boolean(x), T::Boolean(y)) => x.cmp(y),
        (T::DateTime(x), T::DateTime(y)) => x.timestamp_millis().cmp(&y.timestamp_millis()),
        (T::RegularExpression(x), T::RegularExpression(y)) => {
            x.pattern.cmp(&y.pattern).then_with(|| x.options.cmp(&y.options))
        }
        (T::Null | T::Undefined, T::Null | T::Undefined) | (T::MinKey, T::MinKey) | (T::MaxKey, T::MaxKey) => {
            Ordering::Equal
        }
        _ => a
            .clone()
            .into_canonical_extjson()
            .to_string()
            .cmp(&b.clone().into_canonical_extjson().to_string()),
    }
}

fn compare_documents(a: &Document, b: &Document) -> Ordering {
    for ((ka, va), (kb, vb)) in a.iter().zip(b.iter()) {
        let ord = compare_bson(va, vb).then_with(|| ka.cmp(kb));
        if ord != Ordering::Equal {
            return ord;
        }
    }
    a.len().cmp(&b.len())
}

fn compare_arrays(a: &[Bson], b: &[Bson]) -> Ordering {
    for (x, y) in a.iter().zip(b.iter()) {
        let ord = compare_bson(x, y);
        if ord != Ordering::Equal {
            return ord;
        }
    }
    a.len().cmp(&b.len())
}

/// Value equality as the matcher sees it: numbers compare across widths, documents compare
/// by content regardless of key order.
#[must_use]
pub fn values_equal(a: &Bson, b: &Bson) -> bool {
    match (a, b) {
        _ if is_number(a) && is_number(b) => compare_numbers(a, b) == Ordering::Equal,
        (Bson::Document(x), Bson::Document(y)) => documents_equal(x, y),
        (Bson::Array(x), Bson::Array(y)) => {
            x.len() == y.len() && x.iter().zip(y.iter()).all(|(p, q)| values_equal(p, q))
        }
        _ => a == b,
    }
}

#[must_use]
pub fn documents_equal(a: &Document, b: &Document) -> bool {
    a.len() == b.len() && a.iter().all(|(k, v)| b.get(k).is_some_and(|w| values_equal(v, w)))
}

/// True when an ordering operator may compare the two values at all.
#[must_use]
pub fn same_bracket(a: &Bson, b: &Bson) -> bool {
    type_rank(a) == type_rank(b)
}
