//! Numeric coercion, truthiness and type names.

use bson::Bson;

#[must_use]
pub fn as_f64(v: &Bson) -> Option<f64> {
    match v {
        Bson::Int32(i) => Some(f64::from(*i)),
        Bson::Int64(i) => Some(*i as f64),
        Bson::Double(f) => Some(*f),
        _ => None,
    }
}

/// Integer view of a number, accepting doubles without a fractional part.
#[must_use]
pub fn as_i64_exact(v: &Bson) -> Option<i64> {
    match v {
        Bson::Int32(i) => Some(i64::from(*i)),
        Bson::Int64(i) => Some(*i),
        Bson::Double(f) if f.fract() == 0.0 && f.is_finite() => Some(*f as i64),
        _ => None,
    }
}

/// Aggregation truthiness: false, null, absent and numeric zero are false.
#[must_use]
pub fn truthy(v: &Bson) -> bool {
    match v {
        Bson::Boolean(b) => *b,
        Bson::Null | Bson::Undefined => false,
        Bson::Int32(i) => *i != 0,
        Bson::Int64(i) => *i != 0,
        Bson::Double(f) => *f != 0.0,
        _ => true,
    }
}

#[must_use]
pub fn type_name(v: &Bson) -> &'static str {
    use bson::Bson as T;
    match v {
        T::Double(_) => "double",
        T::String(_) => "string",
        T::Document(_) => "object",
        T::Array(_) => "array",
        T::Binary(_) => "binData",
        T::Undefined => "undefined",
        T::ObjectId(_) => "objectId",
        T::Boolean(_) => "bool",
        T::DateTime(_) => "date",
        T::Null => "null",
        T::RegularExpression(_) => "regex",
        T::DbPointer(_) => "dbPointer",
        T::JavaScriptCode(_) => "javascript",
        T::Symbol(_) => "symbol",
        T::JavaScriptCodeWithScope(_) => "javascriptWithScope",
        T::Int32(_) => "int",
        T::Timestamp(_) => "timestamp",
        T::Int64(_) => "long",
        T::Decimal128(_) => "decimal",
        T::MinKey => "minKey",
        T::MaxKey => "maxKey",
    }
}

/// String form of a scalar, used when a pattern is tested against a non-string value.
#[must_use]
pub fn scalar_to_string(v: &Bson) -> Option<String> {
    match v {
        Bson::String(s) => Some(s.clone()),
        Bson::Int32(i) => Some(i.to_string()),
        Bson::Int64(i) => Some(i.to_string()),
        Bson::Double(f) => Some(f.to_string()),
        Bson::Boolean(b) => Some(b.to_string()),
        Bson::ObjectId(oid) => Some(oid.to_hex()),
        _ => None,
    }
}

/// Numeric value with width tracking, so integer arithmetic stays integral until it overflows.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Number {
    Int(i32),
    Long(i64),
    Double(f64),
}

impl Number {
    #[must_use]
    pub fn from_bson(v: &Bson) -> Option<Self> {
        match v {
            Bson::Int32(i) => Some(Number::Int(*i)),
            Bson::Int64(i) => Some(Number::Long(*i)),
            Bson::Double(f) => Some(Number::Double(*f)),
            _ => None,
        }
    }

    #[must_use]
    pub fn to_bson(self) -> Bson {
        match self {
            Number::Int(i) => Bson::Int32(i),
            Number::Long(i) => Bson::Int64(i),
            Number::Double(f) => Bson::Double(f),
        }
    }

    #[must_use]
    pub fn as_f64(self) -> f64 {
        match self {
            Number::Int(i) => f64::from(i),
            Number::Long(i) => i as f64,
            Number::Double(f) => f,
        }
    }

    fn as_i64(self) -> Option<i64> {
        match self {
            Number::Int(i) => Some(i64::from(i)),
            Number::Long(i) => Some(i),
            Number::Double(_) => None,
        }
    }

    fn combine(self, other: Number, int_op: fn(i32, i32) -> Option<i32>, long_op: fn(i64, i64) -> Option<i64>, float_op: fn(f64, f64) -> f64) -> Number {
        match (self, other) {
            (Number::Int(a), Number::Int(b)) => match int_op(a, b) {
                Some(r) => Number::Int(r),
                None => match long_op(i64::from(a), i64::from(b)) {
                    Some(r) => Number::Long(r),
                    None => Number::Double(float_op(f64::from(a), f64::from(b))),
                },
            },
            (a, b) => match (a.as_i64(), b.as_i64()) {
                (Some(x), Some(y)) => match long_op(x, y) {
                    Some(r) => Number::Long(r),
                    None => Number::Double(float_op(x as f64, y as f64)),
                },
                _ => Number::Double(float_op(a.as_f64(), b.as_f64())),
            },
        }
    }

    #[must_use]
    pub fn add(self, other: Number) -> Number {
        self.combine(other, i32::checked_add, i64::checked_add, |a, b| a + b)
    }

    #[must_use]
    pub fn sub(self, other: Number) -> Number {
        self.combine(other, i32::checked_sub, i64::checked_sub, |a, b| a - b)
    }

    #[must_use]
    pub fn mul(self, other: Number) -> Number {
        self.combine(other, i32::checked_mul, i64::checked_mul, |a, b| a * b)
    }

    /// Remainder with the sign of the dividend. `None` for an integer zero divisor.
    #[must_use]
    pub fn rem(self, other: Number) -> Option<Number> {
        match (self.as_i64(), other.as_i64()) {
            (Some(_), Some(0)) => None,
            (Some(_), Some(_)) => Some(self.combine(other, i32::checked_rem, i64::checked_rem, |a, b| a % b)),
            _ => Some(Number::Double(self.as_f64() % other.as_f64())),
        }
    }

    #[must_use]
    pub fn is_zero(self) -> bool {
        self.as_f64() == 0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn integer_addition_widens_on_overflow() {
        assert_eq!(Number::Int(1).add(Number::Int(2)), Number::Int(3));
        assert_eq!(Number::Int(i32::MAX).add(Number::Int(1)), Number::Long(i64::from(i32::MAX) + 1));
        assert_eq!(Number::Int(1).add(Number::Double(0.5)), Number::Double(1.5));
    }

    #[test]
    fn truthiness() {
        assert!(!truthy(&Bson::Int32(0)));
        assert!(!truthy(&Bson::Null));
        assert!(truthy(&Bson::String(String::new())));
        assert!(truthy(&Bson::Array(vec![])));
    }

    #[test]
    fn remainder_rejects_integer_zero() {
        assert_eq!(Number::Int(7).rem(Number::Int(0)), None);
        assert_eq!(Number::Int(7).rem(Number::Int(3)), Some(Number::Int(1)));
    }
}
