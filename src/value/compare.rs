use super::Value;
use bson::Bson;
use std::cmp::Ordering;
use std::sync::Arc;

/// Structural equality. Literal markers are ignored and numbers compare across int/double.
/// Runtime handles are equal only to themselves.
#[must_use]
pub fn deep_equals(a: &Value, b: &Value) -> bool {
    let (a, b) = (a.unmarked(), b.unmarked());
    match (a, b) {
        (Value::Undefined, Value::Undefined) | (Value::Null, Value::Null) => true,
        (Value::Bool(x), Value::Bool(y)) => x == y,
        (Value::Int(x), Value::Int(y)) => x == y,
        (Value::Int(_) | Value::Double(_), Value::Int(_) | Value::Double(_)) => {
            a.as_f64() == b.as_f64()
        }
        (Value::String(x), Value::String(y)) => x == y,
        (Value::Array(x), Value::Array(y)) => {
            x.len() == y.len() && x.iter().zip(y.iter()).all(|(l, r)| deep_equals(l, r))
        }
        (Value::Object(x), Value::Object(y)) => {
            x.len() == y.len()
                && x.iter().all(|(k, l)| y.get(k).is_some_and(|r| deep_equals(l, r)))
        }
        (Value::Bson(x), Value::Bson(y)) => x == y,
        (Value::Subject(x), Value::Subject(y)) => std::ptr::addr_eq(Arc::as_ptr(x), Arc::as_ptr(y)),
        (Value::Context(x), Value::Context(y)) => x.id() == y.id(),
        (Value::Cursor(x), Value::Cursor(y)) => x.ptr_eq(y),
        (Value::Memo(x), Value::Memo(y)) => Arc::ptr_eq(x, y),
        _ => false,
    }
}

fn type_rank(v: &Value) -> u8 {
    match v {
        Value::Undefined => 0,
        Value::Null => 1,
        Value::Int(_) | Value::Double(_) => 2,
        Value::String(_) => 3,
        Value::Object(_) | Value::Subject(_) | Value::Context(_) | Value::Memo(_) => 4,
        Value::Array(_) => 5,
        Value::Bson(b) => match b {
            Bson::Null | Bson::Undefined => 1,
            Bson::Decimal128(_) => 2,
            Bson::Binary(_) => 6,
            Bson::ObjectId(_) => 7,
            Bson::DateTime(_) => 9,
            Bson::Timestamp(_) => 10,
            Bson::RegularExpression(_) => 11,
            _ => 12,
        },
        Value::Bool(_) => 8,
        Value::Cursor(_) => 13,
        Value::Literal(_) => 14,
    }
}

/// Total order used by `$cmp`, `$gt` and friends, `$min` and `$max`.
///
/// Values of different kinds order by kind: undefined, null, numbers, strings, objects, arrays,
/// binary, object ids, booleans, dates, timestamps, regular expressions.
#[must_use]
pub fn compare(a: &Value, b: &Value) -> Ordering {
    let (a, b) = (a.unmarked(), b.unmarked());
    let (ra, rb) = (type_rank(a), type_rank(b));
    if ra != rb {
        return ra.cmp(&rb);
    }
    match (a, b) {
        (Value::Int(x), Value::Int(y)) => x.cmp(y),
        (Value::Int(_) | Value::Double(_), Value::Int(_) | Value::Double(_)) => {
            let (x, y) = (a.as_f64().unwrap_or(f64::NAN), b.as_f64().unwrap_or(f64::NAN));
            x.partial_cmp(&y).unwrap_or_else(|| x.is_nan().cmp(&y.is_nan()).reverse())
        }
        (Value::String(x), Value::String(y)) => x.cmp(y),
        (Value::Bool(x), Value::Bool(y)) => x.cmp(y),
        (Value::Array(x), Value::Array(y)) => {
            for (l, r) in x.iter().zip(y.iter()) {
                let ord = compare(l, r);
                if ord != Ordering::Equal {
                    return ord;
                }
            }
            x.len().cmp(&y.len())
        }
        (Value::Object(x), Value::Object(y)) => {
            for ((kl, vl), (kr, vr)) in x.iter().zip(y.iter()) {
                let ord = kl.cmp(kr).then_with(|| compare(vl, vr));
                if ord != Ordering::Equal {
                    return ord;
                }
            }
            x.len().cmp(&y.len())
        }
        (Value::Bson(Bson::DateTime(x)), Value::Bson(Bson::DateTime(y))) => {
            x.timestamp_millis().cmp(&y.timestamp_millis())
        }
        (Value::Bson(Bson::ObjectId(x)), Value::Bson(Bson::ObjectId(y))) => x.bytes().cmp(&y.bytes()),
        (Value::Bson(Bson::Binary(x)), Value::Bson(Bson::Binary(y))) => x.bytes.cmp(&y.bytes),
        _ => Ordering::Equal,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn numbers_compare_across_kinds() {
        assert!(deep_equals(&Value::Int(2), &Value::Double(2.0)));
        assert_eq!(compare(&Value::Int(1), &Value::Double(1.5)), Ordering::Less);
    }

    #[test]
    fn object_equality_ignores_key_order() {
        let a = Value::from(bson::doc! { "a": 1, "b": 2 });
        let b = Value::from(bson::doc! { "b": 2, "a": 1 });
        assert!(deep_equals(&a, &b));
    }

    #[test]
    fn kinds_order_before_values() {
        assert_eq!(compare(&Value::Null, &Value::Int(-5)), Ordering::Less);
        assert_eq!(compare(&Value::from("a"), &Value::Int(100)), Ordering::Greater);
        assert_eq!(compare(&Value::Undefined, &Value::Null), Ordering::Less);
    }

    #[test]
    fn arrays_compare_lexicographically() {
        let a = Value::Array(vec![Value::Int(1), Value::Int(2)]);
        let b = Value::Array(vec![Value::Int(1), Value::Int(3)]);
        assert_eq!(compare(&a, &b), Ordering::Less);
        assert_eq!(compare(&b, &a), Ordering::Greater);
    }
}
