use super::Value;
use crate::errors::{ExprError, Result};
use bson::Bson;

/// Rough in-memory footprint: booleans 4 bytes, numbers 8, strings and keys 2 per character
/// (array indices count as keys), dates and object ids 12, binary its length, null 0.
#[must_use]
pub fn rough_size(value: &Value) -> usize {
    let mut total = 0usize;
    let mut stack: Vec<&Value> = vec![value];
    while let Some(v) = stack.pop() {
        total = total.saturating_add(visit(v, &mut stack));
    }
    total
}

/// Like [`rough_size`] but stops with a `code` error once `max` is exceeded.
pub fn rough_size_bounded(value: &Value, max: Option<usize>, code: &str) -> Result<usize> {
    let Some(max) = max else {
        return Ok(rough_size(value));
    };
    let mut total = 0usize;
    let mut stack: Vec<&Value> = vec![value];
    while let Some(v) = stack.pop() {
        total = total.saturating_add(visit(v, &mut stack));
        if total > max {
            return Err(ExprError::too_large(code, format!("Maximum size of {max} bytes exceeded.")));
        }
    }
    Ok(total)
}

fn key_size(key: &str) -> usize {
    key.chars().count().saturating_mul(2)
}

fn visit<'a>(v: &'a Value, stack: &mut Vec<&'a Value>) -> usize {
    match v {
        Value::Undefined | Value::Null => 0,
        Value::Bool(_) => 4,
        Value::Int(_) | Value::Double(_) => 8,
        Value::String(s) => key_size(s),
        Value::Array(items) => {
            let mut keys = 0usize;
            for (i, item) in items.iter().enumerate() {
                keys = keys.saturating_add(key_size(&i.to_string()));
                stack.push(item);
            }
            keys
        }
        Value::Object(map) => {
            let mut keys = 0usize;
            for (k, item) in map {
                keys = keys.saturating_add(key_size(k));
                stack.push(item);
            }
            keys
        }
        Value::Literal(inner) => {
            stack.push(inner);
            0
        }
        Value::Bson(b) => match b {
            Bson::Null | Bson::Undefined => 0,
            Bson::DateTime(_) | Bson::ObjectId(_) => 12,
            Bson::Binary(bin) => bin.bytes.len(),
            Bson::Decimal128(_) => 16,
            _ => 8,
        },
        Value::Memo(memo) => rough_size(&memo.data()),
        Value::Subject(_) | Value::Context(_) | Value::Cursor(_) => 0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bson::doc;

    #[test]
    fn sizes_follow_the_rules() {
        assert_eq!(rough_size(&Value::Bool(true)), 4);
        assert_eq!(rough_size(&Value::Int(7)), 8);
        assert_eq!(rough_size(&Value::from("abc")), 6);
        assert_eq!(rough_size(&Value::Null), 0);
        // "a" key (2) + number (8)
        assert_eq!(rough_size(&Value::from(doc! { "a": 1 })), 10);
        // index "0" (2) + "x" (2)
        assert_eq!(rough_size(&Value::Array(vec![Value::from("x")])), 4);
    }

    #[test]
    fn bounded_size_errors_past_max() {
        let big = Value::from("x".repeat(100));
        let err = rough_size_bounded(&big, Some(10), "cortex.tooLarge.memo").unwrap_err();
        assert_eq!(err.code(), "cortex.tooLarge.memo");
        assert_eq!(rough_size_bounded(&big, None, "x").unwrap(), 200);
    }
}
