//! The dynamic value model expressions evaluate to.
//!
//! Plain data (numbers, strings, arrays, objects) is kept in native variants so operators can
//! work on it directly. Everything else that can legally appear in a document is carried as a
//! raw [`Bson`] value. Runtime handles (access subjects, cursors, memos, access contexts) travel
//! through the same type so that paths like `$$CURSOR.position` or `$$ROOT.memo.getSize` work.

mod compare;
mod size;

pub use compare::{compare, deep_equals};
pub use size::{rough_size, rough_size_bounded};

use crate::acl::{AccessContext, AccessSubject};
use crate::cursor::SharedCursor;
use crate::memo::Memo;
use bson::{Bson, Document};
use indexmap::IndexMap;
use std::fmt;
use std::sync::Arc;

/// Insertion-ordered object map.
pub type Map = IndexMap<String, Value>;

#[derive(Clone, Default)]
pub enum Value {
    /// Absent. Dropped from objects when converted to BSON.
    #[default]
    Undefined,
    Null,
    Bool(bool),
    Int(i64),
    Double(f64),
    String(String),
    Array(Vec<Value>),
    Object(Map),
    /// Any other BSON value: dates, object ids, regular expressions, binary, decimals.
    Bson(Bson),
    /// An array or object produced by a literal; shared and copied on write.
    Literal(Arc<Value>),
    Subject(Arc<dyn AccessSubject>),
    Context(AccessContext),
    Cursor(SharedCursor),
    Memo(Arc<Memo>),
}

impl Value {
    /// Marks arrays and objects as literals. Scalars come back unchanged.
    #[must_use]
    pub fn literal(value: Value) -> Value {
        match value {
            Value::Array(_) | Value::Object(_) => Value::Literal(Arc::new(value)),
            other => other,
        }
    }

    #[must_use]
    pub fn is_literal(&self) -> bool {
        matches!(self, Value::Literal(_))
    }

    /// Looks through a literal marker.
    #[must_use]
    pub fn unmarked(&self) -> &Value {
        match self {
            Value::Literal(inner) => inner.unmarked(),
            other => other,
        }
    }

    #[must_use]
    pub fn into_unmarked(self) -> Value {
        match self {
            Value::Literal(inner) => Arc::try_unwrap(inner).unwrap_or_else(|shared| (*shared).clone()).into_unmarked(),
            other => other,
        }
    }

    #[must_use]
    pub fn is_undefined(&self) -> bool {
        matches!(self, Value::Undefined)
    }

    /// True for null and undefined.
    #[must_use]
    pub fn is_nullish(&self) -> bool {
        matches!(self, Value::Undefined | Value::Null | Value::Bson(Bson::Null | Bson::Undefined))
    }

    /// Truthiness the way scripts see it: `false`, `0`, `NaN`, `""`, null and undefined are false.
    #[must_use]
    pub fn is_truthy(&self) -> bool {
        match self.unmarked() {
            Value::Undefined | Value::Null => false,
            Value::Bool(b) => *b,
            Value::Int(i) => *i != 0,
            Value::Double(d) => *d != 0.0 && !d.is_nan(),
            Value::String(s) => !s.is_empty(),
            Value::Bson(Bson::Null | Bson::Undefined) => false,
            _ => true,
        }
    }

    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Int(i) => Some(*i as f64),
            Value::Double(d) => Some(*d),
            _ => None,
        }
    }

    /// Integer view; doubles qualify only when they have no fractional part.
    #[must_use]
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            Value::Double(d) => crate::utils::num::f64_to_i64_exact(*d),
            _ => None,
        }
    }

    #[must_use]
    pub fn is_number(&self) -> bool {
        matches!(self, Value::Int(_) | Value::Double(_))
    }

    #[must_use]
    pub fn as_array(&self) -> Option<&Vec<Value>> {
        match self.unmarked() {
            Value::Array(items) => Some(items),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_object(&self) -> Option<&Map> {
        match self.unmarked() {
            Value::Object(map) => Some(map),
            _ => None,
        }
    }

    #[must_use]
    pub fn is_array(&self) -> bool {
        self.as_array().is_some()
    }

    #[must_use]
    pub fn is_object(&self) -> bool {
        self.as_object().is_some()
    }

    /// Array coercion: arrays pass through, null and undefined become empty, anything else is wrapped.
    #[must_use]
    pub fn into_array(self) -> Vec<Value> {
        match self.into_unmarked() {
            Value::Array(items) => items,
            Value::Undefined | Value::Null => Vec::new(),
            other => vec![other],
        }
    }

    /// Type name reported by `$type`.
    #[must_use]
    pub fn type_name(&self) -> &'static str {
        match self.unmarked() {
            Value::Null => "Null",
            Value::Bool(_) => "Boolean",
            Value::Int(_) | Value::Double(_) => "Number",
            Value::String(_) => "String",
            Value::Array(_) => "Array",
            Value::Object(_) | Value::Context(_) | Value::Memo(_) | Value::Subject(_) => "Object",
            Value::Cursor(_) => "Cursor",
            Value::Bson(b) => match b {
                Bson::Null | Bson::Undefined => "Null",
                Bson::RegularExpression(_) => "RegExp",
                Bson::DateTime(_) => "Date",
                Bson::ObjectId(_) => "ObjectId",
                Bson::Binary(_) => "Binary",
                Bson::Decimal128(_) => "Number",
                _ => "Unknown",
            },
            Value::Undefined | Value::Literal(_) => "Unknown",
        }
    }

    /// String conversion used by `$concat`-like operators.
    #[must_use]
    pub fn to_display_string(&self) -> String {
        match self.unmarked() {
            Value::Undefined => "undefined".to_string(),
            Value::Null => "null".to_string(),
            Value::Bool(b) => b.to_string(),
            Value::Int(i) => i.to_string(),
            Value::Double(d) => format_double(*d),
            Value::String(s) => s.clone(),
            Value::Array(items) => items
                .iter()
                .map(|v| if v.is_nullish() { String::new() } else { v.to_display_string() })
                .collect::<Vec<_>>()
                .join(","),
            Value::Bson(Bson::DateTime(dt)) => chrono::DateTime::from_timestamp_millis(dt.timestamp_millis())
                .map(|d| d.to_rfc3339_opts(chrono::SecondsFormat::Millis, true))
                .unwrap_or_default(),
            Value::Bson(Bson::ObjectId(oid)) => oid.to_hex(),
            Value::Bson(Bson::String(s)) => s.clone(),
            _ => "[object Object]".to_string(),
        }
    }

    /// Converts to BSON for output. Undefined object fields are dropped, undefined elsewhere is null.
    #[must_use]
    pub fn to_bson(&self) -> Bson {
        match self {
            Value::Undefined | Value::Null => Bson::Null,
            Value::Bool(b) => Bson::Boolean(*b),
            Value::Int(i) => match i32::try_from(*i) {
                Ok(small) => Bson::Int32(small),
                Err(_) => Bson::Int64(*i),
            },
            Value::Double(d) => Bson::Double(*d),
            Value::String(s) => Bson::String(s.clone()),
            Value::Array(items) => Bson::Array(items.iter().map(Value::to_bson).collect()),
            Value::Object(map) => Bson::Document(map_to_document(map)),
            Value::Bson(b) => b.clone(),
            Value::Literal(inner) => inner.to_bson(),
            Value::Subject(subject) => {
                let mut doc = Document::new();
                doc.insert("object", subject.object_name());
                if let Some(id) = subject.id() {
                    doc.insert("_id", id);
                }
                Bson::Document(doc)
            }
            Value::Context(ac) => Bson::Document(ac.to_object()),
            Value::Cursor(cursor) => cursor.snapshot().to_bson(),
            Value::Memo(memo) => memo.data().to_bson(),
        }
    }

    /// Document view, when the value is an object.
    #[must_use]
    pub fn to_document(&self) -> Option<Document> {
        match self.to_bson() {
            Bson::Document(doc) => Some(doc),
            _ => None,
        }
    }
}

fn format_double(d: f64) -> String {
    if d.is_nan() {
        return "NaN".to_string();
    }
    if d.is_infinite() {
        return if d > 0.0 { "Infinity".to_string() } else { "-Infinity".to_string() };
    }
    match crate::utils::num::f64_to_i64_exact(d) {
        Some(i) if i.abs() < 1_000_000_000_000_000 => i.to_string(),
        _ => format!("{d}"),
    }
}

fn map_to_document(map: &Map) -> Document {
    let mut doc = Document::new();
    for (k, v) in map {
        if !v.is_undefined() {
            doc.insert(k.clone(), v.to_bson());
        }
    }
    doc
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Undefined => write!(f, "Undefined"),
            Value::Null => write!(f, "Null"),
            Value::Bool(b) => write!(f, "Bool({b})"),
            Value::Int(i) => write!(f, "Int({i})"),
            Value::Double(d) => write!(f, "Double({d})"),
            Value::String(s) => write!(f, "String({s:?})"),
            Value::Array(items) => f.debug_list().entries(items).finish(),
            Value::Object(map) => f.debug_map().entries(map.iter()).finish(),
            Value::Bson(b) => write!(f, "Bson({b})"),
            Value::Literal(inner) => write!(f, "Literal({inner:?})"),
            Value::Subject(s) => write!(f, "Subject({})", s.object_name()),
            Value::Context(ac) => write!(f, "Context({})", ac.id()),
            Value::Cursor(c) => write!(f, "Cursor({:?})", c.name()),
            Value::Memo(_) => write!(f, "Memo"),
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        deep_equals(self, other)
    }
}

impl From<Bson> for Value {
    fn from(b: Bson) -> Self {
        match b {
            Bson::Null => Value::Null,
            Bson::Undefined => Value::Undefined,
            Bson::Boolean(v) => Value::Bool(v),
            Bson::Int32(i) => Value::Int(i64::from(i)),
            Bson::Int64(i) => Value::Int(i),
            Bson::Double(d) => Value::Double(d),
            Bson::String(s) => Value::String(s),
            Bson::Array(items) => Value::Array(items.into_iter().map(Value::from).collect()),
            Bson::Document(doc) => Value::from(doc),
            other => Value::Bson(other),
        }
    }
}

impl From<&Bson> for Value {
    fn from(b: &Bson) -> Self {
        Value::from(b.clone())
    }
}

impl From<Document> for Value {
    fn from(doc: Document) -> Self {
        Value::Object(doc.into_iter().map(|(k, v)| (k, Value::from(v))).collect())
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<i32> for Value {
    fn from(i: i32) -> Self {
        Value::Int(i64::from(i))
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Int(i)
    }
}

impl From<usize> for Value {
    fn from(i: usize) -> Self {
        Value::Int(crate::utils::num::usize_to_i64_saturating(i))
    }
}

impl From<f64> for Value {
    fn from(d: f64) -> Self {
        Value::Double(d)
    }
}

impl From<Vec<Value>> for Value {
    fn from(items: Vec<Value>) -> Self {
        Value::Array(items)
    }
}

impl From<Map> for Value {
    fn from(map: Map) -> Self {
        Value::Object(map)
    }
}

impl From<SharedCursor> for Value {
    fn from(cursor: SharedCursor) -> Self {
        Value::Cursor(cursor)
    }
}

impl From<AccessContext> for Value {
    fn from(ac: AccessContext) -> Self {
        Value::Context(ac)
    }
}

impl From<Arc<Memo>> for Value {
    fn from(memo: Arc<Memo>) -> Self {
        Value::Memo(memo)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bson::{bson, doc};

    #[test]
    fn bson_numbers_collapse_to_int() {
        assert_eq!(Value::from(Bson::Int32(3)), Value::Int(3));
        assert_eq!(Value::Int(3).to_bson(), Bson::Int32(3));
        assert_eq!(Value::Int(i64::MAX).to_bson(), Bson::Int64(i64::MAX));
    }

    #[test]
    fn undefined_fields_are_dropped() {
        let mut map = Map::new();
        map.insert("a".into(), Value::Int(1));
        map.insert("b".into(), Value::Undefined);
        assert_eq!(Value::Object(map).to_bson(), bson!({ "a": 1 }));
    }

    #[test]
    fn literal_marks_only_containers() {
        assert!(Value::literal(Value::from(doc! { "a": 1 })).is_literal());
        assert!(!Value::literal(Value::Int(1)).is_literal());
        let lit = Value::literal(Value::Array(vec![Value::Int(1)]));
        assert_eq!(lit, Value::Array(vec![Value::Int(1)]));
        assert_eq!(lit.type_name(), "Array");
    }

    #[test]
    fn truthiness() {
        assert!(!Value::Int(0).is_truthy());
        assert!(!Value::String(String::new()).is_truthy());
        assert!(!Value::Double(f64::NAN).is_truthy());
        assert!(Value::Array(vec![]).is_truthy());
        assert!(Value::Object(Map::new()).is_truthy());
    }

    #[test]
    fn display_strings() {
        assert_eq!(Value::Double(3.0).to_display_string(), "3");
        assert_eq!(Value::Double(2.5).to_display_string(), "2.5");
        assert_eq!(
            Value::Array(vec![Value::Int(1), Value::Null, Value::from("x")]).to_display_string(),
            "1,,x"
        );
    }

    #[test]
    fn type_names() {
        assert_eq!(Value::from(Bson::DateTime(bson::DateTime::now())).type_name(), "Date");
        assert_eq!(Value::from(Bson::ObjectId(bson::oid::ObjectId::new())).type_name(), "ObjectId");
        assert_eq!(Value::Null.type_name(), "Null");
        assert_eq!(Value::from(true).type_name(), "Boolean");
    }
}
