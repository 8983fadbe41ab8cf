//! Dotted-path reads and writes over [`Value`] trees.
//!
//! Paths are split on `.`; numeric segments index arrays and `length` reads the length of arrays
//! and strings. Segments named in the filter can never be read, written or removed.

use crate::value::{Map, Value};
use std::borrow::Cow;
use std::sync::Arc;

const DANGEROUS_KEYS: [&str; 3] = ["__proto__", "constructor", "prototype"];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PatherOptions {
    /// Only plain data may be traversed, written into or returned.
    pub limit_to_primitives: bool,
    /// With `limit_to_primitives`, still return raw BSON values (dates, ids, binary).
    pub allow_serializable_objects: bool,
    /// With `limit_to_primitives`, still return access subjects.
    pub allow_access_subjects: bool,
    /// Path segments that are never followed.
    pub filter: Vec<String>,
}

impl Default for PatherOptions {
    fn default() -> Self {
        Self {
            limit_to_primitives: false,
            allow_serializable_objects: true,
            allow_access_subjects: false,
            filter: DANGEROUS_KEYS.iter().map(|s| (*s).to_string()).collect(),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct Pather {
    options: PatherOptions,
}

/// Splits a dotted path. The empty path has no segments.
#[must_use]
pub fn split_path(path: &str) -> Vec<&str> {
    if path.is_empty() { Vec::new() } else { path.split('.').collect() }
}

/// Trims whitespace and stray dots from a path, dropping empty segments.
#[must_use]
pub fn normalize_path(path: &str) -> String {
    path.trim().split('.').map(str::trim).filter(|s| !s.is_empty()).collect::<Vec<_>>().join(".")
}

fn parse_index(key: &str) -> Option<usize> {
    if key.is_empty() || !key.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    key.parse::<usize>().ok()
}

fn unmark_mut(obj: &mut Value) -> &mut Value {
    match obj {
        Value::Literal(inner) => Arc::make_mut(inner),
        other => other,
    }
}

impl Pather {
    #[must_use]
    pub fn new(options: PatherOptions) -> Self {
        Self { options }
    }

    /// Follows anything, filters nothing.
    #[must_use]
    pub fn permissive() -> Self {
        Self::new(PatherOptions {
            limit_to_primitives: false,
            allow_serializable_objects: true,
            allow_access_subjects: true,
            filter: Vec::new(),
        })
    }

    /// Any value may be returned, dangerous keys are filtered.
    #[must_use]
    pub fn legacy() -> Self {
        Self::new(PatherOptions::default())
    }

    /// Plain data only, dangerous keys filtered. Used for script facing memos.
    #[must_use]
    pub fn sandbox() -> Self {
        Self::new(PatherOptions { limit_to_primitives: true, ..PatherOptions::default() })
    }

    /// The reader expression contexts use on plain values.
    #[must_use]
    pub fn expression() -> Self {
        Self::new(PatherOptions {
            limit_to_primitives: false,
            allow_serializable_objects: true,
            allow_access_subjects: true,
            filter: Vec::new(),
        })
    }

    #[must_use]
    pub fn options(&self) -> &PatherOptions {
        &self.options
    }

    fn filtered(&self, key: &str) -> bool {
        self.options.filter.iter().any(|f| f == key)
    }

    fn can_output(&self, v: &Value) -> bool {
        if !self.options.limit_to_primitives {
            return true;
        }
        match v {
            Value::Undefined
            | Value::Null
            | Value::Bool(_)
            | Value::Int(_)
            | Value::Double(_)
            | Value::String(_)
            | Value::Array(_)
            | Value::Object(_)
            | Value::Literal(_) => true,
            Value::Bson(_) => self.options.allow_serializable_objects,
            Value::Subject(_) => self.options.allow_access_subjects,
            Value::Context(_) | Value::Cursor(_) | Value::Memo(_) => false,
        }
    }

    fn child<'a>(&self, obj: &'a Value, key: &str) -> Option<Cow<'a, Value>> {
        if self.filtered(key) {
            return None;
        }
        match obj {
            Value::Literal(inner) => self.child(inner.as_ref(), key),
            Value::Object(map) => map.get(key).map(Cow::Borrowed),
            Value::Array(items) => {
                if key == "length" {
                    return Some(Cow::Owned(Value::from(items.len())));
                }
                parse_index(key).and_then(|i| items.get(i)).map(Cow::Borrowed)
            }
            Value::String(s) => {
                if key == "length" {
                    return Some(Cow::Owned(Value::from(s.chars().count())));
                }
                parse_index(key)
                    .and_then(|i| s.chars().nth(i))
                    .map(|c| Cow::Owned(Value::String(c.to_string())))
            }
            _ => None,
        }
    }

    /// Reads `path` from `obj`. Missing segments yield undefined; hitting null mid-way yields null.
    #[must_use]
    pub fn read(&self, obj: &Value, path: &str) -> Value {
        self.read_parts(obj, &split_path(path))
    }

    #[must_use]
    pub fn read_parts(&self, obj: &Value, parts: &[&str]) -> Value {
        let mut current: Cow<'_, Value> = Cow::Borrowed(obj);
        for key in parts {
            if current.is_nullish() {
                break;
            }
            let next = match &current {
                Cow::Borrowed(v) => self.child(*v, key),
                Cow::Owned(v) => self.child(v, key).map(|c| Cow::Owned(c.into_owned())),
            };
            match next {
                Some(v) => current = v,
                None => return Value::Undefined,
            }
        }
        let out = current.into_owned();
        if self.can_output(&out) { out } else { Value::Undefined }
    }

    /// Writes `value` at `path`, creating intermediate objects. Returns the written value, or
    /// undefined when the write was refused.
    pub fn write(&self, obj: &mut Value, path: &str, value: Value) -> Value {
        let parts = split_path(path);
        if parts.is_empty() || obj.is_nullish() || parts.iter().any(|p| self.filtered(p)) {
            return Value::Undefined;
        }
        self.write_into(obj, &parts, value).unwrap_or_default()
    }

    /// Like [`Pather::write`] but returns the top level object.
    pub fn write_top(&self, obj: &mut Value, path: &str, value: Value) -> Value {
        if self.write(obj, path, value).is_undefined() {
            return Value::Undefined;
        }
        obj.clone()
    }

    fn write_into(&self, obj: &mut Value, parts: &[&str], value: Value) -> Option<Value> {
        let (key, rest) = parts.split_first()?;
        let container = unmark_mut(obj);
        if !matches!(container, Value::Object(_) | Value::Array(_)) {
            return None;
        }
        if rest.is_empty() {
            if !self.can_output(&value) {
                return None;
            }
            return match container {
                Value::Object(map) => {
                    map.insert((*key).to_string(), value.clone());
                    Some(value)
                }
                Value::Array(items) => {
                    let idx = parse_index(key)?;
                    if idx < items.len() {
                        items[idx] = value.clone();
                    } else if idx == items.len() {
                        items.push(value.clone());
                    } else {
                        return None;
                    }
                    Some(value)
                }
                _ => None,
            };
        }
        let child: &mut Value = match container {
            Value::Object(map) => {
                let slot = map.entry((*key).to_string()).or_insert(Value::Undefined);
                if slot.is_nullish() {
                    *slot = Value::Object(Map::new());
                }
                slot
            }
            Value::Array(items) => {
                let idx = parse_index(key)?;
                if idx == items.len() {
                    items.push(Value::Object(Map::new()));
                }
                let slot = items.get_mut(idx)?;
                if slot.is_nullish() {
                    *slot = Value::Object(Map::new());
                }
                slot
            }
            _ => return None,
        };
        self.write_into(child, rest, value)
    }

    /// Removes the value at `path`. Array elements become undefined rather than shifting.
    pub fn unset(&self, obj: &mut Value, path: &str) -> bool {
        let parts = split_path(path);
        if parts.is_empty() || parts.iter().any(|p| self.filtered(p)) {
            return false;
        }
        Self::unset_in(obj, &parts)
    }

    fn unset_in(obj: &mut Value, parts: &[&str]) -> bool {
        let Some((key, rest)) = parts.split_first() else {
            return false;
        };
        let container = unmark_mut(obj);
        if rest.is_empty() {
            return match container {
                Value::Object(map) => map.shift_remove(*key).is_some(),
                Value::Array(items) => match parse_index(key).and_then(|i| items.get_mut(i)) {
                    Some(slot) => {
                        *slot = Value::Undefined;
                        true
                    }
                    None => false,
                },
                _ => false,
            };
        }
        let child = match container {
            Value::Object(map) => map.get_mut(*key),
            Value::Array(items) => parse_index(key).and_then(|i| items.get_mut(i)),
            _ => None,
        };
        match child {
            Some(c) => Self::unset_in(c, rest),
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bson::doc;

    #[test]
    fn reads_nested_and_indexed() {
        let v = Value::from(doc! { "a": { "b": [10, 20, { "c": "x" }] } });
        let p = Pather::legacy();
        assert_eq!(p.read(&v, "a.b.1"), Value::Int(20));
        assert_eq!(p.read(&v, "a.b.2.c"), Value::from("x"));
        assert_eq!(p.read(&v, "a.b.length"), Value::Int(3));
        assert_eq!(p.read(&v, "a.b.2.c.length"), Value::Int(1));
        assert!(p.read(&v, "a.z.q").is_undefined());
    }

    #[test]
    fn null_mid_path_reads_null() {
        let v = Value::from(doc! { "a": null });
        assert_eq!(Pather::legacy().read(&v, "a.b.c"), Value::Null);
    }

    #[test]
    fn filtered_segments_are_refused() {
        let mut v = Value::from(doc! { "a": {} });
        let p = Pather::legacy();
        assert!(p.write(&mut v, "a.__proto__.polluted", Value::Bool(true)).is_undefined());
        assert_eq!(v, Value::from(doc! { "a": {} }));
        assert!(p.read(&v, "constructor").is_undefined());
        assert!(!p.unset(&mut v, "__proto__"));
    }

    #[test]
    fn write_creates_intermediates() {
        let mut v = Value::Object(Map::new());
        let p = Pather::sandbox();
        assert_eq!(p.write(&mut v, "a.b.c", Value::Int(1)), Value::Int(1));
        assert_eq!(p.read(&v, "a.b.c"), Value::Int(1));
        let top = p.write_top(&mut v, "a.d", Value::from("x"));
        assert_eq!(top, Value::from(doc! { "a": { "b": { "c": 1 }, "d": "x" } }));
    }

    #[test]
    fn write_into_literal_copies_on_write() {
        let shared = Value::literal(Value::from(doc! { "a": 1 }));
        let mut copy = shared.clone();
        Pather::legacy().write(&mut copy, "b", Value::Int(2));
        assert_eq!(shared, Value::from(doc! { "a": 1 }));
        assert_eq!(copy, Value::from(doc! { "a": 1, "b": 2 }));
    }

    #[test]
    fn sandbox_refuses_non_plain_values() {
        let mut v = Value::Object(Map::new());
        let memo = Arc::new(crate::memo::Memo::new(crate::memo::MemoOptions::default()));
        assert!(Pather::sandbox().write(&mut v, "m", Value::Memo(memo.clone())).is_undefined());
        assert!(!Pather::legacy().write(&mut v, "m", Value::Memo(memo)).is_undefined());
        assert!(Pather::sandbox().read(&v, "m").is_undefined());
    }

    #[test]
    fn unset_removes_keys() {
        let mut v = Value::from(doc! { "a": { "b": 1, "c": 2 } });
        let p = Pather::legacy();
        assert!(p.unset(&mut v, "a.b"));
        assert!(!p.unset(&mut v, "a.zz"));
        assert_eq!(v, Value::from(doc! { "a": { "c": 2 } }));
    }

    #[test]
    fn normalizes_paths() {
        assert_eq!(normalize_path(" .a..b. "), "a.b");
        assert_eq!(normalize_path(""), "");
    }
}
