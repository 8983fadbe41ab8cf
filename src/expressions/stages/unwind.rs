//! `$unwind`: one output document per element of an array field.

use super::StageRun;
use crate::expressions::expression::ParseFrame;
use crate::expressions::rules::{self, Noun};
use crate::errors::Result;
use crate::pather::{Pather, normalize_path};
use crate::value::Value;
use bson::Bson;
use once_cell::sync::Lazy;
use std::sync::Arc;

static PATHER: Lazy<Pather> = Lazy::new(Pather::legacy);

/// `'$path'` or `{ path, includeArrayIndex, preserveNullAndEmptyArrays }`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnwindStage {
    path: String,
    include_array_index: Option<String>,
    preserve_null_and_empty_arrays: bool,
}

fn field_path(raw: Option<&Bson>) -> Option<String> {
    match raw {
        Some(Bson::String(s)) if s.starts_with('$') && !s.starts_with("$$") => {
            let path = normalize_path(&s[1..]);
            (!path.is_empty()).then_some(path)
        }
        _ => None,
    }
}

impl UnwindStage {
    pub(super) fn parse(name: &'static str, raw: &Bson, frame: &ParseFrame<'_>) -> Result<Self> {
        if let Bson::String(_) = raw {
            let path = field_path(Some(raw))
                .ok_or_else(|| frame.error(format!("Stage {name} requires a field path starting with $.")))?;
            return Ok(Self { path, include_array_index: None, preserve_null_and_empty_arrays: false });
        }
        let doc = rules::value_must_be_object_with_substance(frame, Noun::Stage, name, raw, "")?;
        for key in doc.keys() {
            if !matches!(key.as_str(), "path" | "includeArrayIndex" | "preserveNullAndEmptyArrays") {
                return Err(frame.error_at(key, format!("Stage {name} does not support option {key}.")));
            }
        }
        let path = field_path(doc.get("path"))
            .ok_or_else(|| frame.error_at("path", format!("Stage {name} requires a field path starting with $.")))?;
        let include_array_index = match doc.get("includeArrayIndex") {
            None | Some(Bson::Null) => None,
            Some(Bson::String(field)) => {
                rules::must_be_user_variable_format(frame, Noun::Stage, name, field, "includeArrayIndex")?;
                Some(field.clone())
            }
            Some(_) => {
                return Err(frame.error_at("includeArrayIndex", format!("Stage {name} expects a field name.")));
            }
        };
        let preserve_null_and_empty_arrays = match doc.get("preserveNullAndEmptyArrays") {
            None | Some(Bson::Null) => false,
            Some(Bson::Boolean(b)) => *b,
            Some(_) => {
                return Err(frame.error_at("preserveNullAndEmptyArrays", format!("Stage {name} expects a boolean.")));
            }
        };
        Ok(Self { path, include_array_index, preserve_null_and_empty_arrays })
    }

    /// `root` with the unwound field replaced by `element`.
    fn emit(&self, root: &Value, element: Option<Value>, index: Option<usize>) -> Value {
        let mut out = root.clone().into_unmarked();
        match element {
            Some(element) => {
                PATHER.write(&mut out, &self.path, element);
            }
            None => {
                PATHER.unset(&mut out, &self.path);
            }
        }
        if let Some(field) = &self.include_array_index {
            let index = index.map_or(Value::Null, Value::from);
            PATHER.write(&mut out, field, index);
        }
        out
    }
}

struct Unwinding {
    root: Value,
    items: std::vec::IntoIter<Value>,
    index: usize,
}

/// Remembers the document being unwound and where in its array it is.
pub(super) struct UnwindSource {
    run: StageRun,
    spec: Arc<UnwindStage>,
    current: Option<Unwinding>,
}

impl UnwindSource {
    pub(super) fn new(run: StageRun, spec: Arc<UnwindStage>) -> Self {
        Self { run, spec, current: None }
    }

    async fn next_item(&mut self) -> Result<Option<Value>> {
        loop {
            if let Some(current) = &mut self.current {
                if let Some(element) = current.items.next() {
                    let index = current.index;
                    current.index += 1;
                    return Ok(Some(self.spec.emit(&current.root, Some(element), Some(index))));
                }
                self.current = None;
            }
            let Some(root) = self.run.pull_root().await? else {
                return Ok(None);
            };
            match PATHER.read(&root, &self.spec.path).into_unmarked() {
                Value::Array(items) if !items.is_empty() => {
                    self.current = Some(Unwinding { root, items: items.into_iter(), index: 0 });
                }
                value if value.is_nullish() || value.is_array() => {
                    if self.spec.preserve_null_and_empty_arrays {
                        let keep = matches!(value, Value::Null).then_some(Value::Null);
                        return Ok(Some(self.spec.emit(&root, keep, None)));
                    }
                }
                value => return Ok(Some(self.spec.emit(&root, Some(value), None))),
            }
        }
    }
}

stage_source!(UnwindSource);

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expressions::expression::ParseOptions;
    use bson::{bson, doc};

    #[test]
    fn parses_both_forms() {
        let frame = ParseFrame::root(ParseOptions::default());
        let short = UnwindStage::parse("$unwind", &bson!("$tags"), &frame).unwrap();
        assert_eq!(short.path, "tags");
        let long = UnwindStage::parse(
            "$unwind",
            &bson!({ "path": "$a.b", "includeArrayIndex": "i", "preserveNullAndEmptyArrays": true }),
            &frame,
        )
        .unwrap();
        assert_eq!(long.include_array_index.as_deref(), Some("i"));
        assert!(long.preserve_null_and_empty_arrays);
        assert!(UnwindStage::parse("$unwind", &bson!("tags"), &frame).is_err());
        let err = UnwindStage::parse("$unwind", &bson!({ "path": "$a", "x": 1 }), &frame).err().unwrap();
        assert_eq!(err.path(), Some("x"));
    }

    #[test]
    fn emits_with_index() {
        let frame = ParseFrame::root(ParseOptions::default());
        let spec = UnwindStage::parse("$unwind", &bson!({ "path": "$t", "includeArrayIndex": "i" }), &frame).unwrap();
        let root = Value::from(doc! { "t": [1, 2] });
        let out = spec.emit(&root, Some(Value::Int(2)), Some(1));
        assert_eq!(out, Value::from(doc! { "t": 2, "i": 1 }));
    }
}
