//! `$match`, `$project`, `$set`, `$unset`, `$limit`, `$skip` and `$count`.

use super::{StageKind, StageRun};
use crate::expressions::expression::{EvalOptions, Evaluate, ParseFrame};
use crate::expressions::factory::guess;
use crate::expressions::rules::{self, Noun};
use crate::errors::Result;
use crate::pather::{Pather, normalize_path};
use crate::value::{Map, Value};
use bson::Bson;
use once_cell::sync::Lazy;
use std::sync::Arc;

static SANDBOX_PATHER: Lazy<Pather> = Lazy::new(Pather::sandbox);

pub(super) fn parse_match(name: &'static str, raw: &Bson, frame: &ParseFrame<'_>) -> Result<StageKind> {
    Ok(StageKind::Match(guess(raw, frame, name)?))
}

pub(super) fn parse_project(name: &'static str, raw: &Bson, frame: &ParseFrame<'_>) -> Result<StageKind> {
    Ok(StageKind::Project(guess(raw, frame, name)?))
}

pub(super) fn parse_set(name: &'static str, raw: &Bson, frame: &ParseFrame<'_>) -> Result<StageKind> {
    rules::value_must_be_object_with_substance(frame, Noun::Stage, name, raw, "")?;
    Ok(StageKind::Set(guess(raw, frame, name)?))
}

pub(super) fn parse_unset(name: &'static str, raw: &Bson, frame: &ParseFrame<'_>) -> Result<StageKind> {
    let raw_paths: Vec<&Bson> = match raw {
        Bson::Array(items) => items.iter().collect(),
        other => vec![other],
    };
    if raw_paths.is_empty() {
        return Err(frame.error(format!("Stage {name} requires at least one path.")));
    }
    let mut paths = Vec::with_capacity(raw_paths.len());
    for (i, raw) in raw_paths.into_iter().enumerate() {
        let path = match raw {
            Bson::String(s) => normalize_path(s),
            _ => String::new(),
        };
        if path.is_empty() || path.starts_with('$') {
            return Err(frame.error_at(&i.to_string(), format!("Stage {name} expects field paths.")));
        }
        paths.push(path);
    }
    Ok(StageKind::Unset(Arc::from(paths)))
}

/// A strictly positive integer.
fn positive_integer(name: &str, raw: &Bson, frame: &ParseFrame<'_>) -> Result<usize> {
    let n = match raw {
        Bson::Int32(i) => i64::from(*i),
        Bson::Int64(i) => *i,
        Bson::Double(d) => crate::utils::num::f64_to_i64_exact(*d).unwrap_or(0),
        _ => 0,
    };
    match usize::try_from(n) {
        Ok(n) if n > 0 => Ok(n),
        _ => Err(frame.error(format!("Stage {name} requires a positive integer."))),
    }
}

pub(super) fn parse_limit(name: &'static str, raw: &Bson, frame: &ParseFrame<'_>) -> Result<StageKind> {
    positive_integer(name, raw, frame).map(StageKind::Limit)
}

pub(super) fn parse_skip(name: &'static str, raw: &Bson, frame: &ParseFrame<'_>) -> Result<StageKind> {
    positive_integer(name, raw, frame).map(StageKind::Skip)
}

pub(super) fn parse_count(name: &'static str, raw: &Bson, frame: &ParseFrame<'_>) -> Result<StageKind> {
    match raw {
        Bson::String(field) if !field.is_empty() && !field.starts_with('$') && !field.contains('.') => {
            Ok(StageKind::Count(field.clone()))
        }
        _ => Err(frame.error(format!("Stage {name} requires a field name."))),
    }
}

/// Per item stages. `None` drops the item without ending the cursor.
pub(super) struct StepSource {
    run: StageRun,
    kind: StageKind,
}

impl StepSource {
    pub(super) fn new(run: StageRun, kind: StageKind) -> Self {
        Self { run, kind }
    }

    async fn step(&self, root: Value) -> Result<Option<Value>> {
        let ec = &self.run.ec;
        Ok(match &self.kind {
            StageKind::Match(test) => test.evaluate(ec, EvalOptions::default()).await?.is_truthy().then_some(root),
            StageKind::Project(inner) => {
                let value = inner.evaluate(ec, EvalOptions::default()).await?;
                (!value.is_undefined()).then_some(value)
            }
            StageKind::Set(inner) => {
                let value = inner.evaluate(ec, EvalOptions::default()).await?.into_unmarked();
                match (root.into_unmarked(), value) {
                    (Value::Object(mut map), Value::Object(fields)) => {
                        for (key, field) in fields {
                            if !field.is_undefined() {
                                map.insert(key, field);
                            }
                        }
                        Some(Value::Object(map))
                    }
                    (root, _) => Some(root),
                }
            }
            StageKind::Unset(paths) => {
                let mut root = root.into_unmarked();
                for path in paths.iter() {
                    if !SANDBOX_PATHER.unset(&mut root, path) {
                        log::trace!("$unset skipped {path}");
                    }
                }
                Some(root)
            }
            _ => Some(root),
        })
    }

    async fn next_item(&mut self) -> Result<Option<Value>> {
        while let Some(root) = self.run.pull_root().await? {
            if let Some(out) = self.step(root).await? {
                return Ok(Some(out));
            }
        }
        Ok(None)
    }
}

stage_source!(StepSource);

pub(super) struct LimitSource {
    run: StageRun,
    remaining: usize,
}

impl LimitSource {
    pub(super) fn new(run: StageRun, limit: usize) -> Self {
        Self { run, remaining: limit }
    }

    async fn next_item(&mut self) -> Result<Option<Value>> {
        if self.remaining == 0 {
            return Ok(None);
        }
        let item = self.run.upstream.next().await?;
        if item.is_some() {
            self.remaining -= 1;
        }
        Ok(item)
    }
}

stage_source!(LimitSource);

pub(super) struct SkipSource {
    run: StageRun,
    skip: usize,
}

impl SkipSource {
    pub(super) fn new(run: StageRun, skip: usize) -> Self {
        Self { run, skip }
    }

    async fn next_item(&mut self) -> Result<Option<Value>> {
        while self.skip > 0 {
            if self.run.upstream.next().await?.is_none() {
                return Ok(None);
            }
            self.skip -= 1;
        }
        self.run.upstream.next().await
    }
}

stage_source!(SkipSource);

/// Drains upstream, then emits `{ <field>: count }` once.
pub(super) struct CountSource {
    run: StageRun,
    field: String,
    done: bool,
}

impl CountSource {
    pub(super) fn new(run: StageRun, field: String) -> Self {
        Self { run, field, done: false }
    }

    async fn next_item(&mut self) -> Result<Option<Value>> {
        if self.done {
            return Ok(None);
        }
        let mut count = 0usize;
        while let Some(item) = self.run.upstream.next().await? {
            if !item.is_undefined() {
                count += 1;
            }
        }
        self.done = true;
        let mut out = Map::new();
        out.insert(self.field.clone(), Value::from(count));
        Ok(Some(Value::Object(out)))
    }
}

stage_source!(CountSource);

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expressions::expression::ParseOptions;
    use bson::bson;

    #[test]
    fn limits_and_skips_need_positive_integers() {
        let frame = ParseFrame::root(ParseOptions::default());
        assert!(matches!(parse_limit("$limit", &bson!(3), &frame).unwrap(), StageKind::Limit(3)));
        assert!(matches!(parse_skip("$skip", &bson!(2.0), &frame).unwrap(), StageKind::Skip(2)));
        for bad in [bson!(0), bson!(-1), bson!(1.5), bson!("1")] {
            assert!(parse_limit("$limit", &bad, &frame).is_err());
        }
    }

    #[test]
    fn count_and_unset_shapes() {
        let frame = ParseFrame::root(ParseOptions::default());
        assert!(parse_count("$count", &bson!("total"), &frame).is_ok());
        assert!(parse_count("$count", &bson!("$total"), &frame).is_err());
        assert!(parse_count("$count", &bson!("a.b"), &frame).is_err());
        let StageKind::Unset(paths) = parse_unset("$unset", &bson!(["a", "b.c"]), &frame).unwrap() else {
            panic!("unset")
        };
        assert_eq!(paths.len(), 2);
        let err = parse_unset("$unset", &bson!(["a", 1]), &frame).err().unwrap();
        assert_eq!(err.path(), Some("1"));
        assert!(parse_unset("$unset", &bson!([]), &frame).is_err());
    }
}
