//! Pipeline stages.
//!
//! A stage turns its input cursor into an output cursor. Parsing goes through a registry keyed by
//! the stage's `$`-name; evaluation builds an [`IterableCursor`] over a stage specific
//! [`CursorSource`]. `$$CURSOR` (the input) and `$$OUTPUT` (the result) are bound only while a pull
//! runs, so the stage's scope never owns its own cursors and a dropped pipeline is freed. Every
//! source pulls its upstream one item at a time, so nothing is read ahead of what the consumer
//! asks for.

/// Cursor sources share the release behaviour of [`StageRun`].
macro_rules! stage_source {
    ($ty:ty) => {
        #[async_trait::async_trait]
        impl crate::cursor::CursorSource for $ty {
            async fn pull(&mut self) -> crate::errors::Result<Option<crate::value::Value>> {
                self.next_item().await
            }

            async fn close(&mut self) -> crate::errors::Result<()> {
                self.run.release().await
            }
        }
    };
}

mod cursor;
mod group;
mod nested;
mod simple;
mod transform;
mod unwind;

pub use cursor::CursorStage;
pub use group::{GroupId, GroupStage};
pub use nested::NestedPipeline;
pub use transform::{TransformPhase, TransformStage};
pub use unwind::UnwindStage;

use super::context::ExpressionContext;
use super::expression::{EvalOptions, Expression, ExpressionKind, ExpressionRef, ParseFrame};
use super::variables::{CURSOR, OUTPUT, ROOT};
use crate::cursor::{CursorSource, IterableCursor, SharedCursor, WeakCursor, cast_cursor};
use crate::errors::Result;
use crate::utils::devlog::bench;
use crate::value::Value;
use bson::Bson;
use once_cell::sync::Lazy;
use serde_json::json;
use std::collections::HashMap;
use std::sync::{Arc, OnceLock};

#[derive(Clone)]
pub enum StageKind {
    Match(ExpressionRef),
    Project(ExpressionRef),
    Set(ExpressionRef),
    Unset(Arc<[String]>),
    Limit(usize),
    Skip(usize),
    /// Output field name.
    Count(String),
    Unwind(Arc<UnwindStage>),
    Group(Arc<GroupStage>),
    Transform(Arc<TransformStage>),
    Cursor(Arc<CursorStage>),
    Pipeline(Arc<NestedPipeline>),
}

pub struct Stage {
    name: &'static str,
    kind: StageKind,
}

type ParseFn = fn(&'static str, &Bson, &ParseFrame<'_>) -> Result<StageKind>;

static REGISTRY: Lazy<HashMap<&'static str, ParseFn>> = Lazy::new(|| {
    let mut registry: HashMap<&'static str, ParseFn> = HashMap::new();
    registry.insert("$match", simple::parse_match);
    registry.insert("$project", simple::parse_project);
    registry.insert("$set", simple::parse_set);
    registry.insert("$unset", simple::parse_unset);
    registry.insert("$limit", simple::parse_limit);
    registry.insert("$skip", simple::parse_skip);
    registry.insert("$count", simple::parse_count);
    registry.insert("$unwind", |name, raw, frame| {
        UnwindStage::parse(name, raw, frame).map(|s| StageKind::Unwind(Arc::new(s)))
    });
    registry.insert("$group", |name, raw, frame| {
        GroupStage::parse(name, raw, frame).map(|s| StageKind::Group(Arc::new(s)))
    });
    registry.insert("$transform", |name, raw, frame| {
        TransformStage::parse(name, raw, frame).map(|s| StageKind::Transform(Arc::new(s)))
    });
    registry.insert("$cursor", |name, raw, frame| {
        CursorStage::parse(name, raw, frame).map(|s| StageKind::Cursor(Arc::new(s)))
    });
    registry.insert("$pipeline", |name, raw, frame| {
        NestedPipeline::parse(name, raw, frame).map(|s| StageKind::Pipeline(Arc::new(s)))
    });
    registry
});

/// Whether `name` is a registered stage.
#[must_use]
pub fn is_stage(name: &str) -> bool {
    REGISTRY.contains_key(name)
}

/// Parses the stage at `path` of a pipeline. Stages own `$$ROOT`, `$$CURSOR` and `$$OUTPUT`.
pub(crate) fn parse_stage(raw: &Bson, parent: &ParseFrame<'_>, path: &str) -> Result<ExpressionRef> {
    let frame = parent.child(path)?;
    let entry = match raw {
        Bson::Document(doc) if doc.len() == 1 => doc.iter().next(),
        _ => None,
    };
    let Some((key, value)) = entry else {
        return Err(frame.error("A pipeline stage must be an object with a single key."));
    };
    let Some((&name, parse)) = REGISTRY.get_key_value(key.as_str()) else {
        return Err(frame.error(format!("Unsupported stage {key}")));
    };
    frame.register(ROOT);
    frame.register(CURSOR);
    frame.register(OUTPUT);
    let kind = parse(name, value, &frame).map_err(|e| e.with_path(frame.full_path()))?;
    Ok(Expression::build(&frame, raw, ExpressionKind::Stage(Stage { name, kind })))
}

impl Stage {
    #[must_use]
    pub fn name(&self) -> &'static str {
        self.name
    }

    #[must_use]
    pub fn kind(&self) -> &StageKind {
        &self.kind
    }

    /// Wraps the input cursor in this stage's output cursor.
    pub(crate) async fn evaluate(
        &self,
        expr: &ExpressionRef,
        ec: &ExpressionContext,
        options: EvalOptions,
    ) -> Result<Value> {
        let input = cast_cursor(options.input.unwrap_or_default())?;
        let bindings = Bindings { ec: ec.clone(), upstream: input.clone(), output: Arc::new(OnceLock::new()) };
        let output = bindings.output.clone();
        let run = StageRun { stage: self.name, ec: ec.clone(), upstream: input };
        let cursor = match &self.kind {
            StageKind::Match(_) | StageKind::Project(_) | StageKind::Set(_) | StageKind::Unset(_) => {
                self.output(bindings, simple::StepSource::new(run, self.kind.clone()))
            }
            StageKind::Limit(n) => self.output(bindings, simple::LimitSource::new(run, *n)),
            StageKind::Skip(n) => self.output(bindings, simple::SkipSource::new(run, *n)),
            StageKind::Count(field) => self.output(bindings, simple::CountSource::new(run, field.clone())),
            StageKind::Unwind(spec) => self.output(bindings, unwind::UnwindSource::new(run, spec.clone())),
            StageKind::Group(spec) => self.output(bindings, group::GroupSource::new(run, spec.clone())),
            StageKind::Transform(spec) => {
                self.output(bindings, transform::TransformSource::new(run, spec.clone()))
            }
            StageKind::Cursor(spec) => self.output(bindings, cursor::DriverSource::new(run, spec.clone())),
            StageKind::Pipeline(spec) => {
                let path = ec.get_full_path(expr);
                self.output(bindings, nested::NestedSource::new(run, spec.clone(), path))
            }
        };
        // Set once, right after construction; nothing has pulled yet.
        let _ = output.set(cursor.downgrade());
        log::trace!("stage {} opened at {}", self.name, ec.get_full_path(expr));
        Ok(Value::Cursor(cursor))
    }

    fn output<S: CursorSource + 'static>(&self, bindings: Bindings, source: S) -> SharedCursor {
        SharedCursor::new(IterableCursor::new(self.name, Bound { source, bindings, done: false }))
    }
}

/// What a stage binds while it pulls. The output is held weakly.
struct Bindings {
    ec: ExpressionContext,
    upstream: SharedCursor,
    output: Arc<OnceLock<WeakCursor>>,
}

impl Bindings {
    fn bind(&self) -> Result<()> {
        self.ec.set_variable(CURSOR, Value::Cursor(self.upstream.clone()))?;
        if let Some(output) = self.output.get().and_then(WeakCursor::upgrade) {
            self.ec.set_variable(OUTPUT, Value::Cursor(output))?;
        }
        Ok(())
    }

    fn unbind(&self) {
        for name in [CURSOR, OUTPUT] {
            if let Err(e) = self.ec.set_variable(name, Value::Undefined) {
                log::debug!("unbinding {name} failed: {e}");
            }
        }
    }
}

/// Binds `$$CURSOR` and `$$OUTPUT` around each pull of `source`. A stage dropped without being
/// closed still closes its upstream, on the current runtime when there is one.
struct Bound<S> {
    source: S,
    bindings: Bindings,
    done: bool,
}

#[async_trait::async_trait]
impl<S: CursorSource> CursorSource for Bound<S> {
    async fn pull(&mut self) -> Result<Option<Value>> {
        self.bindings.bind()?;
        let out = self.source.pull().await;
        self.bindings.unbind();
        out
    }

    async fn close(&mut self) -> Result<()> {
        self.done = true;
        self.source.close().await
    }
}

impl<S> Drop for Bound<S> {
    fn drop(&mut self) {
        if self.done {
            return;
        }
        let upstream = self.bindings.upstream.clone();
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    if let Err(e) = upstream.close().await {
                        log::debug!("closing upstream of a dropped stage failed: {e}");
                    }
                });
            }
            Err(_) => log::debug!("stage dropped outside a runtime, upstream released without close"),
        }
    }
}

/// State shared by every stage source: the stage's context and the cursor it reads from.
pub(crate) struct StageRun {
    stage: &'static str,
    ec: ExpressionContext,
    upstream: SharedCursor,
}

impl StageRun {
    /// Next upstream item, bound to `$$ROOT`.
    async fn pull_root(&mut self) -> Result<Option<Value>> {
        let item = self.upstream.next().await?;
        if let Some(item) = &item {
            self.ec.set_variable(ROOT, item.clone())?;
        }
        Ok(item)
    }

    /// Closes upstream. Close errors are logged, not returned.
    async fn release(&mut self) -> Result<()> {
        bench("stage", json!({ "stage": self.stage, "pulled": self.upstream.position() }));
        if let Err(e) = self.upstream.close().await {
            log::debug!("closing upstream of {} failed: {e}", self.stage);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expressions::expression::ParseOptions;
    use bson::bson;

    #[test]
    fn stages_register_their_variables() {
        let root = ParseFrame::root(ParseOptions::default());
        let stage = parse_stage(&bson!({ "$match": "$$CURSOR" }), &root, "0").unwrap();
        assert_eq!(stage.full_path(), "0");
        assert!(stage.registered().iter().any(|v| v == OUTPUT));
        assert!(matches!(stage.kind(), ExpressionKind::Stage(s) if s.name() == "$match"));
    }

    #[test]
    fn rejects_unknown_and_malformed_stages() {
        let root = ParseFrame::root(ParseOptions::default());
        let err = parse_stage(&bson!({ "$sort": { "a": 1 } }), &root, "2").err().unwrap();
        assert_eq!(err.path(), Some("2"));
        assert!(err.reason().contains("Unsupported stage $sort"));
        assert!(parse_stage(&bson!({ "$match": true, "$project": 1 }), &root, "0").is_err());
        assert!(parse_stage(&bson!("$match"), &root, "0").is_err());
    }
}
