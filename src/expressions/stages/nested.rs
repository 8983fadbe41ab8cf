//! `$pipeline`: runs another pipeline from inside this one.
//!
//! An inline array of stages reads this stage's input directly. A named runtime pipeline
//! (`'c_name'` or `{ name, as }`) runs once per upstream item, fed with that item or whatever
//! `as` evaluates to, and everything it emits is passed on before the next item is read.

use super::StageRun;
use crate::cursor::{SharedCursor, cast_cursor};
use crate::errors::Result;
use crate::expressions::expression::{EvalOptions, Evaluate, ExpressionRef, ParseFrame};
use crate::expressions::factory::{guess, guess_pipeline};
use crate::expressions::runtime::{Definition, is_custom_name};
use crate::expressions::variables::ROOT;
use crate::value::Value;
use bson::Bson;
use std::sync::Arc;

pub enum NestedPipeline {
    Inline(ExpressionRef),
    Named { name: String, root: Option<ExpressionRef> },
}

impl NestedPipeline {
    pub(super) fn parse(name: &'static str, raw: &Bson, frame: &ParseFrame<'_>) -> Result<Self> {
        match raw {
            Bson::Array(_) => Ok(Self::Inline(guess_pipeline(raw, frame, name)?)),
            Bson::String(s) if is_custom_name(s) => Ok(Self::Named { name: s.clone(), root: None }),
            Bson::Document(doc) => {
                for key in doc.keys() {
                    if key != "name" && key != "as" {
                        return Err(frame.error_at(key, format!("Stage {name} does not support option {key}.")));
                    }
                }
                let pipeline = match doc.get("name") {
                    Some(Bson::String(s)) if is_custom_name(s) => s.clone(),
                    _ => {
                        return Err(frame.error_at("name", format!("Stage {name} requires a custom pipeline name.")));
                    }
                };
                let root = doc.get("as").map(|raw| guess(raw, frame, &format!("{name}.as"))).transpose()?;
                Ok(Self::Named { name: pipeline, root })
            }
            _ => Err(frame.error(format!("Stage {name} expects a pipeline name or an array of stages."))),
        }
    }
}

pub(super) struct NestedSource {
    run: StageRun,
    spec: Arc<NestedPipeline>,
    path: String,
    current: Option<SharedCursor>,
    started: bool,
}

impl NestedSource {
    pub(super) fn new(run: StageRun, spec: Arc<NestedPipeline>, path: String) -> Self {
        Self { run, spec, path, current: None, started: false }
    }

    /// Output of the named pipeline for one upstream item.
    async fn open_named(&self, name: &str, root: Option<&ExpressionRef>, item: Value) -> Result<SharedCursor> {
        let input = match root {
            Some(root) => root.evaluate(&self.run.ec, EvalOptions::default()).await?,
            None => item,
        };
        let org = self.run.ec.ac().org();
        let compiled = self.run.ec.engine().resolve_pipeline(&org, Definition::Named(name.to_string())).await?;
        let child = self.run.ec.runtime_child(&self.path, &compiled, &self.path)?;
        child.set_variable(ROOT, input.clone())?;
        cast_cursor(child.evaluate(EvalOptions::with_input(Value::Array(vec![input]))).await?)
    }

    async fn next_item(&mut self) -> Result<Option<Value>> {
        let spec = self.spec.clone();
        match spec.as_ref() {
            NestedPipeline::Inline(pipeline) => {
                if !self.started {
                    self.started = true;
                    let input = Value::Cursor(self.run.upstream.clone());
                    let output = pipeline.evaluate(&self.run.ec, EvalOptions::with_input(input)).await?;
                    self.current = Some(cast_cursor(output)?);
                }
                match &self.current {
                    Some(cursor) => cursor.next().await,
                    None => Ok(None),
                }
            }
            NestedPipeline::Named { name, root } => loop {
                if let Some(cursor) = &self.current {
                    if let Some(item) = cursor.next().await? {
                        return Ok(Some(item));
                    }
                    cursor.close().await?;
                    self.current = None;
                }
                let Some(item) = self.run.pull_root().await? else {
                    return Ok(None);
                };
                self.current = Some(self.open_named(name, root.as_ref(), item).await?);
            },
        }
    }
}

#[async_trait::async_trait]
impl crate::cursor::CursorSource for NestedSource {
    async fn pull(&mut self) -> Result<Option<Value>> {
        self.next_item().await
    }

    async fn close(&mut self) -> Result<()> {
        if let Some(cursor) = self.current.take() {
            if let Err(e) = cursor.close().await {
                log::debug!("closing nested pipeline at {} failed: {e}", self.path);
            }
        }
        self.run.release().await
    }
}
