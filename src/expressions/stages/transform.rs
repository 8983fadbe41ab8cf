//! `$transform`: `{ vars, before, each, after }`.
//!
//! `vars` are assigned once before anything else runs. `before` runs once ahead of the first
//! upstream item and `after` once after the last; `each` runs per item. Every phase assigns its
//! `set` variables in order, then emits its `in` value. Undefined results emit nothing.

use super::StageRun;
use crate::expressions::expression::{EvalOptions, Evaluate, ExpressionRef, ParseFrame};
use crate::expressions::factory::guess;
use crate::expressions::rules::{self, Noun};
use crate::expressions::variables::ROOT;
use crate::errors::Result;
use crate::value::Value;
use bson::Bson;
use std::sync::Arc;

pub struct TransformPhase {
    set: Vec<(String, ExpressionRef)>,
    inner: Option<ExpressionRef>,
}

impl TransformPhase {
    fn parse(name: &'static str, raw: &Bson, frame: &ParseFrame<'_>, path: &str) -> Result<Self> {
        let doc = rules::value_must_be_object_with_substance(frame, Noun::Stage, name, raw, path)?;
        let set = match doc.get("set") {
            None | Some(Bson::Null) => Vec::new(),
            Some(raw) => {
                let set_path = format!("{path}.set");
                let vars = rules::parse_user_variables(frame, name, raw, &set_path, false)?;
                for (var, _) in &vars {
                    if !frame.is_registered(var) {
                        return Err(frame.error_at(&set_path, format!("User variable {var} not found in {name}.")));
                    }
                }
                vars
            }
        };
        let inner = match doc.get("in") {
            None | Some(Bson::Null) => None,
            Some(raw) => Some(guess(raw, frame, &format!("{path}.in"))?),
        };
        Ok(Self { set, inner })
    }

    /// Runs the phase. `fallback` is emitted when there is no `in`.
    async fn run(&self, run: &StageRun, fallback: Value) -> Result<Option<Value>> {
        for (name, expr) in &self.set {
            let value = expr.evaluate(&run.ec, EvalOptions::default()).await?;
            run.ec.set_variable(name, value)?;
        }
        let result = match &self.inner {
            Some(inner) => inner.evaluate(&run.ec, EvalOptions::default()).await?,
            None => fallback,
        };
        Ok((!result.is_undefined()).then_some(result))
    }
}

pub struct TransformStage {
    vars: Vec<(String, ExpressionRef)>,
    before: Option<TransformPhase>,
    each: Option<TransformPhase>,
    after: Option<TransformPhase>,
}

impl TransformStage {
    pub(super) fn parse(name: &'static str, raw: &Bson, frame: &ParseFrame<'_>) -> Result<Self> {
        let doc = rules::value_must_be_object(frame, Noun::Stage, name, raw, "")?;
        let vars = match doc.get("vars") {
            None | Some(Bson::Null) => Vec::new(),
            Some(raw) => rules::parse_user_variables(frame, name, raw, &format!("{name}.vars"), true)?,
        };
        let phase = |key: &str| -> Result<Option<TransformPhase>> {
            match doc.get(key) {
                None | Some(Bson::Null) => Ok(None),
                Some(raw) => TransformPhase::parse(name, raw, frame, &format!("{name}.{key}")).map(Some),
            }
        };
        let stage = Self { vars, before: phase("before")?, each: phase("each")?, after: phase("after")? };
        if stage.before.is_none() && stage.each.is_none() && stage.after.is_none() {
            return Err(frame.error(format!("Stage {name} expects an object with properties.")));
        }
        Ok(stage)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Before,
    Each,
    After,
    Done,
}

pub(super) struct TransformSource {
    run: StageRun,
    spec: Arc<TransformStage>,
    phase: Phase,
}

impl TransformSource {
    pub(super) fn new(run: StageRun, spec: Arc<TransformStage>) -> Self {
        Self { run, spec, phase: Phase::Before }
    }

    async fn next_item(&mut self) -> Result<Option<Value>> {
        loop {
            match self.phase {
                Phase::Before => {
                    self.phase = Phase::Each;
                    self.run.ec.set_variable(ROOT, Value::Undefined)?;
                    for (name, expr) in &self.spec.vars {
                        let value = expr.evaluate(&self.run.ec, EvalOptions::default()).await?;
                        self.run.ec.set_variable(name, value)?;
                    }
                    if let Some(before) = &self.spec.before {
                        if let Some(out) = before.run(&self.run, Value::Undefined).await? {
                            return Ok(Some(out));
                        }
                    }
                }
                Phase::Each => {
                    let Some(item) = self.run.pull_root().await? else {
                        self.phase = Phase::After;
                        continue;
                    };
                    let out = match &self.spec.each {
                        Some(each) => each.run(&self.run, item).await?,
                        None => (!item.is_undefined()).then_some(item),
                    };
                    if out.is_some() {
                        return Ok(out);
                    }
                }
                Phase::After => {
                    self.phase = Phase::Done;
                    self.run.ec.set_variable(ROOT, Value::Undefined)?;
                    if let Some(after) = &self.spec.after {
                        if let Some(out) = after.run(&self.run, Value::Undefined).await? {
                            return Ok(Some(out));
                        }
                    }
                }
                Phase::Done => return Ok(None),
            }
        }
    }
}

stage_source!(TransformSource);
