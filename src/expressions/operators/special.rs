//! `$expression`, `$let` and `$function`.

use super::super::context::ExpressionContext;
use super::super::expression::{EvalOptions, Evaluate, ExpressionRef, ParseFrame, evaluate_all};
use super::super::factory::guess;
use super::super::rules::{self, Noun};
use super::super::runtime::{Definition, is_custom_name};
use super::super::variables::ROOT;
use crate::errors::{ExprError, Result};
use crate::value::Value;
use bson::Bson;

/// Evaluates a stored expression by name, or an inline one with an optional remapped `$$ROOT`.
pub enum ExpressionOperator {
    Named { name: String, root: Option<ExpressionRef> },
    Inline { inner: ExpressionRef, root: Option<ExpressionRef> },
}

impl ExpressionOperator {
    pub(super) fn parse(name: &'static str, raw: &Bson, frame: &ParseFrame<'_>) -> Result<Self> {
        match raw {
            Bson::String(s) if is_custom_name(s) => Ok(Self::Named { name: s.clone(), root: None }),
            Bson::Document(doc) if doc.contains_key("in") && doc.keys().all(|k| k == "in" || k == "as") => {
                let root = doc.get("as").map(|raw| guess(raw, frame, "as")).transpose()?;
                match doc.get("in") {
                    Some(Bson::String(s)) if is_custom_name(s) => Ok(Self::Named { name: s.clone(), root }),
                    Some(inner) => {
                        if root.is_some() {
                            frame.register(ROOT);
                        }
                        Ok(Self::Inline { inner: guess(inner, frame, "in")?, root })
                    }
                    None => Err(frame.error_at("in", format!("Operator {name} requires an in expression."))),
                }
            }
            other => Ok(Self::Inline { inner: guess(other, frame, "in")?, root: None }),
        }
    }

    pub(super) async fn evaluate(
        &self,
        expr: &ExpressionRef,
        ec: &ExpressionContext,
        outer: &ExpressionContext,
    ) -> Result<Value> {
        match self {
            Self::Named { name, root } => {
                let root = match root {
                    Some(root) => root.evaluate(ec, EvalOptions::default()).await?,
                    None => ec.get_variable(ROOT),
                };
                let org = ec.ac().org();
                let compiled = ec.engine().resolve_expression(&org, Definition::Named(name.clone())).await?;
                let mut path = ec.get_full_path(expr);
                if path.is_empty() {
                    path = name.clone();
                }
                let child = ec.runtime_child(&path, &compiled, &path)?;
                child.set_variable(ROOT, root)?;
                child.evaluate_detached(EvalOptions::default()).await
            }
            Self::Inline { inner, root: Some(root) } => {
                let root = root.evaluate(outer, EvalOptions::default()).await?;
                ec.variable_scope().set(ROOT, root, true)?;
                inner.evaluate(ec, EvalOptions::default()).await
            }
            Self::Inline { inner, root: None } => inner.evaluate(ec, EvalOptions::default()).await,
        }
    }
}

/// `{ $let: { vars: { name: expr }, in: expr } }`. Variables are assigned in order so later
/// ones can use earlier ones.
pub struct LetOperator {
    vars: Vec<(String, ExpressionRef)>,
    inner: ExpressionRef,
}

impl LetOperator {
    pub(super) fn parse(name: &'static str, raw: &Bson, frame: &ParseFrame<'_>) -> Result<Self> {
        let doc = rules::value_must_be_object(frame, Noun::Operator, name, raw, "")?;
        let vars = match doc.get("vars") {
            Some(vars) => rules::parse_user_variables(frame, name, vars, "vars", true)?,
            None => Vec::new(),
        };
        let inner = match doc.get("in") {
            Some(inner) => guess(inner, frame, "in")?,
            None => return Err(frame.error_at("in", format!("Operator {name} requires an in expression."))),
        };
        Ok(Self { vars, inner })
    }

    pub(super) async fn evaluate(&self, ec: &ExpressionContext) -> Result<Value> {
        for (name, expr) in &self.vars {
            let value = expr.evaluate(ec, EvalOptions::default()).await?;
            ec.set_variable(name, value)?;
        }
        self.inner.evaluate(ec, EvalOptions::default()).await
    }
}

/// `{ $function: { body, args } }`, run by the host's script runtime.
pub struct FunctionOperator {
    body: String,
    args: Vec<ExpressionRef>,
}

impl FunctionOperator {
    pub(super) fn parse(name: &'static str, raw: &Bson, frame: &ParseFrame<'_>) -> Result<Self> {
        let doc = rules::value_must_be_object(frame, Noun::Operator, name, raw, "")?;
        let body = match doc.get("body") {
            Some(Bson::String(body)) if !body.trim().is_empty() => body.clone(),
            _ => return Err(frame.error_at("body", format!("Operator {name} requires a string body."))),
        };
        let args = match doc.get("args") {
            None | Some(Bson::Null) => Vec::new(),
            Some(args) => rules::must_be_array(frame, name, args, "args")?
                .iter()
                .enumerate()
                .map(|(i, arg)| guess(arg, frame, &format!("args.{i}")))
                .collect::<Result<_>>()?,
        };
        Ok(Self { body, args })
    }

    pub(super) async fn evaluate(&self, ec: &ExpressionContext) -> Result<Value> {
        let runtime = ec
            .engine()
            .script_runtime()
            .ok_or_else(|| ExprError::unsupported("No script runtime is available for $function."))?;
        let args = evaluate_all(&self.args, ec).await?;
        runtime.run(&ec.ac(), &self.body, args).await
    }
}
