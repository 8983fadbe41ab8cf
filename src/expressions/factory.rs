//! Turns raw definitions into expression trees.

use super::expression::{Expression, ExpressionKind, ExpressionRef, ParseFrame, ParseOptions};
use super::operators;
use super::pipeline::Pipeline;
use super::variables::{ROOT, VariableRef};
use crate::config::EngineConfig;
use crate::errors::Result;
use crate::pather::normalize_path;
use crate::value::Value;
use bson::Bson;

impl EngineConfig {
    #[must_use]
    pub fn parse_options(&self) -> ParseOptions {
        ParseOptions { max_depth: self.max_expression_depth, max_regexp_length: self.max_regexp_length }
    }
}

/// Parses a root expression.
pub fn parse_expression(raw: &Bson, options: ParseOptions) -> Result<ExpressionRef> {
    let root = ParseFrame::root(options);
    root.register(ROOT);
    let kind = guess_kind(raw, &root)?;
    Ok(Expression::build(&root, raw, kind))
}

/// Parses a root pipeline: a non-empty array of stages.
pub fn parse_pipeline(raw: &Bson, options: ParseOptions) -> Result<ExpressionRef> {
    let root = ParseFrame::root(options);
    root.register(ROOT);
    let kind = ExpressionKind::Pipeline(Pipeline::parse(raw, &root)?);
    Ok(Expression::build(&root, raw, kind))
}

/// Parses the child of `parent` found at `path`, guessing its kind from its shape.
pub fn guess(raw: &Bson, parent: &ParseFrame<'_>, path: &str) -> Result<ExpressionRef> {
    let frame = parent.child(path)?;
    let kind = guess_kind(raw, &frame).map_err(|e| e.with_path(frame.full_path()))?;
    Ok(Expression::build(&frame, raw, kind))
}

/// Like [`guess`], but the child is always a nested pipeline.
pub fn guess_pipeline(raw: &Bson, parent: &ParseFrame<'_>, path: &str) -> Result<ExpressionRef> {
    let frame = parent.child(path)?;
    let kind = Pipeline::parse(raw, &frame).map_err(|e| e.with_path(frame.full_path()))?;
    Ok(Expression::build(&frame, raw, ExpressionKind::Pipeline(kind)))
}

/// Like [`guess`], but the child is always a literal.
pub fn literal(raw: &Bson, parent: &ParseFrame<'_>, path: &str) -> Result<ExpressionRef> {
    let frame = parent.child(path)?;
    Ok(Expression::build(&frame, raw, ExpressionKind::Literal(Value::literal(Value::from(raw)))))
}

fn guess_kind(raw: &Bson, frame: &ParseFrame<'_>) -> Result<ExpressionKind> {
    match raw {
        Bson::String(s) if s.starts_with("$$") => Ok(ExpressionKind::Variable(VariableRef::parse(s, frame)?)),
        Bson::String(s) if s.starts_with('$') => {
            let path = normalize_path(&s[1..]);
            if path.is_empty() {
                return Err(frame.error(format!("Invalid field path: {s}")));
            }
            Ok(ExpressionKind::Field(path))
        }
        Bson::Document(doc) => {
            if doc.len() == 1 {
                if let Some((key, value)) = doc.iter().next() {
                    if key.starts_with('$') {
                        return operators::parse(key, value, frame).map(ExpressionKind::Operator);
                    }
                }
            }
            let fields = doc
                .iter()
                .map(|(key, value)| Ok((key.clone(), guess(value, frame, key)?)))
                .collect::<Result<Vec<_>>>()?;
            Ok(ExpressionKind::Object(fields))
        }
        Bson::Array(items) => {
            let items = items
                .iter()
                .enumerate()
                .map(|(i, value)| guess(value, frame, &i.to_string()))
                .collect::<Result<Vec<_>>>()?;
            Ok(ExpressionKind::Array(items))
        }
        other => Ok(ExpressionKind::Literal(Value::from(other))),
    }
}
