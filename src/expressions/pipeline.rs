//! Stage chains.

use super::context::ExpressionContext;
use super::expression::{EvalOptions, Evaluate, ExpressionKind, ExpressionRef, ParseFrame};
use super::stages::parse_stage;
use crate::cursor::{SharedCursor, cast_cursor};
use crate::errors::{ExprError, Result};
use crate::value::Value;
use bson::Bson;

/// A non-empty list of stages. Each stage reads the cursor the previous one returned; the first
/// reads the pipeline input.
pub struct Pipeline {
    stages: Vec<ExpressionRef>,
}

impl Pipeline {
    pub(crate) fn parse(raw: &Bson, frame: &ParseFrame<'_>) -> Result<Self> {
        let items = match raw {
            Bson::Array(items) if !items.is_empty() => items,
            _ => return Err(frame.error("A pipeline must be an array with at least one stage.")),
        };
        let stages = items
            .iter()
            .enumerate()
            .map(|(i, item)| parse_stage(item, frame, &i.to_string()))
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { stages })
    }

    #[must_use]
    pub fn stages(&self) -> &[ExpressionRef] {
        &self.stages
    }

    /// Chains the stages. Nothing is read until the returned cursor is pulled.
    pub(crate) async fn evaluate(&self, ec: &ExpressionContext, options: EvalOptions) -> Result<Value> {
        let mut current = options.input.unwrap_or_default();
        for stage in &self.stages {
            current = stage.evaluate(ec, EvalOptions::with_input(current)).await?;
        }
        Ok(Value::Cursor(cast_cursor(current)?))
    }

    /// Runs the pipeline `ec` was created for over `input`.
    pub async fn run(ec: &ExpressionContext, input: Value) -> Result<SharedCursor> {
        if !matches!(ec.expression().kind(), ExpressionKind::Pipeline(_)) {
            return Err(ExprError::invalid_argument(format!(
                "Expected a pipeline, got {}",
                ec.expression().kind().name()
            )));
        }
        cast_cursor(ec.evaluate(EvalOptions::with_input(input)).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expressions::expression::ParseOptions;
    use crate::expressions::factory::parse_pipeline;
    use bson::bson;

    #[test]
    fn stage_paths_are_indexed() {
        let expr = parse_pipeline(&bson!([{ "$match": true }, { "$limit": 2 }]), ParseOptions::default()).unwrap();
        let ExpressionKind::Pipeline(pipeline) = expr.kind() else { panic!("pipeline") };
        let paths: Vec<&str> = pipeline.stages().iter().map(|s| s.full_path()).collect();
        assert_eq!(paths, vec!["0", "1"]);
    }

    #[test]
    fn empty_and_non_array_pipelines_fail() {
        assert!(parse_pipeline(&bson!([]), ParseOptions::default()).is_err());
        assert!(parse_pipeline(&bson!({ "$match": true }), ParseOptions::default()).is_err());
        let err = parse_pipeline(&bson!([{ "$limit": 1 }, { "$limit": 0 }]), ParseOptions::default()).unwrap_err();
        assert_eq!(err.path(), Some("1"));
    }
}
