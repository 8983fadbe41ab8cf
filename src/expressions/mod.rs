//! Expression trees: parsing, evaluation frames, operators and pipeline stages.

pub mod accumulators;
pub mod context;
pub mod expression;
pub mod factory;
pub mod operators;
pub mod pipeline;
pub mod rules;
pub mod runtime;
pub mod scope;
pub mod stages;
pub mod variables;

pub use context::{ContextBuilder, EvaluationStats, ExpressionContext};
pub use expression::{EvalOptions, Evaluate, Expression, ExpressionKind, ExpressionRef, ParseOptions};
pub use factory::{parse_expression, parse_pipeline};
pub use pipeline::Pipeline;
pub use runtime::{
    Definition, ExpressionCache, LruExpressionCache, MemoryRegistry, RuntimeDefinition, RuntimeKind, RuntimeRegistry,
};

use crate::acl::AccessContext;
use crate::cursor::SharedCursor;
use crate::engine::Engine;
use crate::errors::Result;
use crate::value::Value;

/// Runs a pipeline definition over `input` as `ac`.
pub async fn run_pipeline(
    engine: &Engine,
    ac: AccessContext,
    definition: impl Into<Definition>,
    input: Value,
) -> Result<SharedCursor> {
    engine.run_pipeline(ac, definition, input).await
}
