//! `$`-named operators.
//!
//! Each family parses its own shapes and evaluates its own variants; [`parse`] looks the name up
//! in a registry and hands the raw value to the matching family.

mod access;
mod arithmetic;
mod array;
mod comparison;
mod object;
mod special;
mod string;

pub use access::AsOperator;
pub use arithmetic::ArithmeticOperator;
pub use array::ArrayOperator;
pub use comparison::{ComparisonOperator, ConditionalOperator, LogicalOperator};
pub use object::ObjectOperator;
pub use special::{ExpressionOperator, FunctionOperator, LetOperator};
pub use string::StringOperator;

use super::context::ExpressionContext;
use super::expression::{EvalOptions, Evaluate, ExpressionRef, ParseFrame};
use super::factory::guess;
use crate::errors::Result;
use crate::value::Value;
use bson::Bson;
use once_cell::sync::Lazy;
use std::collections::HashMap;

pub enum OperatorKind {
    Literal(Value),
    Type(ExpressionRef),
    As(AsOperator),
    Expression(ExpressionOperator),
    Let(LetOperator),
    Function(FunctionOperator),
    Arithmetic(ArithmeticOperator),
    Comparison(ComparisonOperator),
    Logical(LogicalOperator),
    Conditional(ConditionalOperator),
    Array(ArrayOperator),
    Object(ObjectOperator),
    String(StringOperator),
}

pub struct Operator {
    name: &'static str,
    kind: OperatorKind,
}

type ParseFn = fn(&'static str, &Bson, &ParseFrame<'_>) -> Result<OperatorKind>;

static REGISTRY: Lazy<HashMap<&'static str, ParseFn>> = Lazy::new(|| {
    let mut registry: HashMap<&'static str, ParseFn> = HashMap::new();
    registry.insert("$literal", |_, raw, _| Ok(OperatorKind::Literal(Value::literal(Value::from(raw)))));
    registry.insert("$type", |_, raw, frame| Ok(OperatorKind::Type(guess(raw, frame, "0")?)));
    registry.insert("$as", |name, raw, frame| AsOperator::parse(name, raw, frame).map(OperatorKind::As));
    registry.insert("$expression", |name, raw, frame| {
        ExpressionOperator::parse(name, raw, frame).map(OperatorKind::Expression)
    });
    registry.insert("$let", |name, raw, frame| LetOperator::parse(name, raw, frame).map(OperatorKind::Let));
    registry.insert("$function", |name, raw, frame| {
        FunctionOperator::parse(name, raw, frame).map(OperatorKind::Function)
    });
    for name in ArithmeticOperator::NAMES {
        registry.insert(name, |name, raw, frame| {
            ArithmeticOperator::parse(name, raw, frame).map(OperatorKind::Arithmetic)
        });
    }
    for name in ComparisonOperator::NAMES {
        registry.insert(name, |name, raw, frame| {
            ComparisonOperator::parse(name, raw, frame).map(OperatorKind::Comparison)
        });
    }
    for name in LogicalOperator::NAMES {
        registry.insert(name, |name, raw, frame| LogicalOperator::parse(name, raw, frame).map(OperatorKind::Logical));
    }
    for name in ConditionalOperator::NAMES {
        registry.insert(name, |name, raw, frame| {
            ConditionalOperator::parse(name, raw, frame).map(OperatorKind::Conditional)
        });
    }
    for name in ArrayOperator::NAMES {
        registry.insert(name, |name, raw, frame| ArrayOperator::parse(name, raw, frame).map(OperatorKind::Array));
    }
    for name in ObjectOperator::NAMES {
        registry.insert(name, |name, raw, frame| ObjectOperator::parse(name, raw, frame).map(OperatorKind::Object));
    }
    for name in StringOperator::NAMES {
        registry.insert(name, |name, raw, frame| StringOperator::parse(name, raw, frame).map(OperatorKind::String));
    }
    registry
});

/// Whether `name` is a registered operator.
#[must_use]
pub fn is_operator(name: &str) -> bool {
    REGISTRY.contains_key(name)
}

/// Whether `raw` is a single key object naming a registered operator.
#[must_use]
pub fn is_operator_document(raw: &Bson) -> bool {
    match raw {
        Bson::Document(doc) if doc.len() == 1 => doc.keys().next().is_some_and(|k| is_operator(k)),
        _ => false,
    }
}

pub(crate) fn parse(name: &str, raw: &Bson, frame: &ParseFrame<'_>) -> Result<Operator> {
    let Some((&name, parse)) = REGISTRY.get_key_value(name) else {
        return Err(frame.error(format!("Unsupported operator {name}")));
    };
    Ok(Operator { name, kind: parse(name, raw, frame)? })
}

/// Operands of an operator that takes a list: an array of expressions, or one expression.
pub(super) fn operands(raw: &Bson, frame: &ParseFrame<'_>) -> Result<Vec<ExpressionRef>> {
    match raw {
        Bson::Array(items) => items.iter().enumerate().map(|(i, item)| guess(item, frame, &i.to_string())).collect(),
        other => Ok(vec![guess(other, frame, "0")?]),
    }
}

/// The single operand of a unary operator. A one element array is unwrapped.
pub(super) fn operand(name: &str, raw: &Bson, frame: &ParseFrame<'_>) -> Result<ExpressionRef> {
    match raw {
        Bson::Array(items) if items.len() == 1 => guess(&items[0], frame, "0"),
        Bson::Array(_) => Err(frame.error(format!("{name} requires an array with exactly 1 elements."))),
        other => guess(other, frame, "0"),
    }
}

/// Evaluates two operands concurrently.
pub(super) async fn evaluate_pair(
    left: &ExpressionRef,
    right: &ExpressionRef,
    ec: &ExpressionContext,
) -> Result<(Value, Value)> {
    futures::try_join!(left.evaluate(ec, EvalOptions::default()), right.evaluate(ec, EvalOptions::default()))
}

impl Operator {
    #[must_use]
    pub fn name(&self) -> &'static str {
        self.name
    }

    #[must_use]
    pub fn kind(&self) -> &OperatorKind {
        &self.kind
    }

    /// `ec` is the frame for `expr` itself; `outer` is the frame it was reached from, which
    /// differs when `expr` registered variables of its own.
    pub(crate) async fn evaluate(
        &self,
        expr: &ExpressionRef,
        ec: &ExpressionContext,
        outer: &ExpressionContext,
    ) -> Result<Value> {
        match &self.kind {
            OperatorKind::Literal(value) => Ok(value.clone()),
            OperatorKind::Type(inner) => {
                let value = inner.evaluate(ec, EvalOptions::default()).await?;
                Ok(Value::from(value.type_name()))
            }
            OperatorKind::As(op) => op.evaluate(expr, ec).await,
            OperatorKind::Expression(op) => op.evaluate(expr, ec, outer).await,
            OperatorKind::Let(op) => op.evaluate(ec).await,
            OperatorKind::Function(op) => op.evaluate(ec).await,
            OperatorKind::Arithmetic(op) => op.evaluate(ec).await,
            OperatorKind::Comparison(op) => op.evaluate(ec).await,
            OperatorKind::Logical(op) => op.evaluate(ec).await,
            OperatorKind::Conditional(op) => op.evaluate(ec).await,
            OperatorKind::Array(op) => op.evaluate(ec, outer).await,
            OperatorKind::Object(op) => op.evaluate(ec).await,
            OperatorKind::String(op) => op.evaluate(ec).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bson::bson;

    #[test]
    fn registry_knows_every_family() {
        for name in ["$literal", "$as", "$expression", "$join", "$add", "$eq", "$and", "$cond", "$map", "$object", "$concat"] {
            assert!(is_operator(name), "{name}");
        }
        assert!(!is_operator("$nope"));
        assert!(is_operator_document(&bson!({ "$add": [1, 2] })));
        assert!(!is_operator_document(&bson!({ "a": 1 })));
    }
}
