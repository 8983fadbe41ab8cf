//! Comparison, boolean and conditional operators.

use super::super::context::ExpressionContext;
use super::super::expression::{EvalOptions, Evaluate, ExpressionRef, ParseFrame};
use super::super::factory::guess;
use super::super::rules::{self, Noun};
use super::{evaluate_pair, operand, operands};
use crate::errors::Result;
use crate::value::{Value, compare, deep_equals};
use bson::Bson;
use std::cmp::Ordering;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CompareOp {
    Eq,
    Ne,
    Gt,
    Gte,
    Lt,
    Lte,
    Cmp,
}

/// `{ $gt: [a, b] }` and friends. Values of different types are ordered by type first.
pub struct ComparisonOperator {
    op: CompareOp,
    left: ExpressionRef,
    right: ExpressionRef,
}

impl ComparisonOperator {
    pub const NAMES: [&'static str; 7] = ["$eq", "$ne", "$gt", "$gte", "$lt", "$lte", "$cmp"];

    pub(super) fn parse(name: &'static str, raw: &Bson, frame: &ParseFrame<'_>) -> Result<Self> {
        let items = rules::array_of_size(frame, name, raw, 2)?;
        let op = match name {
            "$eq" => CompareOp::Eq,
            "$ne" => CompareOp::Ne,
            "$gt" => CompareOp::Gt,
            "$gte" => CompareOp::Gte,
            "$lt" => CompareOp::Lt,
            "$lte" => CompareOp::Lte,
            _ => CompareOp::Cmp,
        };
        Ok(Self { op, left: guess(&items[0], frame, "0")?, right: guess(&items[1], frame, "1")? })
    }

    pub(super) async fn evaluate(&self, ec: &ExpressionContext) -> Result<Value> {
        let (a, b) = evaluate_pair(&self.left, &self.right, ec).await?;
        Ok(match self.op {
            CompareOp::Eq => Value::Bool(deep_equals(&a, &b)),
            CompareOp::Ne => Value::Bool(!deep_equals(&a, &b)),
            CompareOp::Cmp => Value::Int(match compare(&a, &b) {
                Ordering::Less => -1,
                Ordering::Equal => 0,
                Ordering::Greater => 1,
            }),
            op => {
                let ord = compare(&a, &b);
                Value::Bool(match op {
                    CompareOp::Gt => ord == Ordering::Greater,
                    CompareOp::Gte => ord != Ordering::Less,
                    CompareOp::Lt => ord == Ordering::Less,
                    _ => ord != Ordering::Greater,
                })
            }
        })
    }
}

/// `$and`, `$or` and `$not`. `$and` and `$or` stop at the first deciding operand.
pub enum LogicalOperator {
    And(Vec<ExpressionRef>),
    Or(Vec<ExpressionRef>),
    Not(ExpressionRef),
}

impl LogicalOperator {
    pub const NAMES: [&'static str; 3] = ["$and", "$or", "$not"];

    pub(super) fn parse(name: &'static str, raw: &Bson, frame: &ParseFrame<'_>) -> Result<Self> {
        Ok(match name {
            "$and" => Self::And(operands(raw, frame)?),
            "$or" => Self::Or(operands(raw, frame)?),
            _ => Self::Not(operand(name, raw, frame)?),
        })
    }

    pub(super) async fn evaluate(&self, ec: &ExpressionContext) -> Result<Value> {
        match self {
            Self::And(items) => {
                for item in items {
                    if !item.evaluate(ec, EvalOptions::default()).await?.is_truthy() {
                        return Ok(Value::Bool(false));
                    }
                }
                Ok(Value::Bool(true))
            }
            Self::Or(items) => {
                for item in items {
                    if item.evaluate(ec, EvalOptions::default()).await?.is_truthy() {
                        return Ok(Value::Bool(true));
                    }
                }
                Ok(Value::Bool(false))
            }
            Self::Not(item) => Ok(Value::Bool(!item.evaluate(ec, EvalOptions::default()).await?.is_truthy())),
        }
    }
}

/// `$cond` (`[if, then, else]` or `{ if, then, else }`) and `$ifNull`.
pub enum ConditionalOperator {
    Cond { test: ExpressionRef, then: ExpressionRef, otherwise: Option<ExpressionRef> },
    IfNull(Vec<ExpressionRef>),
}

impl ConditionalOperator {
    pub const NAMES: [&'static str; 2] = ["$cond", "$ifNull"];

    pub(super) fn parse(name: &'static str, raw: &Bson, frame: &ParseFrame<'_>) -> Result<Self> {
        if name == "$ifNull" {
            rules::array_of_at_least(frame, name, raw, 2)?;
            return Ok(Self::IfNull(operands(raw, frame)?));
        }
        match raw {
            Bson::Array(_) => {
                let items = rules::array_of_size(frame, name, raw, 3)?;
                Ok(Self::Cond {
                    test: guess(&items[0], frame, "0")?,
                    then: guess(&items[1], frame, "1")?,
                    otherwise: Some(guess(&items[2], frame, "2")?),
                })
            }
            _ => {
                let doc = rules::value_must_be_object(frame, Noun::Operator, name, raw, "")?;
                let test = doc.get("if").ok_or_else(|| frame.error_at("if", format!("Operator {name} requires if.")))?;
                let then =
                    doc.get("then").ok_or_else(|| frame.error_at("then", format!("Operator {name} requires then.")))?;
                Ok(Self::Cond {
                    test: guess(test, frame, "if")?,
                    then: guess(then, frame, "then")?,
                    otherwise: doc.get("else").map(|raw| guess(raw, frame, "else")).transpose()?,
                })
            }
        }
    }

    pub(super) async fn evaluate(&self, ec: &ExpressionContext) -> Result<Value> {
        match self {
            Self::Cond { test, then, otherwise } => {
                if test.evaluate(ec, EvalOptions::default()).await?.is_truthy() {
                    then.evaluate(ec, EvalOptions::default()).await
                } else if let Some(otherwise) = otherwise {
                    otherwise.evaluate(ec, EvalOptions::default()).await
                } else {
                    Ok(Value::Undefined)
                }
            }
            Self::IfNull(items) => {
                let mut last = Value::Null;
                for item in items {
                    last = item.evaluate(ec, EvalOptions::default()).await?;
                    if !last.is_nullish() {
                        break;
                    }
                }
                Ok(last)
            }
        }
    }
}
