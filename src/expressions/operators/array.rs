//! Array operators, `$join` among them.

use super::super::context::ExpressionContext;
use super::super::expression::{EvalOptions, Evaluate, ExpressionRef, ParseFrame, evaluate_all};
use super::super::factory::guess;
use super::super::rules::{self, Noun};
use super::{evaluate_pair, operand, operands};
use crate::errors::{ExprError, Result};
use crate::value::{Value, deep_equals};
use bson::Bson;

pub enum ArrayOperator {
    /// `[array, separator]`
    Join { array: ExpressionRef, separator: ExpressionRef },
    Array(Vec<ExpressionRef>),
    Size(ExpressionRef),
    /// `[needle, haystack]`
    In { needle: ExpressionRef, haystack: ExpressionRef },
    IsArray(ExpressionRef),
    /// `[array, index]`, negative indexes count from the end.
    ElemAt { array: ExpressionRef, index: ExpressionRef },
    /// `{ input, as = "this", in }`
    Map { input: ExpressionRef, var: String, inner: ExpressionRef },
    /// `{ input, as = "this", cond }`
    Filter { input: ExpressionRef, var: String, cond: ExpressionRef },
}

/// Anything as a list: arrays as they are, null and undefined as empty, other values alone.
fn to_items(value: Value) -> Vec<Value> {
    if value.is_array() {
        value.into_array()
    } else if value.is_nullish() {
        Vec::new()
    } else {
        vec![value]
    }
}

fn join_part(value: &Value) -> String {
    if value.is_nullish() { String::new() } else { value.to_display_string() }
}

fn parse_iteration(
    name: &'static str,
    raw: &Bson,
    frame: &ParseFrame<'_>,
    body: &str,
) -> Result<(ExpressionRef, String, ExpressionRef)> {
    let doc = rules::value_must_be_object(frame, Noun::Operator, name, raw, "")?;
    let input = doc
        .get("input")
        .ok_or_else(|| frame.error_at("input", format!("Operator {name} requires an input.")))?;
    let input = guess(input, frame, "input")?;
    let var = match doc.get("as") {
        None => "this".to_string(),
        Some(Bson::String(var)) => {
            rules::must_be_user_variable_format(frame, Noun::Operator, name, var, "as")?;
            var.clone()
        }
        Some(_) => return Err(frame.error_at("as", format!("Operator {name} user variable must be a string."))),
    };
    frame.register(var.as_str());
    let inner = doc.get(body).ok_or_else(|| frame.error_at(body, format!("Operator {name} requires {body}.")))?;
    Ok((input, var, guess(inner, frame, body)?))
}

impl ArrayOperator {
    pub const NAMES: [&'static str; 8] =
        ["$join", "$array", "$size", "$in", "$isArray", "$arrayElemAt", "$map", "$filter"];

    pub(super) fn parse(name: &'static str, raw: &Bson, frame: &ParseFrame<'_>) -> Result<Self> {
        Ok(match name {
            "$join" => {
                let items = rules::array_of_size(frame, name, raw, 2)?;
                Self::Join { array: guess(&items[0], frame, "0")?, separator: guess(&items[1], frame, "1")? }
            }
            "$array" => Self::Array(operands(raw, frame)?),
            "$size" => Self::Size(operand(name, raw, frame)?),
            "$in" => {
                let items = rules::array_of_size(frame, name, raw, 2)?;
                Self::In { needle: guess(&items[0], frame, "0")?, haystack: guess(&items[1], frame, "1")? }
            }
            "$isArray" => Self::IsArray(operand(name, raw, frame)?),
            "$arrayElemAt" => {
                let items = rules::array_of_size(frame, name, raw, 2)?;
                Self::ElemAt { array: guess(&items[0], frame, "0")?, index: guess(&items[1], frame, "1")? }
            }
            "$map" => {
                let (input, var, inner) = parse_iteration(name, raw, frame, "in")?;
                Self::Map { input, var, inner }
            }
            _ => {
                let (input, var, cond) = parse_iteration(name, raw, frame, "cond")?;
                Self::Filter { input, var, cond }
            }
        })
    }

    /// `$map` and `$filter` read their input from `outer`, where their own variable is not in scope.
    pub(super) async fn evaluate(&self, ec: &ExpressionContext, outer: &ExpressionContext) -> Result<Value> {
        match self {
            Self::Join { array, separator } => {
                let (array, separator) = evaluate_pair(array, separator, ec).await?;
                let separator = if separator.is_nullish() { ",".to_string() } else { separator.to_display_string() };
                let parts: Vec<String> = to_items(array).iter().map(join_part).collect();
                Ok(Value::String(parts.join(&separator)))
            }
            Self::Array(items) => Ok(Value::Array(evaluate_all(items, ec).await?)),
            Self::Size(array) => {
                let value = array.evaluate(ec, EvalOptions::default()).await?;
                match value.as_array() {
                    Some(items) => Ok(Value::from(items.len())),
                    None => Err(ExprError::invalid_argument(format!(
                        "$size requires an array, not {}",
                        value.type_name()
                    ))),
                }
            }
            Self::In { needle, haystack } => {
                let (needle, haystack) = evaluate_pair(needle, haystack, ec).await?;
                match haystack.as_array() {
                    Some(items) => Ok(Value::Bool(items.iter().any(|item| deep_equals(item, &needle)))),
                    None => Err(ExprError::invalid_argument("$in requires an array as its second argument.")),
                }
            }
            Self::IsArray(value) => Ok(Value::Bool(value.evaluate(ec, EvalOptions::default()).await?.is_array())),
            Self::ElemAt { array, index } => {
                let (array, index) = evaluate_pair(array, index, ec).await?;
                if array.is_nullish() {
                    return Ok(Value::Null);
                }
                let (Some(items), Some(index)) = (array.as_array(), index.as_i64()) else {
                    return Err(ExprError::invalid_argument("$arrayElemAt requires an array and an integer index."));
                };
                let len = i64::try_from(items.len()).unwrap_or(i64::MAX);
                let index = if index < 0 { len + index } else { index };
                Ok(usize::try_from(index).ok().and_then(|i| items.get(i)).cloned().unwrap_or_default())
            }
            Self::Map { input, var, inner } => {
                let input = input.evaluate(outer, EvalOptions::default()).await?;
                if input.is_nullish() {
                    return Ok(Value::Null);
                }
                let mut out = Vec::new();
                for item in to_items(input) {
                    ec.set_variable(var, item)?;
                    out.push(inner.evaluate(ec, EvalOptions::default()).await?);
                }
                Ok(Value::Array(out))
            }
            Self::Filter { input, var, cond } => {
                let input = input.evaluate(outer, EvalOptions::default()).await?;
                if input.is_nullish() {
                    return Ok(Value::Null);
                }
                let mut out = Vec::new();
                for item in to_items(input) {
                    ec.set_variable(var, item.clone())?;
                    if cond.evaluate(ec, EvalOptions::default()).await?.is_truthy() {
                        out.push(item);
                    }
                }
                Ok(Value::Array(out))
            }
        }
    }
}
