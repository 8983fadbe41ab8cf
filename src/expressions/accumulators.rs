//! `$group` accumulators.
//!
//! An accumulator evaluates its operand once per grouped document, with `$$ROOT` bound to that
//! document, and folds the result into the state kept for the document's bucket.

use super::context::ExpressionContext;
use super::expression::{EvalOptions, Evaluate, ExpressionRef, ParseFrame};
use super::factory::guess;
use crate::errors::{ExprError, Result};
use crate::value::{Map, Value, compare, deep_equals};
use bson::Bson;
use std::cmp::Ordering;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Fold {
    Sum,
    Avg,
    Min,
    Max,
    First,
    Last,
    Push,
    AddToSet,
    Count,
    MergeObjects,
}

/// Per-bucket state of one accumulator.
#[derive(Debug, Clone, Default)]
pub enum AccumulatorState {
    #[default]
    Empty,
    Sum { int: i64, float: f64, is_float: bool },
    Avg { total: f64, count: u64 },
    Value(Value),
    Items(Vec<Value>),
    Count(u64),
    Object(Map),
}

pub struct Accumulator {
    name: &'static str,
    fold: Fold,
    operand: ExpressionRef,
}

impl Accumulator {
    pub const NAMES: [&'static str; 10] =
        ["$sum", "$avg", "$min", "$max", "$first", "$last", "$push", "$addToSet", "$count", "$mergeObjects"];

    /// Parses `{ <name>: operand }` found at `path` within a `$group` stage.
    pub fn parse(name: &str, raw: &Bson, frame: &ParseFrame<'_>, path: &str) -> Result<Self> {
        let Some(&name) = Self::NAMES.iter().find(|n| **n == name) else {
            return Err(frame.error_at(path, format!("Unsupported accumulator {name}")));
        };
        let fold = match name {
            "$sum" => Fold::Sum,
            "$avg" => Fold::Avg,
            "$min" => Fold::Min,
            "$max" => Fold::Max,
            "$first" => Fold::First,
            "$last" => Fold::Last,
            "$push" => Fold::Push,
            "$addToSet" => Fold::AddToSet,
            "$count" => Fold::Count,
            _ => Fold::MergeObjects,
        };
        let operand = guess(raw, frame, &format!("{path}.{name}"))?;
        Ok(Self { name, fold, operand })
    }

    #[must_use]
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Folds the operand, evaluated against the current `$$ROOT`, into `state`.
    pub async fn accumulate(&self, ec: &ExpressionContext, state: AccumulatorState) -> Result<AccumulatorState> {
        if self.fold == Fold::Count {
            return Ok(match state {
                AccumulatorState::Count(n) => AccumulatorState::Count(n + 1),
                _ => AccumulatorState::Count(1),
            });
        }
        let value = self.operand.evaluate(ec, EvalOptions::default()).await?.into_unmarked();
        self.fold_value(state, value)
    }

    fn fold_value(&self, state: AccumulatorState, value: Value) -> Result<AccumulatorState> {
        Ok(match self.fold {
            Fold::Sum => {
                let (int, float, is_float) = match state {
                    AccumulatorState::Sum { int, float, is_float } => (int, float, is_float),
                    _ => (0, 0.0, false),
                };
                match value {
                    Value::Int(i) if !is_float => match int.checked_add(i) {
                        Some(int) => AccumulatorState::Sum { int, float, is_float },
                        None => AccumulatorState::Sum { int: 0, float: int as f64 + i as f64, is_float: true },
                    },
                    Value::Int(i) => AccumulatorState::Sum { int, float: float + i as f64, is_float },
                    Value::Double(d) => AccumulatorState::Sum { int: 0, float: float + int as f64 + d, is_float: true },
                    _ => AccumulatorState::Sum { int, float, is_float },
                }
            }
            Fold::Avg => {
                let (total, count) = match state {
                    AccumulatorState::Avg { total, count } => (total, count),
                    _ => (0.0, 0),
                };
                match value.as_f64() {
                    Some(n) if value.is_number() => AccumulatorState::Avg { total: total + n, count: count + 1 },
                    _ => AccumulatorState::Avg { total, count },
                }
            }
            Fold::Min | Fold::Max => {
                if value.is_nullish() {
                    return Ok(state);
                }
                let wanted = if self.fold == Fold::Min { Ordering::Less } else { Ordering::Greater };
                match state {
                    AccumulatorState::Value(current) if compare(&value, &current) != wanted => {
                        AccumulatorState::Value(current)
                    }
                    _ => AccumulatorState::Value(value),
                }
            }
            Fold::First => match state {
                AccumulatorState::Empty => AccumulatorState::Value(value),
                kept => kept,
            },
            Fold::Last => AccumulatorState::Value(value),
            Fold::Push | Fold::AddToSet => {
                let mut items = match state {
                    AccumulatorState::Items(items) => items,
                    _ => Vec::new(),
                };
                if !value.is_undefined() && !(self.fold == Fold::AddToSet && items.iter().any(|i| deep_equals(i, &value))) {
                    items.push(value);
                }
                AccumulatorState::Items(items)
            }
            Fold::MergeObjects => {
                let mut merged = match state {
                    AccumulatorState::Object(map) => map,
                    _ => Map::new(),
                };
                if !value.is_nullish() {
                    let object = match value {
                        Value::Object(map) => map,
                        Value::Context(ac) => match Value::from(ac.to_object()) {
                            Value::Object(map) => map,
                            _ => Map::new(),
                        },
                        other => {
                            return Err(ExprError::invalid_argument(format!(
                                "$mergeObjects requires object inputs, not {}",
                                other.type_name()
                            )));
                        }
                    };
                    merged.extend(object);
                }
                AccumulatorState::Object(merged)
            }
            Fold::Count => state,
        })
    }

    /// Final value of a bucket's state.
    #[must_use]
    pub fn value_of(&self, state: &AccumulatorState) -> Value {
        match (self.fold, state) {
            (_, AccumulatorState::Sum { int, float, is_float }) => {
                if *is_float {
                    Value::Double(float + *int as f64)
                } else {
                    Value::Int(*int)
                }
            }
            (_, AccumulatorState::Avg { count: 0, .. }) => Value::Null,
            (_, AccumulatorState::Avg { total, count }) => Value::Double(total / *count as f64),
            (_, AccumulatorState::Value(v)) if v.is_undefined() => Value::Null,
            (_, AccumulatorState::Value(v)) => v.clone(),
            (_, AccumulatorState::Items(items)) => Value::Array(items.clone()),
            (_, AccumulatorState::Count(n)) => Value::Int(i64::try_from(*n).unwrap_or(i64::MAX)),
            (_, AccumulatorState::Object(map)) => Value::Object(map.clone()),
            (Fold::Sum | Fold::Count, AccumulatorState::Empty) => Value::Int(0),
            (Fold::Push | Fold::AddToSet, AccumulatorState::Empty) => Value::Array(Vec::new()),
            (Fold::MergeObjects, AccumulatorState::Empty) => Value::Object(Map::new()),
            (_, AccumulatorState::Empty) => Value::Null,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expressions::expression::ParseOptions;

    fn accumulator(name: &str) -> Accumulator {
        let frame = ParseFrame::root(ParseOptions::default());
        frame.register(crate::expressions::variables::ROOT);
        Accumulator::parse(name, &Bson::String("$$ROOT".into()), &frame, "total").unwrap()
    }

    fn fold(acc: &Accumulator, values: &[Value]) -> Value {
        let mut state = AccumulatorState::Empty;
        for v in values {
            state = acc.fold_value(state, v.clone()).unwrap();
        }
        acc.value_of(&state)
    }

    #[test]
    fn sums_stay_integral_until_a_double_arrives() {
        let sum = accumulator("$sum");
        assert_eq!(fold(&sum, &[Value::Int(1), Value::Int(2)]), Value::Int(3));
        assert_eq!(fold(&sum, &[Value::Int(1), Value::Double(0.5), Value::from("x")]), Value::Double(1.5));
        assert_eq!(fold(&sum, &[]), Value::Int(0));
    }

    #[test]
    fn averages_and_extremes() {
        assert_eq!(fold(&accumulator("$avg"), &[Value::Int(1), Value::Int(2)]), Value::Double(1.5));
        assert_eq!(fold(&accumulator("$avg"), &[Value::Null]), Value::Null);
        assert_eq!(fold(&accumulator("$min"), &[Value::Int(3), Value::Null, Value::Int(1)]), Value::Int(1));
        assert_eq!(fold(&accumulator("$max"), &[Value::Int(3), Value::Int(9), Value::Int(1)]), Value::Int(9));
    }

    #[test]
    fn collects_items() {
        let values = [Value::Int(1), Value::Int(1), Value::Int(2)];
        assert_eq!(fold(&accumulator("$push"), &values).as_array().map(Vec::len), Some(3));
        assert_eq!(fold(&accumulator("$addToSet"), &values).as_array().map(Vec::len), Some(2));
        assert_eq!(fold(&accumulator("$first"), &values), Value::Int(1));
        assert_eq!(fold(&accumulator("$last"), &values), Value::Int(2));
    }

    #[test]
    fn rejects_unknown_accumulators() {
        let frame = ParseFrame::root(ParseOptions::default());
        let err = Accumulator::parse("$median", &Bson::Int32(1), &frame, "m").err().unwrap();
        assert_eq!(err.path(), Some("m"));
    }
}
