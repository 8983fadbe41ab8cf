//! `$add`, `$subtract`, `$multiply`, `$divide` and `$mod`.
//!
//! Integers stay integers until they overflow or divide unevenly. Null or missing operands make
//! the result null.

use super::super::context::ExpressionContext;
use super::super::expression::{ExpressionRef, ParseFrame, evaluate_all};
use super::super::rules;
use super::operands;
use crate::errors::{ExprError, Result};
use crate::value::Value;
use bson::{Bson, DateTime};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Op {
    Add,
    Subtract,
    Multiply,
    Divide,
    Mod,
}

pub struct ArithmeticOperator {
    name: &'static str,
    op: Op,
    operands: Vec<ExpressionRef>,
}

#[derive(Debug, Clone, Copy)]
enum Num {
    Int(i64),
    Float(f64),
    Date(i64),
}

impl Num {
    fn of(name: &str, value: &Value) -> Result<Num> {
        match value.unmarked() {
            Value::Int(i) => Ok(Num::Int(*i)),
            Value::Double(d) => Ok(Num::Float(*d)),
            Value::Bson(Bson::DateTime(dt)) => Ok(Num::Date(dt.timestamp_millis())),
            other => Err(ExprError::invalid_argument(format!(
                "{name} only supports numeric or date types, not {}",
                other.type_name()
            ))),
        }
    }

    fn float(self) -> f64 {
        match self {
            Num::Int(i) | Num::Date(i) => i as f64,
            Num::Float(f) => f,
        }
    }

    fn into_value(self) -> Value {
        match self {
            Num::Int(i) => Value::Int(i),
            Num::Float(f) => Value::Double(f),
            Num::Date(ms) => Value::Bson(Bson::DateTime(DateTime::from_millis(ms))),
        }
    }
}

fn add(name: &str, a: Num, b: Num) -> Result<Num> {
    Ok(match (a, b) {
        (Num::Int(x), Num::Int(y)) => x.checked_add(y).map_or_else(|| Num::Float(x as f64 + y as f64), Num::Int),
        (Num::Date(d), n) | (n, Num::Date(d)) => {
            if matches!(n, Num::Date(_)) {
                return Err(ExprError::invalid_argument(format!("{name} only supports one date.")));
            }
            Num::Date(d.saturating_add(n.float() as i64))
        }
        (x, y) => Num::Float(x.float() + y.float()),
    })
}

fn multiply(name: &str, a: Num, b: Num) -> Result<Num> {
    Ok(match (a, b) {
        (Num::Date(_), _) | (_, Num::Date(_)) => {
            return Err(ExprError::invalid_argument(format!("{name} only supports numeric types, not Date")));
        }
        (Num::Int(x), Num::Int(y)) => x.checked_mul(y).map_or_else(|| Num::Float(x as f64 * y as f64), Num::Int),
        (x, y) => Num::Float(x.float() * y.float()),
    })
}

impl ArithmeticOperator {
    pub const NAMES: [&'static str; 5] = ["$add", "$subtract", "$multiply", "$divide", "$mod"];

    pub(super) fn parse(name: &'static str, raw: &Bson, frame: &ParseFrame<'_>) -> Result<Self> {
        let op = match name {
            "$add" => Op::Add,
            "$subtract" => Op::Subtract,
            "$multiply" => Op::Multiply,
            "$divide" => Op::Divide,
            _ => Op::Mod,
        };
        let operands = match op {
            Op::Add | Op::Multiply => operands(raw, frame)?,
            Op::Subtract | Op::Divide | Op::Mod => {
                rules::array_of_size(frame, name, raw, 2)?;
                operands(raw, frame)?
            }
        };
        Ok(Self { name, op, operands })
    }

    pub(super) async fn evaluate(&self, ec: &ExpressionContext) -> Result<Value> {
        let values = evaluate_all(&self.operands, ec).await?;
        if values.iter().any(Value::is_nullish) {
            return Ok(Value::Null);
        }
        let nums = values.iter().map(|v| Num::of(self.name, v)).collect::<Result<Vec<_>>>()?;
        let result = match self.op {
            Op::Add => nums.into_iter().try_fold(Num::Int(0), |acc, n| add(self.name, acc, n))?,
            Op::Multiply => nums.into_iter().try_fold(Num::Int(1), |acc, n| multiply(self.name, acc, n))?,
            Op::Subtract => match (nums[0], nums[1]) {
                (Num::Date(a), Num::Date(b)) => Num::Int(a.saturating_sub(b)),
                (Num::Date(a), n) => Num::Date(a.saturating_sub(n.float() as i64)),
                (_, Num::Date(_)) => {
                    return Err(ExprError::invalid_argument(format!("{} cannot subtract a date from a number.", self.name)));
                }
                (Num::Int(a), Num::Int(b)) => a.checked_sub(b).map_or_else(|| Num::Float(a as f64 - b as f64), Num::Int),
                (a, b) => Num::Float(a.float() - b.float()),
            },
            Op::Divide | Op::Mod => {
                let (a, b) = (nums[0], nums[1]);
                if matches!(a, Num::Date(_)) || matches!(b, Num::Date(_)) {
                    return Err(ExprError::invalid_argument(format!("{} only supports numeric types, not Date", self.name)));
                }
                if b.float() == 0.0 {
                    return Err(ExprError::invalid_argument(format!("{} cannot divide by zero.", self.name)));
                }
                match (self.op, a, b) {
                    (Op::Mod, Num::Int(x), Num::Int(y)) => Num::Int(x.wrapping_rem(y)),
                    (Op::Mod, x, y) => Num::Float(x.float() % y.float()),
                    (_, Num::Int(x), Num::Int(y)) if x.checked_rem(y) == Some(0) => {
                        x.checked_div(y).map_or_else(|| Num::Float(x as f64 / y as f64), Num::Int)
                    }
                    (_, x, y) => Num::Float(x.float() / y.float()),
                }
            }
        };
        Ok(result.into_value())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn integer_math_stays_integral() {
        assert!(matches!(add("$add", Num::Int(2), Num::Int(3)).unwrap(), Num::Int(5)));
        assert!(matches!(add("$add", Num::Int(i64::MAX), Num::Int(1)).unwrap(), Num::Float(_)));
        assert!(matches!(multiply("$multiply", Num::Int(4), Num::Float(0.5)).unwrap(), Num::Float(f) if f == 2.0));
    }

    #[test]
    fn dates_shift_by_milliseconds() {
        let shifted = add("$add", Num::Date(1_000), Num::Int(500)).unwrap();
        assert!(matches!(shifted, Num::Date(1_500)));
        assert!(add("$add", Num::Date(1), Num::Date(2)).is_err());
        assert!(multiply("$multiply", Num::Date(1), Num::Int(2)).is_err());
    }
}
