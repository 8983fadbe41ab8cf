//! String operators.

use super::super::context::ExpressionContext;
use super::super::expression::{EvalOptions, Evaluate, ExpressionRef, ParseFrame, evaluate_all};
use super::super::factory::guess;
use super::super::rules::{self, Noun};
use super::{evaluate_pair, operand, operands};
use crate::errors::{ExprError, Result};
use crate::value::Value;
use bson::Bson;
use regex::Regex;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrimSide {
    Both,
    Start,
    End,
}

pub enum StringOperator {
    Concat(Vec<ExpressionRef>),
    ToLower(ExpressionRef),
    ToUpper(ExpressionRef),
    /// `{ input, chars }`; whitespace when `chars` is absent.
    Trim { side: TrimSide, input: ExpressionRef, chars: Option<ExpressionRef> },
    /// `[string, delimiter]`
    Split { input: ExpressionRef, delimiter: ExpressionRef },
    StrLenCP(ExpressionRef),
    /// `{ input, regex }`, compiled while parsing.
    RegexMatch { input: ExpressionRef, regex: Regex },
}

fn expect_string<'v>(name: &str, value: &'v Value) -> Result<&'v str> {
    value
        .as_str()
        .ok_or_else(|| ExprError::invalid_argument(format!("{name} only supports strings, not {}", value.type_name())))
}

fn trim<'s>(side: TrimSide, input: &'s str, chars: Option<&str>) -> &'s str {
    let matches = |c: char| match chars {
        Some(set) => set.contains(c),
        None => c.is_whitespace(),
    };
    match side {
        TrimSide::Both => input.trim_matches(matches),
        TrimSide::Start => input.trim_start_matches(matches),
        TrimSide::End => input.trim_end_matches(matches),
    }
}

impl StringOperator {
    pub const NAMES: [&'static str; 9] =
        ["$concat", "$toLower", "$toUpper", "$trim", "$ltrim", "$rtrim", "$split", "$strLenCP", "$regexMatch"];

    pub(super) fn parse(name: &'static str, raw: &Bson, frame: &ParseFrame<'_>) -> Result<Self> {
        Ok(match name {
            "$concat" => Self::Concat(operands(raw, frame)?),
            "$toLower" => Self::ToLower(operand(name, raw, frame)?),
            "$toUpper" => Self::ToUpper(operand(name, raw, frame)?),
            "$trim" | "$ltrim" | "$rtrim" => {
                let side = match name {
                    "$ltrim" => TrimSide::Start,
                    "$rtrim" => TrimSide::End,
                    _ => TrimSide::Both,
                };
                let doc = rules::value_must_be_object(frame, Noun::Operator, name, raw, "")?;
                let input = doc
                    .get("input")
                    .ok_or_else(|| frame.error_at("input", format!("Operator {name} requires an input.")))?;
                Self::Trim {
                    side,
                    input: guess(input, frame, "input")?,
                    chars: doc.get("chars").map(|raw| guess(raw, frame, "chars")).transpose()?,
                }
            }
            "$split" => {
                let items = rules::array_of_size(frame, name, raw, 2)?;
                Self::Split { input: guess(&items[0], frame, "0")?, delimiter: guess(&items[1], frame, "1")? }
            }
            "$strLenCP" => Self::StrLenCP(operand(name, raw, frame)?),
            _ => {
                let doc = rules::value_must_be_object(frame, Noun::Operator, name, raw, "")?;
                let input = doc
                    .get("input")
                    .ok_or_else(|| frame.error_at("input", format!("Operator {name} requires an input.")))?;
                let regex = match doc.get("regex") {
                    Some(Bson::String(pattern)) => rules::validate_regexp(frame, pattern, "regex")?,
                    Some(Bson::RegularExpression(re)) => {
                        rules::validate_regexp(frame, &format!("/{}/{}", re.pattern.as_str(), re.options.as_str()), "regex")?
                    }
                    _ => return Err(frame.error_at("regex", format!("Operator {name} requires a regex string."))),
                };
                Self::RegexMatch { input: guess(input, frame, "input")?, regex }
            }
        })
    }

    pub(super) async fn evaluate(&self, ec: &ExpressionContext) -> Result<Value> {
        match self {
            Self::Concat(items) => {
                let values = evaluate_all(items, ec).await?;
                if values.iter().any(Value::is_nullish) {
                    return Ok(Value::Null);
                }
                let mut out = String::new();
                for value in &values {
                    out.push_str(expect_string("$concat", value)?);
                }
                Ok(Value::String(out))
            }
            Self::ToLower(input) | Self::ToUpper(input) => {
                let value = input.evaluate(ec, EvalOptions::default()).await?;
                if value.is_nullish() {
                    return Ok(Value::String(String::new()));
                }
                let text = value.to_display_string();
                Ok(Value::String(if matches!(self, Self::ToLower(_)) { text.to_lowercase() } else { text.to_uppercase() }))
            }
            Self::Trim { side, input, chars } => {
                let value = input.evaluate(ec, EvalOptions::default()).await?;
                if value.is_nullish() {
                    return Ok(Value::Null);
                }
                let chars = match chars {
                    Some(chars) => Some(chars.evaluate(ec, EvalOptions::default()).await?),
                    None => None,
                };
                let set = match &chars {
                    Some(chars) if !chars.is_nullish() => Some(expect_string("$trim", chars)?),
                    _ => None,
                };
                Ok(Value::from(trim(*side, expect_string("$trim", &value)?, set)))
            }
            Self::Split { input, delimiter } => {
                let (value, delimiter) = evaluate_pair(input, delimiter, ec).await?;
                if value.is_nullish() {
                    return Ok(Value::Null);
                }
                let delimiter = expect_string("$split", &delimiter)?;
                if delimiter.is_empty() {
                    return Err(ExprError::invalid_argument("$split requires a non-empty delimiter."));
                }
                let parts = expect_string("$split", &value)?.split(delimiter).map(Value::from).collect();
                Ok(Value::Array(parts))
            }
            Self::StrLenCP(input) => {
                let value = input.evaluate(ec, EvalOptions::default()).await?;
                Ok(Value::from(expect_string("$strLenCP", &value)?.chars().count()))
            }
            Self::RegexMatch { input, regex } => {
                let value = input.evaluate(ec, EvalOptions::default()).await?;
                Ok(Value::Bool(value.as_str().is_some_and(|s| regex.is_match(s))))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trims_by_side_and_set() {
        assert_eq!(trim(TrimSide::Both, "  a  ", None), "a");
        assert_eq!(trim(TrimSide::Start, "xxaxx", Some("x")), "axx");
        assert_eq!(trim(TrimSide::End, "xxaxx", Some("x")), "xxa");
    }
}
