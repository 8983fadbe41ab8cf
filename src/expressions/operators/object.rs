//! `$object` and `$mergeObjects`.

use super::super::context::ExpressionContext;
use super::super::expression::{ExpressionRef, ParseFrame, evaluate_all};
use super::super::factory::guess;
use super::super::rules::{self, Noun};
use super::operands;
use crate::errors::{ExprError, Result};
use crate::value::{Map, Value};
use bson::Bson;

pub enum ObjectOperator {
    /// `{ $object: { key: expr } }`; undefined values are left out.
    Object(Vec<(String, ExpressionRef)>),
    /// Shallow merge, later objects win. Null and undefined are skipped.
    MergeObjects(Vec<ExpressionRef>),
}

impl ObjectOperator {
    pub const NAMES: [&'static str; 2] = ["$object", "$mergeObjects"];

    pub(super) fn parse(name: &'static str, raw: &Bson, frame: &ParseFrame<'_>) -> Result<Self> {
        if name == "$mergeObjects" {
            return Ok(Self::MergeObjects(operands(raw, frame)?));
        }
        let doc = rules::value_must_be_object(frame, Noun::Operator, name, raw, "")?;
        let fields = doc
            .iter()
            .map(|(key, value)| Ok((key.clone(), guess(value, frame, key)?)))
            .collect::<Result<Vec<_>>>()?;
        Ok(Self::Object(fields))
    }

    pub(super) async fn evaluate(&self, ec: &ExpressionContext) -> Result<Value> {
        match self {
            Self::Object(fields) => {
                let exprs: Vec<ExpressionRef> = fields.iter().map(|(_, e)| e.clone()).collect();
                let values = evaluate_all(&exprs, ec).await?;
                let mut out = Map::with_capacity(fields.len());
                for ((key, _), value) in fields.iter().zip(values) {
                    if !value.is_undefined() {
                        out.insert(key.clone(), value);
                    }
                }
                Ok(Value::Object(out))
            }
            Self::MergeObjects(items) => {
                let mut out = Map::new();
                for value in evaluate_all(items, ec).await? {
                    if value.is_nullish() {
                        continue;
                    }
                    let Some(map) = value.as_object() else {
                        return Err(ExprError::invalid_argument(format!(
                            "$mergeObjects requires object inputs, not {}",
                            value.type_name()
                        )));
                    };
                    for (key, item) in map {
                        out.insert(key.clone(), item.clone());
                    }
                }
                Ok(Value::Object(out))
            }
        }
    }
}
