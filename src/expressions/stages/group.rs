//! `$group`: buckets keyed by a computed `_id`, folded with accumulators.

use super::StageRun;
use crate::expressions::accumulators::{Accumulator, AccumulatorState};
use crate::expressions::expression::{EvalOptions, Evaluate, ExpressionRef, ParseFrame, evaluate_all};
use crate::expressions::factory::guess;
use crate::expressions::operators::is_operator_document;
use crate::expressions::rules::{self, Noun};
use crate::errors::Result;
use crate::value::{Map, Value, deep_equals};
use bson::Bson;
use futures::future::try_join_all;
use std::sync::Arc;

pub enum GroupId {
    /// Everything lands in one bucket.
    Null,
    Expression(ExpressionRef),
    /// `{ name: expr, ... }` evaluated into an object.
    Fields(Vec<(String, ExpressionRef)>),
}

pub struct GroupStage {
    id: GroupId,
    accumulators: Vec<(String, Accumulator)>,
}

impl GroupStage {
    pub(super) fn parse(name: &'static str, raw: &Bson, frame: &ParseFrame<'_>) -> Result<Self> {
        let doc = rules::value_must_be_object_with_substance(frame, Noun::Stage, name, raw, "")?;
        let id = match doc.get("_id") {
            None | Some(Bson::Null) => GroupId::Null,
            Some(raw @ Bson::Document(fields)) if !is_operator_document(raw) => {
                let mut parsed = Vec::with_capacity(fields.len());
                for (key, value) in fields {
                    rules::must_be_user_variable_format(frame, Noun::Stage, name, key, "_id")?;
                    parsed.push((key.clone(), guess(value, frame, &format!("{name}._id.{key}"))?));
                }
                GroupId::Fields(parsed)
            }
            Some(other) => GroupId::Expression(guess(other, frame, &format!("{name}._id"))?),
        };
        let mut accumulators = Vec::new();
        for (key, value) in doc.iter().filter(|(key, _)| key.as_str() != "_id") {
            rules::must_be_user_variable_format(frame, Noun::Stage, name, key, "")?;
            let entry = match value {
                Bson::Document(spec) if spec.len() == 1 => spec.iter().next(),
                _ => None,
            };
            let path = format!("{name}.{key}");
            let Some((accumulator, operand)) = entry else {
                return Err(frame.error_at(&path, "A group accumulator must be an object with a single key."));
            };
            let parsed = Accumulator::parse(accumulator, operand, frame, &path)?;
            accumulators.push((key.clone(), parsed));
        }
        Ok(Self { id, accumulators })
    }

    async fn bucket_id(&self, run: &StageRun) -> Result<Value> {
        Ok(match &self.id {
            GroupId::Null => Value::Null,
            GroupId::Expression(expr) => expr.evaluate(&run.ec, EvalOptions::default()).await?,
            GroupId::Fields(fields) => {
                let exprs: Vec<ExpressionRef> = fields.iter().map(|(_, e)| e.clone()).collect();
                let values = evaluate_all(&exprs, &run.ec).await?;
                Value::Object(fields.iter().map(|(k, _)| k.clone()).zip(values).collect::<Map>())
            }
        })
    }
}

struct Bucket {
    id: Value,
    states: Vec<AccumulatorState>,
}

/// Reads every upstream item on the first pull, then hands out one document per bucket.
pub(super) struct GroupSource {
    run: StageRun,
    spec: Arc<GroupStage>,
    output: Option<std::vec::IntoIter<Bucket>>,
}

impl GroupSource {
    pub(super) fn new(run: StageRun, spec: Arc<GroupStage>) -> Self {
        Self { run, spec, output: None }
    }

    async fn accumulate(&mut self) -> Result<Vec<Bucket>> {
        let mut buckets: Vec<Bucket> = Vec::new();
        while let Some(item) = self.run.pull_root().await? {
            if item.is_undefined() {
                continue;
            }
            let id = self.spec.bucket_id(&self.run).await?.into_unmarked();
            let index = match buckets.iter().position(|b| deep_equals(&b.id, &id)) {
                Some(index) => index,
                None => {
                    let states = self.spec.accumulators.iter().map(|_| AccumulatorState::Empty).collect();
                    buckets.push(Bucket { id, states });
                    buckets.len() - 1
                }
            };
            let states = std::mem::take(&mut buckets[index].states);
            let ec = &self.run.ec;
            buckets[index].states = try_join_all(
                self.spec.accumulators.iter().zip(states).map(|((_, acc), state)| acc.accumulate(ec, state)),
            )
            .await?;
        }
        log::debug!("$group collected {} buckets", buckets.len());
        Ok(buckets)
    }

    async fn next_item(&mut self) -> Result<Option<Value>> {
        if self.output.is_none() {
            let buckets = self.accumulate().await?;
            self.output = Some(buckets.into_iter());
        }
        let Some(bucket) = self.output.as_mut().and_then(Iterator::next) else {
            return Ok(None);
        };
        let mut out = Map::with_capacity(self.spec.accumulators.len() + 1);
        out.insert("_id".to_string(), bucket.id);
        for ((key, acc), state) in self.spec.accumulators.iter().zip(&bucket.states) {
            out.insert(key.clone(), acc.value_of(state));
        }
        Ok(Some(Value::Object(out)))
    }
}

stage_source!(GroupSource);

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expressions::expression::ParseOptions;
    use crate::expressions::variables::ROOT;
    use bson::bson;

    fn frame() -> ParseFrame<'static> {
        let frame = ParseFrame::root(ParseOptions::default());
        frame.register(ROOT);
        frame
    }

    #[test]
    fn parses_id_forms() {
        let frame = frame();
        let by_expr = GroupStage::parse("$group", &bson!({ "_id": "$k", "n": { "$sum": 1 } }), &frame).unwrap();
        assert!(matches!(by_expr.id, GroupId::Expression(_)));
        let by_op = GroupStage::parse("$group", &bson!({ "_id": { "$toLower": "$k" } }), &frame).unwrap();
        assert!(matches!(by_op.id, GroupId::Expression(_)));
        let by_fields = GroupStage::parse("$group", &bson!({ "_id": { "a": "$a", "b": "$b" } }), &frame).unwrap();
        assert!(matches!(&by_fields.id, GroupId::Fields(f) if f.len() == 2));
        let all = GroupStage::parse("$group", &bson!({ "_id": null, "n": { "$count": {} } }), &frame).unwrap();
        assert!(matches!(all.id, GroupId::Null));
    }

    #[test]
    fn rejects_bad_accumulators() {
        let frame = frame();
        let err = GroupStage::parse("$group", &bson!({ "_id": null, "n": { "$sum": 1, "$avg": 1 } }), &frame)
            .err()
            .unwrap();
        assert_eq!(err.path(), Some("$group.n"));
        assert!(GroupStage::parse("$group", &bson!({ "_id": null, "n": { "$median": 1 } }), &frame).is_err());
        assert!(GroupStage::parse("$group", &bson!({}), &frame).is_err());
    }
}
