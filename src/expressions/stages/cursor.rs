//! `$cursor`: replaces the stream with a cursor opened through the host's [`Driver`].
//!
//! The stage value evaluates to the operation options. `object` names the target and
//! `operation` defaults to `cursor`; every other key is passed to the driver untouched. Whatever
//! was flowing in before is drained and discarded first.
//!
//! [`Driver`]: crate::platform::Driver

use super::StageRun;
use crate::cursor::SharedCursor;
use crate::errors::{ExprError, Result};
use crate::expressions::expression::{EvalOptions, Evaluate, ExpressionRef, ParseFrame};
use crate::expressions::factory::guess;
use crate::expressions::variables::ROOT;
use crate::value::Value;
use bson::Bson;
use std::sync::Arc;

pub struct CursorStage {
    options: ExpressionRef,
}

impl CursorStage {
    pub(super) fn parse(name: &'static str, raw: &Bson, frame: &ParseFrame<'_>) -> Result<Self> {
        match raw {
            Bson::Document(doc) if !doc.is_empty() => Ok(Self { options: guess(raw, frame, name)? }),
            _ => Err(frame.error(format!("Stage {name} expects an object with properties."))),
        }
    }

    async fn open(&self, run: &StageRun) -> Result<SharedCursor> {
        run.ec.set_variable(ROOT, Value::Undefined)?;
        let evaluated = self.options.evaluate(&run.ec, EvalOptions::default()).await?;
        let Some(mut options) = evaluated.to_document().filter(|_| evaluated.is_object()) else {
            return Err(ExprError::invalid_argument(format!(
                "$cursor options must be an object, not {}",
                evaluated.type_name()
            )));
        };
        let object = match options.remove("object") {
            Some(Bson::String(object)) if !object.is_empty() => object,
            _ => return Err(ExprError::invalid_argument("$cursor requires an object name.")),
        };
        let operation = match options.remove("operation") {
            None => "cursor".to_string(),
            Some(Bson::String(operation)) => operation,
            Some(_) => return Err(ExprError::invalid_argument("$cursor operation must be a string.")),
        };
        let driver = run
            .ec
            .engine()
            .driver()
            .ok_or_else(|| ExprError::unsupported("No data driver is available for $cursor."))?;
        log::debug!("$cursor opening {operation} on {object}");
        driver.execute(&run.ec.ac(), &object, &operation, options).await
    }
}

pub(super) struct DriverSource {
    run: StageRun,
    spec: Arc<CursorStage>,
    opened: Option<SharedCursor>,
}

impl DriverSource {
    pub(super) fn new(run: StageRun, spec: Arc<CursorStage>) -> Self {
        Self { run, spec, opened: None }
    }

    async fn next_item(&mut self) -> Result<Option<Value>> {
        if self.opened.is_none() {
            while self.run.upstream.next().await?.is_some() {}
            self.opened = Some(self.spec.open(&self.run).await?);
        }
        match &self.opened {
            Some(cursor) => cursor.next().await,
            None => Ok(None),
        }
    }
}

#[async_trait::async_trait]
impl crate::cursor::CursorSource for DriverSource {
    async fn pull(&mut self) -> Result<Option<Value>> {
        self.next_item().await
    }

    async fn close(&mut self) -> Result<()> {
        if let Some(cursor) = self.opened.take() {
            if let Err(e) = cursor.close().await {
                log::debug!("closing $cursor source failed: {e}");
            }
        }
        self.run.release().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expressions::expression::ParseOptions;
    use bson::bson;

    #[test]
    fn needs_options() {
        let frame = ParseFrame::root(ParseOptions::default());
        assert!(CursorStage::parse("$cursor", &bson!({ "object": "account" }), &frame).is_ok());
        assert!(CursorStage::parse("$cursor", &bson!("account"), &frame).is_err());
        assert!(CursorStage::parse("$cursor", &bson!({}), &frame).is_err());
    }
}
