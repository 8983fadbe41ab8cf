//! `$as`: evaluate an expression as a different principal.

use super::super::context::ExpressionContext;
use super::super::expression::{EvalOptions, Evaluate, ExpressionRef, ParseFrame};
use super::super::factory::guess;
use super::super::rules::{self, Noun};
use crate::acl::AccessContext;
use crate::errors::{ExprError, Result};
use crate::platform::principal_from_reference;
use crate::value::Value;
use bson::Bson;

/// `{ $as: { input, in } }`.
///
/// `input` names the principal, either directly (id, email or principal object) or as
/// `{ principal, grant, roles, scope }`. The caller's access context is copied, never changed.
pub struct AsOperator {
    input: ExpressionRef,
    inner: ExpressionRef,
}

impl AsOperator {
    pub(super) fn parse(name: &'static str, raw: &Bson, frame: &ParseFrame<'_>) -> Result<Self> {
        let doc = rules::value_must_be_object_with_substance(frame, Noun::Operator, name, raw, "")?;
        let input = match doc.get("input") {
            Some(input) => guess(input, frame, "input")?,
            None => return Err(frame.error_at("input", format!("Operator {name} requires an input."))),
        };
        let inner = match doc.get("in") {
            Some(inner) => guess(inner, frame, "in")?,
            None => return Err(frame.error_at("in", format!("Operator {name} requires an in expression."))),
        };
        Ok(Self { input, inner })
    }

    pub(super) async fn evaluate(&self, expr: &ExpressionRef, ec: &ExpressionContext) -> Result<Value> {
        let input = self.input.evaluate(ec, EvalOptions::default()).await?;
        let ac = impersonate(ec, &input).await?;
        let child = ec.access_child(&ec.get_full_path(expr), &self.inner, ac)?;
        self.inner.evaluate(&child, EvalOptions::default()).await
    }
}

async fn impersonate(ec: &ExpressionContext, input: &Value) -> Result<AccessContext> {
    let ac = ec.ac().copy();
    let options = input.as_object();
    let reference = match options {
        Some(map) if map.contains_key("principal") => map.get("principal").cloned(),
        Some(map) if map.contains_key("_id") => Some(input.clone()),
        Some(_) => None,
        None if input.is_nullish() => {
            return Err(ExprError::invalid_argument("$as requires a principal."));
        }
        None => Some(input.clone()),
    };

    if let Some(reference) = reference {
        let principal = match ec.engine().principal_resolver() {
            Some(resolver) => resolver.resolve(&ac, &reference).await?,
            None => principal_from_reference(&reference)?,
        };
        log::debug!("evaluating as principal {} in org {}", principal.id, ac.org());
        ac.set_principal(principal);
    }

    if let Some(map) = options {
        if let Some(grant) = map.get("grant").and_then(Value::as_str) {
            ac.set_grant(grant);
        }
        if let Some(roles) = map.get("roles").and_then(Value::as_array) {
            ac.add_roles(roles.iter().filter_map(Value::as_str));
        }
        if let Some(scope) = map.get("scope").and_then(Value::as_array) {
            ac.set_scope(scope.iter().filter_map(Value::as_str).map(str::to_string).collect());
        }
    }
    Ok(ac)
}
