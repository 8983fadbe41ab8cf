//! Capabilities the host platform plugs into the engine.
//!
//! The engine never talks to storage or a script sandbox itself. `$cursor` asks a [`Driver`],
//! `$function` and `$$SCRIPT` ask a [`ScriptRuntime`], `$$REQUEST` asks a [`RequestProvider`] and
//! `$as` resolves principals through a [`PrincipalResolver`]. A missing capability is reported as
//! an `unsupported` error when an expression needs it.

use crate::acl::{AccessContext, Principal};
use crate::cursor::SharedCursor;
use crate::errors::{ExprError, Result};
use crate::value::Value;
use async_trait::async_trait;
use bson::Document;

/// Runs data access operations for `$cursor` stages.
#[async_trait]
pub trait Driver: Send + Sync {
    /// Executes `operation` (e.g. `cursor`) against `object` with the remaining stage options.
    async fn execute(
        &self,
        ac: &AccessContext,
        object: &str,
        operation: &str,
        options: Document,
    ) -> Result<SharedCursor>;
}

/// Who is calling into a script facing API.
#[derive(Debug, Clone, Default)]
pub struct ScriptInvocation {
    pub principal_id: Option<String>,
    pub script_id: Option<String>,
    pub locale: String,
}

impl ScriptInvocation {
    #[must_use]
    pub fn for_context(ac: &AccessContext) -> Self {
        Self { principal_id: Some(ac.principal().id), script_id: None, locale: ac.locale() }
    }
}

#[async_trait]
pub trait ScriptRuntime: Send + Sync {
    /// Runs `source` with `arguments` and returns its result.
    async fn run(&self, ac: &AccessContext, source: &str, arguments: Vec<Value>) -> Result<Value>;

    /// The value `$$SCRIPT` resolves to. Undefined when no script is running.
    async fn environment(&self, _ac: &AccessContext) -> Result<Value> {
        Ok(Value::Undefined)
    }
}

#[async_trait]
pub trait RequestProvider: Send + Sync {
    /// The value `$$REQUEST` resolves to.
    async fn request(&self, ac: &AccessContext) -> Result<Value>;
}

#[async_trait]
pub trait PrincipalResolver: Send + Sync {
    /// Looks up the principal named by an id, email or object reference.
    async fn resolve(&self, ac: &AccessContext, reference: &Value) -> Result<Principal>;
}

/// Builds a principal from a reference without a resolver: strings and ids name themselves,
/// objects provide `_id`, `name` and `roles`.
pub fn principal_from_reference(reference: &Value) -> Result<Principal> {
    match reference.unmarked() {
        Value::String(s) if !s.is_empty() => Ok(Principal::new(s.clone(), s.clone())),
        Value::Bson(bson::Bson::ObjectId(oid)) => Ok(Principal::new(oid.to_hex(), oid.to_hex())),
        Value::Object(map) => {
            let id = match map.get("_id").map(Value::unmarked) {
                Some(Value::String(s)) => s.clone(),
                Some(Value::Bson(bson::Bson::ObjectId(oid))) => oid.to_hex(),
                _ => return Err(ExprError::invalid_argument("A principal object requires an _id.")),
            };
            let name = map.get("name").and_then(Value::as_str).map_or_else(|| id.clone(), str::to_string);
            let roles = map
                .get("roles")
                .and_then(Value::as_array)
                .map(|roles| roles.iter().filter_map(Value::as_str).map(str::to_string).collect())
                .unwrap_or_default();
            Ok(Principal { id, name, roles })
        }
        _ => Err(ExprError::invalid_argument("Invalid principal reference.")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bson::doc;

    #[test]
    fn principals_from_references() {
        assert_eq!(principal_from_reference(&Value::from("p9")).unwrap().id, "p9");
        let p = principal_from_reference(&Value::from(doc! { "_id": "p1", "name": "al", "roles": ["x"] })).unwrap();
        assert_eq!(p.name, "al");
        assert_eq!(p.roles, vec!["x".to_string()]);
        assert!(principal_from_reference(&Value::Int(1)).is_err());
        assert!(principal_from_reference(&Value::from(doc! { "name": "x" })).is_err());
    }
}
