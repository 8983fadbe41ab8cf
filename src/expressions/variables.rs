//! `$$` variable references.

use super::context::ExpressionContext;
use super::expression::ParseFrame;
use crate::errors::Result;
use crate::pather::normalize_path;
use crate::value::Value;
use bson::Bson;

pub const ROOT: &str = "$$ROOT";
pub const CURSOR: &str = "$$CURSOR";
pub const OUTPUT: &str = "$$OUTPUT";
pub const CONTEXT: &str = "$$CONTEXT";
pub const REMOVE: &str = "$$REMOVE";
pub const NOW: &str = "$$NOW";
pub const SCRIPT: &str = "$$SCRIPT";
pub const REQUEST: &str = "$$REQUEST";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SystemVariable {
    Root,
    Cursor,
    Output,
    Context,
    Remove,
    Now,
    Script,
    Request,
}

impl SystemVariable {
    /// Looks up a `$$NAME` key.
    #[must_use]
    pub fn from_key(key: &str) -> Option<Self> {
        Some(match key {
            ROOT => SystemVariable::Root,
            CURSOR => SystemVariable::Cursor,
            OUTPUT => SystemVariable::Output,
            CONTEXT => SystemVariable::Context,
            REMOVE => SystemVariable::Remove,
            NOW => SystemVariable::Now,
            SCRIPT => SystemVariable::Script,
            REQUEST => SystemVariable::Request,
            _ => return None,
        })
    }

    #[must_use]
    pub fn key(self) -> &'static str {
        match self {
            SystemVariable::Root => ROOT,
            SystemVariable::Cursor => CURSOR,
            SystemVariable::Output => OUTPUT,
            SystemVariable::Context => CONTEXT,
            SystemVariable::Remove => REMOVE,
            SystemVariable::Now => NOW,
            SystemVariable::Script => SCRIPT,
            SystemVariable::Request => REQUEST,
        }
    }

    /// Variables that live in a scope; the rest are computed on read.
    fn is_scoped(self) -> bool {
        matches!(self, SystemVariable::Root | SystemVariable::Cursor | SystemVariable::Output)
    }
}

/// A parsed `$$name.path` reference.
#[derive(Debug, Clone)]
pub struct VariableRef {
    /// Scope key: `$$ROOT` style for system variables, the bare name for user variables.
    pub key: String,
    pub path: String,
    pub system: Option<SystemVariable>,
}

impl VariableRef {
    pub(crate) fn parse(raw: &str, frame: &ParseFrame<'_>) -> Result<Self> {
        let body = raw.strip_prefix("$$").unwrap_or(raw);
        let (name, path) = match body.split_once('.') {
            Some((name, path)) => (name, normalize_path(path)),
            None => (body, String::new()),
        };
        if name.is_empty() {
            return Err(frame.error(format!("Invalid variable reference: {raw}")));
        }
        let system = SystemVariable::from_key(&format!("$${name}"));
        let key = match system {
            Some(var) => {
                if matches!(var, SystemVariable::Script | SystemVariable::Request) {
                    frame.register_on_root(var.key());
                }
                if var.is_scoped() && !frame.is_registered(var.key()) {
                    return Err(frame.error(format!("Variable {} is not available here.", var.key())));
                }
                var.key().to_string()
            }
            None => {
                if !frame.is_registered(name) {
                    return Err(frame.error(format!("Undefined variable: {name}")));
                }
                name.to_string()
            }
        };
        Ok(Self { key, path, system })
    }
}

pub(crate) async fn evaluate(var: &VariableRef, ec: &ExpressionContext) -> Result<Value> {
    let value = match var.system {
        Some(SystemVariable::Remove) => return Ok(Value::Undefined),
        Some(SystemVariable::Now) => Value::Bson(Bson::DateTime(bson::DateTime::now())),
        Some(SystemVariable::Context) => Value::Context(ec.ac()),
        Some(SystemVariable::Script) => ec.script_variable().await?,
        Some(SystemVariable::Request) => ec.request_variable().await?,
        _ => ec.get_variable(&var.key),
    };
    ec.read_object(&value, &var.path).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expressions::expression::ParseOptions;

    #[test]
    fn parses_system_and_user_references() {
        let root = ParseFrame::root(ParseOptions::default());
        root.register(ROOT);
        let child = root.child("0").unwrap();
        let var = VariableRef::parse("$$ROOT.a.b", &child).unwrap();
        assert_eq!(var.key, ROOT);
        assert_eq!(var.path, "a.b");
        assert!(VariableRef::parse("$$CURSOR", &child).is_err());
        assert!(VariableRef::parse("$$item", &child).unwrap_err().reason().contains("Undefined variable"));
        child.register("item");
        assert_eq!(VariableRef::parse("$$item.x", &child).unwrap().key, "item");
        VariableRef::parse("$$SCRIPT.env", &child).unwrap();
        assert!(root.is_registered(SCRIPT));
    }
}
