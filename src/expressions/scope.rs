//! Variable and access scopes shared between expression contexts.
//!
//! A scope either owns its state or defers to a parent scope. Children point at parents, never
//! the other way around.

use crate::acl::AccessContext;
use crate::errors::{ExprError, Result};
use crate::value::Value;
use bson::{Document, doc};
use parking_lot::{Mutex, RwLock};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

struct VariableScopeInner {
    registered: HashSet<String>,
    values: Mutex<HashMap<String, Value>>,
    parent: Option<VariableScope>,
}

/// Holds the variables a node registered; lookups fall through to the parent scope.
#[derive(Clone)]
pub struct VariableScope {
    inner: Arc<VariableScopeInner>,
}

impl VariableScope {
    /// A scope needs names of its own or a parent to defer to.
    pub fn new<I, S>(registered: I, parent: Option<VariableScope>) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let registered: HashSet<String> = registered.into_iter().map(Into::into).collect();
        if registered.is_empty() && parent.is_none() {
            return Err(ExprError::invalid_argument(
                "A variable scope requires registered variables or a parent scope.",
            ));
        }
        Ok(Self {
            inner: Arc::new(VariableScopeInner { registered, values: Mutex::new(HashMap::new()), parent }),
        })
    }

    #[must_use]
    pub fn is_registered(&self, name: &str, local: bool) -> bool {
        if self.inner.registered.contains(name) {
            return true;
        }
        !local && self.inner.parent.as_ref().is_some_and(|p| p.is_registered(name, false))
    }

    /// The value of `name` from the nearest scope that registered it.
    #[must_use]
    pub fn get(&self, name: &str, local: bool) -> Value {
        if self.inner.registered.contains(name) {
            return self.inner.values.lock().get(name).cloned().unwrap_or_default();
        }
        if local {
            return Value::Undefined;
        }
        self.inner.parent.as_ref().map(|p| p.get(name, false)).unwrap_or_default()
    }

    /// Sets `name` in the nearest scope that registered it.
    pub fn set(&self, name: &str, value: Value, local: bool) -> Result<()> {
        if self.inner.registered.contains(name) {
            self.inner.values.lock().insert(name.to_string(), value);
            return Ok(());
        }
        match &self.inner.parent {
            Some(parent) if !local => parent.set(name, value, false),
            _ => Err(ExprError::invalid_query(format!("Variable {name} is not registered in this scope."))),
        }
    }

    /// Forgets this scope's own values.
    pub fn clear(&self) {
        self.inner.values.lock().clear();
    }

    #[must_use]
    pub fn to_json(&self) -> Document {
        let values = self.inner.values.lock();
        let mut names: Vec<&String> = self.inner.registered.iter().collect();
        names.sort();
        let mut vars = Document::new();
        for name in names {
            let kind = values.get(name).map_or("Unknown", Value::type_name);
            vars.insert(name.clone(), kind);
        }
        doc! { "variables": vars, "inherited": self.inner.parent.is_some() }
    }
}

enum AccessSource {
    Own(RwLock<AccessContext>),
    Inherited(AccessScope),
}

/// Holds the access context evaluation runs under, or defers to a parent's.
#[derive(Clone)]
pub struct AccessScope {
    inner: Arc<AccessSource>,
}

impl AccessScope {
    pub fn new(ac: Option<AccessContext>, parent: Option<AccessScope>) -> Result<Self> {
        let source = match (ac, parent) {
            (Some(ac), _) => AccessSource::Own(RwLock::new(ac)),
            (None, Some(parent)) => AccessSource::Inherited(parent),
            (None, None) => {
                return Err(ExprError::invalid_argument(
                    "An access scope requires an access context or a parent scope.",
                ));
            }
        };
        Ok(Self { inner: Arc::new(source) })
    }

    #[must_use]
    pub fn ac(&self) -> AccessContext {
        match self.inner.as_ref() {
            AccessSource::Own(ac) => ac.read().clone(),
            AccessSource::Inherited(parent) => parent.ac(),
        }
    }

    /// Replaces the context in the scope that owns it.
    pub fn set_ac(&self, ac: AccessContext) {
        match self.inner.as_ref() {
            AccessSource::Own(current) => *current.write() = ac,
            AccessSource::Inherited(parent) => parent.set_ac(ac),
        }
    }

    #[must_use]
    pub fn is_owned(&self) -> bool {
        matches!(self.inner.as_ref(), AccessSource::Own(_))
    }

    #[must_use]
    pub fn to_json(&self) -> Document {
        let ac = self.ac();
        doc! { "ac": ac.id(), "principal": ac.principal().id, "inherited": !self.is_owned() }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::acl::Principal;

    #[test]
    fn lookups_fall_through_to_parent() {
        let root = VariableScope::new(["$$ROOT"], None).unwrap();
        root.set("$$ROOT", Value::Int(1), false).unwrap();
        let child = VariableScope::new(["x"], Some(root.clone())).unwrap();
        assert_eq!(child.get("$$ROOT", false), Value::Int(1));
        assert!(child.get("$$ROOT", true).is_undefined());
        child.set("$$ROOT", Value::Int(2), false).unwrap();
        assert_eq!(root.get("$$ROOT", false), Value::Int(2));
        assert!(child.set("nope", Value::Null, false).is_err());
        assert!(child.set("$$ROOT", Value::Null, true).is_err());
    }

    #[test]
    fn clear_only_touches_own_values() {
        let root = VariableScope::new(["a"], None).unwrap();
        root.set("a", Value::Int(1), false).unwrap();
        let child = VariableScope::new(["b"], Some(root.clone())).unwrap();
        child.set("b", Value::Int(2), false).unwrap();
        child.clear();
        assert!(child.get("b", false).is_undefined());
        assert_eq!(child.get("a", false), Value::Int(1));
    }

    #[test]
    fn scopes_need_a_source() {
        assert!(VariableScope::new(Vec::<String>::new(), None).is_err());
        assert!(AccessScope::new(None, None).is_err());
    }

    #[test]
    fn access_scope_inherits_and_replaces() {
        let ac = AccessContext::new("acme", Principal::new("p1", "alice"));
        let root = AccessScope::new(Some(ac.clone()), None).unwrap();
        let child = AccessScope::new(None, Some(root.clone())).unwrap();
        assert_eq!(child.ac().id(), ac.id());
        let other = ac.copy();
        let own = AccessScope::new(Some(other.clone()), Some(root.clone())).unwrap();
        assert_eq!(own.ac().id(), other.id());
        assert_eq!(root.ac().id(), ac.id());
    }
}
