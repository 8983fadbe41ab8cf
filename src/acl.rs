//! Access contexts and the subjects expressions may read through.

use crate::errors::Result;
use crate::value::Value;
use async_trait::async_trait;
use bson::{Document, doc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

/// The identity an access context acts as.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Principal {
    #[serde(rename = "_id")]
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub roles: Vec<String>,
}

impl Principal {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self { id: id.into(), name: name.into(), roles: Vec::new() }
    }

    #[must_use]
    pub fn with_roles<I, S>(mut self, roles: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.roles = roles.into_iter().map(Into::into).collect();
        self
    }

    fn to_document(&self) -> Document {
        doc! { "_id": self.id.clone(), "name": self.name.clone(), "roles": self.roles.clone() }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct AccessState {
    org: String,
    principal: Principal,
    grant: Option<String>,
    roles: Vec<String>,
    scope: Vec<String>,
    req: Option<String>,
    locale: String,
}

/// The principal, org and privileges evaluation happens under.
///
/// Cloning shares the context; [`AccessContext::copy`] makes an independent one.
#[derive(Debug, Clone)]
pub struct AccessContext {
    id: String,
    state: Arc<RwLock<AccessState>>,
}

impl AccessContext {
    pub fn new(org: impl Into<String>, principal: Principal) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            state: Arc::new(RwLock::new(AccessState {
                org: org.into(),
                principal,
                grant: None,
                roles: Vec::new(),
                scope: Vec::new(),
                req: None,
                locale: "en_US".to_string(),
            })),
        }
    }

    /// A new context with its own id and a snapshot of this one's state.
    #[must_use]
    pub fn copy(&self) -> Self {
        Self { id: Uuid::new_v4().to_string(), state: Arc::new(RwLock::new(self.state.read().clone())) }
    }

    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    #[must_use]
    pub fn org(&self) -> String {
        self.state.read().org.clone()
    }

    #[must_use]
    pub fn principal(&self) -> Principal {
        self.state.read().principal.clone()
    }

    pub fn set_principal(&self, principal: Principal) {
        self.state.write().principal = principal;
    }

    #[must_use]
    pub fn grant(&self) -> Option<String> {
        self.state.read().grant.clone()
    }

    pub fn set_grant(&self, grant: impl Into<String>) {
        self.state.write().grant = Some(grant.into());
    }

    #[must_use]
    pub fn roles(&self) -> Vec<String> {
        self.state.read().roles.clone()
    }

    /// Adds roles on top of the principal's own, skipping duplicates.
    pub fn add_roles<I, S>(&self, roles: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut st = self.state.write();
        for role in roles {
            let role = role.into();
            if !st.roles.contains(&role) {
                st.roles.push(role);
            }
        }
    }

    #[must_use]
    pub fn scope(&self) -> Vec<String> {
        self.state.read().scope.clone()
    }

    pub fn set_scope(&self, scope: Vec<String>) {
        self.state.write().scope = scope;
    }

    #[must_use]
    pub fn locale(&self) -> String {
        self.state.read().locale.clone()
    }

    pub fn set_locale(&self, locale: impl Into<String>) {
        self.state.write().locale = locale.into();
    }

    pub fn set_request_id(&self, req: impl Into<String>) {
        self.state.write().req = Some(req.into());
    }

    /// Plain object snapshot, what `$$CONTEXT` reads see.
    #[must_use]
    pub fn to_object(&self) -> Document {
        let st = self.state.read();
        let mut out = doc! {
            "_id": self.id.clone(),
            "org": st.org.clone(),
            "principal": st.principal.to_document(),
            "roles": st.roles.clone(),
            "scope": st.scope.clone(),
            "locale": st.locale.clone(),
        };
        if let Some(grant) = &st.grant {
            out.insert("grant", grant.clone());
        }
        if let Some(req) = &st.req {
            out.insert("req", req.clone());
        }
        out
    }
}

/// Options passed to subject reads.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadOptions {
    pub grant: String,
    pub passive: bool,
    pub allow_null_subject: bool,
    pub read_from_linked_references: bool,
}

impl Default for ReadOptions {
    fn default() -> Self {
        Self { grant: "read".to_string(), passive: true, allow_null_subject: true, read_from_linked_references: true }
    }
}

/// A document whose reads are gated by access control.
#[async_trait]
pub trait AccessSubject: Send + Sync {
    fn object_name(&self) -> &str;

    fn id(&self) -> Option<String> {
        None
    }

    fn is_new(&self) -> bool {
        false
    }

    /// A linked document reachable under `name`, if one was loaded alongside this subject.
    fn linked(&self, _name: &str) -> Option<Arc<dyn AccessSubject>> {
        None
    }

    /// The whole document as `principal` may see it.
    async fn acl_read_one(&self, principal: &Principal, options: &ReadOptions) -> Result<Value>;

    /// One path of the document as `principal` may see it.
    async fn acl_read_path(&self, principal: &Principal, path: &str, options: &ReadOptions) -> Result<Value>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn copy_is_independent() {
        let ac = AccessContext::new("acme", Principal::new("p1", "alice"));
        let other = ac.copy();
        other.set_principal(Principal::new("p2", "bob"));
        other.add_roles(["admin", "admin"]);
        assert_ne!(ac.id(), other.id());
        assert_eq!(ac.principal().name, "alice");
        assert_eq!(other.roles(), vec!["admin".to_string()]);
    }

    #[test]
    fn object_snapshot() {
        let ac = AccessContext::new("acme", Principal::new("p1", "alice").with_roles(["dev"]));
        ac.set_grant("read");
        let snap = ac.to_object();
        assert_eq!(snap.get_str("org").unwrap(), "acme");
        assert_eq!(snap.get_str("grant").unwrap(), "read");
        assert_eq!(snap.get_document("principal").unwrap().get_str("name").unwrap(), "alice");
    }
}
