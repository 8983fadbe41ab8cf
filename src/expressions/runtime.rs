//! Runtime definitions and the compiled-tree cache.
//!
//! Expressions and pipelines reach the engine in three forms: an already compiled tree, a raw
//! definition, or the name of an org scoped runtime definition held by a [`RuntimeRegistry`].
//! Compiled trees are kept in an [`ExpressionCache`] keyed by content hash, `shared.<kind>.<hash>`
//! for raw definitions and `runtime.<kind>.<hash>` for registry entries.

use super::expression::ExpressionRef;
use crate::errors::Result;
use async_trait::async_trait;
use crate::utils::devlog::bench;
use bson::Bson;
use lru::LruCache;
use parking_lot::{Mutex, RwLock};
use serde_json::json;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::fmt;
use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicU64, Ordering};

/// Whether a name refers to a custom runtime definition: `c_totals` or `acme__totals`.
#[must_use]
pub fn is_custom_name(name: &str) -> bool {
    name.starts_with("c_") || name.contains("__")
}

/// Hex SHA-256 of the definition's JSON rendering.
#[must_use]
pub fn content_hash(source: &Bson) -> String {
    let json = source.clone().into_relaxed_extjson().to_string();
    hex::encode(Sha256::digest(json.as_bytes()))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RuntimeKind {
    Expression,
    Pipeline,
}

impl RuntimeKind {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            RuntimeKind::Expression => "expression",
            RuntimeKind::Pipeline => "pipeline",
        }
    }
}

impl fmt::Display for RuntimeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Something that can be turned into a compiled tree.
#[derive(Debug, Clone)]
pub enum Definition {
    Compiled(ExpressionRef),
    /// A custom name looked up in the registry.
    Named(String),
    Source(Bson),
}

impl Definition {
    /// Strings that look like custom names are looked up, everything else is a raw definition.
    #[must_use]
    pub fn guess(raw: Bson) -> Self {
        match raw {
            Bson::String(name) if is_custom_name(&name) => Definition::Named(name),
            other => Definition::Source(other),
        }
    }
}

impl From<ExpressionRef> for Definition {
    fn from(expr: ExpressionRef) -> Self {
        Definition::Compiled(expr)
    }
}

impl From<Bson> for Definition {
    fn from(raw: Bson) -> Self {
        Definition::guess(raw)
    }
}

impl From<bson::Document> for Definition {
    fn from(doc: bson::Document) -> Self {
        Definition::Source(Bson::Document(doc))
    }
}

/// A definition stored for an org.
#[derive(Debug, Clone, PartialEq)]
pub struct RuntimeDefinition {
    pub name: String,
    pub kind: RuntimeKind,
    pub source: Bson,
    pub hash: String,
}

impl RuntimeDefinition {
    #[must_use]
    pub fn new(name: impl Into<String>, kind: RuntimeKind, source: Bson) -> Self {
        let hash = content_hash(&source);
        Self { name: name.into(), kind, source, hash }
    }
}

/// Org scoped lookup of named definitions.
#[async_trait]
pub trait RuntimeRegistry: Send + Sync {
    async fn find(&self, org: &str, kind: RuntimeKind, name: &str) -> Result<Option<RuntimeDefinition>>;
}

/// Registry backed by a map, for hosts that load their definitions up front.
#[derive(Default)]
pub struct MemoryRegistry {
    entries: RwLock<HashMap<(String, RuntimeKind, String), RuntimeDefinition>>,
}

impl MemoryRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores `source` under `name`, replacing any earlier definition.
    pub fn insert(&self, org: &str, kind: RuntimeKind, name: &str, source: Bson) {
        let definition = RuntimeDefinition::new(name, kind, source);
        self.entries.write().insert((org.to_string(), kind, name.to_string()), definition);
    }

    pub fn remove(&self, org: &str, kind: RuntimeKind, name: &str) -> Option<RuntimeDefinition> {
        self.entries.write().remove(&(org.to_string(), kind, name.to_string()))
    }
}

#[async_trait]
impl RuntimeRegistry for MemoryRegistry {
    async fn find(&self, org: &str, kind: RuntimeKind, name: &str) -> Result<Option<RuntimeDefinition>> {
        Ok(self.entries.read().get(&(org.to_string(), kind, name.to_string())).cloned())
    }
}

/// Store for compiled trees.
pub trait ExpressionCache: Send + Sync {
    fn get(&self, key: &str) -> Option<ExpressionRef>;

    fn set(&self, key: String, expression: ExpressionRef);

    fn metrics(&self) -> CacheMetricsSnapshot {
        CacheMetricsSnapshot::default()
    }
}

#[derive(Default)]
pub struct CacheMetrics {
    pub hits: AtomicU64,
    pub misses: AtomicU64,
    pub inserts: AtomicU64,
    pub evictions: AtomicU64,
}

impl CacheMetrics {
    pub fn snapshot(&self) -> CacheMetricsSnapshot {
        CacheMetricsSnapshot {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            inserts: self.inserts.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheMetricsSnapshot {
    pub hits: u64,
    pub misses: u64,
    pub inserts: u64,
    pub evictions: u64,
}

/// Bounded LRU of compiled trees.
pub struct LruExpressionCache {
    store: Mutex<LruCache<String, ExpressionRef>>,
    metrics: CacheMetrics,
}

impl LruExpressionCache {
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self { store: Mutex::new(LruCache::new(capacity)), metrics: CacheMetrics::default() }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.store.lock().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl ExpressionCache for LruExpressionCache {
    fn get(&self, key: &str) -> Option<ExpressionRef> {
        let found = self.store.lock().get(key).cloned();
        let counter = if found.is_some() { &self.metrics.hits } else { &self.metrics.misses };
        counter.fetch_add(1, Ordering::Relaxed);
        let op = if found.is_some() { "hit" } else { "miss" };
        bench("expression_cache", json!({ "op": op, "key": key }));
        found
    }

    fn set(&self, key: String, expression: ExpressionRef) {
        let evicted = self.store.lock().push(key.clone(), expression);
        self.metrics.inserts.fetch_add(1, Ordering::Relaxed);
        if let Some((evicted_key, _)) = evicted {
            if evicted_key != key {
                self.metrics.evictions.fetch_add(1, Ordering::Relaxed);
                log::debug!("expression cache evicted {evicted_key}");
            }
        }
    }

    fn metrics(&self) -> CacheMetricsSnapshot {
        self.metrics.snapshot()
    }
}
