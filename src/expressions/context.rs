//! Evaluation frames.
//!
//! An [`ExpressionContext`] binds one expression node to a variable scope and an access scope and
//! records how often and how long the nodes evaluated under it ran. Children that need their own
//! scope are cached on the parent under the child's path so loops re-use them.

use super::expression::{EvalOptions, Evaluate, ExpressionRef, join_path};
use super::scope::{AccessScope, VariableScope};
use crate::acl::{AccessContext, AccessSubject, ReadOptions};
use crate::cursor::SharedCursor;
use crate::engine::Engine;
use crate::errors::{ExprError, Result};
use crate::logger::METRICS_TARGET;
use crate::memo::Memo;
use crate::pather::{Pather, split_path};
use crate::utils::devlog::bench;
use crate::utils::num::{duration_ms, usize_to_i64_saturating};
use crate::value::{Map, Value};
use bson::{Document, doc};
use indexmap::IndexMap;
use lru::LruCache;
use once_cell::sync::Lazy;
use parking_lot::Mutex;
use serde_json::json;
use std::num::NonZeroUsize;
use std::sync::Arc;
use std::time::Duration;

static EXPRESSION_PATHER: Lazy<Pather> = Lazy::new(Pather::expression);

/// Cumulative evaluation stats for one path.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct EvaluationStats {
    pub count: u64,
    pub ms: f64,
}

#[derive(Default)]
struct RootState {
    script: tokio::sync::OnceCell<Value>,
    request: tokio::sync::OnceCell<Value>,
}

struct ContextInner {
    engine: Engine,
    expression: ExpressionRef,
    depth: usize,
    root_path: Option<String>,
    access_scope: AccessScope,
    variable_scope: VariableScope,
    root: Arc<RootState>,
    evaluations: Mutex<IndexMap<String, EvaluationStats>>,
    contexts: Mutex<IndexMap<String, ExpressionContext>>,
    snapshots: Mutex<LruCache<String, Value>>,
}

/// Builds a root [`ExpressionContext`].
pub struct ContextBuilder {
    engine: Engine,
    expression: ExpressionRef,
    ac: AccessContext,
    variables: Vec<(String, Value)>,
    depth: usize,
    path: Option<String>,
}

impl ContextBuilder {
    /// Sets a variable the root expression registered, e.g. `$$ROOT`.
    #[must_use]
    pub fn variable(mut self, name: impl Into<String>, value: Value) -> Self {
        self.variables.push((name.into(), value));
        self
    }

    /// Starting depth, for contexts created on behalf of another evaluation.
    #[must_use]
    pub fn depth(mut self, depth: usize) -> Self {
        self.depth = depth;
        self
    }

    /// Prefix for the full paths recorded by this context.
    #[must_use]
    pub fn path(mut self, path: impl Into<String>) -> Self {
        self.path = Some(path.into());
        self
    }

    pub fn build(self) -> Result<ExpressionContext> {
        let variable_scope = VariableScope::new(self.expression.registered().iter().cloned(), None)?;
        let access_scope = AccessScope::new(Some(self.ac), None)?;
        let ec = ExpressionContext::assemble(
            self.engine,
            self.expression,
            self.depth,
            self.path,
            access_scope,
            variable_scope,
            Arc::new(RootState::default()),
        );
        for (name, value) in self.variables {
            ec.set_variable(&name, value)?;
        }
        Ok(ec)
    }
}

/// One evaluation frame. Cloning shares the frame.
#[derive(Clone)]
pub struct ExpressionContext {
    inner: Arc<ContextInner>,
}

impl ExpressionContext {
    pub fn builder(engine: Engine, expression: ExpressionRef, ac: AccessContext) -> ContextBuilder {
        ContextBuilder { engine, expression, ac, variables: Vec::new(), depth: 1, path: None }
    }

    fn assemble(
        engine: Engine,
        expression: ExpressionRef,
        depth: usize,
        root_path: Option<String>,
        access_scope: AccessScope,
        variable_scope: VariableScope,
        root: Arc<RootState>,
    ) -> Self {
        let capacity = NonZeroUsize::new(engine.config().access_context_cache_capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            inner: Arc::new(ContextInner {
                engine,
                expression,
                depth,
                root_path,
                access_scope,
                variable_scope,
                root,
                evaluations: Mutex::new(IndexMap::new()),
                contexts: Mutex::new(IndexMap::new()),
                snapshots: Mutex::new(LruCache::new(capacity)),
            }),
        }
    }

    #[must_use]
    pub fn engine(&self) -> &Engine {
        &self.inner.engine
    }

    #[must_use]
    pub fn expression(&self) -> &ExpressionRef {
        &self.inner.expression
    }

    #[must_use]
    pub fn depth(&self) -> usize {
        self.inner.depth
    }

    #[must_use]
    pub fn root_path(&self) -> Option<&str> {
        self.inner.root_path.as_deref()
    }

    /// Whether this frame was created for `expression`.
    #[must_use]
    pub fn is_for(&self, expression: &ExpressionRef) -> bool {
        Arc::ptr_eq(&self.inner.expression, expression)
    }

    #[must_use]
    pub fn ac(&self) -> AccessContext {
        self.inner.access_scope.ac()
    }

    /// Replaces the access context in the nearest scope that owns one.
    pub fn set_ac(&self, ac: AccessContext) {
        self.inner.access_scope.set_ac(ac);
    }

    #[must_use]
    pub fn variable_scope(&self) -> &VariableScope {
        &self.inner.variable_scope
    }

    #[must_use]
    pub fn get_variable(&self, name: &str) -> Value {
        self.inner.variable_scope.get(name, false)
    }

    pub fn set_variable(&self, name: &str, value: Value) -> Result<()> {
        self.inner.variable_scope.set(name, value, false)
    }

    /// `expression`'s full path prefixed with this frame's root path.
    #[must_use]
    pub fn get_full_path(&self, expression: &ExpressionRef) -> String {
        match &self.inner.root_path {
            Some(root) => join_path(root, expression.full_path()),
            None => expression.full_path().to_string(),
        }
    }

    fn spawn(
        &self,
        expression: ExpressionRef,
        access_scope: AccessScope,
        variable_scope: VariableScope,
        root_path: Option<String>,
        root: Arc<RootState>,
    ) -> Self {
        Self::assemble(
            self.inner.engine.clone(),
            expression,
            self.inner.depth + 1,
            root_path,
            access_scope,
            variable_scope,
            root,
        )
    }

    /// The cached child frame for a node with local variables, its own values cleared.
    pub fn scoped_child(&self, expression: &ExpressionRef) -> Result<ExpressionContext> {
        let key = expression.full_path().to_string();
        let mut contexts = self.inner.contexts.lock();
        if let Some(existing) = contexts.get(&key) {
            if existing.is_for(expression) {
                existing.inner.variable_scope.clear();
                return Ok(existing.clone());
            }
        }
        let variable_scope =
            VariableScope::new(expression.registered().iter().cloned(), Some(self.inner.variable_scope.clone()))?;
        let child = self.spawn(
            expression.clone(),
            self.inner.access_scope.clone(),
            variable_scope,
            self.inner.root_path.clone(),
            self.inner.root.clone(),
        );
        contexts.insert(key, child.clone());
        Ok(child)
    }

    /// The cached child frame that evaluates `expression` as `ac`.
    pub fn access_child(&self, key: &str, expression: &ExpressionRef, ac: AccessContext) -> Result<ExpressionContext> {
        let key = format!("as:{key}");
        let mut contexts = self.inner.contexts.lock();
        if let Some(existing) = contexts.get(&key) {
            if existing.is_for(expression) && existing.inner.access_scope.is_owned() {
                existing.inner.access_scope.set_ac(ac);
                existing.inner.variable_scope.clear();
                return Ok(existing.clone());
            }
        }
        let access_scope = AccessScope::new(Some(ac), Some(self.inner.access_scope.clone()))?;
        let variable_scope =
            VariableScope::new(expression.registered().iter().cloned(), Some(self.inner.variable_scope.clone()))?;
        let child = self.spawn(
            expression.clone(),
            access_scope,
            variable_scope,
            self.inner.root_path.clone(),
            self.inner.root.clone(),
        );
        contexts.insert(key, child.clone());
        Ok(child)
    }

    /// The cached child frame for a separately compiled tree. Its paths are recorded under
    /// `path` and its variables start from scratch.
    pub fn runtime_child(&self, key: &str, expression: &ExpressionRef, path: &str) -> Result<ExpressionContext> {
        let key = format!("runtime:{key}");
        let mut contexts = self.inner.contexts.lock();
        if let Some(existing) = contexts.get(&key) {
            if existing.is_for(expression) {
                existing.inner.variable_scope.clear();
                return Ok(existing.clone());
            }
        }
        let mut registered: Vec<String> = expression.registered().to_vec();
        if registered.is_empty() {
            registered.push(super::variables::ROOT.to_string());
        }
        let variable_scope = VariableScope::new(registered, None)?;
        let child = self.spawn(
            expression.clone(),
            self.inner.access_scope.clone(),
            variable_scope,
            Some(path.to_string()),
            Arc::new(RootState::default()),
        );
        contexts.insert(key, child.clone());
        Ok(child)
    }

    /// Checks the static and dynamic depth before `expression` runs.
    pub fn enter(&self, expression: &ExpressionRef) -> Result<()> {
        let max = self.inner.engine.config().max_expression_depth;
        if expression.depth() > max || self.inner.depth > max {
            return Err(ExprError::invalid_query(format!("Maximum expression depth ({max}) exceeded"))
                .with_path(self.get_full_path(expression)));
        }
        Ok(())
    }

    /// Records the run, then hands back the result with its path stamped on failure.
    pub fn exit(&self, expression: &ExpressionRef, result: Result<Value>, elapsed: Duration) -> Result<Value> {
        let ms = duration_ms(elapsed);
        let full_path = self.get_full_path(expression);
        {
            let mut evaluations = self.inner.evaluations.lock();
            let stats = evaluations.entry(full_path.clone()).or_default();
            stats.count += 1;
            stats.ms += ms;
        }
        let slow = self.inner.engine.config().slow_evaluation_ms;
        if slow > 0 && ms >= slow as f64 {
            log::warn!(target: METRICS_TARGET, "slow evaluation path={full_path} ms={ms:.3}");
            bench("slow", json!({ "path": &full_path, "ms": ms }));
        }
        result.map_err(|e| e.with_path(full_path))
    }

    #[must_use]
    pub fn stats(&self, full_path: &str) -> Option<EvaluationStats> {
        self.inner.evaluations.lock().get(full_path).copied()
    }

    /// Evaluates this frame's own expression.
    pub async fn evaluate(&self, options: EvalOptions) -> Result<Value> {
        let expression = self.inner.expression.clone();
        expression.evaluate(self, options).await
    }

    /// Evaluates this frame on its own task when a tokio runtime is running. Runtime definitions
    /// can nest until the depth limit, and each level would otherwise sit on the caller's stack.
    pub async fn evaluate_detached(&self, options: EvalOptions) -> Result<Value> {
        if tokio::runtime::Handle::try_current().is_err() {
            return self.evaluate(options).await;
        }
        let frame = self.clone();
        match tokio::spawn(async move { frame.evaluate(options).await }).await {
            Ok(result) => result,
            Err(e) if e.is_panic() => std::panic::resume_unwind(e.into_panic()),
            Err(e) => Err(ExprError::cursor(format!("evaluation task was cancelled: {e}"))),
        }
    }

    /// Value of `$$SCRIPT`, resolved once per tree.
    pub async fn script_variable(&self) -> Result<Value> {
        let set = self.get_variable(super::variables::SCRIPT);
        if !set.is_undefined() {
            return Ok(set);
        }
        let runtime = self.inner.engine.script_runtime();
        let ac = self.ac();
        self.inner
            .root
            .script
            .get_or_try_init(|| async move {
                match runtime {
                    Some(runtime) => runtime.environment(&ac).await,
                    None => Ok(Value::Undefined),
                }
            })
            .await
            .cloned()
    }

    /// Value of `$$REQUEST`, resolved once per tree.
    pub async fn request_variable(&self) -> Result<Value> {
        let set = self.get_variable(super::variables::REQUEST);
        if !set.is_undefined() {
            return Ok(set);
        }
        let provider = self.inner.engine.request_provider();
        let ac = self.ac();
        self.inner
            .root
            .request
            .get_or_try_init(|| async move {
                match provider {
                    Some(provider) => provider.request(&ac).await,
                    None => Ok(Value::Undefined),
                }
            })
            .await
            .cloned()
    }

    /// Resolves `path` against `object`.
    ///
    /// Subjects and memos take over the rest of the path as soon as the walk reaches them, so
    /// nested reads go through their access checks. An empty path resolves arrays and plain
    /// objects one element at a time.
    pub async fn read_object(&self, object: &Value, path: &str) -> Result<Value> {
        let parts = split_path(path);
        if parts.is_empty() {
            return match object {
                Value::Array(items) => {
                    let mut out = Vec::with_capacity(items.len());
                    for item in items {
                        out.push(self.read(item, None).await?);
                    }
                    Ok(Value::Array(out))
                }
                Value::Object(map) => {
                    let mut out = Map::with_capacity(map.len());
                    for (key, item) in map {
                        out.insert(key.clone(), self.read(item, None).await?);
                    }
                    Ok(Value::Object(out))
                }
                other => self.read(other, None).await,
            };
        }

        let mut current = object.clone();
        for (index, part) in parts.iter().enumerate() {
            if matches!(current, Value::Subject(_) | Value::Memo(_)) {
                let rest = parts[index..].join(".");
                return self.read(&current, Some(&rest)).await;
            }
            current = self.read(&current, Some(part)).await?;
            if current.is_undefined() {
                return Ok(Value::Undefined);
            }
        }
        match current {
            Value::Subject(_) => self.read(&current, None).await,
            other => Ok(other),
        }
    }

    async fn read(&self, document: &Value, path: Option<&str>) -> Result<Value> {
        match document {
            Value::Literal(_) => Ok(self.read_value(document, path)),
            Value::Subject(subject) => self.read_subject(subject, path).await,
            Value::Cursor(cursor) => self.read_cursor(cursor, path).await,
            Value::Memo(memo) => self.read_memo(memo, path),
            Value::Context(ac) => {
                let snapshot = self.context_snapshot(ac);
                Ok(self.read_value(&snapshot, path))
            }
            _ => Ok(self.read_value(document, path)),
        }
    }

    async fn read_subject(&self, subject: &Arc<dyn AccessSubject>, path: Option<&str>) -> Result<Value> {
        let principal = self.ac().principal();
        let options = ReadOptions::default();
        match path {
            Some("isNew") => Ok(Value::Bool(subject.is_new())),
            Some(path) if !path.is_empty() => {
                let (head, rest) = match path.split_once('.') {
                    Some((head, rest)) => (head, Some(rest)),
                    None => (path, None),
                };
                if options.read_from_linked_references {
                    if let Some(linked) = subject.linked(head) {
                        return match rest {
                            Some(rest) => linked.acl_read_path(&principal, rest, &options).await,
                            None => linked.acl_read_one(&principal, &options).await,
                        };
                    }
                }
                subject.acl_read_path(&principal, path, &options).await
            }
            _ => subject.acl_read_one(&principal, &options).await,
        }
    }

    async fn read_cursor(&self, cursor: &SharedCursor, path: Option<&str>) -> Result<Value> {
        match path {
            Some("position") => Ok(Value::from(cursor.position())),
            Some("hasNext") => Ok(Value::Bool(cursor.try_has_next().await?)),
            _ => Ok(self.read_value(&cursor.snapshot(), path)),
        }
    }

    fn read_memo(&self, memo: &Memo, path: Option<&str>) -> Result<Value> {
        let path = path.unwrap_or_default();
        let (head, rest) = match path.split_once('.') {
            Some((head, rest)) => (head, Some(rest)),
            None => (path, None),
        };
        match head {
            "getSize" => memo.get_size().map(Value::from),
            "isArray" => Ok(Value::Bool(memo.is_array(rest))),
            "getLength" => memo.get_length(rest),
            "typeOf" => Ok(Value::from(memo.type_of(rest))),
            "" => Ok(memo.get(None)),
            _ => Ok(memo.get(Some(path))),
        }
    }

    fn read_value(&self, document: &Value, path: Option<&str>) -> Value {
        EXPRESSION_PATHER.read(document, path.unwrap_or_default())
    }

    fn context_snapshot(&self, ac: &AccessContext) -> Value {
        let mut snapshots = self.inner.snapshots.lock();
        if let Some(hit) = snapshots.get(ac.id()) {
            return hit.clone();
        }
        let snapshot = Value::from(ac.to_object());
        snapshots.put(ac.id().to_string(), snapshot.clone());
        snapshot
    }

    /// Diagnostics: this frame's stats, scopes and cached children.
    #[must_use]
    pub fn to_json(&self) -> Document {
        let own_path = self.get_full_path(&self.inner.expression);
        let mut evaluations = Document::new();
        let mut own = None;
        for (path, stats) in self.inner.evaluations.lock().iter() {
            if *path == own_path {
                own = Some(*stats);
            }
            evaluations.insert(
                path.clone(),
                doc! { "count": i64::try_from(stats.count).unwrap_or(i64::MAX), "ms": stats.ms },
            );
        }
        let children: Vec<(String, ExpressionContext)> =
            self.inner.contexts.lock().iter().map(|(k, c)| (k.clone(), c.clone())).collect();
        let mut contexts = Document::new();
        for (key, child) in children {
            contexts.insert(key, child.to_json());
        }
        let mut out = doc! {
            "path": own_path,
            "depth": usize_to_i64_saturating(self.inner.depth),
            "accessScope": self.inner.access_scope.to_json(),
            "variableScope": self.inner.variable_scope.to_json(),
            "evaluations": evaluations,
            "contexts": contexts,
        };
        if let Some(stats) = own {
            out.insert("count", i64::try_from(stats.count).unwrap_or(i64::MAX));
            out.insert("ms", stats.ms);
        }
        out
    }
}
