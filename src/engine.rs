use crate::acl::AccessContext;
use crate::config::EngineConfig;
use crate::cursor::SharedCursor;
use crate::errors::{ExprError, Result};
use crate::expressions::context::ExpressionContext;
use crate::expressions::expression::{EvalOptions, ExpressionRef};
use crate::expressions::factory::{parse_expression, parse_pipeline};
use crate::expressions::pipeline::Pipeline;
use crate::expressions::runtime::{
    Definition, ExpressionCache, LruExpressionCache, MemoryRegistry, RuntimeKind, RuntimeRegistry, content_hash,
};
use crate::platform::{Driver, PrincipalResolver, RequestProvider, ScriptRuntime};
use crate::value::Value;
use std::sync::Arc;
use std::time::Instant;

struct EngineInner {
    config: EngineConfig,
    cache: Arc<dyn ExpressionCache>,
    registry: Arc<dyn RuntimeRegistry>,
    driver: Option<Arc<dyn Driver>>,
    script_runtime: Option<Arc<dyn ScriptRuntime>>,
    request_provider: Option<Arc<dyn RequestProvider>>,
    principal_resolver: Option<Arc<dyn PrincipalResolver>>,
}

/// Entry point for hosts. Holds the configuration, the compiled-tree cache and the platform
/// capabilities expressions may call on. Cloning shares everything.
#[derive(Clone)]
pub struct Engine {
    inner: Arc<EngineInner>,
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("config", &self.inner.config)
            .field("driver", &self.inner.driver.is_some())
            .field("script_runtime", &self.inner.script_runtime.is_some())
            .finish()
    }
}

/// Builds an [`Engine`]. Without an explicit cache or registry the engine gets an LRU sized by
/// `expression_cache_capacity` and an empty [`MemoryRegistry`].
#[derive(Default)]
pub struct EngineBuilder {
    config: EngineConfig,
    cache: Option<Arc<dyn ExpressionCache>>,
    registry: Option<Arc<dyn RuntimeRegistry>>,
    driver: Option<Arc<dyn Driver>>,
    script_runtime: Option<Arc<dyn ScriptRuntime>>,
    request_provider: Option<Arc<dyn RequestProvider>>,
    principal_resolver: Option<Arc<dyn PrincipalResolver>>,
}

impl EngineBuilder {
    #[must_use]
    pub fn config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    #[must_use]
    pub fn cache(mut self, cache: Arc<dyn ExpressionCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    #[must_use]
    pub fn registry(mut self, registry: Arc<dyn RuntimeRegistry>) -> Self {
        self.registry = Some(registry);
        self
    }

    #[must_use]
    pub fn driver(mut self, driver: Arc<dyn Driver>) -> Self {
        self.driver = Some(driver);
        self
    }

    #[must_use]
    pub fn script_runtime(mut self, runtime: Arc<dyn ScriptRuntime>) -> Self {
        self.script_runtime = Some(runtime);
        self
    }

    #[must_use]
    pub fn request_provider(mut self, provider: Arc<dyn RequestProvider>) -> Self {
        self.request_provider = Some(provider);
        self
    }

    #[must_use]
    pub fn principal_resolver(mut self, resolver: Arc<dyn PrincipalResolver>) -> Self {
        self.principal_resolver = Some(resolver);
        self
    }

    #[must_use]
    pub fn build(self) -> Engine {
        let capacity = self.config.expression_cache_capacity;
        let cache = self.cache.unwrap_or_else(|| Arc::new(LruExpressionCache::new(capacity)));
        let registry = self.registry.unwrap_or_else(|| Arc::new(MemoryRegistry::new()));
        log::debug!("engine built: cache capacity {capacity}, max depth {}", self.config.max_expression_depth);
        Engine {
            inner: Arc::new(EngineInner {
                config: self.config,
                cache,
                registry,
                driver: self.driver,
                script_runtime: self.script_runtime,
                request_provider: self.request_provider,
                principal_resolver: self.principal_resolver,
            }),
        }
    }
}

impl Default for Engine {
    fn default() -> Self {
        Engine::builder().build()
    }
}

impl Engine {
    #[must_use]
    pub fn builder() -> EngineBuilder {
        EngineBuilder::default()
    }

    /// Engine configured from [`EngineConfig::load`].
    pub fn from_env() -> Result<Self> {
        Ok(Engine::builder().config(EngineConfig::load(None)?).build())
    }

    #[must_use]
    pub fn config(&self) -> &EngineConfig {
        &self.inner.config
    }

    #[must_use]
    pub fn cache(&self) -> &Arc<dyn ExpressionCache> {
        &self.inner.cache
    }

    #[must_use]
    pub fn driver(&self) -> Option<Arc<dyn Driver>> {
        self.inner.driver.clone()
    }

    #[must_use]
    pub fn script_runtime(&self) -> Option<Arc<dyn ScriptRuntime>> {
        self.inner.script_runtime.clone()
    }

    #[must_use]
    pub fn request_provider(&self) -> Option<Arc<dyn RequestProvider>> {
        self.inner.request_provider.clone()
    }

    #[must_use]
    pub fn principal_resolver(&self) -> Option<Arc<dyn PrincipalResolver>> {
        self.inner.principal_resolver.clone()
    }

    /// Compiled expression for `definition`, cached by content.
    pub async fn resolve_expression(&self, org: &str, definition: Definition) -> Result<ExpressionRef> {
        self.resolve(org, RuntimeKind::Expression, definition).await
    }

    /// Compiled pipeline for `definition`, cached by content.
    pub async fn resolve_pipeline(&self, org: &str, definition: Definition) -> Result<ExpressionRef> {
        self.resolve(org, RuntimeKind::Pipeline, definition).await
    }

    async fn resolve(&self, org: &str, kind: RuntimeKind, definition: Definition) -> Result<ExpressionRef> {
        match definition {
            Definition::Compiled(expr) => Ok(expr),
            Definition::Named(name) => {
                let Some(found) = self.inner.registry.find(org, kind, &name).await? else {
                    return Err(ExprError::not_found(format!("Runtime {kind} {name} was not found.")));
                };
                self.compile(format!("runtime.{kind}.{}", found.hash), kind, &found.source)
            }
            Definition::Source(raw) => self.compile(format!("shared.{kind}.{}", content_hash(&raw)), kind, &raw),
        }
    }

    fn compile(&self, key: String, kind: RuntimeKind, raw: &bson::Bson) -> Result<ExpressionRef> {
        if let Some(cached) = self.inner.cache.get(&key) {
            return Ok(cached);
        }
        let started = Instant::now();
        let options = self.inner.config.parse_options();
        let compiled = match kind {
            RuntimeKind::Expression => parse_expression(raw, options)?,
            RuntimeKind::Pipeline => parse_pipeline(raw, options)?,
        };
        log::debug!("compiled {key} in {:?}", started.elapsed());
        self.inner.cache.set(key, compiled.clone());
        Ok(compiled)
    }

    /// Root context for evaluating `definition` as `ac`.
    pub async fn create_context(
        &self,
        ac: AccessContext,
        kind: RuntimeKind,
        definition: impl Into<Definition>,
    ) -> Result<ExpressionContext> {
        let org = ac.org();
        let expression = self.resolve(&org, kind, definition.into()).await?;
        ExpressionContext::builder(self.clone(), expression, ac).build()
    }

    /// Evaluates an expression with the given variables bound, usually `$$ROOT`.
    pub async fn evaluate<I, S>(&self, ac: AccessContext, definition: impl Into<Definition>, variables: I) -> Result<Value>
    where
        I: IntoIterator<Item = (S, Value)>,
        S: Into<String>,
    {
        let org = ac.org();
        let expression = self.resolve_expression(&org, definition.into()).await?;
        let mut builder = ExpressionContext::builder(self.clone(), expression, ac);
        for (name, value) in variables {
            builder = builder.variable(name, value);
        }
        builder.build()?.evaluate(EvalOptions::default()).await
    }

    /// Runs a pipeline over `input` (a cursor, an array, or a single value).
    pub async fn run_pipeline(
        &self,
        ac: AccessContext,
        definition: impl Into<Definition>,
        input: Value,
    ) -> Result<SharedCursor> {
        let ec = self.create_context(ac, RuntimeKind::Pipeline, definition).await?;
        Pipeline::run(&ec, input).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::acl::Principal;
    use crate::expressions::variables::ROOT;
    use bson::{bson, doc};

    fn ac() -> AccessContext {
        AccessContext::new("acme", Principal::new("p1", "alice"))
    }

    #[tokio::test]
    async fn source_definitions_share_compiled_trees() {
        let engine = Engine::default();
        let a = engine.resolve_expression("acme", Definition::from(bson!({ "$add": [1, 2] }))).await.unwrap();
        let b = engine.resolve_expression("other", Definition::from(bson!({ "$add": [1, 2] }))).await.unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        let m = engine.cache().metrics();
        assert_eq!((m.hits, m.misses), (1, 1));
    }

    #[tokio::test]
    async fn named_definitions_come_from_the_registry() {
        let registry = Arc::new(MemoryRegistry::new());
        registry.insert("acme", RuntimeKind::Expression, "c_double", bson!({ "$multiply": ["$n", 2] }));
        let engine = Engine::builder().registry(registry).build();
        let out = engine.evaluate(ac(), bson!("c_double"), [(ROOT, Value::from(doc! { "n": 4 }))]).await.unwrap();
        assert_eq!(out, Value::Int(8));
        let other = AccessContext::new("other", Principal::new("p1", "alice"));
        let err = engine.evaluate(other, bson!("c_double"), Vec::<(String, Value)>::new()).await.unwrap_err();
        assert_eq!(err.code(), "notFound");
    }

    #[tokio::test]
    async fn runs_pipelines_lazily() {
        let engine = Engine::default();
        let input = Value::from(bson!([{ "a": 1 }, { "a": 2 }, { "a": 3 }]));
        let cursor = engine
            .run_pipeline(ac(), bson!([{ "$match": { "$gt": ["$a", 1] } }, { "$limit": 1 }]), input)
            .await
            .unwrap();
        assert_eq!(cursor.collect().await.unwrap(), vec![Value::from(doc! { "a": 2 })]);
    }

    #[tokio::test]
    async fn pipelines_require_pipeline_contexts() {
        let engine = Engine::default();
        let ec = engine.create_context(ac(), RuntimeKind::Expression, bson!(1)).await.unwrap();
        assert!(Pipeline::run(&ec, Value::Null).await.is_err());
    }
}
