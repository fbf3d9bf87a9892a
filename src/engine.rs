//! Engine facade.
//!
//! [`EngineState`] owns one of each component, wired to a shared cache,
//! provider and settings handle, plus the background loops (detector poll
//! and pool health checks) it cancels on [`EngineState::shutdown`].

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::cache::{CacheKey, CacheStats, CacheValue, EntryType, SchemaCache, Tag};
use crate::config::{EngineSettings, SettingsHandle};
use crate::detector::SchemaChangeDetector;
use crate::error::{EngineError, EngineResult};
use crate::mapper::{
    normalize_term, AiSuggestionProvider, ElementFilter, MappingContext, SemanticMapper, SemanticMapping,
};
use crate::planner::{Aggregation, GeneratedQuery, QueryBuilder, QueryIntent, TermMappings, ValidResult};
use crate::provider::ProviderConnector;
use crate::resilience::ResilientProvider;
use crate::schema::SchemaCatalog;
use crate::store::SchemaStore;

/// Per-call options for [`EngineState::build`].
#[derive(Debug, Clone)]
pub struct BuildOptions {
    /// End-to-end budget; `provider.operation_timeout_ms` when unset.
    pub timeout: Option<Duration>,
    /// Prefer elements in these databases or tables.
    pub context: Option<MappingContext>,
    /// Dry-run the SQL on the provider before returning it.
    pub validate: bool,
    /// Cache the generated query under a hash of the intent.
    pub cache_result: bool,
}

impl Default for BuildOptions {
    fn default() -> Self {
        Self {
            timeout: None,
            context: None,
            validate: true,
            cache_result: false,
        }
    }
}

pub struct EngineState {
    settings: SettingsHandle,
    cache: Arc<SchemaCache>,
    provider: Arc<ResilientProvider>,
    catalog: SchemaCatalog,
    mapper: SemanticMapper,
    builder: QueryBuilder,
    detector: Arc<SchemaChangeDetector>,
    token: CancellationToken,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    shut_down: AtomicBool,
}

impl std::fmt::Debug for EngineState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EngineState")
            .field("endpoint", &self.provider.endpoint())
            .field("shut_down", &self.shut_down.load(Ordering::SeqCst))
            .finish_non_exhaustive()
    }
}

impl EngineState {
    /// Validate `settings`, open the store, wire every component and start
    /// the background loops.
    pub async fn init(
        settings: EngineSettings,
        connector: Arc<dyn ProviderConnector>,
        ai: Option<Arc<dyn AiSuggestionProvider>>,
    ) -> EngineResult<Self> {
        let settings = SettingsHandle::new(settings)?;
        let store = Arc::new(match settings.current().store_path() {
            Some(path) => SchemaStore::open(path)?,
            None => SchemaStore::open_in_memory()?,
        });

        let provider = Arc::new(ResilientProvider::new(connector, settings.clone()));
        let cache = Arc::new(SchemaCache::new(settings.clone()));
        let catalog = SchemaCatalog::new(cache.clone(), provider.clone(), settings.clone());

        let mut mapper = SemanticMapper::new(catalog.clone(), settings.clone()).with_store(store.clone())?;
        if let Some(ai) = ai {
            mapper = mapper.with_ai(ai);
        }
        let builder = QueryBuilder::new(catalog.clone(), settings.clone());
        let detector = Arc::new(SchemaChangeDetector::new(catalog.clone(), Some(store), settings.clone()));

        let warm_keys = settings.current().cache.warm_keys.clone();
        if !warm_keys.is_empty() {
            let warmed = cache.warm(&warm_keys, &catalog).await;
            tracing::info!(warmed, requested = warm_keys.len(), "cache warmed");
        }

        let token = CancellationToken::new();
        let tasks = vec![
            provider.spawn_health_checks(token.child_token()),
            detector.spawn(token.child_token()),
        ];
        tracing::info!(endpoint = %provider.endpoint(), "engine started");

        Ok(Self {
            settings,
            cache,
            provider,
            catalog,
            mapper,
            builder,
            detector,
            token,
            tasks: Mutex::new(tasks),
            shut_down: AtomicBool::new(false),
        })
    }

    pub fn settings(&self) -> &SettingsHandle {
        &self.settings
    }

    pub fn catalog(&self) -> &SchemaCatalog {
        &self.catalog
    }

    pub fn provider(&self) -> &Arc<ResilientProvider> {
        &self.provider
    }

    pub fn detector(&self) -> &Arc<SchemaChangeDetector> {
        &self.detector
    }

    /// Ranked mappings for `term` at or above the confidence floor.
    pub async fn resolve(
        &self,
        term: &str,
        context: Option<&MappingContext>,
        filter: Option<&ElementFilter>,
    ) -> EngineResult<Vec<SemanticMapping>> {
        self.ensure_running()?;
        let timeout = self.default_timeout();
        tokio::time::timeout(timeout, self.mapper.resolve(term, context, filter))
            .await
            .map_err(|_| EngineError::timeout("resolve", timeout))?
    }

    /// Resolve every term of `intent`, then build (and optionally validate) SQL.
    pub async fn build(&self, intent: &QueryIntent, options: &BuildOptions) -> EngineResult<GeneratedQuery> {
        self.ensure_running()?;
        let settings = self.settings.current();
        let timeout = options.timeout.unwrap_or_else(|| self.default_timeout());

        let key = options
            .cache_result
            .then(|| CacheKey::query(&(intent, &settings.query.dialect, &options.context)).ok())
            .flatten();
        if let Some(key) = &key {
            if let Some(CacheValue::Query(query)) = self.cache.get(key).as_deref() {
                tracing::debug!(key = %key, "generated query served from cache");
                return Ok(query.as_ref().clone());
            }
        }

        let epoch = self.cache.epoch();
        let generated = tokio::time::timeout(timeout, self.resolve_and_build(intent, options))
            .await
            .map_err(|_| EngineError::timeout("build", timeout))??;

        if let Some(key) = key {
            let mut tags: Vec<String> = intent.terms().iter().map(|t| Tag::metric(&normalize_term(t))).collect();
            tags.extend(generated.tables().into_iter().map(Tag::schema));
            self.cache.set_if_fresh(
                key,
                CacheValue::Query(Box::new(generated.clone())),
                EntryType::QueryResult,
                None,
                tags,
                epoch,
            );
        }
        Ok(generated)
    }

    /// Build from mappings the caller already resolved.
    pub async fn build_with_mappings(
        &self,
        intent: &QueryIntent,
        mappings: &TermMappings,
    ) -> EngineResult<GeneratedQuery> {
        self.ensure_running()?;
        self.builder.build(intent, mappings).await
    }

    /// Syntax-check `sql` locally, then dry-run it on the provider.
    pub async fn validate(&self, sql: &str) -> EngineResult<ValidResult> {
        self.ensure_running()?;
        self.builder.validate(sql).await
    }

    /// Record feedback: `chosen_path` was right (`quality > 0.5`) or wrong for `term`.
    pub fn learn(&self, term: &str, chosen_path: &str, quality: f64) -> EngineResult<()> {
        self.ensure_running()?;
        self.mapper.learn(term, chosen_path, quality)
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }

    /// Validate and publish new settings. The old settings stay live on error.
    pub fn reload(&self, settings: EngineSettings) -> EngineResult<()> {
        self.settings.update(settings)?;
        Ok(())
    }

    /// Cancel the background loops and wait for them to finish.
    pub async fn shutdown(&self) {
        if self.shut_down.swap(true, Ordering::SeqCst) {
            return;
        }
        self.token.cancel();
        let tasks: Vec<JoinHandle<()>> =
            std::mem::take(&mut *self.tasks.lock().unwrap_or_else(PoisonError::into_inner));
        for task in tasks {
            if let Err(e) = task.await {
                tracing::warn!(error = %e, "background task ended abnormally");
            }
        }
        tracing::info!("engine shut down");
    }

    async fn resolve_and_build(&self, intent: &QueryIntent, options: &BuildOptions) -> EngineResult<GeneratedQuery> {
        let metric_filter = match intent.aggregation {
            Aggregation::Count => None,
            Aggregation::Sum | Aggregation::Avg => Some(ElementFilter::numeric_columns()),
            _ => Some(ElementFilter::columns()),
        };
        let column_filter = ElementFilter::columns();

        let context = options.context.as_ref();
        let metric_key = normalize_term(&intent.metric);
        let mut mappings = TermMappings::new();
        for term in intent.terms() {
            let filter = if normalize_term(&term) == metric_key {
                metric_filter.as_ref()
            } else {
                Some(&column_filter)
            };
            let resolved = self.mapper.resolve(&term, context, filter).await?;
            mappings.insert(term, resolved);
        }

        let generated = self.builder.build(intent, &mappings).await?;
        if options.validate {
            self.builder.validate(&generated.sql).await?;
        }
        Ok(generated)
    }

    fn default_timeout(&self) -> Duration {
        Duration::from_millis(self.settings.current().provider.operation_timeout_ms)
    }

    fn ensure_running(&self) -> EngineResult<()> {
        if self.shut_down.load(Ordering::SeqCst) {
            Err(EngineError::ShutDown)
        } else {
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::{MemoryConnector, MemoryProvider};
    use crate::schema::{ColumnSchema, TableSchema};

    fn settings() -> EngineSettings {
        let mut settings = EngineSettings::default();
        settings.store.in_memory = true;
        settings
    }

    async fn engine() -> (EngineState, Arc<MemoryProvider>) {
        let provider = Arc::new(MemoryProvider::with_tables([TableSchema::new("shop", "sales")
            .column(ColumnSchema::new("id", "int").primary_key())
            .column(ColumnSchema::new("date", "date"))
            .column(ColumnSchema::new("revenue", "decimal(12,2)"))]));
        let connector = Arc::new(MemoryConnector::new("mem", provider.clone()));
        (EngineState::init(settings(), connector, None).await.unwrap(), provider)
    }

    #[tokio::test]
    async fn test_build_caches_by_intent_when_asked() {
        let (engine, provider) = engine().await;
        let intent = QueryIntent::new("revenue").aggregate(Aggregation::Sum);
        let options = BuildOptions {
            cache_result: true,
            ..BuildOptions::default()
        };

        let first = engine.build(&intent, &options).await.unwrap();
        assert_eq!(first.sql, "SELECT SUM(revenue) FROM sales");

        provider.reset_call_count();
        let second = engine.build(&intent, &options).await.unwrap();
        assert_eq!(first, second);
        assert_eq!(provider.call_count(), 0);

        engine.learn("revenue", "shop.sales.revenue", 1.0).unwrap();
        let stats = engine.cache_stats();
        assert!(stats.size > 0);
        engine.shutdown().await;
    }

    #[tokio::test]
    async fn test_reload_rejects_invalid_settings() {
        let (engine, _) = engine().await;
        let mut bad = settings();
        bad.cache.capacity = 0;
        assert!(matches!(engine.reload(bad), Err(EngineError::Configuration(_))));
        assert_eq!(engine.settings().current().cache.capacity, 10_000);
        engine.shutdown().await;
    }

    #[tokio::test]
    async fn test_calls_after_shutdown_fail() {
        let (engine, _) = engine().await;
        engine.shutdown().await;
        engine.shutdown().await;
        let err = engine.resolve("revenue", None, None).await.unwrap_err();
        assert!(matches!(err, EngineError::ShutDown));
    }
}
