//! Resilience layer wrapped around every remote provider call.
//!
//! Each network attempt goes breaker permit → pool connection → per-call
//! timeout. Transient failures (timeouts, dropped or refused connections)
//! are retried with backoff and count toward the breaker; anything else is
//! the provider answering and surfaces immediately.

pub mod circuit;
pub mod pool;
pub mod retry;

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

pub use circuit::{BreakerOpen, CallPermit, CircuitBreaker, CircuitState};
pub use pool::{ConnectionPool, PoolError, PoolStats, PooledConnection};
pub use retry::RetryPolicy;

use crate::config::SettingsHandle;
use crate::error::{EngineError, EngineResult};
use crate::provider::{ProviderConnector, ProviderError, SchemaProvider};
use crate::schema::{DatabaseInfo, QueryResult, TableInfo, TableSchema};

/// Provider facade used by the rest of the engine.
pub struct ResilientProvider {
    pool: ConnectionPool,
    breaker: CircuitBreaker,
    settings: SettingsHandle,
}

enum AttemptError {
    Provider(ProviderError),
    Exhausted(Duration),
}

/// Whether a call may be re-sent after a transient failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Replay {
    Transient,
    Never,
}

impl ResilientProvider {
    pub fn new(connector: Arc<dyn ProviderConnector>, settings: SettingsHandle) -> Self {
        let current = settings.current();
        let endpoint = connector.endpoint().to_string();
        Self {
            pool: ConnectionPool::new(connector, &current.resilience.pool),
            breaker: CircuitBreaker::new(endpoint),
            settings,
        }
    }

    pub fn endpoint(&self) -> &str {
        self.breaker.endpoint()
    }

    pub fn circuit_state(&self) -> CircuitState {
        self.breaker.state()
    }

    pub fn breaker(&self) -> &CircuitBreaker {
        &self.breaker
    }

    pub fn pool(&self) -> &ConnectionPool {
        &self.pool
    }

    /// Start the pool's timer-driven health checks.
    pub fn spawn_health_checks(&self, token: CancellationToken) -> JoinHandle<()> {
        let interval = Duration::from_secs(
            self.settings
                .current()
                .resilience
                .pool
                .health_check_interval_seconds,
        );
        self.pool.spawn_health_checks(interval, token)
    }

    pub async fn discover_databases(&self) -> EngineResult<Vec<DatabaseInfo>> {
        self.call("discover_databases", None, |conn| async move { conn.discover_databases().await })
            .await
    }

    pub async fn discover_tables(&self, database: &str) -> EngineResult<Vec<TableInfo>> {
        self.call("discover_tables", None, |conn| async move { conn.discover_tables(database).await })
            .await
    }

    pub async fn describe_table(&self, database: &str, table: &str) -> EngineResult<TableSchema> {
        self.call("describe_table", None, |conn| async move {
            conn.describe_table(database, table).await
        })
        .await
    }

    /// Run a statement once. `timeout` bounds the remote execution and
    /// replaces the configured request timeout for this call.
    ///
    /// Never retried: a timed-out statement may still have run.
    pub async fn execute_query(&self, sql: &str, timeout: Duration) -> EngineResult<QueryResult> {
        self.call_with_timeout("execute_query", Some(sql), Some(timeout), Replay::Never, |conn| {
            async move { conn.execute_query(sql, timeout).await }
        })
        .await
    }

    /// Ask the provider to plan `sql` without running it.
    pub async fn dry_run(&self, sql: &str) -> EngineResult<QueryResult> {
        let explain = format!("EXPLAIN {}", sql);
        let timeout = Duration::from_millis(self.settings.current().provider.request_timeout_ms);
        self.call_with_timeout("dry_run", Some(sql), Some(timeout), Replay::Transient, |conn| {
            let explain = explain.as_str();
            async move { conn.execute_query(explain, timeout).await }
        })
        .await
    }

    /// Liveness check on a pooled connection. Bypasses retry and the breaker.
    pub async fn health_check(&self) -> bool {
        match self.pool.acquire().await {
            Ok(conn) => conn.provider().health_check().await,
            Err(_) => false,
        }
    }

    async fn call<T, F, Fut>(&self, operation: &'static str, sql: Option<&str>, f: F) -> EngineResult<T>
    where
        F: Fn(Arc<dyn SchemaProvider>) -> Fut,
        Fut: Future<Output = Result<T, ProviderError>>,
    {
        self.call_with_timeout(operation, sql, None, Replay::Transient, f).await
    }

    async fn call_with_timeout<T, F, Fut>(
        &self,
        operation: &'static str,
        sql: Option<&str>,
        timeout: Option<Duration>,
        replay: Replay,
        f: F,
    ) -> EngineResult<T>
    where
        F: Fn(Arc<dyn SchemaProvider>) -> Fut,
        Fut: Future<Output = Result<T, ProviderError>>,
    {
        let settings = self.settings.current();
        let retry = RetryPolicy::from_settings(&settings.resilience.retry);
        let breaker_settings = &settings.resilience.breaker;
        let timeout =
            timeout.unwrap_or_else(|| Duration::from_millis(settings.provider.request_timeout_ms));

        let mut attempt = 0;
        loop {
            attempt += 1;

            let permit = self
                .breaker
                .acquire(breaker_settings)
                .map_err(|open| EngineError::CircuitOpen {
                    endpoint: self.endpoint().to_string(),
                    retry_after: open.retry_after,
                })?;

            match self.attempt(&f, timeout).await {
                Ok(value) => {
                    permit.success();
                    return Ok(value);
                }
                Err(AttemptError::Exhausted(waited)) => {
                    drop(permit);
                    return Err(EngineError::timeout("connection pool acquire", waited));
                }
                Err(AttemptError::Provider(err)) if err.is_transient() => {
                    permit.failure(breaker_settings);
                    if replay == Replay::Never || attempt >= retry.max_attempts() {
                        tracing::warn!(
                            endpoint = %self.endpoint(),
                            operation,
                            attempts = attempt,
                            error = %err,
                            "giving up after transient failures"
                        );
                        return Err(EngineError::Connectivity {
                            endpoint: self.endpoint().to_string(),
                            attempts: attempt,
                            source: err,
                        });
                    }
                    let delay = retry.backoff(attempt);
                    tracing::warn!(
                        endpoint = %self.endpoint(),
                        operation,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "transient provider failure, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(AttemptError::Provider(err)) => {
                    // The endpoint answered; it is healthy as far as the breaker cares.
                    permit.success();
                    return Err(EngineError::from_provider(self.endpoint(), sql, err));
                }
            }
        }
    }

    async fn attempt<T, F, Fut>(&self, f: &F, timeout: Duration) -> Result<T, AttemptError>
    where
        F: Fn(Arc<dyn SchemaProvider>) -> Fut,
        Fut: Future<Output = Result<T, ProviderError>>,
    {
        let mut conn = match self.pool.acquire().await {
            Ok(conn) => conn,
            Err(PoolError::Exhausted(waited)) => return Err(AttemptError::Exhausted(waited)),
            Err(PoolError::Connect(err)) => return Err(AttemptError::Provider(err)),
        };

        let result = match tokio::time::timeout(timeout, f(conn.provider())).await {
            Ok(result) => result,
            Err(_) => Err(ProviderError::Timeout(timeout)),
        };

        if let Err(err) = &result {
            if err.breaks_connection() {
                conn.mark_broken();
            }
        }
        result.map_err(AttemptError::Provider)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineSettings;
    use crate::error::ErrorKind;
    use crate::provider::{MemoryConnector, MemoryProvider};
    use crate::schema::{ColumnSchema, TableSchema};

    fn setup(threshold: u32, attempts: u32) -> (ResilientProvider, Arc<MemoryProvider>) {
        let provider = Arc::new(MemoryProvider::with_tables([TableSchema::new("shop", "sales")
            .column(ColumnSchema::new("revenue", "decimal(12,2)"))]));
        let mut settings = EngineSettings::default();
        settings.resilience.breaker.failure_threshold = threshold;
        settings.resilience.retry.max_attempts = attempts;
        settings.resilience.retry.jitter = 0.0;
        let handle = SettingsHandle::new(settings).unwrap();
        let connector = Arc::new(MemoryConnector::new("mem", provider.clone()));
        (ResilientProvider::new(connector, handle), provider)
    }

    #[tokio::test(start_paused = true)]
    async fn test_execute_query_is_attempted_once() {
        let (resilient, provider) = setup(5, 3);
        provider.fail_next(ProviderError::Timeout(Duration::from_secs(1)), 1);

        let err = resilient
            .execute_query("SELECT 1", Duration::from_secs(5))
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::Connectivity { attempts: 1, .. }));
        assert_eq!(provider.call_count(), 1);
        assert_eq!(resilient.circuit_state(), CircuitState::Closed);

        // Side-effect-free calls still retry.
        provider.reset_call_count();
        provider.fail_next(ProviderError::Timeout(Duration::from_secs(1)), 1);
        resilient.dry_run("SELECT 1").await.unwrap();
        assert_eq!(provider.call_count(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_failure_is_retried() {
        let (resilient, provider) = setup(5, 3);
        provider.fail_next(ProviderError::ConnectionReset("eof".into()), 2);

        let dbs = resilient.discover_databases().await.unwrap();
        assert_eq!(dbs.len(), 1);
        assert_eq!(provider.call_count(), 3);
        assert_eq!(resilient.circuit_state(), CircuitState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rejection_not_retried() {
        let (resilient, provider) = setup(5, 3);
        provider.reject_queries_containing("nope", ProviderError::rejected("1054", "Unknown column 'nope'"));

        let err = resilient
            .execute_query("SELECT nope FROM sales", Duration::from_secs(1))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
        assert_eq!(provider.call_count(), 1);
        assert_eq!(resilient.breaker().consecutive_failures(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhausted_retries_surface_connectivity() {
        let (resilient, provider) = setup(10, 3);
        provider.fail_always(ProviderError::Unreachable("refused".into()));

        let err = resilient.discover_tables("shop").await.unwrap_err();
        match err {
            EngineError::Connectivity { attempts, .. } => assert_eq!(attempts, 3),
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_provider_times_out() {
        let (resilient, provider) = setup(10, 1);
        provider.set_latency(Some(Duration::from_secs(60)));

        let err = resilient.describe_table("shop", "sales").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Connectivity);
    }

    #[tokio::test(start_paused = true)]
    async fn test_open_breaker_skips_network() {
        let (resilient, provider) = setup(2, 1);
        provider.fail_always(ProviderError::Timeout(Duration::from_secs(1)));
        for _ in 0..2 {
            assert!(resilient.discover_databases().await.is_err());
        }
        let calls = provider.call_count();

        let err = resilient.discover_databases().await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::CircuitOpen);
        assert_eq!(provider.call_count(), calls);
    }

    #[tokio::test(start_paused = true)]
    async fn test_dry_run_sends_explain() {
        let (resilient, provider) = setup(5, 3);
        resilient.dry_run("SELECT revenue FROM sales").await.unwrap();
        assert_eq!(provider.executed_queries(), vec!["EXPLAIN SELECT revenue FROM sales"]);
    }
}
