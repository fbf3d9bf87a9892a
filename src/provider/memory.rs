//! In-process provider backed by a mutable schema.
//!
//! Used for offline planning (the `plan` CLI command loads a JSON fixture
//! into it) and by the test suites, which script failures and mutate the
//! schema between change-detector checks.

use std::collections::{BTreeMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;

use super::{ProviderConnector, ProviderError, ProviderResult, SchemaProvider};
use crate::schema::{ColumnSchema, DatabaseInfo, QueryResult, TableInfo, TableSchema};

/// JSON fixture format accepted by [`MemoryProvider::from_json`].
///
/// ```json
/// {"databases": [{"name": "shop", "tables": [{"name": "sales", "columns": [...]}]}]}
/// ```
#[derive(Debug, Deserialize)]
struct Fixture {
    databases: Vec<FixtureDatabase>,
}

#[derive(Debug, Deserialize)]
struct FixtureDatabase {
    name: String,
    #[serde(default)]
    charset: Option<String>,
    #[serde(default)]
    collation: Option<String>,
    #[serde(default)]
    tables: Vec<TableSchema>,
}

#[derive(Debug, Default)]
struct MemorySchema {
    databases: BTreeMap<String, DatabaseInfo>,
    tables: BTreeMap<String, BTreeMap<String, TableSchema>>,
}

/// Provider holding its schema in memory, with scriptable faults.
#[derive(Debug)]
pub struct MemoryProvider {
    schema: RwLock<MemorySchema>,
    /// One-shot failures, consumed one per call.
    scripted: Mutex<VecDeque<ProviderError>>,
    /// Failure returned by every call while set.
    persistent: Mutex<Option<ProviderError>>,
    /// `(needle, error)`: `execute_query` fails when the SQL contains `needle`.
    rejections: Mutex<Vec<(String, ProviderError)>>,
    latency: Mutex<Option<Duration>>,
    healthy: AtomicBool,
    calls: AtomicUsize,
    queries: Mutex<Vec<String>>,
}

impl Default for MemoryProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryProvider {
    pub fn new() -> Self {
        Self {
            schema: RwLock::new(MemorySchema::default()),
            scripted: Mutex::new(VecDeque::new()),
            persistent: Mutex::new(None),
            rejections: Mutex::new(Vec::new()),
            latency: Mutex::new(None),
            healthy: AtomicBool::new(true),
            calls: AtomicUsize::new(0),
            queries: Mutex::new(Vec::new()),
        }
    }

    /// Build a provider from tables; databases are created as needed.
    pub fn with_tables(tables: impl IntoIterator<Item = TableSchema>) -> Self {
        let provider = Self::new();
        for table in tables {
            provider.put_table(table);
        }
        provider
    }

    /// Load a JSON schema fixture.
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        let fixture: Fixture = serde_json::from_str(json)?;
        let provider = Self::new();
        for db in fixture.databases {
            provider.put_database(DatabaseInfo {
                name: db.name.clone(),
                charset: db.charset,
                collation: db.collation,
            });
            for mut table in db.tables {
                table.database = db.name.clone();
                provider.put_table(table);
            }
        }
        Ok(provider)
    }

    pub fn put_database(&self, database: DatabaseInfo) {
        let mut schema = self.schema.write().unwrap_or_else(PoisonError::into_inner);
        schema.tables.entry(database.name.clone()).or_default();
        schema.databases.insert(database.name.clone(), database);
    }

    /// Insert or replace a table.
    pub fn put_table(&self, table: TableSchema) {
        let table = table.normalized();
        let mut schema = self.schema.write().unwrap_or_else(PoisonError::into_inner);
        schema
            .databases
            .entry(table.database.clone())
            .or_insert_with(|| DatabaseInfo::new(table.database.clone()));
        schema
            .tables
            .entry(table.database.clone())
            .or_default()
            .insert(table.name.clone(), table);
    }

    /// Remove a database and its tables. Returns false if it is unknown.
    pub fn drop_database(&self, database: &str) -> bool {
        let mut schema = self.schema.write().unwrap_or_else(PoisonError::into_inner);
        schema.tables.remove(database);
        schema.databases.remove(database).is_some()
    }

    pub fn remove_table(&self, database: &str, table: &str) -> Option<TableSchema> {
        let mut schema = self.schema.write().unwrap_or_else(PoisonError::into_inner);
        schema.tables.get_mut(database)?.remove(table)
    }

    /// Apply `f` to a table in place. Returns false if the table is unknown.
    pub fn alter_table(&self, database: &str, table: &str, f: impl FnOnce(&mut TableSchema)) -> bool {
        let mut schema = self.schema.write().unwrap_or_else(PoisonError::into_inner);
        match schema.tables.get_mut(database).and_then(|t| t.get_mut(table)) {
            Some(t) => {
                f(t);
                true
            }
            None => false,
        }
    }

    pub fn drop_column(&self, database: &str, table: &str, column: &str) -> bool {
        self.alter_table(database, table, |t| {
            t.columns.retain(|c| !c.name.eq_ignore_ascii_case(column));
        })
    }

    pub fn add_column(&self, database: &str, table: &str, column: ColumnSchema) -> bool {
        self.alter_table(database, table, |t| t.columns.push(column))
    }

    pub fn retype_column(&self, database: &str, table: &str, column: &str, data_type: &str) -> bool {
        self.alter_table(database, table, |t| {
            if let Some(c) = t.columns.iter_mut().find(|c| c.name.eq_ignore_ascii_case(column)) {
                c.data_type = data_type.to_string();
            }
        })
    }

    /// Fail the next `times` calls with `error`.
    pub fn fail_next(&self, error: ProviderError, times: usize) {
        let mut scripted = self.scripted.lock().unwrap_or_else(PoisonError::into_inner);
        for _ in 0..times {
            scripted.push_back(error.clone());
        }
    }

    /// Fail every call with `error` until [`MemoryProvider::clear_faults`].
    pub fn fail_always(&self, error: ProviderError) {
        *self.persistent.lock().unwrap_or_else(PoisonError::into_inner) = Some(error);
    }

    pub fn clear_faults(&self) {
        self.scripted
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
        *self.persistent.lock().unwrap_or_else(PoisonError::into_inner) = None;
    }

    /// Reject any query containing `needle` with `error`.
    pub fn reject_queries_containing(&self, needle: &str, error: ProviderError) {
        self.rejections
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((needle.to_string(), error));
    }

    /// Delay every answer by `latency`.
    pub fn set_latency(&self, latency: Option<Duration>) {
        *self.latency.lock().unwrap_or_else(PoisonError::into_inner) = latency;
    }

    pub fn set_healthy(&self, healthy: bool) {
        self.healthy.store(healthy, Ordering::SeqCst);
    }

    /// Number of calls that reached this provider (health checks excluded).
    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn reset_call_count(&self) {
        self.calls.store(0, Ordering::SeqCst);
    }

    /// SQL received by `execute_query`, in order.
    pub fn executed_queries(&self) -> Vec<String> {
        self.queries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Count the call, apply latency, then return the scripted fault if any.
    async fn enter(&self) -> ProviderResult<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);

        let latency = *self.latency.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }

        if let Some(err) = self
            .scripted
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop_front()
        {
            return Err(err);
        }
        if let Some(err) = self
            .persistent
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
        {
            return Err(err);
        }
        Ok(())
    }
}

#[async_trait]
impl SchemaProvider for MemoryProvider {
    async fn discover_databases(&self) -> ProviderResult<Vec<DatabaseInfo>> {
        self.enter().await?;
        let schema = self.schema.read().unwrap_or_else(PoisonError::into_inner);
        Ok(schema.databases.values().cloned().collect())
    }

    async fn discover_tables(&self, database: &str) -> ProviderResult<Vec<TableInfo>> {
        self.enter().await?;
        let schema = self.schema.read().unwrap_or_else(PoisonError::into_inner);
        let tables = schema
            .tables
            .get(database)
            .ok_or_else(|| ProviderError::NotFound(database.to_string()))?;
        Ok(tables
            .values()
            .map(|t| TableInfo {
                database: t.database.clone(),
                name: t.name.clone(),
                row_estimate: t.row_estimate,
            })
            .collect())
    }

    async fn describe_table(&self, database: &str, table: &str) -> ProviderResult<TableSchema> {
        self.enter().await?;
        let schema = self.schema.read().unwrap_or_else(PoisonError::into_inner);
        schema
            .tables
            .get(database)
            .and_then(|tables| tables.get(table))
            .cloned()
            .ok_or_else(|| ProviderError::NotFound(format!("{}.{}", database, table)))
    }

    async fn execute_query(&self, sql: &str, _timeout: Duration) -> ProviderResult<QueryResult> {
        self.enter().await?;
        self.queries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(sql.to_string());

        let rejections = self.rejections.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some((_, err)) = rejections.iter().find(|(needle, _)| sql.contains(needle.as_str())) {
            return Err(err.clone());
        }
        Ok(QueryResult::default())
    }

    async fn health_check(&self) -> bool {
        self.healthy.load(Ordering::SeqCst)
    }
}

/// Connector handing out the same shared [`MemoryProvider`].
#[derive(Debug, Clone)]
pub struct MemoryConnector {
    endpoint: String,
    provider: Arc<MemoryProvider>,
    connects: Arc<AtomicUsize>,
}

impl MemoryConnector {
    pub fn new(endpoint: impl Into<String>, provider: Arc<MemoryProvider>) -> Self {
        Self {
            endpoint: endpoint.into(),
            provider,
            connects: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn provider(&self) -> &Arc<MemoryProvider> {
        &self.provider
    }

    /// Number of connections opened so far.
    pub fn connect_count(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ProviderConnector for MemoryConnector {
    fn endpoint(&self) -> &str {
        &self.endpoint
    }

    async fn connect(&self) -> ProviderResult<Arc<dyn SchemaProvider>> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        Ok(self.provider.clone())
    }
}
