//! Provider backed by a database worker child process.
//!
//! ```text
//! ┌──────────────────────────────────┐
//! │   WorkerProvider (SchemaProvider)│
//! │   - connection params per call   │
//! └──────────────────────────────────┘
//!                 │
//!   stdin (NDJSON)│ stdout (NDJSON)
//!                 ▼
//! ┌──────────────────────────────────┐
//! │   worker process (driver owner)  │
//! └──────────────────────────────────┘
//! ```
//!
//! The pool opens one worker per connection through [`WorkerConnector`].

mod client;
pub mod protocol;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

pub use client::WorkerClient;
use protocol::{methods, ConnectionOnly, ConnectionParams, ExecuteQueryParams, ListTablesParams, TableParams};

use super::{ProviderConnector, ProviderResult, SchemaProvider};
use crate::config::ProviderSettings;
use crate::schema::{DatabaseInfo, QueryResult, TableInfo, TableSchema};

/// [`SchemaProvider`] over a [`WorkerClient`].
pub struct WorkerProvider {
    client: WorkerClient,
    connection: ConnectionParams,
}

impl WorkerProvider {
    pub fn new(client: WorkerClient, driver: impl Into<String>, connection_string: impl Into<String>) -> Self {
        Self {
            client,
            connection: ConnectionParams {
                driver: driver.into(),
                connection_string: connection_string.into(),
            },
        }
    }

    pub fn driver(&self) -> &str {
        &self.connection.driver
    }
}

#[async_trait]
impl SchemaProvider for WorkerProvider {
    async fn discover_databases(&self) -> ProviderResult<Vec<DatabaseInfo>> {
        let response: protocol::ListSchemasResponse = self
            .client
            .request(
                methods::LIST_SCHEMAS,
                ConnectionOnly {
                    connection: self.connection.clone(),
                },
                None,
            )
            .await?;
        Ok(response.schemas.into_iter().map(Into::into).collect())
    }

    async fn discover_tables(&self, database: &str) -> ProviderResult<Vec<TableInfo>> {
        let response: protocol::ListTablesResponse = self
            .client
            .request(
                methods::LIST_TABLES,
                ListTablesParams {
                    connection: self.connection.clone(),
                    schema: database.to_string(),
                },
                None,
            )
            .await?;
        Ok(response.tables.into_iter().map(Into::into).collect())
    }

    async fn describe_table(&self, database: &str, table: &str) -> ProviderResult<TableSchema> {
        let response: protocol::GetTableResponse = self
            .client
            .request(
                methods::GET_TABLE,
                TableParams {
                    connection: self.connection.clone(),
                    schema: database.to_string(),
                    table: table.to_string(),
                },
                None,
            )
            .await?;
        Ok(response.table.into())
    }

    async fn execute_query(&self, sql: &str, timeout: Duration) -> ProviderResult<QueryResult> {
        let response: protocol::ExecuteQueryResponse = self
            .client
            .request(
                methods::EXECUTE_QUERY,
                ExecuteQueryParams {
                    connection: self.connection.clone(),
                    sql: sql.to_string(),
                    timeout_ms: timeout.as_millis() as u64,
                },
                Some(timeout),
            )
            .await?;
        Ok(QueryResult {
            columns: response.columns,
            rows: response.rows,
            elapsed_ms: response.elapsed_ms,
        })
    }

    async fn health_check(&self) -> bool {
        if !self.client.is_alive() {
            return false;
        }
        let ping: ProviderResult<protocol::PingResponse> = self
            .client
            .request(
                methods::PING,
                ConnectionOnly {
                    connection: self.connection.clone(),
                },
                None,
            )
            .await;
        matches!(ping, Ok(p) if p.ok)
    }
}

/// Opens a fresh worker process per pooled connection.
#[derive(Debug, Clone)]
pub struct WorkerConnector {
    endpoint: String,
    worker_path: PathBuf,
    driver: String,
    connection_string: String,
    request_timeout: Duration,
}

impl WorkerConnector {
    pub fn new(
        worker_path: impl Into<PathBuf>,
        driver: impl Into<String>,
        connection_string: impl Into<String>,
        request_timeout: Duration,
    ) -> Self {
        let driver = driver.into();
        Self {
            endpoint: format!("worker:{}", driver),
            worker_path: worker_path.into(),
            driver,
            connection_string: connection_string.into(),
            request_timeout,
        }
    }

    /// Build from provider settings, expanding `${VAR}` in the connection string.
    pub fn from_settings(settings: &ProviderSettings) -> Result<Self, crate::config::SettingsError> {
        let worker_path = settings
            .worker_path
            .clone()
            .ok_or_else(|| crate::config::SettingsError::invalid("provider.worker_path", "required for the worker provider"))?;
        let mut connector = Self::new(
            worker_path,
            settings.driver.clone(),
            settings.resolved_connection_string()?,
            Duration::from_millis(settings.request_timeout_ms),
        );
        if let Some(endpoint) = &settings.endpoint {
            connector.endpoint = endpoint.clone();
        }
        Ok(connector)
    }
}

#[async_trait]
impl ProviderConnector for WorkerConnector {
    fn endpoint(&self) -> &str {
        &self.endpoint
    }

    async fn connect(&self) -> ProviderResult<Arc<dyn SchemaProvider>> {
        let client = WorkerClient::spawn(&self.worker_path, &[], self.request_timeout).await?;
        tracing::debug!(endpoint = %self.endpoint, "spawned worker connection");
        Ok(Arc::new(WorkerProvider::new(
            client,
            self.driver.clone(),
            self.connection_string.clone(),
        )))
    }
}
