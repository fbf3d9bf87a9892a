//! Remote schema/query provider abstraction.
//!
//! The engine never talks to a database directly. Everything goes through a
//! [`SchemaProvider`], and every provider call made by the engine is wrapped
//! by the resilience layer (`crate::resilience`).
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                  ResilientProvider (pool/retry/breaker)         │
//! └─────────────────────────────────────────────────────────────────┘
//!                           │ ProviderConnector::connect()
//!                           ▼
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                      SchemaProvider                             │
//! │  - discover_databases()       - execute_query(sql, timeout)     │
//! │  - discover_tables(db)        - health_check()                  │
//! │  - describe_table(db, table)                                    │
//! └─────────────────────────────────────────────────────────────────┘
//!          │                                   │
//!          ▼                                   ▼
//!   WorkerProvider (NDJSON child)       MemoryProvider (in-process)
//! ```

pub mod memory;
pub mod worker;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

use crate::schema::{DatabaseInfo, QueryResult, TableInfo, TableSchema};

pub use memory::{MemoryConnector, MemoryProvider};
pub use worker::{WorkerConnector, WorkerProvider};

/// Result type for provider operations.
pub type ProviderResult<T> = Result<T, ProviderError>;

/// Errors raised by a provider call.
///
/// Only [`ProviderError::is_transient`] failures are retried or counted by
/// the circuit breaker; everything else is the provider answering "no".
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ProviderError {
    /// No response within the allotted time.
    #[error("request timed out after {0:?}")]
    Timeout(Duration),

    /// The connection dropped mid-request.
    #[error("connection reset: {0}")]
    ConnectionReset(String),

    /// The provider could not be reached at all.
    #[error("provider unreachable: {0}")]
    Unreachable(String),

    /// The provider rejected the request (syntax, unknown column, ...).
    #[error("rejected by provider ({code}): {message}")]
    Rejected { code: String, message: String },

    /// The requested database or table does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// Malformed response or request.
    #[error("protocol error: {0}")]
    Protocol(String),
}

impl ProviderError {
    pub fn rejected(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Rejected {
            code: code.into(),
            message: message.into(),
        }
    }

    /// Timeouts and connection failures.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::Timeout(_) | Self::ConnectionReset(_) | Self::Unreachable(_)
        )
    }

    /// Failures after which the connection should not be reused.
    pub fn breaks_connection(&self) -> bool {
        matches!(self, Self::ConnectionReset(_) | Self::Unreachable(_))
    }
}

/// A remote source of schema metadata that can also run queries.
///
/// All operations except `execute_query` are idempotent and side-effect free.
#[async_trait]
pub trait SchemaProvider: Send + Sync {
    /// List visible databases.
    async fn discover_databases(&self) -> ProviderResult<Vec<DatabaseInfo>>;

    /// List tables in a database.
    async fn discover_tables(&self, database: &str) -> ProviderResult<Vec<TableInfo>>;

    /// Describe a table: columns, keys and indexes.
    async fn describe_table(&self, database: &str, table: &str) -> ProviderResult<TableSchema>;

    /// Run a SQL statement.
    async fn execute_query(&self, sql: &str, timeout: Duration) -> ProviderResult<QueryResult>;

    /// Cheap liveness check.
    async fn health_check(&self) -> bool;

    /// Describe several tables of one database concurrently.
    async fn describe_tables(
        &self,
        database: &str,
        tables: &[String],
    ) -> ProviderResult<Vec<TableSchema>> {
        let futures: Vec<_> = tables
            .iter()
            .map(|table| self.describe_table(database, table))
            .collect();

        futures::future::join_all(futures).await.into_iter().collect()
    }
}

/// Opens provider connections for the pool.
#[async_trait]
pub trait ProviderConnector: Send + Sync {
    /// Logical endpoint name, used to key circuit breakers and logs.
    fn endpoint(&self) -> &str;

    /// Open a new connection.
    async fn connect(&self) -> ProviderResult<Arc<dyn SchemaProvider>>;
}
