//! # Schemata
//!
//! Dynamic schema intelligence: turns business terms into validated SQL
//! against a schema discovered at runtime from a remote provider.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────┐
//! │                     EngineState                          │
//! │   resolve / build / validate / learn / reload / shutdown │
//! └─────────────────────────────────────────────────────────┘
//!         │                    │                    │
//!         ▼ [mapper]           ▼ [planner]          ▼ [detector]
//! ┌───────────────┐   ┌─────────────────┐   ┌──────────────────┐
//! │ term -> path  │   │ intent -> SQL   │   │ snapshot diffing │
//! │ (5 strategies)│   │ joins via FKs   │   │ + invalidation   │
//! └───────────────┘   └─────────────────┘   └──────────────────┘
//!         │                    │                    │
//!         ▼                    ▼                    ▼
//! ┌─────────────────────────────────────────────────────────┐
//! │        SchemaCatalog  ->  SchemaCache (TTL + tags)       │
//! └─────────────────────────────────────────────────────────┘
//!                          │ cache miss
//!                          ▼ [resilience]
//! ┌─────────────────────────────────────────────────────────┐
//! │   ResilientProvider: pool -> circuit breaker -> retry    │
//! └─────────────────────────────────────────────────────────┘
//!                          │
//!                          ▼ [provider]
//! ┌─────────────────────────────────────────────────────────┐
//! │        SchemaProvider (worker process, in-memory)        │
//! └─────────────────────────────────────────────────────────┘
//! ```

pub mod cache;
pub mod config;
pub mod detector;
pub mod engine;
pub mod error;
pub mod mapper;
pub mod planner;
pub mod provider;
pub mod resilience;
pub mod schema;
pub mod sql;
pub mod store;

pub use engine::{BuildOptions, EngineState};
pub use error::{EngineError, EngineResult, ErrorKind};

/// Common imports for callers of the engine.
pub mod prelude {
    pub use crate::config::{EngineSettings, SettingsHandle};
    pub use crate::detector::{ChangeKind, SchemaChange, SchemaChangeListener, Severity};
    pub use crate::engine::{BuildOptions, EngineState};
    pub use crate::error::{EngineError, EngineResult};
    pub use crate::mapper::{ElementFilter, MappingContext, MatchMethod, SemanticMapping};
    pub use crate::planner::{Aggregation, GeneratedQuery, QueryIntent, Scalar};
    pub use crate::schema::{ColumnSchema, ElementPath, TableSchema};
    pub use crate::sql::{Dialect, SortDir};
}
